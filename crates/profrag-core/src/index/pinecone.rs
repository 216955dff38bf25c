//! Pinecone REST backend.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{IndexError, VectorIndex};
use crate::types::{ProfessorMatch, ReviewMetadata};

/// Control plane, used once to resolve an index name to its data-plane host
pub const PINECONE_CONTROL_URL: &str = "https://api.pinecone.io";

pub const DEFAULT_INDEX_NAME: &str = "rag";

pub const DEFAULT_NAMESPACE: &str = "professor-reviews";

const API_VERSION: &str = "2024-07";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    namespace: &'a str,
    vector: Vec<f32>,
    top_k: u64,
    include_metadata: bool,
    include_values: bool,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<PineconeMatch>,
}

#[derive(Debug, Deserialize)]
struct PineconeMatch {
    id: String,
    #[serde(default)]
    score: Option<f32>,
    #[serde(default)]
    metadata: Option<ReviewMetadata>,
}

impl From<PineconeMatch> for ProfessorMatch {
    fn from(m: PineconeMatch) -> Self {
        ProfessorMatch {
            id: m.id,
            score: m.score,
            metadata: m.metadata.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DescribeIndexResponse {
    host: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

fn error_message(body: String) -> String {
    match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(ErrorResponse {
            error: Some(detail), ..
        }) => detail.message,
        Ok(ErrorResponse {
            message: Some(message),
            ..
        }) => message,
        _ => body,
    }
}

/// Queries one namespace of a Pinecone index
#[derive(Clone)]
pub struct PineconeIndex {
    client: Client,
    api_key: String,
    host: String,
    namespace: String,
}

impl PineconeIndex {
    /// Create an index handle for a known data-plane host
    pub fn new(client: Client, api_key: String, host: &str, namespace: String) -> Self {
        Self {
            client,
            api_key,
            host: normalize_host(host),
            namespace,
        }
    }

    /// Resolve the index host through the control plane, then create the handle
    pub async fn connect(
        client: Client,
        api_key: String,
        index_name: &str,
        namespace: String,
    ) -> Result<Self, IndexError> {
        let host = describe_index_host(&client, &api_key, PINECONE_CONTROL_URL, index_name).await?;
        info!("Resolved Pinecone index {} to {}", index_name, host);
        Ok(Self::new(client, api_key, &host, namespace))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

async fn describe_index_host(
    client: &Client,
    api_key: &str,
    control_url: &str,
    index_name: &str,
) -> Result<String, IndexError> {
    if index_name.is_empty() {
        return Err(IndexError::Configuration("index name cannot be empty".into()));
    }

    let response = client
        .get(format!("{}/indexes/{}", control_url.trim_end_matches('/'), index_name))
        .header("Api-Key", api_key)
        .header("X-Pinecone-API-Version", API_VERSION)
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(IndexError::Api {
            status: status.as_u16(),
            message: error_message(body),
        });
    }

    let described: DescribeIndexResponse =
        serde_json::from_str(&body).map_err(|e| IndexError::Parse(e.to_string()))?;
    Ok(described.host)
}

fn normalize_host(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn query(&self, vector: Vec<f32>, top_k: u64) -> Result<Vec<ProfessorMatch>, IndexError> {
        debug!(
            "Querying Pinecone namespace {} (top_k: {}, dim: {})",
            self.namespace,
            top_k,
            vector.len()
        );

        let response = self
            .client
            .post(format!("{}/query", self.host))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(&QueryRequest {
                namespace: &self.namespace,
                vector,
                top_k,
                include_metadata: true,
                include_values: false,
            })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(IndexError::Api {
                status: status.as_u16(),
                message: error_message(body),
            });
        }

        let parsed: QueryResponse =
            serde_json::from_str(&body).map_err(|e| IndexError::Parse(e.to_string()))?;

        let matches: Vec<ProfessorMatch> = parsed
            .matches
            .into_iter()
            .take(top_k as usize)
            .map(ProfessorMatch::from)
            .collect();

        debug!("Pinecone returned {} matches", matches.len());
        Ok(matches)
    }
}
