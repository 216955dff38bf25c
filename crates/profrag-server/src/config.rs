//! Upstream settings shared by the server and the `profrag` CLI.

use std::sync::Arc;
use std::time::Duration;

use clap::{Args, ValueEnum};
use profrag_core::embeddings::{DEFAULT_EMBEDDING_MODEL, DEFAULT_INFERENCE_URL};
use profrag_core::generation::{
    DEFAULT_CHAT_MODEL, DEFAULT_CHAT_URL, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE,
};
use profrag_core::index::{
    IndexError, DEFAULT_COLLECTION, DEFAULT_INDEX_NAME, DEFAULT_NAMESPACE, DEFAULT_TOP_K,
};
use profrag_core::{
    ChatCompletionClient, EmbeddingService, PineconeIndex, PipelineSettings, QdrantIndex,
    ReviewPipeline, VectorIndex,
};
use thiserror::Error;
use tracing::{info, warn};

const MAX_TOP_K: u64 = 10;
const MAX_TEMPERATURE: f32 = 2.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VectorBackend {
    Pinecone,
    Qdrant,
}

#[derive(Debug, Clone, Args)]
pub struct UpstreamArgs {
    /// Hugging Face access token for embeddings and chat completions
    #[arg(long, env = "HF_TOKEN", hide_env_values = true)]
    pub hf_token: String,

    /// Feature-extraction base URL
    #[arg(long, env = "HF_INFERENCE_URL", default_value = DEFAULT_INFERENCE_URL)]
    pub hf_inference_url: String,

    /// OpenAI-compatible chat completions base URL
    #[arg(long, env = "HF_CHAT_URL", default_value = DEFAULT_CHAT_URL)]
    pub hf_chat_url: String,

    #[arg(long, env = "EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL)]
    pub embedding_model: String,

    #[arg(long, env = "CHAT_MODEL", default_value = DEFAULT_CHAT_MODEL)]
    pub chat_model: String,

    /// Output cap per answer
    #[arg(long, env = "MAX_TOKENS", default_value_t = DEFAULT_MAX_TOKENS)]
    pub max_tokens: u32,

    #[arg(long, env = "TEMPERATURE", default_value_t = DEFAULT_TEMPERATURE)]
    pub temperature: f32,

    /// Reviews retrieved per question
    #[arg(long, env = "TOP_K", default_value_t = DEFAULT_TOP_K)]
    pub top_k: u64,

    #[arg(long, env = "VECTOR_BACKEND", default_value = "pinecone", value_enum)]
    pub vector_backend: VectorBackend,

    #[arg(long, env = "PINECONE_API_KEY", hide_env_values = true)]
    pub pinecone_api_key: Option<String>,

    #[arg(long, env = "PINECONE_INDEX", default_value = DEFAULT_INDEX_NAME)]
    pub pinecone_index: String,

    /// Data-plane host; resolved through the control plane when unset
    #[arg(long, env = "PINECONE_INDEX_HOST")]
    pub pinecone_index_host: Option<String>,

    /// Namespace holding the reviews (Pinecone namespace, Qdrant payload filter)
    #[arg(long, env = "PINECONE_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub pinecone_namespace: String,

    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6334")]
    pub qdrant_url: String,

    #[arg(long, env = "QDRANT_API_KEY", hide_env_values = true)]
    pub qdrant_api_key: Option<String>,

    #[arg(long, env = "QDRANT_COLLECTION", default_value = DEFAULT_COLLECTION)]
    pub qdrant_collection: String,

    /// Connect timeout for upstream calls, in seconds
    #[arg(long, env = "UPSTREAM_TIMEOUT_SECS", default_value_t = 30)]
    pub upstream_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IndexConfig {
    Pinecone {
        api_key: String,
        index: String,
        host: Option<String>,
        namespace: String,
    },
    Qdrant {
        url: String,
        api_key: Option<String>,
        collection: String,
        namespace: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamConfig {
    pub hf_token: String,
    pub inference_url: String,
    pub chat_url: String,
    pub embedding_model: String,
    pub chat_model: String,
    pub index: IndexConfig,
    pub settings: PipelineSettings,
    pub timeout: Duration,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl UpstreamConfig {
    pub fn from_args(args: UpstreamArgs) -> Result<Self, ConfigError> {
        if args.hf_token.trim().is_empty() {
            return Err(ConfigError::Invalid("HF_TOKEN must not be empty".into()));
        }

        if !(1..=MAX_TOP_K).contains(&args.top_k) {
            return Err(ConfigError::Invalid(format!(
                "TOP_K must be between 1 and {MAX_TOP_K}"
            )));
        }

        if !(0.0..=MAX_TEMPERATURE).contains(&args.temperature) {
            return Err(ConfigError::Invalid(format!(
                "TEMPERATURE must be between 0.0 and {MAX_TEMPERATURE}"
            )));
        }

        if args.max_tokens == 0 {
            return Err(ConfigError::Invalid("MAX_TOKENS must be positive".into()));
        }

        if args.upstream_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "UPSTREAM_TIMEOUT_SECS must be positive".into(),
            ));
        }

        let index = match args.vector_backend {
            VectorBackend::Pinecone => {
                let api_key = non_blank(args.pinecone_api_key).ok_or_else(|| {
                    ConfigError::Invalid(
                        "PINECONE_API_KEY is required when VECTOR_BACKEND=pinecone".into(),
                    )
                })?;
                IndexConfig::Pinecone {
                    api_key,
                    index: args.pinecone_index,
                    host: non_blank(args.pinecone_index_host),
                    namespace: args.pinecone_namespace,
                }
            }
            VectorBackend::Qdrant => IndexConfig::Qdrant {
                url: args.qdrant_url,
                api_key: non_blank(args.qdrant_api_key),
                collection: args.qdrant_collection,
                namespace: args.pinecone_namespace,
            },
        };

        Ok(Self {
            hf_token: args.hf_token,
            inference_url: args.hf_inference_url,
            chat_url: args.hf_chat_url,
            embedding_model: args.embedding_model,
            chat_model: args.chat_model,
            index,
            settings: PipelineSettings {
                top_k: args.top_k,
                max_tokens: args.max_tokens,
                temperature: args.temperature,
                ..PipelineSettings::default()
            },
            timeout: Duration::from_secs(args.upstream_timeout_secs),
        })
    }
}

/// Wire the three upstream clients into a pipeline. Resolves the Pinecone
/// host over the network when it was not configured.
pub async fn build_pipeline(config: &UpstreamConfig) -> Result<ReviewPipeline, IndexError> {
    let client = reqwest::Client::builder()
        .connect_timeout(config.timeout)
        .build()?;

    let embedder = EmbeddingService::new_custom(
        client.clone(),
        config.hf_token.clone(),
        config.inference_url.clone(),
        config.embedding_model.clone(),
    );

    let generator = ChatCompletionClient::new_custom(
        client.clone(),
        config.hf_token.clone(),
        config.chat_url.clone(),
        config.chat_model.clone(),
    );

    let index: Arc<dyn VectorIndex> = match &config.index {
        IndexConfig::Pinecone {
            api_key,
            index,
            host,
            namespace,
        } => {
            let pinecone = match host {
                Some(host) => PineconeIndex::new(client, api_key.clone(), host, namespace.clone()),
                None => {
                    PineconeIndex::connect(client, api_key.clone(), index, namespace.clone())
                        .await?
                }
            };
            info!(
                index = %index,
                host = pinecone.host(),
                namespace = pinecone.namespace(),
                "Pinecone index ready"
            );
            Arc::new(pinecone)
        }
        IndexConfig::Qdrant {
            url,
            api_key,
            collection,
            namespace,
        } => {
            let qdrant = QdrantIndex::new(url, api_key.clone(), collection.clone(), namespace.clone())?;
            if !qdrant.health_check().await {
                warn!(url = %url, "Qdrant not reachable yet, queries will fail until it is");
            }
            Arc::new(qdrant)
        }
    };

    info!(
        embedding_model = embedder.model(),
        embedding_url = embedder.base_url(),
        chat_model = generator.model(),
        chat_url = generator.base_url(),
        top_k = config.settings.top_k,
        "pipeline ready"
    );

    Ok(ReviewPipeline::new(
        Arc::new(embedder),
        index,
        Arc::new(generator),
        config.settings.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        upstream: UpstreamArgs,
    }

    fn parse(args: &[&str]) -> UpstreamArgs {
        let mut argv = vec!["test", "--hf-token", "hf_test"];
        argv.extend_from_slice(args);
        TestCli::parse_from(argv).upstream
    }

    #[test]
    fn test_pinecone_requires_api_key() {
        let err = UpstreamConfig::from_args(UpstreamArgs {
            pinecone_api_key: None,
            ..parse(&[])
        })
        .unwrap_err();

        assert!(err.to_string().contains("PINECONE_API_KEY"));
    }

    #[test]
    fn test_defaults() {
        let config =
            UpstreamConfig::from_args(parse(&["--pinecone-api-key", "pc-key"])).unwrap();

        assert_eq!(config.settings.top_k, 3);
        assert_eq!(config.settings.max_tokens, 250);
        assert_eq!(config.chat_url, DEFAULT_CHAT_URL);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(
            config.index,
            IndexConfig::Pinecone {
                api_key: "pc-key".into(),
                index: "rag".into(),
                host: None,
                namespace: "professor-reviews".into(),
            }
        );
    }

    #[test]
    fn test_qdrant_backend_uses_namespace() {
        let config = UpstreamConfig::from_args(parse(&[
            "--vector-backend",
            "qdrant",
            "--pinecone-namespace",
            "spring-term",
        ]))
        .unwrap();

        match config.index {
            IndexConfig::Qdrant {
                namespace,
                collection,
                api_key,
                ..
            } => {
                assert_eq!(namespace, "spring-term");
                assert_eq!(collection, DEFAULT_COLLECTION);
                assert!(api_key.is_none());
            }
            other => panic!("unexpected index config: {other:?}"),
        }
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let base = || parse(&["--pinecone-api-key", "pc-key"]);

        assert!(UpstreamConfig::from_args(UpstreamArgs { top_k: 0, ..base() }).is_err());
        assert!(UpstreamConfig::from_args(UpstreamArgs { top_k: 11, ..base() }).is_err());
        assert!(UpstreamConfig::from_args(UpstreamArgs {
            temperature: 2.5,
            ..base()
        })
        .is_err());
        assert!(UpstreamConfig::from_args(UpstreamArgs {
            hf_token: "  ".into(),
            ..base()
        })
        .is_err());
    }
}
