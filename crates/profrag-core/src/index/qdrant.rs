//! Qdrant backend.
//!
//! Points carry the review payload (`professor`, `review`, `subject`, `stars`)
//! plus a `namespace` field so several review sets can share one collection.

use async_trait::async_trait;
use qdrant_client::qdrant::{
    point_id::PointIdOptions, Condition, Filter, PointId, SearchPointsBuilder, Value,
};
use qdrant_client::Qdrant;
use std::collections::HashMap;
use tracing::{debug, warn};

use super::{IndexError, VectorIndex};
use crate::types::{ProfessorMatch, ReviewMetadata, Stars};

/// Collection name for professor reviews
pub const DEFAULT_COLLECTION: &str = "professor_reviews";

/// Review index backed by a Qdrant collection
pub struct QdrantIndex {
    client: Qdrant,
    collection: String,
    namespace: String,
}

impl QdrantIndex {
    /// Create a new index handle. Does not contact the server.
    pub fn new(
        url: &str,
        api_key: Option<String>,
        collection: String,
        namespace: String,
    ) -> Result<Self, IndexError> {
        debug!("Connecting to Qdrant at {}", url);

        let mut builder = Qdrant::from_url(url);
        if let Some(key) = api_key {
            builder = builder.api_key(key);
        }

        let client = builder
            .build()
            .map_err(|e| IndexError::Qdrant(format!("Failed to create Qdrant client: {}", e)))?;

        Ok(Self {
            client,
            collection,
            namespace,
        })
    }

    /// Check if the server is reachable
    pub async fn health_check(&self) -> bool {
        match self.client.health_check().await {
            Ok(_) => true,
            Err(e) => {
                warn!("Qdrant health check failed: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn query(&self, vector: Vec<f32>, top_k: u64) -> Result<Vec<ProfessorMatch>, IndexError> {
        debug!(
            "Searching collection {} namespace {} (limit: {})",
            self.collection, self.namespace, top_k
        );

        let filter = Filter::must([Condition::matches("namespace", self.namespace.clone())]);

        let search_result = self
            .client
            .search_points(
                SearchPointsBuilder::new(self.collection.as_str(), vector, top_k)
                    .filter(filter)
                    .with_payload(true),
            )
            .await
            .map_err(|e| IndexError::Qdrant(format!("Failed to search reviews: {}", e)))?;

        let matches: Vec<ProfessorMatch> = search_result
            .result
            .into_iter()
            .filter_map(|point| {
                let fallback_id = point.id.and_then(point_id_string);
                payload_to_match(&point.payload, fallback_id, point.score)
            })
            .collect();

        debug!("Found {} matching reviews", matches.len());
        Ok(matches)
    }
}

fn payload_to_match(
    payload: &HashMap<String, Value>,
    fallback_id: Option<String>,
    score: f32,
) -> Option<ProfessorMatch> {
    let id = get_string(payload, "professor").or(fallback_id)?;

    Some(ProfessorMatch {
        id,
        score: Some(score),
        metadata: ReviewMetadata {
            review: get_string(payload, "review").unwrap_or_default(),
            subject: get_string(payload, "subject").unwrap_or_default(),
            stars: get_stars(payload, "stars").unwrap_or_default(),
        },
    })
}

fn point_id_string(point_id: PointId) -> Option<String> {
    match point_id.point_id_options? {
        PointIdOptions::Uuid(uuid_str) => Some(uuid_str),
        PointIdOptions::Num(n) => Some(n.to_string()),
    }
}

// Helpers to extract values from payload
fn get_string(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
    payload.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

fn get_stars(payload: &HashMap<String, Value>, key: &str) -> Option<Stars> {
    let value = payload.get(key)?;
    value
        .as_double()
        .map(Stars::Number)
        .or_else(|| value.as_integer().map(|i| Stars::Number(i as f64)))
        .or_else(|| value.as_str().map(|s| Stars::Text(s.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(entries: &[(&str, Value)]) -> HashMap<String, Value> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_payload_to_match() {
        let p = payload(&[
            ("professor", Value::from("Dr. Alan Grant")),
            ("review", Value::from("Makes mechanics easy")),
            ("subject", Value::from("Physics 101")),
            ("stars", Value::from(4_i64)),
            ("namespace", Value::from("professor-reviews")),
        ]);

        let m = payload_to_match(&p, Some("uuid".into()), 0.8).unwrap();
        assert_eq!(m.id, "Dr. Alan Grant");
        assert_eq!(m.metadata.review, "Makes mechanics easy");
        assert_eq!(m.metadata.subject, "Physics 101");
        assert_eq!(m.metadata.stars.to_string(), "4");
        assert_eq!(m.score, Some(0.8));
    }

    #[test]
    fn test_payload_falls_back_to_point_id() {
        let p = payload(&[("stars", Value::from(3.5_f64))]);
        let m = payload_to_match(&p, Some("Dr. Who".into()), 0.1).unwrap();
        assert_eq!(m.id, "Dr. Who");
        assert_eq!(m.metadata.stars, Stars::Number(3.5));

        assert!(payload_to_match(&p, None, 0.1).is_none());
    }

    #[test]
    fn test_point_id_string() {
        let num = PointId {
            point_id_options: Some(PointIdOptions::Num(42)),
        };
        assert_eq!(point_id_string(num), Some("42".to_string()));
    }

    // Requires a running Qdrant instance with a populated collection
    #[tokio::test]
    #[ignore]
    async fn test_live_search() {
        let index = QdrantIndex::new(
            "http://localhost:6334",
            None,
            DEFAULT_COLLECTION.to_string(),
            "professor-reviews".to_string(),
        )
        .unwrap();

        let results = index
            .query(vec![0.1; crate::embeddings::EMBEDDING_DIM], 3)
            .await
            .unwrap();
        assert!(results.len() <= 3);
    }
}
