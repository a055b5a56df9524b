// src/kb/qdrant.rs
// Qdrant-backed vector index for KB chunks

use std::collections::HashMap;

use async_trait::async_trait;
use qdrant_client::Qdrant;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    Condition, Filter, PointId, SearchPointsBuilder, Value as QdrantValue,
    point_id::PointIdOptions,
};
use tracing::debug;

use crate::error::{AgentError, Result};
use crate::kb::{KbHit, SearchFilter, VectorIndex};

/// Vector index over a single Qdrant collection of KB chunks
pub struct QdrantIndex {
    client: Qdrant,
    collection: String,
}

impl QdrantIndex {
    /// Connect to Qdrant. The collection is owned by ingestion; this
    /// client only reads, so a missing collection surfaces at query time
    /// rather than startup.
    pub fn connect(url: &str, api_key: Option<&str>, collection: &str) -> Result<Self> {
        let mut builder = Qdrant::from_url(url).skip_compatibility_check();
        if let Some(key) = api_key {
            builder = builder.api_key(key.to_string());
        }
        let client = builder
            .build()
            .map_err(|e| AgentError::Index(format!("failed to connect to Qdrant: {e}")))?;

        Ok(Self {
            client,
            collection: collection.to_string(),
        })
    }

    fn build_filter(filter: &SearchFilter) -> Option<Filter> {
        if filter.is_empty() {
            return None;
        }

        let mut conditions = Vec::new();
        if let Some(ref entry_type) = filter.entry_type {
            conditions.push(Condition::matches("entry_type", entry_type.clone()));
        }
        if let Some(ref user_class) = filter.user_class {
            conditions.push(Condition::matches("user_class", user_class.clone()));
        }
        if let Some(ref parent_id) = filter.parent_entry_id {
            conditions.push(Condition::matches("parent_entry_id", parent_id.clone()));
        }
        Some(Filter::must(conditions))
    }

    fn point_to_hit(
        id: Option<PointId>,
        payload: HashMap<String, QdrantValue>,
        score: f32,
    ) -> KbHit {
        let chunk_id = payload_str(&payload, "chunk_id")
            .or_else(|| id.and_then(render_point_id))
            .unwrap_or_default();

        KbHit {
            id: chunk_id,
            parent_entry_id: payload_str(&payload, "parent_entry_id"),
            parent_title: payload_str(&payload, "parent_title")
                .or_else(|| payload_str(&payload, "title")),
            chunk_index: payload_u32(&payload, "chunk_index"),
            total_chunks: payload_u32(&payload, "total_chunks"),
            section_type: payload_str(&payload, "section_type"),
            entry_type: payload_str(&payload, "entry_type").unwrap_or_else(|| "unknown".into()),
            user_class: payload_str(&payload, "user_class").unwrap_or_else(|| "unknown".into()),
            category: payload_str(&payload, "category"),
            tags: payload_list(&payload, "tags"),
            related_titles: payload_list(&payload, "related_titles"),
            content: payload_str(&payload, "content").unwrap_or_default(),
            score,
        }
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn search(&self, vector: &[f32], filter: &SearchFilter, k: usize) -> Result<Vec<KbHit>> {
        let mut request = SearchPointsBuilder::new(&self.collection, vector.to_vec(), k as u64)
            .with_payload(true);
        if let Some(qdrant_filter) = Self::build_filter(filter) {
            request = request.filter(qdrant_filter);
        }

        let response = self
            .client
            .search_points(request)
            .await
            .map_err(|e| AgentError::TransientUpstream {
                stage: "vector_search",
                message: e.to_string(),
            })?;

        debug!(
            collection = %self.collection,
            requested = k,
            returned = response.result.len(),
            "Qdrant search completed"
        );

        Ok(response
            .result
            .into_iter()
            .map(|point| Self::point_to_hit(point.id, point.payload, point.score))
            .collect())
    }

    async fn probe(&self) -> Result<()> {
        self.client
            .health_check()
            .await
            .map(|_| ())
            .map_err(|e| AgentError::Index(format!("health check failed: {e}")))
    }
}

fn payload_str(payload: &HashMap<String, QdrantValue>, key: &str) -> Option<String> {
    match payload.get(key)?.kind.as_ref()? {
        Kind::StringValue(s) => Some(s.clone()),
        _ => None,
    }
}

fn payload_u32(payload: &HashMap<String, QdrantValue>, key: &str) -> Option<u32> {
    match payload.get(key)?.kind.as_ref()? {
        Kind::IntegerValue(i) => u32::try_from(*i).ok(),
        Kind::DoubleValue(d) if *d >= 0.0 => Some(*d as u32),
        _ => None,
    }
}

/// Lists are stored either as native Qdrant lists or comma-joined strings
fn payload_list(payload: &HashMap<String, QdrantValue>, key: &str) -> Vec<String> {
    match payload.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::ListValue(list)) => list
            .values
            .iter()
            .filter_map(|v| match v.kind.as_ref() {
                Some(Kind::StringValue(s)) => Some(s.clone()),
                _ => None,
            })
            .collect(),
        Some(Kind::StringValue(joined)) => joined
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    }
}

fn render_point_id(id: PointId) -> Option<String> {
    match id.point_id_options? {
        PointIdOptions::Num(n) => Some(n.to_string()),
        PointIdOptions::Uuid(u) => Some(u),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string_value(s: &str) -> QdrantValue {
        QdrantValue {
            kind: Some(Kind::StringValue(s.to_string())),
        }
    }

    fn int_value(i: i64) -> QdrantValue {
        QdrantValue {
            kind: Some(Kind::IntegerValue(i)),
        }
    }

    #[test]
    fn test_point_to_hit_decodes_payload() {
        let mut payload = HashMap::new();
        payload.insert("chunk_id".to_string(), string_value("chunk-3"));
        payload.insert("parent_entry_id".to_string(), string_value("kb-42"));
        payload.insert("parent_title".to_string(), string_value("Upload Photos Guide"));
        payload.insert("chunk_index".to_string(), int_value(2));
        payload.insert("total_chunks".to_string(), int_value(5));
        payload.insert("entry_type".to_string(), string_value("how_to"));
        payload.insert("user_class".to_string(), string_value("external"));
        payload.insert("content".to_string(), string_value("Click Add Photos."));
        payload.insert("tags".to_string(), string_value("photos, listings"));

        let hit = QdrantIndex::point_to_hit(None, payload, 0.82);
        assert_eq!(hit.id, "chunk-3");
        assert_eq!(hit.parent_entry_id.as_deref(), Some("kb-42"));
        assert_eq!(hit.title(), "Upload Photos Guide");
        assert_eq!(hit.chunk_index, Some(2));
        assert_eq!(hit.total_chunks, Some(5));
        assert_eq!(hit.tags, vec!["photos", "listings"]);
        assert_eq!(hit.score, 0.82);
    }

    #[test]
    fn test_point_id_fallback() {
        let payload = HashMap::new();
        let id = PointId {
            point_id_options: Some(PointIdOptions::Num(17)),
        };
        let hit = QdrantIndex::point_to_hit(Some(id), payload, 0.5);
        assert_eq!(hit.id, "17");
        assert_eq!(hit.entry_type, "unknown");
    }

    #[test]
    fn test_build_filter_empty_is_none() {
        assert!(QdrantIndex::build_filter(&SearchFilter::default()).is_none());
        let filter = SearchFilter {
            entry_type: Some("error".into()),
            ..SearchFilter::default()
        };
        assert!(QdrantIndex::build_filter(&filter).is_some());
    }
}
