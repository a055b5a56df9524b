// src/kb/mod.rs
// Knowledge-base read model and vector index seam

pub mod qdrant;

pub use qdrant::QdrantIndex;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

/// A chunk retrieved from the vector index.
///
/// Chunks are produced at ingestion time (outside this service) by
/// splitting KB entries; `parent_entry_id` links a chunk back to its
/// entry and `chunk_index`/`total_chunks` describe its position. The
/// contiguity of a parent's chunks is assumed, not enforced here.
#[derive(Debug, Clone, Serialize)]
pub struct KbHit {
    /// Chunk id in the index
    pub id: String,
    pub parent_entry_id: Option<String>,
    pub parent_title: Option<String>,
    pub chunk_index: Option<u32>,
    pub total_chunks: Option<u32>,
    /// Section within the parent (overview, prerequisites, steps, ...)
    pub section_type: Option<String>,
    /// how_to | definition | error | workflow
    pub entry_type: String,
    /// internal | external
    pub user_class: String,
    pub category: Option<String>,
    pub tags: Vec<String>,
    /// Parent titles related to this chunk; feed follow-up routing
    pub related_titles: Vec<String>,
    pub content: String,
    /// Similarity score from the index, later overwritten by the reranker
    pub score: f32,
}

impl KbHit {
    /// Display title for source attribution
    pub fn title(&self) -> &str {
        self.parent_title.as_deref().unwrap_or("Untitled Entry")
    }
}

/// Metadata filter for a similarity search
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub entry_type: Option<String>,
    pub user_class: Option<String>,
    pub parent_entry_id: Option<String>,
}

impl SearchFilter {
    pub fn is_empty(&self) -> bool {
        self.entry_type.is_none() && self.user_class.is_none() && self.parent_entry_id.is_none()
    }

    /// Flat map representation for analytics
    pub fn as_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        if let Some(ref v) = self.entry_type {
            map.insert("entry_type".to_string(), v.clone());
        }
        if let Some(ref v) = self.user_class {
            map.insert("user_class".to_string(), v.clone());
        }
        if let Some(ref v) = self.parent_entry_id {
            map.insert("parent_entry_id".to_string(), v.clone());
        }
        map
    }
}

/// Seam over the remote vector store.
///
/// Returns up to `k` hits ordered by similarity; threshold filtering is
/// the caller's concern so parent refetches can run unthresholded.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn search(&self, vector: &[f32], filter: &SearchFilter, k: usize) -> Result<Vec<KbHit>>;

    /// Cheap reachability probe for the health surface
    async fn probe(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_map() {
        let filter = SearchFilter {
            entry_type: Some("how_to".into()),
            user_class: Some("external".into()),
            parent_entry_id: None,
        };
        let map = filter.as_map();
        assert_eq!(map.get("entry_type").map(String::as_str), Some("how_to"));
        assert_eq!(map.get("user_class").map(String::as_str), Some("external"));
        assert!(!map.contains_key("parent_entry_id"));
        assert!(!filter.is_empty());
        assert!(SearchFilter::default().is_empty());
    }

    #[test]
    fn test_hit_title_fallback() {
        let hit = KbHit {
            id: "c1".into(),
            parent_entry_id: None,
            parent_title: None,
            chunk_index: None,
            total_chunks: None,
            section_type: None,
            entry_type: "how_to".into(),
            user_class: "external".into(),
            category: None,
            tags: vec![],
            related_titles: vec![],
            content: String::new(),
            score: 0.8,
        };
        assert_eq!(hit.title(), "Untitled Entry");
    }
}
