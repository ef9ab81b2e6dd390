//! Long-term memory records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A long-term memory, stored jointly in the vector index (content +
/// payload) and the document store (full record) under the same id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub session_id: String,
    #[serde(rename = "type")]
    pub memory_type: String,
    pub content: String,
    /// Importance in `[1, 10]`.
    pub importance: f64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Similarity score from the retrieval that produced this record;
    /// zero for direct loads.
    #[serde(default)]
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_type_field_rename() {
        let m = Memory {
            id: "m1".into(),
            session_id: "s1".into(),
            memory_type: "simplemem_atom".into(),
            content: "User prefers metric units".into(),
            importance: 7.0,
            created_at: Utc::now(),
            metadata: Map::new(),
            score: 0.8,
        };
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["type"], "simplemem_atom");
    }
}
