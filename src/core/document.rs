use serde::{Deserialize, Serialize};

/// Persistence-layer header row anchoring a serialized entity blob.
///
/// The row carries no payload; the blob lives in document storage keyed by
/// `id`. Ids are assigned by the backing store and are unique and monotonic
/// within it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
    pub id: i64,
    /// Simplified type name of the entity behind this document.
    pub doc_type: String,
}

impl Document {
    pub fn new(id: i64, doc_type: impl Into<String>) -> Self {
        Self {
            id,
            doc_type: doc_type.into(),
        }
    }
}

/// Strips module path segments from a Rust type path.
pub fn simplified_type_name(full: &str) -> &str {
    full.rsplit("::").next().unwrap_or(full)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simplified_type_name() {
        assert_eq!(simplified_type_name("crate::module::Person"), "Person");
        assert_eq!(simplified_type_name("Person"), "Person");
    }

    #[test]
    fn test_document_round_trip() {
        let doc = Document::new(7, "Person");
        let value = serde_json::to_value(&doc).unwrap();
        let back: Document = serde_json::from_value(value).unwrap();
        assert_eq!(doc, back);
    }
}
