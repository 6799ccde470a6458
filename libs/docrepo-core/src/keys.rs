//! Composite entity key codec.
//!
//! An entity id encodes a partition key and a document id in one string:
//! `"<partition_key>:<document_id>"`, or just the document id when both halves
//! are equal.
//!
//! Halves that themselves contain the delimiter are not rejected. Splitting
//! always uses the first delimiter, so `join_id("a:b", "c")` does not survive
//! a round trip.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const KEY_DELIMITER: char = ':';

/// Split an entity id into `(partition_key, document_id)`.
pub fn split_id(entity_id: &str) -> (&str, &str) {
    match entity_id.split_once(KEY_DELIMITER) {
        Some((partition_key, document_id)) => (partition_key, document_id),
        None => (entity_id, entity_id),
    }
}

/// Join a partition key and document id into an entity id.
pub fn join_id(partition_key: &str, document_id: &str) -> String {
    if partition_key == document_id {
        return document_id.to_string();
    }
    format!("{partition_key}{KEY_DELIMITER}{document_id}")
}

/// Owned form of a decoded entity id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityKey {
    pub partition_key: String,
    pub document_id: String,
}

impl EntityKey {
    pub fn new(partition_key: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            document_id: document_id.into(),
        }
    }

    pub fn parse(entity_id: &str) -> Self {
        let (partition_key, document_id) = split_id(entity_id);
        Self::new(partition_key, document_id)
    }

    pub fn entity_id(&self) -> String {
        join_id(&self.partition_key, &self.document_id)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.entity_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_then_split_round_trips() {
        let cases = [("tenant", "doc-1"), ("a", "b"), ("x", "x"), ("", "doc")];
        for (pk, id) in cases {
            let joined = join_id(pk, id);
            assert_eq!(split_id(&joined), (pk, id), "case {pk:?}/{id:?}");
        }
    }

    #[test]
    fn equal_halves_collapse_to_single_id() {
        assert_eq!(join_id("X", "X"), "X");
        assert_eq!(split_id("X"), ("X", "X"));
    }

    #[test]
    fn first_delimiter_wins() {
        assert_eq!(split_id("a:b:c"), ("a", "b:c"));
        let key = EntityKey::parse("a:b:c");
        assert_eq!(key.partition_key, "a");
        assert_eq!(key.document_id, "b:c");
    }

    #[test]
    fn partition_key_with_delimiter_does_not_round_trip() {
        let joined = join_id("a:b", "c");
        assert_eq!(joined, "a:b:c");
        assert_ne!(split_id(&joined), ("a:b", "c"));
    }

    #[test]
    fn entity_key_display_uses_join() {
        assert_eq!(EntityKey::new("tenant", "42").to_string(), "tenant:42");
        assert_eq!(EntityKey::new("42", "42").to_string(), "42");
    }
}
