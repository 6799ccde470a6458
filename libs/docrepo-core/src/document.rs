use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::keys::join_id;

/// Identity and bookkeeping fields every stored document carries.
///
/// Embed it with `#[serde(flatten)]`. The document id is persisted as `id`,
/// the partition key as `partitionKey`. The composite entity id is never
/// persisted; it is derived from the two halves or set by the repository
/// after a write.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMeta {
    #[serde(skip)]
    pub entity_id: Option<String>,
    #[serde(rename = "id", default)]
    pub document_id: String,
    #[serde(default)]
    pub partition_key: String,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
}

impl DocumentMeta {
    pub fn new(partition_key: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self {
            entity_id: None,
            document_id: document_id.into(),
            partition_key: partition_key.into(),
            created_at: Utc::now(),
        }
    }
}

/// A typed document stored by a repository.
pub trait Document: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn meta(&self) -> &DocumentMeta;
    fn meta_mut(&mut self) -> &mut DocumentMeta;

    fn document_id(&self) -> &str {
        &self.meta().document_id
    }

    fn partition_key(&self) -> &str {
        &self.meta().partition_key
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.meta().created_at
    }

    fn entity_id(&self) -> String {
        let meta = self.meta();
        match &meta.entity_id {
            Some(id) => id.clone(),
            None => join_id(&meta.partition_key, &meta.document_id),
        }
    }

    fn set_entity_id(&mut self, entity_id: String) {
        self.meta_mut().entity_id = Some(entity_id);
    }

    /// Short type name recorded as `entityType` in audit records.
    fn type_name() -> &'static str
    where
        Self: Sized,
    {
        let full = std::any::type_name::<Self>();
        let base = full.split('<').next().unwrap_or(full);
        base.rsplit("::").next().unwrap_or(base)
    }
}

/// `{id, partitionKey}` projection used to carry identity sets.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdPartitionPair {
    pub id: String,
    pub partition_key: String,
}

impl IdPartitionPair {
    pub fn new(id: impl Into<String>, partition_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            partition_key: partition_key.into(),
        }
    }
}

/// Lookup pair where the id doubles as the partition key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdNamePair {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Clone, Debug, Serialize, Deserialize)]
    struct Note {
        #[serde(flatten)]
        meta: DocumentMeta,
        body: String,
    }

    impl Document for Note {
        fn meta(&self) -> &DocumentMeta {
            &self.meta
        }
        fn meta_mut(&mut self) -> &mut DocumentMeta {
            &mut self.meta
        }
    }

    #[test]
    fn meta_serializes_with_store_field_names() {
        let mut note = Note {
            meta: DocumentMeta::new("tenant", "n1"),
            body: "hello".into(),
        };
        note.set_entity_id("tenant:n1".into());

        let value = serde_json::to_value(&note).unwrap();
        assert_eq!(value["id"], "n1");
        assert_eq!(value["partitionKey"], "tenant");
        assert!(value.get("createdAt").is_some());
        assert!(value.get("entityId").is_none());
    }

    #[test]
    fn entity_id_falls_back_to_joined_halves() {
        let note: Note = serde_json::from_value(json!({
            "id": "n1",
            "partitionKey": "tenant",
            "createdAt": "2024-01-01T00:00:00Z",
            "body": "x"
        }))
        .unwrap();
        assert_eq!(note.entity_id(), "tenant:n1");
    }

    #[test]
    fn type_name_is_short() {
        assert_eq!(Note::type_name(), "Note");
    }
}
