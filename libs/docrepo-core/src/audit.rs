use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::keys::split_id;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrudEventType {
    Create,
    Update,
    Delete,
}

/// Immutable record of one create, update or delete.
///
/// Audit records are partitioned by the document id half of the target's
/// entity id, so every event for a document lands in the same partition
/// regardless of the tenant partition the document itself lives in.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    #[serde(rename = "id")]
    pub document_id: String,
    pub partition_key: String,
    pub entity_id: String,
    pub entity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<Value>,
    pub event_type: CrudEventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        event_type: CrudEventType,
        entity_id: &str,
        entity_type: &str,
        entity: Option<Value>,
        user_id: Option<String>,
    ) -> Self {
        let (_, document_id) = split_id(entity_id);
        Self {
            document_id: Uuid::new_v4().to_string(),
            partition_key: document_id.to_string(),
            entity_id: entity_id.to_string(),
            entity_type: entity_type.to_string(),
            entity,
            event_type,
            user_id,
            created_at: Utc::now(),
        }
    }
}
