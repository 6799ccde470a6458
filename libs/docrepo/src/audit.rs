//! Audit trail.
//!
//! One [`AuditRecord`] per successful create, update or delete, written to
//! the audit container after the data write has been confirmed. Audit writes
//! never fail the mutation they describe: problems are logged and dropped.

use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use docrepo_core::{AuditRecord, CrudEventType, ItemRequestOptions};
use docrepo_runtime::{BackgroundQueue, Job, UserContext};
use docrepo_store::{Container, ContainerResolver};

/// Builds audit records for one document type and ships them to the audit
/// container through the background queue.
#[derive(Clone)]
pub struct AuditRecorder {
    resolver: Arc<dyn ContainerResolver>,
    queue: Arc<dyn BackgroundQueue>,
    user: Arc<dyn UserContext>,
    container_name: String,
    entity_type: &'static str,
    log_records: bool,
}

impl AuditRecorder {
    pub fn new(
        resolver: Arc<dyn ContainerResolver>,
        queue: Arc<dyn BackgroundQueue>,
        user: Arc<dyn UserContext>,
        container_name: impl Into<String>,
        entity_type: &'static str,
    ) -> Self {
        Self {
            resolver,
            queue,
            user,
            container_name: container_name.into(),
            entity_type,
            log_records: false,
        }
    }

    /// Log every record at DEBUG before it is written.
    pub fn with_record_logging(mut self, enabled: bool) -> Self {
        self.log_records = enabled;
        self
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    pub fn current_user_id(&self) -> Option<String> {
        self.user.current_user_id()
    }

    pub fn build_record(
        &self,
        event: CrudEventType,
        entity_id: &str,
        entity: Option<Value>,
        user_id: Option<String>,
    ) -> AuditRecord {
        AuditRecord::new(event, entity_id, self.entity_type, entity, user_id)
    }

    /// Attribute the event to the current user and queue the audit write.
    pub async fn record(
        &self,
        event: CrudEventType,
        entity_id: &str,
        entity: Option<Value>,
        cancel: &CancellationToken,
    ) {
        let record = self.build_record(event, entity_id, entity, self.current_user_id());
        self.submit(record, cancel).await;
    }

    /// Queue a prepared record. The audit container is resolved up front;
    /// only the create itself runs in the background.
    pub(crate) async fn submit(&self, record: AuditRecord, cancel: &CancellationToken) {
        self.log(&record);

        let container = match self.resolver.get_container(&self.container_name, cancel).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(
                    container = %self.container_name,
                    entity_id = %record.entity_id,
                    error = %e,
                    "audit container unavailable; record dropped"
                );
                return;
            }
        };

        let label = format!("audit:{}", record.entity_id);
        let job = Job::new(label, move |_cancel| async move {
            create_record(container.as_ref(), &record).await
        });
        if let Err(e) = self.queue.submit(job).await {
            tracing::warn!(
                container = %self.container_name,
                error = %e,
                "audit record not queued"
            );
        }
    }

    /// Write a record in the current task. Used by queued writes, which are
    /// already running on the background queue.
    pub(crate) async fn write(&self, record: AuditRecord, cancel: &CancellationToken) {
        self.log(&record);
        let result = async {
            let container = self
                .resolver
                .get_container(&self.container_name, cancel)
                .await?;
            create_record(container.as_ref(), &record).await
        }
        .await;
        if let Err(e) = result {
            tracing::warn!(
                container = %self.container_name,
                entity_id = %record.entity_id,
                error = %e,
                "audit write failed"
            );
        }
    }

    fn log(&self, record: &AuditRecord) {
        if !self.log_records {
            return;
        }
        match serde_json::to_string_pretty(record) {
            Ok(json) => tracing::debug!(
                entity_type = %record.entity_type,
                event = ?record.event_type,
                "audit record: {json}"
            ),
            Err(e) => tracing::debug!(error = %e, "audit record not serializable"),
        }
    }
}

async fn create_record(container: &dyn Container, record: &AuditRecord) -> anyhow::Result<()> {
    let item = serde_json::to_value(record)?;
    container
        .create_item(
            item,
            &record.partition_key,
            ItemRequestOptions {
                exclude_response: true,
            },
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use docrepo_runtime::{QueueConfig, StaticUser, WorkerQueue};
    use docrepo_store::{ContainerManager, StoreConfig};

    fn recorder(manager: Arc<ContainerManager>, queue: Arc<WorkerQueue>) -> AuditRecorder {
        AuditRecorder::new(manager, queue, Arc::new(StaticUser("u-7".into())), "audits", "Note")
    }

    #[tokio::test]
    async fn record_is_queued_into_audit_container() {
        let manager = Arc::new(ContainerManager::new(StoreConfig::default()));
        let queue = Arc::new(WorkerQueue::start(&QueueConfig::default()));
        let audit = recorder(manager.clone(), queue.clone());

        audit
            .record(
                CrudEventType::Delete,
                "team:n1",
                None,
                &CancellationToken::new(),
            )
            .await;
        queue.flush().await;

        let stored = manager.get("audits").unwrap().snapshot();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0]["partitionKey"], "n1");
        assert_eq!(stored[0]["entityId"], "team:n1");
        assert_eq!(stored[0]["entityType"], "Note");
        assert_eq!(stored[0]["eventType"], "Delete");
        assert_eq!(stored[0]["userId"], "u-7");
    }

    #[tokio::test]
    async fn unavailable_container_drops_record_without_error() {
        let manager = Arc::new(ContainerManager::new(StoreConfig {
            auto_provision: false,
            ..StoreConfig::default()
        }));
        let queue = Arc::new(WorkerQueue::start(&QueueConfig::default()));
        let audit = recorder(manager, queue.clone());

        audit
            .record(CrudEventType::Create, "n1", None, &CancellationToken::new())
            .await;
        assert_eq!(queue.pending(), 0);
    }
}
