//! Inline or queued execution of single-document writes.

use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use docrepo_core::{CrudEventType, ItemRequestOptions, PatchOperation};
use docrepo_runtime::{BackgroundQueue, Job};
use docrepo_store::Container;

use crate::audit::AuditRecorder;
use crate::Result;

pub(crate) enum WriteOp {
    Create { item: Value },
    Replace { id: String, item: Value },
    Patch { id: String, operations: Vec<PatchOperation> },
    Delete { id: String },
}

impl WriteOp {
    fn event(&self) -> CrudEventType {
        match self {
            WriteOp::Create { .. } => CrudEventType::Create,
            WriteOp::Replace { .. } | WriteOp::Patch { .. } => CrudEventType::Update,
            WriteOp::Delete { .. } => CrudEventType::Delete,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            WriteOp::Create { .. } => "create",
            WriteOp::Replace { .. } => "replace",
            WriteOp::Patch { .. } => "patch",
            WriteOp::Delete { .. } => "delete",
        }
    }

    fn payload(&self) -> Option<&Value> {
        match self {
            WriteOp::Create { item } | WriteOp::Replace { item, .. } => Some(item),
            WriteOp::Patch { .. } | WriteOp::Delete { .. } => None,
        }
    }
}

/// What the audit record carries as `entity`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum AuditEntity {
    Omit,
    /// The JSON that was sent to the store.
    Payload,
    /// The document echoed back by the store, if any.
    Response,
}

/// Everything a write needs, owned, so it can move into a background job.
pub(crate) struct WriteRequest {
    pub entity_id: String,
    pub partition_key: String,
    pub op: WriteOp,
    pub options: ItemRequestOptions,
    pub audit_entity: AuditEntity,
}

impl WriteRequest {
    pub fn new(entity_id: String, partition_key: String, op: WriteOp) -> Self {
        Self {
            entity_id,
            partition_key,
            op,
            options: ItemRequestOptions::default(),
            audit_entity: AuditEntity::Omit,
        }
    }

    pub fn with_options(mut self, options: ItemRequestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn audit_with(mut self, entity: AuditEntity) -> Self {
        self.audit_entity = entity;
        self
    }

    /// Run against the store. A delete of a missing document is a no-op.
    async fn execute(
        self,
        container: &dyn Container,
    ) -> docrepo_store::Result<(Option<Value>, Completed)> {
        let event = self.op.event();
        let payload = match self.audit_entity {
            AuditEntity::Payload => self.op.payload().cloned(),
            AuditEntity::Omit | AuditEntity::Response => None,
        };
        let pk = self.partition_key.as_str();

        let response = match self.op {
            WriteOp::Create { item } => container.create_item(item, pk, self.options).await?,
            WriteOp::Replace { id, item } => {
                container.replace_item(&id, item, pk, self.options).await?
            }
            WriteOp::Patch { id, operations } => {
                container
                    .patch_item(&id, pk, &operations, self.options)
                    .await?
            }
            WriteOp::Delete { id } => match container.delete_item(&id, pk).await {
                Ok(()) => None,
                Err(e) if e.is_not_found() => {
                    tracing::debug!(
                        container = %container.name(),
                        id = %id,
                        partition_key = %pk,
                        "delete of missing document ignored"
                    );
                    None
                }
                Err(e) => return Err(e),
            },
        };

        let entity = match self.audit_entity {
            AuditEntity::Omit => None,
            AuditEntity::Payload => payload,
            AuditEntity::Response => response.clone(),
        };
        Ok((
            response,
            Completed {
                event,
                entity_id: self.entity_id,
                entity,
            },
        ))
    }
}

/// A confirmed write, ready to be audited.
struct Completed {
    event: CrudEventType,
    entity_id: String,
    entity: Option<Value>,
}

/// Sends writes to the store inline or through the background queue and
/// audits them once they succeed.
#[derive(Clone)]
pub(crate) struct WriteDispatcher {
    queue: Arc<dyn BackgroundQueue>,
    audit: Option<AuditRecorder>,
}

impl WriteDispatcher {
    pub fn new(queue: Arc<dyn BackgroundQueue>, audit: Option<AuditRecorder>) -> Self {
        Self { queue, audit }
    }

    /// Await the write and return the store's echo. Store errors propagate.
    pub async fn inline(
        &self,
        container: &dyn Container,
        request: WriteRequest,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>> {
        let (response, done) = request.execute(container).await?;
        if let Some(audit) = &self.audit {
            audit
                .record(done.event, &done.entity_id, done.entity, cancel)
                .await;
        }
        Ok(response)
    }

    /// Snapshot the write into a job and return once it is queued.
    ///
    /// The user is resolved now, while the caller's context is still current.
    /// The job writes its audit record itself rather than queueing another job.
    pub async fn enqueue(&self, container: Arc<dyn Container>, request: WriteRequest) -> Result<()> {
        let label = format!("{}:{}", request.op.label(), request.entity_id);
        let audit = self.audit.clone().map(|recorder| {
            let user_id = recorder.current_user_id();
            (recorder, user_id)
        });

        let job = Job::new(label, move |cancel: CancellationToken| async move {
            let (_, done) = request.execute(container.as_ref()).await?;
            if let Some((recorder, user_id)) = audit {
                let record =
                    recorder.build_record(done.event, &done.entity_id, done.entity, user_id);
                recorder.write(record, &cancel).await;
            }
            Ok(())
        });
        self.queue.submit(job).await?;
        Ok(())
    }

    pub async fn dispatch(
        &self,
        container: &Arc<dyn Container>,
        request: WriteRequest,
        use_queue: bool,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>> {
        if use_queue {
            self.enqueue(container.clone(), request).await?;
            Ok(None)
        } else {
            self.inline(container.as_ref(), request, cancel).await
        }
    }
}
