use std::sync::Arc;

use docrepo_core::{join_id, split_id, Document, PatchOperation};
use docrepo_runtime::{ConcurrentExecutor, ExecutionSummary};
use docrepo_store::Container;

use super::Repository;
use crate::dispatch::{AuditEntity, WriteOp, WriteRequest};
use crate::options::OpOptions;
use crate::{RepositoryError, Result};

/// Both key halves must be present before a document may be created.
fn check_keys<D: Document>(doc: &D) -> Result<()> {
    if doc.partition_key().trim().is_empty() || doc.document_id().trim().is_empty() {
        return Err(RepositoryError::validation(
            "document id and partition key must be present",
        ));
    }
    Ok(())
}

impl<D: Document> Repository<D> {
    /// Create `doc` and set its entity id.
    ///
    /// Returns the composite id. With `use_queue` the id is returned as soon
    /// as the write is queued.
    #[tracing::instrument(
        name = "docrepo.add_item",
        skip_all,
        fields(partition_key = %doc.partition_key(), id = %doc.document_id())
    )]
    pub async fn add_item(&self, doc: &mut D, opts: &OpOptions) -> Result<String> {
        check_keys(doc)?;
        self.log_document("add_item", doc);
        let container = self.container(&opts.cancel).await?;
        self.create_in(&container, doc, opts).await
    }

    /// Create every document in input order. Each entity id is set before
    /// the next document is written.
    pub async fn add_items(&self, docs: &mut [D], opts: &OpOptions) -> Result<Vec<String>> {
        docs.iter().try_for_each(check_keys)?;
        let container = self.container(&opts.cancel).await?;

        let mut ids = Vec::with_capacity(docs.len());
        for doc in docs.iter_mut() {
            opts.check_cancelled()?;
            self.log_document("add_items", doc);
            ids.push(self.create_in(&container, doc, opts).await?);
            opts.pause().await?;
        }
        Ok(ids)
    }

    /// Create documents with at most `max_concurrency` writes in flight.
    ///
    /// Writes are always inline. A failed document is logged and counted in
    /// the summary; its siblings are unaffected.
    #[tracing::instrument(
        name = "docrepo.add_items_parallel",
        skip_all,
        fields(count = docs.len(), max_concurrency = max_concurrency)
    )]
    pub async fn add_items_parallel(
        &self,
        docs: &mut [D],
        max_concurrency: usize,
        opts: &OpOptions,
    ) -> Result<ExecutionSummary> {
        docs.iter().try_for_each(check_keys)?;
        let container = self.container(&opts.cancel).await?;
        let inline = opts.clone().with_queue(false);

        let summary = ConcurrentExecutor::new(max_concurrency)
            .execute(
                "add_items_parallel",
                docs.iter_mut().collect(),
                &opts.cancel,
                |doc| {
                    let (container, inline) = (&container, &inline);
                    async move { self.create_in(container, doc, inline).await.map(drop) }
                },
            )
            .await;
        opts.check_cancelled()?;
        Ok(summary)
    }

    /// Replace the stored document with `doc`.
    ///
    /// On the inline path `doc` is refreshed from the store's echo unless
    /// `exclude_response` was requested.
    pub async fn update_item(&self, doc: &mut D, opts: &OpOptions) -> Result<String> {
        let entity_id = doc.entity_id();
        self.update_item_with_id(&entity_id, doc, opts).await
    }

    /// Replace the document at `entity_id` with `doc`, whatever ids `doc`
    /// itself carries.
    #[tracing::instrument(
        name = "docrepo.update_item",
        skip_all,
        fields(entity_id = %entity_id)
    )]
    pub async fn update_item_with_id(
        &self,
        entity_id: &str,
        doc: &mut D,
        opts: &OpOptions,
    ) -> Result<String> {
        self.log_document("update_item", doc);
        let container = self.container(&opts.cancel).await?;
        self.replace_in(&container, entity_id, doc, AuditEntity::Payload, opts)
            .await?;
        Ok(entity_id.to_string())
    }

    /// Replace every document in input order, reusing one container handle.
    pub async fn update_items(&self, docs: &mut [D], opts: &OpOptions) -> Result<Vec<String>> {
        let container = self.container(&opts.cancel).await?;

        let mut ids = Vec::with_capacity(docs.len());
        for doc in docs.iter_mut() {
            opts.check_cancelled()?;
            self.log_document("update_items", doc);
            let entity_id = doc.entity_id();
            self.replace_in(&container, &entity_id, doc, AuditEntity::Omit, opts)
                .await?;
            ids.push(entity_id);
            opts.pause().await?;
        }
        Ok(ids)
    }

    pub async fn update_items_parallel(
        &self,
        docs: &mut [D],
        max_concurrency: usize,
        opts: &OpOptions,
    ) -> Result<ExecutionSummary> {
        let container = self.container(&opts.cancel).await?;
        let inline = opts.clone().with_queue(false);

        let summary = ConcurrentExecutor::new(max_concurrency)
            .execute(
                "update_items_parallel",
                docs.iter_mut().collect(),
                &opts.cancel,
                |doc| {
                    let (container, inline) = (&container, &inline);
                    async move {
                        self.log_document("update_items_parallel", doc);
                        let entity_id = doc.entity_id();
                        self.replace_in(container, &entity_id, doc, AuditEntity::Payload, inline)
                            .await
                    }
                },
            )
            .await;
        opts.check_cancelled()?;
        Ok(summary)
    }

    /// Apply field-level operations to one document.
    ///
    /// Inline, returns the patched document as echoed by the store. Queued,
    /// returns `None`.
    #[tracing::instrument(
        name = "docrepo.patch_item",
        skip_all,
        fields(entity_id = %entity_id, operations = operations.len())
    )]
    pub async fn patch_item(
        &self,
        entity_id: &str,
        operations: &[PatchOperation],
        opts: &OpOptions,
    ) -> Result<Option<D>> {
        let container = self.container(&opts.cancel).await?;
        self.patch_in(&container, entity_id, operations, opts).await
    }

    /// Apply the same operations to each document, in input order.
    pub async fn patch_items(
        &self,
        docs: &[D],
        operations: &[PatchOperation],
        opts: &OpOptions,
    ) -> Result<Vec<String>> {
        let container = self.container(&opts.cancel).await?;

        let mut ids = Vec::with_capacity(docs.len());
        for doc in docs {
            opts.check_cancelled()?;
            let entity_id = doc.entity_id();
            self.patch_in(&container, &entity_id, operations, opts).await?;
            ids.push(entity_id);
            opts.pause().await?;
        }
        Ok(ids)
    }

    async fn create_in(
        &self,
        container: &Arc<dyn Container>,
        doc: &mut D,
        opts: &OpOptions,
    ) -> Result<String> {
        let partition_key = doc.partition_key().to_string();
        let entity_id = join_id(&partition_key, doc.document_id());
        let op = WriteOp::Create {
            item: serde_json::to_value(&*doc)?,
        };

        let request = WriteRequest::new(entity_id.clone(), partition_key, op)
            .with_options(opts.item_options())
            .audit_with(AuditEntity::Payload);
        self.dispatcher
            .dispatch(container, request, opts.use_queue, &opts.cancel)
            .await?;

        doc.set_entity_id(entity_id.clone());
        Ok(entity_id)
    }

    /// `queued_audit` picks the audit entity when the write goes through
    /// the queue; inline replaces always audit the payload.
    async fn replace_in(
        &self,
        container: &Arc<dyn Container>,
        entity_id: &str,
        doc: &mut D,
        queued_audit: AuditEntity,
        opts: &OpOptions,
    ) -> Result<()> {
        let (partition_key, document_id) = split_id(entity_id);
        let op = WriteOp::Replace {
            id: document_id.to_string(),
            item: serde_json::to_value(&*doc)?,
        };
        let audit = if opts.use_queue {
            queued_audit
        } else {
            AuditEntity::Payload
        };

        let request = WriteRequest::new(entity_id.to_string(), partition_key.to_string(), op)
            .with_options(opts.item_options())
            .audit_with(audit);
        let echo = self
            .dispatcher
            .dispatch(container, request, opts.use_queue, &opts.cancel)
            .await?;

        if let Some(stored) = echo {
            *doc = serde_json::from_value(stored)?;
        }
        doc.set_entity_id(entity_id.to_string());
        Ok(())
    }

    async fn patch_in(
        &self,
        container: &Arc<dyn Container>,
        entity_id: &str,
        operations: &[PatchOperation],
        opts: &OpOptions,
    ) -> Result<Option<D>> {
        let (partition_key, document_id) = split_id(entity_id);
        let op = WriteOp::Patch {
            id: document_id.to_string(),
            operations: operations.to_vec(),
        };
        let audit = if opts.use_queue {
            AuditEntity::Omit
        } else {
            AuditEntity::Response
        };

        let request = WriteRequest::new(entity_id.to_string(), partition_key.to_string(), op)
            .with_options(opts.item_options())
            .audit_with(audit);
        let echo = self
            .dispatcher
            .dispatch(container, request, opts.use_queue, &opts.cancel)
            .await?;

        match echo {
            Some(stored) => {
                let mut doc: D = serde_json::from_value(stored)?;
                doc.set_entity_id(entity_id.to_string());
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }
}
