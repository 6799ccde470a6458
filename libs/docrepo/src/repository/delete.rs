use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use docrepo_core::{
    join_id, split_id, CrudEventType, Document, IdPartitionPair, ItemRequestOptions, Projection,
    Query, QuerySpec,
};
use docrepo_runtime::{ConcurrentExecutor, ExecutionSummary};
use docrepo_store::{BatchOperation, Container, MAX_BATCH_OPERATIONS};

use super::{by_created_at, check_page_size, created_between, Repository};
use crate::dispatch::{WriteOp, WriteRequest};
use crate::options::OpOptions;
use crate::paging::for_each_page;
use crate::{RepositoryError, Result};

/// Group ids by partition key, keeping first-seen order of partitions and
/// input order within each.
fn group_by_partition(pairs: &[IdPartitionPair]) -> Vec<(&str, Vec<&str>)> {
    let mut groups: Vec<(&str, Vec<&str>)> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for pair in pairs {
        let slot = *index.entry(pair.partition_key.as_str()).or_insert_with(|| {
            groups.push((pair.partition_key.as_str(), Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(pair.id.as_str());
    }
    groups
}

impl<D: Document> Repository<D> {
    /// Delete by composite id. Deleting a missing document succeeds.
    pub async fn delete_item(&self, entity_id: &str, opts: &OpOptions) -> Result<()> {
        let (partition_key, document_id) = split_id(entity_id);
        self.delete_item_by_key(partition_key, document_id, opts)
            .await
    }

    #[tracing::instrument(
        name = "docrepo.delete_item",
        skip_all,
        fields(partition_key = %partition_key, id = %document_id)
    )]
    pub async fn delete_item_by_key(
        &self,
        partition_key: &str,
        document_id: &str,
        opts: &OpOptions,
    ) -> Result<()> {
        let container = self.container(&opts.cancel).await?;
        self.delete_in(&container, partition_key, document_id, opts)
            .await
    }

    /// Delete every document, one by one.
    pub async fn delete_all(&self, opts: &OpOptions) -> Result<()> {
        tracing::warn!(
            doc_type = D::type_name(),
            container = %self.config.container_name,
            delay = ?opts.delay,
            "deleting all documents"
        );
        let ids = self.get_all_ids(opts).await?;
        self.delete_ids(&ids, opts).await?;
        tracing::debug!(doc_type = D::type_name(), deleted = ids.len(), "delete_all finished");
        Ok(())
    }

    /// Delete every document matching `query`, in result order.
    pub async fn delete_items(&self, query: Query, opts: &OpOptions) -> Result<()> {
        tracing::warn!(doc_type = D::type_name(), "deleting documents by query");
        let ids = self.get_ids(query, opts).await?;
        self.delete_ids(&ids, opts).await
    }

    pub async fn delete_items_parallel(
        &self,
        query: Query,
        max_concurrency: usize,
        opts: &OpOptions,
    ) -> Result<ExecutionSummary> {
        tracing::warn!(doc_type = D::type_name(), "deleting documents by query in parallel");
        let ids = self.get_ids(query, opts).await?;
        self.delete_ids_parallel(&ids, max_concurrency, opts).await
    }

    /// Delete each id in input order, reusing one container handle.
    pub async fn delete_ids(&self, ids: &[IdPartitionPair], opts: &OpOptions) -> Result<()> {
        tracing::debug!(doc_type = D::type_name(), count = ids.len(), "delete_ids");
        let container = self.container(&opts.cancel).await?;
        for pair in ids {
            opts.check_cancelled()?;
            self.delete_in(&container, &pair.partition_key, &pair.id, opts)
                .await?;
            opts.pause().await?;
        }
        Ok(())
    }

    /// Delete ids with at most `max_concurrency` deletes in flight. Deletes
    /// are always inline.
    #[tracing::instrument(
        name = "docrepo.delete_ids_parallel",
        skip_all,
        fields(count = ids.len(), max_concurrency = max_concurrency)
    )]
    pub async fn delete_ids_parallel(
        &self,
        ids: &[IdPartitionPair],
        max_concurrency: usize,
        opts: &OpOptions,
    ) -> Result<ExecutionSummary> {
        let container = self.container(&opts.cancel).await?;
        let inline = opts.clone().with_queue(false);

        let summary = ConcurrentExecutor::new(max_concurrency)
            .execute(
                "delete_ids_parallel",
                ids.iter().collect(),
                &opts.cancel,
                |pair| {
                    let (container, inline) = (&container, &inline);
                    async move {
                        self.delete_in(container, &pair.partition_key, &pair.id, inline)
                            .await
                    }
                },
            )
            .await;
        opts.check_cancelled()?;
        Ok(summary)
    }

    /// Delete documents created within `[start, end]` using transactional
    /// batches.
    pub async fn delete_created_at_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        opts: &OpOptions,
    ) -> Result<()> {
        let query = created_between(start, end).select(Projection::IdPartition);
        let ids: Vec<IdPartitionPair> = self
            .run_query(
                "delete_created_at_between",
                query.into(),
                self.page_options(None),
                opts,
            )
            .await?;
        self.delete_ids_batched(&ids, MAX_BATCH_OPERATIONS, opts)
            .await
    }

    /// Delete ids as transactional batches of at most `batch_size`, one
    /// partition at a time.
    ///
    /// A batch the store rejects is logged and skipped; the remaining
    /// batches still run. Each id of a committed batch gets a delete audit.
    #[tracing::instrument(
        name = "docrepo.delete_ids_batched",
        skip_all,
        fields(count = ids.len(), batch_size = batch_size)
    )]
    pub async fn delete_ids_batched(
        &self,
        ids: &[IdPartitionPair],
        batch_size: usize,
        opts: &OpOptions,
    ) -> Result<()> {
        if batch_size == 0 || batch_size > MAX_BATCH_OPERATIONS {
            return Err(RepositoryError::validation(format!(
                "batch size must be between 1 and {MAX_BATCH_OPERATIONS}, got {batch_size}"
            )));
        }
        if ids.is_empty() {
            return Ok(());
        }

        let container = self.container(&opts.cancel).await?;
        for (partition_key, group) in group_by_partition(ids) {
            for chunk in group.chunks(batch_size) {
                opts.check_cancelled()?;
                let operations = chunk.iter().map(|id| BatchOperation::delete(*id)).collect();
                let response = container.execute_batch(partition_key, operations).await?;

                if !response.is_success() {
                    tracing::warn!(
                        container = %container.name(),
                        partition_key,
                        size = chunk.len(),
                        status = ?response.failed_status(),
                        "delete batch rejected"
                    );
                    continue;
                }
                if self.config.audit_enabled {
                    for id in chunk {
                        let entity_id = join_id(partition_key, id);
                        self.audit
                            .record(CrudEventType::Delete, &entity_id, None, &opts.cancel)
                            .await;
                    }
                }
            }
        }
        Ok(())
    }

    /// Delete every document page by page, oldest first.
    pub async fn delete_all_paged(&self, page_size: usize, opts: &OpOptions) -> Result<()> {
        tracing::warn!(
            doc_type = D::type_name(),
            container = %self.config.container_name,
            page_size,
            "deleting all documents page by page"
        );
        let query = by_created_at().select(Projection::IdPartition);
        self.delete_pages(query.into(), page_size, opts).await
    }

    /// Delete every row of `query` page by page. Rows must carry `id` and
    /// `partitionKey`; builder queries selecting whole documents are
    /// narrowed to those two fields. Builder queries always page by sort
    /// key: `distinct` is dropped and unordered ones use `createdAt`.
    pub async fn delete_items_paged(
        &self,
        query: impl Into<QuerySpec>,
        page_size: usize,
        opts: &OpOptions,
    ) -> Result<()> {
        let query = match query.into() {
            QuerySpec::Builder(mut q) => {
                if q.projection == Projection::All {
                    q = q.select(Projection::IdPartition);
                }
                // Id rows are unique already; distinct would force offset tokens.
                q.distinct = false;
                if q.order_by.is_empty() {
                    q = q.order_asc("createdAt");
                }
                QuerySpec::Builder(q)
            }
            text => text,
        };
        tracing::warn!(
            doc_type = D::type_name(),
            page_size,
            query = %query.log_text(),
            "deleting documents page by page"
        );
        self.delete_pages(query, page_size, opts).await
    }

    async fn delete_pages(
        &self,
        query: QuerySpec,
        page_size: usize,
        opts: &OpOptions,
    ) -> Result<()> {
        check_page_size(page_size)?;
        let container = self.container(&opts.cancel).await?;
        let container = &container;

        for_each_page(
            None,
            &opts.cancel,
            |continuation| self.get_items_paged(query.clone(), page_size, continuation, opts),
            |rows: Vec<IdPartitionPair>| async move {
                tracing::debug!(rows = rows.len(), "deleting page");
                for pair in &rows {
                    opts.check_cancelled()?;
                    self.delete_in(container, &pair.partition_key, &pair.id, opts)
                        .await?;
                }
                opts.pause().await
            },
        )
        .await
    }

    async fn delete_in(
        &self,
        container: &Arc<dyn Container>,
        partition_key: &str,
        document_id: &str,
        opts: &OpOptions,
    ) -> Result<()> {
        if self.config.log_queries {
            tracing::debug!(
                doc_type = D::type_name(),
                partition_key,
                id = document_id,
                "delete_item"
            );
        }
        let request = WriteRequest::new(
            join_id(partition_key, document_id),
            partition_key.to_string(),
            WriteOp::Delete {
                id: document_id.to_string(),
            },
        )
        .with_options(ItemRequestOptions {
            exclude_response: true,
        });
        self.dispatcher
            .dispatch(container, request, opts.use_queue, &opts.cancel)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_keep_first_seen_partition_order() {
        let pairs = vec![
            IdPartitionPair::new("1", "b"),
            IdPartitionPair::new("2", "a"),
            IdPartitionPair::new("3", "b"),
            IdPartitionPair::new("4", "c"),
            IdPartitionPair::new("5", "a"),
        ];
        let groups = group_by_partition(&pairs);
        assert_eq!(
            groups,
            vec![("b", vec!["1", "3"]), ("a", vec!["2", "5"]), ("c", vec!["4"])]
        );
    }
}
