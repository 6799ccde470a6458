use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use docrepo_core::{IdPartitionPair, ItemRequestOptions, Page, PatchOperation, QueryOptions, QuerySpec};

use crate::Result;

/// Largest number of operations a transactional batch may carry.
pub const MAX_BATCH_OPERATIONS: usize = 100;

/// Handle to one named container of the document store.
///
/// Items travel as JSON. Every item carries `id` and `partitionKey`; `id` is
/// unique within a partition. Write calls return `None` when the caller asked
/// the store to exclude the response payload.
#[async_trait]
pub trait Container: Send + Sync {
    fn name(&self) -> &str;

    /// Insert a new item. Fails with `Conflict` when the id is taken.
    async fn create_item(
        &self,
        item: Value,
        partition_key: &str,
        options: ItemRequestOptions,
    ) -> Result<Option<Value>>;

    /// Point read. A missing item is `Ok(None)`.
    async fn read_item(&self, id: &str, partition_key: &str) -> Result<Option<Value>>;

    /// Replace an existing item. Fails with `NotFound` when it does not exist.
    async fn replace_item(
        &self,
        id: &str,
        item: Value,
        partition_key: &str,
        options: ItemRequestOptions,
    ) -> Result<Option<Value>>;

    /// Delete an item. Fails with `NotFound` when it does not exist.
    async fn delete_item(&self, id: &str, partition_key: &str) -> Result<()>;

    async fn patch_item(
        &self,
        id: &str,
        partition_key: &str,
        operations: &[PatchOperation],
        options: ItemRequestOptions,
    ) -> Result<Option<Value>>;

    /// Fetch one page of query results starting at `continuation`.
    async fn query_page(
        &self,
        query: &QuerySpec,
        options: &QueryOptions,
        continuation: Option<&str>,
    ) -> Result<Page<Value>>;

    /// Multi-get by identity. Missing items are skipped.
    async fn read_many(&self, items: &[IdPartitionPair]) -> Result<Vec<Value>>;

    async fn count(&self, query: &QuerySpec, options: &QueryOptions) -> Result<u64>;

    /// Run operations against one partition atomically.
    async fn execute_batch(
        &self,
        partition_key: &str,
        operations: Vec<BatchOperation>,
    ) -> Result<BatchResponse>;
}

/// Resolves a logical container name to a live handle.
#[async_trait]
pub trait ContainerResolver: Send + Sync {
    async fn get_container(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn Container>>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BatchOperation {
    Create { item: Value },
    Replace { id: String, item: Value },
    Patch { id: String, operations: Vec<PatchOperation> },
    Delete { id: String },
}

impl BatchOperation {
    pub fn delete(id: impl Into<String>) -> Self {
        BatchOperation::Delete { id: id.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOperationResult {
    pub status_code: u16,
}

/// Outcome of a transactional batch.
///
/// When one operation fails nothing is committed: the failing operation
/// reports its own status and every other operation reports 424.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub results: Vec<BatchOperationResult>,
}

impl BatchResponse {
    pub fn is_success(&self) -> bool {
        self.results.iter().all(|r| (200..300).contains(&r.status_code))
    }

    /// Status of the operation that aborted the batch, if any.
    pub fn failed_status(&self) -> Option<u16> {
        self.results
            .iter()
            .map(|r| r.status_code)
            .find(|code| !(200..300).contains(code) && *code != 424)
    }
}
