#![allow(dead_code)]
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use docrepo::{Repository, RepositoryConfig};
use docrepo_core::{
    Document, DocumentMeta, IdPartitionPair, ItemRequestOptions, Page, PatchOperation,
    QueryOptions, QuerySpec,
};
use docrepo_runtime::{QueueConfig, StaticUser, WorkerQueue};
use docrepo_store::{
    BatchOperation, BatchResponse, Container, ContainerManager, ContainerResolver,
    InMemoryContainer, Result, StoreConfig, StoreError,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    #[serde(flatten)]
    pub meta: DocumentMeta,
    pub body: String,
    #[serde(default)]
    pub views: i64,
}

impl Document for Note {
    fn meta(&self) -> &DocumentMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut DocumentMeta {
        &mut self.meta
    }
}

pub fn note(partition_key: &str, id: &str, body: &str) -> Note {
    Note {
        meta: DocumentMeta::new(partition_key, id),
        body: body.to_string(),
        views: 0,
    }
}

/// Note created on day `day` of January 2024, for ordering tests.
pub fn dated_note(partition_key: &str, id: &str, day: u32) -> Note {
    let mut n = note(partition_key, id, id);
    n.meta.created_at = jan(day);
    n
}

pub fn jan(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// In-memory container that records every call and can be told to fail
/// writes for chosen document ids.
pub struct CountingContainer {
    inner: InMemoryContainer,
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
}

impl CountingContainer {
    pub fn new(name: &str, page_size: usize) -> Self {
        Self {
            inner: InMemoryContainer::new(name, page_size),
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Calls whose label starts with `prefix`.
    pub fn calls_of(&self, prefix: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn fail_writes_for(&self, id: &str) {
        self.failing.lock().insert(id.to_string());
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn snapshot(&self) -> Vec<Value> {
        self.inner.snapshot()
    }

    fn log(&self, call: String) {
        self.calls.lock().push(call);
    }

    fn check(&self, id: &str) -> Result<()> {
        if self.failing.lock().contains(id) {
            return Err(StoreError::Throttled { retry_after: None });
        }
        Ok(())
    }
}

fn id_of(item: &Value) -> String {
    item.get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl Container for CountingContainer {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn create_item(
        &self,
        item: Value,
        partition_key: &str,
        options: ItemRequestOptions,
    ) -> Result<Option<Value>> {
        let id = id_of(&item);
        self.log(format!("create:{partition_key}:{id}"));
        self.check(&id)?;
        self.inner.create_item(item, partition_key, options).await
    }

    async fn read_item(&self, id: &str, partition_key: &str) -> Result<Option<Value>> {
        self.log(format!("read:{partition_key}:{id}"));
        self.inner.read_item(id, partition_key).await
    }

    async fn replace_item(
        &self,
        id: &str,
        item: Value,
        partition_key: &str,
        options: ItemRequestOptions,
    ) -> Result<Option<Value>> {
        self.log(format!("replace:{partition_key}:{id}"));
        self.check(id)?;
        self.inner.replace_item(id, item, partition_key, options).await
    }

    async fn delete_item(&self, id: &str, partition_key: &str) -> Result<()> {
        self.log(format!("delete:{partition_key}:{id}"));
        self.check(id)?;
        self.inner.delete_item(id, partition_key).await
    }

    async fn patch_item(
        &self,
        id: &str,
        partition_key: &str,
        operations: &[PatchOperation],
        options: ItemRequestOptions,
    ) -> Result<Option<Value>> {
        self.log(format!("patch:{partition_key}:{id}"));
        self.check(id)?;
        self.inner
            .patch_item(id, partition_key, operations, options)
            .await
    }

    async fn query_page(
        &self,
        query: &QuerySpec,
        options: &QueryOptions,
        continuation: Option<&str>,
    ) -> Result<Page<Value>> {
        self.log("query".to_string());
        self.inner.query_page(query, options, continuation).await
    }

    async fn read_many(&self, items: &[IdPartitionPair]) -> Result<Vec<Value>> {
        self.log(format!("read_many:{}", items.len()));
        self.inner.read_many(items).await
    }

    async fn count(&self, query: &QuerySpec, options: &QueryOptions) -> Result<u64> {
        self.log("count".to_string());
        self.inner.count(query, options).await
    }

    async fn execute_batch(
        &self,
        partition_key: &str,
        operations: Vec<BatchOperation>,
    ) -> Result<BatchResponse> {
        self.log(format!("batch:{partition_key}:{}", operations.len()));
        self.inner.execute_batch(partition_key, operations).await
    }
}

/// Serves the counting container for `notes` and in-memory containers
/// from a manager for everything else.
pub struct Resolver {
    pub notes: Arc<CountingContainer>,
    pub manager: Arc<ContainerManager>,
    resolutions: AtomicUsize,
}

impl Resolver {
    pub fn resolutions(&self) -> usize {
        self.resolutions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerResolver for Resolver {
    async fn get_container(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn Container>> {
        if name == "notes" {
            self.resolutions.fetch_add(1, Ordering::SeqCst);
            let handle: Arc<dyn Container> = self.notes.clone();
            return Ok(handle);
        }
        self.manager.get_container(name, cancel).await
    }
}

pub struct Fixture {
    pub repo: Repository<Note>,
    pub resolver: Arc<Resolver>,
    pub queue: Arc<WorkerQueue>,
}

impl Fixture {
    pub fn store(&self) -> &CountingContainer {
        &self.resolver.notes
    }

    /// Audit records written so far.
    pub fn audits(&self) -> Vec<Value> {
        self.resolver
            .manager
            .get("audits")
            .map(|c| c.snapshot())
            .unwrap_or_default()
    }

    /// Wait for queued writes and audits to land.
    pub async fn settle(&self) {
        self.queue.flush().await;
    }
}

pub fn fixture(config: RepositoryConfig, page_size: usize) -> Fixture {
    let resolver = Arc::new(Resolver {
        notes: Arc::new(CountingContainer::new("notes", page_size)),
        manager: Arc::new(ContainerManager::new(StoreConfig::default())),
        resolutions: AtomicUsize::new(0),
    });
    let queue = Arc::new(WorkerQueue::start(&QueueConfig::default()));
    let repo = Repository::new(
        config,
        resolver.clone(),
        queue.clone(),
        Arc::new(StaticUser("tester".into())),
    )
    .unwrap();
    Fixture {
        repo,
        resolver,
        queue,
    }
}

/// Repository over `notes` with auditing on and small pages.
pub fn audited() -> Fixture {
    let mut config = RepositoryConfig::new("notes");
    config.default_page_size = 2;
    fixture(config, 2)
}

pub fn unaudited() -> Fixture {
    let mut config = RepositoryConfig::new("notes").with_audit(false);
    config.default_page_size = 2;
    fixture(config, 2)
}
