mod delete;
mod read;
mod write;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use docrepo_core::{
    AuditRecord, CrudEventType, Document, Expr, ODataTranslator, Query, QueryOptions, QuerySpec,
};
use docrepo_runtime::{BackgroundQueue, UserContext};
use docrepo_store::{Container, ContainerResolver};

use crate::audit::AuditRecorder;
use crate::dispatch::WriteDispatcher;
use crate::options::OpOptions;
use crate::paging::{drain, Cursor, FeedIterator};
use crate::{RepositoryConfig, RepositoryError, Result};

/// Repository for one document type stored in one container.
///
/// Construction takes the collaborators explicitly: a resolver for
/// container handles, the background queue used by queued writes and audit
/// records, and the ambient user context used to attribute audits.
pub struct Repository<D: Document> {
    config: RepositoryConfig,
    resolver: Arc<dyn ContainerResolver>,
    dispatcher: WriteDispatcher,
    audit: AuditRecorder,
    odata: Option<Arc<dyn ODataTranslator>>,
    _doc: PhantomData<fn() -> D>,
}

impl<D: Document> Clone for Repository<D> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            resolver: self.resolver.clone(),
            dispatcher: self.dispatcher.clone(),
            audit: self.audit.clone(),
            odata: self.odata.clone(),
            _doc: PhantomData,
        }
    }
}

/// A query paired with explicit page settings, as returned by
/// [`Repository::paged_query`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PagedQuery {
    pub query: Query,
    pub page_size: usize,
    pub continuation: Option<String>,
}

impl PagedQuery {
    /// Replace the query, keeping the page settings.
    pub fn with_query(mut self, f: impl FnOnce(Query) -> Query) -> Self {
        self.query = f(self.query);
        self
    }
}

impl<D: Document> Repository<D> {
    pub fn new(
        config: RepositoryConfig,
        resolver: Arc<dyn ContainerResolver>,
        queue: Arc<dyn BackgroundQueue>,
        user: Arc<dyn UserContext>,
    ) -> Result<Self> {
        config.validate()?;

        let audit = AuditRecorder::new(
            resolver.clone(),
            queue.clone(),
            user,
            config.audit_container.clone(),
            D::type_name(),
        )
        .with_record_logging(config.log_audit);
        let dispatcher = WriteDispatcher::new(queue, config.audit_enabled.then(|| audit.clone()));

        tracing::debug!(
            doc_type = D::type_name(),
            container = %config.container_name,
            audit = config.audit_enabled,
            "repository created"
        );

        Ok(Self {
            config,
            resolver,
            dispatcher,
            audit,
            odata: None,
            _doc: PhantomData,
        })
    }

    /// Enable [`Repository::get_items_odata`].
    pub fn with_odata_translator(mut self, translator: Arc<dyn ODataTranslator>) -> Self {
        self.odata = Some(translator);
        self
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn container_name(&self) -> &str {
        &self.config.container_name
    }

    pub fn audit_enabled(&self) -> bool {
        self.config.audit_enabled
    }

    /// Empty native query for composing filters beyond the canned methods.
    pub fn query(&self) -> Query {
        Query::new()
    }

    /// Empty native query with page settings attached; see
    /// [`Repository::get_paged`].
    pub fn paged_query(&self, page_size: usize, continuation: Option<String>) -> PagedQuery {
        PagedQuery {
            query: Query::new(),
            page_size,
            continuation,
        }
    }

    /// Audit record for an event on `entity_id`, attributed to the current user.
    pub fn build_audit_record(
        &self,
        event: CrudEventType,
        entity_id: &str,
        entity: Option<Value>,
    ) -> AuditRecord {
        self.audit
            .build_record(event, entity_id, entity, self.audit.current_user_id())
    }

    /// Queue an audit record regardless of `audit_enabled`.
    pub async fn create_audit_item(
        &self,
        event: CrudEventType,
        entity_id: &str,
        entity: Option<Value>,
        cancel: &CancellationToken,
    ) {
        self.audit.record(event, entity_id, entity, cancel).await;
    }

    async fn container(&self, cancel: &CancellationToken) -> Result<Arc<dyn Container>> {
        if cancel.is_cancelled() {
            return Err(RepositoryError::Cancelled);
        }
        Ok(self
            .resolver
            .get_container(&self.config.container_name, cancel)
            .await?)
    }

    fn log_query(&self, operation: &str, query: &QuerySpec) {
        if self.config.log_queries {
            tracing::debug!(
                operation,
                doc_type = D::type_name(),
                query = %query.log_text(),
                "query"
            );
        }
    }

    fn log_document(&self, operation: &str, doc: &D) {
        if !self.config.log_queries {
            return;
        }
        match serde_json::to_string_pretty(doc) {
            Ok(json) => tracing::debug!(operation, doc_type = D::type_name(), "{json}"),
            Err(e) => tracing::debug!(operation, error = %e, "document not serializable"),
        }
    }

    fn page_options(&self, partition_key: Option<&str>) -> QueryOptions {
        QueryOptions {
            partition_key: partition_key.map(str::to_string),
            max_item_count: Some(self.config.default_page_size),
        }
    }

    /// Drain `query` from an already resolved container.
    async fn collect<T>(
        &self,
        container: Arc<dyn Container>,
        query: QuerySpec,
        options: QueryOptions,
        opts: &OpOptions,
    ) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        let mut cursor = FeedIterator::<T>::new(container, query, options);
        drain(&mut cursor, opts.delay, &opts.cancel).await
    }

    /// Log, resolve the container and drain.
    async fn run_query<T>(
        &self,
        operation: &str,
        query: QuerySpec,
        options: QueryOptions,
        opts: &OpOptions,
    ) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        self.log_query(operation, &query);
        let container = self.container(&opts.cancel).await?;
        self.collect(container, query, options, opts).await
    }

    /// First row of `query`, reading pages until one is non-empty.
    async fn first<T>(
        &self,
        operation: &str,
        query: QuerySpec,
        options: QueryOptions,
        cancel: &CancellationToken,
    ) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        self.log_query(operation, &query);
        let container = self.container(cancel).await?;
        let mut cursor = FeedIterator::<T>::new(container, query, options);
        while cursor.has_more() {
            let page = cursor.read_next(cancel).await?;
            if let Some(item) = page.items.into_iter().next() {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }
}

/// All documents, oldest first.
fn by_created_at() -> Query {
    Query::new().order_asc("createdAt")
}

/// Documents created within `[start, end]`.
fn created_between(start: DateTime<Utc>, end: DateTime<Utc>) -> Query {
    Query::new()
        .filter(Expr::ge("createdAt", start.to_rfc3339()))
        .filter(Expr::le("createdAt", end.to_rfc3339()))
}

/// Cap a builder query at `n` rows unless it already has a smaller cap.
fn limited(query: QuerySpec, n: usize) -> QuerySpec {
    match query {
        QuerySpec::Builder(q) => {
            let take = q.take.map_or(n, |t| t.min(n));
            QuerySpec::Builder(q.take(take))
        }
        text => text,
    }
}

fn check_page_size(page_size: usize) -> Result<()> {
    if page_size == 0 {
        Err(RepositoryError::validation("page size must be positive"))
    } else {
        Ok(())
    }
}
