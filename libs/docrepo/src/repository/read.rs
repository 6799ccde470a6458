use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::future::Future;

use docrepo_core::{
    split_id, Document, Expr, IdNamePair, IdPartitionPair, ODataOptions, Page, Projection, Query,
    QueryOptions, QuerySpec,
};

use super::{by_created_at, check_page_size, created_between, limited, PagedQuery, Repository};
use crate::options::OpOptions;
use crate::paging::{for_each_page, Cursor, FeedIterator};
use crate::{RepositoryError, Result};

impl<D: Document> Repository<D> {
    // ---- existence ----

    /// Whether the document behind a composite id exists.
    pub async fn exists(&self, entity_id: &str, opts: &OpOptions) -> Result<bool> {
        let (partition_key, document_id) = split_id(entity_id);
        self.exists_by_key(partition_key, document_id, opts).await
    }

    pub async fn exists_by_key(
        &self,
        partition_key: &str,
        document_id: &str,
        opts: &OpOptions,
    ) -> Result<bool> {
        let container = self.container(&opts.cancel).await?;
        Ok(container.read_item(document_id, partition_key).await?.is_some())
    }

    /// Whether any document matches `query`. Only ids are read.
    pub async fn exists_query(&self, query: Query, opts: &OpOptions) -> Result<bool> {
        let probe = query.select(Projection::Value("id".into())).take(1);
        let hit: Option<serde_json::Value> = self
            .first("exists_query", probe.into(), QueryOptions::default(), &opts.cancel)
            .await?;
        Ok(hit.is_some())
    }

    pub async fn exists_by_partition_key(
        &self,
        partition_key: &str,
        opts: &OpOptions,
    ) -> Result<bool> {
        let probe = Query::new().select(Projection::Value("id".into())).take(1);
        let options = QueryOptions::in_partition(partition_key).with_max_item_count(1);
        let hit: Option<serde_json::Value> = self
            .first("exists_by_partition_key", probe.into(), options, &opts.cancel)
            .await?;
        Ok(hit.is_some())
    }

    pub async fn any(&self, opts: &OpOptions) -> Result<bool> {
        self.exists_query(Query::new(), opts).await
    }

    pub async fn none(&self, opts: &OpOptions) -> Result<bool> {
        Ok(!self.any(opts).await?)
    }

    pub async fn count(&self, opts: &OpOptions) -> Result<u64> {
        self.count_query(Query::new(), opts).await
    }

    pub async fn count_query(&self, query: impl Into<QuerySpec>, opts: &OpOptions) -> Result<u64> {
        let query = query.into();
        self.log_query("count", &query);
        let container = self.container(&opts.cancel).await?;
        Ok(container.count(&query, &QueryOptions::default()).await?)
    }

    // ---- single item ----

    /// Point read by composite id. `None` when the document does not exist.
    #[tracing::instrument(name = "docrepo.get_item", skip_all, fields(entity_id = %entity_id))]
    pub async fn get_item(&self, entity_id: &str, opts: &OpOptions) -> Result<Option<D>> {
        let (partition_key, document_id) = split_id(entity_id);
        self.get_item_by_key(partition_key, document_id, opts).await
    }

    pub async fn get_item_by_key(
        &self,
        partition_key: &str,
        document_id: &str,
        opts: &OpOptions,
    ) -> Result<Option<D>> {
        if self.config.log_queries {
            tracing::debug!(
                doc_type = D::type_name(),
                id = %docrepo_core::join_id(partition_key, document_id),
                "get_item"
            );
        }
        let container = self.container(&opts.cancel).await?;
        match container.read_item(document_id, partition_key).await? {
            Some(raw) => Ok(Some(serde_json::from_value(raw)?)),
            None => Ok(None),
        }
    }

    /// Lookup where the pair's id is both partition key and document id.
    pub async fn get_item_by_id_name_pair(
        &self,
        pair: &IdNamePair,
        opts: &OpOptions,
    ) -> Result<Option<D>> {
        self.get_item_by_key(&pair.id, &pair.id, opts).await
    }

    /// Newest document in a partition expected to hold a single one.
    pub async fn get_item_by_partition_key(
        &self,
        partition_key: &str,
        opts: &OpOptions,
    ) -> Result<Option<D>> {
        let query = Query::new().order_desc("createdAt").take(1);
        let options = QueryOptions::in_partition(partition_key).with_max_item_count(1);
        self.first("get_item_by_partition_key", query.into(), options, &opts.cancel)
            .await
    }

    /// Oldest document by `createdAt`.
    pub async fn get_first(&self, opts: &OpOptions) -> Result<Option<D>> {
        let query = by_created_at().take(1);
        self.first("get_first", query.into(), QueryOptions::default(), &opts.cancel)
            .await
    }

    /// Newest document by `createdAt`.
    pub async fn get_last(&self, opts: &OpOptions) -> Result<Option<D>> {
        let query = Query::new().order_desc("createdAt").take(1);
        self.first("get_last", query.into(), QueryOptions::default(), &opts.cancel)
            .await
    }

    /// First row of an arbitrary query, decoded as `T`.
    pub async fn get_item_query<T>(
        &self,
        query: impl Into<QuerySpec>,
        opts: &OpOptions,
    ) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        let query = limited(query.into(), 1);
        self.first("get_item_query", query, QueryOptions::default(), &opts.cancel)
            .await
    }

    // ---- bulk ----

    /// Full scan. Use sparingly.
    #[tracing::instrument(name = "docrepo.get_all", skip_all)]
    pub async fn get_all(&self, opts: &OpOptions) -> Result<Vec<D>> {
        self.run_query("get_all", Query::new().into(), self.page_options(None), opts)
            .await
    }

    #[tracing::instrument(
        name = "docrepo.get_all_by_partition_key",
        skip_all,
        fields(partition_key = %partition_key)
    )]
    pub async fn get_all_by_partition_key(
        &self,
        partition_key: &str,
        opts: &OpOptions,
    ) -> Result<Vec<D>> {
        self.run_query(
            "get_all_by_partition_key",
            Query::new().into(),
            self.page_options(Some(partition_key)),
            opts,
        )
        .await
    }

    /// Documents whose id is in `document_ids`, across partitions. Ids are
    /// sent in `IN` batches of `id_batch_size`.
    pub async fn get_all_by_document_ids(
        &self,
        document_ids: &[String],
        opts: &OpOptions,
    ) -> Result<Vec<D>> {
        if document_ids.is_empty() {
            return Ok(Vec::new());
        }
        let container = self.container(&opts.cancel).await?;
        let mut all = Vec::with_capacity(document_ids.len());
        for chunk in document_ids.chunks(self.config.id_batch_size) {
            opts.check_cancelled()?;
            let query: QuerySpec = Query::new()
                .filter(Expr::is_in("id", chunk.iter().cloned()))
                .into();
            self.log_query("get_all_by_document_ids", &query);
            let items: Vec<D> = self
                .collect(container.clone(), query, self.page_options(None), opts)
                .await?;
            all.extend(items);
        }
        Ok(all)
    }

    /// Multi-get by identity. Missing documents are skipped.
    pub async fn get_all_by_id_partition_pairs(
        &self,
        pairs: &[IdPartitionPair],
        opts: &OpOptions,
    ) -> Result<Vec<D>> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }
        let container = self.container(&opts.cancel).await?;
        container
            .read_many(pairs)
            .await?
            .into_iter()
            .map(|raw| serde_json::from_value(raw).map_err(RepositoryError::from))
            .collect()
    }

    pub async fn get_all_by_id_name_pairs(
        &self,
        pairs: &[IdNamePair],
        opts: &OpOptions,
    ) -> Result<Vec<D>> {
        let pairs: Vec<IdPartitionPair> = pairs
            .iter()
            .map(|p| IdPartitionPair::new(p.id.clone(), p.id.clone()))
            .collect();
        self.get_all_by_id_partition_pairs(&pairs, opts).await
    }

    /// Every row of `query`, decoded as `T`.
    pub async fn get_items<T>(&self, query: impl Into<QuerySpec>, opts: &OpOptions) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        self.run_query("get_items", query.into(), self.page_options(None), opts)
            .await
    }

    /// Documents created within `[start, end]`.
    pub async fn get_items_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        opts: &OpOptions,
    ) -> Result<Vec<D>> {
        self.run_query(
            "get_items_between",
            created_between(start, end).into(),
            self.page_options(None),
            opts,
        )
        .await
    }

    pub async fn get_all_ids(&self, opts: &OpOptions) -> Result<Vec<IdPartitionPair>> {
        self.get_ids(Query::new(), opts).await
    }

    /// Identities of the documents matching `query`.
    pub async fn get_ids(&self, query: Query, opts: &OpOptions) -> Result<Vec<IdPartitionPair>> {
        let query = query.select(Projection::IdPartition);
        self.run_query("get_ids", query.into(), self.page_options(None), opts)
            .await
    }

    pub async fn get_all_partition_keys(&self, opts: &OpOptions) -> Result<Vec<String>> {
        self.get_partition_keys(Query::new(), opts).await
    }

    /// Distinct partition keys of the documents matching `query`.
    pub async fn get_partition_keys(&self, query: Query, opts: &OpOptions) -> Result<Vec<String>> {
        let query = query
            .select(Projection::Value("partitionKey".into()))
            .distinct();
        self.run_query("get_partition_keys", query.into(), self.page_options(None), opts)
            .await
    }

    /// Run OData options through the configured translator.
    pub async fn get_items_odata<T>(
        &self,
        odata: &ODataOptions,
        source: Option<Query>,
        opts: &OpOptions,
    ) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        let translator = self
            .odata
            .as_ref()
            .ok_or_else(|| RepositoryError::validation("no OData translator configured"))?;
        let source = source.unwrap_or_default().to_definition();
        let translated = translator.translate(odata, source)?;
        self.run_query("get_items_odata", translated.into(), self.page_options(None), opts)
            .await
    }

    // ---- paging ----

    /// One page of every document, oldest first.
    pub async fn get_all_paged(
        &self,
        page_size: usize,
        continuation: Option<String>,
        opts: &OpOptions,
    ) -> Result<Page<D>> {
        self.get_items_paged(by_created_at(), page_size, continuation, opts)
            .await
    }

    /// One page of `query`.
    ///
    /// Continuation tokens are only stable under an explicit ordering;
    /// unordered paging may skip or repeat rows when the data changes.
    #[tracing::instrument(
        name = "docrepo.get_items_paged",
        skip_all,
        fields(page_size = page_size, resumed = continuation.is_some())
    )]
    pub async fn get_items_paged<T>(
        &self,
        query: impl Into<QuerySpec>,
        page_size: usize,
        continuation: Option<String>,
        opts: &OpOptions,
    ) -> Result<Page<T>>
    where
        T: DeserializeOwned + Send,
    {
        check_page_size(page_size)?;
        let query = query.into();
        if self.config.log_queries {
            tracing::debug!(
                doc_type = D::type_name(),
                page_size,
                continuation = continuation.as_deref().unwrap_or(""),
                query = %query.log_text(),
                "get_items_paged"
            );
        }
        let container = self.container(&opts.cancel).await?;
        let options = QueryOptions::default().with_max_item_count(page_size);
        let mut cursor = FeedIterator::<T>::resume(container, query, options, continuation);
        cursor.read_next(&opts.cancel).await
    }

    /// One page of a query built from [`Repository::paged_query`].
    pub async fn get_paged<T>(&self, paged: PagedQuery, opts: &OpOptions) -> Result<Page<T>>
    where
        T: DeserializeOwned + Send,
    {
        self.get_items_paged(paged.query, paged.page_size, paged.continuation, opts)
            .await
    }

    /// Hand each page of `query` to `handler` until the last one.
    pub async fn for_each_page_of_query<T, H, Fut>(
        &self,
        query: impl Into<QuerySpec>,
        page_size: usize,
        opts: &OpOptions,
        mut handler: H,
    ) -> Result<()>
    where
        T: DeserializeOwned + Send,
        H: FnMut(Vec<T>) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        check_page_size(page_size)?;
        let query = query.into();
        for_each_page(
            None,
            &opts.cancel,
            |continuation| self.get_items_paged(query.clone(), page_size, continuation, opts),
            |items| {
                let fut = handler(items);
                async move { fut.await.map_err(RepositoryError::Handler) }
            },
        )
        .await
    }

    /// Hand each page of every document, oldest first, to `handler`.
    pub async fn for_each_page_of_all<H, Fut>(
        &self,
        page_size: usize,
        opts: &OpOptions,
        handler: H,
    ) -> Result<()>
    where
        H: FnMut(Vec<D>) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        self.for_each_page_of_query(by_created_at(), page_size, opts, handler)
            .await
    }
}
