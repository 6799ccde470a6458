//! In-memory container.
//!
//! Items are grouped by partition key; within a partition they keep insertion
//! order, and partitions are scanned in key order. Only native
//! [`Query`](docrepo_core::Query) expressions are executed; query text is
//! rejected with [`StoreError::UnsupportedQuery`].

mod eval;
mod patch;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use docrepo_core::{
    IdPartitionPair, ItemRequestOptions, Page, PatchOperation, Query, QueryOptions, QuerySpec,
};

use crate::container::{
    BatchOperation, BatchOperationResult, BatchResponse, Container, MAX_BATCH_OPERATIONS,
};
use crate::{Result, StoreError};

type Partitions = BTreeMap<String, Vec<Value>>;

pub struct InMemoryContainer {
    name: String,
    default_max_item_count: usize,
    data: RwLock<Partitions>,
}

impl InMemoryContainer {
    pub fn new(name: impl Into<String>, default_max_item_count: usize) -> Self {
        Self {
            name: name.into(),
            default_max_item_count,
            data: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of stored items across all partitions.
    pub fn len(&self) -> usize {
        self.data.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every stored item in scan order.
    pub fn snapshot(&self) -> Vec<Value> {
        self.data.read().values().flatten().cloned().collect()
    }

    fn evaluate(&self, query: &QuerySpec, options: &QueryOptions) -> Result<Vec<Row>> {
        let query: &Query = match query {
            QuerySpec::Builder(q) => q,
            QuerySpec::Text(def) => return Err(StoreError::UnsupportedQuery(def.text.clone())),
        };

        let data = self.data.read();
        let mut rows: Vec<&Value> = match &options.partition_key {
            Some(pk) => data.get(pk).map(|items| items.iter().collect()).unwrap_or_default(),
            None => data.values().flatten().collect(),
        };

        if let Some(filter) = &query.filter {
            rows.retain(|doc| eval::matches(filter, doc));
        }

        let keyed = !query.order_by.is_empty() && !query.distinct;
        let mut out: Vec<Row> = if query.order_by.is_empty() {
            rows.into_iter()
                .filter_map(|doc| {
                    eval::project(&query.projection, doc).map(|value| Row { key: None, value })
                })
                .collect()
        } else {
            let mut sorted: Vec<(Vec<Value>, &Value)> = rows
                .into_iter()
                .map(|doc| (eval::sort_key(&query.order_by, doc), doc))
                .collect();
            sorted.sort_by(|a, b| eval::compare_sort_keys(&query.order_by, &a.0, &b.0));
            sorted
                .into_iter()
                .filter_map(|(key, doc)| {
                    eval::project(&query.projection, doc).map(|value| Row {
                        key: keyed.then_some(key),
                        value,
                    })
                })
                .collect()
        };

        if query.distinct {
            let mut seen = HashSet::new();
            out.retain(|row| seen.insert(row.value.to_string()));
        }
        if let Some(n) = query.take {
            out.truncate(n);
        }
        Ok(out)
    }
}

/// A result row and, for ordered queries, the sort key it was ranked by.
struct Row {
    key: Option<Vec<Value>>,
    value: Value,
}

/// Where the next page starts. Ordered queries resume after the last
/// returned sort key, so rows removed between pages do not shift the
/// remainder; unordered queries resume at an offset.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
enum Resume {
    Offset(usize),
    After(Vec<Value>),
}

fn encode_token(resume: &Resume) -> Result<String> {
    Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(resume)?))
}

fn decode_token(token: &str) -> Result<Resume> {
    URL_SAFE_NO_PAD
        .decode(token)
        .ok()
        .and_then(|raw| serde_json::from_slice(&raw).ok())
        .ok_or_else(|| StoreError::BadRequest(format!("invalid continuation token '{token}'")))
}

fn item_identity(item: &Value) -> Result<(String, String)> {
    let id = item
        .get("id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| StoreError::BadRequest("item is missing 'id'".into()))?;
    let pk = item
        .get("partitionKey")
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::BadRequest("item is missing 'partitionKey'".into()))?;
    Ok((id.to_string(), pk.to_string()))
}

fn check_partition(item: &Value, partition_key: &str) -> Result<String> {
    let (id, pk) = item_identity(item)?;
    if pk != partition_key {
        return Err(StoreError::BadRequest(format!(
            "item partition key '{pk}' does not match '{partition_key}'"
        )));
    }
    Ok(id)
}

fn position(items: &[Value], id: &str) -> Option<usize> {
    items
        .iter()
        .position(|v| v.get("id").and_then(Value::as_str) == Some(id))
}

fn echo(item: Value, options: ItemRequestOptions) -> Option<Value> {
    if options.exclude_response {
        None
    } else {
        Some(item)
    }
}

// Single-partition write primitives shared by the item calls and batches.

fn create_in(items: &mut Vec<Value>, item: Value, partition_key: &str) -> Result<Value> {
    let id = check_partition(&item, partition_key)?;
    if position(items, &id).is_some() {
        return Err(StoreError::Conflict {
            id,
            partition_key: partition_key.to_string(),
        });
    }
    items.push(item.clone());
    Ok(item)
}

fn replace_in(items: &mut [Value], id: &str, item: Value, partition_key: &str) -> Result<Value> {
    let item_id = check_partition(&item, partition_key)?;
    if item_id != id {
        return Err(StoreError::BadRequest(format!(
            "item id '{item_id}' does not match '{id}'"
        )));
    }
    let idx = position(items, id).ok_or_else(|| StoreError::not_found(id, partition_key))?;
    items[idx] = item.clone();
    Ok(item)
}

fn patch_in(
    items: &mut [Value],
    id: &str,
    operations: &[PatchOperation],
    partition_key: &str,
) -> Result<Value> {
    let idx = position(items, id).ok_or_else(|| StoreError::not_found(id, partition_key))?;
    let mut patched = items[idx].clone();
    patch::apply_all(&mut patched, operations)?;
    items[idx] = patched.clone();
    Ok(patched)
}

fn delete_in(items: &mut Vec<Value>, id: &str, partition_key: &str) -> Result<()> {
    let idx = position(items, id).ok_or_else(|| StoreError::not_found(id, partition_key))?;
    items.remove(idx);
    Ok(())
}

#[async_trait]
impl Container for InMemoryContainer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_item(
        &self,
        item: Value,
        partition_key: &str,
        options: ItemRequestOptions,
    ) -> Result<Option<Value>> {
        let mut data = self.data.write();
        let items = data.entry(partition_key.to_string()).or_default();
        let created = create_in(items, item, partition_key);
        if items.is_empty() {
            data.remove(partition_key);
        }
        Ok(echo(created?, options))
    }

    async fn read_item(&self, id: &str, partition_key: &str) -> Result<Option<Value>> {
        let data = self.data.read();
        Ok(data
            .get(partition_key)
            .and_then(|items| position(items, id).map(|idx| items[idx].clone())))
    }

    async fn replace_item(
        &self,
        id: &str,
        item: Value,
        partition_key: &str,
        options: ItemRequestOptions,
    ) -> Result<Option<Value>> {
        let mut data = self.data.write();
        let items = data
            .get_mut(partition_key)
            .ok_or_else(|| StoreError::not_found(id, partition_key))?;
        let replaced = replace_in(items, id, item, partition_key)?;
        Ok(echo(replaced, options))
    }

    async fn delete_item(&self, id: &str, partition_key: &str) -> Result<()> {
        let mut data = self.data.write();
        let items = data
            .get_mut(partition_key)
            .ok_or_else(|| StoreError::not_found(id, partition_key))?;
        delete_in(items, id, partition_key)?;
        if items.is_empty() {
            data.remove(partition_key);
        }
        Ok(())
    }

    async fn patch_item(
        &self,
        id: &str,
        partition_key: &str,
        operations: &[PatchOperation],
        options: ItemRequestOptions,
    ) -> Result<Option<Value>> {
        let mut data = self.data.write();
        let items = data
            .get_mut(partition_key)
            .ok_or_else(|| StoreError::not_found(id, partition_key))?;
        let patched = patch_in(items, id, operations, partition_key)?;
        Ok(echo(patched, options))
    }

    async fn query_page(
        &self,
        query: &QuerySpec,
        options: &QueryOptions,
        continuation: Option<&str>,
    ) -> Result<Page<Value>> {
        let page_size = options.max_item_count.unwrap_or(self.default_max_item_count);
        if page_size == 0 {
            return Err(StoreError::BadRequest("max item count must be positive".into()));
        }
        let resume = continuation.map(decode_token).transpose()?;

        let mut rows = self.evaluate(query, options)?;
        let order_by = match query {
            QuerySpec::Builder(q) => q.order_by.as_slice(),
            QuerySpec::Text(_) => &[],
        };
        let start = match &resume {
            None => 0,
            Some(Resume::Offset(n)) => *n,
            Some(Resume::After(last)) => rows
                .iter()
                .position(|row| {
                    row.key.as_deref().is_some_and(|key| {
                        eval::compare_sort_keys(order_by, key, last) == Ordering::Greater
                    })
                })
                .unwrap_or(rows.len()),
        }
        .min(rows.len());
        let end = start.saturating_add(page_size).min(rows.len());

        let next = if end < rows.len() {
            let resume = match &rows[end - 1].key {
                Some(key) => Resume::After(key.clone()),
                None => Resume::Offset(end),
            };
            Some(encode_token(&resume)?)
        } else {
            None
        };
        let items: Vec<Value> = rows.drain(start..end).map(|row| row.value).collect();

        tracing::trace!(
            container = %self.name,
            start,
            returned = items.len(),
            has_more = next.is_some(),
            "query page"
        );
        Ok(Page::new(items, next))
    }

    async fn read_many(&self, items: &[IdPartitionPair]) -> Result<Vec<Value>> {
        let data = self.data.read();
        Ok(items
            .iter()
            .filter_map(|pair| {
                let docs = data.get(&pair.partition_key)?;
                position(docs, &pair.id).map(|idx| docs[idx].clone())
            })
            .collect())
    }

    async fn count(&self, query: &QuerySpec, options: &QueryOptions) -> Result<u64> {
        Ok(self.evaluate(query, options)?.len() as u64)
    }

    async fn execute_batch(
        &self,
        partition_key: &str,
        operations: Vec<BatchOperation>,
    ) -> Result<BatchResponse> {
        if operations.is_empty() || operations.len() > MAX_BATCH_OPERATIONS {
            return Err(StoreError::BadRequest(format!(
                "batch must carry between 1 and {MAX_BATCH_OPERATIONS} operations, got {}",
                operations.len()
            )));
        }

        let total = operations.len();
        let mut data = self.data.write();
        let mut working = data.get(partition_key).cloned().unwrap_or_default();
        let mut results = Vec::with_capacity(total);

        for (idx, op) in operations.into_iter().enumerate() {
            let outcome = match op {
                BatchOperation::Create { item } => {
                    create_in(&mut working, item, partition_key).map(|_| 201)
                }
                BatchOperation::Replace { id, item } => {
                    replace_in(&mut working, &id, item, partition_key).map(|_| 200)
                }
                BatchOperation::Patch { id, operations } => {
                    patch_in(&mut working, &id, &operations, partition_key).map(|_| 200)
                }
                BatchOperation::Delete { id } => {
                    delete_in(&mut working, &id, partition_key).map(|_| 204)
                }
            };

            match outcome {
                Ok(status_code) => results.push(BatchOperationResult { status_code }),
                Err(err) => {
                    tracing::debug!(
                        container = %self.name,
                        partition_key,
                        operation = idx,
                        error = %err,
                        "batch rolled back"
                    );
                    let failed = results.len();
                    let results = (0..total)
                        .map(|i| BatchOperationResult {
                            status_code: if i == failed { err.status_code() } else { 424 },
                        })
                        .collect();
                    return Ok(BatchResponse { results });
                }
            }
        }

        if working.is_empty() {
            data.remove(partition_key);
        } else {
            data.insert(partition_key.to_string(), working);
        }
        Ok(BatchResponse { results })
    }
}
