//! Paged iteration.
//!
//! Every list operation ends up here. A [`Cursor`] yields pages until the
//! store stops returning a continuation token; [`drain`] accumulates all of
//! them and [`for_each_page`] hands each page to a callback as it arrives.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use docrepo_core::{Page, QueryOptions, QuerySpec};
use docrepo_store::Container;

use crate::{RepositoryError, Result};

/// Page size used when the caller does not pick one.
pub const DEFAULT_PAGE_SIZE: usize = 500;

/// Source of result pages.
#[async_trait]
pub trait Cursor<T: Send>: Send {
    /// False once a page without continuation has been returned.
    fn has_more(&self) -> bool;

    async fn read_next(&mut self, cancel: &CancellationToken) -> Result<Page<T>>;
}

/// Cursor over a container query, decoding each row into `T`.
pub struct FeedIterator<T> {
    container: Arc<dyn Container>,
    query: QuerySpec,
    options: QueryOptions,
    continuation: Option<String>,
    has_more: bool,
    _item: PhantomData<fn() -> T>,
}

impl<T> FeedIterator<T> {
    pub fn new(container: Arc<dyn Container>, query: QuerySpec, options: QueryOptions) -> Self {
        Self::resume(container, query, options, None)
    }

    /// Start from a continuation token returned by an earlier page.
    pub fn resume(
        container: Arc<dyn Container>,
        query: QuerySpec,
        options: QueryOptions,
        continuation: Option<String>,
    ) -> Self {
        Self {
            container,
            query,
            options,
            continuation,
            has_more: true,
            _item: PhantomData,
        }
    }

    pub fn continuation(&self) -> Option<&str> {
        self.continuation.as_deref()
    }
}

#[async_trait]
impl<T> Cursor<T> for FeedIterator<T>
where
    T: DeserializeOwned + Send,
{
    fn has_more(&self) -> bool {
        self.has_more
    }

    async fn read_next(&mut self, cancel: &CancellationToken) -> Result<Page<T>> {
        if cancel.is_cancelled() {
            return Err(RepositoryError::Cancelled);
        }
        let (rows, continuation) = self
            .container
            .query_page(&self.query, &self.options, self.continuation.as_deref())
            .await?
            .into_parts();

        self.has_more = continuation.is_some();
        self.continuation = continuation.clone();

        let items = rows
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<T>, _>>()?;
        Ok(Page::new(items, continuation))
    }
}

/// Read every page into one list.
///
/// Cancellation is checked before each fetch; a cancelled drain returns
/// `Cancelled` and drops whatever was accumulated. `delay` is slept after
/// each non-empty page.
pub async fn drain<T, C>(
    cursor: &mut C,
    delay: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<Vec<T>>
where
    T: Send,
    C: Cursor<T> + ?Sized,
{
    let mut items = Vec::new();
    while cursor.has_more() {
        if cancel.is_cancelled() {
            return Err(RepositoryError::Cancelled);
        }
        let page = cursor.read_next(cancel).await?;
        let non_empty = !page.items.is_empty();
        items.extend(page.items);

        if let (true, Some(delay)) = (non_empty, delay) {
            pause(delay, cancel).await?;
        }
    }
    Ok(items)
}

/// Fetch a page, hand it to `handler`, repeat while a continuation comes back.
///
/// `fetch` receives the continuation of the previous page (`start` for the
/// first). The handler sees every page once, empty ones included.
pub async fn for_each_page<T, F, FFut, H, HFut>(
    start: Option<String>,
    cancel: &CancellationToken,
    mut fetch: F,
    mut handler: H,
) -> Result<()>
where
    F: FnMut(Option<String>) -> FFut,
    FFut: Future<Output = Result<Page<T>>>,
    H: FnMut(Vec<T>) -> HFut,
    HFut: Future<Output = Result<()>>,
{
    let mut continuation = start;
    loop {
        if cancel.is_cancelled() {
            return Err(RepositoryError::Cancelled);
        }
        let (items, next) = fetch(continuation.take()).await?.into_parts();
        handler(items).await?;

        match next {
            Some(token) => continuation = Some(token),
            None => return Ok(()),
        }
    }
}

pub(crate) async fn pause(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(RepositoryError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Serves a fixed script of pages and counts fetches.
    struct Scripted {
        pages: VecDeque<Page<u32>>,
        fetches: usize,
        has_more: bool,
    }

    impl Scripted {
        fn new(pages: Vec<Page<u32>>) -> Self {
            Self {
                pages: pages.into(),
                fetches: 0,
                has_more: true,
            }
        }
    }

    #[async_trait]
    impl Cursor<u32> for Scripted {
        fn has_more(&self) -> bool {
            self.has_more
        }

        async fn read_next(&mut self, _cancel: &CancellationToken) -> Result<Page<u32>> {
            self.fetches += 1;
            let page = self.pages.pop_front().unwrap_or_default();
            self.has_more = page.has_more();
            Ok(page)
        }
    }

    fn token(n: usize) -> Option<String> {
        Some(format!("t{n}"))
    }

    #[tokio::test]
    async fn drain_concatenates_pages_including_empty_ones() {
        let mut cursor = Scripted::new(vec![
            Page::new(vec![1, 2], token(1)),
            Page::new(vec![], token(2)),
            Page::new(vec![3], token(3)),
            Page::new(vec![], token(4)),
            Page::last(vec![4, 5]),
        ]);
        let items = drain(&mut cursor, None, &CancellationToken::new()).await.unwrap();
        assert_eq!(items, vec![1, 2, 3, 4, 5]);
        assert_eq!(cursor.fetches, 5);
    }

    #[tokio::test]
    async fn drain_makes_n_plus_one_fetches_when_last_page_is_empty() {
        let pages = vec![
            Page::new(vec![1], token(1)),
            Page::new(vec![], token(2)),
            Page::new(vec![2], token(3)),
            Page::last(vec![]),
        ];
        let mut cursor = Scripted::new(pages);
        let items = drain(&mut cursor, None, &CancellationToken::new()).await.unwrap();
        assert_eq!(items, vec![1, 2]);
        assert_eq!(cursor.fetches, 4);
    }

    #[tokio::test]
    async fn cancelled_before_first_fetch() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut cursor = Scripted::new(vec![Page::last(vec![1])]);
        let err = drain(&mut cursor, None, &cancel).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Cancelled));
        assert_eq!(cursor.fetches, 0);
    }

    /// Cancels the shared token as soon as the first page is served.
    struct CancelsAfterFirst {
        inner: Scripted,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl Cursor<u32> for CancelsAfterFirst {
        fn has_more(&self) -> bool {
            self.inner.has_more()
        }

        async fn read_next(&mut self, cancel: &CancellationToken) -> Result<Page<u32>> {
            let page = self.inner.read_next(cancel).await;
            self.cancel.cancel();
            page
        }
    }

    #[tokio::test]
    async fn cancelled_mid_drain_discards_partial_results() {
        let cancel = CancellationToken::new();
        let mut cursor = CancelsAfterFirst {
            inner: Scripted::new(vec![Page::new(vec![1, 2], token(1)), Page::last(vec![3])]),
            cancel: cancel.clone(),
        };
        let err = drain(&mut cursor, None, &cancel).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Cancelled));
        assert_eq!(cursor.inner.fetches, 1);
    }

    #[tokio::test]
    async fn delay_follows_each_non_empty_page() {
        let mut cursor = Scripted::new(vec![Page::new(vec![1], token(1)), Page::last(vec![2])]);
        let started = std::time::Instant::now();
        drain(&mut cursor, Some(Duration::from_millis(30)), &CancellationToken::new())
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn empty_pages_are_not_delayed() {
        let mut cursor = Scripted::new(vec![Page::new(vec![], token(1)), Page::last(vec![])]);
        let items = tokio::time::timeout(
            Duration::from_secs(5),
            drain(&mut cursor, Some(Duration::from_secs(60)), &CancellationToken::new()),
        )
        .await
        .expect("empty pages must not sleep")
        .unwrap();
        assert!(items.is_empty());
        assert_eq!(cursor.fetches, 2);
    }

    #[tokio::test]
    async fn for_each_page_runs_handler_once_per_page() {
        let mut script: VecDeque<Page<u32>> = vec![
            Page::new(vec![1, 2], token(1)),
            Page::new(vec![], token(2)),
            Page::last(vec![3]),
        ]
        .into();
        let mut seen_tokens = Vec::new();
        let mut pages = Vec::new();

        for_each_page(
            None,
            &CancellationToken::new(),
            |continuation| {
                seen_tokens.push(continuation);
                let page = script.pop_front().unwrap_or_default();
                async move { Ok(page) }
            },
            |items| {
                pages.push(items);
                async { Ok(()) }
            },
        )
        .await
        .unwrap();

        assert_eq!(pages, vec![vec![1, 2], vec![], vec![3]]);
        assert_eq!(seen_tokens, vec![None, token(1), token(2)]);
    }

    #[tokio::test]
    async fn for_each_page_stops_on_handler_error() {
        let mut fetches = 0;
        let err = for_each_page(
            None,
            &CancellationToken::new(),
            |_| {
                fetches += 1;
                async { Ok(Page::new(vec![1u32], token(1))) }
            },
            |_| async { Err(RepositoryError::validation("stop")) },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RepositoryError::Validation(_)));
        assert_eq!(fetches, 1);
    }
}
