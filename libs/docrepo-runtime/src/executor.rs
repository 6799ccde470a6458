use futures::stream::{self, StreamExt};
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

/// Runs one future per item with at most `max_concurrency` in flight.
///
/// Items fail independently: an error is logged and counted, siblings keep
/// running. Once the token is cancelled, items not yet started are skipped.
#[derive(Clone, Copy, Debug)]
pub struct ConcurrentExecutor {
    max_concurrency: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub total: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl ExecutionSummary {
    pub fn succeeded(&self) -> usize {
        self.total - self.failed - self.skipped
    }
}

impl ConcurrentExecutor {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub async fn execute<T, F, Fut, E>(
        &self,
        operation: &str,
        items: Vec<T>,
        cancel: &CancellationToken,
        f: F,
    ) -> ExecutionSummary
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        let total = items.len();
        let failed = AtomicUsize::new(0);
        let skipped = AtomicUsize::new(0);

        stream::iter(items)
            .for_each_concurrent(self.max_concurrency, |item| {
                let (f, failed, skipped) = (&f, &failed, &skipped);
                async move {
                    if cancel.is_cancelled() {
                        skipped.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                    if let Err(e) = f(item).await {
                        failed.fetch_add(1, Ordering::Relaxed);
                        tracing::error!(operation, error = %e, "parallel item failed");
                    }
                }
            })
            .await;

        let summary = ExecutionSummary {
            total,
            failed: failed.into_inner(),
            skipped: skipped.into_inner(),
        };
        if summary.failed > 0 || summary.skipped > 0 {
            tracing::warn!(
                operation,
                total = summary.total,
                failed = summary.failed,
                skipped = summary.skipped,
                "parallel operation finished with errors"
            );
        }
        summary
    }
}
