use std::time::Duration;

use docrepo_core::ItemRequestOptions;
use tokio_util::sync::CancellationToken;

use crate::{RepositoryError, Result};

/// Options accepted by every repository operation.
///
/// Reads use `delay` and `cancel`; writes additionally honour `use_queue`
/// and `exclude_response`. Bulk operations apply `delay` between items,
/// paged reads between non-empty pages.
#[derive(Clone, Debug, Default)]
pub struct OpOptions {
    pub use_queue: bool,
    pub exclude_response: bool,
    pub delay: Option<Duration>,
    pub cancel: CancellationToken,
}

impl OpOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defer writes to the background queue.
    pub fn queued() -> Self {
        Self {
            use_queue: true,
            ..Self::default()
        }
    }

    pub fn with_queue(mut self, use_queue: bool) -> Self {
        self.use_queue = use_queue;
        self
    }

    pub fn exclude_response(mut self, exclude: bool) -> Self {
        self.exclude_response = exclude;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub(crate) fn item_options(&self) -> ItemRequestOptions {
        ItemRequestOptions {
            exclude_response: self.exclude_response,
        }
    }

    pub(crate) fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(RepositoryError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for the configured delay, waking early with `Cancelled`.
    pub(crate) async fn pause(&self) -> Result<()> {
        match self.delay {
            Some(delay) => crate::paging::pause(delay, &self.cancel).await,
            None => Ok(()),
        }
    }
}
