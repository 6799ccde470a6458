//! Typed document repository.
//!
//! A [`Repository<D>`] serves one document type out of one named container.
//! It layers composite-id handling, paged reads, queued or inline writes and
//! after-the-fact audit records on top of the store contract in
//! `docrepo-store`.
//!
//! # Writes
//! Every mutation takes [`OpOptions`]. With `use_queue` unset the store call
//! is awaited and its error returned. With `use_queue` set the write is
//! snapshotted into a background job and the call returns the entity id
//! immediately; a failure of the queued write is logged by the queue and is
//! not reported to the caller.
//!
//! # Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use docrepo::{OpOptions, Repository, RepositoryConfig};
//! use docrepo_core::{Document, DocumentMeta};
//! use docrepo_runtime::{AnonymousUser, QueueConfig, WorkerQueue};
//! use docrepo_store::{ContainerManager, StoreConfig};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Serialize, Deserialize)]
//! struct Note {
//!     #[serde(flatten)]
//!     meta: DocumentMeta,
//!     body: String,
//! }
//!
//! impl Document for Note {
//!     fn meta(&self) -> &DocumentMeta { &self.meta }
//!     fn meta_mut(&mut self) -> &mut DocumentMeta { &mut self.meta }
//! }
//!
//! # async fn demo() -> docrepo::Result<()> {
//! let repo: Repository<Note> = Repository::new(
//!     RepositoryConfig::new("notes"),
//!     Arc::new(ContainerManager::new(StoreConfig::default())),
//!     Arc::new(WorkerQueue::start(&QueueConfig::default())),
//!     Arc::new(AnonymousUser),
//! )?;
//!
//! let mut note = Note { meta: DocumentMeta::new("team-a", "n1"), body: "hi".into() };
//! let id = repo.add_item(&mut note, &OpOptions::default()).await?;
//! assert_eq!(id, "team-a:n1");
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod config;
mod dispatch;
pub mod options;
pub mod paging;
mod repository;

pub use audit::AuditRecorder;
pub use config::RepositoryConfig;
pub use options::OpOptions;
pub use paging::{drain, for_each_page, Cursor, FeedIterator, DEFAULT_PAGE_SIZE};
pub use repository::{PagedQuery, Repository};

use docrepo_core::ODataError;
use docrepo_runtime::QueueError;
use docrepo_store::StoreError;

/// Library-local result type.
pub type Result<T> = std::result::Result<T, RepositoryError>;

#[derive(thiserror::Error, Debug)]
pub enum RepositoryError {
    /// Input rejected before any store call was made.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Translation(#[from] ODataError),

    /// Error returned by a caller-supplied page handler.
    #[error("page handler failed: {0}")]
    Handler(#[source] anyhow::Error),
}

impl RepositoryError {
    pub fn validation(msg: impl Into<String>) -> Self {
        RepositoryError::Validation(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RepositoryError::Store(e) if e.is_not_found())
    }
}

// Store-level cancellation surfaces as the repository's own variant.
impl From<StoreError> for RepositoryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Cancelled => RepositoryError::Cancelled,
            other => RepositoryError::Store(other),
        }
    }
}
