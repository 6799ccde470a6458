//! Document store contract and the in-memory reference store.
//!
//! The repository layer talks to storage only through [`Container`] handles
//! obtained from a [`ContainerResolver`]. [`ContainerManager`] is the resolver
//! used by the demo binary and the test suites; it hands out
//! [`InMemoryContainer`]s configured from the `store` section of the
//! application config.
//!
//! # Example
//! ```rust,no_run
//! use docrepo_store::{ContainerManager, ContainerResolver, StoreConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> docrepo_store::Result<()> {
//! let manager = ContainerManager::new(StoreConfig::default());
//! let notes = manager.get_container("notes", &CancellationToken::new()).await?;
//! assert_eq!(notes.name(), "notes");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod container;
pub mod manager;
pub mod memory;

pub use config::{ContainerConfig, StoreConfig};
pub use container::{
    BatchOperation, BatchOperationResult, BatchResponse, Container, ContainerResolver,
    MAX_BATCH_OPERATIONS,
};
pub use manager::ContainerManager;
pub use memory::InMemoryContainer;

use std::time::Duration;

/// Library-local result type.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Typed error for the store layer.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("document '{id}' not found in partition '{partition_key}'")]
    NotFound { id: String, partition_key: String },

    #[error("document '{id}' already exists in partition '{partition_key}'")]
    Conflict { id: String, partition_key: String },

    #[error("request throttled (retry after {retry_after:?})")]
    Throttled { retry_after: Option<Duration> },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unsupported query: {0}")]
    UnsupportedQuery(String),

    #[error("container '{0}' not found")]
    ContainerNotFound(String),

    #[error("invalid store configuration: {0}")]
    InvalidConfig(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    pub fn not_found(id: impl Into<String>, partition_key: impl Into<String>) -> Self {
        StoreError::NotFound {
            id: id.into(),
            partition_key: partition_key.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// HTTP-style status code, as reported in batch responses.
    pub fn status_code(&self) -> u16 {
        match self {
            StoreError::NotFound { .. } | StoreError::ContainerNotFound(_) => 404,
            StoreError::Conflict { .. } => 409,
            StoreError::Throttled { .. } => 429,
            StoreError::BadRequest(_)
            | StoreError::UnsupportedQuery(_)
            | StoreError::Serialization(_) => 400,
            StoreError::Cancelled => 499,
            StoreError::InvalidConfig(_) | StoreError::Other(_) => 500,
        }
    }
}
