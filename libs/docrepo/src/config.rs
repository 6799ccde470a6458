use serde::{Deserialize, Serialize};

use crate::paging::DEFAULT_PAGE_SIZE;
use crate::{RepositoryError, Result};

/// Per-repository settings, usually read from the `repositories.<name>`
/// section of the application config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryConfig {
    /// Container holding this repository's documents.
    pub container_name: String,
    /// Write an audit record after every successful create, update or delete.
    #[serde(default = "default_true")]
    pub audit_enabled: bool,
    /// Log query text and written payloads at DEBUG.
    #[serde(default)]
    pub log_queries: bool,
    /// Log each audit record before it is written.
    #[serde(default)]
    pub log_audit: bool,
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
    #[serde(default = "default_audit_container")]
    pub audit_container: String,
    /// Ids per `IN` query when reading by document id list.
    #[serde(default = "default_id_batch_size")]
    pub id_batch_size: usize,
}

fn default_true() -> bool {
    true
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_audit_container() -> String {
    "audits".to_string()
}

fn default_id_batch_size() -> usize {
    50
}

impl RepositoryConfig {
    pub fn new(container_name: impl Into<String>) -> Self {
        Self {
            container_name: container_name.into(),
            audit_enabled: default_true(),
            log_queries: false,
            log_audit: false,
            default_page_size: default_page_size(),
            audit_container: default_audit_container(),
            id_batch_size: default_id_batch_size(),
        }
    }

    pub fn with_audit(mut self, enabled: bool) -> Self {
        self.audit_enabled = enabled;
        self
    }

    pub fn with_query_logging(mut self, enabled: bool) -> Self {
        self.log_queries = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.container_name.trim().is_empty() {
            return Err(RepositoryError::validation("container_name must not be empty"));
        }
        if self.audit_enabled && self.audit_container.trim().is_empty() {
            return Err(RepositoryError::validation(
                "audit_container must not be empty when auditing is enabled",
            ));
        }
        if self.default_page_size == 0 || self.id_batch_size == 0 {
            return Err(RepositoryError::validation(
                "default_page_size and id_batch_size must be positive",
            ));
        }
        Ok(())
    }
}
