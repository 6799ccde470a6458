//! Store configuration types, deserialized from the `store` section.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Create undeclared containers on first use. When false only names listed
    /// under `containers` resolve.
    #[serde(default = "default_auto_provision")]
    pub auto_provision: bool,
    /// Page size used when a query does not set one.
    #[serde(default = "default_max_item_count")]
    pub default_max_item_count: usize,
    #[serde(default)]
    pub containers: HashMap<String, ContainerConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerConfig {
    /// Overrides `default_max_item_count` for this container.
    pub max_item_count: Option<usize>,
}

fn default_auto_provision() -> bool {
    true
}

fn default_max_item_count() -> usize {
    100
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            auto_provision: default_auto_provision(),
            default_max_item_count: default_max_item_count(),
            containers: HashMap::new(),
        }
    }
}

impl StoreConfig {
    pub fn max_item_count_for(&self, container: &str) -> usize {
        self.containers
            .get(container)
            .and_then(|c| c.max_item_count)
            .unwrap_or(self.default_max_item_count)
    }
}
