//! Container manager.
//!
//! The ContainerManager is responsible for:
//! - Loading the store configuration from Figment
//! - Creating containers on first use and caching their handles
//! - Refusing undeclared containers when auto-provisioning is off

use async_trait::async_trait;
use dashmap::DashMap;
use figment::Figment;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::StoreConfig;
use crate::container::{Container, ContainerResolver};
use crate::memory::InMemoryContainer;
use crate::{Result, StoreError};

/// Resolver backed by in-memory containers.
pub struct ContainerManager {
    config: StoreConfig,
    cache: DashMap<String, Arc<InMemoryContainer>>,
}

impl ContainerManager {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            cache: DashMap::new(),
        }
    }

    /// Build from the `store` section of a Figment. A missing section means defaults.
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let config = if figment.contains("store") {
            figment
                .extract_inner::<StoreConfig>("store")
                .map_err(|e| StoreError::InvalidConfig(e.to_string()))?
        } else {
            StoreConfig::default()
        };
        if config.default_max_item_count == 0 {
            return Err(StoreError::InvalidConfig(
                "store.default_max_item_count must be positive".into(),
            ));
        }
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Typed handle to a container, created on first use.
    pub fn get(&self, name: &str) -> Result<Arc<InMemoryContainer>> {
        if let Some(handle) = self.cache.get(name) {
            return Ok(handle.clone());
        }

        if !self.config.auto_provision && !self.config.containers.contains_key(name) {
            return Err(StoreError::ContainerNotFound(name.to_string()));
        }

        let handle = Arc::new(InMemoryContainer::new(
            name,
            self.config.max_item_count_for(name),
        ));

        // Entry API keeps the first handle when two callers race.
        match self.cache.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => Ok(entry.get().clone()),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(handle.clone());
                tracing::info!(
                    container = %name,
                    max_item_count = self.config.max_item_count_for(name),
                    "Provisioned container"
                );
                Ok(handle)
            }
        }
    }

    /// Names of containers created so far.
    pub fn container_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.cache.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

#[async_trait]
impl ContainerResolver for ContainerManager {
    async fn get_container(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn Container>> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let handle: Arc<dyn Container> = self.get(name)?;
        Ok(handle)
    }
}
