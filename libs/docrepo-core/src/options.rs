use serde::{Deserialize, Serialize};

/// Per-query request settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Scope the query to one partition.
    pub partition_key: Option<String>,
    /// Page size hint. `None` lets the store pick its default.
    pub max_item_count: Option<usize>,
}

impl QueryOptions {
    pub fn in_partition(partition_key: impl Into<String>) -> Self {
        Self {
            partition_key: Some(partition_key.into()),
            max_item_count: None,
        }
    }

    pub fn with_max_item_count(mut self, n: usize) -> Self {
        self.max_item_count = Some(n);
        self
    }
}

/// Per-item write settings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRequestOptions {
    /// Ask the store not to echo the written document back.
    pub exclude_response: bool,
}
