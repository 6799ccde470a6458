use serde::{Deserialize, Serialize};

/// One page of results and the opaque token for the next one.
///
/// `continuation == None` is the only end-of-sequence signal. A page may be
/// empty while a continuation is still present.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub continuation: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, continuation: Option<String>) -> Self {
        Self {
            items,
            continuation,
        }
    }

    /// Final page of a sequence.
    pub fn last(items: Vec<T>) -> Self {
        Self::new(items, None)
    }

    pub fn empty() -> Self {
        Self::last(Vec::new())
    }

    pub fn has_more(&self) -> bool {
        self.continuation.is_some()
    }

    /// Map items while preserving the continuation token.
    pub fn map_items<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            continuation: self.continuation,
        }
    }

    pub fn into_parts(self) -> (Vec<T>, Option<String>) {
        (self.items, self.continuation)
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self::empty()
    }
}
