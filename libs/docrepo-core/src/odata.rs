use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::query::QueryDefinition;

/// Raw OData system query options as received from a caller.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ODataOptions {
    #[serde(rename = "$filter", default)]
    pub filter: Option<String>,
    #[serde(rename = "$orderby", default)]
    pub order_by: Option<String>,
    #[serde(rename = "$select", default)]
    pub select: Option<String>,
    #[serde(rename = "$top", default)]
    pub top: Option<usize>,
    #[serde(rename = "$skip", default)]
    pub skip: Option<usize>,
}

#[derive(Error, Debug)]
pub enum ODataError {
    #[error("invalid $filter: {0}")]
    InvalidFilter(String),
    #[error("invalid $orderby: {0}")]
    InvalidOrderBy(String),
    #[error("unsupported OData option: {0}")]
    Unsupported(String),
}

/// Turns OData options plus a source query into store query text.
///
/// Implemented by the hosting application.
pub trait ODataTranslator: Send + Sync {
    fn translate(
        &self,
        options: &ODataOptions,
        source: QueryDefinition,
    ) -> Result<QueryDefinition, ODataError>;
}
