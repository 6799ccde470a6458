//! Core types shared by the document repository crates.
//!
//! Nothing in here performs I/O. The crate holds the composite key codec,
//! the document model, the query model used by every list operation,
//! the page type produced by the store and the audit record written after
//! each mutation.

pub mod audit;
pub mod document;
pub mod keys;
pub mod odata;
pub mod options;
pub mod page;
pub mod patch;
pub mod query;

pub use audit::{AuditRecord, CrudEventType};
pub use document::{Document, DocumentMeta, IdNamePair, IdPartitionPair};
pub use keys::{join_id, split_id, EntityKey, KEY_DELIMITER};
pub use odata::{ODataError, ODataOptions, ODataTranslator};
pub use options::{ItemRequestOptions, QueryOptions};
pub use page::Page;
pub use patch::PatchOperation;
pub use query::{
    CompareOperator, Expr, OrderKey, Projection, Query, QueryDefinition, QuerySpec, SortDir,
};
