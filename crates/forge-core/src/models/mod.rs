//! Model catalog, selection and backends
//!
//! The catalog is static; the selector turns requirements into a
//! [`ResolvedModel`]; the [`BackendPool`] turns a resolved model plus
//! messages into a stream of [`BackendChunk`]s.

pub mod backend;
pub mod catalog;
pub mod selector;

pub use backend::{
    BackendChunk, BackendPool, ChatMessage, ChatRole, ChunkStream, ModelBackend, ModelCall,
    collect_chunks,
};
pub use catalog::{AliasTable, ModelCatalog, ModelCategory, ModelDescriptor, ModelType, Provider};
pub use selector::{ModelRequirements, ModelSelector, ResolvedModel, SelectionPath};
