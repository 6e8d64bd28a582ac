// ============================================================================
// VellumDB Library
// ============================================================================

pub mod connection;
pub mod core;
pub mod index;
pub mod query;
pub mod session;
mod store;

// Re-export main types for convenience
pub use crate::connection::config::StoreConfig;
pub use crate::connection::memory::{MemoryBackend, MemoryConnection};
pub use crate::connection::{
    Connection, ConnectionFactory, DocumentStorage, IndexRowRecord, IsolationLevel,
};
pub use crate::core::{simplified_type_name, DbError, Document, Persist, Result, Tracked};
pub use crate::index::{DescriptorRegistry, IndexCommand, IndexDescriptor, IndexModel};
pub use crate::query::IndexQuery;
pub use crate::session::DocumentSession;
pub use crate::store::DocumentStore;

// Re-export derive macros
pub use vellumdb_derive::{IndexModel, Persist};

/// Common imports for application code.
pub mod prelude {
    pub use crate::{
        DbError, DescriptorRegistry, DocumentSession, DocumentStore, IndexDescriptor, IndexModel,
        IndexQuery, IsolationLevel, MemoryBackend, Persist, Result, StoreConfig, Tracked,
    };
}
