use std::sync::Arc;

use crate::connection::config::StoreConfig;
use crate::connection::ConnectionFactory;
use crate::index::DescriptorRegistry;
use crate::session::DocumentSession;

/// Entry point to the engine: owns the descriptor registry, the connection
/// factory, and the configuration, and opens unit-of-work sessions.
///
/// The store is cheap to share; sessions are not.
///
/// # Examples
///
/// ```
/// use vellumdb::{DescriptorRegistry, DocumentStore, MemoryBackend};
///
/// # tokio_test::block_on(async {
/// let store = DocumentStore::new(MemoryBackend::new(), DescriptorRegistry::new());
///
/// let session = store.open_session();
/// session.close().await?;
/// # Ok::<(), vellumdb::DbError>(())
/// # }).unwrap();
/// ```
#[derive(Clone)]
pub struct DocumentStore {
    factory: Arc<dyn ConnectionFactory>,
    registry: Arc<DescriptorRegistry>,
    config: StoreConfig,
}

impl DocumentStore {
    pub fn new(factory: impl ConnectionFactory + 'static, registry: DescriptorRegistry) -> Self {
        Self::with_config(factory, registry, StoreConfig::default())
    }

    pub fn with_config(
        factory: impl ConnectionFactory + 'static,
        registry: DescriptorRegistry,
        config: StoreConfig,
    ) -> Self {
        Self {
            factory: Arc::new(factory),
            registry: Arc::new(registry),
            config,
        }
    }

    /// Opens a new unit-of-work session at the configured isolation level.
    pub fn open_session(&self) -> DocumentSession {
        DocumentSession::new(
            self.factory.clone(),
            self.registry.clone(),
            self.config.isolation_level,
        )
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }
}
