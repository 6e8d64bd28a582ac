use super::IsolationLevel;

/// Store-wide session configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Name used in log events; purely diagnostic.
    pub name: String,

    /// Isolation level new sessions open their transaction at.
    pub isolation_level: IsolationLevel,
}

impl StoreConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            isolation_level: IsolationLevel::default(),
        }
    }

    /// Set the default isolation level for new sessions
    pub fn isolation_level(mut self, isolation: IsolationLevel) -> Self {
        self.isolation_level = isolation;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new("vellumdb")
    }
}
