use std::sync::Arc;

use super::registry::Registry;

/// Discards every measurement. Instrument names are still reserved, so a duplicate
/// registration fails the same way it would with export enabled.
#[derive(Debug, Clone)]
pub struct NoopProvider {
    registry: Arc<Registry>,
}

impl Default for NoopProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl NoopProvider {
    /// Create a provider that records nothing. This cannot fail.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry::new(false)),
        }
    }

    pub(crate) fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub(crate) fn shutdown(&self) {
        self.registry.clear_callbacks();
    }
}
