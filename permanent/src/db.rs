use std::sync::Arc;

use crate::backend::Backend;
use crate::model::Registry;
use crate::signals::Signals;

/// Backend, model registry and restore signals shared by every query set.
#[derive(Clone)]
pub struct Database {
    backend: Arc<dyn Backend>,
    registry: Arc<Registry>,
    signals: Arc<Signals>,
}

impl Database {
    pub fn new<B: Backend + 'static>(backend: B) -> Database {
        Database::from_arc(Arc::new(backend))
    }

    pub fn from_arc(backend: Arc<dyn Backend>) -> Database {
        Database {
            backend,
            registry: Arc::new(Registry::default()),
            signals: Arc::new(Signals::default()),
        }
    }

    pub fn with_registry(mut self, registry: Registry) -> Database {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_signals(mut self, signals: Arc<Signals>) -> Database {
        self.signals = signals;
        self
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn signals(&self) -> &Signals {
        &self.signals
    }
}
