//! Model name → adapter lookup.

use std::collections::HashMap;
use std::sync::Arc;

use hs_types::{ConfigError, HsResult, Model};
use tracing::debug;

use crate::adapter::{OptimizerAdapter, RandomSearch};

/// Adapters available to workers, keyed by model.
///
/// Only `RAND` ships built in; surrogate-model minimizers (GP, RF, GBRT) are
/// registered by the embedding application.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Model, Arc<dyn OptimizerAdapter>>,
}

impl AdapterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Model::Rand, Arc::new(RandomSearch::new()));
        registry
    }

    /// Register `adapter` for `model`, returning the adapter it replaces.
    pub fn register(
        &mut self,
        model: Model,
        adapter: Arc<dyn OptimizerAdapter>,
    ) -> Option<Arc<dyn OptimizerAdapter>> {
        debug!(model = %model, adapter = adapter.name(), "registering optimizer adapter");
        self.adapters.insert(model, adapter)
    }

    pub fn get(&self, model: Model) -> HsResult<Arc<dyn OptimizerAdapter>> {
        self.adapters.get(&model).cloned().ok_or_else(|| {
            ConfigError::UnknownModel {
                model: model.to_string(),
            }
            .into()
        })
    }

    pub fn contains(&self, model: Model) -> bool {
        self.adapters.contains_key(&model)
    }

    /// Registered models, sorted.
    pub fn models(&self) -> Vec<Model> {
        let mut models: Vec<Model> = self.adapters.keys().copied().collect();
        models.sort();
        models
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("models", &self.models())
            .finish()
    }
}
