//! In-memory engine registry

use crate::engine::Engine;
use crate::error::{RegistryError, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use wfsync_types::WorkflowId;

/// A registered engine together with the workflow it runs
#[derive(Clone)]
pub struct EngineEntry {
    pub workflow_id: WorkflowId,
    pub engine: Arc<dyn Engine>,
}

impl std::fmt::Debug for EngineEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineEntry")
            .field("workflow_id", &self.workflow_id)
            .field("engine", &self.engine.name())
            .finish()
    }
}

/// Concurrent directory of running engines keyed by workflow ID.
///
/// At most one engine is registered per ID: [`add`](Self::add) refuses to
/// overwrite. Multi-entry reads return copies so callers may iterate while
/// other tasks mutate the registry.
#[derive(Default)]
pub struct EngineRegistry {
    engines: RwLock<HashMap<WorkflowId, Arc<dyn Engine>>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an engine, failing with `AlreadyExists` if the ID is taken.
    pub fn add(&self, workflow_id: WorkflowId, engine: Arc<dyn Engine>) -> Result<()> {
        let mut engines = self.engines.write().map_err(|_| RegistryError::Lock)?;
        if engines.contains_key(&workflow_id) {
            return Err(RegistryError::AlreadyExists(workflow_id));
        }
        engines.insert(workflow_id, engine);
        Ok(())
    }

    pub fn get(&self, workflow_id: &WorkflowId) -> Result<Option<Arc<dyn Engine>>> {
        let engines = self.engines.read().map_err(|_| RegistryError::Lock)?;
        Ok(engines.get(workflow_id).cloned())
    }

    pub fn contains(&self, workflow_id: &WorkflowId) -> Result<bool> {
        let engines = self.engines.read().map_err(|_| RegistryError::Lock)?;
        Ok(engines.contains_key(workflow_id))
    }

    /// Remove and return the engine, failing with `NotFound` if absent.
    pub fn pop(&self, workflow_id: &WorkflowId) -> Result<Arc<dyn Engine>> {
        let mut engines = self.engines.write().map_err(|_| RegistryError::Lock)?;
        engines
            .remove(workflow_id)
            .ok_or(RegistryError::NotFound(*workflow_id))
    }

    /// Snapshot of every registered engine.
    pub fn get_all(&self) -> Result<Vec<EngineEntry>> {
        let engines = self.engines.read().map_err(|_| RegistryError::Lock)?;
        Ok(engines
            .iter()
            .map(|(id, engine)| EngineEntry {
                workflow_id: *id,
                engine: engine.clone(),
            })
            .collect())
    }

    /// Remove every engine, returning what was registered.
    pub fn pop_all(&self) -> Result<Vec<EngineEntry>> {
        let mut engines = self.engines.write().map_err(|_| RegistryError::Lock)?;
        Ok(std::mem::take(&mut *engines)
            .into_iter()
            .map(|(workflow_id, engine)| EngineEntry {
                workflow_id,
                engine,
            })
            .collect())
    }

    pub fn len(&self) -> Result<usize> {
        let engines = self.engines.read().map_err(|_| RegistryError::Lock)?;
        Ok(engines.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
