/*!
 * Device model registry for tmios.
 *
 * The registry maps model keys to registered [`DeviceModel`]s and holds a
 * free-form environment store shared by drivers. Both live behind a single
 * reader/writer lock; registration and environment writes take it
 * exclusively, every lookup shares it.
 */
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;
use tracing::{debug, info};

use tmios_core::config::DevicesConfig;
use tmios_core::types::Value;

use crate::error::{DeviceError, Result};
use crate::model::DeviceModel;

/// Event types for the device registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A device model was registered
    ModelRegistered(String),
    /// An environment entry was written
    EnvChanged(String),
}

#[derive(Debug, Default)]
struct RegistryState {
    models: HashMap<String, Arc<DeviceModel>>,
    env: HashMap<String, Value>,
}

/// Device model registry
#[derive(Debug)]
pub struct DeviceRegistry {
    /// Registered models and the environment store
    state: RwLock<RegistryState>,
    /// Event sender for registry events
    event_sender: broadcast::Sender<RegistryEvent>,
}

impl DeviceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        let (event_sender, _) = broadcast::channel(100);
        Self {
            state: RwLock::new(RegistryState::default()),
            event_sender,
        }
    }

    /// Create a registry whose environment is seeded from configuration
    pub fn from_config(config: &DevicesConfig) -> Self {
        let registry = Self::new();
        if let Ok(mut state) = registry.state.write() {
            state.env = config.env.clone();
        }
        registry
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, RegistryState>> {
        self.state.read().map_err(|_| DeviceError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, RegistryState>> {
        self.state.write().map_err(|_| DeviceError::LockPoisoned)
    }

    /// Register a device model under its model key
    ///
    /// A second model with the same key is rejected and the first one kept.
    pub fn register(&self, model: DeviceModel) -> Result<Arc<DeviceModel>> {
        let key = model.model().to_string();
        let model = Arc::new(model);

        {
            let mut state = self.write()?;
            if state.models.contains_key(&key) {
                return Err(DeviceError::DuplicateModel(key));
            }
            state.models.insert(key.clone(), model.clone());
        }

        let _ = self.event_sender.send(RegistryEvent::ModelRegistered(key.clone()));
        info!(
            model = %key,
            actions = model.actions().len(),
            intervals = model.intervals().len(),
            "Registered device model"
        );
        Ok(model)
    }

    /// Get a registered model by key
    pub fn get_model(&self, name: &str) -> Result<Arc<DeviceModel>> {
        self.read()?
            .models
            .get(name)
            .cloned()
            .ok_or_else(|| DeviceError::ModelNotFound(name.to_string()))
    }

    /// Every registered model, ordered by key
    pub fn list_models(&self) -> Result<Vec<Arc<DeviceModel>>> {
        let state = self.read()?;
        let mut models: Vec<_> = state.models.values().cloned().collect();
        models.sort_by(|a, b| a.model().cmp(b.model()));
        Ok(models)
    }

    /// Check if a model is registered
    pub fn has_model(&self, name: &str) -> Result<bool> {
        Ok(self.read()?.models.contains_key(name))
    }

    /// Count registered models
    pub fn count(&self) -> Result<usize> {
        Ok(self.read()?.models.len())
    }

    /// Write an environment entry
    pub fn set_env<V: Into<Value>>(&self, name: &str, value: V) -> Result<()> {
        self.write()?.env.insert(name.to_string(), value.into());
        let _ = self.event_sender.send(RegistryEvent::EnvChanged(name.to_string()));
        debug!(name, "Registry environment updated");
        Ok(())
    }

    /// Read an environment entry
    pub fn get_env(&self, name: &str) -> Result<Option<Value>> {
        Ok(self.read()?.env.get(name).cloned())
    }

    /// Copy of the whole environment store
    pub fn env_snapshot(&self) -> Result<HashMap<String, Value>> {
        Ok(self.read()?.env.clone())
    }

    /// Subscribe to registry events
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_sender.subscribe()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A shared device registry that can be cloned
#[derive(Debug, Clone, Default)]
pub struct SharedDeviceRegistry(Arc<DeviceRegistry>);

impl SharedDeviceRegistry {
    /// Create a new shared device registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing registry
    pub fn from_registry(registry: DeviceRegistry) -> Self {
        Self(Arc::new(registry))
    }

    /// Get a reference to the device registry
    pub fn registry(&self) -> &DeviceRegistry {
        &self.0
    }
}

impl AsRef<DeviceRegistry> for SharedDeviceRegistry {
    fn as_ref(&self) -> &DeviceRegistry {
        self.registry()
    }
}

impl std::ops::Deref for SharedDeviceRegistry {
    type Target = DeviceRegistry;

    fn deref(&self) -> &DeviceRegistry {
        &self.0
    }
}
