/*!
 * Base device implementation.
 *
 * [`BaseDevice`] is a complete [`Device`] any driver can instantiate for a
 * model: it keeps property values in memory, stages writes, and commits them
 * as a JSON snapshot key, a time-series point and an optional keep-alive key.
 */
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value as Json};
use tracing::{debug, warn};

use tmios_core::config::DevicesConfig;

use crate::context::Context;
use crate::device::{CommitOptions, Device, Pom, SetValOptions};
use crate::dispatch;
use crate::error::{DeviceError, Result};
use crate::model::DeviceModel;
use crate::schema::{PropValue, SchemaError};
use crate::storage::Storage;

/// Per-device settings, usually derived from [`DevicesConfig`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceOptions {
    /// Prefix of every storage key the device writes
    pub key_prefix: String,
    /// Expiry of the keep-alive key
    pub keep_alive_ttl: Duration,
    /// Debug mode flag reported by the device
    pub debug_mode: bool,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self::from(&DevicesConfig::default())
    }
}

impl From<&DevicesConfig> for DeviceOptions {
    fn from(config: &DevicesConfig) -> Self {
        Self {
            key_prefix: config.key_prefix.clone(),
            keep_alive_ttl: Duration::from_secs(config.keep_alive_ttl_secs),
            debug_mode: config.debug_mode,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Staged {
    options: SetValOptions,
    seq: u64,
}

#[derive(Debug, Default)]
struct PropState {
    values: HashMap<String, PropValue>,
    pending: HashMap<String, Staged>,
    seq: u64,
}

/// What one commit writes
#[derive(Debug, Default)]
struct Batch {
    snapshot: Option<Map<String, Json>>,
    fields: Map<String, Json>,
    staged: Vec<(String, Staged)>,
}

/// Base implementation of [`Device`]
#[derive(Debug)]
pub struct BaseDevice {
    model: Arc<DeviceModel>,
    pom: Pom,
    config: Bytes,
    storage: Arc<dyn Storage>,
    tags: HashMap<String, String>,
    options: DeviceOptions,
    state: RwLock<PropState>,
}

impl BaseDevice {
    /// Create a device of `model` installed at `pom`
    ///
    /// `raw_config` is checked against the model's config schema and stored
    /// in canonical form. Every property starts at its default value.
    pub fn new(model: Arc<DeviceModel>, pom: Pom, raw_config: &[u8], storage: Arc<dyn Storage>) -> Result<Self> {
        let config = model.check_config(raw_config)?;
        let values = model
            .properties()
            .iter()
            .map(|p| (p.name().to_string(), p.zero()))
            .collect();

        Ok(Self {
            model,
            pom,
            config,
            storage,
            tags: HashMap::new(),
            options: DeviceOptions::default(),
            state: RwLock::new(PropState {
                values,
                ..PropState::default()
            }),
        })
    }

    /// Labels for every written point
    pub fn with_tags(mut self, tags: HashMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    /// Override the device options
    pub fn with_options(mut self, options: DeviceOptions) -> Self {
        self.options = options;
        self
    }

    /// The shared model
    pub fn model(&self) -> Arc<DeviceModel> {
        self.model.clone()
    }

    /// The foreign id derived from this device's configuration
    pub fn foreign_id(&self) -> Option<String> {
        self.model.foreign_id(&self.config)
    }

    /// Key holding the JSON snapshot of every property
    pub fn snapshot_key(&self) -> String {
        format!("{}:device:{}:props", self.options.key_prefix, self.pom.id)
    }

    /// Key refreshed on keep-alive commits
    pub fn keep_alive_key(&self) -> String {
        format!("{}:device:{}:alive", self.options.key_prefix, self.pom.id)
    }

    /// Names of properties staged since the last successful commit
    pub fn pending(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.read()?.pending.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, PropState>> {
        self.state.read().map_err(|_| DeviceError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, PropState>> {
        self.state.write().map_err(|_| DeviceError::LockPoisoned)
    }

    fn encode_all(&self, state: &PropState) -> Result<Map<String, Json>> {
        let mut out = Map::new();
        for prop in self.model.properties() {
            let value = state
                .values
                .get(prop.name())
                .ok_or_else(|| DeviceError::UnknownProperty(prop.name().to_string()))?;
            out.insert(prop.name().to_string(), prop.encode(&**value)?);
        }
        Ok(out)
    }

    fn batch(&self) -> Result<Batch> {
        let state = self.read()?;
        if state.pending.is_empty() {
            return Ok(Batch::default());
        }

        let snapshot = if state.pending.values().any(|s| s.options.write_redis) {
            Some(self.encode_all(&state)?)
        } else {
            None
        };

        let mut fields = Map::new();
        for (name, staged) in &state.pending {
            if !staged.options.write_influx {
                continue;
            }
            let prop = self
                .model
                .get_prop(name)
                .ok_or_else(|| DeviceError::UnknownProperty(name.clone()))?;
            if let Some(value) = state.values.get(name) {
                fields.insert(name.clone(), prop.encode(&**value)?);
            }
        }

        Ok(Batch {
            snapshot,
            fields,
            staged: state.pending.iter().map(|(n, s)| (n.clone(), *s)).collect(),
        })
    }

    async fn flush(&self, batch: &Batch, at: DateTime<Utc>, keep_alive: bool) -> Result<()> {
        if let Some(snapshot) = &batch.snapshot {
            let encoded = serde_json::to_string(snapshot).map_err(SchemaError::Encode)?;
            self.storage
                .set(&self.snapshot_key(), &encoded, Duration::ZERO)
                .await?;
        }
        if !batch.fields.is_empty() {
            self.storage
                .write_point(self.model.model(), &self.tags, &batch.fields, at)
                .await?;
        }
        if keep_alive {
            self.storage
                .set(&self.keep_alive_key(), &at.timestamp().to_string(), self.options.keep_alive_ttl)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Device for BaseDevice {
    fn meta(&self) -> &DeviceModel {
        &self.model
    }

    async fn action(&self, ctx: &Context, name: &str, args: &[u8]) -> Result<Bytes> {
        dispatch::action(ctx, self, name, args).await
    }

    fn raw_config(&self) -> &[u8] {
        &self.config
    }

    fn storage(&self) -> Arc<dyn Storage> {
        self.storage.clone()
    }

    fn tags(&self) -> HashMap<String, String> {
        self.tags.clone()
    }

    fn debug_mode(&self) -> bool {
        self.options.debug_mode
    }

    fn pom(&self) -> &Pom {
        &self.pom
    }

    fn get_val(&self, name: &str) -> Result<PropValue> {
        self.read()?
            .values
            .get(name)
            .cloned()
            .ok_or_else(|| DeviceError::UnknownProperty(name.to_string()))
    }

    fn prop_vals(&self) -> Result<Map<String, Json>> {
        let state = self.read()?;
        self.encode_all(&state)
    }

    fn set_val(&self, name: &str, value: PropValue, options: SetValOptions) -> Result<()> {
        let prop = self
            .model
            .get_prop(name)
            .ok_or_else(|| DeviceError::UnknownProperty(name.to_string()))?;
        prop.check(&*value)?;

        let mut state = self.write()?;
        state.seq += 1;
        let staged = Staged {
            options,
            seq: state.seq,
        };
        state.values.insert(name.to_string(), value);
        state.pending.insert(name.to_string(), staged);
        Ok(())
    }

    async fn commit(&self, options: CommitOptions) -> Result<()> {
        let batch = self.batch()?;
        if batch.staged.is_empty() && !options.keep_alive {
            return Ok(());
        }

        let at = options.update_at.unwrap_or_else(Utc::now);
        if let Err(e) = self.flush(&batch, at, options.keep_alive).await {
            warn!(
                model = self.model.model(),
                pom = %self.pom.id,
                error = %e,
                "Commit failed; staged values kept"
            );
            return Err(e);
        }

        // Values restaged while flushing stay pending
        let mut state = self.write()?;
        for (name, staged) in batch.staged {
            if state.pending.get(&name) == Some(&staged) {
                state.pending.remove(&name);
            }
        }
        debug!(
            model = self.model.model(),
            pom = %self.pom.id,
            remaining = state.pending.len(),
            "Committed device state"
        );
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use chrono::TimeZone;
    use tmios_core::types::Id;

    use super::*;
    use crate::device::DeviceExt;
    use crate::error::ErrorKind;
    use crate::storage::{MemoryStorage, StorageError};

    crate::schema! {
        #[derive(Debug, Clone, PartialEq)]
        struct ValveConfig {
            port: String => { validate: "required" },
            max_open: u8 as "maxOpen" => { validate: "lte=100" },
        }
    }

    crate::schema! {
        #[derive(Debug, Clone, PartialEq)]
        struct ValveProps {
            open: u8,
            flow: f64,
            label: String,
        }
    }

    fn valve_model() -> Arc<DeviceModel> {
        Arc::new(
            DeviceModel::builder("valve-2")
                .config::<ValveConfig>()
                .properties::<ValveProps>()
                .build()
                .unwrap(),
        )
    }

    fn valve(storage: Arc<dyn Storage>) -> BaseDevice {
        BaseDevice::new(
            valve_model(),
            Pom::new(Id::from_string("p1"), "Boiler room"),
            br#"{"port": "/dev/ttyS1", "maxOpen": 80}"#,
            storage,
        )
        .unwrap()
        .with_tags(HashMap::from([("site".to_string(), "north".to_string())]))
    }

    #[test]
    fn test_new_checks_config() {
        let err = BaseDevice::new(
            valve_model(),
            Pom::default(),
            br#"{"maxOpen": 120}"#,
            Arc::new(MemoryStorage::new()),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let device = valve(Arc::new(MemoryStorage::new()));
        let config: ValveConfig = device.get_config().unwrap();
        assert_eq!(config.port, "/dev/ttyS1");
        assert_eq!(config.max_open, 80);

        let err = device.get_config::<ValveProps>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_values_start_at_defaults() {
        let device = valve(Arc::new(MemoryStorage::new()));
        assert_eq!(device.get::<u8>("open").unwrap(), 0);
        assert_eq!(device.get_prop_vals::<ValveProps>().unwrap(), ValveProps::default());
        assert!(device.pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_val_stays_in_memory() {
        let storage = Arc::new(MemoryStorage::new());
        let device = valve(storage.clone());

        device.set("open", 40u8).unwrap();
        device
            .set_val("flow", Arc::new(2.5f64), SetValOptions::default().without_redis())
            .unwrap();

        assert_eq!(device.get::<u8>("open").unwrap(), 40);
        assert_eq!(device.pending().unwrap(), ["flow", "open"]);
        assert!(storage.is_empty().unwrap());
        assert!(storage.points().unwrap().is_empty());
    }

    #[test]
    fn test_set_val_rejects_bad_values() {
        let device = valve(Arc::new(MemoryStorage::new()));

        let err = device.set("open", 40u32).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);

        let err = device.set("pressure", 1.0f64).unwrap_err();
        assert!(matches!(err, DeviceError::UnknownProperty(ref name) if name == "pressure"));

        let err = device.get::<String>("open").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert!(device.pending().unwrap().is_empty());
    }

    #[test]
    fn test_set_vals_checks_everything_first() {
        let device = valve(Arc::new(MemoryStorage::new()));

        let mut values: HashMap<String, PropValue> = HashMap::new();
        values.insert("open".to_string(), Arc::new(10u8));
        values.insert("label".to_string(), Arc::new(7i32));
        let err = device.set_vals(values, SetValOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert_eq!(device.get::<u8>("open").unwrap(), 0);

        let mut values: HashMap<String, PropValue> = HashMap::new();
        values.insert("open".to_string(), Arc::new(10u8));
        values.insert("label".to_string(), Arc::new("main".to_string()));
        device.set_vals(values, SetValOptions::default()).unwrap();
        assert_eq!(device.get::<String>("label").unwrap(), "main");
        assert_eq!(device.pending().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_commit_writes_snapshot_point_and_keep_alive() {
        let storage = Arc::new(MemoryStorage::new());
        let device = valve(storage.clone());
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        device.set("open", 55u8).unwrap();
        device
            .set_val("flow", Arc::new(1.5f64), SetValOptions::default().without_influx())
            .unwrap();
        device
            .commit(CommitOptions::default().with_keep_alive().at(at))
            .await
            .unwrap();

        let snapshot: Json = serde_json::from_str(&storage.get("tmios:device:p1:props").await.unwrap()).unwrap();
        assert_eq!(snapshot, serde_json::json!({"open": 55, "flow": 1.5, "label": ""}));

        let points = storage.points().unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].measurement, "valve-2");
        assert_eq!(points[0].tags["site"], "north");
        assert_eq!(points[0].fields.len(), 1);
        assert_eq!(points[0].fields["open"], 55);
        assert_eq!(points[0].timestamp, at);

        assert_eq!(
            storage.get("tmios:device:p1:alive").await.unwrap(),
            at.timestamp().to_string()
        );
        assert!(device.pending().unwrap().is_empty());

        // Nothing staged: a plain commit writes nothing
        device.commit(CommitOptions::default()).await.unwrap();
        assert_eq!(storage.points().unwrap().len(), 1);
    }

    #[derive(Debug, Default)]
    struct FlakyStorage {
        inner: MemoryStorage,
        down: AtomicBool,
    }

    #[async_trait]
    impl Storage for FlakyStorage {
        async fn lrange(&self, key: &str, start: isize, end: isize) -> std::result::Result<Vec<String>, StorageError> {
            self.inner.lrange(key, start, end).await
        }

        async fn lpush(&self, key: &str, values: &[String]) -> std::result::Result<usize, StorageError> {
            self.inner.lpush(key, values).await
        }

        async fn rpop(&self, key: &str, count: usize) -> std::result::Result<Vec<String>, StorageError> {
            self.inner.rpop(key, count).await
        }

        async fn get(&self, key: &str) -> std::result::Result<String, StorageError> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str, expiration: Duration) -> std::result::Result<(), StorageError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(StorageError::backend("connection refused"));
            }
            self.inner.set(key, value, expiration).await
        }

        async fn write_point(
            &self,
            measurement: &str,
            tags: &HashMap<String, String>,
            fields: &Map<String, Json>,
            timestamp: DateTime<Utc>,
        ) -> std::result::Result<(), StorageError> {
            self.inner.write_point(measurement, tags, fields, timestamp).await
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_failed_commit_keeps_staged_values() {
        let storage = Arc::new(FlakyStorage::default());
        let device = valve(storage.clone());
        storage.down.store(true, Ordering::SeqCst);

        device.set("open", 20u8).unwrap();
        let err = device.commit(CommitOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert_eq!(device.pending().unwrap(), ["open"]);

        storage.down.store(false, Ordering::SeqCst);
        device.commit(CommitOptions::default()).await.unwrap();
        assert!(device.pending().unwrap().is_empty());
        assert!(storage.inner.get("tmios:device:p1:props").await.is_ok());
    }

    #[test]
    fn test_options_from_config() {
        let config = DevicesConfig {
            key_prefix: "plant".to_string(),
            keep_alive_ttl_secs: 30,
            debug_mode: true,
            ..DevicesConfig::default()
        };
        let device = valve(Arc::new(MemoryStorage::new())).with_options(DeviceOptions::from(&config));
        assert!(device.debug_mode());
        assert_eq!(device.snapshot_key(), "plant:device:p1:props");
        assert_eq!(device.keep_alive_key(), "plant:device:p1:alive");
        assert_eq!(device.foreign_id(), None);
    }
}
