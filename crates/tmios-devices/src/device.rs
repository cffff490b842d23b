/*!
 * Device trait and core device abstractions.
 *
 * Every driver implements [`Device`]. A device exposes its [`DeviceModel`],
 * accepts actions as raw JSON bytes, and keeps its property values in memory
 * until [`Device::commit`] pushes them to [`Storage`].
 */
use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use tmios_core::types::{Id, Metadata};

use crate::context::Context;
use crate::error::{DeviceError, Result};
use crate::model::DeviceModel;
use crate::schema::{PropValue, PropertySet, Schema, SchemaError};
use crate::storage::Storage;

/// Point of measurement: where a device is installed
///
/// Opaque to the registry; drivers use it to label what they store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pom {
    /// The point id
    pub id: Id,
    /// Human-readable name
    pub name: String,
    /// Additional labels
    #[serde(default)]
    pub metadata: Metadata,
}

impl Pom {
    /// Create a point of measurement
    pub fn new<S: Into<String>>(id: Id, name: S) -> Self {
        Self {
            id,
            name: name.into(),
            metadata: Metadata::new(),
        }
    }
}

/// Where a staged property value goes on the next commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetValOptions {
    /// Include the value in the key/value snapshot
    pub write_redis: bool,
    /// Include the value in the time-series point
    pub write_influx: bool,
}

impl Default for SetValOptions {
    fn default() -> Self {
        Self {
            write_redis: true,
            write_influx: true,
        }
    }
}

impl SetValOptions {
    /// Skip the key/value snapshot
    pub fn without_redis(mut self) -> Self {
        self.write_redis = false;
        self
    }

    /// Skip the time-series point
    pub fn without_influx(mut self) -> Self {
        self.write_influx = false;
        self
    }
}

/// Commit parameters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitOptions {
    /// Refresh the device's keep-alive key
    pub keep_alive: bool,
    /// Timestamp of the written point; now when unset
    pub update_at: Option<DateTime<Utc>>,
}

impl CommitOptions {
    /// Refresh the keep-alive key
    pub fn with_keep_alive(mut self) -> Self {
        self.keep_alive = true;
        self
    }

    /// Stamp the written point with `at`
    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.update_at = Some(at);
        self
    }
}

/// The core device trait
///
/// Implementations own their property values. `set_val` and `set_vals` only
/// touch memory; `commit` is the only method allowed to write to storage.
#[async_trait]
pub trait Device: Send + Sync + Debug {
    /// The device model this device is an instance of
    fn meta(&self) -> &DeviceModel;

    /// Invoke a named action with JSON arguments, returning JSON results
    ///
    /// Drivers normally forward to [`crate::dispatch::action`].
    async fn action(&self, ctx: &Context, name: &str, args: &[u8]) -> Result<Bytes>;

    /// The device's configuration, as canonical JSON bytes
    fn raw_config(&self) -> &[u8];

    /// Storage the device commits to
    fn storage(&self) -> Arc<dyn Storage>;

    /// Labels attached to every time-series point
    fn tags(&self) -> HashMap<String, String>;

    /// Whether the device runs in debug mode
    fn debug_mode(&self) -> bool;

    /// Where the device is installed
    fn pom(&self) -> &Pom;

    /// The in-memory value of a property
    fn get_val(&self, name: &str) -> Result<PropValue>;

    /// Every property value, JSON-encoded and keyed by property name
    fn prop_vals(&self) -> Result<Map<String, Json>>;

    /// Stage a property value in memory
    fn set_val(&self, name: &str, value: PropValue, options: SetValOptions) -> Result<()>;

    /// Stage several property values in memory
    ///
    /// Every value is checked before any is applied.
    fn set_vals(&self, values: HashMap<String, PropValue>, options: SetValOptions) -> Result<()> {
        for (name, value) in &values {
            let prop = self
                .meta()
                .get_prop(name)
                .ok_or_else(|| DeviceError::UnknownProperty(name.clone()))?;
            prop.check(&**value)?;
        }
        for (name, value) in values {
            self.set_val(&name, value, options)?;
        }
        Ok(())
    }

    /// Push staged values to storage
    async fn commit(&self, options: CommitOptions) -> Result<()>;

    /// The concrete device, for downcasting
    fn as_any(&self) -> &dyn Any;
}

/// Typed helpers available on every [`Device`]
pub trait DeviceExt: Device {
    /// Decode and validate the device configuration as `C`
    ///
    /// `C` must be the config struct the device model was built with.
    fn get_config<C: Schema>(&self) -> Result<C> {
        let schema = expect_origin::<C>(self.meta().config(), "config")?;
        Ok(schema.decode(self.raw_config())?)
    }

    /// Every property value, as the model's properties struct `P`
    fn get_prop_vals<P: Schema>(&self) -> Result<P> {
        expect_origin::<P>(self.meta().properties(), "properties")?;
        let values = self.prop_vals()?;
        Ok(serde_json::from_value(Json::Object(values)).map_err(SchemaError::Decode)?)
    }

    /// The value of one property as `T`
    fn get<T: Clone + 'static>(&self, name: &str) -> Result<T> {
        let value = self.get_val(name)?;
        match value.downcast_ref::<T>() {
            Some(v) => Ok(v.clone()),
            None => Err(SchemaError::TypeMismatch {
                property: name.to_string(),
                expected: std::any::type_name::<T>().to_string(),
            }
            .into()),
        }
    }

    /// Stage a typed value with the default options
    fn set<T: Send + Sync + 'static>(&self, name: &str, value: T) -> Result<()> {
        self.set_val(name, Arc::new(value), SetValOptions::default())
    }

    /// The concrete device, if it is a `D`
    fn downcast_device<D: Device + 'static>(&self) -> Option<&D> {
        self.as_any().downcast_ref::<D>()
    }
}

impl<D: Device + ?Sized> DeviceExt for D {}

fn expect_origin<'s, S: Schema>(schema: &'s PropertySet, what: &str) -> Result<&'s PropertySet> {
    if !schema.origin().is::<S>() {
        return Err(DeviceError::Configuration(format!(
            "{} schema is {}, not {}",
            what,
            schema.origin().type_name(),
            std::any::type_name::<S>()
        )));
    }
    Ok(schema)
}
