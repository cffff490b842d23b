/*!
 * Device models.
 *
 * A [`DeviceModel`] describes one kind of device: its identity, the shape of
 * its configuration and properties, its actions and its periodic tasks. A
 * model is assembled once with [`DeviceModel::builder`] and is read-only
 * afterwards.
 */
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use serde::{Serialize, Serializer};

use crate::action::ActionDescriptor;
use crate::context::Context;
use crate::device::Device;
use crate::error::{DeviceError, Result};
use crate::schema::{Empty, PropertyDescriptor, PropertySet, Schema, SchemaError};

/// Callback run by an [`IntervalTask`]
pub type IntervalFn = Arc<dyn Fn(Arc<dyn Device>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Derives a foreign id from a device's raw configuration
pub type ForeignIdFn = Arc<dyn Fn(&[u8]) -> String + Send + Sync>;

/// One-time model initialization hook
pub type InitFn = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// A periodic task declared by a device model
///
/// The model only carries it; the engine's scheduler runs it. Periods are
/// whole seconds.
#[derive(Clone, Serialize)]
pub struct IntervalTask {
    name: String,
    #[serde(rename = "interval", serialize_with = "serialize_secs")]
    period: Duration,
    #[serde(rename = "desc")]
    description: String,
    #[serde(skip)]
    callback: IntervalFn,
}

fn serialize_secs<S: Serializer>(period: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(period.as_secs())
}

impl IntervalTask {
    /// Create a task running `callback` every `period`
    pub fn new<F, Fut>(name: &str, period: Duration, description: &str, callback: F) -> Self
    where
        F: Fn(Arc<dyn Device>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.to_string(),
            period,
            description: description.to_string(),
            callback: Arc::new(move |device| -> BoxFuture<'static, anyhow::Result<()>> {
                Box::pin(callback(device))
            }),
        }
    }

    /// The task name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The period
    pub fn period(&self) -> Duration {
        self.period
    }

    /// The description
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Run the task once against `device`
    pub async fn run(&self, device: Arc<dyn Device>) -> anyhow::Result<()> {
        (self.callback)(device).await
    }
}

impl fmt::Debug for IntervalTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntervalTask")
            .field("name", &self.name)
            .field("period", &self.period)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Static description of a kind of device
#[derive(Clone, Serialize)]
pub struct DeviceModel {
    name: String,
    variable: String,
    brand: String,
    model: String,
    #[serde(rename = "type")]
    device_type: String,
    #[serde(rename = "desc")]
    description: String,
    config: PropertySet,
    properties: PropertySet,
    actions: Vec<ActionDescriptor>,
    intervals: Vec<IntervalTask>,
    #[serde(skip)]
    foreign_id: Option<ForeignIdFn>,
    #[serde(skip)]
    init: Option<InitFn>,
}

impl DeviceModel {
    /// Start building a model registered under `model`
    pub fn builder(model: &str) -> DeviceModelBuilder {
        DeviceModelBuilder::new(model)
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Variable name drivers use for instances
    pub fn variable(&self) -> &str {
        &self.variable
    }

    /// Brand
    pub fn brand(&self) -> &str {
        &self.brand
    }

    /// The registry key
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Device type
    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    /// Description
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Configuration schema
    pub fn config(&self) -> &PropertySet {
        &self.config
    }

    /// Properties schema
    pub fn properties(&self) -> &PropertySet {
        &self.properties
    }

    /// Every action, in declaration order
    pub fn actions(&self) -> &[ActionDescriptor] {
        &self.actions
    }

    /// Every periodic task, in declaration order
    pub fn intervals(&self) -> &[IntervalTask] {
        &self.intervals
    }

    /// Look up an action by name
    pub fn get_action(&self, name: &str) -> Option<&ActionDescriptor> {
        self.actions.iter().find(|a| a.name() == name)
    }

    /// Look up a property by name
    pub fn get_prop(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.get(name)
    }

    /// Decode `raw` into a fresh config, validate it and return its
    /// canonical encoding
    pub fn check_config(&self, raw: &[u8]) -> Result<Bytes> {
        Ok(Bytes::from(self.config.canonicalize(raw)?))
    }

    /// The foreign id derived from `config`, when the model declares a hook
    pub fn foreign_id(&self, config: &[u8]) -> Option<String> {
        self.foreign_id.as_ref().map(|f| f(config))
    }

    /// Run the init hook, if any
    pub fn init(&self) -> anyhow::Result<()> {
        match &self.init {
            Some(init) => init(),
            None => Ok(()),
        }
    }

    /// Whether the model declares an init hook
    pub fn has_init(&self) -> bool {
        self.init.is_some()
    }
}

impl fmt::Debug for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceModel")
            .field("model", &self.model)
            .field("name", &self.name)
            .field("brand", &self.brand)
            .field("device_type", &self.device_type)
            .field("config", &self.config)
            .field("properties", &self.properties)
            .field("actions", &self.actions)
            .field("intervals", &self.intervals)
            .finish_non_exhaustive()
    }
}

/// Builder for [`DeviceModel`]
///
/// The first failing step is remembered and reported by
/// [`build`](Self::build).
pub struct DeviceModelBuilder {
    model: String,
    name: String,
    variable: String,
    brand: String,
    device_type: String,
    description: String,
    config: Option<PropertySet>,
    properties: Option<PropertySet>,
    actions: Vec<ActionDescriptor>,
    intervals: Vec<IntervalTask>,
    foreign_id: Option<ForeignIdFn>,
    init: Option<InitFn>,
    error: Option<DeviceError>,
}

impl DeviceModelBuilder {
    fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            name: String::new(),
            variable: String::new(),
            brand: String::new(),
            device_type: String::new(),
            description: String::new(),
            config: None,
            properties: None,
            actions: Vec::new(),
            intervals: Vec::new(),
            foreign_id: None,
            init: None,
            error: None,
        }
    }

    fn fail(&mut self, err: DeviceError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn schema<S: Schema>(&mut self, part: &str) -> Option<PropertySet> {
        match PropertySet::of::<S>() {
            Ok(set) => Some(set),
            Err(e) => {
                let err = schema_config(&self.model, part, e);
                self.fail(err);
                None
            }
        }
    }

    /// Display name
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Variable name
    pub fn variable(mut self, variable: &str) -> Self {
        self.variable = variable.to_string();
        self
    }

    /// Brand
    pub fn brand(mut self, brand: &str) -> Self {
        self.brand = brand.to_string();
        self
    }

    /// Device type
    pub fn device_type(mut self, device_type: &str) -> Self {
        self.device_type = device_type.to_string();
        self
    }

    /// Description
    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Configuration struct
    pub fn config<C: Schema>(mut self) -> Self {
        self.config = self.schema::<C>("config");
        self
    }

    /// Properties struct
    pub fn properties<P: Schema>(mut self) -> Self {
        self.properties = self.schema::<P>("properties");
        self
    }

    /// Add an action built from a typed handler
    pub fn action<A, R, F>(mut self, name: &str, desc: &str, handler: F) -> Self
    where
        A: Schema,
        R: Schema,
        F: for<'a> Fn(&'a Context, &'a dyn Device, &'a A, &'a mut R) -> BoxFuture<'a, anyhow::Result<()>>
            + Send
            + Sync
            + 'static,
    {
        match ActionDescriptor::new(name, desc, handler) {
            Ok(action) => self.actions.push(action),
            Err(e) => self.fail(e),
        }
        self
    }

    /// Add an already-built action
    pub fn with_action(mut self, action: ActionDescriptor) -> Self {
        self.actions.push(action);
        self
    }

    /// Add a periodic task
    pub fn interval(mut self, task: IntervalTask) -> Self {
        self.intervals.push(task);
        self
    }

    /// Foreign id hook
    pub fn foreign_id<F>(mut self, f: F) -> Self
    where
        F: Fn(&[u8]) -> String + Send + Sync + 'static,
    {
        self.foreign_id = Some(Arc::new(f));
        self
    }

    /// Init hook
    pub fn init<F>(mut self, f: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.init = Some(Arc::new(f));
        self
    }

    /// Check the declarations and build the model
    pub fn build(mut self) -> Result<DeviceModel> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        if self.model.trim().is_empty() {
            return Err(DeviceError::configuration("device model key must not be empty"));
        }
        for (i, action) in self.actions.iter().enumerate() {
            if self.actions[..i].iter().any(|a| a.name() == action.name()) {
                return Err(DeviceError::Configuration(format!(
                    "model '{}': action '{}' declared twice",
                    self.model,
                    action.name()
                )));
            }
        }
        for (i, task) in self.intervals.iter().enumerate() {
            if self.intervals[..i].iter().any(|t| t.name() == task.name()) {
                return Err(DeviceError::Configuration(format!(
                    "model '{}': interval '{}' declared twice",
                    self.model,
                    task.name()
                )));
            }
            if task.period().is_zero() {
                return Err(DeviceError::Configuration(format!(
                    "model '{}': interval '{}' has a zero period",
                    self.model,
                    task.name()
                )));
            }
            // Periods are published in whole seconds
            if task.period().subsec_nanos() != 0 {
                return Err(DeviceError::Configuration(format!(
                    "model '{}': interval '{}' period {:?} is not a whole number of seconds",
                    self.model,
                    task.name(),
                    task.period()
                )));
            }
        }

        let config = match self.config {
            Some(config) => config,
            None => empty_schema(&self.model, "config")?,
        };
        let properties = match self.properties {
            Some(properties) => properties,
            None => empty_schema(&self.model, "properties")?,
        };

        Ok(DeviceModel {
            name: self.name,
            variable: self.variable,
            brand: self.brand,
            model: self.model,
            device_type: self.device_type,
            description: self.description,
            config,
            properties,
            actions: self.actions,
            intervals: self.intervals,
            foreign_id: self.foreign_id,
            init: self.init,
        })
    }
}

fn empty_schema(model: &str, part: &str) -> Result<PropertySet> {
    PropertySet::of::<Empty>().map_err(|e| schema_config(model, part, e))
}

fn schema_config(model: &str, part: &str, err: SchemaError) -> DeviceError {
    DeviceError::Configuration(format!("model '{}' {}: {}", model, part, err))
}
