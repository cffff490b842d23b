/*!
 * tmios Devices
 *
 * This crate provides the device capability registry and the schema-driven
 * action dispatcher. Drivers describe their configuration, properties and
 * actions as typed schemas; callers invoke actions by name with raw JSON.
 */

#![warn(missing_docs)]

// Re-export core types
pub use tmios_core::prelude;

pub mod action;
pub mod base;
pub mod context;
pub mod device;
pub mod devices;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod registry;
pub mod schema;
pub mod storage;
pub mod validate;

pub use action::{build_action_descriptor, ActionDescriptor};
pub use base::{BaseDevice, DeviceOptions};
pub use context::{Context, ContextError};
pub use device::{CommitOptions, Device, DeviceExt, Pom, SetValOptions};
pub use dispatch::action;
pub use error::{DeviceError, ErrorKind, Result};
pub use model::{DeviceModel, DeviceModelBuilder, IntervalTask};
pub use registry::{DeviceRegistry, RegistryEvent, SharedDeviceRegistry};
pub use schema::{build_property_set, cast, PropValue, PropertyDescriptor, PropertySet, Schema, SchemaError};
pub use storage::{MemoryStorage, Storage, StorageError};

/// tmios devices crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the device system
pub fn init() -> std::result::Result<(), tmios_core::error::Error> {
    tracing::info!("tmios devices {} initialized", VERSION);
    Ok(())
}
