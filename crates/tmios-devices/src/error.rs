/*!
 * Error types for the device registry and dispatcher.
 *
 * Every failure is reported as a [`DeviceError`]; [`DeviceError::kind`]
 * collapses it into the coarse [`ErrorKind`] an outer layer (an HTTP API, a
 * CLI) maps to its own responses.
 */
use thiserror::Error;

use tmios_core::error::Error as CoreError;

use crate::schema::SchemaError;
use crate::storage::StorageError;

/// Error type for device registry, model and dispatch operations
#[derive(Error, Debug)]
pub enum DeviceError {
    /// A schema could not be built, or a value did not fit a schema
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// A device model or action was declared inconsistently
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A device model with the same name is already registered
    #[error("Device model '{0}' registered twice")]
    DuplicateModel(String),

    /// No device model with this name is registered
    #[error("Device model '{0}' not found")]
    ModelNotFound(String),

    /// The device model has no action with this name
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    /// The device model declares no property with this name
    #[error("Unknown property: {0}")]
    UnknownProperty(String),

    /// The action handler failed; the handler's own error is kept as is
    #[error(transparent)]
    Handler(anyhow::Error),

    /// The storage backend failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A registry lock was poisoned by a panicking writer
    #[error("Registry lock poisoned")]
    LockPoisoned,

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

/// Result type for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Coarse classification of a [`DeviceError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Build-time misconfiguration of a schema, action or model
    Configuration,
    /// Registering a model name twice
    DuplicateModel,
    /// A model was looked up and is not registered
    NotFound,
    /// Malformed payload
    Decode,
    /// A value could not be serialized
    Encode,
    /// Payload decoded but broke a property's validation rules
    Validation,
    /// A value's runtime type differs from the declared property type
    TypeMismatch,
    /// Unknown action name
    InvalidAction,
    /// Unknown property name
    UnknownProperty,
    /// Error returned by an action handler
    Handler,
    /// Storage backend failure
    Storage,
    /// Anything else (poisoned locks, core failures)
    Internal,
}

impl DeviceError {
    /// Create a new configuration error
    pub fn configuration<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::Configuration(msg.as_ref().to_string())
    }

    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeviceError::Schema(e) => e.kind(),
            DeviceError::Configuration(_) => ErrorKind::Configuration,
            DeviceError::DuplicateModel(_) => ErrorKind::DuplicateModel,
            DeviceError::ModelNotFound(_) => ErrorKind::NotFound,
            DeviceError::InvalidAction(_) => ErrorKind::InvalidAction,
            DeviceError::UnknownProperty(_) => ErrorKind::UnknownProperty,
            DeviceError::Handler(_) => ErrorKind::Handler,
            DeviceError::Storage(_) => ErrorKind::Storage,
            DeviceError::LockPoisoned | DeviceError::Core(_) => ErrorKind::Internal,
        }
    }

    /// The handler's error, when the failure came from an action handler
    pub fn handler_error(&self) -> Option<&anyhow::Error> {
        match self {
            DeviceError::Handler(e) => Some(e),
            _ => None,
        }
    }
}
