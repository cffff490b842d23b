/*!
 * Error types for the tmios engine crate.
 */
use thiserror::Error;

/// Error type for tmios engine operations
#[derive(Error, Debug)]
pub enum Error {
    /// Scheduler error
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// A model's init hook failed
    #[error("Init hook of model '{model}' failed: {reason}")]
    Init {
        /// The model key
        model: String,
        /// The hook's error, rendered with its causes
        reason: String,
    },

    /// Device error
    #[error("Device error: {0}")]
    Device(#[from] tmios_devices::DeviceError),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] tmios_core::error::Error),
}

/// Result type for tmios engine operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a new scheduler error
    pub fn scheduler<S: AsRef<str>>(msg: S) -> Self {
        Error::Scheduler(msg.as_ref().to_string())
    }

    /// Create a new init error
    pub fn init<S: AsRef<str>>(model: S, err: &anyhow::Error) -> Self {
        Error::Init {
            model: model.as_ref().to_string(),
            reason: format!("{:#}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_error_keeps_context() {
        let err = anyhow::anyhow!("bus unavailable").context("opening /dev/ttyS0");
        let err = Error::init("thermo-v1", &err);
        assert_eq!(
            err.to_string(),
            "Init hook of model 'thermo-v1' failed: opening /dev/ttyS0: bus unavailable"
        );
    }

    #[test]
    fn test_from_device_error() {
        let err: Error = tmios_devices::DeviceError::ModelNotFound("x".into()).into();
        assert!(matches!(err, Error::Device(_)));
        assert_eq!(Error::scheduler("busy").to_string(), "Scheduler error: busy");
    }
}
