/*!
 * Prelude module for tmios core.
 *
 * This module re-exports commonly used types and functions from the core crate
 * to make them easier to import.
 */

pub use crate::error::{Error, Result};

pub use crate::types::{Id, Metadata, Value};

pub use crate::config::{Config, ConfigBuilder, DevicesConfig, SchedulerConfig};

pub use crate::utils::{duration_to_millis, millis_to_bound, with_timeout};

pub use tracing::{debug, error, info, trace, warn};

pub use crate::init;
