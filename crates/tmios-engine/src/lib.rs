/*!
 * tmios Engine
 *
 * This crate drives registered device models at runtime: it runs model init
 * hooks once at startup and schedules the periodic interval tasks declared by
 * each model for every live device.
 */

#![warn(missing_docs)]

// Re-export core types
pub use tmios_core::prelude;

pub mod bootstrap;
pub mod error;
pub mod scheduler;

pub use bootstrap::initialize_models;
pub use error::{Error, Result};
pub use scheduler::IntervalScheduler;

/// tmios engine crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the engine
pub fn init() -> Result<()> {
    tracing::info!("tmios engine {} initialized", VERSION);
    Ok(())
}
