/*!
 * tmios Core
 *
 * This crate provides the ambient pieces shared by the tmios crates:
 * configuration, logging, identifiers and dynamic values, and async helpers.
 */

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod prelude;
pub mod types;
pub mod utils;

/// Re-export of dependencies that are part of the public API
pub mod deps {
    pub use serde;
    pub use serde_json;
    pub use tokio;
    pub use tracing;
    pub use uuid;
}

/// tmios core crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library initialization
pub fn init() -> Result<(), error::Error> {
    logging::init()?;
    tracing::info!("tmios core {} initialized", VERSION);
    Ok(())
}

/// Library initialization driven by the loaded configuration
pub fn init_with_config(config: &config::Config) -> Result<(), error::Error> {
    logging::init_with_config(&config.logging)?;
    tracing::debug!("Effective configuration:\n{}", config.to_toml_string()?);
    tracing::info!(
        app = %config.general.app_name,
        environment = %config.general.environment,
        "tmios core {} initialized",
        VERSION
    );
    Ok(())
}
