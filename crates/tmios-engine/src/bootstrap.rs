/*!
 * Model bootstrap.
 *
 * Runs the init hook of every registered model once, in model key order,
 * before any device is scheduled.
 */
use tracing::{debug, info};

use tmios_devices::DeviceRegistry;

use crate::error::{Error, Result};

/// Run the init hooks of every registered model
///
/// Stops at the first failing hook. Returns the number of hooks run.
pub fn initialize_models(registry: &DeviceRegistry) -> Result<usize> {
    let mut ran = 0;
    for model in registry.list_models()? {
        if !model.has_init() {
            continue;
        }
        debug!(model = model.model(), "Running model init hook");
        model.init().map_err(|e| Error::init(model.model(), &e))?;
        ran += 1;
    }
    info!(models = registry.count()?, hooks = ran, "Device models initialized");
    Ok(ran)
}
