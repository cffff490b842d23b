/*!
 * Device models shipped with tmios.
 */

pub mod thermostat;

pub use thermostat::{ThermoConfig, ThermoProps, ThermostatMode};

use crate::error::Result;
use crate::registry::DeviceRegistry;

/// Register every bundled device model
pub fn register_all(registry: &DeviceRegistry) -> Result<()> {
    thermostat::register(registry)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_all() {
        let registry = DeviceRegistry::new();
        register_all(&registry).unwrap();
        assert!(registry.has_model(thermostat::MODEL).unwrap());

        // A second pass reports the duplicate instead of replacing it
        assert!(register_all(&registry).is_err());
        assert_eq!(registry.count().unwrap(), 1);
    }
}
