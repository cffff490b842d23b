/*!
 * Thermostat device model.
 *
 * Declares the `thermo-v1` model: a bus-addressed thermostat with a target
 * temperature, an operating mode and a periodic poll that drifts the current
 * temperature towards the target while heating or cooling.
 */
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::Context;
use crate::device::{CommitOptions, Device, DeviceExt};
use crate::error::Result;
use crate::model::{DeviceModel, IntervalTask};
use crate::registry::DeviceRegistry;
use crate::schema::Empty;

/// Registry key of the thermostat model
pub const MODEL: &str = "thermo-v1";

/// How far one poll moves the current temperature when the config leaves
/// `driftStep` at zero
const DEFAULT_STEP: f64 = 0.5;

/// Thermostat operating modes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThermostatMode {
    /// Off mode
    #[default]
    Off,
    /// Heat mode
    Heat,
    /// Cool mode
    Cool,
    /// Auto mode (heating or cooling as needed)
    Auto,
}

impl ThermostatMode {
    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            ThermostatMode::Off => "off",
            ThermostatMode::Heat => "heat",
            ThermostatMode::Cool => "cool",
            ThermostatMode::Auto => "auto",
        }
    }

    fn can_heat(&self) -> bool {
        matches!(self, ThermostatMode::Heat | ThermostatMode::Auto)
    }

    fn can_cool(&self) -> bool {
        matches!(self, ThermostatMode::Cool | ThermostatMode::Auto)
    }
}

crate::schema! {
    /// Thermostat configuration
    #[derive(Debug, Clone, PartialEq)]
    pub struct ThermoConfig {
        /// Bus address of the unit
        pub address: String => { validate: "required", desc: "Bus address" },
        /// Degrees moved per poll while heating or cooling, 0 for the default
        pub drift_step: f64 as "driftStep" => { validate: "gte=0,lte=5", desc: "Degrees moved per poll" },
    }
}

crate::schema! {
    /// Thermostat properties
    #[derive(Debug, Clone, PartialEq)]
    pub struct ThermoProps {
        /// Measured temperature
        pub current: f64 => { desc: "Measured temperature", extras: "unit=celsius" },
        /// Target temperature
        pub target: f64 => { desc: "Target temperature", extras: "unit=celsius" },
        /// Whether the unit is heating
        pub heating: bool,
        /// Whether the unit is cooling
        pub cooling: bool,
        /// Operating mode
        pub mode: ThermostatMode,
    }
}

crate::schema! {
    /// Arguments of `set-target`
    #[derive(Debug, Clone, PartialEq)]
    pub struct SetTargetArgs {
        /// New target temperature
        pub target: f64 => { validate: "gte=5,lte=35", desc: "Target temperature" },
    }
}

crate::schema! {
    /// Arguments of `set-mode`
    #[derive(Debug, Clone, PartialEq)]
    pub struct SetModeArgs {
        /// New operating mode
        pub mode: ThermostatMode => { validate: "oneof=off heat cool auto" },
    }
}

crate::schema! {
    /// Result of the write actions
    #[derive(Debug, Clone, PartialEq)]
    pub struct Ack {
        /// Whether the write was applied
        pub ok: bool,
    }
}

/// Recompute the heating/cooling flags from the current property values
fn regulate(device: &dyn Device) -> Result<()> {
    let props: ThermoProps = device.get_prop_vals()?;
    device.set("heating", props.mode.can_heat() && props.current < props.target)?;
    device.set("cooling", props.mode.can_cool() && props.current > props.target)?;
    Ok(())
}

fn set_target<'a>(
    _ctx: &'a Context,
    device: &'a dyn Device,
    args: &'a SetTargetArgs,
    rets: &'a mut Ack,
) -> BoxFuture<'a, anyhow::Result<()>> {
    Box::pin(async move {
        device.set("target", args.target)?;
        regulate(device)?;
        rets.ok = true;
        Ok(())
    })
}

fn set_mode<'a>(
    _ctx: &'a Context,
    device: &'a dyn Device,
    args: &'a SetModeArgs,
    rets: &'a mut Ack,
) -> BoxFuture<'a, anyhow::Result<()>> {
    Box::pin(async move {
        device.set("mode", args.mode)?;
        regulate(device)?;
        rets.ok = true;
        Ok(())
    })
}

fn read_state<'a>(
    _ctx: &'a Context,
    device: &'a dyn Device,
    _args: &'a Empty,
    rets: &'a mut ThermoProps,
) -> BoxFuture<'a, anyhow::Result<()>> {
    Box::pin(async move {
        *rets = device.get_prop_vals()?;
        Ok(())
    })
}

/// One poll: drift towards the target, then commit with a keep-alive
async fn poll(device: Arc<dyn Device>) -> anyhow::Result<()> {
    let config: ThermoConfig = device.get_config()?;
    let step = if config.drift_step > 0.0 { config.drift_step } else { DEFAULT_STEP };

    let props: ThermoProps = device.get_prop_vals()?;
    let current = if props.heating {
        (props.current + step).min(props.target)
    } else if props.cooling {
        (props.current - step).max(props.target)
    } else {
        props.current
    };

    if current != props.current {
        device.set("current", current)?;
        regulate(&*device)?;
    }
    debug!(pom = %device.pom().id, current, target = props.target, "Thermostat polled");

    device.commit(CommitOptions::default().with_keep_alive()).await?;
    Ok(())
}

fn foreign_id(raw: &[u8]) -> String {
    match serde_json::from_slice::<ThermoConfig>(raw) {
        Ok(config) => format!("{}:{}", MODEL, config.address),
        Err(_) => String::new(),
    }
}

/// Build the `thermo-v1` model
pub fn model() -> Result<DeviceModel> {
    DeviceModel::builder(MODEL)
        .name("Thermostat")
        .variable("thermostat")
        .brand("tmios")
        .device_type("thermostat")
        .description("Bus-connected room thermostat")
        .config::<ThermoConfig>()
        .properties::<ThermoProps>()
        .action("set-target", "Set the target temperature", set_target)
        .action("set-mode", "Set the operating mode", set_mode)
        .action("read-state", "Read every property", read_state)
        .interval(IntervalTask::new(
            "poll",
            Duration::from_secs(60),
            "Read the unit and refresh the keep-alive",
            poll,
        ))
        .foreign_id(foreign_id)
        .build()
}

/// Build and register the `thermo-v1` model
pub fn register(registry: &DeviceRegistry) -> Result<Arc<DeviceModel>> {
    registry.register(model()?)
}
