use std::sync::Arc;
use std::time::Duration;

use tmios_core::config::ConfigBuilder;
use tmios_devices::device::Pom;
use tmios_devices::devices::{self, thermostat};
use tmios_devices::{BaseDevice, Context, Device, DeviceExt, DeviceOptions, DeviceRegistry, MemoryStorage};
use tmios_engine::{initialize_models, IntervalScheduler};

use tmios_core::types::Id;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigBuilder::new().with_environment_prefix("TMIOS").build()?;
    tmios_core::init_with_config(&config)?;

    // Register the built-in models and run their init hooks
    let registry = DeviceRegistry::from_config(&config.devices);
    devices::register_all(&registry)?;
    initialize_models(&registry)?;

    let storage = Arc::new(MemoryStorage::new());
    let device: Arc<dyn Device> = Arc::new(
        BaseDevice::new(
            registry.get_model(thermostat::MODEL)?,
            Pom::new(Id::from_string("living-room"), "Living Room"),
            br#"{"address": "0x21", "driftStep": 0.5}"#,
            storage.clone(),
        )?
        .with_options(DeviceOptions::from(&config.devices)),
    );

    let ctx = Context::background().with_timeout(Duration::from_secs(5));
    device.set("current", 18.0f64)?;
    device.action(&ctx, "set-target", br#"{"target": 21}"#).await?;
    device.action(&ctx, "set-mode", br#"{"mode": "heat"}"#).await?;

    let state = device.action(&ctx, "read-state", b"{}").await?;
    info!("State after writes: {}", String::from_utf8_lossy(&state));

    // The scheduler would poll every minute; drive three polls by hand
    let scheduler = IntervalScheduler::new(config.scheduler.clone());
    info!("Started {} interval tasks", scheduler.schedule_device(device.clone())?);
    for _ in 0..3 {
        for task in device.meta().intervals() {
            task.run(device.clone()).await?;
        }
    }
    scheduler.shutdown()?;

    let state = device.action(&ctx, "read-state", b"{}").await?;
    info!("State after polling: {}", String::from_utf8_lossy(&state));
    info!("Points written: {}", storage.points()?.len());

    Ok(())
}
