//! Bring the driver up according to the configuration, and back down.

use crate::config::{Config, GpioBackend, Lifecycle};
use crate::driver::LedDriver;
use crate::error::Result;
use crate::host::{GpioController, Registry, SimChip};
use crate::platform::{BindContext, PlatformBus};
use crate::tracing::prelude::*;
use anyhow::Context;
use std::sync::Arc;

/// Build the GPIO controller selected by `backend`.
pub fn gpio_controller(backend: &GpioBackend) -> Result<Arc<dyn GpioController>> {
    match backend {
        GpioBackend::Sim { lines, names } => {
            let chip = names
                .iter()
                .fold(SimChip::new(*lines), |chip, (name, line)| {
                    chip.with_name(*line, name)
                });
            debug!(lines, "Using simulated GPIO chip.");
            Ok(Arc::new(chip))
        }
        #[cfg(target_os = "linux")]
        GpioBackend::Cdev { chip } => Ok(Arc::new(crate::host::cdev::CdevChip::open(chip)?)),
        #[cfg(not(target_os = "linux"))]
        GpioBackend::Cdev { chip } => Err(crate::error::Error::NoDevice(format!(
            "{}: GPIO character devices need Linux",
            chip.display()
        ))),
    }
}

/// A running driver, in whichever lifecycle the configuration chose.
pub enum Service {
    Eager(LedDriver),
    Bus(PlatformBus),
}

impl Service {
    pub fn start(
        config: &Config,
        registry: Arc<Registry>,
        gpio: Arc<dyn GpioController>,
    ) -> anyhow::Result<Self> {
        match &config.lifecycle {
            Lifecycle::Eager => {
                let driver = LedDriver::load(registry, gpio, &config.device, &config.line)
                    .context("loading LED driver")?;
                Ok(Service::Eager(driver))
            }
            Lifecycle::Bus { .. } => {
                let tree = config.load_tree()?.context("bus lifecycle without a tree")?;
                let mut bus = PlatformBus::new(BindContext {
                    registry,
                    gpio,
                    device: config.device.clone(),
                    line: config.line.clone(),
                });
                let bound = bus.scan(&tree);
                if bound == 0 {
                    warn!("No hardware node bound; the device will not appear.");
                }
                Ok(Service::Bus(bus))
            }
        }
    }

    /// Number of devices currently up.
    pub fn device_count(&self) -> usize {
        match self {
            Service::Eager(_) => 1,
            Service::Bus(bus) => bus.bound().count(),
        }
    }

    pub fn stop(self) {
        match self {
            Service::Eager(driver) => driver.release(),
            Service::Bus(mut bus) => bus.unbind_all(),
        }
    }
}
