//! Resource manager: bringing the LED device into existence and tearing it
//! down again.
//!
//! Acquisition is a fixed chain of steps:
//!
//! 1. allocate a device number,
//! 2. register the character device bound to the [`LedDevice`] operations,
//! 3. create the device class,
//! 4. create the device node,
//! 5. acquire the GPIO line and drive it inactive.
//!
//! Each of steps 1-4 produces a guard that undoes the step when dropped, and
//! step 5 produces a [`LineHandle`] which does the same for the line. A
//! failing step returns early with `?`, which drops the guards already held
//! in reverse order, so nothing from the earlier steps survives a failed
//! load.
//!
//! On the bus-driven path ([`LedDriver::bind`]) the line is resolved first:
//! a bad line must not leave a registered character device behind.

use crate::config::DeviceConfig;
use crate::device::LedDevice;
use crate::error::Result;
use crate::gpio::{LineHandle, LineSpec};
use crate::host::{DevNum, DeviceRegistry, GpioController};
use crate::of::DeviceNode;
use crate::tracing::prelude::*;
use std::sync::Arc;
use strum::Display;

/// Acquisition steps, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Step {
    DeviceNumber,
    CharDevice,
    Class,
    DeviceNode,
    GpioLine,
}

fn logged<T>(step: Step, result: Result<T>) -> Result<T> {
    match &result {
        Ok(_) => debug!(%step, "Acquired."),
        Err(e) => error!(%step, error = %e, "Acquisition step failed."),
    }
    result
}

/// Who the device is, fixed for its lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub dev: DevNum,
    /// Name the device-number range is registered under
    pub name: String,
    pub class: String,
    /// Name of the node processes open
    pub node: String,
}

struct ChrdevRegion {
    registry: Arc<dyn DeviceRegistry>,
    dev: DevNum,
}

impl ChrdevRegion {
    fn alloc(registry: &Arc<dyn DeviceRegistry>, name: &str) -> Result<Self> {
        let dev = registry.alloc_chrdev_region(0, 1, name)?;
        Ok(Self {
            registry: registry.clone(),
            dev,
        })
    }
}

impl Drop for ChrdevRegion {
    fn drop(&mut self) {
        self.registry.unregister_chrdev_region(self.dev, 1);
        debug!(step = %Step::DeviceNumber, dev = %self.dev, "Released.");
    }
}

struct CharDevice {
    registry: Arc<dyn DeviceRegistry>,
    dev: DevNum,
}

impl CharDevice {
    fn add(registry: &Arc<dyn DeviceRegistry>, dev: DevNum, device: Arc<LedDevice>) -> Result<Self> {
        registry.cdev_add(dev, 1, device)?;
        Ok(Self {
            registry: registry.clone(),
            dev,
        })
    }
}

impl Drop for CharDevice {
    fn drop(&mut self) {
        self.registry.cdev_del(self.dev, 1);
        debug!(step = %Step::CharDevice, dev = %self.dev, "Released.");
    }
}

struct Class {
    registry: Arc<dyn DeviceRegistry>,
    name: String,
}

impl Class {
    fn create(registry: &Arc<dyn DeviceRegistry>, name: &str) -> Result<Self> {
        registry.class_create(name)?;
        Ok(Self {
            registry: registry.clone(),
            name: name.to_string(),
        })
    }
}

impl Drop for Class {
    fn drop(&mut self) {
        self.registry.class_destroy(&self.name);
        debug!(step = %Step::Class, class = %self.name, "Released.");
    }
}

struct Node {
    registry: Arc<dyn DeviceRegistry>,
    class: String,
    dev: DevNum,
}

impl Node {
    fn create(registry: &Arc<dyn DeviceRegistry>, class: &str, dev: DevNum, name: &str) -> Result<Self> {
        registry.device_create(class, dev, name)?;
        Ok(Self {
            registry: registry.clone(),
            class: class.to_string(),
            dev,
        })
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.registry.device_destroy(&self.class, self.dev);
        debug!(step = %Step::DeviceNode, dev = %self.dev, "Released.");
    }
}

/// Steps 1-4. Fields drop in declaration order, which is the reverse of
/// acquisition.
struct Registrations {
    _node: Node,
    _class: Class,
    _cdev: CharDevice,
    region: ChrdevRegion,
}

impl Registrations {
    fn acquire(
        registry: &Arc<dyn DeviceRegistry>,
        config: &DeviceConfig,
        device: &Arc<LedDevice>,
    ) -> Result<Self> {
        let region = logged(Step::DeviceNumber, ChrdevRegion::alloc(registry, &config.name))?;
        let cdev = logged(
            Step::CharDevice,
            CharDevice::add(registry, region.dev, device.clone()),
        )?;
        let class = logged(Step::Class, Class::create(registry, &config.class))?;
        let node = logged(
            Step::DeviceNode,
            Node::create(registry, &config.class, region.dev, &config.node),
        )?;

        Ok(Self {
            _node: node,
            _class: class,
            _cdev: cdev,
            region,
        })
    }
}

/// When the line was acquired relative to the registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineOrder {
    /// Module load: the line comes last and goes first.
    Last,
    /// Bus bind: the line comes first and goes last.
    First,
}

/// A loaded (or bound) LED driver.
///
/// Dropping it, or calling [`release`](Self::release), tears everything down
/// in reverse acquisition order and leaves the LED off.
pub struct LedDriver {
    identity: DeviceIdentity,
    device: Arc<LedDevice>,
    registrations: Option<Registrations>,
    order: LineOrder,
}

impl LedDriver {
    /// Module-load path: register the device, then take the line named by
    /// `spec`.
    pub fn load(
        registry: Arc<dyn DeviceRegistry>,
        gpio: Arc<dyn GpioController>,
        config: &DeviceConfig,
        spec: &LineSpec,
    ) -> Result<Self> {
        info!(device = %config.name, %spec, "Loading.");
        let device = Arc::new(LedDevice::new(config.capacity));
        let registrations = Registrations::acquire(&registry, config, &device)?;
        let line = logged(
            Step::GpioLine,
            LineHandle::acquire(gpio, spec, None, &config.name),
        )?;
        device.attach(line);

        Ok(Self::assemble(config, device, registrations, LineOrder::Last))
    }

    /// Bus-bind path: resolve the line from `node` first, then register the
    /// device.
    pub fn bind(
        registry: Arc<dyn DeviceRegistry>,
        gpio: Arc<dyn GpioController>,
        config: &DeviceConfig,
        spec: &LineSpec,
        node: &DeviceNode,
    ) -> Result<Self> {
        info!(device = %config.name, node = %node.name, %spec, "Binding.");
        let line = logged(
            Step::GpioLine,
            LineHandle::acquire(gpio, spec, Some(node), &config.name),
        )?;
        let device = Arc::new(LedDevice::new(config.capacity));
        let registrations = Registrations::acquire(&registry, config, &device)?;
        device.attach(line);

        Ok(Self::assemble(config, device, registrations, LineOrder::First))
    }

    fn assemble(
        config: &DeviceConfig,
        device: Arc<LedDevice>,
        registrations: Registrations,
        order: LineOrder,
    ) -> Self {
        let identity = DeviceIdentity {
            dev: registrations.region.dev,
            name: config.name.clone(),
            class: config.class.clone(),
            node: config.node.clone(),
        };
        info!(
            dev = %identity.dev,
            node = %identity.node,
            line = ?device.line(),
            "Device ready."
        );

        Self {
            identity,
            device,
            registrations: Some(registrations),
            order,
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn device(&self) -> &Arc<LedDevice> {
        &self.device
    }

    /// Tear the driver down. Consumes it, so it can only happen once.
    pub fn release(self) {
        drop(self)
    }
}

impl Drop for LedDriver {
    fn drop(&mut self) {
        info!(device = %self.identity.name, "Releasing.");
        // Stop writes from reaching the line before anything goes away.
        let line = self.device.detach();
        match self.order {
            LineOrder::Last => {
                drop(line);
                drop(self.registrations.take());
            }
            LineOrder::First => {
                // The line outlives the registrations, but the LED goes off now.
                if let Some(line) = &line {
                    line.set(false);
                }
                drop(self.registrations.take());
                drop(line);
            }
        }
    }
}

impl std::fmt::Debug for LedDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedDriver")
            .field("identity", &self.identity)
            .field("line", &self.device.line())
            .finish()
    }
}
