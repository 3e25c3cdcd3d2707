//! Platform bus: binding drivers to hardware description nodes.
//!
//! Drivers announce themselves with `inventory::submit!` of a
//! [`DriverDescriptor`] listing the `compatible` strings they handle. The bus
//! matches available nodes against those strings, calls the driver's probe
//! with the node, and keeps whatever probe returns until the node is
//! unbound, at which point it is removed.

use crate::config::DeviceConfig;
use crate::driver::LedDriver;
use crate::error::{Error, Result};
use crate::gpio::LineSpec;
use crate::host::{DeviceRegistry, GpioController};
use crate::of::DeviceNode;
use crate::tracing::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

/// What probe hands to the driver: the host services and its settings.
#[derive(Clone)]
pub struct BindContext {
    pub registry: Arc<dyn DeviceRegistry>,
    pub gpio: Arc<dyn GpioController>,
    pub device: DeviceConfig,
    pub line: LineSpec,
}

/// Per-device state a driver keeps while bound.
pub trait DeviceRemoval: Send {
    /// Undo probe. Called exactly once, at unbind.
    fn remove(self: Box<Self>);
}

/// A driver the bus can bind.
pub struct DriverDescriptor {
    pub name: &'static str,
    pub compatible: &'static [&'static str],
    pub probe: fn(&BindContext, &DeviceNode) -> Result<Box<dyn DeviceRemoval>>,
}

impl DriverDescriptor {
    pub fn matches(&self, node: &DeviceNode) -> bool {
        self.compatible.iter().any(|c| node.is_compatible(c))
    }
}

inventory::collect!(DriverDescriptor);

/// Compatible string of the LED driver.
pub const LED_COMPATIBLE: &str = "ledcdev,gpio-led";

/// The LED driver as a platform driver.
pub struct LedPlatformDriver;

impl LedPlatformDriver {
    fn probe(ctx: &BindContext, node: &DeviceNode) -> Result<Box<dyn DeviceRemoval>> {
        let driver = LedDriver::bind(
            ctx.registry.clone(),
            ctx.gpio.clone(),
            &ctx.device,
            &ctx.line,
            node,
        )?;
        Ok(Box::new(driver))
    }
}

impl DeviceRemoval for LedDriver {
    fn remove(self: Box<Self>) {
        self.release();
    }
}

inventory::submit! {
    DriverDescriptor {
        name: "ledcdev",
        compatible: &[LED_COMPATIBLE],
        probe: LedPlatformDriver::probe,
    }
}

struct Binding {
    driver: &'static str,
    data: Box<dyn DeviceRemoval>,
}

/// Bus with the nodes currently bound, keyed by path.
pub struct PlatformBus {
    ctx: BindContext,
    bound: BTreeMap<String, Binding>,
}

impl PlatformBus {
    pub fn new(ctx: BindContext) -> Self {
        Self {
            ctx,
            bound: BTreeMap::new(),
        }
    }

    /// Find the driver for `node`, if any is registered.
    pub fn find_driver(node: &DeviceNode) -> Option<&'static DriverDescriptor> {
        inventory::iter::<DriverDescriptor>
            .into_iter()
            .find(|desc| desc.matches(node))
    }

    /// Probe `node` at `path` with its matching driver.
    pub fn bind(&mut self, path: &str, node: &DeviceNode) -> Result<()> {
        if self.bound.contains_key(path) {
            return Err(Error::Usage(format!("{path} is already bound")));
        }
        if !node.is_available() {
            return Err(Error::NoDevice(format!("{path} is {}", node.status)));
        }
        let desc = Self::find_driver(node)
            .ok_or_else(|| Error::NoDevice(format!("no driver for {path}")))?;

        let data = (desc.probe)(&self.ctx, node).inspect_err(|e| {
            error!(path, driver = desc.name, error = %e, "Probe failed.");
        })?;
        info!(path, driver = desc.name, "Bound.");
        self.bound.insert(
            path.to_string(),
            Binding {
                driver: desc.name,
                data,
            },
        );
        Ok(())
    }

    /// Bind every available node under `root` that has a driver.
    ///
    /// A failing probe is logged and skipped; returns how many nodes bound.
    pub fn scan(&mut self, root: &DeviceNode) -> usize {
        let mut count = 0;
        for (path, node) in root.descendants() {
            if !node.is_available() || Self::find_driver(node).is_none() {
                continue;
            }
            if self.bind(&path, node).is_ok() {
                count += 1;
            }
        }
        count
    }

    pub fn unbind(&mut self, path: &str) -> Result<()> {
        let binding = self
            .bound
            .remove(path)
            .ok_or_else(|| Error::NoDevice(format!("{path} is not bound")))?;
        binding.data.remove();
        info!(path, driver = binding.driver, "Unbound.");
        Ok(())
    }

    /// Unbind everything, in reverse path order.
    pub fn unbind_all(&mut self) {
        while let Some((path, binding)) = self.bound.pop_last() {
            binding.data.remove();
            info!(path, driver = binding.driver, "Unbound.");
        }
    }

    pub fn bound(&self) -> impl Iterator<Item = &str> {
        self.bound.keys().map(String::as_str)
    }
}

impl Drop for PlatformBus {
    fn drop(&mut self) {
        self.unbind_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::host::{Registry, SimChip};

    fn setup() -> (PlatformBus, Arc<Registry>, Arc<SimChip>) {
        let registry = Arc::new(Registry::new());
        let chip = Arc::new(SimChip::new(32));
        let ctx = BindContext {
            registry: registry.clone(),
            gpio: chip.clone(),
            device: DeviceConfig {
                name: "led2".into(),
                node: "led2".into(),
                ..DeviceConfig::default()
            },
            line: LineSpec::Property {
                property: "led-gpios".into(),
                index: 0,
            },
        };
        (PlatformBus::new(ctx), registry, chip)
    }

    fn tree(line: u32) -> DeviceNode {
        DeviceNode::new("").with_child(
            DeviceNode::new("leds")
                .with_child(
                    DeviceNode::new("status")
                        .with_compatible(LED_COMPATIBLE)
                        .with_property("led-gpios", &[line]),
                )
                .with_child(DeviceNode::new("other").with_compatible("vendor,thing")),
        )
    }

    #[test]
    fn test_led_driver_is_registered() {
        let node = DeviceNode::new("x").with_compatible(LED_COMPATIBLE);
        let desc = PlatformBus::find_driver(&node).unwrap();
        assert_eq!(desc.name, "ledcdev");
        assert!(PlatformBus::find_driver(&DeviceNode::new("y")).is_none());
    }

    #[test]
    fn test_scan_binds_matching_node() {
        let (mut bus, registry, chip) = setup();
        assert_eq!(bus.scan(&tree(6)), 1);
        assert_eq!(bus.bound().collect::<Vec<_>>(), vec!["/leds/status"]);

        registry.open("led2").unwrap().write(b"1").unwrap();
        assert_eq!(chip.value(6), Some(true));

        bus.unbind("/leds/status").unwrap();
        assert_eq!(chip.value(6), Some(false));
        assert!(registry.is_empty());
        assert_eq!(chip.owned_count(), 0);
    }

    #[test]
    fn test_failed_probe_leaves_nothing() {
        let (mut bus, registry, chip) = setup();
        chip.claim(6, "someone");
        assert_eq!(bus.scan(&tree(6)), 0);
        assert!(registry.is_empty());
        assert_eq!(bus.bound().count(), 0);
    }

    #[test]
    fn test_bind_errors() {
        let (mut bus, _registry, _chip) = setup();
        let root = tree(6);
        let disabled = root.find("/leds/status").unwrap().clone().with_status("disabled");
        assert_eq!(bus.bind("/x", &disabled).unwrap_err().kind(), ErrorKind::NoDevice);

        let other = root.find("/leds/other").unwrap();
        assert_eq!(bus.bind("/leds/other", other).unwrap_err().kind(), ErrorKind::NoDevice);

        let led = root.find("/leds/status").unwrap();
        bus.bind("/leds/status", led).unwrap();
        assert_eq!(bus.bind("/leds/status", led).unwrap_err().kind(), ErrorKind::Usage);
        assert_eq!(bus.unbind("/nope").unwrap_err().kind(), ErrorKind::NoDevice);
    }

    #[test]
    fn test_drop_unbinds() {
        let (mut bus, registry, chip) = setup();
        bus.scan(&tree(8));
        registry.open("led2").unwrap().write(b"1").unwrap();
        drop(bus);
        assert!(registry.is_empty());
        assert_eq!(chip.value(8), Some(false));
    }
}
