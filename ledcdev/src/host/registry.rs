//! Device-number, character-device, class and node bookkeeping.
//!
//! [`DeviceRegistry`] is the surface the driver consumes at load/bind time.
//! [`Registry`] implements it in-process and also plays the VFS role: opening
//! a node by name looks up its device number, finds the character device
//! registered for it and dispatches to that device's operation table.

use crate::error::{Error, Result};
use crate::file::{FileOperations, OpenFile};
use crate::tracing::prelude::*;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

/// Bits of a packed device number reserved for the minor.
const MINOR_BITS: u32 = 20;

/// Dynamic majors are handed out from the top of this range down.
const DYNAMIC_MAJORS: std::ops::RangeInclusive<u32> = 234..=254;

/// A major/minor device number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DevNum {
    pub major: u32,
    pub minor: u32,
}

impl DevNum {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Kernel-style packed representation.
    pub fn raw(&self) -> u32 {
        (self.major << MINOR_BITS) | self.minor
    }
}

impl fmt::Display for DevNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.major, self.minor)
    }
}

/// Registration services the driver needs from its host.
pub trait DeviceRegistry: Send + Sync {
    /// Reserve `count` minors under a free dynamic major.
    fn alloc_chrdev_region(&self, first_minor: u32, count: u32, name: &str) -> Result<DevNum>;

    fn unregister_chrdev_region(&self, first: DevNum, count: u32);

    /// Bind `ops` to `count` device numbers starting at `first`.
    fn cdev_add(&self, first: DevNum, count: u32, ops: Arc<dyn FileOperations>) -> Result<()>;

    fn cdev_del(&self, first: DevNum, count: u32);

    fn class_create(&self, name: &str) -> Result<()>;

    fn class_destroy(&self, name: &str);

    /// Create the node `name` for `dev` under `class`.
    fn device_create(&self, class: &str, dev: DevNum, name: &str) -> Result<()>;

    fn device_destroy(&self, class: &str, dev: DevNum);
}

/// Registry operations that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryFault {
    AllocRegion,
    CdevAdd,
    ClassCreate,
    DeviceCreate,
}

#[derive(Debug)]
struct Region {
    name: String,
    first_minor: u32,
    count: u32,
}

#[derive(Debug)]
struct Node {
    class: String,
    dev: DevNum,
}

#[derive(Default)]
struct State {
    regions: BTreeMap<u32, Region>,
    cdevs: BTreeMap<DevNum, Arc<dyn FileOperations>>,
    classes: BTreeSet<String>,
    nodes: BTreeMap<String, Node>,
    faults: HashSet<RegistryFault>,
}

impl State {
    fn take_fault(&mut self, fault: RegistryFault) -> bool {
        self.faults.remove(&fault)
    }
}

/// Snapshot of everything currently registered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryCounts {
    pub regions: usize,
    pub cdevs: usize,
    pub classes: usize,
    pub nodes: usize,
}

impl RegistryCounts {
    pub fn total(&self) -> usize {
        self.regions + self.cdevs + self.classes + self.nodes
    }
}

/// In-process device registry and node dispatcher.
#[derive(Default)]
pub struct Registry {
    state: Mutex<State>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `fault`'s operation fail. One-shot.
    pub fn inject(&self, fault: RegistryFault) {
        self.state.lock().faults.insert(fault);
    }

    pub fn counts(&self) -> RegistryCounts {
        let state = self.state.lock();
        RegistryCounts {
            regions: state.regions.len(),
            cdevs: state.cdevs.len(),
            classes: state.classes.len(),
            nodes: state.nodes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counts().total() == 0
    }

    pub fn has_class(&self, name: &str) -> bool {
        self.state.lock().classes.contains(name)
    }

    /// Device number behind node `name`.
    pub fn lookup(&self, name: &str) -> Option<DevNum> {
        self.state.lock().nodes.get(name).map(|n| n.dev)
    }

    /// All nodes with their class and device number, sorted by name.
    pub fn nodes(&self) -> Vec<(String, String, DevNum)> {
        self.state
            .lock()
            .nodes
            .iter()
            .map(|(name, node)| (name.clone(), node.class.clone(), node.dev))
            .collect()
    }

    /// Open node `name` and dispatch its `open` operation.
    pub fn open(&self, name: &str) -> Result<OpenFile> {
        let ops = {
            let state = self.state.lock();
            let dev = state
                .nodes
                .get(name)
                .map(|n| n.dev)
                .ok_or_else(|| Error::NoDevice(name.to_string()))?;
            state
                .cdevs
                .get(&dev)
                .cloned()
                .ok_or_else(|| Error::NoDevice(format!("{name} ({dev})")))?
        };
        OpenFile::open(name, ops)
    }
}

impl DeviceRegistry for Registry {
    fn alloc_chrdev_region(&self, first_minor: u32, count: u32, name: &str) -> Result<DevNum> {
        let mut state = self.state.lock();
        if state.take_fault(RegistryFault::AllocRegion) {
            return Err(Error::NumberAllocationFailed(name.to_string()));
        }

        let major = DYNAMIC_MAJORS
            .rev()
            .find(|m| !state.regions.contains_key(m))
            .ok_or_else(|| Error::NumberAllocationFailed(name.to_string()))?;
        state.regions.insert(
            major,
            Region {
                name: name.to_string(),
                first_minor,
                count,
            },
        );
        Ok(DevNum::new(major, first_minor))
    }

    fn unregister_chrdev_region(&self, first: DevNum, count: u32) {
        let mut state = self.state.lock();
        match state.regions.get(&first.major) {
            Some(r) if r.first_minor == first.minor && r.count == count => {
                trace!(region = %r.name, dev = %first, "Unregistered region.");
                state.regions.remove(&first.major);
            }
            _ => warn!(dev = %first, count, "Unregister of unknown region."),
        }
    }

    fn cdev_add(&self, first: DevNum, count: u32, ops: Arc<dyn FileOperations>) -> Result<()> {
        let mut state = self.state.lock();
        let devs: Vec<DevNum> = (0..count)
            .map(|i| DevNum::new(first.major, first.minor + i))
            .collect();
        if state.take_fault(RegistryFault::CdevAdd)
            || devs.iter().any(|d| state.cdevs.contains_key(d))
        {
            return Err(Error::CharDeviceRegistrationFailed(first.to_string()));
        }
        for dev in devs {
            state.cdevs.insert(dev, ops.clone());
        }
        Ok(())
    }

    fn cdev_del(&self, first: DevNum, count: u32) {
        let mut state = self.state.lock();
        for i in 0..count {
            state.cdevs.remove(&DevNum::new(first.major, first.minor + i));
        }
    }

    fn class_create(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.take_fault(RegistryFault::ClassCreate) || !state.classes.insert(name.to_string()) {
            return Err(Error::ClassCreationFailed(name.to_string()));
        }
        Ok(())
    }

    fn class_destroy(&self, name: &str) {
        self.state.lock().classes.remove(name);
    }

    fn device_create(&self, class: &str, dev: DevNum, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.take_fault(RegistryFault::DeviceCreate)
            || !state.classes.contains(class)
            || state.nodes.contains_key(name)
        {
            return Err(Error::DeviceNodeCreationFailed(name.to_string()));
        }
        state.nodes.insert(
            name.to_string(),
            Node {
                class: class.to_string(),
                dev,
            },
        );
        Ok(())
    }

    fn device_destroy(&self, class: &str, dev: DevNum) {
        self.state
            .lock()
            .nodes
            .retain(|_, node| !(node.class == class && node.dev == dev));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{IoBufferReader, IoBufferWriter};

    struct Echo;

    impl FileOperations for Echo {
        fn read(&self, writer: &mut dyn IoBufferWriter, _offset: &mut u64) -> Result<usize> {
            writer.write_slice(b"e")?;
            Ok(1)
        }

        fn write(&self, reader: &mut dyn IoBufferReader, _offset: &mut u64) -> Result<usize> {
            Ok(reader.len())
        }
    }

    #[test]
    fn test_dynamic_majors_are_distinct() {
        let registry = Registry::new();
        let a = registry.alloc_chrdev_region(0, 1, "a").unwrap();
        let b = registry.alloc_chrdev_region(0, 1, "b").unwrap();
        assert_eq!(a.major, 254);
        assert_eq!(b.major, 253);
        assert_eq!(a.raw(), 254 << 20);
        assert_eq!(a.to_string(), "254:0");
    }

    #[test]
    fn test_majors_run_out() {
        let registry = Registry::new();
        for _ in DYNAMIC_MAJORS {
            registry.alloc_chrdev_region(0, 1, "x").unwrap();
        }
        assert!(matches!(
            registry.alloc_chrdev_region(0, 1, "x"),
            Err(Error::NumberAllocationFailed(_))
        ));
    }

    #[test]
    fn test_injected_fault_is_one_shot() {
        let registry = Registry::new();
        registry.inject(RegistryFault::ClassCreate);
        assert!(registry.class_create("c").is_err());
        assert!(registry.class_create("c").is_ok());
        assert!(registry.class_create("c").is_err(), "duplicate class");
    }

    #[test]
    fn test_open_dispatches_to_cdev() {
        let registry = Registry::new();
        let dev = registry.alloc_chrdev_region(0, 1, "echo").unwrap();
        registry.cdev_add(dev, 1, Arc::new(Echo)).unwrap();
        registry.class_create("echo_class").unwrap();
        registry.device_create("echo_class", dev, "echo").unwrap();

        let mut file = registry.open("echo").unwrap();
        assert_eq!(file.read(4).unwrap(), b"e");
        assert_eq!(file.write(b"abc").unwrap(), 3);
        assert_eq!(registry.lookup("echo"), Some(dev));
        assert_eq!(registry.counts().total(), 4);
    }

    #[test]
    fn test_open_unknown_node() {
        let registry = Registry::new();
        assert!(matches!(registry.open("led"), Err(Error::NoDevice(_))));
    }

    #[test]
    fn test_node_requires_class() {
        let registry = Registry::new();
        let dev = DevNum::new(254, 0);
        assert!(matches!(
            registry.device_create("missing", dev, "led"),
            Err(Error::DeviceNodeCreationFailed(_))
        ));
    }

    #[test]
    fn test_teardown_empties_registry() {
        let registry = Registry::new();
        let dev = registry.alloc_chrdev_region(0, 1, "echo").unwrap();
        registry.cdev_add(dev, 1, Arc::new(Echo)).unwrap();
        registry.class_create("c").unwrap();
        registry.device_create("c", dev, "echo").unwrap();

        registry.device_destroy("c", dev);
        registry.class_destroy("c");
        registry.cdev_del(dev, 1);
        registry.unregister_chrdev_region(dev, 1);
        assert!(registry.is_empty());
    }
}
