//! Services the driver consumes from its host platform.
//!
//! The driver only ever sees two traits: [`DeviceRegistry`] for device
//! numbers, character devices, classes and nodes, and [`GpioController`] for
//! the line it drives. Implementations live here too: an in-process registry
//! that also dispatches opens to the registered operation table, a simulated
//! GPIO chip, and on Linux a chip behind `/dev/gpiochipN`.

#[cfg(target_os = "linux")]
pub mod cdev;
pub mod gpio;
pub mod registry;

pub use gpio::{GpioController, GpioEvent, SimChip};
pub use registry::{DevNum, DeviceRegistry, Registry, RegistryCounts, RegistryFault};
