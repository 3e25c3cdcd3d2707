//! GPIO LED exposed as a byte-stream character device.
//!
//! A [`driver::LedDriver`] registers a device number, a character device, a
//! device class and a node, then claims a GPIO line as an output. Processes
//! open the node and read or write a small [`device::LedDevice`] buffer; the
//! first byte of the buffer after each write turns the LED on (`'1'`) or off
//! (`'0'`). Everything acquired is released in reverse order, both on unload
//! and when a later step of loading fails.
//!
//! The kernel services the driver needs live behind traits in [`host`], with
//! in-process implementations for tests and the daemon, plus the Linux GPIO
//! character device for real hardware.

pub mod config;
pub mod console;
pub mod device;
pub mod driver;
pub mod error;
pub mod file;
pub mod gpio;
pub mod host;
pub mod of;
pub mod platform;
pub mod service;
pub mod tracing;
