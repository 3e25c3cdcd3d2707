//! Common error types for ledcdev.
//!
//! A single Error enum covers the three failure families of the driver:
//! resource registration at load/bind time, GPIO line acquisition, and
//! per-call I/O on the device file. Every variant maps onto the errno a
//! kernel character driver would hand back to its caller.

use nix::errno::Errno;
use strum::Display;
use thiserror::Error;

/// Main error type for ledcdev operations.
#[derive(Error, Debug)]
pub enum Error {
    /// No device-number range could be reserved
    #[error("failed to allocate device number for {0}")]
    NumberAllocationFailed(String),

    /// The character-device entry could not be registered
    #[error("failed to register character device {0}")]
    CharDeviceRegistrationFailed(String),

    /// The device class could not be created
    #[error("failed to create device class {0}")]
    ClassCreationFailed(String),

    /// The device node could not be created
    #[error("failed to create device node {0}")]
    DeviceNodeCreationFailed(String),

    /// The resolved GPIO line does not exist
    #[error("invalid GPIO line: {0}")]
    GpioInvalid(String),

    /// The GPIO line is owned by someone else
    #[error("GPIO line busy: {0}")]
    GpioRequestFailed(String),

    /// The GPIO line refused to be configured as an output
    #[error("cannot drive GPIO line as output: {0}")]
    GpioDirectionSetFailed(String),

    /// Write at or past the end of the file buffer
    #[error("no space left on device")]
    OutOfSpace,

    /// Caller memory could not be copied to or from
    #[error("bad address")]
    FaultError,

    /// Open of a node that is not registered
    #[error("no such device: {0}")]
    NoDevice(String),

    /// Console handle that is not open
    #[error("bad file handle {0}")]
    BadHandle(u32),

    /// Malformed console command
    #[error("usage: {0}")]
    Usage(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O errors from std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Flat discriminant of [`Error`], used for matching and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    NumberAllocationFailed,
    CharDeviceRegistrationFailed,
    ClassCreationFailed,
    DeviceNodeCreationFailed,
    GpioInvalid,
    GpioRequestFailed,
    GpioDirectionSetFailed,
    OutOfSpace,
    FaultError,
    NoDevice,
    BadHandle,
    Usage,
    Config,
    Io,
}

/// Failure families, by when they can occur and what they affect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorClass {
    /// Load/bind time; the device never becomes available.
    Resource,
    /// Load/bind time; everything acquired so far is rolled back.
    Gpio,
    /// Scoped to a single read or write call.
    Io,
    /// Everything outside the driver proper.
    Other,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NumberAllocationFailed(_) => ErrorKind::NumberAllocationFailed,
            Error::CharDeviceRegistrationFailed(_) => ErrorKind::CharDeviceRegistrationFailed,
            Error::ClassCreationFailed(_) => ErrorKind::ClassCreationFailed,
            Error::DeviceNodeCreationFailed(_) => ErrorKind::DeviceNodeCreationFailed,
            Error::GpioInvalid(_) => ErrorKind::GpioInvalid,
            Error::GpioRequestFailed(_) => ErrorKind::GpioRequestFailed,
            Error::GpioDirectionSetFailed(_) => ErrorKind::GpioDirectionSetFailed,
            Error::OutOfSpace => ErrorKind::OutOfSpace,
            Error::FaultError => ErrorKind::FaultError,
            Error::NoDevice(_) => ErrorKind::NoDevice,
            Error::BadHandle(_) => ErrorKind::BadHandle,
            Error::Usage(_) => ErrorKind::Usage,
            Error::Config(_) => ErrorKind::Config,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self.kind() {
            ErrorKind::NumberAllocationFailed
            | ErrorKind::CharDeviceRegistrationFailed
            | ErrorKind::ClassCreationFailed
            | ErrorKind::DeviceNodeCreationFailed => ErrorClass::Resource,
            ErrorKind::GpioInvalid
            | ErrorKind::GpioRequestFailed
            | ErrorKind::GpioDirectionSetFailed => ErrorClass::Gpio,
            ErrorKind::OutOfSpace | ErrorKind::FaultError => ErrorClass::Io,
            _ => ErrorClass::Other,
        }
    }

    /// The errno a kernel driver returns for this failure.
    pub fn errno(&self) -> Errno {
        match self {
            Error::NumberAllocationFailed(_) => Errno::EBUSY,
            Error::CharDeviceRegistrationFailed(_) => Errno::EBUSY,
            Error::ClassCreationFailed(_) => Errno::EEXIST,
            Error::DeviceNodeCreationFailed(_) => Errno::EEXIST,
            Error::GpioInvalid(_) => Errno::EINVAL,
            Error::GpioRequestFailed(_) => Errno::EBUSY,
            Error::GpioDirectionSetFailed(_) => Errno::EIO,
            Error::OutOfSpace => Errno::ENOSPC,
            Error::FaultError => Errno::EFAULT,
            Error::NoDevice(_) => Errno::ENODEV,
            Error::BadHandle(_) => Errno::EBADF,
            Error::Usage(_) | Error::Config(_) => Errno::EINVAL,
            Error::Io(e) => e.raw_os_error().map(Errno::from_raw).unwrap_or(Errno::EIO),
        }
    }
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
