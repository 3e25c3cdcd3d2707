//! GPIO controller backed by the Linux GPIO character device.
//!
//! Lines are reached through `/dev/gpiochipN` with the `gpio-cdev` crate.
//! The kernel grants ownership and output direction in a single line request,
//! so `request` only reserves the line after checking the kernel does not
//! report it in use, and `direction_output` performs the actual request.

use crate::error::{Error, Result};
use crate::host::gpio::GpioController;
use crate::tracing::prelude::*;
use gpio_cdev::{Chip, LineHandle, LineRequestFlags};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

enum Claim {
    Reserved { consumer: String },
    Driven(LineHandle),
}

struct Inner {
    chip: Chip,
    claims: HashMap<u32, Claim>,
}

/// A GPIO chip opened through its character device.
pub struct CdevChip {
    path: PathBuf,
    num_lines: u32,
    inner: Mutex<Inner>,
}

impl CdevChip {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let chip = Chip::new(&path)
            .map_err(|e| Error::NoDevice(format!("{}: {e}", path.display())))?;
        let num_lines = chip.num_lines();
        debug!(chip = %path.display(), lines = num_lines, "Opened GPIO chip.");

        Ok(Self {
            path,
            num_lines,
            inner: Mutex::new(Inner {
                chip,
                claims: HashMap::new(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl GpioController for CdevChip {
    fn is_valid(&self, line: u32) -> bool {
        line < self.num_lines
    }

    fn request(&self, line: u32, consumer: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.claims.contains_key(&line) {
            return Err(Error::GpioRequestFailed(format!("{line} already requested")));
        }

        let info = inner
            .chip
            .get_line(line)
            .and_then(|l| l.info())
            .map_err(|e| Error::GpioInvalid(format!("{line}: {e}")))?;
        if info.is_used() {
            let owner = info.consumer().unwrap_or("kernel").to_string();
            return Err(Error::GpioRequestFailed(format!("{line} owned by {owner}")));
        }

        inner.claims.insert(
            line,
            Claim::Reserved {
                consumer: consumer.to_string(),
            },
        );
        Ok(())
    }

    fn direction_output(&self, line: u32, active: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        let consumer = match inner.claims.get(&line) {
            Some(Claim::Reserved { consumer }) => consumer.clone(),
            Some(Claim::Driven(handle)) => {
                // Already an output; just drive the level.
                return handle
                    .set_value(active as u8)
                    .map_err(|e| Error::GpioDirectionSetFailed(format!("{line}: {e}")));
            }
            None => return Err(Error::GpioRequestFailed(format!("{line} not requested"))),
        };

        let handle = inner
            .chip
            .get_line(line)
            .and_then(|l| l.request(LineRequestFlags::OUTPUT, active as u8, &consumer))
            .map_err(|e| Error::GpioDirectionSetFailed(format!("{line}: {e}")))?;
        inner.claims.insert(line, Claim::Driven(handle));
        Ok(())
    }

    fn get_by_label(&self, label: &str, consumer: &str, active: bool) -> Result<u32> {
        let line = {
            let mut inner = self.inner.lock();
            let mut found = None;
            for offset in 0..self.num_lines {
                let info = inner
                    .chip
                    .get_line(offset)
                    .and_then(|l| l.info())
                    .map_err(|e| Error::GpioInvalid(format!("{offset}: {e}")))?;
                if info.name() == Some(label) {
                    found = Some(offset);
                    break;
                }
            }
            found.ok_or_else(|| Error::GpioInvalid(format!("no line labelled {label}")))?
        };

        self.request(line, consumer)?;
        if let Err(e) = self.direction_output(line, active) {
            self.free(line);
            return Err(e);
        }
        Ok(line)
    }

    fn set_value(&self, line: u32, active: bool) {
        let inner = self.inner.lock();
        match inner.claims.get(&line) {
            Some(Claim::Driven(handle)) => {
                if let Err(e) = handle.set_value(active as u8) {
                    warn!(line, error = %e, "Failed to set GPIO line.");
                }
            }
            _ => warn!(line, "Set on a line that is not an owned output, ignoring."),
        }
    }

    fn free(&self, line: u32) {
        // Dropping the handle hands the line back to the kernel.
        self.inner.lock().claims.remove(&line);
    }
}
