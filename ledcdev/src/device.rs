//! LED device file: the read/write state machine.
//!
//! All opens of the node share one fixed-capacity buffer. Writes land in the
//! buffer at the caller's offset; afterwards the first byte of the buffer
//! decides the LED: `'1'` on, `'0'` off, anything else leaves it alone.
//! Reads return the buffer from the caller's offset. Reaching capacity is
//! end-of-file for reads and `OutOfSpace` for writes.
//!
//! The buffer sits behind a mutex held for the whole of each call, so calls
//! from different opens are serialized and a read never sees half a write.

use crate::error::{Error, Result};
use crate::file::{FileOperations, IoBufferReader, IoBufferWriter};
use crate::gpio::LineHandle;
use crate::tracing::prelude::*;
use parking_lot::Mutex;

/// Buffer capacity of the stock device.
pub const DEFAULT_CAPACITY: usize = 15;

/// Largest capacity a device may be configured with.
pub const MAX_CAPACITY: usize = 4096;

/// Shared state of the LED device file.
pub struct LedDevice {
    buffer: Mutex<Box<[u8]>>,
    line: Mutex<Option<LineHandle>>,
}

impl LedDevice {
    /// A device with a zero-filled buffer of `capacity` bytes and no line
    /// attached yet.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_CAPACITY);
        Self {
            buffer: Mutex::new(vec![0u8; capacity].into_boxed_slice()),
            line: Mutex::new(None),
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Copy of the whole buffer.
    pub fn contents(&self) -> Vec<u8> {
        self.buffer.lock().to_vec()
    }

    /// Hand the device the line its writes drive.
    pub(crate) fn attach(&self, line: LineHandle) {
        *self.line.lock() = Some(line);
    }

    /// Take the line back. Later writes no longer touch hardware.
    pub(crate) fn detach(&self) -> Option<LineHandle> {
        self.line.lock().take()
    }

    pub fn line(&self) -> Option<u32> {
        self.line.lock().as_ref().map(LineHandle::line)
    }

    fn apply_command(&self, command: u8) {
        let active = match command {
            b'1' => true,
            b'0' => false,
            _ => return,
        };
        match self.line.lock().as_ref() {
            Some(line) => {
                trace!(line = line.line(), active, "LED command.");
                line.set(active);
            }
            None => debug!(active, "LED command with no line attached."),
        }
    }
}

// Cursor as a buffer index; anything that does not fit is past the end.
fn position(offset: u64, capacity: usize) -> Option<usize> {
    usize::try_from(offset).ok().filter(|&pos| pos < capacity)
}

impl FileOperations for LedDevice {
    fn open(&self) -> Result<()> {
        trace!("Device opened.");
        Ok(())
    }

    fn release(&self) {
        trace!("Device closed.");
    }

    fn read(&self, writer: &mut dyn IoBufferWriter, offset: &mut u64) -> Result<usize> {
        let buffer = self.buffer.lock();
        let Some(pos) = position(*offset, buffer.len()) else {
            return Ok(0);
        };

        let to_copy = writer.len().min(buffer.len() - pos);
        writer.write_slice(&buffer[pos..pos + to_copy])?;

        *offset += to_copy as u64;
        Ok(to_copy)
    }

    fn write(&self, reader: &mut dyn IoBufferReader, offset: &mut u64) -> Result<usize> {
        let mut buffer = self.buffer.lock();
        let pos = position(*offset, buffer.len()).ok_or(Error::OutOfSpace)?;

        let to_copy = reader.len().min(buffer.len() - pos);
        if to_copy == 0 {
            return Err(Error::OutOfSpace);
        }

        // Stage the caller's bytes so a fault leaves the buffer untouched.
        let mut staged = vec![0u8; to_copy];
        reader.read_slice(&mut staged)?;
        buffer[pos..pos + to_copy].copy_from_slice(&staged);

        self.apply_command(buffer[0]);

        *offset += to_copy as u64;
        Ok(to_copy)
    }
}
