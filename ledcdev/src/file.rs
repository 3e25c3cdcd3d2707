//! File operations and caller-memory buffers.
//!
//! [`FileOperations`] is the operation table a registered character device
//! hands to the host: open, release, read and write. The host dispatches each
//! call on an [`OpenFile`], which carries the per-open offset cursor.
//!
//! Caller memory is reached through [`IoBufferReader`] and [`IoBufferWriter`].
//! A copy that touches memory the caller does not actually have mapped fails
//! with [`Error::FaultError`], the way `copy_from_user`/`copy_to_user` fail
//! with `EFAULT`.

use crate::error::{Error, Result};
use crate::tracing::prelude::*;
use std::sync::Arc;

/// A buffer to be read from during a write call.
pub trait IoBufferReader {
    /// Number of bytes the caller asked to transfer.
    ///
    /// Reading fewer bytes than this may still fault.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill `out` from the caller's memory.
    ///
    /// Returns `FaultError` if `out` is longer than what is left, or if the
    /// memory is not readable. Bytes before the faulting address may already
    /// have been copied into `out`.
    fn read_slice(&mut self, out: &mut [u8]) -> Result<()>;
}

/// A buffer to be written to during a read call.
pub trait IoBufferWriter {
    /// Number of bytes the caller can accept.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `data` into the caller's memory.
    ///
    /// Returns `FaultError` if `data` is longer than what is left, or if the
    /// memory is not writable, in which case a prefix may have been written.
    fn write_slice(&mut self, data: &[u8]) -> Result<()>;
}

/// Caller-supplied source bytes for a write.
///
/// The declared length may exceed the mapped bytes; the tail past `mapped`
/// behaves like an unmapped page.
#[derive(Debug)]
pub struct UserSlice<'a> {
    mapped: &'a [u8],
    len: usize,
    pos: usize,
}

impl<'a> UserSlice<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_len(data, data.len())
    }

    /// A slice claiming `len` bytes of which only `data` is readable.
    pub fn with_len(data: &'a [u8], len: usize) -> Self {
        Self {
            mapped: data,
            len,
            pos: 0,
        }
    }
}

impl IoBufferReader for UserSlice<'_> {
    fn len(&self) -> usize {
        self.len - self.pos
    }

    fn read_slice(&mut self, out: &mut [u8]) -> Result<()> {
        if out.len() > IoBufferReader::len(self) {
            return Err(Error::FaultError);
        }

        let readable = self.mapped.len().saturating_sub(self.pos).min(out.len());
        out[..readable].copy_from_slice(&self.mapped[self.pos..self.pos + readable]);
        self.pos += readable;

        if readable < out.len() {
            return Err(Error::FaultError);
        }
        Ok(())
    }
}

/// Caller-supplied destination for a read.
#[derive(Debug)]
pub struct UserBuffer {
    data: Vec<u8>,
    capacity: usize,
    mapped: usize,
}

impl UserBuffer {
    pub fn new(capacity: usize) -> Self {
        Self::with_mapped(capacity, capacity)
    }

    /// A buffer of `capacity` bytes of which only the first `mapped` are
    /// writable.
    pub fn with_mapped(capacity: usize, mapped: usize) -> Self {
        Self {
            data: Vec::with_capacity(mapped.min(capacity)),
            capacity,
            mapped: mapped.min(capacity),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl IoBufferWriter for UserBuffer {
    fn len(&self) -> usize {
        self.capacity - self.data.len()
    }

    fn write_slice(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > IoBufferWriter::len(self) {
            return Err(Error::FaultError);
        }

        let room = self.mapped - self.data.len();
        if data.len() > room {
            self.data.extend_from_slice(&data[..room]);
            return Err(Error::FaultError);
        }
        self.data.extend_from_slice(data);
        Ok(())
    }
}

/// Operation table of a character device.
///
/// `offset` is the per-open cursor; implementations advance it by the number
/// of bytes they transfer.
pub trait FileOperations: Send + Sync {
    fn open(&self) -> Result<()> {
        Ok(())
    }

    fn release(&self) {}

    fn read(&self, writer: &mut dyn IoBufferWriter, offset: &mut u64) -> Result<usize>;

    fn write(&self, reader: &mut dyn IoBufferReader, offset: &mut u64) -> Result<usize>;
}

/// One open of a device node.
///
/// Dropping the handle is the close; it calls the table's `release`.
pub struct OpenFile {
    node: String,
    ops: Arc<dyn FileOperations>,
    pos: u64,
}

impl OpenFile {
    /// Run the table's `open` and hand back a handle positioned at 0.
    pub(crate) fn open(node: &str, ops: Arc<dyn FileOperations>) -> Result<Self> {
        ops.open()?;
        trace!(node, "Opened.");
        Ok(Self {
            node: node.to_string(),
            ops,
            pos: 0,
        })
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Read up to `count` bytes from the cursor.
    pub fn read(&mut self, count: usize) -> Result<Vec<u8>> {
        let mut buffer = UserBuffer::new(count);
        self.read_into(&mut buffer)?;
        Ok(buffer.into_inner())
    }

    pub fn read_into(&mut self, writer: &mut dyn IoBufferWriter) -> Result<usize> {
        self.ops.read(writer, &mut self.pos)
    }

    /// Write `data` at the cursor.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.write_from(&mut UserSlice::new(data))
    }

    pub fn write_from(&mut self, reader: &mut dyn IoBufferReader) -> Result<usize> {
        self.ops.write(reader, &mut self.pos)
    }
}

impl Drop for OpenFile {
    fn drop(&mut self) {
        self.ops.release();
        trace!(node = %self.node, "Closed.");
    }
}

impl std::fmt::Debug for OpenFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenFile")
            .field("node", &self.node)
            .field("pos", &self.pos)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_slice_reads_forward() {
        let mut slice = UserSlice::new(b"hello");
        let mut out = [0u8; 3];
        slice.read_slice(&mut out).unwrap();
        assert_eq!(&out, b"hel");
        assert_eq!(IoBufferReader::len(&slice), 2);
    }

    #[test]
    fn test_user_slice_faults_on_unmapped_tail() {
        let mut slice = UserSlice::with_len(b"ab", 4);
        let mut out = [0u8; 4];
        assert!(matches!(slice.read_slice(&mut out), Err(Error::FaultError)));
        // The mapped prefix was transferred before the fault.
        assert_eq!(&out[..2], b"ab");
    }

    #[test]
    fn test_user_slice_rejects_overlong_read() {
        let mut slice = UserSlice::new(b"ab");
        let mut out = [0u8; 3];
        assert!(matches!(slice.read_slice(&mut out), Err(Error::FaultError)));
    }

    #[test]
    fn test_user_buffer_partial_write_on_fault() {
        let mut buffer = UserBuffer::with_mapped(8, 2);
        assert_eq!(IoBufferWriter::len(&buffer), 8);
        assert!(matches!(buffer.write_slice(b"xyz"), Err(Error::FaultError)));
        assert_eq!(buffer.as_bytes(), b"xy");
    }

    #[test]
    fn test_user_buffer_capacity() {
        let mut buffer = UserBuffer::new(2);
        buffer.write_slice(b"ok").unwrap();
        assert!(IoBufferWriter::is_empty(&buffer));
        assert!(buffer.write_slice(b"!").is_err());
        assert_eq!(buffer.into_inner(), b"ok");
    }
}
