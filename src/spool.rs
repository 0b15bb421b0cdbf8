//! Size-capped scratch buffer that spills to a temporary file
//!
//! A spool keeps up to `memory_bytes` in memory and moves its content to an
//! anonymous temp file beyond that. Writes past `max_bytes` fail with
//! `PayloadTooLarge`. The backing storage is released when the spool drops.

use std::io::{self, Read, Seek, SeekFrom, Write};

use tempfile::SpooledTempFile;

use crate::config::LimitsConfig;
use crate::error::{WorldBridgeError, Result};

pub struct BoundedSpool {
    inner: SpooledTempFile,
    max_bytes: u64,
    position: u64,
    len: u64,
}

impl std::fmt::Debug for BoundedSpool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedSpool")
            .field("max_bytes", &self.max_bytes)
            .field("len", &self.len)
            .field("spilled", &self.is_spilled())
            .finish()
    }
}

impl BoundedSpool {
    pub fn acquire(max_bytes: usize, memory_bytes: usize) -> Self {
        Self {
            inner: SpooledTempFile::new(memory_bytes.min(max_bytes)),
            max_bytes: max_bytes as u64,
            position: 0,
            len: 0,
        }
    }

    pub fn from_limits(limits: &LimitsConfig) -> Self {
        Self::acquire(limits.max_payload_bytes, limits.spool_memory_bytes)
    }

    /// Spool pre-filled with `bytes` and rewound
    pub fn with_contents(limits: &LimitsConfig, bytes: &[u8]) -> Result<Self> {
        let mut spool = Self::from_limits(limits);
        spool.write_all(bytes)?;
        spool.rewind()?;
        Ok(spool)
    }

    /// Whether the content has moved to disk
    pub fn is_spilled(&self) -> bool {
        self.inner.is_rolled()
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn rewind(&mut self) -> Result<()> {
        self.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    /// Read back the whole content from the start
    pub fn read_to_vec(&mut self) -> Result<Vec<u8>> {
        let capacity = usize::try_from(self.len).map_err(|_| {
            WorldBridgeError::payload_too_large(format!("Spool of {} bytes does not fit in memory", self.len))
        })?;
        self.rewind()?;
        let mut out = Vec::with_capacity(capacity);
        self.read_to_end(&mut out)?;
        Ok(out)
    }
}

impl Write for BoundedSpool {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let end = self.position.saturating_add(buf.len() as u64);
        if end > self.max_bytes {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                WorldBridgeError::payload_too_large(format!(
                    "Spool limit of {} bytes exceeded",
                    self.max_bytes
                )),
            ));
        }
        let written = self.inner.write(buf)?;
        self.position += written as u64;
        self.len = self.len.max(self.position);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Read for BoundedSpool {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.position += read as u64;
        Ok(read)
    }
}

impl Seek for BoundedSpool {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.position = self.inner.seek(pos)?;
        Ok(self.position)
    }
}
