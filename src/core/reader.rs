/*!
 * Seekable reads over ranged GETs
 */

use bytes::Bytes;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use super::engine::TransferEngine;
use crate::error::Result;
use crate::store::ObjectKey;

/// Bytes fetched per request when reading sequentially
pub const READ_AHEAD: u64 = 64 * 1024;

/// `Read + Seek` view of a stored object
pub struct ObjectReader {
    engine: Arc<TransferEngine>,
    key: ObjectKey,
    size: u64,
    position: u64,
    window_start: u64,
    window: Bytes,
}

impl ObjectReader {
    pub fn new(engine: Arc<TransferEngine>, key: ObjectKey, size: u64) -> Self {
        Self {
            engine,
            key,
            size,
            position: 0,
            window_start: 0,
            window: Bytes::new(),
        }
    }

    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read up to `length` bytes at `offset` without moving the cursor.
    /// Returns fewer bytes near the end of the object and none past it.
    pub fn read_at(&self, offset: u64, length: u64) -> Result<Bytes> {
        if offset >= self.size || length == 0 {
            return Ok(Bytes::new());
        }
        let length = length.min(self.size - offset);
        self.engine.read_range(&self.key, offset, length)
    }

    fn window_contains(&self, position: u64) -> bool {
        position >= self.window_start && position < self.window_start + self.window.len() as u64
    }
}

impl Read for ObjectReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.position >= self.size {
            return Ok(0);
        }

        if !self.window_contains(self.position) {
            let want = (buf.len() as u64).max(READ_AHEAD);
            self.window = self
                .read_at(self.position, want)
                .map_err(io::Error::other)?;
            self.window_start = self.position;
            if self.window.is_empty() {
                return Ok(0);
            }
        }

        let start = (self.position - self.window_start) as usize;
        let available = &self.window[start..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for ObjectReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.size.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        match target {
            Some(position) => {
                self.position = position;
                Ok(position)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative position",
            )),
        }
    }
}
