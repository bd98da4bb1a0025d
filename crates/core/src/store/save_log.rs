//! Append-only record log inside the 4 KB save region.
//!
//! Records are `{u16 big-endian length, payload}` packed back to back from
//! offset 0. Saving never rewrites a record in place: it appends after the
//! last record of the same size, and only when the region is exhausted is the
//! whole block erased and the log restarted. Loading walks the same chain and
//! keeps the last payload it saw.
//!
//! ```text
//! 0                                                   4094 4096
//! +------+---------+------+---------+------+----------+----+
//! | len  | payload | len  | payload | FF FF  ...  FF  | -- |
//! +------+---------+------+---------+------------------+----+
//!                                   ^ append point     reserved
//! ```
//!
//! The final two bytes are never written, so the last byte stays a reliable
//! "region initialized" probe.

use std::io::{Read, Seek, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{FxError, Result};
use crate::store::backing;

/// Size of the save region.
pub const SAVE_BLOCK_SIZE: usize = 4096;
/// Records must end at or before this offset.
pub const SAVE_LIMIT: usize = SAVE_BLOCK_SIZE - 2;
/// Granularity of raw page writes.
pub const SAVE_PAGE_SIZE: usize = 256;

const HEADER_LEN: usize = 2;

pub struct SaveLog<S> {
    io: S,
}

impl<S: Read + Write + Seek> SaveLog<S> {
    /// Wrap a save store, erasing it first if it does not hold a full region.
    pub fn open(mut io: S) -> Result<Self> {
        backing::ensure_initialized(&mut io, SAVE_BLOCK_SIZE)?;
        Ok(SaveLog { io })
    }

    pub fn get_ref(&self) -> &S {
        &self.io
    }

    pub fn into_inner(self) -> S {
        self.io
    }

    /// One byte of the region, or `None` past its end or on a failed read.
    pub fn read_byte(&mut self, offset: u32) -> Option<u8> {
        if offset as usize >= SAVE_BLOCK_SIZE {
            return None;
        }
        let mut b = [backing::ERASED];
        match backing::read_at(&mut self.io, offset as u64, &mut b) {
            Ok(1) => Some(b[0]),
            _ => None,
        }
    }

    fn read_header(&mut self, offset: usize) -> Option<u16> {
        if offset + 1 >= SAVE_BLOCK_SIZE {
            return None;
        }
        let mut b = [backing::ERASED; HEADER_LEN];
        backing::read_exact_at(&mut self.io, offset as u64, &mut b).ok()?;
        Some(u16::from_be_bytes(b))
    }

    /// Offset just past the run of `size`-byte records starting at 0.
    /// A run that would leave the region reports [`SAVE_BLOCK_SIZE`].
    fn append_point(&mut self, size: usize) -> usize {
        let mut addr = 0;
        loop {
            if addr + HEADER_LEN > SAVE_BLOCK_SIZE {
                return SAVE_BLOCK_SIZE;
            }
            if self.read_header(addr) != Some(size as u16) {
                return addr;
            }
            let next = addr + HEADER_LEN + size;
            if next > SAVE_BLOCK_SIZE {
                return SAVE_BLOCK_SIZE;
            }
            addr = next;
        }
    }

    /// Fill `buf` with the most recent record whose length equals
    /// `buf.len()`. Returns false, leaving `buf` untouched, when there is none.
    pub fn load(&mut self, buf: &mut [u8]) -> bool {
        let size = buf.len();
        if size == 0 || size > u16::MAX as usize {
            return false;
        }
        let mut addr = 0;
        let mut loaded = false;
        loop {
            if addr + HEADER_LEN > SAVE_BLOCK_SIZE {
                break;
            }
            if self.read_header(addr) != Some(size as u16) {
                break;
            }
            let next = addr + HEADER_LEN + size;
            if next > SAVE_BLOCK_SIZE {
                break;
            }
            if backing::read_exact_at(&mut self.io, (addr + HEADER_LEN) as u64, buf).is_err() {
                break;
            }
            loaded = true;
            addr = next;
        }
        loaded
    }

    /// Append `buf` as a new record, erasing the region first when the record
    /// would not fit below [`SAVE_LIMIT`].
    pub fn save(&mut self, buf: &[u8]) -> Result<()> {
        let size = buf.len();
        if size == 0 {
            return Ok(());
        }
        if HEADER_LEN + size > SAVE_LIMIT {
            return Err(FxError::RecordTooLarge(size));
        }

        let mut addr = self.append_point(size);
        if addr + HEADER_LEN + size > SAVE_LIMIT {
            log::debug!("save region full at 0x{:03X}; erasing", addr);
            self.erase()?;
            addr = 0;
        }

        let mut record = Vec::with_capacity(HEADER_LEN + size);
        record.extend_from_slice(&(size as u16).to_be_bytes());
        record.extend_from_slice(buf);
        backing::write_at(&mut self.io, addr as u64, &record)?;
        log::debug!("saved {} byte record at 0x{:03X}", size, addr);
        Ok(())
    }

    /// Return the whole region to the erased state.
    pub fn erase(&mut self) -> Result<()> {
        backing::fill(&mut self.io, backing::ERASED, SAVE_BLOCK_SIZE)
    }

    /// Raw write of up to one 256-byte page at `page * 256`, clipped to the
    /// region. Pages outside the region are ignored.
    pub fn write_page(&mut self, page: u16, buf: &[u8]) -> Result<()> {
        let off = page as usize * SAVE_PAGE_SIZE;
        if off >= SAVE_BLOCK_SIZE {
            return Ok(());
        }
        let len = buf.len().min(SAVE_PAGE_SIZE).min(SAVE_BLOCK_SIZE - off);
        backing::write_at(&mut self.io, off as u64, &buf[..len])
    }

    /// Append a typed state value, encoded with bincode.
    pub fn save_state<T: Serialize>(&mut self, state: &T) -> Result<()> {
        let bytes = bincode::serialize(state)?;
        self.save(&bytes)
    }

    /// Load the latest typed state value. The record size is the encoded
    /// size of `T::default()`, so `T` must encode to a fixed width.
    pub fn load_state<T: Serialize + DeserializeOwned + Default>(&mut self) -> Result<Option<T>> {
        let size = bincode::serialized_size(&T::default())? as usize;
        let mut buf = vec![0u8; size];
        if !self.load(&mut buf) {
            return Ok(None);
        }
        Ok(Some(bincode::deserialize(&buf)?))
    }
}
