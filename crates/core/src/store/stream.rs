//! Streaming cursor and the pending-byte read protocol.
//!
//! On the FX cart, a read command clocks one byte out of the flash for every
//! byte clocked in, so the byte a program receives was requested one transfer
//! earlier. Games are written against that pipeline: `seek` fills it, every
//! `read_pending_*` hands out the byte in flight and requests the next, and
//! `read_end` hands out the last byte without requesting another.
//!
//! ```text
//! seek(a)          pending = [a]          cursor = a+1
//! read_pending()   -> [a]   pending=[a+1] cursor = a+2
//! read_pending()   -> [a+1] pending=[a+2] cursor = a+3
//! read_end()       -> [a+2] pending=none  cursor = a+3
//! ```
//!
//! Data reads go through a [`Window`] onto one cached page; save reads go
//! straight to the save region. Every read is fail-soft: anything that cannot
//! be fetched reads as [`ERASED`].

use std::io::{Read, Seek, Write};

use crate::error::{FxError, Result};
use crate::store::backing::ERASED;
use crate::store::cache::PageCache;
use crate::Fx;

/// Which store the active transfer reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Domain {
    #[default]
    Data,
    Save,
}

/// State of the single in-flight transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Transfer {
    pub domain: Domain,
    /// Address of the next byte to fetch; the pending byte sits at `cursor - 1`
    pub cursor: u32,
    /// Byte already fetched but not yet handed out
    pub pending: Option<u8>,
}

/// A read window onto one cached page.
#[derive(Debug, Clone, Copy, Default)]
pub struct Window {
    page: usize,
    base: u32,
    len: u32,
    pos: u32,
    valid: bool,
}

impl Window {
    pub fn reset(&mut self) {
        *self = Window::default();
    }

    pub fn position(&self) -> u32 {
        self.pos
    }

    fn covers(&self, pos: u32) -> bool {
        self.valid && pos >= self.base && pos - self.base < self.len
    }

    /// The slot may have been reloaded behind our back by another cache user.
    fn still_bound<D: Read + Seek>(&self, cache: &PageCache<D>) -> bool {
        cache
            .page_info(self.page)
            .map_or(false, |p| p.valid && p.base == self.base && p.len == self.len)
    }

    /// Point the window at `pos`, rebinding to another page if needed.
    pub fn ensure_absolute<D: Read + Seek>(&mut self, cache: &mut PageCache<D>, pos: u32) -> Result<()> {
        if self.covers(pos) && self.still_bound(cache) {
            self.pos = pos;
            return Ok(());
        }
        let idx = cache.ensure_page(pos)?;
        let page = cache.page_info(idx).ok_or(FxError::NoData(pos))?;
        log::trace!("stream window -> slot {} [0x{:06X}, +{})", idx, page.base, page.len);
        *self = Window {
            page: idx,
            base: page.base,
            len: page.len,
            pos,
            valid: true,
        };
        Ok(())
    }

    /// The byte at the window position, advancing past it. `None` when the
    /// position lies beyond the asset content.
    pub fn read_byte_fast<D: Read + Seek>(&mut self, cache: &mut PageCache<D>) -> Option<u8> {
        if !(self.covers(self.pos) && self.still_bound(cache)) {
            self.valid = false;
            self.ensure_absolute(cache, self.pos).ok()?;
        }
        let idx = self.pos.checked_sub(self.base)? as usize;
        let b = *cache.page(self.page).get(idx)?;
        self.pos = self.pos.wrapping_add(1);
        Some(b)
    }
}

impl<D: Read + Seek, S: Read + Write + Seek> Fx<D, S> {
    /// Snapshot of the in-flight transfer.
    pub fn transfer(&self) -> Transfer {
        self.transfer
    }

    /// Fetch the byte under the cursor in the active domain and advance.
    fn fetch(&mut self) -> u8 {
        let pos = self.transfer.cursor;
        let v = match self.transfer.domain {
            Domain::Data => {
                let window = &mut self.window;
                let cache = &mut self.cache;
                window
                    .ensure_absolute(cache, pos)
                    .ok()
                    .and_then(|_| window.read_byte_fast(cache))
            }
            Domain::Save => self.save.read_byte(pos),
        };
        self.transfer.cursor = pos.wrapping_add(1);
        v.unwrap_or(ERASED)
    }

    /// Restart the pipeline at the current cursor.
    fn prime(&mut self) -> u8 {
        if self.transfer.domain == Domain::Data {
            self.window.reset();
        }
        self.fetch()
    }

    /// Begin a transfer from the asset store at `address`.
    pub fn seek_data(&mut self, address: u32) {
        self.transfer.domain = Domain::Data;
        self.transfer.cursor = address;
        self.transfer.pending = Some(self.prime());
    }

    /// Seek to element `index` of a table at `address`, then `offset` bytes
    /// into it. An `element_size` of 0 means a 256-byte stride.
    pub fn seek_data_array(&mut self, address: u32, index: u8, offset: u8, element_size: u8) {
        let stride = if element_size == 0 { 256 } else { element_size as u32 };
        let add = index as u32 * stride + offset as u32;
        self.seek_data(address.wrapping_add(add));
    }

    /// Begin a transfer from the save region at `address`.
    pub fn seek_save(&mut self, address: u32) {
        self.transfer.domain = Domain::Save;
        self.transfer.cursor = address;
        self.transfer.pending = Some(self.prime());
    }

    /// Hand out the pending byte and fetch the next one.
    pub fn read_pending_u8(&mut self) -> u8 {
        let out = match self.transfer.pending {
            Some(b) => b,
            None => self.prime(),
        };
        self.transfer.pending = Some(self.fetch());
        out
    }

    /// Hand out the pending byte and end the transfer.
    pub fn read_end(&mut self) -> u8 {
        self.transfer.pending.take().unwrap_or(ERASED)
    }

    /// Same as [`Self::read_end`]: the pending byte, ending the transfer.
    pub fn read_pending_last_u8(&mut self) -> u8 {
        self.read_end()
    }

    /// Big-endian value of `n` bytes; the final byte ends the transfer when
    /// `last` is set.
    fn read_be(&mut self, n: usize, last: bool) -> u32 {
        let mut v = 0u32;
        for i in 0..n {
            let b = if last && i + 1 == n { self.read_end() } else { self.read_pending_u8() };
            v = (v << 8) | b as u32;
        }
        v
    }

    /// Big-endian u16; the transfer stays open.
    pub fn read_pending_u16(&mut self) -> u16 {
        self.read_be(2, false) as u16
    }

    /// Big-endian u16 that ends the transfer.
    pub fn read_pending_last_u16(&mut self) -> u16 {
        self.read_be(2, true) as u16
    }

    /// Big-endian 24-bit value; the transfer stays open.
    pub fn read_pending_u24(&mut self) -> u32 {
        self.read_be(3, false)
    }

    /// Big-endian 24-bit value that ends the transfer.
    pub fn read_pending_last_u24(&mut self) -> u32 {
        self.read_be(3, true)
    }

    /// Big-endian u32; the transfer stays open.
    pub fn read_pending_u32(&mut self) -> u32 {
        self.read_be(4, false)
    }

    /// Big-endian u32 that ends the transfer.
    pub fn read_pending_last_u32(&mut self) -> u32 {
        self.read_be(4, true)
    }

    /// Fill `buf` with pending reads; the transfer stays open.
    pub fn read_bytes(&mut self, buf: &mut [u8]) {
        for b in buf.iter_mut() {
            *b = self.read_pending_u8();
        }
    }

    /// Fill `buf` and end the transfer with its last byte.
    pub fn read_bytes_end(&mut self, buf: &mut [u8]) {
        if let Some((last, head)) = buf.split_last_mut() {
            self.read_bytes(head);
            *last = self.read_end();
        }
    }

    /// Fill `buf` from the asset store at `address` as one complete transfer.
    pub fn read_data_bytes(&mut self, address: u32, buf: &mut [u8]) {
        self.seek_data(address);
        self.read_bytes_end(buf);
    }

    /// Fill `buf` from the save region at `address` as one complete transfer.
    pub fn read_save_bytes(&mut self, address: u32, buf: &mut [u8]) {
        self.seek_save(address);
        self.read_bytes_end(buf);
    }

    /// Fill `buf` from element `index` of a table, as one complete transfer.
    pub fn read_data_array(&mut self, address: u32, index: u8, offset: u8, element_size: u8, buf: &mut [u8]) {
        self.seek_data_array(address, index, offset, element_size);
        self.read_bytes_end(buf);
    }

    /// Byte `index` of a byte table; ends the transfer.
    pub fn read_indexed_u8(&mut self, address: u32, index: u8) -> u8 {
        self.seek_data_array(address, index, 0, 1);
        self.read_end()
    }

    /// Element `index` of a big-endian u16 table; ends the transfer.
    pub fn read_indexed_u16(&mut self, address: u32, index: u8) -> u16 {
        self.seek_data_array(address, index, 0, 2);
        self.read_pending_last_u16()
    }

    /// Element `index` of a big-endian 24-bit table; ends the transfer.
    pub fn read_indexed_u24(&mut self, address: u32, index: u8) -> u32 {
        self.seek_data_array(address, index, 0, 3);
        self.read_pending_last_u24()
    }

    /// Element `index` of a big-endian u32 table; ends the transfer.
    pub fn read_indexed_u32(&mut self, address: u32, index: u8) -> u32 {
        self.seek_data_array(address, index, 0, 4);
        self.read_pending_last_u32()
    }
}
