//! Page cache over the asset blob.
//!
//! A fixed arena of `page_count` slots, each `page_size` bytes, allocated once.
//! Slots are filled on demand from the backing store and evicted oldest-first
//! by a monotonic age stamp. A small detector watches for requests that walk
//! forward one page at a time and, once it has seen enough of them, loads the
//! following page before it is asked for.
//!
//! ```text
//!   ensure_page(off)
//!        │  base = align_down(off, page_size)
//!        ├── last hit slot holds base? ──► hit
//!        ├── any slot holds base? ───────► hit
//!        └── victim = first invalid, else smallest age ──► load
//!   then: stamp age, update seq_score, maybe prefetch base + page_size
//! ```

use std::io::{Read, Seek};

use crate::config::align_down;
use crate::error::{FxError, Result};
use crate::store::backing;

/// Consecutive forward page steps needed before the next page is prefetched.
pub const PREFETCH_THRESHOLD: u8 = 3;

/// Bookkeeping for one cache slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    /// Absolute offset of the first byte, aligned to the page size
    pub base: u32,
    /// Bytes actually read; short for the final page of the blob
    pub len: u32,
    /// Logical clock value of the last access
    pub age: u64,
    pub valid: bool,
}

impl Page {
    fn holds(&self, base: u32) -> bool {
        self.valid && self.base == base
    }
}

/// Access counters, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub prefetches: u64,
    pub evictions: u64,
}

pub struct PageCache<D> {
    source: D,
    page_size: u32,
    /// `page_count * page_size` bytes; slot `i` owns `[i * page_size, (i + 1) * page_size)`
    mem: Vec<u8>,
    pages: Vec<Page>,
    age_ctr: u64,
    last_hit: Option<usize>,
    last_base: u32,
    seq_score: u8,
    stats: CacheStats,
}

impl<D: Read + Seek> PageCache<D> {
    /// Allocate the page arena. Allocation failure is reported, not retried.
    pub fn new(source: D, page_size: u32, page_count: u8) -> Result<Self> {
        let page_size = page_size.max(1);
        let page_count = page_count.max(1) as usize;
        let bytes = page_size as usize * page_count;

        let mut mem = Vec::new();
        mem.try_reserve_exact(bytes)
            .map_err(|_| FxError::OutOfMemory { bytes })?;
        mem.resize(bytes, backing::ERASED);

        log::debug!("page cache: {} pages x {} bytes", page_count, page_size);
        Ok(PageCache {
            source,
            page_size,
            mem,
            pages: vec![Page::default(); page_count],
            age_ctr: 1,
            last_hit: None,
            last_base: 0,
            seq_score: 0,
            stats: CacheStats::default(),
        })
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Current run length of forward page steps (saturates at 255).
    pub fn seq_score(&self) -> u8 {
        self.seq_score
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// The backing store, for reads that must not disturb the cache.
    pub(crate) fn source_mut(&mut self) -> &mut D {
        &mut self.source
    }

    /// Slot bookkeeping, if `idx` names a slot.
    pub fn page_info(&self, idx: usize) -> Option<Page> {
        self.pages.get(idx).copied()
    }

    /// The valid bytes of slot `idx`; empty for an invalid or unknown slot.
    pub fn page(&self, idx: usize) -> &[u8] {
        match self.pages.get(idx) {
            Some(p) if p.valid => {
                let start = idx * self.page_size as usize;
                &self.mem[start..start + p.len as usize]
            }
            _ => &[],
        }
    }

    /// Whether the page covering `offset` is cached. Does not touch ages.
    pub fn contains(&self, offset: u32) -> bool {
        let base = align_down(offset, self.page_size);
        self.pages.iter().any(|p| p.holds(base))
    }

    /// Drop every cached page and reset the sequence detector.
    pub fn invalidate(&mut self) {
        for p in self.pages.iter_mut() {
            *p = Page::default();
        }
        self.last_hit = None;
        self.last_base = 0;
        self.seq_score = 0;
    }

    /// Make the page covering `offset` resident and return its slot index.
    ///
    /// Fails only when the backing store yields no bytes at the page base.
    pub fn ensure_page(&mut self, offset: u32) -> Result<usize> {
        let base = align_down(offset, self.page_size);

        let idx = match self.find(base) {
            Some(i) => {
                self.pages[i].age = self.next_age();
                self.stats.hits += 1;
                i
            }
            None => {
                let victim = self.pick_victim();
                self.load_page(base, victim)?;
                self.stats.misses += 1;
                victim
            }
        };

        self.track_sequence(base);
        self.maybe_prefetch(base);
        Ok(idx)
    }

    /// Copy `buf.len()` bytes starting at `address`, crossing pages as needed.
    pub fn read_at(&mut self, address: u32, buf: &mut [u8]) -> Result<()> {
        let mut abs = address;
        let mut done = 0;
        while done < buf.len() {
            let idx = self.ensure_page(abs)?;
            let page = self.pages[idx];
            let off = (abs - page.base) as usize;
            if off >= page.len as usize {
                return Err(FxError::NoData(abs));
            }
            let chunk = (buf.len() - done).min(page.len as usize - off);
            let start = idx * self.page_size as usize + off;
            buf[done..done + chunk].copy_from_slice(&self.mem[start..start + chunk]);
            done += chunk;
            abs = abs.checked_add(chunk as u32).ok_or(FxError::NoData(abs))?;
        }
        Ok(())
    }

    /// Locate `len` bytes at `address` inside a single cached page.
    /// Returns the slot index and the byte offset within it.
    pub fn span_at(&mut self, address: u32, len: usize) -> Option<(usize, usize)> {
        if len == 0 {
            return None;
        }
        let idx = self.ensure_page(address).ok()?;
        let page = self.pages[idx];
        let off = (address - page.base) as usize;
        if off >= page.len as usize || page.len as usize - off < len {
            return None;
        }
        Some((idx, off))
    }

    /// Borrow `len` bytes at `address` straight out of the cache, when they
    /// sit inside one page.
    pub fn slice_at(&mut self, address: u32, len: usize) -> Option<&[u8]> {
        let (idx, off) = self.span_at(address, len)?;
        Some(&self.page(idx)[off..off + len])
    }

    /// Load every page overlapping `[address, address + len)`.
    pub fn warm_up(&mut self, address: u32, len: usize) {
        let end = address as u64 + len as u64;
        let mut p = align_down(address, self.page_size) as u64;
        while p < end && p <= u32::MAX as u64 {
            if self.ensure_page(p as u32).is_err() {
                break;
            }
            p += self.page_size as u64;
        }
    }

    fn next_age(&mut self) -> u64 {
        let a = self.age_ctr;
        self.age_ctr += 1;
        a
    }

    /// Find the slot holding `base`: last hit first, then a linear scan.
    fn find(&mut self, base: u32) -> Option<usize> {
        if let Some(i) = self.last_hit {
            if self.pages[i].holds(base) {
                return Some(i);
            }
        }
        let i = self.pages.iter().position(|p| p.holds(base))?;
        self.last_hit = Some(i);
        Some(i)
    }

    /// First invalid slot, otherwise the slot with the smallest age
    /// (lowest index on ties).
    fn pick_victim(&self) -> usize {
        let mut victim = 0;
        let mut best_age = u64::MAX;
        for (i, p) in self.pages.iter().enumerate() {
            if !p.valid {
                return i;
            }
            if p.age < best_age {
                best_age = p.age;
                victim = i;
            }
        }
        victim
    }

    /// Fill slot `idx` with the page at `base`. When nothing is read the
    /// slot keeps whatever page it held.
    fn load_page(&mut self, base: u32, idx: usize) -> Result<()> {
        let old = self.pages[idx];
        let start = idx * self.page_size as usize;
        let end = start + self.page_size as usize;
        let n = match backing::read_at(&mut self.source, base as u64, &mut self.mem[start..end]) {
            Ok(n) => n,
            Err(e) => {
                // The reader may have written part of the slot before failing.
                self.pages[idx].valid = false;
                if self.last_hit == Some(idx) {
                    self.last_hit = None;
                }
                return Err(e.into());
            }
        };
        if n == 0 {
            return Err(FxError::NoData(base));
        }

        if old.valid {
            self.stats.evictions += 1;
            log::debug!("evict page 0x{:06X} from slot {}", old.base, idx);
        }
        log::debug!("load page 0x{:06X} ({} bytes) into slot {}", base, n, idx);

        self.pages[idx] = Page {
            base,
            len: n as u32,
            age: self.next_age(),
            valid: true,
        };
        self.last_hit = Some(idx);
        Ok(())
    }

    fn track_sequence(&mut self, base: u32) {
        if Some(base) == self.last_base.checked_add(self.page_size) {
            self.seq_score = self.seq_score.saturating_add(1);
        } else {
            self.seq_score = 0;
        }
        self.last_base = base;
    }

    fn maybe_prefetch(&mut self, base: u32) {
        if self.pages.len() < 2 || self.seq_score < PREFETCH_THRESHOLD {
            return;
        }
        let next = match base.checked_add(self.page_size) {
            Some(n) => n,
            None => return,
        };
        if self.find(next).is_some() {
            return;
        }
        let victim = self.pick_victim();
        // Never evict the page that was just requested.
        if self.pages[victim].holds(base) {
            return;
        }
        match self.load_page(next, victim) {
            Ok(()) => {
                self.stats.prefetches += 1;
                log::debug!("prefetch page 0x{:06X} (seq_score {})", next, self.seq_score);
            }
            Err(e) => log::trace!("prefetch of 0x{:06X} skipped: {}", next, e),
        }
    }
}
