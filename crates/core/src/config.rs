//! Cache geometry and store paths, set once before [`crate::Fx::open`].

use std::path::{Path, PathBuf};

/// Smallest page the cache will use; page sizes are rounded up to a multiple of it.
pub const PAGE_ALIGN: u32 = 512;
/// Fewest cache slots the cache will use.
pub const MIN_PAGES: u8 = 2;

pub const DEFAULT_PAGE_SIZE: u32 = 1024;
pub const DEFAULT_PAGE_COUNT: u8 = 38;
pub const DEFAULT_DATA_PATH: &str = "fxdata.bin";
pub const DEFAULT_SAVE_PATH: &str = "fxsave.bin";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FxConfig {
    /// Bytes per cache page (multiple of [`PAGE_ALIGN`])
    pub page_size: u32,
    /// Number of cache pages
    pub page_count: u8,
    /// Read-only asset blob
    pub data_path: PathBuf,
    /// Read-write save blob
    pub save_path: PathBuf,
}

impl Default for FxConfig {
    fn default() -> Self {
        FxConfig {
            page_size: DEFAULT_PAGE_SIZE,
            page_count: DEFAULT_PAGE_COUNT,
            data_path: PathBuf::from(DEFAULT_DATA_PATH),
            save_path: PathBuf::from(DEFAULT_SAVE_PATH),
        }
    }
}

impl FxConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cache geometry. Page size is clamped to at least 512 and
    /// rounded up to a 512 multiple; page count is clamped to at least 2.
    pub fn with_cache(mut self, page_size: u32, pages: u8) -> Self {
        self.page_size = align_up(page_size.max(PAGE_ALIGN), PAGE_ALIGN);
        self.page_count = pages.max(MIN_PAGES);
        self
    }

    /// Replace the store paths. Empty paths leave the current value in place.
    pub fn with_paths(mut self, data: impl AsRef<Path>, save: impl AsRef<Path>) -> Self {
        let data = data.as_ref();
        let save = save.as_ref();
        if !data.as_os_str().is_empty() {
            self.data_path = data.to_path_buf();
        }
        if !save.as_os_str().is_empty() {
            self.save_path = save.to_path_buf();
        }
        self
    }

    /// Total bytes of page memory this configuration allocates.
    pub fn cache_bytes(&self) -> usize {
        self.page_size as usize * self.page_count as usize
    }
}

/// Round `v` down to a multiple of `a`. Page sizes are 512 multiples, not
/// necessarily powers of two.
pub(crate) fn align_down(v: u32, a: u32) -> u32 {
    if a == 0 { v } else { v - v % a }
}

/// Round `v` up to a multiple of the power-of-two `a`, saturating at the
/// largest aligned value.
pub(crate) fn align_up(v: u32, a: u32) -> u32 {
    if a == 0 {
        return v;
    }
    match v.checked_add(a - 1) {
        Some(s) => s & !(a - 1),
        None => u32::MAX & !(a - 1),
    }
}
