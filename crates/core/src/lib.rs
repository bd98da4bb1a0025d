//! # arduboy-fx
//!
//! File-backed emulation of the Arduboy FX serial flash chip, as seen by game
//! code: a read-only asset blob behind a bounded page cache, a small save
//! region with append-only record semantics, and the bitmap blitter and frame
//! script player that draw straight out of the asset store.
//!
//! ## Architecture
//!
//! - [`Fx`] — Owned context tying the stores, the cache and the transfer state together
//! - [`FxConfig`] — Cache geometry and store paths
//! - [`store::cache`] — Page cache with oldest-first eviction and sequential prefetch
//! - [`store::stream`] — Pending-byte read protocol (`seek` / `read_pending_*` / `read_end`)
//! - [`store::save_log`] — 4 KB append-only save record log
//! - [`blit`] — 1bpp bitmap blitter with draw modes
//! - [`frame_script`] — Tick-driven draw record player
//! - [`display`] — 128×64 page-layout screen buffer
//! - [`png`] — Screenshot encoder
//!
//! ## Failure model
//!
//! Opening fails loudly. After that, reads are fail-soft: anything that
//! cannot be fetched reads as erased flash (`0xFF`), blits stop early, and
//! save writes are best-effort.

pub mod blit;
pub mod config;
pub mod display;
pub mod error;
pub mod frame_script;
pub mod png;
pub mod store;

use std::fs::File;
use std::io::{Read, Seek, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

pub use blit::DrawMode;
pub use config::FxConfig;
pub use display::{Framebuffer, SCREEN_HEIGHT, SCREEN_WIDTH};
pub use error::{FxError, Result};
pub use frame_script::FrameScript;
pub use store::{CacheStats, Domain, PageCache, SaveLog, Transfer, ERASED, SAVE_BLOCK_SIZE};

use store::stream::Window;

/// An open FX context over an asset store `D` and a save store `S`.
pub struct Fx<D = File, S = File> {
    config: FxConfig,
    pub(crate) cache: PageCache<D>,
    pub(crate) save: SaveLog<S>,
    pub(crate) window: Window,
    pub(crate) transfer: Transfer,
    script: FrameScript,
}

impl Fx<File, File> {
    /// Open the asset and save files named by `config`. The save file is
    /// created and erased if it does not hold a full region yet.
    pub fn open(config: FxConfig) -> Result<Self> {
        let data = store::backing::open_asset(&config.data_path)?;
        let save = store::backing::open_or_create_save(&config.save_path, SAVE_BLOCK_SIZE)?;
        log::info!(
            "opened {} (save {})",
            config.data_path.display(),
            config.save_path.display()
        );
        Self::from_parts(config, data, save)
    }
}

impl<D: Read + Seek, S: Read + Write + Seek> Fx<D, S> {
    /// Build a context over already-open stores.
    pub fn from_parts(config: FxConfig, data: D, save: S) -> Result<Self> {
        let save = SaveLog::open(save)?;
        let cache = PageCache::new(data, config.page_size, config.page_count)?;
        Ok(Fx {
            config,
            cache,
            save,
            window: Window::default(),
            transfer: Transfer::default(),
            script: FrameScript::default(),
        })
    }

    /// Release the stores and the cache.
    pub fn close(self) {
        let s = self.cache.stats();
        log::info!(
            "closing: {} hits, {} misses, {} prefetches, {} evictions",
            s.hits,
            s.misses,
            s.prefetches,
            s.evictions
        );
    }

    pub fn config(&self) -> &FxConfig {
        &self.config
    }

    /// Whether the asset store has a readable first byte. Reads the store
    /// directly, leaving the cache and its sequence detector alone.
    pub fn detect(&mut self) -> bool {
        let mut b = [0u8; 1];
        matches!(store::backing::read_at(self.cache.source_mut(), 0, &mut b), Ok(1))
    }

    /// Writes are synchronous, so there is never anything to flush.
    pub fn commit(&mut self) {}

    /// Writes are synchronous, so the store is never busy.
    pub fn wait_while_busy(&mut self) {}

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Load every asset page overlapping `[address, address + len)`.
    pub fn warm_up_data(&mut self, address: u32, len: usize) {
        self.cache.warm_up(address, len);
    }

    /// Copy asset bytes through the cache without touching the transfer.
    pub fn read_data_at(&mut self, address: u32, buf: &mut [u8]) -> Result<()> {
        self.cache.read_at(address, buf)
    }

    // Save region

    /// Fill `buf` with the most recent save record of its length.
    pub fn load_game_state(&mut self, buf: &mut [u8]) -> bool {
        self.save.load(buf)
    }

    /// Append `buf` as a save record. Write failures are logged and dropped.
    pub fn save_game_state(&mut self, buf: &[u8]) {
        if let Err(e) = self.save.save(buf) {
            log::warn!("save of {} bytes dropped: {}", buf.len(), e);
        }
    }

    pub fn erase_save_block(&mut self) {
        if let Err(e) = self.save.erase() {
            log::warn!("save erase dropped: {}", e);
        }
    }

    pub fn write_save_page(&mut self, page: u16, buf: &[u8]) {
        if let Err(e) = self.save.write_page(page, buf) {
            log::warn!("write of save page {} dropped: {}", page, e);
        }
    }

    /// Append a typed state value as a save record.
    pub fn save_state<T: Serialize>(&mut self, state: &T) -> Result<()> {
        self.save.save_state(state)
    }

    /// Most recent typed state value, if one was saved.
    pub fn load_state<T: Serialize + DeserializeOwned + Default>(&mut self) -> Result<Option<T>> {
        self.save.load_state()
    }

    // Drawing

    pub fn draw_bitmap(&mut self, screen: &mut Framebuffer, x: i16, y: i16, address: u32, frame: u8, mode: DrawMode) {
        blit::draw_bitmap(&mut self.cache, screen, x, y, address, frame, mode);
    }

    /// Start the frame script at `address`, holding each frame for
    /// `hold_count` extra ticks.
    pub fn set_frame(&mut self, address: u32, hold_count: u8) {
        self.script.set(address, hold_count);
    }

    /// Draw one tick of the frame script. False once the last frame was drawn.
    pub fn draw_frame(&mut self, screen: &mut Framebuffer) -> bool {
        self.script.draw(&mut self.cache, screen)
    }

    /// Draw the single frame at `address`.
    pub fn draw_frame_at(&mut self, screen: &mut Framebuffer, address: u32) -> bool {
        self.set_frame(address, 0);
        self.draw_frame(screen)
    }

    pub fn frame_script(&self) -> FrameScript {
        self.script
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Cursor;

    fn write_asset(dir: &std::path::Path, bytes: &[u8]) -> FxConfig {
        let data = dir.join("fxdata.bin");
        std::fs::write(&data, bytes).unwrap();
        FxConfig::new()
            .with_cache(512, 4)
            .with_paths(&data, dir.join("fxsave.bin"))
    }

    #[test]
    fn test_open_missing_asset() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = FxConfig::new().with_paths(dir.path().join("nope.bin"), dir.path().join("s.bin"));
        assert!(matches!(Fx::open(cfg), Err(FxError::NotFound(_))));
        assert!(!dir.path().join("s.bin").exists(), "save untouched when the asset is missing");
    }

    #[test]
    fn test_open_creates_save_and_reads() {
        let dir = tempfile::tempdir().unwrap();
        let asset: Vec<u8> = (0..3000u32).map(|i| (i % 253) as u8).collect();
        let cfg = write_asset(dir.path(), &asset);

        let mut fx = Fx::open(cfg.clone()).unwrap();
        assert!(fx.detect());
        let mut buf = [0u8; 700];
        fx.read_data_bytes(1000, &mut buf);
        assert_eq!(&buf[..], &asset[1000..1700]);
        fx.save_game_state(&[1, 2, 3]);
        fx.close();

        let save = std::fs::read(&cfg.save_path).unwrap();
        assert_eq!(save.len(), SAVE_BLOCK_SIZE);
        assert_eq!(&save[..5], &[0x00, 0x03, 1, 2, 3]);
        assert!(save[5..].iter().all(|&b| b == 0xFF));

        // Saves survive reopening.
        let mut fx = Fx::open(cfg).unwrap();
        let mut out = [0u8; 3];
        assert!(fx.load_game_state(&mut out));
        assert_eq!(out, [1, 2, 3]);
    }

    #[test]
    fn test_detect_empty_asset() {
        let mut fx = Fx::from_parts(FxConfig::new(), Cursor::new(Vec::new()), Cursor::new(Vec::new())).unwrap();
        assert!(!fx.detect());
        fx.seek_data(0);
        assert_eq!(fx.read_end(), 0xFF);
    }

    #[test]
    fn test_detect_leaves_cache_alone() {
        let cfg = FxConfig::new().with_cache(1024, 4);
        let mut fx = Fx::from_parts(cfg, Cursor::new(vec![0u8; 8192]), Cursor::new(Vec::new())).unwrap();
        for base in [0u32, 1024, 2048] {
            fx.cache.ensure_page(base).unwrap();
        }
        let before = fx.cache_stats();
        assert!(fx.detect());
        assert_eq!(fx.cache.seq_score(), 2);
        assert_eq!(fx.cache_stats(), before);

        // The scan carries on and the prefetch still fires.
        fx.cache.ensure_page(3072).unwrap();
        assert!(fx.cache.contains(4096));
    }

    #[test]
    fn test_save_page_and_erase() {
        let mut fx = Fx::from_parts(FxConfig::new(), Cursor::new(vec![0u8; 16]), Cursor::new(Vec::new())).unwrap();
        fx.write_save_page(1, &[0x00, 0x01, 0x77]);
        let mut b = [0u8; 3];
        fx.read_save_bytes(256, &mut b);
        assert_eq!(b, [0x00, 0x01, 0x77]);

        fx.erase_save_block();
        fx.commit();
        fx.wait_while_busy();
        fx.read_save_bytes(256, &mut b);
        assert_eq!(b, [0xFF; 3]);
    }

    #[test]
    fn test_oversized_save_is_dropped() {
        let mut fx = Fx::from_parts(FxConfig::new(), Cursor::new(vec![0u8; 16]), Cursor::new(Vec::new())).unwrap();
        fx.save_game_state(&[0xAB; 5000]);
        let mut b = [0u8; 2];
        fx.read_save_bytes(0, &mut b);
        assert_eq!(b, [0xFF, 0xFF]);
    }

    #[derive(Serialize, Deserialize, Default, Debug, PartialEq)]
    struct Settings {
        volume: u8,
        best: u16,
    }

    #[test]
    fn test_typed_state() {
        let mut fx = Fx::from_parts(FxConfig::new(), Cursor::new(vec![0u8; 16]), Cursor::new(Vec::new())).unwrap();
        assert_eq!(fx.load_state::<Settings>().unwrap(), None);
        fx.save_state(&Settings { volume: 3, best: 900 }).unwrap();
        assert_eq!(fx.load_state::<Settings>().unwrap(), Some(Settings { volume: 3, best: 900 }));
    }

    #[test]
    fn test_blit_does_not_disturb_transfer() {
        let mut asset = vec![0u8; 2048];
        asset[..5].copy_from_slice(&[0, 1, 0, 8, 0xFF]);
        for (i, b) in asset[1500..1600].iter_mut().enumerate() {
            *b = i as u8;
        }
        let cfg = FxConfig::new().with_cache(512, 2);
        let mut fx = Fx::from_parts(cfg, Cursor::new(asset), Cursor::new(Vec::new())).unwrap();

        fx.seek_data(1500);
        assert_eq!(fx.read_pending_u8(), 0);
        let mut fb = Framebuffer::new();
        fx.draw_bitmap(&mut fb, 4, 0, 0, 0, DrawMode::NORMAL);
        assert_eq!(fb.lit_count(), 8);
        assert_eq!(fx.read_pending_u8(), 1);
        assert_eq!(fx.read_end(), 2);
    }

    #[test]
    fn test_draw_frame_at() {
        let mut asset = Vec::new();
        asset.extend_from_slice(&[0, 10, 0, 0, 0, 0, 32, 0, DrawMode::NORMAL_LAST.bits()]);
        asset.resize(32, 0);
        asset.extend_from_slice(&[0, 2, 0, 8, 0x01, 0x80]);
        let mut fx = Fx::from_parts(FxConfig::new(), Cursor::new(asset), Cursor::new(Vec::new())).unwrap();

        let mut fb = Framebuffer::new();
        assert!(!fx.draw_frame_at(&mut fb, 0));
        assert!(fb.pixel(10, 0));
        assert!(fb.pixel(11, 7));
        assert_eq!(fb.lit_count(), 2);
        assert_eq!(fx.frame_script().cursor, 0);
    }
}
