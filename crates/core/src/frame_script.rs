//! Frame script player.
//!
//! A frame script is a table of 9-byte draw records in the asset store:
//!
//! ```text
//! +--------+--------+-----------+-------+------+
//! | x i16  | y i16  | image u24 | frame | mode |   big-endian
//! +--------+--------+-----------+-------+------+
//! ```
//!
//! One call to [`FrameScript::draw`] draws the records of one logical frame,
//! up to the first record whose mode carries [`DrawMode::END_FRAME`] or
//! [`DrawMode::LAST_FRAME`]. Each logical frame is shown for `hold_count + 1`
//! calls; after the last frame the script loops back to its base.

use std::io::{Read, Seek};

use crate::blit::{self, DrawMode};
use crate::display::Framebuffer;
use crate::store::cache::PageCache;

pub const RECORD_SIZE: u32 = 9;
/// Records drawn per call before giving up on finding a frame terminator.
pub const MAX_RECORDS_PER_FRAME: usize = 512;

/// One draw record of a frame script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawRecord {
    pub x: i16,
    pub y: i16,
    /// Address of the bitmap in the asset store
    pub image: u32,
    pub frame: u8,
    pub mode: DrawMode,
}

impl DrawRecord {
    pub fn parse(b: &[u8; RECORD_SIZE as usize]) -> Self {
        DrawRecord {
            x: i16::from_be_bytes([b[0], b[1]]),
            y: i16::from_be_bytes([b[2], b[3]]),
            image: u32::from_be_bytes([0, b[4], b[5], b[6]]),
            frame: b[7],
            mode: DrawMode::from_byte(b[8]),
        }
    }

    pub fn ends_frame(&self) -> bool {
        self.mode.intersects(DrawMode::END_FRAME | DrawMode::LAST_FRAME)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameScript {
    /// Address of the first record of the current logical frame
    pub cursor: u32,
    /// Address the script loops back to
    pub base: u32,
    /// Extra calls each logical frame is held for
    pub hold_count: u8,
    /// Calls the current frame has been held so far
    pub hold_index: u8,
}

impl FrameScript {
    pub fn new(address: u32, hold_count: u8) -> Self {
        FrameScript {
            cursor: address,
            base: address,
            hold_count,
            hold_index: 0,
        }
    }

    /// Restart at `address` with a new hold count.
    pub fn set(&mut self, address: u32, hold_count: u8) {
        *self = FrameScript::new(address, hold_count);
    }

    /// Draw the current logical frame and advance one tick.
    ///
    /// Returns false once the final frame of the sequence has been drawn. A
    /// record that cannot be read also returns false and leaves the state
    /// as it was.
    pub fn draw<D: Read + Seek>(&mut self, cache: &mut PageCache<D>, screen: &mut Framebuffer) -> bool {
        let mut at = self.cursor;
        let mut last_frame = false;
        let mut rec = [0u8; RECORD_SIZE as usize];

        for _ in 0..MAX_RECORDS_PER_FRAME {
            if let Err(e) = cache.read_at(at, &mut rec) {
                log::warn!("frame script record at 0x{:06X} unreadable: {}", at, e);
                return false;
            }
            let r = DrawRecord::parse(&rec);
            blit::draw_bitmap(cache, screen, r.x, r.y, r.image, r.frame, r.mode);
            at = at.wrapping_add(RECORD_SIZE);

            last_frame = r.mode.contains(DrawMode::LAST_FRAME);
            if r.ends_frame() {
                break;
            }
        }

        if self.hold_index >= self.hold_count {
            self.hold_index = 0;
            self.cursor = if last_frame { self.base } else { at };
        } else {
            self.hold_index += 1;
        }
        !last_frame
    }
}
