//! 1bpp bitmap blitter.
//!
//! Bitmaps in the asset store are `{u16 BE width, u16 BE height, pixels}`.
//! Pixel data is stored in display-page order: each source row is `width`
//! bytes, each byte a vertical strip of 8 pixels, `ceil(height / 8)` rows per
//! frame and frames back to back. Masked bitmaps interleave a mask byte after
//! every pixel byte, doubling the stride.
//!
//! A bitmap drawn at a `y` that is not a multiple of 8 straddles two screen
//! pages, so every source byte is widened to 16 bits and written to the page
//! it lands in plus the one below:
//!
//! ```text
//!   y & 7 = 3          bitmap byte b  ->  (b << 3) as u16
//!   page r   : bits 3..7  <- b bits 0..4     (low byte)
//!   page r+1 : bits 0..2  <- b bits 5..7     (high byte, "extra row")
//! ```
//!
//! Each screen byte is combined as `((bits ^ screen) & mask) ^ screen`,
//! which copies `bits` where `mask` is set and keeps the screen elsewhere.

use std::io::{Read, Seek};

use crate::display::{Framebuffer, SCREEN_HEIGHT, SCREEN_PAGES, SCREEN_WIDTH};
use crate::store::cache::PageCache;

/// Width and height prefix of every bitmap.
pub const BITMAP_HEADER_LEN: u32 = 4;

bitflags::bitflags! {
    /// How bitmap and mask bytes combine with the screen.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DrawMode: u8 {
        /// The bitmap is its own mask: only lit pixels are drawn
        const WHITE_BLACK = 1 << 0;
        /// Write bits without XOR against the screen
        const INVERT = 1 << 1;
        /// Force every drawn pixel off
        const BLACK = 1 << 2;
        /// XOR bitmap bytes with the row mask before drawing
        const REVERSE_BLACK = 1 << 3;
        /// Pixel bytes are interleaved with mask bytes
        const MASKED = 1 << 4;
        /// Mirror horizontally
        const FLIP = 1 << 5;
        /// Frame script: last record of a logical frame
        const END_FRAME = 1 << 6;
        /// Frame script: last record of the whole sequence
        const LAST_FRAME = 1 << 7;
    }
}

impl DrawMode {
    pub const NORMAL: Self = Self::empty();
    pub const WHITE: Self = Self::WHITE_BLACK;
    pub const NORMAL_END: Self = Self::END_FRAME;
    pub const NORMAL_LAST: Self = Self::LAST_FRAME;
    pub const MASKED_END: Self = Self::MASKED.union(Self::END_FRAME);
    pub const MASKED_LAST: Self = Self::MASKED.union(Self::LAST_FRAME);
    pub const WHITE_END: Self = Self::WHITE.union(Self::END_FRAME);
    pub const WHITE_LAST: Self = Self::WHITE.union(Self::LAST_FRAME);

    /// Every bit of a raw mode byte is meaningful, so none are dropped.
    pub fn from_byte(b: u8) -> Self {
        Self::from_bits_retain(b)
    }
}

/// Clipped placement of a bitmap on the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Placement {
    /// Address of the first source byte drawn
    src: u32,
    /// Source bytes between consecutive rows
    stride: u32,
    /// Columns drawn per row
    render_width: i32,
    /// Pixel rows left to draw; decremented by 8 per band
    render_height: i32,
    /// Screen page of the first band; -1 when only its lower half shows
    display_row: i32,
    /// Screen column of the first drawn source column
    base_x: i32,
    /// `1 << (y & 7)`
    yshift: u16,
    /// Mask for a partial final band
    last_mask: u8,
}

impl Placement {
    fn new(x: i32, y: i32, width: i32, height: i32, address: u32, frame: u8, mode: DrawMode) -> Option<Self> {
        let (w, h) = (SCREEN_WIDTH as i32, SCREEN_HEIGHT as i32);
        if width <= 0 || height <= 0 {
            return None;
        }
        if x + width <= 0 || x >= w || y + height <= 0 || y >= h {
            return None;
        }

        let (skip_left, render_width) = if x < 0 {
            (-x, (width + x).min(w))
        } else {
            (0, if x + width > w { w - x } else { width })
        };
        if render_width <= 0 {
            return None;
        }

        let (skip_top, render_height) = if y < 0 {
            let skip_px = -y & !7;
            let rh = if height - skip_px <= h { height - skip_px } else { h + (-y & 7) };
            (skip_px >> 3, rh)
        } else {
            (0, if y + height > h { h - y } else { height })
        };
        if render_height <= 0 {
            return None;
        }

        let rows_per_frame = ((height + 7) >> 3) as u64;
        let mut offset = (frame as u64 * rows_per_frame + skip_top as u64) * width as u64 + skip_left as u64;
        let mut stride = width as u64;
        if mode.contains(DrawMode::MASKED) {
            offset *= 2;
            stride *= 2;
        }
        let src = address as u64 + BITMAP_HEADER_LEN as u64 + offset;

        Some(Placement {
            src: u32::try_from(src).ok()?,
            stride: stride as u32,
            render_width,
            render_height,
            display_row: (y >> 3) + skip_top,
            base_x: x + skip_left,
            yshift: 1 << (y & 7),
            last_mask: if height & 7 != 0 { (1u8 << (height & 7)) - 1 } else { 0xFF },
        })
    }
}

#[inline]
fn combine(screen: u8, bits: u8, mask: u8, invert: bool) -> u8 {
    let mut px = bits;
    if !invert {
        px ^= screen;
    }
    (px & mask) ^ screen
}

/// Draw frame `frame` of the bitmap at `address` with its top-left corner at
/// (`x`, `y`).
///
/// Off-screen bitmaps leave the screen untouched. A read failure stops the
/// blit where it is; bands already drawn stay drawn.
pub fn draw_bitmap<D: Read + Seek>(
    cache: &mut PageCache<D>,
    screen: &mut Framebuffer,
    x: i16,
    y: i16,
    address: u32,
    frame: u8,
    mode: DrawMode,
) {
    let mut header = [0u8; BITMAP_HEADER_LEN as usize];
    if let Err(e) = cache.read_at(address, &mut header) {
        log::debug!("bitmap header at 0x{:06X} unreadable: {}", address, e);
        return;
    }
    let width = i16::from_be_bytes([header[0], header[1]]) as i32;
    let height = i16::from_be_bytes([header[2], header[3]]) as i32;

    let Some(mut p) = Placement::new(x as i32, y as i32, width, height, address, frame, mode) else {
        return;
    };

    let masked = mode.contains(DrawMode::MASKED);
    let white_black = mode.contains(DrawMode::WHITE_BLACK);
    let black = mode.contains(DrawMode::BLACK);
    let reverse_black = mode.contains(DrawMode::REVERSE_BLACK);
    let invert = mode.contains(DrawMode::INVERT);
    let flip = mode.contains(DrawMode::FLIP);

    // Only the drawn columns of each row are read, never the clipped tail.
    let need = p.render_width as usize * if masked { 2 } else { 1 };
    let mut scratch = Vec::new();
    let fb = screen.as_bytes_mut();
    let mut address = p.src;

    while p.render_height > 0 {
        let row: &[u8] = match cache.span_at(address, need) {
            Some((idx, off)) => &cache.page(idx)[off..off + need],
            None => {
                scratch.resize(need, 0);
                if let Err(e) = cache.read_at(address, &mut scratch) {
                    log::warn!("bitmap 0x{:06X}: row at 0x{:06X} unreadable: {}", p.src, address, e);
                    return;
                }
                &scratch
            }
        };

        let row_mask = if p.render_height < 8 { p.last_mask } else { 0xFF };
        let extra_row = p.yshift != 1 && p.display_row < SCREEN_PAGES as i32 - 1;
        let mut src = row.iter();

        for c in 0..p.render_width {
            let Some(&b) = src.next() else { break };
            let mut bitmap_byte = b;
            if reverse_black {
                bitmap_byte ^= row_mask;
            }
            let mut mask_byte = row_mask;
            if white_black {
                mask_byte = bitmap_byte;
            }
            if black {
                bitmap_byte = 0;
            }
            if masked {
                let m = src.next().copied().unwrap_or(0);
                if !white_black {
                    mask_byte = m;
                }
            }
            let bitmap = bitmap_byte as u16 * p.yshift;
            let mask = mask_byte as u16 * p.yshift;

            let sx = if flip { p.base_x + p.render_width - 1 - c } else { p.base_x + c };
            if !(0..SCREEN_WIDTH as i32).contains(&sx) {
                continue;
            }
            let sx = sx as usize;

            if (0..SCREEN_PAGES as i32).contains(&p.display_row) {
                let i = p.display_row as usize * SCREEN_WIDTH + sx;
                fb[i] = combine(fb[i], bitmap as u8, mask as u8, invert);
            }
            if extra_row && p.display_row + 1 >= 0 {
                let i = (p.display_row + 1) as usize * SCREEN_WIDTH + sx;
                fb[i] = combine(fb[i], (bitmap >> 8) as u8, (mask >> 8) as u8, invert);
            }
        }

        address = match address.checked_add(p.stride) {
            Some(a) => a,
            None => return,
        };
        p.display_row += 1;
        p.render_height -= 8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn bitmap(width: u16, height: u16, pixels: &[u8]) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(&width.to_be_bytes());
        v.extend_from_slice(&height.to_be_bytes());
        v.extend_from_slice(pixels);
        v
    }

    fn cache_of(bytes: Vec<u8>) -> PageCache<Cursor<Vec<u8>>> {
        PageCache::new(Cursor::new(bytes), 512, 2).unwrap()
    }

    fn draw(asset: Vec<u8>, screen: &mut Framebuffer, x: i16, y: i16, frame: u8, mode: DrawMode) {
        let mut cache = cache_of(asset);
        draw_bitmap(&mut cache, screen, x, y, 0, frame, mode);
    }

    fn byte(screen: &Framebuffer, page: usize, x: usize) -> u8 {
        screen.as_bytes()[page * SCREEN_WIDTH + x]
    }

    #[test]
    fn test_aligned_normal() {
        let mut fb = Framebuffer::new();
        fb.as_bytes_mut().fill(0x55);
        draw(bitmap(4, 8, &[0xFF, 0x00, 0x0F, 0xF0]), &mut fb, 2, 8, 0, DrawMode::NORMAL);
        assert_eq!(byte(&fb, 1, 2), 0xFF);
        assert_eq!(byte(&fb, 1, 3), 0x00);
        assert_eq!(byte(&fb, 1, 4), 0x0F);
        assert_eq!(byte(&fb, 1, 5), 0xF0);
        assert_eq!(byte(&fb, 1, 1), 0x55);
        assert_eq!(byte(&fb, 0, 2), 0x55);
        assert_eq!(byte(&fb, 2, 2), 0x55);
    }

    #[test]
    fn test_vertical_shift_spans_two_pages() {
        let mut fb = Framebuffer::new();
        draw(bitmap(1, 8, &[0xFF]), &mut fb, 5, 3, 0, DrawMode::NORMAL);
        assert_eq!(byte(&fb, 0, 5), 0xF8);
        assert_eq!(byte(&fb, 1, 5), 0x07);
        assert_eq!(fb.lit_count(), 8);
        for y in 3..11 {
            assert!(fb.pixel(5, y));
        }
    }

    #[test]
    fn test_partial_height_keeps_background() {
        let mut fb = Framebuffer::new();
        fb.as_bytes_mut().fill(0xFF);
        // 3-pixel-tall bitmap: only bits 0..2 of the band belong to it.
        draw(bitmap(1, 3, &[0x00]), &mut fb, 0, 0, 0, DrawMode::NORMAL);
        assert_eq!(byte(&fb, 0, 0), 0xF8);
    }

    #[test]
    fn test_masked() {
        let mut fb = Framebuffer::new();
        fb.as_bytes_mut().fill(0xAA);
        let pixels = [0x0F, 0xFF, 0xFF, 0x00, 0x00, 0xF0];
        draw(bitmap(3, 8, &pixels), &mut fb, 0, 0, 0, DrawMode::MASKED);
        assert_eq!(byte(&fb, 0, 0), 0x0F);
        assert_eq!(byte(&fb, 0, 1), 0xAA, "mask 0 leaves the screen");
        assert_eq!(byte(&fb, 0, 2), 0x0A);
    }

    #[test]
    fn test_white_draws_only_lit_pixels() {
        let mut fb = Framebuffer::new();
        fb.as_bytes_mut().fill(0xF0);
        draw(bitmap(1, 8, &[0x0F]), &mut fb, 0, 0, 0, DrawMode::WHITE);
        assert_eq!(byte(&fb, 0, 0), 0xFF);
    }

    #[test]
    fn test_black_with_self_mask_erases() {
        let mut fb = Framebuffer::new();
        fb.as_bytes_mut().fill(0xFF);
        draw(bitmap(1, 8, &[0x0F]), &mut fb, 0, 0, 0, DrawMode::WHITE_BLACK | DrawMode::BLACK);
        assert_eq!(byte(&fb, 0, 0), 0xF0);
    }

    #[test]
    fn test_invert_and_reverse_black() {
        let mut fb = Framebuffer::new();
        fb.as_bytes_mut().fill(0x0F);
        draw(bitmap(1, 8, &[0x3C]), &mut fb, 0, 0, 0, DrawMode::INVERT);
        // Without the XOR pre-step the bits land as (bits & mask) ^ screen.
        assert_eq!(byte(&fb, 0, 0), 0x3C ^ 0x0F);

        let mut fb = Framebuffer::new();
        draw(bitmap(1, 8, &[0x3C]), &mut fb, 0, 0, 0, DrawMode::REVERSE_BLACK);
        assert_eq!(byte(&fb, 0, 0), 0xC3);
    }

    #[test]
    fn test_flip_mirrors_columns() {
        let mut fb = Framebuffer::new();
        draw(bitmap(3, 8, &[1, 2, 3]), &mut fb, 10, 0, 0, DrawMode::FLIP);
        assert_eq!(byte(&fb, 0, 10), 3);
        assert_eq!(byte(&fb, 0, 11), 2);
        assert_eq!(byte(&fb, 0, 12), 1);
    }

    #[test]
    fn test_frame_index_selects_sheet_entry() {
        let mut fb = Framebuffer::new();
        draw(bitmap(2, 8, &[1, 2, 3, 4, 5, 6]), &mut fb, 0, 0, 2, DrawMode::NORMAL);
        assert_eq!(byte(&fb, 0, 0), 5);
        assert_eq!(byte(&fb, 0, 1), 6);
    }

    #[test]
    fn test_clip_left_and_right() {
        let mut fb = Framebuffer::new();
        draw(bitmap(3, 8, &[1, 2, 3]), &mut fb, -1, 0, 0, DrawMode::NORMAL);
        assert_eq!(byte(&fb, 0, 0), 2);
        assert_eq!(byte(&fb, 0, 1), 3);
        assert_eq!(byte(&fb, 0, 2), 0);

        let mut fb = Framebuffer::new();
        draw(bitmap(3, 8, &[1, 2, 3]), &mut fb, 126, 0, 0, DrawMode::NORMAL);
        assert_eq!(byte(&fb, 0, 126), 1);
        assert_eq!(byte(&fb, 0, 127), 2);
        assert_eq!(fb.lit_count(), 2);
    }

    #[test]
    fn test_negative_y_draws_lower_part() {
        let mut fb = Framebuffer::new();
        draw(bitmap(1, 8, &[0xFF]), &mut fb, 0, -3, 0, DrawMode::NORMAL);
        assert_eq!(byte(&fb, 0, 0), 0x1F);
        assert_eq!(fb.lit_count(), 5);

        // A whole band above the screen is skipped in the source.
        let mut fb = Framebuffer::new();
        draw(bitmap(1, 16, &[0xAA, 0x81]), &mut fb, 0, -8, 0, DrawMode::NORMAL);
        assert_eq!(byte(&fb, 0, 0), 0x81);
        assert_eq!(fb.lit_count(), 2);
    }

    #[test]
    fn test_bottom_edge_clipped() {
        let mut fb = Framebuffer::new();
        draw(bitmap(1, 16, &[0xFF, 0xFF]), &mut fb, 0, 60, 0, DrawMode::NORMAL);
        assert_eq!(byte(&fb, 7, 0), 0xF0);
        assert_eq!(fb.lit_count(), 4);
    }

    #[test]
    fn test_offscreen_is_noop() {
        let asset = bitmap(8, 8, &[0xFF; 8]);
        for &(x, y) in &[(128i16, 0i16), (-8, 0), (0, 64), (0, -8), (i16::MIN, i16::MIN)] {
            let mut fb = Framebuffer::new();
            fb.as_bytes_mut()[0] = 0x42;
            draw(asset.clone(), &mut fb, x, y, 0, DrawMode::NORMAL);
            assert_eq!(fb.as_bytes()[0], 0x42);
            assert_eq!(fb.lit_count(), 2, "({}, {})", x, y);
        }
    }

    #[test]
    fn test_bad_header_is_noop() {
        let mut fb = Framebuffer::new();
        draw(bitmap(0, 8, &[0xFF]), &mut fb, 0, 0, 0, DrawMode::NORMAL);
        draw(vec![0x00, 0x01], &mut fb, 0, 0, 0, DrawMode::NORMAL);
        draw(bitmap(0x8000, 8, &[0xFF]), &mut fb, 0, 0, 0, DrawMode::NORMAL);
        assert_eq!(fb.lit_count(), 0);
    }

    #[test]
    fn test_truncated_pixels_abort_after_drawn_bands() {
        let mut fb = Framebuffer::new();
        // Second band is missing from the asset.
        draw(bitmap(2, 16, &[0xFF, 0xFF]), &mut fb, 0, 0, 0, DrawMode::NORMAL);
        assert_eq!(byte(&fb, 0, 0), 0xFF);
        assert_eq!(byte(&fb, 1, 0), 0x00);
    }

    #[test]
    fn test_row_crossing_page_boundary() {
        // Put the bitmap so its pixel row straddles the 512-byte page edge.
        let mut asset = vec![0u8; 506];
        asset.extend(bitmap(8, 8, &[1, 2, 3, 4, 5, 6, 7, 8]));
        let mut cache = cache_of(asset);
        let mut fb = Framebuffer::new();
        draw_bitmap(&mut cache, &mut fb, 0, 0, 506, 0, DrawMode::NORMAL);
        for x in 0..8 {
            assert_eq!(byte(&fb, 0, x), x as u8 + 1);
        }
    }

    #[test]
    fn test_mode_byte_constants() {
        assert_eq!(DrawMode::MASKED_LAST.bits(), 0x90);
        assert_eq!(DrawMode::WHITE_END.bits(), 0x41);
        assert_eq!(DrawMode::from_byte(0xFF).bits(), 0xFF);
        assert!(DrawMode::NORMAL.is_empty());
    }
}
