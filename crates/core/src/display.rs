//! 128×64 monochrome screen buffer in SSD1306 page layout.
//!
//! The buffer is 8 pages of 128 column bytes. Byte `(y / 8) * 128 + x` holds
//! the vertical strip of 8 pixels at column `x`, bit `y & 7` being the pixel
//! at row `y`; a set bit is a lit pixel. This is the layout the bitmap
//! blitter writes into and the layout the real display controller scans out.

pub const SCREEN_WIDTH: usize = 128;
pub const SCREEN_HEIGHT: usize = 64;
/// Number of 8-row pages
pub const SCREEN_PAGES: usize = SCREEN_HEIGHT / 8;
pub const FB_SIZE: usize = SCREEN_WIDTH * SCREEN_PAGES;

/// Colour of a lit pixel in [`Framebuffer::as_pixel_buffer`].
const LIT: u32 = 0xFFFFFF;

#[derive(Clone, PartialEq, Eq)]
pub struct Framebuffer {
    bytes: [u8; FB_SIZE],
}

impl Default for Framebuffer {
    fn default() -> Self {
        Framebuffer { bytes: [0; FB_SIZE] }
    }
}

impl std::fmt::Debug for Framebuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framebuffer").field("lit", &self.lit_count()).finish()
    }
}

impl Framebuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn every pixel off.
    pub fn clear(&mut self) {
        self.bytes.fill(0);
    }

    /// Pixel at (x, y); off-screen coordinates read as unlit.
    pub fn pixel(&self, x: usize, y: usize) -> bool {
        if x >= SCREEN_WIDTH || y >= SCREEN_HEIGHT {
            return false;
        }
        (self.bytes[(y / 8) * SCREEN_WIDTH + x] >> (y & 7)) & 1 != 0
    }

    /// Set or clear one pixel; off-screen coordinates are ignored.
    pub fn set_pixel(&mut self, x: usize, y: usize, on: bool) {
        if x >= SCREEN_WIDTH || y >= SCREEN_HEIGHT {
            return;
        }
        let mask = 1u8 << (y & 7);
        let b = &mut self.bytes[(y / 8) * SCREEN_WIDTH + x];
        if on {
            *b |= mask;
        } else {
            *b &= !mask;
        }
    }

    pub fn lit_count(&self) -> usize {
        self.bytes.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn as_bytes(&self) -> &[u8; FB_SIZE] {
        &self.bytes
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8; FB_SIZE] {
        &mut self.bytes
    }

    /// Convert to a u32 pixel array (0xRRGGBB, row-major, for minifb)
    pub fn as_pixel_buffer(&self) -> Vec<u32> {
        let mut pixels = vec![0u32; SCREEN_WIDTH * SCREEN_HEIGHT];
        for page in 0..SCREEN_PAGES {
            for x in 0..SCREEN_WIDTH {
                let strip = self.bytes[page * SCREEN_WIDTH + x];
                for bit in 0..8 {
                    if (strip >> bit) & 1 != 0 {
                        let y = page * 8 + bit;
                        pixels[y * SCREEN_WIDTH + x] = LIT;
                    }
                }
            }
        }
        pixels
    }

    /// Render with half-block characters, two pixel rows per text line.
    pub fn to_ascii(&self) -> String {
        let mut out = String::with_capacity((SCREEN_WIDTH * 3 + 1) * SCREEN_HEIGHT / 2);
        for y in (0..SCREEN_HEIGHT).step_by(2) {
            for x in 0..SCREEN_WIDTH {
                let ch = match (self.pixel(x, y), self.pixel(x, y + 1)) {
                    (true, true) => '█',
                    (true, false) => '▀',
                    (false, true) => '▄',
                    (false, false) => ' ',
                };
                out.push(ch);
            }
            out.push('\n');
        }
        out
    }
}
