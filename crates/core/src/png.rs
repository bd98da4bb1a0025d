//! PNG screenshots of the screen buffer.
//!
//! Writes an 8-bit grayscale image with one zlib-compressed IDAT chunk.

use miniz_oxide::deflate::compress_to_vec_zlib;

use crate::display::{Framebuffer, SCREEN_HEIGHT, SCREEN_WIDTH};

const SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
const COMPRESSION_LEVEL: u8 = 6;

/// Encode a monochrome image as a grayscale PNG, `scale` pixels per side
/// for every source pixel. `pixels` is row-major, true = lit.
pub fn encode_mono(width: u32, height: u32, pixels: &[bool], scale: u32) -> Vec<u8> {
    let scale = scale.max(1);
    let out_w = width * scale;
    let out_h = height * scale;

    let mut png = Vec::new();
    png.extend_from_slice(&SIGNATURE);

    let mut ihdr = Vec::with_capacity(13);
    ihdr.extend_from_slice(&out_w.to_be_bytes());
    ihdr.extend_from_slice(&out_h.to_be_bytes());
    ihdr.push(8); // bit depth
    ihdr.push(0); // grayscale
    ihdr.extend_from_slice(&[0, 0, 0]);
    write_chunk(&mut png, b"IHDR", &ihdr);

    let mut raw = Vec::with_capacity((out_w as usize + 1) * out_h as usize);
    for y in 0..out_h as usize {
        raw.push(0); // filter: None
        let sy = y / scale as usize;
        for x in 0..out_w as usize {
            let sx = x / scale as usize;
            let lit = pixels.get(sy * width as usize + sx).copied().unwrap_or(false);
            raw.push(if lit { 0xFF } else { 0x00 });
        }
    }
    write_chunk(&mut png, b"IDAT", &compress_to_vec_zlib(&raw, COMPRESSION_LEVEL));
    write_chunk(&mut png, b"IEND", &[]);
    png
}

/// Encode the screen buffer.
pub fn encode_framebuffer(fb: &Framebuffer, scale: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity(SCREEN_WIDTH * SCREEN_HEIGHT);
    for y in 0..SCREEN_HEIGHT {
        for x in 0..SCREEN_WIDTH {
            pixels.push(fb.pixel(x, y));
        }
    }
    encode_mono(SCREEN_WIDTH as u32, SCREEN_HEIGHT as u32, &pixels, scale)
}

fn write_chunk(out: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(data);
    out.extend_from_slice(&crc32(kind, data).to_be_bytes());
}

fn crc32(kind: &[u8], data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &b in kind.iter().chain(data) {
        crc ^= b as u32;
        for _ in 0..8 {
            let carry = crc & 1;
            crc >>= 1;
            if carry != 0 {
                crc ^= 0xEDB8_8320;
            }
        }
    }
    !crc
}
