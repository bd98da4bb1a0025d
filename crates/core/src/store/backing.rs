//! Backing store adapter.
//!
//! Two byte-addressable blobs stand in for the FX flash chip: a read-only
//! asset blob and a small read-write save blob. Unwritten flash reads as
//! [`ERASED`], so a fresh save blob is filled with that value before use.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{FxError, Result};

/// Value of an erased (never programmed) flash byte.
pub const ERASED: u8 = 0xFF;

/// Open the asset blob read-only.
pub fn open_asset(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => FxError::NotFound(path.to_path_buf()),
        _ => FxError::Io(e),
    })
}

/// Open the save blob read-write, creating and erasing it when it does not
/// yet hold a full `size`-byte region.
pub fn open_or_create_save(path: &Path, size: usize) -> Result<File> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    if ensure_initialized(&mut file, size)? {
        log::info!("initialized blank save region at {}", path.display());
    }
    Ok(file)
}

/// Make sure the last byte of a `size`-byte region is readable; if not, fill
/// the whole region with [`ERASED`]. Returns true when the fill happened.
///
/// Calling this on an already-initialized store changes nothing.
pub fn ensure_initialized<S: Read + Write + Seek>(io: &mut S, size: usize) -> Result<bool> {
    if size == 0 {
        return Ok(false);
    }
    let mut probe = [0u8; 1];
    if let Ok(1) = read_at(io, (size - 1) as u64, &mut probe) {
        return Ok(false);
    }
    fill(io, ERASED, size)?;
    Ok(true)
}

/// Read up to `buf.len()` bytes at `offset`. A short count means end of data.
pub fn read_at<S: Read + Seek>(io: &mut S, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
    io.seek(SeekFrom::Start(offset))?;
    let mut done = 0;
    while done < buf.len() {
        match io.read(&mut buf[done..]) {
            Ok(0) => break,
            Ok(n) => done += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if done > 0 => {
                log::debug!("read at 0x{:06X} cut short after {} bytes: {}", offset, done, e);
                break;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(done)
}

/// Read exactly `buf.len()` bytes at `offset`.
pub fn read_exact_at<S: Read + Seek>(io: &mut S, offset: u64, buf: &mut [u8]) -> Result<()> {
    let n = read_at(io, offset, buf)?;
    if n < buf.len() {
        return Err(FxError::NoData((offset + n as u64) as u32));
    }
    Ok(())
}

/// Write all of `bytes` at `offset` and flush.
pub fn write_at<S: Write + Seek>(io: &mut S, offset: u64, bytes: &[u8]) -> Result<()> {
    io.seek(SeekFrom::Start(offset))?;
    io.write_all(bytes)?;
    io.flush()?;
    Ok(())
}

/// Overwrite `len` bytes from offset 0 with `value`.
pub fn fill<S: Write + Seek>(io: &mut S, value: u8, len: usize) -> Result<()> {
    let chunk = [value; 256];
    io.seek(SeekFrom::Start(0))?;
    let mut remain = len;
    while remain > 0 {
        let n = remain.min(chunk.len());
        io.write_all(&chunk[..n])?;
        remain -= n;
    }
    io.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_ensure_initialized_fills_blank_store() {
        let mut io = Cursor::new(Vec::new());
        assert!(ensure_initialized(&mut io, 4096).unwrap());
        assert_eq!(io.get_ref().len(), 4096);
        assert!(io.get_ref().iter().all(|&b| b == ERASED));
    }

    #[test]
    fn test_ensure_initialized_is_idempotent() {
        let mut data = vec![ERASED; 4096];
        data[10] = 0x42;
        let mut io = Cursor::new(data);
        assert!(!ensure_initialized(&mut io, 4096).unwrap());
        assert_eq!(io.get_ref()[10], 0x42);
    }

    #[test]
    fn test_short_store_is_refilled() {
        let mut io = Cursor::new(vec![0u8; 100]);
        assert!(ensure_initialized(&mut io, 4096).unwrap());
        assert_eq!(io.get_ref().len(), 4096);
        assert_eq!(io.get_ref()[0], ERASED);
    }

    #[test]
    fn test_read_at_short_at_end() {
        let mut io = Cursor::new(vec![1u8, 2, 3, 4]);
        let mut buf = [0u8; 8];
        assert_eq!(read_at(&mut io, 2, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[3, 4]);
        assert!(read_exact_at(&mut io, 2, &mut buf).is_err());
    }

    #[test]
    fn test_open_missing_asset() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_asset(&dir.path().join("missing.bin")).unwrap_err();
        assert!(matches!(err, FxError::NotFound(_)));
    }

    #[test]
    fn test_open_or_create_save_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fxsave.bin");
        drop(open_or_create_save(&path, 4096).unwrap());
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 4096);
        assert!(bytes.iter().all(|&b| b == ERASED));

        // Second open keeps existing content.
        let mut f = open_or_create_save(&path, 4096).unwrap();
        write_at(&mut f, 0, &[0x00, 0x02]).unwrap();
        drop(f);
        drop(open_or_create_save(&path, 4096).unwrap());
        assert_eq!(&std::fs::read(&path).unwrap()[..2], &[0x00, 0x02]);
    }
}
