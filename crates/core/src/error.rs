//! Error type shared by every layer of the FX store.
//!
//! Internal APIs return [`Result`]. The public streaming surface converts
//! failures into the erased-flash byte (`0xFF`) instead of surfacing them.

use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum FxError {
    #[error("asset store not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to allocate {bytes} bytes of page cache")]
    OutOfMemory { bytes: usize },

    #[error("no data at offset 0x{0:06X}")]
    NoData(u32),

    #[error("save record of {0} bytes does not fit the save region")]
    RecordTooLarge(usize),

    #[error("save state codec error: {0}")]
    Codec(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, FxError>;
