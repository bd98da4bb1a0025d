//! Flash emulation over two files: the asset blob behind a page cache and the
//! save blob behind an append-only record log.

pub mod backing;
pub mod cache;
pub mod save_log;
pub mod stream;

pub use backing::ERASED;
pub use cache::{CacheStats, PageCache};
pub use save_log::{SaveLog, SAVE_BLOCK_SIZE};
pub use stream::{Domain, Transfer, Window};
