//! Byte-range I/O for slide files.
//!
//! Slide parsers never read whole files: they ask a [`RangeReader`] for the
//! exact byte ranges they need. [`FileRangeReader`] serves ranges from a local
//! file, [`MemoryRangeReader`] from an in-memory buffer, and [`BlockCache`]
//! wraps either one with an LRU cache of fixed-size blocks.

mod block_cache;
mod file_reader;
mod range_reader;

pub use block_cache::{BlockCache, BlockCacheStats, DEFAULT_BLOCK_CACHE_CAPACITY, DEFAULT_BLOCK_SIZE};
pub use file_reader::FileRangeReader;
pub use range_reader::{MemoryRangeReader, RangeReader};
