//! Error type shared by the page layer, the codecs and the tree.

use std::io;

use thiserror::Error;

use crate::page::PageIndex;

/// Errors produced by page managers, value codecs and the ordered map.
///
/// A missing key is not an error: lookups return `Ok(None)`.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An overflow chain page carried a tag other than EXTENDED or DATA.
    #[error("corrupt overflow chain at page {page}: unexpected page tag {tag:#04x}")]
    CorruptChain { page: PageIndex, tag: u8 },

    #[error("corrupted page {page}: {reason}")]
    CorruptPage { page: PageIndex, reason: String },

    #[error("unknown page type {tag:#04x} at page {page}")]
    UnknownPageType { page: PageIndex, tag: u8 },

    #[error("page {page} overrun: {len} bytes at offset {offset} exceed page size {size}")]
    PageOverrun {
        page: PageIndex,
        offset: usize,
        len: usize,
        size: usize,
    },

    #[error("page {0} does not exist")]
    PageNotFound(PageIndex),

    /// The map changed underneath an iterator.
    #[error("map modified during iteration (expected mod count {expected}, found {found})")]
    ConcurrentModification { expected: u64, found: u64 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("value encoding error: {0}")]
    Encoding(String),

    #[error("structure inconsistent: {0}")]
    Inconsistent(String),
}

impl StorageError {
    pub(crate) fn corrupt_page(page: PageIndex, reason: impl Into<String>) -> Self {
        StorageError::CorruptPage {
            page,
            reason: reason.into(),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StorageError>;
