//! Page-backed ordered maps.
//!
//! This crate provides:
//! - Fixed-size pages with a read/write cursor and the [`PageManager`] trait
//! - An in-memory page manager and a file-backed pager with an LRU buffer pool
//! - Value codecs: inline fixed-width slots and overflow chains for values of
//!   any length
//! - [`BPlusTreeMap`], an ordered map whose nodes are pages, with fail-fast
//!   leaf iteration

pub mod btree;
pub mod codec;
pub mod config;
pub mod error;
pub mod header;
pub mod iter;
pub mod memory;
pub mod overflow;
pub mod page;
pub mod pager;

pub use btree::{BPlusTreeMap, Comparator};
pub use codec::{
    BytesSerializer, FixedValueManager, FixedWidth, JsonSerializer, PageValueManager,
    Utf8Serializer, ValueSerializer,
};
pub use config::TreeConfig;
pub use error::{Result, StorageError};
pub use header::FileHeader;
pub use iter::{Entries, Keys, LeafCursor, LeafIter, LeafPart, LeafSetView, Values};
pub use memory::MemoryPageManager;
pub use overflow::OverflowValueManager;
pub use page::{Page, PageIndex, PageManager, NO_PAGE};
pub use pager::Pager;
