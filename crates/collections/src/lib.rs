//! Collections layered on the page-backed ordered map.

pub mod list;

pub use list::IndexedList;
