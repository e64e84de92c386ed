//! Pages and the page-manager contract.
//!
//! A [`Page`] is an owned, fixed-size byte buffer with a cursor. Handles are
//! obtained from a [`PageManager`] and handed back through `release_page`
//! (bytes persist) or `remove_page` (the page is freed). All multi-byte fields
//! are big-endian.
//!
//! ## Page tags
//! ```text
//! 0x00  interior tree node
//! 0x01  leaf tree node
//! 0x02  last (DATA) page of an overflow chain
//! 0x80  non-final (EXTENDED) page of an overflow chain
//! ```

use std::ops::Range;

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Result, StorageError};

/// Stable index of a page within its manager.
pub type PageIndex = u32;

/// On-disk sentinel for "no page".
pub const NO_PAGE: PageIndex = PageIndex::MAX;

pub const PAGE_TYPE_INTERIOR: u8 = 0x00;
pub const PAGE_TYPE_LEAF: u8 = 0x01;
pub const PAGE_TYPE_DATA: u8 = 0x02;
pub const PAGE_TYPE_EXTENDED: u8 = 0x80;

/// A page handle: index, bytes and a read/write cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    index: PageIndex,
    data: Vec<u8>,
    offset: usize,
}

impl Page {
    pub fn new(index: PageIndex, data: Vec<u8>) -> Self {
        Self {
            index,
            data,
            offset: 0,
        }
    }

    pub fn zeroed(index: PageIndex, size: usize) -> Self {
        Self::new(index, vec![0u8; size])
    }

    pub fn index(&self) -> PageIndex {
        self.index
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Move the cursor. Positions up to and including the page end are valid.
    pub fn set_offset(&mut self, offset: usize) -> Result<()> {
        if offset > self.data.len() {
            return Err(StorageError::PageOverrun {
                page: self.index,
                offset,
                len: 0,
                size: self.data.len(),
            });
        }
        self.offset = offset;
        Ok(())
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Zero the page and rewind the cursor.
    pub fn clear(&mut self) {
        self.data.fill(0);
        self.offset = 0;
    }

    /// Reserve `len` bytes at the cursor and advance past them.
    fn span(&mut self, len: usize) -> Result<Range<usize>> {
        let start = self.offset;
        match start.checked_add(len) {
            Some(end) if end <= self.data.len() => {
                self.offset = end;
                Ok(start..end)
            }
            _ => Err(StorageError::PageOverrun {
                page: self.index,
                offset: start,
                len,
                size: self.data.len(),
            }),
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let at = self.span(1)?;
        Ok(self.data[at.start])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let at = self.span(2)?;
        Ok(BigEndian::read_u16(&self.data[at]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let at = self.span(4)?;
        Ok(BigEndian::read_u32(&self.data[at]))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let at = self.span(4)?;
        Ok(BigEndian::read_i32(&self.data[at]))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        let at = self.span(8)?;
        Ok(BigEndian::read_i64(&self.data[at]))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        let at = self.span(8)?;
        Ok(BigEndian::read_f64(&self.data[at]))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let at = self.span(len)?;
        Ok(self.data[at].to_vec())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        let at = self.span(1)?;
        self.data[at.start] = value;
        Ok(())
    }

    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        let at = self.span(2)?;
        BigEndian::write_u16(&mut self.data[at], value);
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        let at = self.span(4)?;
        BigEndian::write_u32(&mut self.data[at], value);
        Ok(())
    }

    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        let at = self.span(4)?;
        BigEndian::write_i32(&mut self.data[at], value);
        Ok(())
    }

    pub fn write_i64(&mut self, value: i64) -> Result<()> {
        let at = self.span(8)?;
        BigEndian::write_i64(&mut self.data[at], value);
        Ok(())
    }

    pub fn write_f64(&mut self, value: f64) -> Result<()> {
        let at = self.span(8)?;
        BigEndian::write_f64(&mut self.data[at], value);
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let at = self.span(bytes.len())?;
        self.data[at].copy_from_slice(bytes);
        Ok(())
    }

    /// Store the cursor position as the page's used length in the 2-byte
    /// field at `field`, leaving the cursor where it was.
    pub fn record_used_length(&mut self, field: usize) -> Result<()> {
        let used = self.offset;
        let used16 = u16::try_from(used).map_err(|_| {
            StorageError::corrupt_page(self.index, format!("used length {} exceeds u16", used))
        })?;
        self.set_offset(field)?;
        self.write_u16(used16)?;
        self.set_offset(used)
    }
}

/// Allocator and store for fixed-size pages.
///
/// Every page obtained from `create_page` or `get_page` must be passed back
/// through exactly one of `release_page` or `remove_page`. Prefer the scoped
/// helpers [`with_page`], [`with_new_page`] and [`free_page`], which do so on
/// every exit path.
pub trait PageManager {
    /// Allocate a fresh zeroed page.
    fn create_page(&mut self) -> Result<Page>;

    /// Fetch an existing page.
    fn get_page(&mut self, index: PageIndex) -> Result<Page>;

    /// Return a page; its bytes persist.
    fn release_page(&mut self, page: Page) -> Result<()>;

    /// Return a page and free it for reuse.
    fn remove_page(&mut self, page: Page) -> Result<()>;

    /// Capacity of every page in bytes.
    fn page_size(&self) -> usize;

    /// Number of live (allocated and not removed) pages.
    fn page_count(&self) -> usize;
}

impl<P: PageManager + ?Sized> PageManager for &mut P {
    fn create_page(&mut self) -> Result<Page> {
        (**self).create_page()
    }

    fn get_page(&mut self, index: PageIndex) -> Result<Page> {
        (**self).get_page(index)
    }

    fn release_page(&mut self, page: Page) -> Result<()> {
        (**self).release_page(page)
    }

    fn remove_page(&mut self, page: Page) -> Result<()> {
        (**self).remove_page(page)
    }

    fn page_size(&self) -> usize {
        (**self).page_size()
    }

    fn page_count(&self) -> usize {
        (**self).page_count()
    }
}

impl<P: PageManager + ?Sized> PageManager for Box<P> {
    fn create_page(&mut self) -> Result<Page> {
        (**self).create_page()
    }

    fn get_page(&mut self, index: PageIndex) -> Result<Page> {
        (**self).get_page(index)
    }

    fn release_page(&mut self, page: Page) -> Result<()> {
        (**self).release_page(page)
    }

    fn remove_page(&mut self, page: Page) -> Result<()> {
        (**self).remove_page(page)
    }

    fn page_size(&self) -> usize {
        (**self).page_size()
    }

    fn page_count(&self) -> usize {
        (**self).page_count()
    }
}

/// Fetch page `index`, run `f` on it and release it, whether or not `f`
/// succeeded. An error from `f` takes precedence over a release error.
pub fn with_page<M, T, F>(pages: &mut M, index: PageIndex, f: F) -> Result<T>
where
    M: PageManager + ?Sized,
    F: FnOnce(&mut M, &mut Page) -> Result<T>,
{
    let mut page = pages.get_page(index)?;
    let outcome = f(pages, &mut page);
    let released = pages.release_page(page);
    let value = outcome?;
    released?;
    Ok(value)
}

/// Like [`with_page`] for a freshly created page. If `f` fails the page is
/// removed again instead of released.
pub fn with_new_page<M, T, F>(pages: &mut M, f: F) -> Result<T>
where
    M: PageManager + ?Sized,
    F: FnOnce(&mut M, &mut Page) -> Result<T>,
{
    let mut page = pages.create_page()?;
    match f(pages, &mut page) {
        Ok(value) => {
            pages.release_page(page)?;
            Ok(value)
        }
        Err(err) => {
            if let Err(cleanup) = pages.remove_page(page) {
                log::warn!("failed to remove page after aborted write: {}", cleanup);
            }
            Err(err)
        }
    }
}

/// Free page `index`.
pub fn free_page<M: PageManager + ?Sized>(pages: &mut M, index: PageIndex) -> Result<()> {
    let page = pages.get_page(index)?;
    pages.remove_page(page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryPageManager;

    #[test]
    fn cursor_reads_back_typed_writes() {
        let mut page = Page::zeroed(3, 64);
        page.write_u8(0x80).unwrap();
        page.write_u16(513).unwrap();
        page.write_i32(-7).unwrap();
        page.write_i64(1 << 40).unwrap();
        page.write_f64(2.5).unwrap();
        page.write_bytes(b"abc").unwrap();
        assert_eq!(page.offset(), 1 + 2 + 4 + 8 + 8 + 3);

        page.set_offset(0).unwrap();
        assert_eq!(page.read_u8().unwrap(), 0x80);
        assert_eq!(page.read_u16().unwrap(), 513);
        assert_eq!(page.read_i32().unwrap(), -7);
        assert_eq!(page.read_i64().unwrap(), 1 << 40);
        assert_eq!(page.read_f64().unwrap(), 2.5);
        assert_eq!(page.read_bytes(3).unwrap(), b"abc".to_vec());
    }

    #[test]
    fn values_are_big_endian() {
        let mut page = Page::zeroed(0, 8);
        page.write_u32(0x0102_0304).unwrap();
        assert_eq!(&page.data()[0..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn access_past_end_is_an_overrun() {
        let mut page = Page::zeroed(9, 8);
        page.set_offset(6).unwrap();
        let err = page.write_u32(1).unwrap_err();
        assert!(matches!(
            err,
            StorageError::PageOverrun { page: 9, offset: 6, len: 4, size: 8 }
        ));
        // The failed write leaves the cursor untouched.
        assert_eq!(page.offset(), 6);
        assert!(page.set_offset(9).is_err());
        assert!(page.read_bytes(3).is_err());
    }

    #[test]
    fn record_used_length_writes_cursor_position() {
        let mut page = Page::zeroed(1, 32);
        page.write_u8(PAGE_TYPE_DATA).unwrap();
        page.write_u16(0).unwrap();
        page.write_bytes(&[9; 10]).unwrap();
        page.record_used_length(1).unwrap();
        assert_eq!(page.offset(), 13);
        page.set_offset(1).unwrap();
        assert_eq!(page.read_u16().unwrap(), 13);
    }

    #[test]
    fn with_page_releases_even_when_closure_fails() {
        let mut pages = MemoryPageManager::new(32);
        let index = with_new_page(&mut pages, |_, page| {
            page.write_u8(7)?;
            Ok(page.index())
        })
        .unwrap();

        let err = with_page(&mut pages, index, |_, page| -> Result<()> {
            page.set_offset(0)?;
            page.write_u8(8)?;
            Err(StorageError::InvalidArgument("boom".to_string()))
        })
        .unwrap_err();
        assert!(matches!(err, StorageError::InvalidArgument(_)));

        // Released: the write made before the failure persisted.
        let first = with_page(&mut pages, index, |_, page| page.read_u8()).unwrap();
        assert_eq!(first, 8);
    }

    #[test]
    fn with_new_page_removes_page_on_failure() {
        let mut pages = MemoryPageManager::new(32);
        let err = with_new_page(&mut pages, |_, _| -> Result<()> {
            Err(StorageError::Encoding("nope".to_string()))
        })
        .unwrap_err();
        assert!(matches!(err, StorageError::Encoding(_)));
        assert_eq!(pages.page_count(), 0);
    }
}
