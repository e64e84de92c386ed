//! Page-store file header (first 64 bytes of page 0).
//!
//! ```text
//! [0..16]   magic "pagetree\0\0\0\0\0\0\0\0"
//! [16..20]  page_size
//! [20..24]  page_count (including page 0)
//! [24..28]  freelist_head (0 = empty)
//! [28..32]  freelist_count
//! [32..36]  root_page of the stored map (0 = none yet)
//! ```

use std::io::{Read, Write};

use byteorder::{BigEndian, ByteOrder};

use crate::config::DEFAULT_PAGE_SIZE;
use crate::error::{Result, StorageError};
use crate::page::PageIndex;

/// Magic bytes identifying a page-store file.
pub const MAGIC: &[u8; 16] = b"pagetree\0\0\0\0\0\0\0\0";

/// Size of the serialized header in bytes.
pub const HEADER_SIZE: usize = 64;

/// The header stored at the beginning of the file (page 0).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub page_size: u32,
    /// Total number of pages in the file, header page included.
    pub page_count: u32,
    /// First page of the freelist (0 = no free pages).
    pub freelist_head: PageIndex,
    pub freelist_count: u32,
    /// Root page of the map stored in this file.
    pub root_page: PageIndex,
}

impl Default for FileHeader {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE as u32,
            page_count: 1,
            freelist_head: 0,
            freelist_count: 0,
            root_page: 0,
        }
    }
}

impl FileHeader {
    pub fn with_page_size(page_size: u32) -> Self {
        Self {
            page_size,
            ..Self::default()
        }
    }

    /// Serialize into the first `HEADER_SIZE` bytes of `buf`.
    pub fn serialize(&self, buf: &mut [u8]) {
        assert!(buf.len() >= HEADER_SIZE, "buffer too small for header");
        buf[..HEADER_SIZE].fill(0);
        buf[0..16].copy_from_slice(MAGIC);
        BigEndian::write_u32(&mut buf[16..20], self.page_size);
        BigEndian::write_u32(&mut buf[20..24], self.page_count);
        BigEndian::write_u32(&mut buf[24..28], self.freelist_head);
        BigEndian::write_u32(&mut buf[28..32], self.freelist_count);
        BigEndian::write_u32(&mut buf[32..36], self.root_page);
    }

    /// Returns `None` if the buffer is short or the magic doesn't match.
    pub fn deserialize(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE || &buf[0..16] != MAGIC.as_slice() {
            return None;
        }
        Some(Self {
            page_size: BigEndian::read_u32(&buf[16..20]),
            page_count: BigEndian::read_u32(&buf[20..24]),
            freelist_head: BigEndian::read_u32(&buf[24..28]),
            freelist_count: BigEndian::read_u32(&buf[28..32]),
            root_page: BigEndian::read_u32(&buf[32..36]),
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut buf = [0u8; HEADER_SIZE];
        self.serialize(&mut buf);
        writer.write_all(&buf)?;
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; HEADER_SIZE];
        reader.read_exact(&mut buf)?;
        Self::deserialize(&buf)
            .ok_or_else(|| StorageError::corrupt_page(0, "invalid page-store header (bad magic)"))
    }
}
