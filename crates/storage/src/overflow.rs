//! Overflow chains: values spread over a linked sequence of pages.
//!
//! A value of any length is cut into chunks, one per page. Every page except
//! the last is EXTENDED and points at its successor; the last is DATA.
//!
//! ```text
//! EXTENDED  [0] 0x80  [1..5] next page  [5..7] used length  [7..]  payload
//! DATA      [0] 0x02  [1..3] used length                    [3..]  payload
//! ```
//!
//! The used length counts header and payload. An EXTENDED page always carries
//! `page_size - 7` payload bytes; the DATA page carries the rest (possibly
//! nothing, so an empty value still takes one page). A slot referring to a
//! chain is the head page index as a 4-byte big-endian integer.

use std::collections::HashSet;
use std::marker::PhantomData;

use byteorder::{BigEndian, ByteOrder};
use log::{trace, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::{
    BytesSerializer, JsonSerializer, PageValueManager, Utf8Serializer, ValueSerializer,
};
use crate::error::{Result, StorageError};
use crate::page::{
    free_page, Page, PageIndex, PageManager, NO_PAGE, PAGE_TYPE_DATA, PAGE_TYPE_EXTENDED,
};

/// Header bytes of an EXTENDED page: tag, next index, used length.
pub const EXTENDED_HEADER_SIZE: usize = 7;

/// Header bytes of a DATA page: tag, used length.
pub const DATA_HEADER_SIZE: usize = 3;

/// Width of a slot pointing at a chain.
pub const POINTER_SIZE: usize = 4;

/// Number of pages a value of `len` bytes occupies.
pub fn chain_length(len: usize, page_size: usize) -> Result<usize> {
    let (extended_payload, data_payload) = payload_sizes(page_size)?;
    if len <= data_payload {
        Ok(1)
    } else {
        // Smallest n with len - n * extended_payload <= data_payload.
        Ok((len - data_payload).div_ceil(extended_payload) + 1)
    }
}

/// Payload bytes of an EXTENDED and of a DATA page.
fn payload_sizes(page_size: usize) -> Result<(usize, usize)> {
    if page_size <= EXTENDED_HEADER_SIZE {
        return Err(StorageError::InvalidArgument(format!(
            "page size {} cannot hold an overflow page",
            page_size
        )));
    }
    Ok((page_size - EXTENDED_HEADER_SIZE, page_size - DATA_HEADER_SIZE))
}

/// Write `bytes` as a new chain and return its head page.
///
/// If any page operation fails, the pages written so far are freed before the
/// error is returned.
pub fn write_chain(pages: &mut dyn PageManager, bytes: &[u8]) -> Result<PageIndex> {
    let mut created = Vec::new();
    match write_chain_pages(pages, bytes, &mut created) {
        Ok(head) => {
            trace!("wrote {} bytes to chain at {} ({} pages)", bytes.len(), head, created.len());
            Ok(head)
        }
        Err(err) => {
            for index in created {
                if let Err(cleanup) = free_page(pages, index) {
                    warn!("leaked overflow page {} after failed write: {}", index, cleanup);
                }
            }
            Err(err)
        }
    }
}

fn write_chain_pages(
    pages: &mut dyn PageManager,
    bytes: &[u8],
    created: &mut Vec<PageIndex>,
) -> Result<PageIndex> {
    let (extended_payload, data_payload) = payload_sizes(pages.page_size())?;

    let mut page = pages.create_page()?;
    created.push(page.index());
    let head = page.index();
    let mut remaining = bytes;

    while remaining.len() > data_payload {
        let (chunk, rest) = remaining.split_at(extended_payload);
        let next = pages.create_page()?;
        created.push(next.index());

        page.write_u8(PAGE_TYPE_EXTENDED)?;
        page.write_u32(next.index())?;
        page.write_u16(0)?;
        page.write_bytes(chunk)?;
        page.record_used_length(5)?;
        pages.release_page(page)?;

        page = next;
        remaining = rest;
    }

    page.write_u8(PAGE_TYPE_DATA)?;
    page.write_u16(0)?;
    page.write_bytes(remaining)?;
    page.record_used_length(1)?;
    pages.release_page(page)?;
    Ok(head)
}

/// Read the chain at `head`, releasing every page.
pub fn read_chain(pages: &mut dyn PageManager, head: PageIndex) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    walk_chain(pages, head, Some(&mut out))?;
    Ok(out)
}

/// Free every page of the chain at `head` and return how many were freed.
///
/// Payload lengths are not checked, so a damaged length does not stop the
/// walk. A bad tag or a dangling link ends it with an error after the pages
/// reached so far have been freed. A page with a foreign tag is released,
/// never freed: it may belong to something else.
pub fn free_chain(pages: &mut dyn PageManager, head: PageIndex) -> Result<usize> {
    walk_chain(pages, head, None)
}

/// Visit every page of a chain. With `out` the payloads are collected and
/// pages released; without it pages are removed.
fn walk_chain(
    pages: &mut dyn PageManager,
    head: PageIndex,
    mut out: Option<&mut Vec<u8>>,
) -> Result<usize> {
    let mut visited = HashSet::new();
    let mut current = head;
    loop {
        if !visited.insert(current) {
            return Err(StorageError::corrupt_page(
                current,
                "overflow chain revisits a page",
            ));
        }

        let mut page = pages.get_page(current)?;
        let step = read_link(&mut page, out.as_deref_mut());
        let foreign = matches!(step, Err(StorageError::CorruptChain { .. }));
        let finished = if out.is_some() || foreign {
            pages.release_page(page)
        } else {
            pages.remove_page(page)
        };
        let next = step?;
        finished?;

        match next {
            Some(next) => current = next,
            None => return Ok(visited.len()),
        }
    }
}

/// Parse one chain page, appending its payload to `out` if given. Returns
/// the successor of an EXTENDED page, `None` for the DATA page.
fn read_link(page: &mut Page, out: Option<&mut Vec<u8>>) -> Result<Option<PageIndex>> {
    page.set_offset(0)?;
    let tag = page.read_u8()?;
    let (next, header) = match tag {
        PAGE_TYPE_EXTENDED => {
            let next = page.read_u32()?;
            if next == NO_PAGE {
                return Err(StorageError::corrupt_page(
                    page.index(),
                    "EXTENDED page has no successor",
                ));
            }
            (Some(next), EXTENDED_HEADER_SIZE)
        }
        PAGE_TYPE_DATA => (None, DATA_HEADER_SIZE),
        other => {
            return Err(StorageError::CorruptChain {
                page: page.index(),
                tag: other,
            })
        }
    };

    if let Some(out) = out {
        let used = page.read_u16()? as usize;
        if used < header || used > page.size() {
            return Err(StorageError::corrupt_page(
                page.index(),
                format!("used length {} outside {}..={}", used, header, page.size()),
            ));
        }
        out.extend_from_slice(&page.read_bytes(used - header)?);
    }
    Ok(next)
}

/// Stores values of any size in overflow chains; the slot is the chain head.
pub struct OverflowValueManager<T, S> {
    serializer: S,
    _marker: PhantomData<fn() -> T>,
}

impl<T, S: ValueSerializer<T>> OverflowValueManager<T, S> {
    pub fn new(serializer: S) -> Self {
        Self {
            serializer,
            _marker: PhantomData,
        }
    }
}

impl OverflowValueManager<String, Utf8Serializer> {
    pub fn strings() -> Self {
        Self::new(Utf8Serializer)
    }
}

impl OverflowValueManager<Vec<u8>, BytesSerializer> {
    pub fn bytes() -> Self {
        Self::new(BytesSerializer)
    }
}

impl<T: Serialize + DeserializeOwned> OverflowValueManager<T, JsonSerializer<T>> {
    pub fn json() -> Self {
        Self::new(JsonSerializer::new())
    }
}

fn slot_pointer(slot: &[u8]) -> Result<PageIndex> {
    if slot.len() != POINTER_SIZE {
        return Err(StorageError::Encoding(format!(
            "overflow slot of {} bytes, expected {}",
            slot.len(),
            POINTER_SIZE
        )));
    }
    Ok(BigEndian::read_u32(slot))
}

impl<T, S: ValueSerializer<T>> PageValueManager<T> for OverflowValueManager<T, S> {
    fn slot_width(&self) -> usize {
        POINTER_SIZE
    }

    fn encode(&self, pages: &mut dyn PageManager, value: &T) -> Result<Vec<u8>> {
        let bytes = self.serializer.serialize(value)?;
        let head = write_chain(pages, &bytes)?;
        let mut slot = vec![0u8; POINTER_SIZE];
        BigEndian::write_u32(&mut slot, head);
        Ok(slot)
    }

    fn decode(&self, pages: &mut dyn PageManager, slot: &[u8]) -> Result<T> {
        let bytes = read_chain(pages, slot_pointer(slot)?)?;
        self.serializer.deserialize(bytes)
    }

    fn dispose(&self, pages: &mut dyn PageManager, slot: &[u8]) -> Result<()> {
        let head = slot_pointer(slot)?;
        let freed = free_chain(pages, head)?;
        trace!("disposed chain at {} ({} pages)", head, freed);
        Ok(())
    }
}
