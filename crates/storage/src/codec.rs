//! Value codecs: how a typed key or value becomes bytes inside a tree node.
//!
//! Every codec produces a fixed-width *slot*. A [`FixedValueManager`] stores
//! the value itself in the slot; an [`OverflowValueManager`](crate::overflow::OverflowValueManager)
//! stores a 4-byte pointer to an overflow chain. The map picks one per key and
//! per value when it is constructed.

use std::marker::PhantomData;

use byteorder::{BigEndian, ByteOrder};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, StorageError};
use crate::page::{Page, PageManager};

/// Encodes, decodes and disposes values stored in pages.
pub trait PageValueManager<T> {
    /// Width in bytes of the slot this codec writes into a node.
    fn slot_width(&self) -> usize;

    /// Encode `value`, allocating any pages it needs, and return its slot.
    fn encode(&self, pages: &mut dyn PageManager, value: &T) -> Result<Vec<u8>>;

    /// Decode the value a slot refers to.
    fn decode(&self, pages: &mut dyn PageManager, slot: &[u8]) -> Result<T>;

    /// Free every page owned by the slot.
    fn dispose(&self, pages: &mut dyn PageManager, slot: &[u8]) -> Result<()>;

    /// Read a slot at the page cursor and decode it.
    fn read_from_page(&self, pages: &mut dyn PageManager, page: &mut Page) -> Result<T> {
        let slot = page.read_bytes(self.slot_width())?;
        self.decode(pages, &slot)
    }
}

/// Scalars with a fixed big-endian encoding.
pub trait FixedWidth: Sized {
    const WIDTH: usize;

    fn write_be(&self, buf: &mut [u8]);

    fn read_be(buf: &[u8]) -> Self;
}

impl FixedWidth for i32 {
    const WIDTH: usize = 4;

    fn write_be(&self, buf: &mut [u8]) {
        BigEndian::write_i32(buf, *self);
    }

    fn read_be(buf: &[u8]) -> Self {
        BigEndian::read_i32(buf)
    }
}

impl FixedWidth for u32 {
    const WIDTH: usize = 4;

    fn write_be(&self, buf: &mut [u8]) {
        BigEndian::write_u32(buf, *self);
    }

    fn read_be(buf: &[u8]) -> Self {
        BigEndian::read_u32(buf)
    }
}

impl FixedWidth for i64 {
    const WIDTH: usize = 8;

    fn write_be(&self, buf: &mut [u8]) {
        BigEndian::write_i64(buf, *self);
    }

    fn read_be(buf: &[u8]) -> Self {
        BigEndian::read_i64(buf)
    }
}

impl FixedWidth for f64 {
    const WIDTH: usize = 8;

    fn write_be(&self, buf: &mut [u8]) {
        BigEndian::write_f64(buf, *self);
    }

    fn read_be(buf: &[u8]) -> Self {
        BigEndian::read_f64(buf)
    }
}

/// Stores a [`FixedWidth`] scalar inline in its slot. Owns no pages.
pub struct FixedValueManager<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> FixedValueManager<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for FixedValueManager<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: FixedWidth> PageValueManager<T> for FixedValueManager<T> {
    fn slot_width(&self) -> usize {
        T::WIDTH
    }

    fn encode(&self, _pages: &mut dyn PageManager, value: &T) -> Result<Vec<u8>> {
        let mut slot = vec![0u8; T::WIDTH];
        value.write_be(&mut slot);
        Ok(slot)
    }

    fn decode(&self, _pages: &mut dyn PageManager, slot: &[u8]) -> Result<T> {
        if slot.len() != T::WIDTH {
            return Err(StorageError::Encoding(format!(
                "fixed-width slot of {} bytes, expected {}",
                slot.len(),
                T::WIDTH
            )));
        }
        Ok(T::read_be(slot))
    }

    fn dispose(&self, _pages: &mut dyn PageManager, _slot: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Converts values to and from the byte strings stored in overflow chains.
pub trait ValueSerializer<T> {
    fn serialize(&self, value: &T) -> Result<Vec<u8>>;

    fn deserialize(&self, bytes: Vec<u8>) -> Result<T>;
}

/// UTF-8 strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Serializer;

impl ValueSerializer<String> for Utf8Serializer {
    fn serialize(&self, value: &String) -> Result<Vec<u8>> {
        Ok(value.as_bytes().to_vec())
    }

    fn deserialize(&self, bytes: Vec<u8>) -> Result<String> {
        String::from_utf8(bytes).map_err(|e| StorageError::Encoding(e.to_string()))
    }
}

/// Raw byte strings, stored unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesSerializer;

impl ValueSerializer<Vec<u8>> for BytesSerializer {
    fn serialize(&self, value: &Vec<u8>) -> Result<Vec<u8>> {
        Ok(value.clone())
    }

    fn deserialize(&self, bytes: Vec<u8>) -> Result<Vec<u8>> {
        Ok(bytes)
    }
}

/// Any serde type, stored as JSON.
pub struct JsonSerializer<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonSerializer<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonSerializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize + DeserializeOwned> ValueSerializer<T> for JsonSerializer<T> {
    fn serialize(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| StorageError::Encoding(e.to_string()))
    }

    fn deserialize(&self, bytes: Vec<u8>) -> Result<T> {
        serde_json::from_slice(&bytes).map_err(|e| StorageError::Encoding(e.to_string()))
    }
}
