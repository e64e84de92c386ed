//! Leaf-by-leaf iteration over a [`BPlusTreeMap`].
//!
//! A [`LeafCursor`] decodes one leaf at a time into a buffer and follows the
//! next-leaf links. It does not borrow the map between steps; instead it
//! remembers the map's modification count and fails the first step taken
//! after the map changed. [`LeafIter`] wraps a cursor around a borrowed map
//! as a standard [`Iterator`].

use std::marker::PhantomData;

use log::trace;

use crate::btree::BPlusTreeMap;
use crate::codec::PageValueManager;
use crate::error::{Result, StorageError};
use crate::page::{PageIndex, PageManager};

/// Selects what a leaf scan yields.
pub trait LeafPart<K, V> {
    type Item;

    fn decode(
        keys: &dyn PageValueManager<K>,
        values: &dyn PageValueManager<V>,
        pages: &mut dyn PageManager,
        key: &[u8],
        value: &[u8],
    ) -> Result<Self::Item>;
}

/// Yield keys only.
pub struct Keys;

/// Yield values only.
pub struct Values;

/// Yield (key, value) pairs.
pub struct Entries;

impl<K, V> LeafPart<K, V> for Keys {
    type Item = K;

    fn decode(
        keys: &dyn PageValueManager<K>,
        _values: &dyn PageValueManager<V>,
        pages: &mut dyn PageManager,
        key: &[u8],
        _value: &[u8],
    ) -> Result<K> {
        keys.decode(pages, key)
    }
}

impl<K, V> LeafPart<K, V> for Values {
    type Item = V;

    fn decode(
        _keys: &dyn PageValueManager<K>,
        values: &dyn PageValueManager<V>,
        pages: &mut dyn PageManager,
        _key: &[u8],
        value: &[u8],
    ) -> Result<V> {
        values.decode(pages, value)
    }
}

impl<K, V> LeafPart<K, V> for Entries {
    type Item = (K, V);

    fn decode(
        keys: &dyn PageValueManager<K>,
        values: &dyn PageValueManager<V>,
        pages: &mut dyn PageManager,
        key: &[u8],
        value: &[u8],
    ) -> Result<(K, V)> {
        Ok((keys.decode(pages, key)?, values.decode(pages, value)?))
    }
}

enum Position {
    Start,
    Leaf(PageIndex),
    Done,
}

/// A resumable scan position, detached from the map.
pub struct LeafCursor<K, V, P: LeafPart<K, V>> {
    buffer: std::vec::IntoIter<P::Item>,
    position: Position,
    expected_mod_count: u64,
    _marker: PhantomData<fn() -> (K, V, P)>,
}

impl<K: 'static, V: 'static, P: LeafPart<K, V>> LeafCursor<K, V, P> {
    /// Start a scan of `map` at its smallest key.
    pub fn new<M: PageManager>(map: &BPlusTreeMap<K, V, M>) -> Self {
        Self {
            buffer: Vec::new().into_iter(),
            position: Position::Start,
            expected_mod_count: map.mod_count(),
            _marker: PhantomData,
        }
    }

    /// Produce the next item, or `None` once the last leaf is exhausted.
    ///
    /// Fails with [`StorageError::ConcurrentModification`] if `map` was
    /// modified since the cursor was created.
    pub fn advance<M: PageManager>(
        &mut self,
        map: &mut BPlusTreeMap<K, V, M>,
    ) -> Result<Option<P::Item>> {
        if map.mod_count() != self.expected_mod_count {
            return Err(StorageError::ConcurrentModification {
                expected: self.expected_mod_count,
                found: map.mod_count(),
            });
        }

        loop {
            if let Some(item) = self.buffer.next() {
                return Ok(Some(item));
            }
            let leaf = match self.position {
                Position::Start => map.first_leaf()?,
                Position::Leaf(leaf) => leaf,
                Position::Done => return Ok(None),
            };
            let mut items = Vec::new();
            let next = map.get_leaf_values::<P>(&mut items, leaf)?;
            trace!("cursor loaded {} items from leaf {}", items.len(), leaf);
            self.position = next.map_or(Position::Done, Position::Leaf);
            self.buffer = items.into_iter();
        }
    }
}

/// Iterator over a borrowed map. Yields `Err` at most once, then ends.
pub struct LeafIter<'a, K, V, M: PageManager, P: LeafPart<K, V>> {
    map: &'a mut BPlusTreeMap<K, V, M>,
    cursor: LeafCursor<K, V, P>,
    failed: bool,
}

impl<'a, K: 'static, V: 'static, M: PageManager, P: LeafPart<K, V>> LeafIter<'a, K, V, M, P> {
    pub fn new(map: &'a mut BPlusTreeMap<K, V, M>) -> Self {
        let cursor = LeafCursor::new(map);
        Self {
            map,
            cursor,
            failed: false,
        }
    }
}

impl<K: 'static, V: 'static, M: PageManager, P: LeafPart<K, V>> Iterator
    for LeafIter<'_, K, V, M, P>
{
    type Item = Result<P::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.cursor.advance(self.map) {
            Ok(item) => item.map(Ok),
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

/// Collection-style view of a map's keys or values. `len` comes from the
/// map's entry count without scanning.
pub struct LeafSetView<'a, K, V, M: PageManager, P: LeafPart<K, V>> {
    map: &'a mut BPlusTreeMap<K, V, M>,
    _marker: PhantomData<fn() -> P>,
}

impl<'a, K: 'static, V: 'static, M: PageManager, P: LeafPart<K, V>> LeafSetView<'a, K, V, M, P> {
    pub fn new(map: &'a mut BPlusTreeMap<K, V, M>) -> Self {
        Self {
            map,
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&mut self) -> LeafIter<'_, K, V, M, P> {
        LeafIter::new(&mut *self.map)
    }
}

impl<K: 'static, V: 'static, M: PageManager> LeafSetView<'_, K, V, M, Keys> {
    pub fn contains(&mut self, key: &K) -> Result<bool> {
        self.map.contains_key(key)
    }
}

impl<'a, K: 'static, V: 'static, M: PageManager, P: LeafPart<K, V>> IntoIterator
    for LeafSetView<'a, K, V, M, P>
{
    type Item = Result<P::Item>;
    type IntoIter = LeafIter<'a, K, V, M, P>;

    fn into_iter(self) -> Self::IntoIter {
        LeafIter::new(self.map)
    }
}
