//! Position-indexed list stored in an ordered page map.
//!
//! Element `i` lives under key `i`. Positions stay dense: inserting or removing
//! shifts every later element by one, so these are O(n) page operations.

use log::{debug, trace};
use pagetree_storage::{
    BPlusTreeMap, FixedValueManager, LeafIter, PageManager, PageValueManager, Result,
    StorageError, Values,
};

/// A dense 0-based list over a `BPlusTreeMap<i32, V, M>`.
pub struct IndexedList<V, M: PageManager> {
    map: BPlusTreeMap<i32, V, M>,
    len: usize,
}

impl<V: 'static, M: PageManager> IndexedList<V, M> {
    /// Create an empty list whose elements are encoded with `values`.
    pub fn create<C>(pages: M, values: C) -> Result<Self>
    where
        C: PageValueManager<V> + 'static,
    {
        let map = BPlusTreeMap::create(pages, FixedValueManager::<i32>::new(), values)?;
        Ok(Self { map, len: 0 })
    }

    /// Wrap an existing map. Its keys must be exactly `0..map.len()`.
    pub fn from_map(mut map: BPlusTreeMap<i32, V, M>) -> Result<Self> {
        for (expected, key) in map.keys().enumerate() {
            let key = key?;
            if position(expected)? != key {
                return Err(StorageError::Inconsistent(format!(
                    "list position {} missing (found key {})",
                    expected, key
                )));
            }
        }
        let len = map.len();
        Ok(Self { map, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Element at `index`.
    pub fn get(&mut self, index: usize) -> Result<V> {
        let pos = self.checked(index, self.len)?;
        self.map.get(&pos)?.ok_or_else(|| hole(pos))
    }

    /// Replace the element at `index`, returning the old one.
    pub fn set(&mut self, index: usize, value: V) -> Result<V> {
        let pos = self.checked(index, self.len)?;
        self.map.put(pos, value)?.ok_or_else(|| hole(pos))
    }

    /// Insert `value` at `index`, moving later elements up by one.
    pub fn add(&mut self, index: usize, value: V) -> Result<()> {
        let target = self.checked(index, self.len + 1)?;
        let end = position(self.len)?;
        // Highest position first, so nothing is overwritten before it moves.
        for pos in (target..end).rev() {
            let moved = self.map.get(&pos)?.ok_or_else(|| hole(pos))?;
            self.map.put(pos + 1, moved)?;
        }
        self.map.put(target, value)?;
        self.len += 1;
        trace!("inserted at {}; shifted {} elements", target, end - target);
        Ok(())
    }

    /// Append to the end.
    pub fn push(&mut self, value: V) -> Result<()> {
        self.add(self.len, value)
    }

    /// Remove and return the element at `index`, moving later elements down.
    pub fn remove(&mut self, index: usize) -> Result<V> {
        let target = self.checked(index, self.len)?;
        let removed = self.map.get(&target)?.ok_or_else(|| hole(target))?;
        let last = position(self.len - 1)?;
        for pos in target..last {
            let moved = self.map.get(&(pos + 1))?.ok_or_else(|| hole(pos + 1))?;
            self.map.put(pos, moved)?;
        }
        self.map.remove(&last)?;
        self.len -= 1;
        trace!("removed {}; shifted {} elements", target, last - target);
        Ok(removed)
    }

    /// Elements in list order.
    pub fn iter(&mut self) -> LeafIter<'_, i32, V, M, Values> {
        self.map.values()
    }

    pub fn to_vec(&mut self) -> Result<Vec<V>> {
        self.iter().collect()
    }

    pub fn map(&self) -> &BPlusTreeMap<i32, V, M> {
        &self.map
    }

    pub fn into_map(self) -> BPlusTreeMap<i32, V, M> {
        debug!("list of {} elements released its map", self.len);
        self.map
    }

    /// Position for `index`, which must be below `bound`.
    fn checked(&self, index: usize, bound: usize) -> Result<i32> {
        if index >= bound {
            return Err(StorageError::InvalidArgument(format!(
                "index {} out of range for list of length {}",
                index, self.len
            )));
        }
        position(index)
    }
}

fn position(index: usize) -> Result<i32> {
    i32::try_from(index).map_err(|_| {
        StorageError::InvalidArgument(format!("index {} exceeds the largest list position", index))
    })
}

fn hole(pos: i32) -> StorageError {
    StorageError::Inconsistent(format!("no element stored at list position {}", pos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagetree_storage::{MemoryPageManager, OverflowValueManager, Utf8Serializer};

    type StringList = IndexedList<String, MemoryPageManager>;

    fn list_of(items: &[&str]) -> StringList {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut list =
            IndexedList::create(MemoryPageManager::new(64), OverflowValueManager::strings())
                .unwrap();
        for item in items {
            list.push(item.to_string()).unwrap();
        }
        list
    }

    #[test]
    fn add_in_middle_shifts_later_elements() {
        let mut list = list_of(&["a", "b", "c"]);
        list.add(1, "x".to_string()).unwrap();
        assert_eq!(list.len(), 4);
        assert_eq!(list.map().len(), 4);
        for (i, expected) in ["a", "x", "b", "c"].iter().enumerate() {
            assert_eq!(list.get(i).unwrap(), *expected);
        }
    }

    #[test]
    fn add_at_both_ends() {
        let mut list = list_of(&["m"]);
        list.add(0, "first".to_string()).unwrap();
        list.add(2, "last".to_string()).unwrap();
        assert_eq!(list.to_vec().unwrap(), vec!["first", "m", "last"]);
    }

    #[test]
    fn out_of_range_indexes_are_rejected() {
        let mut list = list_of(&["a", "b", "c"]);
        assert!(matches!(list.get(3), Err(StorageError::InvalidArgument(_))));
        assert!(matches!(
            list.set(3, "z".to_string()),
            Err(StorageError::InvalidArgument(_))
        ));
        assert!(matches!(
            list.add(5, "z".to_string()),
            Err(StorageError::InvalidArgument(_))
        ));
        assert!(matches!(list.remove(3), Err(StorageError::InvalidArgument(_))));
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn set_returns_previous_element() {
        let mut list = list_of(&["a", "b"]);
        assert_eq!(list.set(1, "B".to_string()).unwrap(), "b");
        assert_eq!(list.to_vec().unwrap(), vec!["a", "B"]);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn remove_shifts_later_elements_down() {
        let mut list = list_of(&["a", "b", "c", "d"]);
        assert_eq!(list.remove(1).unwrap(), "b");
        assert_eq!(list.to_vec().unwrap(), vec!["a", "c", "d"]);
        assert_eq!(list.remove(2).unwrap(), "d");
        assert_eq!(list.len(), 2);
        assert_eq!(list.map().len(), 2);
    }

    #[test]
    fn repeated_front_inserts_span_many_pages() {
        let mut list = list_of(&[]);
        for i in 0..120 {
            list.add(0, format!("item-{}-{}", i, "-".repeat(i % 70))).unwrap();
        }
        let items = list.to_vec().unwrap();
        assert_eq!(items.len(), 120);
        for (i, item) in items.iter().enumerate() {
            assert!(item.starts_with(&format!("item-{}-", 119 - i)), "{}", item);
        }
    }

    #[test]
    fn emptying_the_list_frees_value_chains() {
        let mut list = list_of(&["one", "two", "three"]);
        list.add(1, "y".repeat(300)).unwrap();
        while !list.is_empty() {
            list.remove(0).unwrap();
        }
        assert_eq!(list.map().pages().page_count(), 1);
    }

    #[test]
    fn from_map_requires_dense_positions() {
        let mut map = BPlusTreeMap::create(
            MemoryPageManager::new(64),
            FixedValueManager::<i32>::new(),
            OverflowValueManager::<String, Utf8Serializer>::strings(),
        )
        .unwrap();
        map.put(0, "a".to_string()).unwrap();
        map.put(1, "b".to_string()).unwrap();
        map.put(3, "d".to_string()).unwrap();
        assert!(matches!(
            IndexedList::from_map(map),
            Err(StorageError::Inconsistent(_))
        ));

        let list = list_of(&["p", "q"]);
        let mut list = IndexedList::from_map(list.into_map()).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.get(1).unwrap(), "q");
    }
}
