//! Ordered page map: a B+tree whose nodes live in pages.
//!
//! Keys and values are turned into fixed-width slots by the map's two
//! [`PageValueManager`]s, so node capacity follows directly from the page size.
//! Leaves hold (key, value) slots in ascending key order and are linked left
//! to right. Interior nodes hold separator keys; child `i + 1` holds the keys
//! `>= separator[i]`. The root page index never changes for the life of a map.
//!
//! ## Page Layout
//!
//! ### Leaf
//! ```text
//! [0]      page_type: u8 (0x01)
//! [1..3]   used length: u16
//! [3..7]   next leaf: u32 (0xFFFF_FFFF = none)
//! [7..]    (key slot, value slot)*
//! ```
//!
//! ### Interior
//! ```text
//! [0]      page_type: u8 (0x00)
//! [1..3]   used length: u16
//! [3..7]   first child: u32
//! [7..]    (separator key slot, child: u32)*
//! ```
//!
//! A separator always owns its own encoding of the key. With an overflowing
//! key codec that means its own chain, disposed when the separator goes away.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt::Debug;

use log::{debug, warn};

use crate::codec::PageValueManager;
use crate::config::{validate_page_size, TreeConfig};
use crate::error::{Result, StorageError};
use crate::iter::{Entries, Keys, LeafCursor, LeafIter, LeafPart, LeafSetView, Values};
use crate::page::{
    free_page, with_new_page, with_page, Page, PageIndex, PageManager, NO_PAGE,
    PAGE_TYPE_INTERIOR, PAGE_TYPE_LEAF,
};
use crate::pager::Pager;

/// Node header: type, used length and the next-leaf / first-child link.
const NODE_HEADER_SIZE: usize = 7;

/// Size of a child pointer in an interior node.
const CHILD_POINTER_SIZE: usize = 4;

/// Orders two keys; `None` marks keys that cannot be ordered.
pub type Comparator<K> = Box<dyn Fn(&K, &K) -> Option<Ordering>>;

/// An ordered map from `K` to `V` stored in pages from `M`.
pub struct BPlusTreeMap<K, V, M: PageManager> {
    pages: M,
    root: PageIndex,
    keys: Box<dyn PageValueManager<K>>,
    values: Box<dyn PageValueManager<V>>,
    compare: Comparator<K>,
    leaf_capacity: usize,
    interior_capacity: usize,
    min_fill_percent: usize,
    len: usize,
    mod_count: u64,
}

impl<K: 'static, V: 'static, M: PageManager> BPlusTreeMap<K, V, M> {
    /// Create an empty map ordered by `K`'s `PartialOrd`.
    pub fn create<KC, VC>(pages: M, keys: KC, values: VC) -> Result<Self>
    where
        K: PartialOrd,
        KC: PageValueManager<K> + 'static,
        VC: PageValueManager<V> + 'static,
    {
        Self::create_with(
            pages,
            keys,
            values,
            |a: &K, b: &K| a.partial_cmp(b),
            &TreeConfig::default(),
        )
    }

    /// Create an empty map with a caller-supplied comparator.
    pub fn create_with<KC, VC, C>(
        pages: M,
        keys: KC,
        values: VC,
        compare: C,
        config: &TreeConfig,
    ) -> Result<Self>
    where
        KC: PageValueManager<K> + 'static,
        VC: PageValueManager<V> + 'static,
        C: Fn(&K, &K) -> Option<Ordering> + 'static,
    {
        let mut map = Self::assemble(
            pages,
            Box::new(keys),
            Box::new(values),
            Box::new(compare),
            config,
        )?;
        map.root = map.allocate(&LeafNode::empty())?;
        debug!(
            "created map at root {} (leaf capacity {}, interior capacity {})",
            map.root, map.leaf_capacity, map.interior_capacity
        );
        Ok(map)
    }

    /// Re-attach to a map previously created at `root`.
    pub fn open<KC, VC>(pages: M, root: PageIndex, keys: KC, values: VC) -> Result<Self>
    where
        K: PartialOrd,
        KC: PageValueManager<K> + 'static,
        VC: PageValueManager<V> + 'static,
    {
        Self::open_with(
            pages,
            root,
            keys,
            values,
            |a: &K, b: &K| a.partial_cmp(b),
            &TreeConfig::default(),
        )
    }

    /// Re-attach with a custom comparator. The entry count is established
    /// once by walking the leaves.
    pub fn open_with<KC, VC, C>(
        pages: M,
        root: PageIndex,
        keys: KC,
        values: VC,
        compare: C,
        config: &TreeConfig,
    ) -> Result<Self>
    where
        KC: PageValueManager<K> + 'static,
        VC: PageValueManager<V> + 'static,
        C: Fn(&K, &K) -> Option<Ordering> + 'static,
    {
        let mut map = Self::assemble(
            pages,
            Box::new(keys),
            Box::new(values),
            Box::new(compare),
            config,
        )?;
        map.root = root;
        map.len = map.count_entries()?;
        debug!("opened map at root {} with {} entries", root, map.len);
        Ok(map)
    }

    fn assemble(
        pages: M,
        keys: Box<dyn PageValueManager<K>>,
        values: Box<dyn PageValueManager<V>>,
        compare: Comparator<K>,
        config: &TreeConfig,
    ) -> Result<Self> {
        config.validate()?;
        let page_size = pages.page_size();
        validate_page_size(page_size)?;
        if keys.slot_width() == 0 {
            return Err(StorageError::InvalidArgument(
                "key slots must not be empty".to_string(),
            ));
        }

        let body = page_size - NODE_HEADER_SIZE;
        let leaf_capacity = body / (keys.slot_width() + values.slot_width());
        let interior_capacity = body / (keys.slot_width() + CHILD_POINTER_SIZE);
        if leaf_capacity < 2 || interior_capacity < 2 {
            return Err(StorageError::InvalidArgument(format!(
                "page size {} too small for {}-byte keys and {}-byte values",
                page_size,
                keys.slot_width(),
                values.slot_width()
            )));
        }

        Ok(Self {
            pages,
            root: NO_PAGE,
            keys,
            values,
            compare,
            leaf_capacity,
            interior_capacity,
            min_fill_percent: config.min_fill_percent,
            len: 0,
            mod_count: 0,
        })
    }

    /// Look up a key.
    pub fn get(&mut self, key: &K) -> Result<Option<V>> {
        self.check_key(key)?;
        let (_, leaf) = self.descend(key)?;
        match self.search(&leaf.keys, key)? {
            Ok(pos) => Ok(Some(self.values.decode(&mut self.pages, &leaf.values[pos])?)),
            Err(_) => Ok(None),
        }
    }

    pub fn contains_key(&mut self, key: &K) -> Result<bool> {
        self.check_key(key)?;
        let (_, leaf) = self.descend(key)?;
        Ok(self.search(&leaf.keys, key)?.is_ok())
    }

    /// Insert or replace. Returns the previous value for the key, if any;
    /// its pages are freed.
    pub fn put(&mut self, key: K, value: V) -> Result<Option<V>> {
        self.check_key(&key)?;
        let root = self.root;
        // The leaf write updates len and mod_count, so they stay accurate
        // even if a later step up the tree fails.
        match self.insert_into(root, &key, &value)? {
            InsertResult::Replaced(old) => Ok(Some(old)),
            InsertResult::Inserted => Ok(None),
            InsertResult::Split {
                separator,
                new_page,
            } => {
                self.grow_root(separator, new_page)?;
                Ok(None)
            }
        }
    }

    /// Delete a key, returning its value.
    pub fn remove(&mut self, key: &K) -> Result<Option<V>> {
        self.check_key(key)?;
        let root = self.root;
        let result = self.delete_from(root, key, true)?;
        if result.removed.is_some() {
            self.compact_root()?;
        }
        Ok(result.removed)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Counter bumped by every insert, replacement and removal.
    pub fn mod_count(&self) -> u64 {
        self.mod_count
    }

    pub fn root_page(&self) -> PageIndex {
        self.root
    }

    pub fn pages(&self) -> &M {
        &self.pages
    }

    /// The leftmost leaf, where a full scan starts.
    pub fn first_leaf(&mut self) -> Result<PageIndex> {
        let mut current = self.root;
        loop {
            match self.load(current)? {
                Node::Leaf(_) => return Ok(current),
                Node::Interior(node) => current = node.children[0],
            }
        }
    }

    /// Decode one leaf into `buffer` and return the next leaf, `None` after
    /// the last one. `P` selects keys, values or entries.
    pub fn get_leaf_values<P: LeafPart<K, V>>(
        &mut self,
        buffer: &mut Vec<P::Item>,
        leaf_page: PageIndex,
    ) -> Result<Option<PageIndex>> {
        let leaf = match self.load(leaf_page)? {
            Node::Leaf(leaf) => leaf,
            Node::Interior(_) => {
                return Err(StorageError::corrupt_page(leaf_page, "expected a leaf page"))
            }
        };
        buffer.reserve(leaf.keys.len());
        for (key, value) in leaf.keys.iter().zip(&leaf.values) {
            buffer.push(P::decode(
                self.keys.as_ref(),
                self.values.as_ref(),
                &mut self.pages,
                key,
                value,
            )?);
        }
        Ok(leaf.next)
    }

    pub fn keys(&mut self) -> LeafIter<'_, K, V, M, Keys> {
        LeafIter::new(self)
    }

    pub fn values(&mut self) -> LeafIter<'_, K, V, M, Values> {
        LeafIter::new(self)
    }

    /// All (key, value) pairs in key order.
    pub fn iter(&mut self) -> LeafIter<'_, K, V, M, Entries> {
        LeafIter::new(self)
    }

    pub fn key_set(&mut self) -> LeafSetView<'_, K, V, M, Keys> {
        LeafSetView::new(self)
    }

    pub fn values_view(&mut self) -> LeafSetView<'_, K, V, M, Values> {
        LeafSetView::new(self)
    }

    /// A detached cursor. The map is passed to every `advance`, so it may be
    /// modified between steps; the next step then fails.
    pub fn cursor<P: LeafPart<K, V>>(&self) -> LeafCursor<K, V, P> {
        LeafCursor::new(self)
    }

    /// Free every page of the tree, chains included, and hand back the
    /// page manager.
    pub fn reclaim(mut self) -> Result<M> {
        let mut order = Vec::new();
        let mut visited = HashSet::new();
        let root = self.root;
        self.collect_tree_pages(root, &mut order, &mut visited)?;

        for page_num in order.iter().copied() {
            free_page(&mut self.pages, page_num)?;
        }
        debug!("reclaimed {} tree pages from root {}", order.len(), root);
        Ok(self.pages)
    }

    // ─── Internal helpers ────────────────────────────────────────────────

    fn check_key(&self, key: &K) -> Result<()> {
        match (self.compare)(key, key) {
            Some(Ordering::Equal) => Ok(()),
            _ => Err(StorageError::InvalidArgument(
                "key cannot be ordered by the map's comparator".to_string(),
            )),
        }
    }

    fn order(&self, a: &K, b: &K) -> Result<Ordering> {
        (self.compare)(a, b).ok_or_else(|| {
            StorageError::InvalidArgument("keys cannot be ordered against each other".to_string())
        })
    }

    /// Binary search over encoded keys: `Ok(pos)` on a match, otherwise
    /// `Err(insertion point)`.
    fn search(&mut self, slots: &[Vec<u8>], key: &K) -> Result<std::result::Result<usize, usize>> {
        let (mut lo, mut hi) = (0, slots.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let probe = self.keys.decode(&mut self.pages, &slots[mid])?;
            match self.order(&probe, key)? {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return Ok(Ok(mid)),
            }
        }
        Ok(Err(lo))
    }

    /// Index of the child whose subtree may hold `key`.
    fn child_index(&mut self, node: &InteriorNode, key: &K) -> Result<usize> {
        Ok(match self.search(&node.keys, key)? {
            Ok(pos) => pos + 1,
            Err(pos) => pos,
        })
    }

    fn descend(&mut self, key: &K) -> Result<(PageIndex, LeafNode)> {
        let mut current = self.root;
        loop {
            match self.load(current)? {
                Node::Leaf(leaf) => return Ok((current, leaf)),
                Node::Interior(node) => {
                    let idx = self.child_index(&node, key)?;
                    current = node.children[idx];
                }
            }
        }
    }

    /// Decode a key slot and encode it again, producing an independent copy.
    fn copy_key(&mut self, slot: &[u8]) -> Result<Vec<u8>> {
        let key = self.keys.decode(&mut self.pages, slot)?;
        self.keys.encode(&mut self.pages, &key)
    }

    fn load(&mut self, page_num: PageIndex) -> Result<Node> {
        let (key_width, value_width) = (self.keys.slot_width(), self.values.slot_width());
        with_page(&mut self.pages, page_num, |_, page| {
            read_node(page, key_width, value_width)
        })
    }

    fn store<N: NodeLayout>(&mut self, page_num: PageIndex, node: &N) -> Result<()> {
        with_page(&mut self.pages, page_num, |_, page| node.write_to(page))
    }

    fn allocate<N: NodeLayout>(&mut self, node: &N) -> Result<PageIndex> {
        with_new_page(&mut self.pages, |_, page| {
            node.write_to(page)?;
            Ok(page.index())
        })
    }

    /// Cleanup after a failed update. The caller returns the original error,
    /// so a failure here is only logged.
    fn discard_key(&mut self, slot: &[u8]) {
        if let Err(err) = self.keys.dispose(&mut self.pages, slot) {
            warn!("leaked key encoding after failed update: {}", err);
        }
    }

    fn discard_value(&mut self, slot: &[u8]) {
        if let Err(err) = self.values.dispose(&mut self.pages, slot) {
            warn!("leaked value encoding after failed update: {}", err);
        }
    }

    fn discard_page(&mut self, page_num: PageIndex) {
        if let Err(err) = free_page(&mut self.pages, page_num) {
            warn!("leaked page {} after failed update: {}", page_num, err);
        }
    }

    fn leaf_is_underfull(&self, count: usize) -> bool {
        count == 0 || count * 100 < self.leaf_capacity * self.min_fill_percent
    }

    fn interior_is_underfull(&self, key_count: usize) -> bool {
        key_count == 0 || key_count * 100 < self.interior_capacity * self.min_fill_percent
    }

    /// Recursive insert.
    fn insert_into(&mut self, page_num: PageIndex, key: &K, value: &V) -> Result<InsertResult<V>> {
        match self.load(page_num)? {
            Node::Leaf(leaf) => self.insert_into_leaf(page_num, leaf, key, value),
            Node::Interior(node) => self.insert_into_interior(page_num, node, key, value),
        }
    }

    fn insert_into_leaf(
        &mut self,
        page_num: PageIndex,
        mut leaf: LeafNode,
        key: &K,
        value: &V,
    ) -> Result<InsertResult<V>> {
        match self.search(&leaf.keys, key)? {
            Ok(pos) => {
                let old_slot = leaf.values[pos].clone();
                let old = self.values.decode(&mut self.pages, &old_slot)?;
                let new_slot = self.values.encode(&mut self.pages, value)?;
                leaf.values[pos] = new_slot.clone();
                if let Err(err) = self.store(page_num, &leaf) {
                    self.discard_value(&new_slot);
                    return Err(err);
                }
                self.mod_count += 1;
                self.values.dispose(&mut self.pages, &old_slot)?;
                Ok(InsertResult::Replaced(old))
            }
            Err(pos) => {
                let key_slot = self.keys.encode(&mut self.pages, key)?;
                let value_slot = match self.values.encode(&mut self.pages, value) {
                    Ok(slot) => slot,
                    Err(err) => {
                        self.discard_key(&key_slot);
                        return Err(err);
                    }
                };
                leaf.keys.insert(pos, key_slot.clone());
                leaf.values.insert(pos, value_slot.clone());
                let outcome = if leaf.keys.len() <= self.leaf_capacity {
                    self.store(page_num, &leaf).map(|()| InsertResult::Inserted)
                } else {
                    self.split_leaf(page_num, leaf)
                };
                match outcome {
                    Ok(result) => {
                        self.len += 1;
                        self.mod_count += 1;
                        Ok(result)
                    }
                    Err(err) => {
                        self.discard_key(&key_slot);
                        self.discard_value(&value_slot);
                        Err(err)
                    }
                }
            }
        }
    }

    fn insert_into_interior(
        &mut self,
        page_num: PageIndex,
        mut node: InteriorNode,
        key: &K,
        value: &V,
    ) -> Result<InsertResult<V>> {
        let child_idx = self.child_index(&node, key)?;
        match self.insert_into(node.children[child_idx], key, value)? {
            InsertResult::Split {
                separator,
                new_page,
            } => {
                node.keys.insert(child_idx, separator);
                node.children.insert(child_idx + 1, new_page);
                if node.keys.len() <= self.interior_capacity {
                    self.store(page_num, &node)?;
                    Ok(InsertResult::Inserted)
                } else {
                    self.split_interior(page_num, node)
                }
            }
            other => Ok(other),
        }
    }

    /// Move the upper half of an overfull leaf to a new right sibling.
    fn split_leaf(&mut self, page_num: PageIndex, mut leaf: LeafNode) -> Result<InsertResult<V>> {
        let split_at = leaf.keys.len() / 2;
        let right = LeafNode {
            next: leaf.next,
            keys: leaf.keys.split_off(split_at),
            values: leaf.values.split_off(split_at),
        };
        let separator = self.copy_key(&right.keys[0])?;
        let new_page = match self.allocate(&right) {
            Ok(new_page) => new_page,
            Err(err) => {
                self.discard_key(&separator);
                return Err(err);
            }
        };
        leaf.next = Some(new_page);
        if let Err(err) = self.store(page_num, &leaf) {
            self.discard_page(new_page);
            self.discard_key(&separator);
            return Err(err);
        }
        debug!("split leaf {} at {}; new right leaf {}", page_num, split_at, new_page);
        Ok(InsertResult::Split {
            separator,
            new_page,
        })
    }

    /// Move the keys above the median to a new right sibling and promote the
    /// median itself.
    fn split_interior(
        &mut self,
        page_num: PageIndex,
        mut node: InteriorNode,
    ) -> Result<InsertResult<V>> {
        let mid = node.keys.len() / 2;
        let right_keys = node.keys.split_off(mid + 1);
        let separator = node
            .keys
            .pop()
            .ok_or_else(|| StorageError::corrupt_page(page_num, "split of empty interior"))?;
        let right = InteriorNode {
            keys: right_keys,
            children: node.children.split_off(mid + 1),
        };
        let new_page = self.allocate(&right)?;
        self.store(page_num, &node)?;
        debug!("split interior {} at {}; new right node {}", page_num, mid, new_page);
        Ok(InsertResult::Split {
            separator,
            new_page,
        })
    }

    /// The root was split: move its left half to a fresh page and turn the
    /// root page into an interior node over both halves.
    fn grow_root(&mut self, separator: Vec<u8>, right: PageIndex) -> Result<()> {
        let left_half = self.load(self.root)?;
        let left = self.allocate(&left_half)?;
        let root = InteriorNode {
            keys: vec![separator],
            children: vec![left, right],
        };
        if let Err(err) = self.store(self.root, &root) {
            self.discard_page(left);
            return Err(err);
        }
        debug!("root {} split into {} and {}", self.root, left, right);
        Ok(())
    }

    fn delete_from(&mut self, page_num: PageIndex, key: &K, is_root: bool) -> Result<DeleteResult<V>> {
        match self.load(page_num)? {
            Node::Leaf(mut leaf) => {
                let pos = match self.search(&leaf.keys, key)? {
                    Ok(pos) => pos,
                    Err(_) => return Ok(DeleteResult::missing()),
                };
                let key_slot = leaf.keys.remove(pos);
                let value_slot = leaf.values.remove(pos);
                let value = self.values.decode(&mut self.pages, &value_slot)?;
                let underflow = !is_root && self.leaf_is_underfull(leaf.keys.len());
                self.store(page_num, &leaf)?;
                self.len -= 1;
                self.mod_count += 1;
                self.keys.dispose(&mut self.pages, &key_slot)?;
                self.values.dispose(&mut self.pages, &value_slot)?;
                Ok(DeleteResult {
                    removed: Some(value),
                    underflow,
                })
            }
            Node::Interior(mut node) => {
                let child_idx = self.child_index(&node, key)?;
                let child = self.delete_from(node.children[child_idx], key, false)?;
                if child.removed.is_none() {
                    return Ok(child);
                }
                if child.underflow {
                    self.rebalance_child(page_num, &mut node, child_idx)?;
                }
                let underflow = !is_root && self.interior_is_underfull(node.keys.len());
                Ok(DeleteResult {
                    removed: child.removed,
                    underflow,
                })
            }
        }
    }

    /// While the root is an interior page with no separators, copy its only
    /// child into the root page.
    fn compact_root(&mut self) -> Result<()> {
        loop {
            let only_child = match self.load(self.root)? {
                Node::Interior(node) if node.keys.is_empty() => node.children[0],
                _ => return Ok(()),
            };
            let child = self.load(only_child)?;
            self.store(self.root, &child)?;
            free_page(&mut self.pages, only_child)?;
            debug!("compacted root {}: absorbed child {}", self.root, only_child);
        }
    }

    fn rebalance_child(
        &mut self,
        parent_page: PageIndex,
        parent: &mut InteriorNode,
        child_idx: usize,
    ) -> Result<()> {
        if parent.children.len() < 2 {
            return Ok(());
        }
        let left_idx = child_idx.saturating_sub(1);
        let left_page = parent.children[left_idx];
        let right_page = parent.children[left_idx + 1];

        match (self.load(left_page)?, self.load(right_page)?) {
            (Node::Leaf(left), Node::Leaf(right)) => {
                self.rebalance_leaves(parent_page, parent, left_idx, left, right)
            }
            (Node::Interior(left), Node::Interior(right)) => {
                self.rebalance_interiors(parent_page, parent, left_idx, left, right)
            }
            _ => Err(StorageError::corrupt_page(
                parent_page,
                "children at different depths",
            )),
        }
    }

    /// Merge two adjacent leaves if the union fits in one page, otherwise
    /// split the union evenly between them.
    fn rebalance_leaves(
        &mut self,
        parent_page: PageIndex,
        parent: &mut InteriorNode,
        left_idx: usize,
        mut left: LeafNode,
        mut right: LeafNode,
    ) -> Result<()> {
        let left_page = parent.children[left_idx];
        let right_page = parent.children[left_idx + 1];
        left.keys.append(&mut right.keys);
        left.values.append(&mut right.values);

        if left.keys.len() <= self.leaf_capacity {
            left.next = right.next;
            self.store(left_page, &left)?;
            let separator = parent.keys.remove(left_idx);
            parent.children.remove(left_idx + 1);
            self.store(parent_page, &*parent)?;
            free_page(&mut self.pages, right_page)?;
            self.keys.dispose(&mut self.pages, &separator)?;
            debug!("merged leaf {} into {}", right_page, left_page);
            return Ok(());
        }

        let split_at = left.keys.len() / 2;
        right.keys = left.keys.split_off(split_at);
        right.values = left.values.split_off(split_at);
        let separator = self.copy_key(&right.keys[0])?;
        let old_separator = std::mem::replace(&mut parent.keys[left_idx], separator);
        self.store(left_page, &left)?;
        self.store(right_page, &right)?;
        self.store(parent_page, &*parent)?;
        self.keys.dispose(&mut self.pages, &old_separator)?;
        debug!(
            "redistributed leaves {} and {} ({} + {})",
            left_page,
            right_page,
            left.keys.len(),
            right.keys.len()
        );
        Ok(())
    }

    /// Same as [`rebalance_leaves`](Self::rebalance_leaves) for interior
    /// siblings; the parent separator moves down into the merged node.
    fn rebalance_interiors(
        &mut self,
        parent_page: PageIndex,
        parent: &mut InteriorNode,
        left_idx: usize,
        mut left: InteriorNode,
        mut right: InteriorNode,
    ) -> Result<()> {
        let left_page = parent.children[left_idx];
        let right_page = parent.children[left_idx + 1];
        let separator = parent.keys.remove(left_idx);
        left.keys.push(separator);
        left.keys.append(&mut right.keys);
        left.children.append(&mut right.children);

        if left.keys.len() <= self.interior_capacity {
            parent.children.remove(left_idx + 1);
            self.store(left_page, &left)?;
            self.store(parent_page, &*parent)?;
            free_page(&mut self.pages, right_page)?;
            debug!("merged interior {} into {}", right_page, left_page);
            return Ok(());
        }

        let mid = left.keys.len() / 2;
        right.keys = left.keys.split_off(mid + 1);
        let promoted = left
            .keys
            .pop()
            .ok_or_else(|| StorageError::corrupt_page(left_page, "empty interior merge"))?;
        right.children = left.children.split_off(mid + 1);
        parent.keys.insert(left_idx, promoted);
        self.store(left_page, &left)?;
        self.store(right_page, &right)?;
        self.store(parent_page, &*parent)?;
        debug!("redistributed interiors {} and {}", left_page, right_page);
        Ok(())
    }

    fn count_entries(&mut self) -> Result<usize> {
        let mut count = 0;
        let mut visited = HashSet::new();
        let mut next = Some(self.first_leaf()?);
        while let Some(leaf_page) = next {
            if !visited.insert(leaf_page) {
                return Err(StorageError::corrupt_page(leaf_page, "leaf chain loops"));
            }
            match self.load(leaf_page)? {
                Node::Leaf(leaf) => {
                    count += leaf.keys.len();
                    next = leaf.next;
                }
                Node::Interior(_) => {
                    return Err(StorageError::corrupt_page(
                        leaf_page,
                        "leaf chain reaches an interior page",
                    ))
                }
            }
        }
        Ok(count)
    }

    /// Post-order walk collecting every tree page and disposing every slot.
    fn collect_tree_pages(
        &mut self,
        page_num: PageIndex,
        out: &mut Vec<PageIndex>,
        visited: &mut HashSet<PageIndex>,
    ) -> Result<()> {
        if !visited.insert(page_num) {
            return Err(StorageError::corrupt_page(
                page_num,
                "duplicate or cyclic tree page reference",
            ));
        }
        match self.load(page_num)? {
            Node::Leaf(leaf) => {
                for (key, value) in leaf.keys.iter().zip(&leaf.values) {
                    self.keys.dispose(&mut self.pages, key)?;
                    self.values.dispose(&mut self.pages, value)?;
                }
            }
            Node::Interior(node) => {
                for key in &node.keys {
                    self.keys.dispose(&mut self.pages, key)?;
                }
                for child in node.children {
                    self.collect_tree_pages(child, out, visited)?;
                }
            }
        }
        out.push(page_num);
        Ok(())
    }
}

impl<K: Debug + 'static, V: 'static, M: PageManager> BPlusTreeMap<K, V, M> {
    /// Render the tree one node per line, children indented under parents.
    pub fn dump(&mut self) -> Result<String> {
        let mut out = String::new();
        let root = self.root;
        self.dump_node(root, 0, &mut out)?;
        Ok(out)
    }

    fn dump_node(&mut self, page_num: PageIndex, depth: usize, out: &mut String) -> Result<()> {
        let indent = "  ".repeat(depth);
        match self.load(page_num)? {
            Node::Leaf(leaf) => {
                let keys = self.decode_keys(&leaf.keys)?;
                out.push_str(&format!(
                    "{}leaf {} {:?} next={:?}\n",
                    indent, page_num, keys, leaf.next
                ));
            }
            Node::Interior(node) => {
                let keys = self.decode_keys(&node.keys)?;
                out.push_str(&format!("{}interior {} {:?}\n", indent, page_num, keys));
                for child in node.children {
                    self.dump_node(child, depth + 1, out)?;
                }
            }
        }
        Ok(())
    }

    fn decode_keys(&mut self, slots: &[Vec<u8>]) -> Result<Vec<K>> {
        slots
            .iter()
            .map(|slot| self.keys.decode(&mut self.pages, slot))
            .collect()
    }
}

impl<K: 'static, V: 'static> BPlusTreeMap<K, V, Pager> {
    /// Record the root in the file header and flush all dirty pages.
    pub fn sync(&mut self) -> Result<()> {
        self.pages.header_mut().root_page = self.root;
        self.pages.flush_all()
    }
}

enum InsertResult<V> {
    Replaced(V),
    Inserted,
    Split {
        separator: Vec<u8>,
        new_page: PageIndex,
    },
}

struct DeleteResult<V> {
    removed: Option<V>,
    underflow: bool,
}

impl<V> DeleteResult<V> {
    fn missing() -> Self {
        Self {
            removed: None,
            underflow: false,
        }
    }
}

#[derive(Debug)]
struct LeafNode {
    next: Option<PageIndex>,
    keys: Vec<Vec<u8>>,
    values: Vec<Vec<u8>>,
}

impl LeafNode {
    fn empty() -> Self {
        Self {
            next: None,
            keys: Vec::new(),
            values: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct InteriorNode {
    keys: Vec<Vec<u8>>,
    children: Vec<PageIndex>,
}

#[derive(Debug)]
enum Node {
    Leaf(LeafNode),
    Interior(InteriorNode),
}

// ─── Page-level helpers ──────────────────────────────────────────────────────

trait NodeLayout {
    fn write_to(&self, page: &mut Page) -> Result<()>;
}

impl NodeLayout for LeafNode {
    fn write_to(&self, page: &mut Page) -> Result<()> {
        page.clear();
        page.write_u8(PAGE_TYPE_LEAF)?;
        page.write_u16(0)?;
        page.write_u32(self.next.unwrap_or(NO_PAGE))?;
        for (key, value) in self.keys.iter().zip(&self.values) {
            page.write_bytes(key)?;
            page.write_bytes(value)?;
        }
        page.record_used_length(1)
    }
}

impl NodeLayout for InteriorNode {
    fn write_to(&self, page: &mut Page) -> Result<()> {
        let (first, rest) = self
            .children
            .split_first()
            .ok_or_else(|| StorageError::corrupt_page(page.index(), "interior node without children"))?;
        page.clear();
        page.write_u8(PAGE_TYPE_INTERIOR)?;
        page.write_u16(0)?;
        page.write_u32(*first)?;
        for (key, child) in self.keys.iter().zip(rest) {
            page.write_bytes(key)?;
            page.write_u32(*child)?;
        }
        page.record_used_length(1)
    }
}

impl NodeLayout for Node {
    fn write_to(&self, page: &mut Page) -> Result<()> {
        match self {
            Node::Leaf(leaf) => leaf.write_to(page),
            Node::Interior(node) => node.write_to(page),
        }
    }
}

fn read_node(page: &mut Page, key_width: usize, value_width: usize) -> Result<Node> {
    let page_num = page.index();
    page.set_offset(0)?;
    let tag = page.read_u8()?;
    let cell_size = match tag {
        PAGE_TYPE_LEAF => key_width + value_width,
        PAGE_TYPE_INTERIOR => key_width + CHILD_POINTER_SIZE,
        other => return Err(StorageError::UnknownPageType { page: page_num, tag: other }),
    };

    let used = page.read_u16()? as usize;
    if used < NODE_HEADER_SIZE || used > page.size() || (used - NODE_HEADER_SIZE) % cell_size != 0 {
        return Err(StorageError::corrupt_page(
            page_num,
            format!("node used length {} does not match {}-byte cells", used, cell_size),
        ));
    }
    let count = (used - NODE_HEADER_SIZE) / cell_size;
    let link = page.read_u32()?;

    let mut keys = Vec::with_capacity(count);
    if tag == PAGE_TYPE_LEAF {
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            keys.push(page.read_bytes(key_width)?);
            values.push(page.read_bytes(value_width)?);
        }
        Ok(Node::Leaf(LeafNode {
            next: (link != NO_PAGE).then_some(link),
            keys,
            values,
        }))
    } else {
        let mut children = Vec::with_capacity(count + 1);
        children.push(link);
        for _ in 0..count {
            keys.push(page.read_bytes(key_width)?);
            children.push(page.read_u32()?);
        }
        Ok(Node::Interior(InteriorNode { keys, children }))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FixedValueManager;
    use crate::memory::MemoryPageManager;
    use crate::overflow::OverflowValueManager;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn int_map(page_size: usize) -> BPlusTreeMap<i32, i32, MemoryPageManager> {
        init_logging();
        BPlusTreeMap::create(
            MemoryPageManager::new(page_size),
            FixedValueManager::new(),
            FixedValueManager::new(),
        )
        .unwrap()
    }

    fn text_map(page_size: usize) -> BPlusTreeMap<i64, String, MemoryPageManager> {
        init_logging();
        BPlusTreeMap::create(
            MemoryPageManager::new(page_size),
            FixedValueManager::new(),
            OverflowValueManager::strings(),
        )
        .unwrap()
    }

    /// Deterministic permutation of 0..n.
    fn shuffled(n: i32) -> Vec<i32> {
        let mut keys: Vec<i32> = (0..n).collect();
        let mut state: u64 = 0x2545_F491_4F6C_DD1D;
        for i in (1..keys.len()).rev() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let j = (state % (i as u64 + 1)) as usize;
            keys.swap(i, j);
        }
        keys
    }

    fn all_keys<V: 'static>(map: &mut BPlusTreeMap<i32, V, MemoryPageManager>) -> Vec<i32> {
        map.keys().collect::<Result<Vec<_>>>().unwrap()
    }

    #[test]
    fn create_and_get_empty() {
        let mut map = int_map(64);
        assert_eq!(map.get(&1).unwrap(), None);
        assert!(map.is_empty());
        assert_eq!(map.pages().page_count(), 1);
        assert!(all_keys(&mut map).is_empty());
    }

    #[test]
    fn put_and_get_multiple() {
        let mut map = int_map(4096);
        for key in [50, 10, 30, 20, 40] {
            assert_eq!(map.put(key, key * 10).unwrap(), None);
        }
        assert_eq!(map.len(), 5);
        for key in [10, 20, 30, 40, 50] {
            assert_eq!(map.get(&key).unwrap(), Some(key * 10));
        }
        assert_eq!(map.get(&25).unwrap(), None);
        assert!(map.contains_key(&30).unwrap());
        assert!(!map.contains_key(&35).unwrap());
    }

    #[test]
    fn put_existing_key_returns_previous_value() {
        let mut map = int_map(64);
        assert_eq!(map.put(5, 50).unwrap(), None);
        assert_eq!(map.put(5, 51).unwrap(), Some(50));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&5).unwrap(), Some(51));
    }

    #[test]
    fn insert_triggers_leaf_split() {
        let mut map = int_map(64);
        let root = map.root_page();
        // Seven 8-byte cells fit in a 64-byte leaf.
        for key in 0..7 {
            map.put(key, key).unwrap();
        }
        assert_eq!(map.pages().page_count(), 1);

        map.put(7, 7).unwrap();
        assert_eq!(map.root_page(), root);
        assert_eq!(map.pages().page_count(), 3);
        let dump = map.dump().unwrap();
        assert!(dump.starts_with(&format!("interior {} [4]", root)), "{}", dump);

        for key in 0..8 {
            assert_eq!(map.get(&key).unwrap(), Some(key), "key {}", key);
        }
        assert_eq!(all_keys(&mut map), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn many_random_inserts_build_a_deep_tree() {
        let mut map = int_map(64);
        let keys = shuffled(2000);
        for &key in &keys {
            map.put(key, -key).unwrap();
        }
        assert_eq!(map.len(), 2000);
        for &key in &keys {
            assert_eq!(map.get(&key).unwrap(), Some(-key), "key {}", key);
        }
        assert_eq!(all_keys(&mut map), (0..2000).collect::<Vec<_>>());
    }

    #[test]
    fn insert_reverse_order() {
        let mut map = int_map(64);
        for key in (0..300).rev() {
            map.put(key, key).unwrap();
        }
        assert_eq!(all_keys(&mut map), (0..300).collect::<Vec<_>>());
    }

    #[test]
    fn len_after_inserts_and_deletes() {
        let mut map = int_map(64);
        for key in shuffled(300) {
            map.put(key, key).unwrap();
        }
        let mut deleted = 0;
        for key in (0..300).filter(|k| k % 5 != 1) {
            if key % 2 == 0 {
                assert_eq!(map.remove(&key).unwrap(), Some(key));
                deleted += 1;
            }
        }
        assert_eq!(map.len(), 300 - deleted);
        assert_eq!(map.remove(&1000).unwrap(), None);
        assert_eq!(map.remove(&0).unwrap(), None);
        assert_eq!(map.len(), 300 - deleted);
        assert_eq!(all_keys(&mut map).len(), map.len());
    }

    #[test]
    fn delete_keeps_remaining_keys_reachable() {
        let mut map = int_map(64);
        for key in 0..500 {
            map.put(key, key * 2).unwrap();
        }
        for key in shuffled(500).into_iter().filter(|k| k % 3 == 0) {
            assert_eq!(map.remove(&key).unwrap(), Some(key * 2));
        }
        let expected: Vec<i32> = (0..500).filter(|k| k % 3 != 0).collect();
        for &key in &expected {
            assert_eq!(map.get(&key).unwrap(), Some(key * 2), "key {}", key);
        }
        assert_eq!(map.get(&300).unwrap(), None);
        assert_eq!(all_keys(&mut map), expected);
    }

    #[test]
    fn delete_all_compacts_to_single_leaf() {
        let mut map = int_map(64);
        let root = map.root_page();
        for key in 0..600 {
            map.put(key, key).unwrap();
        }
        assert!(map.pages().page_count() > 50);

        for key in shuffled(600) {
            assert_eq!(map.remove(&key).unwrap(), Some(key), "key {}", key);
        }
        assert!(map.is_empty());
        assert_eq!(map.root_page(), root);
        assert_eq!(map.pages().page_count(), 1);
        assert!(all_keys(&mut map).is_empty());

        map.put(42, 1).unwrap();
        assert_eq!(map.get(&42).unwrap(), Some(1));
    }

    #[test]
    fn mod_count_tracks_content_changes() {
        let mut map = int_map(64);
        assert_eq!(map.mod_count(), 0);
        map.put(1, 1).unwrap();
        map.put(1, 2).unwrap();
        map.remove(&1).unwrap();
        assert_eq!(map.mod_count(), 3);

        map.remove(&1).unwrap();
        map.get(&1).unwrap();
        map.contains_key(&1).unwrap();
        assert_eq!(map.mod_count(), 3);
    }

    #[test]
    fn replacing_and_removing_frees_overflow_pages() {
        let mut map = text_map(64);
        let long = "y".repeat(200);
        map.put(1, long.clone()).unwrap();
        assert_eq!(map.pages().page_count(), 1 + 4);

        assert_eq!(map.put(1, "short".to_string()).unwrap(), Some(long));
        assert_eq!(map.pages().page_count(), 1 + 1);

        assert_eq!(map.remove(&1).unwrap(), Some("short".to_string()));
        assert_eq!(map.pages().page_count(), 1);
    }

    #[test]
    fn overflowing_keys_keep_chains_consistent() {
        init_logging();
        let mut map: BPlusTreeMap<String, i32, MemoryPageManager> = BPlusTreeMap::create(
            MemoryPageManager::new(64),
            OverflowValueManager::strings(),
            FixedValueManager::new(),
        )
        .unwrap();
        let key = |i: i32| format!("{:04}-{}", i, "k".repeat(80));

        for i in shuffled(150) {
            map.put(key(i), i).unwrap();
        }
        for i in (0..150).step_by(7) {
            assert_eq!(map.get(&key(i)).unwrap(), Some(i));
        }
        let keys = map.keys().collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(keys, (0..150).map(key).collect::<Vec<_>>());

        for i in shuffled(150) {
            assert_eq!(map.remove(&key(i)).unwrap(), Some(i), "key {}", i);
        }
        // Leaf keys and separator copies are all gone.
        assert_eq!(map.pages().page_count(), 1);
    }

    #[test]
    fn unorderable_key_is_rejected() {
        init_logging();
        let mut map: BPlusTreeMap<f64, i32, MemoryPageManager> = BPlusTreeMap::create(
            MemoryPageManager::new(64),
            FixedValueManager::new(),
            FixedValueManager::new(),
        )
        .unwrap();
        map.put(1.5, 1).unwrap();
        assert!(matches!(
            map.put(f64::NAN, 2),
            Err(StorageError::InvalidArgument(_))
        ));
        assert!(matches!(
            map.get(&f64::NAN),
            Err(StorageError::InvalidArgument(_))
        ));
        assert_eq!(map.len(), 1);
        assert_eq!(map.mod_count(), 1);
    }

    #[test]
    fn custom_comparator_orders_keys() {
        init_logging();
        let mut map = BPlusTreeMap::create_with(
            MemoryPageManager::new(64),
            FixedValueManager::<i32>::new(),
            FixedValueManager::<i32>::new(),
            |a: &i32, b: &i32| b.partial_cmp(a),
            &TreeConfig::default(),
        )
        .unwrap();
        for key in shuffled(100) {
            map.put(key, key).unwrap();
        }
        let keys = map.keys().collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(keys, (0..100).rev().collect::<Vec<_>>());
    }

    #[test]
    fn get_leaf_values_walks_leaf_chain() {
        let mut map = int_map(64);
        for key in 0..50 {
            map.put(key, key + 1000).unwrap();
        }
        let mut keys: Vec<i32> = Vec::new();
        let mut values: Vec<i32> = Vec::new();
        let mut leaves = 0;
        let mut next = Some(map.first_leaf().unwrap());
        while let Some(leaf) = next {
            map.get_leaf_values::<Values>(&mut values, leaf).unwrap();
            next = map.get_leaf_values::<Keys>(&mut keys, leaf).unwrap();
            leaves += 1;
        }
        assert!(leaves > 1);
        assert_eq!(keys, (0..50).collect::<Vec<_>>());
        assert_eq!(values, (1000..1050).collect::<Vec<_>>());

        let root = map.root_page();
        let err = map.get_leaf_values::<Keys>(&mut keys, root).unwrap_err();
        assert!(matches!(err, StorageError::CorruptPage { .. }));
    }

    struct WideKey;

    impl PageValueManager<i32> for WideKey {
        fn slot_width(&self) -> usize {
            40
        }

        fn encode(&self, _pages: &mut dyn PageManager, value: &i32) -> Result<Vec<u8>> {
            let mut slot = vec![0u8; 40];
            slot[..4].copy_from_slice(&value.to_be_bytes());
            Ok(slot)
        }

        fn decode(&self, _pages: &mut dyn PageManager, slot: &[u8]) -> Result<i32> {
            Ok(i32::from_be_bytes([slot[0], slot[1], slot[2], slot[3]]))
        }

        fn dispose(&self, _pages: &mut dyn PageManager, _slot: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn page_too_small_for_slots_is_rejected() {
        let result: Result<BPlusTreeMap<i32, i32, MemoryPageManager>> =
            BPlusTreeMap::create(MemoryPageManager::new(64), WideKey, FixedValueManager::new());
        assert!(matches!(result, Err(StorageError::InvalidArgument(_))));

        let result: Result<BPlusTreeMap<i32, i32, MemoryPageManager>> =
            BPlusTreeMap::create(MemoryPageManager::new(256), WideKey, FixedValueManager::new());
        assert!(result.is_ok());
    }

    #[test]
    fn reclaim_frees_tree_and_chains() {
        let mut map = text_map(64);
        for key in 0..100i64 {
            map.put(key, format!("value-{}-{}", key, "z".repeat(key as usize))).unwrap();
        }
        assert!(map.pages().page_count() > 100);
        let pages = map.reclaim().unwrap();
        assert_eq!(pages.page_count(), 0);
    }

    #[test]
    fn unknown_page_type_is_reported() {
        let mut map = int_map(64);
        map.put(1, 1).unwrap();
        let root = map.root_page();
        with_page(&mut map.pages, root, |_, page| page.write_u8(0x42)).unwrap();
        assert!(matches!(
            map.get(&1),
            Err(StorageError::UnknownPageType { tag: 0x42, .. })
        ));
    }

    #[test]
    fn map_survives_sync_and_reopen() {
        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.db");
        let config = TreeConfig::default().with_page_size(256).with_pool_frames(8);

        {
            let pager = Pager::open_with_config(&path, &config).unwrap();
            let mut map: BPlusTreeMap<i64, String, Pager> =
                BPlusTreeMap::create(pager, FixedValueManager::new(), OverflowValueManager::strings())
                    .unwrap();
            for key in 0..200i64 {
                map.put(key, format!("row {} {}", key, "p".repeat((key % 17) as usize * 30)))
                    .unwrap();
            }
            map.remove(&13).unwrap();
            map.sync().unwrap();
        }

        let pager = Pager::open_with_config(&path, &config).unwrap();
        let root = pager.header().root_page;
        let mut map: BPlusTreeMap<i64, String, Pager> =
            BPlusTreeMap::open(pager, root, FixedValueManager::new(), OverflowValueManager::strings())
                .unwrap();
        assert_eq!(map.len(), 199);
        assert_eq!(map.get(&13).unwrap(), None);
        assert_eq!(
            map.get(&50).unwrap(),
            Some(format!("row 50 {}", "p".repeat((50 % 17) * 30)))
        );
    }

    /// Delegates to a memory manager but fails chosen create/remove calls
    /// (1-based) without touching the inner manager.
    struct FlakyPages {
        inner: MemoryPageManager,
        creates: usize,
        removes: usize,
        fail_create: Option<usize>,
        fail_remove: Option<usize>,
    }

    impl FlakyPages {
        fn new(page_size: usize) -> Self {
            Self {
                inner: MemoryPageManager::new(page_size),
                creates: 0,
                removes: 0,
                fail_create: None,
                fail_remove: None,
            }
        }

        fn disk_gone() -> StorageError {
            StorageError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"))
        }
    }

    impl PageManager for FlakyPages {
        fn create_page(&mut self) -> Result<Page> {
            self.creates += 1;
            if self.fail_create == Some(self.creates) {
                return Err(Self::disk_gone());
            }
            self.inner.create_page()
        }

        fn get_page(&mut self, index: PageIndex) -> Result<Page> {
            self.inner.get_page(index)
        }

        fn release_page(&mut self, page: Page) -> Result<()> {
            self.inner.release_page(page)
        }

        fn remove_page(&mut self, page: Page) -> Result<()> {
            self.removes += 1;
            if self.fail_remove == Some(self.removes) {
                return Err(Self::disk_gone());
            }
            self.inner.remove_page(page)
        }

        fn page_size(&self) -> usize {
            self.inner.page_size()
        }

        fn page_count(&self) -> usize {
            self.inner.page_count()
        }
    }

    #[test]
    fn failed_root_compaction_still_counts_the_removal() {
        init_logging();
        let mut pages = FlakyPages::new(64);
        // The first removal frees the merged sibling, the second is the
        // root absorbing its only child.
        pages.fail_remove = Some(2);
        let mut map =
            BPlusTreeMap::create(pages, FixedValueManager::new(), FixedValueManager::new()).unwrap();
        for key in 0..8 {
            map.put(key, key * 10).unwrap();
        }
        let before = map.mod_count();

        let mut failures = Vec::new();
        for key in 0..8 {
            if map.remove(&key).is_err() {
                failures.push(key);
            }
        }
        assert_eq!(failures, vec![1]);
        assert_eq!(map.len(), 0);
        assert!(map.is_empty());
        assert_eq!(map.mod_count() - before, 8);
        assert!(map.keys().collect::<Result<Vec<i32>>>().unwrap().is_empty());
        assert_eq!(map.get(&1).unwrap(), None);
    }

    #[test]
    fn failed_split_leaves_no_trace_of_the_new_entry() {
        init_logging();
        let mut pages = FlakyPages::new(64);
        // Create calls: root, seven value chains, the eighth chain, then
        // the right leaf of the split.
        pages.fail_create = Some(10);
        let mut map: BPlusTreeMap<i32, String, FlakyPages> =
            BPlusTreeMap::create(pages, FixedValueManager::new(), OverflowValueManager::strings())
                .unwrap();
        for key in 0..7 {
            map.put(key, format!("v{}", key)).unwrap();
        }
        assert_eq!(map.pages().page_count(), 8);

        assert!(matches!(
            map.put(7, "v7".to_string()),
            Err(StorageError::Io(_))
        ));
        assert_eq!(map.len(), 7);
        assert_eq!(map.mod_count(), 7);
        assert_eq!(map.pages().page_count(), 8);
        assert_eq!(map.get(&7).unwrap(), None);

        assert_eq!(map.put(7, "v7".to_string()).unwrap(), None);
        assert_eq!(map.len(), 8);
        assert_eq!(map.get(&7).unwrap(), Some("v7".to_string()));
        let values = map.values().collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(values, (0..8).map(|k| format!("v{}", k)).collect::<Vec<_>>());
    }

    #[test]
    fn json_values_round_trip_through_the_map() {
        #[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq)]
        struct Account {
            owner: String,
            balance: i64,
            tags: Vec<String>,
        }

        let account = |owner: &str, balance: i64| Account {
            owner: owner.to_string(),
            balance,
            tags: vec!["checking".to_string(), "x".repeat(80)],
        };

        init_logging();
        let mut map: BPlusTreeMap<i32, Account, MemoryPageManager> = BPlusTreeMap::create(
            MemoryPageManager::new(64),
            FixedValueManager::new(),
            OverflowValueManager::json(),
        )
        .unwrap();
        for id in 0..20 {
            assert_eq!(map.put(id, account("ada", id as i64 * 100)).unwrap(), None);
        }
        assert_eq!(map.get(&7).unwrap(), Some(account("ada", 700)));

        let previous = map.put(7, account("grace", -5)).unwrap();
        assert_eq!(previous, Some(account("ada", 700)));
        assert_eq!(map.get(&7).unwrap(), Some(account("grace", -5)));

        for id in 0..20 {
            assert!(map.remove(&id).unwrap().is_some());
        }
        assert!(map.is_empty());
        assert_eq!(map.pages().page_count(), 1);
    }
}
