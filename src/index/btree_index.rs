use std::cmp::Ordering;
use std::sync::Arc;

use tracing::debug;

use crate::buffer::{BufferPoolManager, PageGuard};
use crate::common::{
    BurrowError, IndexConfig, IndexId, PageId, Result, RowId, INDEX_ROOTS_PAGE_ID, INVALID_PAGE_ID,
};
use crate::storage::page::IndexRootsPage;

use super::btree_internal_page::InternalPage;
use super::btree_iterator::IndexIterator;
use super::btree_leaf_page::LeafPage;
use super::btree_page::{TreeNode, TreeNodeMut, TreePage};
use super::key_comparator::KeyComparator;

/// Which child to follow at each internal page on the way down.
#[derive(Clone, Copy)]
enum Descent<'a> {
    Key(&'a [u8]),
    Leftmost,
    Rightmost,
}

/// One level of rebalancing after a removal: `node` fell below its floor
/// and is repaired from `sibling` through `parent`.
struct Repair {
    node: PageGuard,
    sibling: PageGuard,
    parent: PageGuard,
    /// Slot of `node` in `parent`.
    index: usize,
    merge: bool,
}

/// Pages a removal writes to, pinned before the key is taken out.
struct RemovalPlan {
    /// Bottom-up; only the last entry may be a redistribution.
    repairs: Vec<Repair>,
    /// The root, when it empties or is left with a single child.
    shrink_root: Option<PageGuard>,
}

/// Disk-backed B+ tree mapping fixed-width keys to `RowId`s.
///
/// Pages live in the buffer pool and are only pinned for the duration of a
/// single step. The root page id is persisted in the index roots registry
/// under `index_id`, so a tree can be reopened over the same file.
pub struct BPlusTree<C: KeyComparator> {
    index_id: IndexId,
    root_page_id: PageId,
    bpm: Arc<BufferPoolManager>,
    comparator: C,
    config: IndexConfig,
}

impl<C: KeyComparator> BPlusTree<C> {
    /// Opens the index registered under `index_id`, or an empty one if the
    /// registry has no entry for it. The registry page is created on a fresh
    /// file.
    pub fn new(
        index_id: IndexId,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        config: IndexConfig,
    ) -> Result<Self> {
        config.validate()?;

        if bpm.is_page_free(INDEX_ROOTS_PAGE_ID)? {
            let mut guard = bpm.new_page()?.ok_or(BurrowError::OutOfMemory)?;
            if guard.page_id() != INDEX_ROOTS_PAGE_ID {
                return Err(BurrowError::IndexCorrupted(format!(
                    "index roots page allocated at {} instead of {}",
                    guard.page_id(),
                    INDEX_ROOTS_PAGE_ID
                )));
            }
            let mut data = guard.data_mut();
            IndexRootsPage::new(&mut data[..]).init();
            debug!("created index roots page");
        }

        let root_page_id = {
            let guard = bpm
                .fetch_page(INDEX_ROOTS_PAGE_ID)?
                .ok_or(BurrowError::OutOfMemory)?;
            let data = guard.data();
            let roots = IndexRootsPage::new(&data[..]);
            if !roots.is_valid() {
                return Err(BurrowError::CorruptFormat(
                    "index roots page has a bad header".into(),
                ));
            }
            roots.get_root_id(index_id).unwrap_or(INVALID_PAGE_ID)
        };

        let tree = Self {
            index_id,
            root_page_id,
            bpm,
            comparator,
            config,
        };

        if root_page_id != INVALID_PAGE_ID {
            let guard = tree.fetch(root_page_id)?;
            let data = guard.data();
            let root = TreePage::from_data(&data[..])?;
            if root.key_size() != config.key_size {
                return Err(BurrowError::KeySizeMismatch {
                    expected: config.key_size,
                    actual: root.key_size(),
                });
            }
        }

        debug!(index_id, root = %root_page_id, "opened index");
        Ok(tree)
    }

    pub fn index_id(&self) -> IndexId {
        self.index_id
    }

    pub fn root_page_id(&self) -> PageId {
        self.root_page_id
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn is_empty(&self) -> bool {
        self.root_page_id == INVALID_PAGE_ID
    }

    /// Point lookup.
    pub fn get_value(&self, key: &[u8]) -> Result<Option<RowId>> {
        self.check_key(key)?;
        if self.is_empty() {
            return Ok(None);
        }

        let guard = self.find_leaf(Descent::Key(key), None)?;
        let data = guard.data();
        let leaf = LeafPage::new(&data[..]);
        Ok(leaf.lookup(key, &self.comparator))
    }

    /// Inserts a unique key. Returns false if the key is already present.
    ///
    /// Every page a split may need is allocated before the tree is touched,
    /// so running out of frames or disk space leaves the tree unchanged.
    pub fn insert(&mut self, key: &[u8], value: RowId) -> Result<bool> {
        self.check_key(key)?;
        if self.is_empty() {
            self.start_new_tree(key, value)?;
            return Ok(true);
        }

        let mut path = Vec::new();
        let mut leaf_guard = self.find_leaf(Descent::Key(key), Some(&mut path))?;
        let (leaf_size, leaf_max_size) = {
            let data = leaf_guard.data();
            let leaf = LeafPage::new(&data[..]);
            if leaf.lookup(key, &self.comparator).is_some() {
                return Ok(false);
            }
            (leaf.size(), leaf.max_size())
        };

        let mut spare = self.reserve_pages(Self::pages_needed(leaf_size >= leaf_max_size, &path))?;

        let new_size = {
            let mut data = leaf_guard.data_mut();
            let mut leaf = LeafPage::new(&mut data[..]);
            leaf.insert(key, value, &self.comparator)
        };

        let split = if new_size > leaf_max_size {
            self.split_leaf(leaf_guard, &mut spare)
        } else {
            drop(leaf_guard);
            Ok(())
        };
        self.release_reserved(spare)?;
        split?;
        Ok(true)
    }

    /// Removes a key. Returns false if it was not present.
    ///
    /// Every page the rebalance writes to is pinned before the key is taken
    /// out, so running out of frames leaves the tree unchanged.
    pub fn remove(&mut self, key: &[u8]) -> Result<bool> {
        self.check_key(key)?;
        if self.is_empty() {
            return Ok(false);
        }

        let mut leaf_guard = self.find_leaf(Descent::Key(key), None)?;
        let leaf_size = {
            let data = leaf_guard.data();
            let leaf = LeafPage::new(&data[..]);
            if leaf.lookup(key, &self.comparator).is_none() {
                return Ok(false);
            }
            leaf.size()
        };

        let plan = self.plan_removal(leaf_guard.page_id(), leaf_size - 1)?;

        {
            let mut data = leaf_guard.data_mut();
            let mut leaf = LeafPage::new(&mut data[..]);
            leaf.remove_and_delete_record(key, &self.comparator);
        }
        drop(leaf_guard);

        for repair in plan.repairs {
            if repair.merge {
                self.coalesce(repair)?;
            } else {
                self.redistribute(repair)?;
            }
        }
        if let Some(root_guard) = plan.shrink_root {
            self.adjust_root(root_guard)?;
        }
        Ok(true)
    }

    /// Iterator positioned at the smallest key.
    pub fn begin(&self) -> Result<IndexIterator> {
        if self.is_empty() {
            return self.end();
        }
        let page_id = self.find_leaf(Descent::Leftmost, None)?.page_id();
        IndexIterator::new(Arc::clone(&self.bpm), page_id, 0)
    }

    /// Iterator positioned at the first key >= `key`.
    pub fn begin_at(&self, key: &[u8]) -> Result<IndexIterator> {
        self.check_key(key)?;
        if self.is_empty() {
            return self.end();
        }
        let (page_id, index) = {
            let guard = self.find_leaf(Descent::Key(key), None)?;
            let data = guard.data();
            let leaf = LeafPage::new(&data[..]);
            (guard.page_id(), leaf.key_index(key, &self.comparator))
        };
        IndexIterator::new(Arc::clone(&self.bpm), page_id, index)
    }

    /// Iterator positioned one past the largest key.
    pub fn end(&self) -> Result<IndexIterator> {
        if self.is_empty() {
            return IndexIterator::new(Arc::clone(&self.bpm), INVALID_PAGE_ID, 0);
        }
        let (page_id, size) = {
            let guard = self.find_leaf(Descent::Rightmost, None)?;
            let data = guard.data();
            let leaf = LeafPage::new(&data[..]);
            (guard.page_id(), leaf.size())
        };
        IndexIterator::new(Arc::clone(&self.bpm), page_id, size)
    }

    /// Returns every entry with `start <= key <= end`, in key order.
    pub fn range_scan(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Vec<u8>, RowId)>> {
        self.check_key(end)?;
        let mut results = Vec::new();
        let mut iter = self.begin_at(start)?;
        while let Some((key, value)) = iter.advance()? {
            if self.comparator.compare(&key, end) == Ordering::Greater {
                break;
            }
            results.push((key, value));
        }
        Ok(results)
    }

    /// Frees every page of the tree and drops its registry entry.
    pub fn destroy(&mut self) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let mut pending = vec![self.root_page_id];
        let mut freed = 0;
        while let Some(page_id) = pending.pop() {
            {
                let guard = self.fetch(page_id)?;
                let data = guard.data();
                if let TreePage::Internal(node) = TreePage::from_data(&data[..])? {
                    pending.extend((0..node.size()).map(|i| node.value_at(i)));
                }
            }
            self.free_page(page_id)?;
            freed += 1;
        }
        self.update_root_page_id(INVALID_PAGE_ID)?;
        debug!(index_id = self.index_id, pages = freed, "destroyed index");
        Ok(())
    }

    /// Walks the whole tree and checks key order, node occupancy, parent
    /// pointers, uniform leaf depth and the leaf chain.
    pub fn check_integrity(&self) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }

        let mut leaves = Vec::new();
        self.check_subtree(self.root_page_id, INVALID_PAGE_ID, None, None, &mut leaves)?;

        let mut page_id = leaves[0];
        let mut chained = Vec::new();
        let mut last_key: Option<Vec<u8>> = None;
        while page_id != INVALID_PAGE_ID {
            if chained.len() > leaves.len() {
                return Err(corrupted(format!("leaf chain loops back at {page_id}")));
            }
            let guard = self.fetch(page_id)?;
            let data = guard.data();
            let leaf = LeafPage::from_data(&data[..])?;
            for i in 0..leaf.size() {
                let key = leaf.key_at(i);
                if let Some(last) = &last_key {
                    if self.comparator.compare(last, key) != Ordering::Less {
                        return Err(corrupted(format!("leaf chain out of order at {page_id}")));
                    }
                }
                last_key = Some(key.to_vec());
            }
            chained.push(page_id);
            page_id = leaf.next_page_id();
        }

        if chained != leaves {
            return Err(corrupted(format!(
                "leaf chain {chained:?} does not match tree order {leaves:?}"
            )));
        }
        Ok(())
    }

    /// Renders the tree one level per line, keys in hex.
    pub fn dump(&self) -> Result<String> {
        let mut out = String::new();
        if self.is_empty() {
            out.push_str("(empty)\n");
            return Ok(out);
        }

        let mut level = vec![self.root_page_id];
        let mut depth = 0;
        while !level.is_empty() {
            out.push_str(&format!("level {depth}:"));
            let mut next_level = Vec::new();
            for &page_id in &level {
                let guard = self.fetch(page_id)?;
                let data = guard.data();
                match TreePage::from_data(&data[..])? {
                    TreePage::Internal(node) => {
                        out.push_str(&format!(" [{}:", page_id.as_u32()));
                        for i in 1..node.size() {
                            out.push(' ');
                            out.push_str(&hex(node.key_at(i)));
                        }
                        out.push(']');
                        next_level.extend((0..node.size()).map(|i| node.value_at(i)));
                    }
                    TreePage::Leaf(leaf) => {
                        out.push_str(&format!(" ({}:", page_id.as_u32()));
                        for i in 0..leaf.size() {
                            out.push(' ');
                            out.push_str(&hex(leaf.key_at(i)));
                        }
                        out.push(')');
                    }
                }
            }
            out.push('\n');
            level = next_level;
            depth += 1;
        }
        Ok(out)
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() != self.config.key_size {
            return Err(BurrowError::KeySizeMismatch {
                expected: self.config.key_size,
                actual: key.len(),
            });
        }
        Ok(())
    }

    fn fetch(&self, page_id: PageId) -> Result<PageGuard> {
        self.bpm.fetch_page(page_id)?.ok_or(BurrowError::OutOfMemory)
    }

    fn free_page(&self, page_id: PageId) -> Result<()> {
        if !self.bpm.is_resident(page_id) {
            return self.bpm.deallocate_page(page_id);
        }
        if !self.bpm.delete_page(page_id)? {
            return Err(BurrowError::PageStillPinned(page_id));
        }
        Ok(())
    }

    /// Descends from the root to a leaf. When `path` is given, the
    /// `(size, max_size)` of every internal page passed is pushed, root first.
    fn find_leaf(&self, descent: Descent<'_>, mut path: Option<&mut Vec<(usize, usize)>>) -> Result<PageGuard> {
        let mut page_id = self.root_page_id;
        loop {
            let guard = self.fetch(page_id)?;
            let child = {
                let data = guard.data();
                match TreePage::from_data(&data[..])? {
                    TreePage::Leaf(_) => None,
                    TreePage::Internal(node) => {
                        if let Some(path) = path.as_deref_mut() {
                            path.push((node.size(), node.max_size()));
                        }
                        Some(match descent {
                            Descent::Key(key) => node.lookup(key, &self.comparator),
                            Descent::Leftmost => node.value_at(0),
                            Descent::Rightmost => node.value_at(node.size() - 1),
                        })
                    }
                }
            };
            match child {
                Some(child) => page_id = child,
                None => return Ok(guard),
            }
        }
    }

    /// Number of new pages an insert needs: one per page that splits plus a
    /// new root if the split reaches the top.
    fn pages_needed(leaf_full: bool, path: &[(usize, usize)]) -> usize {
        if !leaf_full {
            return 0;
        }
        let mut needed = 1;
        for &(size, max_size) in path.iter().rev() {
            if size < max_size {
                return needed;
            }
            needed += 1;
        }
        needed + 1
    }

    fn reserve_pages(&self, count: usize) -> Result<Vec<PageGuard>> {
        let mut spare = Vec::with_capacity(count);
        for _ in 0..count {
            match self.bpm.new_page() {
                Ok(Some(guard)) => spare.push(guard),
                Ok(None) => {
                    self.release_reserved(spare)?;
                    return Err(BurrowError::OutOfMemory);
                }
                Err(e) => {
                    self.release_reserved(spare)?;
                    return Err(e);
                }
            }
        }
        Ok(spare)
    }

    fn release_reserved(&self, spare: Vec<PageGuard>) -> Result<()> {
        for guard in spare {
            let page_id = guard.page_id();
            drop(guard);
            self.free_page(page_id)?;
        }
        Ok(())
    }

    fn take_reserved(&self, spare: &mut Vec<PageGuard>) -> Result<PageGuard> {
        match spare.pop() {
            Some(guard) => Ok(guard),
            None => self.bpm.new_page()?.ok_or(BurrowError::OutOfMemory),
        }
    }

    fn start_new_tree(&mut self, key: &[u8], value: RowId) -> Result<()> {
        let mut guard = self.bpm.new_page()?.ok_or(BurrowError::OutOfMemory)?;
        let page_id = guard.page_id();
        {
            let mut data = guard.data_mut();
            let mut leaf = LeafPage::new(&mut data[..]);
            leaf.init(page_id, INVALID_PAGE_ID, self.config.key_size, self.config.leaf_max_size);
            leaf.insert(key, value, &self.comparator);
        }
        drop(guard);

        if let Err(e) = self.update_root_page_id(page_id) {
            self.free_page(page_id)?;
            return Err(e);
        }
        debug!(index_id = self.index_id, root = %page_id, "started new tree");
        Ok(())
    }

    fn split_leaf(&mut self, mut leaf_guard: PageGuard, spare: &mut Vec<PageGuard>) -> Result<()> {
        let mut new_guard = self.take_reserved(spare)?;
        let leaf_page_id = leaf_guard.page_id();
        let new_page_id = new_guard.page_id();

        let (separator, parent_page_id) = {
            let mut data = leaf_guard.data_mut();
            let mut leaf = LeafPage::new(&mut data[..]);
            let mut new_data = new_guard.data_mut();
            let mut new_leaf = LeafPage::new(&mut new_data[..]);
            new_leaf.init(new_page_id, leaf.parent_page_id(), leaf.key_size(), leaf.max_size());
            leaf.move_half_to(&mut new_leaf);
            new_leaf.set_next_page_id(leaf.next_page_id());
            leaf.set_next_page_id(new_page_id);
            (new_leaf.key_at(0).to_vec(), leaf.parent_page_id())
        };
        drop(new_guard);
        drop(leaf_guard);

        debug!(page = %leaf_page_id, new_page = %new_page_id, "split leaf page");
        self.insert_into_parent(leaf_page_id, parent_page_id, &separator, new_page_id, spare)
    }

    /// Links `new_page_id` into the parent of `old_page_id` under `key`,
    /// splitting upward as needed.
    fn insert_into_parent(
        &mut self,
        old_page_id: PageId,
        parent_page_id: PageId,
        key: &[u8],
        new_page_id: PageId,
        spare: &mut Vec<PageGuard>,
    ) -> Result<()> {
        if parent_page_id == INVALID_PAGE_ID {
            let mut root_guard = self.take_reserved(spare)?;
            let root_page_id = root_guard.page_id();
            {
                let mut data = root_guard.data_mut();
                let mut root = InternalPage::new(&mut data[..]);
                root.init(
                    root_page_id,
                    INVALID_PAGE_ID,
                    self.config.key_size,
                    self.config.internal_max_size,
                );
                root.populate_new_root(old_page_id, key, new_page_id);
            }
            drop(root_guard);

            self.set_parent(old_page_id, root_page_id)?;
            self.set_parent(new_page_id, root_page_id)?;
            self.update_root_page_id(root_page_id)?;
            debug!(index_id = self.index_id, root = %root_page_id, "grew new root");
            return Ok(());
        }

        let mut parent_guard = self.fetch(parent_page_id)?;
        let (size, max_size) = {
            let mut data = parent_guard.data_mut();
            let mut parent = InternalPage::from_data(&mut data[..])?;
            let size = parent.insert_node_after(old_page_id, key, new_page_id)?;
            (size, parent.max_size())
        };
        if size <= max_size {
            return Ok(());
        }

        let mut sibling_guard = self.take_reserved(spare)?;
        let sibling_page_id = sibling_guard.page_id();
        let (separator, grandparent_page_id, moved) = {
            let mut data = parent_guard.data_mut();
            let mut parent = InternalPage::new(&mut data[..]);
            let mut sibling_data = sibling_guard.data_mut();
            let mut sibling = InternalPage::new(&mut sibling_data[..]);
            sibling.init(
                sibling_page_id,
                parent.parent_page_id(),
                parent.key_size(),
                parent.max_size(),
            );
            let moved = parent.move_half_to(&mut sibling);
            (sibling.key_at(0).to_vec(), parent.parent_page_id(), moved)
        };
        drop(sibling_guard);
        drop(parent_guard);

        self.reparent(&moved, sibling_page_id)?;
        debug!(page = %parent_page_id, new_page = %sibling_page_id, "split internal page");
        self.insert_into_parent(
            parent_page_id,
            grandparent_page_id,
            &separator,
            sibling_page_id,
            spare,
        )
    }

    fn set_parent(&self, page_id: PageId, parent_page_id: PageId) -> Result<()> {
        let mut guard = self.fetch(page_id)?;
        let mut data = guard.data_mut();
        let mut page = TreePage::from_data(&mut data[..])?;
        page.set_parent_page_id(parent_page_id);
        Ok(())
    }

    fn reparent(&self, children: &[PageId], parent_page_id: PageId) -> Result<()> {
        for &child in children {
            self.set_parent(child, parent_page_id)?;
        }
        Ok(())
    }

    /// Pins every page a removal from `leaf_page_id` rewrites in place,
    /// walking up while a page would fall below its floor. A first child
    /// pairs with its right sibling, any other page with its left one; the
    /// pair merges when both fit in one page and redistributes otherwise.
    ///
    /// Pages touched later (moved children, the registry) are fetched one at
    /// a time after the leaf is released or a merged page is freed, so a
    /// frame is always there for them.
    fn plan_removal(&self, leaf_page_id: PageId, leaf_size_after: usize) -> Result<RemovalPlan> {
        let mut repairs = Vec::new();
        let mut shrink_root = None;

        let mut page_id = leaf_page_id;
        let mut size_after = leaf_size_after;
        loop {
            let node = self.fetch(page_id)?;
            let (is_leaf, is_root, min_size, max_size, parent_page_id) = {
                let data = node.data();
                let page = TreePage::from_data(&data[..])?;
                (
                    page.is_leaf(),
                    page.is_root(),
                    page.min_size(),
                    page.max_size(),
                    page.parent_page_id(),
                )
            };

            if is_root {
                let shrinks = if is_leaf { size_after == 0 } else { size_after == 1 };
                if shrinks {
                    shrink_root = Some(node);
                }
                break;
            }
            if size_after >= min_size {
                break;
            }

            let parent = self.fetch(parent_page_id)?;
            let (index, sibling_page_id, parent_size) = {
                let data = parent.data();
                let parent = InternalPage::from_data(&data[..])?;
                let index = parent.value_index(page_id).ok_or_else(|| {
                    corrupted(format!("{page_id} is not a child of {parent_page_id}"))
                })?;
                if parent.size() < 2 {
                    return Err(corrupted(format!("{parent_page_id} has a single child")));
                }
                let sibling_index = if index == 0 { 1 } else { index - 1 };
                (index, parent.value_at(sibling_index), parent.size())
            };

            let sibling = self.fetch(sibling_page_id)?;
            let sibling_size = {
                let data = sibling.data();
                let page = TreePage::from_data(&data[..])?;
                page.size()
            };

            let merge = size_after + sibling_size <= max_size;
            repairs.push(Repair {
                node,
                sibling,
                parent,
                index,
                merge,
            });
            if !merge {
                break;
            }
            page_id = parent_page_id;
            size_after = parent_size - 1;
        }

        Ok(RemovalPlan {
            repairs,
            shrink_root,
        })
    }

    /// Moves one entry from the sibling into the node and repairs the
    /// separator. Slot 0 borrows from its right neighbour.
    fn redistribute(&self, repair: Repair) -> Result<()> {
        let Repair {
            node: mut node_guard,
            sibling: mut sibling_guard,
            parent: mut parent_guard,
            index,
            ..
        } = repair;
        let node_page_id = node_guard.page_id();
        let moved_child = {
            let mut node_data = node_guard.data_mut();
            let mut sibling_data = sibling_guard.data_mut();
            let mut parent_data = parent_guard.data_mut();
            let mut parent = InternalPage::new(&mut parent_data[..]);

            match (
                TreePage::from_data(&mut node_data[..])?,
                TreePage::from_data(&mut sibling_data[..])?,
            ) {
                (TreePage::Leaf(mut node), TreePage::Leaf(mut sibling)) => {
                    if index == 0 {
                        sibling.move_first_to_end_of(&mut node);
                        parent.set_key_at(1, sibling.key_at(0));
                    } else {
                        sibling.move_last_to_front_of(&mut node);
                        parent.set_key_at(index, node.key_at(0));
                    }
                    None
                }
                (TreePage::Internal(mut node), TreePage::Internal(mut sibling)) => {
                    let child = if index == 0 {
                        let child = sibling.move_first_to_end_of(&mut node, parent.key_at(1));
                        parent.set_key_at(1, sibling.key_at(0));
                        child
                    } else {
                        let child = sibling.move_last_to_front_of(&mut node, parent.key_at(index));
                        parent.set_key_at(index, node.key_at(0));
                        child
                    };
                    Some(child)
                }
                _ => {
                    return Err(corrupted(format!(
                        "{node_page_id} and its sibling are on different levels"
                    )))
                }
            }
        };
        drop(node_guard);
        drop(sibling_guard);
        drop(parent_guard);

        if let Some(child) = moved_child {
            self.set_parent(child, node_page_id)?;
        }
        debug!(page = %node_page_id, "redistributed page");
        Ok(())
    }

    /// Merges the right page of the pair into the left one and drops the
    /// separator from the parent. A parent left below its floor is the next
    /// repair in the plan.
    fn coalesce(&self, repair: Repair) -> Result<()> {
        let Repair {
            node,
            sibling,
            parent: mut parent_guard,
            index,
            ..
        } = repair;
        let (mut left_guard, mut right_guard, right_index) = if index == 0 {
            (node, sibling, 1)
        } else {
            (sibling, node, index)
        };
        let left_page_id = left_guard.page_id();
        let right_page_id = right_guard.page_id();

        let moved = {
            let mut left_data = left_guard.data_mut();
            let mut right_data = right_guard.data_mut();
            let mut parent_data = parent_guard.data_mut();
            let mut parent = InternalPage::new(&mut parent_data[..]);

            let moved = match (
                TreePage::from_data(&mut left_data[..])?,
                TreePage::from_data(&mut right_data[..])?,
            ) {
                (TreePage::Leaf(mut left), TreePage::Leaf(mut right)) => {
                    right.move_all_to(&mut left);
                    Vec::new()
                }
                (TreePage::Internal(mut left), TreePage::Internal(mut right)) => {
                    right.move_all_to(&mut left, parent.key_at(right_index))
                }
                _ => {
                    return Err(corrupted(format!(
                        "{left_page_id} and {right_page_id} are on different levels"
                    )))
                }
            };
            parent.remove(right_index);
            moved
        };
        drop(left_guard);
        drop(right_guard);
        drop(parent_guard);

        // Freeing first leaves a frame for the children being reparented.
        self.free_page(right_page_id)?;
        self.reparent(&moved, left_page_id)?;
        debug!(page = %left_page_id, merged = %right_page_id, "coalesced pages");
        Ok(())
    }

    /// Shrinks the tree at the top: an internal root with one child hands
    /// the root over to that child, an empty leaf root empties the tree.
    fn adjust_root(&mut self, mut root_guard: PageGuard) -> Result<()> {
        let old_root = root_guard.page_id();
        let new_root = {
            let mut data = root_guard.data_mut();
            match TreePage::from_data(&mut data[..])? {
                TreePage::Internal(mut root) if root.size() == 1 => {
                    root.remove_and_return_only_child()
                }
                TreePage::Leaf(root) if root.size() == 0 => INVALID_PAGE_ID,
                _ => return Ok(()),
            }
        };
        drop(root_guard);

        if new_root != INVALID_PAGE_ID {
            self.set_parent(new_root, INVALID_PAGE_ID)?;
        }
        self.update_root_page_id(new_root)?;
        self.free_page(old_root)?;
        debug!(index_id = self.index_id, old_root = %old_root, root = %new_root, "adjusted root");
        Ok(())
    }

    /// Records a new root in the registry, then in memory. An invalid root
    /// removes the registry entry.
    fn update_root_page_id(&mut self, root_page_id: PageId) -> Result<()> {
        let mut guard = self.fetch(INDEX_ROOTS_PAGE_ID)?;
        {
            let mut data = guard.data_mut();
            let mut roots = IndexRootsPage::new(&mut data[..]);
            if root_page_id == INVALID_PAGE_ID {
                roots.delete(self.index_id);
            } else if !roots.update(self.index_id, root_page_id)
                && !roots.insert(self.index_id, root_page_id)
            {
                return Err(BurrowError::IndexRootsFull);
            }
        }
        self.root_page_id = root_page_id;
        Ok(())
    }

    fn check_subtree(
        &self,
        page_id: PageId,
        parent_page_id: PageId,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        leaves: &mut Vec<PageId>,
    ) -> Result<usize> {
        let guard = self.fetch(page_id)?;
        let data = guard.data();
        let page = TreePage::from_data(&data[..])?;

        if page.page_id() != page_id {
            return Err(corrupted(format!("{page_id} records id {}", page.page_id())));
        }
        if page.parent_page_id() != parent_page_id {
            return Err(corrupted(format!(
                "{page_id} records parent {}, expected {parent_page_id}",
                page.parent_page_id()
            )));
        }
        let is_root = parent_page_id == INVALID_PAGE_ID;
        let floor = match (&page, is_root) {
            (TreePage::Internal(_), true) => 2,
            (TreePage::Leaf(_), true) => 1,
            (_, false) => page.min_size(),
        };
        if page.size() < floor || page.size() > page.max_size() {
            return Err(corrupted(format!(
                "{page_id} holds {} entries, allowed {floor}..={}",
                page.size(),
                page.max_size()
            )));
        }

        let first = match page {
            TreePage::Internal(_) => 1,
            TreePage::Leaf(_) => 0,
        };
        let key_at = |i: usize| match &page {
            TreePage::Internal(node) => node.key_at(i),
            TreePage::Leaf(leaf) => leaf.key_at(i),
        };
        for i in first..page.size() {
            let key = key_at(i);
            if i > first && self.comparator.compare(key_at(i - 1), key) != Ordering::Less {
                return Err(corrupted(format!("{page_id} keys out of order at slot {i}")));
            }
            let below = lower.is_some_and(|lower| self.comparator.compare(key, lower) == Ordering::Less);
            let above = upper.is_some_and(|upper| self.comparator.compare(key, upper) != Ordering::Less);
            if below || above {
                return Err(corrupted(format!("{page_id} slot {i} lies outside its parent's range")));
            }
        }

        match &page {
            TreePage::Leaf(_) => {
                leaves.push(page_id);
                Ok(1)
            }
            TreePage::Internal(node) => {
                let mut depth = None;
                for i in 0..node.size() {
                    let child_lower = if i == 0 { lower } else { Some(node.key_at(i)) };
                    let child_upper = if i + 1 < node.size() { Some(node.key_at(i + 1)) } else { upper };
                    let child_depth =
                        self.check_subtree(node.value_at(i), page_id, child_lower, child_upper, leaves)?;
                    match depth {
                        None => depth = Some(child_depth),
                        Some(d) if d != child_depth => {
                            return Err(corrupted(format!("{page_id} has leaves at uneven depth")));
                        }
                        Some(_) => {}
                    }
                }
                Ok(depth.unwrap_or(0) + 1)
            }
        }
    }
}

fn corrupted(message: String) -> BurrowError {
    BurrowError::IndexCorrupted(message)
}

fn hex(key: &[u8]) -> String {
    key.iter().rev().map(|b| format!("{b:02x}")).collect()
}
