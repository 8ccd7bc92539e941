//! Concurrent B+Tree index over the buffer pool.
//!
//! Keys are fixed-width memcmp-ordered byte strings ([`key::IndexKey`]),
//! values are [`Rid`]s, and keys are unique. A dedicated header page holds
//! the root page id so root changes serialize on one page latch.
//!
//! Concurrency follows hand-over-hand latching. Reads crab downward with
//! reader latches. Inserts first run an optimistic pass that writer-latches
//! only the leaf and falls back to a pessimistic pass when the leaf would
//! split. Deletes always run pessimistically. A pessimistic pass keeps a
//! stack of writer guards from the header down and drops everything above
//! the first safe node.

pub mod iterator;
pub mod key;

use crate::access::tuple::Rid;
use crate::storage::buffer::guard::WritePageGuard;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::btree_header_page::BTreeHeaderPage;
use crate::storage::page::btree_internal_page::{BTreeInternalPage, INTERNAL_PAGE_CAPACITY};
use crate::storage::page::btree_leaf_page::{BTreeLeafPage, LEAF_PAGE_CAPACITY};
use crate::storage::page::{PageId, INVALID_PAGE_ID};
use anyhow::{bail, Result};
use iterator::BPlusTreeIterator;
use key::IndexKey;
use log::{debug, warn};

pub struct BPlusTree {
    buffer_pool: BufferPoolManager,
    header_page_id: PageId,
    leaf_max_size: u16,
    internal_max_size: u16,
}

impl BPlusTree {
    /// Create a new empty tree, allocating its header page.
    pub fn create(
        buffer_pool: BufferPoolManager,
        leaf_max_size: u16,
        internal_max_size: u16,
    ) -> Result<Self> {
        if leaf_max_size < 2 || leaf_max_size as usize > LEAF_PAGE_CAPACITY {
            bail!(
                "leaf_max_size must be in [2, {}], got {}",
                LEAF_PAGE_CAPACITY,
                leaf_max_size
            );
        }
        if internal_max_size < 3 || internal_max_size as usize > INTERNAL_PAGE_CAPACITY {
            bail!(
                "internal_max_size must be in [3, {}], got {}",
                INTERNAL_PAGE_CAPACITY,
                internal_max_size
            );
        }

        let (header_page_id, mut header) = buffer_pool.new_page()?;
        BTreeHeaderPage::init(&mut header);
        drop(header);

        Ok(Self {
            buffer_pool,
            header_page_id,
            leaf_max_size,
            internal_max_size,
        })
    }

    /// Open a tree whose header page already exists.
    pub fn open(
        buffer_pool: BufferPoolManager,
        header_page_id: PageId,
        leaf_max_size: u16,
        internal_max_size: u16,
    ) -> Self {
        Self {
            buffer_pool,
            header_page_id,
            leaf_max_size,
            internal_max_size,
        }
    }

    pub fn header_page_id(&self) -> PageId {
        self.header_page_id
    }

    pub fn is_empty(&self) -> Result<bool> {
        let header = self.buffer_pool.fetch_page_read(self.header_page_id)?;
        Ok(!BTreeHeaderPage::root_page_id(&header).is_valid())
    }

    /// Point lookup.
    pub fn get(&self, key: &IndexKey) -> Result<Option<Rid>> {
        let header = self.buffer_pool.fetch_page_read(self.header_page_id)?;
        let root_id = BTreeHeaderPage::root_page_id(&header);
        if !root_id.is_valid() {
            return Ok(None);
        }
        let mut guard = self.buffer_pool.fetch_page_read(root_id)?;
        drop(header);

        loop {
            if BTreeLeafPage::is_leaf(&guard) {
                let leaf = BTreeLeafPage::from_bytes(&guard);
                return Ok(leaf.lookup(key));
            }
            let node = BTreeInternalPage::from_bytes(&guard);
            let child = node.child_at(node.child_index(key));
            // Child is latched before the parent guard is released: the
            // assignment drops the old guard after the fetch completes.
            guard = self.buffer_pool.fetch_page_read(child)?;
        }
    }

    /// Insert a key/value pair. Returns false (without modifying the tree)
    /// if the key is already present.
    pub fn insert(&self, key: &IndexKey, rid: Rid) -> Result<bool> {
        if let Some(inserted) = self.insert_optimistic(key, rid)? {
            return Ok(inserted);
        }
        self.insert_pessimistic(key, rid)
    }

    /// Remove a key. Absent keys are a no-op.
    pub fn remove(&self, key: &IndexKey) -> Result<()> {
        let mut orphaned = Vec::new();
        let result = self.remove_inner(key, &mut orphaned);
        for page_id in orphaned {
            match self.buffer_pool.delete_page(page_id) {
                Ok(true) => {}
                Ok(false) => warn!("merged index page {} still pinned", page_id),
                Err(e) => warn!("failed to drop merged index page {}: {}", page_id, e),
            }
        }
        result
    }

    /// Iterator positioned at the smallest key.
    pub fn iter(&self) -> Result<BPlusTreeIterator> {
        let header = self.buffer_pool.fetch_page_read(self.header_page_id)?;
        let root_id = BTreeHeaderPage::root_page_id(&header);
        if !root_id.is_valid() {
            return Ok(BPlusTreeIterator::end(self.buffer_pool.clone()));
        }
        let mut guard = self.buffer_pool.fetch_page_read(root_id)?;
        drop(header);

        loop {
            if BTreeLeafPage::is_leaf(&guard) {
                return Ok(BPlusTreeIterator::new(
                    self.buffer_pool.clone(),
                    guard.page_id(),
                    0,
                ));
            }
            let node = BTreeInternalPage::from_bytes(&guard);
            guard = self.buffer_pool.fetch_page_read(node.child_at(0))?;
        }
    }

    /// Iterator positioned at the first entry with key >= `key`.
    pub fn iter_from(&self, key: &IndexKey) -> Result<BPlusTreeIterator> {
        let header = self.buffer_pool.fetch_page_read(self.header_page_id)?;
        let root_id = BTreeHeaderPage::root_page_id(&header);
        if !root_id.is_valid() {
            return Ok(BPlusTreeIterator::end(self.buffer_pool.clone()));
        }
        let mut guard = self.buffer_pool.fetch_page_read(root_id)?;
        drop(header);

        loop {
            if BTreeLeafPage::is_leaf(&guard) {
                let leaf = BTreeLeafPage::from_bytes(&guard);
                let index = leaf.lower_bound(key);
                return Ok(BPlusTreeIterator::new(
                    self.buffer_pool.clone(),
                    guard.page_id(),
                    index,
                ));
            }
            let node = BTreeInternalPage::from_bytes(&guard);
            guard = self
                .buffer_pool
                .fetch_page_read(node.child_at(node.child_index(key)))?;
        }
    }

    /// Optimistic insert pass: reader latches down to the leaf's parent, a
    /// writer latch on the leaf only. Returns None when the leaf is full
    /// and the pessimistic pass must run.
    fn insert_optimistic(&self, key: &IndexKey, rid: Rid) -> Result<Option<bool>> {
        let header = self.buffer_pool.fetch_page_read(self.header_page_id)?;
        let root_id = BTreeHeaderPage::root_page_id(&header);
        if !root_id.is_valid() {
            // Empty tree: root creation needs the header writer latch.
            return Ok(None);
        }

        // While an ancestor is reader-latched the leaf cannot split, so
        // re-latching it in write mode after the type probe is sound.
        let probe = self.buffer_pool.fetch_page_read(root_id)?;
        if BTreeLeafPage::is_leaf(&probe) {
            drop(probe);
            let mut leaf_guard = self.buffer_pool.fetch_page_write(root_id)?;
            drop(header);
            return self.leaf_insert_if_safe(&mut leaf_guard, key, rid);
        }

        let mut parent = probe;
        drop(header);
        loop {
            let node = BTreeInternalPage::from_bytes(&parent);
            let child_id = node.child_at(node.child_index(key));
            let child = self.buffer_pool.fetch_page_read(child_id)?;
            if BTreeLeafPage::is_leaf(&child) {
                drop(child);
                let mut leaf_guard = self.buffer_pool.fetch_page_write(child_id)?;
                drop(parent);
                return self.leaf_insert_if_safe(&mut leaf_guard, key, rid);
            }
            parent = child;
        }
    }

    fn leaf_insert_if_safe(
        &self,
        guard: &mut WritePageGuard,
        key: &IndexKey,
        rid: Rid,
    ) -> Result<Option<bool>> {
        let mut leaf = BTreeLeafPage::from_bytes(guard);
        if leaf.lookup(key).is_some() {
            return Ok(Some(false));
        }
        if leaf.size() < leaf.max_size as usize {
            leaf.insert(*key, rid);
            leaf.write_to(guard);
            return Ok(Some(true));
        }
        Ok(None)
    }

    fn insert_pessimistic(&self, key: &IndexKey, rid: Rid) -> Result<bool> {
        let mut header = self.buffer_pool.fetch_page_write(self.header_page_id)?;
        let root_id = BTreeHeaderPage::root_page_id(&header);

        if !root_id.is_valid() {
            let (root_page_id, mut root_guard) = self.buffer_pool.new_page()?;
            let mut leaf = BTreeLeafPage::new(self.leaf_max_size);
            leaf.insert(*key, rid);
            leaf.write_to(&mut root_guard);
            BTreeHeaderPage::set_root_page_id(&mut header, root_page_id);
            debug!("created b+tree root leaf {}", root_page_id);
            return Ok(true);
        }

        let mut header_opt = Some(header);
        let mut ancestors: Vec<WritePageGuard> = Vec::new();
        let mut cur = self.buffer_pool.fetch_page_write(root_id)?;

        while !BTreeLeafPage::is_leaf(&cur) {
            let node = BTreeInternalPage::from_bytes(&cur);
            // Safe internal node: an insertion below cannot split it.
            if node.size() < node.max_size as usize {
                ancestors.clear();
                header_opt = None;
            }
            let child = node.child_at(node.child_index(key));
            let child_guard = self.buffer_pool.fetch_page_write(child)?;
            ancestors.push(cur);
            cur = child_guard;
        }

        let mut leaf = BTreeLeafPage::from_bytes(&cur);
        if leaf.size() < leaf.max_size as usize {
            ancestors.clear();
            header_opt = None;
        }
        if leaf.lookup(key).is_some() {
            return Ok(false);
        }
        leaf.insert(*key, rid);
        if !leaf.is_overfull() {
            leaf.write_to(&mut cur);
            return Ok(true);
        }

        // Split the leaf and propagate the separator upward.
        let (new_page_id, mut new_guard) = self.buffer_pool.new_page()?;
        let mut right = leaf.split();
        right.next_page_id = leaf.next_page_id;
        leaf.next_page_id = new_page_id;
        right.write_to(&mut new_guard);
        leaf.write_to(&mut cur);
        debug!("split leaf {} -> {}", cur.page_id(), new_page_id);

        let mut split_left = cur.page_id();
        let mut separator = right.entries[0].0;
        let mut new_child = new_page_id;
        drop(new_guard);
        drop(cur);

        while let Some(mut parent_guard) = ancestors.pop() {
            let mut node = BTreeInternalPage::from_bytes(&parent_guard);
            node.insert(separator, new_child);
            if !node.is_overfull() {
                node.write_to(&mut parent_guard);
                return Ok(true);
            }
            let (promoted, right_node) = node.split();
            let (right_pid, mut right_guard) = self.buffer_pool.new_page()?;
            right_node.write_to(&mut right_guard);
            node.write_to(&mut parent_guard);
            debug!("split internal {} -> {}", parent_guard.page_id(), right_pid);

            split_left = parent_guard.page_id();
            separator = promoted;
            new_child = right_pid;
        }

        // The root itself split: grow the tree by one level.
        let mut header = header_opt.expect("root split retains the header guard");
        let (new_root_id, mut root_guard) = self.buffer_pool.new_page()?;
        let mut root = BTreeInternalPage::new(self.internal_max_size);
        root.entries.push((IndexKey::MIN, split_left));
        root.entries.push((separator, new_child));
        root.write_to(&mut root_guard);
        BTreeHeaderPage::set_root_page_id(&mut header, new_root_id);
        debug!("new b+tree root {} after split", new_root_id);
        Ok(true)
    }

    fn remove_inner(&self, key: &IndexKey, orphaned: &mut Vec<PageId>) -> Result<()> {
        let header = self.buffer_pool.fetch_page_write(self.header_page_id)?;
        let root_id = BTreeHeaderPage::root_page_id(&header);
        if !root_id.is_valid() {
            return Ok(());
        }

        let mut header_opt = Some(header);
        let mut ancestors: Vec<(WritePageGuard, usize)> = Vec::new();
        let mut cur = self.buffer_pool.fetch_page_write(root_id)?;

        while !BTreeLeafPage::is_leaf(&cur) {
            let node = BTreeInternalPage::from_bytes(&cur);
            let is_root = ancestors.is_empty();
            // Safe internal node: a deletion below cannot underflow it.
            // The root is exempt from the minimum but collapses at size 1,
            // so it is safe only above size 2.
            let safe = if is_root {
                node.size() > 2
            } else {
                node.size() > node.min_size()
            };
            if safe && !is_root {
                ancestors.clear();
                header_opt = None;
            } else if safe {
                header_opt = None;
            }
            let idx = node.child_index(key);
            let child = node.child_at(idx);
            let child_guard = self.buffer_pool.fetch_page_write(child)?;
            ancestors.push((cur, idx));
            cur = child_guard;
        }

        let mut leaf = BTreeLeafPage::from_bytes(&cur);
        if !leaf.remove(key) {
            return Ok(());
        }

        if ancestors.is_empty() {
            // Leaf root: no minimum applies; an empty root clears the tree.
            if leaf.size() == 0 {
                let mut header = header_opt.expect("empty root retains the header guard");
                BTreeHeaderPage::set_root_page_id(&mut header, INVALID_PAGE_ID);
                leaf.write_to(&mut cur);
                orphaned.push(cur.page_id());
                debug!("b+tree emptied, root {} released", cur.page_id());
            } else {
                leaf.write_to(&mut cur);
            }
            return Ok(());
        }

        if leaf.size() >= leaf.min_size() {
            leaf.write_to(&mut cur);
            return Ok(());
        }

        // Leaf underflow: borrow from a sibling (right first) or merge.
        let (mut parent_guard, child_idx) = ancestors.pop().expect("non-root leaf has a parent");
        let mut parent = BTreeInternalPage::from_bytes(&parent_guard);

        if child_idx + 1 < parent.size() {
            let sib_id = parent.child_at(child_idx + 1);
            let mut sib_guard = self.buffer_pool.fetch_page_write(sib_id)?;
            let mut sib = BTreeLeafPage::from_bytes(&sib_guard);
            if sib.size() > sib.min_size() {
                let moved = sib.entries.remove(0);
                leaf.entries.push(moved);
                parent.set_key_at(child_idx + 1, sib.entries[0].0);
                leaf.write_to(&mut cur);
                sib.write_to(&mut sib_guard);
                parent.write_to(&mut parent_guard);
                return Ok(());
            }
            // Merge the right sibling into this leaf.
            leaf.entries.append(&mut sib.entries);
            leaf.next_page_id = sib.next_page_id;
            parent.remove_at(child_idx + 1);
            leaf.write_to(&mut cur);
            sib.write_to(&mut sib_guard);
            drop(sib_guard);
            orphaned.push(sib_id);
            debug!("merged leaf {} into {}", sib_id, cur.page_id());
        } else {
            let sib_id = parent.child_at(child_idx - 1);
            let mut sib_guard = self.buffer_pool.fetch_page_write(sib_id)?;
            let mut sib = BTreeLeafPage::from_bytes(&sib_guard);
            if sib.size() > sib.min_size() {
                let moved = sib.entries.pop().expect("sibling above minimum");
                parent.set_key_at(child_idx, moved.0);
                leaf.entries.insert(0, moved);
                leaf.write_to(&mut cur);
                sib.write_to(&mut sib_guard);
                parent.write_to(&mut parent_guard);
                return Ok(());
            }
            // Merge this leaf into the left sibling.
            sib.entries.append(&mut leaf.entries);
            sib.next_page_id = leaf.next_page_id;
            parent.remove_at(child_idx);
            sib.write_to(&mut sib_guard);
            leaf.write_to(&mut cur);
            orphaned.push(cur.page_id());
            debug!("merged leaf {} into {}", cur.page_id(), sib_id);
        }
        drop(cur);

        // Propagate the deletion upward through underfull internal nodes.
        loop {
            if ancestors.is_empty() {
                // `parent` is the root.
                if parent.size() == 1 {
                    let mut header = header_opt.expect("root collapse retains the header guard");
                    BTreeHeaderPage::set_root_page_id(&mut header, parent.child_at(0));
                    parent.write_to(&mut parent_guard);
                    orphaned.push(parent_guard.page_id());
                    debug!("promoted {} to b+tree root", parent.child_at(0));
                } else {
                    parent.write_to(&mut parent_guard);
                }
                return Ok(());
            }

            if parent.size() >= parent.min_size() {
                parent.write_to(&mut parent_guard);
                return Ok(());
            }

            let (mut gp_guard, pidx) = ancestors.pop().expect("checked non-empty");
            let mut gp = BTreeInternalPage::from_bytes(&gp_guard);

            if pidx + 1 < gp.size() {
                let sib_id = gp.child_at(pidx + 1);
                let mut sib_guard = self.buffer_pool.fetch_page_write(sib_id)?;
                let mut sib = BTreeInternalPage::from_bytes(&sib_guard);
                if sib.size() > sib.min_size() {
                    // Rotate the sibling's first child through the parent
                    // separator.
                    let gp_key = gp.entries[pidx + 1].0;
                    parent.entries.push((gp_key, sib.child_at(0)));
                    gp.set_key_at(pidx + 1, sib.entries[1].0);
                    sib.remove_at(0);
                    parent.write_to(&mut parent_guard);
                    sib.write_to(&mut sib_guard);
                    gp.write_to(&mut gp_guard);
                    return Ok(());
                }
                // Merge the right sibling into `parent`; the separator key
                // descends into the sibling's slot 0.
                let gp_key = gp.entries[pidx + 1].0;
                sib.entries[0].0 = gp_key;
                parent.entries.append(&mut sib.entries);
                gp.remove_at(pidx + 1);
                parent.write_to(&mut parent_guard);
                sib.write_to(&mut sib_guard);
                drop(sib_guard);
                orphaned.push(sib_id);
                debug!("merged internal {} into {}", sib_id, parent_guard.page_id());
            } else {
                let sib_id = gp.child_at(pidx - 1);
                let mut sib_guard = self.buffer_pool.fetch_page_write(sib_id)?;
                let mut sib = BTreeInternalPage::from_bytes(&sib_guard);
                if sib.size() > sib.min_size() {
                    let (moved_key, moved_child) =
                        sib.entries.pop().expect("sibling above minimum");
                    let gp_key = gp.entries[pidx].0;
                    parent.entries[0].0 = gp_key;
                    parent.entries.insert(0, (IndexKey::MIN, moved_child));
                    gp.set_key_at(pidx, moved_key);
                    parent.write_to(&mut parent_guard);
                    sib.write_to(&mut sib_guard);
                    gp.write_to(&mut gp_guard);
                    return Ok(());
                }
                // Merge `parent` into the left sibling.
                let gp_key = gp.entries[pidx].0;
                parent.entries[0].0 = gp_key;
                sib.entries.append(&mut parent.entries);
                gp.remove_at(pidx);
                sib.write_to(&mut sib_guard);
                parent.write_to(&mut parent_guard);
                orphaned.push(parent_guard.page_id());
                debug!("merged internal {} into {}", parent_guard.page_id(), sib_id);
            }

            parent = gp;
            parent_guard = gp_guard;
        }
    }
}
