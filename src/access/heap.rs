//! Heap storage for table tuples.
//!
//! A table is a forward-linked chain of slotted heap pages. Tuples never
//! move: deletion is a tombstone in the tuple metadata and updates happen
//! in place, so RIDs stay stable for indexes and undo records.

use crate::access::tuple::{Rid, Tuple, TupleMeta};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::error::StorageError;
use crate::storage::page::heap_page::{HeapPage, HeapPageRef};
use crate::storage::page::PageId;
use anyhow::{bail, Result};

pub struct TableHeap {
    buffer_pool: BufferPoolManager,
    first_page_id: PageId,
}

impl TableHeap {
    /// Create a heap with a single empty page.
    pub fn create(buffer_pool: BufferPoolManager) -> Result<Self> {
        let (first_page_id, mut guard) = buffer_pool.new_page()?;
        HeapPage::init(&mut guard);
        drop(guard);
        Ok(Self {
            buffer_pool,
            first_page_id,
        })
    }

    pub fn open(buffer_pool: BufferPoolManager, first_page_id: PageId) -> Self {
        Self {
            buffer_pool,
            first_page_id,
        }
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    /// Append a tuple, growing the page chain when the tail is full.
    pub fn insert_tuple(&self, meta: &TupleMeta, tuple: &Tuple) -> Result<Rid> {
        if HeapPage::required_space_for(tuple.data.len()) > crate::storage::page::PAGE_SIZE / 2 {
            bail!("tuple of {} bytes exceeds heap page capacity", tuple.data.len());
        }

        let mut page_id = self.first_page_id;
        loop {
            let mut guard = self.buffer_pool.fetch_page_write(page_id)?;
            let mut page = HeapPage::from_data(&mut guard);

            match page.insert_tuple(meta, &tuple.data) {
                Ok(slot) => return Ok(Rid::new(page_id, slot)),
                Err(StorageError::PageFull { .. }) => {}
                Err(e) => return Err(e.into()),
            }

            let next = page.next_page_id();
            if next.is_valid() {
                page_id = next;
                continue;
            }

            // Tail is full: link a fresh page while still holding the tail's
            // writer latch so concurrent appenders serialize here.
            let (new_page_id, mut new_guard) = self.buffer_pool.new_page()?;
            let mut new_page = HeapPage::init(&mut new_guard);
            let slot = new_page.insert_tuple(meta, &tuple.data)?;
            let mut tail = HeapPage::from_data(&mut guard);
            tail.set_next_page_id(new_page_id);
            return Ok(Rid::new(new_page_id, slot));
        }
    }

    pub fn get_tuple(&self, rid: Rid) -> Result<(TupleMeta, Tuple)> {
        let guard = self.buffer_pool.fetch_page_read(rid.page_id)?;
        let page = HeapPageRef::from_data(&guard);
        let (meta, payload) = page.get_tuple(rid.slot)?;
        Ok((meta, Tuple::new(payload)))
    }

    pub fn get_tuple_meta(&self, rid: Rid) -> Result<TupleMeta> {
        let guard = self.buffer_pool.fetch_page_read(rid.page_id)?;
        let page = HeapPageRef::from_data(&guard);
        Ok(page.get_tuple_meta(rid.slot)?)
    }

    pub fn update_tuple_meta(&self, rid: Rid, meta: &TupleMeta) -> Result<()> {
        let mut guard = self.buffer_pool.fetch_page_write(rid.page_id)?;
        let mut page = HeapPage::from_data(&mut guard);
        page.set_tuple_meta(rid.slot, meta)?;
        Ok(())
    }

    /// Overwrite a tuple's payload in place; the RID stays stable. Fails if
    /// the new payload does not fit the slot.
    pub fn update_tuple_in_place(&self, rid: Rid, tuple: &Tuple) -> Result<()> {
        let mut guard = self.buffer_pool.fetch_page_write(rid.page_id)?;
        let mut page = HeapPage::from_data(&mut guard);
        page.update_tuple_in_place(rid.slot, &tuple.data)?;
        Ok(())
    }

    /// Iterate every slot in the heap, tombstoned tuples included.
    pub fn iter(&self) -> TableIterator {
        TableIterator {
            buffer_pool: self.buffer_pool.clone(),
            page_id: self.first_page_id,
            slot: 0,
        }
    }
}

pub struct TableIterator {
    buffer_pool: BufferPoolManager,
    page_id: PageId,
    slot: u16,
}

impl Iterator for TableIterator {
    type Item = Result<(Rid, TupleMeta, Tuple)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if !self.page_id.is_valid() {
                return None;
            }
            let guard = match self.buffer_pool.fetch_page_read(self.page_id) {
                Ok(guard) => guard,
                Err(e) => {
                    self.page_id = crate::storage::page::INVALID_PAGE_ID;
                    return Some(Err(e));
                }
            };
            let page = HeapPageRef::from_data(&guard);
            if self.slot < page.slot_count() {
                let rid = Rid::new(self.page_id, self.slot);
                self.slot += 1;
                return Some(match page.get_tuple(rid.slot) {
                    Ok((meta, payload)) => Ok((rid, meta, Tuple::new(payload))),
                    Err(e) => Err(e.into()),
                });
            }
            self.page_id = page.next_page_id();
            self.slot = 0;
        }
    }
}
