//! Slotted heap page holding table tuples.
//!
//! Layout: a fixed header, a slot array growing forward, and tuple records
//! growing backward from the end of the page. Each record is the tuple
//! metadata followed by the payload. Deleted tuples keep their slot; only
//! the tombstone flag in the metadata changes.

use crate::access::tuple::TupleMeta;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{PageId, INVALID_PAGE_ID, PAGE_SIZE, PAGE_TYPE_HEAP};

const HEADER_SIZE: usize = 16;
const SLOT_SIZE: usize = 4;
const META_SIZE: usize = 18;

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn write_u16(data: &mut [u8], offset: usize, value: u16) {
    data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(buf)
}

fn write_u64(data: &mut [u8], offset: usize, value: u64) {
    data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

fn slot_count(data: &[u8; PAGE_SIZE]) -> u16 {
    read_u16(data, 2)
}

fn next_page_id(data: &[u8; PAGE_SIZE]) -> PageId {
    let id = read_u32(data, 4);
    PageId(id)
}

fn upper(data: &[u8; PAGE_SIZE]) -> u16 {
    read_u16(data, 8)
}

fn slot(data: &[u8; PAGE_SIZE], index: u16) -> (usize, usize) {
    let base = HEADER_SIZE + index as usize * SLOT_SIZE;
    let offset = read_u16(data, base) as usize;
    let len = read_u16(data, base + 2) as usize;
    (offset, len)
}

fn read_meta(data: &[u8; PAGE_SIZE], offset: usize) -> TupleMeta {
    TupleMeta {
        insert_txn: read_u64(data, offset),
        delete_txn: read_u64(data, offset + 8),
        is_deleted: data[offset + 16] != 0,
    }
}

fn check_slot(data: &[u8; PAGE_SIZE], index: u16) -> StorageResult<()> {
    let count = slot_count(data);
    if index >= count {
        return Err(StorageError::InvalidSlot {
            slot: index,
            slot_count: count,
        });
    }
    Ok(())
}

fn tuple_at(data: &[u8; PAGE_SIZE], index: u16) -> StorageResult<(TupleMeta, Vec<u8>)> {
    check_slot(data, index)?;
    let (offset, len) = slot(data, index);
    let meta = read_meta(data, offset);
    let payload = data[offset + META_SIZE..offset + len].to_vec();
    Ok((meta, payload))
}

fn free_space(data: &[u8; PAGE_SIZE]) -> usize {
    upper(data) as usize - (HEADER_SIZE + slot_count(data) as usize * SLOT_SIZE)
}

/// Read-only view over a heap page buffer.
pub struct HeapPageRef<'a> {
    data: &'a [u8; PAGE_SIZE],
}

impl<'a> HeapPageRef<'a> {
    pub fn from_data(data: &'a [u8; PAGE_SIZE]) -> Self {
        debug_assert_eq!(data[0], PAGE_TYPE_HEAP);
        Self { data }
    }

    pub fn slot_count(&self) -> u16 {
        slot_count(self.data)
    }

    pub fn next_page_id(&self) -> PageId {
        next_page_id(self.data)
    }

    pub fn get_tuple(&self, index: u16) -> StorageResult<(TupleMeta, Vec<u8>)> {
        tuple_at(self.data, index)
    }

    pub fn get_tuple_meta(&self, index: u16) -> StorageResult<TupleMeta> {
        check_slot(self.data, index)?;
        let (offset, _) = slot(self.data, index);
        Ok(read_meta(self.data, offset))
    }
}

/// Mutable view over a heap page buffer.
pub struct HeapPage<'a> {
    data: &'a mut [u8; PAGE_SIZE],
}

impl<'a> HeapPage<'a> {
    /// Format a fresh page.
    pub fn init(data: &'a mut [u8; PAGE_SIZE]) -> Self {
        data.fill(0);
        data[0] = PAGE_TYPE_HEAP;
        write_u16(data, 2, 0);
        write_u32(data, 4, INVALID_PAGE_ID.0);
        write_u16(data, 8, PAGE_SIZE as u16);
        Self { data }
    }

    pub fn from_data(data: &'a mut [u8; PAGE_SIZE]) -> Self {
        debug_assert_eq!(data[0], PAGE_TYPE_HEAP);
        Self { data }
    }

    pub fn slot_count(&self) -> u16 {
        slot_count(self.data)
    }

    pub fn next_page_id(&self) -> PageId {
        next_page_id(self.data)
    }

    pub fn set_next_page_id(&mut self, page_id: PageId) {
        write_u32(self.data, 4, page_id.0);
    }

    pub fn free_space(&self) -> usize {
        free_space(self.data)
    }

    pub fn get_tuple(&self, index: u16) -> StorageResult<(TupleMeta, Vec<u8>)> {
        tuple_at(self.data, index)
    }

    pub fn get_tuple_meta(&self, index: u16) -> StorageResult<TupleMeta> {
        check_slot(self.data, index)?;
        let (offset, _) = slot(self.data, index);
        Ok(read_meta(self.data, offset))
    }

    pub fn required_space_for(payload_len: usize) -> usize {
        SLOT_SIZE + META_SIZE + payload_len
    }

    /// Append a tuple; returns its slot index.
    pub fn insert_tuple(&mut self, meta: &TupleMeta, payload: &[u8]) -> StorageResult<u16> {
        let required = Self::required_space_for(payload.len());
        let available = self.free_space();
        if required > available {
            return Err(StorageError::PageFull {
                required,
                available,
            });
        }

        let count = slot_count(self.data);
        let record_len = META_SIZE + payload.len();
        let new_upper = upper(self.data) as usize - record_len;

        self.write_meta(new_upper, meta);
        self.data[new_upper + META_SIZE..new_upper + record_len].copy_from_slice(payload);

        let base = HEADER_SIZE + count as usize * SLOT_SIZE;
        write_u16(self.data, base, new_upper as u16);
        write_u16(self.data, base + 2, record_len as u16);
        write_u16(self.data, 2, count + 1);
        write_u16(self.data, 8, new_upper as u16);

        Ok(count)
    }

    pub fn set_tuple_meta(&mut self, index: u16, meta: &TupleMeta) -> StorageResult<()> {
        check_slot(self.data, index)?;
        let (offset, _) = slot(self.data, index);
        self.write_meta(offset, meta);
        Ok(())
    }

    /// Overwrite a tuple's payload without moving it. The new payload must
    /// fit in the slot's allocated space so that the RID stays stable.
    pub fn update_tuple_in_place(&mut self, index: u16, payload: &[u8]) -> StorageResult<()> {
        check_slot(self.data, index)?;
        let (offset, len) = slot(self.data, index);
        let capacity = len - META_SIZE;
        if payload.len() > capacity {
            return Err(StorageError::PageFull {
                required: payload.len(),
                available: capacity,
            });
        }
        self.data[offset + META_SIZE..offset + META_SIZE + payload.len()].copy_from_slice(payload);
        Ok(())
    }

    fn write_meta(&mut self, offset: usize, meta: &TupleMeta) {
        write_u64(self.data, offset, meta.insert_txn);
        write_u64(self.data, offset + 8, meta.delete_txn);
        self.data[offset + 16] = meta.is_deleted as u8;
        self.data[offset + 17] = 0;
    }
}
