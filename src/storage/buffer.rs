pub mod guard;
pub mod lru_k;
pub mod replacer;

use crate::storage::disk::DiskManager;
use crate::storage::error::StorageError;
use crate::storage::page::{PageId, PAGE_SIZE};
use anyhow::Result;
use guard::{PageGuard, ReadPageGuard, WritePageGuard};
use log::trace;
use parking_lot::lock_api::RawRwLock as _;
use parking_lot::{Mutex, RawRwLock};
use replacer::{AccessType, FrameId, Replacer};
use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// A slot in the buffer pool holding one resident page.
///
/// The frame owns its reader/writer latch; latching is independent of
/// pinning. Pin counts and the dirty bit are only transitioned while the
/// pool latch is held, which keeps eviction and re-fetch of the same page
/// from racing.
pub struct Frame {
    latch: RawRwLock,
    data: UnsafeCell<Box<[u8; PAGE_SIZE]>>,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
}

unsafe impl Send for Frame {}
unsafe impl Sync for Frame {}

impl Frame {
    fn new() -> Self {
        Self {
            latch: RawRwLock::INIT,
            data: UnsafeCell::new(Box::new([0u8; PAGE_SIZE])),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
        }
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::SeqCst)
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct BufferPoolManager {
    inner: Arc<BufferPoolInner>,
}

pub(crate) struct BufferPoolInner {
    frames: Vec<Arc<Frame>>,
    state: Mutex<PoolState>,
    next_page_id: AtomicU32,
}

/// Everything the pool latch protects: the page table, the free list, the
/// replacer, frame residency, and the disk manager (I/O happens under the
/// latch so an in-flight eviction cannot race a fetch of the same id).
struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    resident: Vec<Option<PageId>>,
    free_list: Vec<FrameId>,
    replacer: Box<dyn Replacer>,
    disk: DiskManager,
}

impl BufferPoolInner {
    /// Decrement the pin count, OR-merging the guard's dirty bit into the
    /// frame. When the count reaches zero the frame becomes evictable.
    pub(crate) fn unpin(&self, frame_id: FrameId, dirty: bool) {
        let frame = &self.frames[frame_id];
        if dirty {
            frame.is_dirty.store(true, Ordering::SeqCst);
        }
        let mut state = self.state.lock();
        let prev = frame.pin_count.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "unpin of an unpinned frame");
        if prev == 1 {
            state.replacer.set_evictable(frame_id, true);
        }
    }
}

impl BufferPoolManager {
    pub fn new(disk: DiskManager, replacer: Box<dyn Replacer>, pool_size: usize) -> Self {
        let next_page_id = disk.num_pages().unwrap_or(0);
        Self {
            inner: Arc::new(BufferPoolInner {
                frames: (0..pool_size).map(|_| Arc::new(Frame::new())).collect(),
                state: Mutex::new(PoolState {
                    page_table: HashMap::with_capacity(pool_size),
                    resident: vec![None; pool_size],
                    free_list: (0..pool_size).rev().collect(),
                    replacer,
                    disk,
                }),
                next_page_id: AtomicU32::new(next_page_id),
            }),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.inner.frames.len()
    }

    /// Allocate a fresh page id and return it with an exclusive guard over
    /// its zeroed frame. Fails if no frame is evictable.
    pub fn new_page(&self) -> Result<(PageId, WritePageGuard)> {
        let mut state = self.inner.state.lock();
        let frame_id = self.acquire_frame(&mut state)?;
        let page_id = PageId(self.inner.next_page_id.fetch_add(1, Ordering::SeqCst));
        let frame = Arc::clone(&self.inner.frames[frame_id]);

        unsafe { (*frame.data.get()).fill(0) };
        frame.pin_count.store(1, Ordering::SeqCst);
        frame.is_dirty.store(true, Ordering::SeqCst);
        state.page_table.insert(page_id, frame_id);
        state.resident[frame_id] = Some(page_id);
        state.replacer.record_access(frame_id, AccessType::Unknown);
        state.replacer.set_evictable(frame_id, false);
        drop(state);

        frame.latch.lock_exclusive();
        Ok((
            page_id,
            WritePageGuard::new(Arc::clone(&self.inner), frame, frame_id, page_id),
        ))
    }

    /// Pin `page_id` without latching its content.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PageGuard> {
        let (frame_id, frame) = self.fetch_frame(page_id, AccessType::Unknown)?;
        Ok(PageGuard::new(
            Arc::clone(&self.inner),
            frame,
            frame_id,
            page_id,
        ))
    }

    /// Pin `page_id` and acquire its reader latch. The latch is taken only
    /// after the pool latch has been released.
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<ReadPageGuard> {
        let (frame_id, frame) = self.fetch_frame(page_id, AccessType::Lookup)?;
        frame.latch.lock_shared();
        Ok(ReadPageGuard::new(
            Arc::clone(&self.inner),
            frame,
            frame_id,
            page_id,
        ))
    }

    /// Pin `page_id` and acquire its writer latch.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<WritePageGuard> {
        let (frame_id, frame) = self.fetch_frame(page_id, AccessType::Lookup)?;
        frame.latch.lock_exclusive();
        Ok(WritePageGuard::new(
            Arc::clone(&self.inner),
            frame,
            frame_id,
            page_id,
        ))
    }

    /// Write `page_id` through to disk and clear its dirty bit.
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let mut state = self.inner.state.lock();
        let frame_id = *state
            .page_table
            .get(&page_id)
            .ok_or(StorageError::PageNotResident(page_id))?;
        let frame = Arc::clone(&self.inner.frames[frame_id]);
        let data = unsafe { &*frame.data.get() };
        state.disk.write_page(page_id, &data[..])?;
        frame.is_dirty.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Write every dirty resident page through to disk.
    pub fn flush_all(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        for frame_id in 0..self.inner.frames.len() {
            let Some(page_id) = state.resident[frame_id] else {
                continue;
            };
            let frame = Arc::clone(&self.inner.frames[frame_id]);
            if frame.is_dirty.load(Ordering::SeqCst) {
                let data = unsafe { &*frame.data.get() };
                state.disk.write_page(page_id, &data[..])?;
                frame.is_dirty.store(false, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    /// Drop `page_id` from the pool. `Ok(false)` if the page is still
    /// pinned; pages that are not resident are trivially deleted.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut state = self.inner.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(true);
        };
        let frame = &self.inner.frames[frame_id];
        if frame.pin_count.load(Ordering::SeqCst) > 0 {
            return Ok(false);
        }

        state.replacer.remove(frame_id)?;
        state.page_table.remove(&page_id);
        state.resident[frame_id] = None;
        frame.is_dirty.store(false, Ordering::SeqCst);
        unsafe { (*frame.data.get()).fill(0) };
        state.free_list.push(frame_id);
        Ok(true)
    }

    /// Pin count of a resident page, if any. Test and diagnostics hook.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.inner.state.lock();
        state
            .page_table
            .get(&page_id)
            .map(|&frame_id| self.inner.frames[frame_id].pin_count())
    }

    fn fetch_frame(&self, page_id: PageId, access: AccessType) -> Result<(FrameId, Arc<Frame>)> {
        let mut state = self.inner.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = Arc::clone(&self.inner.frames[frame_id]);
            frame.pin_count.fetch_add(1, Ordering::SeqCst);
            state.replacer.record_access(frame_id, access);
            state.replacer.set_evictable(frame_id, false);
            return Ok((frame_id, frame));
        }

        let frame_id = self.acquire_frame(&mut state)?;
        let frame = Arc::clone(&self.inner.frames[frame_id]);

        {
            let data = unsafe { &mut *frame.data.get() };
            if let Err(e) = state.disk.read_page(page_id, &mut data[..]) {
                state.free_list.push(frame_id);
                return Err(e);
            }
        }
        frame.pin_count.store(1, Ordering::SeqCst);
        frame.is_dirty.store(false, Ordering::SeqCst);
        state.page_table.insert(page_id, frame_id);
        state.resident[frame_id] = Some(page_id);
        state.replacer.record_access(frame_id, access);
        state.replacer.set_evictable(frame_id, false);

        Ok((frame_id, frame))
    }

    /// Take a frame from the free list, or evict one. A dirty victim is
    /// written back before its frame is repurposed.
    fn acquire_frame(&self, state: &mut PoolState) -> Result<FrameId> {
        if let Some(frame_id) = state.free_list.pop() {
            return Ok(frame_id);
        }

        let frame_id = state.replacer.evict().ok_or(StorageError::NoEvictableFrame)?;
        let frame = &self.inner.frames[frame_id];
        if let Some(old_page_id) = state.resident[frame_id] {
            if frame.is_dirty.load(Ordering::SeqCst) {
                let data = unsafe { &*frame.data.get() };
                state.disk.write_page(old_page_id, &data[..])?;
                frame.is_dirty.store(false, Ordering::SeqCst);
            }
            state.page_table.remove(&old_page_id);
            state.resident[frame_id] = None;
            trace!("evicted page {} from frame {}", old_page_id, frame_id);
        }
        Ok(frame_id)
    }
}

#[cfg(test)]
mod tests {
    use super::lru_k::LruKReplacer;
    use super::*;
    use tempfile::tempdir;

    fn create_test_pool(pool_size: usize) -> Result<BufferPoolManager> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");
        let disk = DiskManager::create(&file_path)?;
        let replacer = Box::new(LruKReplacer::new(pool_size, 2));
        // Leak the tempdir so the backing file outlives the pool.
        std::mem::forget(dir);
        Ok(BufferPoolManager::new(disk, replacer, pool_size))
    }

    #[test]
    fn test_new_page_then_fetch() -> Result<()> {
        let pool = create_test_pool(10)?;

        let (page_id, mut guard) = pool.new_page()?;
        assert_eq!(page_id, PageId(0));
        guard[0] = 42;
        guard[1] = 43;
        drop(guard);

        let guard = pool.fetch_page_read(page_id)?;
        assert_eq!(guard[0], 42);
        assert_eq!(guard[1], 43);

        Ok(())
    }

    #[test]
    fn test_dirty_page_written_back_on_eviction() -> Result<()> {
        let pool = create_test_pool(2)?;

        let (page_id1, mut g1) = pool.new_page()?;
        g1[0] = 1;
        drop(g1);
        let (page_id2, mut g2) = pool.new_page()?;
        g2[0] = 2;
        drop(g2);
        // Third page forces an eviction of a dirty page.
        let (_, mut g3) = pool.new_page()?;
        g3[0] = 3;
        drop(g3);

        let g1 = pool.fetch_page_read(page_id1)?;
        assert_eq!(g1[0], 1);
        drop(g1);
        let g2 = pool.fetch_page_read(page_id2)?;
        assert_eq!(g2[0], 2);

        Ok(())
    }

    #[test]
    fn test_pinned_pages_are_not_evicted() -> Result<()> {
        let pool = create_test_pool(2)?;

        let (_p1, _g1) = pool.new_page()?;
        let (_p2, _g2) = pool.new_page()?;

        // Both frames pinned: no frame is evictable.
        let result = pool.new_page();
        assert!(result.is_err());

        Ok(())
    }

    #[test]
    fn test_pin_count_tracks_guards() -> Result<()> {
        let pool = create_test_pool(4)?;

        let (page_id, guard) = pool.new_page()?;
        assert_eq!(pool.pin_count(page_id), Some(1));
        drop(guard);
        assert_eq!(pool.pin_count(page_id), Some(0));

        let g1 = pool.fetch_page(page_id)?;
        let g2 = pool.fetch_page(page_id)?;
        assert_eq!(pool.pin_count(page_id), Some(2));
        drop(g1);
        drop(g2);
        assert_eq!(pool.pin_count(page_id), Some(0));

        Ok(())
    }

    #[test]
    fn test_delete_page() -> Result<()> {
        let pool = create_test_pool(4)?;

        let (page_id, guard) = pool.new_page()?;
        // Pinned: delete must fail.
        assert!(!pool.delete_page(page_id)?);
        drop(guard);
        // Unpinned: delete succeeds.
        assert!(pool.delete_page(page_id)?);
        // Not resident any more: trivially deleted.
        assert!(pool.delete_page(page_id)?);

        Ok(())
    }

    #[test]
    fn test_flush_clears_dirty() -> Result<()> {
        let pool = create_test_pool(4)?;

        let (page_id, mut guard) = pool.new_page()?;
        guard[0] = 99;
        drop(guard);

        pool.flush_page(page_id)?;
        pool.flush_all()?;

        let guard = pool.fetch_page_read(page_id)?;
        assert_eq!(guard[0], 99);

        Ok(())
    }

    #[test]
    fn test_concurrent_readers_observe_same_bytes() -> Result<()> {
        use std::thread;

        let pool = create_test_pool(8)?;
        let (page_id, mut guard) = pool.new_page()?;
        for (i, b) in guard.iter_mut().enumerate().take(64) {
            *b = (i % 251) as u8;
        }
        drop(guard);

        let mut handles = vec![];
        for _ in 0..8 {
            let pool = pool.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..50 {
                    let guard = pool.fetch_page_read(page_id).unwrap();
                    for (i, &b) in guard.iter().enumerate().take(64) {
                        assert_eq!(b, (i % 251) as u8);
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(pool.pin_count(page_id), Some(0));
        Ok(())
    }

    #[test]
    fn test_write_guard_excludes_readers() -> Result<()> {
        use std::sync::atomic::{AtomicU64, Ordering};
        use std::thread;

        let pool = create_test_pool(8)?;
        let (page_id, guard) = pool.new_page()?;
        drop(guard);

        let counter = Arc::new(AtomicU64::new(0));
        let mut handles = vec![];
        for _ in 0..4 {
            let pool = pool.clone();
            let counter = Arc::clone(&counter);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    let mut guard = pool.fetch_page_write(page_id).unwrap();
                    let v = u64::from_le_bytes(guard[..8].try_into().unwrap());
                    guard[..8].copy_from_slice(&(v + 1).to_le_bytes());
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let guard = pool.fetch_page_read(page_id)?;
        let v = u64::from_le_bytes(guard[..8].try_into().unwrap());
        assert_eq!(v, 400);
        Ok(())
    }
}
