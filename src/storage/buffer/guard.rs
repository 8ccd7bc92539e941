//! Scoped page guards.
//!
//! Each guard owns one pin on a frame (and, for the latched variants, one
//! reader or writer latch). Drop is the single release point: the latch is
//! released first, then the pin, forwarding the dirty bit accumulated by
//! mutable access. Guards are move-only; a moved-from guard never fires.

use super::replacer::FrameId;
use super::{BufferPoolInner, Frame};
use crate::storage::page::{PageId, PAGE_SIZE};
use parking_lot::lock_api::RawRwLock as _;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Pin-only guard: holds the page resident without serializing content
/// access.
pub struct PageGuard {
    inner: Arc<BufferPoolInner>,
    frame: Arc<Frame>,
    frame_id: FrameId,
    page_id: PageId,
    dirty: bool,
}

impl PageGuard {
    pub(crate) fn new(
        inner: Arc<BufferPoolInner>,
        frame: Arc<Frame>,
        frame_id: FrameId,
        page_id: PageId,
    ) -> Self {
        Self {
            inner,
            frame,
            frame_id,
            page_id,
            dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl Deref for PageGuard {
    type Target = [u8; PAGE_SIZE];

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.frame.data.get() }
    }
}

impl DerefMut for PageGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.dirty = true;
        unsafe { &mut *self.frame.data.get() }
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        self.inner.unpin(self.frame_id, self.dirty);
    }
}

/// Pin plus reader latch.
pub struct ReadPageGuard {
    inner: Arc<BufferPoolInner>,
    frame: Arc<Frame>,
    frame_id: FrameId,
    page_id: PageId,
}

impl ReadPageGuard {
    pub(crate) fn new(
        inner: Arc<BufferPoolInner>,
        frame: Arc<Frame>,
        frame_id: FrameId,
        page_id: PageId,
    ) -> Self {
        Self {
            inner,
            frame,
            frame_id,
            page_id,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl Deref for ReadPageGuard {
    type Target = [u8; PAGE_SIZE];

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.frame.data.get() }
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        unsafe { self.frame.latch.unlock_shared() };
        self.inner.unpin(self.frame_id, false);
    }
}

/// Pin plus writer latch. Taking a mutable view marks the guard dirty; the
/// frame's dirty bit transitions at drop time.
pub struct WritePageGuard {
    inner: Arc<BufferPoolInner>,
    frame: Arc<Frame>,
    frame_id: FrameId,
    page_id: PageId,
    dirty: bool,
}

impl WritePageGuard {
    pub(crate) fn new(
        inner: Arc<BufferPoolInner>,
        frame: Arc<Frame>,
        frame_id: FrameId,
        page_id: PageId,
    ) -> Self {
        Self {
            inner,
            frame,
            frame_id,
            page_id,
            dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl Deref for WritePageGuard {
    type Target = [u8; PAGE_SIZE];

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.frame.data.get() }
    }
}

impl DerefMut for WritePageGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.dirty = true;
        unsafe { &mut *self.frame.data.get() }
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        unsafe { self.frame.latch.unlock_exclusive() };
        self.inner.unpin(self.frame_id, self.dirty);
    }
}

unsafe impl Send for PageGuard {}
unsafe impl Send for ReadPageGuard {}
unsafe impl Send for WritePageGuard {}
