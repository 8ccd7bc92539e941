use anyhow::Result;

/// Index of a slot in the buffer pool's frame array.
pub type FrameId = usize;

/// What kind of access touched a frame. The replacement policy may weigh
/// these differently; LRU-K currently treats them all the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Unknown,
    Lookup,
    Scan,
    Index,
}

/// Page replacement policy. All methods are called with the buffer pool's
/// latch held, so implementations need no internal synchronization.
pub trait Replacer: Send {
    /// Record that `frame_id` was accessed at the current logical time.
    fn record_access(&mut self, frame_id: FrameId, access_type: AccessType);

    /// Toggle whether `frame_id` is a candidate for eviction.
    fn set_evictable(&mut self, frame_id: FrameId, evictable: bool);

    /// Choose a victim among the evictable frames, remove it from the
    /// replacer, and return it. `None` if no frame is evictable.
    fn evict(&mut self) -> Option<FrameId>;

    /// Evict a specific frame regardless of its ranking. Fails if the frame
    /// is tracked but not evictable; unknown frames are a no-op.
    fn remove(&mut self, frame_id: FrameId) -> Result<()>;

    /// Number of evictable frames.
    fn size(&self) -> usize;
}
