use super::replacer::{AccessType, FrameId, Replacer};
use anyhow::{bail, Result};
use std::collections::{HashMap, VecDeque};

/// Per-frame access history: the timestamps of the last `k` accesses,
/// least recent in front.
#[derive(Debug)]
struct LruKNode {
    history: VecDeque<u64>,
    is_evictable: bool,
}

impl LruKNode {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            is_evictable: false,
        }
    }
}

/// LRU-K replacement policy.
///
/// The victim is the evictable frame with the largest backward K-distance,
/// i.e. the one whose Kth most recent access lies furthest in the past.
/// Frames with fewer than K recorded accesses have infinite backward
/// K-distance and are evicted first, in order of their earliest recorded
/// access (classical LRU).
#[derive(Debug)]
pub struct LruKReplacer {
    node_store: HashMap<FrameId, LruKNode>,
    current_timestamp: u64,
    curr_size: usize,
    replacer_size: usize,
    k: usize,
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k >= 1, "LRU-K requires k >= 1");
        Self {
            node_store: HashMap::with_capacity(num_frames),
            current_timestamp: 0,
            curr_size: 0,
            replacer_size: num_frames,
            k,
        }
    }
}

impl Replacer for LruKReplacer {
    fn record_access(&mut self, frame_id: FrameId, _access_type: AccessType) {
        debug_assert!(frame_id < self.replacer_size, "frame id out of range");

        let node = self.node_store.entry(frame_id).or_insert_with(LruKNode::new);
        node.history.push_back(self.current_timestamp);
        self.current_timestamp += 1;
        if node.history.len() > self.k {
            node.history.pop_front();
        }
    }

    fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        if let Some(node) = self.node_store.get_mut(&frame_id) {
            if node.is_evictable != evictable {
                node.is_evictable = evictable;
                if evictable {
                    self.curr_size += 1;
                } else {
                    self.curr_size -= 1;
                }
            }
        }
    }

    fn evict(&mut self) -> Option<FrameId> {
        // Candidates with fewer than k accesses rank before any frame with a
        // full history; within each class the earliest front-of-history
        // timestamp wins.
        let mut victim: Option<(bool, u64, FrameId)> = None;
        for (&frame_id, node) in &self.node_store {
            if !node.is_evictable {
                continue;
            }
            let infinite = node.history.len() < self.k;
            let front = *node.history.front().expect("accessed frame has history");
            let candidate = (infinite, front, frame_id);
            victim = match victim {
                None => Some(candidate),
                Some(best) => {
                    let better = (candidate.0 && !best.0)
                        || (candidate.0 == best.0 && candidate.1 < best.1);
                    if better {
                        Some(candidate)
                    } else {
                        Some(best)
                    }
                }
            };
        }

        let (_, _, frame_id) = victim?;
        self.node_store.remove(&frame_id);
        self.curr_size -= 1;
        Some(frame_id)
    }

    fn remove(&mut self, frame_id: FrameId) -> Result<()> {
        match self.node_store.get(&frame_id) {
            None => Ok(()),
            Some(node) if !node.is_evictable => {
                bail!("cannot remove non-evictable frame {}", frame_id)
            }
            Some(_) => {
                self.node_store.remove(&frame_id);
                self.curr_size -= 1;
                Ok(())
            }
        }
    }

    fn size(&self) -> usize {
        self.curr_size
    }
}
