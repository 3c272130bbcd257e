//! The timeout grid: a two-level sparse page map keyed by a coarse time
//! slot, replacing the original C library's `OpRing` (a fixed ring buffer
//! with an overflow list, see
//! `original_source/src/asyncio/asyncOp.c`'s `opRingPush`/`opRingShift`).
//! A page map never needs an overflow path and degrades gracefully under
//! a timeout storm since each page is allocated lazily.
//!
//! Slots are second-granular by design: sub-second timeouts are served by
//! per-op OS timers instead (see [`crate::combiner::arm_timeout`]); a
//! microsecond deadline maps to `ceil(end_time_us / 10^6)`, then splits
//! into a 16-bit high page index and a 16-bit low in-page index.

use std::collections::HashMap;
use std::sync::Arc;

use crate::op::OperationRecord;

pub(crate) const SLOT_GRANULARITY_US: u64 = 1_000_000;

type Page = HashMap<u16, Vec<Arc<OperationRecord>>>;

/// Single-threaded by design — callers own a `Mutex<TimeoutGrid>` (the
/// reactor's own timer-management mutex); the grid itself is not
/// lock-free, only the combiner per object is.
pub(crate) struct TimeoutGrid {
    pages: HashMap<u16, Page>,
    last_checkpoint_slot: u64,
}

impl TimeoutGrid {
    pub(crate) fn new() -> Self {
        TimeoutGrid {
            pages: HashMap::new(),
            last_checkpoint_slot: 0,
        }
    }

    fn slot_of(end_time_us: u64) -> u64 {
        end_time_us.div_ceil(SLOT_GRANULARITY_US)
    }

    fn split(slot: u64) -> (u16, u16) {
        ((slot >> 16) as u16, (slot & 0xFFFF) as u16)
    }

    pub(crate) fn insert(&mut self, op: Arc<OperationRecord>, end_time_us: u64) {
        let slot = Self::slot_of(end_time_us);
        let (hi, lo) = Self::split(slot);
        self.pages.entry(hi).or_insert_with(HashMap::new).entry(lo).or_insert_with(Vec::new).push(op);
    }

    /// Removes a specific operation from its slot, used when an operation
    /// finishes via the reactor before its deadline (the common case).
    /// Returns whether it was found — a caller can use this as a
    /// generation-style race check (the same op might already have been
    /// swept and removed by a prior call).
    pub(crate) fn remove(&mut self, op: &Arc<OperationRecord>, end_time_us: u64) -> bool {
        let slot = Self::slot_of(end_time_us);
        let (hi, lo) = Self::split(slot);
        if let Some(page) = self.pages.get_mut(&hi) {
            if let Some(bucket) = page.get_mut(&lo) {
                if let Some(pos) = bucket.iter().position(|o| Arc::ptr_eq(o, op)) {
                    bucket.swap_remove(pos);
                    if bucket.is_empty() {
                        page.remove(&lo);
                    }
                    if page.is_empty() {
                        self.pages.remove(&hi);
                    }
                    return true;
                }
            }
        }
        false
    }

    /// Sweeps every slot whose deadline is `<= now_us`, returning the
    /// expired operations and advancing the checkpoint. Mirrors
    /// `processTimeoutQueue`'s sweep loop but without the ring's
    /// fixed-capacity wraparound bookkeeping.
    pub(crate) fn sweep(&mut self, now_us: u64) -> Vec<Arc<OperationRecord>> {
        let now_slot = Self::slot_of(now_us);
        let mut expired = Vec::new();

        let hi_pages: Vec<u16> = self.pages.keys().copied().collect();
        for hi in hi_pages {
            let mut remove_page = false;
            if let Some(page) = self.pages.get_mut(&hi) {
                let lo_keys: Vec<u16> = page.keys().copied().collect();
                for lo in lo_keys {
                    let slot = ((hi as u64) << 16) | lo as u64;
                    if slot <= now_slot {
                        if let Some(bucket) = page.remove(&lo) {
                            expired.extend(bucket);
                        }
                    }
                }
                remove_page = page.is_empty();
            }
            if remove_page {
                self.pages.remove(&hi);
            }
        }

        self.last_checkpoint_slot = now_slot;
        expired
    }

    pub(crate) fn last_checkpoint_us(&self) -> u64 {
        self.last_checkpoint_slot * SLOT_GRANULARITY_US
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::AsyncFlags;
    use crate::op::{OpBuffer, Opcode};

    fn dummy_op() -> Arc<OperationRecord> {
        OperationRecord::new(Opcode::Read, AsyncFlags::empty(), Box::new(|_| {}), OpBuffer::None, None, None)
    }

    #[test]
    fn insert_then_sweep_expires_it() {
        let mut grid = TimeoutGrid::new();
        let op = dummy_op();
        let deadline = 5 * SLOT_GRANULARITY_US;
        grid.insert(op.clone(), deadline);
        assert!(grid.sweep(SLOT_GRANULARITY_US).is_empty());
        let expired = grid.sweep(deadline);
        assert_eq!(expired.len(), 1);
        assert!(grid.is_empty());
    }

    #[test]
    fn remove_before_deadline_prevents_sweep() {
        let mut grid = TimeoutGrid::new();
        let op = dummy_op();
        let deadline = 5 * SLOT_GRANULARITY_US;
        grid.insert(op.clone(), deadline);
        assert!(grid.remove(&op, deadline));
        assert!(grid.sweep(10 * SLOT_GRANULARITY_US).is_empty());
    }

    #[test]
    fn page_split_survives_high_deadlines() {
        let mut grid = TimeoutGrid::new();
        // Past the 16-bit low-index boundary, exercising the hi/lo split.
        let far_us = (1u64 << 16) * SLOT_GRANULARITY_US + 500 * SLOT_GRANULARITY_US;
        let op = dummy_op();
        grid.insert(op, far_us);
        assert!(grid.sweep(far_us - SLOT_GRANULARITY_US).is_empty());
        assert_eq!(grid.sweep(far_us).len(), 1);
    }
}
