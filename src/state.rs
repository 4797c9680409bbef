use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;

use crate::types::PixelPosition;

/// `last_acted` starts at the origin and is only ever replaced by
/// `MoveDispatcher::dispatch`, so the polling thread is its single writer.
#[derive(Debug)]
pub struct ActuationState {
    last_acted: Mutex<PixelPosition>,
    pub stats: DispatchStats,
}

impl ActuationState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn last_acted(&self) -> PixelPosition {
        *self.last_acted.lock()
    }

    pub(crate) fn set_last_acted(&self, position: PixelPosition) {
        *self.last_acted.lock() = position;
    }
}

impl Default for ActuationState {
    fn default() -> Self {
        ActuationState {
            last_acted: Mutex::new(PixelPosition::ORIGIN),
            stats: DispatchStats::default(),
        }
    }
}

#[derive(Debug, Default)]
pub struct DispatchStats {
    submitted: AtomicU64,
    dropped: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchCounts {
    pub submitted: u64,
    pub dropped: u64,
    pub completed: u64,
    pub failed: u64,
}

impl DispatchStats {
    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DispatchCounts {
        DispatchCounts {
            submitted: self.submitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}
