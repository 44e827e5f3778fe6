//! in-flight frame accounting
//!
//! A frame is in flight from the moment it is accepted for a recipient
//! until its delivery task finishes (written, dropped, or peer gone).
//! Every `acquire` must be paired with exactly one `release` on every
//! path through the pipeline and scheduler.

use std::sync::atomic::{AtomicU64, Ordering};

use etherwave_proto::{MAX_SPREADING_FACTOR, MIN_SPREADING_FACTOR};

const SF_SLOTS: usize = (MAX_SPREADING_FACTOR - MIN_SPREADING_FACTOR + 1) as usize;

#[derive(Default)]
pub struct InFlight {
    active: AtomicU64,
    by_sf: [AtomicU64; SF_SLOTS],
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(sf: u8) -> usize {
        usize::from(sf.clamp(MIN_SPREADING_FACTOR, MAX_SPREADING_FACTOR) - MIN_SPREADING_FACTOR)
    }

    pub fn acquire(&self, sf: u8) {
        self.active.fetch_add(1, Ordering::Relaxed);
        self.by_sf[Self::slot(sf)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn release(&self, sf: u8) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.by_sf[Self::slot(sf)].fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }

    /// Frames currently in flight at the given spreading factor.
    pub fn concurrent(&self, sf: u8) -> u64 {
        self.by_sf[Self::slot(sf)].load(Ordering::Relaxed)
    }
}
