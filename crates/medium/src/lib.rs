//! channel model for the etherwave virtual RF medium
//!
//! Pure computation over an injected RNG: spreading-factor tables, the
//! propagation model (RSSI, SNR, airtime, delivery delay) and the drop
//! oracle. The broker feeds it live counters; nothing in here blocks or
//! touches a socket, and a seeded `StdRng` makes every outcome repeatable.

mod drop;
mod propagation;
mod tables;

pub use drop::{evaluate_drop, ChannelLoad, DropReason};
pub use propagation::{airtime_ms, compute_link, distance_km, free_space_path_loss_db, LinkBudget};
pub use tables::{max_range_km, obstacle_loss_db, sensitivity_dbm, snr_range, SnrRange};

pub const BANDWIDTH_HZ: f64 = 125_000.0;
pub const NOISE_FIGURE_DB: f64 = 6.0;

/// Frames in flight above this count start costing congestion probability.
pub const MAX_INFLIGHT: u64 = 10;

/// Back-to-back deliveries to one receiver inside this window collide.
pub const COLLISION_GUARD_MS: f64 = 5.0;
