//! drop oracle: decides whether a frame survives the medium and why not
//!
//! Hard conditions (below sensitivity, below the SNR window, past the SF
//! range, inside the collision guard) drop unconditionally. Everything else
//! is probabilistic: congestion, per-pair loss streaks, SNR/RSSI margin and
//! same-SF interference stack up into a single drop probability.

use std::fmt;

use rand::Rng;

use crate::propagation::LinkBudget;
use crate::tables::{max_range_km, sensitivity_dbm, snr_range};
use crate::COLLISION_GUARD_MS;

/// Why a frame never reached its receiver. The first four only come from
/// hard conditions; `PeerGone`, `NoRoute` and `Unregistered` are produced
/// by the broker rather than the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    LowRssi,
    LowSnr,
    OutOfRange,
    Collision,
    Congestion,
    Streak,
    SnrMargin,
    RssiMargin,
    Interference,
    PeerGone,
    NoRoute,
    Unregistered,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DropReason::LowRssi => "LOW_RSSI",
            DropReason::LowSnr => "LOW_SNR",
            DropReason::OutOfRange => "OUT_OF_RANGE",
            DropReason::Collision => "COLLISION",
            DropReason::Congestion => "CONGESTION",
            DropReason::Streak => "STREAK",
            DropReason::SnrMargin => "SNR_MARGIN",
            DropReason::RssiMargin => "RSSI_MARGIN",
            DropReason::Interference => "INTERFERENCE",
            DropReason::PeerGone => "PEER_GONE",
            DropReason::NoRoute => "NO_ROUTE",
            DropReason::Unregistered => "UNREGISTERED",
        };
        f.write_str(name)
    }
}

/// Snapshot of broker state the oracle reads. `active` and
/// `concurrent_same_sf` both count the frame currently being judged.
#[derive(Debug, Clone, Copy)]
pub struct ChannelLoad {
    pub active: u64,
    pub max_inflight: u64,
    pub loss_streak: u32,
    pub concurrent_same_sf: u64,
    pub millis_since_last_delivery: Option<f64>,
}

/// Decide the fate of one frame on one link. Consumes exactly one uniform
/// draw. When the probabilistic draw kills the frame, the reported reason
/// is the largest contributor; ties go to the earlier component.
pub fn evaluate_drop<R: Rng + ?Sized>(
    link: &LinkBudget,
    sf: u8,
    load: &ChannelLoad,
    rng: &mut R,
) -> Option<DropReason> {
    let range = snr_range(sf);
    let sensitivity = sensitivity_dbm(sf);

    if link.rssi_dbm < sensitivity {
        return Some(DropReason::LowRssi);
    }
    if link.snr_db < range.min {
        return Some(DropReason::LowSnr);
    }
    if link.distance_km > max_range_km(sf) {
        return Some(DropReason::OutOfRange);
    }
    if let Some(ms) = load.millis_since_last_delivery {
        if ms < COLLISION_GUARD_MS {
            return Some(DropReason::Collision);
        }
    }

    let p_congestion = if load.active > load.max_inflight {
        let excess = (load.active - load.max_inflight) as f64 / load.max_inflight as f64;
        excess * excess
    } else {
        0.0
    };
    let p_streak = (0.05 * f64::from(load.loss_streak)).min(0.5);
    let sf_factor = f64::from(sf) - 5.0;
    let p_snr = (-(link.snr_db - range.min) / sf_factor).exp().clamp(0.0, 0.8);
    let p_rssi = ((sensitivity + 3.0 - link.rssi_dbm) / 6.0).clamp(0.0, 0.6);
    let p_interference = (0.1 * load.concurrent_same_sf.saturating_sub(1) as f64).min(0.7);

    let components = [
        (p_congestion, DropReason::Congestion),
        (p_streak, DropReason::Streak),
        (p_snr, DropReason::SnrMargin),
        (p_rssi, DropReason::RssiMargin),
        (p_interference, DropReason::Interference),
    ];

    let p_drop = components.iter().map(|(p, _)| p).sum::<f64>().min(0.98);
    if rng.random::<f64>() >= p_drop {
        return None;
    }

    let mut dominant = components[0];
    for candidate in &components[1..] {
        if candidate.0 > dominant.0 {
            dominant = *candidate;
        }
    }
    Some(dominant.1)
}
