//! propagation model: path loss, RSSI, SNR, airtime and delivery delay
//!
//! Higher spreading factors are more robust, so most environmental terms
//! shrink slightly as SF grows. Three uniform draws are taken per link, in
//! a fixed order (RSSI multipath, SNR fading, delay jitter), which keeps a
//! seeded run bit-identical.

use rand::Rng;

use etherwave_proto::TxParams;

use crate::tables::{obstacle_loss_db, snr_range};
use crate::{BANDWIDTH_HZ, NOISE_FIGURE_DB};

/// Everything the broker needs to know about one sender→receiver link.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkBudget {
    pub distance_km: f64,
    pub rssi_dbm: f64,
    pub snr_db: f64,
    pub airtime_ms: f64,
    pub delay_ms: f64,
}

pub fn distance_km(a: (f64, f64), b: (f64, f64)) -> f64 {
    let dx = a.0 - b.0;
    let dy = a.1 - b.1;
    (dx * dx + dy * dy).sqrt()
}

/// ITU free-space path loss. The epsilon keeps co-located nodes finite;
/// the near-field term below handles them properly.
pub fn free_space_path_loss_db(distance_km: f64, frequency_mhz: f64) -> f64 {
    32.45 + 20.0 * distance_km.max(1e-6).log10() + 20.0 * frequency_mhz.log10()
}

/// Deterministic environmental losses: AQI haze, weather, obstacle
/// penetration, terrain roughness and near-field compression.
fn environmental_loss_db(d: f64, params: &TxParams) -> f64 {
    let sf = f64::from(params.sf);
    let mut loss = 0.0;

    if params.aqi > 50 {
        let excess = (params.aqi - 50) as f64 / 50.0;
        loss += excess.powf(1.5) * 0.5 * d * (1.0 - 0.02 * (sf - 7.0));
    }

    loss += params.weather.attenuation_db_per_km() * d;
    loss += obstacle_loss_db(&params.obstacle) * (1.0 - 0.025 * (sf - 7.0));

    if d > 1.0 {
        loss += (d + 1.0).ln() * 3.0 * (1.0 - 0.03 * (sf - 7.0));
    }

    // Inside ten meters the antennas couple; model it as added loss.
    if d < 0.01 {
        loss += 15.0 * (1.0 - d / 0.01);
    }

    loss
}

/// Semtech time-on-air for one frame, milliseconds.
pub fn airtime_ms(payload_bytes: usize, sf: u8, coding_rate: u8, preamble_symbols: u32) -> f64 {
    let t_sym = 2f64.powi(i32::from(sf)) / BANDWIDTH_HZ;
    let de = if sf >= 11 { 1.0 } else { 0.0 };
    let ih = 0.0;
    let numer = 8.0 * payload_bytes as f64 - 4.0 * f64::from(sf) + 28.0 + 16.0 - 20.0 * ih;
    let denom = 4.0 * (f64::from(sf) - 2.0 * de);
    let n_payload = 8.0 + ((numer / denom).ceil() * f64::from(coding_rate + 4)).max(0.0);
    (f64::from(preamble_symbols) + 4.25 + n_payload) * t_sym * 1000.0
}

fn snr_penalty_ms(snr: f64, sf: u8) -> f64 {
    let range = snr_range(sf);
    let mid = range.min + (range.max - range.min) / 3.0;
    30.0 / (1.0 + (1.5 * (snr - mid)).exp())
}

/// Run the full channel model for one link. Draw order is fixed: RSSI
/// multipath, SNR fading, delay jitter.
pub fn compute_link<R: Rng + ?Sized>(
    params: &TxParams,
    tx_loc: (f64, f64),
    rx_loc: (f64, f64),
    rng: &mut R,
) -> LinkBudget {
    let d = distance_km(tx_loc, rx_loc);
    let sf = f64::from(params.sf);

    let fading_bound = 2.5 - 0.2 * (sf - 7.0);
    let multipath = rng.random_range(-fading_bound..=fading_bound);

    let path_loss = free_space_path_loss_db(d, params.frequency_mhz)
        + environmental_loss_db(d, params)
        + multipath;
    let rssi = params.tx_power_dbm - path_loss;

    let noise_floor = -174.0 + 10.0 * BANDWIDTH_HZ.log10() + NOISE_FIGURE_DB;
    let urban = if d < 5.0 { 3.0 - 0.4 * d } else { 1.0 };
    let effective_noise = noise_floor + urban;

    // Only half the processing gain survives; the rest is eaten by the
    // distance decay term.
    let processing_gain = 10.0 * 2f64.powi(i32::from(params.sf)).log10();
    let decay = (0.45 - 0.025 * (sf - 7.0)) * d;
    let fading = rng.random_range(-fading_bound..=fading_bound);

    let range = snr_range(params.sf);
    let snr = (rssi - effective_noise + 0.5 * processing_gain - decay + fading).min(range.max);

    let airtime = airtime_ms(
        params.payload_bytes,
        params.sf,
        params.coding_rate,
        params.preamble_symbols,
    );

    let alpha = params.weather.attenuation_db_per_km();
    let obstacle = obstacle_loss_db(&params.obstacle);
    let env_delay = alpha * d * 5.0 + obstacle * 0.5;
    let hw_delay = (2.0 + 1.5 * (sf - 7.0)) * (1.0 + 0.05 * alpha + 0.01 * obstacle);
    let jitter = rng.random_range(0.5..=3.0) * (sf / 7.0);

    let delay = airtime + snr_penalty_ms(snr, params.sf) + env_delay + hw_delay + jitter;

    LinkBudget {
        distance_km: d,
        rssi_dbm: rssi,
        snr_db: snr,
        airtime_ms: airtime,
        delay_ms: delay,
    }
}
