//! spreading-factor characteristics and obstacle penetration losses

/// Minimum viable RSSI per spreading factor, dBm.
pub fn sensitivity_dbm(sf: u8) -> f64 {
    match sf {
        7 => -123.0,
        8 => -126.0,
        9 => -129.0,
        10 => -132.0,
        11 => -134.5,
        _ => -137.0,
    }
}

/// Demodulation SNR window per spreading factor, dB.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnrRange {
    pub min: f64,
    pub max: f64,
}

pub fn snr_range(sf: u8) -> SnrRange {
    match sf {
        7 => SnrRange { min: -7.5, max: 10.0 },
        8 => SnrRange { min: -10.0, max: 9.0 },
        9 => SnrRange { min: -12.5, max: 8.0 },
        10 => SnrRange { min: -15.0, max: 7.0 },
        11 => SnrRange { min: -17.5, max: 6.0 },
        _ => SnrRange { min: -20.0, max: 5.0 },
    }
}

/// Practical link range per spreading factor, km.
pub fn max_range_km(sf: u8) -> f64 {
    match sf {
        7 => 5.0,
        8 => 8.0,
        9 => 12.0,
        10 => 16.0,
        11 => 20.0,
        _ => 25.0,
    }
}

/// Empirical penetration loss for common building materials, dB.
/// Unknown materials contribute nothing.
pub fn obstacle_loss_db(obstacle: &str) -> f64 {
    match obstacle {
        "glass_6mm" => 0.8,
        "glass_13mm" => 2.0,
        "wood_76mm" => 2.8,
        "brick_89mm" => 3.5,
        "brick_102mm" => 5.0,
        "brick_178mm" => 7.0,
        "brick_267mm" => 12.0,
        "stone_wall_203mm" => 12.0,
        "brick_concrete_192mm" => 14.0,
        "stone_wall_406mm" => 17.0,
        "concrete_203mm" => 23.0,
        "reinforced_concrete_89mm" => 27.0,
        "stone_wall_610mm" => 28.0,
        "concrete_305mm" => 35.0,
        _ => 0.0,
    }
}
