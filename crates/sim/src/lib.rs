//! simulation tools for etherwave

pub mod scenarios;

use etherwave_proto::{TxMeta, Weather};

/// A bundle of channel conditions for a scenario run.
#[derive(Debug, Clone)]
pub struct LinkPreset {
    pub sf: u8,
    pub weather: Weather,
    pub aqi: i64,
    pub obstacle: Option<String>,
}

impl LinkPreset {
    pub fn unicast_meta(&self, destination: u64) -> TxMeta {
        TxMeta {
            destination: Some(destination),
            sf: Some(self.sf),
            weather: Some(self.weather),
            aqi: Some(self.aqi),
            obstacle: self.obstacle.clone(),
            ..TxMeta::default()
        }
    }

    pub fn broadcast_meta(&self) -> TxMeta {
        TxMeta {
            broadcast: true,
            sf: Some(self.sf),
            weather: Some(self.weather),
            aqi: Some(self.aqi),
            obstacle: self.obstacle.clone(),
            ..TxMeta::default()
        }
    }
}

pub struct SimulationPresets;

impl SimulationPresets {
    pub fn clear_day() -> LinkPreset {
        LinkPreset {
            sf: 7,
            weather: Weather::Clear,
            aqi: 50,
            obstacle: None,
        }
    }

    pub fn smoggy_city() -> LinkPreset {
        LinkPreset {
            sf: 8,
            weather: Weather::Fog,
            aqi: 160,
            obstacle: Some("brick_102mm".to_string()),
        }
    }

    pub fn monsoon() -> LinkPreset {
        LinkPreset {
            sf: 9,
            weather: Weather::HeavyRain,
            aqi: 60,
            obstacle: None,
        }
    }

    pub fn long_range() -> LinkPreset {
        LinkPreset {
            sf: 12,
            weather: Weather::Clear,
            aqi: 50,
            obstacle: None,
        }
    }
}
