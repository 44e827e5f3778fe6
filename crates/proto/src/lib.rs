//! wire protocol for the etherwave virtual RF medium
//!
//! Frames travel as newline-delimited JSON in both directions. Nodes send
//! `register` and `tx`; the broker sends `rx`. The `meta` map on a `tx` is
//! an open key set: recognized keys tune the channel model, everything else
//! is carried through untouched and echoed back to receivers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const DEFAULT_TX_POWER_DBM: f64 = 23.0;
pub const DEFAULT_SPREADING_FACTOR: u8 = 7;
pub const DEFAULT_FREQUENCY_MHZ: f64 = 915.0;
pub const DEFAULT_AQI: i64 = 50;
pub const DEFAULT_CODING_RATE: u8 = 1;
pub const DEFAULT_PREAMBLE_SYMBOLS: u32 = 8;

pub const MIN_SPREADING_FACTOR: u8 = 7;
pub const MAX_SPREADING_FACTOR: u8 = 12;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Weather condition carried in tx meta. Attenuation per the ITU-flavored
/// dB/km table used by the channel model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Weather {
    #[default]
    Clear,
    Fog,
    LightRain,
    ModerateRain,
    HeavyRain,
}

impl Weather {
    pub fn attenuation_db_per_km(self) -> f64 {
        match self {
            Weather::Clear => 0.0,
            Weather::Fog => 0.02,
            Weather::LightRain => 0.05,
            Weather::ModerateRain => 0.10,
            Weather::HeavyRain => 0.20,
        }
    }
}

/// A frame on the wire, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Register {
        node_id: u64,
        location: (f64, f64),
    },
    Tx {
        from: u64,
        data: String,
        #[serde(default)]
        meta: TxMeta,
    },
    Rx {
        data: String,
        rssi: f64,
        snr: f64,
        meta: Map<String, Value>,
    },
}

impl Frame {
    pub fn parse(line: &str) -> Result<Self, ProtoError> {
        Ok(serde_json::from_str(line)?)
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self).expect("frame serialization cannot fail")
    }

    /// Build the `rx` frame delivered to a receiver: payload plus the link
    /// telemetry, with the original tx meta merged with `from`.
    pub fn rx(data: String, rssi: f64, snr: f64, from: u64, meta: &TxMeta) -> Self {
        let mut merged = meta.to_map();
        merged.insert("from".into(), Value::from(from));
        Frame::Rx { data, rssi, snr, meta: merged }
    }
}

/// Transmit options attached to a `tx` frame. All keys optional; unknown
/// keys land in `extra` and are never interpreted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TxMeta {
    pub destination: Option<u64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub broadcast: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_power: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sf: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aqi: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather: Option<Weather>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub obstacle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coding_rate: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preamble: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_bytes: Option<usize>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// How a tx frame is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Unicast(u64),
    Broadcast,
}

impl TxMeta {
    /// Absent destination or an explicit broadcast flag fans out to every
    /// other registered node.
    pub fn route(&self) -> Route {
        if self.broadcast {
            return Route::Broadcast;
        }
        match self.destination {
            Some(id) => Route::Unicast(id),
            None => Route::Broadcast,
        }
    }

    /// Fill in defaults and clamp out-of-range knobs. `payload_len` is the
    /// UTF-8 length of the data field, used when `payload_bytes` is absent.
    pub fn resolve(&self, payload_len: usize) -> TxParams {
        let sf = self
            .sf
            .unwrap_or(DEFAULT_SPREADING_FACTOR)
            .clamp(MIN_SPREADING_FACTOR, MAX_SPREADING_FACTOR);
        let coding_rate = self.coding_rate.unwrap_or(DEFAULT_CODING_RATE).clamp(1, 4);
        TxParams {
            tx_power_dbm: self.tx_power.unwrap_or(DEFAULT_TX_POWER_DBM),
            sf,
            frequency_mhz: self.frequency.unwrap_or(DEFAULT_FREQUENCY_MHZ),
            aqi: self.aqi.unwrap_or(DEFAULT_AQI),
            weather: self.weather.unwrap_or_default(),
            obstacle: self.obstacle.clone().unwrap_or_else(|| "open".to_string()),
            coding_rate,
            // A zero preamble or payload would skew the airtime formula;
            // fall back to the defaults instead.
            preamble_symbols: self
                .preamble
                .filter(|p| *p > 0)
                .unwrap_or(DEFAULT_PREAMBLE_SYMBOLS),
            payload_bytes: self.payload_bytes.filter(|p| *p > 0).unwrap_or(payload_len),
        }
    }

    fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// Transmit parameters after defaulting and clamping.
#[derive(Debug, Clone, PartialEq)]
pub struct TxParams {
    pub tx_power_dbm: f64,
    pub sf: u8,
    pub frequency_mhz: f64,
    pub aqi: i64,
    pub weather: Weather,
    pub obstacle: String,
    pub coding_rate: u8,
    pub preamble_symbols: u32,
    pub payload_bytes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_roundtrip() {
        let line = r#"{"type":"register","node_id":3,"location":[1.5,-2.0]}"#;
        match Frame::parse(line).unwrap() {
            Frame::Register { node_id, location } => {
                assert_eq!(node_id, 3);
                assert_eq!(location, (1.5, -2.0));
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn tx_defaults_resolve() {
        let line = r#"{"type":"tx","from":1,"data":"Hello","meta":{}}"#;
        let frame = Frame::parse(line).unwrap();
        let Frame::Tx { data, meta, .. } = frame else {
            panic!("expected tx");
        };
        let params = meta.resolve(data.len());
        assert_eq!(params.sf, 7);
        assert_eq!(params.tx_power_dbm, 23.0);
        assert_eq!(params.frequency_mhz, 915.0);
        assert_eq!(params.weather, Weather::Clear);
        assert_eq!(params.payload_bytes, 5);
        assert_eq!(meta.route(), Route::Broadcast);
    }

    #[test]
    fn tx_meta_missing_entirely() {
        let line = r#"{"type":"tx","from":1,"data":"x"}"#;
        assert!(Frame::parse(line).is_ok());
    }

    #[test]
    fn out_of_range_knobs_clamp() {
        let meta = TxMeta {
            sf: Some(99),
            coding_rate: Some(9),
            ..TxMeta::default()
        };
        let params = meta.resolve(0);
        assert_eq!(params.sf, 12);
        assert_eq!(params.coding_rate, 4);
    }

    #[test]
    fn zero_airtime_knobs_fall_back_to_defaults() {
        let meta = TxMeta {
            preamble: Some(0),
            payload_bytes: Some(0),
            ..TxMeta::default()
        };
        let params = meta.resolve(11);
        assert_eq!(params.preamble_symbols, DEFAULT_PREAMBLE_SYMBOLS);
        assert_eq!(params.payload_bytes, 11);

        let meta = TxMeta {
            preamble: Some(12),
            payload_bytes: Some(64),
            ..TxMeta::default()
        };
        let params = meta.resolve(11);
        assert_eq!(params.preamble_symbols, 12);
        assert_eq!(params.payload_bytes, 64);
    }

    #[test]
    fn unknown_meta_keys_survive_to_rx() {
        let line = r#"{"type":"tx","from":4,"data":"hi","meta":{"destination":2,"flags":128,"identifier":7}}"#;
        let Frame::Tx { from, data, meta } = Frame::parse(line).unwrap() else {
            panic!("expected tx");
        };
        assert_eq!(meta.route(), Route::Unicast(2));
        let rx = Frame::rx(data, -40.0, 5.0, from, &meta);
        let Frame::Rx { meta: merged, .. } = rx else {
            panic!("expected rx");
        };
        assert_eq!(merged.get("from"), Some(&Value::from(4)));
        assert_eq!(merged.get("flags"), Some(&Value::from(128)));
        assert_eq!(merged.get("identifier"), Some(&Value::from(7)));
        assert_eq!(merged.get("destination"), Some(&Value::from(2)));
    }

    #[test]
    fn weather_wire_names() {
        let w: Weather = serde_json::from_str("\"heavy-rain\"").unwrap();
        assert_eq!(w, Weather::HeavyRain);
        assert_eq!(w.attenuation_db_per_km(), 0.20);
    }

    #[test]
    fn broadcast_flag_wins_over_destination() {
        let meta = TxMeta {
            destination: Some(9),
            broadcast: true,
            ..TxMeta::default()
        };
        assert_eq!(meta.route(), Route::Broadcast);
    }
}
