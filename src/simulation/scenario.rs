//! Scenario loading and validation.
//!
//! A scenario is a JSON file listing explicit burst arrivals and/or random
//! traffic descriptions, e.g.:
//!
//! ```json
//! {
//!   "bursts": [
//!     { "time_us": 0, "carrier_id": 0, "duration_us": 1000, "rx_power_w": 1e-13,
//!       "sender_id": 1, "access": "dedicated", "waveform_id": 1 }
//!   ],
//!   "traffic": [
//!     { "carrier_id": 0, "access": "crdsa", "senders": 20, "frames": 50,
//!       "transmit_probability": 0.3, "waveform_id": 1, "mean_rx_power_dbw": -130.0 }
//!   ]
//! }
//! ```

use anyhow::Context;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Deserialize;
use std::fs;

use super::config::{CarrierConf, ReceiverConfig};
use super::signal_calculations::RegenerationMode;
use super::traffic::{self, TrafficConf};
use super::types::{AccessMode, BurstArrival};

/// Error type for scenario loading failures.
#[derive(Debug)]
pub enum ScenarioLoadError {
    FileReadError(String),
    ParseError(String),
    ValidationError(String),
}

impl std::fmt::Display for ScenarioLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScenarioLoadError::FileReadError(msg) => write!(f, "Failed to read file: {}", msg),
            ScenarioLoadError::ParseError(msg) => write!(f, "Failed to parse JSON: {}", msg),
            ScenarioLoadError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ScenarioLoadError {}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Scenario {
    #[serde(default)]
    pub bursts: Vec<BurstArrival>,
    #[serde(default)]
    pub traffic: Vec<TrafficConf>,
}

impl Scenario {
    /// Explicit bursts merged with generated traffic, ordered by time.
    ///
    /// Traffic is drawn from a generator seeded with `config.seed`. Replica
    /// tags are unique over the whole scenario.
    pub fn arrivals(&self, config: &ReceiverConfig) -> anyhow::Result<Vec<BurstArrival>> {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut arrivals = self.bursts.clone();
        // generated payloads get tags no explicit burst uses
        let mut next_tag = self.bursts.iter().filter_map(|b| b.replica_tag).max().map_or(0, |tag| tag + 1);
        for (index, conf) in self.traffic.iter().enumerate() {
            let carrier = config
                .carrier(conf.carrier_id)
                .with_context(|| format!("Traffic {} references unknown carrier {}", index, conf.carrier_id))?;
            let generated =
                traffic::generate(conf, carrier, &mut next_tag, &mut rng).with_context(|| format!("Traffic {}", index))?;
            arrivals.extend(generated);
        }
        arrivals.sort_by_key(|a| a.time_us);
        Ok(arrivals)
    }
}

/// Load a scenario from a JSON file and validate it against `config`.
///
/// # Parameters
///
/// * `path` - Path to the scenario JSON file
/// * `config` - Receiver configuration the scenario must fit
///
/// # Returns
///
/// Parsed and validated Scenario or an error.
pub fn load_scenario(path: &str, config: &ReceiverConfig) -> Result<Scenario, ScenarioLoadError> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path))
        .map_err(|e| ScenarioLoadError::FileReadError(e.to_string()))?;

    let scenario: Scenario = serde_json::from_str(&data)
        .context("Invalid JSON format")
        .map_err(|e| ScenarioLoadError::ParseError(format!("{:#}", e)))?;

    validate_scenario(&scenario, config).map_err(ScenarioLoadError::ValidationError)?;

    Ok(scenario)
}

/// Validate a scenario against the receiver configuration.
///
/// # Returns
///
/// `Ok(())` if validation passes, `Err(String)` with error description otherwise.
pub fn validate_scenario(scenario: &Scenario, config: &ReceiverConfig) -> Result<(), String> {
    if scenario.bursts.is_empty() && scenario.traffic.is_empty() {
        return Err("Scenario must contain bursts or traffic".to_string());
    }

    let waveforms = config.waveform_table();

    for (index, burst) in scenario.bursts.iter().enumerate() {
        let Some(carrier) = config.carrier(burst.carrier_id) else {
            return Err(format!("Burst {} references unknown carrier {}", index, burst.carrier_id));
        };
        if burst.duration_us == 0 {
            return Err(format!("Burst {} must have a positive duration", index));
        }
        if !(burst.rx_power_w > 0.0 && burst.rx_power_w.is_finite()) {
            return Err(format!("Burst {} has invalid rx_power_w {}", index, burst.rx_power_w));
        }
        if let Some(power) = burst.rx_power_in_satellite_w {
            if !(power > 0.0 && power.is_finite()) {
                return Err(format!("Burst {} has invalid rx_power_in_satellite_w {}", index, power));
            }
        }
        if burst.interference_only {
            continue;
        }
        if !waveforms.contains(burst.waveform_id) {
            return Err(format!("Burst {} references unknown waveform {}", index, burst.waveform_id));
        }
        if burst.packets == 0 {
            return Err(format!("Burst {} must carry at least one packet", index));
        }
        if burst.access == AccessMode::Crdsa {
            validate_crdsa_slot(burst, carrier).map_err(|e| format!("Burst {}: {}", index, e))?;
        }
        if carrier.regeneration == RegenerationMode::Transparent
            && carrier.satellite_noise_power_w.is_none()
            && burst.upstream_sinr.is_none()
        {
            return Err(format!(
                "Burst {} on transparent carrier {} needs upstream_sinr (no satellite_noise_power_w configured)",
                index, carrier.carrier_id
            ));
        }
        if let Some(sinr) = burst.upstream_sinr {
            if !(sinr > 0.0) {
                return Err(format!("Burst {} has invalid upstream_sinr {}", index, sinr));
            }
        }
    }

    for (index, conf) in scenario.traffic.iter().enumerate() {
        let Some(carrier) = config.carrier(conf.carrier_id) else {
            return Err(format!("Traffic {} references unknown carrier {}", index, conf.carrier_id));
        };
        if !waveforms.contains(conf.waveform_id) {
            return Err(format!("Traffic {} references unknown waveform {}", index, conf.waveform_id));
        }
        if carrier.regeneration == RegenerationMode::Transparent && carrier.satellite_noise_power_w.is_none() {
            return Err(format!(
                "Traffic {} on transparent carrier {} needs satellite_noise_power_w",
                index, carrier.carrier_id
            ));
        }
        conf.validate(carrier).map_err(|e| format!("Traffic {}: {}", index, e))?;
    }

    Ok(())
}

/// A CRDSA burst must fill exactly the slot it claims, and its siblings must
/// be other slots of the same frame.
fn validate_crdsa_slot(burst: &BurstArrival, carrier: &CarrierConf) -> Result<(), String> {
    let slot_duration_us = carrier.slot_duration_us();
    if burst.slot_id >= carrier.slots_per_frame {
        return Err(format!(
            "slot {} outside the {} slots of carrier {}",
            burst.slot_id, carrier.slots_per_frame, carrier.carrier_id
        ));
    }
    let offset_us = burst.time_us % carrier.frame_duration_us;
    if offset_us != burst.slot_id as u64 * slot_duration_us {
        return Err(format!(
            "starts {} us into its frame, slot {} starts at {} us",
            offset_us,
            burst.slot_id,
            burst.slot_id as u64 * slot_duration_us
        ));
    }
    if burst.duration_us > slot_duration_us {
        return Err(format!(
            "lasts {} us, longer than the {} us slot",
            burst.duration_us, slot_duration_us
        ));
    }
    if let Some(&sibling) = burst
        .replica_slot_ids
        .iter()
        .find(|&&s| s == burst.slot_id || s >= carrier.slots_per_frame)
    {
        return Err(format!("invalid replica slot {}", sibling));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const CONFIG: &str = r#"
[[carriers]]
carrier_id = 0
bandwidth_hz = 1.0e6
rx_temperature_dbk = 24.6
frame_duration_us = 10000
slots_per_frame = 10
frame_capacity_bits = 3040

[[waveforms]]
waveform_id = 1
burst_length_symbols = 536
payload_bytes = 38
decode_threshold_db = 3.0
"#;

    fn config() -> ReceiverConfig {
        ReceiverConfig::parse(CONFIG).unwrap()
    }

    fn scenario(json: &str) -> Scenario {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn explicit_and_generated_arrivals_are_merged_in_time_order() {
        let scenario = scenario(
            r#"{
                "bursts": [{"time_us": 5500, "carrier_id": 0, "duration_us": 1000, "rx_power_w": 1e-13,
                            "sender_id": 1, "access": "dedicated", "waveform_id": 1}],
                "traffic": [{"carrier_id": 0, "access": "crdsa", "senders": 3, "frames": 2,
                             "transmit_probability": 1.0, "waveform_id": 1, "mean_rx_power_dbw": -130.0}]
            }"#,
        );
        let config = config();
        assert_eq!(validate_scenario(&scenario, &config), Ok(()));
        let arrivals = scenario.arrivals(&config).unwrap();
        assert_eq!(arrivals.len(), 1 + 3 * 2 * 2);
        assert!(arrivals.windows(2).all(|w| w[0].time_us <= w[1].time_us));
    }

    #[test]
    fn unknown_references_are_rejected() {
        let config = config();
        let bad_carrier = scenario(
            r#"{"bursts": [{"time_us": 0, "carrier_id": 5, "duration_us": 1000, "rx_power_w": 1e-13,
                            "sender_id": 1, "access": "dedicated", "waveform_id": 1}]}"#,
        );
        assert!(validate_scenario(&bad_carrier, &config).unwrap_err().contains("unknown carrier 5"));

        let bad_waveform = scenario(
            r#"{"bursts": [{"time_us": 0, "carrier_id": 0, "duration_us": 1000, "rx_power_w": 1e-13,
                            "sender_id": 1, "access": "slotted_aloha", "waveform_id": 8}]}"#,
        );
        assert!(validate_scenario(&bad_waveform, &config).unwrap_err().contains("unknown waveform 8"));

        assert!(validate_scenario(&Scenario::default(), &config).is_err());
    }

    #[test]
    fn non_positive_values_are_rejected() {
        let config = config();
        let zero_duration = scenario(
            r#"{"bursts": [{"time_us": 0, "carrier_id": 0, "duration_us": 0, "rx_power_w": 1e-13,
                            "sender_id": 1, "access": "dedicated", "waveform_id": 1}]}"#,
        );
        assert!(validate_scenario(&zero_duration, &config).is_err());

        let negative_power = scenario(
            r#"{"bursts": [{"time_us": 0, "carrier_id": 0, "duration_us": 10, "rx_power_w": -1.0,
                            "sender_id": 1, "access": "dedicated", "waveform_id": 1}]}"#,
        );
        assert!(validate_scenario(&negative_power, &config).is_err());
    }

    fn crdsa_burst(time_us: u64, duration_us: u64, slot_id: u16) -> Scenario {
        scenario(&format!(
            r#"{{"bursts": [{{"time_us": {}, "carrier_id": 0, "duration_us": {}, "rx_power_w": 1e-13,
                             "sender_id": 1, "access": "crdsa", "slot_id": {}, "replica_slot_ids": [5],
                             "replica_tag": 0, "waveform_id": 1}}]}}"#,
            time_us, duration_us, slot_id
        ))
    }

    #[test]
    fn crdsa_bursts_must_fill_their_slot() {
        let config = config();
        assert_eq!(validate_scenario(&crdsa_burst(12_000, 1000, 2), &config), Ok(()));
        assert_eq!(validate_scenario(&crdsa_burst(0, 800, 0), &config), Ok(()));

        let misaligned = validate_scenario(&crdsa_burst(500, 1000, 0), &config).unwrap_err();
        assert!(misaligned.contains("starts 500 us into its frame"));
        let too_long = validate_scenario(&crdsa_burst(0, 1500, 0), &config).unwrap_err();
        assert!(too_long.contains("longer than the 1000 us slot"));
        assert!(validate_scenario(&crdsa_burst(3000, 1000, 2), &config).is_err());
        assert!(validate_scenario(&crdsa_burst(0, 1000, 10), &config).is_err());
        assert!(validate_scenario(&crdsa_burst(5000, 1000, 5), &config).unwrap_err().contains("invalid replica slot 5"));
    }

    #[test]
    fn traffic_entries_get_distinct_tags() {
        let scenario = scenario(
            r#"{
                "bursts": [{"time_us": 0, "carrier_id": 0, "duration_us": 1000, "rx_power_w": 1e-13,
                            "sender_id": 1, "access": "crdsa", "slot_id": 0, "replica_slot_ids": [5],
                            "replica_tag": 6, "waveform_id": 1}],
                "traffic": [
                    {"carrier_id": 0, "access": "crdsa", "senders": 1, "first_sender_id": 1, "frames": 1,
                     "transmit_probability": 1.0, "waveform_id": 1, "mean_rx_power_dbw": -130.0},
                    {"carrier_id": 0, "access": "crdsa", "senders": 1, "first_sender_id": 50, "frames": 1,
                     "transmit_probability": 1.0, "waveform_id": 1, "mean_rx_power_dbw": -130.0}
                ]
            }"#,
        );
        let arrivals = scenario.arrivals(&config()).unwrap();
        let generated: HashSet<u64> = arrivals
            .iter()
            .filter_map(|a| a.replica_tag)
            .filter(|&tag| tag != 6)
            .collect();
        assert_eq!(generated, HashSet::from([7, 8]));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = load_scenario("/nonexistent/scenario.json", &config()).unwrap_err();
        assert!(matches!(err, ScenarioLoadError::FileReadError(_)));
    }
}
