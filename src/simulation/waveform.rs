//! Waveform configurations and link-level decode thresholds.
//!
//! A waveform (modulation and coding of one return-link burst) determines
//! the burst length in symbols, the payload carried and the composite SINR
//! the receiver needs to decode it. The decode threshold is looked up through
//! the [`LinkResults`] trait so that other link-level models can be plugged in.

use serde::Deserialize;
use std::collections::BTreeMap;

use super::types::BITS_PER_BYTE;

/// Link-level lookup of the SINR needed to decode a waveform.
pub trait LinkResults {
    /// Minimum composite SINR in dB for a successful decode, or `None` when
    /// the waveform is unknown.
    fn decode_threshold_db(&self, waveform_id: u32) -> Option<f64>;

    /// Decode threshold that must exist.
    ///
    /// # Panics
    ///
    /// If no threshold is configured for `waveform_id`; decoding without one
    /// would produce meaningless results.
    fn required_threshold_db(&self, waveform_id: u32) -> f64 {
        match self.decode_threshold_db(waveform_id) {
            Some(threshold) => threshold,
            None => panic!("No decode threshold configured for waveform {}", waveform_id),
        }
    }
}

/// One return-link waveform.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct WaveformConf {
    pub waveform_id: u32,
    /// Burst length in symbols, used by the residual interference model.
    pub burst_length_symbols: u32,
    /// Payload carried by one burst in bytes.
    pub payload_bytes: u32,
    /// Composite SINR in dB needed to decode the burst.
    pub decode_threshold_db: f64,
}

impl WaveformConf {
    pub fn payload_bits(&self) -> u64 {
        self.payload_bytes as u64 * BITS_PER_BYTE
    }
}

/// Waveforms known by a receiver, indexed by id.
#[derive(Debug, Clone, Default)]
pub struct WaveformTable {
    waveforms: BTreeMap<u32, WaveformConf>,
}

impl WaveformTable {
    pub fn new(waveforms: impl IntoIterator<Item = WaveformConf>) -> Self {
        Self {
            waveforms: waveforms.into_iter().map(|w| (w.waveform_id, w)).collect(),
        }
    }

    /// Waveform that must exist.
    ///
    /// # Panics
    ///
    /// If `waveform_id` is not configured.
    pub fn required(&self, waveform_id: u32) -> &WaveformConf {
        match self.waveforms.get(&waveform_id) {
            Some(conf) => conf,
            None => panic!("Waveform {} is not configured", waveform_id),
        }
    }

    pub fn contains(&self, waveform_id: u32) -> bool {
        self.waveforms.contains_key(&waveform_id)
    }
}

impl LinkResults for WaveformTable {
    fn decode_threshold_db(&self, waveform_id: u32) -> Option<f64> {
        self.waveforms.get(&waveform_id).map(|w| w.decode_threshold_db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> WaveformTable {
        WaveformTable::new([
            WaveformConf {
                waveform_id: 3,
                burst_length_symbols: 536,
                payload_bytes: 38,
                decode_threshold_db: 1.5,
            },
            WaveformConf {
                waveform_id: 4,
                burst_length_symbols: 536,
                payload_bytes: 38,
                decode_threshold_db: 3.0,
            },
        ])
    }

    #[test]
    fn threshold_lookup_by_waveform() {
        let table = table();
        assert_eq!(table.decode_threshold_db(3), Some(1.5));
        assert_eq!(table.required_threshold_db(4), 3.0);
        assert_eq!(table.decode_threshold_db(99), None);
        assert_eq!(table.required(3).payload_bits(), 304);
        assert!(table.contains(4) && !table.contains(99));
    }

    #[test]
    #[should_panic(expected = "No decode threshold configured for waveform 7")]
    fn missing_threshold_is_fatal() {
        table().required_threshold_db(7);
    }
}
