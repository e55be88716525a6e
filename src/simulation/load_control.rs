//! Random access load control.
//!
//! Each random access frame produces a normalized offered load sample for
//! the allocation channel it belongs to. The controller averages the last
//! samples of every channel and switches between two backoff
//! parameterizations:
//!
//! - `LowLoad` → `HighLoad` when the average reaches the channel threshold
//! - `HighLoad` → `LowLoad` when the average drops below the same threshold
//!
//! Every switch emits a [`BackoffUpdate`] for the signalling side.

use anyhow::{Result, bail};
use log::{debug, info};
use serde::Deserialize;
use std::collections::{BTreeMap, VecDeque};

/// Backoff parameters sent to the terminals of an allocation channel.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffParameters {
    /// Backoff probability, scaled to 0-65535.
    pub probability: u16,
    /// Backoff time in frames.
    pub time: u16,
}

/// Load control configuration of one allocation channel.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ChannelLoadConf {
    pub allocation_channel: u8,
    /// Average normalized offered load separating the two states.
    pub threshold: f64,
    pub low_load: BackoffParameters,
    pub high_load: BackoffParameters,
}

fn default_window_size() -> usize {
    10
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct LoadControlConfig {
    /// Number of samples averaged per channel.
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default)]
    pub channels: Vec<ChannelLoadConf>,
}

impl Default for LoadControlConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            channels: Vec::new(),
        }
    }
}

impl LoadControlConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            bail!("Load control window_size must be at least 1");
        }
        for (i, channel) in self.channels.iter().enumerate() {
            if !channel.threshold.is_finite() || channel.threshold < 0.0 {
                bail!("Invalid threshold {} for allocation channel {}", channel.threshold, channel.allocation_channel);
            }
            if self.channels[..i].iter().any(|c| c.allocation_channel == channel.allocation_channel) {
                bail!("Allocation channel {} configured twice", channel.allocation_channel);
            }
        }
        Ok(())
    }

    pub fn channel(&self, allocation_channel: u8) -> Option<&ChannelLoadConf> {
        self.channels.iter().find(|c| c.allocation_channel == allocation_channel)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    LowLoad,
    HighLoad,
}

/// Normalized offered load measured over one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadSample {
    pub carrier_id: u32,
    pub allocation_channel: u8,
    pub normalized_load: f64,
}

/// Emitted on every state switch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffUpdate {
    pub allocation_channel: u8,
    pub state: LoadState,
    pub parameters: BackoffParameters,
    /// Average load that triggered the switch.
    pub average_load: f64,
}

#[derive(Debug, Default)]
struct ChannelState {
    samples: VecDeque<f64>,
    state: LoadState,
}

/// Per allocation channel load state. Averages the last `window` load samples
/// and switches between the low and high load backoff parameters.
#[derive(Debug)]
pub struct LoadController {
    config: LoadControlConfig,
    channels: BTreeMap<u8, ChannelState>,
}

impl LoadController {
    pub fn new(config: LoadControlConfig) -> Self {
        Self {
            config,
            channels: BTreeMap::new(),
        }
    }

    /// Add a sample and run the state machine of its channel.
    ///
    /// # Panics
    ///
    /// If the sample's allocation channel has no load control configuration.
    pub fn record_sample(&mut self, sample: LoadSample) -> Option<BackoffUpdate> {
        let Some(conf) = self.config.channel(sample.allocation_channel).copied() else {
            panic!(
                "No load control configured for allocation channel {} (carrier {})",
                sample.allocation_channel, sample.carrier_id
            );
        };

        let window_size = self.config.window_size;
        let channel = self.channels.entry(sample.allocation_channel).or_default();
        channel.samples.push_back(sample.normalized_load);
        while channel.samples.len() > window_size {
            channel.samples.pop_front();
        }

        let average = window_average(&channel.samples);
        debug!(
            "Carrier {}, AC {}: load sample {:.3}, average {:.3}, state {:?}",
            sample.carrier_id, sample.allocation_channel, sample.normalized_load, average, channel.state
        );

        let (next_state, parameters) = match channel.state {
            LoadState::LowLoad if average >= conf.threshold => (LoadState::HighLoad, conf.high_load),
            LoadState::HighLoad if average < conf.threshold => (LoadState::LowLoad, conf.low_load),
            _ => return None,
        };
        channel.state = next_state;

        info!(
            "AC {}: switching to {:?} backoff parameterization (average load {:.3}, threshold {:.3})",
            sample.allocation_channel, next_state, average, conf.threshold
        );
        Some(BackoffUpdate {
            allocation_channel: sample.allocation_channel,
            state: next_state,
            parameters,
            average_load: average,
        })
    }

    /// Running average of a channel's window; 0 without samples.
    pub fn average(&self, allocation_channel: u8) -> f64 {
        self.channels
            .get(&allocation_channel)
            .map(|c| window_average(&c.samples))
            .unwrap_or(0.0)
    }

    pub fn state(&self, allocation_channel: u8) -> LoadState {
        self.channels.get(&allocation_channel).map(|c| c.state).unwrap_or_default()
    }

    pub fn reset(&mut self) {
        self.channels.clear();
    }
}

fn window_average(samples: &VecDeque<f64>) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(window_size: usize) -> LoadController {
        LoadController::new(LoadControlConfig {
            window_size,
            channels: vec![ChannelLoadConf {
                allocation_channel: 0,
                threshold: 0.5,
                low_load: BackoffParameters { probability: 1000, time: 1 },
                high_load: BackoffParameters { probability: 50000, time: 8 },
            }],
        })
    }

    fn sample(normalized_load: f64) -> LoadSample {
        LoadSample {
            carrier_id: 0,
            allocation_channel: 0,
            normalized_load,
        }
    }

    #[test]
    fn hysteresis_switches_once_each_way() {
        let mut controller = controller(1);
        let updates: Vec<BackoffUpdate> = [0.2, 0.6, 0.7, 0.55, 0.3, 0.1]
            .into_iter()
            .filter_map(|load| controller.record_sample(sample(load)))
            .collect();

        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].state, LoadState::HighLoad);
        assert_eq!(updates[0].parameters, BackoffParameters { probability: 50000, time: 8 });
        assert_eq!(updates[1].state, LoadState::LowLoad);
        assert_eq!(updates[1].parameters, BackoffParameters { probability: 1000, time: 1 });
        assert_eq!(controller.state(0), LoadState::LowLoad);
    }

    #[test]
    fn threshold_is_inclusive_upwards() {
        let mut controller = controller(1);
        let update = controller.record_sample(sample(0.5));
        assert_eq!(update.map(|u| u.state), Some(LoadState::HighLoad));
        assert_eq!(controller.record_sample(sample(0.5)), None);
    }

    #[test]
    fn window_keeps_only_recent_samples() {
        let mut controller = controller(3);
        assert_eq!(controller.average(0), 0.0);
        for load in [0.9, 0.0, 0.3, 0.6] {
            controller.record_sample(sample(load));
        }
        assert!((controller.average(0) - 0.3).abs() < 1e-12);
        controller.reset();
        assert_eq!(controller.state(0), LoadState::LowLoad);
    }

    #[test]
    #[should_panic(expected = "No load control configured for allocation channel 4")]
    fn unconfigured_channel_is_fatal() {
        let mut controller = controller(3);
        controller.record_sample(LoadSample {
            carrier_id: 0,
            allocation_channel: 4,
            normalized_load: 0.1,
        });
    }

    #[test]
    fn validation_catches_duplicates_and_empty_window() {
        let mut config = controller(0).config;
        assert!(config.validate().is_err());
        config.window_size = 5;
        assert!(config.validate().is_ok());
        config.channels.push(config.channels[0]);
        assert!(config.validate().is_err());
    }
}
