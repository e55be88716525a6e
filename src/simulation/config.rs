//! Receiver configuration loading and validation.
//!
//! The configuration is a TOML file describing the receiving carriers, the
//! waveforms they can decode and the random access load control. By default
//! it is looked up as `config.toml` next to the scenario file.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::collision::CollisionPolicy;
use super::elimination::EliminationStrategy;
use super::interference::InterferenceMode;
use super::load_control::LoadControlConfig;
use super::signal_calculations::{LinkBudget, NoiseBudget, RadioParameters, RegenerationMode};
use super::waveform::{WaveformConf, WaveformTable};

fn default_seed() -> u64 {
    1
}

/// Configuration of one receiving carrier.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct CarrierConf {
    pub carrier_id: u32,
    /// Allocation channel the carrier's random access belongs to.
    #[serde(default)]
    pub allocation_channel: u8,
    #[serde(flatten)]
    pub radio: RadioParameters,
    #[serde(default)]
    pub interference_mode: InterferenceMode,
    #[serde(default)]
    pub regeneration: RegenerationMode,
    /// Noise power at the satellite for transparent links, in W.
    #[serde(default)]
    pub satellite_noise_power_w: Option<f64>,
    #[serde(default)]
    pub collision: CollisionPolicy,
    #[serde(default)]
    pub elimination: EliminationStrategy,
    /// Random access frame duration in microseconds.
    pub frame_duration_us: u64,
    /// Number of slots in a random access frame.
    pub slots_per_frame: u16,
    /// Bits the frame could carry, the denominator of the normalized offered load.
    pub frame_capacity_bits: u64,
    /// Report frame load samples to the load controller.
    #[serde(default)]
    pub dynamic_load_control: bool,
}

impl CarrierConf {
    pub fn frame_duration(&self) -> Duration {
        Duration::from_micros(self.frame_duration_us)
    }

    /// Slot length in whole microseconds; slot `k` of a frame starts at
    /// `k * slot_duration_us` from the frame start.
    pub fn slot_duration_us(&self) -> u64 {
        self.frame_duration_us / self.slots_per_frame.max(1) as u64
    }

    pub fn slot_duration(&self) -> Duration {
        Duration::from_micros(self.slot_duration_us())
    }

    pub fn link_budget(&self) -> LinkBudget {
        LinkBudget {
            noise: NoiseBudget::from_parameters(&self.radio),
            regeneration: self.regeneration,
            satellite_noise_power_w: self.satellite_noise_power_w,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ReceiverConfig {
    /// Seed of every random generator in the run.
    #[serde(default = "default_seed")]
    pub seed: u64,
    pub carriers: Vec<CarrierConf>,
    pub waveforms: Vec<WaveformConf>,
    #[serde(default)]
    pub load_control: LoadControlConfig,
}

impl ReceiverConfig {
    /// Load and validate the configuration from a TOML file.
    ///
    /// # Arguments
    /// * `config_path` - Path to the config.toml file
    pub fn load(config_path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
        let config = Self::parse(&content).with_context(|| format!("Invalid config file: {}", config_path.display()))?;
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn parse(content: &str) -> Result<Self> {
        let config: ReceiverConfig = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Derive the config path from a scenario file path.
    ///
    /// Replaces the scenario filename with "config.toml" in the same directory.
    pub fn config_path_from_scenario(scenario_path: &str) -> PathBuf {
        let scenario = Path::new(scenario_path);
        scenario.parent().unwrap_or(Path::new(".")).join("config.toml")
    }

    pub fn validate(&self) -> Result<()> {
        if self.carriers.is_empty() {
            bail!("At least one carrier must be configured");
        }
        if self.waveforms.is_empty() {
            bail!("At least one waveform must be configured");
        }

        let mut waveform_ids = HashSet::new();
        for waveform in &self.waveforms {
            if !waveform_ids.insert(waveform.waveform_id) {
                bail!("Duplicate waveform_id found: {}", waveform.waveform_id);
            }
            if waveform.burst_length_symbols == 0 {
                bail!("Waveform {} must have a positive burst_length_symbols", waveform.waveform_id);
            }
            if !waveform.decode_threshold_db.is_finite() {
                bail!("Waveform {} has an invalid decode threshold", waveform.waveform_id);
            }
        }

        let mut carrier_ids = HashSet::new();
        for carrier in &self.carriers {
            if !carrier_ids.insert(carrier.carrier_id) {
                bail!("Duplicate carrier_id found: {}", carrier.carrier_id);
            }
            validate_carrier(carrier).with_context(|| format!("Carrier {}", carrier.carrier_id))?;
            if carrier.dynamic_load_control && self.load_control.channel(carrier.allocation_channel).is_none() {
                bail!(
                    "Carrier {} uses dynamic load control but allocation channel {} has no load control configuration",
                    carrier.carrier_id,
                    carrier.allocation_channel
                );
            }
        }

        self.load_control.validate()
    }

    pub fn carrier(&self, carrier_id: u32) -> Option<&CarrierConf> {
        self.carriers.iter().find(|c| c.carrier_id == carrier_id)
    }

    pub fn waveform_table(&self) -> WaveformTable {
        WaveformTable::new(self.waveforms.iter().cloned())
    }
}

fn validate_carrier(carrier: &CarrierConf) -> Result<()> {
    if !(carrier.radio.bandwidth_hz > 0.0) {
        bail!("bandwidth_hz must be positive, got {}", carrier.radio.bandwidth_hz);
    }
    if !(0.0..=100.0).contains(&carrier.radio.aci_wrt_noise_percent) {
        bail!("aci_wrt_noise_percent must be within 0-100, got {}", carrier.radio.aci_wrt_noise_percent);
    }
    if carrier.frame_duration_us == 0 {
        bail!("frame_duration_us must be positive");
    }
    if carrier.slots_per_frame == 0 {
        bail!("slots_per_frame must be positive");
    }
    if carrier.frame_capacity_bits == 0 {
        bail!("frame_capacity_bits must be positive");
    }
    if let Some(noise_w) = carrier.satellite_noise_power_w {
        if !(noise_w > 0.0) {
            bail!("satellite_noise_power_w must be positive, got {}", noise_w);
        }
    }
    if let EliminationStrategy::Residual { sampling_error } = carrier.elimination {
        if !(sampling_error > 0.0 && sampling_error <= 1.0) {
            bail!("Residual sampling_error must be within (0, 1], got {}", sampling_error);
        }
    }
    carrier.collision.validate()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CONFIG: &str = r#"
seed = 7

[[carriers]]
carrier_id = 0
allocation_channel = 0
bandwidth_hz = 1.0e6
rx_temperature_dbk = 24.6
frame_duration_us = 10000
slots_per_frame = 10
frame_capacity_bits = 3040
dynamic_load_control = true
elimination = { type = "residual", sampling_error = 0.95 }
collision = { model = "hard_collision" }

[[waveforms]]
waveform_id = 1
burst_length_symbols = 536
payload_bytes = 38
decode_threshold_db = 3.0

[load_control]
window_size = 4

[[load_control.channels]]
allocation_channel = 0
threshold = 0.5
low_load = { probability = 1000, time = 1 }
high_load = { probability = 60000, time = 10 }
"#;

    #[test]
    fn sample_config_parses() {
        let config = ReceiverConfig::parse(SAMPLE_CONFIG).unwrap();
        assert_eq!(config.seed, 7);
        let carrier = config.carrier(0).unwrap();
        assert_eq!(carrier.collision, CollisionPolicy::HardCollision);
        assert_eq!(carrier.elimination, EliminationStrategy::Residual { sampling_error: 0.95 });
        assert_eq!(carrier.interference_mode, InterferenceMode::PerPacket);
        assert_eq!(carrier.regeneration, RegenerationMode::Regenerative);
        assert_eq!(carrier.slot_duration(), Duration::from_millis(1));
        assert_eq!(config.load_control.window_size, 4);
        assert!(config.waveform_table().contains(1));
    }

    #[test]
    fn dynamic_load_control_needs_channel_configuration() {
        let content = SAMPLE_CONFIG.replace("allocation_channel = 0\nthreshold", "allocation_channel = 3\nthreshold");
        let err = ReceiverConfig::parse(&content).unwrap_err();
        assert!(format!("{:#}", err).contains("no load control configuration"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let content = SAMPLE_CONFIG.replace("slots_per_frame = 10", "slots_per_frame = 0");
        assert!(ReceiverConfig::parse(&content).is_err());

        let content = SAMPLE_CONFIG.replace("model = \"hard_collision\"", "model = \"fixed_probability\", error_rate = 2.0");
        assert!(ReceiverConfig::parse(&content).is_err());

        let content = SAMPLE_CONFIG.replace("model = \"hard_collision\"", "model = \"coin_flip\"");
        assert!(ReceiverConfig::parse(&content).is_err());
    }

    #[test]
    fn config_path_is_next_to_scenario() {
        assert_eq!(
            ReceiverConfig::config_path_from_scenario("scenarios/crdsa.json"),
            PathBuf::from("scenarios/config.toml")
        );
    }
}
