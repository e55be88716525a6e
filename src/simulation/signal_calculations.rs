//! Signal level and link quality calculations.
//!
//! Contains helpers for:
//! - dB / linear power conversions (dBW, dBm, plain ratios)
//! - Thermal noise from receiver temperature and bandwidth
//! - SINR from received power and the noise/interference budget
//! - Composite SINR of a two-leg (transparent satellite) link
//! - Scalar product of a per-fragment interference profile
//! - Composite SINR of a pending burst record ([`LinkBudget`])
//!
//! Units:
//! - Power: W (linear) unless the name says dB
//! - Ratios: linear unless the name says `_db`

use serde::Deserialize;

use super::types::BurstRecord;

/// Boltzmann constant in J/K.
pub const BOLTZMANN_CONSTANT: f64 = 1.380_648_52e-23;

/// Convert a value in dB to a linear ratio.
///
/// ```text
/// 0 dB  → 1.0
/// 3 dB  → ~2.0
/// 10 dB → 10.0
/// ```
pub fn db_to_linear(db: f64) -> f64 {
    10f64.powf(db / 10.0)
}

/// Convert a linear ratio to dB.
///
/// For `linear <= 0` the result is `-inf` or NaN; callers only pass powers and
/// ratios that are physically positive.
pub fn linear_to_db(linear: f64) -> f64 {
    10.0 * linear.log10()
}

/// Convert power from dBm to W.
pub fn dbm_to_w(dbm: f64) -> f64 {
    db_to_linear(dbm) / 1000.0
}

/// Convert power from W to dBm.
pub fn w_to_dbm(w: f64) -> f64 {
    linear_to_db(w * 1000.0)
}

/// Thermal noise power `k·T·B` in W for a receiver temperature given in dBK.
pub fn thermal_noise_power_w(rx_temperature_dbk: f64, bandwidth_hz: f64) -> f64 {
    BOLTZMANN_CONSTANT * db_to_linear(rx_temperature_dbk) * bandwidth_hz
}

/// Noise and non-timeline interference terms seen by one receiver carrier.
///
/// Everything the interference timeline does not track ends up here: thermal
/// noise, adjacent channel interference and external noise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseBudget {
    /// Thermal noise power in W.
    pub noise_power_w: f64,
    /// Adjacent channel interference power in W.
    pub aci_power_w: f64,
    /// External noise power in W.
    pub ext_noise_power_w: f64,
}

impl NoiseBudget {
    /// Build the budget of a carrier from its radio parameters.
    ///
    /// `aci_wrt_noise_percent` is the adjacent channel interference relative to
    /// the thermal noise, in percents. `ext_noise_density_dbwhz` is converted
    /// over the carrier bandwidth.
    pub fn from_parameters(params: &RadioParameters) -> Self {
        let noise_power_w = thermal_noise_power_w(params.rx_temperature_dbk, params.bandwidth_hz);
        let ext_noise_power_w = match params.ext_noise_density_dbwhz {
            Some(density) => db_to_linear(density) * params.bandwidth_hz,
            None => 0.0,
        };
        Self {
            noise_power_w,
            aci_power_w: noise_power_w * params.aci_wrt_noise_percent / 100.0,
            ext_noise_power_w,
        }
    }

    /// Budget with only a fixed noise power; used where the caller already
    /// knows the total noise at the receiver.
    pub fn noise_only(noise_power_w: f64) -> Self {
        Self {
            noise_power_w,
            aci_power_w: 0.0,
            ext_noise_power_w: 0.0,
        }
    }

    /// Total of all noise-like terms in W.
    pub fn total_w(&self) -> f64 {
        self.noise_power_w + self.aci_power_w + self.ext_noise_power_w
    }
}

/// Radio parameters of a receiving carrier.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct RadioParameters {
    /// Carrier bandwidth in Hz.
    pub bandwidth_hz: f64,
    /// Receiver noise temperature in dBK.
    pub rx_temperature_dbk: f64,
    /// Adjacent channel interference with respect to noise, in percents.
    #[serde(default)]
    pub aci_wrt_noise_percent: f64,
    /// External noise power density in dBW/Hz. `None` disables the term.
    #[serde(default)]
    pub ext_noise_density_dbwhz: Option<f64>,
}

/// Signal to interference plus noise ratio (linear).
///
/// ```text
/// SINR = P_rx / (N + I_aci + I + N_ext)
/// ```
pub fn calculate_sinr(rx_power_w: f64, if_power_w: f64, noise: &NoiseBudget) -> f64 {
    rx_power_w / (noise.total_w() + if_power_w)
}

/// Composite SINR of two cascaded links (uplink and downlink of a
/// transparent satellite). Noise and interference of the legs add up, so
/// the inverses add:
///
/// ```text
/// 1/C = 1/SINR₁ + 1/SINR₂
/// ```
pub fn calculate_composite_sinr(sinr_1: f64, sinr_2: f64) -> f64 {
    1.0 / (1.0 / sinr_1 + 1.0 / sinr_2)
}

/// Fraction-weighted interference power of a per-fragment profile.
pub fn scalar_product(profile: &[(f64, f64)]) -> f64 {
    profile.iter().map(|(fraction, power)| fraction * power).sum()
}

/// How the satellite relays the return link towards this receiver.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RegenerationMode {
    /// Bent pipe: the satellite leg adds its own noise and interference.
    Transparent,
    /// The satellite decodes and re-encodes; only this receiver's leg counts.
    #[default]
    Regenerative,
}

/// Everything needed to turn a burst record into a composite SINR.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkBudget {
    pub noise: NoiseBudget,
    pub regeneration: RegenerationMode,
    /// Noise power at the satellite receiver in W. When absent, transparent
    /// links use the SINR computed upstream.
    pub satellite_noise_power_w: Option<f64>,
}

impl LinkBudget {
    pub fn is_regenerative(&self) -> bool {
        self.regeneration == RegenerationMode::Regenerative
    }

    /// Composite SINR (linear) of `record` with its current interference profiles.
    ///
    /// # Panics
    ///
    /// On a transparent link when neither the satellite noise power nor an
    /// upstream SINR is available for the burst.
    pub fn composite_sinr(&self, record: &BurstRecord) -> f64 {
        let sinr = calculate_sinr(record.rx_power_w, scalar_product(&record.if_power_per_fragment), &self.noise);
        if self.is_regenerative() {
            return sinr;
        }

        let satellite_sinr = match (self.satellite_noise_power_w, record.upstream_sinr) {
            (Some(noise_w), _) => calculate_sinr(
                record.rx_power_in_satellite_w,
                scalar_product(&record.if_power_in_satellite_per_fragment),
                &NoiseBudget::noise_only(noise_w),
            ),
            (None, Some(upstream)) => upstream,
            (None, None) => panic!("Burst {} on a transparent link has no satellite leg SINR", record.burst_id),
        };
        calculate_composite_sinr(sinr, satellite_sinr)
    }
}
