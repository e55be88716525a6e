//! Interference elimination models used by successive interference cancellation.
//!
//! Once a burst is decoded its waveform can be regenerated and subtracted
//! from the signal, removing its power from the interference profiles of the
//! bursts it collided with. How much power actually disappears depends on the
//! quality of the channel estimation:
//!
//! - [`EliminationStrategy::Perfect`] removes exactly the decoded power.
//! - [`EliminationStrategy::Residual`] leaves a residual caused by amplitude
//!   and phase estimation errors:
//!
//! ```text
//! σλ² = 1 / (8 · L · Es/No)
//! σφ² = 1 / (2 · L · Es/No)
//! P_residual = (2 + σλ² − 2 · s · exp(−σφ² / 2)) · P
//! ```
//!
//! where `L` is the burst length in symbols and `s` the sampling error
//! `E[g(τ)]/g(0)`.

use log::debug;
use serde::Deserialize;

use super::signal_calculations::scalar_product;
use super::types::{BurstRecord, power_tolerance};

/// Default sampling error of the residual model.
pub const DEFAULT_SAMPLING_ERROR: f64 = 0.99;

fn default_sampling_error() -> f64 {
    DEFAULT_SAMPLING_ERROR
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EliminationStrategy {
    #[default]
    Perfect,
    Residual {
        #[serde(default = "default_sampling_error")]
        sampling_error: f64,
    },
}

impl EliminationStrategy {
    /// Power left behind when cancelling a burst of `decoded_power_w`.
    pub fn residual_power(&self, decoded_power_w: f64, burst_length_symbols: u32, es_no: f64) -> f64 {
        match *self {
            Self::Perfect => 0.0,
            Self::Residual { sampling_error } => {
                let length = burst_length_symbols as f64;
                let sigma_lambda_2 = 1.0 / (8.0 * length * es_no);
                let sigma_phi_2 = 1.0 / (2.0 * length * es_no);
                (2.0 + sigma_lambda_2 - 2.0 * sampling_error * (-sigma_phi_2 / 2.0).exp()) * decoded_power_w
            }
        }
    }

    /// Remove the contribution of `decoded` from the interference profile of
    /// `interfered` over the whole burst.
    pub fn eliminate(&self, interfered: &mut BurstRecord, decoded: &BurstRecord, es_no: f64, is_regenerative: bool) {
        self.eliminate_between(interfered, decoded, es_no, is_regenerative, 0.0, 1.0);
    }

    /// Remove the contribution of `decoded` from the fragments of `interfered`
    /// located between the normalized times `start` and `end`.
    ///
    /// Regenerative links use the profile at this receiver and the received
    /// power; transparent links use the profile and power at the satellite.
    ///
    /// # Panics
    ///
    /// If a fragment power ends up negative beyond rounding tolerance.
    pub fn eliminate_between(
        &self,
        interfered: &mut BurstRecord,
        decoded: &BurstRecord,
        es_no: f64,
        is_regenerative: bool,
        start: f64,
        end: f64,
    ) {
        let (profile, power_to_remove_w) = if is_regenerative {
            (&mut interfered.if_power_per_fragment, decoded.rx_power_w)
        } else {
            (&mut interfered.if_power_in_satellite_per_fragment, decoded.rx_power_in_satellite_w)
        };
        let residual_w = self.residual_power(power_to_remove_w, decoded.burst_length_symbols, es_no);
        let tolerance = power_tolerance(power_to_remove_w);
        let old_power_w = scalar_product(profile);

        let mut normalized_time = 0.0;
        for (fraction, power_w) in profile.iter_mut() {
            normalized_time += *fraction;
            if start >= normalized_time {
                continue;
            } else if end < normalized_time {
                break;
            }

            *power_w -= power_to_remove_w;
            *power_w += residual_w;
            if power_w.abs() < tolerance {
                *power_w = 0.0;
            }
            if *power_w < 0.0 {
                panic!(
                    "Negative interference {:e} W on burst {} after removing burst {}",
                    power_w, interfered.burst_id, decoded.burst_id
                );
            }
        }

        debug!(
            "Burst {} interference went from {:e} to {:e} W after removing burst {} ({:?})",
            interfered.burst_id,
            old_power_w,
            scalar_product(profile),
            decoded.burst_id,
            self
        );
    }
}
