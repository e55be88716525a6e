//! Collision decision policies for non-iterative random access.
//!
//! Slotted ALOHA bursts are decoded one by one as they end; the carrier's
//! policy decides from the burst's interference situation whether the
//! reception failed.

use anyhow::{Result, bail};
use log::debug;
use rand::Rng;
use serde::Deserialize;

use super::signal_calculations::linear_to_db;
use super::waveform::LinkResults;

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Default)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Any overlap in time with another burst destroys the reception.
    HardCollision,
    /// The composite SINR must clear the waveform's decode threshold.
    #[default]
    SinrThreshold,
    /// Receptions fail with a constant probability.
    FixedProbability { error_rate: f64 },
}

/// What the policy may look at when deciding about one burst.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionInput {
    /// Another burst overlapped this one in time.
    pub has_collision: bool,
    /// Composite SINR (linear).
    pub composite_sinr: f64,
    pub waveform_id: u32,
}

impl CollisionPolicy {
    pub fn validate(&self) -> Result<()> {
        if let Self::FixedProbability { error_rate } = *self {
            if !(0.0..=1.0).contains(&error_rate) {
                bail!("Invalid collision error_rate {}, must be within 0-1", error_rate);
            }
        }
        Ok(())
    }

    /// Decide whether the reception failed (`true` = PHY error).
    ///
    /// # Panics
    ///
    /// With [`CollisionPolicy::SinrThreshold`], if the waveform has no decode
    /// threshold.
    pub fn is_phy_error<R: Rng + ?Sized>(&self, input: &CollisionInput, link_results: &dyn LinkResults, rng: &mut R) -> bool {
        let phy_error = match *self {
            Self::HardCollision => input.has_collision,
            Self::SinrThreshold => !clears_threshold(input.composite_sinr, input.waveform_id, link_results),
            Self::FixedProbability { error_rate } => rng.gen_bool(error_rate),
        };
        debug!("{:?} decision, phy_error: {}", self, phy_error);
        phy_error
    }
}

/// Whether a composite SINR (linear) reaches the decode threshold of `waveform_id`.
///
/// # Panics
///
/// If the waveform has no decode threshold.
pub fn clears_threshold(composite_sinr: f64, waveform_id: u32, link_results: &dyn LinkResults) -> bool {
    linear_to_db(composite_sinr) >= link_results.required_threshold_db(waveform_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::waveform::{WaveformConf, WaveformTable};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn table() -> WaveformTable {
        WaveformTable::new([WaveformConf {
            waveform_id: 1,
            burst_length_symbols: 536,
            payload_bytes: 38,
            decode_threshold_db: 3.0,
        }])
    }

    fn input(has_collision: bool, composite_sinr: f64) -> CollisionInput {
        CollisionInput {
            has_collision,
            composite_sinr,
            waveform_id: 1,
        }
    }

    #[test]
    fn hard_collision_ignores_power() {
        let mut rng = StdRng::seed_from_u64(1);
        let policy = CollisionPolicy::HardCollision;
        assert!(policy.is_phy_error(&input(true, 1.0e6), &table(), &mut rng));
        assert!(!policy.is_phy_error(&input(false, 0.01), &table(), &mut rng));
    }

    #[test]
    fn sinr_threshold_compares_in_db() {
        let mut rng = StdRng::seed_from_u64(1);
        let policy = CollisionPolicy::SinrThreshold;
        assert!(!policy.is_phy_error(&input(true, 2.0), &table(), &mut rng));
        assert!(policy.is_phy_error(&input(false, 1.9), &table(), &mut rng));
    }

    #[test]
    fn fixed_probability_matches_configured_rate() {
        let mut rng = StdRng::seed_from_u64(42);
        let policy = CollisionPolicy::FixedProbability { error_rate: 0.25 };
        let errors = (0..10_000)
            .filter(|_| policy.is_phy_error(&input(false, 100.0), &table(), &mut rng))
            .count();
        assert!((errors as f64 / 10_000.0 - 0.25).abs() < 0.03);

        let never = CollisionPolicy::FixedProbability { error_rate: 0.0 };
        assert!(!never.is_phy_error(&input(true, 0.0), &table(), &mut rng));
    }

    #[test]
    fn validation_rejects_bad_rates() {
        assert!(CollisionPolicy::FixedProbability { error_rate: 1.5 }.validate().is_err());
        assert!(CollisionPolicy::FixedProbability { error_rate: 0.5 }.validate().is_ok());
        assert!(CollisionPolicy::HardCollision.validate().is_ok());
    }

    #[test]
    fn policy_from_config() {
        let policy: CollisionPolicy = toml::from_str("model = \"fixed_probability\"\nerror_rate = 0.1").unwrap();
        assert_eq!(policy, CollisionPolicy::FixedProbability { error_rate: 0.1 });
    }
}
