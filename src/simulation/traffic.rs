//! Random access traffic generation.
//!
//! Produces slotted ALOHA or CRDSA burst arrivals for a carrier: every frame,
//! each sender transmits with a fixed probability into randomly chosen
//! slots. Received power varies per payload with log-normal shadowing
//! (a Normal distribution in dB).

use anyhow::{Result, anyhow, bail};
use log::debug;
use rand::Rng;
use rand::seq::index;
use rand_distr::{Distribution, Normal};
use serde::Deserialize;

use super::config::CarrierConf;
use super::signal_calculations::db_to_linear;
use super::types::{AccessMode, BurstArrival};

fn default_replicas() -> u16 {
    2
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct TrafficConf {
    pub carrier_id: u32,
    /// `slotted_aloha` or `crdsa`.
    pub access: AccessMode,
    /// Number of transmitting terminals.
    pub senders: u32,
    /// Id of the first sender; the others follow consecutively.
    #[serde(default)]
    pub first_sender_id: u32,
    /// Frames to generate traffic for, starting at time zero.
    pub frames: u32,
    /// Probability of a sender transmitting in a frame.
    pub transmit_probability: f64,
    /// Replicas per payload for CRDSA.
    #[serde(default = "default_replicas")]
    pub replicas: u16,
    pub waveform_id: u32,
    /// Mean received power in dBW.
    pub mean_rx_power_dbw: f64,
    /// Standard deviation of the received power in dB.
    #[serde(default)]
    pub power_sigma_db: f64,
}

impl TrafficConf {
    pub fn validate(&self, carrier: &CarrierConf) -> Result<()> {
        if self.senders == 0 {
            bail!("Traffic needs at least one sender");
        }
        if !(0.0..=1.0).contains(&self.transmit_probability) {
            bail!("transmit_probability must be within 0-1, got {}", self.transmit_probability);
        }
        if !(self.power_sigma_db >= 0.0) || !self.mean_rx_power_dbw.is_finite() {
            bail!("Invalid power distribution: mean {} dBW, sigma {} dB", self.mean_rx_power_dbw, self.power_sigma_db);
        }
        match self.access {
            AccessMode::SlottedAloha => {}
            AccessMode::Crdsa => {
                if self.replicas == 0 || self.replicas > carrier.slots_per_frame {
                    bail!(
                        "replicas must be within 1-{} (slots per frame), got {}",
                        carrier.slots_per_frame,
                        self.replicas
                    );
                }
            }
            AccessMode::Dedicated => bail!("Random traffic supports slotted_aloha and crdsa access only"),
        }
        Ok(())
    }
}

/// Generate the arrivals described by `conf` on `carrier`, ordered by time.
///
/// CRDSA payloads take their replica tags from `next_tag`, which is advanced
/// past every tag used so several traffic descriptions can share a counter.
pub fn generate<R: Rng + ?Sized>(
    conf: &TrafficConf,
    carrier: &CarrierConf,
    next_tag: &mut u64,
    rng: &mut R,
) -> Result<Vec<BurstArrival>> {
    conf.validate(carrier)?;
    let shadowing = Normal::new(conf.mean_rx_power_dbw, conf.power_sigma_db)
        .map_err(|e| anyhow!("Invalid power_sigma_db {}: {}", conf.power_sigma_db, e))?;

    let slots = carrier.slots_per_frame as usize;
    let slot_duration_us = carrier.slot_duration_us();
    let replicas = match conf.access {
        AccessMode::Crdsa => conf.replicas as usize,
        _ => 1,
    };

    let mut arrivals = Vec::new();
    for frame in 0..conf.frames as u64 {
        let frame_start_us = frame * carrier.frame_duration_us;
        for sender in 0..conf.senders {
            if !rng.gen_bool(conf.transmit_probability) {
                continue;
            }
            let rx_power_w = db_to_linear(shadowing.sample(rng));
            let slot_ids: Vec<u16> = index::sample(rng, slots, replicas).into_iter().map(|s| s as u16).collect();
            let replica_tag = (conf.access == AccessMode::Crdsa).then_some(*next_tag);
            *next_tag += 1;

            for &slot_id in &slot_ids {
                arrivals.push(BurstArrival {
                    time_us: frame_start_us + slot_id as u64 * slot_duration_us,
                    carrier_id: conf.carrier_id,
                    duration_us: slot_duration_us,
                    rx_power_w,
                    rx_power_in_satellite_w: None,
                    sender_id: conf.first_sender_id + sender,
                    access: conf.access,
                    slot_id,
                    replica_slot_ids: slot_ids.iter().copied().filter(|&s| s != slot_id).collect(),
                    waveform_id: conf.waveform_id,
                    replica_tag,
                    upstream_sinr: None,
                    upstream_interference_w: None,
                    packets: 1,
                    interference_only: false,
                });
            }
        }
    }

    arrivals.sort_by_key(|a| a.time_us);
    debug!(
        "Generated {} {:?} bursts for carrier {} over {} frames",
        arrivals.len(),
        conf.access,
        conf.carrier_id,
        conf.frames
    );
    Ok(arrivals)
}
