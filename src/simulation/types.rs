//! Type definitions shared by the reception core.
//!
//! Contains the data structures used across the simulation including:
//! - Simulated time
//! - Burst arrivals handed over by the PHY collaborator
//! - Burst records kept while a reception or a frame is pending
//! - Reception results handed to the MAC collaborator

use serde::Deserialize;
use std::time::Duration;

/// Simulated time, measured from the start of the simulation.
pub type SimTime = Duration;

/// Absolute tolerance below which a power value in W is treated as zero.
pub const POWER_EPSILON_W: f64 = 1.0e-30;

/// Relative tolerance (with respect to the powers involved) below which a
/// power value is floating-point noise.
pub const RELATIVE_POWER_EPSILON: f64 = 1.0e-9;

/// Number of bits in a byte, for payload size conversions.
pub const BITS_PER_BYTE: u64 = 8;

/// Tolerance for a power value computed from terms of magnitude `scale_w`.
pub fn power_tolerance(scale_w: f64) -> f64 {
    POWER_EPSILON_W.max(scale_w.abs() * RELATIVE_POWER_EPSILON)
}

/// How a burst accesses the carrier.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// Dedicated (scheduled) access; the decode check is the link results threshold.
    Dedicated,
    /// Slotted ALOHA random access; the decode check is the carrier's collision policy.
    SlottedAloha,
    /// CRDSA random access; bursts are decoded with SIC at the end of the frame.
    Crdsa,
}

/// A burst as handed over by the PHY collaborator when it starts to arrive.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct BurstArrival {
    /// Arrival time in microseconds from the start of the simulation.
    pub time_us: u64,
    /// Receiving carrier.
    pub carrier_id: u32,
    /// Burst duration in microseconds.
    pub duration_us: u64,
    /// Received power at this receiver in W.
    pub rx_power_w: f64,
    /// Received power at the satellite in W (transparent links). Defaults to `rx_power_w`.
    #[serde(default)]
    pub rx_power_in_satellite_w: Option<f64>,
    /// Sender identity.
    pub sender_id: u32,
    pub access: AccessMode,
    /// Slot occupied by this burst inside the access frame.
    #[serde(default)]
    pub slot_id: u16,
    /// Slots occupied by the sibling replicas of this burst.
    #[serde(default)]
    pub replica_slot_ids: Vec<u16>,
    pub waveform_id: u32,
    /// Correlation tag shared by the replicas of one payload.
    #[serde(default)]
    pub replica_tag: Option<u64>,
    /// SINR (linear) computed upstream, i.e. on the satellite uplink.
    #[serde(default)]
    pub upstream_sinr: Option<f64>,
    /// Interference power at the satellite in W, when it is known upstream.
    #[serde(default)]
    pub upstream_interference_w: Option<f64>,
    /// Number of upper layer packets in the burst.
    #[serde(default = "default_packets")]
    pub packets: u32,
    /// The burst only contributes interference and is not received here.
    #[serde(default)]
    pub interference_only: bool,
}

fn default_packets() -> u32 {
    1
}

impl BurstArrival {
    pub fn start_time(&self) -> SimTime {
        Duration::from_micros(self.time_us)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_micros(self.duration_us)
    }

    pub fn rx_power_in_satellite(&self) -> f64 {
        self.rx_power_in_satellite_w.unwrap_or(self.rx_power_w)
    }
}

/// Everything the receiver knows about one burst while it is pending.
///
/// Interference profiles are lists of `(duration_fraction, power_w)` pairs
/// whose fractions sum to 1.0.
#[derive(Debug, Clone, PartialEq)]
pub struct BurstRecord {
    pub burst_id: u64,
    pub sender_id: u32,
    pub rx_power_w: f64,
    pub rx_power_in_satellite_w: f64,
    pub start_time: SimTime,
    pub end_time: SimTime,
    pub slot_id: u16,
    pub replica_slot_ids: Vec<u16>,
    pub waveform_id: u32,
    pub burst_length_symbols: u32,
    pub payload_bits: u64,
    pub packets: u32,
    pub replica_tag: Option<u64>,
    pub upstream_sinr: Option<f64>,
    /// Interference profile at this receiver.
    pub if_power_per_fragment: Vec<(f64, f64)>,
    /// Interference profile at the satellite (transparent links).
    pub if_power_in_satellite_per_fragment: Vec<(f64, f64)>,
    pub decoded: bool,
    pub composite_sinr: f64,
    pub has_collision: bool,
}

impl BurstRecord {
    /// Key shared by all replicas of the same payload: same sender, same tag
    /// and the same set of frame slots (own slot plus sibling slots). Bursts
    /// without a tag form a group of their own.
    pub fn payload_key(&self) -> PayloadKey {
        match self.replica_tag {
            Some(tag) => {
                let mut slot_ids = self.replica_slot_ids.clone();
                slot_ids.push(self.slot_id);
                slot_ids.sort_unstable();
                slot_ids.dedup();
                PayloadKey::Replicas {
                    sender_id: self.sender_id,
                    tag,
                    slot_ids,
                }
            }
            None => PayloadKey::Single(self.burst_id),
        }
    }
}

/// Identity of a logical payload inside a frame.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PayloadKey {
    Replicas { sender_id: u32, tag: u64, slot_ids: Vec<u16> },
    Single(u64),
}

/// Reception outcome handed to the MAC collaborator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RxResult {
    pub carrier_id: u32,
    pub burst_id: u64,
    pub sender_id: u32,
    pub packets: u32,
    /// `true` when the burst could not be decoded.
    pub phy_error: bool,
    /// Composite SINR (linear) the decision was made with.
    pub composite_sinr: f64,
}
