//! Frame contention resolution for CRDSA random access.
//!
//! Every burst of a random access frame is kept until the frame ends. Each
//! logical payload is transmitted as several replicas in different slots, so
//! a replica that survives in a clean slot can be decoded, regenerated and
//! cancelled from the slots its siblings occupy. That in turn may free other
//! payloads. This successive interference cancellation runs in passes:
//!
//! 1. Every undecided burst is checked against the decode threshold of its
//!    waveform using the interference profiles as they were at the start of
//!    the pass.
//! 2. For every payload with at least one decodable replica, the replica with
//!    the best composite SINR becomes the decoded representative and all its
//!    siblings are retired.
//! 3. The elimination strategy removes every replica of the decoded payloads
//!    from the other undecided bursts sharing their slots.
//!
//! Passes repeat until one produces no new decodes or nothing is left.

use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet};

use super::collision::clears_threshold;
use super::elimination::EliminationStrategy;
use super::signal_calculations::{LinkBudget, scalar_product};
use super::types::{BurstRecord, PayloadKey, RxResult};
use super::waveform::LinkResults;

/// Inputs of the cancellation algorithm owned by the carrier.
pub struct SicContext<'a> {
    pub link: &'a LinkBudget,
    pub link_results: &'a dyn LinkResults,
    pub strategy: EliminationStrategy,
}

/// Final state of one replica after frame processing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplicaOutcome {
    pub burst_id: u64,
    pub sender_id: u32,
    pub slot_id: u16,
    /// Another burst shared the slot.
    pub has_collision: bool,
    /// The payload carried by this replica was decoded (by any replica).
    pub payload_decoded: bool,
    /// Composite SINR (linear) at the last evaluation.
    pub composite_sinr: f64,
    /// Fraction-weighted interference left on the replica after cancellation, in W.
    pub interference_w: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameOutcome {
    /// One result per unique payload.
    pub results: Vec<RxResult>,
    pub replicas: Vec<ReplicaOutcome>,
    /// SIC passes run.
    pub passes: u32,
    /// Normalized offered load of the frame.
    pub normalized_offered_load: f64,
}

impl FrameOutcome {
    pub fn decoded_senders(&self) -> BTreeSet<u32> {
        self.results.iter().filter(|r| !r.phy_error).map(|r| r.sender_id).collect()
    }
}

/// Pending CRDSA bursts of one carrier, resolved by SIC at the frame end.
///
/// Bursts are grouped per slot. Each pass decodes every payload whose best
/// replica clears the waveform threshold, then removes all replicas of the
/// decoded payloads from the profiles of the undecided bursts in their slots.
#[derive(Debug)]
pub struct FrameContentionResolver {
    carrier_id: u32,
    frame_capacity_bits: u64,
    /// Bursts by the slot they occupy.
    slots: BTreeMap<u16, Vec<BurstRecord>>,
    offered_payloads: BTreeSet<PayloadKey>,
    offered_bits: u64,
}

impl FrameContentionResolver {
    pub fn new(carrier_id: u32, frame_capacity_bits: u64) -> Self {
        Self {
            carrier_id,
            frame_capacity_bits,
            slots: BTreeMap::new(),
            offered_payloads: BTreeSet::new(),
            offered_bits: 0,
        }
    }

    /// Store a replica received during the current frame.
    pub fn add_burst(&mut self, record: BurstRecord) {
        if self.offered_payloads.insert(record.payload_key()) {
            self.offered_bits += record.payload_bits;
        }
        debug!(
            "Carrier {}: CRDSA burst {} from sender {} stored in slot {}",
            self.carrier_id, record.burst_id, record.sender_id, record.slot_id
        );
        self.slots.entry(record.slot_id).or_default().push(record);
    }

    pub fn pending_bursts(&self) -> usize {
        self.slots.values().map(Vec::len).sum()
    }

    /// Attempted payload bits of the frame divided by the frame capacity.
    pub fn calculate_normalized_offered_load(&self) -> f64 {
        if self.frame_capacity_bits == 0 {
            return 0.0;
        }
        self.offered_bits as f64 / self.frame_capacity_bits as f64
    }

    /// Drop the frame without producing results.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.offered_payloads.clear();
        self.offered_bits = 0;
    }

    /// Run interference cancellation over the frame and return its outcome.
    /// The resolver is empty afterwards.
    ///
    /// # Panics
    ///
    /// If a burst's waveform has no decode threshold, or elimination drives an
    /// interference value negative.
    pub fn process_frame(&mut self, ctx: &SicContext<'_>) -> FrameOutcome {
        let normalized_offered_load = self.calculate_normalized_offered_load();

        for bursts in self.slots.values_mut() {
            let has_collision = bursts.len() > 1;
            for burst in bursts.iter_mut() {
                burst.has_collision = has_collision;
            }
        }

        let mut decoded_payloads: BTreeSet<PayloadKey> = BTreeSet::new();
        let mut passes = 0;

        loop {
            let undecided = self
                .slots
                .values()
                .flatten()
                .filter(|b| !decoded_payloads.contains(&b.payload_key()))
                .count();
            if undecided == 0 {
                break;
            }
            passes += 1;

            let new_decodes = self.run_pass(ctx, &decoded_payloads);
            debug!("Carrier {}: SIC pass {} decoded {} payload(s)", self.carrier_id, passes, new_decodes.len());
            if new_decodes.is_empty() {
                break;
            }

            decoded_payloads.extend(new_decodes.keys().cloned());
            for (key, &(slot_id, index, es_no)) in &new_decodes {
                if let Some(representative) = self.slots.get_mut(&slot_id).and_then(|b| b.get_mut(index)) {
                    representative.decoded = true;
                }
                self.cancel_payload(key, es_no, ctx, &decoded_payloads);
            }
        }

        let outcome = self.collect_outcome(passes, normalized_offered_load);
        info!(
            "Carrier {}: frame processed, {} replicas, {} payloads, {} decoded, {} passes, load {:.3}",
            self.carrier_id,
            outcome.replicas.len(),
            outcome.results.len(),
            outcome.results.iter().filter(|r| !r.phy_error).count(),
            outcome.passes,
            normalized_offered_load
        );
        self.clear();
        outcome
    }

    /// Evaluate every undecided burst against the profiles of the start of the
    /// pass. Returns the representative `(slot, index, composite SINR)` of each
    /// decodable payload.
    fn run_pass(&mut self, ctx: &SicContext<'_>, decoded_payloads: &BTreeSet<PayloadKey>) -> BTreeMap<PayloadKey, (u16, usize, f64)> {
        let mut candidates: BTreeMap<PayloadKey, (f64, u16, usize)> = BTreeMap::new();

        for (&slot_id, bursts) in self.slots.iter_mut() {
            for (index, burst) in bursts.iter_mut().enumerate() {
                let key = burst.payload_key();
                if decoded_payloads.contains(&key) {
                    continue;
                }
                burst.composite_sinr = ctx.link.composite_sinr(burst);
                if !clears_threshold(burst.composite_sinr, burst.waveform_id, ctx.link_results) {
                    continue;
                }
                // slots are visited in ascending order, so ties keep the lowest slot
                let better = match candidates.get(&key) {
                    Some((best_sinr, _, _)) => burst.composite_sinr > *best_sinr,
                    None => true,
                };
                if better {
                    candidates.insert(key, (burst.composite_sinr, slot_id, index));
                }
            }
        }

        candidates
            .into_iter()
            .map(|(key, (sinr, slot_id, index))| (key, (slot_id, index, sinr)))
            .collect()
    }

    /// Remove every replica of the decoded payload `key` from the undecided
    /// bursts sharing its slots.
    fn cancel_payload(&mut self, key: &PayloadKey, es_no: f64, ctx: &SicContext<'_>, decoded_payloads: &BTreeSet<PayloadKey>) {
        let is_regenerative = ctx.link.is_regenerative();
        for bursts in self.slots.values_mut() {
            let replicas: Vec<BurstRecord> = bursts.iter().filter(|b| b.payload_key() == *key).cloned().collect();
            for replica in &replicas {
                for other in bursts.iter_mut() {
                    if decoded_payloads.contains(&other.payload_key()) {
                        continue;
                    }
                    ctx.strategy.eliminate(other, replica, es_no, is_regenerative);
                }
            }
        }
    }

    fn collect_outcome(&self, passes: u32, normalized_offered_load: f64) -> FrameOutcome {
        let mut payloads: BTreeMap<PayloadKey, RxResult> = BTreeMap::new();
        let mut replicas = Vec::new();

        for burst in self.slots.values().flatten() {
            let result = payloads.entry(burst.payload_key()).or_insert(RxResult {
                carrier_id: self.carrier_id,
                burst_id: burst.burst_id,
                sender_id: burst.sender_id,
                packets: burst.packets,
                phy_error: true,
                composite_sinr: burst.composite_sinr,
            });
            if burst.decoded {
                result.burst_id = burst.burst_id;
                result.phy_error = false;
                result.composite_sinr = burst.composite_sinr;
            } else if result.phy_error && burst.composite_sinr > result.composite_sinr {
                result.composite_sinr = burst.composite_sinr;
            }
        }

        for burst in self.slots.values().flatten() {
            let payload_decoded = payloads.get(&burst.payload_key()).is_some_and(|r| !r.phy_error);
            replicas.push(ReplicaOutcome {
                burst_id: burst.burst_id,
                sender_id: burst.sender_id,
                slot_id: burst.slot_id,
                has_collision: burst.has_collision,
                payload_decoded,
                composite_sinr: burst.composite_sinr,
                interference_w: scalar_product(&burst.if_power_per_fragment),
            });
        }

        FrameOutcome {
            results: payloads.into_values().collect(),
            replicas,
            passes,
            normalized_offered_load,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::signal_calculations::{NoiseBudget, RegenerationMode};
    use crate::simulation::waveform::{WaveformConf, WaveformTable};
    use std::time::Duration;

    fn link() -> LinkBudget {
        LinkBudget {
            noise: NoiseBudget::noise_only(1.0),
            regeneration: RegenerationMode::Regenerative,
            satellite_noise_power_w: None,
        }
    }

    fn waveforms() -> WaveformTable {
        WaveformTable::new([WaveformConf {
            waveform_id: 1,
            burst_length_symbols: 536,
            payload_bytes: 38,
            decode_threshold_db: 3.0,
        }])
    }

    /// Replica of payload `sender` in `slot`, interfered by `interference_w`.
    fn replica(burst_id: u64, sender: u32, slot_id: u16, siblings: &[u16], power: f64, interference_w: f64) -> BurstRecord {
        BurstRecord {
            burst_id,
            sender_id: sender,
            rx_power_w: power,
            rx_power_in_satellite_w: power,
            start_time: Duration::from_millis(slot_id as u64),
            end_time: Duration::from_millis(slot_id as u64 + 1),
            slot_id,
            replica_slot_ids: siblings.to_vec(),
            waveform_id: 1,
            burst_length_symbols: 536,
            payload_bits: 304,
            packets: 1,
            replica_tag: Some(sender as u64),
            upstream_sinr: None,
            if_power_per_fragment: vec![(1.0, interference_w)],
            if_power_in_satellite_per_fragment: vec![(1.0, interference_w)],
            decoded: false,
            composite_sinr: 0.0,
            has_collision: false,
        }
    }

    /// Payload 1 in slots {0,1}, payload 2 in {1,2}, payload 3 in {0,2}.
    fn three_pairs(p1: f64, p2: f64, p3: f64) -> Vec<BurstRecord> {
        vec![
            replica(10, 1, 0, &[1], p1, p3),
            replica(11, 1, 1, &[0], p1, p2),
            replica(20, 2, 1, &[2], p2, p1),
            replica(21, 2, 2, &[1], p2, p3),
            replica(30, 3, 0, &[2], p3, p1),
            replica(31, 3, 2, &[0], p3, p2),
        ]
    }

    fn resolve(bursts: Vec<BurstRecord>, strategy: EliminationStrategy) -> FrameOutcome {
        let link = link();
        let waveforms = waveforms();
        let mut resolver = FrameContentionResolver::new(0, 3040);
        for burst in bursts {
            resolver.add_burst(burst);
        }
        resolver.process_frame(&SicContext {
            link: &link,
            link_results: &waveforms,
            strategy,
        })
    }

    #[test]
    fn cancellation_frees_colliding_payloads_in_second_pass() {
        let outcome = resolve(three_pairs(10.0, 3.0, 3.0), EliminationStrategy::Perfect);
        assert_eq!(outcome.decoded_senders(), BTreeSet::from([1, 2, 3]));
        assert_eq!(outcome.passes, 2);
        assert_eq!(outcome.results.len(), 3);
        assert!(outcome.replicas.iter().all(|r| r.has_collision && r.payload_decoded));
    }

    #[test]
    fn nothing_decodes_below_threshold() {
        let outcome = resolve(three_pairs(1.0, 1.0, 1.0), EliminationStrategy::Perfect);
        assert!(outcome.decoded_senders().is_empty());
        assert_eq!(outcome.passes, 1);
        assert_eq!(outcome.results.len(), 3);
        assert!(outcome.results.iter().all(|r| r.phy_error));
    }

    #[test]
    fn cancellation_never_increases_interference() {
        for strategy in [
            EliminationStrategy::Perfect,
            EliminationStrategy::Residual { sampling_error: 0.99 },
        ] {
            let bursts = three_pairs(10.0, 3.0, 1.0);
            let before: BTreeMap<u64, f64> = bursts
                .iter()
                .map(|b| (b.burst_id, scalar_product(&b.if_power_per_fragment)))
                .collect();
            let outcome = resolve(bursts, strategy);
            for replica in &outcome.replicas {
                assert!(replica.interference_w <= before[&replica.burst_id] + 1e-12);
            }
        }
    }

    #[test]
    fn outcome_does_not_depend_on_insertion_order() {
        let forward = resolve(three_pairs(10.0, 3.0, 3.0), EliminationStrategy::Perfect);
        let mut reversed_bursts = three_pairs(10.0, 3.0, 3.0);
        reversed_bursts.reverse();
        let reversed = resolve(reversed_bursts, EliminationStrategy::Perfect);
        assert_eq!(forward.decoded_senders(), reversed.decoded_senders());
        assert_eq!(forward.passes, reversed.passes);
    }

    #[test]
    fn one_result_per_payload_even_with_clean_replicas() {
        // both replicas alone in their slots
        let outcome = resolve(
            vec![replica(1, 7, 0, &[3], 5.0, 0.0), replica(2, 7, 3, &[0], 5.0, 0.0)],
            EliminationStrategy::Perfect,
        );
        assert_eq!(outcome.results.len(), 1);
        assert!(!outcome.results[0].phy_error);
        assert_eq!(outcome.results[0].burst_id, 1);
        assert_eq!(outcome.passes, 1);
        assert!(outcome.replicas.iter().all(|r| !r.has_collision));
    }

    #[test]
    fn offered_load_counts_each_payload_once() {
        let mut resolver = FrameContentionResolver::new(0, 3040);
        for burst in three_pairs(1.0, 1.0, 1.0) {
            resolver.add_burst(burst);
        }
        assert_eq!(resolver.pending_bursts(), 6);
        assert!((resolver.calculate_normalized_offered_load() - 0.3).abs() < 1e-12);

        resolver.clear();
        assert_eq!(resolver.pending_bursts(), 0);
        assert_eq!(resolver.calculate_normalized_offered_load(), 0.0);
    }

    #[test]
    fn equal_tags_from_different_senders_are_different_payloads() {
        let mut bursts = vec![
            replica(1, 1, 0, &[1], 10.0, 0.0),
            replica(2, 1, 1, &[0], 10.0, 0.0),
            replica(3, 50, 2, &[3], 10.0, 0.0),
            replica(4, 50, 3, &[2], 10.0, 0.0),
        ];
        for burst in bursts.iter_mut() {
            burst.replica_tag = Some(0);
        }
        let mut resolver = FrameContentionResolver::new(0, 3040);
        for burst in bursts.clone() {
            resolver.add_burst(burst);
        }
        assert!((resolver.calculate_normalized_offered_load() - 0.2).abs() < 1e-12);

        let outcome = resolve(bursts, EliminationStrategy::Perfect);
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.decoded_senders(), BTreeSet::from([1, 50]));
    }

    #[test]
    fn transparent_link_cancels_at_the_satellite() {
        let link = LinkBudget {
            noise: NoiseBudget::noise_only(0.01),
            regeneration: RegenerationMode::Transparent,
            satellite_noise_power_w: Some(1.0),
        };
        let waveforms = waveforms();
        let mut resolver = FrameContentionResolver::new(0, 3040);
        // clean at the gateway, colliding at the satellite
        for mut burst in three_pairs(10.0, 3.0, 3.0) {
            burst.if_power_per_fragment = vec![(1.0, 0.0)];
            resolver.add_burst(burst);
        }
        let outcome = resolver.process_frame(&SicContext {
            link: &link,
            link_results: &waveforms,
            strategy: EliminationStrategy::Perfect,
        });

        assert_eq!(outcome.decoded_senders(), BTreeSet::from([1, 2, 3]));
        assert_eq!(outcome.passes, 2);
        // only the satellite profiles were cancelled
        assert!(outcome.replicas.iter().all(|r| r.interference_w == 0.0));
        let second_pass = outcome.results.iter().find(|r| r.sender_id == 2).unwrap();
        assert!((second_pass.composite_sinr - 1.0 / (1.0 / 3.0 + 0.01 / 3.0)).abs() < 1e-9);
    }

    #[test]
    #[should_panic(expected = "No decode threshold configured for waveform 9")]
    fn unknown_waveform_is_fatal() {
        let mut burst = replica(1, 1, 0, &[], 5.0, 0.0);
        burst.waveform_id = 9;
        resolve(vec![burst], EliminationStrategy::Perfect);
    }
}
