//! One receiving carrier.
//!
//! The carrier owns everything a physical carrier needs to decide about the
//! bursts it receives:
//! - the interference timeline (and a second one at the satellite for
//!   transparent links),
//! - the bursts whose reception is in progress,
//! - the CRDSA frame contention resolver,
//! - the collision policy and elimination strategy chosen by configuration.
//!
//! Reception ends produce [`RxResult`]s immediately for dedicated and slotted
//! ALOHA access. CRDSA bursts wait for [`RxCarrier::frame_end`].

use log::{debug, info};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::BTreeMap;

use super::collision::{CollisionInput, clears_threshold};
use super::config::CarrierConf;
use super::frame_resolver::{FrameContentionResolver, SicContext};
use super::interference::{InterferenceChangeEvent, InterferenceTimeline};
use super::load_control::LoadSample;
use super::signal_calculations::{LinkBudget, linear_to_db, scalar_product};
use super::trace::{TraceEvent, TraceSink};
use super::types::{AccessMode, BurstArrival, BurstRecord, RxResult, SimTime};
use super::waveform::WaveformTable;

/// Outcome of the end of a random access frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameEndReport {
    /// One result per unique CRDSA payload of the frame.
    pub results: Vec<RxResult>,
    /// SIC passes run.
    pub passes: u32,
    /// Present when the carrier runs dynamic load control.
    pub load_sample: Option<LoadSample>,
}

#[derive(Debug)]
struct PendingRx {
    record: BurstRecord,
    access: AccessMode,
    event: InterferenceChangeEvent,
    satellite_event: Option<InterferenceChangeEvent>,
    upstream_interference_w: Option<f64>,
}

/// One receiving carrier: its timelines, its collision policy and the CRDSA
/// frame it is collecting.
#[derive(Debug)]
pub struct RxCarrier {
    conf: CarrierConf,
    link: LinkBudget,
    waveforms: WaveformTable,
    timeline: InterferenceTimeline,
    /// Interference at the satellite, tracked for transparent links only.
    satellite_timeline: Option<InterferenceTimeline>,
    pending: BTreeMap<u64, PendingRx>,
    resolver: FrameContentionResolver,
    rng: StdRng,
    next_burst_id: u64,
}

impl RxCarrier {
    pub fn new(conf: &CarrierConf, waveforms: WaveformTable, seed: u64) -> Self {
        let link = conf.link_budget();
        let satellite_timeline = if link.is_regenerative() {
            None
        } else {
            Some(InterferenceTimeline::new(conf.interference_mode))
        };
        info!(
            "Carrier {}: {:?} interference, {:?} link, {:?}, {:?}, noise {:e} W",
            conf.carrier_id,
            conf.interference_mode,
            conf.regeneration,
            conf.collision,
            conf.elimination,
            link.noise.total_w()
        );
        Self {
            conf: conf.clone(),
            link,
            waveforms,
            timeline: InterferenceTimeline::new(conf.interference_mode),
            satellite_timeline,
            pending: BTreeMap::new(),
            resolver: FrameContentionResolver::new(conf.carrier_id, conf.frame_capacity_bits),
            rng: StdRng::seed_from_u64(seed.wrapping_add(conf.carrier_id as u64)),
            next_burst_id: 0,
        }
    }

    pub fn carrier_id(&self) -> u32 {
        self.conf.carrier_id
    }

    pub fn conf(&self) -> &CarrierConf {
        &self.conf
    }

    /// Bursts whose reception is in progress.
    pub fn receptions_in_progress(&self) -> usize {
        self.pending.len()
    }

    /// Register a burst starting to arrive. Returns the id to end its
    /// reception with, or `None` for bursts that only interfere.
    ///
    /// # Panics
    ///
    /// If the burst's waveform is not configured.
    pub fn start_rx(&mut self, now: SimTime, arrival: &BurstArrival) -> Option<u64> {
        let duration = arrival.duration();
        let event = self.timeline.add(now, duration, arrival.rx_power_w, arrival.sender_id);
        let satellite_event = self
            .satellite_timeline
            .as_mut()
            .map(|timeline| timeline.add(now, duration, arrival.rx_power_in_satellite(), arrival.sender_id));

        if arrival.interference_only {
            debug!(
                "Carrier {}: interference only burst from sender {} ({:e} W)",
                self.conf.carrier_id, arrival.sender_id, arrival.rx_power_w
            );
            return None;
        }

        let waveform = self.waveforms.required(arrival.waveform_id);
        let burst_id = self.next_burst_id;
        self.next_burst_id += 1;

        self.timeline.notify_rx_start(&event);
        if let (Some(timeline), Some(satellite_event)) = (self.satellite_timeline.as_mut(), satellite_event.as_ref()) {
            timeline.notify_rx_start(satellite_event);
        }

        let record = BurstRecord {
            burst_id,
            sender_id: arrival.sender_id,
            rx_power_w: arrival.rx_power_w,
            rx_power_in_satellite_w: arrival.rx_power_in_satellite(),
            start_time: now,
            end_time: now + duration,
            slot_id: arrival.slot_id,
            replica_slot_ids: arrival.replica_slot_ids.clone(),
            waveform_id: arrival.waveform_id,
            burst_length_symbols: waveform.burst_length_symbols,
            payload_bits: waveform.payload_bits(),
            packets: arrival.packets,
            replica_tag: arrival.replica_tag,
            upstream_sinr: arrival.upstream_sinr,
            if_power_per_fragment: Vec::new(),
            if_power_in_satellite_per_fragment: Vec::new(),
            decoded: false,
            composite_sinr: 0.0,
            has_collision: false,
        };
        debug!(
            "Carrier {}: start rx of burst {} from sender {}, {:?}, slot {}, {:e} W",
            self.conf.carrier_id, burst_id, arrival.sender_id, arrival.access, arrival.slot_id, arrival.rx_power_w
        );
        self.pending.insert(
            burst_id,
            PendingRx {
                record,
                access: arrival.access,
                event,
                satellite_event,
                upstream_interference_w: arrival.upstream_interference_w,
            },
        );
        Some(burst_id)
    }

    /// Finish the reception of `burst_id`.
    ///
    /// Returns the decode result for dedicated and slotted ALOHA bursts;
    /// CRDSA bursts are kept until the frame ends.
    ///
    /// # Panics
    ///
    /// If no reception of `burst_id` is in progress.
    pub fn end_rx(&mut self, now: SimTime, burst_id: u64, sink: &mut dyn TraceSink) -> Option<RxResult> {
        let Some(PendingRx {
            mut record,
            access,
            event,
            satellite_event,
            upstream_interference_w,
        }) = self.pending.remove(&burst_id)
        else {
            panic!("Carrier {}: reception end for unknown burst {}", self.conf.carrier_id, burst_id);
        };

        record.if_power_per_fragment = self.timeline.calculate(&event);
        record.has_collision = self.timeline.has_collision(&event);
        self.timeline.notify_rx_end(&event);

        record.if_power_in_satellite_per_fragment = match (upstream_interference_w, self.satellite_timeline.as_mut(), satellite_event) {
            (Some(interference_w), timeline, satellite_event) => {
                if let (Some(timeline), Some(satellite_event)) = (timeline, satellite_event) {
                    timeline.notify_rx_end(&satellite_event);
                }
                vec![(1.0, interference_w)]
            }
            (None, Some(timeline), Some(satellite_event)) => {
                let profile = timeline.calculate(&satellite_event);
                timeline.notify_rx_end(&satellite_event);
                profile
            }
            _ => record.if_power_per_fragment.clone(),
        };

        sink.record(TraceEvent::InterferenceDensity {
            time: now,
            carrier_id: self.conf.carrier_id,
            density_w_hz: scalar_product(&record.if_power_per_fragment) / self.conf.radio.bandwidth_hz,
        });

        match access {
            AccessMode::Crdsa => {
                self.resolver.add_burst(record);
                None
            }
            AccessMode::SlottedAloha => {
                record.composite_sinr = self.link.composite_sinr(&record);
                let input = CollisionInput {
                    has_collision: record.has_collision,
                    composite_sinr: record.composite_sinr,
                    waveform_id: record.waveform_id,
                };
                let phy_error = self.conf.collision.is_phy_error(&input, &self.waveforms, &mut self.rng);
                sink.record(TraceEvent::SlottedAlohaReceived {
                    time: now,
                    carrier_id: self.conf.carrier_id,
                    burst_id,
                    sender_id: record.sender_id,
                    has_collision: record.has_collision,
                    phy_error,
                });
                Some(self.finish(now, &record, access, phy_error, sink))
            }
            AccessMode::Dedicated => {
                record.composite_sinr = self.link.composite_sinr(&record);
                let phy_error = !clears_threshold(record.composite_sinr, record.waveform_id, &self.waveforms);
                sink.record(TraceEvent::DedicatedReceived {
                    time: now,
                    carrier_id: self.conf.carrier_id,
                    burst_id,
                    sender_id: record.sender_id,
                    phy_error,
                });
                Some(self.finish(now, &record, access, phy_error, sink))
            }
        }
    }

    fn finish(&self, now: SimTime, record: &BurstRecord, access: AccessMode, phy_error: bool, sink: &mut dyn TraceSink) -> RxResult {
        sink.record(TraceEvent::CompositeSinr {
            time: now,
            carrier_id: self.conf.carrier_id,
            access,
            sinr_db: linear_to_db(record.composite_sinr),
        });
        debug!(
            "Carrier {}: burst {} from sender {} {} (SINR {:.2} dB, collision: {})",
            self.conf.carrier_id,
            record.burst_id,
            record.sender_id,
            if phy_error { "failed" } else { "received" },
            linear_to_db(record.composite_sinr),
            record.has_collision
        );
        RxResult {
            carrier_id: self.conf.carrier_id,
            burst_id: record.burst_id,
            sender_id: record.sender_id,
            packets: record.packets,
            phy_error,
            composite_sinr: record.composite_sinr,
        }
    }

    /// Resolve the CRDSA frame that just ended.
    ///
    /// Must run after every reception of the frame has ended.
    pub fn frame_end(&mut self, now: SimTime, sink: &mut dyn TraceSink) -> FrameEndReport {
        let ctx = SicContext {
            link: &self.link,
            link_results: &self.waveforms,
            strategy: self.conf.elimination,
        };
        let outcome = self.resolver.process_frame(&ctx);
        let carrier_id = self.conf.carrier_id;

        for replica in &outcome.replicas {
            sink.record(TraceEvent::ReplicaReceived {
                time: now,
                carrier_id,
                burst_id: replica.burst_id,
                sender_id: replica.sender_id,
                slot_id: replica.slot_id,
                has_collision: replica.has_collision,
                decoded: replica.payload_decoded,
            });
        }
        for result in &outcome.results {
            sink.record(TraceEvent::PayloadReceived {
                time: now,
                carrier_id,
                sender_id: result.sender_id,
                packets: result.packets,
                decoded: !result.phy_error,
            });
            sink.record(TraceEvent::CompositeSinr {
                time: now,
                carrier_id,
                access: AccessMode::Crdsa,
                sinr_db: linear_to_db(result.composite_sinr),
            });
        }
        if !outcome.replicas.is_empty() {
            sink.record(TraceEvent::FrameResolved {
                time: now,
                carrier_id,
                replicas: outcome.replicas.len(),
                payloads: outcome.results.len(),
                decoded: outcome.results.iter().filter(|r| !r.phy_error).count(),
                passes: outcome.passes,
            });
        }

        let load_sample = self.conf.dynamic_load_control.then(|| LoadSample {
            carrier_id,
            allocation_channel: self.conf.allocation_channel,
            normalized_load: outcome.normalized_offered_load,
        });
        if let Some(sample) = load_sample {
            sink.record(TraceEvent::Load { time: now, sample });
        }

        FrameEndReport {
            results: outcome.results,
            passes: outcome.passes,
            load_sample,
        }
    }

    /// Drop every pending reception and the current frame without results.
    pub fn reset(&mut self) {
        info!(
            "Carrier {}: reset, discarding {} reception(s) and {} frame burst(s)",
            self.conf.carrier_id,
            self.pending.len(),
            self.resolver.pending_bursts()
        );
        self.pending.clear();
        self.resolver.clear();
        self.timeline.reset();
        if let Some(timeline) = self.satellite_timeline.as_mut() {
            timeline.reset();
        }
    }
}
