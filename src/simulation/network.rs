//! Scenario driver running the receiving carriers on the event scheduler.
//!
//! High-level flow:
//! 1) Every burst arrival is scheduled at its start time.
//! 2) An arrival registers the burst on its carrier and schedules the end of
//!    its reception.
//! 3) Reception ends deliver dedicated and slotted ALOHA results directly.
//! 4) Periodic frame ends resolve the CRDSA frame of each carrier and feed
//!    the frame load to the load controller, whose backoff updates are
//!    collected for the signalling side.

use log::{debug, info, warn};
use std::collections::BTreeMap;

use super::carrier::RxCarrier;
use super::config::ReceiverConfig;
use super::load_control::{BackoffUpdate, LoadController};
use super::scheduler::{EventClass, EventId, Scheduler};
use super::trace::{TraceEvent, TraceSink};
use super::types::{BurstArrival, RxResult, SimTime};

#[derive(Debug, Clone, Copy, PartialEq)]
enum SimEvent {
    /// Index into the arrival list.
    Arrival(usize),
    ReceptionEnd { carrier_id: u32, burst_id: u64 },
    FrameEnd { carrier_id: u32 },
}

/// Counters of a simulation run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulationReport {
    /// Bursts received (interference only bursts excluded, CRDSA replicas counted).
    pub total_sent_bursts: u64,
    pub total_received_packets: u64,
    pub total_phy_errors: u64,
    /// Bursts that overlapped with another burst.
    pub total_collisions: u64,
    pub frames_processed: u64,
    pub sic_passes: u64,
    pub results: Vec<RxResult>,
    pub backoff_updates: Vec<BackoffUpdate>,
    pub end_time: SimTime,
}

impl SimulationReport {
    fn count(&mut self, result: RxResult) {
        if result.phy_error {
            self.total_phy_errors += 1;
        } else {
            self.total_received_packets += result.packets as u64;
        }
        self.results.push(result);
    }
}

/// Forwards trace events while counting collisions.
struct CountingSink<'a> {
    inner: &'a mut dyn TraceSink,
    collisions: u64,
}

impl TraceSink for CountingSink<'_> {
    fn record(&mut self, event: TraceEvent) {
        match event {
            TraceEvent::SlottedAlohaReceived { has_collision: true, .. } | TraceEvent::ReplicaReceived { has_collision: true, .. } => {
                self.collisions += 1;
            }
            _ => {}
        }
        self.inner.record(event);
    }
}

/// Event loop of one scenario: the carriers, the load controller shared by
/// their allocation channels and the pending events.
///
/// Events at equal time run reception ends first, then frame ends, then
/// arrivals, so a frame end always sees every burst of its frame.
pub struct Simulation {
    carriers: BTreeMap<u32, RxCarrier>,
    load_controller: LoadController,
    scheduler: Scheduler<SimEvent>,
    arrivals: Vec<BurstArrival>,
    /// End of the last burst.
    horizon: SimTime,
    frame_ends: BTreeMap<u32, EventId>,
    reception_ends: BTreeMap<(u32, u64), EventId>,
    report: SimulationReport,
}

impl Simulation {
    pub fn new(config: &ReceiverConfig, arrivals: Vec<BurstArrival>) -> Self {
        let waveforms = config.waveform_table();
        let carriers: BTreeMap<u32, RxCarrier> = config
            .carriers
            .iter()
            .map(|conf| (conf.carrier_id, RxCarrier::new(conf, waveforms.clone(), config.seed)))
            .collect();

        let mut scheduler = Scheduler::new();
        for (index, arrival) in arrivals.iter().enumerate() {
            scheduler.schedule(arrival.start_time(), EventClass::Arrival, SimEvent::Arrival(index));
        }
        let horizon = arrivals
            .iter()
            .map(|a| a.start_time() + a.duration())
            .max()
            .unwrap_or(SimTime::ZERO);

        let mut frame_ends = BTreeMap::new();
        for carrier in carriers.values() {
            let id = scheduler.schedule(
                carrier.conf().frame_duration(),
                EventClass::FrameEnd,
                SimEvent::FrameEnd {
                    carrier_id: carrier.carrier_id(),
                },
            );
            frame_ends.insert(carrier.carrier_id(), id);
        }

        info!("Simulation of {} bursts on {} carrier(s) until {:?}", arrivals.len(), carriers.len(), horizon);
        Self {
            carriers,
            load_controller: LoadController::new(config.load_control.clone()),
            scheduler,
            arrivals,
            horizon,
            frame_ends,
            reception_ends: BTreeMap::new(),
            report: SimulationReport::default(),
        }
    }

    pub fn now(&self) -> SimTime {
        self.scheduler.now()
    }

    pub fn report(&self) -> &SimulationReport {
        &self.report
    }

    /// Run until no events are left and return the final report.
    pub fn run(mut self, sink: &mut dyn TraceSink) -> SimulationReport {
        self.run_until(SimTime::MAX, sink);
        self.report.end_time = self.scheduler.now();
        info!(
            "Simulation finished at {:?}: sent {}, received {}, errors {}, collisions {}, frames {}, backoff updates {}",
            self.report.end_time,
            self.report.total_sent_bursts,
            self.report.total_received_packets,
            self.report.total_phy_errors,
            self.report.total_collisions,
            self.report.frames_processed,
            self.report.backoff_updates.len()
        );
        self.report
    }

    /// Process every event scheduled at or before `until`.
    pub fn run_until(&mut self, until: SimTime, sink: &mut dyn TraceSink) {
        let mut sink = CountingSink { inner: sink, collisions: 0 };
        while self.scheduler.peek_time().is_some_and(|t| t <= until) {
            let Some((now, event)) = self.scheduler.pop_next() else {
                break;
            };
            match event {
                SimEvent::Arrival(index) => self.handle_arrival(now, index),
                SimEvent::ReceptionEnd { carrier_id, burst_id } => self.handle_reception_end(now, carrier_id, burst_id, &mut sink),
                SimEvent::FrameEnd { carrier_id } => self.handle_frame_end(now, carrier_id, &mut sink),
            }
        }
        self.report.total_collisions += sink.collisions;
    }

    fn handle_arrival(&mut self, now: SimTime, index: usize) {
        let arrival = &self.arrivals[index];
        let Some(carrier) = self.carriers.get_mut(&arrival.carrier_id) else {
            warn!("Burst from sender {} for unknown carrier {} ignored", arrival.sender_id, arrival.carrier_id);
            return;
        };
        if let Some(burst_id) = carrier.start_rx(now, arrival) {
            self.report.total_sent_bursts += 1;
            let carrier_id = arrival.carrier_id;
            let id = self.scheduler.schedule(
                now + arrival.duration(),
                EventClass::ReceptionEnd,
                SimEvent::ReceptionEnd { carrier_id, burst_id },
            );
            self.reception_ends.insert((carrier_id, burst_id), id);
        }
    }

    fn handle_reception_end(&mut self, now: SimTime, carrier_id: u32, burst_id: u64, sink: &mut dyn TraceSink) {
        self.reception_ends.remove(&(carrier_id, burst_id));
        let Some(carrier) = self.carriers.get_mut(&carrier_id) else {
            return;
        };
        if let Some(result) = carrier.end_rx(now, burst_id, sink) {
            self.report.count(result);
        }
    }

    fn handle_frame_end(&mut self, now: SimTime, carrier_id: u32, sink: &mut dyn TraceSink) {
        self.frame_ends.remove(&carrier_id);
        let Some(carrier) = self.carriers.get_mut(&carrier_id) else {
            return;
        };
        let frame_report = carrier.frame_end(now, sink);
        self.report.frames_processed += 1;
        self.report.sic_passes += frame_report.passes as u64;
        for result in frame_report.results {
            self.report.count(result);
        }

        if let Some(sample) = frame_report.load_sample {
            if let Some(update) = self.load_controller.record_sample(sample) {
                sink.record(TraceEvent::Backoff { time: now, update });
                self.report.backoff_updates.push(update);
            }
        }

        if now < self.horizon {
            let id = self.scheduler.schedule(
                now + carrier.conf().frame_duration(),
                EventClass::FrameEnd,
                SimEvent::FrameEnd { carrier_id },
            );
            self.frame_ends.insert(carrier_id, id);
        }
    }

    /// Abort everything in flight on a carrier: pending receptions and the
    /// current frame are discarded without results and the frame timing
    /// restarts at the next frame boundary.
    pub fn reset_carrier(&mut self, carrier_id: u32) {
        let Some(carrier) = self.carriers.get_mut(&carrier_id) else {
            warn!("Reset of unknown carrier {} ignored", carrier_id);
            return;
        };

        let ends: Vec<(u32, u64)> = self.reception_ends.range((carrier_id, 0)..=(carrier_id, u64::MAX)).map(|(k, _)| *k).collect();
        for key in ends {
            if let Some(id) = self.reception_ends.remove(&key) {
                self.scheduler.cancel(id);
            }
        }
        if let Some(id) = self.frame_ends.remove(&carrier_id) {
            self.scheduler.cancel(id);
        }
        carrier.reset();

        let now = self.scheduler.now();
        let next_frame_end = next_frame_boundary(now, carrier.conf().frame_duration());
        let id = self
            .scheduler
            .schedule(next_frame_end, EventClass::FrameEnd, SimEvent::FrameEnd { carrier_id });
        self.frame_ends.insert(carrier_id, id);
        debug!("Carrier {} reset at {:?}, next frame end {:?}", carrier_id, now, next_frame_end);
    }
}

/// First multiple of `frame` strictly after `now`, saturating at the largest
/// representable time.
fn next_frame_boundary(now: SimTime, frame: SimTime) -> SimTime {
    let frame_ns = frame.as_nanos().max(1);
    let next_ns = (now.as_nanos() / frame_ns + 1) * frame_ns;
    match u64::try_from(next_ns) {
        Ok(next_ns) => SimTime::from_nanos(next_ns),
        Err(_) => SimTime::MAX,
    }
}

/// Run `arrivals` through the carriers of `config`.
pub fn run_scenario(config: &ReceiverConfig, arrivals: Vec<BurstArrival>, sink: &mut dyn TraceSink) -> SimulationReport {
    Simulation::new(config, arrivals).run(sink)
}
