//! Interference timeline of one receiving carrier.
//!
//! Every burst seen by the carrier registers its power as an
//! [`InterferenceChangeEvent`], which places two entries in a time-ordered
//! ledger: `+power` at its start and `-power` at its end. The interference
//! seen by a reception is computed by walking the ledger from the earliest
//! pending entry up to the end of the reception.
//!
//! Entries whose time has passed are folded into a running baseline (the
//! residual power) whenever a new contribution is added while no reception is
//! in progress. The baseline can never become negative; a negative baseline
//! means the ledger lost track of an event.

use log::{debug, trace};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use super::types::{SimTime, power_tolerance};

/// Shape of the interference profile returned by [`InterferenceTimeline::calculate`].
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum InterferenceMode {
    /// One fragment covering the whole burst with the time-weighted power.
    #[default]
    PerPacket,
    /// Piecewise-constant profile, one fragment per interference change.
    PerFragment,
}

/// A power contribution registered on the timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterferenceChangeEvent {
    id: u32,
    start_time: SimTime,
    duration: Duration,
    power_w: f64,
    owner_id: u32,
}

impl InterferenceChangeEvent {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn start_time(&self) -> SimTime {
        self.start_time
    }

    pub fn end_time(&self) -> SimTime {
        self.start_time + self.duration
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn power_w(&self) -> f64 {
        self.power_w
    }

    pub fn owner_id(&self) -> u32 {
        self.owner_id
    }

    fn overlaps(&self, other: &InterferenceChangeEvent) -> bool {
        self.start_time < other.end_time() && other.start_time < self.end_time()
    }
}

/// One ledger entry.
#[derive(Debug, Clone, Copy, PartialEq)]
struct InterferenceChange {
    event_id: u32,
    power_delta_w: f64,
    is_end: bool,
}

/// Interference seen by one receiver on one carrier.
///
/// Keeps a time ordered ledger of power changes and the set of bursts that
/// are currently being received. A burst's interference profile is computed
/// from the ledger between its start and end, excluding its own power. Once no
/// reception is active, the ledger folds into a single baseline entry.
#[derive(Debug, Default)]
pub struct InterferenceTimeline {
    mode: InterferenceMode,
    /// Time-ordered multimap; entries at the same time keep insertion order.
    changes: BTreeMap<SimTime, Vec<InterferenceChange>>,
    /// Events whose end entry is still in the ledger.
    events: HashMap<u32, InterferenceChangeEvent>,
    residual_power_w: f64,
    /// Largest single power seen, used to scale the epsilon tolerance.
    peak_power_w: f64,
    rx_event_ids: BTreeSet<u32>,
    next_event_id: u32,
}

impl InterferenceTimeline {
    pub fn new(mode: InterferenceMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn mode(&self) -> InterferenceMode {
        self.mode
    }

    /// Register a contribution of `power_w` over `[now, now + duration)`.
    ///
    /// # Panics
    ///
    /// If folding the past entries leaves a negative baseline.
    pub fn add(&mut self, now: SimTime, duration: Duration, power_w: f64, owner_id: u32) -> InterferenceChangeEvent {
        let event = InterferenceChangeEvent {
            id: self.next_event_id,
            start_time: now,
            duration,
            power_w,
            owner_id,
        };
        self.next_event_id = self.next_event_id.wrapping_add(1);
        self.peak_power_w = self.peak_power_w.max(power_w.abs());

        debug!("Add change: id={}, duration={:?}, power={:e} W, time={:?}", event.id, duration, power_w, now);

        // Past entries can only be folded while nobody still needs them.
        if !self.is_receiving() {
            self.consume_until(now);
        }

        let tolerance = power_tolerance(self.peak_power_w);
        if self.changes.is_empty() && self.residual_power_w != 0.0 && self.residual_power_w.abs() < tolerance {
            // rounding leftovers of small values
            self.residual_power_w = 0.0;
        }

        self.changes.entry(now).or_default().push(InterferenceChange {
            event_id: event.id,
            power_delta_w: power_w,
            is_end: false,
        });
        self.changes.entry(event.end_time()).or_default().push(InterferenceChange {
            event_id: event.id,
            power_delta_w: -power_w,
            is_end: true,
        });
        self.events.insert(event.id, event);

        trace!("Change count after addition: {}", self.pending_changes());

        if self.residual_power_w < -tolerance {
            panic!("Residual interference power went negative: {:e} W", self.residual_power_w);
        }
        if self.residual_power_w < 0.0 {
            self.residual_power_w = 0.0;
        }

        event
    }

    /// Fold every entry with time <= `now` into the baseline.
    fn consume_until(&mut self, now: SimTime) {
        while let Some(entry) = self.changes.first_entry() {
            if *entry.key() > now {
                break;
            }
            let (time, changes) = entry.remove_entry();
            for change in changes {
                trace!("Change to erase: time={:?}, id={}, power={:e}", time, change.event_id, change.power_delta_w);
                self.residual_power_w += change.power_delta_w;
                if change.is_end {
                    self.events.remove(&change.event_id);
                }
            }
        }
    }

    /// Mark the start of a reception of `event`.
    ///
    /// # Panics
    ///
    /// If the reception of the same event was already started.
    pub fn notify_rx_start(&mut self, event: &InterferenceChangeEvent) {
        let inserted = self.rx_event_ids.insert(event.id);
        assert!(inserted, "Reception of interference event {} started twice", event.id);
    }

    pub fn notify_rx_end(&mut self, event: &InterferenceChangeEvent) {
        self.rx_event_ids.remove(&event.id);
    }

    /// True while at least one reception is in progress.
    pub fn is_receiving(&self) -> bool {
        !self.rx_event_ids.is_empty()
    }

    /// Interference seen by the reception of `event`, as a list of
    /// `(duration_fraction, power_w)` fragments whose fractions sum to 1.0.
    ///
    /// Changes before the own start count in full; changes during the own
    /// burst count for the part of the burst that remains after them.
    ///
    /// # Panics
    ///
    /// If no reception is in progress.
    pub fn calculate(&self, event: &InterferenceChangeEvent) -> Vec<(f64, f64)> {
        if !self.is_receiving() {
            panic!("Interference calculated for event {} while no reception is in progress", event.id);
        }

        let rx_duration = event.duration.as_secs_f64();
        let rx_end = event.end_time();
        let mut if_power_w = self.residual_power_w;
        let mut own_start_reached = false;

        // PerFragment bookkeeping
        let mut fragments: Vec<(f64, f64)> = Vec::new();
        let mut fragment_start = event.start_time;

        'ledger: for (&time, changes) in self.changes.iter() {
            for change in changes {
                if change.event_id == event.id {
                    if change.is_end {
                        if self.mode == InterferenceMode::PerFragment {
                            push_fragment(&mut fragments, fragment_start, rx_end, rx_duration, if_power_w);
                        }
                        break 'ledger;
                    }
                    // own power never interferes with itself
                    own_start_reached = true;
                    fragment_start = time;
                } else if own_start_reached {
                    match self.mode {
                        InterferenceMode::PerPacket => {
                            let remaining = rx_end.saturating_sub(time).as_secs_f64() / rx_duration;
                            if_power_w += remaining * change.power_delta_w;
                        }
                        InterferenceMode::PerFragment => {
                            push_fragment(&mut fragments, fragment_start, time, rx_duration, if_power_w);
                            fragment_start = fragment_start.max(time);
                            if_power_w += change.power_delta_w;
                        }
                    }
                } else {
                    if_power_w += change.power_delta_w;
                }
            }
        }

        debug!("Calculated interference for event {}: {:e} W ({:?})", event.id, if_power_w, self.mode);

        match self.mode {
            InterferenceMode::PerPacket => vec![(1.0, if_power_w)],
            InterferenceMode::PerFragment if fragments.is_empty() => vec![(1.0, if_power_w)],
            InterferenceMode::PerFragment => fragments,
        }
    }

    /// Whether any other tracked event overlaps `event` in time.
    pub fn has_collision(&self, event: &InterferenceChangeEvent) -> bool {
        self.events.values().any(|other| other.id != event.id && other.overlaps(event))
    }

    /// Clear the ledger and the reception state.
    pub fn reset(&mut self) {
        self.changes.clear();
        self.events.clear();
        self.rx_event_ids.clear();
        self.residual_power_w = 0.0;
    }

    /// Baseline power folded from past entries.
    pub fn residual_power(&self) -> f64 {
        self.residual_power_w
    }

    /// Number of entries still in the ledger.
    pub fn pending_changes(&self) -> usize {
        self.changes.values().map(Vec::len).sum()
    }
}

fn push_fragment(fragments: &mut Vec<(f64, f64)>, from: SimTime, to: SimTime, rx_duration: f64, power_w: f64) {
    let fraction = to.saturating_sub(from).as_secs_f64() / rx_duration;
    if fraction > 0.0 {
        fragments.push((fraction, power_w));
    }
}
