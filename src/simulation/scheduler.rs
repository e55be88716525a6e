//! Discrete-event scheduler driving the simulation on virtual time.
//!
//! Events are kept in a map keyed by `(time, class, sequence)`:
//! - earlier events run first,
//! - at equal time the [`EventClass`] order applies,
//! - within a class events run in scheduling order.
//!
//! The class order makes every reception ending at a frame boundary complete
//! before the frame end is processed, and bursts starting at the boundary
//! belong to the next frame.

use log::trace;
use std::collections::BTreeMap;

use super::types::SimTime;

/// Ordering class of events scheduled for the same instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventClass {
    ReceptionEnd,
    FrameEnd,
    Arrival,
}

/// Handle of a scheduled event, used for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId {
    time: SimTime,
    class: EventClass,
    seq: u64,
}

impl EventId {
    pub fn time(&self) -> SimTime {
        self.time
    }
}

/// Event queue ordered by time, then event class, then insertion order.
#[derive(Debug)]
pub struct Scheduler<T> {
    queue: BTreeMap<EventId, T>,
    now: SimTime,
    next_seq: u64,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self {
            queue: BTreeMap::new(),
            now: SimTime::ZERO,
            next_seq: 0,
        }
    }
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time: the time of the last event popped.
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Schedule `event` at `time`. Times in the past are moved to `now`.
    pub fn schedule(&mut self, time: SimTime, class: EventClass, event: T) -> EventId {
        let id = EventId {
            time: time.max(self.now),
            class,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        trace!("Scheduled {:?} event at {:?} (seq {})", class, id.time, id.seq);
        self.queue.insert(id, event);
        id
    }

    /// Remove a pending event. Returns it when it had not run yet.
    pub fn cancel(&mut self, id: EventId) -> Option<T> {
        self.queue.remove(&id)
    }

    /// Pop the earliest event and advance the clock to its time.
    pub fn pop_next(&mut self) -> Option<(SimTime, T)> {
        let (id, event) = self.queue.pop_first()?;
        self.now = id.time;
        Some((id.time, event))
    }

    pub fn peek_time(&self) -> Option<SimTime> {
        self.queue.keys().next().map(|id| id.time)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn events_run_in_time_then_class_then_fifo_order() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(ms(10), EventClass::Arrival, "arrival");
        scheduler.schedule(ms(10), EventClass::FrameEnd, "frame end");
        scheduler.schedule(ms(10), EventClass::ReceptionEnd, "end a");
        scheduler.schedule(ms(10), EventClass::ReceptionEnd, "end b");
        scheduler.schedule(ms(5), EventClass::Arrival, "early");

        let order: Vec<&str> = std::iter::from_fn(|| scheduler.pop_next().map(|(_, e)| e)).collect();
        assert_eq!(order, vec!["early", "end a", "end b", "frame end", "arrival"]);
        assert_eq!(scheduler.now(), ms(10));
        assert!(scheduler.is_empty());
    }

    #[test]
    fn cancelled_events_never_run() {
        let mut scheduler = Scheduler::new();
        let frame_end = scheduler.schedule(ms(20), EventClass::FrameEnd, 1);
        scheduler.schedule(ms(30), EventClass::FrameEnd, 2);
        assert_eq!(scheduler.cancel(frame_end), Some(1));
        assert_eq!(scheduler.cancel(frame_end), None);
        assert_eq!(scheduler.len(), 1);
        assert_eq!(scheduler.pop_next(), Some((ms(30), 2)));
    }

    #[test]
    fn past_events_are_clamped_to_now() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(ms(50), EventClass::Arrival, 1);
        scheduler.pop_next();
        let id = scheduler.schedule(ms(10), EventClass::Arrival, 2);
        assert_eq!(id.time(), ms(50));
        assert_eq!(scheduler.peek_time(), Some(ms(50)));
    }
}
