//! Fire-and-forget trace outputs of the reception core.
//!
//! Carriers report what happened to every burst through a [`TraceSink`]
//! passed in by the caller. Sinks never block and never fail the
//! simulation: a full channel simply drops the event.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::warn;

use super::load_control::{BackoffUpdate, LoadSample};
use super::types::{AccessMode, SimTime};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TraceEvent {
    /// One CRDSA replica after frame processing.
    ReplicaReceived {
        time: SimTime,
        carrier_id: u32,
        burst_id: u64,
        sender_id: u32,
        slot_id: u16,
        has_collision: bool,
        decoded: bool,
    },
    /// One unique CRDSA payload after frame processing.
    PayloadReceived {
        time: SimTime,
        carrier_id: u32,
        sender_id: u32,
        packets: u32,
        decoded: bool,
    },
    /// Slotted ALOHA burst decision.
    SlottedAlohaReceived {
        time: SimTime,
        carrier_id: u32,
        burst_id: u64,
        sender_id: u32,
        has_collision: bool,
        phy_error: bool,
    },
    /// Dedicated access burst decision.
    DedicatedReceived {
        time: SimTime,
        carrier_id: u32,
        burst_id: u64,
        sender_id: u32,
        phy_error: bool,
    },
    /// Composite SINR (dB) a decision was made with.
    CompositeSinr {
        time: SimTime,
        carrier_id: u32,
        access: AccessMode,
        sinr_db: f64,
    },
    /// Interference power density at the end of a reception, in W/Hz.
    InterferenceDensity {
        time: SimTime,
        carrier_id: u32,
        density_w_hz: f64,
    },
    /// CRDSA SIC statistics of one frame.
    FrameResolved {
        time: SimTime,
        carrier_id: u32,
        replicas: usize,
        payloads: usize,
        decoded: usize,
        passes: u32,
    },
    Load { time: SimTime, sample: LoadSample },
    Backoff { time: SimTime, update: BackoffUpdate },
}

pub trait TraceSink {
    fn record(&mut self, event: TraceEvent);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TraceSink for NullSink {
    fn record(&mut self, _event: TraceEvent) {}
}

impl TraceSink for Vec<TraceEvent> {
    fn record(&mut self, event: TraceEvent) {
        self.push(event);
    }
}

/// Bounded channel a statistics consumer can drain.
pub type TraceChannel<const N: usize> = Channel<CriticalSectionRawMutex, TraceEvent, N>;

/// Sink feeding a [`TraceChannel`]. Events are dropped while the channel is full.
pub struct ChannelSink<'a, const N: usize> {
    channel: &'a TraceChannel<N>,
    dropped: u64,
}

impl<'a, const N: usize> ChannelSink<'a, N> {
    pub fn new(channel: &'a TraceChannel<N>) -> Self {
        Self { channel, dropped: 0 }
    }

    /// Events lost because the channel was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl<const N: usize> TraceSink for ChannelSink<'_, N> {
    fn record(&mut self, event: TraceEvent) {
        if self.channel.try_send(event).is_err() {
            if self.dropped == 0 {
                warn!("Trace channel full, dropping trace events");
            }
            self.dropped += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn density(value: f64) -> TraceEvent {
        TraceEvent::InterferenceDensity {
            time: SimTime::ZERO,
            carrier_id: 0,
            density_w_hz: value,
        }
    }

    #[test]
    fn channel_sink_drops_when_full() {
        let channel: TraceChannel<2> = Channel::new();
        let mut sink = ChannelSink::new(&channel);
        for i in 0..5 {
            sink.record(density(i as f64));
        }
        assert_eq!(sink.dropped(), 3);
        assert_eq!(channel.try_receive().ok(), Some(density(0.0)));
        assert_eq!(channel.try_receive().ok(), Some(density(1.0)));
        assert!(channel.try_receive().is_err());
    }

    #[test]
    fn vec_sink_keeps_order() {
        let mut sink: Vec<TraceEvent> = Vec::new();
        sink.record(density(1.0));
        sink.record(density(2.0));
        assert_eq!(sink, vec![density(1.0), density(2.0)]);
        NullSink.record(density(3.0));
    }
}
