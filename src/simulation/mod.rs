//! Reception core of the satellite PHY simulation.
//!
//! Every receiving carrier decides which incoming bursts are decoded. It does
//! this by integrating interference over time and applying a collision
//! policy. For CRDSA frames it runs successive interference cancellation at
//! the end of each frame. The frame load feeds a per allocation channel load
//! controller that switches random access backoff parameters.
//!
//! ## Module Organization
//!
//! - `types`: Shared data structures (bursts, records, results, time)
//! - `signal_calculations`: Noise budget, SINR and link budget math
//! - `interference`: Per carrier interference timeline
//! - `waveform`: Waveform definitions and decode thresholds
//! - `elimination`: Perfect and residual interference elimination
//! - `collision`: Collision decision policies
//! - `frame_resolver`: CRDSA frame contention resolution (SIC)
//! - `load_control`: Dynamic load control state machine
//! - `carrier`: One receiving carrier tying the above together
//! - `scheduler`: Discrete event queue
//! - `trace`: Trace sinks
//! - `config`: Receiver configuration (TOML)
//! - `scenario`, `traffic`: Burst arrivals (JSON and generated traffic)
//! - `network`: Scenario driver
//!
//! ## Public API
//!
//! The main entry point is [`run_scenario`], which drives a list of burst
//! arrivals through the carriers of a [`ReceiverConfig`].

pub mod carrier;
pub mod collision;
pub mod config;
pub mod elimination;
pub mod frame_resolver;
pub mod interference;
pub mod load_control;
pub mod network;
pub mod scenario;
pub mod scheduler;
pub mod signal_calculations;
pub mod trace;
pub mod traffic;
pub mod types;
pub mod waveform;

pub use config::ReceiverConfig;
pub use network::{Simulation, SimulationReport, run_scenario};
pub use scenario::{Scenario, ScenarioLoadError, load_scenario};
pub use types::{BurstArrival, RxResult};
