use anyhow::{Context, Result, anyhow};
use env_logger::Builder;
use log::{LevelFilter, debug, info, warn};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use sat_rx_simulator::simulation::trace::{ChannelSink, TraceChannel, TraceEvent};
use sat_rx_simulator::simulation::{ReceiverConfig, load_scenario, run_scenario};

const TRACE_CHANNEL_SIZE: usize = 1024;

struct Args {
    scenario_path: String,
    config_path: PathBuf,
}

fn parse_args() -> Result<Args> {
    let mut args = std::env::args().skip(1);
    let mut scenario_path = None;
    let mut config_path = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config_path = Some(PathBuf::from(args.next().ok_or_else(|| anyhow!("--config needs a path"))?)),
            _ if scenario_path.is_none() => scenario_path = Some(arg),
            _ => return Err(anyhow!("Unexpected argument: {}", arg)),
        }
    }
    let scenario_path = scenario_path.ok_or_else(|| anyhow!("Usage: sat-rx-simulator <scenario.json> [--config <config.toml>]"))?;
    let config_path = config_path.unwrap_or_else(|| ReceiverConfig::config_path_from_scenario(&scenario_path));
    Ok(Args { scenario_path, config_path })
}

fn event_name(event: &TraceEvent) -> &'static str {
    match event {
        TraceEvent::ReplicaReceived { .. } => "replica",
        TraceEvent::PayloadReceived { .. } => "payload",
        TraceEvent::SlottedAlohaReceived { .. } => "slotted_aloha",
        TraceEvent::DedicatedReceived { .. } => "dedicated",
        TraceEvent::CompositeSinr { .. } => "composite_sinr",
        TraceEvent::InterferenceDensity { .. } => "interference_density",
        TraceEvent::FrameResolved { .. } => "frame",
        TraceEvent::Load { .. } => "load",
        TraceEvent::Backoff { .. } => "backoff",
    }
}

fn main() -> Result<()> {
    // Logging setup
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("sat_rx_simulator"), LevelFilter::Debug)
        .parse_default_env()
        .init();

    info!("Starting up");

    let args = parse_args()?;
    let config = ReceiverConfig::load(&args.config_path)?;
    let scenario = load_scenario(&args.scenario_path, &config).with_context(|| format!("Scenario {}", args.scenario_path))?;
    let arrivals = scenario.arrivals(&config)?;
    info!(
        "Loaded {} arrivals for {} carrier(s) from {}",
        arrivals.len(),
        config.carriers.len(),
        args.scenario_path
    );

    let trace_channel: &'static TraceChannel<TRACE_CHANNEL_SIZE> = Box::leak(Box::new(TraceChannel::new()));

    // Run the simulation on a background thread while this one drains the trace channel
    let started = Instant::now();
    let simulation = thread::Builder::new()
        .name("simulation".to_string())
        .spawn(move || {
            let mut sink = ChannelSink::new(trace_channel);
            let report = run_scenario(&config, arrivals, &mut sink);
            (report, sink.dropped())
        })
        .context("Failed to spawn simulation thread")?;

    let mut trace_counts: BTreeMap<&'static str, u64> = BTreeMap::new();
    let drain = |counts: &mut BTreeMap<&'static str, u64>| {
        while let Ok(event) = trace_channel.try_receive() {
            if let TraceEvent::Backoff { time, update } = &event {
                debug!("{:?}: backoff update {:?}", time, update);
            }
            *counts.entry(event_name(&event)).or_default() += 1;
        }
    };
    while !simulation.is_finished() {
        drain(&mut trace_counts);
        thread::sleep(Duration::from_millis(1));
    }
    let (report, dropped) = simulation.join().map_err(|_| anyhow!("Simulation thread panicked"))?;
    drain(&mut trace_counts);

    if dropped > 0 {
        warn!("{} trace events dropped", dropped);
    }
    for (name, count) in &trace_counts {
        info!("Trace {}: {}", name, count);
    }
    info!(
        "Done in {:?}: sent {}, received {}, errors {}, collisions {}, frames {}, SIC passes {}, backoff updates {}",
        started.elapsed(),
        report.total_sent_bursts,
        report.total_received_packets,
        report.total_phy_errors,
        report.total_collisions,
        report.frames_processed,
        report.sic_passes,
        report.backoff_updates.len()
    );
    Ok(())
}
