//! Builds one run from a scenario: validates the configuration, wires the
//! workload generators and trace recorders onto a simulator, runs the
//! measurement window and summarises the results.

use crate::analyzer::{self, TokenStats};
use crate::engine::Simulator;
use crate::error::{ConfigError, SimError};
use crate::network::{TRACED_QUEUES, TRACED_TOKEN_QUEUES, Topology};
use crate::recorder::TraceRecorders;
use crate::trace::SimulationReport;
use crate::utilization::Utilization;
use crate::workload::{SizeCdf, StopSignal, WorkloadGenerator, WorkloadSpec};
use bolt_sim_abstract::{BoltHeader, FlowSpec, IPV4_HEADER_SIZE, NodeId, Scenario, SimConfig};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddrV4;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::info;

const CLIENT_BASE_PORT: u16 = 2000;
const SERVER_BASE_PORT: u16 = 1000;

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub scenario: String,
    pub report: SimulationReport,
    pub utilization: Utilization,
    /// Per-queue token statistics read back from the `.pru` trace.
    pub token_stats: BTreeMap<String, TokenStats>,
    #[serde(skip)]
    pub wall_clock: Duration,
}

pub fn load_scenario(path: &Path) -> Result<Scenario, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::ScenarioRead {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

/// Scenario defaults with `config` layered over them.
pub fn resolve_config(scenario: &Scenario, base: SimConfig) -> SimConfig {
    let mut config = base;
    scenario.config.apply_to(&mut config);
    config
}

pub fn validate_config(config: &SimConfig) -> Result<(), ConfigError> {
    if !(config.duration_secs.is_finite() && config.duration_secs > 0.0) {
        return Err(ConfigError::InvalidDuration(config.duration_secs));
    }
    if !(config.workload > 0.0 && config.workload <= 1.0) {
        return Err(ConfigError::InvalidWorkload(config.workload));
    }
    if config.link_rate_bps == 0 {
        return Err(ConfigError::ZeroLinkRate);
    }
    let headers = BoltHeader::SERIALIZED_SIZE + IPV4_HEADER_SIZE;
    if config.mtu <= headers {
        return Err(ConfigError::MtuTooSmall {
            mtu: config.mtu,
            headers,
        });
    }
    Ok(())
}

fn endpoint(node: NodeId, nodes: &[NodeId], base_port: u16) -> Option<SocketAddrV4> {
    let ip = Topology::address(node)?;
    let offset = nodes.iter().position(|&n| n == node)? as u16;
    Some(SocketAddrV4::new(ip, base_port + offset))
}

fn build_generator(
    flow: &FlowSpec,
    index: usize,
    config: &SimConfig,
    stop: StopSignal,
) -> Result<WorkloadGenerator, ConfigError> {
    let route_error = || ConfigError::InvalidRoute {
        client: flow.client,
        server: flow.server,
    };
    let src = endpoint(flow.client, &NodeId::CLIENTS, CLIENT_BASE_PORT).ok_or_else(route_error)?;
    let dst = endpoint(flow.server, &NodeId::SERVERS, SERVER_BASE_PORT).ok_or_else(route_error)?;

    let cdf = if !flow.size_cdf.is_empty() {
        SizeCdf::from_points(&flow.size_cdf)?
    } else if let Some(size) = flow.message_size {
        SizeCdf::new(vec![(1.0, size)])?
    } else {
        return Err(ConfigError::MissingSize(flow.client));
    };
    let mean = flow.mean_message_size.unwrap_or_else(|| cdf.mean());
    let workload = flow.workload.unwrap_or(config.workload);
    let spec = WorkloadSpec::new(workload, cdf, mean, flow.max_messages)?;

    let rng = StdRng::seed_from_u64(config.run_seed().wrapping_add(index as u64));
    let mut generator = WorkloadGenerator::new(
        src,
        vec![dst],
        config.link_rate_bps,
        config.start_time_ns(),
        rng,
        stop,
    )?;
    generator.configure(spec)?;
    Ok(generator)
}

/// Build a simulator for `scenario` with every flow's generator attached.
/// Trace recorders are not attached.
pub fn build_simulator(scenario: &Scenario, config: SimConfig) -> Result<Simulator, ConfigError> {
    validate_config(&config)?;
    let mut sim = Simulator::new(config)?;
    for (index, flow) in scenario.flows.iter().enumerate() {
        let generator = build_generator(flow, index, sim.config(), sim.stop_signal())?;
        sim.add_workload(generator);
    }
    Ok(sim)
}

/// Read the token sink of a finished run back. The sink was flushed by the
/// run, so failing to read it is an I/O error rather than a partial trace.
pub fn read_token_stats(path: &Path) -> Result<BTreeMap<String, TokenStats>, SimError> {
    analyzer::analyze_tokens(path).map_err(|source| SimError::Analysis {
        path: path.to_path_buf(),
        source,
    })
}

pub fn run_scenario(scenario: &Scenario, config: SimConfig) -> Result<RunSummary, SimError> {
    let wall_start = Instant::now();
    info!("Running Scenario: {}", scenario.name);
    if !scenario.description.is_empty() {
        info!("Description: {}", scenario.description);
    }

    let mut sim = build_simulator(scenario, config)?;
    let config = sim.config().clone();
    fs::create_dir_all(&config.output_dir).map_err(|source| ConfigError::OutputDir {
        path: config.output_dir.clone(),
        source,
    })?;

    let paths = config.trace_paths();
    let recorders =
        TraceRecorders::create(&paths, &config.traces, &TRACED_QUEUES, &TRACED_TOKEN_QUEUES)?;
    sim.attach_recorders(recorders);

    sim.run()?;
    let report = sim.export_report();
    let utilization = report.utilization;
    info!(
        "Delivered {} bytes, {} of {} messages completed",
        report.total_bytes_received, report.messages_completed, report.messages_started
    );

    let token_stats = if config.traces.pru_tokens {
        read_token_stats(&paths.pru_tokens)?
    } else {
        BTreeMap::new()
    };

    Ok(RunSummary {
        scenario: scenario.name.clone(),
        report,
        utilization,
        token_stats,
        wall_clock: wall_start.elapsed(),
    })
}
