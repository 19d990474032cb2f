use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{Level, info, warn};

use bolt_sim_abstract::{CcMode, Scenario, SimConfig, TracePaths};
use bolt_sim_simulator::analyzer;
use bolt_sim_simulator::{RunSummary, scenario_runner};

#[derive(Parser, Debug)]
#[command(author, version, about = "Dumbbell congestion experiment simulator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one simulation and print the utilization summary.
    Run(RunArgs),
    /// Summarise the trace files of an earlier run.
    Analyze {
        /// Trace path without extension, e.g. outputs/bolt-simple-dumbbell_DEFAULT_0
        #[arg(long)]
        prefix: String,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Load a scenario from disk instead of the built-in dumbbell.
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Measurement window in seconds.
    #[arg(long)]
    duration: Option<f64>,

    /// Offered load as a fraction of the access link rate.
    #[arg(long)]
    workload: Option<f64>,

    #[arg(long)]
    cc_mode: Option<CcMode>,

    #[arg(long)]
    sim_idx: Option<u32>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Verbose logging; trace files get the `_debug` suffix.
    #[arg(long, default_value_t = false)]
    debug: bool,

    #[arg(long, default_value_t = false)]
    no_msg_trace: bool,
    #[arg(long, default_value_t = false)]
    no_queue_trace: bool,
    #[arg(long, default_value_t = false)]
    no_flow_stats_trace: bool,
    #[arg(long, default_value_t = false)]
    no_pru_trace: bool,

    /// Write a JSON report of the finished simulation.
    #[arg(long)]
    report_out: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let debug = matches!(&cli.command, Command::Run(args) if args.debug);
    init_logging(debug);
    info!("bolt-sim starting…");

    match cli.command {
        Command::Run(args) => run(args),
        Command::Analyze { prefix } => analyze(&prefix),
    }
}

fn init_logging(debug: bool) {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();
}

fn run(args: RunArgs) -> Result<()> {
    let scenario = match &args.scenario {
        Some(path) => scenario_runner::load_scenario(path)
            .with_context(|| format!("Failed to load scenario {}", path.display()))?,
        None => Scenario::default_dumbbell(),
    };
    let mut config = scenario_runner::resolve_config(&scenario, SimConfig::default());
    args.apply_to(&mut config);

    let summary = scenario_runner::run_scenario(&scenario, config)
        .with_context(|| format!("Simulation '{}' failed", scenario.name))?;
    print_summary(&summary);

    if let Some(report_path) = &args.report_out {
        write_report(report_path, &summary)?;
    }
    Ok(())
}

impl RunArgs {
    fn apply_to(&self, config: &mut SimConfig) {
        if let Some(v) = self.duration {
            config.duration_secs = v;
        }
        if let Some(v) = self.workload {
            config.workload = v;
        }
        if let Some(v) = self.cc_mode {
            config.cc_mode = v;
        }
        if let Some(v) = self.sim_idx {
            config.sim_idx = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        if let Some(v) = &self.output_dir {
            config.output_dir = v.clone();
        }
        if self.debug {
            config.debug = true;
        }
        if self.no_msg_trace {
            config.traces.messages = false;
        }
        if self.no_queue_trace {
            config.traces.queues = false;
        }
        if self.no_flow_stats_trace {
            config.traces.flow_stats = false;
        }
        if self.no_pru_trace {
            config.traces.pru_tokens = false;
        }
    }
}

fn print_summary(summary: &RunSummary) {
    println!("Total utilization: {}", summary.utilization);
    for (queue, stats) in &summary.token_stats {
        println!(
            "PRU Token stats for {queue}: Max={}, Avg={}, Count={}",
            stats.max, stats.average, stats.count
        );
    }
    println!(
        "Time taken by simulation: {} seconds",
        summary.wall_clock.as_secs()
    );
}

fn write_report(path: &Path, summary: &RunSummary) -> Result<()> {
    let data =
        serde_json::to_vec_pretty(summary).context("Failed to serialize simulation report")?;
    fs::write(path, &data)
        .with_context(|| format!("Failed to write report file {}", path.display()))?;
    Ok(())
}

fn analyze(prefix: &str) -> Result<()> {
    let paths = TracePaths::from_base(prefix);

    match analyzer::analyze_tokens(&paths.pru_tokens) {
        Ok(stats) => {
            for (queue, s) in &stats {
                println!(
                    "PRU Token stats for {queue}: Max={}, Avg={}, Count={}",
                    s.max, s.average, s.count
                );
            }
        }
        Err(err) => warn!("Skipping {}: {err}", paths.pru_tokens.display()),
    }

    match analyzer::analyze_queue_occupancy(&paths.queue_occupancy) {
        Ok(stats) => {
            for (queue, s) in &stats {
                println!(
                    "Queue occupancy for {queue}: Max={}B, Avg={}B, Count={}",
                    s.max, s.average, s.count
                );
            }
        }
        Err(err) => warn!("Skipping {}: {err}", paths.queue_occupancy.display()),
    }

    match analyzer::analyze_messages(&paths.messages) {
        Ok(flows) => {
            for (flow, timeline) in &flows {
                let completions: Vec<u64> = timeline
                    .messages
                    .iter()
                    .filter_map(|m| m.completion_ns())
                    .collect();
                println!(
                    "Messages {flow}: sent={}, completed={}, first_begin={}, last_end={}",
                    timeline.messages.len(),
                    completions.len(),
                    format_ns(timeline.first_begin_ns),
                    format_ns(timeline.last_end_ns),
                );
                for m in &timeline.messages {
                    if let Some(fct) = m.completion_ns() {
                        println!("  msg {} ({} B) completed in {} ns", m.msg_id, m.size, fct);
                    }
                }
            }
        }
        Err(err) => warn!("Skipping {}: {err}", paths.messages.display()),
    }

    match analyzer::analyze_flow_stats(&paths.flow_stats) {
        Ok(flows) => {
            for (flow, s) in &flows {
                println!(
                    "Flow stats {flow}: samples={}, mean_cwnd={:.1}, max_cwnd={}, mean_rtt={:.1}ns",
                    s.samples, s.mean_cwnd, s.max_cwnd, s.mean_rtt_ns
                );
            }
            let windows: Vec<f64> = flows.values().map(|s| s.mean_cwnd).collect();
            if let Some(index) = analyzer::jains_fairness(&windows) {
                println!("Jain's fairness over mean windows: {index:.4}");
            }
        }
        Err(err) => warn!("Skipping {}: {err}", paths.flow_stats.display()),
    }

    Ok(())
}

fn format_ns(ns: Option<u64>) -> String {
    ns.map_or_else(|| "-".to_string(), |t| t.to_string())
}
