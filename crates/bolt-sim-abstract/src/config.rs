use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Congestion-control mode handed to the transport. Only used here to pick
/// queue-discipline features and to name output files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CcMode {
    #[default]
    Default,
    Swift,
}

impl CcMode {
    /// PRU token accounting is only switched on in the default mode.
    pub fn pru_enabled(&self) -> bool {
        matches!(self, CcMode::Default)
    }
}

impl fmt::Display for CcMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CcMode::Default => f.write_str("DEFAULT"),
            CcMode::Swift => f.write_str("SWIFT"),
        }
    }
}

impl FromStr for CcMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEFAULT" => Ok(CcMode::Default),
            "SWIFT" => Ok(CcMode::Swift),
            other => Err(format!("unknown cc mode '{other}'")),
        }
    }
}

/// Which trace categories get a sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    pub messages: bool,
    pub queues: bool,
    pub flow_stats: bool,
    pub pru_tokens: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            messages: true,
            queues: true,
            flow_stats: true,
            pru_tokens: true,
        }
    }
}

/// One-way propagation delays of the five dumbbell links, in nanoseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkDelays {
    pub c1_s1_ns: u64,
    pub c2_s1_ns: u64,
    pub s1_s2_ns: u64,
    pub s2_c3_ns: u64,
    pub s2_c4_ns: u64,
}

impl Default for LinkDelays {
    fn default() -> Self {
        Self {
            c1_s1_ns: 10_000,
            c2_s1_ns: 2_000,
            s1_s2_ns: 2_000,
            s2_c3_ns: 10_000,
            s2_c4_ns: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Length of the measurement window after `start_time_secs`.
    pub duration_secs: f64,
    /// Applications start (and the measurement window opens) at this time.
    pub start_time_secs: f64,
    pub mtu: u32,
    pub bdp_bytes: u32,
    pub link_rate_bps: u64,
    /// Target fraction of link capacity offered by each client.
    pub workload: f64,
    pub cc_mode: CcMode,
    pub sim_idx: u32,
    pub seed: u64,
    pub debug: bool,
    pub queue_limit_packets: u32,
    pub output_dir: PathBuf,
    pub file_prefix: String,
    pub traces: TraceConfig,
    pub links: LinkDelays,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            duration_secs: 2.0,
            start_time_secs: 1.0,
            mtu: 1500,
            bdp_bytes: 550_000,
            link_rate_bps: 10_000_000_000,
            workload: 0.8,
            cc_mode: CcMode::Default,
            sim_idx: 0,
            seed: 0,
            debug: false,
            queue_limit_packets: 1000,
            output_dir: PathBuf::from("outputs"),
            file_prefix: "bolt-simple-dumbbell".to_string(),
            traces: TraceConfig::default(),
            links: LinkDelays::default(),
        }
    }
}

/// Output file locations for each trace category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TracePaths {
    pub queue_occupancy: PathBuf,
    pub pru_tokens: PathBuf,
    pub messages: PathBuf,
    pub flow_stats: PathBuf,
}

impl TracePaths {
    /// Derive every category path from a common base (path without extension).
    pub fn from_base(base: &str) -> Self {
        Self {
            queue_occupancy: PathBuf::from(format!("{base}.qlen")),
            pru_tokens: PathBuf::from(format!("{base}.pru")),
            messages: PathBuf::from(format!("{base}.tr")),
            flow_stats: PathBuf::from(format!("{base}.log")),
        }
    }
}

impl SimConfig {
    /// `<output_dir>/<prefix>_<ccMode>_<simIdx>`, or `_debug` in debug mode.
    pub fn trace_base(&self) -> PathBuf {
        let suffix = if self.debug {
            "debug".to_string()
        } else {
            self.sim_idx.to_string()
        };
        self.output_dir
            .join(format!("{}_{}_{}", self.file_prefix, self.cc_mode, suffix))
    }

    pub fn trace_paths(&self) -> TracePaths {
        TracePaths::from_base(&self.trace_base().to_string_lossy())
    }

    pub fn start_time_ns(&self) -> u64 {
        secs_to_ns(self.start_time_secs)
    }

    pub fn stop_time_ns(&self) -> u64 {
        secs_to_ns(self.start_time_secs + self.duration_secs)
    }

    /// Seed actually used for the run; each sim index gets its own stream.
    pub fn run_seed(&self) -> u64 {
        if self.debug {
            self.seed
        } else {
            self.seed.wrapping_add(self.sim_idx as u64)
        }
    }
}

pub const NANOS_PER_SEC: f64 = 1e9;

pub fn secs_to_ns(secs: f64) -> u64 {
    (secs * NANOS_PER_SEC).round() as u64
}

pub fn ns_to_secs(ns: u64) -> f64 {
    ns as f64 / NANOS_PER_SEC
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_paths_follow_naming_scheme() {
        let config = SimConfig {
            sim_idx: 3,
            ..Default::default()
        };
        let paths = config.trace_paths();
        assert_eq!(
            paths.pru_tokens,
            PathBuf::from("outputs/bolt-simple-dumbbell_DEFAULT_3.pru")
        );
        assert_eq!(
            paths.queue_occupancy,
            PathBuf::from("outputs/bolt-simple-dumbbell_DEFAULT_3.qlen")
        );

        let debug = SimConfig {
            debug: true,
            cc_mode: CcMode::Swift,
            ..Default::default()
        };
        assert_eq!(
            debug.trace_paths().messages,
            PathBuf::from("outputs/bolt-simple-dumbbell_SWIFT_debug.tr")
        );
    }

    #[test]
    fn window_bounds_in_nanoseconds() {
        let config = SimConfig::default();
        assert_eq!(config.start_time_ns(), 1_000_000_000);
        assert_eq!(config.stop_time_ns(), 3_000_000_000);
    }

    #[test]
    fn cc_mode_parses_case_insensitively() {
        assert_eq!("swift".parse::<CcMode>(), Ok(CcMode::Swift));
        assert_eq!("DEFAULT".parse::<CcMode>(), Ok(CcMode::Default));
        assert!("cubic".parse::<CcMode>().is_err());
        assert!(CcMode::Default.pru_enabled());
        assert!(!CcMode::Swift.pru_enabled());
    }
}
