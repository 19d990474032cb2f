use crate::config::{CcMode, LinkDelays, SimConfig, TraceConfig};
use crate::node::NodeId;
use serde::Deserialize;
use std::path::PathBuf;

/// A run description loaded from TOML: config overrides plus the flows the
/// client applications generate.
#[derive(Deserialize, Debug, Clone)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: SimConfigOverride,
    pub flows: Vec<FlowSpec>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct SimConfigOverride {
    pub duration_secs: Option<f64>,
    pub start_time_secs: Option<f64>,
    pub mtu: Option<u32>,
    pub bdp_bytes: Option<u32>,
    pub link_rate_bps: Option<u64>,
    pub workload: Option<f64>,
    pub cc_mode: Option<CcMode>,
    pub sim_idx: Option<u32>,
    pub seed: Option<u64>,
    pub debug: Option<bool>,
    pub queue_limit_packets: Option<u32>,
    pub output_dir: Option<PathBuf>,
    pub file_prefix: Option<String>,
    pub traces: Option<TraceConfig>,
    pub links: Option<LinkDelays>,
}

impl SimConfigOverride {
    pub fn apply_to(&self, config: &mut SimConfig) {
        if let Some(v) = self.duration_secs {
            config.duration_secs = v;
        }
        if let Some(v) = self.start_time_secs {
            config.start_time_secs = v;
        }
        if let Some(v) = self.mtu {
            config.mtu = v;
        }
        if let Some(v) = self.bdp_bytes {
            config.bdp_bytes = v;
        }
        if let Some(v) = self.link_rate_bps {
            config.link_rate_bps = v;
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
        if let Some(v) = self.debug {
            config.debug = v;
        }
        if let Some(v) = self.queue_limit_packets {
            config.queue_limit_packets = v;
        }
        if let Some(v) = &self.output_dir {
            config.output_dir = v.clone();
        }
        if let Some(v) = &self.file_prefix {
            config.file_prefix = v.clone();
        }
        if let Some(v) = &self.traces {
            config.traces = v.clone();
        }
        if let Some(v) = &self.links {
            config.links = v.clone();
        }
    }
}

/// One (cumulative probability, size) entry of a message-size CDF.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct CdfPoint {
    pub probability: f64,
    pub size: u32,
}

/// Traffic generated by one client application towards one server.
#[derive(Deserialize, Debug, Clone)]
pub struct FlowSpec {
    pub client: NodeId,
    pub server: NodeId,
    /// Fixed message size in bytes. Ignored when `size_cdf` is non-empty.
    #[serde(default)]
    pub message_size: Option<u32>,
    #[serde(default)]
    pub size_cdf: Vec<CdfPoint>,
    /// Defaults to the expectation of the size distribution.
    #[serde(default)]
    pub mean_message_size: Option<f64>,
    pub max_messages: u64,
    /// Per-flow override of the run-wide workload fraction.
    #[serde(default)]
    pub workload: Option<f64>,
}

impl FlowSpec {
    pub fn fixed(client: NodeId, server: NodeId, message_size: u32, max_messages: u64) -> Self {
        Self {
            client,
            server,
            message_size: Some(message_size),
            size_cdf: Vec::new(),
            mean_message_size: None,
            max_messages,
            workload: None,
        }
    }
}

/// Fixed size of each message in the two-flow dumbbell experiment.
pub const DUMBBELL_MESSAGE_SIZE: u32 = 1000 * 1000 / 8;

impl Scenario {
    /// C1 sends one and C2 two fixed-size messages; both flows share S1-S2.
    pub fn default_dumbbell() -> Self {
        Self {
            name: "bolt-simple-dumbbell".to_string(),
            description: "C1->C3 and C2->C4 compete at the S1-S2 bottleneck".to_string(),
            config: SimConfigOverride::default(),
            flows: vec![
                FlowSpec::fixed(NodeId::C1, NodeId::C3, DUMBBELL_MESSAGE_SIZE, 1),
                FlowSpec::fixed(NodeId::C2, NodeId::C4, DUMBBELL_MESSAGE_SIZE, 2),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_only_touches_present_fields() {
        let mut config = SimConfig::default();
        let overrides = SimConfigOverride {
            duration_secs: Some(1.0),
            cc_mode: Some(CcMode::Swift),
            ..Default::default()
        };
        overrides.apply_to(&mut config);
        assert_eq!(config.duration_secs, 1.0);
        assert_eq!(config.cc_mode, CcMode::Swift);
        assert_eq!(config.mtu, 1500);
        assert_eq!(config.workload, 0.8);
    }

    #[test]
    fn default_dumbbell_flows() {
        let scenario = Scenario::default_dumbbell();
        assert_eq!(scenario.flows.len(), 2);
        assert_eq!(scenario.flows[0].message_size, Some(125_000));
        assert_eq!(scenario.flows[0].max_messages, 1);
        assert_eq!(scenario.flows[1].client, NodeId::C2);
        assert_eq!(scenario.flows[1].max_messages, 2);
    }
}
