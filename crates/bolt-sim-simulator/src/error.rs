use bolt_sim_abstract::{NodeId, TraceError};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Problems detected before any simulated time advances.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid size CDF: {0}")]
    InvalidCdf(String),

    #[error("workload fraction must lie in (0, 1], got {0}")]
    InvalidWorkload(f64),

    #[error("mean message size must be positive, got {0}")]
    InvalidMeanSize(f64),

    #[error("link rate must be non-zero")]
    ZeroLinkRate,

    #[error("MTU {mtu} leaves no room for payload after {headers} header bytes")]
    MtuTooSmall { mtu: u32, headers: u32 },

    #[error("queue limit of {limit} packets at MTU {mtu} overflows the byte counter")]
    QueueLimitTooLarge { limit: u32, mtu: u32 },

    #[error("duration must be positive, got {0}")]
    InvalidDuration(f64),

    #[error("flow {client} -> {server} is not a client-to-server route")]
    InvalidRoute { client: NodeId, server: NodeId },

    #[error("flow from {0} declares neither a message size nor a size CDF")]
    MissingSize(NodeId),

    #[error("failed to create output directory {}: {source}", path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read scenario {}: {source}", path.display())]
    ScenarioRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse scenario: {0}")]
    ScenarioParse(#[from] toml::de::Error),
}

#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Trace(#[from] TraceError),

    #[error("failed to analyze trace {}: {source}", path.display())]
    Analysis {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
