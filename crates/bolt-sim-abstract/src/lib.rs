pub mod config;
pub mod error;
pub mod interface;
pub mod node;
pub mod packet;
pub mod record;
pub mod scenario;

pub use config::{CcMode, LinkDelays, SimConfig, TraceConfig, TracePaths};
pub use error::{ParseRecordError, TraceError};
pub use interface::{
    DataArrivalSignal, FlowStatsSignal, MessageSignal, ProtocolObserver, QueueDiscObserver,
};
pub use node::NodeId;
pub use packet::{BoltHeader, IPV4_HEADER_SIZE, Packet};
pub use packet::flags;
pub use record::{TraceCategory, TraceRecord};
pub use scenario::{CdfPoint, FlowSpec, Scenario, SimConfigOverride};
