use crate::utilization::Utilization;
use bolt_sim_abstract::SimConfig;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub config: SimConfig,
    pub duration_ns: u64,
    pub events_processed: u64,
    pub messages_started: u64,
    pub messages_completed: u64,
    pub packets_sent: u64,
    pub packets_dropped: u64,
    pub packets_retransmitted: u64,
    pub total_bytes_received: u64,
    pub last_arrival_time: Option<f64>,
    pub utilization: Utilization,
}
