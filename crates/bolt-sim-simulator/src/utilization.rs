use bolt_sim_abstract::config::{ns_to_secs, secs_to_ns};
use serde::Serialize;
use std::fmt;

/// Achieved throughput at the end of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Utilization {
    BitsPerSecond(f64),
    /// No data arrived inside the measurement window.
    Undefined,
}

impl Utilization {
    pub fn bits_per_second(&self) -> Option<f64> {
        match self {
            Utilization::BitsPerSecond(bps) => Some(*bps),
            Utilization::Undefined => None,
        }
    }

    pub fn gbps(&self) -> Option<f64> {
        self.bits_per_second().map(|bps| bps / 1e9)
    }
}

impl fmt::Display for Utilization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Utilization::BitsPerSecond(bps) => write!(f, "{}Gbps", bps / 1e9),
            Utilization::Undefined => f.write_str("undefined (no arrivals in window)"),
        }
    }
}

/// Counts delivered bytes (payload and headers) that arrive inside
/// `[.., window_end]`. Owned by a single run.
///
/// Times are kept on the simulation clock in nanoseconds so the window end
/// is exactly the instant the event loop stops at.
#[derive(Debug, Clone, Serialize)]
pub struct UtilizationAccumulator {
    start_ns: u64,
    measurement_window_end_ns: u64,
    total_bytes_received: u64,
    last_arrival_ns: Option<u64>,
}

impl UtilizationAccumulator {
    pub fn new(start_ns: u64, measurement_window_end_ns: u64) -> Self {
        Self {
            start_ns,
            measurement_window_end_ns,
            total_bytes_received: 0,
            last_arrival_ns: None,
        }
    }

    /// Window given in seconds, as in the run configuration.
    pub fn from_secs(start_time: f64, window_duration: f64) -> Self {
        Self::new(secs_to_ns(start_time), secs_to_ns(start_time + window_duration))
    }

    /// Arrivals after the window end are residual traffic and ignored.
    pub fn on_arrival_ns(
        &mut self,
        now_ns: u64,
        payload_size: u32,
        protocol_header_size: u32,
        network_header_size: u32,
    ) {
        if now_ns > self.measurement_window_end_ns {
            return;
        }
        self.total_bytes_received +=
            payload_size as u64 + protocol_header_size as u64 + network_header_size as u64;
        self.last_arrival_ns = Some(now_ns);
    }

    pub fn on_arrival(
        &mut self,
        current_time: f64,
        payload_size: u32,
        protocol_header_size: u32,
        network_header_size: u32,
    ) {
        self.on_arrival_ns(
            secs_to_ns(current_time),
            payload_size,
            protocol_header_size,
            network_header_size,
        );
    }

    pub fn total_bytes_received(&self) -> u64 {
        self.total_bytes_received
    }

    /// Latest counted arrival, in seconds.
    pub fn last_arrival_time(&self) -> Option<f64> {
        self.last_arrival_ns.map(ns_to_secs)
    }

    pub fn finalize(&self) -> Utilization {
        let Some(last_ns) = self.last_arrival_ns else {
            return Utilization::Undefined;
        };
        if last_ns <= self.start_ns {
            return Utilization::Undefined;
        }
        let elapsed = ns_to_secs(last_ns - self.start_ns);
        Utilization::BitsPerSecond(self.total_bytes_received as f64 * 8.0 / elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_arrivals_up_to_window_end() {
        let mut acc = UtilizationAccumulator::from_secs(1.0, 1.0);
        acc.on_arrival(1.5, 1448, 32, 20);
        acc.on_arrival(2.0, 1448, 32, 20);
        assert_eq!(acc.total_bytes_received(), 3000);
        assert_eq!(acc.last_arrival_time(), Some(2.0));

        acc.on_arrival(2.000001, 1448, 32, 20);
        assert_eq!(acc.total_bytes_received(), 3000);
        assert_eq!(acc.last_arrival_time(), Some(2.0));
    }

    #[test]
    fn throughput_uses_last_arrival() {
        let mut acc = UtilizationAccumulator::from_secs(1.0, 2.0);
        acc.on_arrival(1.25, 1_000_000, 0, 0);
        acc.on_arrival(1.5, 1_000_000, 0, 0);
        let utilization = acc.finalize();
        assert_eq!(utilization, Utilization::BitsPerSecond(32_000_000.0));
        assert_eq!(utilization.gbps(), Some(0.032));
    }

    #[test]
    fn no_arrivals_is_undefined() {
        let acc = UtilizationAccumulator::from_secs(1.0, 1.0);
        assert_eq!(acc.finalize(), Utilization::Undefined);
        assert_eq!(acc.finalize().bits_per_second(), None);
    }

    #[test]
    fn arrival_exactly_at_start_is_undefined() {
        let mut acc = UtilizationAccumulator::from_secs(1.0, 1.0);
        acc.on_arrival(1.0, 100, 32, 20);
        assert_eq!(acc.total_bytes_received(), 152);
        assert_eq!(acc.finalize(), Utilization::Undefined);
    }

    #[test]
    fn window_end_matches_the_stop_instant() {
        // 1.0 + d does not survive a round trip through nanoseconds for these.
        for d in [0.118, 0.122, 0.235] {
            let stop_ns = secs_to_ns(1.0 + d);
            let mut acc = UtilizationAccumulator::from_secs(1.0, d);
            acc.on_arrival_ns(stop_ns, 1448, 32, 20);
            assert_eq!(acc.total_bytes_received(), 1500, "duration {d}");
            acc.on_arrival_ns(stop_ns + 1, 1448, 32, 20);
            assert_eq!(acc.total_bytes_received(), 1500, "duration {d}");
        }
    }
}
