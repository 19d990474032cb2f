use crate::error::TraceError;
use std::net::SocketAddrV4;

/// Payload of the message-begin and message-acked signals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSignal {
    pub size: u32,
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
    pub msg_id: u32,
}

/// Periodic snapshot of a connection's window and measured round-trip time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowStatsSignal {
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
    pub msg_id: u32,
    pub cwnd: u32,
    /// Round-trip time in simulator ticks (nanoseconds).
    pub rtt: u64,
}

/// A data packet handed to the receiving endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataArrivalSignal {
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
    pub msg_id: u32,
    pub seq_no: u32,
    pub payload_size: u32,
    pub protocol_header_size: u32,
    pub network_header_size: u32,
}

/// Listener for the signals a queue discipline exposes. Every queue
/// discipline in the topology reports to every registered listener; a
/// listener decides which queue ids it is attached to.
///
/// Listeners observe only. An error returned from a callback aborts the run.
pub trait QueueDiscObserver {
    /// Bytes held by queue `queue_id` changed from `old` to `new`.
    fn on_bytes_in_queue(
        &mut self,
        _now_ns: u64,
        _queue_id: &str,
        _old: u32,
        _new: u32,
    ) -> Result<(), TraceError> {
        Ok(())
    }

    /// PRU token counter of queue `queue_id` changed from `old` to `new`.
    fn on_pru_tokens(
        &mut self,
        _now_ns: u64,
        _queue_id: &str,
        _old: u16,
        _new: u16,
    ) -> Result<(), TraceError> {
        Ok(())
    }

    /// Called once when the run stops, before teardown.
    fn flush(&mut self) -> Result<(), TraceError> {
        Ok(())
    }
}

/// Listener for the signals the message transport exposes.
pub trait ProtocolObserver {
    fn on_msg_begin(&mut self, _now_ns: u64, _msg: &MessageSignal) -> Result<(), TraceError> {
        Ok(())
    }

    fn on_msg_acked(&mut self, _now_ns: u64, _msg: &MessageSignal) -> Result<(), TraceError> {
        Ok(())
    }

    fn on_flow_stats(&mut self, _now_ns: u64, _stats: &FlowStatsSignal) -> Result<(), TraceError> {
        Ok(())
    }

    fn on_data_arrival(
        &mut self,
        _now_ns: u64,
        _arrival: &DataArrivalSignal,
    ) -> Result<(), TraceError> {
        Ok(())
    }

    /// Called once when the run stops, before teardown.
    fn flush(&mut self) -> Result<(), TraceError> {
        Ok(())
    }
}
