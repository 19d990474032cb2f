//! Event recorders: observers that turn queue-discipline and transport
//! signals into trace lines, one sink per category.

use crate::sink::TraceSink;
use bolt_sim_abstract::{
    FlowStatsSignal, MessageSignal, ProtocolObserver, QueueDiscObserver, TraceConfig, TraceError,
    TracePaths, TraceRecord,
};
use tracing::debug;

pub fn queue_occupancy_record(now_ns: u64, queue_id: &str, byte_count: u32) -> TraceRecord {
    TraceRecord::QueueOccupancy {
        time_ns: now_ns,
        queue_id: queue_id.to_string(),
        byte_count,
    }
}

pub fn token_count_record(now_ns: u64, queue_id: &str, token_count: u16) -> TraceRecord {
    TraceRecord::TokenCount {
        time_ns: now_ns,
        queue_id: queue_id.to_string(),
        token_count,
    }
}

pub fn msg_begin_record(now_ns: u64, msg: &MessageSignal) -> TraceRecord {
    TraceRecord::MsgBegin {
        time_ns: now_ns,
        size: msg.size,
        src: msg.src,
        dst: msg.dst,
        msg_id: msg.msg_id,
    }
}

pub fn msg_end_record(now_ns: u64, msg: &MessageSignal) -> TraceRecord {
    TraceRecord::MsgEnd {
        time_ns: now_ns,
        size: msg.size,
        src: msg.src,
        dst: msg.dst,
        msg_id: msg.msg_id,
    }
}

pub fn flow_stat_record(now_ns: u64, stats: &FlowStatsSignal) -> TraceRecord {
    TraceRecord::FlowStat {
        time_ns: now_ns,
        src: stats.src,
        dst: stats.dst,
        msg_id: stats.msg_id,
        cwnd: stats.cwnd,
        rtt: stats.rtt,
    }
}

/// Writes `que` lines for the queues it is attached to.
pub struct QueueOccupancyRecorder {
    sink: TraceSink,
    queues: Vec<String>,
}

impl QueueOccupancyRecorder {
    pub fn new(sink: TraceSink) -> Self {
        Self {
            sink,
            queues: Vec::new(),
        }
    }

    pub fn attach(mut self, queue_id: &str) -> Self {
        self.queues.push(queue_id.to_string());
        self
    }
}

impl QueueDiscObserver for QueueOccupancyRecorder {
    fn on_bytes_in_queue(
        &mut self,
        now_ns: u64,
        queue_id: &str,
        _old: u32,
        new: u32,
    ) -> Result<(), TraceError> {
        if !self.queues.iter().any(|q| q == queue_id) {
            return Ok(());
        }
        self.sink
            .append(&queue_occupancy_record(now_ns, queue_id, new))
    }

    fn flush(&mut self) -> Result<(), TraceError> {
        debug!(
            "Flushing {} queue records to {}",
            self.sink.records_written(),
            self.sink.path().display()
        );
        self.sink.flush()
    }
}

/// Writes `pru` lines for the queues it is attached to.
pub struct PruTokenRecorder {
    sink: TraceSink,
    queues: Vec<String>,
}

impl PruTokenRecorder {
    pub fn new(sink: TraceSink) -> Self {
        Self {
            sink,
            queues: Vec::new(),
        }
    }

    pub fn attach(mut self, queue_id: &str) -> Self {
        self.queues.push(queue_id.to_string());
        self
    }
}

impl QueueDiscObserver for PruTokenRecorder {
    fn on_pru_tokens(
        &mut self,
        now_ns: u64,
        queue_id: &str,
        _old: u16,
        new: u16,
    ) -> Result<(), TraceError> {
        if !self.queues.iter().any(|q| q == queue_id) {
            return Ok(());
        }
        self.sink.append(&token_count_record(now_ns, queue_id, new))
    }

    fn flush(&mut self) -> Result<(), TraceError> {
        debug!(
            "Flushing {} token records to {}",
            self.sink.records_written(),
            self.sink.path().display()
        );
        self.sink.flush()
    }
}

/// Writes `+`/`-` lines for every message begin and acknowledgement.
pub struct MessageRecorder {
    sink: TraceSink,
}

impl MessageRecorder {
    pub fn new(sink: TraceSink) -> Self {
        Self { sink }
    }
}

impl ProtocolObserver for MessageRecorder {
    fn on_msg_begin(&mut self, now_ns: u64, msg: &MessageSignal) -> Result<(), TraceError> {
        self.sink.append(&msg_begin_record(now_ns, msg))
    }

    fn on_msg_acked(&mut self, now_ns: u64, msg: &MessageSignal) -> Result<(), TraceError> {
        self.sink.append(&msg_end_record(now_ns, msg))
    }

    fn flush(&mut self) -> Result<(), TraceError> {
        self.sink.flush()
    }
}

pub struct FlowStatsRecorder {
    sink: TraceSink,
}

impl FlowStatsRecorder {
    pub fn new(sink: TraceSink) -> Self {
        Self { sink }
    }
}

impl ProtocolObserver for FlowStatsRecorder {
    fn on_flow_stats(&mut self, now_ns: u64, stats: &FlowStatsSignal) -> Result<(), TraceError> {
        self.sink.append(&flow_stat_record(now_ns, stats))
    }

    fn flush(&mut self) -> Result<(), TraceError> {
        self.sink.flush()
    }
}

/// The recorders enabled for a run, ready to be registered on a simulator.
#[derive(Default)]
pub struct TraceRecorders {
    pub queue_observers: Vec<Box<dyn QueueDiscObserver>>,
    pub protocol_observers: Vec<Box<dyn ProtocolObserver>>,
}

impl TraceRecorders {
    /// Create one sink per enabled category. Queue-occupancy lines are
    /// recorded for `occupancy_queues`, token lines for `token_queues`.
    pub fn create(
        paths: &TracePaths,
        traces: &TraceConfig,
        occupancy_queues: &[&str],
        token_queues: &[&str],
    ) -> Result<Self, TraceError> {
        let mut recorders = Self::default();

        if traces.queues {
            let recorder = occupancy_queues.iter().fold(
                QueueOccupancyRecorder::new(TraceSink::create(&paths.queue_occupancy)?),
                |recorder, queue| recorder.attach(queue),
            );
            recorders.queue_observers.push(Box::new(recorder));
        }
        if traces.pru_tokens {
            let recorder = token_queues.iter().fold(
                PruTokenRecorder::new(TraceSink::create(&paths.pru_tokens)?),
                |recorder, queue| recorder.attach(queue),
            );
            recorders.queue_observers.push(Box::new(recorder));
        }
        if traces.messages {
            recorders
                .protocol_observers
                .push(Box::new(MessageRecorder::new(TraceSink::create(
                    &paths.messages,
                )?)));
        }
        if traces.flow_stats {
            recorders
                .protocol_observers
                .push(Box::new(FlowStatsRecorder::new(TraceSink::create(
                    &paths.flow_stats,
                )?)));
        }

        Ok(recorders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn msg() -> MessageSignal {
        MessageSignal {
            size: 125_000,
            src: SocketAddrV4::new(Ipv4Addr::new(10, 1, 2, 1), 2001),
            dst: SocketAddrV4::new(Ipv4Addr::new(10, 1, 5, 2), 1001),
            msg_id: 1,
        }
    }

    #[test]
    fn queue_recorder_ignores_unattached_queues() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.qlen");
        let mut recorder =
            QueueOccupancyRecorder::new(TraceSink::create(&path).unwrap()).attach("S1-S2");

        recorder.on_bytes_in_queue(10, "S1-S2", 0, 1500).unwrap();
        recorder.on_bytes_in_queue(11, "C1-S1", 0, 1500).unwrap();
        recorder.on_bytes_in_queue(12, "S1-S2", 1500, 0).unwrap();
        QueueDiscObserver::flush(&mut recorder).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "que 10 S1-S2 1500\nque 12 S1-S2 0\n");
    }

    #[test]
    fn token_recorder_writes_new_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.pru");
        let mut recorder = PruTokenRecorder::new(TraceSink::create(&path).unwrap()).attach("S1-S2");

        recorder.on_pru_tokens(3, "S1-S2", 0, 1).unwrap();
        recorder.on_bytes_in_queue(4, "S1-S2", 0, 1500).unwrap();
        QueueDiscObserver::flush(&mut recorder).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "pru 3 S1-S2 1\n");
    }

    #[test]
    fn message_recorder_writes_begin_and_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.tr");
        let mut recorder = MessageRecorder::new(TraceSink::create(&path).unwrap());

        recorder.on_msg_begin(100, &msg()).unwrap();
        recorder.on_msg_acked(250, &msg()).unwrap();
        ProtocolObserver::flush(&mut recorder).unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "+ 100 125000 10.1.2.1:2001 10.1.5.2:1001 1\n\
             - 250 125000 10.1.2.1:2001 10.1.5.2:1001 1\n"
        );
    }

    #[test]
    fn write_failure_surfaces_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.log");
        let mut recorder = FlowStatsRecorder::new(TraceSink::create(&path).unwrap());
        let stats = FlowStatsSignal {
            src: msg().src,
            dst: msg().dst,
            msg_id: 1,
            cwnd: 550_000,
            rtt: 30_000,
        };
        recorder.on_flow_stats(20, &stats).unwrap();
        assert!(recorder.on_flow_stats(19, &stats).is_err());
    }

    #[test]
    fn creates_only_enabled_sinks() {
        let dir = tempfile::tempdir().unwrap();
        let paths = TracePaths::from_base(&dir.path().join("run").to_string_lossy());
        let traces = TraceConfig {
            messages: false,
            flow_stats: false,
            ..Default::default()
        };
        let recorders = TraceRecorders::create(&paths, &traces, &["S1-S2"], &["S1-S2"]).unwrap();

        assert_eq!(recorders.queue_observers.len(), 2);
        assert!(recorders.protocol_observers.is_empty());
        assert!(paths.queue_occupancy.exists());
        assert!(paths.pru_tokens.exists());
        assert!(!paths.messages.exists());
    }
}
