use crate::error::{ConfigError, SimError};
use crate::network::{LinkId, QueueSignal, Topology};
use crate::recorder::TraceRecorders;
use crate::trace::SimulationReport;
use crate::transport::{ActionBuffer, MessageTransport, ProtocolSignal};
use crate::utilization::UtilizationAccumulator;
use crate::workload::{MessageDescriptor, StopSignal, WorkloadGenerator};
use bolt_sim_abstract::config::ns_to_secs;
use bolt_sim_abstract::{NodeId, Packet, ProtocolObserver, QueueDiscObserver, SimConfig};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::net::SocketAddrV4;
use tracing::{debug, info};

#[derive(Debug)]
pub enum EventType {
    /// A client application hands the next message to the transport.
    AppSend {
        generator: usize,
        message: MessageDescriptor,
    },
    PacketArrival {
        node: NodeId,
        packet: Packet,
    },
    TxComplete {
        link: LinkId,
    },
    AckArrival {
        packet: Packet,
    },
    /// The sender learns that `packet` was dropped.
    LossNotice {
        packet: Packet,
    },
    RetransmitTimeout {
        src: SocketAddrV4,
        msg_id: u32,
    },
}

#[derive(Debug)]
struct Event {
    time: u64,
    event_type: EventType,
    id: u64, // Unique ID to differentiate events at same time
}

// Custom Ord for Min-Heap (smallest time pops first)
impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.id == other.id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse comparison for time: smallest time is Greater in BinaryHeap.
        // Equal times pop in scheduling order.
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Single-threaded event loop over the dumbbell. Observers are called
/// synchronously from the loop, so sinks and the accumulator need no locking.
pub struct Simulator {
    time: u64,
    event_queue: BinaryHeap<Event>,
    event_id_counter: u64,
    events_processed: u64,

    config: SimConfig,
    topology: Topology,
    transport: MessageTransport,
    generators: Vec<WorkloadGenerator>,
    stop: StopSignal,
    initialized: bool,

    queue_observers: Vec<Box<dyn QueueDiscObserver>>,
    protocol_observers: Vec<Box<dyn ProtocolObserver>>,
    accumulator: UtilizationAccumulator,

    packets_sent: u64,
    packets_dropped: u64,
}

impl Simulator {
    pub fn new(config: SimConfig) -> Result<Self, ConfigError> {
        if !(config.duration_secs > 0.0) {
            return Err(ConfigError::InvalidDuration(config.duration_secs));
        }
        let topology = Topology::dumbbell(&config)?;
        let transport = MessageTransport::new(config.bdp_bytes, config.mtu)?;
        let accumulator =
            UtilizationAccumulator::new(config.start_time_ns(), config.stop_time_ns());

        Ok(Self {
            time: 0,
            event_queue: BinaryHeap::new(),
            event_id_counter: 0,
            events_processed: 0,
            config,
            topology,
            transport,
            generators: Vec::new(),
            stop: StopSignal::new(),
            initialized: false,
            queue_observers: Vec::new(),
            protocol_observers: Vec::new(),
            accumulator,
            packets_sent: 0,
            packets_dropped: 0,
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Flag shared with every workload generator of this run.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn add_workload(&mut self, generator: WorkloadGenerator) {
        self.generators.push(generator);
    }

    pub fn attach_queue_observer(&mut self, observer: Box<dyn QueueDiscObserver>) {
        self.queue_observers.push(observer);
    }

    pub fn attach_protocol_observer(&mut self, observer: Box<dyn ProtocolObserver>) {
        self.protocol_observers.push(observer);
    }

    pub fn attach_recorders(&mut self, recorders: TraceRecorders) {
        self.queue_observers.extend(recorders.queue_observers);
        self.protocol_observers.extend(recorders.protocol_observers);
    }

    pub fn current_time(&self) -> u64 {
        self.time
    }

    pub fn peek_next_event_time(&self) -> Option<u64> {
        self.event_queue.peek().map(|e| e.time)
    }

    fn push_event(&mut self, time: u64, event_type: EventType) {
        self.event_queue.push(Event {
            time,
            event_type,
            id: self.event_id_counter,
        });
        self.event_id_counter += 1;
    }

    /// Schedule the first message of every generator.
    pub fn init(&mut self) {
        if self.initialized {
            return;
        }
        self.initialized = true;
        for idx in 0..self.generators.len() {
            self.schedule_next_message(idx);
        }
    }

    fn schedule_next_message(&mut self, generator: usize) {
        if let Some(message) = self.generators[generator].generate_next() {
            self.push_event(message.at_ns, EventType::AppSend { generator, message });
        }
    }

    /// Process the next event. Returns false once the queue is empty.
    pub fn step(&mut self) -> Result<bool, SimError> {
        let event = match self.event_queue.pop() {
            Some(e) => e,
            None => return Ok(false),
        };

        self.time = event.time;
        self.events_processed += 1;
        debug!("Processing event at {}: {:?}", self.time, event.event_type);

        match event.event_type {
            EventType::AppSend { generator, message } => {
                let mut buffer = ActionBuffer::default();
                self.transport.send_message(self.time, &message, &mut buffer);
                self.process_actions(buffer)?;
                self.schedule_next_message(generator);
            }
            EventType::PacketArrival { node, packet } => {
                if Topology::address(node) == Some(*packet.dst.ip()) {
                    let mut buffer = ActionBuffer::default();
                    self.transport.on_data(self.time, &packet, &mut buffer);
                    self.process_actions(buffer)?;
                } else {
                    self.forward(node, packet)?;
                }
            }
            EventType::TxComplete { link } => {
                self.topology.link_mut(link).busy = false;
                self.start_transmission(link)?;
            }
            EventType::AckArrival { packet } => {
                let mut buffer = ActionBuffer::default();
                self.transport.on_ack(self.time, &packet, &mut buffer);
                self.process_actions(buffer)?;
            }
            EventType::LossNotice { packet } => {
                let mut buffer = ActionBuffer::default();
                self.transport.on_loss(self.time, &packet, &mut buffer);
                self.process_actions(buffer)?;
            }
            EventType::RetransmitTimeout { src, msg_id } => {
                let mut buffer = ActionBuffer::default();
                self.transport.on_timeout(self.time, src, msg_id, &mut buffer);
                self.process_actions(buffer)?;
            }
        }
        Ok(true)
    }

    /// Run up to and including `stop_ns`, then stop the generators and flush
    /// every observer.
    pub fn run_until(&mut self, stop_ns: u64) -> Result<(), SimError> {
        self.init();
        info!(
            "Running until {:.6}s with {} workload(s)",
            ns_to_secs(stop_ns),
            self.generators.len()
        );
        while self.peek_next_event_time().is_some_and(|t| t <= stop_ns) {
            self.step()?;
        }
        self.time = self.time.max(stop_ns);
        self.stop.stop();
        self.flush_observers()?;
        info!(
            "Stopped at {:.6}s after {} events, {} events pending",
            ns_to_secs(self.time),
            self.events_processed,
            self.event_queue.len()
        );
        Ok(())
    }

    /// Run the configured measurement window.
    pub fn run(&mut self) -> Result<(), SimError> {
        let stop_ns = self.config.stop_time_ns();
        self.run_until(stop_ns)
    }

    pub fn export_report(&self) -> SimulationReport {
        SimulationReport {
            config: self.config.clone(),
            duration_ns: self.time,
            events_processed: self.events_processed,
            messages_started: self.transport.messages_started(),
            messages_completed: self.transport.messages_completed(),
            packets_sent: self.packets_sent,
            packets_dropped: self.packets_dropped,
            packets_retransmitted: self.transport.packets_retransmitted(),
            total_bytes_received: self.accumulator.total_bytes_received(),
            last_arrival_time: self.accumulator.last_arrival_time(),
            utilization: self.accumulator.finalize(),
        }
    }

    fn flush_observers(&mut self) -> Result<(), SimError> {
        for observer in &mut self.queue_observers {
            observer.flush()?;
        }
        for observer in &mut self.protocol_observers {
            observer.flush()?;
        }
        Ok(())
    }

    fn process_actions(&mut self, buffer: ActionBuffer) -> Result<(), SimError> {
        for signal in buffer.signals {
            self.emit_protocol_signal(&signal)?;
        }

        for packet in buffer.outgoing_packets {
            let Some(source) = Topology::node_for(*packet.src.ip()) else {
                debug!("No host owns {}, discarding packet", packet.src);
                continue;
            };
            self.packets_sent += 1;
            self.forward(source, packet)?;
        }

        for timer in buffer.timers {
            self.push_event(
                timer.at_ns,
                EventType::RetransmitTimeout {
                    src: timer.src,
                    msg_id: timer.msg_id,
                },
            );
        }

        // The reverse path carries only acks and is modelled as propagation.
        for ack in buffer.acks {
            let delay = self.reverse_path_delay(&ack);
            self.push_event(self.time + delay, EventType::AckArrival { packet: ack });
        }
        Ok(())
    }

    fn emit_protocol_signal(&mut self, signal: &ProtocolSignal) -> Result<(), SimError> {
        let now = self.time;
        match signal {
            ProtocolSignal::MsgBegin(msg) => {
                for observer in &mut self.protocol_observers {
                    observer.on_msg_begin(now, msg)?;
                }
            }
            ProtocolSignal::MsgAcked(msg) => {
                for observer in &mut self.protocol_observers {
                    observer.on_msg_acked(now, msg)?;
                }
            }
            ProtocolSignal::FlowStats(stats) => {
                for observer in &mut self.protocol_observers {
                    observer.on_flow_stats(now, stats)?;
                }
            }
            ProtocolSignal::DataArrival(arrival) => {
                self.accumulator.on_arrival_ns(
                    now,
                    arrival.payload_size,
                    arrival.protocol_header_size,
                    arrival.network_header_size,
                );
                for observer in &mut self.protocol_observers {
                    observer.on_data_arrival(now, arrival)?;
                }
            }
        }
        Ok(())
    }

    fn emit_queue_signals(
        &mut self,
        queue_id: &str,
        signals: &[QueueSignal],
    ) -> Result<(), SimError> {
        let now = self.time;
        for signal in signals {
            for observer in &mut self.queue_observers {
                match *signal {
                    QueueSignal::BytesInQueue { old, new } => {
                        observer.on_bytes_in_queue(now, queue_id, old, new)?
                    }
                    QueueSignal::PruTokens { old, new } => {
                        observer.on_pru_tokens(now, queue_id, old, new)?
                    }
                }
            }
        }
        Ok(())
    }

    /// Hand `packet` to the egress queue at `at` towards its destination.
    fn forward(&mut self, at: NodeId, packet: Packet) -> Result<(), SimError> {
        let Some(dst) = Topology::node_for(*packet.dst.ip()) else {
            debug!("No route to {}, discarding packet", packet.dst);
            return Ok(());
        };
        let Some(link_id) = self.topology.next_link(at, dst) else {
            debug!("No egress at {at} towards {dst}, discarding packet");
            return Ok(());
        };

        let mut signals = Vec::new();
        let link = self.topology.link_mut(link_id);
        let queue_id = link.queue.id();
        match link.queue.enqueue(packet, &mut signals) {
            Ok(()) => {
                self.emit_queue_signals(queue_id, &signals)?;
                if !self.topology.link(link_id).busy {
                    self.start_transmission(link_id)?;
                }
            }
            Err(dropped) => {
                self.packets_dropped += 1;
                let delay = self.reverse_path_delay(&Packet::ack_for(&dropped));
                self.push_event(self.time + delay, EventType::LossNotice { packet: dropped });
            }
        }
        Ok(())
    }

    fn start_transmission(&mut self, link_id: LinkId) -> Result<(), SimError> {
        let mut signals = Vec::new();
        let link = self.topology.link_mut(link_id);
        let Some(packet) = link.queue.dequeue(&mut signals) else {
            return Ok(());
        };
        link.busy = true;
        let queue_id = link.queue.id();
        let tx_ns = link.tx_time_ns(packet.wire_size());
        let arrival_ns = self.time + tx_ns + link.delay_ns;
        let next_hop = link.to;

        self.emit_queue_signals(queue_id, &signals)?;
        self.push_event(self.time + tx_ns, EventType::TxComplete { link: link_id });
        self.push_event(
            arrival_ns,
            EventType::PacketArrival {
                node: next_hop,
                packet,
            },
        );
        Ok(())
    }

    /// Propagation delay for a packet travelling server -> client.
    fn reverse_path_delay(&self, packet: &Packet) -> u64 {
        match (
            Topology::node_for(*packet.dst.ip()),
            Topology::node_for(*packet.src.ip()),
        ) {
            (Some(client), Some(server)) => self.topology.path_delay_ns(client, server),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Simulator;
    use crate::workload::{SizeCdf, StopSignal, WorkloadGenerator, WorkloadSpec};
    use bolt_sim_abstract::{
        DataArrivalSignal, MessageSignal, NodeId, ProtocolObserver, QueueDiscObserver, SimConfig,
        TraceError,
    };
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::cell::RefCell;
    use std::net::SocketAddrV4;
    use std::rc::Rc;

    use crate::network::Topology;

    #[derive(Default)]
    struct Log {
        begins: Vec<(u64, u32)>,
        acked: Vec<(u64, u32)>,
        arrivals: u64,
        queue_changes: Vec<(u64, String, u32)>,
        flushed: u32,
    }

    struct Spy(Rc<RefCell<Log>>);

    impl ProtocolObserver for Spy {
        fn on_msg_begin(&mut self, now_ns: u64, msg: &MessageSignal) -> Result<(), TraceError> {
            self.0.borrow_mut().begins.push((now_ns, msg.msg_id));
            Ok(())
        }

        fn on_msg_acked(&mut self, now_ns: u64, msg: &MessageSignal) -> Result<(), TraceError> {
            self.0.borrow_mut().acked.push((now_ns, msg.msg_id));
            Ok(())
        }

        fn on_data_arrival(
            &mut self,
            _now_ns: u64,
            arrival: &DataArrivalSignal,
        ) -> Result<(), TraceError> {
            self.0.borrow_mut().arrivals += arrival.payload_size as u64;
            Ok(())
        }

        fn flush(&mut self) -> Result<(), TraceError> {
            self.0.borrow_mut().flushed += 1;
            Ok(())
        }
    }

    impl QueueDiscObserver for Spy {
        fn on_bytes_in_queue(
            &mut self,
            now_ns: u64,
            queue_id: &str,
            _old: u32,
            new: u32,
        ) -> Result<(), TraceError> {
            self.0
                .borrow_mut()
                .queue_changes
                .push((now_ns, queue_id.to_string(), new));
            Ok(())
        }

        fn flush(&mut self) -> Result<(), TraceError> {
            self.0.borrow_mut().flushed += 1;
            Ok(())
        }
    }

    struct Failing;

    impl ProtocolObserver for Failing {
        fn on_msg_begin(&mut self, _now_ns: u64, _msg: &MessageSignal) -> Result<(), TraceError> {
            Err(TraceError::Write {
                path: "broken.tr".into(),
                source: std::io::Error::other("disk full"),
            })
        }
    }

    fn endpoint(node: NodeId, port: u16) -> SocketAddrV4 {
        SocketAddrV4::new(Topology::address(node).unwrap(), port)
    }

    fn add_fixed_workload(sim: &mut Simulator, client: NodeId, server: NodeId, max: u64) {
        let config = sim.config().clone();
        let mut generator = WorkloadGenerator::new(
            endpoint(client, 2000),
            vec![endpoint(server, 1000)],
            config.link_rate_bps,
            config.start_time_ns(),
            StdRng::seed_from_u64(3),
            sim.stop_signal(),
        )
        .unwrap();
        generator
            .configure(WorkloadSpec::new(0.8, SizeCdf::fixed(125_000), 125_000.0, max).unwrap())
            .unwrap();
        sim.add_workload(generator);
    }

    fn short_config() -> SimConfig {
        SimConfig {
            duration_secs: 0.01,
            ..Default::default()
        }
    }

    #[test]
    fn delivers_whole_messages_and_flushes() {
        let log = Rc::new(RefCell::new(Log::default()));
        let mut sim = Simulator::new(short_config()).unwrap();
        sim.attach_protocol_observer(Box::new(Spy(log.clone())));
        sim.attach_queue_observer(Box::new(Spy(log.clone())));
        add_fixed_workload(&mut sim, NodeId::C1, NodeId::C3, 2);

        sim.run().unwrap();

        let log = log.borrow();
        assert_eq!(log.begins.len(), 2);
        assert_eq!(log.acked.len(), 2);
        assert_eq!(log.arrivals, 250_000);
        assert_eq!(log.flushed, 2);
        assert!(log.begins[0].0 >= 1_000_000_000);
        assert!(log.acked.iter().all(|&(t, _)| t <= sim.config().stop_time_ns()));

        // Observer sees each queue's changes in time order and ends empty.
        let bottleneck: Vec<_> = log
            .queue_changes
            .iter()
            .filter(|(_, q, _)| q == "S1-S2")
            .collect();
        assert!(bottleneck.windows(2).all(|w| w[0].0 <= w[1].0));
        assert_eq!(bottleneck.last().map(|c| c.2), Some(0));

        let report = sim.export_report();
        assert_eq!(report.messages_completed, 2);
        assert_eq!(report.packets_dropped, 0);
        assert!(report.utilization.bits_per_second().unwrap() > 0.0);
    }

    #[test]
    fn recorder_failure_aborts_run() {
        let mut sim = Simulator::new(short_config()).unwrap();
        sim.attach_protocol_observer(Box::new(Failing));
        add_fixed_workload(&mut sim, NodeId::C2, NodeId::C4, 1);
        assert!(sim.run().is_err());
    }

    #[test]
    fn run_without_workload_is_undefined() {
        let mut sim = Simulator::new(short_config()).unwrap();
        sim.run().unwrap();
        assert_eq!(sim.current_time(), sim.config().stop_time_ns());
        assert_eq!(
            sim.export_report().utilization,
            crate::utilization::Utilization::Undefined
        );
    }

    #[test]
    fn stop_signal_is_raised_at_end() {
        let mut sim = Simulator::new(short_config()).unwrap();
        let stop: StopSignal = sim.stop_signal();
        assert!(!stop.is_stopped());
        sim.run().unwrap();
        assert!(stop.is_stopped());
    }

    #[test]
    fn tiny_queues_drop_and_recover() {
        let config = SimConfig {
            queue_limit_packets: 4,
            ..short_config()
        };
        let log = Rc::new(RefCell::new(Log::default()));
        let mut sim = Simulator::new(config).unwrap();
        sim.attach_protocol_observer(Box::new(Spy(log.clone())));
        add_fixed_workload(&mut sim, NodeId::C1, NodeId::C3, 1);
        sim.run().unwrap();

        let report = sim.export_report();
        assert!(report.packets_dropped > 0);
        assert_eq!(report.packets_retransmitted, report.packets_dropped);
        assert_eq!(report.messages_completed, 1);
        assert_eq!(log.borrow().arrivals, 125_000);
    }

    #[test]
    fn rejects_non_positive_duration() {
        let config = SimConfig {
            duration_secs: 0.0,
            ..Default::default()
        };
        assert!(Simulator::new(config).is_err());
    }
}
