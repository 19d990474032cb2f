//! Fixed-window message transport.
//!
//! Splits messages into MTU-sized packets, keeps at most one window of
//! bytes outstanding, and reports the signals the trace recorders and the
//! utilization accumulator subscribe to. No congestion control happens
//! here: the window stays at the configured bandwidth-delay product.

use crate::error::ConfigError;
use crate::workload::MessageDescriptor;
use bolt_sim_abstract::{
    BoltHeader, DataArrivalSignal, FlowStatsSignal, IPV4_HEADER_SIZE, MessageSignal, Packet, flags,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::SocketAddrV4;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolSignal {
    MsgBegin(MessageSignal),
    MsgAcked(MessageSignal),
    FlowStats(FlowStatsSignal),
    DataArrival(DataArrivalSignal),
}

/// Delay before a message with nothing in flight resends a lost packet.
pub const DEFAULT_RTO_NS: u64 = 100_000;

/// Asks the event loop to call `MessageTransport::on_timeout` at `at_ns`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetransmitTimer {
    pub src: SocketAddrV4,
    pub msg_id: u32,
    pub at_ns: u64,
}

/// Actions produced while the transport handles one event.
#[derive(Debug, Default)]
pub struct ActionBuffer {
    pub outgoing_packets: Vec<Packet>,
    pub acks: Vec<Packet>,
    pub signals: Vec<ProtocolSignal>,
    pub timers: Vec<RetransmitTimer>,
}

struct OutboundMessage {
    signal: MessageSignal,
    next_offset: u32,
    acked: u32,
    // offset -> payload length
    in_flight: BTreeMap<u32, u32>,
    lost: VecDeque<(u32, u32)>,
    timer_armed: bool,
}

impl OutboundMessage {
    /// Lost bytes still count against the window until they are resent.
    fn outstanding_bytes(&self) -> u32 {
        let in_flight: u32 = self.in_flight.values().sum();
        let lost: u32 = self.lost.iter().map(|&(_, len)| len).sum();
        in_flight + lost
    }
}

/// Fixed-window sender and receiver for every endpoint in the run.
///
/// Resends are clocked by acknowledgements: each ack releases at most twice
/// its bytes of lost payload. A message whose whole window was dropped has
/// no acks left to clock it and restarts one packet per `rto_ns`.
pub struct MessageTransport {
    window_bytes: u32,
    payload_per_packet: u32,
    rto_ns: u64,
    next_msg_id: HashMap<SocketAddrV4, u32>,
    outbound: HashMap<(SocketAddrV4, u32), OutboundMessage>,
    started: u64,
    completed: u64,
    retransmitted: u64,
}

impl MessageTransport {
    pub fn new(window_bytes: u32, mtu: u32) -> Result<Self, ConfigError> {
        let headers = BoltHeader::SERIALIZED_SIZE + IPV4_HEADER_SIZE;
        if mtu <= headers {
            return Err(ConfigError::MtuTooSmall { mtu, headers });
        }
        Ok(Self {
            window_bytes: window_bytes.max(1),
            payload_per_packet: mtu - headers,
            rto_ns: DEFAULT_RTO_NS,
            next_msg_id: HashMap::new(),
            outbound: HashMap::new(),
            started: 0,
            completed: 0,
            retransmitted: 0,
        })
    }

    pub fn with_rto_ns(mut self, rto_ns: u64) -> Self {
        self.rto_ns = rto_ns.max(1);
        self
    }

    pub fn messages_started(&self) -> u64 {
        self.started
    }

    pub fn messages_completed(&self) -> u64 {
        self.completed
    }

    pub fn packets_retransmitted(&self) -> u64 {
        self.retransmitted
    }

    /// Accept a message from the application and send its first window.
    pub fn send_message(
        &mut self,
        now_ns: u64,
        message: &MessageDescriptor,
        out: &mut ActionBuffer,
    ) -> u32 {
        let id = self.next_msg_id.entry(message.src).or_insert(0);
        let msg_id = *id;
        *id += 1;

        let signal = MessageSignal {
            size: message.size,
            src: message.src,
            dst: message.dst,
            msg_id,
        };
        out.signals.push(ProtocolSignal::MsgBegin(signal.clone()));
        self.started += 1;

        let mut outbound = OutboundMessage {
            signal,
            next_offset: 0,
            acked: 0,
            in_flight: BTreeMap::new(),
            lost: VecDeque::new(),
            timer_armed: false,
        };
        self.fill_window(now_ns, &mut outbound, out);
        self.outbound.insert((message.src, msg_id), outbound);
        msg_id
    }

    /// A data packet reached its destination host.
    pub fn on_data(&mut self, _now_ns: u64, packet: &Packet, out: &mut ActionBuffer) {
        out.signals
            .push(ProtocolSignal::DataArrival(DataArrivalSignal {
                src: packet.src,
                dst: packet.dst,
                msg_id: packet.header.msg_id,
                seq_no: packet.header.seq_no,
                payload_size: packet.payload_size,
                protocol_header_size: BoltHeader::SERIALIZED_SIZE,
                network_header_size: IPV4_HEADER_SIZE,
            }));
        out.acks.push(Packet::ack_for(packet));
    }

    /// An acknowledgement reached the sender.
    pub fn on_ack(&mut self, now_ns: u64, ack: &Packet, out: &mut ActionBuffer) {
        let key = (ack.dst, ack.header.msg_id);
        let Some(mut outbound) = self.outbound.remove(&key) else {
            debug!("Ack for unknown message {} at {}", ack.header.msg_id, ack.dst);
            return;
        };

        let freed = outbound.in_flight.remove(&ack.header.seq_no).unwrap_or(0);
        if freed > 0 {
            outbound.acked += freed;
            out.signals.push(ProtocolSignal::FlowStats(FlowStatsSignal {
                src: outbound.signal.src,
                dst: outbound.signal.dst,
                msg_id: outbound.signal.msg_id,
                cwnd: self.window_bytes,
                rtt: now_ns.saturating_sub(ack.sent_at_ns),
            }));
        }

        if outbound.acked >= outbound.signal.size {
            debug!(
                "Message {} from {} fully acknowledged",
                outbound.signal.msg_id, outbound.signal.src
            );
            out.signals.push(ProtocolSignal::MsgAcked(outbound.signal));
            self.completed += 1;
            return;
        }

        self.resend_lost(now_ns, &mut outbound, freed.saturating_mul(2), out);
        self.fill_window(now_ns, &mut outbound, out);
        self.outbound.insert(key, outbound);
    }

    /// The network dropped `packet`. Its payload waits for an ack, or for
    /// the restart timer when nothing of the message is left in flight.
    pub fn on_loss(&mut self, now_ns: u64, packet: &Packet, out: &mut ActionBuffer) {
        let key = (packet.src, packet.header.msg_id);
        let Some(outbound) = self.outbound.get_mut(&key) else {
            return;
        };
        if let Some(len) = outbound.in_flight.remove(&packet.header.seq_no) {
            outbound.lost.push_back((packet.header.seq_no, len));
        }
        if outbound.in_flight.is_empty() && !outbound.lost.is_empty() && !outbound.timer_armed {
            outbound.timer_armed = true;
            out.timers.push(RetransmitTimer {
                src: packet.src,
                msg_id: packet.header.msg_id,
                at_ns: now_ns + self.rto_ns,
            });
        }
    }

    /// Restart timer of message `msg_id` from `src` expired.
    pub fn on_timeout(
        &mut self,
        now_ns: u64,
        src: SocketAddrV4,
        msg_id: u32,
        out: &mut ActionBuffer,
    ) {
        let key = (src, msg_id);
        let Some(mut outbound) = self.outbound.remove(&key) else {
            return;
        };
        outbound.timer_armed = false;
        if outbound.in_flight.is_empty() {
            let budget = outbound.lost.front().map_or(0, |&(_, len)| len);
            self.resend_lost(now_ns, &mut outbound, budget, out);
        }
        self.outbound.insert(key, outbound);
    }

    fn resend_lost(
        &mut self,
        now_ns: u64,
        outbound: &mut OutboundMessage,
        mut budget: u32,
        out: &mut ActionBuffer,
    ) {
        while budget > 0 {
            let Some((offset, len)) = outbound.lost.pop_front() else {
                break;
            };
            budget = budget.saturating_sub(len);
            self.retransmitted += 1;
            self.transmit(now_ns, outbound, offset, len, out);
        }
    }

    fn fill_window(&self, now_ns: u64, outbound: &mut OutboundMessage, out: &mut ActionBuffer) {
        let size = outbound.signal.size;
        while outbound.outstanding_bytes() < self.window_bytes && outbound.next_offset < size {
            let offset = outbound.next_offset;
            let len = self.payload_per_packet.min(size - offset);
            outbound.next_offset += len;
            self.transmit(now_ns, outbound, offset, len, out);
        }
    }

    fn transmit(
        &self,
        now_ns: u64,
        outbound: &mut OutboundMessage,
        offset: u32,
        len: u32,
        out: &mut ActionBuffer,
    ) {
        let size = outbound.signal.size;
        let mut packet_flags = 0;
        if offset == 0 {
            packet_flags |= flags::FIRST;
        }
        if offset + len == size {
            packet_flags |= flags::LAST;
        }
        outbound.in_flight.insert(offset, len);
        out.outgoing_packets.push(Packet::new_data(
            outbound.signal.src,
            outbound.signal.dst,
            outbound.signal.msg_id,
            offset,
            len,
            packet_flags,
            now_ns,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn descriptor(size: u32) -> MessageDescriptor {
        MessageDescriptor {
            at_ns: 0,
            size,
            src: SocketAddrV4::new(Ipv4Addr::new(10, 1, 1, 1), 2000),
            dst: SocketAddrV4::new(Ipv4Addr::new(10, 1, 4, 2), 1000),
            index: 0,
        }
    }

    #[test]
    fn first_window_is_bounded() {
        let mut transport = MessageTransport::new(4000, 1500).unwrap();
        let mut out = ActionBuffer::default();
        let msg_id = transport.send_message(0, &descriptor(10_000), &mut out);
        assert_eq!(msg_id, 0);
        assert!(matches!(out.signals[0], ProtocolSignal::MsgBegin(_)));
        // 3 * 1448 = 4344 >= 4000, so the third packet closes the window.
        assert_eq!(out.outgoing_packets.len(), 3);
        assert_eq!(out.outgoing_packets[0].payload_size, 1448);
        assert!(out.outgoing_packets[0].header.is_first());
        assert!(!out.outgoing_packets[2].header.is_last());
    }

    #[test]
    fn message_ids_are_per_sender() {
        let mut transport = MessageTransport::new(550_000, 1500).unwrap();
        let mut out = ActionBuffer::default();
        assert_eq!(transport.send_message(0, &descriptor(100), &mut out), 0);
        assert_eq!(transport.send_message(0, &descriptor(100), &mut out), 1);
        let mut other = descriptor(100);
        other.src = SocketAddrV4::new(Ipv4Addr::new(10, 1, 2, 1), 2001);
        assert_eq!(transport.send_message(0, &other, &mut out), 0);
    }

    #[test]
    fn acks_complete_the_message() {
        let mut transport = MessageTransport::new(550_000, 1500).unwrap();
        let mut out = ActionBuffer::default();
        transport.send_message(100, &descriptor(3000), &mut out);
        let packets = std::mem::take(&mut out.outgoing_packets);
        assert_eq!(packets.len(), 3);
        assert!(packets[2].header.is_last());
        assert_eq!(packets[2].payload_size, 3000 - 2 * 1448);

        let mut receiver_out = ActionBuffer::default();
        for packet in &packets {
            transport.on_data(150, packet, &mut receiver_out);
        }
        assert_eq!(receiver_out.acks.len(), 3);
        let arrived: u32 = receiver_out
            .signals
            .iter()
            .map(|s| match s {
                ProtocolSignal::DataArrival(a) => a.payload_size,
                _ => 0,
            })
            .sum();
        assert_eq!(arrived, 3000);

        let mut ack_out = ActionBuffer::default();
        for ack in &receiver_out.acks {
            transport.on_ack(200, ack, &mut ack_out);
        }
        let stats: Vec<_> = ack_out
            .signals
            .iter()
            .filter_map(|s| match s {
                ProtocolSignal::FlowStats(stats) => Some(stats.rtt),
                _ => None,
            })
            .collect();
        assert_eq!(stats, vec![100, 100, 100]);
        assert!(matches!(
            ack_out.signals.last(),
            Some(ProtocolSignal::MsgAcked(MessageSignal { size: 3000, .. }))
        ));
        assert_eq!(transport.messages_completed(), 1);
        assert_eq!(transport.packets_retransmitted(), 0);
    }

    #[test]
    fn acks_open_the_window() {
        let mut transport = MessageTransport::new(1448, 1500).unwrap();
        let mut out = ActionBuffer::default();
        transport.send_message(0, &descriptor(2896), &mut out);
        assert_eq!(out.outgoing_packets.len(), 1);

        let mut ack_out = ActionBuffer::default();
        transport.on_ack(10, &Packet::ack_for(&out.outgoing_packets[0]), &mut ack_out);
        assert_eq!(ack_out.outgoing_packets.len(), 1);
        assert_eq!(ack_out.outgoing_packets[0].header.seq_no, 1448);
        assert!(ack_out.outgoing_packets[0].header.is_last());
    }

    #[test]
    fn loss_waits_for_the_restart_timer() {
        let mut transport = MessageTransport::new(1448, 1500).unwrap().with_rto_ns(1_000);
        let mut out = ActionBuffer::default();
        transport.send_message(0, &descriptor(2896), &mut out);
        let dropped = out.outgoing_packets.remove(0);

        let mut loss_out = ActionBuffer::default();
        transport.on_loss(50, &dropped, &mut loss_out);
        assert!(loss_out.outgoing_packets.is_empty());
        let timer = loss_out.timers[0];
        assert_eq!(timer.at_ns, 1_050);

        let mut timer_out = ActionBuffer::default();
        transport.on_timeout(timer.at_ns, timer.src, timer.msg_id, &mut timer_out);
        assert_eq!(timer_out.outgoing_packets.len(), 1);
        assert_eq!(timer_out.outgoing_packets[0].header.seq_no, 0);
        assert_eq!(timer_out.outgoing_packets[0].sent_at_ns, 1_050);
        assert_eq!(transport.packets_retransmitted(), 1);

        // Back in flight, so a stale expiry sends nothing.
        let mut again = ActionBuffer::default();
        transport.on_timeout(2_000, timer.src, timer.msg_id, &mut again);
        assert!(again.outgoing_packets.is_empty());
    }

    #[test]
    fn acks_clock_out_lost_payload() {
        let mut transport = MessageTransport::new(2 * 1448, 1500).unwrap();
        let mut out = ActionBuffer::default();
        transport.send_message(0, &descriptor(3 * 1448), &mut out);
        assert_eq!(out.outgoing_packets.len(), 2);

        let mut loss_out = ActionBuffer::default();
        transport.on_loss(20, &out.outgoing_packets[0], &mut loss_out);
        // The second packet is still in flight, so no timer is needed.
        assert!(loss_out.timers.is_empty());
        assert!(loss_out.outgoing_packets.is_empty());

        let mut ack_out = ActionBuffer::default();
        transport.on_ack(40, &Packet::ack_for(&out.outgoing_packets[1]), &mut ack_out);
        let seqs: Vec<u32> = ack_out
            .outgoing_packets
            .iter()
            .map(|p| p.header.seq_no)
            .collect();
        assert_eq!(seqs, vec![0, 2 * 1448]);
        assert!(ack_out.outgoing_packets[0].header.is_first());
        assert!(ack_out.outgoing_packets[1].header.is_last());
    }

    #[test]
    fn lost_bytes_hold_the_window() {
        let mut transport = MessageTransport::new(1448, 1500).unwrap();
        let mut out = ActionBuffer::default();
        transport.send_message(0, &descriptor(10 * 1448), &mut out);
        assert_eq!(out.outgoing_packets.len(), 1);

        let mut loss_out = ActionBuffer::default();
        transport.on_loss(10, &out.outgoing_packets[0], &mut loss_out);
        transport.on_loss(11, &out.outgoing_packets[0], &mut loss_out);
        assert!(loss_out.outgoing_packets.is_empty());
        assert_eq!(loss_out.timers.len(), 1);
    }

    #[test]
    fn rejects_tiny_mtu() {
        assert!(matches!(
            MessageTransport::new(1000, 52),
            Err(ConfigError::MtuTooSmall { .. })
        ));
    }
}
