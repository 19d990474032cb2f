//! Dumbbell topology: five forward links, each with a FIFO queue discipline
//! on its egress side.

use crate::error::ConfigError;
use bolt_sim_abstract::{NodeId, Packet, SimConfig};
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use tracing::debug;

/// Queue id of the shared S1 -> S2 egress.
pub const BOTTLENECK: &str = "S1-S2";

/// Queues whose occupancy is traced.
pub const TRACED_QUEUES: [&str; 3] = [BOTTLENECK, "S2-C3", "S2-C4"];

/// Queues whose PRU tokens are traced.
pub const TRACED_TOKEN_QUEUES: [&str; 1] = [BOTTLENECK];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(pub usize);

/// Change reported by a queue discipline while it handles a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueSignal {
    BytesInQueue { old: u32, new: u32 },
    PruTokens { old: u16, new: u16 },
}

/// Packet-limited FIFO with a byte counter and a PRU token counter.
///
/// Tokens are credit released by finishing messages: dequeuing the last
/// packet of a message adds one, dequeuing the first packet of a message
/// takes one if any are left.
#[derive(Debug)]
pub struct QueueDisc {
    id: &'static str,
    limit_packets: usize,
    packets: VecDeque<Packet>,
    bytes: u32,
    pru_enabled: bool,
    pru_tokens: u16,
    drops: u64,
}

impl QueueDisc {
    pub fn new(id: &'static str, limit_packets: usize, pru_enabled: bool) -> Self {
        Self {
            id,
            limit_packets,
            packets: VecDeque::new(),
            bytes: 0,
            pru_enabled,
            pru_tokens: 0,
            drops: 0,
        }
    }

    pub fn id(&self) -> &'static str {
        self.id
    }

    pub fn pru_tokens(&self) -> u16 {
        self.pru_tokens
    }

    pub fn drops(&self) -> u64 {
        self.drops
    }

    /// Returns the packet back if the queue is full.
    pub fn enqueue(
        &mut self,
        packet: Packet,
        signals: &mut Vec<QueueSignal>,
    ) -> Result<(), Packet> {
        if self.packets.len() >= self.limit_packets {
            self.drops += 1;
            debug!(
                "{} full, dropping msg {} seq {}",
                self.id, packet.header.msg_id, packet.header.seq_no
            );
            return Err(packet);
        }
        let old = self.bytes;
        self.bytes += packet.wire_size();
        self.packets.push_back(packet);
        signals.push(QueueSignal::BytesInQueue {
            old,
            new: self.bytes,
        });
        Ok(())
    }

    pub fn dequeue(&mut self, signals: &mut Vec<QueueSignal>) -> Option<Packet> {
        let packet = self.packets.pop_front()?;
        let old = self.bytes;
        self.bytes -= packet.wire_size();
        signals.push(QueueSignal::BytesInQueue {
            old,
            new: self.bytes,
        });

        if self.pru_enabled {
            let old = self.pru_tokens;
            if packet.header.is_first() && self.pru_tokens > 0 {
                self.pru_tokens -= 1;
            }
            if packet.header.is_last() {
                self.pru_tokens = self.pru_tokens.saturating_add(1);
            }
            if self.pru_tokens != old {
                signals.push(QueueSignal::PruTokens {
                    old,
                    new: self.pru_tokens,
                });
            }
        }
        Some(packet)
    }
}

#[derive(Debug)]
pub struct Link {
    pub name: &'static str,
    pub from: NodeId,
    pub to: NodeId,
    pub rate_bps: u64,
    pub delay_ns: u64,
    pub queue: QueueDisc,
    pub busy: bool,
}

impl Link {
    /// ceil(bytes * 8 / rate) in nanoseconds.
    pub fn tx_time_ns(&self, bytes: u32) -> u64 {
        let bits = bytes as u128 * 8;
        let rate = self.rate_bps as u128;
        let nanos = (bits * 1_000_000_000 + rate - 1) / rate;
        nanos.min(u64::MAX as u128) as u64
    }
}

pub struct Topology {
    links: Vec<Link>,
}

// (name, from, to, subnet)
const LINKS: [(&str, NodeId, NodeId, u8); 5] = [
    ("C1-S1", NodeId::C1, NodeId::S1, 1),
    ("C2-S1", NodeId::C2, NodeId::S1, 2),
    (BOTTLENECK, NodeId::S1, NodeId::S2, 3),
    ("S2-C3", NodeId::S2, NodeId::C3, 4),
    ("S2-C4", NodeId::S2, NodeId::C4, 5),
];

impl Topology {
    pub fn dumbbell(config: &SimConfig) -> Result<Self, ConfigError> {
        if config.link_rate_bps == 0 {
            return Err(ConfigError::ZeroLinkRate);
        }
        // A queued packet is never larger than the MTU.
        if config.queue_limit_packets as u64 * config.mtu as u64 > u32::MAX as u64 {
            return Err(ConfigError::QueueLimitTooLarge {
                limit: config.queue_limit_packets,
                mtu: config.mtu,
            });
        }
        let delays = &config.links;
        let delay_of = |name: &str| match name {
            "C1-S1" => delays.c1_s1_ns,
            "C2-S1" => delays.c2_s1_ns,
            "S2-C3" => delays.s2_c3_ns,
            "S2-C4" => delays.s2_c4_ns,
            _ => delays.s1_s2_ns,
        };

        let links = LINKS
            .iter()
            .map(|&(name, from, to, _)| Link {
                name,
                from,
                to,
                rate_bps: config.link_rate_bps,
                delay_ns: delay_of(name),
                queue: QueueDisc::new(
                    name,
                    config.queue_limit_packets as usize,
                    config.cc_mode.pru_enabled(),
                ),
                busy: false,
            })
            .collect();
        Ok(Self { links })
    }

    pub fn link(&self, id: LinkId) -> &Link {
        &self.links[id.0]
    }

    pub fn link_mut(&mut self, id: LinkId) -> &mut Link {
        &mut self.links[id.0]
    }

    /// Egress link at `at` towards server `dst`.
    pub fn next_link(&self, at: NodeId, dst: NodeId) -> Option<LinkId> {
        let name = match (at, dst) {
            (NodeId::C1, NodeId::C3 | NodeId::C4) => "C1-S1",
            (NodeId::C2, NodeId::C3 | NodeId::C4) => "C2-S1",
            (NodeId::S1, NodeId::C3 | NodeId::C4) => BOTTLENECK,
            (NodeId::S2, NodeId::C3) => "S2-C3",
            (NodeId::S2, NodeId::C4) => "S2-C4",
            _ => return None,
        };
        self.links.iter().position(|l| l.name == name).map(LinkId)
    }

    /// One-way propagation delay from `client` to `server`.
    pub fn path_delay_ns(&self, client: NodeId, server: NodeId) -> u64 {
        let mut at = client;
        let mut total = 0;
        while let Some(id) = self.next_link(at, server) {
            let link = self.link(id);
            total += link.delay_ns;
            at = link.to;
        }
        total
    }

    /// Host address: the client side of its access link, or the server side.
    pub fn address(node: NodeId) -> Option<Ipv4Addr> {
        LINKS.iter().find_map(|&(_, from, to, subnet)| {
            if from == node && node.is_client() {
                Some(Ipv4Addr::new(10, 1, subnet, 1))
            } else if to == node && node.is_server() {
                Some(Ipv4Addr::new(10, 1, subnet, 2))
            } else {
                None
            }
        })
    }

    pub fn node_for(addr: Ipv4Addr) -> Option<NodeId> {
        NodeId::CLIENTS
            .into_iter()
            .chain(NodeId::SERVERS)
            .find(|&node| Self::address(node) == Some(addr))
    }
}
