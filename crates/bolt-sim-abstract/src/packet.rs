use serde::{Deserialize, Serialize};
use std::net::SocketAddrV4;

/// Header flags
pub mod flags {
    pub const DATA: u8 = 0x01;
    pub const ACK: u8 = 0x02;
    /// First packet of a message.
    pub const FIRST: u8 = 0x04;
    /// Last packet of a message.
    pub const LAST: u8 = 0x08;
}

/// Serialized size of an IPv4 header without options.
pub const IPV4_HEADER_SIZE: u32 = 20;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BoltHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub msg_id: u32,
    /// Byte offset of the payload within its message.
    pub seq_no: u32,
    pub flags: u8,
}

impl BoltHeader {
    /// Bytes this header occupies on the wire.
    pub const SERIALIZED_SIZE: u32 = 32;

    pub fn is_ack(&self) -> bool {
        self.flags & flags::ACK != 0
    }
    pub fn is_first(&self) -> bool {
        self.flags & flags::FIRST != 0
    }
    pub fn is_last(&self) -> bool {
        self.flags & flags::LAST != 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Packet {
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
    pub header: BoltHeader,
    pub payload_size: u32,
    /// Simulation time the sender handed this packet to the network.
    pub sent_at_ns: u64,
}

impl Packet {
    pub fn new_data(
        src: SocketAddrV4,
        dst: SocketAddrV4,
        msg_id: u32,
        seq_no: u32,
        payload_size: u32,
        flags: u8,
        sent_at_ns: u64,
    ) -> Self {
        Self {
            src,
            dst,
            header: BoltHeader {
                src_port: src.port(),
                dst_port: dst.port(),
                msg_id,
                seq_no,
                flags: flags::DATA | flags,
            },
            payload_size,
            sent_at_ns,
        }
    }

    /// Acknowledge `data`, travelling in the opposite direction.
    pub fn ack_for(data: &Packet) -> Self {
        Self {
            src: data.dst,
            dst: data.src,
            header: BoltHeader {
                src_port: data.header.dst_port,
                dst_port: data.header.src_port,
                msg_id: data.header.msg_id,
                seq_no: data.header.seq_no,
                flags: flags::ACK,
            },
            payload_size: 0,
            sent_at_ns: data.sent_at_ns,
        }
    }

    /// Payload plus protocol and network headers.
    pub fn wire_size(&self) -> u32 {
        self.payload_size + BoltHeader::SERIALIZED_SIZE + IPV4_HEADER_SIZE
    }
}
