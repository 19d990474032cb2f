use crate::error::ParseRecordError;
use serde::Serialize;
use std::fmt;
use std::net::SocketAddrV4;
use std::str::FromStr;

pub const QUEUE_TAG: &str = "que";
pub const TOKEN_TAG: &str = "pru";
pub const MSG_BEGIN_TAG: &str = "+";
pub const MSG_END_TAG: &str = "-";

/// Sink a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceCategory {
    QueueOccupancy,
    TokenCount,
    Messages,
    FlowStats,
}

/// One line of a trace file. Records are serialized the moment the
/// underlying signal fires and never retained afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TraceRecord {
    QueueOccupancy {
        time_ns: u64,
        queue_id: String,
        byte_count: u32,
    },
    TokenCount {
        time_ns: u64,
        queue_id: String,
        token_count: u16,
    },
    MsgBegin {
        time_ns: u64,
        size: u32,
        src: SocketAddrV4,
        dst: SocketAddrV4,
        msg_id: u32,
    },
    MsgEnd {
        time_ns: u64,
        size: u32,
        src: SocketAddrV4,
        dst: SocketAddrV4,
        msg_id: u32,
    },
    FlowStat {
        time_ns: u64,
        src: SocketAddrV4,
        dst: SocketAddrV4,
        msg_id: u32,
        cwnd: u32,
        rtt: u64,
    },
}

impl TraceRecord {
    pub fn time_ns(&self) -> u64 {
        match self {
            TraceRecord::QueueOccupancy { time_ns, .. }
            | TraceRecord::TokenCount { time_ns, .. }
            | TraceRecord::MsgBegin { time_ns, .. }
            | TraceRecord::MsgEnd { time_ns, .. }
            | TraceRecord::FlowStat { time_ns, .. } => *time_ns,
        }
    }

    pub fn category(&self) -> TraceCategory {
        match self {
            TraceRecord::QueueOccupancy { .. } => TraceCategory::QueueOccupancy,
            TraceRecord::TokenCount { .. } => TraceCategory::TokenCount,
            TraceRecord::MsgBegin { .. } | TraceRecord::MsgEnd { .. } => TraceCategory::Messages,
            TraceRecord::FlowStat { .. } => TraceCategory::FlowStats,
        }
    }
}

impl fmt::Display for TraceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceRecord::QueueOccupancy {
                time_ns,
                queue_id,
                byte_count,
            } => write!(f, "{QUEUE_TAG} {time_ns} {queue_id} {byte_count}"),
            TraceRecord::TokenCount {
                time_ns,
                queue_id,
                token_count,
            } => write!(f, "{TOKEN_TAG} {time_ns} {queue_id} {token_count}"),
            TraceRecord::MsgBegin {
                time_ns,
                size,
                src,
                dst,
                msg_id,
            } => write!(f, "{MSG_BEGIN_TAG} {time_ns} {size} {src} {dst} {msg_id}"),
            TraceRecord::MsgEnd {
                time_ns,
                size,
                src,
                dst,
                msg_id,
            } => write!(f, "{MSG_END_TAG} {time_ns} {size} {src} {dst} {msg_id}"),
            TraceRecord::FlowStat {
                time_ns,
                src,
                dst,
                msg_id,
                cwnd,
                rtt,
            } => write!(f, "{time_ns} {src} {dst} {msg_id} {cwnd} {rtt}"),
        }
    }
}

impl FromStr for TraceRecord {
    type Err = ParseRecordError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(&tag) = fields.first() else {
            return Err(ParseRecordError::Empty);
        };

        match tag {
            QUEUE_TAG => {
                expect_fields(&fields, 4)?;
                Ok(TraceRecord::QueueOccupancy {
                    time_ns: parse_field(fields[1], "time")?,
                    queue_id: fields[2].to_string(),
                    byte_count: parse_field(fields[3], "byte count")?,
                })
            }
            TOKEN_TAG => {
                expect_fields(&fields, 4)?;
                Ok(TraceRecord::TokenCount {
                    time_ns: parse_field(fields[1], "time")?,
                    queue_id: fields[2].to_string(),
                    token_count: parse_field(fields[3], "token count")?,
                })
            }
            MSG_BEGIN_TAG | MSG_END_TAG => {
                expect_fields(&fields, 6)?;
                let time_ns = parse_field(fields[1], "time")?;
                let size = parse_field(fields[2], "size")?;
                let src = parse_field(fields[3], "source endpoint")?;
                let dst = parse_field(fields[4], "destination endpoint")?;
                let msg_id = parse_field(fields[5], "message id")?;
                if tag == MSG_BEGIN_TAG {
                    Ok(TraceRecord::MsgBegin {
                        time_ns,
                        size,
                        src,
                        dst,
                        msg_id,
                    })
                } else {
                    Ok(TraceRecord::MsgEnd {
                        time_ns,
                        size,
                        src,
                        dst,
                        msg_id,
                    })
                }
            }
            // Flow-stat lines carry no tag and start with the timestamp.
            _ if tag.bytes().all(|b| b.is_ascii_digit()) => {
                expect_fields(&fields, 6)?;
                Ok(TraceRecord::FlowStat {
                    time_ns: parse_field(fields[0], "time")?,
                    src: parse_field(fields[1], "source endpoint")?,
                    dst: parse_field(fields[2], "destination endpoint")?,
                    msg_id: parse_field(fields[3], "message id")?,
                    cwnd: parse_field(fields[4], "congestion window")?,
                    rtt: parse_field(fields[5], "rtt")?,
                })
            }
            other => Err(ParseRecordError::UnknownTag(other.to_string())),
        }
    }
}

fn expect_fields(fields: &[&str], expected: usize) -> Result<(), ParseRecordError> {
    if fields.len() != expected {
        return Err(ParseRecordError::FieldCount {
            expected,
            found: fields.len(),
        });
    }
    Ok(())
}

fn parse_field<T: FromStr>(value: &str, field: &'static str) -> Result<T, ParseRecordError> {
    value.parse().map_err(|_| ParseRecordError::InvalidField {
        field,
        value: value.to_string(),
    })
}
