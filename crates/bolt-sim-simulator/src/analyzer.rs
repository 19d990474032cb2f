//! Post-run analysis of trace files.
//!
//! Every reader here tolerates partial files: lines that do not parse, or
//! that belong to another category, are skipped and the rest of the file is
//! still used. Only failing to open or read the file is an error.

use bolt_sim_abstract::TraceRecord;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::net::SocketAddrV4;
use std::path::Path;
use tracing::debug;

/// Per-queue statistics. `average` is the integer mean truncated toward
/// zero, in the counter's own width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats<T> {
    pub max: T,
    pub average: T,
    pub count: usize,
}

impl<T> QueueStats<T>
where
    T: Copy + Ord + Into<u64> + TryFrom<u64>,
{
    /// `None` for an empty sample set: such queues get no output row.
    pub fn from_samples(samples: &[T]) -> Option<Self> {
        let max = samples.iter().copied().max()?;
        let sum: u64 = samples.iter().map(|&v| v.into()).sum();
        let average = T::try_from(sum / samples.len() as u64).unwrap_or(max);
        Some(Self {
            max,
            average,
            count: samples.len(),
        })
    }
}

pub type TokenStats = QueueStats<u16>;
pub type OccupancyStats = QueueStats<u32>;

pub fn analyze_tokens(path: impl AsRef<Path>) -> io::Result<BTreeMap<String, TokenStats>> {
    analyze_tokens_from(open(path.as_ref())?)
}

/// Group `pru` samples by queue id, in file order, and summarise each queue.
pub fn analyze_tokens_from<R: BufRead>(reader: R) -> io::Result<BTreeMap<String, TokenStats>> {
    let samples = collect_records(reader, |record| match record {
        TraceRecord::TokenCount {
            queue_id,
            token_count,
            ..
        } => Some((queue_id, token_count)),
        _ => None,
    })?;
    Ok(summarise(samples))
}

pub fn analyze_queue_occupancy(
    path: impl AsRef<Path>,
) -> io::Result<BTreeMap<String, OccupancyStats>> {
    analyze_queue_occupancy_from(open(path.as_ref())?)
}

pub fn analyze_queue_occupancy_from<R: BufRead>(
    reader: R,
) -> io::Result<BTreeMap<String, OccupancyStats>> {
    let samples = collect_records(reader, |record| match record {
        TraceRecord::QueueOccupancy {
            queue_id,
            byte_count,
            ..
        } => Some((queue_id, byte_count)),
        _ => None,
    })?;
    Ok(summarise(samples))
}

/// Direction of traffic between two endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct FlowKey {
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.src, self.dst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageTiming {
    pub msg_id: u32,
    pub size: u32,
    pub begin_ns: u64,
    pub end_ns: Option<u64>,
}

impl MessageTiming {
    /// Completion time, if the message was acknowledged.
    pub fn completion_ns(&self) -> Option<u64> {
        self.end_ns.map(|end| end.saturating_sub(self.begin_ns))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlowTimeline {
    pub first_begin_ns: Option<u64>,
    pub last_end_ns: Option<u64>,
    pub messages: Vec<MessageTiming>,
}

pub fn analyze_messages(path: impl AsRef<Path>) -> io::Result<BTreeMap<FlowKey, FlowTimeline>> {
    analyze_messages_from(open(path.as_ref())?)
}

/// Pair `+` and `-` lines on (src, dst, msgId). An end without a begin is
/// dropped; a begin without an end stays incomplete.
pub fn analyze_messages_from<R: BufRead>(
    reader: R,
) -> io::Result<BTreeMap<FlowKey, FlowTimeline>> {
    let mut flows: BTreeMap<FlowKey, FlowTimeline> = BTreeMap::new();
    for_each_record(reader, |record| match record {
        TraceRecord::MsgBegin {
            time_ns,
            size,
            src,
            dst,
            msg_id,
        } => {
            let flow = flows.entry(FlowKey { src, dst }).or_default();
            flow.first_begin_ns = Some(flow.first_begin_ns.map_or(time_ns, |t| t.min(time_ns)));
            flow.messages.push(MessageTiming {
                msg_id,
                size,
                begin_ns: time_ns,
                end_ns: None,
            });
        }
        TraceRecord::MsgEnd {
            time_ns,
            src,
            dst,
            msg_id,
            ..
        } => {
            let Some(flow) = flows.get_mut(&FlowKey { src, dst }) else {
                debug!("Acknowledgement for unknown message {msg_id} from {src}");
                return;
            };
            if let Some(msg) = flow
                .messages
                .iter_mut()
                .find(|m| m.msg_id == msg_id && m.end_ns.is_none())
            {
                msg.end_ns = Some(time_ns);
                flow.last_end_ns = Some(flow.last_end_ns.map_or(time_ns, |t| t.max(time_ns)));
            }
        }
        _ => {}
    })?;
    Ok(flows)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FlowStatsSummary {
    pub samples: usize,
    pub mean_cwnd: f64,
    pub max_cwnd: u32,
    pub mean_rtt_ns: f64,
}

pub fn analyze_flow_stats(
    path: impl AsRef<Path>,
) -> io::Result<BTreeMap<FlowKey, FlowStatsSummary>> {
    analyze_flow_stats_from(open(path.as_ref())?)
}

pub fn analyze_flow_stats_from<R: BufRead>(
    reader: R,
) -> io::Result<BTreeMap<FlowKey, FlowStatsSummary>> {
    // (samples, cwnd sum, max cwnd, rtt sum)
    let mut totals: BTreeMap<FlowKey, (usize, u64, u32, u64)> = BTreeMap::new();
    for_each_record(reader, |record| {
        if let TraceRecord::FlowStat {
            src, dst, cwnd, rtt, ..
        } = record
        {
            let entry = totals.entry(FlowKey { src, dst }).or_default();
            entry.0 += 1;
            entry.1 += cwnd as u64;
            entry.2 = entry.2.max(cwnd);
            entry.3 = entry.3.saturating_add(rtt);
        }
    })?;

    Ok(totals
        .into_iter()
        .map(|(key, (samples, cwnd_sum, max_cwnd, rtt_sum))| {
            let n = samples as f64;
            (
                key,
                FlowStatsSummary {
                    samples,
                    mean_cwnd: cwnd_sum as f64 / n,
                    max_cwnd,
                    mean_rtt_ns: rtt_sum as f64 / n,
                },
            )
        })
        .collect())
}

/// Jain's fairness index `(Σx)² / (n·Σx²)`; 1.0 is perfectly fair.
pub fn jains_fairness(values: &[f64]) -> Option<f64> {
    match values.len() {
        0 => None,
        1 => Some(1.0),
        n => {
            let sum: f64 = values.iter().sum();
            let sum_squared: f64 = values.iter().map(|v| v * v).sum();
            if sum_squared == 0.0 {
                return Some(0.0);
            }
            Some(sum * sum / (n as f64 * sum_squared))
        }
    }
}

fn open(path: &Path) -> io::Result<BufReader<File>> {
    debug!("Reading trace from {}", path.display());
    File::open(path).map(BufReader::new)
}

fn for_each_record<R, F>(reader: R, mut visit: F) -> io::Result<()>
where
    R: BufRead,
    F: FnMut(TraceRecord),
{
    let mut skipped = 0usize;
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                skipped += 1;
                continue;
            }
            Err(err) => return Err(err),
        };
        match line.parse::<TraceRecord>() {
            Ok(record) => visit(record),
            Err(err) => {
                skipped += 1;
                debug!("Skipping trace line {line:?}: {err}");
            }
        }
    }
    if skipped > 0 {
        debug!("Skipped {skipped} malformed trace lines");
    }
    Ok(())
}

fn collect_records<R, T, F>(reader: R, mut extract: F) -> io::Result<BTreeMap<String, Vec<T>>>
where
    R: BufRead,
    F: FnMut(TraceRecord) -> Option<(String, T)>,
{
    let mut samples: BTreeMap<String, Vec<T>> = BTreeMap::new();
    for_each_record(reader, |record| {
        if let Some((queue_id, value)) = extract(record) {
            samples.entry(queue_id).or_default().push(value);
        }
    })?;
    Ok(samples)
}

fn summarise<T>(samples: BTreeMap<String, Vec<T>>) -> BTreeMap<String, QueueStats<T>>
where
    T: Copy + Ord + Into<u64> + TryFrom<u64>,
{
    samples
        .into_iter()
        .filter_map(|(queue_id, values)| {
            QueueStats::from_samples(&values).map(|stats| (queue_id, stats))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    #[test]
    fn token_stats_per_queue() {
        let trace = "pru 0 S1-S2 10\npru 5 S1-S2 20\npru 1 S2-C3 7\n";
        let stats = analyze_tokens_from(Cursor::new(trace)).unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(
            stats["S1-S2"],
            TokenStats {
                max: 20,
                average: 15,
                count: 2
            }
        );
        assert_eq!(
            stats["S2-C3"],
            TokenStats {
                max: 7,
                average: 7,
                count: 1
            }
        );
    }

    #[test]
    fn malformed_lines_do_not_disturb_valid_ones() {
        let trace = "pru 0 S1-S2 10\npru 3 S1-S2\npru x S1-S2 99\ngarbage\n\npru 5 S1-S2 20\n";
        let stats = analyze_tokens_from(Cursor::new(trace)).unwrap();
        assert_eq!(
            stats["S1-S2"],
            TokenStats {
                max: 20,
                average: 15,
                count: 2
            }
        );
    }

    #[test]
    fn average_truncates() {
        let trace = "pru 0 S1-S2 1\npru 1 S1-S2 2\n";
        let stats = analyze_tokens_from(Cursor::new(trace)).unwrap();
        assert_eq!(stats["S1-S2"].average, 1);

        let trace = "pru 0 Q 65535\npru 1 Q 65535\npru 2 Q 65534\n";
        let stats = analyze_tokens_from(Cursor::new(trace)).unwrap();
        assert_eq!(stats["Q"].average, 65534);
        assert_eq!(stats["Q"].max, 65535);
    }

    #[test]
    fn other_categories_are_not_token_samples() {
        let trace = "que 0 S1-S2 1500\n+ 1 100 10.1.1.1:2000 10.1.4.2:1000 0\n";
        assert!(analyze_tokens_from(Cursor::new(trace)).unwrap().is_empty());
        assert!(analyze_tokens_from(Cursor::new("")).unwrap().is_empty());
    }

    #[test]
    fn truncated_file_keeps_complete_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "pru 0 S1-S2 4\npru 9 S1-S2 8\npru 12 S1").unwrap();
        file.flush().unwrap();

        let stats = analyze_tokens(file.path()).unwrap();
        assert_eq!(
            stats["S1-S2"],
            TokenStats {
                max: 8,
                average: 6,
                count: 2
            }
        );
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(analyze_tokens(dir.path().join("absent.pru")).is_err());
    }

    #[test]
    fn occupancy_stats() {
        let trace = "que 0 S1-S2 1500\nque 2 S1-S2 3000\nque 3 S1-S2 0\nque 4 S2-C4 1500\n";
        let stats = analyze_queue_occupancy_from(Cursor::new(trace)).unwrap();
        assert_eq!(
            stats["S1-S2"],
            OccupancyStats {
                max: 3000,
                average: 1500,
                count: 3
            }
        );
        assert_eq!(stats["S2-C4"].count, 1);
    }

    #[test]
    fn message_timelines_pair_begin_and_end() {
        let trace = "\
+ 100 125000 10.1.2.1:2001 10.1.5.2:1001 0
+ 150 125000 10.1.2.1:2001 10.1.5.2:1001 1
- 400 125000 10.1.2.1:2001 10.1.5.2:1001 0
+ 120 125000 10.1.1.1:2000 10.1.4.2:1000 0
- 900 125000 10.1.1.1:2000 10.1.4.2:1000 7
";
        let flows = analyze_messages_from(Cursor::new(trace)).unwrap();
        assert_eq!(flows.len(), 2);

        let c2 = flows
            .iter()
            .find(|(key, _)| key.src.port() == 2001)
            .map(|(_, flow)| flow)
            .unwrap();
        assert_eq!(c2.first_begin_ns, Some(100));
        assert_eq!(c2.last_end_ns, Some(400));
        assert_eq!(c2.messages[0].completion_ns(), Some(300));
        assert_eq!(c2.messages[1].completion_ns(), None);

        let c1 = flows
            .iter()
            .find(|(key, _)| key.src.port() == 2000)
            .map(|(_, flow)| flow)
            .unwrap();
        assert_eq!(c1.last_end_ns, None);
    }

    #[test]
    fn flow_stats_summary() {
        let trace = "\
10 10.1.1.1:2000 10.1.4.2:1000 0 1000 40
20 10.1.1.1:2000 10.1.4.2:1000 0 3000 60
30 10.1.2.1:2001 10.1.5.2:1001 0 2000 20
";
        let flows = analyze_flow_stats_from(Cursor::new(trace)).unwrap();
        let summary: Vec<_> = flows.values().collect();
        assert_eq!(summary[0].samples, 2);
        assert_eq!(summary[0].mean_cwnd, 2000.0);
        assert_eq!(summary[0].max_cwnd, 3000);
        assert_eq!(summary[0].mean_rtt_ns, 50.0);
        assert_eq!(summary[1].samples, 1);
    }

    #[test]
    fn fairness_index() {
        assert_eq!(jains_fairness(&[]), None);
        assert_eq!(jains_fairness(&[5.0]), Some(1.0));
        assert_eq!(jains_fairness(&[3.0, 3.0]), Some(1.0));
        assert_eq!(jains_fairness(&[1.0, 0.0]), Some(0.5));
        assert_eq!(jains_fairness(&[0.0, 0.0]), Some(0.0));
    }
}
