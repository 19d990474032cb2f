//! Synthetic workload: message arrivals whose sizes follow a CDF and whose
//! offered load matches a fraction of the access link capacity.

use crate::error::ConfigError;
use bolt_sim_abstract::CdfPoint;
use bolt_sim_abstract::config::NANOS_PER_SEC;
use rand::Rng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Exp};
use std::net::SocketAddrV4;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Message-size distribution as sorted (cumulative probability, size) pairs.
///
/// Keys lie in (0, 1], strictly increase, and the last one is exactly 1.0.
#[derive(Debug, Clone, PartialEq)]
pub struct SizeCdf {
    points: Vec<(f64, u32)>,
}

impl SizeCdf {
    pub fn new(points: Vec<(f64, u32)>) -> Result<Self, ConfigError> {
        let Some(&(last, _)) = points.last() else {
            return Err(ConfigError::InvalidCdf("no entries".into()));
        };

        let mut previous = 0.0;
        for &(probability, size) in &points {
            if !(probability > 0.0 && probability <= 1.0) {
                return Err(ConfigError::InvalidCdf(format!(
                    "probability {probability} outside (0, 1]"
                )));
            }
            if probability <= previous {
                return Err(ConfigError::InvalidCdf(format!(
                    "probability {probability} does not increase past {previous}"
                )));
            }
            if size == 0 {
                return Err(ConfigError::InvalidCdf(format!(
                    "zero-byte size at probability {probability}"
                )));
            }
            previous = probability;
        }

        if last < 1.0 {
            return Err(ConfigError::InvalidCdf(format!(
                "total probability mass is {last}, expected 1.0"
            )));
        }

        Ok(Self { points })
    }

    /// Degenerate distribution that always yields `size`.
    pub fn fixed(size: u32) -> Self {
        Self {
            points: vec![(1.0, size)],
        }
    }

    pub fn from_points(points: &[CdfPoint]) -> Result<Self, ConfigError> {
        Self::new(points.iter().map(|p| (p.probability, p.size)).collect())
    }

    /// Inverse-CDF lookup for a draw `u` in [0, 1): the first entry whose
    /// key is strictly greater than `u`. A draw equal to a key therefore
    /// maps to the following bucket.
    pub fn sample_at(&self, u: f64) -> u32 {
        let idx = self.points.partition_point(|&(probability, _)| probability <= u);
        self.points[idx.min(self.points.len() - 1)].1
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        self.sample_at(rng.random::<f64>())
    }

    /// Expected message size in bytes.
    pub fn mean(&self) -> f64 {
        let mut previous = 0.0;
        let mut mean = 0.0;
        for &(probability, size) in &self.points {
            mean += (probability - previous) * size as f64;
            previous = probability;
        }
        mean
    }
}

/// Immutable workload of one client application.
#[derive(Debug, Clone)]
pub struct WorkloadSpec {
    target_utilization: f64,
    size_cdf: SizeCdf,
    mean_message_size: f64,
    max_messages: u64,
}

impl WorkloadSpec {
    pub fn new(
        target_utilization: f64,
        size_cdf: SizeCdf,
        mean_message_size: f64,
        max_messages: u64,
    ) -> Result<Self, ConfigError> {
        if !(target_utilization > 0.0 && target_utilization <= 1.0) {
            return Err(ConfigError::InvalidWorkload(target_utilization));
        }
        if !(mean_message_size.is_finite() && mean_message_size > 0.0) {
            return Err(ConfigError::InvalidMeanSize(mean_message_size));
        }
        Ok(Self {
            target_utilization,
            size_cdf,
            mean_message_size,
            max_messages,
        })
    }
}

/// A message the client application hands to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDescriptor {
    /// Send time on the simulation clock.
    pub at_ns: u64,
    pub size: u32,
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
    /// Position of this message in the generator's output.
    pub index: u64,
}

/// Cooperative stop flag shared between a run and its generators.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Produces message descriptors for one client endpoint.
///
/// Inter-arrival gaps are exponential with mean
/// `mean_message_size * 8 / (target_utilization * link_rate_bps)`, so the
/// expected offered load is the target fraction of the link.
pub struct WorkloadGenerator {
    src: SocketAddrV4,
    destinations: Vec<SocketAddrV4>,
    link_rate_bps: u64,
    next_at_ns: u64,
    rng: StdRng,
    stop: StopSignal,
    spec: Option<WorkloadSpec>,
    gap: Option<Exp<f64>>,
    emitted: u64,
}

impl WorkloadGenerator {
    pub fn new(
        src: SocketAddrV4,
        destinations: Vec<SocketAddrV4>,
        link_rate_bps: u64,
        start_ns: u64,
        rng: StdRng,
        stop: StopSignal,
    ) -> Result<Self, ConfigError> {
        if link_rate_bps == 0 {
            return Err(ConfigError::ZeroLinkRate);
        }
        Ok(Self {
            src,
            destinations,
            link_rate_bps,
            next_at_ns: start_ns,
            rng,
            stop,
            spec: None,
            gap: None,
            emitted: 0,
        })
    }

    pub fn configure(&mut self, spec: WorkloadSpec) -> Result<(), ConfigError> {
        let bits_per_sec = spec.target_utilization * self.link_rate_bps as f64;
        let messages_per_sec = bits_per_sec / (spec.mean_message_size * 8.0);
        let gap = Exp::new(messages_per_sec)
            .map_err(|_| ConfigError::InvalidMeanSize(spec.mean_message_size))?;
        debug!(
            "{} workload {:.2} of {} bps -> {:.1} msgs/s, max {}",
            self.src,
            spec.target_utilization,
            self.link_rate_bps,
            messages_per_sec,
            spec.max_messages
        );
        self.gap = Some(gap);
        self.spec = Some(spec);
        self.emitted = 0;
        Ok(())
    }

    /// Mean gap between messages in seconds, once configured.
    pub fn mean_inter_arrival_secs(&self) -> Option<f64> {
        self.spec.as_ref().map(|spec| {
            spec.mean_message_size * 8.0 / (spec.target_utilization * self.link_rate_bps as f64)
        })
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn generate_next(&mut self) -> Option<MessageDescriptor> {
        if self.stop.is_stopped() || self.destinations.is_empty() {
            return None;
        }
        let (spec, gap) = match (&self.spec, &self.gap) {
            (Some(spec), Some(gap)) => (spec, gap),
            _ => return None,
        };
        if self.emitted >= spec.max_messages {
            return None;
        }

        let gap_secs = gap.sample(&mut self.rng);
        self.next_at_ns = self
            .next_at_ns
            .saturating_add((gap_secs * NANOS_PER_SEC).round() as u64);
        let size = spec.size_cdf.sample(&mut self.rng);
        let dst = if self.destinations.len() == 1 {
            self.destinations[0]
        } else {
            self.destinations[self.rng.random_range(0..self.destinations.len())]
        };

        let descriptor = MessageDescriptor {
            at_ns: self.next_at_ns,
            size,
            src: self.src,
            dst,
            index: self.emitted,
        };
        self.emitted += 1;
        Some(descriptor)
    }
}
