//! Metric source abstraction for health telemetry.
//!
//! Provides a unified trait for pulling raw health measurements from
//! different places: the host itself (sysinfo), JSON lines on stdin, a
//! synthetic generator, or a fixed replay list.

mod host;
mod synthetic;

pub use host::HostMetricSource;
pub use synthetic::SyntheticMetricSource;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::HealthMetrics;

/// Events produced by a metric source.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricEvent {
    /// One raw measurement of the six sampled metrics.
    Sample(HealthMetrics),
    /// Source has no more data (EOF for stdin / replay).
    Eof,
}

/// Trait abstracting where health measurements come from.
///
/// The monitor calls [`pull`](MetricSource::pull) once per sampling interval
/// inside a `select!` with cancellation. Detection must not depend on which
/// implementation is plugged in.
#[async_trait]
pub trait MetricSource: Send + 'static {
    /// Produce the next measurement. `Err` is logged by the caller and the
    /// next interval tries again.
    async fn pull(&mut self) -> Result<MetricEvent>;

    /// Human-readable name for logging (e.g. "host", "stdin").
    fn source_name(&self) -> &str;
}

// ============================================================================
// Replay Source
// ============================================================================

/// Yields a pre-built list of samples, then `Eof`.
pub struct ReplaySource {
    samples: std::vec::IntoIter<HealthMetrics>,
}

impl ReplaySource {
    pub fn new(samples: Vec<HealthMetrics>) -> Self {
        Self {
            samples: samples.into_iter(),
        }
    }
}

#[async_trait]
impl MetricSource for ReplaySource {
    async fn pull(&mut self) -> Result<MetricEvent> {
        Ok(self
            .samples
            .next()
            .map_or(MetricEvent::Eof, MetricEvent::Sample))
    }

    fn source_name(&self) -> &str {
        "replay"
    }
}

// ============================================================================
// Stdin Source (JSON health samples, one per line)
// ============================================================================

/// Reads JSON health samples from stdin, e.g.
/// `{"cpu_usage":0.42,"memory_usage":0.55,"error_rate":1.2,"response_time":180}`.
///
/// Missing fields default to 0; malformed lines are skipped with a warning.
pub struct StdinMetricSource {
    reader: tokio::io::BufReader<tokio::io::Stdin>,
    line_buffer: String,
}

impl StdinMetricSource {
    pub fn new() -> Self {
        Self {
            reader: tokio::io::BufReader::new(tokio::io::stdin()),
            line_buffer: String::with_capacity(512),
        }
    }
}

impl Default for StdinMetricSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricSource for StdinMetricSource {
    async fn pull(&mut self) -> Result<MetricEvent> {
        use tokio::io::AsyncBufReadExt;
        loop {
            self.line_buffer.clear();
            let bytes = self.reader.read_line(&mut self.line_buffer).await?;
            if bytes == 0 {
                return Ok(MetricEvent::Eof);
            }
            if let Some(metrics) = parse_sample_line(&self.line_buffer) {
                return Ok(MetricEvent::Sample(metrics));
            }
        }
    }

    fn source_name(&self) -> &str {
        "stdin"
    }
}

/// Parse one JSON line. Blank lines and malformed JSON yield `None`.
pub fn parse_sample_line(line: &str) -> Option<HealthMetrics> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<HealthMetrics>(line) {
        Ok(metrics) => Some(metrics),
        Err(e) => {
            tracing::warn!(error = %e, "[StdinMetricSource] Skipping malformed sample");
            None
        }
    }
}
