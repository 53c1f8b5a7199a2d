//! Host telemetry via sysinfo

use anyhow::Result;
use async_trait::async_trait;
use sysinfo::System;

use super::{MetricEvent, MetricSource};
use crate::types::HealthMetrics;

/// Samples the local machine.
///
/// CPU and memory utilisation come from sysinfo as 0-1 fractions and queue
/// depth is the 1-minute load average (runnable tasks). The service-level
/// metrics (error rate, response time, deadlock risk) are not observable
/// from the host and stay at 0 unless a hook is attached with
/// [`with_hook`](HostMetricSource::with_hook).
pub struct HostMetricSource {
    sys: System,
    hook: Option<Box<dyn FnMut(&mut HealthMetrics) + Send>>,
}

impl HostMetricSource {
    pub fn new() -> Self {
        let mut sys = System::new();
        // Prime CPU counters; the first delta is measured on the next pull
        sys.refresh_cpu();
        Self { sys, hook: None }
    }

    /// Attach a callback that fills in service-level metrics after each
    /// host sample.
    pub fn with_hook(mut self, hook: impl FnMut(&mut HealthMetrics) + Send + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    fn sample(&mut self) -> HealthMetrics {
        self.sys.refresh_cpu();
        self.sys.refresh_memory();

        let cpu = f64::from(self.sys.global_cpu_info().cpu_usage()) / 100.0;
        let total = self.sys.total_memory();
        let memory = if total > 0 {
            self.sys.used_memory() as f64 / total as f64
        } else {
            0.0
        };
        let load = System::load_average();

        let mut metrics = HealthMetrics {
            cpu_usage: cpu.clamp(0.0, 1.0),
            memory_usage: memory.clamp(0.0, 1.0),
            queue_depth: load.one.max(0.0),
            ..Default::default()
        };
        if let Some(hook) = self.hook.as_mut() {
            hook(&mut metrics);
        }
        metrics
    }
}

impl Default for HostMetricSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricSource for HostMetricSource {
    async fn pull(&mut self) -> Result<MetricEvent> {
        Ok(MetricEvent::Sample(self.sample()))
    }

    fn source_name(&self) -> &str {
        "host"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_host_sample_is_in_range() {
        let mut src = HostMetricSource::new().with_hook(|m| m.error_rate = 1.5);
        let MetricEvent::Sample(m) = src.pull().await.unwrap() else {
            panic!("host source never ends");
        };
        assert!((0.0..=1.0).contains(&m.cpu_usage));
        assert!((0.0..=1.0).contains(&m.memory_usage));
        assert!(m.queue_depth >= 0.0);
        assert_eq!(m.error_rate, 1.5);
        assert!(m.is_finite());
    }
}
