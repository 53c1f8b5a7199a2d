//! Bounded healing event log

use std::collections::VecDeque;
use std::sync::RwLock;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::config::defaults::EVENT_CHANNEL_CAPACITY;
use crate::types::{HealingEvent, HealingEventType, HealingStats};

struct LogInner {
    events: VecDeque<HealingEvent>,
    next_id: u64,
}

/// Append-only audit trail of the healing loop.
///
/// Holds the most recent `capacity` events; older ones are evicted. Every
/// appended event is also broadcast to live subscribers. Statistics are
/// derived from the retained events only.
pub struct HealingLog {
    capacity: usize,
    inner: RwLock<LogInner>,
    tx: broadcast::Sender<HealingEvent>,
}

impl HealingLog {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            capacity: capacity.max(1),
            inner: RwLock::new(LogInner {
                events: VecDeque::with_capacity(capacity.max(1)),
                next_id: 0,
            }),
            tx,
        }
    }

    /// Append an event. `details` should be a JSON object.
    pub fn append(&self, event_type: HealingEventType, details: Value) -> HealingEvent {
        let event = {
            let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
            let event = HealingEvent {
                id: format!("evt-{}", inner.next_id),
                timestamp: Utc::now(),
                event_type,
                details,
            };
            inner.next_id += 1;
            if inner.events.len() == self.capacity {
                inner.events.pop_front();
            }
            inner.events.push_back(event.clone());
            event
        };
        // no subscribers is fine
        let _ = self.tx.send(event.clone());
        event
    }

    /// Up to `limit` most recent events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<HealingEvent> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let skip = inner.events.len().saturating_sub(limit);
        inner.events.iter().skip(skip).cloned().collect()
    }

    pub fn all(&self) -> Vec<HealingEvent> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.events.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HealingEvent> {
        self.tx.subscribe()
    }

    pub fn stats(&self) -> HealingStats {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut stats = HealingStats {
            total_events: inner.events.len(),
            ..Default::default()
        };
        let mut repair_times = Vec::new();

        for event in &inner.events {
            match event.event_type {
                HealingEventType::AnomalyDetected => stats.anomalies_detected += 1,
                HealingEventType::BugFound => stats.bugs_found += 1,
                HealingEventType::PatchGenerated => {
                    stats.patches_generated += event
                        .details
                        .get("candidates")
                        .and_then(Value::as_u64)
                        .unwrap_or(0) as usize;
                }
                HealingEventType::PatchValidated => {
                    stats.patches_validated += 1;
                    if event.details.get("passed").and_then(Value::as_bool) == Some(true) {
                        stats.validations_passed += 1;
                    }
                }
                HealingEventType::PatchApplied => match event.succeeded() {
                    Some(true) => {
                        stats.patches_applied += 1;
                        if let Some(ms) = event
                            .details
                            .get("time_to_repair_ms")
                            .and_then(Value::as_f64)
                        {
                            repair_times.push(ms);
                        }
                    }
                    _ => stats.apply_failures += 1,
                },
                HealingEventType::Rollback => stats.rollbacks += 1,
            }
        }

        stats.detection_rate = ratio(stats.bugs_found, stats.anomalies_detected);
        stats.patch_success_rate = ratio(stats.patches_applied, stats.patches_validated);
        stats.mean_time_to_repair_ms = (!repair_times.is_empty())
            .then(|| repair_times.iter().sum::<f64>() / repair_times.len() as f64);
        stats
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ids_and_eviction() {
        let log = HealingLog::new(3);
        for i in 0..5 {
            log.append(HealingEventType::AnomalyDetected, json!({ "i": i }));
        }
        let events = log.all();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].id, "evt-2");
        assert_eq!(events[2].id, "evt-4");

        let recent = log.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].id, "evt-4");
        assert_eq!(log.recent(100).len(), 3);
    }

    #[test]
    fn test_stats_from_log() {
        let log = HealingLog::new(100);
        log.append(HealingEventType::AnomalyDetected, json!({}));
        log.append(HealingEventType::AnomalyDetected, json!({}));
        log.append(HealingEventType::BugFound, json!({}));
        log.append(HealingEventType::PatchGenerated, json!({ "candidates": 2 }));
        log.append(HealingEventType::PatchValidated, json!({ "passed": true }));
        log.append(
            HealingEventType::PatchApplied,
            json!({ "success": true, "time_to_repair_ms": 40.0 }),
        );
        log.append(HealingEventType::PatchGenerated, json!({ "candidates": 2 }));
        log.append(HealingEventType::PatchValidated, json!({ "passed": false }));
        log.append(
            HealingEventType::PatchApplied,
            json!({ "success": false, "reason": "validation failed" }),
        );
        log.append(HealingEventType::Rollback, json!({ "patch_id": "x" }));

        let s = log.stats();
        assert_eq!(s.total_events, 10);
        assert_eq!(s.anomalies_detected, 2);
        assert_eq!(s.bugs_found, 1);
        assert_eq!(s.patches_generated, 4);
        assert_eq!(s.patches_validated, 2);
        assert_eq!(s.validations_passed, 1);
        assert_eq!(s.patches_applied, 1);
        assert_eq!(s.apply_failures, 1);
        assert_eq!(s.rollbacks, 1);
        assert_eq!(s.detection_rate, 0.5);
        assert_eq!(s.patch_success_rate, 0.5);
        assert_eq!(s.mean_time_to_repair_ms, Some(40.0));
    }

    #[test]
    fn test_empty_stats() {
        let s = HealingLog::new(10).stats();
        assert_eq!(s, HealingStats::default());
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let log = HealingLog::new(10);
        let mut rx = log.subscribe();
        log.append(HealingEventType::BugFound, json!({ "bug_id": "bug-0" }));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, HealingEventType::BugFound);
        assert_eq!(event.id, "evt-0");
    }
}
