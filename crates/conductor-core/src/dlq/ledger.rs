//! Dead-letter ledger: retry bookkeeping for terminally failed events.
//!
//! Entries are keyed by ledger-assigned `dlq_id`. Retrying only consumes
//! budget and classifies the request; re-delivery is the caller's job.
//! Every read-modify-write happens under the shard write guard (`get_mut`).

use chrono::{DateTime, Duration, Utc};
use conductor_types::dlq::{
    DEFAULT_MAX_RETRIES, DeadLetter, DlqEvent, DlqFilter, DlqStats, RemoveReport, RetryOutcome,
    RetryReport,
};
use conductor_types::event::ConductorEvent;
use dashmap::DashMap;
use uuid::Uuid;

use crate::event::bus::EventBus;

/// Bucket for entries deposited without a service name.
pub const UNKNOWN_SERVICE: &str = "unknown";

pub struct DlqLedger {
    entries: DashMap<Uuid, DlqEvent>,
    max_retries: u32,
    events: Option<EventBus>,
}

impl Default for DlqLedger {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl DlqLedger {
    /// `max_retries` applies to every entry deposited through `add`.
    pub fn new(max_retries: u32) -> Self {
        Self {
            entries: DashMap::new(),
            max_retries,
            events: None,
        }
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Deposit a failed event with a fresh `dlq_id` and zero retries.
    pub fn add(&self, letter: DeadLetter) -> DlqEvent {
        let event = letter.into_event(self.max_retries);
        tracing::warn!(
            dlq_id = %event.dlq_id,
            event_id = %event.event_id,
            event_type = %event.event_type,
            service = event.service_name.as_deref().unwrap_or(UNKNOWN_SERVICE),
            reason = %event.failure_reason,
            "event dead-lettered"
        );
        if let Some(events) = &self.events {
            events.publish(ConductorEvent::DeadLettered {
                dlq_id: event.dlq_id,
                event_id: event.event_id.clone(),
                event_type: event.event_type.clone(),
            });
        }
        self.entries.insert(event.dlq_id, event.clone());
        event
    }

    /// Put back a previously exported entry as-is (counters and timestamps
    /// included). Replaces any entry with the same `dlq_id`.
    pub fn restore(&self, event: DlqEvent) {
        self.entries.insert(event.dlq_id, event);
    }

    /// Consume one retry per id. Unknown ids are `failed`; entries out of
    /// budget are `exhausted` and left unchanged.
    pub fn retry(&self, ids: &[Uuid]) -> RetryReport {
        let mut report = RetryReport::default();
        for id in ids {
            let outcome = match self.entries.get_mut(id) {
                None => RetryOutcome::Failed,
                Some(mut entry) => {
                    if entry.increment_retry_count() {
                        RetryOutcome::Retried
                    } else {
                        RetryOutcome::Exhausted
                    }
                }
            };
            tracing::debug!(dlq_id = %id, %outcome, "dlq retry");
            report.record(*id, outcome);
        }
        if !report.exhausted.is_empty() {
            tracing::warn!(count = report.exhausted.len(), "dlq entries exhausted");
        }
        report
    }

    pub fn remove(&self, ids: &[Uuid]) -> RemoveReport {
        let mut report = RemoveReport::default();
        for id in ids {
            match self.entries.remove(id) {
                Some(_) => report.removed.push(*id),
                None => report.not_found.push(*id),
            }
        }
        report
    }

    pub fn stats(&self) -> DlqStats {
        let mut stats = DlqStats::default();
        for entry in self.entries.iter() {
            stats.total += 1;
            *stats
                .by_event_type
                .entry(entry.event_type.clone())
                .or_default() += 1;
            let service = entry
                .service_name
                .clone()
                .unwrap_or_else(|| UNKNOWN_SERVICE.to_string());
            *stats.by_service.entry(service).or_default() += 1;
            if entry.can_retry() {
                stats.retryable += 1;
            }
            let ts = entry.dlq_timestamp;
            stats.oldest = Some(stats.oldest.map_or(ts, |o| o.min(ts)));
            stats.newest = Some(stats.newest.map_or(ts, |n| n.max(ts)));
        }
        stats
    }

    /// Purge entries deposited more than `max_age_hours` ago. Returns the
    /// number removed. An age reaching past the earliest representable time
    /// purges nothing.
    pub fn cleanup(&self, max_age_hours: u64) -> usize {
        let cutoff = i64::try_from(max_age_hours)
            .ok()
            .and_then(Duration::try_hours)
            .and_then(|age| Utc::now().checked_sub_signed(age));
        match cutoff {
            Some(cutoff) => self.cleanup_before(cutoff),
            None => 0,
        }
    }

    /// Purge entries deposited strictly before `cutoff`.
    pub fn cleanup_before(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.dlq_timestamp >= cutoff);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::info!(removed, %cutoff, "dlq cleanup");
        }
        removed
    }

    pub fn get(&self, dlq_id: &Uuid) -> Option<DlqEvent> {
        self.entries.get(dlq_id).map(|e| e.clone())
    }

    /// Matching entries, newest deposit first, then offset/limit.
    pub fn list(&self, filter: &DlqFilter) -> Vec<DlqEvent> {
        let mut matching: Vec<DlqEvent> = self
            .entries
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        matching.sort_by(|a, b| b.dlq_timestamp.cmp(&a.dlq_timestamp));
        matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn letter(event_id: &str, event_type: &str) -> DeadLetter {
        DeadLetter::new(event_id, event_type, json!({ "id": event_id }), "consumer crashed")
    }

    #[test]
    fn retries_until_exhausted() {
        let ledger = DlqLedger::new(3);
        let id = ledger.add(letter("e1", "order.created")).dlq_id;

        for _ in 0..3 {
            let report = ledger.retry(&[id]);
            assert_eq!(report.outcome_of(&id), Some(RetryOutcome::Retried));
        }
        let report = ledger.retry(&[id]);
        assert_eq!(report.outcome_of(&id), Some(RetryOutcome::Exhausted));

        let entry = ledger.get(&id).unwrap();
        assert_eq!(entry.retry_count, 3);
        assert!(!entry.can_retry());
    }

    #[test]
    fn unknown_id_is_failed() {
        let ledger = DlqLedger::default();
        let known = ledger.add(letter("e1", "t")).dlq_id;
        let missing = Uuid::now_v7();
        let report = ledger.retry(&[known, missing]);
        assert_eq!(report.retried, vec![known]);
        assert_eq!(report.failed, vec![missing]);
    }

    #[test]
    fn same_event_gets_distinct_entries() {
        let ledger = DlqLedger::default();
        let a = ledger.add(letter("e1", "t"));
        let b = ledger.add(letter("e1", "t"));
        assert_ne!(a.dlq_id, b.dlq_id);
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn remove_reports_missing() {
        let ledger = DlqLedger::default();
        let id = ledger.add(letter("e1", "t")).dlq_id;
        let ghost = Uuid::now_v7();
        let report = ledger.remove(&[id, ghost]);
        assert_eq!(report.removed, vec![id]);
        assert_eq!(report.not_found, vec![ghost]);
        assert!(ledger.is_empty());
    }

    #[test]
    fn stats_group_by_type_and_service() {
        let ledger = DlqLedger::new(1);
        ledger.add(letter("e1", "order.created").service("orders"));
        ledger.add(letter("e2", "order.created").service("orders"));
        let spent = ledger.add(letter("e3", "user.deleted")).dlq_id;
        ledger.retry(&[spent]);

        let stats = ledger.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_event_type["order.created"], 2);
        assert_eq!(stats.by_service["orders"], 2);
        assert_eq!(stats.by_service[UNKNOWN_SERVICE], 1);
        assert_eq!(stats.retryable, 2);
        assert!(stats.oldest.unwrap() <= stats.newest.unwrap());
    }

    #[test]
    fn cleanup_purges_old_entries() {
        let ledger = DlqLedger::default();
        ledger.add(letter("fresh", "t"));
        let mut old = letter("old", "t").into_event(3);
        old.dlq_timestamp = Utc::now() - Duration::hours(200);
        ledger.restore(old);

        assert_eq!(ledger.cleanup(168), 1);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.list(&DlqFilter::default())[0].event_id, "fresh");
    }

    #[test]
    fn cleanup_with_huge_age_keeps_everything() {
        let ledger = DlqLedger::default();
        let mut old = letter("old", "t").into_event(3);
        old.dlq_timestamp = Utc::now() - Duration::hours(200);
        ledger.restore(old);
        ledger.add(letter("fresh", "t"));

        assert_eq!(ledger.cleanup(u64::MAX), 0);
        assert_eq!(ledger.cleanup(i64::MAX as u64), 0);
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn list_filters_and_pages_newest_first() {
        let ledger = DlqLedger::new(1);
        let base = Utc::now();
        for (i, ty) in ["a", "b", "a", "a"].iter().enumerate() {
            let mut e = letter(&format!("e{i}"), ty).service("svc").into_event(1);
            e.dlq_timestamp = base + Duration::seconds(i as i64);
            ledger.restore(e);
        }

        let filter = DlqFilter {
            event_type: Some("a".into()),
            limit: Some(2),
            ..Default::default()
        };
        let ids: Vec<String> = ledger.list(&filter).into_iter().map(|e| e.event_id).collect();
        assert_eq!(ids, vec!["e3", "e2"]);

        let page2 = DlqFilter {
            offset: 2,
            ..filter
        };
        let ids: Vec<String> = ledger.list(&page2).into_iter().map(|e| e.event_id).collect();
        assert_eq!(ids, vec!["e0"]);
    }

    #[test]
    fn deposit_is_published() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        let ledger = DlqLedger::default().with_event_bus(bus);
        let event = ledger.add(letter("e1", "order.created"));
        match rx.try_recv().unwrap() {
            ConductorEvent::DeadLettered { dlq_id, .. } => assert_eq!(dlq_id, event.dlq_id),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
