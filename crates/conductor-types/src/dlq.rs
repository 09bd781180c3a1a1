//! Dead-letter queue records.
//!
//! A `DlqEvent` is one ledger entry for a terminally failed event. Each
//! deposit gets its own `dlq_id`, so the same logical event may appear several
//! times across repeated failures.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const DEFAULT_MAX_RETRIES: u32 = 3;

// ---------------------------------------------------------------------------
// DlqEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlqEvent {
    pub dlq_id: Uuid,
    pub event_id: String,
    pub event_type: String,
    pub event_data: Value,
    pub failure_reason: String,
    pub original_timestamp: DateTime<Utc>,
    pub dlq_timestamp: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub correlation_id: Option<String>,
    pub service_name: Option<String>,
    pub error_details: Option<Value>,
}

impl DlqEvent {
    /// Derived from the counters on every call.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Consume one retry. Returns false, leaving the count unchanged, once
    /// the budget is spent.
    pub fn increment_retry_count(&mut self) -> bool {
        if !self.can_retry() {
            return false;
        }
        self.retry_count += 1;
        true
    }

    pub fn age_hours(&self, now: DateTime<Utc>) -> i64 {
        (now - self.dlq_timestamp).num_hours()
    }
}

// ---------------------------------------------------------------------------
// DeadLetter (deposit request)
// ---------------------------------------------------------------------------

/// Everything needed to deposit an event; the ledger assigns the rest.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub event_id: String,
    pub event_type: String,
    pub event_data: Value,
    pub failure_reason: String,
    pub correlation_id: Option<String>,
    pub service_name: Option<String>,
    pub error_details: Option<Value>,
    pub original_timestamp: Option<DateTime<Utc>>,
}

impl DeadLetter {
    pub fn new(
        event_id: impl Into<String>,
        event_type: impl Into<String>,
        event_data: Value,
        failure_reason: impl Into<String>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            event_type: event_type.into(),
            event_data,
            failure_reason: failure_reason.into(),
            correlation_id: None,
            service_name: None,
            error_details: None,
            original_timestamp: None,
        }
    }

    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn service(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.error_details = Some(details);
        self
    }

    pub fn originally_at(mut self, ts: DateTime<Utc>) -> Self {
        self.original_timestamp = Some(ts);
        self
    }

    /// Turn the request into a fresh ledger entry.
    pub fn into_event(self, max_retries: u32) -> DlqEvent {
        let now = Utc::now();
        DlqEvent {
            dlq_id: Uuid::now_v7(),
            event_id: self.event_id,
            event_type: self.event_type,
            event_data: self.event_data,
            failure_reason: self.failure_reason,
            original_timestamp: self.original_timestamp.unwrap_or(now),
            dlq_timestamp: now,
            retry_count: 0,
            max_retries,
            correlation_id: self.correlation_id,
            service_name: self.service_name,
            error_details: self.error_details,
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Classification of one ID in a retry request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryOutcome {
    Retried,
    Exhausted,
    /// No entry with that ID.
    Failed,
}

impl fmt::Display for RetryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryOutcome::Retried => write!(f, "retried"),
            RetryOutcome::Exhausted => write!(f, "exhausted"),
            RetryOutcome::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryReport {
    pub retried: Vec<Uuid>,
    pub exhausted: Vec<Uuid>,
    pub failed: Vec<Uuid>,
}

impl RetryReport {
    pub fn record(&mut self, id: Uuid, outcome: RetryOutcome) {
        match outcome {
            RetryOutcome::Retried => self.retried.push(id),
            RetryOutcome::Exhausted => self.exhausted.push(id),
            RetryOutcome::Failed => self.failed.push(id),
        }
    }

    pub fn outcome_of(&self, id: &Uuid) -> Option<RetryOutcome> {
        if self.retried.contains(id) {
            Some(RetryOutcome::Retried)
        } else if self.exhausted.contains(id) {
            Some(RetryOutcome::Exhausted)
        } else if self.failed.contains(id) {
            Some(RetryOutcome::Failed)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoveReport {
    pub removed: Vec<Uuid>,
    pub not_found: Vec<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DlqStats {
    pub total: usize,
    pub by_event_type: HashMap<String, usize>,
    pub by_service: HashMap<String, usize>,
    pub retryable: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// Listing filter. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DlqFilter {
    pub event_type: Option<String>,
    pub service_name: Option<String>,
    pub retryable_only: bool,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl DlqFilter {
    pub fn matches(&self, event: &DlqEvent) -> bool {
        let type_ok = self
            .event_type
            .as_ref()
            .is_none_or(|t| &event.event_type == t);
        let service_ok = self
            .service_name
            .as_ref()
            .is_none_or(|s| event.service_name.as_ref() == Some(s));
        type_ok && service_ok && (!self.retryable_only || event.can_retry())
    }
}
