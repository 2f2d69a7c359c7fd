//! Availability probe (§6.3): an external collaborator reporting per-source
//! health. Independent of the Classifier — gating classification on
//! availability is a Planner-level filter, not a Classifier concern (§9).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::source::SourceStatus;

#[derive(Debug, Clone)]
pub struct AvailabilityReport {
    pub status: SourceStatus,
    pub last_checked: DateTime<Utc>,
    pub response_time_ms: Option<u64>,
    pub error: Option<String>,
}

impl AvailabilityReport {
    #[must_use]
    pub fn online(response_time_ms: u64) -> Self {
        Self { status: SourceStatus::Online, last_checked: Utc::now(), response_time_ms: Some(response_time_ms), error: None }
    }

    #[must_use]
    pub fn offline(error: impl Into<String>) -> Self {
        Self { status: SourceStatus::Offline, last_checked: Utc::now(), response_time_ms: None, error: Some(error.into()) }
    }

    #[must_use]
    pub fn unknown() -> Self {
        Self { status: SourceStatus::Unknown, last_checked: Utc::now(), response_time_ms: None, error: None }
    }
}

/// The probe contract the planner's `optimize` step and a caller-facing
/// health endpoint both consult.
#[async_trait]
pub trait AvailabilityProbe: Send + Sync {
    async fn status(&self, source_id: &str) -> AvailabilityReport;
}

/// Probe backed by whatever the last `record` call reported, with a
/// bounded staleness window after which an unprobed or stale source reads
/// back as `unknown` rather than a stale `online`.
pub struct CachingAvailabilityProbe {
    reports: DashMap<String, AvailabilityReport>,
    staleness: chrono::Duration,
}

impl CachingAvailabilityProbe {
    #[must_use]
    pub fn new(staleness: chrono::Duration) -> Self {
        Self { reports: DashMap::new(), staleness }
    }

    pub fn record(&self, source_id: impl Into<String>, report: AvailabilityReport) {
        self.reports.insert(source_id.into(), report);
    }
}

#[async_trait]
impl AvailabilityProbe for CachingAvailabilityProbe {
    async fn status(&self, source_id: &str) -> AvailabilityReport {
        match self.reports.get(source_id) {
            Some(report) if Utc::now() - report.last_checked < self.staleness => report.clone(),
            Some(_) | None => AvailabilityReport::unknown(),
        }
    }
}
