//! The operation state machine (§4.5).
//!
//! ```text
//! PENDING --(deps satisfied)--> READY --(worker claim)--> RUNNING
//! RUNNING --(success)--> COMPLETED
//! RUNNING --(retryable error, attempts<max)--> READY
//! RUNNING --(non-retryable or attempts=max)--> FAILED
//! PENDING/READY --(dep failed & !fail_fast allow-skip)--> SKIPPED
//! any non-terminal --(cancel/deadline)--> CANCELLED
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::row::Row;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

impl OperationStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Skipped | OperationStatus::Cancelled
        )
    }
}

/// Result and bookkeeping for one operation's execution.
#[derive(Debug, Clone)]
#[allow(clippy::struct_field_names)]
pub struct OperationResult {
    pub op_id: String,
    pub status: OperationStatus,
    pub rows: Vec<Row>,
    pub native_query_text: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<&'static str>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub attempts: u32,
}

impl OperationResult {
    #[must_use]
    pub fn pending(op_id: impl Into<String>) -> Self {
        Self {
            op_id: op_id.into(),
            status: OperationStatus::Pending,
            rows: Vec::new(),
            native_query_text: None,
            error: None,
            error_kind: None,
            started_at: None,
            ended_at: None,
            attempts: 0,
        }
    }

    pub fn record_failure(&mut self, err: &Error) {
        self.error = Some(err.to_string());
        self.error_kind = Some(err.code());
        self.status = OperationStatus::Failed;
        self.ended_at = Some(Utc::now());
    }
}
