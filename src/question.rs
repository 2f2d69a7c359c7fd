//! Request-surface types: a [`Question`] plus the flags and identity that
//! travel with it through classification, planning and execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Caller-controlled behavior flags (§6.1).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RequestFlags {
    #[serde(default)]
    pub analyze: bool,
    #[serde(default)]
    pub optimize: bool,
    #[serde(default)]
    pub save_session: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default)]
    pub force_cross_source: bool,
}

/// Opaque caller identity, used for session isolation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallerIdentity(pub String);

/// The raw caller text plus metadata. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: Uuid,
    pub text: String,
    pub caller_id: CallerIdentity,
    pub flags: RequestFlags,
    pub received_at: DateTime<Utc>,
}

impl Question {
    #[must_use]
    pub fn new(text: impl Into<String>, caller_id: CallerIdentity, flags: RequestFlags) -> Self {
        Self { id: Uuid::new_v4(), text: text.into(), caller_id, flags, received_at: Utc::now() }
    }
}
