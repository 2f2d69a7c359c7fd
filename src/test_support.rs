//! Shared test fixtures: an in-memory [`Adapter`] whose behavior is
//! scripted per call, used across the executor, aggregator and session
//! store test suites instead of re-implementing a fake adapter in each.

#![cfg(test)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::adapter::{rows_from_vec, Adapter, Deadline, NativeQuery, RowStream};
use crate::error::AdapterError;
use crate::row::{Cell, Provenance, Row};
use crate::source::SchemaSummary;

/// Scripted behavior for one [`MockAdapter`] call.
#[derive(Clone)]
pub enum Script {
    Rows(usize),
    StreamRows(usize),
    FailTransientThenSucceed { fail_times: u32, rows: usize },
    FailPermanent,
    Hang,
}

pub struct MockAdapter {
    pub script: Script,
    pub calls: AtomicU32,
}

impl MockAdapter {
    #[must_use]
    pub fn rows(n: usize) -> Self {
        Self { script: Script::Rows(n), calls: AtomicU32::new(0) }
    }

    #[must_use]
    pub fn failing_permanently() -> Self {
        Self { script: Script::FailPermanent, calls: AtomicU32::new(0) }
    }

    #[must_use]
    pub fn flaky(fail_times: u32, rows: usize) -> Self {
        Self { script: Script::FailTransientThenSucceed { fail_times, rows }, calls: AtomicU32::new(0) }
    }

    #[must_use]
    pub fn hanging() -> Self {
        Self { script: Script::Hang, calls: AtomicU32::new(0) }
    }

    /// A source whose adapter declares `supports_streaming`, so the
    /// executor emits `partial_results` in batches as rows arrive instead
    /// of waiting for the full result set.
    #[must_use]
    pub fn streaming_rows(n: usize) -> Self {
        Self { script: Script::StreamRows(n), calls: AtomicU32::new(0) }
    }

    fn make_rows(n: usize) -> Vec<Row> {
        (0..n)
            .map(|i| {
                let mut fields = BTreeMap::new();
                fields.insert("id".to_string(), Cell::Int(i as i64));
                Row::new(fields, Provenance { source_id: String::new(), op_id: String::new() })
            })
            .collect()
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    async fn test(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn translate(&self, question: &str, _hints: &SchemaSummary) -> Result<NativeQuery, AdapterError> {
        Ok(NativeQuery::new(format!("SELECT * FROM mock WHERE q = '{question}'")))
    }

    async fn execute(&self, _query: &NativeQuery, deadline: Deadline) -> Result<RowStream, AdapterError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Rows(n) => Ok(rows_from_vec(Self::make_rows(*n))),
            Script::StreamRows(n) => Ok(rows_from_vec(Self::make_rows(*n))),
            Script::FailPermanent => Err(AdapterError::permanent("bad query")),
            Script::FailTransientThenSucceed { fail_times, rows } => {
                if call < *fail_times {
                    Err(AdapterError::transient("throttled"))
                } else {
                    Ok(rows_from_vec(Self::make_rows(*rows)))
                }
            }
            Script::Hang => {
                tokio::time::sleep(deadline.remaining + Duration::from_secs(60)).await;
                Ok(rows_from_vec(Vec::new()))
            }
        }
    }

    async fn introspect(&self) -> Result<SchemaSummary, AdapterError> {
        Ok(SchemaSummary::default())
    }

    fn supports_streaming(&self) -> bool {
        matches!(self.script, Script::StreamRows(_))
    }
}
