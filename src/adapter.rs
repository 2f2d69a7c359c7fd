//! Adapter Interface (C2): the uniform capability surface every source
//! implements.
//!
//! The orchestrator never knows or cares whether a given source is backed
//! by a SQL driver, a REST client, or a document store: it only calls
//! through this trait. Adapters may batch or retry internally, but must
//! respect the deadline they are handed.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::AdapterError;
use crate::row::Row;
use crate::source::SchemaSummary;

/// An adapter-native query, opaque to the core beyond its display text.
#[derive(Debug, Clone)]
pub struct NativeQuery {
    pub text: String,
}

impl NativeQuery {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Advisory execution-plan information an adapter may expose via
/// `explain`.
#[derive(Debug, Clone, Default)]
pub struct ExplainInfo {
    pub text: String,
    pub estimated_cost: Option<f64>,
}

/// Rows are returned as a lazy stream so the executor can forward them to
/// callers incrementally when `supports_streaming` is true; adapters that
/// only produce a materialized list wrap it with
/// [`crate::adapter::rows_from_vec`].
pub type RowStream = BoxStream<'static, std::result::Result<Row, AdapterError>>;

/// Deadline passed by the executor into every adapter call. Adapters that
/// cannot honor it cooperatively are still bounded: the executor wraps the
/// call in its own timeout and discards a stray late completion.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    pub remaining: Duration,
}

/// Required capability surface for every source.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Cheap liveness/credentials check used by the availability probe and
    /// by planner-level pre-flight checks.
    async fn test(&self) -> std::result::Result<(), AdapterError>;

    /// Translate a natural-language question into this adapter's native
    /// query language. Schema hints come from the registry's cached
    /// [`SchemaSummary`]; the translation strategy itself is an opaque,
    /// externally supplied capability.
    async fn translate(
        &self,
        question: &str,
        schema_hints: &SchemaSummary,
    ) -> std::result::Result<NativeQuery, AdapterError>;

    /// Execute a native query and return rows, honoring `deadline`.
    async fn execute(
        &self,
        query: &NativeQuery,
        deadline: Deadline,
    ) -> std::result::Result<RowStream, AdapterError>;

    /// Refresh and return this source's schema summary.
    async fn introspect(&self) -> std::result::Result<SchemaSummary, AdapterError>;

    /// Whether this adapter can stream partial results incrementally
    /// (`partial_results` events) rather than only a single terminal
    /// batch.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Optional: explain a native query's execution plan.
    async fn explain(&self, _query: &NativeQuery) -> std::result::Result<ExplainInfo, AdapterError> {
        Err(AdapterError::permanent("explain not supported"))
    }

    /// Optional: produce a short natural-language summary of a result set.
    async fn analyze_result(&self, _rows: &[Row]) -> std::result::Result<String, AdapterError> {
        Err(AdapterError::permanent("analyze_result not supported"))
    }
}

/// Helper for adapters that only ever produce a materialized list of rows.
pub fn rows_from_vec(rows: Vec<Row>) -> RowStream {
    Box::pin(futures::stream::iter(rows.into_iter().map(Ok)))
}

/// Maps a source id to the adapter instance that serves it. Built once at
/// startup alongside the [`crate::source::SourceRegistry`] and handed to
/// the executor; the two registries are kept separate because the adapter
/// is a runtime capability object while the source is serializable
/// configuration.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: std::collections::HashMap<String, std::sync::Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, source_id: impl Into<String>, adapter: std::sync::Arc<dyn Adapter>) {
        self.adapters.insert(source_id.into(), adapter);
    }

    #[must_use]
    pub fn get(&self, source_id: &str) -> Option<std::sync::Arc<dyn Adapter>> {
        self.adapters.get(source_id).cloned()
    }
}
