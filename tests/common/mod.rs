//! Shared fixtures for the end-to-end scenario tests. Integration tests
//! compile against the public API only, so these adapters are separate
//! from (and deliberately simpler than) `test_support::MockAdapter`,
//! which is unit-test-only.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use xdb_orchestrator::adapter::{rows_from_vec, Adapter, AdapterRegistry, Deadline, NativeQuery, RowStream};
use xdb_orchestrator::classifier::{Classifier, ClassifierBackend, SourceScore};
use xdb_orchestrator::error::AdapterError;
use xdb_orchestrator::executor::{Executor, ExecutorConfig};
use xdb_orchestrator::orchestrator::Orchestrator;
use xdb_orchestrator::planner::Planner;
use xdb_orchestrator::rate_limit::{RateLimit, SourceRateLimiter};
use xdb_orchestrator::row::{Cell, Provenance, Row};
use xdb_orchestrator::session::{MemorySessionStore, SessionStore};
use xdb_orchestrator::source::{Capability, SchemaSummary, Source, SourceKind, SourceRegistry, SourceStatus};

/// Adapter that returns `n` synthetic rows and never fails.
pub struct RowsAdapter {
    pub n: usize,
}

#[async_trait]
impl Adapter for RowsAdapter {
    async fn test(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn translate(&self, question: &str, _schema_hints: &SchemaSummary) -> Result<NativeQuery, AdapterError> {
        Ok(NativeQuery::new(format!("SELECT * /* {question} */")))
    }

    async fn execute(&self, _query: &NativeQuery, _deadline: Deadline) -> Result<RowStream, AdapterError> {
        let rows = (0..self.n)
            .map(|i| {
                let mut fields = BTreeMap::new();
                fields.insert("id".to_string(), Cell::Int(i as i64));
                Row::new(fields, Provenance { source_id: String::new(), op_id: String::new() })
            })
            .collect();
        Ok(rows_from_vec(rows))
    }

    async fn introspect(&self) -> Result<SchemaSummary, AdapterError> {
        Ok(SchemaSummary::default())
    }
}

/// Adapter whose `execute` always fails with a non-retriable error.
pub struct PermanentlyFailingAdapter;

#[async_trait]
impl Adapter for PermanentlyFailingAdapter {
    async fn test(&self) -> Result<(), AdapterError> {
        Err(AdapterError::permanent("credentials rejected"))
    }

    async fn translate(&self, question: &str, _schema_hints: &SchemaSummary) -> Result<NativeQuery, AdapterError> {
        Ok(NativeQuery::new(format!("SELECT * /* {question} */")))
    }

    async fn execute(&self, _query: &NativeQuery, _deadline: Deadline) -> Result<RowStream, AdapterError> {
        Err(AdapterError::permanent("schema mismatch"))
    }

    async fn introspect(&self) -> Result<SchemaSummary, AdapterError> {
        Ok(SchemaSummary::default())
    }
}

/// Adapter whose `execute` never returns within the test's lifetime,
/// used to exercise cancellation: it sleeps far longer than any grace
/// period the tests configure.
pub struct HangingAdapter;

#[async_trait]
impl Adapter for HangingAdapter {
    async fn test(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn translate(&self, question: &str, _schema_hints: &SchemaSummary) -> Result<NativeQuery, AdapterError> {
        Ok(NativeQuery::new(format!("SELECT * /* {question} */")))
    }

    async fn execute(&self, _query: &NativeQuery, _deadline: Deadline) -> Result<RowStream, AdapterError> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Ok(rows_from_vec(Vec::new()))
    }

    async fn introspect(&self) -> Result<SchemaSummary, AdapterError> {
        Ok(SchemaSummary::default())
    }
}

/// Classifier backend that always returns a fixed score list, regardless
/// of question text.
pub struct FixedBackend(pub Vec<SourceScore>);

#[async_trait]
impl ClassifierBackend for FixedBackend {
    async fn score_sources(&self, _q: &str, _c: &[String]) -> Result<Vec<SourceScore>, String> {
        Ok(self.0.clone())
    }
}

/// Classifier backend that always fails, to exercise the fallback path.
pub struct FailingBackend;

#[async_trait]
impl ClassifierBackend for FailingBackend {
    async fn score_sources(&self, _q: &str, _c: &[String]) -> Result<Vec<SourceScore>, String> {
        Err("upstream classifier unreachable".to_string())
    }
}

/// A source with an already-warm schema summary, so built plans don't pick
/// up an `Introspect` operation in these happy/failure-path fixtures.
pub fn source(id: &str, kind: SourceKind) -> Source {
    Source {
        id: id.to_string(),
        kind,
        uri: format!("proto://{id}"),
        schema_summary: SchemaSummary { tables_or_collections: vec!["rows".into()], content_hash: "seed".into() },
        caps: [Capability::TranslateNl, Capability::Introspect].into_iter().collect(),
        status: SourceStatus::Online,
    }
}

fn build_executor(source_registry: SourceRegistry, adapters: Vec<(&str, Arc<dyn Adapter>)>) -> Executor {
    let mut adapter_registry = AdapterRegistry::new();
    for (id, adapter) in adapters {
        adapter_registry.register(id, adapter);
    }
    Executor::new(ExecutorConfig::default(), adapter_registry, source_registry, SourceRateLimiter::new(RateLimit::default()))
}

/// Single-source orchestrator wired with one always-succeeding adapter
/// (scenario S1).
pub fn single_source_orchestrator(rows: usize) -> Orchestrator<FixedBackend> {
    let registry = SourceRegistry::new(vec![source("pg", SourceKind::Relational)]).unwrap();
    let backend = FixedBackend(vec![SourceScore { source_id: "pg".to_string(), confidence: 0.95 }]);
    let classifier = Classifier::new(backend, registry.clone());
    let planner = Planner::new(registry.clone());
    let executor = build_executor(registry, vec![("pg", Arc::new(RowsAdapter { n: rows }))]);
    let sessions: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    Orchestrator::new(classifier, planner, executor, sessions)
}

/// Two-source orchestrator (scenario S2) with both adapters succeeding.
pub fn cross_source_orchestrator(pg_rows: usize, mongo_rows: usize) -> Orchestrator<FixedBackend> {
    let registry = SourceRegistry::new(vec![
        source("pg", SourceKind::Relational),
        source("mongo", SourceKind::Document),
    ])
    .unwrap();
    let backend = FixedBackend(vec![
        SourceScore { source_id: "pg".to_string(), confidence: 0.9 },
        SourceScore { source_id: "mongo".to_string(), confidence: 0.8 },
    ]);
    let classifier = Classifier::new(backend, registry.clone());
    let planner = Planner::new(registry.clone());
    let executor = build_executor(registry, vec![
        ("pg", Arc::new(RowsAdapter { n: pg_rows })),
        ("mongo", Arc::new(RowsAdapter { n: mongo_rows })),
    ]);
    let sessions: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    Orchestrator::new(classifier, planner, executor, sessions)
}

/// Two-source orchestrator where `mongo` always fails permanently
/// (scenario S3).
pub fn partial_failure_orchestrator(pg_rows: usize) -> Orchestrator<FixedBackend> {
    let registry = SourceRegistry::new(vec![
        source("pg", SourceKind::Relational),
        source("mongo", SourceKind::Document),
    ])
    .unwrap();
    let backend = FixedBackend(vec![
        SourceScore { source_id: "pg".to_string(), confidence: 0.9 },
        SourceScore { source_id: "mongo".to_string(), confidence: 0.8 },
    ]);
    let classifier = Classifier::new(backend, registry.clone());
    let planner = Planner::new(registry.clone());
    let executor = build_executor(registry, vec![
        ("pg", Arc::new(RowsAdapter { n: pg_rows })),
        ("mongo", Arc::new(PermanentlyFailingAdapter)),
    ]);
    let sessions: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    Orchestrator::new(classifier, planner, executor, sessions)
}

/// Single-source orchestrator whose adapter hangs forever, for exercising
/// cancellation (scenario S4).
pub fn hanging_orchestrator() -> Orchestrator<FixedBackend> {
    let registry = SourceRegistry::new(vec![source("pg", SourceKind::Relational)]).unwrap();
    let backend = FixedBackend(vec![SourceScore { source_id: "pg".to_string(), confidence: 0.9 }]);
    let classifier = Classifier::new(backend, registry.clone());
    let planner = Planner::new(registry.clone());
    let executor = build_executor(registry, vec![("pg", Arc::new(HangingAdapter))]);
    let sessions: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    Orchestrator::new(classifier, planner, executor, sessions)
}

/// Single-source orchestrator whose classifier backend always fails,
/// forcing the fallback-to-default-source path (scenario S6).
pub fn fallback_orchestrator(rows: usize) -> Orchestrator<FailingBackend> {
    let registry = SourceRegistry::new(vec![source("pg", SourceKind::Relational)]).unwrap();
    let classifier = Classifier::new(FailingBackend, registry.clone());
    let planner = Planner::new(registry.clone());
    let executor = build_executor(registry, vec![("pg", Arc::new(RowsAdapter { n: rows }))]);
    let sessions: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    Orchestrator::new(classifier, planner, executor, sessions)
}
