//! End-to-end walkthrough of the orchestrator's public API.
//!
//! This example shows how to:
//! 1. Register two heterogeneous sources (a relational store and a
//!    document store) behind in-process demo adapters
//! 2. Wire a `Classifier`, `Planner`, `Executor` and session store into an
//!    `Orchestrator`
//! 3. Run a cross-source question end-to-end, streaming progress events
//!    as they happen
//! 4. Inspect the aggregated rows, execution summary and persisted session
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin xdb-demo
//! ```
//!
//! No external database or network access is required; both sources are
//! synthetic in-memory adapters.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use xdb_orchestrator::adapter::{rows_from_vec, Adapter, AdapterRegistry, Deadline, NativeQuery, RowStream};
use xdb_orchestrator::classifier::{Classifier, ClassifierBackend, SourceScore};
use xdb_orchestrator::error::AdapterError;
use xdb_orchestrator::executor::{Executor, ExecutorConfig};
use xdb_orchestrator::orchestrator::{new_event_channel, Orchestrator, RunOptions};
use xdb_orchestrator::question::{CallerIdentity, Question, RequestFlags};
use xdb_orchestrator::rate_limit::{RateLimit, SourceRateLimiter};
use xdb_orchestrator::row::{Cell, Provenance, Row};
use xdb_orchestrator::session::MemorySessionStore;
use xdb_orchestrator::source::{Capability, SchemaSummary, Source, SourceKind, SourceRegistry, SourceStatus};
use xdb_orchestrator::stream::EventType;

/// Classifier backend that scores sources by whether the question text
/// mentions their domain keyword. Stands in for an LLM or rules engine.
struct KeywordBackend;

#[async_trait]
impl ClassifierBackend for KeywordBackend {
    async fn score_sources(
        &self,
        question: &str,
        candidates: &[String],
    ) -> Result<Vec<SourceScore>, String> {
        let lowered = question.to_lowercase();
        let scores = candidates
            .iter()
            .map(|source_id| {
                let confidence = match source_id.as_str() {
                    "pg" if lowered.contains("order") || lowered.contains("customer") => 0.92,
                    "mongo" if lowered.contains("review") || lowered.contains("comment") => 0.88,
                    _ => 0.4,
                };
                SourceScore { source_id: source_id.clone(), confidence }
            })
            .collect();
        Ok(scores)
    }
}

/// Synthetic relational adapter returning a couple of order rows.
struct DemoPostgresAdapter;

#[async_trait]
impl Adapter for DemoPostgresAdapter {
    async fn test(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn translate(&self, question: &str, _schema_hints: &SchemaSummary) -> Result<NativeQuery, AdapterError> {
        Ok(NativeQuery::new(format!("SELECT * FROM orders -- {question}")))
    }

    async fn execute(&self, _query: &NativeQuery, _deadline: Deadline) -> Result<RowStream, AdapterError> {
        let row = |id: i64, customer: &str, total: f64| {
            let mut fields = BTreeMap::new();
            fields.insert("order_id".to_string(), Cell::Int(id));
            fields.insert("customer".to_string(), Cell::String(customer.to_string()));
            fields.insert("total".to_string(), Cell::Float(total));
            Row::new(fields, Provenance { source_id: "pg".to_string(), op_id: String::new() })
        };
        Ok(rows_from_vec(vec![row(1001, "Ada Lovelace", 42.50), row(1002, "Grace Hopper", 19.99)]))
    }

    async fn introspect(&self) -> Result<SchemaSummary, AdapterError> {
        Ok(SchemaSummary { tables_or_collections: vec!["orders".to_string()], content_hash: "pg-v1".to_string() })
    }
}

/// Synthetic document-store adapter returning a couple of review rows.
struct DemoMongoAdapter;

#[async_trait]
impl Adapter for DemoMongoAdapter {
    async fn test(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn translate(&self, question: &str, _schema_hints: &SchemaSummary) -> Result<NativeQuery, AdapterError> {
        Ok(NativeQuery::new(format!("db.reviews.find() // {question}")))
    }

    async fn execute(&self, _query: &NativeQuery, _deadline: Deadline) -> Result<RowStream, AdapterError> {
        let row = |id: i64, stars: i64| {
            let mut fields = BTreeMap::new();
            fields.insert("review_id".to_string(), Cell::Int(id));
            fields.insert("stars".to_string(), Cell::Int(stars));
            Row::new(fields, Provenance { source_id: "mongo".to_string(), op_id: String::new() })
        };
        Ok(rows_from_vec(vec![row(1, 5), row(2, 4)]))
    }

    async fn introspect(&self) -> Result<SchemaSummary, AdapterError> {
        Ok(SchemaSummary { tables_or_collections: vec!["reviews".to_string()], content_hash: "mongo-v1".to_string() })
    }
}

fn build_registry() -> SourceRegistry {
    SourceRegistry::new(vec![
        Source {
            id: "pg".to_string(),
            kind: SourceKind::Relational,
            uri: "postgres://demo/app".to_string(),
            schema_summary: SchemaSummary::default(),
            caps: [Capability::TranslateNl, Capability::Introspect].into_iter().collect(),
            status: SourceStatus::Online,
        },
        Source {
            id: "mongo".to_string(),
            kind: SourceKind::Document,
            uri: "mongodb://demo/app".to_string(),
            schema_summary: SchemaSummary::default(),
            caps: [Capability::TranslateNl, Capability::Introspect].into_iter().collect(),
            status: SourceStatus::Online,
        },
    ])
    .expect("demo registry has unique, non-empty source ids")
}

fn build_orchestrator() -> Orchestrator<KeywordBackend> {
    let registry = build_registry();
    let classifier = Classifier::new(KeywordBackend, registry.clone());
    let planner = xdb_orchestrator::planner::Planner::new(registry.clone());

    let mut adapters = AdapterRegistry::new();
    adapters.register("pg", Arc::new(DemoPostgresAdapter));
    adapters.register("mongo", Arc::new(DemoMongoAdapter));
    let executor = Executor::new(ExecutorConfig::default(), adapters, registry, SourceRateLimiter::new(RateLimit::default()));

    let sessions: Arc<dyn xdb_orchestrator::session::SessionStore> = Arc::new(MemorySessionStore::new());
    Orchestrator::new(classifier, planner, executor, sessions)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("=== xdb-orchestrator demo ===\n");

    let orchestrator = build_orchestrator();
    let question = Question::new(
        "list recent orders and their customer reviews",
        CallerIdentity("demo-caller".to_string()),
        RequestFlags { save_session: true, ..RequestFlags::default() },
    );

    println!("1. Streaming the question through the orchestrator...");
    let (sink, mut events) = new_event_channel(question.id);
    let options = RunOptions { stream_sink: Some(sink), ..RunOptions::default() };

    let run = tokio::spawn({
        let orchestrator = orchestrator;
        async move { orchestrator.run(question, options).await }
    });

    while let Some(event) = events.recv().await {
        println!("   [{:?}] {}", event.event_type, event.payload);
        if event.event_type == EventType::Complete {
            break;
        }
    }

    let response = run.await.expect("orchestrator task did not panic");

    println!("\n2. Result:");
    match response.success {
        true => println!("   ✓ {} row(s) returned", response.rows.len()),
        false => println!("   ✗ orchestration did not succeed"),
    }

    for row in &response.rows {
        println!("   - {:?} (from {})", row.fields, row.provenance.source_id);
    }

    if let Some(summary) = &response.execution_summary {
        println!("\n3. Execution summary: {} op(s) tracked", summary.per_op.len());
        for (op_id, outcome) in &summary.per_op {
            println!("   - {op_id}: {:?}", outcome.status);
        }
    }

    match response.session_id {
        Some(id) => println!("\n4. ✓ Session persisted as {id}"),
        None => println!("\n4. ✗ No session was persisted"),
    }

    println!("\n=== Demo Complete ===");
}
