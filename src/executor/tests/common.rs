use std::sync::Arc;

use crate::adapter::AdapterRegistry;
use crate::classifier::Classification;
use crate::planner::Planner;
use crate::question::{CallerIdentity, Question, RequestFlags};
use crate::rate_limit::SourceRateLimiter;
use crate::source::{Capability, SchemaSummary, Source, SourceKind, SourceRegistry, SourceStatus};
use crate::test_support::MockAdapter;
use uuid::Uuid;

/// A source with an already-warm schema summary, so built plans don't pick
/// up an `Introspect` operation unless a test constructs one explicitly
/// with a stale/empty schema.
pub fn source(id: &str) -> Source {
    Source {
        id: id.to_string(),
        kind: SourceKind::Relational,
        uri: format!("postgres://{id}"),
        schema_summary: SchemaSummary { tables_or_collections: vec!["users".into()], content_hash: "seed".into() },
        caps: [Capability::TranslateNl, Capability::Introspect].into_iter().collect(),
        status: SourceStatus::Online,
    }
}

pub fn question() -> Question {
    Question::new("show 5 latest users", CallerIdentity("caller-1".into()), RequestFlags::default())
}

pub fn classification(question_id: Uuid, sources: &[&str]) -> Classification {
    Classification {
        question_id,
        selected_sources: sources.iter().map(|s| s.to_string()).collect(),
        reasoning: "test".to_string(),
        is_cross_source: sources.len() > 1,
        confidence: Some(0.9),
    }
}

pub fn registry(ids: &[&str]) -> SourceRegistry {
    SourceRegistry::new(ids.iter().map(|id| source(id)).collect()).unwrap()
}

pub fn planner(ids: &[&str]) -> Planner {
    Planner::new(registry(ids))
}

pub fn adapters(mocks: Vec<(&str, MockAdapter)>) -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();
    for (id, mock) in mocks {
        registry.register(id, Arc::new(mock));
    }
    registry
}

pub fn rate_limiter() -> SourceRateLimiter {
    SourceRateLimiter::new(crate::rate_limit::RateLimit { burst_capacity: 16, refill_per_sec: 100.0 })
}
