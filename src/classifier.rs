//! Classifier (C3): maps a question to the subset of sources that can
//! answer it.
//!
//! The actual NL understanding is an opaque, externally supplied
//! capability (an LLM call, a rules engine, whatever an installation
//! wires in) behind [`ClassifierBackend`]. This module owns only the
//! orchestration around it: scoring against the registry, the
//! zero-selection edge case, and the documented fallback-on-failure
//! policy. It never executes queries itself.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Error;
use crate::question::Question;
use crate::source::{Capability, SourceRegistry};

/// The chosen subset of sources for a question, plus the reasoning that
/// led there. Produced once per question and never mutated afterward.
#[derive(Debug, Clone)]
pub struct Classification {
    pub question_id: Uuid,
    pub selected_sources: Vec<String>,
    pub reasoning: String,
    pub is_cross_source: bool,
    pub confidence: Option<f64>,
}

impl Classification {
    fn new(question_id: Uuid, selected_sources: Vec<String>, reasoning: String, confidence: Option<f64>) -> Self {
        let is_cross_source = selected_sources.len() > 1;
        Self { question_id, selected_sources, reasoning, is_cross_source, confidence }
    }
}

/// A single source's relevance score, as produced by a classifier
/// backend.
#[derive(Debug, Clone)]
pub struct SourceScore {
    pub source_id: String,
    pub confidence: f64,
}

/// The externally supplied NL-understanding capability. Implementations
/// typically wrap an LLM call; this crate treats the method as opaque and
/// only interprets its `Err` as `ClassificationUnavailable`.
#[async_trait]
pub trait ClassifierBackend: Send + Sync {
    async fn score_sources(
        &self,
        question: &str,
        candidate_source_ids: &[String],
    ) -> Result<Vec<SourceScore>, String>;
}

/// Threshold above which a scored source is included in the selection.
const RELEVANCE_THRESHOLD: f64 = 0.5;

pub struct Classifier<B: ClassifierBackend> {
    backend: B,
    registry: SourceRegistry,
}

impl<B: ClassifierBackend> Classifier<B> {
    #[must_use]
    pub fn new(backend: B, registry: SourceRegistry) -> Self {
        Self { backend, registry }
    }

    /// Classify a question against the current registry snapshot.
    ///
    /// Deterministic given `(question, registry snapshot)` modulo upstream
    /// nondeterminism in the backend - callers must not assume
    /// idempotence across calls.
    #[tracing::instrument(skip(self, question), fields(question_id = %question.id))]
    pub async fn classify(&self, question: &Question) -> Classification {
        let candidates: Vec<String> = self
            .registry
            .list()
            .into_iter()
            .filter(|s| s.has_cap(Capability::TranslateNl))
            .map(|s| s.id)
            .collect();

        if candidates.is_empty() {
            return Classification::new(
                question.id,
                Vec::new(),
                "no configured source declares translate_nl".to_string(),
                None,
            );
        }

        match self.backend.score_sources(&question.text, &candidates).await {
            Ok(scores) => self.from_scores(question, scores, &candidates),
            Err(backend_err) => self.fallback(question, &candidates, &backend_err),
        }
    }

    fn from_scores(&self, question: &Question, scores: Vec<SourceScore>, candidates: &[String]) -> Classification {
        let mut selected: Vec<(String, f64)> = scores
            .into_iter()
            .filter(|s| s.confidence >= RELEVANCE_THRESHOLD && candidates.contains(&s.source_id))
            .map(|s| (s.source_id, s.confidence))
            .collect();

        if selected.is_empty() {
            return Classification::new(
                question.id,
                Vec::new(),
                "backend returned no source above the relevance threshold".to_string(),
                None,
            );
        }

        if question.flags.force_cross_source && selected.len() == 1 && candidates.len() > 1 {
            // Pull in the next-best candidate so downstream planning treats
            // this as a cross-source plan, as the caller explicitly asked.
            if let Some(extra) = candidates.iter().find(|id| *id != &selected[0].0) {
                selected.push((extra.clone(), 0.0));
            }
        }

        let min_confidence = selected.iter().map(|(_, c)| *c).fold(f64::INFINITY, f64::min);
        let ids: Vec<String> = selected.into_iter().map(|(id, _)| id).collect();
        let reasoning = format!("selected {} source(s) above relevance threshold", ids.len());
        Classification::new(question.id, ids, reasoning, Some(min_confidence))
    }

    fn fallback(&self, question: &Question, candidates: &[String], backend_err: &str) -> Classification {
        tracing::warn!(error = %backend_err, "classifier backend failed, falling back to default source");
        let default_source = candidates.first().cloned();
        match default_source {
            Some(id) => Classification::new(
                question.id,
                vec![id],
                format!(
                    "classifier unavailable ({backend_err}); fell back to default source per policy"
                ),
                None,
            ),
            None => Classification::new(
                question.id,
                Vec::new(),
                format!("classifier unavailable ({backend_err}) and no default source configured"),
                None,
            ),
        }
    }

    /// Surfaces the classification-unavailable condition as an [`Error`]
    /// for callers that want to distinguish it from a successful empty
    /// selection (e.g. to emit a recoverable `error` stream event).
    #[must_use]
    pub fn classification_error(reasoning: &str) -> Error {
        Error::ClassificationUnavailable(reasoning.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::question::{CallerIdentity, RequestFlags};
    use crate::source::{SchemaSummary, Source, SourceKind, SourceStatus};

    fn source(id: &str) -> Source {
        Source {
            id: id.to_string(),
            kind: SourceKind::Relational,
            uri: format!("postgres://{id}"),
            schema_summary: SchemaSummary::default(),
            caps: [Capability::TranslateNl].into_iter().collect(),
            status: SourceStatus::Online,
        }
    }

    struct StubBackend(Vec<SourceScore>);

    #[async_trait]
    impl ClassifierBackend for StubBackend {
        async fn score_sources(&self, _q: &str, _c: &[String]) -> Result<Vec<SourceScore>, String> {
            Ok(self.0.clone())
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl ClassifierBackend for FailingBackend {
        async fn score_sources(&self, _q: &str, _c: &[String]) -> Result<Vec<SourceScore>, String> {
            Err("upstream 503".to_string())
        }
    }

    fn question() -> Question {
        Question::new("show 5 latest users", CallerIdentity("caller-1".into()), RequestFlags::default())
    }

    #[tokio::test]
    async fn single_source_is_not_cross_source() {
        let registry = SourceRegistry::new(vec![source("pg")]).unwrap();
        let backend = StubBackend(vec![SourceScore { source_id: "pg".into(), confidence: 0.9 }]);
        let classifier = Classifier::new(backend, registry);
        let c = classifier.classify(&question()).await;
        assert_eq!(c.selected_sources, vec!["pg".to_string()]);
        assert!(!c.is_cross_source);
    }

    #[tokio::test]
    async fn two_sources_above_threshold_is_cross_source() {
        let registry = SourceRegistry::new(vec![source("pg"), source("mongo")]).unwrap();
        let backend = StubBackend(vec![
            SourceScore { source_id: "pg".into(), confidence: 0.9 },
            SourceScore { source_id: "mongo".into(), confidence: 0.7 },
        ]);
        let classifier = Classifier::new(backend, registry);
        let c = classifier.classify(&question()).await;
        assert!(c.is_cross_source);
        assert_eq!(c.selected_sources.len(), 2);
    }

    #[tokio::test]
    async fn backend_failure_falls_back_to_default_source() {
        let registry = SourceRegistry::new(vec![source("pg"), source("mongo")]).unwrap();
        let classifier = Classifier::new(FailingBackend, registry);
        let c = classifier.classify(&question()).await;
        assert_eq!(c.selected_sources, vec!["pg".to_string()]);
        assert!(c.reasoning.contains("fell back"));
    }

    #[tokio::test]
    async fn no_candidates_yields_empty_selection_with_reasoning() {
        let registry = SourceRegistry::new(vec![]).unwrap();
        let classifier = Classifier::new(FailingBackend, registry);
        let c = classifier.classify(&question()).await;
        assert!(c.selected_sources.is_empty());
        assert!(!c.reasoning.is_empty());
    }
}
