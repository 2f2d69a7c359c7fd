//! Top-level orchestrator (§6.1): wires the Classifier, Planner, Executor,
//! Aggregator, Session Store and Stream Multiplexer behind one
//! request/response entry point.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::aggregator::{AggregatedResult, Aggregator, ExecutionSummary, RepresentativeQuery};
use crate::availability::AvailabilityProbe;
use crate::classifier::{Classification, Classifier, ClassifierBackend};
use crate::executor::{ExecutionOptions, Executor};
use crate::planner::{Plan, Planner};
use crate::question::Question;
use crate::row::Row;
use crate::session::SessionStore;
use crate::source::SourceStatus;
use crate::stream::{EventSink, EventType, DEFAULT_CHANNEL_CAPACITY};

/// An optional, externally supplied natural-language summarizer. Treated
/// exactly like [`ClassifierBackend`]: opaque, and only its `Err` is
/// interpreted by this crate.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, rows: &[Row]) -> std::result::Result<String, String>;
}

/// The response surface from §6.1.
#[derive(Debug, Serialize)]
pub struct OrchestratorResponse {
    pub rows: Vec<Row>,
    pub representative_query_text: RepresentativeQuery,
    pub analysis: Option<String>,
    pub success: bool,
    pub session_id: Option<Uuid>,
    pub plan_info: Option<Plan>,
    pub execution_summary: Option<ExecutionSummary>,
}

impl OrchestratorResponse {
    fn fatal(plan_info: Option<Plan>) -> Self {
        Self {
            rows: Vec::new(),
            representative_query_text: RepresentativeQuery::None,
            analysis: None,
            success: false,
            session_id: None,
            plan_info,
            execution_summary: None,
        }
    }
}

/// Per-request knobs not carried by [`crate::question::RequestFlags`]:
/// things the caller does not set per-question but an installation
/// configures once (deadlines, cancellation wiring).
pub struct RunOptions {
    pub deadline: Option<Duration>,
    pub cancellation_token: CancellationToken,
    pub stream_sink: Option<EventSink>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { deadline: None, cancellation_token: CancellationToken::new(), stream_sink: None }
    }
}

pub struct Orchestrator<B: ClassifierBackend> {
    classifier: Classifier<B>,
    planner: Planner,
    executor: Executor,
    sessions: Arc<dyn SessionStore>,
    availability: Option<Arc<dyn AvailabilityProbe>>,
    analyzer: Option<Arc<dyn Analyzer>>,
}

impl<B: ClassifierBackend> Orchestrator<B> {
    #[must_use]
    pub fn new(
        classifier: Classifier<B>,
        planner: Planner,
        executor: Executor,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self { classifier, planner, executor, sessions, availability: None, analyzer: None }
    }

    #[must_use]
    pub fn with_availability_probe(mut self, probe: Arc<dyn AvailabilityProbe>) -> Self {
        self.availability = Some(probe);
        self
    }

    #[must_use]
    pub fn with_analyzer(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    /// Run one question end to end. Streams progress on
    /// `options.stream_sink` if given, per §6.2.
    pub async fn run(&self, question: Question, options: RunOptions) -> OrchestratorResponse {
        let start = Instant::now();
        let request_id = Uuid::new_v4();
        let sink = options.stream_sink.clone();

        self.emit(&sink, EventType::Status, json!({ "message": "received" })).await;

        let classification = self.classify(&question, &sink).await;

        let filtered = self.filter_unavailable(classification).await;

        let plan = self.plan(&question, &filtered, &sink).await;

        let mut response = if !plan.validation.ok {
            self.emit(
                &sink,
                EventType::Error,
                json!({
                    "error_code": "PlanInvalid",
                    "message": plan.validation.errors.join("; "),
                    "recoverable": false,
                }),
            )
            .await;
            OrchestratorResponse::fatal(Some(plan.clone()))
        } else if question.flags.dry_run {
            OrchestratorResponse {
                rows: Vec::new(),
                representative_query_text: RepresentativeQuery::None,
                analysis: None,
                success: !plan.operations.is_empty(),
                session_id: None,
                plan_info: Some(plan.clone()),
                execution_summary: None,
            }
        } else {
            self.execute_and_aggregate(&question, plan.clone(), &options, &sink, request_id).await
        };

        if !question.flags.dry_run && plan.validation.ok && question.flags.analyze && response.success {
            response.analysis = self.analyze(&response.rows, &sink).await;
        }

        if question.flags.save_session {
            response.session_id = self.persist_session(&question, &response).await;
        }

        let total_time_ms = start.elapsed().as_millis() as u64;
        self.emit(
            &sink,
            EventType::Complete,
            json!({ "success": response.success, "total_time_ms": total_time_ms }),
        )
        .await;

        response
    }

    async fn classify(&self, question: &Question, sink: &Option<EventSink>) -> Classification {
        self.emit(sink, EventType::Classifying, json!({ "message": "selecting sources" })).await;
        let classification = self.classifier.classify(question).await;

        if classification.reasoning.starts_with("classifier unavailable") {
            self.emit(
                sink,
                EventType::Error,
                json!({
                    "error_code": "ClassificationUnavailable",
                    "message": classification.reasoning,
                    "recoverable": true,
                }),
            )
            .await;
        }

        self.emit(
            sink,
            EventType::DatabasesSelected,
            json!({
                "databases": classification.selected_sources,
                "reasoning": classification.reasoning,
                "is_cross_source": classification.is_cross_source,
                "confidence": classification.confidence,
            }),
        )
        .await;

        classification
    }

    /// Planner-level availability filter (§9 open question: availability
    /// gates planning, not classification).
    async fn filter_unavailable(&self, classification: Classification) -> Classification {
        let Some(probe) = &self.availability else {
            return classification;
        };

        let mut kept = Vec::with_capacity(classification.selected_sources.len());
        for source_id in &classification.selected_sources {
            let report = probe.status(source_id).await;
            if report.status == SourceStatus::Offline {
                tracing::warn!(source = %source_id, "dropping offline source from plan");
                continue;
            }
            kept.push(source_id.clone());
        }

        let is_cross_source = kept.len() > 1;
        Classification { selected_sources: kept, is_cross_source, ..classification }
    }

    async fn plan(&self, question: &Question, classification: &Classification, sink: &Option<EventSink>) -> Plan {
        self.emit(
            sink,
            EventType::Planning,
            json!({ "step": "build", "databases_involved": classification.selected_sources }),
        )
        .await;

        let mut plan = self.planner.build_validated(classification, question);

        if question.flags.optimize {
            let before = plan.operations.len();
            let optimized = self.planner.optimize(&plan);
            let mut optimized = optimized;
            optimized.validation = self.planner.validate(&optimized);
            self.emit(
                sink,
                EventType::PlanOptimization,
                json!({ "original_operations": before, "optimized_operations": optimized.operations.len() }),
            )
            .await;
            plan = optimized;
        }

        self.emit(
            sink,
            EventType::PlanValidated,
            json!({
                "operations": plan.operations.len(),
                "estimated_time": serde_json::Value::Null,
                "dependencies": plan.operations.iter().map(|o| o.depends_on.len()).sum::<usize>(),
            }),
        )
        .await;

        plan
    }

    async fn execute_and_aggregate(
        &self,
        question: &Question,
        plan: Plan,
        options: &RunOptions,
        sink: &Option<EventSink>,
        request_id: Uuid,
    ) -> OrchestratorResponse {
        let exec_options = ExecutionOptions {
            deadline: options.deadline,
            cancellation_token: options.cancellation_token.clone(),
            fail_fast: question.flags.fail_fast,
            stream_sink: sink.clone(),
            session_id: request_id,
        };

        let outcome = self.executor.run(plan.clone(), exec_options).await;

        self.emit(sink, EventType::Aggregating, json!({ "step": "merge", "progress": 1.0 })).await;
        let aggregated: AggregatedResult = Aggregator::aggregate(&plan, outcome);
        self.emit(
            sink,
            EventType::AggregationComplete,
            json!({ "total_rows": aggregated.rows.len(), "aggregation_time_ms": aggregated.execution_summary.wall_time_ms }),
        )
        .await;

        OrchestratorResponse {
            rows: aggregated.rows,
            representative_query_text: aggregated.representative_query_text,
            analysis: None,
            success: aggregated.success && !options.cancellation_token.is_cancelled(),
            session_id: None,
            plan_info: Some(plan),
            execution_summary: Some(aggregated.execution_summary),
        }
    }

    async fn analyze(&self, rows: &[Row], sink: &Option<EventSink>) -> Option<String> {
        let analyzer = self.analyzer.as_ref()?;
        self.emit(sink, EventType::AnalysisGenerating, json!({ "message": "summarizing results" })).await;
        match analyzer.analyze(rows).await {
            Ok(text) => {
                let mut chunks = Box::pin(chunk_analysis(text.clone()));
                while let Some((index, chunk)) = chunks.next().await {
                    self.emit(sink, EventType::AnalysisChunk, json!({ "text": chunk, "chunk_index": index })).await;
                }
                self.emit(sink, EventType::AnalysisComplete, json!({ "success": true })).await;
                Some(text)
            }
            Err(e) => {
                self.emit(sink, EventType::AnalysisComplete, json!({ "success": false, "error": e })).await;
                None
            }
        }
    }

    async fn persist_session(&self, question: &Question, response: &OrchestratorResponse) -> Option<Uuid> {
        let caller_id = &question.caller_id.0;
        let id = self.sessions.create(question.clone(), caller_id).await.ok()?;
        let mut session = self.sessions.get(id, caller_id).await.ok()?;

        session.status = if response.success { crate::session::SessionStatus::Completed } else { crate::session::SessionStatus::Failed };
        session.final_result = serde_json::to_value(response).ok();
        if let Some(plan) = &response.plan_info {
            for op in &plan.operations {
                let status = match &response.execution_summary {
                    Some(summary) => summary.per_op.get(&op.op_id).map_or("unknown".to_string(), |s| format!("{:?}", s.status)),
                    None => "not_executed".to_string(),
                };
                session.push_trace(op.op_id.clone(), status);
            }
        }

        let _ = self.sessions.update(session).await;
        Some(id)
    }

    async fn emit(&self, sink: &Option<EventSink>, event_type: EventType, payload: serde_json::Value) {
        if let Some(sink) = sink {
            sink.emit(event_type, payload).await;
        }
    }
}

/// Convenience constructor for a fresh [`EventSink`]/receiver pair sized
/// per [`DEFAULT_CHANNEL_CAPACITY`], for callers wiring up an SSE handler.
#[must_use]
pub fn new_event_channel(session_id: Uuid) -> (EventSink, tokio::sync::mpsc::Receiver<crate::stream::StreamEvent>) {
    EventSink::channel(session_id, DEFAULT_CHANNEL_CAPACITY)
}

/// Splits an analyzer's finished text into word-group chunks and yields
/// them one at a time, so `analysis_chunk` events genuinely arrive as a
/// token stream rather than the whole summary in one event, per §6.2.
const ANALYSIS_CHUNK_WORDS: usize = 8;

fn chunk_analysis(text: String) -> impl Stream<Item = (usize, String)> {
    async_stream::stream! {
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.is_empty() {
            yield (0, String::new());
            return;
        }
        for (index, group) in words.chunks(ANALYSIS_CHUNK_WORDS).enumerate() {
            yield (index, group.join(" "));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{rows_from_vec, AdapterRegistry, Deadline, NativeQuery, RowStream};
    use crate::classifier::SourceScore;
    use crate::error::AdapterError;
    use crate::question::{CallerIdentity, RequestFlags};
    use crate::rate_limit::SourceRateLimiter;
    use crate::row::{Cell, Provenance};
    use crate::session::MemorySessionStore;
    use crate::source::{Capability, SchemaSummary, Source, SourceKind, SourceStatus};
    use std::collections::BTreeMap;

    struct StubBackend(Vec<SourceScore>);

    #[async_trait]
    impl ClassifierBackend for StubBackend {
        async fn score_sources(&self, _q: &str, _c: &[String]) -> std::result::Result<Vec<SourceScore>, String> {
            Ok(self.0.clone())
        }
    }

    struct OneRowAdapter;

    #[async_trait]
    impl crate::adapter::Adapter for OneRowAdapter {
        async fn test(&self) -> std::result::Result<(), AdapterError> {
            Ok(())
        }

        async fn translate(&self, question: &str, _schema_hints: &SchemaSummary) -> std::result::Result<NativeQuery, AdapterError> {
            Ok(NativeQuery::new(format!("SELECT * FROM users /* {question} */")))
        }

        async fn execute(&self, _query: &NativeQuery, _deadline: Deadline) -> std::result::Result<RowStream, AdapterError> {
            let mut fields = BTreeMap::new();
            fields.insert("id".to_string(), Cell::Int(1));
            let row = Row::new(fields, Provenance { source_id: String::new(), op_id: String::new() });
            Ok(rows_from_vec(vec![row]))
        }

        async fn introspect(&self) -> std::result::Result<SchemaSummary, AdapterError> {
            Ok(SchemaSummary::default())
        }
    }

    fn registry() -> crate::source::SourceRegistry {
        crate::source::SourceRegistry::new(vec![Source {
            id: "pg".to_string(),
            kind: SourceKind::Relational,
            uri: "postgres://pg".to_string(),
            schema_summary: SchemaSummary { tables_or_collections: vec!["users".into()], content_hash: "seed".into() },
            caps: [Capability::TranslateNl, Capability::Introspect].into_iter().collect(),
            status: SourceStatus::Online,
        }])
        .unwrap()
    }

    fn build_orchestrator() -> Orchestrator<StubBackend> {
        let registry = registry();
        let backend = StubBackend(vec![SourceScore { source_id: "pg".to_string(), confidence: 0.9 }]);
        let classifier = Classifier::new(backend, registry.clone());
        let planner = Planner::new(registry.clone());
        let mut adapters = AdapterRegistry::new();
        adapters.register("pg", std::sync::Arc::new(OneRowAdapter));
        let executor = Executor::new(
            crate::executor::ExecutorConfig::default(),
            adapters,
            registry,
            SourceRateLimiter::new(crate::rate_limit::RateLimit::default()),
        );
        let sessions: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        Orchestrator::new(classifier, planner, executor, sessions)
    }

    fn question(text: &str, flags: RequestFlags) -> Question {
        Question::new(text, CallerIdentity("caller-1".into()), flags)
    }

    #[tokio::test]
    async fn single_source_happy_path_returns_rows() {
        let orchestrator = build_orchestrator();
        let response = orchestrator.run(question("show users", RequestFlags::default()), RunOptions::default()).await;
        assert!(response.success);
        assert_eq!(response.rows.len(), 1);
    }

    #[tokio::test]
    async fn dry_run_does_not_execute() {
        let orchestrator = build_orchestrator();
        let flags = RequestFlags { dry_run: true, ..RequestFlags::default() };
        let response = orchestrator.run(question("show users", flags), RunOptions::default()).await;
        assert!(response.success);
        assert!(response.rows.is_empty());
        assert!(response.plan_info.is_some());
    }

    #[tokio::test]
    async fn save_session_persists_and_returns_a_session_id() {
        let orchestrator = build_orchestrator();
        let flags = RequestFlags { save_session: true, ..RequestFlags::default() };
        let response = orchestrator.run(question("show users", flags), RunOptions::default()).await;
        assert!(response.session_id.is_some());
    }

    #[tokio::test]
    async fn event_stream_ends_with_exactly_one_complete_event_last() {
        let orchestrator = build_orchestrator();
        let (sink, mut rx) = new_event_channel(Uuid::new_v4());
        let options = RunOptions { stream_sink: Some(sink), ..RunOptions::default() };
        let run = tokio::spawn(async move { orchestrator.run(question("show users", RequestFlags::default()), options).await });

        let mut validator = crate::stream::OrderingValidator::default();
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            validator.observe(&event).unwrap();
            events.push(event);
        }
        run.await.unwrap();

        assert!(validator.exactly_one_complete_and_last());
        assert_eq!(events.last().unwrap().event_type, crate::stream::EventType::Complete);
    }

    struct StubAnalyzer;

    #[async_trait]
    impl Analyzer for StubAnalyzer {
        async fn analyze(&self, rows: &[Row]) -> std::result::Result<String, String> {
            Ok(format!("found {} matching rows across the word word word boundary", rows.len()))
        }
    }

    #[tokio::test]
    async fn analysis_arrives_as_more_than_one_chunk() {
        let orchestrator = build_orchestrator().with_analyzer(Arc::new(StubAnalyzer));
        let (sink, mut rx) = new_event_channel(Uuid::new_v4());
        let flags = RequestFlags { analyze: true, ..RequestFlags::default() };
        let options = RunOptions { stream_sink: Some(sink), ..RunOptions::default() };
        let run = tokio::spawn(async move { orchestrator.run(question("show users", flags), options).await });

        let mut chunk_indices = Vec::new();
        while let Some(event) = rx.recv().await {
            if event.event_type == EventType::AnalysisChunk {
                chunk_indices.push(event.payload.get("chunk_index").and_then(|v| v.as_u64()).unwrap());
            }
        }
        let response = run.await.unwrap();

        assert!(chunk_indices.len() > 1, "a summary longer than one chunk must stream as several events");
        assert_eq!(chunk_indices, (0..chunk_indices.len() as u64).collect::<Vec<_>>());
        assert!(response.analysis.unwrap().contains("matching rows"));
    }

    #[tokio::test]
    async fn chunk_analysis_splits_on_word_groups() {
        let chunks: Vec<(usize, String)> = chunk_analysis("one two three four five six seven eight nine ten".to_string()).collect().await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].0, 0);
        assert_eq!(chunks[1].0, 1);
    }
}
