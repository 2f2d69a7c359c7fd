//! Executor (C5): runs a validated plan with bounded concurrency, retries,
//! cancellation and partial-result tolerance.

pub mod state;

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::TryStreamExt;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::adapter::{Adapter, AdapterRegistry, Deadline, NativeQuery};
use crate::error::{AdapterError, Error};
use crate::planner::{Operation, OperationKind, Plan};
use crate::rate_limit::SourceRateLimiter;
use crate::retry::RetryPolicy;
use crate::row::{Provenance, Row};
use crate::source::SourceRegistry;
use crate::stream::{EventSink, EventType};

pub use state::{OperationResult, OperationStatus};

/// Tunables for the worker pool, independent of any single plan.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_parallelism: usize,
    pub grace_period: Duration,
    pub retry: RetryPolicy,
    pub per_kind_ceiling: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_parallelism: 8,
            grace_period: Duration::from_secs(2),
            retry: RetryPolicy::default(),
            per_kind_ceiling: Duration::from_secs(30),
        }
    }
}

/// Per-request execution knobs (§6.1, §5).
pub struct ExecutionOptions {
    pub deadline: Option<Duration>,
    pub cancellation_token: CancellationToken,
    pub fail_fast: bool,
    pub stream_sink: Option<EventSink>,
    pub session_id: Uuid,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            deadline: None,
            cancellation_token: CancellationToken::new(),
            fail_fast: false,
            stream_sink: None,
            session_id: Uuid::new_v4(),
        }
    }
}

/// What the executor hands back to the aggregator: every operation's
/// terminal result, keyed by `op_id`.
pub struct ExecutionOutcome {
    pub results: HashMap<String, OperationResult>,
    pub wall_time_ms: u64,
}

enum CallOutcome {
    Completed(Vec<Row>),
    AdapterFailed(AdapterError),
    TimedOut,
    Cancelled,
}

struct SchedulerState {
    results: HashMap<String, OperationResult>,
    remaining_deps: HashMap<String, usize>,
    ready: BinaryHeap<Reverse<(usize, String)>>,
    done_count: usize,
}

struct Shared {
    plan_order: HashMap<String, usize>,
    dependents: HashMap<String, Vec<String>>,
    total_ops: usize,
    state: Mutex<SchedulerState>,
    notify: Notify,
}

impl Shared {
    fn push_ready(&self, state: &mut SchedulerState, op_id: &str) {
        let order = self.plan_order[op_id];
        state.results.get_mut(op_id).unwrap().status = OperationStatus::Ready;
        state.ready.push(Reverse((order, op_id.to_string())));
    }

    /// Propagate a terminal status to direct dependents, cascading skips
    /// transitively and promoting to READY once all deps of a dependent
    /// are COMPLETED.
    fn on_terminal(&self, op_id: &str, status: OperationStatus) {
        let mut state = self.state.lock();
        state.done_count += 1;
        let dependents = self.dependents.get(op_id).cloned().unwrap_or_default();
        for dep in dependents {
            if status == OperationStatus::Completed {
                if let Some(remaining) = state.remaining_deps.get_mut(&dep) {
                    *remaining -= 1;
                    if *remaining == 0 {
                        self.push_ready(&mut state, &dep);
                    }
                }
            } else {
                // upstream did not complete: cascade SKIPPED regardless of
                // how many other dependencies this node still has.
                self.skip_cascade(&mut state, &dep);
            }
        }
        self.notify.notify_waiters();
    }

    fn skip_cascade(&self, state: &mut SchedulerState, op_id: &str) {
        if let Some(result) = state.results.get(op_id) {
            if result.status.is_terminal() {
                return;
            }
        }
        state.done_count += 1;
        if let Some(result) = state.results.get_mut(op_id) {
            result.status = OperationStatus::Skipped;
            result.error = Some("upstream_failure".to_string());
            result.ended_at = Some(Utc::now());
        }
        let dependents = self.dependents.get(op_id).cloned().unwrap_or_default();
        for dep in dependents {
            self.skip_cascade(state, &dep);
        }
    }
}

async fn next_ready(shared: &Shared) -> Option<String> {
    loop {
        let notified = shared.notify.notified();
        {
            let mut state = shared.state.lock();
            if let Some(Reverse((_, op_id))) = state.ready.pop() {
                return Some(op_id);
            }
            if state.done_count >= shared.total_ops {
                return None;
            }
        }
        notified.await;
    }
}

/// How many rows a streaming-capable adapter accumulates before a
/// `partial_results` event is emitted. Adapters that don't support
/// streaming only ever produce one terminal batch, so this never applies
/// to them.
const PARTIAL_RESULTS_BATCH_SIZE: usize = 50;

async fn emit_partial_results(sink: &Option<EventSink>, source_id: &str, op_id: &str, batch: &[Row]) {
    if let Some(sink) = sink {
        sink.emit(
            EventType::PartialResults,
            json!({ "database": source_id, "op_id": op_id, "rows_count": batch.len() }),
        )
        .await;
    }
}

async fn adapter_call_and_collect(
    adapter: Arc<dyn Adapter>,
    query: NativeQuery,
    remaining: Duration,
    sink: Option<EventSink>,
    source_id: String,
    op_id: String,
) -> Result<Vec<Row>, AdapterError> {
    let mut stream = adapter.execute(&query, Deadline { remaining }).await?;
    if !adapter.supports_streaming() {
        return stream.try_collect().await;
    }

    let mut rows = Vec::new();
    let mut batch = Vec::new();
    while let Some(row) = stream.try_next().await? {
        batch.push(row);
        if batch.len() >= PARTIAL_RESULTS_BATCH_SIZE {
            emit_partial_results(&sink, &source_id, &op_id, &batch).await;
            rows.append(&mut batch);
        }
    }
    if !batch.is_empty() {
        emit_partial_results(&sink, &source_id, &op_id, &batch).await;
        rows.append(&mut batch);
    }
    Ok(rows)
}

async fn run_with_cancellation(
    adapter: Arc<dyn Adapter>,
    query: NativeQuery,
    per_op_deadline: Duration,
    cancel: CancellationToken,
    grace: Duration,
    sink: Option<EventSink>,
    source_id: String,
    op_id: String,
) -> CallOutcome {
    let call = tokio::time::timeout(
        per_op_deadline,
        adapter_call_and_collect(adapter, query, per_op_deadline, sink, source_id, op_id),
    );
    tokio::pin!(call);

    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            match tokio::time::timeout(grace, &mut call).await {
                Ok(Ok(Ok(rows))) => CallOutcome::Completed(rows),
                Ok(Ok(Err(e))) => CallOutcome::AdapterFailed(e),
                _ => CallOutcome::Cancelled,
            }
        }
        result = &mut call => match result {
            Ok(Ok(rows)) => CallOutcome::Completed(rows),
            Ok(Err(e)) => CallOutcome::AdapterFailed(e),
            Err(_elapsed) => CallOutcome::TimedOut,
        },
    }
}

struct WorkerContext {
    shared: Arc<Shared>,
    plan: Arc<Plan>,
    adapters: AdapterRegistry,
    registry: SourceRegistry,
    limiter: SourceRateLimiter,
    config: ExecutorConfig,
    cancel: CancellationToken,
    fail_fast: bool,
    deadline_at: Option<Instant>,
    sink: Option<EventSink>,
}

impl WorkerContext {
    fn remaining_plan_time(&self) -> Duration {
        match self.deadline_at {
            Some(at) => at.saturating_duration_since(Instant::now()),
            None => self.config.per_kind_ceiling,
        }
    }

    async fn emit(&self, event_type: EventType, payload: serde_json::Value) {
        if let Some(sink) = &self.sink {
            sink.emit(event_type, payload).await;
        }
    }

    async fn run_operation(&self, op: &Operation) {
        {
            let mut state = self.shared.state.lock();
            let result = state.results.get_mut(&op.op_id).unwrap();
            result.status = OperationStatus::Running;
            result.started_at = Some(Utc::now());
        }

        let status = match op.kind {
            OperationKind::NoOp => self.finish_noop(op).await,
            OperationKind::Aggregate => self.run_aggregate(op),
            OperationKind::Introspect => self.run_introspect_operation(op).await,
            OperationKind::TranslateExecute => self.run_adapter_operation(op).await,
        };

        self.shared.on_terminal(&op.op_id, status);
    }

    async fn finish_noop(&self, op: &Operation) -> OperationStatus {
        let mut state = self.shared.state.lock();
        let result = state.results.get_mut(&op.op_id).unwrap();
        result.status = OperationStatus::Completed;
        result.ended_at = Some(Utc::now());
        OperationStatus::Completed
    }

    fn run_aggregate(&self, op: &Operation) -> OperationStatus {
        let mut rows = Vec::new();
        {
            let state = self.shared.state.lock();
            for dep in &op.depends_on {
                if let Some(dep_result) = state.results.get(dep) {
                    rows.extend(dep_result.rows.iter().cloned());
                }
            }
        }
        let mut state = self.shared.state.lock();
        let result = state.results.get_mut(&op.op_id).unwrap();
        result.rows = rows;
        result.status = OperationStatus::Completed;
        result.ended_at = Some(Utc::now());
        OperationStatus::Completed
    }

    /// Refreshes a source's schema summary via `Adapter::introspect` and
    /// installs it into the registry, rather than fabricating a query
    /// string and running it through the translate/execute path.
    async fn run_introspect_operation(&self, op: &Operation) -> OperationStatus {
        let source_id = match &op.source_id {
            Some(id) => id.clone(),
            None => {
                self.record_error(op, &Error::PlanInvalid("operation missing source_id".into()));
                return OperationStatus::Failed;
            }
        };

        let adapter = match self.adapters.get(&source_id) {
            Some(a) => a,
            None => {
                self.record_error(op, &Error::AdapterPermanent { source_id, message: "no adapter registered".into() });
                return OperationStatus::Failed;
            }
        };

        self.emit(EventType::SchemaLoading, json!({ "database": source_id, "op_id": op.op_id })).await;

        let summary = match adapter.introspect().await {
            Ok(summary) => summary,
            Err(e) => {
                let err = e.into_error(&source_id);
                self.emit_error(&op.op_id, &source_id, &err).await;
                self.record_error(op, &err);
                return OperationStatus::Failed;
            }
        };

        self.emit(
            EventType::SchemaChunks,
            json!({ "database": source_id, "op_id": op.op_id, "tables_or_collections": summary.tables_or_collections }),
        )
        .await;

        if let Err(e) = self.registry.update_schema(&source_id, summary) {
            self.record_error(op, &e);
            return OperationStatus::Failed;
        }

        let mut state = self.shared.state.lock();
        let result = state.results.get_mut(&op.op_id).unwrap();
        result.status = OperationStatus::Completed;
        result.ended_at = Some(Utc::now());
        OperationStatus::Completed
    }

    async fn run_adapter_operation(&self, op: &Operation) -> OperationStatus {
        let source_id = match &op.source_id {
            Some(id) => id.clone(),
            None => {
                self.record_error(op, &Error::PlanInvalid("operation missing source_id".into()));
                return OperationStatus::Failed;
            }
        };

        let adapter = match self.adapters.get(&source_id) {
            Some(a) => a,
            None => {
                self.record_error(op, &Error::AdapterPermanent { source_id, message: "no adapter registered".into() });
                return OperationStatus::Failed;
            }
        };

        let schema_hints = self.registry.schema_summary(&source_id).unwrap_or_default();
        let question = op.params.get("question").and_then(|v| v.as_str()).unwrap_or_default().to_string();

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            {
                let mut state = self.shared.state.lock();
                state.results.get_mut(&op.op_id).unwrap().attempts = attempt;
            }

            self.limiter.acquire(&source_id).await;

            self.emit(
                EventType::QueryGenerating,
                json!({ "database": source_id, "op_id": op.op_id }),
            )
            .await;

            let query = match adapter.translate(&question, &schema_hints).await {
                Ok(q) => q,
                Err(e) => {
                    let err = e.into_error(&source_id);
                    if err.retryable() && self.config.retry.should_retry(attempt) {
                        tokio::time::sleep(self.config.retry.backoff(attempt)).await;
                        continue;
                    }
                    self.emit_error(&op.op_id, &source_id, &err).await;
                    self.record_error(op, &err);
                    return OperationStatus::Failed;
                }
            };

            self.emit(
                EventType::QueryValidating,
                json!({ "database": source_id, "native_query": query.text, "valid": true }),
            )
            .await;
            self.emit(
                EventType::QueryExecuting,
                json!({ "database": source_id, "native_query": query.text, "op_id": op.op_id }),
            )
            .await;

            let per_op_deadline = self.remaining_plan_time().min(self.config.per_kind_ceiling);
            let outcome = run_with_cancellation(
                adapter.clone(),
                query.clone(),
                per_op_deadline,
                self.cancel.clone(),
                self.config.grace_period,
                self.sink.clone(),
                source_id.clone(),
                op.op_id.clone(),
            )
            .await;

            match outcome {
                CallOutcome::Completed(rows) => {
                    let rows = attach_provenance(rows, &source_id, &op.op_id);
                    self.emit(
                        EventType::ResultsReady,
                        json!({ "database": source_id, "op_id": op.op_id, "rows_count": rows.len() }),
                    )
                    .await;
                    let mut state = self.shared.state.lock();
                    let result = state.results.get_mut(&op.op_id).unwrap();
                    result.rows = rows;
                    result.native_query_text = Some(query.text.clone());
                    result.status = OperationStatus::Completed;
                    result.ended_at = Some(Utc::now());
                    return OperationStatus::Completed;
                }
                CallOutcome::AdapterFailed(e) => {
                    let err = e.into_error(&source_id);
                    if err.retryable() && self.config.retry.should_retry(attempt) {
                        tokio::time::sleep(self.config.retry.backoff(attempt)).await;
                        continue;
                    }
                    self.emit_error(&op.op_id, &source_id, &err).await;
                    self.record_error(op, &err);
                    if self.fail_fast {
                        self.cancel.cancel();
                    }
                    return OperationStatus::Failed;
                }
                CallOutcome::TimedOut => {
                    let err = Error::Timeout { elapsed_ms: per_op_deadline.as_millis() as u64 };
                    self.emit_error(&op.op_id, &source_id, &err).await;
                    self.record_cancelled(op, "timeout");
                    return OperationStatus::Cancelled;
                }
                CallOutcome::Cancelled => {
                    self.record_cancelled(op, "cancelled");
                    return OperationStatus::Cancelled;
                }
            }
        }
    }

    async fn emit_error(&self, op_id: &str, source_id: &str, err: &Error) {
        self.emit(
            EventType::Error,
            json!({
                "error_code": err.code(),
                "message": err.to_string(),
                "recoverable": err.recoverable(),
                "op_id": op_id,
                "database": source_id,
            }),
        )
        .await;
    }

    fn record_error(&self, op: &Operation, err: &Error) {
        let mut state = self.shared.state.lock();
        let result = state.results.get_mut(&op.op_id).unwrap();
        result.record_failure(err);
    }

    fn record_cancelled(&self, op: &Operation, reason: &str) {
        let mut state = self.shared.state.lock();
        let result = state.results.get_mut(&op.op_id).unwrap();
        result.status = OperationStatus::Cancelled;
        result.error = Some(reason.to_string());
        result.ended_at = Some(Utc::now());
    }
}

fn attach_provenance(rows: Vec<Row>, source_id: &str, op_id: &str) -> Vec<Row> {
    rows.into_iter()
        .map(|mut row| {
            row.provenance = Provenance { source_id: source_id.to_string(), op_id: op_id.to_string() };
            row
        })
        .collect()
}

/// The concurrency core. Stateless between calls to [`Executor::run`]: all
/// per-request bookkeeping lives in [`Shared`], built fresh for each plan.
pub struct Executor {
    config: ExecutorConfig,
    adapters: AdapterRegistry,
    registry: SourceRegistry,
    limiter: SourceRateLimiter,
}

impl Executor {
    #[must_use]
    pub fn new(config: ExecutorConfig, adapters: AdapterRegistry, registry: SourceRegistry, limiter: SourceRateLimiter) -> Self {
        Self { config, adapters, registry, limiter }
    }

    pub async fn run(&self, plan: Plan, options: ExecutionOptions) -> ExecutionOutcome {
        let start = Instant::now();
        let plan = Arc::new(plan);

        let plan_order: HashMap<String, usize> = plan.operation_index_order();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        let mut remaining_deps: HashMap<String, usize> = HashMap::new();
        let mut results = HashMap::new();

        for op in &plan.operations {
            remaining_deps.insert(op.op_id.clone(), op.depends_on.len());
            results.insert(op.op_id.clone(), OperationResult::pending(op.op_id.clone()));
            for dep in &op.depends_on {
                dependents.entry(dep.clone()).or_default().push(op.op_id.clone());
            }
        }

        let total_ops = plan.operations.len();
        let ready: BinaryHeap<Reverse<(usize, String)>> = plan
            .operations
            .iter()
            .filter(|op| op.depends_on.is_empty())
            .map(|op| Reverse((plan_order[&op.op_id], op.op_id.clone())))
            .collect();

        for op in &plan.operations {
            if op.depends_on.is_empty() {
                results.get_mut(&op.op_id).unwrap().status = OperationStatus::Ready;
            }
        }

        let shared = Arc::new(Shared {
            plan_order,
            dependents,
            total_ops,
            state: Mutex::new(SchedulerState { results, remaining_deps, ready, done_count: 0 }),
            notify: Notify::new(),
        });

        if let Some(deadline) = options.deadline {
            let cancel = options.cancellation_token.clone();
            let shared_for_timer = Arc::clone(&shared);
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                cancel.cancel();
                shared_for_timer.notify.notify_waiters();
            });
        }

        let deadline_at = options.deadline.map(|d| Instant::now() + d);
        let worker_count = self.config.max_parallelism.min(total_ops.max(1));
        let mut handles = Vec::with_capacity(worker_count);

        for _ in 0..worker_count {
            let ctx = Arc::new(WorkerContext {
                shared: Arc::clone(&shared),
                plan: Arc::clone(&plan),
                adapters: self.adapters.clone(),
                registry: self.registry.clone(),
                limiter: self.limiter.clone(),
                config: self.config.clone(),
                cancel: options.cancellation_token.clone(),
                fail_fast: options.fail_fast,
                deadline_at,
                sink: options.stream_sink.clone(),
            });
            handles.push(tokio::spawn(async move {
                loop {
                    if ctx.cancel.is_cancelled() {
                        force_cancel_remaining(&ctx.shared);
                        break;
                    }
                    match next_ready(&ctx.shared).await {
                        Some(op_id) => {
                            if ctx.cancel.is_cancelled() {
                                force_cancel_remaining(&ctx.shared);
                                break;
                            }
                            let op = ctx.plan.get(&op_id).cloned().expect("op exists in plan");
                            ctx.run_operation(&op).await;
                        }
                        None => break,
                    }
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        // Final sweep: anything left non-terminal (e.g. a cancellation
        // landed between a worker's last pop and the ready-set going
        // empty) is forced to CANCELLED so no operation remains RUNNING
        // after completion.
        force_cancel_remaining(&shared);

        let results = shared.state.lock().results.clone();
        ExecutionOutcome { results, wall_time_ms: start.elapsed().as_millis() as u64 }
    }
}

fn force_cancel_remaining(shared: &Shared) {
    let mut state = shared.state.lock();
    let ids: Vec<String> = state
        .results
        .iter()
        .filter(|(_, r)| !r.status.is_terminal())
        .map(|(id, _)| id.clone())
        .collect();
    for id in ids {
        if let Some(result) = state.results.get_mut(&id) {
            result.status = OperationStatus::Cancelled;
            result.ended_at = Some(Utc::now());
        }
        state.done_count += 1;
    }
}

#[cfg(test)]
mod tests;
