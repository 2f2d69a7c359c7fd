//! Aggregator (C6): merges per-operation outputs into a single response
//! shape.
//!
//! There is exactly one output shape regardless of how many sources were
//! queried: concatenated rows in plan order, each carrying
//! `{source_id, op_id}` provenance.

use std::collections::HashMap;

use serde::Serialize;
use uuid::Uuid;

use crate::executor::{ExecutionOutcome, OperationResult, OperationStatus};
use crate::planner::{OperationKind, Plan};
use crate::row::Row;

/// Per-operation summary surfaced in `execution_summary.per_op`.
#[derive(Debug, Clone, Serialize)]
pub struct OperationSummary {
    pub status: OperationStatus,
    pub rows_count: usize,
    pub attempts: u32,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSummary {
    pub total_ops: usize,
    pub completed_ops: usize,
    pub failed_ops: usize,
    pub wall_time_ms: u64,
    pub per_op: HashMap<String, OperationSummary>,
}

/// One source's native query, for the cross-source representative text.
#[derive(Debug, Clone, Serialize)]
pub struct PerSourceQuery {
    pub source_id: String,
    pub native_query_text: String,
}

/// The human-readable query summary: a single string for single-source
/// plans, a structured per-source list for cross-source plans.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum RepresentativeQuery {
    Single(String),
    CrossSource(Vec<PerSourceQuery>),
    None,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregatedResult {
    pub question_id: Uuid,
    pub rows: Vec<Row>,
    pub representative_query_text: RepresentativeQuery,
    pub execution_summary: ExecutionSummary,
    pub success: bool,
}

pub struct Aggregator;

impl Aggregator {
    /// Merge a plan's operation results per §4.6.
    ///
    /// # Panics
    /// Never: operations referenced by the plan are expected to all have
    /// an entry in `outcome.results`, which the executor guarantees.
    #[must_use]
    pub fn aggregate(plan: &Plan, outcome: ExecutionOutcome) -> AggregatedResult {
        let is_cross_source = plan.operations.iter().any(|op| op.kind == OperationKind::Aggregate);

        let (rows, representative_query_text) = if is_cross_source {
            Self::aggregate_cross_source(plan, &outcome.results)
        } else {
            Self::pass_through_single_source(plan, &outcome.results)
        };

        let execution_summary = Self::summarize(plan, &outcome.results, outcome.wall_time_ms);
        let success = execution_summary.completed_ops > 0 || execution_summary.total_ops == 0;

        AggregatedResult {
            question_id: plan.question_id,
            rows,
            representative_query_text,
            execution_summary,
            success,
        }
    }

    fn pass_through_single_source(
        plan: &Plan,
        results: &HashMap<String, OperationResult>,
    ) -> (Vec<Row>, RepresentativeQuery) {
        let translate_op = plan.operations.iter().find(|op| op.kind == OperationKind::TranslateExecute);
        match translate_op.and_then(|op| results.get(&op.op_id)) {
            Some(result) if result.status == OperationStatus::Completed => {
                let query = result.native_query_text.clone().map(RepresentativeQuery::Single).unwrap_or(RepresentativeQuery::None);
                (result.rows.clone(), query)
            }
            _ => (Vec::new(), RepresentativeQuery::None),
        }
    }

    fn aggregate_cross_source(
        plan: &Plan,
        results: &HashMap<String, OperationResult>,
    ) -> (Vec<Row>, RepresentativeQuery) {
        let mut rows = Vec::new();
        let mut queries = Vec::new();

        for op in &plan.operations {
            if op.kind != OperationKind::TranslateExecute {
                continue;
            }
            if let Some(result) = results.get(&op.op_id) {
                if result.status == OperationStatus::Completed {
                    rows.extend(result.rows.iter().cloned());
                    if let Some(source_id) = &op.source_id {
                        if let Some(query) = &result.native_query_text {
                            queries.push(PerSourceQuery { source_id: source_id.clone(), native_query_text: query.clone() });
                        }
                    }
                }
            }
        }

        (rows, RepresentativeQuery::CrossSource(queries))
    }

    fn summarize(plan: &Plan, results: &HashMap<String, OperationResult>, wall_time_ms: u64) -> ExecutionSummary {
        let mut per_op = HashMap::with_capacity(results.len());
        let mut completed_ops = 0;
        let mut failed_ops = 0;

        for op in &plan.operations {
            if let Some(result) = results.get(&op.op_id) {
                match result.status {
                    OperationStatus::Completed => completed_ops += 1,
                    OperationStatus::Failed => failed_ops += 1,
                    _ => {}
                }
                let duration_ms = match (result.started_at, result.ended_at) {
                    (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
                    _ => None,
                };
                per_op.insert(
                    op.op_id.clone(),
                    OperationSummary {
                        status: result.status,
                        rows_count: result.rows.len(),
                        attempts: result.attempts,
                        duration_ms,
                        error: result.error.clone(),
                    },
                );
            }
        }

        ExecutionSummary { total_ops: plan.operations.len(), completed_ops, failed_ops, wall_time_ms, per_op }
    }
}
