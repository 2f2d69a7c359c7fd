//! Planner (C4): turns a [`Classification`] into a validated,
//! dependency-ordered [`Plan`].

use std::collections::{HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classifier::Classification;
use crate::question::Question;
use crate::source::{Capability, SourceRegistry, SourceStatus};

/// The kind of adapter-native call an operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    TranslateExecute,
    Introspect,
    Aggregate,
    NoOp,
}

/// A single adapter call within a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub op_id: String,
    pub source_id: Option<String>,
    pub kind: OperationKind,
    pub params: serde_json::Value,
    pub depends_on: Vec<String>,
    pub metadata: serde_json::Value,
}

impl Operation {
    fn required_capabilities(&self) -> Vec<Capability> {
        match self.kind {
            OperationKind::TranslateExecute => vec![Capability::TranslateNl],
            OperationKind::Introspect => vec![Capability::Introspect],
            OperationKind::Aggregate | OperationKind::NoOp => vec![],
        }
    }
}

/// Outcome of [`Planner::validate`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Validation {
    pub ok: bool,
    pub errors: Vec<String>,
}

/// A validated DAG of operations plus optional aggregator, produced once
/// per question and owned exclusively by the planner until handed to the
/// executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: Uuid,
    pub question_id: Uuid,
    pub operations: Vec<Operation>,
    pub validation: Validation,
}

impl Plan {
    #[must_use]
    pub fn operation_index_order(&self) -> HashMap<String, usize> {
        self.operations.iter().enumerate().map(|(i, op)| (op.op_id.clone(), i)).collect()
    }

    #[must_use]
    pub fn get(&self, op_id: &str) -> Option<&Operation> {
        self.operations.iter().find(|o| o.op_id == op_id)
    }
}

pub struct Planner {
    registry: SourceRegistry,
}

impl Planner {
    #[must_use]
    pub fn new(registry: SourceRegistry) -> Self {
        Self { registry }
    }

    /// Build a plan from a classification. Does not execute or validate;
    /// call [`Planner::validate`] (or rely on [`Planner::build_validated`])
    /// before handing the plan to the executor.
    #[must_use]
    pub fn build(&self, classification: &Classification, question: &Question) -> Plan {
        let mut operations = Vec::new();

        if classification.selected_sources.is_empty() {
            operations.push(Operation {
                op_id: "noop".to_string(),
                source_id: None,
                kind: OperationKind::NoOp,
                params: serde_json::Value::Null,
                depends_on: Vec::new(),
                metadata: serde_json::json!({ "reasoning": classification.reasoning }),
            });
            return Plan {
                plan_id: Uuid::new_v4(),
                question_id: question.id,
                operations,
                validation: Validation::default(),
            };
        }

        let mut translate_op_ids = Vec::new();

        for source_id in &classification.selected_sources {
            let mut depends_on = Vec::new();
            let schema_is_stale = self
                .registry
                .get(source_id)
                .map(|s| s.schema_summary.tables_or_collections.is_empty())
                .unwrap_or(true);
            if schema_is_stale {
                let introspect_id = format!("introspect:{source_id}");
                operations.push(Operation {
                    op_id: introspect_id.clone(),
                    source_id: Some(source_id.clone()),
                    kind: OperationKind::Introspect,
                    params: serde_json::Value::Null,
                    depends_on: Vec::new(),
                    metadata: serde_json::Value::Null,
                });
                depends_on.push(introspect_id);
            }

            let translate_id = format!("translate:{source_id}");
            operations.push(Operation {
                op_id: translate_id.clone(),
                source_id: Some(source_id.clone()),
                kind: OperationKind::TranslateExecute,
                params: serde_json::json!({ "question": question.text }),
                depends_on,
                metadata: serde_json::Value::Null,
            });
            translate_op_ids.push(translate_id);
        }

        if classification.is_cross_source {
            operations.push(Operation {
                op_id: "aggregate".to_string(),
                source_id: None,
                kind: OperationKind::Aggregate,
                params: serde_json::Value::Null,
                depends_on: translate_op_ids,
                metadata: serde_json::Value::Null,
            });
        }

        Plan { plan_id: Uuid::new_v4(), question_id: question.id, operations, validation: Validation::default() }
    }

    /// Build, then validate, setting `plan.validation` to the result.
    #[must_use]
    pub fn build_validated(&self, classification: &Classification, question: &Question) -> Plan {
        let mut plan = self.build(classification, question);
        plan.validation = self.validate(&plan);
        plan
    }

    /// Check DAG-ness (Kahn's algorithm via `petgraph::toposort`), that
    /// every `source_id` resolves, that required capabilities are present,
    /// and that no operation is an isolated node unless it is the terminal
    /// aggregator or the sole no-op.
    #[must_use]
    pub fn validate(&self, plan: &Plan) -> Validation {
        let mut errors = Vec::new();

        if plan.operations.len() == 1 && plan.operations[0].kind == OperationKind::NoOp {
            return Validation { ok: true, errors };
        }

        let mut graph = DiGraph::<(), ()>::new();
        let mut indices: HashMap<&str, NodeIndex> = HashMap::new();
        for op in &plan.operations {
            indices.insert(&op.op_id, graph.add_node(()));
        }

        let known_ids: HashSet<&str> = plan.operations.iter().map(|o| o.op_id.as_str()).collect();
        for op in &plan.operations {
            for dep in &op.depends_on {
                if !known_ids.contains(dep.as_str()) {
                    errors.push(format!("operation {} depends on unknown operation {}", op.op_id, dep));
                    continue;
                }
                graph.add_edge(indices[dep.as_str()], indices[op.op_id.as_str()], ());
            }
        }

        if toposort(&graph, None).is_err() {
            errors.push("dependency graph contains a cycle".to_string());
        }

        for op in &plan.operations {
            if let Some(source_id) = &op.source_id {
                match self.registry.get(source_id) {
                    Ok(source) => {
                        for cap in op.required_capabilities() {
                            if !source.has_cap(cap) {
                                errors.push(format!(
                                    "operation {} requires {cap:?} which source {source_id} does not declare",
                                    op.op_id
                                ));
                            }
                        }
                    }
                    Err(_) => errors.push(format!("operation {} references unknown source {source_id}", op.op_id)),
                }
            }
        }

        // Reject isolated nodes: an operation with no dependents and no
        // dependencies, in a multi-operation plan, that is neither a data
        // source nor the terminal aggregator.
        if plan.operations.len() > 1 {
            let is_dependency_of_something: HashSet<&str> =
                plan.operations.iter().flat_map(|o| o.depends_on.iter().map(String::as_str)).collect();
            for op in &plan.operations {
                let is_depended_on = is_dependency_of_something.contains(op.op_id.as_str());
                let has_deps = !op.depends_on.is_empty();
                let is_source_producer = matches!(op.kind, OperationKind::TranslateExecute | OperationKind::Introspect);
                if !is_depended_on && !has_deps && !is_source_producer {
                    errors.push(format!("operation {} is an orphan: neither feeds nor depends on anything", op.op_id));
                }
            }
        }

        Validation { ok: errors.is_empty(), errors }
    }

    /// Advisory optimization pass: coalesce duplicate introspection
    /// operations for the same source, and drop translate branches whose
    /// source is reported `offline`.
    #[must_use]
    pub fn optimize(&self, plan: &Plan) -> Plan {
        let mut seen_introspect: HashSet<String> = HashSet::new();
        let mut operations: Vec<Operation> = Vec::new();

        for op in &plan.operations {
            if op.kind == OperationKind::Introspect {
                let key = op.source_id.clone().unwrap_or_default();
                if !seen_introspect.insert(key) {
                    continue; // duplicate introspection op for a source already covered
                }
            }
            if let Some(source_id) = &op.source_id {
                if matches!(self.registry.get(source_id).map(|s| s.status), Ok(SourceStatus::Offline)) {
                    continue;
                }
            }
            operations.push(op.clone());
        }

        // Drop dependency edges that pointed at a dropped operation.
        let remaining_ids: HashSet<String> = operations.iter().map(|o| o.op_id.clone()).collect();
        for op in &mut operations {
            op.depends_on.retain(|d| remaining_ids.contains(d));
        }

        Plan { plan_id: plan.plan_id, question_id: plan.question_id, operations, validation: Validation::default() }
    }
}
