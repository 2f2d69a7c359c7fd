//! Tagged-variant row representation shared by every adapter.
//!
//! Every adapter converts natively into this tagged variant before the
//! aggregator ever sees it, so merging rows from a relational source and a
//! document source is just concatenation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single cell value, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    Bytes(Vec<u8>),
    Nested(BTreeMap<String, Cell>),
}

/// One row of output, keyed by column/field name, plus the provenance of
/// which source and operation produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    pub fields: BTreeMap<String, Cell>,
    /// `{source_id, op_id}` provenance. Always populated by the aggregator
    /// if the adapter did not already attach it.
    pub provenance: Provenance,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub source_id: String,
    pub op_id: String,
}

impl Row {
    #[must_use]
    pub fn new(fields: BTreeMap<String, Cell>, provenance: Provenance) -> Self {
        Self { fields, provenance }
    }
}
