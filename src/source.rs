//! Source Registry (C1): the authoritative list of configured sources.
//!
//! The registry is the sole mutator of [`Source`] entries. Reads take a
//! cheap `Arc` clone of the current snapshot so callers never observe a
//! half-updated registry; a reload swaps the snapshot atomically under a
//! short-lived write lock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The kind of backend a source represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Relational,
    Document,
    Vector,
    MessagingApi,
    CommerceApi,
    AnalyticsApi,
}

/// A capability an adapter may declare. The planner checks a plan's
/// required capabilities against a source's declared set before allowing
/// an operation to run against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    TranslateNl,
    Introspect,
    VectorSearch,
    StreamingResults,
    Explain,
    AnalyzeResult,
}

/// Coarse health state, as reported by the availability probe (§6.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Online,
    Degraded,
    Offline,
    Unknown,
}

/// A compact description of a source's schema, handed to the planner and
/// to adapters performing NL translation. Adapters own the real schema;
/// this is the cached summary the registry serves without a round trip.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaSummary {
    pub tables_or_collections: Vec<String>,
    pub content_hash: String,
}

/// A configured backend the orchestrator can query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub kind: SourceKind,
    pub uri: String,
    pub schema_summary: SchemaSummary,
    pub caps: HashSet<Capability>,
    #[serde(default = "default_status")]
    pub status: SourceStatus,
}

fn default_status() -> SourceStatus {
    SourceStatus::Unknown
}

impl Source {
    #[must_use]
    pub fn has_cap(&self, cap: Capability) -> bool {
        self.caps.contains(&cap)
    }
}

type Snapshot = Arc<HashMap<String, Source>>;

/// The registry. Cheap to clone (it is just an `Arc` to a `RwLock`), so it
/// can be shared across the classifier, planner and executor without extra
/// synchronization layers.
#[derive(Clone, Debug)]
pub struct SourceRegistry {
    snapshot: Arc<RwLock<Snapshot>>,
}

impl SourceRegistry {
    /// Build a registry from a configuration-loaded list of sources.
    ///
    /// # Errors
    /// Returns [`Error::ConfigInvalid`] if two sources share an id or any
    /// source is missing its `id`/`uri`.
    pub fn new(sources: Vec<Source>) -> Result<Self> {
        let snapshot = build_snapshot(sources)?;
        Ok(Self { snapshot: Arc::new(RwLock::new(Arc::new(snapshot))) })
    }

    /// Atomically replace the registry contents, e.g. on a config reload.
    /// Readers in flight keep using their already-cloned snapshot.
    pub fn reload(&self, sources: Vec<Source>) -> Result<()> {
        let snapshot = build_snapshot(sources)?;
        *self.snapshot.write() = Arc::new(snapshot);
        Ok(())
    }

    #[must_use]
    pub fn list(&self) -> Vec<Source> {
        self.snapshot.read().values().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Result<Source> {
        self.snapshot.read().get(id).cloned().ok_or(Error::NotFound)
    }

    #[must_use]
    pub fn by_kind(&self, kind: SourceKind) -> Vec<Source> {
        self.snapshot.read().values().filter(|s| s.kind == kind).cloned().collect()
    }

    pub fn schema_summary(&self, id: &str) -> Result<SchemaSummary> {
        self.get(id).map(|s| s.schema_summary)
    }

    /// Accepts a freshly introspected [`SchemaSummary`] for one source,
    /// skipping the write if `fresh.content_hash` matches what is already
    /// cached: a stale introspection result never overwrites a newer one,
    /// and an unchanged schema never triggers a reload for readers who only
    /// care about invalidation. Returns whether the stored summary changed.
    pub fn update_schema(&self, id: &str, fresh: SchemaSummary) -> Result<bool> {
        let mut guard = self.snapshot.write();
        let unchanged = match guard.get(id) {
            Some(current) => current.schema_summary.content_hash == fresh.content_hash,
            None => return Err(Error::NotFound),
        };
        if unchanged {
            return Ok(false);
        }
        let mut next: HashMap<String, Source> = (**guard).clone();
        if let Some(entry) = next.get_mut(id) {
            entry.schema_summary = fresh;
        }
        *guard = Arc::new(next);
        Ok(true)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.snapshot.read().contains_key(id)
    }
}

fn build_snapshot(sources: Vec<Source>) -> Result<HashMap<String, Source>> {
    let mut map = HashMap::with_capacity(sources.len());
    for source in sources {
        if source.id.is_empty() {
            return Err(Error::ConfigInvalid("source missing id".into()));
        }
        if source.uri.is_empty() {
            return Err(Error::ConfigInvalid(format!("source {} missing uri", source.id)));
        }
        if map.insert(source.id.clone(), source.clone()).is_some() {
            return Err(Error::ConfigInvalid(format!("duplicate source id: {}", source.id)));
        }
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn rejects_duplicate_ids() {
        let err = SourceRegistry::new(vec![source("a"), source("a")]).unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid(_)));
    }

    #[test]
    fn rejects_missing_uri() {
        let mut s = source("a");
        s.uri.clear();
        let err = SourceRegistry::new(vec![s]).unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid(_)));
    }

    #[test]
    fn reload_is_visible_to_new_reads() {
        let registry = SourceRegistry::new(vec![source("a")]).unwrap();
        assert_eq!(registry.list().len(), 1);
        registry.reload(vec![source("a"), source("b")]).unwrap();
        assert_eq!(registry.list().len(), 2);
    }

    #[test]
    fn get_unknown_source_is_not_found() {
        let registry = SourceRegistry::new(vec![source("a")]).unwrap();
        assert!(matches!(registry.get("missing"), Err(Error::NotFound)));
    }

    #[test]
    fn update_schema_applies_when_content_hash_changes() {
        let registry = SourceRegistry::new(vec![source("a")]).unwrap();
        let fresh = SchemaSummary { tables_or_collections: vec!["users".into()], content_hash: "abc".into() };
        assert!(registry.update_schema("a", fresh.clone()).unwrap());
        assert_eq!(registry.schema_summary("a").unwrap().content_hash, "abc");
    }

    #[test]
    fn update_schema_is_a_noop_when_content_hash_is_unchanged() {
        let registry = SourceRegistry::new(vec![source("a")]).unwrap();
        let fresh = SchemaSummary { tables_or_collections: vec!["users".into()], content_hash: "abc".into() };
        assert!(registry.update_schema("a", fresh.clone()).unwrap());
        assert!(!registry.update_schema("a", fresh).unwrap(), "same content hash must not trigger a reload");
    }

    #[test]
    fn update_schema_rejects_unknown_source() {
        let registry = SourceRegistry::new(vec![source("a")]).unwrap();
        assert!(matches!(registry.update_schema("missing", SchemaSummary::default()), Err(Error::NotFound)));
    }
}
