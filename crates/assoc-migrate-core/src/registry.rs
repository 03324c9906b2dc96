use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::CanonicalId;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct IdentityEntry {
    pub source_table: String,
    pub legacy_id: i64,
    pub canonical_id: CanonicalId,
}

/// Per-run mapping from `(source table, legacy id)` to canonical identifiers.
///
/// Entries are allocated on first lookup, so a foreign key can be resolved
/// before (or without) the referenced row ever being transformed.
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    tables: BTreeMap<String, BTreeMap<i64, CanonicalId>>,
    issued: HashSet<CanonicalId>,
}

impl IdentityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical id for `legacy_id` in `table`, allocating it on first use.
    pub fn resolve(&mut self, table: &str, legacy_id: i64) -> CanonicalId {
        if let Some(existing) = self.lookup(table, legacy_id) {
            return existing;
        }

        let id = self.fresh_id();
        self.tables.entry(table.to_string()).or_default().insert(legacy_id, id);
        tracing::trace!(table, legacy_id, canonical_id = %id, "allocated canonical id");
        id
    }

    /// Resolve a foreign-key cell. Absent, zero or negative ids reference nothing.
    pub fn resolve_reference(&mut self, table: &str, legacy_id: Option<i64>) -> Option<CanonicalId> {
        match legacy_id {
            Some(id) if id > 0 => Some(self.resolve(table, id)),
            _ => None,
        }
    }

    #[must_use]
    pub fn lookup(&self, table: &str, legacy_id: i64) -> Option<CanonicalId> {
        self.tables.get(table).and_then(|ids| ids.get(&legacy_id)).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.issued.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.issued.is_empty()
    }

    /// All entries ordered by table then legacy id.
    #[must_use]
    pub fn entries(&self) -> Vec<IdentityEntry> {
        self.tables
            .iter()
            .flat_map(|(table, ids)| {
                ids.iter().map(move |(legacy_id, canonical_id)| IdentityEntry {
                    source_table: table.clone(),
                    legacy_id: *legacy_id,
                    canonical_id: *canonical_id,
                })
            })
            .collect()
    }

    /// Preload mappings recorded by an earlier run. Returns how many were adopted.
    ///
    /// A pair that is already mapped keeps its current id, as does any entry
    /// whose canonical id is already taken by another pair.
    pub fn seed<I>(&mut self, entries: I) -> usize
    where
        I: IntoIterator<Item = IdentityEntry>,
    {
        let mut adopted = 0;
        for entry in entries {
            if self.lookup(&entry.source_table, entry.legacy_id).is_some()
                || self.issued.contains(&entry.canonical_id)
            {
                continue;
            }
            self.issued.insert(entry.canonical_id);
            self.tables
                .entry(entry.source_table)
                .or_default()
                .insert(entry.legacy_id, entry.canonical_id);
            adopted += 1;
        }
        adopted
    }

    fn fresh_id(&mut self) -> CanonicalId {
        loop {
            let candidate = CanonicalId::new();
            if self.issued.insert(candidate) {
                return candidate;
            }
        }
    }
}
