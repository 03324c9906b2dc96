use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use assoc_migrate_core::{
    catalog, CanonicalId, IdentityRegistry, LoadOutcome, RowSource, TableRule, TargetStore,
    TransformContext,
};
use assoc_migrate_store_sqlite::SqliteStore;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

pub const DEFAULT_MAX_FAILURES_REPORTED: usize = 50;

/// Where the run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationPhase {
    Idle,
    Connecting,
    Scanning(&'static str),
    LoadingRows(&'static str),
    ReportingTable(&'static str),
    Summarizing,
    Closed,
}

impl Display for MigrationPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Scanning(table) => write!(f, "scanning {table}"),
            Self::LoadingRows(table) => write!(f, "loading {table}"),
            Self::ReportingTable(table) => write!(f, "reporting {table}"),
            Self::Summarizing => write!(f, "summarizing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceInfo {
    pub kind: String,
    pub location: String,
    /// SHA-256 of the input bytes, when the source is a single file read whole.
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RowFailure {
    pub table: String,
    /// 1-based position of the row within its table.
    pub row: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableSummary {
    pub source_table: String,
    pub target_table: String,
    pub rows_seen: usize,
    pub inserted: usize,
    pub conflict_skipped: usize,
    pub failed: usize,
    /// First failures only; `failed` holds the full count.
    pub failures: Vec<RowFailure>,
}

impl TableSummary {
    fn new(rule: &TableRule) -> Self {
        Self {
            source_table: rule.source_table.to_string(),
            target_table: rule.target_table.to_string(),
            rows_seen: 0,
            inserted: 0,
            conflict_skipped: 0,
            failed: 0,
            failures: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkippedTable {
    pub table: String,
    pub reason: String,
}

/// Registry entry that no loaded row of its table backs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DanglingReference {
    pub table: String,
    pub legacy_id: i64,
    pub canonical_id: CanonicalId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunTotals {
    pub rows_seen: usize,
    pub inserted: usize,
    pub conflict_skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationSummary {
    pub run_id: String,
    pub source: SourceInfo,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
    pub seeded_identities: usize,
    pub totals: RunTotals,
    pub tables: Vec<TableSummary>,
    pub skipped_tables: Vec<SkippedTable>,
    pub unknown_tables: Vec<String>,
    pub dangling_references: Vec<DanglingReference>,
}

impl MigrationSummary {
    #[must_use]
    pub fn table(&self, source_table: &str) -> Option<&TableSummary> {
        self.tables.iter().find(|table| table.source_table == source_table)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationOptions {
    pub max_failures_reported: usize,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self { max_failures_reported: DEFAULT_MAX_FAILURES_REPORTED }
    }
}

/// Drives one migration run: tables in catalog order, rows in source order.
#[derive(Debug)]
pub struct Migrator {
    options: MigrationOptions,
    cancel_flag: Option<Arc<AtomicBool>>,
    phase: MigrationPhase,
    history: Vec<MigrationPhase>,
}

impl Migrator {
    #[must_use]
    pub fn new(options: MigrationOptions) -> Self {
        Self {
            options,
            cancel_flag: None,
            phase: MigrationPhase::Idle,
            history: vec![MigrationPhase::Idle],
        }
    }

    /// Checked between tables; once set, the remaining tables are skipped.
    #[must_use]
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = Some(flag);
        self
    }

    #[must_use]
    pub fn phase(&self) -> MigrationPhase {
        self.phase
    }

    #[must_use]
    pub fn phase_history(&self) -> &[MigrationPhase] {
        &self.history
    }

    /// Open the `SQLite` target at `target`, bootstrap its schema, then run.
    ///
    /// # Errors
    /// Returns an error when the target cannot be opened, migrated or its
    /// identity ledger read. Row and table faults never surface here.
    pub fn run_into_sqlite(
        &mut self,
        source: &mut dyn RowSource,
        source_info: SourceInfo,
        target: &Path,
    ) -> Result<MigrationSummary> {
        self.transition(MigrationPhase::Connecting);
        let opened = SqliteStore::open(target).and_then(|mut store| {
            store.migrate().context("failed to bootstrap target schema")?;
            Ok(store)
        });
        let mut store = match opened {
            Ok(store) => store,
            Err(err) => {
                self.transition(MigrationPhase::Closed);
                return Err(err);
            }
        };
        self.run(source, &mut store, source_info)
    }

    /// Run against an already open target store.
    ///
    /// # Errors
    /// Returns an error when the target's identity ledger cannot be read.
    pub fn run(
        &mut self,
        source: &mut dyn RowSource,
        store: &mut dyn TargetStore,
        source_info: SourceInfo,
    ) -> Result<MigrationSummary> {
        let started_at = OffsetDateTime::now_utc();
        if self.phase != MigrationPhase::Connecting {
            self.transition(MigrationPhase::Connecting);
        }

        let mut registry = IdentityRegistry::new();
        let mut backed = HashSet::new();
        let known = match store.known_identities() {
            Ok(known) => known,
            Err(err) => {
                self.transition(MigrationPhase::Closed);
                return Err(err).context("failed to read identity ledger from target");
            }
        };
        for entry in &known {
            backed.insert((entry.source_table.clone(), entry.legacy_id));
        }
        let seeded = backed.clone();
        let seeded_identities = registry.seed(known);
        tracing::info!(seeded_identities, source = %source_info.kind, "connected to target");

        let mut tables = Vec::new();
        let mut skipped_tables = Vec::new();
        let mut cancel_logged = false;
        for rule in catalog::rules() {
            if self.cancelled() {
                if !cancel_logged {
                    tracing::info!(table = rule.source_table, "cancelled, skipping remaining tables");
                    cancel_logged = true;
                }
                skipped_tables.push(SkippedTable {
                    table: rule.source_table.to_string(),
                    reason: "cancelled".to_string(),
                });
                continue;
            }

            self.transition(MigrationPhase::Scanning(rule.source_table));
            let rows = match source.fetch_table(rule.source_table) {
                Ok(rows) => rows,
                Err(err) => {
                    tracing::warn!(table = rule.source_table, error = %err, "skipping table");
                    skipped_tables.push(SkippedTable {
                        table: rule.source_table.to_string(),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            self.transition(MigrationPhase::LoadingRows(rule.source_table));
            let mut summary = TableSummary::new(rule);
            for (index, row) in rows.iter().enumerate() {
                let position = index + 1;
                summary.rows_seen += 1;

                let mut ctx = TransformContext::new(&mut registry, started_at);
                let target_row = match rule.apply(row, &mut ctx) {
                    Ok(target_row) => target_row,
                    Err(err) => {
                        self.record_failure(&mut summary, position, err.to_string());
                        continue;
                    }
                };

                match store.load(&target_row) {
                    LoadOutcome::Inserted => summary.inserted += 1,
                    LoadOutcome::ConflictSkipped => {
                        let key = (rule.source_table.to_string(), target_row.legacy_id);
                        if seeded.contains(&key) {
                            tracing::debug!(
                                table = rule.source_table,
                                row = position,
                                "row already migrated, skipping"
                            );
                        } else {
                            tracing::warn!(
                                table = rule.source_table,
                                row = position,
                                legacy_id = target_row.legacy_id,
                                "duplicate legacy id in source, skipping"
                            );
                        }
                        summary.conflict_skipped += 1;
                    }
                    LoadOutcome::Failed(reason) => {
                        self.record_failure(&mut summary, position, reason);
                        continue;
                    }
                }
                backed.insert((rule.source_table.to_string(), target_row.legacy_id));
            }

            self.transition(MigrationPhase::ReportingTable(rule.source_table));
            tracing::info!(
                table = rule.source_table,
                target = rule.target_table,
                rows_seen = summary.rows_seen,
                inserted = summary.inserted,
                conflict_skipped = summary.conflict_skipped,
                failed = summary.failed,
                "table migrated"
            );
            tables.push(summary);
        }

        self.transition(MigrationPhase::Summarizing);
        let dangling_references = registry
            .entries()
            .into_iter()
            .filter(|entry| !backed.contains(&(entry.source_table.clone(), entry.legacy_id)))
            .map(|entry| DanglingReference {
                table: entry.source_table,
                legacy_id: entry.legacy_id,
                canonical_id: entry.canonical_id,
            })
            .collect::<Vec<_>>();
        for dangling in &dangling_references {
            tracing::warn!(
                table = %dangling.table,
                legacy_id = dangling.legacy_id,
                canonical_id = %dangling.canonical_id,
                "reference to a row that was never loaded"
            );
        }

        let unknown_tables = source.unknown_tables();
        let totals = tables.iter().fold(RunTotals::default(), |mut totals, table| {
            totals.rows_seen += table.rows_seen;
            totals.inserted += table.inserted;
            totals.conflict_skipped += table.conflict_skipped;
            totals.failed += table.failed;
            totals
        });
        let summary = MigrationSummary {
            run_id: Ulid::new().to_string(),
            source: source_info,
            started_at,
            finished_at: OffsetDateTime::now_utc(),
            seeded_identities,
            totals,
            tables,
            skipped_tables,
            unknown_tables,
            dangling_references,
        };
        tracing::info!(
            inserted = summary.totals.inserted,
            conflict_skipped = summary.totals.conflict_skipped,
            failed = summary.totals.failed,
            skipped_tables = summary.skipped_tables.len(),
            dangling_references = summary.dangling_references.len(),
            "migration finished"
        );

        self.transition(MigrationPhase::Closed);
        Ok(summary)
    }

    fn record_failure(&self, summary: &mut TableSummary, row: usize, reason: String) {
        tracing::warn!(table = %summary.source_table, row, reason = %reason, "row failed");
        summary.failed += 1;
        if summary.failures.len() < self.options.max_failures_reported {
            summary.failures.push(RowFailure { table: summary.source_table.clone(), row, reason });
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel_flag.as_ref().is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    fn transition(&mut self, next: MigrationPhase) {
        match next {
            MigrationPhase::Scanning(_)
            | MigrationPhase::LoadingRows(_)
            | MigrationPhase::ReportingTable(_) => {
                tracing::debug!(from = %self.phase, to = %next, "migration phase");
            }
            _ => tracing::info!(from = %self.phase, to = %next, "migration phase"),
        }
        self.phase = next;
        self.history.push(next);
    }
}

impl Default for Migrator {
    fn default() -> Self {
        Self::new(MigrationOptions::default())
    }
}
