use std::path::Path;

use anyhow::{anyhow, Context, Result};
use assoc_migrate_core::{
    catalog, ArgValue, CanonicalId, IdentityEntry, LoadOutcome, StoreError, TargetRow,
    TargetStore,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::OffsetDateTime;

mod source;

pub use source::SqliteSource;

const LATEST_SCHEMA_VERSION: i64 = 1;

pub const IDENTITY_LEDGER_TABLE: &str = "legacy_identity_map";

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS users (
  id TEXT PRIMARY KEY,
  username TEXT NOT NULL,
  password_hash TEXT NOT NULL,
  full_name TEXT NOT NULL,
  email TEXT,
  role TEXT NOT NULL CHECK (role IN ('admin','editor','operator')),
  is_active INTEGER NOT NULL CHECK (is_active IN (0,1)),
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS page_contents (
  id TEXT PRIMARY KEY,
  section TEXT NOT NULL,
  title TEXT,
  body TEXT NOT NULL,
  updated_by TEXT,
  updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS regulations (
  id TEXT PRIMARY KEY,
  title TEXT NOT NULL,
  category TEXT,
  reference_number TEXT,
  issued_year INTEGER,
  document_url TEXT,
  summary TEXT,
  published_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS publications (
  id TEXT PRIMARY KEY,
  title TEXT NOT NULL,
  author TEXT,
  summary TEXT,
  cover_url TEXT,
  file_url TEXT,
  published_at TEXT NOT NULL,
  created_by TEXT
);

CREATE TABLE IF NOT EXISTS events (
  id TEXT PRIMARY KEY,
  title TEXT NOT NULL,
  description TEXT,
  location TEXT,
  starts_at TEXT NOT NULL,
  image_url TEXT,
  status TEXT NOT NULL CHECK (status IN ('scheduled','completed','cancelled')),
  created_by TEXT,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS gallery_items (
  id TEXT PRIMARY KEY,
  title TEXT,
  image_url TEXT NOT NULL,
  caption TEXT,
  event_id TEXT,
  uploaded_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS members (
  id TEXT PRIMARY KEY,
  member_number TEXT,
  full_name TEXT NOT NULL,
  gender TEXT CHECK (gender IS NULL OR gender IN ('male','female')),
  birth_date TEXT,
  address TEXT,
  phone TEXT,
  email TEXT,
  photo_url TEXT,
  joined_at TEXT NOT NULL,
  is_active INTEGER NOT NULL CHECK (is_active IN (0,1))
);

CREATE TABLE IF NOT EXISTS slides (
  id TEXT PRIMARY KEY,
  title TEXT,
  caption TEXT,
  image_url TEXT NOT NULL,
  link_url TEXT,
  sort_order INTEGER NOT NULL,
  is_active INTEGER NOT NULL CHECK (is_active IN (0,1))
);

CREATE TABLE IF NOT EXISTS activity_plans (
  id TEXT PRIMARY KEY,
  title TEXT NOT NULL,
  period_year INTEGER,
  description TEXT,
  status TEXT NOT NULL CHECK (status IN ('draft','active','completed')),
  created_by TEXT,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS activity_plan_items (
  id TEXT PRIMARY KEY,
  plan_id TEXT NOT NULL,
  parent_id TEXT,
  name TEXT NOT NULL,
  target TEXT,
  budget REAL,
  sort_order INTEGER NOT NULL,
  FOREIGN KEY (plan_id) REFERENCES activity_plans(id)
);

CREATE TABLE IF NOT EXISTS organization_roster (
  id TEXT PRIMARY KEY,
  member_id TEXT,
  name TEXT NOT NULL,
  position TEXT NOT NULL,
  photo_url TEXT,
  sort_order INTEGER NOT NULL,
  period TEXT
);

CREATE TABLE IF NOT EXISTS contact_messages (
  id TEXT PRIMARY KEY,
  sender_name TEXT NOT NULL,
  sender_email TEXT,
  subject TEXT,
  body TEXT NOT NULL,
  is_read INTEGER NOT NULL CHECK (is_read IN (0,1)),
  received_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS notifications (
  id TEXT PRIMARY KEY,
  user_id TEXT,
  title TEXT NOT NULL,
  body TEXT NOT NULL,
  is_read INTEGER NOT NULL CHECK (is_read IN (0,1)),
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS reports (
  id TEXT PRIMARY KEY,
  title TEXT NOT NULL,
  period_label TEXT,
  file_url TEXT,
  submitted_by TEXT,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS legacy_identity_map (
  source_table TEXT NOT NULL,
  legacy_id INTEGER NOT NULL,
  canonical_id TEXT NOT NULL UNIQUE,
  migrated_at TEXT NOT NULL,
  PRIMARY KEY (source_table, legacy_id)
);

CREATE INDEX IF NOT EXISTS idx_activity_plan_items_plan ON activity_plan_items(plan_id);
CREATE INDEX IF NOT EXISTS idx_activity_plan_items_parent ON activity_plan_items(parent_id);
CREATE INDEX IF NOT EXISTS idx_gallery_items_event ON gallery_items(event_id);
";

/// Target store for migrated rows.
pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: i64,
    pub parent: String,
    pub fk_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableRowCount {
    pub table: String,
    pub rows: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub row_counts: Vec<TableRowCount>,
    pub schema_status: SchemaStatus,
}

impl SqliteStore {
    /// Open (or create) the target database and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open target database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Create the target tables and the identity ledger. Safe to run repeatedly.
    ///
    /// # Errors
    /// Returns an error when a migration step fails or the database carries a
    /// newer schema than this build understands.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let version = current_schema_version(&self.conn)?;
        if version > LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        if version < 1 {
            let tx = self.conn.transaction().context("failed to start migration transaction")?;
            tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration 1")?;
            record_schema_version(&tx, 1)?;
            tx.commit().context("failed to commit migration 1")?;
            tracing::info!(version = 1, "applied target schema migration");
        }

        Ok(())
    }

    /// Number of rows currently in `table`.
    ///
    /// # Errors
    /// Returns an error when the table does not exist or cannot be counted.
    pub fn row_count(&self, table: &str) -> Result<i64> {
        self.conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", quote_identifier(table)), [], |row| {
                row.get::<_, i64>(0)
            })
            .with_context(|| format!("failed to count rows in {table}"))
    }

    /// Run quick-check and foreign-key-check, and count rows per target table.
    ///
    /// # Errors
    /// Returns an error when any integrity probe query fails.
    pub fn integrity_report(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let mut stmt = self
            .conn
            .prepare("PRAGMA foreign_key_check")
            .context("failed to prepare PRAGMA foreign_key_check")?;
        let rows = stmt.query_map([], |row| {
            Ok(ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get(1)?,
                parent: row.get(2)?,
                fk_index: row.get(3)?,
            })
        })?;

        let mut foreign_key_violations = Vec::new();
        for row in rows {
            foreign_key_violations.push(row?);
        }

        let schema_status = self.schema_status()?;
        let mut row_counts = Vec::new();
        if schema_status.current_version >= 1 {
            let tables = catalog::rules()
                .iter()
                .map(|rule| rule.target_table)
                .chain(std::iter::once(IDENTITY_LEDGER_TABLE));
            for table in tables {
                row_counts.push(TableRowCount { table: table.to_string(), rows: self.row_count(table)? });
            }
        }

        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            foreign_key_violations,
            row_counts,
            schema_status,
        })
    }

    /// Insert `row` and record its identity in one transaction.
    ///
    /// Returns `true` when a row was inserted and `false` on a primary-key conflict.
    fn insert_row(&mut self, row: &TargetRow) -> Result<bool> {
        let values = row.args.iter().map(sql_value).collect::<Result<Vec<_>>>()?;
        let sql = insert_sql(row.target_table, row.columns);
        let migrated_at = now_rfc3339()?;

        let tx = self.conn.transaction().context("failed to start load transaction")?;
        let affected = tx
            .prepare_cached(&sql)
            .with_context(|| format!("failed to prepare insert into {}", row.target_table))?
            .execute(params_from_iter(values.iter()))
            .with_context(|| format!("failed to insert into {}", row.target_table))?;

        tx.execute(
            "INSERT OR IGNORE INTO legacy_identity_map(source_table, legacy_id, canonical_id, migrated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![row.source_table, row.legacy_id, row.canonical_id.to_string(), migrated_at],
        )
        .context("failed to record legacy identity")?;

        tx.commit().context("failed to commit load transaction")?;
        Ok(affected == 1)
    }

    fn read_identities(&self) -> Result<Vec<IdentityEntry>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT source_table, legacy_id, canonical_id FROM legacy_identity_map
                 ORDER BY source_table, legacy_id",
            )
            .context("failed to prepare identity ledger query")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?, row.get::<_, String>(2)?))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (source_table, legacy_id, raw_id) = row?;
            let canonical_id = CanonicalId::parse(&raw_id)
                .with_context(|| format!("invalid canonical id in identity ledger: {raw_id}"))?;
            entries.push(IdentityEntry { source_table, legacy_id, canonical_id });
        }
        Ok(entries)
    }
}

impl TargetStore for SqliteStore {
    fn load(&mut self, row: &TargetRow) -> LoadOutcome {
        match self.insert_row(row) {
            Ok(true) => LoadOutcome::Inserted,
            Ok(false) => LoadOutcome::ConflictSkipped,
            Err(err) => LoadOutcome::Failed(format!("{err:#}")),
        }
    }

    fn known_identities(&self) -> Result<Vec<IdentityEntry>, StoreError> {
        self.read_identities().map_err(|err| StoreError::Backend(format!("{err:#}")))
    }
}

fn insert_sql(table: &str, columns: &[&str]) -> String {
    let column_list = columns.iter().map(|column| quote_identifier(column)).collect::<Vec<_>>();
    let placeholders = (1..=columns.len()).map(|index| format!("?{index}")).collect::<Vec<_>>();
    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT(id) DO NOTHING",
        quote_identifier(table),
        column_list.join(", "),
        placeholders.join(", ")
    )
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sql_value(arg: &ArgValue) -> Result<Value> {
    Ok(match arg {
        ArgValue::Null => Value::Null,
        ArgValue::Text(value) => Value::Text(value.clone()),
        ArgValue::Integer(value) => Value::Integer(*value),
        ArgValue::Real(value) => Value::Real(*value),
        ArgValue::Bool(value) => Value::Integer(i64::from(*value)),
        ArgValue::Timestamp(value) => Value::Text(rfc3339(*value)?),
        ArgValue::Date(value) => Value::Text(
            value
                .format(format_description!("[year]-[month]-[day]"))
                .context("failed to format date")?,
        ),
        ArgValue::Id(value) => Value::Text(value.to_string()),
    })
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    rfc3339(OffsetDateTime::now_utc())
}

fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}
