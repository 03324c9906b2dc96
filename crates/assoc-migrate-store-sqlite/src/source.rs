use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use assoc_migrate_core::{catalog, RawRow, RowSource, Scalar, SourceError};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags};

use crate::quote_identifier;

/// Live legacy database read table by table. Opened read-only.
pub struct SqliteSource {
    conn: Connection,
}

impl SqliteSource {
    /// Open the legacy database without write access.
    ///
    /// # Errors
    /// Returns an error when the file is missing or is not a readable `SQLite` database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("failed to open legacy database at {}", path.display()))?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")
            .context("failed to configure sqlite pragmas")?;
        conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))
            .with_context(|| format!("{} is not a readable sqlite database", path.display()))?;
        Ok(Self { conn })
    }

    /// Wrap an already open connection.
    #[must_use]
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    fn table_names(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }

    fn column_names(&self, table: &str) -> Result<BTreeSet<String>> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote_identifier(table)))
            .with_context(|| format!("failed to inspect table_info for {table}"))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
        let mut names = BTreeSet::new();
        for row in rows {
            names.insert(row?);
        }
        Ok(names)
    }

    fn table_exists(&self, table: &str) -> Result<bool> {
        let exists = self
            .conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
                params![table],
                |row| row.get::<_, i64>(0),
            )
            .with_context(|| format!("failed to check if table exists: {table}"))?;
        Ok(exists == 1)
    }

    /// Select the catalog's source columns in catalog order; columns the legacy
    /// table lacks read as NULL.
    fn select_sql(&self, table: &str) -> Result<String> {
        let projection = match catalog::rule(table) {
            Some(rule) => {
                let present = self.column_names(table)?;
                rule.source_columns
                    .iter()
                    .map(|column| {
                        if present.contains(*column) {
                            quote_identifier(column)
                        } else {
                            tracing::debug!(table, column, "legacy column missing, reading NULL");
                            "NULL".to_string()
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(", ")
            }
            None => "*".to_string(),
        };
        Ok(format!("SELECT {projection} FROM {} ORDER BY rowid", quote_identifier(table)))
    }

    fn read_table(&self, table: &str) -> Result<Vec<RawRow>> {
        let sql = self.select_sql(table)?;
        let mut stmt =
            self.conn.prepare(&sql).with_context(|| format!("failed to prepare read of {table}"))?;
        let width = stmt.column_count();
        let mut rows = stmt.query([]).with_context(|| format!("failed to read {table}"))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut cells = Vec::with_capacity(width);
            for index in 0..width {
                cells.push(scalar(row.get_ref(index)?));
            }
            out.push(RawRow::new(cells));
        }
        Ok(out)
    }
}

impl RowSource for SqliteSource {
    fn kind(&self) -> &'static str {
        "sqlite"
    }

    fn fetch_table(&mut self, table: &str) -> Result<Vec<RawRow>, SourceError> {
        let unavailable =
            |reason: String| SourceError::TableUnavailable { table: table.to_string(), reason };

        match self.table_exists(table) {
            Ok(true) => {}
            Ok(false) => return Err(unavailable("table does not exist".to_string())),
            Err(err) => return Err(unavailable(format!("{err:#}"))),
        }
        self.read_table(table).map_err(|err| unavailable(format!("{err:#}")))
    }

    fn unknown_tables(&self) -> Vec<String> {
        match self.table_names() {
            Ok(names) => names.into_iter().filter(|name| catalog::rule(name).is_none()).collect(),
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "failed to list legacy tables");
                Vec::new()
            }
        }
    }
}

/// Integers and reals become bare tokens; text and blobs become quoted text.
fn scalar(value: ValueRef<'_>) -> Scalar {
    match value {
        ValueRef::Null => Scalar::Null,
        ValueRef::Integer(value) => Scalar::Raw(value.to_string()),
        ValueRef::Real(value) => Scalar::Raw(value.to_string()),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Scalar::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legacy_source(ddl: &str) -> Result<SqliteSource> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(ddl)?;
        Ok(SqliteSource::from_connection(conn))
    }

    #[test]
    fn rows_come_back_in_rowid_order_with_catalog_column_order() -> Result<()> {
        let mut source = legacy_source(
            "CREATE TABLE sliders (title TEXT, id INTEGER PRIMARY KEY, caption TEXT, image TEXT, link TEXT, sort_order INTEGER, active INTEGER);
             INSERT INTO sliders VALUES ('second', 2, NULL, 'b.jpg', NULL, 2, 1);
             INSERT INTO sliders VALUES ('first', 1, NULL, 'a.jpg', NULL, 1, 0);",
        )?;

        let rows = source.fetch_table("sliders")?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get(0), &Scalar::Raw("1".to_string()));
        assert_eq!(rows[0].get(1), &Scalar::Text("first".to_string()));
        assert_eq!(rows[0].get(2), &Scalar::Null);
        assert_eq!(rows[1].get(6), &Scalar::Raw("1".to_string()));
        Ok(())
    }

    #[test]
    fn missing_columns_read_as_null() -> Result<()> {
        let mut source = legacy_source(
            "CREATE TABLE reports (id INTEGER PRIMARY KEY, title TEXT);
             INSERT INTO reports VALUES (1, 'Q1');",
        )?;
        let rows = source.fetch_table("reports")?;
        assert_eq!(rows[0].len(), 6);
        assert!(rows[0].get(5).is_null());
        Ok(())
    }

    #[test]
    fn missing_table_is_unavailable() -> Result<()> {
        let mut source = legacy_source("CREATE TABLE admins (id INTEGER PRIMARY KEY);")?;
        match source.fetch_table("members") {
            Err(SourceError::TableUnavailable { table, reason }) => {
                assert_eq!(table, "members");
                assert_eq!(reason, "table does not exist");
            }
            other => panic!("expected unavailable table, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn non_catalog_tables_are_listed_as_unknown() -> Result<()> {
        let source = legacy_source(
            "CREATE TABLE admins (id INTEGER PRIMARY KEY);
             CREATE TABLE ci_sessions (id TEXT);
             CREATE TABLE audit_log (id INTEGER);",
        )?;
        assert_eq!(source.unknown_tables(), vec!["audit_log".to_string(), "ci_sessions".to_string()]);
        assert_eq!(source.kind(), "sqlite");
        Ok(())
    }

    #[test]
    fn reals_and_blobs_become_scalars() {
        assert_eq!(scalar(ValueRef::Real(12.5)), Scalar::Raw("12.5".to_string()));
        assert_eq!(scalar(ValueRef::Blob(b"abc")), Scalar::Text("abc".to_string()));
        assert_eq!(scalar(ValueRef::Null), Scalar::Null);
    }

    #[test]
    fn opening_a_missing_file_fails() {
        let path = std::env::temp_dir().join("assoc-migrate-missing-legacy.sqlite3");
        let _ = std::fs::remove_file(&path);
        assert!(SqliteSource::open(&path).is_err());
    }
}
