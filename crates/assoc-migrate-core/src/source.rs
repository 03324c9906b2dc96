use std::collections::HashMap;

use crate::catalog;
use crate::decoder::decode_tuple;
use crate::scanner::DumpScanner;
use crate::{RawRow, SourceError};

/// Where raw rows come from. Tables are fetched whole, in the order the caller asks.
pub trait RowSource {
    /// Short label for summaries, e.g. `dump` or `sqlite`.
    fn kind(&self) -> &'static str;

    /// All rows of `table` in source order. A known table with no rows yields an empty list.
    ///
    /// # Errors
    /// Returns [`SourceError::TableUnavailable`] when the table cannot be read.
    fn fetch_table(&mut self, table: &str) -> Result<Vec<RawRow>, SourceError>;

    /// Tables present in the source that the catalog does not know, sorted.
    fn unknown_tables(&self) -> Vec<String>;
}

/// Rows decoded from a textual dump, bucketed per table.
#[derive(Debug, Default)]
pub struct DumpSource {
    rows: HashMap<String, Vec<RawRow>>,
    unknown: Vec<String>,
}

impl DumpSource {
    /// Scan and decode `text`, keeping only tuples of `known_tables`.
    #[must_use]
    pub fn parse<'k, I>(text: &str, known_tables: I) -> Self
    where
        I: IntoIterator<Item = &'k str>,
    {
        let mut scanner = DumpScanner::new(text, known_tables);
        let mut rows: HashMap<String, Vec<RawRow>> = HashMap::new();
        for scanned in scanner.by_ref() {
            rows.entry(scanned.table.to_string()).or_default().push(decode_tuple(scanned.tuple));
        }
        let unknown = scanner.unknown_tables().keys().cloned().collect();
        Self { rows, unknown }
    }

    /// Parse against the fixed migration catalog.
    #[must_use]
    pub fn from_catalog(text: &str) -> Self {
        Self::parse(text, catalog::source_tables())
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.values().map(Vec::len).sum()
    }
}

impl RowSource for DumpSource {
    fn kind(&self) -> &'static str {
        "dump"
    }

    fn fetch_table(&mut self, table: &str) -> Result<Vec<RawRow>, SourceError> {
        Ok(self.rows.remove(table).unwrap_or_default())
    }

    fn unknown_tables(&self) -> Vec<String> {
        self.unknown.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Scalar;

    #[test]
    fn rows_are_grouped_per_table_in_document_order() -> Result<(), SourceError> {
        let dump = "INSERT INTO members VALUES (2,'b');\nINSERT INTO admins VALUES (1,'root');\nINSERT INTO members VALUES (1,'a');";
        let mut source = DumpSource::parse(dump, ["members", "admins"]);
        assert_eq!(source.row_count(), 3);

        let members = source.fetch_table("members")?;
        let ids = members.iter().map(|row| row.get(0).clone()).collect::<Vec<_>>();
        assert_eq!(ids, vec![Scalar::Raw("2".to_string()), Scalar::Raw("1".to_string())]);
        assert_eq!(source.fetch_table("admins")?.len(), 1);
        Ok(())
    }

    #[test]
    fn known_table_without_inserts_is_empty_not_an_error() -> Result<(), SourceError> {
        let mut source = DumpSource::from_catalog("-- nothing here\n");
        assert!(source.fetch_table("reports")?.is_empty());
        assert!(source.unknown_tables().is_empty());
        Ok(())
    }

    #[test]
    fn catalog_dump_is_parsed_from_a_short_lived_buffer() -> Result<(), SourceError> {
        let text = String::from("INSERT INTO reports VALUES (1,'Q1',NULL,NULL,NULL,NULL);");
        let mut source = DumpSource::from_catalog(&text);
        drop(text);
        assert_eq!(source.fetch_table("reports")?.len(), 1);
        Ok(())
    }

    #[test]
    fn unknown_tables_are_listed_sorted() {
        let dump = "INSERT INTO zz_cache VALUES (1);\nINSERT INTO ci_sessions VALUES ('x');\nINSERT INTO admins VALUES (1,'a','p','A',NULL,'admin',1,NULL);";
        let source = DumpSource::from_catalog(dump);
        assert_eq!(source.unknown_tables(), vec!["ci_sessions".to_string(), "zz_cache".to_string()]);
        assert_eq!(source.row_count(), 1);
        assert_eq!(source.kind(), "dump");
    }
}
