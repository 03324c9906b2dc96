use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use ulid::Ulid;

pub mod catalog;
pub mod coerce;
pub mod decoder;
pub mod registry;
pub mod scanner;
pub mod source;

pub use catalog::{CatalogEntry, TableRule, TransformContext};
pub use decoder::decode_tuple;
pub use registry::{IdentityEntry, IdentityRegistry};
pub use scanner::{DumpScanner, ScannedTuple};
pub use source::{DumpSource, RowSource};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum TransformError {
    #[error("unknown source table: {0}")]
    UnknownTable(String),
    #[error("shape mismatch in {table}: expected {expected} columns, found {actual}")]
    ShapeMismatch { table: String, expected: usize, actual: usize },
    #[error("row in {table} has no usable legacy id")]
    MissingLegacyId { table: String },
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum SourceError {
    #[error("source table {table} is unavailable: {reason}")]
    TableUnavailable { table: String, reason: String },
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum StoreError {
    #[error("target store error: {0}")]
    Backend(String),
}

/// Globally unique identifier that replaces a legacy integer key in the target schema.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CanonicalId(pub Ulid);

impl CanonicalId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse the textual form written to the target store.
    ///
    /// # Errors
    /// Returns [`ulid::DecodeError`] when `raw` is not a valid ULID string.
    pub fn parse(raw: &str) -> Result<Self, ulid::DecodeError> {
        Ulid::from_string(raw).map(Self)
    }
}

impl Default for CanonicalId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for CanonicalId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One untyped cell as it appears in the legacy source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scalar {
    Null,
    /// Quoted literal with escapes already resolved.
    Text(String),
    /// Bare token such as a number or keyword, trimmed.
    Raw(String),
}

impl Scalar {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Null => None,
            Self::Text(value) | Self::Raw(value) => Some(value.as_str()),
        }
    }
}

static NULL_SCALAR: Scalar = Scalar::Null;

/// Ordered cells of one source row, in source column order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawRow(Vec<Scalar>);

impl RawRow {
    #[must_use]
    pub fn new(values: Vec<Scalar>) -> Self {
        Self(values)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Cell at `index`, or [`Scalar::Null`] past the end of the row.
    #[must_use]
    pub fn get(&self, index: usize) -> &Scalar {
        self.0.get(index).unwrap_or(&NULL_SCALAR)
    }

    #[must_use]
    pub fn values(&self) -> &[Scalar] {
        &self.0
    }
}

impl From<Vec<Scalar>> for RawRow {
    fn from(values: Vec<Scalar>) -> Self {
        Self(values)
    }
}

/// Typed argument bound to one target column.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Null,
    Text(String),
    Integer(i64),
    Real(f64),
    Bool(bool),
    Timestamp(OffsetDateTime),
    Date(Date),
    Id(CanonicalId),
}

impl ArgValue {
    #[must_use]
    pub fn opt_text(value: Option<String>) -> Self {
        value.map_or(Self::Null, Self::Text)
    }

    #[must_use]
    pub fn opt_id(value: Option<CanonicalId>) -> Self {
        value.map_or(Self::Null, Self::Id)
    }

    #[must_use]
    pub fn opt_integer(value: Option<i64>) -> Self {
        value.map_or(Self::Null, Self::Integer)
    }

    #[must_use]
    pub fn opt_real(value: Option<f64>) -> Self {
        value.map_or(Self::Null, Self::Real)
    }

    #[must_use]
    pub fn opt_date(value: Option<Date>) -> Self {
        value.map_or(Self::Null, Self::Date)
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// Fully transformed row, ready for one parameterized insert.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetRow {
    pub source_table: &'static str,
    pub target_table: &'static str,
    pub columns: &'static [&'static str],
    /// Legacy key of the row itself.
    pub legacy_id: i64,
    pub canonical_id: CanonicalId,
    pub args: Vec<ArgValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Inserted,
    /// Primary key already present; the row was migrated by an earlier run.
    ConflictSkipped,
    Failed(String),
}

/// Destination of transformed rows.
pub trait TargetStore {
    /// Insert one row, treating a primary-key conflict as a no-op.
    ///
    /// Never fails as a whole: every error is reported through [`LoadOutcome::Failed`].
    fn load(&mut self, row: &TargetRow) -> LoadOutcome;

    /// Identities recorded by earlier runs against this store.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the identity ledger cannot be read.
    fn known_identities(&self) -> Result<Vec<IdentityEntry>, StoreError>;
}
