//! Fixed catalog of source tables and their target mappings.
//!
//! Each [`TableRule`] owns everything known about one legacy table: where it
//! lands, the column order on both sides, which tables it references and the
//! transform that turns a raw row into insert arguments. The catalog order is
//! the load order.

use serde::Serialize;
use time::OffsetDateTime;

use crate::coerce;
use crate::registry::IdentityRegistry;
use crate::{ArgValue, RawRow, Scalar, TargetRow, TransformError};

type TransformFn = fn(&RawRow, &mut TransformContext<'_>) -> Vec<ArgValue>;

/// Per-run state a transform may consult.
#[derive(Debug)]
pub struct TransformContext<'r> {
    registry: &'r mut IdentityRegistry,
    now: OffsetDateTime,
}

impl<'r> TransformContext<'r> {
    /// `now` is the single timestamp used for every defaulted date in the run.
    pub fn new(registry: &'r mut IdentityRegistry, now: OffsetDateTime) -> Self {
        Self { registry, now }
    }

    #[must_use]
    pub fn now(&self) -> OffsetDateTime {
        self.now
    }

    #[must_use]
    pub fn registry(&self) -> &IdentityRegistry {
        self.registry
    }

    /// Foreign key into `table`'s identifier space; zero or missing ids become NULL.
    pub fn reference(&mut self, table: &str, cell: &Scalar) -> ArgValue {
        ArgValue::opt_id(self.registry.resolve_reference(table, coerce::legacy_id(cell)))
    }

    fn timestamp(&self, cell: &Scalar) -> ArgValue {
        ArgValue::Timestamp(coerce::timestamp_or(cell, self.now))
    }
}

#[derive(Debug)]
pub struct TableRule {
    pub source_table: &'static str,
    pub target_table: &'static str,
    pub source_columns: &'static [&'static str],
    pub target_columns: &'static [&'static str],
    /// Tables referenced through NOT NULL foreign keys the target enforces on insert.
    pub hard_dependencies: &'static [&'static str],
    /// Tables referenced through nullable, unenforced foreign keys.
    pub soft_references: &'static [&'static str],
    transform: TransformFn,
}

impl TableRule {
    /// Transform one source row.
    ///
    /// # Errors
    /// Returns [`TransformError::ShapeMismatch`] when the row does not have the
    /// table's source column count, and [`TransformError::MissingLegacyId`] when
    /// its own key is null or not an integer.
    pub fn apply(
        &self,
        row: &RawRow,
        ctx: &mut TransformContext<'_>,
    ) -> Result<TargetRow, TransformError> {
        if row.len() != self.source_columns.len() {
            return Err(TransformError::ShapeMismatch {
                table: self.source_table.to_string(),
                expected: self.source_columns.len(),
                actual: row.len(),
            });
        }

        let Some(legacy_id) = coerce::legacy_id(row.get(0)) else {
            return Err(TransformError::MissingLegacyId {
                table: self.source_table.to_string(),
            });
        };
        let canonical_id = ctx.registry.resolve(self.source_table, legacy_id);

        let mut args = Vec::with_capacity(self.target_columns.len());
        args.push(ArgValue::Id(canonical_id));
        args.extend((self.transform)(row, ctx));

        Ok(TargetRow {
            source_table: self.source_table,
            target_table: self.target_table,
            columns: self.target_columns,
            legacy_id,
            canonical_id,
            args,
        })
    }

    #[must_use]
    pub fn describe(&self, position: usize) -> CatalogEntry {
        CatalogEntry {
            position,
            source_table: self.source_table,
            target_table: self.target_table,
            source_columns: self.source_columns.to_vec(),
            target_columns: self.target_columns.to_vec(),
            hard_dependencies: self.hard_dependencies.to_vec(),
            soft_references: self.soft_references.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CatalogEntry {
    pub position: usize,
    pub source_table: &'static str,
    pub target_table: &'static str,
    pub source_columns: Vec<&'static str>,
    pub target_columns: Vec<&'static str>,
    pub hard_dependencies: Vec<&'static str>,
    pub soft_references: Vec<&'static str>,
}

const ROLE_ALIASES: &[(&str, &str)] = &[
    ("admin", "admin"),
    ("administrator", "admin"),
    ("superadmin", "admin"),
    ("super_admin", "admin"),
    ("editor", "editor"),
    ("operator", "operator"),
    ("staff", "operator"),
];

const EVENT_STATUS_ALIASES: &[(&str, &str)] = &[
    ("0", "scheduled"),
    ("upcoming", "scheduled"),
    ("planned", "scheduled"),
    ("scheduled", "scheduled"),
    ("1", "completed"),
    ("done", "completed"),
    ("finished", "completed"),
    ("completed", "completed"),
    ("2", "cancelled"),
    ("canceled", "cancelled"),
    ("cancelled", "cancelled"),
];

const PLAN_STATUS_ALIASES: &[(&str, &str)] = &[
    ("draft", "draft"),
    ("planned", "draft"),
    ("active", "active"),
    ("ongoing", "active"),
    ("running", "active"),
    ("done", "completed"),
    ("finished", "completed"),
    ("completed", "completed"),
];

const GENDER_ALIASES: &[(&str, &str)] =
    &[("m", "male"), ("male", "male"), ("f", "female"), ("female", "female")];

static RULES: [TableRule; 14] = [
    TableRule {
        source_table: "admins",
        target_table: "users",
        source_columns: &["id", "username", "password", "name", "email", "role", "active", "created_at"],
        target_columns: &[
            "id",
            "username",
            "password_hash",
            "full_name",
            "email",
            "role",
            "is_active",
            "created_at",
        ],
        hard_dependencies: &[],
        soft_references: &[],
        transform: transform_admins,
    },
    TableRule {
        source_table: "contents",
        target_table: "page_contents",
        source_columns: &["id", "section", "title", "body", "updated_by", "updated_at"],
        target_columns: &["id", "section", "title", "body", "updated_by", "updated_at"],
        hard_dependencies: &[],
        soft_references: &["admins"],
        transform: transform_contents,
    },
    TableRule {
        source_table: "legislations",
        target_table: "regulations",
        source_columns: &[
            "id",
            "title",
            "category",
            "number",
            "year",
            "file",
            "description",
            "created_at",
        ],
        target_columns: &[
            "id",
            "title",
            "category",
            "reference_number",
            "issued_year",
            "document_url",
            "summary",
            "published_at",
        ],
        hard_dependencies: &[],
        soft_references: &[],
        transform: transform_legislations,
    },
    TableRule {
        source_table: "publications",
        target_table: "publications",
        source_columns: &[
            "id",
            "title",
            "author",
            "summary",
            "cover",
            "file",
            "published_at",
            "created_by",
        ],
        target_columns: &[
            "id",
            "title",
            "author",
            "summary",
            "cover_url",
            "file_url",
            "published_at",
            "created_by",
        ],
        hard_dependencies: &[],
        soft_references: &["admins"],
        transform: transform_publications,
    },
    TableRule {
        source_table: "events",
        target_table: "events",
        source_columns: &[
            "id",
            "title",
            "description",
            "location",
            "event_date",
            "image",
            "status",
            "created_by",
            "created_at",
        ],
        target_columns: &[
            "id",
            "title",
            "description",
            "location",
            "starts_at",
            "image_url",
            "status",
            "created_by",
            "created_at",
        ],
        hard_dependencies: &[],
        soft_references: &["admins"],
        transform: transform_events,
    },
    TableRule {
        source_table: "galleries",
        target_table: "gallery_items",
        source_columns: &["id", "title", "image", "caption", "event_id", "uploaded_at"],
        target_columns: &["id", "title", "image_url", "caption", "event_id", "uploaded_at"],
        hard_dependencies: &[],
        soft_references: &["events"],
        transform: transform_galleries,
    },
    TableRule {
        source_table: "members",
        target_table: "members",
        source_columns: &[
            "id",
            "member_number",
            "name",
            "gender",
            "birth_date",
            "address",
            "phone",
            "email",
            "photo",
            "joined_at",
            "active",
        ],
        target_columns: &[
            "id",
            "member_number",
            "full_name",
            "gender",
            "birth_date",
            "address",
            "phone",
            "email",
            "photo_url",
            "joined_at",
            "is_active",
        ],
        hard_dependencies: &[],
        soft_references: &[],
        transform: transform_members,
    },
    TableRule {
        source_table: "sliders",
        target_table: "slides",
        source_columns: &["id", "title", "caption", "image", "link", "sort_order", "active"],
        target_columns: &[
            "id",
            "title",
            "caption",
            "image_url",
            "link_url",
            "sort_order",
            "is_active",
        ],
        hard_dependencies: &[],
        soft_references: &[],
        transform: transform_sliders,
    },
    TableRule {
        source_table: "programs",
        target_table: "activity_plans",
        source_columns: &["id", "title", "year", "description", "status", "created_by", "created_at"],
        target_columns: &[
            "id",
            "title",
            "period_year",
            "description",
            "status",
            "created_by",
            "created_at",
        ],
        hard_dependencies: &[],
        soft_references: &["admins"],
        transform: transform_programs,
    },
    TableRule {
        source_table: "program_items",
        target_table: "activity_plan_items",
        source_columns: &["id", "program_id", "parent_id", "name", "target", "budget", "sort_order"],
        target_columns: &["id", "plan_id", "parent_id", "name", "target", "budget", "sort_order"],
        hard_dependencies: &["programs"],
        soft_references: &["program_items"],
        transform: transform_program_items,
    },
    TableRule {
        source_table: "org_structure",
        target_table: "organization_roster",
        source_columns: &["id", "member_id", "name", "position", "photo", "sort_order", "period"],
        target_columns: &[
            "id",
            "member_id",
            "name",
            "position",
            "photo_url",
            "sort_order",
            "period",
        ],
        hard_dependencies: &[],
        soft_references: &["members"],
        transform: transform_org_structure,
    },
    TableRule {
        source_table: "messages",
        target_table: "contact_messages",
        source_columns: &["id", "name", "email", "subject", "message", "is_read", "created_at"],
        target_columns: &[
            "id",
            "sender_name",
            "sender_email",
            "subject",
            "body",
            "is_read",
            "received_at",
        ],
        hard_dependencies: &[],
        soft_references: &[],
        transform: transform_messages,
    },
    TableRule {
        source_table: "notifications",
        target_table: "notifications",
        source_columns: &["id", "admin_id", "title", "message", "is_read", "created_at"],
        target_columns: &["id", "user_id", "title", "body", "is_read", "created_at"],
        hard_dependencies: &[],
        soft_references: &["admins"],
        transform: transform_notifications,
    },
    TableRule {
        source_table: "reports",
        target_table: "reports",
        source_columns: &["id", "title", "period", "file", "submitted_by", "created_at"],
        target_columns: &["id", "title", "period_label", "file_url", "submitted_by", "created_at"],
        hard_dependencies: &[],
        soft_references: &["admins"],
        transform: transform_reports,
    },
];

/// Rules in load order.
#[must_use]
pub fn rules() -> &'static [TableRule] {
    &RULES
}

#[must_use]
pub fn rule(source_table: &str) -> Option<&'static TableRule> {
    RULES.iter().find(|rule| rule.source_table == source_table)
}

pub fn source_tables() -> impl Iterator<Item = &'static str> {
    RULES.iter().map(|rule| rule.source_table)
}

/// Transform one row of `source_table`.
///
/// # Errors
/// Returns [`TransformError::UnknownTable`] for tables outside the catalog and
/// [`TransformError::ShapeMismatch`] for rows with the wrong column count.
pub fn transform(
    source_table: &str,
    row: &RawRow,
    ctx: &mut TransformContext<'_>,
) -> Result<TargetRow, TransformError> {
    rule(source_table)
        .ok_or_else(|| TransformError::UnknownTable(source_table.to_string()))?
        .apply(row, ctx)
}

/// Check that every hard dependency is loaded before the table that needs it.
///
/// # Errors
/// Returns the offending `(table, dependency)` pairs.
pub fn validate_order() -> Result<(), Vec<(&'static str, &'static str)>> {
    let mut violations = Vec::new();
    for (position, rule) in RULES.iter().enumerate() {
        for dependency in rule.hard_dependencies {
            let loaded_before =
                RULES[..position].iter().any(|earlier| earlier.source_table == *dependency);
            if !loaded_before {
                violations.push((rule.source_table, *dependency));
            }
        }
    }
    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

#[must_use]
pub fn describe() -> Vec<CatalogEntry> {
    RULES.iter().enumerate().map(|(index, rule)| rule.describe(index + 1)).collect()
}

fn transform_admins(row: &RawRow, ctx: &mut TransformContext<'_>) -> Vec<ArgValue> {
    let username = coerce::text_or_empty(row.get(1));
    let full_name = coerce::text(row.get(3))
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| username.clone());
    vec![
        ArgValue::Text(username),
        ArgValue::Text(coerce::text_or_empty(row.get(2))),
        ArgValue::Text(full_name),
        ArgValue::opt_text(coerce::text(row.get(4))),
        ArgValue::Text(coerce::choice_or(row.get(5), ROLE_ALIASES, "operator").to_string()),
        ArgValue::Bool(coerce::flag(row.get(6), true)),
        ctx.timestamp(row.get(7)),
    ]
}

fn transform_contents(row: &RawRow, ctx: &mut TransformContext<'_>) -> Vec<ArgValue> {
    vec![
        ArgValue::Text(coerce::text_or_empty(row.get(1))),
        ArgValue::opt_text(coerce::text(row.get(2))),
        ArgValue::Text(coerce::text_or_empty(row.get(3))),
        ctx.reference("admins", row.get(4)),
        ctx.timestamp(row.get(5)),
    ]
}

fn transform_legislations(row: &RawRow, ctx: &mut TransformContext<'_>) -> Vec<ArgValue> {
    vec![
        ArgValue::Text(coerce::text_or_empty(row.get(1))),
        ArgValue::opt_text(coerce::text(row.get(2))),
        ArgValue::opt_text(coerce::text(row.get(3))),
        ArgValue::opt_integer(coerce::integer(row.get(4))),
        ArgValue::opt_text(coerce::media_path(row.get(5), "legislation")),
        ArgValue::opt_text(coerce::text(row.get(6))),
        ctx.timestamp(row.get(7)),
    ]
}

fn transform_publications(row: &RawRow, ctx: &mut TransformContext<'_>) -> Vec<ArgValue> {
    vec![
        ArgValue::Text(coerce::text_or_empty(row.get(1))),
        ArgValue::opt_text(coerce::text(row.get(2))),
        ArgValue::opt_text(coerce::text(row.get(3))),
        ArgValue::opt_text(coerce::media_path(row.get(4), "publications")),
        ArgValue::opt_text(coerce::media_path(row.get(5), "publications")),
        ctx.timestamp(row.get(6)),
        ctx.reference("admins", row.get(7)),
    ]
}

fn transform_events(row: &RawRow, ctx: &mut TransformContext<'_>) -> Vec<ArgValue> {
    vec![
        ArgValue::Text(coerce::text_or_empty(row.get(1))),
        ArgValue::opt_text(coerce::text(row.get(2))),
        ArgValue::opt_text(coerce::text(row.get(3))),
        ctx.timestamp(row.get(4)),
        ArgValue::opt_text(coerce::media_path(row.get(5), "events")),
        ArgValue::Text(
            coerce::choice_or(row.get(6), EVENT_STATUS_ALIASES, "scheduled").to_string(),
        ),
        ctx.reference("admins", row.get(7)),
        ctx.timestamp(row.get(8)),
    ]
}

fn transform_galleries(row: &RawRow, ctx: &mut TransformContext<'_>) -> Vec<ArgValue> {
    vec![
        ArgValue::opt_text(coerce::text(row.get(1))),
        ArgValue::Text(coerce::media_path(row.get(2), "gallery").unwrap_or_default()),
        ArgValue::opt_text(coerce::text(row.get(3))),
        ctx.reference("events", row.get(4)),
        ctx.timestamp(row.get(5)),
    ]
}

fn transform_members(row: &RawRow, ctx: &mut TransformContext<'_>) -> Vec<ArgValue> {
    vec![
        ArgValue::opt_text(coerce::text(row.get(1))),
        ArgValue::Text(coerce::text_or_empty(row.get(2))),
        ArgValue::opt_text(coerce::choice(row.get(3), GENDER_ALIASES).map(str::to_string)),
        ArgValue::opt_date(coerce::date(row.get(4))),
        ArgValue::opt_text(coerce::text(row.get(5))),
        ArgValue::opt_text(coerce::text(row.get(6))),
        ArgValue::opt_text(coerce::text(row.get(7))),
        ArgValue::opt_text(coerce::media_path(row.get(8), "members")),
        ctx.timestamp(row.get(9)),
        ArgValue::Bool(coerce::flag(row.get(10), true)),
    ]
}

fn transform_sliders(row: &RawRow, _ctx: &mut TransformContext<'_>) -> Vec<ArgValue> {
    vec![
        ArgValue::opt_text(coerce::text(row.get(1))),
        ArgValue::opt_text(coerce::text(row.get(2))),
        ArgValue::Text(coerce::media_path(row.get(3), "slides").unwrap_or_default()),
        ArgValue::opt_text(coerce::text(row.get(4))),
        ArgValue::Integer(coerce::ordering(row.get(5))),
        ArgValue::Bool(coerce::flag(row.get(6), true)),
    ]
}

fn transform_programs(row: &RawRow, ctx: &mut TransformContext<'_>) -> Vec<ArgValue> {
    vec![
        ArgValue::Text(coerce::text_or_empty(row.get(1))),
        ArgValue::opt_integer(coerce::integer(row.get(2))),
        ArgValue::opt_text(coerce::text(row.get(3))),
        ArgValue::Text(coerce::choice_or(row.get(4), PLAN_STATUS_ALIASES, "draft").to_string()),
        ctx.reference("admins", row.get(5)),
        ctx.timestamp(row.get(6)),
    ]
}

fn transform_program_items(row: &RawRow, ctx: &mut TransformContext<'_>) -> Vec<ArgValue> {
    let own = coerce::legacy_id(row.get(0));
    let parent = coerce::legacy_id(row.get(2));
    // An item listed as its own parent is treated as top-level.
    let parent = if parent.is_some() && parent == own {
        ArgValue::Null
    } else {
        ctx.reference("program_items", row.get(2))
    };

    vec![
        ctx.reference("programs", row.get(1)),
        parent,
        ArgValue::Text(coerce::text_or_empty(row.get(3))),
        ArgValue::opt_text(coerce::text(row.get(4))),
        ArgValue::opt_real(coerce::real(row.get(5))),
        ArgValue::Integer(coerce::ordering(row.get(6))),
    ]
}

fn transform_org_structure(row: &RawRow, ctx: &mut TransformContext<'_>) -> Vec<ArgValue> {
    vec![
        ctx.reference("members", row.get(1)),
        ArgValue::Text(coerce::text_or_empty(row.get(2))),
        ArgValue::Text(coerce::text_or_empty(row.get(3))),
        ArgValue::opt_text(coerce::media_path(row.get(4), "organization")),
        ArgValue::Integer(coerce::ordering(row.get(5))),
        ArgValue::opt_text(coerce::text(row.get(6))),
    ]
}

fn transform_messages(row: &RawRow, ctx: &mut TransformContext<'_>) -> Vec<ArgValue> {
    vec![
        ArgValue::Text(coerce::text_or_empty(row.get(1))),
        ArgValue::opt_text(coerce::text(row.get(2))),
        ArgValue::opt_text(coerce::text(row.get(3))),
        ArgValue::Text(coerce::text_or_empty(row.get(4))),
        ArgValue::Bool(coerce::flag(row.get(5), false)),
        ctx.timestamp(row.get(6)),
    ]
}

fn transform_notifications(row: &RawRow, ctx: &mut TransformContext<'_>) -> Vec<ArgValue> {
    vec![
        ctx.reference("admins", row.get(1)),
        ArgValue::Text(coerce::text_or_empty(row.get(2))),
        ArgValue::Text(coerce::text_or_empty(row.get(3))),
        ArgValue::Bool(coerce::flag(row.get(4), false)),
        ctx.timestamp(row.get(5)),
    ]
}

fn transform_reports(row: &RawRow, ctx: &mut TransformContext<'_>) -> Vec<ArgValue> {
    vec![
        ArgValue::Text(coerce::text_or_empty(row.get(1))),
        ArgValue::opt_text(coerce::text(row.get(2))),
        ArgValue::opt_text(coerce::media_path(row.get(3), "reports")),
        ctx.reference("admins", row.get(4)),
        ctx.timestamp(row.get(5)),
    ]
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use proptest::prelude::*;
    use time::macros::{date, datetime};

    use super::*;
    use crate::decoder::decode_tuple;

    fn fixture_now() -> OffsetDateTime {
        datetime!(2024-02-01 09:00:00 UTC)
    }

    fn apply(
        table: &str,
        tuple: &str,
        registry: &mut IdentityRegistry,
    ) -> Result<TargetRow, TransformError> {
        let mut ctx = TransformContext::new(registry, fixture_now());
        transform(table, &decode_tuple(tuple), &mut ctx)
    }

    fn must_apply(table: &str, tuple: &str, registry: &mut IdentityRegistry) -> TargetRow {
        match apply(table, tuple, registry) {
            Ok(row) => row,
            Err(err) => panic!("transform of {table} ({tuple}) failed: {err}"),
        }
    }

    fn arg<'a>(row: &'a TargetRow, column: &str) -> &'a ArgValue {
        match row.columns.iter().position(|candidate| *candidate == column) {
            Some(index) => &row.args[index],
            None => panic!("{} has no column {column}", row.target_table),
        }
    }

    fn scalar_strategy() -> impl Strategy<Value = Scalar> {
        prop_oneof![
            Just(Scalar::Null),
            "[0-9]{1,4}".prop_map(Scalar::Raw),
            "-?[0-9a-z:. -]{0,20}".prop_map(Scalar::Raw),
            ".{0,16}".prop_map(Scalar::Text),
        ]
    }

    #[test]
    fn catalog_is_consistent() {
        let sources = rules().iter().map(|rule| rule.source_table).collect::<BTreeSet<_>>();
        let targets = rules().iter().map(|rule| rule.target_table).collect::<BTreeSet<_>>();
        assert_eq!(sources.len(), 14);
        assert_eq!(targets.len(), 14);

        for rule in rules() {
            assert_eq!(rule.source_columns.first(), Some(&"id"), "{}", rule.source_table);
            assert_eq!(rule.target_columns.first(), Some(&"id"), "{}", rule.target_table);
            for reference in rule.hard_dependencies.iter().chain(rule.soft_references) {
                assert!(sources.contains(reference), "{} references {reference}", rule.source_table);
            }
        }
    }

    #[test]
    fn hard_dependencies_load_first() {
        assert_eq!(validate_order(), Ok(()));
    }

    #[test]
    fn all_null_rows_transform_for_every_table() {
        let mut registry = IdentityRegistry::new();
        for rule in rules() {
            let mut cells = vec![Scalar::Null; rule.source_columns.len()];
            cells[0] = Scalar::Raw("7".to_string());
            let row = RawRow::new(cells);
            let mut ctx = TransformContext::new(&mut registry, fixture_now());
            match rule.apply(&row, &mut ctx) {
                Ok(target) => {
                    assert_eq!(target.args.len(), rule.target_columns.len(), "{}", rule.source_table);
                    assert_eq!(target.legacy_id, 7);
                }
                Err(err) => panic!("{} rejected an all-null row: {err}", rule.source_table),
            }
        }
    }

    #[test]
    fn wrong_column_count_is_a_shape_mismatch() {
        let mut registry = IdentityRegistry::new();
        let err = apply("sliders", "1,'only two'", &mut registry);
        assert_eq!(
            err,
            Err(TransformError::ShapeMismatch {
                table: "sliders".to_string(),
                expected: 7,
                actual: 2
            })
        );
    }

    #[test]
    fn unknown_table_is_reported() {
        let mut registry = IdentityRegistry::new();
        assert_eq!(
            apply("sessions", "1", &mut registry),
            Err(TransformError::UnknownTable("sessions".to_string()))
        );
    }

    #[test]
    fn admins_map_columns_and_defaults() {
        let mut registry = IdentityRegistry::new();
        let row = must_apply(
            "admins",
            "3,'siti','$2y$10$hash','',NULL,'SuperAdmin',NULL,'0000-00-00 00:00:00'",
            &mut registry,
        );

        assert_eq!(row.target_table, "users");
        assert_eq!(row.legacy_id, 3);
        assert_eq!(arg(&row, "id"), &ArgValue::Id(registry.resolve("admins", 3)));
        assert_eq!(arg(&row, "full_name"), &ArgValue::Text("siti".to_string()));
        assert_eq!(arg(&row, "email"), &ArgValue::Null);
        assert_eq!(arg(&row, "role"), &ArgValue::Text("admin".to_string()));
        assert_eq!(arg(&row, "is_active"), &ArgValue::Bool(true));
        assert_eq!(arg(&row, "created_at"), &ArgValue::Timestamp(fixture_now()));
    }

    #[test]
    fn foreign_keys_resolve_into_the_referenced_table_namespace() {
        let mut registry = IdentityRegistry::new();
        let publication = must_apply(
            "publications",
            "1,'Annual book','A. Writer',NULL,'cover.png',NULL,'2022-03-01',7",
            &mut registry,
        );
        let admin = must_apply("admins", "7,'budi','x','Budi',NULL,'editor',1,NULL", &mut registry);

        assert_eq!(arg(&publication, "created_by"), &ArgValue::Id(admin.canonical_id));
        assert_ne!(arg(&publication, "id"), arg(&admin, "id"));
        assert_eq!(
            arg(&publication, "cover_url"),
            &ArgValue::Text("/uploads/publications/cover.png".to_string())
        );
    }

    #[test]
    fn zero_foreign_key_resolves_to_null() {
        let mut registry = IdentityRegistry::new();
        let image = must_apply("galleries", "4,'Opening','a.jpg',NULL,0,NULL", &mut registry);
        assert_eq!(arg(&image, "event_id"), &ArgValue::Null);
        assert_eq!(registry.lookup("events", 0), None);
    }

    #[test]
    fn flags_and_ordering_take_table_defaults() {
        let mut registry = IdentityRegistry::new();
        let slide = must_apply("sliders", "1,NULL,NULL,'s.jpg',NULL,NULL,NULL", &mut registry);
        assert_eq!(arg(&slide, "sort_order"), &ArgValue::Integer(0));
        assert_eq!(arg(&slide, "is_active"), &ArgValue::Bool(true));

        let message = must_apply("messages", "1,'Ana',NULL,NULL,'Hello',NULL,NULL", &mut registry);
        assert_eq!(arg(&message, "is_read"), &ArgValue::Bool(false));
        assert_eq!(arg(&message, "received_at"), &ArgValue::Timestamp(fixture_now()));
    }

    #[test]
    fn nullable_text_passes_null_and_required_text_defaults_to_empty() {
        let mut registry = IdentityRegistry::new();
        let content = must_apply("contents", "1,NULL,NULL,NULL,NULL,NULL", &mut registry);
        assert_eq!(arg(&content, "section"), &ArgValue::Text(String::new()));
        assert_eq!(arg(&content, "title"), &ArgValue::Null);
        assert_eq!(arg(&content, "body"), &ArgValue::Text(String::new()));
    }

    #[test]
    fn plan_item_parents_resolve_regardless_of_encounter_order() {
        let mut registry = IdentityRegistry::new();
        let c = must_apply("program_items", "3,1,2,'C',NULL,NULL,3", &mut registry);
        let b = must_apply("program_items", "2,1,1,'B',NULL,NULL,2", &mut registry);
        let a = must_apply("program_items", "1,1,NULL,'A',NULL,'2500000.00',1", &mut registry);

        let ids = [a.canonical_id, b.canonical_id, c.canonical_id];
        assert_eq!(ids.iter().collect::<BTreeSet<_>>().len(), 3);
        assert_eq!(arg(&a, "parent_id"), &ArgValue::Null);
        assert_eq!(arg(&b, "parent_id"), &ArgValue::Id(a.canonical_id));
        assert_eq!(arg(&c, "parent_id"), &ArgValue::Id(b.canonical_id));
        assert_eq!(arg(&a, "plan_id"), &ArgValue::Id(registry.resolve("programs", 1)));
        assert_eq!(arg(&a, "budget"), &ArgValue::Real(2_500_000.0));
    }

    #[test]
    fn plan_item_that_is_its_own_parent_becomes_top_level() {
        let mut registry = IdentityRegistry::new();
        let item = must_apply("program_items", "5,1,5,'Loop',NULL,NULL,NULL", &mut registry);
        assert_eq!(arg(&item, "parent_id"), &ArgValue::Null);
    }

    #[test]
    fn member_cells_are_coerced() {
        let mut registry = IdentityRegistry::new();
        let member = must_apply(
            "members",
            "12,'A-0012','Dewi','F','1990-04-02',NULL,'0812','dewi@example.org',NULL,'2015-01-10 10:00:00','0'",
            &mut registry,
        );
        assert_eq!(arg(&member, "gender"), &ArgValue::Text("female".to_string()));
        assert_eq!(arg(&member, "birth_date"), &ArgValue::Date(date!(1990-04-02)));
        assert_eq!(arg(&member, "is_active"), &ArgValue::Bool(false));
        assert_eq!(arg(&member, "joined_at"), &ArgValue::Timestamp(datetime!(2015-01-10 10:00:00 UTC)));
    }

    #[test]
    fn rows_without_a_usable_legacy_id_are_rejected() {
        let mut registry = IdentityRegistry::new();
        for tuple in ["NULL,'Q1',NULL,NULL,NULL,NULL", "'abc','Q1',NULL,NULL,NULL,NULL"] {
            assert_eq!(
                apply("reports", tuple, &mut registry),
                Err(TransformError::MissingLegacyId { table: "reports".to_string() })
            );
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn missing_legacy_id_allocates_nothing_for_references() {
        let mut registry = IdentityRegistry::new();
        let result = apply("notifications", "NULL,5,'Hello',NULL,0,NULL", &mut registry);
        assert!(matches!(result, Err(TransformError::MissingLegacyId { .. })));
        assert_eq!(registry.lookup("admins", 5), None);
    }

    proptest! {
        #[test]
        fn property_transform_is_total_for_well_shaped_rows(
            table_index in 0_usize..14,
            cells in proptest::collection::vec(scalar_strategy(), 11),
            legacy_id in 1_i64..1_000_000
        ) {
            let rule = &rules()[table_index];
            let mut cells = cells[..rule.source_columns.len()].to_vec();
            cells[0] = Scalar::Raw(legacy_id.to_string());
            let row = RawRow::new(cells);
            let mut registry = IdentityRegistry::new();
            let mut ctx = TransformContext::new(&mut registry, fixture_now());
            let target = rule.apply(&row, &mut ctx);
            prop_assert!(target.is_ok());
            if let Ok(target) = target {
                prop_assert_eq!(target.args.len(), rule.target_columns.len());
            }
        }
    }
}
