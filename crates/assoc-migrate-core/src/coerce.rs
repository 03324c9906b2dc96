//! Explicit, local coercions from untyped legacy cells.
//!
//! Every helper is total: an unusable cell degrades to `None` or to the
//! default supplied by the caller.

use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};

use crate::Scalar;

/// Legacy integer key held by `cell`, if it is numeric.
#[must_use]
pub fn legacy_id(cell: &Scalar) -> Option<i64> {
    integer(cell)
}

#[must_use]
pub fn integer(cell: &Scalar) -> Option<i64> {
    cell.as_str()?.trim().parse().ok()
}

#[must_use]
pub fn real(cell: &Scalar) -> Option<f64> {
    cell.as_str()?.trim().parse::<f64>().ok().filter(|value| value.is_finite())
}

/// Ordering column: anything non-numeric sorts as `0`.
#[must_use]
pub fn ordering(cell: &Scalar) -> i64 {
    integer(cell).unwrap_or(0)
}

/// Boolean-ish flag encoded as `1`/`'1'`. Missing cells take `default`.
#[must_use]
pub fn flag(cell: &Scalar, default: bool) -> bool {
    match cell.as_str().map(str::trim) {
        None | Some("") => default,
        Some(value) => value == "1" || value.eq_ignore_ascii_case("true"),
    }
}

#[must_use]
pub fn text(cell: &Scalar) -> Option<String> {
    cell.as_str().map(str::to_string)
}

/// Text for a column the target declares NOT NULL.
#[must_use]
pub fn text_or_empty(cell: &Scalar) -> String {
    text(cell).unwrap_or_default()
}

/// Public path of an uploaded file. Bare legacy file names live under `/uploads/<folder>/`.
#[must_use]
pub fn media_path(cell: &Scalar, folder: &str) -> Option<String> {
    let value = cell.as_str()?.trim();
    if value.is_empty() {
        return None;
    }
    if value.starts_with('/') || value.starts_with("http://") || value.starts_with("https://") {
        return Some(value.to_string());
    }
    Some(format!("/uploads/{folder}/{value}"))
}

/// Map a legacy enum value through `aliases` (matched case-insensitively).
#[must_use]
pub fn choice(cell: &Scalar, aliases: &[(&str, &'static str)]) -> Option<&'static str> {
    let value = cell.as_str()?.trim();
    aliases
        .iter()
        .find(|(legacy, _)| legacy.eq_ignore_ascii_case(value))
        .map(|(_, canonical)| *canonical)
}

#[must_use]
pub fn choice_or(
    cell: &Scalar,
    aliases: &[(&str, &'static str)],
    default: &'static str,
) -> &'static str {
    choice(cell, aliases).unwrap_or(default)
}

/// Parse the timestamp shapes found in legacy dumps.
///
/// Zero dates (`0000-00-00 ...`) and unparseable text yield `None`.
#[must_use]
pub fn timestamp(cell: &Scalar) -> Option<OffsetDateTime> {
    let value = cell.as_str()?.trim();
    if value.is_empty() || value.starts_with("0000-00-00") {
        return None;
    }

    if let Ok(parsed) = OffsetDateTime::parse(value, &Rfc3339) {
        return Some(parsed);
    }

    if value.bytes().all(|byte| byte.is_ascii_digit()) {
        return value
            .parse::<i64>()
            .ok()
            .and_then(|seconds| OffsetDateTime::from_unix_timestamp(seconds).ok());
    }

    let whole_seconds = value.split_once('.').map_or(value, |(head, _)| head);
    let layouts = [
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
        format_description!("[year]-[month]-[day] [hour]:[minute]"),
    ];
    for layout in layouts {
        if let Ok(parsed) = PrimitiveDateTime::parse(whole_seconds, layout) {
            return Some(parsed.assume_utc());
        }
    }

    Date::parse(value, format_description!("[year]-[month]-[day]"))
        .ok()
        .map(|date| PrimitiveDateTime::new(date, Time::MIDNIGHT).assume_utc())
}

/// Timestamp for a NOT NULL column: missing or invalid values become `fallback`.
#[must_use]
pub fn timestamp_or(cell: &Scalar, fallback: OffsetDateTime) -> OffsetDateTime {
    timestamp(cell).unwrap_or(fallback)
}

#[must_use]
pub fn date(cell: &Scalar) -> Option<Date> {
    timestamp(cell).map(OffsetDateTime::date)
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn raw(value: &str) -> Scalar {
        Scalar::Raw(value.to_string())
    }

    fn text_cell(value: &str) -> Scalar {
        Scalar::Text(value.to_string())
    }

    #[test]
    fn flags_use_documented_defaults_when_missing() {
        assert!(flag(&Scalar::Null, true));
        assert!(!flag(&Scalar::Null, false));
        assert!(flag(&text_cell(""), true));
        assert!(flag(&raw("1"), false));
        assert!(flag(&text_cell("1"), false));
        assert!(!flag(&raw("0"), true));
        assert!(!flag(&text_cell("yes please"), true));
    }

    #[test]
    fn ordering_defaults_to_zero() {
        assert_eq!(ordering(&Scalar::Null), 0);
        assert_eq!(ordering(&text_cell("abc")), 0);
        assert_eq!(ordering(&raw(" 12 ")), 12);
    }

    #[test]
    fn timestamps_accept_legacy_layouts() {
        let expected = datetime!(2023-05-17 08:30:00 UTC);
        assert_eq!(timestamp(&text_cell("2023-05-17 08:30:00")), Some(expected));
        assert_eq!(timestamp(&text_cell("2023-05-17T08:30:00")), Some(expected));
        assert_eq!(timestamp(&text_cell("2023-05-17 08:30:00.000000")), Some(expected));
        assert_eq!(timestamp(&text_cell("2023-05-17T08:30:00Z")), Some(expected));
        assert_eq!(timestamp(&raw("1684312200")), Some(expected));
        assert_eq!(
            timestamp(&text_cell("2023-05-17")),
            Some(datetime!(2023-05-17 00:00:00 UTC))
        );
    }

    #[test]
    fn zero_and_garbage_timestamps_fall_back() {
        let fallback = datetime!(2020-01-01 00:00:00 UTC);
        assert_eq!(timestamp_or(&text_cell("0000-00-00 00:00:00"), fallback), fallback);
        assert_eq!(timestamp_or(&text_cell("yesterday"), fallback), fallback);
        assert_eq!(timestamp_or(&Scalar::Null, fallback), fallback);
    }

    #[test]
    fn media_paths_are_prefixed_only_for_bare_file_names() {
        assert_eq!(
            media_path(&text_cell("a.jpg"), "gallery"),
            Some("/uploads/gallery/a.jpg".to_string())
        );
        assert_eq!(
            media_path(&text_cell("https://cdn.example.org/a.jpg"), "gallery"),
            Some("https://cdn.example.org/a.jpg".to_string())
        );
        assert_eq!(media_path(&text_cell("  "), "gallery"), None);
    }

    #[test]
    fn choices_match_aliases_case_insensitively() {
        let aliases = [("m", "male"), ("male", "male"), ("f", "female")];
        assert_eq!(choice(&text_cell("M"), &aliases), Some("male"));
        assert_eq!(choice(&text_cell("x"), &aliases), None);
        assert_eq!(choice_or(&Scalar::Null, &aliases, "female"), "female");
    }

    #[test]
    fn reals_reject_non_finite_values() {
        assert_eq!(real(&raw("1500000.50")), Some(1_500_000.5));
        assert_eq!(real(&text_cell("NaN")), None);
        assert_eq!(real(&text_cell("inf")), None);
    }
}
