//! Decoding of one parenthesized value tuple into scalar cells.
//!
//! The input is the text between the opening and closing parenthesis of a
//! dump tuple. Decoding never fails; a malformed tuple yields whatever cells
//! could be recovered and the column count check happens downstream.

use crate::{RawRow, Scalar};

/// Decode the interior of one tuple, e.g. `1, 'O\'Brien', NULL`.
#[must_use]
pub fn decode_tuple(text: &str) -> RawRow {
    if text.trim().is_empty() {
        return RawRow::default();
    }

    split_top_level(text).into_iter().map(decode_token).collect::<Vec<_>>().into()
}

fn split_top_level(text: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut depth = 0_usize;
    let mut in_quote = false;
    let mut escaped = false;

    for (index, ch) in text.char_indices() {
        if in_quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '\'' {
                in_quote = false;
            }
            continue;
        }

        match ch {
            '\'' => in_quote = true,
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                pieces.push(&text[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }

    pieces.push(&text[start..]);
    pieces
}

fn decode_token(token: &str) -> Scalar {
    let trimmed = token.trim();
    if trimmed == "NULL" {
        return Scalar::Null;
    }

    match trimmed.strip_prefix('\'') {
        Some(quoted) => Scalar::Text(unquote(quoted)),
        None => Scalar::Raw(trimmed.to_string()),
    }
}

/// Resolve escapes up to the closing quote; text after it is dropped.
fn unquote(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some('t') => out.push('\t'),
                Some('0') => out.push('\0'),
                Some('Z') => out.push('\u{1a}'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            },
            '\'' => {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    out.push('\'');
                } else {
                    break;
                }
            }
            other => out.push(other),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn text(value: &str) -> Scalar {
        Scalar::Text(value.to_string())
    }

    fn raw(value: &str) -> Scalar {
        Scalar::Raw(value.to_string())
    }

    #[test]
    fn decodes_null_text_and_raw_cells() {
        let row = decode_tuple("1, 'Jane', NULL, 12.50");
        assert_eq!(row.values(), &[raw("1"), text("Jane"), Scalar::Null, raw("12.50")]);
    }

    #[test]
    fn unescapes_quotes_and_newlines() {
        let row = decode_tuple(r"7,'O\'Brien','line one\nline two'");
        assert_eq!(row.values(), &[raw("7"), text("O'Brien"), text("line one\nline two")]);
    }

    #[test]
    fn commas_and_parens_inside_quotes_do_not_split() {
        let row = decode_tuple("1,'a, b (c)',2");
        assert_eq!(row.values(), &[raw("1"), text("a, b (c)"), raw("2")]);
    }

    #[test]
    fn doubled_quote_and_backslash_escapes() {
        let row = decode_tuple(r#"'it''s','C:\\dir','say \"hi\"'"#);
        assert_eq!(row.values(), &[text("it's"), text("C:\\dir"), text("say \"hi\"")]);
    }

    #[test]
    fn lowercase_null_is_a_bare_token() {
        let row = decode_tuple("null,NULL");
        assert_eq!(row.values(), &[raw("null"), Scalar::Null]);
    }

    #[test]
    fn quoted_null_is_text() {
        assert_eq!(decode_tuple("'NULL'").values(), &[text("NULL")]);
    }

    #[test]
    fn unterminated_quote_keeps_remaining_text() {
        let row = decode_tuple("1,'broken, tail");
        assert_eq!(row.values(), &[raw("1"), text("broken, tail")]);
    }

    #[test]
    fn empty_interior_is_an_empty_row() {
        assert!(decode_tuple("  ").is_empty());
    }

    #[test]
    fn empty_cells_decode_as_empty_raw_tokens() {
        let row = decode_tuple("1,,3");
        assert_eq!(row.values(), &[raw("1"), raw(""), raw("3")]);
    }

    #[test]
    fn function_call_tokens_stay_whole() {
        let row = decode_tuple("1,NOW(),CONCAT('a','b')");
        assert_eq!(row.len(), 3);
        assert_eq!(row.get(1), &raw("NOW()"));
    }

    proptest! {
        #[test]
        fn property_decoding_is_deterministic(input in ".{0,64}") {
            prop_assert_eq!(decode_tuple(&input), decode_tuple(&input));
        }

        #[test]
        fn property_quoted_text_survives_escaping(value in "[a-zA-Z0-9 ',\\n()]{0,32}") {
            let escaped = value.replace('\\', "\\\\").replace('\'', "\\'").replace('\n', "\\n");
            let row = decode_tuple(&format!("1,'{escaped}'"));
            prop_assert_eq!(row.get(1), &Scalar::Text(value));
        }
    }
}
