//! Location of insert statements in a textual dump.
//!
//! Only `INSERT ... INTO <table> [(<columns>)] VALUES (...), (...);` is
//! recognized. Everything else (DDL, `SET` lines, comments) is stepped over
//! with quote awareness so literals never end a statement early.

use std::collections::{BTreeMap, BTreeSet};

/// One tuple of an insert statement, still undecoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScannedTuple<'a> {
    pub table: &'a str,
    /// Text between the tuple's parentheses.
    pub tuple: &'a str,
}

/// Iterator over the tuples of known tables, in document order.
#[derive(Debug)]
pub struct DumpScanner<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
    known: BTreeSet<&'a str>,
    current: Option<&'a str>,
    unknown: BTreeMap<String, usize>,
}

impl<'a> DumpScanner<'a> {
    /// `known_tables` may outlive `text`; catalog names are `'static`.
    #[must_use]
    pub fn new<'k, I>(text: &'a str, known_tables: I) -> Self
    where
        'k: 'a,
        I: IntoIterator<Item = &'k str>,
    {
        Self {
            text,
            bytes: text.as_bytes(),
            pos: 0,
            known: known_tables.into_iter().collect::<BTreeSet<&'k str>>(),
            current: None,
            unknown: BTreeMap::new(),
        }
    }

    /// Tables outside the known set seen so far, with their statement counts.
    #[must_use]
    pub fn unknown_tables(&self) -> &BTreeMap<String, usize> {
        &self.unknown
    }

    fn next_tuple(&mut self) -> Option<&'a str> {
        self.skip_whitespace();
        if self.peek() == Some(b',') {
            self.pos += 1;
            self.skip_whitespace();
        }

        match self.peek() {
            Some(b'(') => {}
            Some(b';') => {
                self.pos += 1;
                return None;
            }
            None => return None,
            Some(_) => {
                self.skip_statement();
                return None;
            }
        }

        let open = self.pos;
        let Some(close) = self.matching_paren(open) else {
            // Truncated statement: nothing usable after this point.
            self.pos = self.bytes.len();
            return None;
        };
        self.pos = close + 1;
        let text = self.text;
        Some(&text[open + 1..close])
    }

    /// Advance to the next insert header and return its table name.
    fn next_insert(&mut self) -> Option<&'a str> {
        while self.pos < self.bytes.len() {
            let byte = self.bytes[self.pos];
            match byte {
                b'-' if self.starts_with(b"--") => self.skip_line(),
                b'#' => self.skip_line(),
                b'/' if self.starts_with(b"/*") => self.skip_block_comment(),
                b'\'' | b'"' | b'`' => self.pos = self.quoted_end(self.pos, byte),
                b'i' | b'I' if self.at_word_start() && self.keyword(b"INSERT") => {
                    let start = self.pos;
                    self.pos += b"INSERT".len();
                    if let Some(table) = self.insert_header() {
                        return Some(table);
                    }
                    self.pos = start + 1;
                    self.skip_statement();
                }
                _ => self.pos += 1,
            }
        }
        None
    }

    fn insert_header(&mut self) -> Option<&'a str> {
        self.skip_whitespace();
        let modifiers: [&[u8]; 4] = [b"LOW_PRIORITY", b"DELAYED", b"HIGH_PRIORITY", b"IGNORE"];
        for modifier in modifiers {
            if self.keyword(modifier) {
                self.pos += modifier.len();
                self.skip_whitespace();
            }
        }
        if !self.keyword(b"INTO") {
            return None;
        }
        self.pos += b"INTO".len();
        self.skip_whitespace();

        let mut table = self.identifier()?;
        while self.peek() == Some(b'.') {
            self.pos += 1;
            table = self.identifier()?;
        }

        self.skip_whitespace();
        if self.peek() == Some(b'(') {
            let close = self.matching_paren(self.pos)?;
            self.pos = close + 1;
            self.skip_whitespace();
        }

        if self.keyword(b"VALUES") {
            self.pos += b"VALUES".len();
        } else if self.keyword(b"VALUE") {
            self.pos += b"VALUE".len();
        } else {
            return None;
        }
        Some(table)
    }

    fn identifier(&mut self) -> Option<&'a str> {
        let text = self.text;
        match self.peek()? {
            quote @ (b'`' | b'"') => {
                let start = self.pos + 1;
                let offset = self.bytes[start..].iter().position(|byte| *byte == quote)?;
                self.pos = start + offset + 1;
                Some(&text[start..start + offset])
            }
            _ => {
                let start = self.pos;
                while self
                    .peek()
                    .is_some_and(|byte| byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'$')
                {
                    self.pos += 1;
                }
                let end = self.pos;
                (end > start).then(|| &text[start..end])
            }
        }
    }

    /// Index of the `)` closing the `(` at `open`, skipping quoted literals.
    fn matching_paren(&self, open: usize) -> Option<usize> {
        let mut depth = 0_usize;
        let mut index = open;
        while index < self.bytes.len() {
            match self.bytes[index] {
                b'(' => depth += 1,
                b')' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return Some(index);
                    }
                }
                quote @ (b'\'' | b'"') => {
                    index = self.quoted_end(index, quote);
                    continue;
                }
                _ => {}
            }
            index += 1;
        }
        None
    }

    /// Position just past the literal starting at `open`.
    fn quoted_end(&self, open: usize, quote: u8) -> usize {
        let mut index = open + 1;
        while index < self.bytes.len() {
            let byte = self.bytes[index];
            if byte == b'\\' && quote != b'`' {
                index += 2;
                continue;
            }
            if byte == quote {
                return index + 1;
            }
            index += 1;
        }
        self.bytes.len()
    }

    fn skip_statement(&mut self) {
        while self.pos < self.bytes.len() {
            match self.bytes[self.pos] {
                b';' => {
                    self.pos += 1;
                    return;
                }
                quote @ (b'\'' | b'"' | b'`') => self.pos = self.quoted_end(self.pos, quote),
                _ => self.pos += 1,
            }
        }
    }

    fn skip_line(&mut self) {
        match self.bytes[self.pos..].iter().position(|byte| *byte == b'\n') {
            Some(offset) => self.pos += offset + 1,
            None => self.pos = self.bytes.len(),
        }
    }

    fn skip_block_comment(&mut self) {
        let body = &self.bytes[self.pos + 2..];
        match body.windows(2).position(|window| window == b"*/") {
            Some(offset) => self.pos += offset + 4,
            None => self.pos = self.bytes.len(),
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|byte| byte.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn starts_with(&self, prefix: &[u8]) -> bool {
        self.bytes[self.pos..].starts_with(prefix)
    }

    /// Case-insensitive keyword at the cursor, followed by a non-word byte.
    fn keyword(&self, word: &[u8]) -> bool {
        let end = self.pos + word.len();
        if end > self.bytes.len() || !self.bytes[self.pos..end].eq_ignore_ascii_case(word) {
            return false;
        }
        self.bytes.get(end).map_or(true, |byte| !is_word_byte(*byte))
    }

    fn at_word_start(&self) -> bool {
        self.pos == 0 || !is_word_byte(self.bytes[self.pos - 1])
    }
}

impl<'a> Iterator for DumpScanner<'a> {
    type Item = ScannedTuple<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(table) = self.current {
                if let Some(tuple) = self.next_tuple() {
                    return Some(ScannedTuple { table, tuple });
                }
                self.current = None;
            }

            let table = self.next_insert()?;
            if let Some(known) = self.known.get(table).copied() {
                self.current = Some(known);
            } else {
                let seen = self.unknown.entry(table.to_string()).or_insert(0);
                if *seen == 0 {
                    tracing::info!(table, "skipping inserts for table outside the migration catalog");
                }
                *seen += 1;
                self.skip_statement();
            }
        }
    }
}

fn is_word_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}
