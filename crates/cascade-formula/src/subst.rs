//! Runtime placeholder substitution for record-locator queries.
//!
//! Selectors and formulas may carry `{table.column}`, `{table:modifier.column}`
//! and `{table.ids}` placeholders that are bound per refresh step: id lists
//! come from previously resolved levels, row scopes from the triggering
//! write (the `:original` modifier keys the pre-change row).

use std::collections::BTreeMap;

use cascade_core::value::{RowValues, SqlValue};

use crate::parser::normalize_sql;

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_cont(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// One bound scope: either a row of values or a resolved id set.
#[derive(Debug, Clone, PartialEq)]
pub enum Scope {
    Row(RowValues),
    Ids(Vec<i64>),
}

/// Scopes keyed by `table` or `table:modifier`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubstitutionContext {
    scopes: BTreeMap<String, Scope>,
}

impl SubstitutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `{<table>.ids}` to a concrete id list.
    pub fn with_ids(mut self, table: impl Into<String>, ids: &[i64]) -> Self {
        self.scopes.insert(table.into(), Scope::Ids(ids.to_vec()));
        self
    }

    /// Binds a row scope; `key` is `table` or `table:modifier`.
    pub fn with_row(mut self, key: impl Into<String>, values: RowValues) -> Self {
        self.scopes.insert(key.into(), Scope::Row(values));
        self
    }

    fn render(&self, key: &str, column: &str) -> String {
        match self.scopes.get(key) {
            Some(Scope::Ids(ids)) if column == "ids" => {
                if ids.is_empty() {
                    // An empty list must stay valid inside `IN (…)`.
                    "NULL".to_string()
                } else {
                    ids.iter()
                        .map(i64::to_string)
                        .collect::<Vec<_>>()
                        .join(",")
                }
            }
            Some(Scope::Row(values)) => values
                .get(column)
                .map(SqlValue::to_literal)
                .unwrap_or_else(|| "NULL".to_string()),
            _ => "NULL".to_string(),
        }
    }
}

/// Parses one `{table(:modifier)?.column}` placeholder starting at the `{`.
///
/// Returns `(end_exclusive, scope_key, column)`.
fn parse_placeholder(text: &str, start: usize) -> Option<(usize, String, String)> {
    let bytes = text.as_bytes();
    let mut i = start + 1;

    let table_start = i;
    if i >= bytes.len() || !is_ident_start(bytes[i]) {
        return None;
    }
    while i < bytes.len() && is_ident_cont(bytes[i]) {
        i += 1;
    }
    let mut key = text[table_start..i].to_string();

    if i < bytes.len() && bytes[i] == b':' {
        i += 1;
        let modifier_start = i;
        if i >= bytes.len() || !is_ident_start(bytes[i]) {
            return None;
        }
        while i < bytes.len() && is_ident_cont(bytes[i]) {
            i += 1;
        }
        key.push(':');
        key.push_str(&text[modifier_start..i]);
    }

    if i >= bytes.len() || bytes[i] != b'.' {
        return None;
    }
    i += 1;

    let column_start = i;
    if i >= bytes.len() || !is_ident_start(bytes[i]) {
        return None;
    }
    while i < bytes.len() && is_ident_cont(bytes[i]) {
        i += 1;
    }
    let column = text[column_start..i].to_string();

    if i >= bytes.len() || bytes[i] != b'}' {
        return None;
    }

    Some((i + 1, key, column))
}

/// Substitutes every placeholder in `sql` from the context.
///
/// The text is whitespace-normalised first; unresolvable scopes render as
/// `NULL`, and `{{…}}` sequences are never placeholders.
pub fn substitute(sql: &str, ctx: &SubstitutionContext) -> String {
    let text = normalize_sql(sql);
    let bytes = text.as_bytes();
    let mut result = String::with_capacity(text.len());
    let mut last = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'{' {
            if i + 1 < bytes.len() && bytes[i + 1] == b'{' {
                i += 2;
                continue;
            }
            if let Some((end, key, column)) = parse_placeholder(&text, i) {
                result.push_str(&text[last..i]);
                result.push_str(&ctx.render(&key, &column));
                i = end;
                last = end;
                continue;
            }
        }
        i += 1;
    }

    result.push_str(&text[last..]);
    result
}
