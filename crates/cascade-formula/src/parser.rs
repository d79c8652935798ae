//! Scanners for the formula template language.
//!
//! All scanning is a byte walk over ASCII structure; identifiers are
//! `[A-Za-z_][A-Za-z0-9_]*`. Anything that does not match a placeholder
//! shape is passed through untouched.

use crate::types::{ColumnRef, FormulaError, Variable};

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_cont(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Collapses runs of whitespace to single spaces and trims the ends.
///
/// Formula and selector text is authored with newlines and indentation;
/// statements are compiled and compared in normalised form.
pub fn normalize_sql(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Reads an identifier starting at `from`, returning its end (exclusive).
fn read_ident(bytes: &[u8], from: usize) -> Option<usize> {
    if from >= bytes.len() || !is_ident_start(bytes[from]) {
        return None;
    }
    let mut end = from + 1;
    while end < bytes.len() && is_ident_cont(bytes[end]) {
        end += 1;
    }
    Some(end)
}

/// Finds the next `{{table}}.column` placeholder at or after `from`.
///
/// Returns the span of the whole placeholder and the parsed reference.
fn find_table_ref(text: &str, from: usize) -> Option<(usize, usize, ColumnRef)> {
    let bytes = text.as_bytes();
    let len = bytes.len();
    let mut i = from;

    while i + 1 < len {
        if bytes[i] != b'{' || bytes[i + 1] != b'{' {
            i += 1;
            continue;
        }

        let start = i;
        let table_start = i + 2;
        let Some(table_end) = read_ident(bytes, table_start) else {
            i += 2;
            continue;
        };
        if table_end + 2 >= len || bytes[table_end] != b'}' || bytes[table_end + 1] != b'}' {
            i = table_end;
            continue;
        }
        if bytes[table_end + 2] != b'.' {
            i = table_end + 2;
            continue;
        }
        let column_start = table_end + 3;
        let Some(column_end) = read_ident(bytes, column_start) else {
            i = table_end + 2;
            continue;
        };

        let reference = ColumnRef {
            table: text[table_start..table_end].to_string(),
            column: text[column_start..column_end].to_string(),
        };
        return Some((start, column_end, reference));
    }
    None
}

/// Collects every `{{table}}.column` reference in the text, in order.
pub fn scan_table_refs(text: &str) -> Vec<ColumnRef> {
    let mut refs = Vec::new();
    let mut i = 0;
    while let Some((_, end, reference)) = find_table_ref(text, i) {
        refs.push(reference);
        i = end;
    }
    refs
}

/// Replaces every `{{table}}.column` reference using the given mapper.
pub fn rewrite_table_refs(text: &str, mut replace: impl FnMut(&ColumnRef) -> String) -> String {
    let mut result = String::with_capacity(text.len());
    let mut i = 0;
    while let Some((start, end, reference)) = find_table_ref(text, i) {
        result.push_str(&text[i..start]);
        result.push_str(&replace(&reference));
        i = end;
    }
    result.push_str(&text[i..]);
    result
}

/// Replaces standalone occurrences of `name` (not part of a longer
/// identifier, not qualified with `.`) with `replacement`.
///
/// Used to resolve bare variable references in a formula to their owning
/// CTE's projected column.
pub fn replace_bare_ident(text: &str, name: &str, replacement: &str) -> String {
    let bytes = text.as_bytes();
    let pattern = name.as_bytes();
    let mut result = String::with_capacity(text.len());
    let mut last = 0;
    let mut i = 0;

    while i < bytes.len() {
        let boundary_before = i == 0 || (!is_ident_cont(bytes[i - 1]) && bytes[i - 1] != b'.');
        if boundary_before && bytes[i..].starts_with(pattern) {
            let after = i + pattern.len();
            let boundary_after = after >= bytes.len() || !is_ident_cont(bytes[after]);
            if boundary_after {
                result.push_str(&text[last..i]);
                result.push_str(replacement);
                i = after;
                last = after;
                continue;
            }
        }
        i += 1;
    }
    result.push_str(&text[last..]);
    result
}

/// Parses the variable declarations block: one `var <name> = <expr>` per
/// non-blank line.
///
/// Every `{{t}}.col` reference within one expression must name the same
/// table; that table owns the variable.
pub fn parse_variables(text: &str) -> Result<Vec<Variable>, FormulaError> {
    let mut variables = Vec::new();

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        let Some(rest) = line.strip_prefix("var ") else {
            return Err(FormulaError::NoVarKeyword {
                line: line.to_string(),
            });
        };
        let Some((name_part, expr_part)) = rest.split_once('=') else {
            return Err(FormulaError::NoAssign {
                line: line.to_string(),
            });
        };

        let name = name_part.trim().to_string();
        let expr = expr_part.trim().to_string();

        let refs = scan_table_refs(&expr);
        let Some(first) = refs.first() else {
            return Err(FormulaError::NoTableInVar { name });
        };
        let table = first.table.clone();
        if let Some(other) = refs.iter().find(|r| r.table != table) {
            return Err(FormulaError::MixedTablesInVar {
                name,
                first: table,
                second: other.table.clone(),
            });
        }

        variables.push(Variable { name, expr, table });
    }

    Ok(variables)
}
