//! Rewrite of a `SHOW CREATE TABLE` definition into the shadow definition.

use crate::error::{RefreshError, Result};

/// Storage engine used for the shadow table.
pub const SHADOW_ENGINE: &str = "BLACKHOLE";

const CREATE_TABLE: &str = "CREATE TABLE";

/// Replace the table name and the table-level engine of `definition`.
///
/// Only two spans change: the name token directly after `CREATE TABLE`
/// (backtick quoting is kept if present) and the value of the first
/// `ENGINE=` found at parenthesis depth 0 outside any quoted text. Column
/// and key definitions pass through untouched. Partition sub-clauses carry
/// their own `ENGINE` inside parentheses and are left alone.
pub fn rewrite_create_table(
    definition: &str,
    source: &str,
    shadow: &str,
    if_not_exists: bool,
) -> Result<String> {
    let bytes = definition.as_bytes();
    let start = definition.len() - definition.trim_start().len();

    let head = definition
        .get(start..start + CREATE_TABLE.len())
        .filter(|h| h.eq_ignore_ascii_case(CREATE_TABLE))
        .ok_or_else(|| RefreshError::schema_parse(source, "definition does not start with CREATE TABLE"))?;

    let mut name_start = start + head.len();
    while name_start < bytes.len() && bytes[name_start].is_ascii_whitespace() {
        name_start += 1;
    }

    let (name, name_end, quoted) = read_table_name(definition, name_start)
        .ok_or_else(|| RefreshError::schema_parse(source, "table name token not found"))?;
    if name != source {
        return Err(RefreshError::schema_parse(
            source,
            format!("definition is for table '{}'", name),
        ));
    }

    let (engine_start, engine_end) = find_table_engine(bytes, name_end)
        .ok_or_else(|| RefreshError::schema_parse(source, "ENGINE clause not found"))?;

    let mut out = String::with_capacity(definition.len() + shadow.len() + 16);
    out.push_str(&definition[..start + head.len()]);
    if if_not_exists {
        out.push_str(" IF NOT EXISTS");
    }
    out.push_str(&definition[start + head.len()..name_start]);
    if quoted {
        out.push('`');
        out.push_str(&shadow.replace('`', "``"));
        out.push('`');
    } else {
        out.push_str(shadow);
    }
    out.push_str(&definition[name_end..engine_start]);
    out.push_str(SHADOW_ENGINE);
    out.push_str(&definition[engine_end..]);
    Ok(out)
}

/// Returns (unquoted name, byte index after the token, was backtick-quoted).
fn read_table_name(definition: &str, at: usize) -> Option<(String, usize, bool)> {
    let bytes = definition.as_bytes();
    if bytes.get(at) == Some(&b'`') {
        let mut i = at + 1;
        let mut name = String::new();
        let mut run = at + 1;
        while i < bytes.len() {
            if bytes[i] == b'`' {
                name.push_str(&definition[run..i]);
                if bytes.get(i + 1) == Some(&b'`') {
                    name.push('`');
                    i += 2;
                    run = i;
                    continue;
                }
                return (!name.is_empty()).then_some((name, i + 1, true));
            }
            i += 1;
        }
        return None;
    }

    let mut end = at;
    while end < bytes.len() && is_ident_byte(bytes[end]) {
        end += 1;
    }
    (end > at).then(|| (definition[at..end].to_string(), end, false))
}

/// Byte range of the engine name in the table-level `ENGINE=<name>` clause.
fn find_table_engine(bytes: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut depth: i32 = 0;
    let mut quote: Option<u8> = None;
    let mut i = from;

    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == b'\\' && q != b'`' {
                i += 2;
                continue;
            }
            if b == q {
                if bytes.get(i + 1) == Some(&q) {
                    i += 2;
                    continue;
                }
                quote = None;
            }
            i += 1;
            continue;
        }

        match b {
            b'\'' | b'"' | b'`' => quote = Some(b),
            b'(' => depth += 1,
            b')' => depth -= 1,
            _ if depth == 0 && starts_keyword(bytes, i, b"ENGINE") => {
                if let Some(range) = engine_value(bytes, i + b"ENGINE".len()) {
                    return Some(range);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// `ENGINE` must not be the tail of a longer word.
fn starts_keyword(bytes: &[u8], at: usize, keyword: &[u8]) -> bool {
    let end = at + keyword.len();
    end <= bytes.len()
        && bytes[at..end].eq_ignore_ascii_case(keyword)
        && (at == 0 || !is_ident_byte(bytes[at - 1]))
}

fn engine_value(bytes: &[u8], mut i: usize) -> Option<(usize, usize)> {
    while i < bytes.len() && bytes[i] == b' ' {
        i += 1;
    }
    if bytes.get(i) != Some(&b'=') {
        return None;
    }
    i += 1;
    while i < bytes.len() && bytes[i] == b' ' {
        i += 1;
    }
    let start = i;
    while i < bytes.len() && is_ident_byte(bytes[i]) {
        i += 1;
    }
    (i > start).then_some((start, i))
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}
