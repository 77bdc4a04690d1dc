//! Escaping user text for Lucene full-text queries.
//!
//! Queries normally travel as bound parameters. [`inline_fulltext_literal`] exists for
//! servers that refuse a parameter in the full-text procedure call.

/// Characters with meaning in Lucene query syntax, escaped with a backslash.
///
/// `'` and `$` are not Lucene operators but are escaped too, so the same text is safe
/// when spliced into Cypher.
const FULLTEXT_SPECIAL: &[char] = &[
    '"', '\'', '$', ':', '/', '[', ']', '(', ')', '{', '}', '~', '^', '+', '-', '!', '&',
    '|', '*', '?',
];

fn escape_terms(query: &str, keep_line_breaks: bool) -> String {
    let mut out = String::with_capacity(query.len() + 8);
    for c in query.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' | '\r' if !keep_line_breaks => out.push(' '),
            c if FULLTEXT_SPECIAL.contains(&c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

/// Escape `query` so Lucene treats it as plain terms.
///
/// Backslashes are escaped first so an input backslash cannot consume the escape of
/// the following character. Line breaks become spaces, keeping the words around them
/// apart.
#[must_use]
pub fn escape_fulltext(query: &str) -> String {
    escape_terms(query, false)
}

/// Render `query` as a double-quoted Cypher string literal holding the escaped
/// Lucene query.
///
/// Line breaks are written as Cypher `\n`/`\r` escapes, which the server decodes back
/// into whitespace before Lucene sees the query.
#[must_use]
pub fn inline_fulltext_literal(query: &str) -> String {
    let escaped = escape_terms(query, true);
    let mut out = String::with_capacity(escaped.len() * 2 + 2);
    out.push('"');
    for c in escaped.chars() {
        match c {
            '\\' | '"' => {
                out.push('\\');
                out.push(c);
            }
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
