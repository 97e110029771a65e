//! `// retrace:skip` opt-out markers.
//!
//! Markers are collected before edits are planned, so an edit landing on a
//! marked line can be suppressed and markers that never suppress anything
//! can be reported. Only line comments count; the marker text may be
//! followed by a reason: `// retrace:skip (flaky)` or
//! `// retrace:skip // see #123`.

use std::collections::BTreeMap;

use regex::Regex;

pub struct Markers {
    /// line number (1-based) -> number of edits the marker suppressed.
    uses: BTreeMap<usize, usize>,
}

impl Markers {
    /// Scans `src` for skip markers.
    ///
    /// A small comment lexer keeps `//` sequences inside string and char
    /// literals from counting; block comments are ignored entirely.
    pub fn scan(src: &str) -> Markers {
        let marker = marker_pattern();
        let mut uses = BTreeMap::new();
        for (line, text) in line_comments(src) {
            if marker.is_match(text) {
                uses.insert(line, 0);
            }
        }
        Markers { uses }
    }

    /// Reports whether `line` carries a marker, counting the use.
    pub fn use_if_present(&mut self, line: usize) -> bool {
        match self.uses.get_mut(&line) {
            Some(count) => {
                *count += 1;
                true
            }
            None => false,
        }
    }

    /// Lines whose markers never suppressed an edit, in order.
    pub fn unused(&self) -> Vec<usize> {
        self.uses
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(line, _)| *line)
            .collect()
    }
}

fn marker_pattern() -> Regex {
    // The comment must start with the marker; a reason may follow after a
    // space or parenthesis.
    Regex::new(r"^//\s?retrace:skip($|[ (])").expect("static pattern")
}

/// Yields `(line, text)` for every `//` comment in `src`, with `text`
/// including the leading slashes.
fn line_comments(src: &str) -> Vec<(usize, &str)> {
    let bytes = src.as_bytes();
    let mut comments = Vec::new();
    let mut line = 1;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                line += 1;
                i += 1;
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                let start = i;
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                comments.push((line, &src[start..i]));
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                // Block comments nest and never carry markers.
                let mut depth = 1;
                i += 2;
                while i < bytes.len() && depth > 0 {
                    if bytes[i] == b'\n' {
                        line += 1;
                        i += 1;
                    } else if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'*') {
                        depth += 1;
                        i += 2;
                    } else if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
                        depth -= 1;
                        i += 2;
                    } else {
                        i += 1;
                    }
                }
            }
            b'"' => i = skip_string(bytes, i, &mut line),
            b'r' | b'b' | b'c' => {
                if let Some(end) = raw_string_end(bytes, i) {
                    line += bytes[i..end].iter().filter(|&&b| b == b'\n').count();
                    i = end;
                } else {
                    i += 1;
                }
            }
            b'\'' => i = skip_char_literal(bytes, i),
            _ => i += 1,
        }
    }

    comments
}

/// Skips a `"…"` literal starting at `start`, handling escapes.
fn skip_string(bytes: &[u8], start: usize, line: &mut usize) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' => {
                *line += 1;
                i += 1;
            }
            b'"' => return i + 1,
            _ => i += 1,
        }
    }
    i
}

/// If a raw (or raw byte / raw C) string starts at `start`, returns the
/// index just past its closing quote.
fn raw_string_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start;
    // Optional b/c prefix before r.
    if bytes[i] != b'r' {
        i += 1;
        if bytes.get(i) != Some(&b'r') {
            return None;
        }
    }
    i += 1;
    let mut hashes = 0;
    while bytes.get(i) == Some(&b'#') {
        hashes += 1;
        i += 1;
    }
    if bytes.get(i) != Some(&b'"') {
        return None;
    }
    i += 1;
    // Find `"` followed by the same number of `#`.
    while i < bytes.len() {
        if bytes[i] == b'"' && bytes[i + 1..].iter().take(hashes).filter(|&&b| b == b'#').count() == hashes {
            return Some(i + 1 + hashes);
        }
        i += 1;
    }
    Some(i)
}

/// Skips a char literal like `'x'` or `'\n'`; leaves lifetimes (`'a`) alone.
fn skip_char_literal(bytes: &[u8], start: usize) -> usize {
    let i = start + 1;
    match bytes.get(i) {
        Some(b'\\') => {
            // Escaped char: find the closing quote.
            let mut j = i + 2;
            while j < bytes.len() && bytes[j] != b'\'' && bytes[j] != b'\n' {
                j += 1;
            }
            j + 1
        }
        Some(_) if bytes.get(i + 1) == Some(&b'\'') => i + 2,
        // A lifetime or label; just step past the quote.
        _ => start + 1,
    }
}
