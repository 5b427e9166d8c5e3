//! JML annotation preprocessor
//!
//! Rewrites JML annotation comments into delimited regions the lexer can see:
//! - `/*@ ... @*/` and `/*@ ... */` become `@{ ... @}`
//! - `//@ ...` becomes `@{ ... @}` on the same line
//! - leading `@` characters on continuation lines of a block annotation are blanked
//!
//! Newlines are never added or removed, so every line of the output
//! corresponds to the same line of the input.

use crate::ast::Span;
use crate::error::{CompileError, Result};

/// Rewrite JML annotation comments of `source`
pub fn preprocess(source: &str) -> Result<String> {
    let bytes = source.as_bytes();
    let mut out = String::with_capacity(source.len() + 16);
    let mut i = 0;

    while i < bytes.len() {
        let rest = &source[i..];
        if rest.starts_with("//@") {
            let end = rest.find('\n').map_or(source.len(), |n| i + n);
            let body = &source[i + 3..end];
            let body = body.trim_end_matches(['\r', '@']);
            out.push_str("@{ ");
            out.push_str(body);
            out.push_str(" @}");
            if source[i + 3..end].ends_with('\r') {
                out.push('\r');
            }
            i = end;
        } else if rest.starts_with("/*@") {
            let close = find_block_end(source, i + 3)
                .ok_or_else(|| CompileError::lexer("unterminated JML annotation", Span::new(i, i + 3)))?;
            out.push_str("@{ ");
            push_block_body(&mut out, &source[i + 3..close]);
            out.push_str(" @}");
            i = close + 2;
        } else if rest.starts_with("//") {
            let end = rest.find('\n').map_or(source.len(), |n| i + n);
            out.push_str(&source[i..end]);
            i = end;
        } else if rest.starts_with("/*") {
            let close = find_block_end(source, i + 2)
                .ok_or_else(|| CompileError::lexer("unterminated comment", Span::new(i, i + 2)))?;
            out.push_str(&source[i..close + 2]);
            i = close + 2;
        } else if rest.starts_with('"') || rest.starts_with('\'') {
            let end = literal_end(source, i);
            out.push_str(&source[i..end]);
            i = end;
        } else {
            let ch = rest.chars().next().unwrap_or_default();
            out.push(ch);
            i += ch.len_utf8().max(1);
        }
    }

    Ok(out)
}

/// Byte offset of the `*/` closing a comment whose body starts at `from`
fn find_block_end(source: &str, from: usize) -> Option<usize> {
    source[from..].find("*/").map(|n| from + n)
}

/// End offset (exclusive) of the string or char literal starting at `start`
fn literal_end(source: &str, start: usize) -> usize {
    let bytes = source.as_bytes();
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' => return i,
            b if b == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

/// Copy a block annotation body, blanking `@` margins and trailing `@`s
fn push_block_body(out: &mut String, body: &str) {
    let body = body.trim_end_matches('@');
    let mut at_line_start = false;
    for ch in body.chars() {
        match ch {
            '\n' => {
                at_line_start = true;
                out.push('\n');
            }
            '@' if at_line_start => out.push(' '),
            c if at_line_start && c.is_whitespace() => out.push(c),
            c => {
                at_line_start = false;
                out.push(c);
            }
        }
    }
}
