//! Recovering structured payloads from free-form generator output.
//!
//! [`extract`] locates the outermost balanced object or array in the text,
//! [`repair`] escapes raw control characters inside string literals, and
//! [`decode`] ties both to serde with the stage name attached to any failure.

use carousel_types::{CarouselError, Result, Stage};
use serde::de::DeserializeOwned;

/// Characters of the attempted slice kept in a decode-failure preview.
pub const PREVIEW_CHARS: usize = 500;

/// Strip one wrapping code fence (with optional language tag).
fn strip_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Return the slice spanning the first balanced `{...}` or `[...]` in `raw`.
///
/// Whichever delimiter appears first picks the pair that is tracked. Delimiters
/// inside string literals are ignored. If no opening delimiter exists or the
/// scan never returns to depth zero, the trimmed (and unfenced) text comes back
/// unchanged and decoding is left to fail.
pub fn extract(raw: &str) -> &str {
    let text = strip_fence(raw.trim());
    let bytes = text.as_bytes();

    let Some(start) = bytes.iter().position(|&b| b == b'{' || b == b'[') else {
        return text;
    };
    let (open, close) = if bytes[start] == b'{' {
        (b'{', b'}')
    } else {
        (b'[', b']')
    };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        if b == b'"' {
            in_string = true;
        } else if b == open {
            depth += 1;
        } else if b == close {
            depth -= 1;
            if depth == 0 {
                return &text[start..=i];
            }
        }
    }

    text
}

/// Escape literal newline, carriage-return and tab characters that sit inside
/// string literals. Everything outside strings, and any character directly
/// after an escaping backslash, passes through untouched. Idempotent.
pub fn repair(slice: &str) -> String {
    let mut out = String::with_capacity(slice.len() + 16);
    let mut in_string = false;
    let mut escaped = false;

    for c in slice.chars() {
        if !in_string {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
            continue;
        }
        if escaped {
            escaped = false;
            out.push(c);
            continue;
        }
        match c {
            '\\' => {
                escaped = true;
                out.push(c);
            }
            '"' => {
                in_string = false;
                out.push(c);
            }
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out
}

/// First [`PREVIEW_CHARS`] characters of `text`.
pub fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

/// Extract, parse, and on a syntax error repair and parse once more.
///
/// Well-formed JSON of the wrong shape (missing or mistyped fields) is a
/// `SchemaViolation`; text that stays unparseable after repair is a
/// `DecodeFailure` carrying a bounded preview of the attempted slice.
pub fn decode<T: DeserializeOwned>(stage: Stage, raw: &str) -> Result<T> {
    let slice = extract(raw);

    let first = match serde_json::from_str::<T>(slice) {
        Ok(value) => return Ok(value),
        Err(e) if e.is_data() => return Err(schema_violation(stage, &e)),
        Err(e) => e,
    };

    let repaired = repair(slice);
    match serde_json::from_str::<T>(&repaired) {
        Ok(value) => {
            tracing::debug!(stage = %stage, error = %first, "Decoded after repairing string literals");
            Ok(value)
        }
        Err(e) if e.is_data() => Err(schema_violation(stage, &e)),
        Err(e) => Err(CarouselError::DecodeFailure {
            stage,
            message: e.to_string(),
            preview: preview(&repaired),
        }),
    }
}

fn schema_violation(stage: Stage, err: &serde_json::Error) -> CarouselError {
    CarouselError::SchemaViolation {
        stage,
        message: err.to_string(),
    }
}
