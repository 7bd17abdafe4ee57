//! PII scrubbing for everything written to the conversation store.
//!
//! Redaction is pure and total. Each category maps to one fixed
//! placeholder, and the rules run to a fixpoint, so running it twice
//! changes nothing.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

const MAX_DEPTH: usize = 5;
const MAX_KEYS_PER_OBJECT: usize = 40;
const MAX_ITEMS_PER_ARRAY: usize = 40;

/// A replacement can expose a match an earlier rule missed (`a@b.com555-123-4567`
/// only reads as an email once the digits are gone). Rules are reapplied at
/// most this many times.
const MAX_PASSES: usize = 8;

pub const REDACTED: &str = "[REDACTED]";

/// Ordered `(pattern, replacement)` rules. Phones run before cards, so
/// long digit runs usually end up as phones.
static RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)\b[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}\b", "[REDACTED_EMAIL]"),
        (r"\+?\d[\d\s().-]{7,}\d", "[REDACTED_PHONE]"),
        (r"\b(?:\d[ -]*?){13,19}\b", "[REDACTED_CARD]"),
        (
            r"\beyJ[A-Za-z0-9_-]+\.[A-Za-z0-9._-]+\.[A-Za-z0-9._-]+\b",
            "[REDACTED_JWT]",
        ),
        (r"\bsk-[A-Za-z0-9_-]{12,}\b", "[REDACTED_KEY]"),
        (
            r"\b(xox[baprs]-[A-Za-z0-9-]{10,}|ghp_[A-Za-z0-9]{20,}|glpat-[A-Za-z0-9_-]{20,})\b",
            "[REDACTED_TOKEN]",
        ),
        (
            r"(?i)(password|passwd|secret|token)\s*[:=]\s*[^\s,;]+",
            "${1}=[REDACTED]",
        ),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| match Regex::new(pattern) {
        Ok(re) => Some((re, replacement)),
        Err(e) => {
            tracing::error!(pattern, error = %e, "redaction pattern failed to compile");
            None
        }
    })
    .collect()
});

static SENSITIVE_KEY: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)password|passphrase|token|secret|api[-_]?key|authorization|cookie|session").ok()
});

/// Strip NUL characters, trim, then replace PII-shaped fragments until
/// none are left.
pub fn redact(input: &str) -> String {
    let mut out = input.replace('\u{0}', "").trim().to_owned();
    for _ in 0..MAX_PASSES {
        let next = apply_rules(&out);
        if next == out {
            break;
        }
        out = next;
    }
    out
}

fn apply_rules(input: &str) -> String {
    let mut out = input.to_owned();
    for (re, replacement) in RULES.iter() {
        if re.is_match(&out) {
            out = re.replace_all(&out, *replacement).into_owned();
        }
    }
    out
}

/// Keep at most `max_chars` characters, marking a cut with `…`.
pub fn truncate(input: &str, max_chars: usize) -> String {
    match input.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}…", &input[..byte_idx]),
        None => input.to_owned(),
    }
}

/// [`redact`] then [`truncate`].
pub fn sanitize(input: &str, max_chars: usize) -> String {
    truncate(&redact(input), max_chars)
}

pub fn is_sensitive_key(key: &str) -> bool {
    SENSITIVE_KEY.as_ref().is_some_and(|re| re.is_match(key))
}

/// Scrub a structured value such as tool input or output.
///
/// Sensitive keys are blanked, strings sanitized, nesting deeper than five
/// levels collapsed, and objects/arrays capped at forty entries.
pub fn redact_value(value: &Value, max_chars: usize) -> Value {
    redact_value_at(value, max_chars, 0)
}

fn redact_value_at(value: &Value, max_chars: usize, depth: usize) -> Value {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) => value.clone(),
        Value::String(s) => Value::String(sanitize(s, max_chars)),
        _ if depth >= MAX_DEPTH => Value::String("[TRUNCATED_DEPTH]".into()),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .take(MAX_ITEMS_PER_ARRAY)
                .map(|item| redact_value_at(item, max_chars, depth + 1))
                .collect(),
        ),
        Value::Object(fields) => {
            let mut out = Map::new();
            for (idx, (key, raw)) in fields.iter().enumerate() {
                if idx >= MAX_KEYS_PER_OBJECT {
                    out.insert("__truncated__".into(), Value::Bool(true));
                    break;
                }
                let scrubbed = if is_sensitive_key(key) {
                    Value::String(REDACTED.into())
                } else {
                    redact_value_at(raw, max_chars, depth + 1)
                };
                out.insert(key.clone(), scrubbed);
            }
            Value::Object(out)
        }
    }
}
