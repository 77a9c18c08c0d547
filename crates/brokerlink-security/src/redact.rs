// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Secret redaction for log output and error messages.
//!
//! Two complementary mechanisms:
//! 1. **Regex-based**: known token shapes (Bearer headers, JWTs, Kite
//!    `token api_key:access_token` headers).
//! 2. **Exact-match**: values registered at runtime by the vault and the
//!    session manager as they decrypt or receive them.

use std::io::Write;
use std::sync::{Arc, LazyLock, RwLock};

use regex::Regex;

/// Known secret patterns to redact from output. The flag marks patterns
/// whose first capture group (the field name) is kept.
static REDACTION_PATTERNS: LazyLock<Vec<(Regex, bool)>> = LazyLock::new(|| {
    [
        // Bearer tokens in headers
        (r"Bearer\s+[a-zA-Z0-9._\-]{10,}", false),
        // Kite Connect authorization header: `token api_key:access_token`
        (r"token\s+[a-zA-Z0-9]{6,}:[a-zA-Z0-9]{10,}", false),
        // JWTs (Angel and Upstox issue these)
        (
            r"eyJ[a-zA-Z0-9_\-]{5,}\.[a-zA-Z0-9_\-]{5,}\.[a-zA-Z0-9_\-]{5,}",
            false,
        ),
        // Form or JSON fields that carry secrets
        (
            r#"(?i)("?(?:password|totp_secret|totp|api_secret|api_key|checksum|access_token|refresh_token|jwtToken|refreshToken)"?\s*[:=]\s*"?)[^"&,\s}]+"#,
            true,
        ),
    ]
    .into_iter()
    .filter_map(|(p, keep)| Regex::new(p).ok().map(|re| (re, keep)))
    .collect()
});

/// The redaction placeholder.
pub const REDACTED: &str = "[REDACTED]";

/// Registered values shorter than this are ignored; redacting them would
/// shred ordinary log text.
const MIN_REGISTERED_LEN: usize = 6;

/// Redact secrets from a string using regex patterns and exact-match values.
pub fn redact(input: &str, secret_values: &[String]) -> String {
    let mut result = input.to_string();

    for (pattern, keep_field) in REDACTION_PATTERNS.iter() {
        let replacement = if *keep_field {
            format!("${{1}}{REDACTED}")
        } else {
            REDACTED.to_string()
        };
        result = pattern
            .replace_all(&result, replacement.as_str())
            .into_owned();
    }

    // Longest first so a value containing another is replaced whole.
    let mut sorted: Vec<&String> = secret_values.iter().collect();
    sorted.sort_by_key(|v| std::cmp::Reverse(v.len()));
    for value in sorted {
        if !value.is_empty() {
            result = result.replace(value.as_str(), REDACTED);
        }
    }

    result
}

/// Shared list of exact secret values to scrub from output.
#[derive(Clone, Default)]
pub struct SecretRegistry {
    values: Arc<RwLock<Vec<String>>>,
}

impl std::fmt::Debug for SecretRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretRegistry")
            .field("len", &self.len())
            .finish()
    }
}

impl SecretRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value. Duplicates and very short values are ignored.
    pub fn register(&self, value: &str) {
        if value.len() < MIN_REGISTERED_LEN {
            return;
        }
        if let Ok(mut values) = self.values.write()
            && !values.iter().any(|v| v == value)
        {
            values.push(value.to_string());
        }
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.values.read().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.values.read().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Redact `input` with the built-in patterns and every registered value.
    pub fn redact(&self, input: &str) -> String {
        redact(input, &self.snapshot())
    }
}

/// A writer wrapper that redacts secrets from output.
pub struct RedactingWriter<W> {
    inner: W,
    registry: SecretRegistry,
}

impl<W: Write> RedactingWriter<W> {
    pub fn new(inner: W, registry: SecretRegistry) -> Self {
        Self { inner, registry }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let input = String::from_utf8_lossy(buf);
        let redacted = self.registry.redact(&input);
        self.inner.write_all(redacted.as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// `MakeWriter` for `tracing_subscriber::fmt` that writes redacted lines to stderr.
#[derive(Clone, Debug)]
pub struct RedactingMakeWriter {
    registry: SecretRegistry,
}

impl RedactingMakeWriter {
    pub fn new(registry: SecretRegistry) -> Self {
        Self { registry }
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter {
    type Writer = RedactingWriter<std::io::Stderr>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new(std::io::stderr(), self.registry.clone())
    }
}
