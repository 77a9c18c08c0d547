// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Secret redaction for Brokerlink.
//!
//! Broker access tokens and decrypted credential values must never reach
//! the logs. Everything the process logs goes through [`RedactingWriter`].

pub mod redact;

pub use redact::{REDACTED, RedactingMakeWriter, RedactingWriter, SecretRegistry, redact};
