// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RFC 6238 time-based one-time passwords (HMAC-SHA1, 30 s step, 6 digits),
//! as used by the Zerodha and Angel login flows.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha1::Sha1;

const STEP_SECS: i64 = 30;
const DIGITS: u32 = 6;

/// Decode RFC 4648 base32 (padding and whitespace tolerated, case-insensitive).
pub fn decode_base32(input: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len() * 5 / 8);
    let mut buffer: u64 = 0;
    let mut bits = 0u32;
    for c in input.chars() {
        if c == '=' || c.is_whitespace() {
            continue;
        }
        let value = match c.to_ascii_uppercase() {
            u @ 'A'..='Z' => u as u64 - 'A' as u64,
            d @ '2'..='7' => d as u64 - '2' as u64 + 26,
            _ => return None,
        };
        buffer = (buffer << 5) | value;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
            buffer &= (1 << bits) - 1;
        }
    }
    Some(out)
}

/// The code for the step containing `at`.
pub fn generate(secret_b32: &str, at: DateTime<Utc>) -> Option<String> {
    let key = decode_base32(secret_b32)?;
    if key.is_empty() {
        return None;
    }
    let counter = at.timestamp().div_euclid(STEP_SECS) as u64;

    let mut mac = Hmac::<Sha1>::new_from_slice(&key).ok()?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);
    Some(format!(
        "{:0width$}",
        binary % 10u32.pow(DIGITS),
        width = DIGITS as usize
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // Base32 of the RFC 6238 SHA-1 test key "12345678901234567890".
    const RFC_SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn matches_rfc_6238_vectors() {
        assert_eq!(generate(RFC_SECRET, at(59)).unwrap(), "287082");
        assert_eq!(generate(RFC_SECRET, at(1_111_111_109)).unwrap(), "081804");
        assert_eq!(generate(RFC_SECRET, at(1_234_567_890)).unwrap(), "005924");
        assert_eq!(generate(RFC_SECRET, at(2_000_000_000)).unwrap(), "279037");
    }

    #[test]
    fn same_step_same_code() {
        assert_eq!(
            generate(RFC_SECRET, at(60)).unwrap(),
            generate(RFC_SECRET, at(89)).unwrap()
        );
    }

    #[test]
    fn decodes_base32() {
        assert_eq!(decode_base32("JBSWY3DPEHPK3PXP").unwrap(), b"Hello!\xde\xad\xbe\xef");
        assert_eq!(decode_base32("mzxw6===").unwrap(), b"foo");
        assert!(decode_base32("not base32!").is_none());
    }
}
