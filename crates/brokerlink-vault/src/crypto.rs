// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Low-level AES-256-GCM seal/open operations.
//!
//! Every call to [`seal`] generates a fresh random 96-bit nonce via the system
//! CSPRNG. Nonce reuse would be catastrophic for GCM security.

use brokerlink_core::BrokerlinkError;
use ring::aead::{AES_256_GCM, Aad, LessSafeKey, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};

fn key(key: &[u8; 32]) -> Result<LessSafeKey, BrokerlinkError> {
    let unbound = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|_| BrokerlinkError::Internal("failed to create AES-256-GCM key".to_string()))?;
    Ok(LessSafeKey::new(unbound))
}

/// Encrypt `plaintext`, authenticating `aad` alongside it.
///
/// Returns `(ciphertext_with_tag, nonce_bytes)`.
pub fn seal(
    key_bytes: &[u8; 32],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<(Vec<u8>, [u8; 12]), BrokerlinkError> {
    let sealing = key(key_bytes)?;

    let mut nonce_bytes = [0u8; 12];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|_| BrokerlinkError::Internal("failed to generate random nonce".to_string()))?;

    let mut in_out = plaintext.to_vec();
    sealing
        .seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::from(aad),
            &mut in_out,
        )
        .map_err(|_| BrokerlinkError::Internal("AES-256-GCM encryption failed".to_string()))?;

    Ok((in_out, nonce_bytes))
}

/// Decrypt a ciphertext produced by [`seal`] with the same `aad`.
///
/// A wrong key, a tampered ciphertext, or a mismatched `aad` all fail the
/// same way and are reported as [`BrokerlinkError::Fatal`].
pub fn open(
    key_bytes: &[u8; 32],
    nonce_bytes: &[u8; 12],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, BrokerlinkError> {
    let opening = key(key_bytes)?;

    let mut in_out = ciphertext.to_vec();
    let plaintext = opening
        .open_in_place(
            Nonce::assume_unique_for_key(*nonce_bytes),
            Aad::from(aad),
            &mut in_out,
        )
        .map_err(|_| {
            BrokerlinkError::Fatal(
                "AES-256-GCM decryption failed: wrong master key or corrupted record".to_string(),
            )
        })?;

    Ok(plaintext.to_vec())
}

/// Generate a random 32-byte key suitable for AES-256-GCM.
pub fn generate_random_key() -> Result<[u8; 32], BrokerlinkError> {
    let mut key = [0u8; 32];
    SystemRandom::new()
        .fill(&mut key)
        .map_err(|_| BrokerlinkError::Internal("failed to generate random key".to_string()))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let key = generate_random_key().unwrap();
        let (ciphertext, nonce) = seal(&key, b"api secret", b"alice|zerodha").unwrap();
        let plaintext = open(&key, &nonce, &ciphertext, b"alice|zerodha").unwrap();
        assert_eq!(plaintext, b"api secret");
    }

    #[test]
    fn same_plaintext_seals_differently() {
        let key = generate_random_key().unwrap();
        let (ct1, n1) = seal(&key, b"same", b"").unwrap();
        let (ct2, n2) = seal(&key, b"same", b"").unwrap();
        assert_ne!(n1, n2);
        assert_ne!(ct1, ct2);
    }

    #[test]
    fn wrong_key_is_fatal() {
        let (ciphertext, nonce) = seal(&generate_random_key().unwrap(), b"x", b"").unwrap();
        let err = open(&generate_random_key().unwrap(), &nonce, &ciphertext, b"").unwrap_err();
        assert!(matches!(err, BrokerlinkError::Fatal(_)));
    }

    #[test]
    fn ciphertext_cannot_move_to_another_row() {
        let key = generate_random_key().unwrap();
        let (ciphertext, nonce) = seal(&key, b"secret", b"alice|angel").unwrap();
        assert!(open(&key, &nonce, &ciphertext, b"mallory|angel").is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = generate_random_key().unwrap();
        let (mut ciphertext, nonce) = seal(&key, b"do not tamper", b"").unwrap();
        ciphertext[0] ^= 0x01;
        assert!(open(&key, &nonce, &ciphertext, b"").is_err());
    }
}
