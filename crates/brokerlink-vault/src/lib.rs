// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! AES-256-GCM credential vault for Brokerlink.
//!
//! A 32-byte master key, supplied by a [`KeyProvider`], seals every broker
//! credential and every saved session token. Each ciphertext is bound to
//! its (user, broker) row through the AEAD associated data, so sealed rows
//! cannot be swapped between users.

pub mod crypto;
pub mod key;
pub mod vault;

pub use key::{
    ChainKeyProvider, EnvKeyProvider, FileKeyProvider, KeyProvider, StaticKeyProvider,
    key_provider_from_config,
};
pub use vault::{
    AuditEntry, CredentialVault, MaskedCredential, MaskedField, SealPurpose, SealedBlob,
    mask_secret,
};
