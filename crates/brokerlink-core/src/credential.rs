// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-broker credential field sets.
//!
//! Each broker needs a different set of fields (TOTP is optional, a redirect
//! URI only exists for Upstox), so the field set is a tagged variant per
//! [`BrokerKind`] validated at the boundary. Secret values are held as
//! [`SecretString`] and only exposed when sealing or when an adapter builds
//! a request.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::BrokerlinkError;
use crate::types::{BrokerKind, UserId};

/// A stored credential: who owns it and which broker it unlocks.
#[derive(Debug)]
pub struct BrokerCredential {
    pub user_id: UserId,
    pub fields: BrokerFields,
    pub updated_at: DateTime<Utc>,
}

impl BrokerCredential {
    pub fn kind(&self) -> BrokerKind {
        self.fields.kind()
    }
}

/// Zerodha Kite Connect credentials. Login is TOTP-based.
#[derive(Debug)]
pub struct ZerodhaFields {
    pub api_key: SecretString,
    pub api_secret: SecretString,
    /// Kite client id, e.g. `AB1234`.
    pub user_id: String,
    pub password: Option<SecretString>,
    pub totp_secret: Option<SecretString>,
}

/// Upstox credentials. Login is an OAuth redirect flow.
#[derive(Debug)]
pub struct UpstoxFields {
    pub api_key: SecretString,
    pub api_secret: SecretString,
    pub redirect_uri: String,
    /// Authorization code captured from the OAuth redirect, if any.
    pub auth_code: Option<SecretString>,
}

/// Angel One SmartAPI credentials. Login is client id + password (+ TOTP).
#[derive(Debug)]
pub struct AngelFields {
    pub api_key: SecretString,
    pub api_secret: Option<SecretString>,
    pub client_id: String,
    pub password: SecretString,
    pub totp_secret: Option<SecretString>,
}

/// The field set for one broker kind.
#[derive(Debug)]
pub enum BrokerFields {
    Zerodha(ZerodhaFields),
    Upstox(UpstoxFields),
    Angel(AngelFields),
}

/// One named field, for masked display.
pub enum FieldValue<'a> {
    Plain(&'a str),
    Secret(&'a SecretString),
}

mod raw {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct Zerodha {
        pub api_key: String,
        pub api_secret: String,
        pub user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub password: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub totp_secret: Option<String>,
    }

    #[derive(Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct Upstox {
        pub api_key: String,
        pub api_secret: String,
        pub redirect_uri: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub auth_code: Option<String>,
    }

    #[derive(Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct Angel {
        pub api_key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub api_secret: Option<String>,
        pub client_id: String,
        pub password: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub totp_secret: Option<String>,
    }
}

fn secret(s: String) -> SecretString {
    SecretString::from(s)
}

fn opt_secret(s: Option<String>) -> Option<SecretString> {
    s.filter(|v| !v.trim().is_empty()).map(secret)
}

fn expose(s: &SecretString) -> String {
    s.expose_secret().to_string()
}

/// Strip whitespace and uppercase a base32 TOTP secret as users paste it.
fn normalize_totp(s: Option<String>) -> Option<String> {
    s.map(|v| {
        v.chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_uppercase()
    })
}

impl BrokerFields {
    /// Parse and validate a field set submitted for `kind`.
    pub fn parse(kind: BrokerKind, value: serde_json::Value) -> Result<Self, BrokerlinkError> {
        let fields = Self::decode(kind, value)
            .map_err(|e| BrokerlinkError::Validation(format!("invalid {kind} credential: {e}")))?;
        fields.validate()?;
        Ok(fields)
    }

    /// Decode a previously sealed field set. No semantic validation.
    pub fn from_sealed_json(kind: BrokerKind, json: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::decode(kind, value)
    }

    fn decode(kind: BrokerKind, value: serde_json::Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            BrokerKind::Zerodha => {
                let r: raw::Zerodha = serde_json::from_value(value)?;
                BrokerFields::Zerodha(ZerodhaFields {
                    api_key: secret(r.api_key),
                    api_secret: secret(r.api_secret),
                    user_id: r.user_id.trim().to_string(),
                    password: opt_secret(r.password),
                    totp_secret: opt_secret(normalize_totp(r.totp_secret)),
                })
            }
            BrokerKind::Upstox => {
                let r: raw::Upstox = serde_json::from_value(value)?;
                BrokerFields::Upstox(UpstoxFields {
                    api_key: secret(r.api_key),
                    api_secret: secret(r.api_secret),
                    redirect_uri: r.redirect_uri.trim().to_string(),
                    auth_code: opt_secret(r.auth_code),
                })
            }
            BrokerKind::Angel => {
                let r: raw::Angel = serde_json::from_value(value)?;
                BrokerFields::Angel(AngelFields {
                    api_key: secret(r.api_key),
                    api_secret: opt_secret(r.api_secret),
                    client_id: r.client_id.trim().to_string(),
                    password: secret(r.password),
                    totp_secret: opt_secret(normalize_totp(r.totp_secret)),
                })
            }
        })
    }

    pub fn kind(&self) -> BrokerKind {
        match self {
            BrokerFields::Zerodha(_) => BrokerKind::Zerodha,
            BrokerFields::Upstox(_) => BrokerKind::Upstox,
            BrokerFields::Angel(_) => BrokerKind::Angel,
        }
    }

    /// Check required fields and field formats for this broker kind.
    pub fn validate(&self) -> Result<(), BrokerlinkError> {
        let kind = self.kind();
        let invalid = |msg: String| BrokerlinkError::Validation(format!("{kind}: {msg}"));

        let require_secret = |name: &str, s: &SecretString| {
            if s.expose_secret().trim().is_empty() {
                Err(invalid(format!("`{name}` is required")))
            } else {
                Ok(())
            }
        };
        let require_id = |name: &str, s: &str| {
            if s.is_empty() {
                Err(invalid(format!("`{name}` is required")))
            } else if !s.chars().all(|c| c.is_ascii_alphanumeric()) {
                Err(invalid(format!("`{name}` must be alphanumeric")))
            } else {
                Ok(())
            }
        };

        match self {
            BrokerFields::Zerodha(f) => {
                require_secret("api_key", &f.api_key)?;
                require_secret("api_secret", &f.api_secret)?;
                require_id("user_id", &f.user_id)?;
                if let Some(totp) = &f.totp_secret {
                    validate_totp_secret(totp).map_err(invalid)?;
                }
            }
            BrokerFields::Upstox(f) => {
                require_secret("api_key", &f.api_key)?;
                require_secret("api_secret", &f.api_secret)?;
                if f.redirect_uri.is_empty() {
                    return Err(invalid("`redirect_uri` is required".into()));
                }
                let uri = f.redirect_uri.as_str();
                let local = uri.starts_with("http://localhost") || uri.starts_with("http://127.0.0.1");
                if !(uri.starts_with("https://") || local) {
                    return Err(invalid(format!(
                        "`redirect_uri` must be an https URL, got `{uri}`"
                    )));
                }
            }
            BrokerFields::Angel(f) => {
                require_secret("api_key", &f.api_key)?;
                require_id("client_id", &f.client_id)?;
                require_secret("password", &f.password)?;
                if let Some(totp) = &f.totp_secret {
                    validate_totp_secret(totp).map_err(invalid)?;
                }
            }
        }
        Ok(())
    }

    /// Serialize the full field set, secrets included, for sealing.
    ///
    /// The returned string holds plaintext secrets; callers zeroize it.
    pub fn to_sealable_json(&self) -> Result<String, serde_json::Error> {
        match self {
            BrokerFields::Zerodha(f) => serde_json::to_string(&raw::Zerodha {
                api_key: expose(&f.api_key),
                api_secret: expose(&f.api_secret),
                user_id: f.user_id.clone(),
                password: f.password.as_ref().map(expose),
                totp_secret: f.totp_secret.as_ref().map(expose),
            }),
            BrokerFields::Upstox(f) => serde_json::to_string(&raw::Upstox {
                api_key: expose(&f.api_key),
                api_secret: expose(&f.api_secret),
                redirect_uri: f.redirect_uri.clone(),
                auth_code: f.auth_code.as_ref().map(expose),
            }),
            BrokerFields::Angel(f) => serde_json::to_string(&raw::Angel {
                api_key: expose(&f.api_key),
                api_secret: f.api_secret.as_ref().map(expose),
                client_id: f.client_id.clone(),
                password: expose(&f.password),
                totp_secret: f.totp_secret.as_ref().map(expose),
            }),
        }
    }

    /// Named fields in declaration order, for masked display.
    pub fn entries(&self) -> Vec<(&'static str, FieldValue<'_>)> {
        let mut out = Vec::new();
        match self {
            BrokerFields::Zerodha(f) => {
                out.push(("api_key", FieldValue::Secret(&f.api_key)));
                out.push(("api_secret", FieldValue::Secret(&f.api_secret)));
                out.push(("user_id", FieldValue::Plain(&f.user_id)));
                if let Some(p) = &f.password {
                    out.push(("password", FieldValue::Secret(p)));
                }
                if let Some(t) = &f.totp_secret {
                    out.push(("totp_secret", FieldValue::Secret(t)));
                }
            }
            BrokerFields::Upstox(f) => {
                out.push(("api_key", FieldValue::Secret(&f.api_key)));
                out.push(("api_secret", FieldValue::Secret(&f.api_secret)));
                out.push(("redirect_uri", FieldValue::Plain(&f.redirect_uri)));
                if let Some(c) = &f.auth_code {
                    out.push(("auth_code", FieldValue::Secret(c)));
                }
            }
            BrokerFields::Angel(f) => {
                out.push(("api_key", FieldValue::Secret(&f.api_key)));
                if let Some(s) = &f.api_secret {
                    out.push(("api_secret", FieldValue::Secret(s)));
                }
                out.push(("client_id", FieldValue::Plain(&f.client_id)));
                out.push(("password", FieldValue::Secret(&f.password)));
                if let Some(t) = &f.totp_secret {
                    out.push(("totp_secret", FieldValue::Secret(t)));
                }
            }
        }
        out
    }

    /// Plaintext secret values, for registering with the log redactor.
    pub fn secret_values(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter_map(|(_, v)| match v {
                FieldValue::Secret(s) => Some(s.expose_secret().to_string()),
                FieldValue::Plain(_) => None,
            })
            .collect()
    }
}

/// RFC 4648 base32, at least 80 bits of key material.
fn validate_totp_secret(secret: &SecretString) -> Result<(), String> {
    let s = secret.expose_secret().trim_end_matches('=');
    if s.len() < 16 {
        return Err("`totp_secret` must be at least 16 base32 characters".into());
    }
    if !s.chars().all(|c| c.is_ascii_uppercase() || ('2'..='7').contains(&c)) {
        return Err("`totp_secret` must be base32 (A-Z, 2-7)".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn zerodha_json() -> serde_json::Value {
        json!({
            "api_key": "kite_api_key_123",
            "api_secret": "kite_secret_456",
            "user_id": "AB1234",
            "totp_secret": "jbsw y3dp ehpk 3pxp",
        })
    }

    #[test]
    fn zerodha_fields_parse_and_normalize_totp() {
        let fields = BrokerFields::parse(BrokerKind::Zerodha, zerodha_json()).unwrap();
        let BrokerFields::Zerodha(f) = &fields else {
            panic!("expected zerodha fields");
        };
        assert_eq!(f.totp_secret.as_ref().unwrap().expose_secret(), "JBSWY3DPEHPK3PXP");
        assert_eq!(fields.kind(), BrokerKind::Zerodha);
    }

    #[test]
    fn missing_required_field_is_validation_error() {
        let err = BrokerFields::parse(
            BrokerKind::Zerodha,
            json!({"api_key": "k", "api_secret": "s"}),
        )
        .unwrap_err();
        assert!(matches!(err, BrokerlinkError::Validation(_)));
    }

    #[test]
    fn empty_secret_is_rejected() {
        let mut value = zerodha_json();
        value["api_secret"] = json!("   ");
        let err = BrokerFields::parse(BrokerKind::Zerodha, value).unwrap_err();
        assert!(err.to_string().contains("api_secret"));
    }

    #[test]
    fn invalid_totp_secret_is_rejected() {
        let mut value = zerodha_json();
        value["totp_secret"] = json!("not-base32-at-all!!");
        let err = BrokerFields::parse(BrokerKind::Zerodha, value).unwrap_err();
        assert!(err.to_string().contains("totp_secret"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let mut value = zerodha_json();
        value["redirect_uri"] = json!("https://example.com/cb");
        assert!(BrokerFields::parse(BrokerKind::Zerodha, value).is_err());
    }

    #[test]
    fn upstox_requires_https_redirect() {
        let bad = json!({
            "api_key": "k", "api_secret": "s", "redirect_uri": "ftp://example.com"
        });
        assert!(BrokerFields::parse(BrokerKind::Upstox, bad).is_err());

        let local = json!({
            "api_key": "k", "api_secret": "s", "redirect_uri": "http://localhost:8080/cb"
        });
        assert!(BrokerFields::parse(BrokerKind::Upstox, local).is_ok());
    }

    #[test]
    fn angel_requires_password_and_client_id() {
        let value = json!({"api_key": "k", "client_id": "A123", "password": ""});
        let err = BrokerFields::parse(BrokerKind::Angel, value).unwrap_err();
        assert!(err.to_string().contains("password"));
    }

    #[test]
    fn sealable_json_roundtrips_through_decode() {
        let fields = BrokerFields::parse(BrokerKind::Zerodha, zerodha_json()).unwrap();
        let json = fields.to_sealable_json().unwrap();
        let back = BrokerFields::from_sealed_json(BrokerKind::Zerodha, &json).unwrap();
        assert_eq!(back.secret_values(), fields.secret_values());
    }

    #[test]
    fn debug_output_never_contains_secrets() {
        let fields = BrokerFields::parse(BrokerKind::Zerodha, zerodha_json()).unwrap();
        let debug = format!("{fields:?}");
        assert!(!debug.contains("kite_secret_456"));
        assert!(debug.contains("AB1234"));
    }
}
