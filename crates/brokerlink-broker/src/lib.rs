// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Broker adapters for Brokerlink.
//!
//! One [`BrokerAdapter`] implementation per supported broker, sharing HTTP
//! plumbing and status classification from [`http`]. Adapters hold no
//! credentials; the session manager passes the decrypted credential on
//! every call.

pub mod angel;
pub mod http;
pub mod totp;
pub mod upstox;
pub mod zerodha;

use std::sync::Arc;
use std::time::Duration;

use brokerlink_config::{BrokersConfig, QuotaConfig};
use brokerlink_core::{BrokerAdapter, BrokerKind, BrokerlinkError, Clock, QuotaLimits};
use tracing::info;

pub use angel::AngelAdapter;
pub use upstox::UpstoxAdapter;
pub use zerodha::ZerodhaAdapter;

/// Build an adapter for every broker enabled in `brokers`.
///
/// Quota limits start from the documented defaults and are overridden by
/// the `[quota]` section.
pub fn build_adapters(
    brokers: &BrokersConfig,
    quota: &QuotaConfig,
    token_ttl: Duration,
    clock: Arc<dyn Clock>,
) -> Result<Vec<Arc<dyn BrokerAdapter>>, BrokerlinkError> {
    let mut adapters: Vec<Arc<dyn BrokerAdapter>> = Vec::new();
    for kind in BrokerKind::ALL {
        let endpoint = brokers.endpoint(kind);
        if !endpoint.enabled {
            info!(broker = %kind, "broker disabled in config");
            continue;
        }
        let limits = quota.limits_for(kind, QuotaLimits::default());
        let base = endpoint.base_url.as_str();
        let adapter: Arc<dyn BrokerAdapter> = match kind {
            BrokerKind::Zerodha => {
                Arc::new(ZerodhaAdapter::new(base, clock.clone(), token_ttl, limits)?)
            }
            BrokerKind::Upstox => {
                Arc::new(UpstoxAdapter::new(base, clock.clone(), token_ttl, limits)?)
            }
            BrokerKind::Angel => {
                Arc::new(AngelAdapter::new(base, clock.clone(), token_ttl, limits)?)
            }
        };
        info!(broker = %kind, adapter = adapter.name(), base_url = base, "broker adapter ready");
        adapters.push(adapter);
    }
    Ok(adapters)
}
