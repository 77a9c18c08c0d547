// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prometheus metrics for Brokerlink.
//!
//! Components record through the metrics facade (see [`recording`]); the
//! binary installs a [`PrometheusExporter`] and the gateway serves its
//! rendering at `/metrics`.

pub mod recording;

use brokerlink_core::BrokerlinkError;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub use recording::{
    record_login, record_order, record_quota_rejection, register_metrics, set_connected_sessions,
};

/// Installed Prometheus recorder.
#[derive(Clone)]
pub struct PrometheusExporter {
    handle: PrometheusHandle,
}

impl PrometheusExporter {
    /// Install the Prometheus recorder globally.
    ///
    /// Only one recorder can exist per process; a second call fails.
    pub fn install() -> Result<Self, BrokerlinkError> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            BrokerlinkError::Internal(format!("failed to install Prometheus recorder: {e}"))
        })?;
        recording::register_metrics();
        tracing::info!("prometheus metrics recorder installed");
        Ok(Self { handle })
    }

    /// Wrap an existing handle (tests build a local recorder).
    pub fn from_handle(handle: PrometheusHandle) -> Self {
        Self { handle }
    }

    /// Render all collected metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brokerlink_core::{BrokerKind, QuotaKind};

    #[test]
    fn recorded_metrics_render() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let exporter = PrometheusExporter::from_handle(recorder.handle());
        metrics::with_local_recorder(&recorder, || {
            record_login(BrokerKind::Zerodha, "ok");
            record_quota_rejection(BrokerKind::Angel, QuotaKind::Order);
            set_connected_sessions(3);
        });

        let text = exporter.render();
        assert!(text.contains("brokerlink_logins_total"));
        assert!(text.contains("broker=\"zerodha\""));
        assert!(text.contains("kind=\"order\""));
        assert!(text.contains("brokerlink_connected_sessions 3"));
    }
}
