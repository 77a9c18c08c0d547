// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric descriptions and recording helpers.
//!
//! Recording goes through the metrics facade, so these are no-ops until a
//! recorder is installed.

use brokerlink_core::{BrokerKind, QuotaKind};
use metrics::{describe_counter, describe_gauge};

/// Describe every Brokerlink metric. Called once after the recorder is installed.
pub fn register_metrics() {
    describe_counter!(
        "brokerlink_logins_total",
        "Broker login attempts, labelled by broker and outcome"
    );
    describe_counter!(
        "brokerlink_quota_rejections_total",
        "Requests refused locally because a quota window was full"
    );
    describe_counter!(
        "brokerlink_orders_total",
        "Orders submitted to brokers, labelled by broker and outcome"
    );
    describe_gauge!(
        "brokerlink_connected_sessions",
        "Sessions currently in the connected state"
    );
}

/// Record one login attempt. `outcome` is `ok` or an error kind.
pub fn record_login(broker: BrokerKind, outcome: &str) {
    metrics::counter!(
        "brokerlink_logins_total",
        "broker" => broker.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_quota_rejection(broker: BrokerKind, kind: QuotaKind) {
    metrics::counter!(
        "brokerlink_quota_rejections_total",
        "broker" => broker.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

pub fn record_order(broker: BrokerKind, outcome: &str) {
    metrics::counter!(
        "brokerlink_orders_total",
        "broker" => broker.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn set_connected_sessions(count: usize) {
    metrics::gauge!("brokerlink_connected_sessions").set(count as f64);
}
