// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Rate limiting and order quotas for Brokerlink.
//!
//! Every adapter call consumes an API-call unit before it is made, and every
//! order also consumes an order unit. Limits start from each broker's
//! documented numbers and can be overridden in config.

pub mod store;
pub mod tracker;

pub use store::{InMemoryQuotaStore, QuotaCounter, QuotaStore, SqliteQuotaStore};
pub use tracker::{ConsumeOutcome, QuotaSnapshot, QuotaTracker};
