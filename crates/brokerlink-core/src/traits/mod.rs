// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter trait definitions.
//!
//! Broker integrations implement [`BrokerAdapter`] and use `#[async_trait]`
//! so the session manager can hold them as `Arc<dyn BrokerAdapter>`.

pub mod adapter;

pub use adapter::BrokerAdapter;
