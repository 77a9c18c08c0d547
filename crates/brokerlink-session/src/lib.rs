// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Broker session lifecycle for Brokerlink.
//!
//! The [`SessionManager`] owns one session per (user, broker): it runs
//! logins through the adapters with quota checks, timeouts and backoff,
//! tracks token expiry, persists sessions for users who opt in, and
//! publishes every state change. Background re-login and expiry sweeps run
//! in the tasks started by [`spawn_workers`].

pub mod manager;
pub mod preferences;
pub mod retry;
pub mod token;
pub mod worker;

pub use manager::{RefreshJob, SessionEvent, SessionManager, SessionSnapshot};
pub use preferences::PreferenceStore;
pub use retry::RetryPolicy;
pub use worker::spawn_workers;
