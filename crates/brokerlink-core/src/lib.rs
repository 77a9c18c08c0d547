// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for Brokerlink.
//!
//! Shared vocabulary for every other crate in the workspace: broker kinds,
//! session states, credential field sets, the error taxonomy, the
//! [`BrokerAdapter`] trait each broker integration implements, and the
//! injectable [`Clock`].

pub mod clock;
pub mod credential;
pub mod error;
pub mod traits;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use credential::{AngelFields, BrokerCredential, BrokerFields, UpstoxFields, ZerodhaFields};
pub use error::BrokerlinkError;
pub use traits::BrokerAdapter;
pub use types::{
    BrokerKind, ConnectionHealth, OrderAck, OrderRequest, OrderSide, OrderType, Product,
    QuotaKind, QuotaLimits, SessionState, SessionToken, TradingPreference, UserId,
};
