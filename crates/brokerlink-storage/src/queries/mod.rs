// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed queries, one module per table.

pub mod audit;
pub mod credentials;
pub mod meta;
pub mod preferences;
pub mod quota;
pub mod sessions;
pub mod users;
