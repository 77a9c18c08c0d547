// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Brokerlink integration tests.
//!
//! Provides a scripted broker adapter and a harness that wires the vault,
//! quota tracker and session manager over a temp database, so tests run
//! without any broker on the network.
//!
//! # Components
//!
//! - [`MockAdapter`] - Broker adapter with scripted login and order outcomes
//! - [`TestHarness`] - Full session stack with a manual clock

pub mod harness;
pub mod mock_adapter;

pub use harness::{TestHarness, TestHarnessBuilder, sample_fields};
pub use mock_adapter::{MockAdapter, MockStep};
