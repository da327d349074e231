// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for repeaters integration tests.
//!
//! Provides a temp-database harness, repeater and payload fixtures and a
//! scriptable write-back adapter, so delivery tests run without external
//! services.
//!
//! # Components
//!
//! - [`TestHarness`] - SQLite storage in a temp directory plus record helpers
//! - [`MockWriteBack`] - records write-back calls, optionally failing them
//! - [`FlakySelectStore`] - a record store whose selection fails on demand
//! - [`fixtures`] - repeaters of every kind and matching payloads

pub mod fixtures;
pub mod flaky_store;
pub mod harness;
pub mod mock_write_back;

pub use flaky_store::FlakySelectStore;
pub use harness::TestHarness;
pub use mock_write_back::MockWriteBack;
