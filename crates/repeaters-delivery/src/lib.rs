// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Repeat-record delivery.
//!
//! The [`Dispatcher`] selects due records and hands each repeater's batch
//! to a [`Worker`], which transforms payloads per repeater kind, sends them
//! through the [`DestinationClient`] and records each outcome through the
//! pure [`transition`] function.

pub mod backoff;
pub mod bundle;
pub mod client;
pub mod dispatcher;
pub mod registration;
pub mod shutdown;
pub mod state;
pub mod transform;
pub mod worker;

pub use backoff::RetryPolicy;
pub use client::{DestinationClient, DestinationResponse};
pub use dispatcher::{Dispatcher, DispatcherSettings, PollReport};
pub use registration::register_payload;
pub use state::{Delivered, Outcome, transition};
pub use transform::{WireBody, WireRequest};
pub use worker::{BatchReport, Worker};
