// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the repeat-record delivery pipeline.
//!
//! This crate provides the adapter traits, error types, and domain types used
//! throughout the workspace. Storage backends and payload sources implement
//! traits defined here.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{DeliveryError, ErrorKind, RepeaterError};
pub use types::{
    AdapterType, Attempt, AuthSettings, ClaimedRecord, ConnectionSettings, Dhis2DataValueMap,
    Dhis2Options, FhirOptions, FhirResourceMapping, FormOptions, HealthStatus, Payload,
    PayloadType, RecordCounts, RecordFilter, RecordState, RepeatRecord, Repeater, RepeaterKind,
    SelectionScope, Transition,
};

pub use traits::{PayloadSource, PayloadWriteBack, PluginAdapter, RecordStore};
