// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the repeat-record delivery pipeline.
//!
//! Two families live here:
//! - [`RepeaterError`] for infrastructure failures (storage, config, HTTP
//!   client construction). These propagate through adapter traits with `?`.
//! - [`DeliveryError`] for record-level outcomes. These never propagate out of
//!   the worker; they are consumed by the state machine and written into the
//!   attempt log.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

use crate::types::RecordState;

/// The primary error type used across adapter traits and core operations.
#[derive(Debug, Error)]
pub enum RepeaterError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// An operator action was attempted on a record in a state that forbids it.
    #[error("cannot {action} record {id} in state {state}")]
    InvalidTransition {
        id: String,
        state: RecordState,
        action: &'static str,
    },

    /// HTTP client construction or transport setup errors.
    #[error("http error: {message}")]
    Http {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Record-level failure classes.
///
/// Stored alongside each failed [`Attempt`](crate::types::Attempt) so that
/// operators can distinguish the class of a failure from its message text.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum ErrorKind {
    /// The payload no longer exists at the source.
    PayloadMissing,
    /// The payload could not be mapped into the destination's wire format.
    TransformError,
    /// Timeout, connection refused, DNS failure.
    TransientNetworkError,
    /// 5xx, rate limiting, or a response the pipeline could not interpret.
    DestinationServerError,
    /// The destination permanently rejected the request.
    DestinationClientError,
    /// Stamping the destination's identifier back onto the payload failed.
    WriteBackFailure,
    /// The due-record query itself failed.
    SelectionStoreError,
}

impl ErrorKind {
    /// Whether a record failing with this kind should be scheduled again.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::TransientNetworkError | ErrorKind::DestinationServerError
        )
    }
}

/// A record-level delivery failure.
///
/// Produced by the payload, transform and send steps of the worker and
/// consumed by the state machine transition function.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("payload not found: {payload_id}")]
    PayloadMissing { payload_id: String },

    #[error("transform failed: {message}")]
    Transform { message: String },

    #[error("network error: {message}")]
    TransientNetwork { message: String },

    #[error("destination returned {status}: {message}")]
    DestinationServer { status: u16, message: String },

    #[error("destination rejected request with {status}: {message}")]
    DestinationClient { status: u16, message: String },
}

impl DeliveryError {
    /// Map this failure onto the record-level taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeliveryError::PayloadMissing { .. } => ErrorKind::PayloadMissing,
            DeliveryError::Transform { .. } => ErrorKind::TransformError,
            DeliveryError::TransientNetwork { .. } => ErrorKind::TransientNetworkError,
            DeliveryError::DestinationServer { .. } => ErrorKind::DestinationServerError,
            DeliveryError::DestinationClient { .. } => ErrorKind::DestinationClientError,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    pub fn transform(message: impl Into<String>) -> Self {
        DeliveryError::Transform {
            message: message.into(),
        }
    }
}
