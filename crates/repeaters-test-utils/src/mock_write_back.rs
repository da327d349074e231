// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Write-back adapter that captures calls for assertions.

use std::sync::Arc;

use async_trait::async_trait;
use repeaters_core::{PayloadWriteBack, RepeaterError};
use tokio::sync::Mutex;

/// One captured `set_external_reference` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteBackCall {
    pub domain: String,
    pub payload_id: String,
    pub external_id: String,
}

/// A write-back target for tests.
///
/// Every call is captured, including failed ones.
#[derive(Default)]
pub struct MockWriteBack {
    calls: Arc<Mutex<Vec<WriteBackCall>>>,
    fail: bool,
}

impl MockWriteBack {
    pub fn new() -> Self {
        Self::default()
    }

    /// A write-back that rejects every call.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub async fn calls(&self) -> Vec<WriteBackCall> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl PayloadWriteBack for MockWriteBack {
    async fn set_external_reference(
        &self,
        domain: &str,
        payload_id: &str,
        external_id: &str,
    ) -> Result<(), RepeaterError> {
        self.calls.lock().await.push(WriteBackCall {
            domain: domain.to_string(),
            payload_id: payload_id.to_string(),
            external_id: external_id.to_string(),
        });
        if self.fail {
            return Err(RepeaterError::Internal(
                "mock write-back configured to fail".to_string(),
            ));
        }
        Ok(())
    }
}
