// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Boundary with the surrounding application: payload lookup and write-back.

use async_trait::async_trait;

use crate::error::RepeaterError;
use crate::traits::adapter::PluginAdapter;
use crate::types::Payload;

/// Supplies payload bodies by identifier.
#[async_trait]
pub trait PayloadSource: PluginAdapter {
    /// Returns `None` when the payload no longer exists.
    async fn fetch(&self, domain: &str, payload_id: &str)
    -> Result<Option<Payload>, RepeaterError>;
}

/// Stamps identifiers assigned by a destination back onto the source payload.
#[async_trait]
pub trait PayloadWriteBack: Send + Sync + 'static {
    async fn set_external_reference(
        &self,
        domain: &str,
        payload_id: &str,
        external_id: &str,
    ) -> Result<(), RepeaterError>;
}
