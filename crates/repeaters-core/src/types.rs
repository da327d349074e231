// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain types shared across adapter traits and the delivery pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::ErrorKind;

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the type of adapter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    RecordStore,
    PayloadSource,
}

// --- Repeat records ---

/// Lifecycle state of a repeat record.
///
/// `Success` and `Cancelled` are terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordState {
    Pending,
    Success,
    Failure,
    Cancelled,
}

impl RecordState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RecordState::Success | RecordState::Cancelled)
    }

    /// Whether the scheduler may pick up a record in this state.
    pub fn is_selectable(self) -> bool {
        !self.is_terminal()
    }
}

/// One outbound delivery obligation: one payload for one repeater.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepeatRecord {
    pub id: String,
    pub domain: String,
    pub repeater_id: String,
    pub payload_id: String,
    pub payload_type: PayloadType,
    pub state: RecordState,
    pub registered_at: DateTime<Utc>,
    /// When the record is next eligible. `None` once terminal.
    pub next_check: Option<DateTime<Utc>>,
    /// Message of the most recent failed attempt.
    pub failure_reason: Option<String>,
}

impl RepeatRecord {
    /// Create a new pending record that is due immediately.
    pub fn new_pending(
        domain: &str,
        repeater_id: &str,
        payload_id: &str,
        payload_type: PayloadType,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid_v4(),
            domain: domain.to_string(),
            repeater_id: repeater_id.to_string(),
            payload_id: payload_id.to_string(),
            payload_type,
            state: RecordState::Pending,
            registered_at: now,
            next_check: Some(now),
            failure_reason: None,
        }
    }
}

/// A record that has been atomically claimed by one worker.
///
/// `prior_attempts` is read from the attempt log inside the claim and is
/// the only input used for backoff and retry-budget decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedRecord {
    pub record: RepeatRecord,
    pub prior_attempts: u32,
    pub claim_token: String,
}

/// Append-only log entry for one send attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    pub id: i64,
    pub record_id: String,
    pub attempted_at: DateTime<Utc>,
    /// The state the record transitioned into.
    pub state: RecordState,
    pub error_kind: Option<ErrorKind>,
    pub message: String,
}

/// The result of evaluating one processing pass of a record.
///
/// Persisted atomically: one attempt row plus the new record state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: RecordState,
    pub next_check: Option<DateTime<Utc>>,
    pub error_kind: Option<ErrorKind>,
    pub message: String,
    pub attempted_at: DateTime<Utc>,
}

/// Filter used by operator listing and counting queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub domain: Option<String>,
    pub repeater_id: Option<String>,
    pub state: Option<RecordState>,
    pub payload_id: Option<String>,
}

/// Restricts which records a scheduler instance selects.
///
/// Empty vectors mean "no restriction".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionScope {
    pub domains: Vec<String>,
    pub repeater_ids: Vec<String>,
    /// Repeaters left out of this selection, e.g. while paused.
    pub excluded_repeater_ids: Vec<String>,
}

/// Record counts by state for one domain (or all domains).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecordCounts {
    pub pending: u64,
    pub failure: u64,
    pub success: u64,
    pub cancelled: u64,
    /// Selectable records whose `next_check` is older than the overdue threshold.
    pub overdue: u64,
}

// --- Payloads ---

/// The kind of source document a payload is.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PayloadType {
    Case,
    Form,
}

/// A source document as supplied by the payload source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub id: String,
    pub domain: String,
    pub payload_type: PayloadType,
    /// Case type for cases, xmlns for forms.
    #[serde(default)]
    pub doc_type: Option<String>,
    pub body: serde_json::Value,
    /// Identifier assigned by a destination, stamped by write-back.
    #[serde(default)]
    pub external_id: Option<String>,
}

// --- Repeaters ---

/// Credentials used when calling a destination.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthSettings {
    #[default]
    None,
    Basic {
        username: String,
        password: String,
    },
    Bearer {
        token: String,
    },
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthSettings::None => f.write_str("None"),
            AuthSettings::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            AuthSettings::Bearer { .. } => f
                .debug_struct("Bearer")
                .field("token", &"[REDACTED]")
                .finish(),
        }
    }
}

/// Where and how to reach a destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Base URL. Wire request paths are joined onto it.
    pub url: String,
    #[serde(default)]
    pub auth: AuthSettings,
    /// Per-repeater request timeout. Falls back to `http.timeout_secs`.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Form repeater options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormOptions {
    /// Forward the raw form XML when the payload carries it.
    #[serde(default = "default_true")]
    pub prefer_xml: bool,
}

impl Default for FormOptions {
    fn default() -> Self {
        Self { prefer_xml: true }
    }
}

fn default_true() -> bool {
    true
}

/// Maps one case type onto one FHIR resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FhirResourceMapping {
    pub resource_type: String,
    /// Dotted FHIR path (e.g. `name.0.family`) to case property name.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// FHIR repeater options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FhirOptions {
    /// FHIR version of the destination, e.g. `4.0.1` (R4).
    #[serde(default = "default_fhir_version")]
    pub fhir_version: String,
    /// Case type to resource mapping. Cases of unmapped types cannot be sent.
    pub resource_types: BTreeMap<String, FhirResourceMapping>,
    /// Public base URL of the sending side. Bundle entry `fullUrl`s become
    /// `{base}/a/{domain}/api/fhir/{release}/{Type}/{case_id}`; without it
    /// entries get `urn:uuid` URLs.
    #[serde(default)]
    pub full_url_base: Option<String>,
}

fn default_fhir_version() -> String {
    "4.0.1".to_string()
}

/// One DHIS2 data element sourced from a form property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dhis2DataValueMap {
    pub data_element_id: String,
    #[serde(default)]
    pub category_option_combo_id: Option<String>,
    pub property: String,
}

/// DHIS2 dataset map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dhis2Options {
    pub data_set_id: String,
    /// Fixed organisation unit, or `None` to read `org_unit_property`.
    #[serde(default)]
    pub org_unit_id: Option<String>,
    #[serde(default)]
    pub org_unit_property: Option<String>,
    /// Payload property holding the DHIS2 period (e.g. `202604`).
    #[serde(default = "default_period_property")]
    pub period_property: String,
    pub data_values: Vec<Dhis2DataValueMap>,
}

fn default_period_property() -> String {
    "period".to_string()
}

/// The repeater variant, carrying the options its transform needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RepeaterKind {
    Case,
    Form(FormOptions),
    Fhir(FhirOptions),
    Dhis2(Dhis2Options),
}

impl RepeaterKind {
    pub fn name(&self) -> &'static str {
        match self {
            RepeaterKind::Case => "case",
            RepeaterKind::Form(_) => "form",
            RepeaterKind::Fhir(_) => "fhir",
            RepeaterKind::Dhis2(_) => "dhis2",
        }
    }

    /// The payload type this kind of repeater forwards.
    pub fn payload_type(&self) -> PayloadType {
        match self {
            RepeaterKind::Case | RepeaterKind::Fhir(_) => PayloadType::Case,
            RepeaterKind::Form(_) | RepeaterKind::Dhis2(_) => PayloadType::Form,
        }
    }

    /// Whether several records can share one network transaction.
    pub fn supports_bundles(&self) -> bool {
        matches!(self, RepeaterKind::Fhir(_))
    }
}

/// A configured destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repeater {
    #[serde(default = "uuid_v4")]
    pub id: String,
    pub domain: String,
    pub name: String,
    pub kind: RepeaterKind,
    pub connection: ConnectionSettings,
    /// White-listed case types or form xmlns. Empty accepts everything.
    #[serde(default)]
    pub payload_filter: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Repeater {
    /// Whether a new record should be registered for this payload.
    pub fn accepts(&self, payload_type: PayloadType, doc_type: Option<&str>) -> bool {
        if !self.enabled || self.kind.payload_type() != payload_type {
            return false;
        }
        if self.payload_filter.is_empty() {
            return true;
        }
        doc_type.is_some_and(|t| self.payload_filter.iter().any(|f| f == t))
    }
}

fn uuid_v4() -> String {
    uuid::Uuid::new_v4().to_string()
}
