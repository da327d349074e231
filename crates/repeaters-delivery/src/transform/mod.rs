// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-kind payload transforms.
//!
//! Each repeater kind maps a [`Payload`] into a [`WireRequest`] relative to
//! the repeater's base URL. Every failure here is a
//! [`DeliveryError::Transform`] and cancels the record.

pub mod case;
pub mod dhis2;
pub mod fhir;
pub mod form;

use reqwest::Method;
use repeaters_core::{DeliveryError, Payload, RepeaterKind};
use serde_json::Value;

pub const JSON: &str = "application/json";
pub const XML: &str = "application/xml";
pub const FHIR_JSON: &str = "application/fhir+json";

/// Request body.
#[derive(Debug, Clone, PartialEq)]
pub enum WireBody {
    Json(Value),
    Xml(String),
}

impl WireBody {
    pub fn to_bytes(&self) -> Result<Vec<u8>, DeliveryError> {
        match self {
            WireBody::Json(value) => serde_json::to_vec(value)
                .map_err(|e| DeliveryError::transform(format!("failed to encode JSON: {e}"))),
            WireBody::Xml(xml) => Ok(xml.clone().into_bytes()),
        }
    }
}

/// One HTTP request ready to send to a destination.
#[derive(Debug, Clone, PartialEq)]
pub struct WireRequest {
    pub method: Method,
    /// Path joined onto the repeater URL. Empty means the URL itself.
    pub path: String,
    pub content_type: &'static str,
    pub body: WireBody,
}

impl WireRequest {
    pub fn post_json(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            content_type: JSON,
            body: WireBody::Json(body),
        }
    }
}

/// Transform a payload for a single-record send.
pub fn transform(kind: &RepeaterKind, payload: &Payload) -> Result<WireRequest, DeliveryError> {
    match kind {
        RepeaterKind::Case => case::transform(payload),
        RepeaterKind::Form(opts) => form::transform(opts, payload),
        RepeaterKind::Fhir(opts) => Ok(fhir::build_resource(opts, payload)?.to_request()),
        RepeaterKind::Dhis2(opts) => dhis2::transform(opts, payload),
    }
}

/// Follow a dotted path (`form.group.question`) through nested objects.
///
/// Numeric segments index into arrays.
pub fn lookup<'a>(body: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(body, |value, segment| match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Render a scalar JSON value as the string a destination expects.
///
/// Null, objects and arrays have no scalar rendering.
pub fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn non_empty_str<'a>(body: &'a Value, key: &str) -> Option<&'a str> {
    body.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}
