// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Case repeater: forwards the case document as JSON.

use repeaters_core::{DeliveryError, Payload};
use serde_json::{Map, Value};

use super::{WireRequest, non_empty_str};

pub fn transform(payload: &Payload) -> Result<WireRequest, DeliveryError> {
    let Value::Object(body) = &payload.body else {
        return Err(DeliveryError::transform("case payload is not a JSON object"));
    };
    let case_id = non_empty_str(&payload.body, "case_id")
        .ok_or_else(|| DeliveryError::transform("case payload has no case_id"))?;

    let mut doc: Map<String, Value> = body.clone();
    doc.insert("case_id".into(), Value::String(case_id.to_string()));
    doc.insert("domain".into(), Value::String(payload.domain.clone()));
    if let Some(case_type) = payload.doc_type.as_deref()
        && !doc.contains_key("case_type")
    {
        doc.insert("case_type".into(), Value::String(case_type.to_string()));
    }
    doc.entry("properties")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Some(external_id) = &payload.external_id {
        doc.insert("external_id".into(), Value::String(external_id.clone()));
    }

    Ok(WireRequest::post_json("", Value::Object(doc)))
}
