// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Form repeater: forwards raw form XML, or the JSON form document.

use reqwest::Method;
use repeaters_core::{DeliveryError, FormOptions, Payload};
use serde_json::Value;

use super::{WireBody, WireRequest, XML, non_empty_str};

pub fn transform(opts: &FormOptions, payload: &Payload) -> Result<WireRequest, DeliveryError> {
    let xml = non_empty_str(&payload.body, "form_xml");
    if opts.prefer_xml
        && let Some(xml) = xml
    {
        return Ok(WireRequest {
            method: Method::POST,
            path: String::new(),
            content_type: XML,
            body: WireBody::Xml(xml.to_string()),
        });
    }

    let Value::Object(body) = &payload.body else {
        return Err(DeliveryError::transform("form payload is not a JSON object"));
    };
    if non_empty_str(&payload.body, "form_id").is_none() && xml.is_none() {
        return Err(DeliveryError::transform(
            "form payload has neither form_id nor form_xml",
        ));
    }
    let mut doc = body.clone();
    doc.remove("form_xml");
    doc.insert("domain".into(), Value::String(payload.domain.clone()));
    if let Some(xmlns) = payload.doc_type.as_deref() {
        doc.entry("xmlns")
            .or_insert_with(|| Value::String(xmlns.to_string()));
    }
    Ok(WireRequest::post_json("", Value::Object(doc)))
}
