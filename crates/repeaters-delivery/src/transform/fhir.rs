// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! FHIR repeater: maps cases onto FHIR resources and transaction bundles.

use reqwest::Method;
use repeaters_core::{DeliveryError, FhirOptions, Payload};
use serde_json::{Map, Value, json};

use super::{FHIR_JSON, WireBody, WireRequest, lookup};

/// Array indexes above this are rejected rather than padded.
const MAX_PATH_INDEX: usize = 64;

/// Supported `fhir_version` values and their release names.
const FHIR_RELEASES: &[(&str, &str)] = &[("4.0.1", "R4"), ("3.0.2", "STU3")];

/// The release name (`R4`, `STU3`) of a FHIR version string.
pub fn release_name(fhir_version: &str) -> Option<&'static str> {
    FHIR_RELEASES
        .iter()
        .find(|(version, _)| *version == fhir_version)
        .map(|(_, release)| *release)
}

/// One case mapped onto one FHIR resource.
#[derive(Debug, Clone, PartialEq)]
pub struct FhirResource {
    /// Payload (case) id the resource was built from.
    pub case_id: String,
    pub domain: String,
    /// FHIR release of the destination, e.g. `R4`.
    pub release: &'static str,
    pub resource_type: String,
    /// Server-side id, when the destination already knows this case.
    pub external_id: Option<String>,
    pub resource: Value,
}

impl FhirResource {
    /// Patients the destination has not assigned an id to yet.
    pub fn is_unregistered_patient(&self) -> bool {
        self.resource_type == "Patient" && self.external_id.is_none()
    }

    /// `PUT {Type}/{id}` for known resources, `POST {Type}/` otherwise.
    pub fn request_line(&self) -> (Method, String) {
        match &self.external_id {
            Some(id) => (Method::PUT, format!("{}/{id}", self.resource_type)),
            None => (Method::POST, format!("{}/", self.resource_type)),
        }
    }

    pub fn to_request(&self) -> WireRequest {
        let (method, path) = self.request_line();
        WireRequest {
            method,
            path,
            content_type: FHIR_JSON,
            body: WireBody::Json(self.resource.clone()),
        }
    }

    /// Where this case is published as a resource by the sending side.
    ///
    /// Without a base URL the entry gets a `urn:uuid`: the case id when it
    /// is a UUID, otherwise a fresh one.
    pub fn full_url(&self, full_url_base: Option<&str>) -> String {
        match full_url_base {
            Some(base) => format!(
                "{}/a/{}/api/fhir/{}/{}/{}",
                base.trim_end_matches('/'),
                self.domain,
                self.release.to_lowercase(),
                self.resource_type,
                self.case_id
            ),
            None => {
                let id = uuid::Uuid::parse_str(&self.case_id)
                    .unwrap_or_else(|_| uuid::Uuid::new_v4());
                format!("urn:uuid:{id}")
            }
        }
    }

    fn bundle_entry(&self, full_url_base: Option<&str>) -> Value {
        let (method, url) = self.request_line();
        json!({
            "fullUrl": self.full_url(full_url_base),
            "resource": self.resource,
            "request": { "method": method.as_str(), "url": url },
        })
    }
}

/// Map a case payload onto the resource type configured for its case type.
pub fn build_resource(opts: &FhirOptions, payload: &Payload) -> Result<FhirResource, DeliveryError> {
    let release = release_name(&opts.fhir_version).ok_or_else(|| {
        DeliveryError::transform(format!(
            "unsupported FHIR version `{}`",
            opts.fhir_version
        ))
    })?;
    let case_type = payload
        .doc_type
        .as_deref()
        .or_else(|| payload.body.get("case_type").and_then(Value::as_str))
        .ok_or_else(|| DeliveryError::transform("case payload has no case type"))?;
    let mapping = opts.resource_types.get(case_type).ok_or_else(|| {
        DeliveryError::transform(format!(
            "case type `{case_type}` is not mapped to a FHIR resource type"
        ))
    })?;

    let external_id = payload
        .external_id
        .clone()
        .or_else(|| {
            payload
                .body
                .get("external_id")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .filter(|id| !id.trim().is_empty());

    let mut resource = Value::Object(Map::new());
    for (fhir_path, property) in &mapping.properties {
        let Some(value) = case_property(&payload.body, property) else {
            continue;
        };
        let segments: Vec<&str> = fhir_path.split('.').collect();
        if matches!(segments.first(), Some(&"resourceType") | Some(&"id")) {
            return Err(DeliveryError::transform(format!(
                "FHIR path `{fhir_path}` is reserved"
            )));
        }
        set_path(&mut resource, &segments, value.clone()).map_err(|reason| {
            DeliveryError::transform(format!("cannot set FHIR path `{fhir_path}`: {reason}"))
        })?;
    }
    if let Value::Object(map) = &mut resource {
        map.insert(
            "resourceType".into(),
            Value::String(mapping.resource_type.clone()),
        );
        if let Some(id) = &external_id {
            map.insert("id".into(), Value::String(id.clone()));
        }
    }

    Ok(FhirResource {
        case_id: payload.id.clone(),
        domain: payload.domain.clone(),
        release,
        resource_type: mapping.resource_type.clone(),
        external_id,
        resource,
    })
}

/// Build a `transaction` bundle with one entry per resource, in order.
pub fn transaction_bundle(resources: &[&FhirResource], full_url_base: Option<&str>) -> Value {
    let entries: Vec<Value> = resources
        .iter()
        .map(|r| r.bundle_entry(full_url_base))
        .collect();
    json!({
        "resourceType": "Bundle",
        "type": "transaction",
        "entry": entries,
    })
}

/// The `id` of a resource returned from a single POST.
pub fn resource_id(response: &Value) -> Option<String> {
    response
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// The resource id in a bundle entry `location`, e.g.
/// `Patient/123/_history/1` or `https://host/fhir/Patient/123`.
pub fn location_id(location: &str) -> Option<String> {
    let path = location.split('/').collect::<Vec<_>>();
    let id_index = match path.iter().position(|s| *s == "_history") {
        Some(history) => history.checked_sub(1)?,
        None => path.len().checked_sub(1)?,
    };
    path.get(id_index)
        .filter(|id| !id.is_empty())
        .map(|id| id.to_string())
}

/// The status code at the start of a bundle entry status such as `201 Created`.
pub fn entry_status(status: &str) -> Option<u16> {
    status
        .split_whitespace()
        .next()
        .and_then(|code| code.parse().ok())
}

fn case_property<'a>(body: &'a Value, property: &str) -> Option<&'a Value> {
    body.get("properties")
        .and_then(|props| lookup(props, property))
        .or_else(|| lookup(body, property))
        .filter(|v| !v.is_null())
}

fn set_path(target: &mut Value, segments: &[&str], value: Value) -> Result<(), String> {
    let Some((head, rest)) = segments.split_first() else {
        *target = value;
        return Ok(());
    };
    if let Ok(index) = head.parse::<usize>() {
        if index > MAX_PATH_INDEX {
            return Err(format!("index {index} is too large"));
        }
        if target.is_null() {
            *target = Value::Array(Vec::new());
        }
        let Value::Array(items) = target else {
            return Err(format!("`{head}` indexes a non-array value"));
        };
        if items.len() <= index {
            items.resize(index + 1, Value::Null);
        }
        set_path(&mut items[index], rest, value)
    } else {
        if target.is_null() {
            *target = Value::Object(Map::new());
        }
        let Value::Object(map) = target else {
            return Err(format!("`{head}` is a field of a non-object value"));
        };
        set_path(
            map.entry(head.to_string()).or_insert(Value::Null),
            rest,
            value,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use repeaters_core::{FhirResourceMapping, PayloadType};

    fn options() -> FhirOptions {
        let mut properties = BTreeMap::new();
        properties.insert("name.0.family".to_string(), "last_name".to_string());
        properties.insert("name.0.given.0".to_string(), "first_name".to_string());
        properties.insert("birthDate".to_string(), "dob".to_string());
        let mut resource_types = BTreeMap::new();
        resource_types.insert(
            "person".to_string(),
            FhirResourceMapping {
                resource_type: "Patient".into(),
                properties,
            },
        );
        resource_types.insert(
            "visit".to_string(),
            FhirResourceMapping {
                resource_type: "Encounter".into(),
                properties: BTreeMap::new(),
            },
        );
        FhirOptions {
            fhir_version: "4.0.1".into(),
            resource_types,
            full_url_base: Some("https://hq.example.org/".into()),
        }
    }

    fn case(id: &str, case_type: &str, external_id: Option<&str>) -> Payload {
        Payload {
            id: id.into(),
            domain: "demo".into(),
            payload_type: PayloadType::Case,
            doc_type: Some(case_type.into()),
            body: json!({
                "case_id": id,
                "properties": {"first_name": "Ada", "last_name": "Lovelace", "dob": null}
            }),
            external_id: external_id.map(str::to_string),
        }
    }

    #[test]
    fn maps_properties_onto_nested_paths() {
        let r = build_resource(&options(), &case("c1", "person", None)).unwrap();
        assert_eq!(r.resource_type, "Patient");
        assert_eq!(
            r.resource,
            json!({
                "resourceType": "Patient",
                "name": [{"family": "Lovelace", "given": ["Ada"]}]
            })
        );
        assert!(r.is_unregistered_patient());
    }

    #[test]
    fn known_resources_are_put_by_id() {
        let r = build_resource(&options(), &case("c1", "person", Some("p-9"))).unwrap();
        assert_eq!(r.resource["id"], "p-9");
        let req = r.to_request();
        assert_eq!(req.method, Method::PUT);
        assert_eq!(req.path, "Patient/p-9");
        assert_eq!(req.content_type, FHIR_JSON);

        let r = build_resource(&options(), &case("c2", "visit", None)).unwrap();
        let req = r.to_request();
        assert_eq!(req.method, Method::POST);
        assert_eq!(req.path, "Encounter/");
    }

    #[test]
    fn unmapped_case_type_is_a_transform_error() {
        let err = build_resource(&options(), &case("c1", "household", None)).unwrap_err();
        assert!(err.to_string().contains("household"));
    }

    #[test]
    fn bundle_entries_carry_request_and_full_url() {
        let a = build_resource(&options(), &case("c1", "person", Some("p-1"))).unwrap();
        let b = build_resource(&options(), &case("c2", "visit", None)).unwrap();
        let bundle = transaction_bundle(&[&a, &b], options().full_url_base.as_deref());
        assert_eq!(bundle["type"], "transaction");
        let entries = bundle["entry"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[0]["fullUrl"],
            "https://hq.example.org/a/demo/api/fhir/r4/Patient/c1"
        );
        assert_eq!(entries[0]["request"]["method"], "PUT");
        assert_eq!(entries[0]["request"]["url"], "Patient/p-1");
        assert_eq!(
            entries[1]["fullUrl"],
            "https://hq.example.org/a/demo/api/fhir/r4/Encounter/c2"
        );
        assert_eq!(entries[1]["request"]["method"], "POST");
        assert_eq!(entries[1]["request"]["url"], "Encounter/");
    }

    #[test]
    fn full_url_without_base_is_a_valid_urn_uuid() {
        let case_uuid = "0f8fad5b-d9cb-469f-a165-70867728950e";
        let r = build_resource(&options(), &case(case_uuid, "visit", None)).unwrap();
        assert_eq!(r.full_url(None), format!("urn:uuid:{case_uuid}"));

        let r = build_resource(&options(), &case("c2", "visit", None)).unwrap();
        let url = r.full_url(None);
        let id = url.strip_prefix("urn:uuid:").unwrap();
        assert!(uuid::Uuid::parse_str(id).is_ok());
    }

    #[test]
    fn fhir_version_selects_release() {
        assert_eq!(release_name("4.0.1"), Some("R4"));
        assert_eq!(release_name("3.0.2"), Some("STU3"));
        let opts = FhirOptions {
            fhir_version: "9.9".into(),
            ..options()
        };
        let err = build_resource(&opts, &case("c1", "person", None)).unwrap_err();
        assert!(err.to_string().contains("unsupported FHIR version `9.9`"));
    }

    #[test]
    fn parses_locations_and_statuses() {
        assert_eq!(location_id("Patient/123/_history/1"), Some("123".into()));
        assert_eq!(location_id("https://h/fhir/Encounter/e-7"), Some("e-7".into()));
        assert_eq!(location_id(""), None);
        assert_eq!(entry_status("201 Created"), Some(201));
        assert_eq!(entry_status("400"), Some(400));
        assert_eq!(entry_status("Created"), None);
        assert_eq!(resource_id(&json!({"id": "abc"})), Some("abc".into()));
        assert_eq!(resource_id(&json!({"resourceType": "Patient"})), None);
    }

    #[test]
    fn conflicting_paths_are_rejected() {
        let mut resource = json!({"name": "flat"});
        assert!(set_path(&mut resource, &["name", "0"], json!("x")).is_err());
        assert!(set_path(&mut resource, &["list", "1000"], json!("x")).is_err());
    }
}
