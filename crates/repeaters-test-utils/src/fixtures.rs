// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Repeater and payload fixtures.

use std::collections::BTreeMap;

use repeaters_core::{
    AuthSettings, ConnectionSettings, Dhis2DataValueMap, Dhis2Options, FhirOptions,
    FhirResourceMapping, FormOptions, Payload, PayloadType, Repeater, RepeaterKind,
};
use serde_json::{Value, json};

pub const DOMAIN: &str = "demo";

/// A repeater of `kind` pointing at `url`, accepting every payload.
pub fn repeater(id: &str, kind: RepeaterKind, url: &str) -> Repeater {
    Repeater {
        id: id.to_string(),
        domain: DOMAIN.to_string(),
        name: format!("{} repeater {id}", kind.name()),
        kind,
        connection: ConnectionSettings {
            url: url.to_string(),
            auth: AuthSettings::None,
            timeout_secs: Some(5),
        },
        payload_filter: Vec::new(),
        enabled: true,
    }
}

pub fn case_repeater(id: &str, url: &str) -> Repeater {
    repeater(id, RepeaterKind::Case, url)
}

pub fn form_repeater(id: &str, url: &str) -> Repeater {
    repeater(id, RepeaterKind::Form(FormOptions::default()), url)
}

/// FHIR repeater mapping `person` cases to Patients and `observation`
/// cases to Observations.
pub fn fhir_repeater(id: &str, url: &str) -> Repeater {
    let mut patient = BTreeMap::new();
    patient.insert("name.0.family".to_string(), "last_name".to_string());
    patient.insert("name.0.given.0".to_string(), "first_name".to_string());
    let mut observation = BTreeMap::new();
    observation.insert("valueString".to_string(), "result".to_string());

    let mut resource_types = BTreeMap::new();
    resource_types.insert(
        "person".to_string(),
        FhirResourceMapping {
            resource_type: "Patient".to_string(),
            properties: patient,
        },
    );
    resource_types.insert(
        "observation".to_string(),
        FhirResourceMapping {
            resource_type: "Observation".to_string(),
            properties: observation,
        },
    );
    repeater(
        id,
        RepeaterKind::Fhir(FhirOptions {
            fhir_version: "4.0.1".to_string(),
            resource_types,
            full_url_base: None,
        }),
        url,
    )
}

pub fn dhis2_repeater(id: &str, url: &str) -> Repeater {
    repeater(
        id,
        RepeaterKind::Dhis2(Dhis2Options {
            data_set_id: "pBOMPrpg1QX".to_string(),
            org_unit_id: Some("DiszpKrYNg8".to_string()),
            org_unit_property: None,
            period_property: "form.period".to_string(),
            data_values: vec![Dhis2DataValueMap {
                data_element_id: "f7n9E0hX8qk".to_string(),
                category_option_combo_id: None,
                property: "form.malaria_cases".to_string(),
            }],
        }),
        url,
    )
}

fn payload(id: &str, payload_type: PayloadType, doc_type: &str, body: Value) -> Payload {
    Payload {
        id: id.to_string(),
        domain: DOMAIN.to_string(),
        payload_type,
        doc_type: Some(doc_type.to_string()),
        body,
        external_id: None,
    }
}

/// A `person` case.
pub fn person_case(id: &str) -> Payload {
    payload(
        id,
        PayloadType::Case,
        "person",
        json!({
            "case_id": id,
            "case_type": "person",
            "properties": {"first_name": "Ada", "last_name": "Lovelace"}
        }),
    )
}

/// An `observation` case.
pub fn observation_case(id: &str) -> Payload {
    payload(
        id,
        PayloadType::Case,
        "observation",
        json!({
            "case_id": id,
            "case_type": "observation",
            "properties": {"result": format!("result of {id}")}
        }),
    )
}

/// A form submission carrying raw XML.
pub fn form(id: &str) -> Payload {
    payload(
        id,
        PayloadType::Form,
        "http://openrosa.org/formdesigner/visit",
        json!({
            "form_id": id,
            "form_xml": format!("<data><id>{id}</id></data>"),
            "form": {"period": "202604", "malaria_cases": 3}
        }),
    )
}
