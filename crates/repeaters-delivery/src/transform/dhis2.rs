// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! DHIS2 repeater: builds a data value set from a form.

use std::sync::LazyLock;

use regex::Regex;
use repeaters_core::{DeliveryError, Dhis2Options, Payload};
use serde_json::{Map, Value, json};

use super::{WireRequest, lookup, scalar_string};

pub const DATA_VALUE_SETS_PATH: &str = "api/dataValueSets";

static DHIS2_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]+$").unwrap_or_else(|e| panic!("invalid DHIS2 id pattern: {e}"))
});

/// Whether `id` is a syntactically valid DHIS2 identifier.
pub fn is_valid_id(id: &str) -> bool {
    DHIS2_ID.is_match(id)
}

pub fn transform(opts: &Dhis2Options, payload: &Payload) -> Result<WireRequest, DeliveryError> {
    let body = &payload.body;
    let data_set = checked_id("dataSet", &opts.data_set_id)?;

    let org_unit = match (&opts.org_unit_id, &opts.org_unit_property) {
        (Some(id), _) => id.clone(),
        (None, Some(property)) => lookup(body, property)
            .and_then(scalar_string)
            .ok_or_else(|| {
                DeliveryError::transform(format!("org unit property `{property}` is missing"))
            })?,
        (None, None) => {
            return Err(DeliveryError::transform(
                "DHIS2 map has neither org_unit_id nor org_unit_property",
            ));
        }
    };
    let org_unit = checked_id("orgUnit", &org_unit)?;

    let period = lookup(body, &opts.period_property)
        .and_then(scalar_string)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| {
            DeliveryError::transform(format!(
                "period property `{}` is missing",
                opts.period_property
            ))
        })?;

    let mut data_values = Vec::with_capacity(opts.data_values.len());
    for map in &opts.data_values {
        let Some(value) = lookup(body, &map.property).and_then(scalar_string) else {
            continue;
        };
        let mut entry = Map::new();
        entry.insert(
            "dataElement".into(),
            Value::String(checked_id("dataElement", &map.data_element_id)?),
        );
        if let Some(combo) = &map.category_option_combo_id {
            entry.insert(
                "categoryOptionCombo".into(),
                Value::String(checked_id("categoryOptionCombo", combo)?),
            );
        }
        entry.insert("value".into(), Value::String(value));
        data_values.push(Value::Object(entry));
    }
    if data_values.is_empty() {
        return Err(DeliveryError::transform(
            "form has no values for any mapped data element",
        ));
    }

    Ok(WireRequest::post_json(
        DATA_VALUE_SETS_PATH,
        json!({
            "dataSet": data_set,
            "orgUnit": org_unit,
            "period": period,
            "dataValues": data_values,
        }),
    ))
}

fn checked_id(field: &str, id: &str) -> Result<String, DeliveryError> {
    if is_valid_id(id) {
        Ok(id.to_string())
    } else {
        Err(DeliveryError::transform(format!(
            "invalid DHIS2 {field} id `{id}`"
        )))
    }
}
