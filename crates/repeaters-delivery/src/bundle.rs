// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! FHIR batch processing.
//!
//! Records of a FHIR repeater share network transactions:
//!
//! 1. every due record is claimed and mapped onto a resource;
//! 2. Patients without a server id are registered one at a time so the
//!    destination assigns their ids;
//! 3. a single remaining resource is sent on its own, two or more as one
//!    `transaction` Bundle whose entry responses are mapped back to records
//!    by position.

use std::collections::HashSet;

use chrono::{DateTime, TimeDelta, Utc};
use reqwest::Method;
use repeaters_core::{
    ClaimedRecord, DeliveryError, FhirOptions, RepeatRecord, Repeater, RepeaterError,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::client::{DestinationResponse, classify_status};
use crate::state::{Delivered, Outcome};
use crate::transform::fhir::{self, FhirResource};
use crate::transform::{FHIR_JSON, WireBody, WireRequest};
use crate::worker::{BatchReport, Worker};

const UNPARSEABLE_RESPONSE: &str = "Unable to parse response from remote FHIR service";

struct Prepared {
    claim: ClaimedRecord,
    resource: FhirResource,
}

/// Deadline of the leases a FHIR batch holds on its claims.
///
/// Claims are renewed together before any request that could outlive them.
struct BatchLease {
    until: DateTime<Utc>,
}

impl Worker {
    pub(crate) async fn process_fhir_batch(
        &self,
        repeater: &Repeater,
        opts: &FhirOptions,
        records: Vec<RepeatRecord>,
    ) -> Result<BatchReport, RepeaterError> {
        let mut report = BatchReport::default();

        // Claims taken below expire no earlier than this.
        let mut lease = BatchLease {
            until: self.lease_until(repeater, Utc::now()),
        };
        let mut claims = Vec::with_capacity(records.len());
        for record in &records {
            match self.claim(repeater, record).await {
                Ok(Some(claim)) => claims.push(claim),
                Ok(None) => report.skipped += 1,
                Err(err) => {
                    self.release_all(&claims).await;
                    return Err(err);
                }
            }
        }

        let mut prepared = Vec::with_capacity(claims.len());
        let mut claims = claims.into_iter();
        while let Some(claim) = claims.next() {
            let payload = match self.fetch_payload(&claim).await {
                Ok(payload) => payload,
                Err(err) => {
                    let held: Vec<&ClaimedRecord> = prepared
                        .iter()
                        .map(claim_of)
                        .chain(claims.as_slice())
                        .collect();
                    self.release_all(held).await;
                    return Err(err);
                }
            };
            match payload.and_then(|p| fhir::build_resource(opts, &p)) {
                Ok(resource) => prepared.push(Prepared { claim, resource }),
                Err(err) => self.finish(repeater, &claim, Err(err), &mut report).await?,
            }
        }

        let (mut patients, mut to_send): (Vec<Prepared>, Vec<Prepared>) = prepared
            .into_iter()
            .partition(|p| p.resource.is_unregistered_patient());
        // Popped from the back, so registration keeps selection order.
        patients.reverse();

        while !patients.is_empty() {
            let lost = self
                .hold_claims(
                    repeater,
                    &mut lease,
                    patients.iter().chain(&to_send).collect::<Vec<&Prepared>>(),
                )
                .await?;
            report.skipped += drop_lost(&mut patients, &lost) + drop_lost(&mut to_send, &lost);
            let Some(item) = patients.pop() else {
                break;
            };

            let outcome = self.register_patient(repeater, &item.resource).await;
            let stop = matches!(&outcome, Err(err) if err.is_retryable());
            self.finish(repeater, &item.claim, outcome, &mut report)
                .await?;
            if stop {
                let held: Vec<&ClaimedRecord> = to_send.iter().chain(&patients).map(claim_of).collect();
                report.deferred += self.release_all(held).await;
                report.short_circuited = true;
                info!(
                    repeater_id = %repeater.id,
                    deferred = report.deferred,
                    "patient registration failing, stopping batch"
                );
                return Ok(report);
            }
        }

        let lost = self.hold_claims(repeater, &mut lease, &to_send).await?;
        report.skipped += drop_lost(&mut to_send, &lost);

        match to_send.as_slice() {
            [] => {}
            [single] => {
                let outcome = self.send_resource(repeater, &single.resource).await;
                self.finish(repeater, &single.claim, outcome, &mut report)
                    .await?;
            }
            items => {
                let resources: Vec<&FhirResource> = items.iter().map(|p| &p.resource).collect();
                let outcomes = self.send_bundle(repeater, opts, &resources).await;
                for (item, outcome) in items.iter().zip(outcomes) {
                    self.finish(repeater, &item.claim, outcome, &mut report)
                        .await?;
                }
            }
        }
        Ok(report)
    }

    /// Renew every claim in `held` when the next request could outlast the
    /// batch lease. Returns the ids of records whose claim was lost.
    async fn hold_claims<'a>(
        &self,
        repeater: &Repeater,
        lease: &mut BatchLease,
        held: impl IntoIterator<Item = &'a Prepared>,
    ) -> Result<HashSet<String>, RepeaterError> {
        let now = Utc::now();
        let request_timeout =
            TimeDelta::from_std(self.client.timeout_for(&repeater.connection))
                .unwrap_or(TimeDelta::MAX);
        if now
            .checked_add_signed(request_timeout)
            .is_some_and(|done| done < lease.until)
        {
            return Ok(HashSet::new());
        }

        let until = self.lease_until(repeater, now);
        let mut lost = HashSet::new();
        for item in held {
            if !self.store.renew_claim(&item.claim, until).await? {
                lost.insert(item.claim.record.id.clone());
            }
        }
        if !lost.is_empty() {
            warn!(
                repeater_id = %repeater.id,
                lost = lost.len(),
                "claims lost before their request, dropping them from the batch"
            );
        }
        debug!(repeater_id = %repeater.id, lease_until = %until, "batch claims renewed");
        lease.until = until;
        Ok(lost)
    }

    /// POST a new Patient. The response must carry the assigned id.
    async fn register_patient(&self, repeater: &Repeater, resource: &FhirResource) -> Outcome {
        let response = self.send(repeater, &resource.to_request()).await?;
        match response.json().as_ref().and_then(fhir::resource_id) {
            Some(id) => {
                debug!(case_id = %resource.case_id, patient_id = %id, "patient registered");
                Ok(Delivered::new(response.summary()).with_external_id(Some(id)))
            }
            None => Err(DeliveryError::DestinationServer {
                status: response.status,
                message: UNPARSEABLE_RESPONSE.to_string(),
            }),
        }
    }

    /// Send one resource. A POST response without an id is still a success.
    async fn send_resource(&self, repeater: &Repeater, resource: &FhirResource) -> Outcome {
        let response = self.send(repeater, &resource.to_request()).await?;
        let assigned = if resource.external_id.is_none() {
            response.json().as_ref().and_then(fhir::resource_id)
        } else {
            None
        };
        Ok(Delivered::new(response.summary()).with_external_id(assigned))
    }

    async fn send_bundle(
        &self,
        repeater: &Repeater,
        opts: &FhirOptions,
        resources: &[&FhirResource],
    ) -> Vec<Outcome> {
        let request = WireRequest {
            method: Method::POST,
            path: String::new(),
            content_type: FHIR_JSON,
            body: WireBody::Json(fhir::transaction_bundle(
                resources,
                opts.full_url_base.as_deref(),
            )),
        };
        match self.send(repeater, &request).await {
            Ok(response) => bundle_outcomes(&response, resources),
            Err(err) => vec![Err(err); resources.len()],
        }
    }
}

fn claim_of(p: &Prepared) -> &ClaimedRecord {
    &p.claim
}

/// Remove items whose claim was lost. Returns how many were removed.
fn drop_lost(items: &mut Vec<Prepared>, lost: &HashSet<String>) -> usize {
    let before = items.len();
    items.retain(|p| !lost.contains(&p.claim.record.id));
    before - items.len()
}

/// Map a transaction-response Bundle back onto the resources sent, by position.
///
/// A response whose entry count differs from the request is malformed and
/// fails every entry with a retryable error.
pub fn bundle_outcomes(response: &DestinationResponse, resources: &[&FhirResource]) -> Vec<Outcome> {
    let expected = resources.len();
    let malformed = |message: String| DeliveryError::DestinationServer {
        status: response.status,
        message,
    };

    let json = response.json();
    let Some(entries) = json
        .as_ref()
        .and_then(|body| body.get("entry"))
        .and_then(Value::as_array)
    else {
        return vec![Err(malformed(UNPARSEABLE_RESPONSE.to_string())); expected];
    };
    if entries.len() != expected {
        return vec![
            Err(malformed(format!(
                "bundle response has {} entries, expected {expected}",
                entries.len()
            )));
            expected
        ];
    }

    entries
        .iter()
        .zip(resources)
        .map(|(entry, resource)| entry_outcome(entry, resource, response.status))
        .collect()
}

fn entry_outcome(entry: &Value, resource: &FhirResource, bundle_status: u16) -> Outcome {
    let response = entry.get("response");
    let status = response
        .and_then(|r| r.get("status"))
        .and_then(Value::as_str)
        .and_then(|text| fhir::entry_status(text).map(|code| (text, code)));
    let Some((status_text, code)) = status else {
        return Err(DeliveryError::DestinationServer {
            status: bundle_status,
            message: "bundle entry has no response status".to_string(),
        });
    };

    if (200..300).contains(&code) {
        let assigned = if resource.external_id.is_none() {
            response
                .and_then(|r| r.get("location"))
                .and_then(Value::as_str)
                .and_then(fhir::location_id)
        } else {
            None
        };
        Ok(Delivered::new(status_text).with_external_id(assigned))
    } else {
        let outcome = response
            .and_then(|r| r.get("outcome"))
            .map(Value::to_string)
            .unwrap_or_default();
        Err(classify_status(code, &outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resource(case_id: &str, external_id: Option<&str>) -> FhirResource {
        FhirResource {
            case_id: case_id.into(),
            domain: "demo".into(),
            release: "R4",
            resource_type: "Observation".into(),
            external_id: external_id.map(str::to_string),
            resource: json!({"resourceType": "Observation"}),
        }
    }

    fn response(body: Value) -> DestinationResponse {
        DestinationResponse {
            status: 200,
            body: body.to_string(),
        }
    }

    #[test]
    fn entries_map_back_by_position() {
        let a = resource("c1", None);
        let b = resource("c2", None);
        let c = resource("c3", Some("o-3"));
        let outcomes = bundle_outcomes(
            &response(json!({
                "resourceType": "Bundle",
                "type": "transaction-response",
                "entry": [
                    {"response": {"status": "201 Created", "location": "Observation/o-1/_history/1"}},
                    {"response": {"status": "400 Bad Request", "outcome": {"issue": []}}},
                    {"response": {"status": "200 OK", "location": "Observation/o-3/_history/2"}}
                ]
            })),
            &[&a, &b, &c],
        );
        assert_eq!(outcomes.len(), 3);
        let first = outcomes[0].as_ref().unwrap();
        assert_eq!(first.message, "201 Created");
        assert_eq!(first.external_id.as_deref(), Some("o-1"));
        assert!(matches!(
            outcomes[1],
            Err(DeliveryError::DestinationClient { status: 400, .. })
        ));
        assert_eq!(outcomes[2].as_ref().unwrap().external_id, None);
    }

    #[test]
    fn entry_count_mismatch_fails_all_retryably() {
        let a = resource("c1", None);
        let b = resource("c2", None);
        let outcomes = bundle_outcomes(
            &response(json!({"entry": [{"response": {"status": "201 Created"}}]})),
            &[&a, &b],
        );
        assert_eq!(outcomes.len(), 2);
        for outcome in outcomes {
            let err = outcome.unwrap_err();
            assert!(err.is_retryable());
            assert!(err.to_string().contains("1 entries, expected 2"));
        }
    }

    #[test]
    fn unparseable_body_fails_all_retryably() {
        let a = resource("c1", None);
        let outcomes = bundle_outcomes(
            &DestinationResponse {
                status: 200,
                body: "<html>ok</html>".into(),
            },
            &[&a],
        );
        assert!(outcomes[0].as_ref().unwrap_err().is_retryable());
    }

    #[test]
    fn entry_without_status_is_retryable() {
        let a = resource("c1", None);
        let outcomes = bundle_outcomes(&response(json!({"entry": [{"response": {}}]})), &[&a]);
        assert!(outcomes[0].as_ref().unwrap_err().is_retryable());
    }
}
