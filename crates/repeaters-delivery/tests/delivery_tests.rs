// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end delivery tests against mock destinations.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{TimeDelta, Utc};
use repeaters_config::model::HttpConfig;
use repeaters_core::{ErrorKind, RecordState, RecordStore, Repeater, RepeatRecord};
use repeaters_delivery::{
    DestinationClient, Dispatcher, DispatcherSettings, RetryPolicy, Worker, register_payload,
};
use repeaters_test_utils::{FlakySelectStore, MockWriteBack, TestHarness, fixtures};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn policy() -> RetryPolicy {
    RetryPolicy {
        base_interval: Duration::from_secs(60),
        max_interval: Duration::from_secs(3600),
        max_attempts: 6,
        max_age: Duration::from_secs(7 * 24 * 3600),
    }
}

fn worker_with(harness: &TestHarness, write_back: Arc<MockWriteBack>, policy: RetryPolicy) -> Worker {
    Worker::new(
        harness.storage.clone(),
        harness.storage.clone(),
        write_back,
        DestinationClient::new(&HttpConfig::default()).unwrap(),
        policy,
    )
}

fn worker(harness: &TestHarness) -> Worker {
    worker_with(harness, Arc::new(MockWriteBack::new()), policy())
}

fn dispatcher(harness: &TestHarness, worker: Worker) -> Dispatcher {
    Dispatcher::new(
        harness.storage.clone(),
        worker,
        DispatcherSettings {
            poll_interval: Duration::from_millis(50),
            ..DispatcherSettings::default()
        },
    )
}

/// Seed `count` payloads for `repeater`, registered one second apart so
/// selection order is deterministic.
async fn seed(
    harness: &TestHarness,
    repeater: &Repeater,
    payloads: Vec<repeaters_core::Payload>,
) -> Vec<RepeatRecord> {
    let start = Utc::now() - TimeDelta::seconds(payloads.len() as i64 + 1);
    let mut records = Vec::new();
    for (i, payload) in payloads.iter().enumerate() {
        harness.add_payload(payload).await.unwrap();
        let at = start + TimeDelta::seconds(i as i64);
        records.push(harness.enqueue_at(repeater, payload, at).await.unwrap());
    }
    records
}

#[tokio::test]
async fn case_record_is_delivered() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/cases"))
        .and(header("content-type", "application/json"))
        .and(body_partial_json(json!({"case_id": "c1", "domain": "demo"})))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let harness = TestHarness::new().await.unwrap();
    let repeater = harness
        .add_repeater(fixtures::case_repeater("r1", &format!("{}/cases", server.uri())))
        .await
        .unwrap();
    let records = seed(&harness, &repeater, vec![fixtures::person_case("c1")]).await;

    let report = dispatcher(&harness, worker(&harness)).poll_once().await.unwrap();
    assert_eq!(report.selected, 1);
    assert_eq!(report.records.succeeded, 1);
    assert!(!report.full_page);

    let record = harness.record(&records[0].id).await.unwrap();
    assert_eq!(record.state, RecordState::Success);
    assert_eq!(record.next_check, None);
    let attempts = harness.attempts(&record.id).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].state, RecordState::Success);
    assert_eq!(attempts[0].message, "201 Created");
}

#[tokio::test]
async fn missing_payload_cancels_on_first_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let harness = TestHarness::new().await.unwrap();
    let repeater = harness
        .add_repeater(fixtures::case_repeater("r1", &server.uri()))
        .await
        .unwrap();
    let record = harness
        .enqueue(&repeater, &fixtures::person_case("gone"))
        .await
        .unwrap();

    dispatcher(&harness, worker(&harness)).poll_once().await.unwrap();

    let record = harness.record(&record.id).await.unwrap();
    assert_eq!(record.state, RecordState::Cancelled);
    let attempts = harness.attempts(&record.id).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].error_kind, Some(ErrorKind::PayloadMissing));
}

#[tokio::test]
async fn server_errors_back_off_exponentially() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let harness = TestHarness::new().await.unwrap();
    let repeater = harness
        .add_repeater(fixtures::case_repeater("r1", &server.uri()))
        .await
        .unwrap();
    let records = seed(&harness, &repeater, vec![fixtures::person_case("c1")]).await;
    let id = &records[0].id;
    let dispatcher = dispatcher(&harness, worker(&harness));

    dispatcher.poll_once().await.unwrap();
    let record = harness.record(id).await.unwrap();
    assert_eq!(record.state, RecordState::Failure);
    let attempts = harness.attempts(id).await.unwrap();
    assert_eq!(attempts[0].error_kind, Some(ErrorKind::DestinationServerError));
    assert_eq!(
        record.next_check.unwrap() - attempts[0].attempted_at,
        TimeDelta::seconds(60)
    );

    // Not due yet: nothing selected, nothing attempted.
    let report = dispatcher.poll_once().await.unwrap();
    assert_eq!(report.selected, 0);

    harness.storage.retry_now(id, Utc::now()).await.unwrap();
    dispatcher.poll_once().await.unwrap();
    let record = harness.record(id).await.unwrap();
    let attempts = harness.attempts(id).await.unwrap();
    assert_eq!(attempts.len(), 2);
    assert_eq!(
        record.next_check.unwrap() - attempts[1].attempted_at,
        TimeDelta::seconds(120)
    );
}

#[tokio::test]
async fn client_errors_cancel() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad case"))
        .expect(1)
        .mount(&server)
        .await;

    let harness = TestHarness::new().await.unwrap();
    let repeater = harness
        .add_repeater(fixtures::case_repeater("r1", &server.uri()))
        .await
        .unwrap();
    let records = seed(&harness, &repeater, vec![fixtures::person_case("c1")]).await;

    dispatcher(&harness, worker(&harness)).poll_once().await.unwrap();
    let record = harness.record(&records[0].id).await.unwrap();
    assert_eq!(record.state, RecordState::Cancelled);
    assert!(record.failure_reason.unwrap().contains("bad case"));
    let attempts = harness.attempts(&records[0].id).await.unwrap();
    assert_eq!(attempts[0].error_kind, Some(ErrorKind::DestinationClientError));
}

#[tokio::test]
async fn retry_budget_and_age_limits_cancel() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let harness = TestHarness::new().await.unwrap();
    let repeater = harness
        .add_repeater(fixtures::case_repeater("r1", &server.uri()))
        .await
        .unwrap();
    let payload = fixtures::person_case("c1");
    harness.add_payload(&payload).await.unwrap();
    let old = harness
        .enqueue_at(&repeater, &payload, Utc::now() - TimeDelta::days(8))
        .await
        .unwrap();

    dispatcher(&harness, worker(&harness)).poll_once().await.unwrap();
    let record = harness.record(&old.id).await.unwrap();
    assert_eq!(record.state, RecordState::Cancelled);
    assert!(record.failure_reason.unwrap().contains("maximum age exceeded"));

    let fresh = harness.enqueue(&repeater, &payload).await.unwrap();
    let single_shot = RetryPolicy {
        max_attempts: 1,
        ..policy()
    };
    let w = worker_with(&harness, Arc::new(MockWriteBack::new()), single_shot);
    dispatcher(&harness, w).poll_once().await.unwrap();
    let record = harness.record(&fresh.id).await.unwrap();
    assert_eq!(record.state, RecordState::Cancelled);
    assert!(record.failure_reason.unwrap().contains("giving up after 1 attempts"));
}

#[tokio::test]
async fn retryable_failure_short_circuits_the_batch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&server)
        .await;

    let harness = TestHarness::new().await.unwrap();
    let repeater = harness
        .add_repeater(fixtures::case_repeater("r1", &server.uri()))
        .await
        .unwrap();
    let records = seed(
        &harness,
        &repeater,
        vec![
            fixtures::person_case("c1"),
            fixtures::person_case("c2"),
            fixtures::person_case("c3"),
        ],
    )
    .await;

    let report = dispatcher(&harness, worker(&harness)).poll_once().await.unwrap();
    assert!(report.records.short_circuited);
    assert_eq!(report.records.failed, 1);
    assert_eq!(report.records.deferred, 2);

    assert_eq!(
        harness.record(&records[0].id).await.unwrap().state,
        RecordState::Failure
    );
    for record in &records[1..] {
        let stored = harness.record(&record.id).await.unwrap();
        assert_eq!(stored.state, RecordState::Pending);
        assert_eq!(
            stored.next_check.map(|t| t.timestamp_millis()),
            record.next_check.map(|t| t.timestamp_millis())
        );
        assert!(harness.attempts(&record.id).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn non_retryable_failures_do_not_stop_the_batch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let harness = TestHarness::new().await.unwrap();
    let repeater = harness
        .add_repeater(fixtures::case_repeater("r1", &server.uri()))
        .await
        .unwrap();
    let missing = harness
        .enqueue_at(
            &repeater,
            &fixtures::person_case("missing"),
            Utc::now() - TimeDelta::seconds(10),
        )
        .await
        .unwrap();
    let present = seed(&harness, &repeater, vec![fixtures::person_case("c2")]).await;

    let report = dispatcher(&harness, worker(&harness)).poll_once().await.unwrap();
    assert_eq!(report.records.cancelled, 1);
    assert_eq!(report.records.succeeded, 1);
    assert_eq!(
        harness.record(&missing.id).await.unwrap().state,
        RecordState::Cancelled
    );
    assert_eq!(
        harness.record(&present[0].id).await.unwrap().state,
        RecordState::Success
    );
}

#[tokio::test]
async fn racing_workers_send_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(100)))
        .expect(1)
        .mount(&server)
        .await;

    let harness = TestHarness::new().await.unwrap();
    let repeater = harness
        .add_repeater(fixtures::case_repeater("r1", &server.uri()))
        .await
        .unwrap();
    let records = seed(&harness, &repeater, vec![fixtures::person_case("c1")]).await;

    let a = worker(&harness).with_worker_id("a");
    let b = worker(&harness).with_worker_id("b");
    let (ra, rb) = tokio::join!(
        a.process_batch(&repeater, records.clone()),
        b.process_batch(&repeater, records.clone()),
    );
    let (ra, rb) = (ra.unwrap(), rb.unwrap());
    assert_eq!(ra.attempts() + rb.attempts(), 1);
    assert_eq!(ra.skipped + rb.skipped, 1);
    assert_eq!(harness.attempts(&records[0].id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn success_is_never_reselected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let harness = TestHarness::new().await.unwrap();
    let repeater = harness
        .add_repeater(fixtures::case_repeater("r1", &server.uri()))
        .await
        .unwrap();
    let records = seed(&harness, &repeater, vec![fixtures::person_case("c1")]).await;
    let w = worker(&harness);

    w.process_batch(&repeater, records.clone()).await.unwrap();
    // A stale view of the record must not produce a second pass.
    let report = w.process_batch(&repeater, records.clone()).await.unwrap();
    assert_eq!(report.attempts(), 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(
        harness.record(&records[0].id).await.unwrap().state,
        RecordState::Success
    );
    assert_eq!(harness.attempts(&records[0].id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn form_xml_is_forwarded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("content-type", "application/xml"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let harness = TestHarness::new().await.unwrap();
    let repeater = harness
        .add_repeater(fixtures::form_repeater("r1", &server.uri()))
        .await
        .unwrap();
    let records = seed(&harness, &repeater, vec![fixtures::form("f1")]).await;

    dispatcher(&harness, worker(&harness)).poll_once().await.unwrap();
    assert_eq!(
        harness.record(&records[0].id).await.unwrap().state,
        RecordState::Success
    );
}

#[tokio::test]
async fn dhis2_posts_data_value_sets() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/dhis/api/dataValueSets"))
        .and(body_partial_json(json!({
            "dataSet": "pBOMPrpg1QX",
            "period": "202604",
            "dataValues": [{"dataElement": "f7n9E0hX8qk", "value": "3"}]
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let harness = TestHarness::new().await.unwrap();
    let repeater = harness
        .add_repeater(fixtures::dhis2_repeater("r1", &format!("{}/dhis", server.uri())))
        .await
        .unwrap();
    let records = seed(&harness, &repeater, vec![fixtures::form("f1")]).await;

    dispatcher(&harness, worker(&harness)).poll_once().await.unwrap();
    assert_eq!(
        harness.record(&records[0].id).await.unwrap().state,
        RecordState::Success
    );
}

#[tokio::test]
async fn register_payload_targets_accepting_repeaters() {
    let harness = TestHarness::new().await.unwrap();
    let case = harness
        .add_repeater(fixtures::case_repeater("case", "http://localhost"))
        .await
        .unwrap();
    harness
        .add_repeater(fixtures::form_repeater("form", "http://localhost"))
        .await
        .unwrap();
    let mut filtered = fixtures::case_repeater("filtered", "http://localhost");
    filtered.payload_filter = vec!["household".into()];
    harness.add_repeater(filtered).await.unwrap();

    let created = register_payload(
        harness.storage.as_ref(),
        "demo",
        "c1",
        repeaters_core::PayloadType::Case,
        Some("person"),
        Utc::now(),
    )
    .await
    .unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].repeater_id, case.id);
    assert_eq!(created[0].state, RecordState::Pending);
}

#[tokio::test]
async fn run_drains_and_stops_on_cancel() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let harness = TestHarness::new().await.unwrap();
    let repeater = harness
        .add_repeater(fixtures::case_repeater("r1", &server.uri()))
        .await
        .unwrap();
    let records = seed(&harness, &repeater, vec![fixtures::person_case("c1")]).await;

    let dispatcher = Arc::new(dispatcher(&harness, worker(&harness)));
    let cancel = CancellationToken::new();
    let handle = tokio::spawn({
        let dispatcher = Arc::clone(&dispatcher);
        let cancel = cancel.clone();
        async move { dispatcher.run(cancel).await }
    });

    let mut delivered = false;
    for _ in 0..100 {
        if harness.record(&records[0].id).await.unwrap().state == RecordState::Success {
            delivered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(delivered);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}

fn paged_dispatcher(harness: &TestHarness, page_size: u32, poll_interval: Duration) -> Dispatcher {
    Dispatcher::new(
        harness.storage.clone(),
        worker(harness),
        DispatcherSettings {
            poll_interval,
            page_size,
            ..DispatcherSettings::default()
        },
    )
}

#[tokio::test]
async fn short_circuited_repeater_sits_out_the_next_poll() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let harness = TestHarness::new().await.unwrap();
    let repeater = harness
        .add_repeater(fixtures::case_repeater("r1", &server.uri()))
        .await
        .unwrap();
    let cases = (0..6).map(|i| fixtures::person_case(&format!("c{i}"))).collect();
    seed(&harness, &repeater, cases).await;

    let dispatcher = paged_dispatcher(&harness, 3, Duration::from_secs(60));
    let first = dispatcher.poll_once().await.unwrap();
    assert!(first.full_page);
    assert_eq!(first.records.failed, 1);
    assert_eq!(first.records.deferred, 2);
    assert_eq!(first.paused_repeaters, ["r1"]);

    let second = dispatcher.poll_once().await.unwrap();
    assert_eq!(second.selected, 0);
    assert_eq!(second.records.attempts(), 0);
}

#[tokio::test]
async fn run_does_not_repoll_a_short_circuited_repeater() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let harness = TestHarness::new().await.unwrap();
    let repeater = harness
        .add_repeater(fixtures::case_repeater("r1", &server.uri()))
        .await
        .unwrap();
    let cases = (0..6).map(|i| fixtures::person_case(&format!("c{i}"))).collect();
    let records = seed(&harness, &repeater, cases).await;

    let dispatcher = Arc::new(paged_dispatcher(&harness, 3, Duration::from_secs(60)));
    let cancel = CancellationToken::new();
    let handle = tokio::spawn({
        let dispatcher = Arc::clone(&dispatcher);
        let cancel = cancel.clone();
        async move { dispatcher.run(cancel).await }
    });

    tokio::time::sleep(Duration::from_millis(1500)).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(server.received_requests().await.unwrap().len(), 1);
    let mut attempts = 0;
    for record in &records {
        attempts += harness.attempts(&record.id).await.unwrap().len();
    }
    assert_eq!(attempts, 1);
}

#[test]
fn failed_selection_is_retried_after_the_retry_delay() {
    let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    metrics::with_local_recorder(&recorder, || {
        runtime.block_on(async {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(201))
                .expect(1)
                .mount(&server)
                .await;

            let harness = TestHarness::new().await.unwrap();
            let repeater = harness
                .add_repeater(fixtures::case_repeater("r1", &server.uri()))
                .await
                .unwrap();
            let records = seed(&harness, &repeater, vec![fixtures::person_case("c1")]).await;

            let store = Arc::new(FlakySelectStore::new(harness.storage.clone(), 2));
            let retry_delay = Duration::from_millis(200);
            let dispatcher = Arc::new(Dispatcher::new(
                store.clone(),
                worker(&harness),
                DispatcherSettings {
                    poll_interval: Duration::from_secs(60),
                    selection_retry_delay: retry_delay,
                    ..DispatcherSettings::default()
                },
            ));
            let cancel = CancellationToken::new();
            let started = Instant::now();
            let run = tokio::spawn({
                let dispatcher = Arc::clone(&dispatcher);
                let cancel = cancel.clone();
                async move { dispatcher.run(cancel).await }
            });

            tokio::time::sleep(retry_delay / 2).await;
            assert_eq!(store.select_calls(), 1);
            assert!(harness.attempts(&records[0].id).await.unwrap().is_empty());
            assert_eq!(
                harness.record(&records[0].id).await.unwrap().state,
                RecordState::Pending
            );

            let mut delivered_after = None;
            for _ in 0..100 {
                if harness.record(&records[0].id).await.unwrap().state == RecordState::Success {
                    delivered_after = Some(started.elapsed());
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            cancel.cancel();
            run.await.unwrap();

            let delivered_after = delivered_after.unwrap();
            assert!(delivered_after >= retry_delay * 2);
            assert_eq!(store.select_calls(), 3);
            assert_eq!(harness.attempts(&records[0].id).await.unwrap().len(), 1);
        });
    });

    assert!(handle.render().contains("repeaters_selection_errors_total 2"));
}
