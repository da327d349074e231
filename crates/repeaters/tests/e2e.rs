// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests driving the `repeaters` binary.
//!
//! Each test writes a config pointing at a temp SQLite database and runs the
//! CLI as a subprocess against a wiremock destination.

use std::path::{Path, PathBuf};
use std::process::Output;

use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::process::Command;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Env {
    dir: TempDir,
    config: PathBuf,
}

impl Env {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("repeaters.db");
        let config = dir.path().join("repeaters.toml");
        std::fs::write(
            &config,
            format!(
                "[storage]\ndatabase_path = \"{}\"\n\n[logging]\nlevel = \"warn\"\n",
                db.display()
            ),
        )
        .unwrap();
        Self { dir, config }
    }

    fn write_json(&self, name: &str, value: &Value) -> PathBuf {
        let file = self.dir.path().join(name);
        std::fs::write(&file, serde_json::to_vec_pretty(value).unwrap()).unwrap();
        file
    }

    async fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_repeaters"))
            .arg("--config")
            .arg(&self.config)
            .args(args)
            .output()
            .await
            .unwrap()
    }

    async fn run_ok(&self, args: &[&str]) -> String {
        let output = self.run(args).await;
        assert!(
            output.status.success(),
            "repeaters {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8(output.stdout).unwrap()
    }

    async fn run_json(&self, args: &[&str]) -> Value {
        serde_json::from_str(&self.run_ok(args).await).unwrap()
    }
}

fn case_repeater(url: &str) -> Value {
    json!({
        "id": "r1",
        "domain": "demo",
        "name": "case forwarder",
        "kind": { "type": "case" },
        "connection": { "url": url, "timeout_secs": 5 }
    })
}

fn case_payload(id: &str) -> Value {
    json!({
        "id": id,
        "domain": "demo",
        "payload_type": "case",
        "doc_type": "person",
        "body": { "case_id": id, "properties": { "first_name": "Ada" } }
    })
}

fn path_str(p: &Path) -> &str {
    p.to_str().unwrap()
}

#[tokio::test]
async fn registered_payload_is_delivered_by_process_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/cases"))
        .respond_with(ResponseTemplate::new(201))
        .expect(2)
        .mount(&server)
        .await;

    let env = Env::new();
    let repeater = env.write_json("repeater.json", &case_repeater(&format!("{}/cases", server.uri())));
    assert_eq!(env.run_ok(&["repeaters", "add", path_str(&repeater)]).await.trim(), "r1");

    let payloads = env.write_json("payloads.json", &json!([case_payload("c1"), case_payload("c2")]));
    env.run_ok(&["payloads", "put", path_str(&payloads), "--register"])
        .await;

    let report = env.run_json(&["process-once", "--json"]).await;
    assert_eq!(report["selected"], 2);
    assert_eq!(report["succeeded"], 2);
    assert_eq!(report["full_page"], false);

    let status = env.run_json(&["status", "--json"]).await;
    assert_eq!(status["total"]["success"], 2);
    assert_eq!(status["total"]["pending"], 0);

    let again = env.run_json(&["process-once", "--json"]).await;
    assert_eq!(again["selected"], 0);
}

#[tokio::test]
async fn server_error_leaves_record_failed_and_retry_makes_it_due() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let env = Env::new();
    let repeater = env.write_json("repeater.json", &case_repeater(&server.uri()));
    env.run_ok(&["repeaters", "add", path_str(&repeater)]).await;
    let payload = env.write_json("payload.json", &case_payload("c1"));
    env.run_ok(&["payloads", "put", path_str(&payload), "--register"])
        .await;

    let report = env.run_json(&["process-once", "--json"]).await;
    assert_eq!(report["failed"], 1);

    let records = env
        .run_json(&["records", "list", "--state", "FAILURE", "--json"])
        .await;
    let id = records[0]["id"].as_str().unwrap().to_string();

    // Backoff pushed the record into the future, so nothing is due.
    let idle = env.run_json(&["process-once", "--json"]).await;
    assert_eq!(idle["selected"], 0);

    env.run_ok(&["records", "retry", &id]).await;
    let retried = env.run_json(&["process-once", "--json"]).await;
    assert_eq!(retried["selected"], 1);

    let attempts = env.run_json(&["records", "attempts", &id, "--json"]).await;
    assert_eq!(attempts["attempts"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn cancel_of_terminal_record_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let env = Env::new();
    let repeater = env.write_json("repeater.json", &case_repeater(&server.uri()));
    env.run_ok(&["repeaters", "add", path_str(&repeater)]).await;
    let payload = env.write_json("payload.json", &case_payload("c1"));
    env.run_ok(&["payloads", "put", path_str(&payload), "--register"])
        .await;
    env.run_ok(&["process-once"]).await;

    let records = env
        .run_json(&["records", "list", "--state", "SUCCESS", "--json"])
        .await;
    let id = records[0]["id"].as_str().unwrap().to_string();

    let output = env.run(&["records", "cancel", &id]).await;
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("cannot cancel"));
}

#[tokio::test]
async fn invalid_config_exits_with_code_two() {
    let env = Env::new();
    std::fs::write(&env.config, "[scheduler]\npage_size = 0\nbogus = 1\n").unwrap();
    let output = env.run(&["status"]).await;
    assert_eq!(output.status.code(), Some(2));
}
