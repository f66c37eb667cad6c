use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|err| panic!("clock should be >= UNIX_EPOCH: {err}"))
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{now}"));
    fs::create_dir_all(&dir)
        .unwrap_or_else(|err| panic!("failed to create temp dir {}: {err}", dir.display()));
    dir
}

fn run_mrr<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_mrr"))
        .args(args)
        .output()
        .unwrap_or_else(|err| panic!("failed to execute mrr binary: {err}"))
}

fn run_json<I, S>(args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_mrr(args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "mrr command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status, stdout, stderr
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

fn write_fixture(dir: &Path, name: &str, value: &Value) -> PathBuf {
    let path = dir.join(name);
    let body = serde_json::to_string_pretty(value)
        .unwrap_or_else(|err| panic!("fixture should serialize: {err}"));
    fs::write(&path, body)
        .unwrap_or_else(|err| panic!("failed to write fixture {}: {err}", path.display()));
    path
}

fn pointer<'a>(value: &'a Value, path: &str) -> &'a Value {
    value.pointer(path).unwrap_or_else(|| panic!("missing `{path}` in payload: {value}"))
}

fn pointer_str<'a>(value: &'a Value, path: &str) -> &'a str {
    pointer(value, path)
        .as_str()
        .unwrap_or_else(|| panic!("`{path}` is not a string in payload: {value}"))
}

fn explain(subcommand: &str, mail: &Path, viewer: &str) -> Value {
    run_json([subcommand, "--mail", path_str(mail), "--viewer", viewer])
}

fn sent_mail() -> Value {
    serde_json::json!({
        "id": 12,
        "phid": "PHID-MTAM-cli",
        "status": "sent",
        "subject": "[Diffusion] rREPO1234: Update README",
        "body": "A commit was pushed.",
        "from": "PHID-USER-pusher",
        "to": ["PHID-USER-R1"],
        "cc": [],
        "date_created": "2023-11-14T22:13:20Z",
        "delivered_headers": [["X-Mail-Sent-This-Message", "Yes"], ["Precedence", "bulk"]],
        "deliveredActors": {
            "R1": { "deliverable": true, "reasons": [] }
        },
        "deliveredRoutingMap": {
            "R1": { "rule": "route.mail", "reason": "PHID-HRUL-personal" }
        },
        "deliveredRoutingRules": [
            { "routingRule": "route.notification", "phids": null, "reasonPHID": "PHID-HRUL-global" },
            { "routingRule": "route.mail", "phids": ["R1"], "reasonPHID": "PHID-HRUL-personal" },
            { "routingRule": "route.mail", "phids": ["R2"], "reasonPHID": "PHID-HRUL-other" }
        ]
    })
}

#[test]
fn queued_mail_reports_pending_delivery_and_uncomputed_routing() {
    let dir = unique_temp_dir("mrr-queued");
    let mail = write_fixture(
        &dir,
        "queued.json",
        &serde_json::json!({
            "id": 1,
            "phid": "PHID-MTAM-queued",
            "status": "queued",
            "date_created": "2023-11-14T22:13:20Z"
        }),
    );

    let delivery = explain("delivery", &mail, "R1");
    assert_eq!(pointer_str(&delivery, "/contract_version"), "cli.v1");
    assert_eq!(pointer_str(&delivery, "/data/status"), "not_yet_delivered");
    assert_eq!(pointer(&delivery, "/data/reasons"), &serde_json::json!([]));

    let routing = explain("routing", &mail, "R1");
    assert_eq!(pointer_str(&routing, "/data/effective/outcome"), "not_computed");
    assert_eq!(pointer(&routing, "/data/candidates"), &serde_json::json!([]));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn delivered_mail_substitutes_reason_none() {
    let dir = unique_temp_dir("mrr-delivered");
    let mail = write_fixture(&dir, "sent.json", &sent_mail());

    let delivery = explain("delivery", &mail, "R1");

    assert_eq!(pointer_str(&delivery, "/data/status"), "delivered");
    assert_eq!(pointer_str(&delivery, "/data/reasons/0/code"), "none");
    assert_eq!(pointer(&delivery, "/data/reasons/0/is_positive"), &Value::Bool(true));
    assert!(delivery.pointer("/data/reasons/1").is_none());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn routing_lists_unscoped_rules_before_personal_ones() {
    let dir = unique_temp_dir("mrr-routing");
    let mail = write_fixture(&dir, "sent.json", &sent_mail());

    let routing = explain("routing", &mail, "R1");

    assert_eq!(pointer_str(&routing, "/data/effective/outcome"), "applied");
    assert_eq!(pointer_str(&routing, "/data/effective/matched_key"), "R1");
    assert_eq!(
        pointer_str(&routing, "/data/summary"),
        "This message was routed as an email because it matched PHID-HRUL-personal."
    );
    assert_eq!(pointer_str(&routing, "/data/candidates/0/kind"), "Global");
    assert_eq!(pointer_str(&routing, "/data/candidates/0/reason_phid"), "PHID-HRUL-global");
    assert_eq!(pointer_str(&routing, "/data/candidates/1/kind"), "Personal");
    assert_eq!(pointer_str(&routing, "/data/candidates/1/reason_phid"), "PHID-HRUL-personal");
    assert!(routing.pointer("/data/candidates/2").is_none());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn viewer_outside_every_scope_gets_no_candidates_and_no_rule() {
    let dir = unique_temp_dir("mrr-unscoped");
    let mut fixture = sent_mail();
    fixture["deliveredRoutingRules"] = serde_json::json!([
        { "routingRule": "route.mail", "phids": ["R2"], "reasonPHID": "PHID-HRUL-other" }
    ]);
    let mail = write_fixture(&dir, "sent.json", &fixture);

    let routing = explain("routing", &mail, "R9");
    assert_eq!(pointer_str(&routing, "/data/effective/outcome"), "no_rule_applied");
    assert_eq!(pointer(&routing, "/data/candidates"), &serde_json::json!([]));

    let delivery = explain("delivery", &mail, "R9");
    assert_eq!(pointer_str(&delivery, "/data/status"), "not_addressed_to_recipient");

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn inspect_combines_sections_and_sorts_headers() {
    let dir = unique_temp_dir("mrr-inspect");
    let mail = write_fixture(&dir, "sent.json", &sent_mail());

    let inspection = explain("inspect", &mail, "R1");

    assert_eq!(pointer_str(&inspection, "/data/title"), "[Diffusion] rREPO1234: Update README");
    assert_eq!(pointer_str(&inspection, "/data/status/name"), "Sent");
    assert_eq!(pointer_str(&inspection, "/data/headers/headers/0/0"), "Precedence");
    assert_eq!(pointer_str(&inspection, "/data/delivery/status"), "delivered");
    assert_eq!(pointer_str(&inspection, "/data/metadata/message_phid"), "PHID-MTAM-cli");
    assert!(pointer_str(&inspection, "/report_id").starts_with("rpt_"));

    let again = explain("inspect", &mail, "R1");
    assert_eq!(inspection, again);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn registry_lists_rule_strengths() {
    let registry = run_json(["registry"]);

    assert_eq!(pointer_str(&registry, "/rules/0/code"), "route.notification");
    assert_eq!(pointer(&registry, "/rules/0/strength"), &serde_json::json!(1));
    assert_eq!(pointer(&registry, "/rules/1/strength"), &serde_json::json!(2));
    assert_eq!(pointer_str(&registry, "/api_contract_version"), "api.v1");
}

#[test]
fn missing_snapshot_and_blank_viewer_fail() {
    let dir = unique_temp_dir("mrr-errors");

    let missing = run_mrr([
        "delivery",
        "--mail",
        path_str(&dir.join("absent.json")),
        "--viewer",
        "R1",
    ]);
    assert!(!missing.status.success());
    assert!(String::from_utf8_lossy(&missing.stderr).contains("failed to read mail snapshot"));

    let mail = write_fixture(&dir, "sent.json", &sent_mail());
    let blank = run_mrr(["routing", "--mail", path_str(&mail), "--viewer", " "]);
    assert!(!blank.status.success());
    assert!(String::from_utf8_lossy(&blank.stderr).contains("viewer MUST be provided"));

    let _ = fs::remove_dir_all(&dir);
}
