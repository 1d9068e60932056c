use assert_cmd::Command;
use osintrust::domain_scan::DomainReport;
use osintrust::vuln_heuristics::{Finding, Severity};
use predicates::prelude::*;
use predicates::str::contains;

fn cmd() -> Command {
    let mut cmd = Command::cargo_bin("osintrust").unwrap();
    cmd.arg("--no-banner");
    cmd
}

#[test]
fn help_lists_every_tool() {
    let output = cmd().arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for tool in ["domain", "footprint", "shorten", "loadtest", "crawl", "chat"] {
        assert!(stdout.contains(tool), "missing {} in help", tool);
    }
}

#[test]
fn banner_is_printed_by_default() {
    Command::cargo_bin("osintrust")
        .unwrap()
        .args(["crawl", "--list-plugins"])
        .assert()
        .success()
        .stdout(contains("OSINT & Network Testing Toolkit"));
}

#[test]
fn crawl_lists_plugins() {
    cmd()
        .args(["crawl", "--list-plugins"])
        .assert()
        .success()
        .stdout(contains("bitcoin").and(contains("secrets")));
}

#[test]
fn crawl_rejects_unknown_plugin() {
    cmd()
        .args(["crawl", "http://127.0.0.1:9/", "--plugin", "emails,exec"])
        .assert()
        .failure()
        .stderr(contains("Unknown plugin 'exec'"));
}

#[test]
fn domain_rejects_bad_ports() {
    let dir = tempfile::tempdir().unwrap();
    cmd()
        .args(["domain", "example.com", "--ports", "80,abc", "--output"])
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(contains("abc"));
}

#[test]
fn domain_rejects_unknown_stage() {
    cmd().args(["domain", "example.com", "--skip", "exploit"]).assert().failure();
}

#[test]
fn footprint_lists_filtered_platforms() {
    cmd()
        .args(["footprint", "--list-platforms", "--platforms-only", "github"])
        .assert()
        .success()
        .stdout(contains("github").and(contains("1 platform")));
}

#[test]
fn footprint_rejects_unknown_platform() {
    cmd()
        .args(["footprint", "alice", "--platforms-only", "myspace-classic"])
        .assert()
        .failure()
        .stderr(contains("Unknown platform"));
}

#[test]
fn footprint_history_on_empty_db() {
    let dir = tempfile::tempdir().unwrap();
    cmd()
        .args(["footprint", "--history", "nobody", "--db"])
        .arg(dir.path().join("fp.db"))
        .assert()
        .success()
        .stdout(contains("No history for nobody"));
}

#[test]
fn footprint_requires_a_username() {
    cmd().arg("footprint").assert().failure();
}

#[test]
fn shorten_rejects_non_http_urls() {
    cmd()
        .args(["shorten", "ftp://example.com/file"])
        .assert()
        .failure()
        .stderr(contains("Unsupported URL scheme"));
}

#[test]
fn loadtest_validates_mode_and_headers() {
    cmd()
        .args(["loadtest", "http://127.0.0.1:9/", "--ws", "--duration", "1"])
        .assert()
        .failure()
        .stderr(contains("WebSocket mode needs a ws(s) URL"));

    cmd()
        .args(["loadtest", "http://127.0.0.1:9/", "-H", "no-colon-here"])
        .assert()
        .failure()
        .stderr(contains("Name: value"));
}

#[test]
fn chat_rejects_single_peer_rooms() {
    cmd()
        .args(["chat", "--max-peers", "1"])
        .assert()
        .failure()
        .stderr(contains("--max-peers"));
}

#[test]
fn regen_report_rebuilds_csv_and_html() {
    let dir = tempfile::tempdir().unwrap();
    let mut report = DomainReport::new("example.com", "scan-1");
    report.vulnerabilities.push(Finding {
        id: "missing-csp".into(),
        title: "Content-Security-Policy header missing".into(),
        severity: Severity::Medium,
        evidence: "no content-security-policy header".into(),
    });
    std::fs::write(dir.path().join("report.json"), serde_json::to_string(&report).unwrap()).unwrap();

    Command::cargo_bin("regen_report")
        .unwrap()
        .arg(dir.path())
        .assert()
        .success()
        .stdout(contains("example.com"));

    let csv = std::fs::read_to_string(dir.path().join("report.csv")).unwrap();
    assert!(csv.contains("medium:missing-csp"));
    let html = std::fs::read_to_string(dir.path().join("report.html")).unwrap();
    assert!(html.contains("Content-Security-Policy header missing"));
}

#[test]
fn regen_report_missing_input() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("regen_report")
        .unwrap()
        .arg(dir.path().join("nothing.json"))
        .assert()
        .failure()
        .stderr(contains("Report not found"));
}
