// vuln_heuristics.rs - Passive vulnerability heuristics
// Purpose: Vulns stage of the domain scan. Derive findings from what the
//          earlier stages collected; nothing here sends a request

use crate::dir_bruteforce::DirEntry;
use crate::dns_recon::DnsReport;
use crate::port_scanner::{OpenPort, RISKY_PORTS};
use crate::tls_inspector::CertificateInfo;
use crate::web_probe::HttpProbe;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

lazy_static! {
    static ref VERSION_RE: Regex = Regex::new(r"\d+\.\d+").unwrap();
}

/// Days before expiry at which a certificate is reported
pub const CERT_EXPIRY_WARNING_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    pub id: String,
    pub title: String,
    pub severity: Severity,
    pub evidence: String,
}

impl Finding {
    fn new(id: &str, title: impl Into<String>, severity: Severity, evidence: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            title: title.into(),
            severity,
            evidence: evidence.into(),
        }
    }
}

/// Everything the earlier stages produced, borrowed
#[derive(Default)]
pub struct ScanEvidence<'a> {
    pub http: Option<&'a HttpProbe>,
    pub dns: Option<&'a DnsReport>,
    pub ssl: Option<&'a CertificateInfo>,
    pub ports: &'a [OpenPort],
    pub directories: &'a [DirEntry],
}

/// Sensitive file paths with the content marker kind that confirms them
const SENSITIVE_FILES: &[(&str, &str, Severity)] = &[
    ("/.git/config", "git_config", Severity::High),
    ("/.git/HEAD", "git_head", Severity::High),
    ("/.env", "env_file", Severity::High),
    ("/.env.local", "env_file", Severity::High),
    ("/.env.production", "env_file", Severity::High),
    ("/.htpasswd", "htpasswd", Severity::High),
    ("/backup.sql", "sql_dump", Severity::High),
    ("/dump.sql", "sql_dump", Severity::High),
    ("/database.sql", "sql_dump", Severity::High),
    ("/db.sql", "sql_dump", Severity::High),
    ("/phpinfo.php", "phpinfo", Severity::Medium),
    ("/info.php", "phpinfo", Severity::Medium),
    ("/.DS_Store", "ds_store", Severity::Low),
    ("/server-status", "server_status", Severity::Medium),
    ("/server-info", "server_status", Severity::Medium),
    ("/actuator/env", "spring_env", Severity::High),
];

/// Does the body really look like the sensitive file, not an error page
pub fn validate_sensitive_content(content: &str, kind: &str) -> bool {
    let trimmed = content.trim_start();
    let looks_html = trimmed.starts_with("<!DOCTYPE") || trimmed.starts_with("<!doctype") || trimmed.starts_with("<html");
    if looks_html && !matches!(kind, "phpinfo" | "server_status") {
        return false;
    }

    match kind {
        "git_config" => content.contains("[core]") || content.contains("[remote") || content.contains("repositoryformatversion"),
        "git_head" => {
            let head = content.trim();
            head.starts_with("ref:") || (head.len() == 40 && head.chars().all(|c| c.is_ascii_hexdigit()))
        }
        "env_file" => content.lines().any(|l| {
            let l = l.trim();
            !l.starts_with('#') && l.split_once('=').map(|(k, _)| !k.is_empty() && !k.contains(' ')).unwrap_or(false)
        }),
        "htpasswd" => {
            let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
            !lines.is_empty() && lines.iter().all(|l| l.contains(':'))
        }
        "sql_dump" => content.contains("INSERT INTO") || content.contains("CREATE TABLE") || content.contains("DROP TABLE"),
        "phpinfo" => content.contains("PHP Version") || content.contains("phpinfo()") || content.contains("PHP Credits"),
        "ds_store" => content.contains("Bud1"),
        "server_status" => content.contains("Server Version") || content.contains("Apache Server Status"),
        "spring_env" => content.contains("activeProfiles") || content.contains("propertySources"),
        _ => !content.is_empty(),
    }
}

fn check_security_headers(http: &HttpProbe, findings: &mut Vec<Finding>) {
    let required: &[(&str, &str, Severity)] = &[
        ("content-security-policy", "Missing Content-Security-Policy header", Severity::Medium),
        ("x-frame-options", "Missing X-Frame-Options header", Severity::Low),
        ("x-content-type-options", "Missing X-Content-Type-Options header", Severity::Low),
        ("referrer-policy", "Missing Referrer-Policy header", Severity::Info),
        ("permissions-policy", "Missing Permissions-Policy header", Severity::Info),
    ];

    if http.https && http.header("strict-transport-security").is_none() {
        findings.push(Finding::new(
            "missing-hsts",
            "Missing Strict-Transport-Security header",
            Severity::Medium,
            format!("{} served over HTTPS without HSTS", http.final_url),
        ));
    }

    for (header, title, severity) in required {
        if http.header(header).is_none() {
            findings.push(Finding::new(
                &format!("missing-{}", header),
                *title,
                *severity,
                format!("{} absent on {}", header, http.final_url),
            ));
        }
    }
}

fn check_version_disclosure(http: &HttpProbe, findings: &mut Vec<Finding>) {
    for (header, value) in [("server", &http.server), ("x-powered-by", &http.powered_by)] {
        if let Some(value) = value {
            if VERSION_RE.is_match(value) {
                findings.push(Finding::new(
                    &format!("version-disclosure-{}", header),
                    format!("Software version disclosed in {} header", header),
                    Severity::Low,
                    format!("{}: {}", header, value),
                ));
            }
        }
    }
}

fn check_cookies(http: &HttpProbe, findings: &mut Vec<Finding>) {
    for cookie in &http.cookies {
        let name = cookie.split('=').next().unwrap_or_default().trim().to_string();
        let attrs: Vec<String> = cookie
            .split(';')
            .skip(1)
            .map(|a| a.trim().split('=').next().unwrap_or_default().to_lowercase())
            .collect();

        let mut missing = Vec::new();
        if http.https && !attrs.iter().any(|a| a == "secure") {
            missing.push("Secure");
        }
        if !attrs.iter().any(|a| a == "httponly") {
            missing.push("HttpOnly");
        }
        if !attrs.iter().any(|a| a == "samesite") {
            missing.push("SameSite");
        }

        if !missing.is_empty() {
            let severity = if missing.contains(&"HttpOnly") || missing.contains(&"Secure") {
                Severity::Medium
            } else {
                Severity::Low
            };
            findings.push(Finding::new(
                "insecure-cookie",
                format!("Cookie '{}' missing {}", name, missing.join(", ")),
                severity,
                cookie.clone(),
            ));
        }
    }
}

fn check_cors(http: &HttpProbe, findings: &mut Vec<Finding>) {
    if http.header("access-control-allow-origin").map(str::trim) == Some("*") {
        let with_credentials = http
            .header("access-control-allow-credentials")
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        findings.push(Finding::new(
            "cors-wildcard",
            "Wildcard CORS policy",
            if with_credentials { Severity::High } else { Severity::Medium },
            "Access-Control-Allow-Origin: *",
        ));
    }
}

fn is_directory_listing(body: &str) -> bool {
    body.contains("Index of /") || body.contains("<title>Directory listing for")
}

fn check_directory_listing(evidence: &ScanEvidence<'_>, findings: &mut Vec<Finding>) {
    let mut listed: Vec<&str> = Vec::new();
    if let Some(http) = evidence.http {
        if is_directory_listing(&http.body) {
            listed.push(&http.final_url);
        }
    }
    for entry in evidence.directories {
        if entry.status == 200 && is_directory_listing(&entry.sample) {
            listed.push(&entry.url);
        }
    }
    for url in listed {
        findings.push(Finding::new(
            "directory-listing",
            "Directory listing enabled",
            Severity::Medium,
            url.to_string(),
        ));
    }
}

fn check_sensitive_files(directories: &[DirEntry], findings: &mut Vec<Finding>) {
    for entry in directories.iter().filter(|e| e.status == 200) {
        let Some((path, kind, severity)) = SENSITIVE_FILES.iter().find(|(p, _, _)| *p == entry.path) else {
            continue;
        };
        if validate_sensitive_content(&entry.sample, kind) {
            findings.push(Finding::new(
                "sensitive-file",
                format!("Sensitive file exposed: {}", path),
                *severity,
                format!("{} ({} bytes)", entry.url, entry.size),
            ));
        }
    }
}

fn check_ports(ports: &[OpenPort], findings: &mut Vec<Finding>) {
    for open in ports.iter().filter(|p| RISKY_PORTS.contains(&p.port)) {
        let service = open.service.as_deref().unwrap_or("unknown");
        let severity = match open.port {
            23 | 445 | 3389 | 6379 | 9200 | 11211 | 27017 => Severity::High,
            _ => Severity::Medium,
        };
        findings.push(Finding::new(
            "risky-port",
            format!("Exposed {} service on port {}", service, open.port),
            severity,
            open.banner.clone().unwrap_or_else(|| format!("{}/tcp open", open.port)),
        ));
    }
}

fn check_dns(dns: &DnsReport, findings: &mut Vec<Finding>) {
    for attempt in dns.zone_transfer.iter().filter(|a| a.allowed) {
        findings.push(Finding::new(
            "zone-transfer",
            format!("Zone transfer allowed by {}", attempt.nameserver),
            Severity::High,
            format!("AXFR returned {} records", attempt.answer_count),
        ));
    }
    if dns.spf.is_none() {
        findings.push(Finding::new("missing-spf", "No SPF record", Severity::Low, "no TXT record starting with v=spf1"));
    }
    match &dns.dmarc {
        None => findings.push(Finding::new("missing-dmarc", "No DMARC record", Severity::Low, "no TXT record at _dmarc")),
        Some(record) if record.to_lowercase().replace(' ', "").contains("p=none") => findings.push(Finding::new(
            "weak-dmarc",
            "DMARC policy does not enforce",
            Severity::Info,
            record.clone(),
        )),
        Some(_) => {}
    }
}

fn check_certificate(cert: &CertificateInfo, host: &str, findings: &mut Vec<Finding>) {
    if cert.is_expired() {
        findings.push(Finding::new(
            "cert-expired",
            "TLS certificate expired",
            Severity::High,
            format!("expired {} days ago", -cert.days_until_expiry),
        ));
    } else if cert.days_until_expiry <= CERT_EXPIRY_WARNING_DAYS {
        findings.push(Finding::new(
            "cert-expiring",
            "TLS certificate expires soon",
            Severity::Medium,
            format!("expires in {} days", cert.days_until_expiry),
        ));
    }

    if !cert.trusted {
        let reason = if cert.self_signed { "self-signed" } else { "chain did not validate" };
        findings.push(Finding::new(
            "cert-untrusted",
            "TLS certificate not trusted",
            Severity::Medium,
            cert.trust_error.clone().unwrap_or_else(|| reason.to_string()),
        ));
    }

    if !cert.san_dns_names.is_empty() && !cert.covers_host(host) {
        findings.push(Finding::new(
            "cert-name-mismatch",
            "TLS certificate does not cover the host",
            Severity::Medium,
            format!("SANs: {}", cert.san_dns_names.join(", ")),
        ));
    }
}

/// Run every heuristic; result sorted by severity, highest first
pub fn assess(domain: &str, evidence: &ScanEvidence<'_>) -> Vec<Finding> {
    let mut findings = Vec::new();

    if let Some(http) = evidence.http {
        check_security_headers(http, &mut findings);
        check_version_disclosure(http, &mut findings);
        check_cookies(http, &mut findings);
        check_cors(http, &mut findings);
        if !http.https && !evidence.ports.iter().any(|p| p.port == 443) && evidence.ssl.is_none() {
            findings.push(Finding::new(
                "http-only",
                "Site only reachable over plain HTTP",
                Severity::Medium,
                http.final_url.clone(),
            ));
        }
    }

    check_directory_listing(evidence, &mut findings);
    check_sensitive_files(evidence.directories, &mut findings);
    check_ports(evidence.ports, &mut findings);

    if let Some(dns) = evidence.dns {
        check_dns(dns, &mut findings);
    }
    if let Some(cert) = evidence.ssl {
        check_certificate(cert, domain, &mut findings);
    }

    findings.sort_by(|a, b| b.severity.cmp(&a.severity).then_with(|| a.id.cmp(&b.id)));
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn probe(https: bool, headers: &[(&str, &str)], cookies: &[&str]) -> HttpProbe {
        let headers: BTreeMap<String, String> =
            headers.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        HttpProbe {
            final_url: if https { "https://acme.test/".into() } else { "http://acme.test/".into() },
            status: 200,
            server: headers.get("server").cloned(),
            powered_by: headers.get("x-powered-by").cloned(),
            headers,
            cookies: cookies.iter().map(|c| c.to_string()).collect(),
            https,
            ..Default::default()
        }
    }

    fn dir(path: &str, sample: &str) -> DirEntry {
        DirEntry {
            path: path.into(),
            url: format!("https://acme.test{}", path),
            status: 200,
            size: sample.len(),
            title: None,
            redirect: None,
            sample: sample.into(),
        }
    }

    fn ids(findings: &[Finding]) -> Vec<&str> {
        findings.iter().map(|f| f.id.as_str()).collect()
    }

    #[test]
    fn test_header_cookie_and_cors_findings() {
        let http = probe(
            true,
            &[("server", "nginx/1.18.0"), ("access-control-allow-origin", "*"), ("x-frame-options", "DENY")],
            &["sid=1; Path=/", "pref=2; Secure; HttpOnly; SameSite=Lax"],
        );
        let evidence = ScanEvidence { http: Some(&http), ..Default::default() };
        let findings = assess("acme.test", &evidence);
        let ids = ids(&findings);

        assert!(ids.contains(&"missing-hsts"));
        assert!(ids.contains(&"missing-content-security-policy"));
        assert!(!ids.contains(&"missing-x-frame-options"));
        assert!(ids.contains(&"version-disclosure-server"));
        assert!(ids.contains(&"cors-wildcard"));
        assert_eq!(ids.iter().filter(|i| **i == "insecure-cookie").count(), 1);
        assert!(!ids.contains(&"http-only"));
    }

    #[test]
    fn test_findings_sorted_by_severity() {
        let http = probe(false, &[], &[]);
        let ports = vec![OpenPort { port: 6379, service: Some("redis".into()), banner: None }];
        let evidence = ScanEvidence { http: Some(&http), ports: &ports, ..Default::default() };
        let findings = assess("acme.test", &evidence);

        assert_eq!(findings[0].severity, Severity::High);
        assert!(findings.windows(2).all(|w| w[0].severity >= w[1].severity));
        assert!(ids(&findings).contains(&"http-only"));
    }

    #[test]
    fn test_sensitive_files_need_real_content() {
        let dirs = vec![
            dir("/.git/config", "[core]\n\trepositoryformatversion = 0\n"),
            dir("/.env", "<!DOCTYPE html><html>not found</html>"),
            dir("/backup.sql", "-- dump\nCREATE TABLE users (id int);"),
            dir("/about", "hello"),
        ];
        let evidence = ScanEvidence { directories: &dirs, ..Default::default() };
        let findings = assess("acme.test", &evidence);

        let titles: Vec<&str> = findings.iter().map(|f| f.title.as_str()).collect();
        assert!(titles.contains(&"Sensitive file exposed: /.git/config"));
        assert!(titles.contains(&"Sensitive file exposed: /backup.sql"));
        assert!(!titles.iter().any(|t| t.contains(".env")));
        assert_eq!(findings.len(), 2);
    }

    #[test]
    fn test_dns_and_certificate_findings() {
        let dns = DnsReport {
            spf: Some("v=spf1 -all".into()),
            dmarc: None,
            zone_transfer: vec![crate::dns_recon::ZoneTransferAttempt {
                nameserver: "ns1.acme.test".into(),
                address: Some("192.0.2.1:53".into()),
                allowed: true,
                answer_count: 12,
                error: None,
            }],
            ..Default::default()
        };
        let cert = CertificateInfo {
            host: "acme.test".into(),
            port: 443,
            subject: "CN=acme.test".into(),
            issuer: "CN=acme.test".into(),
            serial: "01".into(),
            not_before: None,
            not_after: None,
            days_until_expiry: 10,
            san_dns_names: vec!["other.test".into()],
            protocol: None,
            self_signed: true,
            trusted: false,
            trust_error: None,
        };
        let evidence = ScanEvidence { dns: Some(&dns), ssl: Some(&cert), ..Default::default() };
        let ids_list = assess("acme.test", &evidence);
        let ids = ids(&ids_list);

        assert!(ids.contains(&"zone-transfer"));
        assert!(ids.contains(&"missing-dmarc"));
        assert!(!ids.contains(&"missing-spf"));
        assert!(ids.contains(&"cert-expiring"));
        assert!(ids.contains(&"cert-untrusted"));
        assert!(ids.contains(&"cert-name-mismatch"));
    }

    #[test]
    fn test_validate_sensitive_content() {
        assert!(validate_sensitive_content("ref: refs/heads/main\n", "git_head"));
        assert!(validate_sensitive_content("admin:$apr1$xyz\n", "htpasswd"));
        assert!(!validate_sensitive_content("just some text", "htpasswd"));
        assert!(validate_sensitive_content("# cfg\nAPP_KEY=abc\n", "env_file"));
        assert!(!validate_sensitive_content("Hello world", "env_file"));
    }
}
