// report_generator.rs - Domain report writers
// Generates report.json, a flat report.csv (section,key,value) and a single
// self-contained report.html from a DomainReport

use crate::domain_scan::DomainReport;
use crate::vuln_heuristics::Severity;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Json,
    Csv,
    Html,
}

impl ReportFormat {
    pub const ALL: [ReportFormat; 3] = [ReportFormat::Json, ReportFormat::Csv, ReportFormat::Html];

    pub fn file_name(&self) -> &'static str {
        match self {
            ReportFormat::Json => "report.json",
            ReportFormat::Csv => "report.csv",
            ReportFormat::Html => "report.html",
        }
    }
}

/// Write the requested formats into `dir`; returns the written paths
pub fn write_reports(report: &DomainReport, dir: &Path, formats: &[ReportFormat]) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();

    for format in formats {
        let path = dir.join(format.file_name());
        match format {
            ReportFormat::Json => {
                let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
                fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
            }
            ReportFormat::Csv => write_csv(report, &path)?,
            ReportFormat::Html => {
                fs::write(&path, render_html(report)).with_context(|| format!("Failed to write {}", path.display()))?;
            }
        }
        written.push(path);
    }

    Ok(written)
}

/// Load a report.json written by a previous scan
pub fn load_report(path: &Path) -> Result<DomainReport> {
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn row(rows: &mut Vec<[String; 3]>, section: &str, key: impl Into<String>, value: impl ToString) {
    rows.push([section.to_string(), key.into(), value.to_string()]);
}

/// Flatten the report into (section, key, value) rows
pub fn csv_rows(report: &DomainReport) -> Vec<[String; 3]> {
    let mut rows = Vec::new();

    row(&mut rows, "scan", "domain", &report.domain);
    row(&mut rows, "scan", "scan_id", &report.scan_id);
    row(&mut rows, "scan", "started_at", report.started_at.to_rfc3339());
    if let Some(finished) = report.finished_at {
        row(&mut rows, "scan", "finished_at", finished.to_rfc3339());
    }

    if let Some(http) = &report.http {
        row(&mut rows, "http", "final_url", &http.final_url);
        row(&mut rows, "http", "status", http.status);
        row(&mut rows, "http", "response_time_ms", http.response_time_ms);
        row(&mut rows, "http", "body_size", http.body_size);
        for (name, value) in &http.headers {
            row(&mut rows, "http", format!("header:{}", name), value);
        }
        for cookie in &http.cookies {
            row(&mut rows, "http", "cookie", cookie);
        }
        for tech in &http.technologies {
            row(&mut rows, "http", "technology", tech);
        }
    }

    if let Some(whois) = &report.whois {
        row(&mut rows, "whois", "server", &whois.server);
        let fields = [
            ("registrar", &whois.registrar),
            ("creation_date", &whois.creation_date),
            ("expiry_date", &whois.expiry_date),
            ("updated_date", &whois.updated_date),
            ("registrant_org", &whois.registrant_org),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                row(&mut rows, "whois", key, value);
            }
        }
        for ns in &whois.name_servers {
            row(&mut rows, "whois", "name_server", ns);
        }
        for status in &whois.statuses {
            row(&mut rows, "whois", "status", status);
        }
    }

    if let Some(dns) = &report.dns {
        let records = [
            ("A", &dns.a),
            ("AAAA", &dns.aaaa),
            ("MX", &dns.mx),
            ("NS", &dns.ns),
            ("TXT", &dns.txt),
            ("SOA", &dns.soa),
            ("CNAME", &dns.cname),
        ];
        for (kind, values) in records {
            for value in values {
                row(&mut rows, "dns", kind, value);
            }
        }
        row(&mut rows, "dns", "spf", dns.spf.as_deref().unwrap_or("none"));
        row(&mut rows, "dns", "dmarc", dns.dmarc.as_deref().unwrap_or("none"));
        for attempt in &dns.zone_transfer {
            row(
                &mut rows,
                "dns",
                format!("axfr:{}", attempt.nameserver),
                if attempt.allowed { format!("allowed ({} records)", attempt.answer_count) } else { "refused".to_string() },
            );
        }
    }

    if let Some(ssl) = &report.ssl {
        row(&mut rows, "ssl", "subject", &ssl.subject);
        row(&mut rows, "ssl", "issuer", &ssl.issuer);
        row(&mut rows, "ssl", "serial", &ssl.serial);
        if let Some(nb) = ssl.not_before {
            row(&mut rows, "ssl", "not_before", nb.to_rfc3339());
        }
        if let Some(na) = ssl.not_after {
            row(&mut rows, "ssl", "not_after", na.to_rfc3339());
        }
        row(&mut rows, "ssl", "days_until_expiry", ssl.days_until_expiry);
        if let Some(protocol) = &ssl.protocol {
            row(&mut rows, "ssl", "protocol", protocol);
        }
        row(&mut rows, "ssl", "trusted", ssl.trusted);
        for name in &ssl.san_dns_names {
            row(&mut rows, "ssl", "san", name);
        }
    }

    if let Some(content) = &report.content {
        if let Some(title) = &content.title {
            row(&mut rows, "content", "title", title);
        }
        if let Some(desc) = &content.meta_description {
            row(&mut rows, "content", "description", desc);
        }
        for email in &content.emails {
            row(&mut rows, "content", "email", email);
        }
        for phone in &content.phone_numbers {
            row(&mut rows, "content", "phone", phone);
        }
        for profile in &content.social_profiles {
            row(&mut rows, "content", "social", profile);
        }
        row(&mut rows, "content", "internal_links", content.internal_links.len());
        row(&mut rows, "content", "external_links", content.external_links.len());
        row(&mut rows, "content", "forms", content.forms.len());
    }

    if let Some(archive) = &report.archive {
        row(&mut rows, "archive", "snapshot_count", archive.snapshot_count);
        if let Some(first) = &archive.first_snapshot {
            row(&mut rows, "archive", "first_snapshot", first);
        }
        if let Some(last) = &archive.last_snapshot {
            row(&mut rows, "archive", "last_snapshot", last);
        }
    }

    for port in &report.ports {
        row(
            &mut rows,
            "ports",
            port.port.to_string(),
            port.service.as_deref().unwrap_or("unknown"),
        );
    }

    for entry in &report.directories {
        row(&mut rows, "directories", &entry.path, entry.status);
    }

    for finding in &report.vulnerabilities {
        row(
            &mut rows,
            "vulnerabilities",
            format!("{}:{}", finding.severity, finding.id),
            format!("{} | {}", finding.title, finding.evidence),
        );
    }

    for (stage, error) in &report.errors {
        row(&mut rows, "errors", stage.as_str(), error);
    }

    rows
}

fn write_csv(report: &DomainReport, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record(["section", "key", "value"])?;
    for record in csv_rows(report) {
        writer.write_record(&record)?;
    }
    writer.flush().context("Failed to flush CSV report")?;
    Ok(())
}

pub fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn severity_class(severity: Severity) -> &'static str {
    match severity {
        Severity::High => "sev-high",
        Severity::Medium => "sev-medium",
        Severity::Low => "sev-low",
        Severity::Info => "sev-info",
    }
}

fn kv_table(rows: &[(&str, String)]) -> String {
    if rows.is_empty() {
        return "<p class=\"empty\">No data</p>".to_string();
    }
    let body: String = rows
        .iter()
        .map(|(k, v)| format!("<tr><th>{}</th><td>{}</td></tr>", html_escape(k), html_escape(v)))
        .collect();
    format!("<table class=\"kv\">{}</table>", body)
}

fn list(items: &[String]) -> String {
    if items.is_empty() {
        return "<p class=\"empty\">None</p>".to_string();
    }
    let body: String = items.iter().map(|i| format!("<li>{}</li>", html_escape(i))).collect();
    format!("<ul>{}</ul>", body)
}

fn section(id: &str, title: &str, body: String) -> String {
    format!("<section id=\"{id}\"><h2>{}</h2>{body}</section>", html_escape(title))
}

fn opt(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| "-".to_string())
}

/// Render the whole report as one HTML page
pub fn render_html(report: &DomainReport) -> String {
    let counts = report.severity_counts();
    let count = |s: Severity| counts.get(&s).copied().unwrap_or(0);

    let summary = format!(
        "<div class=\"cards\">\
         <div class=\"card sev-high\"><b>{}</b><span>High</span></div>\
         <div class=\"card sev-medium\"><b>{}</b><span>Medium</span></div>\
         <div class=\"card sev-low\"><b>{}</b><span>Low</span></div>\
         <div class=\"card sev-info\"><b>{}</b><span>Info</span></div>\
         <div class=\"card\"><b>{}</b><span>Open ports</span></div>\
         <div class=\"card\"><b>{}</b><span>Paths found</span></div>\
         </div>",
        count(Severity::High),
        count(Severity::Medium),
        count(Severity::Low),
        count(Severity::Info),
        report.ports.len(),
        report.directories.len()
    );

    let findings = if report.vulnerabilities.is_empty() {
        "<p class=\"empty\">No findings</p>".to_string()
    } else {
        let rows: String = report
            .vulnerabilities
            .iter()
            .map(|f| {
                format!(
                    "<tr class=\"{}\"><td>{}</td><td>{}</td><td><code>{}</code></td></tr>",
                    severity_class(f.severity),
                    f.severity,
                    html_escape(&f.title),
                    html_escape(&f.evidence)
                )
            })
            .collect();
        format!("<table><tr><th>Severity</th><th>Finding</th><th>Evidence</th></tr>{}</table>", rows)
    };

    let http = match &report.http {
        Some(h) => {
            let mut rows = vec![
                ("Final URL", h.final_url.clone()),
                ("Status", h.status.to_string()),
                ("Response time", format!("{} ms", h.response_time_ms)),
                ("Body size", format!("{} bytes", h.body_size)),
                ("Server", opt(&h.server)),
                ("X-Powered-By", opt(&h.powered_by)),
                ("Technologies", h.technologies.join(", ")),
            ];
            rows.extend(h.cookies.iter().map(|c| ("Set-Cookie", c.clone())));
            kv_table(&rows)
        }
        None => "<p class=\"empty\">Not available</p>".to_string(),
    };

    let whois = match &report.whois {
        Some(w) => kv_table(&[
            ("Server", w.server.clone()),
            ("Registrar", opt(&w.registrar)),
            ("Created", opt(&w.creation_date)),
            ("Expires", opt(&w.expiry_date)),
            ("Updated", opt(&w.updated_date)),
            ("Registrant", opt(&w.registrant_org)),
            ("Name servers", w.name_servers.join(", ")),
            ("Status", w.statuses.join(", ")),
        ]),
        None => "<p class=\"empty\">Not available</p>".to_string(),
    };

    let dns = match &report.dns {
        Some(d) => {
            let axfr = d
                .zone_transfer
                .iter()
                .map(|a| format!("{}: {}", a.nameserver, if a.allowed { "ALLOWED" } else { "refused" }))
                .collect::<Vec<_>>()
                .join(", ");
            kv_table(&[
                ("A", d.a.join(", ")),
                ("AAAA", d.aaaa.join(", ")),
                ("MX", d.mx.join(", ")),
                ("NS", d.ns.join(", ")),
                ("TXT", d.txt.join(" | ")),
                ("SOA", d.soa.join(", ")),
                ("CNAME", d.cname.join(", ")),
                ("SPF", opt(&d.spf)),
                ("DMARC", opt(&d.dmarc)),
                ("Zone transfer", axfr),
            ])
        }
        None => "<p class=\"empty\">Not available</p>".to_string(),
    };

    let ssl = match &report.ssl {
        Some(c) => kv_table(&[
            ("Subject", c.subject.clone()),
            ("Issuer", c.issuer.clone()),
            ("Serial", c.serial.clone()),
            ("Valid from", c.not_before.map(|d| d.to_rfc3339()).unwrap_or_default()),
            ("Valid until", c.not_after.map(|d| d.to_rfc3339()).unwrap_or_default()),
            ("Days until expiry", c.days_until_expiry.to_string()),
            ("SANs", c.san_dns_names.join(", ")),
            ("Protocol", opt(&c.protocol)),
            ("Trusted", c.trusted.to_string()),
        ]),
        None => "<p class=\"empty\">Not available</p>".to_string(),
    };

    let content = match &report.content {
        Some(c) => format!(
            "{}<h3>Emails</h3>{}<h3>Social profiles</h3>{}<h3>External links</h3>{}",
            kv_table(&[
                ("Title", opt(&c.title)),
                ("Description", opt(&c.meta_description)),
                ("Keywords", opt(&c.meta_keywords)),
                ("Generator", opt(&c.generator)),
                ("H1", c.h1.join(" | ")),
                ("Internal links", c.internal_links.len().to_string()),
                ("Forms", format!("{} ({} with password)", c.forms.len(), c.login_forms())),
                ("Scripts", c.scripts.len().to_string()),
                ("Phone numbers", c.phone_numbers.join(", ")),
            ]),
            list(&c.emails),
            list(&c.social_profiles),
            list(&c.external_links)
        ),
        None => "<p class=\"empty\">Not available</p>".to_string(),
    };

    let archive = match &report.archive {
        Some(a) => format!(
            "{}{}",
            kv_table(&[
                ("Snapshots", a.snapshot_count.to_string()),
                ("First", opt(&a.first_snapshot)),
                ("Last", opt(&a.last_snapshot)),
            ]),
            list(&a.urls.iter().take(100).cloned().collect::<Vec<_>>())
        ),
        None => "<p class=\"empty\">Not available</p>".to_string(),
    };

    let ports = list(
        &report
            .ports
            .iter()
            .map(|p| {
                format!(
                    "{}/tcp {}{}",
                    p.port,
                    p.service.as_deref().unwrap_or("unknown"),
                    p.banner.as_ref().map(|b| format!(" - {}", b)).unwrap_or_default()
                )
            })
            .collect::<Vec<_>>(),
    );

    let dirs = list(
        &report
            .directories
            .iter()
            .map(|d| format!("[{}] {} ({} bytes)", d.status, d.url, d.size))
            .collect::<Vec<_>>(),
    );

    let errors = if report.errors.is_empty() {
        String::new()
    } else {
        let rows: Vec<(&str, String)> = report.errors.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
        section("errors", "Stage errors", kv_table(&rows))
    };

    let generated = report
        .finished_at
        .unwrap_or(report.started_at)
        .format("%Y-%m-%d %H:%M:%S UTC")
        .to_string();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>OSINT Report - {domain}</title>
<style>
body {{ background: #0f172a; color: #f1f5f9; font-family: system-ui, sans-serif; margin: 0; padding: 2rem; }}
h1 {{ margin: 0 0 .25rem 0; }}
h2 {{ border-bottom: 1px solid #334155; padding-bottom: .25rem; color: #60a5fa; }}
section {{ background: #1e293b; border-radius: 8px; padding: 1rem 1.5rem; margin: 1rem 0; }}
table {{ border-collapse: collapse; width: 100%; }}
th, td {{ text-align: left; padding: .35rem .5rem; border-bottom: 1px solid #334155; vertical-align: top; }}
table.kv th {{ width: 200px; color: #94a3b8; font-weight: 500; }}
code {{ font-family: ui-monospace, monospace; font-size: .85em; word-break: break-all; }}
.meta {{ color: #94a3b8; }}
.empty {{ color: #64748b; font-style: italic; }}
.cards {{ display: flex; gap: 1rem; flex-wrap: wrap; }}
.card {{ background: #273449; border-radius: 8px; padding: .75rem 1.25rem; min-width: 110px; }}
.card b {{ display: block; font-size: 1.6rem; }}
.sev-high {{ border-left: 4px solid #ef4444; }}
.sev-medium {{ border-left: 4px solid #f97316; }}
.sev-low {{ border-left: 4px solid #eab308; }}
.sev-info {{ border-left: 4px solid #06b6d4; }}
</style>
</head>
<body>
<h1>OSINT Report: {domain}</h1>
<p class="meta">Scan {scan_id} &middot; generated {generated}</p>
{summary}
{findings_section}
{http_section}
{whois_section}
{dns_section}
{ssl_section}
{content_section}
{archive_section}
{ports_section}
{dirs_section}
{errors}
</body>
</html>
"#,
        domain = html_escape(&report.domain),
        scan_id = html_escape(&report.scan_id),
        generated = generated,
        summary = summary,
        findings_section = section("vulns", "Findings", findings),
        http_section = section("http", "HTTP", http),
        whois_section = section("whois", "WHOIS", whois),
        dns_section = section("dns", "DNS", dns),
        ssl_section = section("ssl", "TLS certificate", ssl),
        content_section = section("content", "Content", content),
        archive_section = section("archive", "Wayback archive", archive),
        ports_section = section("ports", "Open ports", ports),
        dirs_section = section("dirs", "Discovered paths", dirs),
        errors = errors,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port_scanner::OpenPort;
    use crate::tls_inspector::CertificateInfo;
    use crate::vuln_heuristics::Finding;

    fn sample_report() -> DomainReport {
        let mut report = DomainReport::new("acme.test", "scan-1");
        report.ports.push(OpenPort { port: 22, service: Some("ssh".into()), banner: None });
        report.vulnerabilities.push(Finding {
            id: "cors-wildcard".into(),
            title: "Wildcard CORS <policy>".into(),
            severity: Severity::Medium,
            evidence: "Access-Control-Allow-Origin: *".into(),
        });
        report.errors.insert("whois".into(), "timed out, retry later".into());
        report
    }

    #[test]
    fn test_csv_rows_layout() {
        let rows = csv_rows(&sample_report());
        assert_eq!(rows[0], ["scan".to_string(), "domain".into(), "acme.test".into()]);
        assert!(rows.contains(&["ports".to_string(), "22".into(), "ssh".into()]));
        assert!(rows
            .iter()
            .any(|r| r[0] == "vulnerabilities" && r[1] == "medium:cors-wildcard"));
        assert!(rows.contains(&["errors".to_string(), "whois".into(), "timed out, retry later".into()]));
    }

    #[test]
    fn test_ssl_protocol_row_only_when_known() {
        let cert = CertificateInfo {
            host: "acme.test".into(),
            port: 443,
            subject: "CN=acme.test".into(),
            issuer: "CN=Test CA".into(),
            serial: "0a".into(),
            not_before: None,
            not_after: None,
            days_until_expiry: 90,
            san_dns_names: vec!["acme.test".into()],
            protocol: None,
            self_signed: false,
            trusted: true,
            trust_error: None,
        };
        let mut report = sample_report();
        report.ssl = Some(cert.clone());
        assert!(!csv_rows(&report).iter().any(|r| r[0] == "ssl" && r[1] == "protocol"));

        report.ssl = Some(CertificateInfo { protocol: Some("TLSv1.3".into()), ..cert });
        assert!(csv_rows(&report).contains(&["ssl".to_string(), "protocol".into(), "TLSv1.3".into()]));
        assert!(render_html(&report).contains("TLSv1.3"));
    }

    #[test]
    fn test_html_escapes_values() {
        let html = render_html(&sample_report());
        assert!(html.contains("Wildcard CORS &lt;policy&gt;"));
        assert!(!html.contains("<policy>"));
        assert!(html.contains("OSINT Report: acme.test"));
        assert!(html.contains("Stage errors"));
    }

    #[test]
    fn test_write_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let report = sample_report();
        let written = write_reports(&report, dir.path(), &ReportFormat::ALL).unwrap();
        assert_eq!(written.len(), 3);

        let reloaded = load_report(&dir.path().join("report.json")).unwrap();
        assert_eq!(reloaded.domain, "acme.test");
        assert_eq!(reloaded.vulnerabilities, report.vulnerabilities);

        let csv = std::fs::read_to_string(dir.path().join("report.csv")).unwrap();
        assert!(csv.starts_with("section,key,value"));
        assert!(csv.contains("\"timed out, retry later\""));
    }

    #[test]
    fn test_write_selected_formats_only() {
        let dir = tempfile::tempdir().unwrap();
        write_reports(&sample_report(), dir.path(), &[ReportFormat::Csv]).unwrap();
        assert!(dir.path().join("report.csv").exists());
        assert!(!dir.path().join("report.json").exists());
    }
}
