// domain_scan.rs - Domain OSINT scan orchestrator
// Purpose: Run the http, whois, dns, ssl, content, archive, ports, dirs and
//          vulns stages in order, record per-stage failures and keep going,
//          then write report.json / report.csv / report.html
//
// Stage progress:
//   http 0-11% -> whois -> dns -> ssl -> content -> archive -> ports -> dirs -> vulns 100%

use crate::content_scraper::{self, ContentReport};
use crate::dir_bruteforce::{self, DirEntry, DirScanConfig};
use crate::dns_recon::{self, DnsReport};
use crate::http_client::{build_client, HttpOptions};
use crate::metrics::{RunMetrics, ToolKind};
use crate::port_scanner::{self, OpenPort, PortScanConfig};
use crate::progress::ProgressTracker;
use crate::report_generator::{self, ReportFormat};
use crate::tls_inspector::{self, CertificateInfo};
use crate::vuln_heuristics::{self, Finding, ScanEvidence, Severity};
use crate::wayback::{self, ArchiveReport, WaybackConfig};
use crate::web_probe::{self, HttpProbe};
use crate::whois_lookup::{self, WhoisConfig, WhoisInfo};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use colored::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Http,
    Whois,
    Dns,
    Ssl,
    Content,
    Archive,
    Ports,
    Dirs,
    Vulns,
}

impl Stage {
    pub const ALL: [Stage; 9] = [
        Stage::Http,
        Stage::Whois,
        Stage::Dns,
        Stage::Ssl,
        Stage::Content,
        Stage::Archive,
        Stage::Ports,
        Stage::Dirs,
        Stage::Vulns,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Http => "http",
            Stage::Whois => "whois",
            Stage::Dns => "dns",
            Stage::Ssl => "ssl",
            Stage::Content => "content",
            Stage::Archive => "archive",
            Stage::Ports => "ports",
            Stage::Dirs => "dirs",
            Stage::Vulns => "vulns",
        }
    }

    fn title(&self) -> &'static str {
        match self {
            Stage::Http => "HTTP FETCH & FINGERPRINT",
            Stage::Whois => "WHOIS LOOKUP",
            Stage::Dns => "DNS RECORDS & ZONE TRANSFER",
            Stage::Ssl => "TLS CERTIFICATE",
            Stage::Content => "CONTENT SCRAPE",
            Stage::Archive => "WAYBACK ARCHIVE",
            Stage::Ports => "PORT SCAN",
            Stage::Dirs => "DIRECTORY DISCOVERY",
            Stage::Vulns => "VULNERABILITY HEURISTICS",
        }
    }

    fn index(&self) -> usize {
        Stage::ALL.iter().position(|s| s == self).unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct DomainScanConfig {
    pub output_dir: PathBuf,
    pub skip: BTreeSet<Stage>,
    pub formats: Vec<ReportFormat>,
    pub http: HttpOptions,
    pub whois: WhoisConfig,
    pub wayback: WaybackConfig,
    pub ports: PortScanConfig,
    pub dirs: DirScanConfig,
    pub tls_timeout: Duration,
    pub axfr_timeout: Duration,
}

impl Default for DomainScanConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("osint_results"),
            skip: BTreeSet::new(),
            formats: ReportFormat::ALL.to_vec(),
            http: HttpOptions::default(),
            whois: WhoisConfig::default(),
            wayback: WaybackConfig::default(),
            ports: PortScanConfig { show_progress: true, ..Default::default() },
            dirs: DirScanConfig { show_progress: true, ..Default::default() },
            tls_timeout: Duration::from_secs(10),
            axfr_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainReport {
    pub domain: String,
    pub scan_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub http: Option<HttpProbe>,
    pub whois: Option<WhoisInfo>,
    pub dns: Option<DnsReport>,
    pub ssl: Option<CertificateInfo>,
    pub content: Option<ContentReport>,
    pub archive: Option<ArchiveReport>,
    pub ports: Vec<OpenPort>,
    pub directories: Vec<DirEntry>,
    pub vulnerabilities: Vec<Finding>,
    /// Stage name -> failure message
    pub errors: BTreeMap<String, String>,
}

impl DomainReport {
    pub fn new(domain: &str, scan_id: &str) -> Self {
        Self {
            domain: domain.to_string(),
            scan_id: scan_id.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            http: None,
            whois: None,
            dns: None,
            ssl: None,
            content: None,
            archive: None,
            ports: Vec::new(),
            directories: Vec::new(),
            vulnerabilities: Vec::new(),
            errors: BTreeMap::new(),
        }
    }

    pub fn severity_counts(&self) -> BTreeMap<Severity, usize> {
        let mut counts = BTreeMap::new();
        for finding in &self.vulnerabilities {
            *counts.entry(finding.severity).or_insert(0) += 1;
        }
        counts
    }
}

/// Strip scheme, credentials, path and trailing dot; lowercase
///
/// An explicit port is kept so local targets like `127.0.0.1:8080` work.
pub fn normalize_domain(input: &str) -> Result<String> {
    let mut rest = input.trim();
    if let Some((_, after)) = rest.split_once("://") {
        rest = after;
    }
    let rest = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let rest = rest.rsplit_once('@').map(|(_, host)| host).unwrap_or(rest);
    let domain = rest.trim_end_matches('.').to_lowercase();

    let host = host_part(&domain);
    if host.is_empty()
        || !host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
        || host.starts_with('.')
        || host.starts_with('-')
    {
        bail!("Invalid domain: {}", input);
    }
    Ok(domain)
}

/// Host without a `:port` suffix
pub fn host_part(domain: &str) -> &str {
    match domain.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => domain,
    }
}

fn print_stage_banner(stage: Stage) {
    println!("\n{}", "═══════════════════════════════════════════════════════════════".yellow().bold());
    println!(
        "{}",
        format!("  STAGE {}: {}", stage.index() + 1, stage.title()).yellow().bold()
    );
    println!("{}", "═══════════════════════════════════════════════════════════════".yellow().bold());
}

struct StageRunner<'a> {
    skip: &'a BTreeSet<Stage>,
    progress: &'a ProgressTracker,
    metrics: &'a mut RunMetrics,
    errors: &'a mut BTreeMap<String, String>,
}

impl StageRunner<'_> {
    fn start(&mut self, stage: Stage) -> bool {
        if stage != Stage::Http && self.skip.contains(&stage) {
            println!("{}", format!("[*] Skipping stage: {}", stage.as_str()).cyan());
            return false;
        }
        print_stage_banner(stage);
        self.progress.stage_started(stage.as_str(), Self::percent(stage, false));
        self.metrics.begin_stage(stage.as_str());
        true
    }

    fn finish<T>(&mut self, stage: Stage, result: Result<T>) -> Option<T> {
        self.metrics.end_stage(stage.as_str());
        match result {
            Ok(value) => {
                self.progress.stage_completed(stage.as_str(), Self::percent(stage, true));
                Some(value)
            }
            Err(e) => {
                let message = format!("{:#}", e);
                println!("{}", format!("[!] {} stage failed: {}", stage.as_str(), message).yellow());
                tracing::warn!(stage = stage.as_str(), error = %message, "stage failed");
                self.progress.stage_failed(stage.as_str(), &message, Self::percent(stage, true));
                self.metrics.incr("stage_failures", 1);
                self.errors.insert(stage.as_str().to_string(), message);
                None
            }
        }
    }

    fn percent(stage: Stage, done: bool) -> f32 {
        let idx = stage.index() as f32 + if done { 1.0 } else { 0.0 };
        idx / Stage::ALL.len() as f32 * 100.0
    }
}

/// Run a full scan of `domain` and write its reports
pub async fn run_domain_scan(domain: &str, config: &DomainScanConfig) -> Result<DomainReport> {
    let domain = normalize_domain(domain)?;
    let host = host_part(&domain).to_string();

    let scan_dir = config.output_dir.join(domain.replace(':', "_"));
    fs::create_dir_all(&scan_dir)
        .with_context(|| format!("Failed to create output directory: {}", scan_dir.display()))?;

    let scan_id = uuid::Uuid::new_v4().to_string();
    let progress = ProgressTracker::new(scan_id.clone(), domain.clone(), scan_dir.clone());
    progress.scan_started();
    let mut metrics = RunMetrics::new(ToolKind::DomainScan, &domain);

    println!("{}", format!("[*] Target: {}", domain).cyan());
    println!("{}", format!("[*] Output directory: {}/", scan_dir.display()).cyan());
    println!("{}", format!("[*] Scan ID: {}", scan_id).cyan());

    let client = build_client(&config.http)?;
    let mut report = DomainReport::new(&domain, &scan_id);
    let mut errors = BTreeMap::new();

    {
        let mut runner = StageRunner {
            skip: &config.skip,
            progress: &progress,
            metrics: &mut metrics,
            errors: &mut errors,
        };

        // STAGE 1: HTTP (always runs)
        runner.start(Stage::Http);
        let result = web_probe::fetch_homepage(&client, &domain).await;
        report.http = runner.finish(Stage::Http, result);
        if let Some(http) = &report.http {
            println!(
                "{}",
                format!("[+] {} -> {} ({} ms, {} bytes)", http.final_url, http.status, http.response_time_ms, http.body_size)
                    .green()
            );
            if !http.technologies.is_empty() {
                println!("{}", format!("[+] Technologies: {}", http.technologies.join(", ")).green());
            }
            progress.data_found("technologies", http.technologies.len(), 11.0);
        }

        // STAGE 2: WHOIS
        if runner.start(Stage::Whois) {
            let result = whois_lookup::lookup(&host, &config.whois).await;
            report.whois = runner.finish(Stage::Whois, result);
            if let Some(whois) = &report.whois {
                println!(
                    "{}",
                    format!(
                        "[+] Registrar: {} | Created: {} | Expires: {}",
                        whois.registrar.as_deref().unwrap_or("-"),
                        whois.creation_date.as_deref().unwrap_or("-"),
                        whois.expiry_date.as_deref().unwrap_or("-")
                    )
                    .green()
                );
            }
        }

        // STAGE 3: DNS
        if runner.start(Stage::Dns) {
            let resolver = dns_recon::build_resolver();
            let dns = dns_recon::enumerate(&resolver, &host, config.axfr_timeout).await;
            println!(
                "{}",
                format!("[+] {} DNS records, SPF: {}, DMARC: {}", dns.total_records(), dns.spf.is_some(), dns.dmarc.is_some())
                    .green()
            );
            if dns.zone_transfer_allowed() {
                println!("{}", "[!] Zone transfer allowed!".red().bold());
            }
            progress.data_found("dns_records", dns.total_records(), 33.0);
            runner.metrics.set("dns_records", dns.total_records() as u64);
            report.dns = runner.finish(Stage::Dns, Ok(dns));
        }

        // STAGE 4: SSL
        if runner.start(Stage::Ssl) {
            let result = tls_inspector::inspect(&host, 443, config.tls_timeout).await;
            report.ssl = runner.finish(Stage::Ssl, result);
            if let Some(cert) = &report.ssl {
                println!(
                    "{}",
                    format!("[+] Issuer: {} | expires in {} days | trusted: {}", cert.issuer, cert.days_until_expiry, cert.trusted)
                        .green()
                );
            }
        }

        // STAGE 5: CONTENT
        if runner.start(Stage::Content) {
            let result = match &report.http {
                Some(http) => Ok(content_scraper::scrape(&http.body, &http.final_url)),
                None => Err(anyhow::anyhow!("no homepage content (http stage failed)")),
            };
            report.content = runner.finish(Stage::Content, result);
            if let Some(content) = &report.content {
                println!(
                    "{}",
                    format!(
                        "[+] Title: {} | {} internal / {} external links | {} emails | {} forms",
                        content.title.as_deref().unwrap_or("-"),
                        content.internal_links.len(),
                        content.external_links.len(),
                        content.emails.len(),
                        content.forms.len()
                    )
                    .green()
                );
                runner.metrics.set("links", (content.internal_links.len() + content.external_links.len()) as u64);
                runner.metrics.set("emails", content.emails.len() as u64);
            }
        }

        // STAGE 6: ARCHIVE
        if runner.start(Stage::Archive) {
            let result = wayback::fetch_snapshots(&client, &host, &config.wayback).await;
            report.archive = runner.finish(Stage::Archive, result);
            if let Some(archive) = &report.archive {
                println!(
                    "{}",
                    format!(
                        "[+] {} archived URLs (first: {}, last: {})",
                        archive.snapshot_count,
                        archive.first_snapshot.as_deref().unwrap_or("-"),
                        archive.last_snapshot.as_deref().unwrap_or("-")
                    )
                    .green()
                );
            }
        }

        // STAGE 7: PORTS
        if runner.start(Stage::Ports) {
            println!("{}", format!("[*] Probing {} TCP ports...", config.ports.ports.len()).cyan());
            let result = port_scanner::scan_host(&host, &config.ports).await.map(|(_, ports)| ports);
            report.ports = runner.finish(Stage::Ports, result).unwrap_or_default();
            println!("{}", format!("[+] {} open ports", report.ports.len()).green());
            runner.metrics.set("open_ports", report.ports.len() as u64);
            progress.data_found("open_ports", report.ports.len(), 77.0);
        }

        // STAGE 8: DIRS
        if runner.start(Stage::Dirs) {
            let result = match &report.http {
                Some(http) => {
                    let base = http.base_url();
                    println!("{}", format!("[*] Testing {} paths on {}", config.dirs.paths.len(), base).cyan());
                    build_client(&config.http.clone().without_redirects())
                        .map(|no_redirect| (no_redirect, base))
                }
                None => Err(anyhow::anyhow!("no base URL (http stage failed)")),
            };
            let result = match result {
                Ok((no_redirect, base)) => {
                    Ok(dir_bruteforce::scan_directories(&no_redirect, &base, &config.dirs).await)
                }
                Err(e) => Err(e),
            };
            report.directories = runner.finish(Stage::Dirs, result).unwrap_or_default();
            println!("{}", format!("[+] {} interesting paths", report.directories.len()).green());
            runner.metrics.set("paths_found", report.directories.len() as u64);
            progress.data_found("paths", report.directories.len(), 88.0);
        }

        // STAGE 9: VULNS
        if runner.start(Stage::Vulns) {
            let evidence = ScanEvidence {
                http: report.http.as_ref(),
                dns: report.dns.as_ref(),
                ssl: report.ssl.as_ref(),
                ports: &report.ports,
                directories: &report.directories,
            };
            let findings = vuln_heuristics::assess(&host, &evidence);
            for finding in &findings {
                progress.finding(&finding.severity.to_string(), &finding.title, 95.0);
                let line = format!("    [{}] {} ({})", finding.severity, finding.title, finding.evidence);
                match finding.severity {
                    Severity::High => println!("{}", line.red().bold()),
                    Severity::Medium => println!("{}", line.yellow()),
                    _ => println!("{}", line.white()),
                }
            }
            runner.metrics.set("findings", findings.len() as u64);
            report.vulnerabilities = runner.finish(Stage::Vulns, Ok(findings)).unwrap_or_default();
        }
    }

    report.errors = errors;
    report.finished_at = Some(Utc::now());

    let written = report_generator::write_reports(&report, &scan_dir, &config.formats)?;
    for path in &written {
        println!("{}", format!("[+] Report saved: {}", path.display()).green());
    }

    metrics.finalize();
    metrics.save_to_file(&scan_dir.join("scan_metrics.json"))?;
    progress.scan_completed();

    println!("\n{}", "═══════════════════════════════════════════════════════════════".green().bold());
    println!("{}", format!("  SCAN COMPLETE: {}", domain).green().bold());
    println!("{}", "═══════════════════════════════════════════════════════════════".green().bold());
    println!("{}", metrics.summary().cyan());
    if !report.errors.is_empty() {
        println!("{}", format!("[!] {} stage(s) failed: {}", report.errors.len(), report.errors.keys().cloned().collect::<Vec<_>>().join(", ")).yellow());
    }

    Ok(report)
}
