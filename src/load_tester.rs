// load_tester.rs - HTTP / WebSocket load generator
// Purpose: Run N workers against one target until a deadline, each optionally
//          rate limited, and aggregate counts, status codes, bytes and latency
//          percentiles into a LoadTestReport

use crate::http_client::{build_client, HttpOptions};
use anyhow::{bail, Context, Result};
use colored::*;
use futures::{SinkExt, StreamExt};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Clone)]
pub enum LoadMode {
    Http {
        method: Method,
        body: Option<String>,
        headers: Vec<(String, String)>,
    },
    WebSocket {
        message: String,
    },
}

#[derive(Debug, Clone)]
pub struct LoadTestConfig {
    pub target: String,
    pub mode: LoadMode,
    pub workers: usize,
    /// Requests per second per worker, 0 = as fast as possible
    pub rate_per_worker: f64,
    pub duration: Duration,
    pub timeout: Duration,
}

impl Default for LoadTestConfig {
    fn default() -> Self {
        Self {
            target: String::new(),
            mode: LoadMode::Http {
                method: Method::GET,
                body: None,
                headers: Vec::new(),
            },
            workers: 10,
            rate_per_worker: 0.0,
            duration: Duration::from_secs(10),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub min_ms: f64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadTestReport {
    pub target: String,
    pub mode: String,
    pub workers: usize,
    pub total: u64,
    pub successes: u64,
    pub failures: u64,
    pub errors: u64,
    pub status_codes: BTreeMap<u16, u64>,
    pub bytes_received: u64,
    pub latency: LatencySummary,
    pub elapsed_secs: f64,
    pub throughput_rps: f64,
}

#[derive(Debug, Default)]
struct WorkerStats {
    total: u64,
    successes: u64,
    failures: u64,
    errors: u64,
    status_codes: BTreeMap<u16, u64>,
    bytes: u64,
    latencies_ms: Vec<f64>,
}

impl WorkerStats {
    fn merge(&mut self, other: WorkerStats) {
        self.total += other.total;
        self.successes += other.successes;
        self.failures += other.failures;
        self.errors += other.errors;
        self.bytes += other.bytes;
        for (code, count) in other.status_codes {
            *self.status_codes.entry(code).or_insert(0) += count;
        }
        self.latencies_ms.extend(other.latencies_ms);
    }
}

/// Parse a `Name: value` header argument
pub fn parse_header(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .with_context(|| format!("Header must look like 'Name: value': {}", raw))?;
    let name = name.trim();
    if name.is_empty() {
        bail!("Header name is empty: {}", raw);
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Nearest-rank percentile of an ascending slice
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

pub fn summarize_latencies(mut latencies: Vec<f64>) -> LatencySummary {
    if latencies.is_empty() {
        return LatencySummary::default();
    }
    latencies.sort_by(|a, b| a.total_cmp(b));
    let mean = latencies.iter().sum::<f64>() / latencies.len() as f64;

    LatencySummary {
        min_ms: latencies[0],
        mean_ms: mean,
        p50_ms: percentile(&latencies, 50.0),
        p95_ms: percentile(&latencies, 95.0),
        p99_ms: percentile(&latencies, 99.0),
        max_ms: latencies[latencies.len() - 1],
    }
}

/// Flat sleep so one iteration takes at least 1/rate seconds, cut short at the deadline
async fn pace(iteration_started: Instant, rate: f64, deadline: Instant) {
    if rate <= 0.0 {
        return;
    }
    let interval = Duration::try_from_secs_f64(1.0 / rate).unwrap_or(Duration::MAX);
    let wait = interval
        .saturating_sub(iteration_started.elapsed())
        .min(deadline.saturating_duration_since(Instant::now()));
    if !wait.is_zero() {
        tokio::time::sleep(wait).await;
    }
}

async fn http_worker(client: Client, config: LoadTestConfig, deadline: Instant) -> WorkerStats {
    let mut stats = WorkerStats::default();
    let LoadMode::Http { method, body, headers } = &config.mode else {
        return stats;
    };

    while Instant::now() < deadline {
        let started = Instant::now();
        let mut request = client.request(method.clone(), &config.target);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            request = request.body(body.clone());
        }

        stats.total += 1;
        match request.send().await {
            Ok(response) => {
                let status = response.status();
                *stats.status_codes.entry(status.as_u16()).or_insert(0) += 1;
                match response.bytes().await {
                    Ok(bytes) => {
                        stats.bytes += bytes.len() as u64;
                        stats.latencies_ms.push(started.elapsed().as_secs_f64() * 1000.0);
                        if status.is_success() || status.is_redirection() {
                            stats.successes += 1;
                        } else {
                            stats.failures += 1;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "failed reading response body");
                        stats.errors += 1;
                    }
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "request failed");
                stats.errors += 1;
            }
        }

        pace(started, config.rate_per_worker, deadline).await;
    }
    stats
}

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Send one message and wait for the next data frame
async fn ws_round_trip(stream: &mut WsStream, message: &str) -> Result<usize> {
    stream.send(Message::Text(message.to_string())).await?;
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text.len()),
            Some(Ok(Message::Binary(data))) => return Ok(data.len()),
            Some(Ok(Message::Close(_))) | None => bail!("connection closed"),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

async fn ws_worker(config: LoadTestConfig, deadline: Instant) -> WorkerStats {
    let mut stats = WorkerStats::default();
    let LoadMode::WebSocket { message } = &config.mode else {
        return stats;
    };
    let mut connection: Option<WsStream> = None;

    while Instant::now() < deadline {
        let started = Instant::now();
        stats.total += 1;

        if connection.is_none() {
            match timeout(config.timeout, tokio_tungstenite::connect_async(config.target.as_str())).await {
                Ok(Ok((stream, _))) => connection = Some(stream),
                Ok(Err(e)) => {
                    tracing::debug!(error = %e, "websocket connect failed");
                    stats.errors += 1;
                    pace(started, config.rate_per_worker.max(10.0), deadline).await;
                    continue;
                }
                Err(_) => {
                    stats.errors += 1;
                    continue;
                }
            }
        }

        let Some(stream) = connection.as_mut() else { continue };
        match timeout(config.timeout, ws_round_trip(stream, message)).await {
            Ok(Ok(bytes)) => {
                stats.successes += 1;
                stats.bytes += bytes as u64;
                stats.latencies_ms.push(started.elapsed().as_secs_f64() * 1000.0);
            }
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "websocket round trip failed");
                stats.errors += 1;
                connection = None;
            }
            Err(_) => {
                stats.errors += 1;
                connection = None;
            }
        }

        pace(started, config.rate_per_worker, deadline).await;
    }

    if let Some(mut stream) = connection {
        let _ = stream.close(None).await;
    }
    stats
}

fn validate(config: &LoadTestConfig) -> Result<()> {
    let url = url::Url::parse(&config.target).with_context(|| format!("Invalid target URL: {}", config.target))?;
    match (&config.mode, url.scheme()) {
        (LoadMode::Http { .. }, "http" | "https") => {}
        (LoadMode::WebSocket { .. }, "ws" | "wss") => {}
        (LoadMode::Http { .. }, other) => bail!("HTTP mode needs an http(s) URL, got {}://", other),
        (LoadMode::WebSocket { .. }, other) => bail!("WebSocket mode needs a ws(s) URL, got {}://", other),
    }
    if config.workers == 0 {
        bail!("At least one worker is required");
    }
    if config.duration.is_zero() {
        bail!("Duration must be positive");
    }
    if !config.rate_per_worker.is_finite() || config.rate_per_worker < 0.0 {
        bail!("Rate must be a finite number >= 0, got {}", config.rate_per_worker);
    }
    Ok(())
}

pub async fn run_load_test(config: &LoadTestConfig) -> Result<LoadTestReport> {
    validate(config)?;

    let mode = match config.mode {
        LoadMode::Http { .. } => "http",
        LoadMode::WebSocket { .. } => "websocket",
    };
    println!(
        "{}",
        format!(
            "[*] {} workers -> {} ({}) for {:?}{}",
            config.workers,
            config.target,
            mode,
            config.duration,
            if config.rate_per_worker > 0.0 {
                format!(", {} req/s per worker", config.rate_per_worker)
            } else {
                String::new()
            }
        )
        .cyan()
    );

    let client = build_client(&HttpOptions::default().with_timeout(config.timeout))?;
    let started = Instant::now();
    let deadline = started + config.duration;

    let mut handles = Vec::with_capacity(config.workers);
    for _ in 0..config.workers {
        let config = config.clone();
        let handle = match config.mode {
            LoadMode::Http { .. } => tokio::spawn(http_worker(client.clone(), config, deadline)),
            LoadMode::WebSocket { .. } => tokio::spawn(ws_worker(config, deadline)),
        };
        handles.push(handle);
    }

    let mut stats = WorkerStats::default();
    for handle in handles {
        match handle.await {
            Ok(worker) => stats.merge(worker),
            Err(e) => bail!("Load worker failed: {}", e),
        }
    }

    let elapsed = started.elapsed().as_secs_f64();
    Ok(LoadTestReport {
        target: config.target.clone(),
        mode: mode.to_string(),
        workers: config.workers,
        total: stats.total,
        successes: stats.successes,
        failures: stats.failures,
        errors: stats.errors,
        status_codes: stats.status_codes,
        bytes_received: stats.bytes,
        latency: summarize_latencies(stats.latencies_ms),
        elapsed_secs: elapsed,
        throughput_rps: if elapsed > 0.0 { stats.total as f64 / elapsed } else { 0.0 },
    })
}

pub fn display_report(report: &LoadTestReport) {
    println!("\n{}", "═══════════════════════════════════════════════════════════════".yellow().bold());
    println!("{}", "  LOAD TEST SUMMARY".yellow().bold());
    println!("{}", "═══════════════════════════════════════════════════════════════".yellow().bold());
    println!("{}", format!("Target:     {} ({})", report.target, report.mode).cyan());
    println!("{}", format!("Requests:   {} in {:.2}s ({:.1} req/s)", report.total, report.elapsed_secs, report.throughput_rps).cyan());
    println!("{}", format!("Successes:  {}", report.successes).green());
    println!("{}", format!("Failures:   {}", report.failures).yellow());
    println!("{}", format!("Errors:     {}", report.errors).red());
    println!("{}", format!("Received:   {} bytes", report.bytes_received).cyan());
    if !report.status_codes.is_empty() {
        let codes: Vec<String> = report.status_codes.iter().map(|(c, n)| format!("{}={}", c, n)).collect();
        println!("{}", format!("Status:     {}", codes.join(", ")).cyan());
    }
    let l = &report.latency;
    println!(
        "{}",
        format!(
            "Latency ms: min {:.1} | mean {:.1} | p50 {:.1} | p95 {:.1} | p99 {:.1} | max {:.1}",
            l.min_ms, l.mean_ms, l.p50_ms, l.p95_ms, l.p99_ms, l.max_ms
        )
        .cyan()
    );
}

pub fn save_report(report: &LoadTestReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize load test report")?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}
