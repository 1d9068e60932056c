// footprint.rs - Username footprint finder
// Purpose: Check which platforms have a profile for a username. Platform
//          definitions come from JSON (embedded default or --platforms file),
//          results are cached in SQLite and every live check is logged
//
// Detection modes:
//   status_code  - found when the profile URL answers 2xx
//   message      - found when status < 400 and no error_msg marker is in the body
//   response_url - redirects not followed; found when 2xx and the URL landed on
//                  does not start with error_url

use crate::footprint_store::FootprintStore;
use crate::http_client::{build_client, random_accept_language, random_user_agent, HttpOptions};
use anyhow::{anyhow, bail, Context, Result};
use colored::*;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, Instant};

pub const DEFAULT_PLATFORMS_JSON: &str = include_str!("../data/platforms.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    StatusCode,
    Message,
    ResponseUrl,
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
        None => Vec::new(),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Platform {
    pub name: String,
    /// Profile URL with `{}` where the username goes
    pub url: String,
    #[serde(default = "default_category")]
    pub category: String,
    pub error_type: ErrorType,
    #[serde(default, deserialize_with = "one_or_many")]
    pub error_msg: Vec<String>,
    #[serde(default)]
    pub error_url: Option<String>,
    #[serde(default)]
    pub regex_check: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_category() -> String {
    "other".to_string()
}

impl Platform {
    pub fn profile_url(&self, username: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(username.as_bytes()).collect();
        self.url.replace("{}", &encoded)
    }

    /// Whether `username` is acceptable to this platform
    pub fn accepts(&self, username: &str) -> Result<bool> {
        match &self.regex_check {
            Some(pattern) => {
                let re = Regex::new(pattern).with_context(|| format!("Invalid regex_check for {}", self.name))?;
                Ok(re.is_match(username))
            }
            None => Ok(true),
        }
    }
}

/// Parse a platform definition document keyed by platform key
pub fn load_platforms(json: &str) -> Result<BTreeMap<String, Platform>> {
    let platforms: BTreeMap<String, Platform> =
        serde_json::from_str(json).context("Failed to parse platform definitions")?;

    for (key, platform) in &platforms {
        if !platform.url.contains("{}") {
            bail!("Platform '{}' url has no {{}} placeholder", key);
        }
        if platform.error_type == ErrorType::ResponseUrl && platform.error_url.is_none() {
            bail!("Platform '{}' uses response_url but has no error_url", key);
        }
        if platform.error_type == ErrorType::Message && platform.error_msg.is_empty() {
            bail!("Platform '{}' uses message but has no error_msg", key);
        }
    }
    Ok(platforms)
}

pub fn default_platforms() -> Result<BTreeMap<String, Platform>> {
    load_platforms(DEFAULT_PLATFORMS_JSON)
}

pub fn load_platforms_file(path: &Path) -> Result<BTreeMap<String, Platform>> {
    let json = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    load_platforms(&json)
}

/// Keep only the requested keys / categories; unknown keys are an error
pub fn filter_platforms(
    platforms: BTreeMap<String, Platform>,
    only: &[String],
    categories: &[String],
) -> Result<BTreeMap<String, Platform>> {
    for key in only {
        if !platforms.contains_key(key) {
            bail!("Unknown platform: {}", key);
        }
    }
    let categories: BTreeSet<String> = categories.iter().map(|c| c.to_lowercase()).collect();

    Ok(platforms
        .into_iter()
        .filter(|(key, _)| only.is_empty() || only.contains(key))
        .filter(|(_, p)| categories.is_empty() || categories.contains(&p.category.to_lowercase()))
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Found,
    NotFound,
    Invalid,
    Error,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Found => "found",
            CheckStatus::NotFound => "not_found",
            CheckStatus::Invalid => "invalid",
            CheckStatus::Error => "error",
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "found" => Ok(CheckStatus::Found),
            "not_found" => Ok(CheckStatus::NotFound),
            "invalid" => Ok(CheckStatus::Invalid),
            "error" => Ok(CheckStatus::Error),
            other => Err(anyhow!("Unknown check status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub username: String,
    pub platform_key: String,
    pub platform_name: String,
    pub category: String,
    pub url: String,
    pub status: CheckStatus,
    pub http_status: Option<u16>,
    pub elapsed_ms: u64,
    pub from_cache: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FootprintConfig {
    pub workers: usize,
    pub timeout: Duration,
    pub stealth: bool,
    /// Random delay range between requests in stealth mode
    pub jitter: (Duration, Duration),
    pub cache_ttl: Duration,
    pub use_cache: bool,
    pub proxy: Option<String>,
    pub show_progress: bool,
}

impl FootprintConfig {
    pub const STEALTH_WORKERS: usize = 3;

    pub fn effective_workers(&self) -> usize {
        if self.stealth {
            Self::STEALTH_WORKERS
        } else {
            self.workers.max(1)
        }
    }
}

impl Default for FootprintConfig {
    fn default() -> Self {
        Self {
            workers: 20,
            timeout: Duration::from_secs(15),
            stealth: false,
            jitter: (Duration::from_millis(500), Duration::from_millis(2500)),
            cache_ttl: Duration::from_secs(24 * 3600),
            use_cache: true,
            proxy: None,
            show_progress: false,
        }
    }
}

/// Decide found / not found from what the platform returned
pub fn classify(platform: &Platform, http_status: u16, landed_url: &str, body: &str) -> CheckStatus {
    let found = match platform.error_type {
        ErrorType::StatusCode => (200..300).contains(&http_status),
        ErrorType::Message => {
            http_status < 400 && !platform.error_msg.iter().any(|marker| body.contains(marker.as_str()))
        }
        ErrorType::ResponseUrl => {
            let error_url = platform.error_url.as_deref().unwrap_or_default();
            (200..300).contains(&http_status) && (error_url.is_empty() || !landed_url.starts_with(error_url))
        }
    };

    if found { CheckStatus::Found } else { CheckStatus::NotFound }
}

struct Clients {
    follow: Client,
    no_follow: Client,
}

impl Clients {
    fn new(config: &FootprintConfig) -> Result<Self> {
        let options = HttpOptions::default()
            .with_timeout(config.timeout)
            .with_proxy(config.proxy.clone());
        Ok(Self {
            follow: build_client(&options)?,
            no_follow: build_client(&options.without_redirects())?,
        })
    }
}

async fn fetch_profile(
    clients: &Clients,
    platform: &Platform,
    url: &str,
    stealth: bool,
) -> Result<(u16, String, String)> {
    let client = match platform.error_type {
        ErrorType::ResponseUrl => &clients.no_follow,
        _ => &clients.follow,
    };

    let mut request = client.get(url);
    for (name, value) in &platform.headers {
        request = request.header(name.as_str(), value.as_str());
    }
    if stealth {
        request = request
            .header(reqwest::header::USER_AGENT, random_user_agent())
            .header(reqwest::header::ACCEPT_LANGUAGE, random_accept_language());
    }

    let response = request.send().await?;
    let status = response.status().as_u16();
    let landed = match response.headers().get(reqwest::header::LOCATION).and_then(|v| v.to_str().ok()) {
        Some(location) => response
            .url()
            .join(location)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| location.to_string()),
        None => response.url().to_string(),
    };
    let body = if platform.error_type == ErrorType::Message {
        response.text().await?
    } else {
        String::new()
    };
    Ok((status, landed, body))
}

async fn check_one(
    clients: &Clients,
    store: Option<&FootprintStore>,
    config: &FootprintConfig,
    username: &str,
    key: &str,
    platform: &Platform,
) -> CheckResult {
    let url = platform.profile_url(username);
    let mut result = CheckResult {
        username: username.to_string(),
        platform_key: key.to_string(),
        platform_name: platform.name.clone(),
        category: platform.category.clone(),
        url: url.clone(),
        status: CheckStatus::Invalid,
        http_status: None,
        elapsed_ms: 0,
        from_cache: false,
        error: None,
    };

    match platform.accepts(username) {
        Ok(true) => {}
        Ok(false) => return result,
        Err(e) => {
            result.status = CheckStatus::Error;
            result.error = Some(format!("{:#}", e));
            return result;
        }
    }

    if config.use_cache {
        if let Some(store) = store {
            match store.cache_get(username, key, config.cache_ttl) {
                Ok(Some(cached)) => {
                    result.status = cached.status;
                    result.http_status = cached.http_status;
                    result.url = cached.url;
                    result.from_cache = true;
                    return result;
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "cache lookup failed"),
            }
        }
    }

    if config.stealth {
        let (min, max) = config.jitter;
        let delay_ms = if max > min {
            rand::thread_rng().gen_range(min.as_millis() as u64..=max.as_millis() as u64)
        } else {
            min.as_millis() as u64
        };
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    let started = Instant::now();
    match fetch_profile(clients, platform, &url, config.stealth).await {
        Ok((status, landed, body)) => {
            result.http_status = Some(status);
            result.status = classify(platform, status, &landed, &body);
        }
        Err(e) => {
            tracing::debug!(platform = key, %url, error = %e, "profile check failed");
            result.status = CheckStatus::Error;
            result.error = Some(e.to_string());
        }
    }
    result.elapsed_ms = started.elapsed().as_millis() as u64;

    if let Some(store) = store {
        if let Err(e) = store.record_history(&result) {
            tracing::warn!(error = %e, "failed to record history");
        }
        if let Err(e) = store.cache_put(&result) {
            tracing::warn!(error = %e, "failed to update cache");
        }
    }

    result
}

/// Check every username against every platform
pub async fn run_footprint(
    usernames: &[String],
    platforms: &BTreeMap<String, Platform>,
    config: &FootprintConfig,
    store: Option<&FootprintStore>,
) -> Result<Vec<CheckResult>> {
    if usernames.is_empty() {
        bail!("No usernames given");
    }
    if platforms.is_empty() {
        bail!("No platforms selected");
    }

    let clients = Clients::new(config)?;
    let workers = config.effective_workers();

    let jobs: Vec<(&String, &String, &Platform)> = usernames
        .iter()
        .flat_map(|u| platforms.iter().map(move |(k, p)| (u, k, p)))
        .collect();

    println!(
        "{}",
        format!(
            "[*] Checking {} username(s) on {} platforms with {} workers{}",
            usernames.len(),
            platforms.len(),
            workers,
            if config.stealth { " (stealth)" } else { "" }
        )
        .cyan()
    );

    let pb = if config.show_progress {
        let pb = ProgressBar::new(jobs.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("    {spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} checks ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        pb
    } else {
        ProgressBar::hidden()
    };

    let clients = &clients;
    let mut results: Vec<CheckResult> = stream::iter(jobs)
        .map(|(username, key, platform)| {
            let pb = pb.clone();
            async move {
                let result = check_one(clients, store, config, username, key, platform).await;
                if result.status == CheckStatus::Found {
                    pb.println(format!("{}", format!("    [+] {}: {}", result.platform_name, result.url).green()));
                }
                pb.inc(1);
                result
            }
        })
        .buffer_unordered(workers)
        .collect()
        .await;
    pb.finish_and_clear();

    results.sort_by(|a, b| a.username.cmp(&b.username).then_with(|| a.platform_key.cmp(&b.platform_key)));
    Ok(results)
}

/// Per-username summary of found profiles
pub fn display_summary(results: &[CheckResult]) {
    let mut by_user: BTreeMap<&str, Vec<&CheckResult>> = BTreeMap::new();
    for r in results {
        by_user.entry(r.username.as_str()).or_default().push(r);
    }

    for (username, checks) in by_user {
        let found: Vec<_> = checks.iter().filter(|r| r.status == CheckStatus::Found).collect();
        let errors = checks.iter().filter(|r| r.status == CheckStatus::Error).count();
        let invalid = checks.iter().filter(|r| r.status == CheckStatus::Invalid).count();
        let cached = checks.iter().filter(|r| r.from_cache).count();

        println!("\n{}", "═══════════════════════════════════════════════════════════════".yellow().bold());
        println!("{}", format!("  FOOTPRINT: {}", username).yellow().bold());
        println!("{}", "═══════════════════════════════════════════════════════════════".yellow().bold());
        println!(
            "{}",
            format!(
                "Checked: {} | Found: {} | Errors: {} | Invalid: {} | Cached: {}",
                checks.len(),
                found.len(),
                errors,
                invalid,
                cached
            )
            .cyan()
        );
        for r in found {
            println!("{}", format!("  [+] {:<20} {}", r.platform_name, r.url).green());
        }
    }
}

/// Save results as JSON, or CSV when the extension is .csv
pub fn save_results(results: &[CheckResult], path: &Path) -> Result<()> {
    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);

    if is_csv {
        let mut writer = csv::Writer::from_path(path).with_context(|| format!("Failed to create {}", path.display()))?;
        for result in results {
            writer.serialize(result).context("Failed to write CSV row")?;
        }
        writer.flush()?;
    } else {
        let json = serde_json::to_string_pretty(results).context("Failed to serialize results")?;
        fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    }
    Ok(())
}

pub fn print_history(store: &FootprintStore, username: &str) -> Result<()> {
    let history = store.history_for(username)?;
    if history.is_empty() {
        println!("{}", format!("[!] No history for {}", username).yellow());
        return Ok(());
    }

    println!("{}", format!("[*] {} stored checks for {}", history.len(), username).cyan());
    for record in history {
        let line = format!(
            "  {}  {:<18} {:<10} {:>4}  {}",
            record.checked_at,
            record.platform_key,
            record.status,
            record.http_status.map(|s| s.to_string()).unwrap_or_else(|| "-".into()),
            record.url
        );
        match record.status {
            CheckStatus::Found => println!("{}", line.green()),
            CheckStatus::Error => println!("{}", line.red()),
            _ => println!("{}", line),
        }
    }
    Ok(())
}
