// dir_bruteforce.rs - Directory and file discovery
// Purpose: Dirs stage of the domain scan. Request a wordlist of paths against
//          the base URL, drop soft-404 responses using a baseline taken from
//          random paths, keep the interesting status codes

use anyhow::{Context, Result};
use colored::*;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use lazy_static::lazy_static;
use rand::Rng;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;

lazy_static! {
    static ref TITLE_RE: Regex = Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap();
}

/// Status codes worth reporting
pub const INTERESTING_STATUS: &[u16] = &[200, 204, 301, 302, 307, 401, 403];

/// Bytes of body kept for content validation by the vuln stage
const SAMPLE_BYTES: usize = 4096;

pub const DEFAULT_PATHS: &[&str] = &[
    "/admin", "/administrator", "/login", "/wp-admin/", "/wp-login.php", "/user/login",
    "/dashboard", "/cpanel", "/phpmyadmin/", "/adminer.php",
    "/api", "/api/v1", "/graphql", "/swagger", "/swagger-ui.html", "/api-docs", "/openapi.json",
    "/robots.txt", "/sitemap.xml", "/crossdomain.xml", "/security.txt", "/.well-known/security.txt",
    "/backup", "/backups", "/old", "/tmp", "/test", "/dev", "/staging", "/uploads", "/files",
    "/images", "/static", "/assets", "/includes", "/config", "/cgi-bin/", "/logs", "/private",
    "/.git/config", "/.git/HEAD", "/.env", "/.env.local", "/.env.production", "/.htaccess",
    "/.htpasswd", "/.DS_Store", "/.svn/entries", "/.idea/workspace.xml", "/.vscode/settings.json",
    "/phpinfo.php", "/info.php", "/server-status", "/server-info", "/backup.sql", "/dump.sql",
    "/database.sql", "/db.sql", "/backup.zip", "/site.tar.gz", "/web.config", "/config.php.bak",
    "/wp-config.php.bak", "/composer.json", "/package.json", "/Dockerfile", "/docker-compose.yml",
    "/actuator", "/actuator/env", "/actuator/health", "/metrics", "/debug", "/console", "/status",
    "/health", "/.well-known/openid-configuration",
];

#[derive(Debug, Clone)]
pub struct DirScanConfig {
    pub paths: Vec<String>,
    pub concurrency: usize,
    pub baseline_samples: usize,
    pub show_progress: bool,
}

impl Default for DirScanConfig {
    fn default() -> Self {
        Self {
            paths: DEFAULT_PATHS.iter().map(|p| p.to_string()).collect(),
            concurrency: 20,
            baseline_samples: 3,
            show_progress: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirEntry {
    pub path: String,
    pub url: String,
    pub status: u16,
    pub size: usize,
    pub title: Option<String>,
    pub redirect: Option<String>,
    #[serde(skip)]
    pub sample: String,
}

/// Response fingerprint of a path that should not exist
#[derive(Debug, Clone, PartialEq)]
pub struct Baseline {
    pub status: u16,
    pub size: usize,
    pub content_hash: u64,
    pub title: Option<String>,
}

impl Baseline {
    /// Does a response look like this soft-404 page
    pub fn matches(&self, status: u16, size: usize, content_hash: u64, title: Option<&str>) -> bool {
        if content_hash == self.content_hash {
            return true;
        }
        if status != self.status {
            return false;
        }
        if size.abs_diff(self.size) <= (self.size / 10).max(32) {
            return true;
        }
        matches!((title, self.title.as_deref()), (Some(a), Some(b)) if a == b && !a.is_empty())
    }
}

/// Hash of whitespace-normalized lowercase content
pub fn content_hash(content: &str) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let normalized = content.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ");
    let mut hasher = DefaultHasher::new();
    normalized.hash(&mut hasher);
    hasher.finish()
}

pub fn extract_title(html: &str) -> Option<String> {
    TITLE_RE
        .captures(html)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty())
}

/// Read a wordlist: one path per line, blanks and `#` comments skipped
pub fn load_wordlist(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read wordlist {:?}", path))?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| if l.starts_with('/') { l.to_string() } else { format!("/{}", l) })
        .collect())
}

fn sample_of(body: &str) -> String {
    let mut end = body.len().min(SAMPLE_BYTES);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

async fn fetch(client: &Client, url: &str) -> Option<(u16, Option<String>, String)> {
    let response = match client.get(url).send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!(%url, error = %e, "path request failed");
            return None;
        }
    };
    let status = response.status().as_u16();
    let location = response
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.text().await.unwrap_or_default();
    Some((status, location, body))
}

/// Request a few random paths to learn what "not found" looks like
pub async fn get_baselines(client: &Client, base_url: &str, samples: usize) -> Vec<Baseline> {
    let extensions = ["", ".php", ".html", ".txt", ".asp"];
    let mut baselines = Vec::new();

    for i in 0..samples {
        let token: u64 = rand::thread_rng().gen_range(1_000_000_000..u64::MAX);
        let ext = extensions[i % extensions.len()];
        let url = format!("{}/nonexistent-{:x}{}", base_url, token, ext);

        if let Some((status, _, body)) = fetch(client, &url).await {
            let baseline = Baseline {
                status,
                size: body.len(),
                content_hash: content_hash(&body),
                title: extract_title(&body),
            };
            if !baselines.contains(&baseline) {
                baselines.push(baseline);
            }
        }
    }

    baselines
}

/// Brute-force `config.paths` against `base_url` (no trailing slash)
///
/// The client should not follow redirects so 301/302/307 are visible.
pub async fn scan_directories(client: &Client, base_url: &str, config: &DirScanConfig) -> Vec<DirEntry> {
    let base_url = base_url.trim_end_matches('/').to_string();
    let baselines = get_baselines(client, &base_url, config.baseline_samples).await;
    for baseline in &baselines {
        println!(
            "{}",
            format!("    [*] Soft-404 baseline: status={}, size={} bytes", baseline.status, baseline.size).cyan()
        );
    }

    let pb = if config.show_progress {
        let pb = ProgressBar::new(config.paths.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("    {spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} paths")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        pb
    } else {
        ProgressBar::hidden()
    };

    let mut results: Vec<DirEntry> = stream::iter(config.paths.clone())
        .map(|path| {
            let client = client.clone();
            let url = format!("{}{}", base_url, path);
            let baselines = &baselines;
            let pb = pb.clone();
            async move {
                let fetched = fetch(&client, &url).await;
                pb.inc(1);
                let (status, redirect, body) = fetched?;

                if !INTERESTING_STATUS.contains(&status) {
                    return None;
                }

                let hash = content_hash(&body);
                let title = extract_title(&body);
                if baselines
                    .iter()
                    .any(|b| b.matches(status, body.len(), hash, title.as_deref()))
                {
                    return None;
                }

                Some(DirEntry {
                    path,
                    url,
                    status,
                    size: body.len(),
                    title,
                    redirect,
                    sample: sample_of(&body),
                })
            }
        })
        .buffer_unordered(config.concurrency.max(1))
        .filter_map(|r| async move { r })
        .collect()
        .await;
    pb.finish_and_clear();

    results.sort_by(|a, b| a.path.cmp(&b.path));
    for entry in &results {
        println!("{}", format!("    [+] {} [{}] {} bytes", entry.url, entry.status, entry.size).green());
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::{build_client, HttpOptions};
    use crate::test_support::{base_url, spawn_server};
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Redirect};
    use axum::routing::get;
    use axum::Router;

    #[test]
    fn test_content_hash_normalizes_whitespace_and_case() {
        assert_eq!(content_hash("Not   Found\n"), content_hash("not found"));
        assert_ne!(content_hash("not found"), content_hash("found"));
    }

    #[test]
    fn test_baseline_matching() {
        let base = Baseline {
            status: 200,
            size: 5000,
            content_hash: 1,
            title: Some("Home".into()),
        };
        assert!(base.matches(404, 10, 1, None));
        assert!(base.matches(200, 5050, 2, None));
        assert!(base.matches(200, 9000, 2, Some("Home")));
        assert!(!base.matches(200, 9000, 2, Some("Admin")));
        assert!(!base.matches(403, 5000, 2, None));
    }

    #[test]
    fn test_load_wordlist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("words.txt");
        std::fs::write(&path, "# comment\nadmin\n\n/.env\n  backup  \n").unwrap();
        assert_eq!(load_wordlist(&path).unwrap(), vec!["/admin", "/.env", "/backup"]);
    }

    #[tokio::test]
    async fn test_scan_filters_soft_404() {
        // Catch-all 200 page for unknown paths, like many SPAs
        let app = Router::new()
            .route("/admin", get(|| async { (StatusCode::FORBIDDEN, "forbidden").into_response() }))
            .route("/.env", get(|| async { "DB_PASSWORD=hunter2\nAPP_KEY=base64:abc\n" }))
            .route("/old", get(|| async { Redirect::temporary("/new") }))
            .fallback(|| async {
                format!("<html><title>Shop</title><body>{}</body></html>", "catch all page ".repeat(40))
            });
        let addr = spawn_server(app).await;
        let client = build_client(&HttpOptions::default().without_redirects()).unwrap();

        let config = DirScanConfig {
            paths: vec!["/admin".into(), "/.env".into(), "/old".into(), "/missing".into()],
            ..Default::default()
        };
        let results = scan_directories(&client, &base_url(addr), &config).await;

        let paths: Vec<&str> = results.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["/.env", "/admin", "/old"]);

        let env = results.iter().find(|r| r.path == "/.env").unwrap();
        assert!(env.sample.contains("DB_PASSWORD"));
        let old = results.iter().find(|r| r.path == "/old").unwrap();
        assert_eq!(old.status, 307);
        assert_eq!(old.redirect.as_deref(), Some("/new"));
    }
}
