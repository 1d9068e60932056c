// shortener.rs - URL shortener with provider fallback
// Purpose: Shorten a URL through is.gd, falling back to cleanuri. The first
//          provider that answers with a short link wins

use anyhow::{anyhow, bail, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

pub const ISGD_BASE: &str = "https://is.gd";
pub const CLEANURI_BASE: &str = "https://cleanuri.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Isgd,
    Cleanuri,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Isgd => f.write_str("is.gd"),
            Provider::Cleanuri => f.write_str("cleanuri"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShortenerConfig {
    pub isgd_base: String,
    pub cleanuri_base: String,
    /// Restrict to one provider instead of the fallback chain
    pub provider: Option<Provider>,
}

impl Default for ShortenerConfig {
    fn default() -> Self {
        Self {
            isgd_base: ISGD_BASE.to_string(),
            cleanuri_base: CLEANURI_BASE.to_string(),
            provider: None,
        }
    }
}

impl ShortenerConfig {
    fn chain(&self) -> Vec<Provider> {
        match self.provider {
            Some(p) => vec![p],
            None => vec![Provider::Isgd, Provider::Cleanuri],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShortenedUrl {
    pub original_url: String,
    pub short_url: String,
    pub provider: Provider,
}

/// Accept http/https URLs, adding `https://` when no scheme was given
pub fn normalize_url(input: &str) -> Result<Url> {
    let input = input.trim();
    if input.is_empty() {
        bail!("URL is empty");
    }
    let candidate = if input.contains("://") {
        input.to_string()
    } else {
        format!("https://{}", input)
    };

    let parsed = Url::parse(&candidate).with_context(|| format!("Invalid URL: {}", input))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => bail!("Unsupported URL scheme: {}", other),
    }
    if parsed.host_str().map(|h| h.is_empty()).unwrap_or(true) {
        bail!("URL has no host: {}", input);
    }
    Ok(parsed)
}

async fn shorten_isgd(client: &Client, base: &str, url: &str) -> Result<String> {
    let endpoint = format!("{}/create.php", base.trim_end_matches('/'));
    let body = client
        .get(&endpoint)
        .query(&[("format", "simple"), ("url", url)])
        .send()
        .await
        .context("is.gd request failed")?
        .text()
        .await
        .context("Failed to read is.gd response")?;

    let body = body.trim();
    if body.starts_with("Error") {
        bail!("{}", body);
    }
    if !body.starts_with("http") {
        bail!("Unexpected is.gd response: {}", body.chars().take(120).collect::<String>());
    }
    Ok(body.to_string())
}

#[derive(Deserialize)]
struct CleanuriResponse {
    result_url: Option<String>,
    error: Option<String>,
}

async fn shorten_cleanuri(client: &Client, base: &str, url: &str) -> Result<String> {
    let endpoint = format!("{}/api/v1/shorten", base.trim_end_matches('/'));
    let response: CleanuriResponse = client
        .post(&endpoint)
        .form(&[("url", url)])
        .send()
        .await
        .context("cleanuri request failed")?
        .json()
        .await
        .context("Failed to parse cleanuri response")?;

    match (response.result_url, response.error) {
        (Some(short), _) if !short.is_empty() => Ok(short),
        (_, Some(error)) => Err(anyhow!("{}", error)),
        _ => Err(anyhow!("cleanuri returned neither result_url nor error")),
    }
}

/// Shorten `input` with the configured providers in order
pub async fn shorten(client: &Client, input: &str, config: &ShortenerConfig) -> Result<ShortenedUrl> {
    let url = normalize_url(input)?;
    let url = url.as_str();
    let mut failures = Vec::new();

    for provider in config.chain() {
        let attempt = match provider {
            Provider::Isgd => shorten_isgd(client, &config.isgd_base, url).await,
            Provider::Cleanuri => shorten_cleanuri(client, &config.cleanuri_base, url).await,
        };
        match attempt {
            Ok(short_url) => {
                return Ok(ShortenedUrl {
                    original_url: url.to_string(),
                    short_url,
                    provider,
                });
            }
            Err(e) => {
                tracing::warn!(%provider, error = %e, "shortener provider failed");
                failures.push(format!("{}: {:#}", provider, e));
            }
        }
    }

    Err(anyhow!("All shortening providers failed ({})", failures.join("; ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{base_url, spawn_server, test_client};
    use axum::extract::{Form, Query};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::collections::HashMap;

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("example.com/page").unwrap().as_str(), "https://example.com/page");
        assert_eq!(normalize_url("http://example.com").unwrap().as_str(), "http://example.com/");
        assert!(normalize_url("ftp://example.com").is_err());
        assert!(normalize_url("").is_err());
        assert!(normalize_url("https://").is_err());
    }

    async fn providers(isgd_ok: bool) -> String {
        let app = Router::new()
            .route(
                "/create.php",
                get(move |Query(q): Query<HashMap<String, String>>| async move {
                    assert_eq!(q.get("format").map(String::as_str), Some("simple"));
                    if isgd_ok {
                        "https://is.gd/abc123".to_string()
                    } else {
                        "Error: Sorry, the URL you entered is on our internal blacklist.".to_string()
                    }
                }),
            )
            .route(
                "/api/v1/shorten",
                post(|Form(f): Form<HashMap<String, String>>| async move {
                    if f.get("url").map(|u| u.starts_with("https://")).unwrap_or(false) {
                        Json(serde_json::json!({ "result_url": "https://cleanuri.com/xyz" }))
                    } else {
                        Json(serde_json::json!({ "error": "API Error: URL is empty" }))
                    }
                }),
            );
        base_url(spawn_server(app).await)
    }

    fn config(base: &str) -> ShortenerConfig {
        ShortenerConfig {
            isgd_base: base.to_string(),
            cleanuri_base: base.to_string(),
            provider: None,
        }
    }

    #[tokio::test]
    async fn test_first_provider_wins() {
        let base = providers(true).await;
        let result = shorten(&test_client(), "example.com", &config(&base)).await.unwrap();
        assert_eq!(result.provider, Provider::Isgd);
        assert_eq!(result.short_url, "https://is.gd/abc123");
        assert_eq!(result.original_url, "https://example.com/");
    }

    #[tokio::test]
    async fn test_falls_back_to_cleanuri() {
        let base = providers(false).await;
        let result = shorten(&test_client(), "https://example.com/x", &config(&base)).await.unwrap();
        assert_eq!(result.provider, Provider::Cleanuri);
        assert_eq!(result.short_url, "https://cleanuri.com/xyz");
    }

    #[tokio::test]
    async fn test_forced_provider_reports_failure() {
        let base = providers(false).await;
        let mut cfg = config(&base);
        cfg.provider = Some(Provider::Isgd);
        let err = shorten(&test_client(), "https://example.com", &cfg).await.unwrap_err();
        assert!(err.to_string().contains("is.gd"));
        assert!(err.to_string().contains("blacklist"));
    }

    #[tokio::test]
    async fn test_all_providers_fail() {
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let base = format!("http://127.0.0.1:{}", port);
        let err = shorten(&test_client(), "https://example.com", &config(&base)).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("is.gd"));
        assert!(message.contains("cleanuri"));
    }
}
