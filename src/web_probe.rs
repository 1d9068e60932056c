// web_probe.rs - Homepage fetch and technology fingerprinting
// Purpose: First stage of the domain scan. Fetch https://<domain> (falling
//          back to plain http), keep status/headers/cookies/timing and guess
//          the stack from headers and well-known body markers

use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

/// (marker in lowercase body, technology name)
const BODY_MARKERS: &[(&str, &str)] = &[
    ("wp-content", "WordPress"),
    ("wp-includes", "WordPress"),
    ("drupal.settings", "Drupal"),
    ("/sites/default/files", "Drupal"),
    ("joomla", "Joomla"),
    ("__next_data__", "Next.js"),
    ("/_next/static", "Next.js"),
    ("__nuxt", "Nuxt.js"),
    ("ng-version", "Angular"),
    ("data-reactroot", "React"),
    ("react-dom", "React"),
    ("data-v-", "Vue.js"),
    ("jquery", "jQuery"),
    ("bootstrap", "Bootstrap"),
    ("tailwind", "Tailwind CSS"),
    ("shopify", "Shopify"),
    ("cdn.shopify.com", "Shopify"),
    ("squarespace", "Squarespace"),
    ("wix.com", "Wix"),
    ("gtag(", "Google Analytics"),
    ("googletagmanager.com", "Google Tag Manager"),
    ("cloudflare", "Cloudflare"),
    ("laravel", "Laravel"),
    ("csrfmiddlewaretoken", "Django"),
];

/// (header name, value marker in lowercase, technology)
const HEADER_MARKERS: &[(&str, &str, &str)] = &[
    ("server", "nginx", "Nginx"),
    ("server", "apache", "Apache"),
    ("server", "microsoft-iis", "IIS"),
    ("server", "cloudflare", "Cloudflare"),
    ("server", "litespeed", "LiteSpeed"),
    ("server", "openresty", "OpenResty"),
    ("server", "gunicorn", "Gunicorn"),
    ("server", "caddy", "Caddy"),
    ("x-powered-by", "php", "PHP"),
    ("x-powered-by", "asp.net", "ASP.NET"),
    ("x-powered-by", "express", "Express"),
    ("x-powered-by", "next.js", "Next.js"),
    ("x-aspnet-version", "", "ASP.NET"),
    ("x-drupal-cache", "", "Drupal"),
    ("x-shopify-stage", "", "Shopify"),
    ("cf-ray", "", "Cloudflare"),
    ("x-amz-cf-id", "", "Amazon CloudFront"),
    ("x-vercel-id", "", "Vercel"),
    ("x-github-request-id", "", "GitHub Pages"),
    ("set-cookie", "phpsessid", "PHP"),
    ("set-cookie", "jsessionid", "Java"),
    ("set-cookie", "laravel_session", "Laravel"),
    ("set-cookie", "csrftoken", "Django"),
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpProbe {
    pub requested_url: String,
    pub final_url: String,
    pub status: u16,
    pub response_time_ms: u64,
    /// Lowercase header name -> value (repeated headers joined with ", ")
    pub headers: BTreeMap<String, String>,
    pub server: Option<String>,
    pub powered_by: Option<String>,
    pub content_type: Option<String>,
    pub cookies: Vec<String>,
    pub body_size: usize,
    pub technologies: Vec<String>,
    pub https: bool,
    #[serde(skip)]
    pub body: String,
}

impl HttpProbe {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(|v| v.as_str())
    }

    /// Scheme + host (+ port) of the final URL, without a trailing slash
    pub fn base_url(&self) -> String {
        match url::Url::parse(&self.final_url) {
            Ok(parsed) => {
                let mut base = format!("{}://{}", parsed.scheme(), parsed.host_str().unwrap_or_default());
                if let Some(port) = parsed.port() {
                    base.push_str(&format!(":{}", port));
                }
                base
            }
            Err(_) => self.final_url.trim_end_matches('/').to_string(),
        }
    }
}

/// GET a single URL and capture everything later stages need
pub async fn probe_url(client: &Client, url: &str) -> Result<HttpProbe> {
    let started = Instant::now();
    let response = client.get(url).send().await?;
    let response_time_ms = started.elapsed().as_millis() as u64;

    let status = response.status().as_u16();
    let final_url = response.url().to_string();

    let mut headers: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in response.headers() {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        headers
            .entry(name.as_str().to_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }

    let cookies: Vec<String> = response
        .headers()
        .get_all("set-cookie")
        .iter()
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .collect();

    let body = response.text().await.unwrap_or_default();
    let technologies = fingerprint_technologies(&headers, &body);

    Ok(HttpProbe {
        requested_url: url.to_string(),
        https: final_url.starts_with("https://"),
        final_url,
        status,
        response_time_ms,
        server: headers.get("server").cloned(),
        powered_by: headers.get("x-powered-by").cloned(),
        content_type: headers.get("content-type").cloned(),
        headers,
        cookies,
        body_size: body.len(),
        technologies,
        body,
    })
}

/// Try https first, then plain http
pub async fn fetch_homepage(client: &Client, domain: &str) -> Result<HttpProbe> {
    let mut failures = Vec::new();

    for scheme in ["https", "http"] {
        let url = format!("{}://{}", scheme, domain);
        match probe_url(client, &url).await {
            Ok(probe) => return Ok(probe),
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "homepage fetch failed");
                failures.push(format!("{}: {}", url, e));
            }
        }
    }

    Err(anyhow!("homepage unreachable ({})", failures.join("; ")))
}

/// Guess technologies from response headers and body markers
pub fn fingerprint_technologies(headers: &BTreeMap<String, String>, body: &str) -> Vec<String> {
    let mut technologies: Vec<String> = Vec::new();
    let mut add = |tech: &str| {
        if !technologies.iter().any(|t| t == tech) {
            technologies.push(tech.to_string());
        }
    };

    for (header, marker, tech) in HEADER_MARKERS {
        if let Some(value) = headers.get(*header) {
            if marker.is_empty() || value.to_lowercase().contains(marker) {
                add(tech);
            }
        }
    }

    let body_lower = body.to_lowercase();
    for (marker, tech) in BODY_MARKERS {
        if body_lower.contains(marker) {
            add(tech);
        }
    }

    if let Some(generator) = meta_generator(&body_lower) {
        let name = generator.split_whitespace().next().unwrap_or(&generator).to_string();
        if !name.is_empty() {
            let mut chars = name.chars();
            let capitalized = match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => name,
            };
            add(&capitalized);
        }
    }

    technologies
}

fn meta_generator(body_lower: &str) -> Option<String> {
    let idx = body_lower.find("name=\"generator\"")?;
    let tail = &body_lower[idx..];
    let content_idx = tail.find("content=\"")? + "content=\"".len();
    let rest = &tail[content_idx..];
    let end = rest.find('"')?;
    Some(rest[..end].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{base_url, spawn_server, test_client};
    use axum::http::header;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;

    #[test]
    fn test_fingerprint_from_headers_and_body() {
        let mut headers = BTreeMap::new();
        headers.insert("server".to_string(), "nginx/1.18.0".to_string());
        headers.insert("x-powered-by".to_string(), "PHP/7.4.3".to_string());
        let body = r#"<html><head><meta name="generator" content="WordPress 6.4"></head>
            <link href="/wp-content/themes/x/style.css"><script src="jquery.min.js"></script></html>"#;

        let techs = fingerprint_technologies(&headers, body);
        assert!(techs.contains(&"Nginx".to_string()));
        assert!(techs.contains(&"PHP".to_string()));
        assert!(techs.contains(&"WordPress".to_string()));
        assert!(techs.contains(&"jQuery".to_string()));
        assert_eq!(techs.iter().filter(|t| *t == "WordPress").count(), 1);
    }

    #[tokio::test]
    async fn test_probe_local_server() {
        let app = Router::new().route(
            "/",
            get(|| async {
                (
                    [
                        (header::SERVER, "Apache/2.4.41"),
                        (header::SET_COOKIE, "session=abc; Path=/"),
                        (header::CONTENT_TYPE, "text/html"),
                    ],
                    "<html><title>hi</title><div data-reactroot></div></html>",
                )
                    .into_response()
            }),
        );
        let addr = spawn_server(app).await;
        let url = format!("{}/", base_url(addr));

        let probe = probe_url(&test_client(), &url).await.unwrap();
        assert_eq!(probe.status, 200);
        assert_eq!(probe.server.as_deref(), Some("Apache/2.4.41"));
        assert_eq!(probe.cookies, vec!["session=abc; Path=/"]);
        assert!(!probe.https);
        assert!(probe.technologies.contains(&"Apache".to_string()));
        assert!(probe.technologies.contains(&"React".to_string()));
        assert_eq!(probe.base_url(), base_url(addr));
        assert!(probe.body.contains("<title>hi</title>"));
    }
}
