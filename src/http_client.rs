// http_client.rs - Shared HTTP client construction
// Purpose: One place to build the reqwest clients used by every tool
//          (timeouts, proxies, TLS leniency, user agents)

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use reqwest::redirect::Policy;
use reqwest::{Client, Proxy};
use std::time::Duration;

/// Default User-Agent sent when no randomization is requested
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Desktop browser User-Agents used for header randomization
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0 Safari/537.36",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:124.0) Gecko/20100101 Firefox/124.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36 Edg/124.0",
];

/// Accept-Language values rotated together with the User-Agent
pub const ACCEPT_LANGUAGES: &[&str] = &[
    "en-US,en;q=0.9",
    "en-GB,en;q=0.8",
    "en-US,en;q=0.7,de;q=0.3",
    "fr-FR,fr;q=0.8,en;q=0.5",
    "es-ES,es;q=0.9,en;q=0.6",
];

#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub timeout: Duration,
    pub user_agent: String,
    /// http://, https://, socks5:// or socks5h:// proxy URL
    pub proxy: Option<String>,
    pub accept_invalid_certs: bool,
    pub follow_redirects: bool,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            proxy: None,
            accept_invalid_certs: true,
            follow_redirects: true,
        }
    }
}

impl HttpOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn without_redirects(mut self) -> Self {
        self.follow_redirects = false;
        self
    }
}

/// Build an async client from the given options
pub fn build_client(options: &HttpOptions) -> Result<Client> {
    let redirect = if options.follow_redirects {
        Policy::limited(10)
    } else {
        Policy::none()
    };

    let mut builder = Client::builder()
        .timeout(options.timeout)
        .connect_timeout(options.timeout.min(Duration::from_secs(10)))
        .user_agent(options.user_agent.clone())
        .danger_accept_invalid_certs(options.accept_invalid_certs)
        .redirect(redirect);

    if let Some(ref proxy_url) = options.proxy {
        let proxy = Proxy::all(proxy_url.as_str())
            .with_context(|| format!("Invalid proxy URL: {}", proxy_url))?;
        builder = builder.proxy(proxy);
    }

    builder.build().context("Failed to build HTTP client")
}

/// Pick a random desktop User-Agent
pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(DEFAULT_USER_AGENT)
}

/// Pick a random Accept-Language header value
pub fn random_accept_language() -> &'static str {
    ACCEPT_LANGUAGES
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or("en-US,en;q=0.9")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_default_client() {
        assert!(build_client(&HttpOptions::default()).is_ok());
    }

    #[test]
    fn test_build_client_with_socks_proxy() {
        let options = HttpOptions::default().with_proxy(Some("socks5h://127.0.0.1:9050".to_string()));
        assert!(build_client(&options).is_ok());
    }

    #[test]
    fn test_random_headers_come_from_lists() {
        for _ in 0..20 {
            assert!(USER_AGENTS.contains(&random_user_agent()));
            assert!(ACCEPT_LANGUAGES.contains(&random_accept_language()));
        }
    }
}
