// tunnel.rs - Public URL for the chat server via cloudflared quick tunnels
// Purpose: Run `cloudflared tunnel --url <local>` and pick the
//          *.trycloudflare.com address out of its log output

use crate::process_watch::WatchedChild;
use anyhow::Result;
use colored::*;
use lazy_static::lazy_static;
use regex::Regex;
use std::time::Duration;

lazy_static! {
    static ref TRYCLOUDFLARE_RE: Regex = Regex::new(r"https://[a-z0-9-]+\.trycloudflare\.com").unwrap();
}

pub const TUNNEL_URL_TIMEOUT: Duration = Duration::from_secs(45);

pub fn find_tunnel_url(line: &str) -> Option<String> {
    TRYCLOUDFLARE_RE.find(line).map(|m| m.as_str().to_string())
}

pub struct Tunnel {
    pub public_url: String,
    child: WatchedChild,
}

impl Tunnel {
    /// `local_url` is what cloudflared forwards to, e.g. http://127.0.0.1:8080
    pub async fn start(binary: &str, local_url: &str) -> Result<Self> {
        println!("{}", format!("[*] Starting {} quick tunnel to {}...", binary, local_url).cyan());
        let mut args = vec!["tunnel".to_string()];
        if local_url.starts_with("https://") {
            args.push("--no-tls-verify".to_string());
        }
        args.extend(["--url".to_string(), local_url.to_string()]);

        let mut child = WatchedChild::spawn(binary, &args)?;
        match child.wait_for(TUNNEL_URL_TIMEOUT, find_tunnel_url).await {
            Ok(public_url) => Ok(Self { public_url, child }),
            Err(e) => {
                child.shutdown().await;
                Err(e.context("cloudflared did not report a tunnel URL"))
            }
        }
    }

    pub async fn shutdown(self) {
        println!("{}", "[*] Closing tunnel".cyan());
        self.child.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_tunnel_url() {
        let line = "2024-05-01T10:00:00Z INF |  https://quiet-river-42.trycloudflare.com                 |";
        assert_eq!(find_tunnel_url(line).as_deref(), Some("https://quiet-river-42.trycloudflare.com"));
        assert_eq!(find_tunnel_url("INF Requesting new quick Tunnel on trycloudflare.com..."), None);
    }

    #[tokio::test]
    async fn test_missing_cloudflared() {
        let err = Tunnel::start("cloudflared-not-installed-here", "http://127.0.0.1:8080").await.err().unwrap();
        assert!(format!("{:#}", err).contains("Failed to start"));
    }
}
