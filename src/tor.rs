// tor.rs - Tor SOCKS proxy helpers
// Purpose: Resolve the proxy URL, check the SOCKS port answers, and launch a
//          local tor daemon that is killed once the crawl is over

use crate::process_watch::WatchedChild;
use anyhow::{Context, Result};
use colored::*;
use std::time::Duration;
use tokio::net::TcpStream;
use url::Url;

pub const DEFAULT_TOR_PROXY: &str = "socks5h://127.0.0.1:9050";
pub const TOR_PROXY_ENV: &str = "OSINTRUST_TOR_PROXY";
pub const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(90);
const BOOTSTRAP_MARKER: &str = "Bootstrapped 100%";

/// `$OSINTRUST_TOR_PROXY` or the local default
pub fn default_proxy() -> String {
    std::env::var(TOR_PROXY_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_TOR_PROXY.to_string())
}

/// host:port of a socks proxy URL
pub fn proxy_address(proxy: &str) -> Result<(String, u16)> {
    let url = Url::parse(proxy).with_context(|| format!("Invalid proxy URL: {}", proxy))?;
    let host = url
        .host_str()
        .with_context(|| format!("Proxy URL has no host: {}", proxy))?
        .to_string();
    let port = url.port_or_known_default().unwrap_or(9050);
    Ok((host, port))
}

pub async fn check_socks_reachable(proxy: &str, timeout: Duration) -> Result<()> {
    let (host, port) = proxy_address(proxy)?;
    tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), port)))
        .await
        .with_context(|| format!("Timed out connecting to Tor SOCKS proxy at {}:{}", host, port))?
        .with_context(|| format!("Tor SOCKS proxy not reachable at {}:{} (is tor running?)", host, port))?;
    Ok(())
}

/// Settings for a tor daemon started by us
#[derive(Debug, Clone)]
pub struct TorLaunchConfig {
    pub binary: String,
    pub socks_port: u16,
    pub bootstrap_timeout: Duration,
}

impl Default for TorLaunchConfig {
    fn default() -> Self {
        Self {
            binary: "tor".to_string(),
            socks_port: 9050,
            bootstrap_timeout: BOOTSTRAP_TIMEOUT,
        }
    }
}

impl TorLaunchConfig {
    pub fn proxy_url(&self) -> String {
        format!("socks5h://127.0.0.1:{}", self.socks_port)
    }
}

pub struct TorProcess {
    child: WatchedChild,
}

impl TorProcess {
    pub async fn launch(config: &TorLaunchConfig) -> Result<Self> {
        println!("{}", format!("[*] Launching {} (SOCKS port {})...", config.binary, config.socks_port).cyan());
        let args = vec!["--SocksPort".to_string(), config.socks_port.to_string()];
        let mut child = WatchedChild::spawn(&config.binary, &args)?;

        if let Err(e) = child
            .wait_for(config.bootstrap_timeout, |line| line.contains(BOOTSTRAP_MARKER).then_some(()))
            .await
        {
            child.shutdown().await;
            return Err(e.context("tor did not finish bootstrapping"));
        }

        println!("{}", "[+] Tor bootstrapped".green());
        Ok(Self { child })
    }

    pub async fn shutdown(self) {
        println!("{}", "[*] Stopping tor".cyan());
        self.child.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_address() {
        assert_eq!(proxy_address("socks5h://127.0.0.1:9150").unwrap(), ("127.0.0.1".to_string(), 9150));
        assert_eq!(proxy_address(DEFAULT_TOR_PROXY).unwrap().1, 9050);
        assert!(proxy_address("not a url").is_err());
    }

    #[tokio::test]
    async fn test_socks_reachability() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let proxy = format!("socks5h://127.0.0.1:{}", port);
        assert!(check_socks_reachable(&proxy, Duration::from_secs(2)).await.is_ok());
        drop(listener);

        let closed = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let proxy = format!("socks5h://127.0.0.1:{}", closed);
        let err = check_socks_reachable(&proxy, Duration::from_secs(2)).await.unwrap_err();
        assert!(format!("{:#}", err).contains("not reachable"));
    }

    #[tokio::test]
    async fn test_launch_missing_binary() {
        let config = TorLaunchConfig {
            binary: "tor-binary-that-does-not-exist".into(),
            socks_port: 19050,
            bootstrap_timeout: Duration::from_secs(1),
        };
        assert!(TorProcess::launch(&config).await.is_err());
    }
}
