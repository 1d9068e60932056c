// port_scanner.rs - TCP connect port probe
// Purpose: Ports stage of the domain scan. Bounded-concurrency connect scan
//          with optional banner grab and well-known service names

use anyhow::{bail, Context, Result};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::time::timeout;

pub const DEFAULT_PORTS: &[u16] = &[
    21, 22, 23, 25, 53, 80, 110, 111, 135, 139, 143, 443, 445, 993, 995, 1433, 1521, 2049, 3306,
    3389, 5432, 5900, 6379, 8000, 8080, 8443, 9200, 11211, 27017,
];

/// Ports whose exposure is flagged by the vulnerability heuristics
pub const RISKY_PORTS: &[u16] = &[21, 23, 135, 139, 445, 1433, 1521, 2049, 3306, 3389, 5432, 5900, 6379, 9200, 11211, 27017];

#[derive(Debug, Clone)]
pub struct PortScanConfig {
    pub ports: Vec<u16>,
    pub concurrency: usize,
    pub connect_timeout: Duration,
    pub grab_banner: bool,
    pub banner_timeout: Duration,
    pub show_progress: bool,
}

impl Default for PortScanConfig {
    fn default() -> Self {
        Self {
            ports: DEFAULT_PORTS.to_vec(),
            concurrency: 100,
            connect_timeout: Duration::from_millis(1500),
            grab_banner: true,
            banner_timeout: Duration::from_secs(1),
            show_progress: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpenPort {
    pub port: u16,
    pub service: Option<String>,
    pub banner: Option<String>,
}

/// Parse "80,443,8000-8100" into a sorted, deduplicated port list
pub fn parse_ports(spec: &str) -> Result<Vec<u16>> {
    let mut ports = BTreeSet::new();

    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((start, end)) = part.split_once('-') {
            let start: u16 = start.trim().parse().with_context(|| format!("Invalid port range: {}", part))?;
            let end: u16 = end.trim().parse().with_context(|| format!("Invalid port range: {}", part))?;
            if start == 0 || start > end {
                bail!("Invalid port range: {}", part);
            }
            ports.extend(start..=end);
        } else {
            let port: u16 = part.parse().with_context(|| format!("Invalid port: {}", part))?;
            if port == 0 {
                bail!("Invalid port: 0");
            }
            ports.insert(port);
        }
    }

    if ports.is_empty() {
        bail!("Port list is empty");
    }
    Ok(ports.into_iter().collect())
}

pub fn service_name(port: u16) -> Option<&'static str> {
    let name = match port {
        21 => "ftp",
        22 => "ssh",
        23 => "telnet",
        25 => "smtp",
        53 => "dns",
        80 => "http",
        110 => "pop3",
        111 => "rpcbind",
        135 => "msrpc",
        139 => "netbios-ssn",
        143 => "imap",
        443 => "https",
        445 => "smb",
        465 => "smtps",
        587 => "submission",
        993 => "imaps",
        995 => "pop3s",
        1433 => "mssql",
        1521 => "oracle",
        2049 => "nfs",
        3306 => "mysql",
        3389 => "rdp",
        5432 => "postgresql",
        5900 => "vnc",
        6379 => "redis",
        8000 | 8080 => "http-alt",
        8443 => "https-alt",
        9200 => "elasticsearch",
        11211 => "memcached",
        27017 => "mongodb",
        _ => return None,
    };
    Some(name)
}

async fn read_banner(stream: &mut TcpStream, wait: Duration) -> Option<String> {
    let mut buf = [0u8; 256];
    match timeout(wait, stream.read(&mut buf)).await {
        Ok(Ok(n)) if n > 0 => {
            let text: String = String::from_utf8_lossy(&buf[..n])
                .chars()
                .filter(|c| !c.is_control() || *c == ' ')
                .collect();
            let text = text.trim().to_string();
            if text.is_empty() { None } else { Some(text) }
        }
        _ => None,
    }
}

async fn probe_port(ip: IpAddr, port: u16, config: &PortScanConfig) -> Option<OpenPort> {
    let addr = SocketAddr::new(ip, port);
    let mut stream = match timeout(config.connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        _ => return None,
    };

    let banner = if config.grab_banner {
        read_banner(&mut stream, config.banner_timeout).await
    } else {
        None
    };

    Some(OpenPort {
        port,
        service: service_name(port).map(str::to_string),
        banner,
    })
}

/// Connect-scan `config.ports` on `ip`; results sorted by port
pub async fn scan_ports(ip: IpAddr, config: &PortScanConfig) -> Vec<OpenPort> {
    let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let config = Arc::new(config.clone());

    let pb = if config.show_progress {
        let pb = ProgressBar::new(config.ports.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("    {spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} ports")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        pb
    } else {
        ProgressBar::hidden()
    };

    let mut handles = Vec::with_capacity(config.ports.len());
    for &port in &config.ports {
        let sem = semaphore.clone();
        let config = config.clone();
        let pb = pb.clone();

        handles.push(tokio::spawn(async move {
            let _permit = sem.acquire().await.ok()?;
            let result = probe_port(ip, port, &config).await;
            pb.inc(1);
            result
        }));
    }

    let mut open_ports = Vec::new();
    for handle in handles {
        if let Ok(Some(port)) = handle.await {
            open_ports.push(port);
        }
    }
    pb.finish_and_clear();

    open_ports.sort_by_key(|p| p.port);

    for open in &open_ports {
        println!(
            "{}",
            format!(
                "    [+] {}/tcp open {}{}",
                open.port,
                open.service.as_deref().unwrap_or("unknown"),
                open.banner.as_ref().map(|b| format!(" ({})", b)).unwrap_or_default()
            )
            .green()
        );
    }

    open_ports
}

/// Resolve `host` and scan its first address
pub async fn scan_host(host: &str, config: &PortScanConfig) -> Result<(IpAddr, Vec<OpenPort>)> {
    let ip = match host.parse::<IpAddr>() {
        Ok(ip) => ip,
        Err(_) => tokio::net::lookup_host((host, 0))
            .await
            .with_context(|| format!("Failed to resolve {}", host))?
            .next()
            .map(|addr| addr.ip())
            .with_context(|| format!("{} has no addresses", host))?,
    };

    tracing::debug!(%host, %ip, ports = config.ports.len(), "starting port scan");
    Ok((ip, scan_ports(ip, config).await))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_ports_ranges_and_dedup() {
        assert_eq!(parse_ports("80,443,8000-8003,80").unwrap(), vec![80, 443, 8000, 8001, 8002, 8003]);
        assert_eq!(parse_ports(" 22 , 21 ").unwrap(), vec![21, 22]);
    }

    #[test]
    fn test_parse_ports_rejects_garbage() {
        assert!(parse_ports("abc").is_err());
        assert!(parse_ports("100-90").is_err());
        assert!(parse_ports("0").is_err());
        assert!(parse_ports("").is_err());
        assert!(parse_ports("70000").is_err());
    }

    #[test]
    fn test_service_names() {
        assert_eq!(service_name(22), Some("ssh"));
        assert_eq!(service_name(6379), Some("redis"));
        assert_eq!(service_name(4242), None);
    }

    #[tokio::test]
    async fn test_scan_finds_open_port_and_banner() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let _ = socket.write_all(b"SSH-2.0-OpenSSH_8.9\r\n").await;
            }
        });

        // Grab a port that is almost certainly closed
        let closed = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };

        let config = PortScanConfig {
            ports: vec![open, closed],
            connect_timeout: Duration::from_millis(500),
            ..Default::default()
        };
        let (_, found) = scan_host("127.0.0.1", &config).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].port, open);
        assert_eq!(found[0].banner.as_deref(), Some("SSH-2.0-OpenSSH_8.9"));
    }
}
