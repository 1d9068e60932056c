// tls_inspector.rs - TLS certificate inspection
// Purpose: Grab the leaf certificate of host:443 without trusting it, decode
//          subject/issuer/validity/SANs, then re-handshake with verification
//          on to learn whether the chain is trusted

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use native_tls::TlsConnector;
use serde::{Deserialize, Serialize};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use x509_parser::prelude::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub host: String,
    pub port: u16,
    pub subject: String,
    pub issuer: String,
    pub serial: String,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
    pub days_until_expiry: i64,
    pub san_dns_names: Vec<String>,
    /// Negotiated TLS version; native-tls does not report it, so live
    /// handshakes leave this empty
    #[serde(default)]
    pub protocol: Option<String>,
    pub self_signed: bool,
    pub trusted: bool,
    pub trust_error: Option<String>,
}

impl CertificateInfo {
    pub fn is_expired(&self) -> bool {
        self.days_until_expiry < 0
    }

    /// Does the certificate cover `host`, honouring a single leading wildcard
    pub fn covers_host(&self, host: &str) -> bool {
        let host = host.to_lowercase();
        self.san_dns_names.iter().any(|name| {
            let name = name.to_lowercase();
            match name.strip_prefix("*.") {
                Some(suffix) => host
                    .split_once('.')
                    .map(|(_, rest)| rest == suffix)
                    .unwrap_or(false),
                None => name == host,
            }
        })
    }
}

/// Fields decoded from a DER certificate
#[derive(Debug, Clone)]
pub struct DecodedCertificate {
    pub subject: String,
    pub issuer: String,
    pub serial: String,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
    pub san_dns_names: Vec<String>,
}

pub fn decode_certificate(der: &[u8]) -> Result<DecodedCertificate> {
    let (_, cert) = parse_x509_certificate(der).map_err(|e| anyhow!("invalid certificate: {}", e))?;

    let san_dns_names = match cert.subject_alternative_name() {
        Ok(Some(ext)) => ext
            .value
            .general_names
            .iter()
            .filter_map(|name| match name {
                GeneralName::DNSName(dns) => Some(dns.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    let validity = cert.validity();

    Ok(DecodedCertificate {
        subject: cert.subject().to_string(),
        issuer: cert.issuer().to_string(),
        serial: cert.raw_serial_as_string(),
        not_before: DateTime::from_timestamp(validity.not_before.timestamp(), 0),
        not_after: DateTime::from_timestamp(validity.not_after.timestamp(), 0),
        san_dns_names,
    })
}

fn handshake(host: &str, port: u16, io_timeout: Duration, verify: bool) -> Result<Vec<u8>> {
    let addr = (host, port)
        .to_socket_addrs()
        .with_context(|| format!("Failed to resolve {}", host))?
        .next()
        .ok_or_else(|| anyhow!("{} has no addresses", host))?;

    let tcp = TcpStream::connect_timeout(&addr, io_timeout)
        .with_context(|| format!("Failed to connect to {}", addr))?;
    tcp.set_read_timeout(Some(io_timeout))?;
    tcp.set_write_timeout(Some(io_timeout))?;

    let connector = TlsConnector::builder()
        .danger_accept_invalid_certs(!verify)
        .danger_accept_invalid_hostnames(!verify)
        .build()
        .context("Failed to build TLS connector")?;

    let stream = connector
        .connect(host, tcp)
        .map_err(|e| anyhow!("TLS handshake with {} failed: {}", host, e))?;

    let cert = stream
        .peer_certificate()
        .context("Failed to read peer certificate")?
        .ok_or_else(|| anyhow!("{} presented no certificate", host))?;

    cert.to_der().context("Failed to encode peer certificate")
}

fn inspect_blocking(host: &str, port: u16, io_timeout: Duration, now: DateTime<Utc>) -> Result<CertificateInfo> {
    let der = handshake(host, port, io_timeout, false)?;
    let decoded = decode_certificate(&der)?;

    let (trusted, trust_error) = match handshake(host, port, io_timeout, true) {
        Ok(_) => (true, None),
        Err(e) => (false, Some(e.to_string())),
    };

    Ok(build_info(host, port, decoded, trusted, trust_error, now))
}

fn build_info(
    host: &str,
    port: u16,
    decoded: DecodedCertificate,
    trusted: bool,
    trust_error: Option<String>,
    now: DateTime<Utc>,
) -> CertificateInfo {
    let days_until_expiry = decoded
        .not_after
        .map(|not_after| (not_after - now).num_days())
        .unwrap_or(0);

    CertificateInfo {
        host: host.to_string(),
        port,
        self_signed: decoded.subject == decoded.issuer,
        subject: decoded.subject,
        issuer: decoded.issuer,
        serial: decoded.serial,
        not_before: decoded.not_before,
        not_after: decoded.not_after,
        days_until_expiry,
        san_dns_names: decoded.san_dns_names,
        protocol: None,
        trusted,
        trust_error,
    }
}

/// Inspect the certificate served on `host:port`
pub async fn inspect(host: &str, port: u16, io_timeout: Duration) -> Result<CertificateInfo> {
    let host = host.to_string();
    tokio::task::spawn_blocking(move || inspect_blocking(&host, port, io_timeout, Utc::now()))
        .await
        .context("TLS inspection task failed")?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn self_signed_der(names: &[&str]) -> Vec<u8> {
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        let cert = rcgen::generate_simple_self_signed(names).unwrap();
        cert.serialize_der().unwrap()
    }

    #[test]
    fn test_decode_self_signed_certificate() {
        let der = self_signed_der(&["localhost", "*.example.test"]);
        let decoded = decode_certificate(&der).unwrap();
        assert!(decoded.san_dns_names.contains(&"localhost".to_string()));
        assert!(decoded.san_dns_names.contains(&"*.example.test".to_string()));
        assert!(decoded.not_before.is_some());
        assert!(decoded.not_after.is_some());
        assert!(!decoded.serial.is_empty());

        let info = build_info("localhost", 443, decoded, false, Some("untrusted".into()), Utc::now());
        assert!(info.self_signed);
        assert!(info.protocol.is_none());
        assert!(!info.is_expired());
        assert!(info.covers_host("localhost"));
        assert!(info.covers_host("api.example.test"));
        assert!(!info.covers_host("deep.api.example.test"));
        assert!(!info.covers_host("other.test"));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(decode_certificate(b"not a certificate").is_err());
    }
}
