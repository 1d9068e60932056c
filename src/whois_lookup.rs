// whois_lookup.rs - Raw WHOIS client (TCP/43)
// Purpose: Resolve the authoritative WHOIS server through IANA referrals,
//          follow the registrar referral for thin registries, and pull the
//          common registration fields out of the free-form response

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

pub const IANA_WHOIS_SERVER: &str = "whois.iana.org";
const FALLBACK_WHOIS_SERVER: &str = "whois.verisign-grs.com";
const MAX_RAW_CHARS: usize = 20_000;
const MAX_RESPONSE_BYTES: u64 = 256 * 1024;

/// Used when IANA does not answer with a referral
const TLD_SERVERS: &[(&str, &str)] = &[
    ("com", "whois.verisign-grs.com"),
    ("net", "whois.verisign-grs.com"),
    ("org", "whois.pir.org"),
    ("info", "whois.nic.info"),
    ("io", "whois.nic.io"),
    ("co", "whois.nic.co"),
    ("me", "whois.nic.me"),
    ("dev", "whois.nic.google"),
    ("app", "whois.nic.google"),
    ("uk", "whois.nic.uk"),
    ("de", "whois.denic.de"),
    ("fr", "whois.nic.fr"),
    ("nl", "whois.domain-registry.nl"),
    ("eu", "whois.eu"),
    ("br", "whois.registro.br"),
    ("in", "whois.registry.in"),
    ("ru", "whois.tcinet.ru"),
    ("au", "whois.auda.org.au"),
    ("ca", "whois.cira.ca"),
    ("xyz", "whois.nic.xyz"),
];

const REGISTRAR_KEYS: &[&str] = &["registrar", "sponsoring registrar", "registrar name"];
const CREATION_KEYS: &[&str] = &[
    "creation date",
    "created",
    "created on",
    "registered on",
    "registration time",
    "domain registration date",
];
const EXPIRY_KEYS: &[&str] = &[
    "registry expiry date",
    "registrar registration expiration date",
    "expiry date",
    "expiration date",
    "expires",
    "expires on",
    "paid-till",
    "expiration time",
];
const UPDATED_KEYS: &[&str] = &["updated date", "last updated", "last-update", "changed", "last modified"];
const NAME_SERVER_KEYS: &[&str] = &["name server", "nserver", "nameserver", "name servers"];
const STATUS_KEYS: &[&str] = &["domain status", "status"];
const REGISTRANT_ORG_KEYS: &[&str] = &["registrant organization", "registrant organisation", "registrant", "org"];
const REFERRAL_KEYS: &[&str] = &["registrar whois server", "whois server"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WhoisInfo {
    pub server: String,
    pub registrar: Option<String>,
    pub creation_date: Option<String>,
    pub expiry_date: Option<String>,
    pub updated_date: Option<String>,
    pub name_servers: Vec<String>,
    pub statuses: Vec<String>,
    pub registrant_org: Option<String>,
    pub raw: String,
}

#[derive(Debug, Clone)]
pub struct WhoisConfig {
    pub iana_server: String,
    pub timeout: Duration,
    pub follow_registrar_referral: bool,
}

impl Default for WhoisConfig {
    fn default() -> Self {
        Self {
            iana_server: IANA_WHOIS_SERVER.to_string(),
            timeout: Duration::from_secs(10),
            follow_registrar_referral: true,
        }
    }
}

/// Send one WHOIS query and read the response until the server closes.
/// `server` may carry an explicit port (`host:port`), otherwise 43 is used.
pub async fn query_whois_server(server: &str, query: &str, io_timeout: Duration) -> Result<String> {
    let addr = if server.contains(':') {
        server.to_string()
    } else {
        format!("{}:43", server)
    };

    let mut stream = timeout(io_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| anyhow!("connect to {} timed out", addr))?
        .with_context(|| format!("Failed to connect to WHOIS server {}", addr))?;

    let request = format!("{}\r\n", query);
    timeout(io_timeout, stream.write_all(request.as_bytes()))
        .await
        .map_err(|_| anyhow!("write to {} timed out", addr))??;

    let mut response = Vec::new();
    timeout(io_timeout, (&mut stream).take(MAX_RESPONSE_BYTES).read_to_end(&mut response))
        .await
        .map_err(|_| anyhow!("read from {} timed out", addr))??;

    Ok(String::from_utf8_lossy(&response).into_owned())
}

/// Extract the `refer:` / `whois:` server from an IANA response
pub fn find_iana_referral(response: &str) -> Option<String> {
    response.lines().find_map(|line| {
        let (key, value) = split_field(line)?;
        if (key == "refer" || key == "whois") && !value.is_empty() {
            Some(value.to_lowercase())
        } else {
            None
        }
    })
}

/// Extract a registrar WHOIS server from a thin registry response
pub fn find_registrar_referral(response: &str) -> Option<String> {
    let fields = parse_fields(response);
    first_value(&fields, REFERRAL_KEYS).map(|server| {
        server
            .trim_start_matches("whois://")
            .trim_start_matches("http://")
            .trim_start_matches("https://")
            .trim_end_matches('/')
            .to_lowercase()
    })
}

pub fn tld_fallback_server(domain: &str) -> &'static str {
    let tld = domain.rsplit('.').next().unwrap_or("").to_lowercase();
    TLD_SERVERS
        .iter()
        .find(|(t, _)| *t == tld)
        .map(|(_, server)| *server)
        .unwrap_or(FALLBACK_WHOIS_SERVER)
}

/// Full lookup: IANA referral -> registry -> (optional) registrar
pub async fn lookup(domain: &str, config: &WhoisConfig) -> Result<WhoisInfo> {
    let tld = domain.rsplit('.').next().unwrap_or(domain);

    let registry_server = match query_whois_server(&config.iana_server, tld, config.timeout).await {
        Ok(iana) => find_iana_referral(&iana).unwrap_or_else(|| tld_fallback_server(domain).to_string()),
        Err(e) => {
            tracing::warn!(error = %e, "IANA referral lookup failed, using built-in server map");
            tld_fallback_server(domain).to_string()
        }
    };

    let registry_raw = query_whois_server(&registry_server, domain, config.timeout)
        .await
        .with_context(|| format!("WHOIS query to {} failed", registry_server))?;

    let mut info = parse_whois(&registry_server, &registry_raw);

    if config.follow_registrar_referral {
        if let Some(registrar_server) = find_registrar_referral(&registry_raw) {
            if registrar_server != registry_server {
                match query_whois_server(&registrar_server, domain, config.timeout).await {
                    Ok(raw) => {
                        let registrar_info = parse_whois(&registrar_server, &raw);
                        info = merge(registrar_info, info);
                    }
                    Err(e) => tracing::debug!(error = %e, server = %registrar_server, "registrar referral failed"),
                }
            }
        }
    }

    Ok(info)
}

/// Parse a raw WHOIS response into the structured fields
pub fn parse_whois(server: &str, raw: &str) -> WhoisInfo {
    let fields = parse_fields(raw);

    let mut name_servers: Vec<String> = Vec::new();
    for (key, value) in &fields {
        if NAME_SERVER_KEYS.contains(&key.as_str()) {
            // Some registries list "ns1.example.com 192.0.2.1"
            for ns in value.split_whitespace().take(1) {
                let ns = ns.trim_end_matches('.').to_lowercase();
                if !ns.is_empty() && !name_servers.contains(&ns) {
                    name_servers.push(ns);
                }
            }
        }
    }

    let mut statuses: Vec<String> = Vec::new();
    for (key, value) in &fields {
        if STATUS_KEYS.contains(&key.as_str()) {
            if let Some(status) = value.split_whitespace().next() {
                let status = status.to_string();
                if !statuses.contains(&status) {
                    statuses.push(status);
                }
            }
        }
    }

    let raw_trimmed: String = raw.chars().take(MAX_RAW_CHARS).collect();

    WhoisInfo {
        server: server.to_string(),
        registrar: first_value(&fields, REGISTRAR_KEYS),
        creation_date: first_value(&fields, CREATION_KEYS),
        expiry_date: first_value(&fields, EXPIRY_KEYS),
        updated_date: first_value(&fields, UPDATED_KEYS),
        name_servers,
        statuses,
        registrant_org: first_value(&fields, REGISTRANT_ORG_KEYS),
        raw: raw_trimmed,
    }
}

fn merge(primary: WhoisInfo, secondary: WhoisInfo) -> WhoisInfo {
    WhoisInfo {
        server: primary.server,
        registrar: primary.registrar.or(secondary.registrar),
        creation_date: primary.creation_date.or(secondary.creation_date),
        expiry_date: primary.expiry_date.or(secondary.expiry_date),
        updated_date: primary.updated_date.or(secondary.updated_date),
        name_servers: if primary.name_servers.is_empty() { secondary.name_servers } else { primary.name_servers },
        statuses: if primary.statuses.is_empty() { secondary.statuses } else { primary.statuses },
        registrant_org: primary.registrant_org.or(secondary.registrant_org),
        raw: primary.raw,
    }
}

fn split_field(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('%') || line.starts_with('#') || line.starts_with(">>>") {
        return None;
    }
    let (key, value) = line.split_once(':')?;
    Some((key.trim().to_lowercase(), value.trim().to_string()))
}

/// Key/value pairs in document order. A key with an empty value takes the
/// next indented line as its value (.uk style blocks).
fn parse_fields(raw: &str) -> Vec<(String, String)> {
    let mut fields = Vec::new();
    let mut pending_key: Option<String> = None;

    for line in raw.lines() {
        if let Some(key) = pending_key.take() {
            let indented = line.starts_with(' ') || line.starts_with('\t');
            let value = line.trim();
            if indented && !value.is_empty() {
                fields.push((key, value.to_string()));
                continue;
            }
        }

        if let Some((key, value)) = split_field(line) {
            if value.is_empty() {
                pending_key = Some(key);
            } else {
                fields.push((key, value));
            }
        }
    }

    fields
}

fn first_value(fields: &[(String, String)], keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|wanted| {
        fields
            .iter()
            .find(|(key, value)| key == wanted && !value.is_empty())
            .map(|(_, value)| value.clone())
    })
}
