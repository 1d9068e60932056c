// dns_recon.rs - DNS record enumeration and zone transfer check
// Purpose: Collect A/AAAA/MX/NS/TXT/SOA/CNAME records, SPF/DMARC policy,
//          and test every authoritative name server for an open AXFR

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::ResolveErrorKind;
use trust_dns_resolver::proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use trust_dns_resolver::proto::rr::{Name, RecordType};
use trust_dns_resolver::proto::serialize::binary::{BinDecodable, BinEncodable};
use trust_dns_resolver::TokioAsyncResolver;

const MAX_NAME_LEN: usize = 255;
const MAX_AXFR_MESSAGES: usize = 10_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DnsReport {
    pub a: Vec<String>,
    pub aaaa: Vec<String>,
    pub mx: Vec<String>,
    pub ns: Vec<String>,
    pub txt: Vec<String>,
    pub soa: Vec<String>,
    pub cname: Vec<String>,
    pub spf: Option<String>,
    pub dmarc: Option<String>,
    pub zone_transfer: Vec<ZoneTransferAttempt>,
    /// Record type -> resolver error (NXDOMAIN/no data is not an error)
    pub errors: BTreeMap<String, String>,
}

impl DnsReport {
    pub fn zone_transfer_allowed(&self) -> bool {
        self.zone_transfer.iter().any(|attempt| attempt.allowed)
    }

    pub fn total_records(&self) -> usize {
        self.a.len() + self.aaaa.len() + self.mx.len() + self.ns.len() + self.txt.len() + self.soa.len() + self.cname.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneTransferAttempt {
    pub nameserver: String,
    pub address: Option<String>,
    pub allowed: bool,
    pub answer_count: u32,
    pub error: Option<String>,
}

pub fn build_resolver() -> TokioAsyncResolver {
    let mut opts = ResolverOpts::default();
    opts.timeout = Duration::from_secs(5);
    opts.attempts = 2;
    TokioAsyncResolver::tokio(ResolverConfig::default(), opts)
}

async fn lookup_strings(
    resolver: &TokioAsyncResolver,
    name: &str,
    record_type: RecordType,
    errors: &mut BTreeMap<String, String>,
) -> Vec<String> {
    match resolver.lookup(name, record_type).await {
        Ok(lookup) => {
            let mut values: Vec<String> = lookup.iter().map(|rdata| rdata.to_string()).collect();
            values.dedup();
            values
        }
        Err(e) => {
            if !matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) {
                tracing::warn!(record = %record_type, host = %name, error = %e, "DNS lookup failed");
                errors.insert(record_type.to_string(), e.to_string());
            }
            Vec::new()
        }
    }
}

async fn lookup_txt(
    resolver: &TokioAsyncResolver,
    name: &str,
    errors: &mut BTreeMap<String, String>,
    error_key: &str,
) -> Vec<String> {
    match resolver.txt_lookup(name).await {
        Ok(lookup) => lookup
            .iter()
            .map(|txt| {
                txt.txt_data()
                    .iter()
                    .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
                    .collect::<String>()
            })
            .collect(),
        Err(e) => {
            if !matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) {
                errors.insert(error_key.to_string(), e.to_string());
            }
            Vec::new()
        }
    }
}

/// Resolve every record type independently, then probe the NS set for AXFR
pub async fn enumerate(resolver: &TokioAsyncResolver, domain: &str, axfr_timeout: Duration) -> DnsReport {
    let mut report = DnsReport::default();
    let mut errors = BTreeMap::new();

    report.a = lookup_strings(resolver, domain, RecordType::A, &mut errors).await;
    report.aaaa = lookup_strings(resolver, domain, RecordType::AAAA, &mut errors).await;
    report.mx = lookup_strings(resolver, domain, RecordType::MX, &mut errors).await;
    report.ns = lookup_strings(resolver, domain, RecordType::NS, &mut errors).await;
    report.soa = lookup_strings(resolver, domain, RecordType::SOA, &mut errors).await;
    report.cname = lookup_strings(resolver, domain, RecordType::CNAME, &mut errors).await;
    report.txt = lookup_txt(resolver, domain, &mut errors, "TXT").await;

    report.spf = report.txt.iter().find(|txt| txt.to_lowercase().starts_with("v=spf1")).cloned();

    let dmarc_name = format!("_dmarc.{}", domain);
    report.dmarc = lookup_txt(resolver, &dmarc_name, &mut errors, "DMARC")
        .await
        .into_iter()
        .find(|txt| txt.to_lowercase().starts_with("v=dmarc1"));

    for ns in report.ns.clone() {
        let nameserver = ns.trim_end_matches('.').to_string();
        let attempt = match resolver.lookup_ip(nameserver.as_str()).await {
            Ok(ips) => match ips.iter().next() {
                Some(ip) => {
                    let addr = SocketAddr::new(ip, 53);
                    match attempt_zone_transfer(addr, domain, axfr_timeout).await {
                        Ok(answer_count) => ZoneTransferAttempt {
                            nameserver,
                            address: Some(addr.to_string()),
                            allowed: answer_count > 0,
                            answer_count,
                            error: None,
                        },
                        Err(e) => ZoneTransferAttempt {
                            nameserver,
                            address: Some(addr.to_string()),
                            allowed: false,
                            answer_count: 0,
                            error: Some(e.to_string()),
                        },
                    }
                }
                None => unresolved_ns(nameserver, "no address records".to_string()),
            },
            Err(e) => unresolved_ns(nameserver, e.to_string()),
        };
        report.zone_transfer.push(attempt);
    }

    report.errors = errors;
    report
}

fn unresolved_ns(nameserver: String, error: String) -> ZoneTransferAttempt {
    ZoneTransferAttempt {
        nameserver,
        address: None,
        allowed: false,
        answer_count: 0,
        error: Some(error),
    }
}

/// Encode a single-question AXFR query, RD off
pub fn build_axfr_query(id: u16, domain: &str) -> Result<Vec<u8>> {
    let name = Name::from_ascii(domain).with_context(|| format!("Invalid domain name {:?}", domain))?;
    if name.len() > MAX_NAME_LEN {
        bail!("Domain name longer than {} bytes: {}", MAX_NAME_LEN, domain);
    }

    let mut query = Message::new();
    query
        .set_id(id)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(false)
        .add_query(Query::query(name, RecordType::AXFR));
    query.to_bytes().context("Failed to encode AXFR query")
}

/// Decode one AXFR response message and check it answers our query
pub fn parse_axfr_response(expected_id: u16, bytes: &[u8]) -> Result<Message> {
    let message = Message::from_bytes(bytes).context("Malformed DNS response")?;
    if message.id() != expected_id {
        bail!("DNS response id mismatch ({} != {})", message.id(), expected_id);
    }
    if message.message_type() != MessageType::Response {
        bail!("DNS message is not a response");
    }
    Ok(message)
}

/// Next length-prefixed message from the TCP stream; `None` on a clean close
async fn read_tcp_message(stream: &mut TcpStream, io_timeout: Duration) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 2];
    match timeout(io_timeout, stream.read_exact(&mut len_buf)).await {
        Err(_) => bail!("read timed out"),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Ok(Err(e)) => return Err(e.into()),
        Ok(Ok(_)) => {}
    }

    let mut message = vec![0u8; u16::from_be_bytes(len_buf) as usize];
    timeout(io_timeout, stream.read_exact(&mut message))
        .await
        .map_err(|_| anyhow!("read timed out"))??;
    Ok(Some(message))
}

/// Ask one name server for the zone over TCP and count the answer records
/// across every message of the transfer. Refusals return 0.
pub async fn attempt_zone_transfer(addr: SocketAddr, domain: &str, io_timeout: Duration) -> Result<u32> {
    let id: u16 = rand::random();
    let query = build_axfr_query(id, domain)?;

    let mut stream = timeout(io_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| anyhow!("connect to {} timed out", addr))?
        .with_context(|| format!("Failed to connect to {}", addr))?;

    let mut framed = Vec::with_capacity(query.len() + 2);
    framed.extend_from_slice(&(query.len() as u16).to_be_bytes());
    framed.extend_from_slice(&query);
    timeout(io_timeout, stream.write_all(&framed))
        .await
        .map_err(|_| anyhow!("write to {} timed out", addr))??;

    let mut answers = 0u32;
    let mut soa_seen = 0usize;
    for index in 0..MAX_AXFR_MESSAGES {
        let bytes = match read_tcp_message(&mut stream, io_timeout).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) if index > 0 => break,
            Ok(None) => bail!("{} closed the connection without answering", addr),
            // a transfer cut off midway still proves it was allowed
            Err(e) if answers > 0 => {
                tracing::debug!(error = %e, %addr, "zone transfer stream ended early");
                break;
            }
            Err(e) => return Err(e.context(format!("No AXFR response from {}", addr))),
        };

        let message = parse_axfr_response(id, &bytes)?;
        if message.response_code() != ResponseCode::NoError {
            return Ok(answers);
        }
        answers += message.answers().len() as u32;
        soa_seen += message.answers().iter().filter(|r| r.record_type() == RecordType::SOA).count();

        // the zone is framed by its SOA record at both ends
        if message.answers().is_empty() || soa_seen >= 2 {
            break;
        }
    }
    Ok(answers)
}
