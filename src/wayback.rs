// wayback.rs - Wayback Machine CDX lookup
// Purpose: Archive stage of the domain scan. Count snapshots of <domain>/*,
//          keep the first/last capture timestamps and a sample of unique URLs

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const DEFAULT_CDX_ENDPOINT: &str = "https://web.archive.org/cdx/search/cdx";

#[derive(Debug, Clone)]
pub struct WaybackConfig {
    pub endpoint: String,
    pub limit: usize,
}

impl Default for WaybackConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_CDX_ENDPOINT.to_string(),
            limit: 500,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchiveReport {
    pub snapshot_count: usize,
    pub first_snapshot: Option<String>,
    pub last_snapshot: Option<String>,
    pub urls: Vec<String>,
    pub status_codes: Vec<(String, usize)>,
}

/// Parse the CDX JSON rows (`[["timestamp","original","statuscode"], [...], ...]`)
pub fn parse_cdx_rows(rows: &[Vec<String>], limit: usize) -> ArchiveReport {
    let mut report = ArchiveReport::default();

    // First row is the field header
    let data = rows.iter().skip(1).filter(|row| row.len() >= 2);

    let mut urls: BTreeSet<String> = BTreeSet::new();
    let mut statuses: std::collections::BTreeMap<String, usize> = std::collections::BTreeMap::new();
    let mut first: Option<&str> = None;
    let mut last: Option<&str> = None;

    for row in data {
        report.snapshot_count += 1;
        let timestamp = row[0].as_str();
        if first.map(|f| timestamp < f).unwrap_or(true) {
            first = Some(timestamp);
        }
        if last.map(|l| timestamp > l).unwrap_or(true) {
            last = Some(timestamp);
        }
        if urls.len() < limit {
            urls.insert(row[1].clone());
        }
        if let Some(status) = row.get(2) {
            *statuses.entry(status.clone()).or_insert(0) += 1;
        }
    }

    report.first_snapshot = first.map(str::to_string);
    report.last_snapshot = last.map(str::to_string);
    report.urls = urls.into_iter().collect();
    report.status_codes = statuses.into_iter().collect();
    report
}

pub async fn fetch_snapshots(client: &Client, domain: &str, config: &WaybackConfig) -> Result<ArchiveReport> {
    let limit = config.limit.to_string();
    let url_pattern = format!("{}/*", domain);

    let response = client
        .get(&config.endpoint)
        .query(&[
            ("url", url_pattern.as_str()),
            ("output", "json"),
            ("fl", "timestamp,original,statuscode"),
            ("collapse", "urlkey"),
            ("limit", limit.as_str()),
        ])
        .send()
        .await
        .context("Wayback CDX request failed")?
        .error_for_status()
        .context("Wayback CDX returned an error status")?;

    let body = response.text().await.context("Failed to read CDX response")?;
    if body.trim().is_empty() {
        return Ok(ArchiveReport::default());
    }

    let rows: Vec<Vec<String>> = serde_json::from_str(&body).context("Failed to parse CDX JSON")?;
    Ok(parse_cdx_rows(&rows, config.limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{base_url, spawn_server, test_client};
    use axum::extract::Query;
    use axum::routing::get;
    use axum::Router;
    use std::collections::HashMap;

    fn rows(data: &[[&str; 3]]) -> Vec<Vec<String>> {
        let mut out = vec![vec!["timestamp".into(), "original".into(), "statuscode".into()]];
        out.extend(data.iter().map(|r| r.iter().map(|s| s.to_string()).collect()));
        out
    }

    #[test]
    fn test_parse_rows_skips_header() {
        let parsed = parse_cdx_rows(
            &rows(&[
                ["20150101000000", "http://acme.test/", "200"],
                ["20120505000000", "http://acme.test/old", "404"],
                ["20230101000000", "http://acme.test/new", "200"],
            ]),
            10,
        );
        assert_eq!(parsed.snapshot_count, 3);
        assert_eq!(parsed.first_snapshot.as_deref(), Some("20120505000000"));
        assert_eq!(parsed.last_snapshot.as_deref(), Some("20230101000000"));
        assert_eq!(parsed.urls.len(), 3);
        assert_eq!(parsed.status_codes, vec![("200".to_string(), 2), ("404".to_string(), 1)]);
    }

    #[test]
    fn test_parse_header_only() {
        let parsed = parse_cdx_rows(&rows(&[]), 10);
        assert_eq!(parsed.snapshot_count, 0);
        assert!(parsed.first_snapshot.is_none());
    }

    #[tokio::test]
    async fn test_fetch_from_local_cdx() {
        let app = Router::new().route(
            "/cdx",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                assert_eq!(params.get("url").map(String::as_str), Some("acme.test/*"));
                assert_eq!(params.get("output").map(String::as_str), Some("json"));
                r#"[["timestamp","original","statuscode"],["20200101000000","http://acme.test/","200"]]"#
            }),
        );
        let addr = spawn_server(app).await;
        let config = WaybackConfig {
            endpoint: format!("{}/cdx", base_url(addr)),
            limit: 5,
        };

        let report = fetch_snapshots(&test_client(), "acme.test", &config).await.unwrap();
        assert_eq!(report.snapshot_count, 1);
        assert_eq!(report.urls, vec!["http://acme.test/"]);
    }
}
