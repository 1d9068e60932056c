// crawler.rs - Breadth-first web crawler (clearnet and Tor hidden services)
// Purpose: Crawl from seed URLs level by level, optionally through a SOCKS
//          proxy, then run the selected extraction plugins over every page
//
// Output layout (per run):
//   <output>/crawl.json           pages + plugin results
//   <output>/links.txt            every distinct link seen
//   <output>/progress.jsonl       progress events
//   <output>/scan_metrics.json    run metrics

use crate::crawl_plugins::{self, PluginContext};
use crate::http_client::{build_client, HttpOptions};
use crate::metrics::{RunMetrics, ToolKind};
use crate::progress::ProgressTracker;
use crate::tor;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use colored::*;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use lazy_static::lazy_static;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use url::Url;

lazy_static! {
    static ref LINK_SELECTOR: Selector = Selector::parse("a[href], area[href]").unwrap();
    static ref TITLE_SELECTOR: Selector = Selector::parse("title").unwrap();
}

const EXCERPT_CHARS: usize = 280;

// Links to these are recorded but never fetched
const SKIP_EXTENSIONS: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp", ".ico", ".css", ".js", ".pdf", ".zip", ".gz", ".tar", ".mp4",
    ".mp3", ".woff", ".woff2",
];

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub seeds: Vec<String>,
    pub max_depth: usize,
    pub max_pages: usize,
    pub concurrency: usize,
    pub same_host_only: bool,
    pub proxy: Option<String>,
    /// Pause before each request, in milliseconds
    pub delay_ms: u64,
    pub timeout: Duration,
    pub plugins: Vec<String>,
    pub keywords: Vec<String>,
    pub output_dir: PathBuf,
    pub show_progress: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            max_depth: 2,
            max_pages: 100,
            concurrency: 5,
            same_host_only: true,
            proxy: None,
            delay_ms: 0,
            timeout: Duration::from_secs(30),
            plugins: vec!["emails".into(), "onions".into(), "titles".into()],
            keywords: Vec::new(),
            output_dir: PathBuf::from("crawl_results"),
            show_progress: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawledPage {
    pub url: String,
    pub depth: usize,
    pub status: Option<u16>,
    pub title: Option<String>,
    pub content_type: Option<String>,
    pub links: Vec<String>,
    pub body_excerpt: String,
    pub error: Option<String>,
    #[serde(skip)]
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlReport {
    pub crawl_id: String,
    pub seeds: Vec<String>,
    pub proxy: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub pages: Vec<CrawledPage>,
    pub plugin_results: BTreeMap<String, Vec<String>>,
}

impl CrawlReport {
    pub fn failed_pages(&self) -> usize {
        self.pages.iter().filter(|p| p.error.is_some()).count()
    }

    pub fn all_links(&self) -> BTreeSet<String> {
        self.pages.iter().flat_map(|p| p.links.iter().cloned()).collect()
    }
}

fn is_onion(url: &Url) -> bool {
    url.host_str().map(|h| h.ends_with(".onion")).unwrap_or(false)
}

/// Explicit proxy first; Tor default when requested or any seed is a hidden service
pub fn resolve_proxy(explicit: Option<String>, use_tor: bool, seeds: &[Url]) -> Option<String> {
    explicit.or_else(|| (use_tor || seeds.iter().any(is_onion)).then(tor::default_proxy))
}

/// Seeds without a scheme get `http://` (hidden services rarely serve TLS)
pub fn parse_seed(seed: &str) -> Result<Url> {
    let seed = seed.trim();
    if seed.is_empty() {
        bail!("Empty seed URL");
    }
    let candidate = if seed.contains("://") {
        seed.to_string()
    } else {
        format!("http://{}", seed)
    };
    let mut url = Url::parse(&candidate).with_context(|| format!("Invalid seed URL: {}", seed))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        bail!("Seed must be an http(s) URL: {}", seed);
    }
    url.set_fragment(None);
    Ok(url)
}

/// Absolute http(s) links of a page, fragments removed, in document order
pub fn extract_links(document: &Html, base: &Url) -> Vec<String> {
    let mut seen = HashSet::new();
    document
        .select(&LINK_SELECTOR)
        .filter_map(|el| el.value().attr("href"))
        .map(str::trim)
        .filter(|href| !href.is_empty() && !href.starts_with('#'))
        .filter_map(|href| base.join(href).ok())
        .filter(|u| matches!(u.scheme(), "http" | "https"))
        .map(|mut u| {
            u.set_fragment(None);
            u.to_string()
        })
        .filter(|u| seen.insert(u.clone()))
        .collect()
}

fn excerpt(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(EXCERPT_CHARS).collect()
}

fn should_fetch(url: &str) -> bool {
    let path = Url::parse(url).map(|u| u.path().to_lowercase()).unwrap_or_default();
    !SKIP_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

async fn fetch_page(client: &Client, url: &str, depth: usize, delay_ms: u64) -> CrawledPage {
    let mut page = CrawledPage {
        url: url.to_string(),
        depth,
        ..Default::default()
    };

    if delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    let response = match client.get(url).send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!(%url, error = %e, "crawl fetch failed");
            page.error = Some(e.to_string());
            return page;
        }
    };

    page.status = Some(response.status().as_u16());
    page.content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let final_url = response.url().clone();

    let body = match response.text().await {
        Ok(b) => b,
        Err(e) => {
            page.error = Some(format!("body read failed: {}", e));
            return page;
        }
    };

    let is_html = page
        .content_type
        .as_deref()
        .map(|ct| ct.contains("html"))
        .unwrap_or_else(|| body.trim_start().starts_with('<'));

    if is_html {
        let document = Html::parse_document(&body);
        page.title = document
            .select(&TITLE_SELECTOR)
            .next()
            .map(|t| t.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty());
        page.links = extract_links(&document, &final_url);
        page.body_excerpt = excerpt(&document.root_element().text().collect::<Vec<_>>().join(" "));
    } else {
        page.body_excerpt = excerpt(&body);
    }
    page.body = body;
    page
}

/// Crawl breadth-first; pages come back ordered by depth, then URL
pub async fn crawl(client: &Client, seeds: &[Url], config: &CrawlConfig, progress: Option<&ProgressTracker>) -> Vec<CrawledPage> {
    let allowed_hosts: HashSet<String> = seeds.iter().filter_map(|u| u.host_str().map(str::to_lowercase)).collect();
    let mut visited: HashSet<String> = HashSet::new();
    let mut frontier: Vec<String> = seeds
        .iter()
        .map(|u| u.to_string())
        .filter(|u| visited.insert(u.clone()))
        .collect();
    let mut pages: Vec<CrawledPage> = Vec::new();

    let pb = if config.show_progress {
        let pb = ProgressBar::new(config.max_pages as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} pages {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        pb
    } else {
        ProgressBar::hidden()
    };

    for depth in 0..=config.max_depth {
        if frontier.is_empty() || pages.len() >= config.max_pages {
            break;
        }
        frontier.truncate(config.max_pages - pages.len());

        let stage = format!("depth-{}", depth);
        let percent = depth as f32 / (config.max_depth + 1) as f32 * 100.0;
        if let Some(p) = progress {
            p.stage_started(&stage, percent);
        }
        pb.set_message(format!("depth {}", depth));
        println!("{}", format!("[*] Depth {}: fetching {} URL(s)", depth, frontier.len()).cyan());

        let mut fetched: Vec<CrawledPage> = stream::iter(std::mem::take(&mut frontier))
            .map(|url| {
                let pb = pb.clone();
                async move {
                    let page = fetch_page(client, &url, depth, config.delay_ms).await;
                    pb.inc(1);
                    page
                }
            })
            .buffer_unordered(config.concurrency.max(1))
            .collect()
            .await;
        fetched.sort_by(|a, b| a.url.cmp(&b.url));

        if depth < config.max_depth {
            for link in fetched.iter().flat_map(|p| p.links.iter()) {
                let Ok(parsed) = Url::parse(link) else { continue };
                let host = parsed.host_str().map(str::to_lowercase).unwrap_or_default();
                if config.same_host_only && !allowed_hosts.contains(&host) {
                    continue;
                }
                if should_fetch(link) && visited.insert(link.clone()) {
                    frontier.push(link.clone());
                }
            }
        }

        let failed = fetched.iter().filter(|p| p.error.is_some()).count();
        if failed > 0 {
            println!("{}", format!("[!] Depth {}: {} fetch(es) failed", depth, failed).yellow());
        }
        if let Some(p) = progress {
            p.data_found("pages", fetched.len(), percent);
            p.stage_completed(&stage, percent);
        }
        pages.extend(fetched);
    }

    pb.finish_and_clear();
    pages
}

/// Full crawl run: resolve plugins, crawl, run plugins, write outputs
pub async fn run_crawl(config: &CrawlConfig) -> Result<CrawlReport> {
    if config.seeds.is_empty() {
        bail!("At least one seed URL is required");
    }
    let plugins = crawl_plugins::resolve_plugins(&config.plugins)?;
    let seeds = config.seeds.iter().map(|s| parse_seed(s)).collect::<Result<Vec<_>>>()?;

    fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("Failed to create output directory: {}", config.output_dir.display()))?;

    let crawl_id = uuid::Uuid::new_v4().to_string();
    let target = seeds.iter().map(|u| u.as_str()).collect::<Vec<_>>().join(" ");
    let progress = ProgressTracker::new(crawl_id.clone(), target.clone(), config.output_dir.clone());
    progress.scan_started();
    let mut metrics = RunMetrics::new(ToolKind::Crawl, target);

    let options = HttpOptions::default()
        .with_timeout(config.timeout)
        .with_proxy(config.proxy.clone());
    let client = build_client(&options)?;

    if let Some(proxy) = &config.proxy {
        println!("{}", format!("[*] Routing through proxy {}", proxy).cyan());
    }

    let mut report = CrawlReport {
        crawl_id,
        seeds: seeds.iter().map(|u| u.to_string()).collect(),
        proxy: config.proxy.clone(),
        started_at: Utc::now(),
        finished_at: None,
        pages: Vec::new(),
        plugin_results: BTreeMap::new(),
    };

    let started = Instant::now();
    metrics.begin_stage("crawl");
    report.pages = crawl(&client, &seeds, config, Some(&progress)).await;
    metrics.end_stage("crawl");

    metrics.begin_stage("plugins");
    let ctx = PluginContext {
        keywords: config.keywords.clone(),
    };
    report.plugin_results = crawl_plugins::run_plugins(&report.pages, &plugins, &ctx);
    metrics.end_stage("plugins");
    for (name, values) in &report.plugin_results {
        progress.data_found(name, values.len(), 100.0);
        metrics.set(&format!("plugin_{}", name), values.len() as u64);
    }

    report.finished_at = Some(Utc::now());
    let links = report.all_links();
    metrics.set("pages", report.pages.len() as u64);
    metrics.set("failed_pages", report.failed_pages() as u64);
    metrics.set("links", links.len() as u64);

    let json = serde_json::to_string_pretty(&report).context("Failed to serialize crawl report")?;
    fs::write(config.output_dir.join("crawl.json"), json).context("Failed to write crawl.json")?;
    let mut links_txt = links.into_iter().collect::<Vec<_>>().join("\n");
    links_txt.push('\n');
    fs::write(config.output_dir.join("links.txt"), links_txt).context("Failed to write links.txt")?;

    metrics.finalize();
    if let Err(e) = metrics.save_to_file(&config.output_dir.join("scan_metrics.json")) {
        tracing::warn!(error = %e, "failed to save crawl metrics");
    }
    progress.scan_completed();

    tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "crawl finished");
    Ok(report)
}

pub fn display_summary(report: &CrawlReport) {
    println!("\n{}", "═══════════════════════════════════════════════════".yellow().bold());
    println!("{}", "  CRAWL SUMMARY".yellow().bold());
    println!("{}", "═══════════════════════════════════════════════════".yellow().bold());
    println!(
        "{}",
        format!(
            "[+] {} page(s) crawled, {} failed, {} distinct link(s)",
            report.pages.len(),
            report.failed_pages(),
            report.all_links().len()
        )
        .green()
    );
    for (plugin, values) in &report.plugin_results {
        println!("{}", format!("[+] {} ({})", plugin, values.len()).green().bold());
        for value in values.iter().take(20) {
            println!("    {}", value);
        }
        if values.len() > 20 {
            println!("    ... {} more in crawl.json", values.len() - 20);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{base_url, spawn_server, test_client};
    use axum::response::Html as HtmlResponse;
    use axum::routing::get;
    use axum::Router;

    fn site() -> Router {
        Router::new()
            .route(
                "/",
                get(|| async {
                    HtmlResponse(
                        r##"<html><head><title>Home</title></head><body>
                        <a href="/a">A</a> <a href="b#section">B</a> <a href="#top">top</a>
                        <a href="http://external.test/">out</a> <a href="mailto:x@y.test">mail</a>
                        <a href="/logo.png">logo</a>
                        </body></html>"##,
                    )
                }),
            )
            .route("/a", get(|| async { HtmlResponse(r#"<title>A</title><a href="/c">C</a> contact ops@site.test"#) }))
            .route("/b", get(|| async { HtmlResponse(r#"<title>B</title><a href="/">home</a>"#) }))
            .route("/c", get(|| async { HtmlResponse(r#"<title>C</title><a href="/d">D</a>"#) }))
            .route("/d", get(|| async { HtmlResponse("<title>D</title>") }))
    }

    #[test]
    fn test_extract_links() {
        let base = Url::parse("http://site.test/dir/page").unwrap();
        let doc = Html::parse_document(
            r#"<a href="other">1</a><a href="/root#x">2</a><a href="https://ext.test/">3</a>
               <a href="javascript:void(0)">4</a><a href="/root">dup</a><a href="">empty</a>"#,
        );
        assert_eq!(
            extract_links(&doc, &base),
            vec!["http://site.test/dir/other", "http://site.test/root", "https://ext.test/"]
        );
    }

    #[test]
    fn test_parse_seed_and_proxy() {
        let onion = parse_seed("duckduckgogg42xjoc72x3sjasowoarfbgcmvfimaftt6twagswzczad.onion").unwrap();
        assert_eq!(onion.scheme(), "http");
        assert!(parse_seed("ftp://x.test").is_err());
        assert!(parse_seed(" ").is_err());

        let clear = parse_seed("https://example.com/#frag").unwrap();
        assert_eq!(clear.as_str(), "https://example.com/");
        assert_eq!(resolve_proxy(None, false, std::slice::from_ref(&clear)), None);
        assert!(resolve_proxy(None, false, &[onion]).unwrap().starts_with("socks5"));
        assert_eq!(
            resolve_proxy(Some("socks5h://10.0.0.1:9150".into()), true, &[clear]),
            Some("socks5h://10.0.0.1:9150".into())
        );
    }

    #[tokio::test]
    async fn test_crawl_respects_depth_and_host() {
        let base = base_url(spawn_server(site()).await);
        let seed = Url::parse(&format!("{}/", base)).unwrap();
        let config = CrawlConfig { max_depth: 2, ..Default::default() };
        let pages = crawl(&test_client(), &[seed], &config, None).await;

        let urls: Vec<String> = pages.iter().map(|p| p.url.trim_start_matches(&base).to_string()).collect();
        assert_eq!(urls, vec!["/", "/a", "/b", "/c"]);
        assert_eq!(pages[0].title.as_deref(), Some("Home"));
        assert_eq!(pages[3].depth, 2);
        assert!(pages.iter().all(|p| p.error.is_none()));
        assert!(pages[0].links.iter().any(|l| l == "http://external.test/"));
    }

    #[tokio::test]
    async fn test_crawl_max_pages() {
        let base = base_url(spawn_server(site()).await);
        let seed = Url::parse(&format!("{}/", base)).unwrap();
        let config = CrawlConfig { max_depth: 5, max_pages: 2, ..Default::default() };
        let pages = crawl(&test_client(), &[seed], &config, None).await;
        assert_eq!(pages.len(), 2);
    }

    #[tokio::test]
    async fn test_run_crawl_writes_outputs() {
        let base = base_url(spawn_server(site()).await);
        let dir = tempfile::tempdir().unwrap();
        let config = CrawlConfig {
            seeds: vec![format!("{}/", base)],
            max_depth: 1,
            plugins: vec!["emails".into(), "titles".into()],
            output_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let report = run_crawl(&config).await.unwrap();

        assert_eq!(report.pages.len(), 3);
        assert_eq!(report.plugin_results["emails"], vec!["ops@site.test", "x@y.test"]);
        assert_eq!(report.plugin_results["titles"].len(), 3);
        assert!(dir.path().join("crawl.json").exists());
        assert!(dir.path().join("scan_metrics.json").exists());
        let links = fs::read_to_string(dir.path().join("links.txt")).unwrap();
        assert!(links.contains("http://external.test/"));
    }

    #[tokio::test]
    async fn test_unknown_plugin_fails_before_network() {
        let config = CrawlConfig {
            seeds: vec!["http://127.0.0.1:1/".into()],
            plugins: vec!["nope".into()],
            ..Default::default()
        };
        assert!(run_crawl(&config).await.unwrap_err().to_string().contains("Unknown plugin"));
    }

    #[tokio::test]
    async fn test_unreachable_page_is_recorded() {
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let seed = Url::parse(&format!("http://127.0.0.1:{}/", port)).unwrap();
        let pages = crawl(&test_client(), &[seed], &CrawlConfig::default(), None).await;
        assert_eq!(pages.len(), 1);
        assert!(pages[0].error.is_some());
        assert!(pages[0].status.is_none());
    }
}
