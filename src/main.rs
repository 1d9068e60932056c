// main.rs - osintrust command line
// Purpose: Parse the subcommand, build the tool's config from flags and run
//          it: domain OSINT scan, username footprint, URL shortening, load
//          testing, Tor/clearnet crawling and the WebRTC chat relay

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::*;
use osintrust::chat_relay::{self, ChatServerConfig};
use osintrust::chat_tls::{TlsPaths, DEFAULT_CERT_FILE, DEFAULT_KEY_FILE};
use osintrust::crawl_plugins::PLUGINS;
use osintrust::crawler::{self, CrawlConfig};
use osintrust::dir_bruteforce;
use osintrust::domain_scan::{self, DomainScanConfig, Stage};
use osintrust::footprint::{self, FootprintConfig};
use osintrust::footprint_store::{FootprintStore, DEFAULT_DB_FILE};
use osintrust::http_client::{build_client, HttpOptions};
use osintrust::load_tester::{self, LoadMode, LoadTestConfig};
use osintrust::logging::init_logging;
use osintrust::metrics::{RunMetrics, ToolKind};
use osintrust::port_scanner;
use osintrust::report_generator::ReportFormat;
use osintrust::shortener::{self, Provider, ShortenerConfig};
use osintrust::tor::{self, TorLaunchConfig, TorProcess};
use osintrust::vuln_heuristics::Severity;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// osintrust - OSINT and network testing toolkit
#[derive(Parser, Debug)]
#[command(
    name = "osintrust",
    version,
    about = "OSINT and network testing toolkit",
    long_about = r#"
═══════════════════════════════════════════════════════════════════════════════
                     OSINTRUST - OSINT & Network Testing Toolkit
═══════════════════════════════════════════════════════════════════════════════

  domain     Passive/light-active domain recon: HTTP fingerprint, WHOIS, DNS
             (+AXFR check), TLS certificate, page content, Wayback archive,
             TCP ports, directory brute force and security heuristics
  footprint  Check which platforms a username exists on (SQLite cache+history)
  shorten    Shorten a URL (is.gd, falling back to cleanuri)
  loadtest   HTTP or WebSocket load generator with latency percentiles
  crawl      Breadth-first crawler with extraction plugins, Tor aware
  chat       WebRTC signaling relay + demo page (TLS, cloudflared tunnel)

EXAMPLES:

    osintrust domain example.com --skip archive,dirs
    osintrust footprint alice bob --category social --output found.csv
    osintrust shorten https://example.com/some/long/path
    osintrust loadtest https://staging.example.com --workers 50 --duration 30
    osintrust crawl http://<56 chars>.onion --tor --plugin emails,bitcoin
    osintrust chat --tls --san chat.lan --tunnel

Set RUST_LOG (e.g. RUST_LOG=osintrust=debug) for diagnostic logs.
═══════════════════════════════════════════════════════════════════════════════
"#
)]
struct Cli {
    /// Do not print the banner
    #[arg(long, global = true)]
    no_banner: bool,

    /// Debug-level diagnostics on stderr (unless RUST_LOG is set)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan a domain (http, whois, dns, ssl, content, archive, ports, dirs, vulns)
    Domain(DomainArgs),
    /// Look a username up across platforms
    Footprint(FootprintArgs),
    /// Shorten a URL
    Shorten(ShortenArgs),
    /// Generate HTTP or WebSocket load against a target you own
    Loadtest(LoadTestArgs),
    /// Crawl from seed URLs and run extraction plugins
    Crawl(CrawlArgs),
    /// Run the WebRTC signaling relay and demo chat page
    Chat(ChatArgs),
}

#[derive(Args, Debug)]
struct DomainArgs {
    /// Target domain (e.g. example.com)
    #[arg(value_name = "DOMAIN")]
    domain: String,

    /// Base output directory
    #[arg(short, long, default_value = "osint_results", value_name = "DIR", help_heading = "Output")]
    output: PathBuf,

    /// Report formats
    #[arg(long, value_enum, value_delimiter = ',', default_values_t = ReportFormat::ALL.to_vec(),
          value_name = "FORMATS", help_heading = "Output")]
    format: Vec<ReportFormat>,

    /// Stages to skip (http always runs)
    #[arg(long, value_enum, value_delimiter = ',', value_name = "STAGES", help_heading = "Stages")]
    skip: Vec<Stage>,

    /// Ports to probe, e.g. "22,80,443,8000-8100"
    #[arg(long, value_name = "PORTS", help_heading = "Ports")]
    ports: Option<String>,

    /// Concurrent port probes
    #[arg(long, default_value = "100", value_name = "NUM", help_heading = "Ports")]
    port_concurrency: usize,

    /// Connect timeout per port, milliseconds
    #[arg(long, default_value = "1500", value_name = "MS", help_heading = "Ports")]
    port_timeout: u64,

    /// Do not read service banners
    #[arg(long, help_heading = "Ports")]
    no_banners: bool,

    /// Path list for the directory stage (one per line)
    #[arg(long, value_name = "FILE", help_heading = "Directories")]
    wordlist: Option<PathBuf>,

    /// Concurrent directory requests
    #[arg(long, default_value = "20", value_name = "NUM", help_heading = "Directories")]
    dir_concurrency: usize,

    /// Max archived URLs kept from the Wayback Machine
    #[arg(long, default_value = "500", value_name = "NUM", help_heading = "Archive")]
    archive_limit: usize,

    /// HTTP timeout, seconds
    #[arg(long, default_value = "30", value_name = "SECONDS", help_heading = "Network")]
    timeout: u64,

    /// Proxy for HTTP stages (http://, socks5://, socks5h://)
    #[arg(long, value_name = "URL", help_heading = "Network")]
    proxy: Option<String>,

    /// Hide progress bars
    #[arg(long, help_heading = "Output")]
    no_progress: bool,
}

#[derive(Args, Debug)]
struct FootprintArgs {
    /// Usernames to look up
    #[arg(value_name = "USERNAME", required_unless_present_any = ["history", "clear_cache", "list_platforms"])]
    usernames: Vec<String>,

    /// Platform definitions JSON (default: built-in set)
    #[arg(long, value_name = "FILE", help_heading = "Platforms")]
    platforms: Option<PathBuf>,

    /// Only these platform keys
    #[arg(long, value_delimiter = ',', value_name = "KEYS", help_heading = "Platforms")]
    platforms_only: Vec<String>,

    /// Only these categories
    #[arg(long, value_delimiter = ',', value_name = "CATEGORIES", help_heading = "Platforms")]
    category: Vec<String>,

    /// Print the selected platforms and exit
    #[arg(long, help_heading = "Platforms")]
    list_platforms: bool,

    /// Concurrent checks
    #[arg(long, default_value = "20", value_name = "NUM", help_heading = "Requests")]
    workers: usize,

    /// Request timeout, seconds
    #[arg(long, default_value = "15", value_name = "SECONDS", help_heading = "Requests")]
    timeout: u64,

    /// 3 workers, randomized headers, random delays
    #[arg(long, help_heading = "Requests")]
    stealth: bool,

    /// Proxy URL
    #[arg(long, value_name = "URL", help_heading = "Requests")]
    proxy: Option<String>,

    /// SQLite database for cache and history
    #[arg(long, default_value = DEFAULT_DB_FILE, value_name = "FILE", help_heading = "Storage")]
    db: PathBuf,

    /// Ignore cached results
    #[arg(long, help_heading = "Storage")]
    no_cache: bool,

    /// Cache lifetime, hours
    #[arg(long, default_value = "24", value_name = "HOURS", help_heading = "Storage")]
    cache_ttl: u64,

    /// Print stored history for a username and exit
    #[arg(long, value_name = "USERNAME", help_heading = "Storage")]
    history: Option<String>,

    /// Drop every cached result and exit
    #[arg(long, help_heading = "Storage")]
    clear_cache: bool,

    /// Save results (.json or .csv)
    #[arg(short, long, value_name = "FILE", help_heading = "Output")]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ShortenArgs {
    /// URL to shorten (https:// is assumed when missing)
    #[arg(value_name = "URL")]
    url: String,

    /// Use only this provider
    #[arg(long, value_enum)]
    provider: Option<Provider>,

    /// Request timeout, seconds
    #[arg(long, default_value = "15", value_name = "SECONDS")]
    timeout: u64,
}

#[derive(Args, Debug)]
struct LoadTestArgs {
    /// http(s):// or ws(s):// target
    #[arg(value_name = "URL")]
    target: String,

    /// Concurrent workers
    #[arg(short, long, default_value = "10", value_name = "NUM", help_heading = "Load")]
    workers: usize,

    /// Requests per second per worker (0 = unthrottled)
    #[arg(long, default_value = "0", value_name = "RPS", help_heading = "Load")]
    rate: f64,

    /// Test length, seconds
    #[arg(short, long, default_value = "10", value_name = "SECONDS", help_heading = "Load")]
    duration: u64,

    /// Per-request timeout, seconds
    #[arg(long, default_value = "10", value_name = "SECONDS", help_heading = "Load")]
    timeout: u64,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET", help_heading = "HTTP")]
    method: String,

    /// Request body
    #[arg(long, value_name = "DATA", help_heading = "HTTP")]
    body: Option<String>,

    /// Extra header "Name: value" (repeatable)
    #[arg(short = 'H', long = "header", value_name = "HEADER", help_heading = "HTTP")]
    headers: Vec<String>,

    /// WebSocket mode (implied by ws:// and wss:// targets)
    #[arg(long, help_heading = "WebSocket")]
    ws: bool,

    /// Message sent per WebSocket iteration
    #[arg(long, default_value = "ping", value_name = "TEXT", help_heading = "WebSocket")]
    message: String,

    /// Save the report as JSON
    #[arg(short, long, value_name = "FILE", help_heading = "Output")]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct CrawlArgs {
    /// Seed URLs (http:// is assumed when missing)
    #[arg(value_name = "URL", required_unless_present = "list_plugins")]
    seeds: Vec<String>,

    /// Max link depth from the seeds
    #[arg(long, default_value = "2", value_name = "NUM", help_heading = "Crawl")]
    depth: usize,

    /// Max pages fetched
    #[arg(long, default_value = "100", value_name = "NUM", help_heading = "Crawl")]
    max_pages: usize,

    /// Concurrent fetches
    #[arg(long, default_value = "5", value_name = "NUM", help_heading = "Crawl")]
    concurrency: usize,

    /// Follow links to other hosts
    #[arg(long, help_heading = "Crawl")]
    allow_external: bool,

    /// Delay before each request, milliseconds
    #[arg(long, default_value = "0", value_name = "MS", help_heading = "Crawl")]
    delay: u64,

    /// Request timeout, seconds
    #[arg(long, default_value = "30", value_name = "SECONDS", help_heading = "Crawl")]
    timeout: u64,

    /// Route through Tor (OSINTRUST_TOR_PROXY or socks5h://127.0.0.1:9050)
    #[arg(long, help_heading = "Tor")]
    tor: bool,

    /// Start a tor daemon for this crawl and stop it afterwards
    #[arg(long, help_heading = "Tor")]
    launch_tor: bool,

    /// SOCKS port for --launch-tor
    #[arg(long, default_value = "9050", value_name = "PORT", help_heading = "Tor")]
    tor_port: u16,

    /// Explicit proxy URL (overrides the Tor default)
    #[arg(long, value_name = "URL", help_heading = "Tor")]
    proxy: Option<String>,

    /// Plugins to run
    #[arg(long = "plugin", value_delimiter = ',', default_value = "emails,onions,titles",
          value_name = "NAMES", help_heading = "Plugins")]
    plugins: Vec<String>,

    /// Keyword for the keywords plugin (repeatable)
    #[arg(long = "keyword", value_name = "WORD", help_heading = "Plugins")]
    keywords: Vec<String>,

    /// Print available plugins and exit
    #[arg(long, help_heading = "Plugins")]
    list_plugins: bool,

    /// Output directory
    #[arg(short, long, default_value = "crawl_results", value_name = "DIR", help_heading = "Output")]
    output: PathBuf,

    /// Hide the progress bar
    #[arg(long, help_heading = "Output")]
    no_progress: bool,
}

#[derive(Args, Debug)]
struct ChatArgs {
    /// Listen address
    #[arg(long, default_value = "127.0.0.1:8080", value_name = "ADDR")]
    bind: SocketAddr,

    /// Max peers per room
    #[arg(long, default_value = "8", value_name = "NUM")]
    max_peers: usize,

    /// Serve HTTPS (generates a self-signed pair when missing)
    #[arg(long, help_heading = "TLS")]
    tls: bool,

    /// Certificate PEM
    #[arg(long, default_value = DEFAULT_CERT_FILE, value_name = "FILE", help_heading = "TLS")]
    cert: PathBuf,

    /// Private key PEM
    #[arg(long, default_value = DEFAULT_KEY_FILE, value_name = "FILE", help_heading = "TLS")]
    key: PathBuf,

    /// Extra certificate name (repeatable)
    #[arg(long = "san", value_name = "NAME", help_heading = "TLS")]
    sans: Vec<String>,

    /// Expose through a cloudflared quick tunnel
    #[arg(long, help_heading = "Tunnel")]
    tunnel: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if !cli.no_banner {
        print_banner();
    }

    match cli.command {
        Command::Domain(args) => run_domain(args).await,
        Command::Footprint(args) => run_footprint(args).await,
        Command::Shorten(args) => run_shorten(args).await,
        Command::Loadtest(args) => run_loadtest(args).await,
        Command::Crawl(args) => run_crawl(args).await,
        Command::Chat(args) => run_chat(args).await,
    }
}

fn print_banner() {
    println!("{}", "═══════════════════════════════════════════════════════════════".cyan().bold());
    println!("{}", "   ___  ____ ___ _   _ _____ ____  _   _ ____ _____ ".cyan().bold());
    println!("{}", "  / _ \\/ ___|_ _| \\ | |_   _|  _ \\| | | / ___|_   _|".cyan().bold());
    println!("{}", " | | | \\___ \\| ||  \\| | | | | |_) | | | \\___ \\ | |  ".cyan().bold());
    println!("{}", " | |_| |___) | || |\\  | | | |  _ <| |_| |___) || |  ".cyan().bold());
    println!("{}", "  \\___/|____/___|_| \\_| |_| |_| \\_\\\\___/|____/ |_|  ".cyan().bold());
    println!("{}", "═══════════════════════════════════════════════════════════════".cyan().bold());
    println!("{}", format!("  osintrust v{} - OSINT & Network Testing Toolkit", env!("CARGO_PKG_VERSION")).white().bold());
    println!("{}", "  Only scan and load-test systems you are authorized to test".white());
    println!("{}", "═══════════════════════════════════════════════════════════════\n".cyan().bold());
}

fn stage_banner(title: &str) {
    println!("{}", "═══════════════════════════════════════════════════════════════".yellow().bold());
    println!("{}", format!("  {}", title).yellow().bold());
    println!("{}", "═══════════════════════════════════════════════════════════════".yellow().bold());
}

/// `found.json` -> `found_metrics.json` next to it
fn metrics_path_for(output: &Path) -> PathBuf {
    let stem = output.file_stem().and_then(|s| s.to_str()).unwrap_or("run");
    output.with_file_name(format!("{}_metrics.json", stem))
}

async fn run_domain(args: DomainArgs) -> Result<()> {
    let mut config = DomainScanConfig {
        output_dir: args.output,
        skip: args.skip.into_iter().collect(),
        formats: args.format,
        http: HttpOptions::default()
            .with_timeout(Duration::from_secs(args.timeout))
            .with_proxy(args.proxy),
        ..Default::default()
    };

    if let Some(spec) = &args.ports {
        config.ports.ports = port_scanner::parse_ports(spec)?;
    }
    config.ports.concurrency = args.port_concurrency.max(1);
    config.ports.connect_timeout = Duration::from_millis(args.port_timeout);
    config.ports.grab_banner = !args.no_banners;
    config.ports.show_progress = !args.no_progress;

    if let Some(path) = &args.wordlist {
        config.dirs.paths = dir_bruteforce::load_wordlist(path)?;
    }
    config.dirs.concurrency = args.dir_concurrency.max(1);
    config.dirs.show_progress = !args.no_progress;
    config.wayback.limit = args.archive_limit;

    stage_banner(&format!("DOMAIN SCAN: {}", args.domain));
    let report = domain_scan::run_domain_scan(&args.domain, &config).await?;

    let counts = report.severity_counts();
    let count = |s: Severity| counts.get(&s).copied().unwrap_or(0);
    println!();
    stage_banner("SCAN SUMMARY");
    println!(
        "{}",
        format!(
            "[+] {} finding(s): {} high, {} medium, {} low, {} info",
            report.vulnerabilities.len(),
            count(Severity::High),
            count(Severity::Medium),
            count(Severity::Low),
            count(Severity::Info)
        )
        .green()
        .bold()
    );
    if !report.errors.is_empty() {
        println!("{}", format!("[!] {} stage(s) failed:", report.errors.len()).yellow());
        for (stage, error) in &report.errors {
            println!("{}", format!("    {}: {}", stage, error).yellow());
        }
    }
    Ok(())
}

async fn run_footprint(args: FootprintArgs) -> Result<()> {
    let platforms = match &args.platforms {
        Some(path) => footprint::load_platforms_file(path)?,
        None => footprint::default_platforms()?,
    };
    let platforms = footprint::filter_platforms(platforms, &args.platforms_only, &args.category)?;

    if args.list_platforms {
        println!("{}", format!("[*] {} platform(s)", platforms.len()).cyan());
        for (key, platform) in &platforms {
            println!("  {:<16} {:<22} {}", key, platform.name, platform.category);
        }
        return Ok(());
    }

    let store = FootprintStore::open(&args.db)?;
    let cache_ttl = Duration::from_secs(args.cache_ttl * 3600);

    if let Some(username) = &args.history {
        return footprint::print_history(&store, username);
    }
    if args.clear_cache {
        let removed = store.clear_cache()?;
        println!("{}", format!("[+] Removed {} cached result(s) from {}", removed, store.path().display()).green());
        return Ok(());
    }

    let purged = store.purge_expired(cache_ttl)?;
    if purged > 0 {
        tracing::debug!(purged, "expired cache rows removed");
    }

    let config = FootprintConfig {
        workers: args.workers,
        timeout: Duration::from_secs(args.timeout),
        stealth: args.stealth,
        cache_ttl,
        use_cache: !args.no_cache,
        proxy: args.proxy,
        show_progress: true,
        ..Default::default()
    };

    let mut metrics = RunMetrics::new(ToolKind::Footprint, args.usernames.join(","));
    metrics.begin_stage("checks");
    let results = footprint::run_footprint(&args.usernames, &platforms, &config, Some(&store)).await?;
    metrics.end_stage("checks");
    for status in ["found", "not_found", "invalid", "error"] {
        let n = results.iter().filter(|r| r.status.as_str() == status).count();
        metrics.set(status, n as u64);
    }
    metrics.set("from_cache", results.iter().filter(|r| r.from_cache).count() as u64);
    metrics.finalize();

    footprint::display_summary(&results);

    if let Some(output) = &args.output {
        footprint::save_results(&results, output)?;
        println!("{}", format!("[+] Results saved to {}", output.display()).green());
        metrics.save_to_file(&metrics_path_for(output))?;
    }
    tracing::debug!("{}", metrics.summary());
    Ok(())
}

async fn run_shorten(args: ShortenArgs) -> Result<()> {
    let client = build_client(&HttpOptions::default().with_timeout(Duration::from_secs(args.timeout)))?;
    let config = ShortenerConfig {
        provider: args.provider,
        ..Default::default()
    };

    let mut metrics = RunMetrics::new(ToolKind::Shorten, &args.url);
    let result = shortener::shorten(&client, &args.url, &config).await;
    metrics.finalize();
    tracing::debug!("{}", metrics.summary());

    let shortened = result?;
    println!("{}", format!("[+] {} ({})", shortened.short_url, shortened.provider).green().bold());
    println!("{}", format!("    -> {}", shortened.original_url).cyan());
    Ok(())
}

async fn run_loadtest(args: LoadTestArgs) -> Result<()> {
    let ws_target = args.target.starts_with("ws://") || args.target.starts_with("wss://");
    let mode = if args.ws || ws_target {
        LoadMode::WebSocket { message: args.message }
    } else {
        let method = reqwest::Method::from_bytes(args.method.to_uppercase().as_bytes())
            .with_context(|| format!("Invalid HTTP method: {}", args.method))?;
        let headers = args
            .headers
            .iter()
            .map(|h| load_tester::parse_header(h))
            .collect::<Result<Vec<_>>>()?;
        LoadMode::Http { method, body: args.body, headers }
    };

    let config = LoadTestConfig {
        target: args.target,
        mode,
        workers: args.workers,
        rate_per_worker: args.rate,
        duration: Duration::from_secs(args.duration),
        timeout: Duration::from_secs(args.timeout),
    };

    stage_banner(&format!("LOAD TEST: {}", config.target));
    let mut metrics = RunMetrics::new(ToolKind::LoadTest, &config.target);
    let report = load_tester::run_load_test(&config).await?;
    metrics.set("requests", report.total);
    metrics.set("errors", report.errors);
    metrics.finalize();

    load_tester::display_report(&report);
    if let Some(output) = &args.output {
        load_tester::save_report(&report, output)?;
        println!("{}", format!("[+] Report saved to {}", output.display()).green());
        metrics.save_to_file(&metrics_path_for(output))?;
    }
    Ok(())
}

async fn run_crawl(args: CrawlArgs) -> Result<()> {
    if args.list_plugins {
        for plugin in PLUGINS {
            println!("  {:<10} {}", plugin.name, plugin.description);
        }
        return Ok(());
    }

    // validate plugins and seeds before touching the network or tor
    osintrust::crawl_plugins::resolve_plugins(&args.plugins)?;
    let seeds = args.seeds.iter().map(|s| crawler::parse_seed(s)).collect::<Result<Vec<_>>>()?;

    let launch = TorLaunchConfig {
        socks_port: args.tor_port,
        ..Default::default()
    };
    let (proxy, tor_process) = if args.launch_tor {
        let process = TorProcess::launch(&launch).await?;
        (Some(args.proxy.clone().unwrap_or_else(|| launch.proxy_url())), Some(process))
    } else {
        let proxy = crawler::resolve_proxy(args.proxy.clone(), args.tor, &seeds);
        if let Some(p) = proxy.as_deref().filter(|p| p.starts_with("socks")) {
            tor::check_socks_reachable(p, Duration::from_secs(5)).await?;
            println!("{}", format!("[+] SOCKS proxy reachable at {}", p).green());
        }
        (proxy, None)
    };

    let config = CrawlConfig {
        seeds: args.seeds,
        max_depth: args.depth,
        max_pages: args.max_pages,
        concurrency: args.concurrency.max(1),
        same_host_only: !args.allow_external,
        proxy,
        delay_ms: args.delay,
        timeout: Duration::from_secs(args.timeout),
        plugins: args.plugins,
        keywords: args.keywords,
        output_dir: args.output,
        show_progress: !args.no_progress,
    };

    stage_banner("CRAWL");
    let result = crawler::run_crawl(&config).await;
    if let Some(process) = tor_process {
        process.shutdown().await;
    }
    let report = result?;

    crawler::display_summary(&report);
    println!("{}", format!("[+] Results saved to {}/", config.output_dir.display()).green());
    Ok(())
}

async fn run_chat(args: ChatArgs) -> Result<()> {
    if args.max_peers < 2 {
        bail!("--max-peers must be at least 2");
    }
    let config = ChatServerConfig {
        bind: args.bind,
        max_peers: args.max_peers,
        tls: args.tls.then(|| TlsPaths {
            cert: args.cert,
            key: args.key,
            sans: args.sans,
        }),
        tunnel: args.tunnel,
        ..Default::default()
    };

    stage_banner("CHAT RELAY");
    chat_relay::run_chat_server(&config).await
}
