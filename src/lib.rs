// lib.rs - osintrust library root
// Purpose: One module per tool plus the shared HTTP, progress, metrics and
//          logging plumbing the `osintrust` binary wires together

pub mod http_client;
pub mod logging;
pub mod metrics;
pub mod progress;

// domain scan
pub mod content_scraper;
pub mod dir_bruteforce;
pub mod dns_recon;
pub mod domain_scan;
pub mod port_scanner;
pub mod report_generator;
pub mod tls_inspector;
pub mod vuln_heuristics;
pub mod wayback;
pub mod web_probe;
pub mod whois_lookup;

// footprint
pub mod footprint;
pub mod footprint_store;

pub mod load_tester;
pub mod shortener;

// crawler
pub mod crawl_plugins;
pub mod crawler;
pub mod tor;

// chat
pub mod chat_relay;
pub mod chat_tls;
pub mod tunnel;

pub mod process_watch;

#[cfg(test)]
mod test_support;
