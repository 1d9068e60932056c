// content_scraper.rs - Homepage content extraction
// Purpose: Pull metadata, headings, links, contact details, forms, scripts and
//          social profiles out of the HTML fetched by the http stage

use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use url::Url;

lazy_static! {
    static ref TITLE_SEL: Selector = Selector::parse("title").unwrap();
    static ref META_SEL: Selector = Selector::parse("meta[name]").unwrap();
    static ref H1_SEL: Selector = Selector::parse("h1").unwrap();
    static ref H2_SEL: Selector = Selector::parse("h2").unwrap();
    static ref LINK_SEL: Selector = Selector::parse("a[href]").unwrap();
    static ref FORM_SEL: Selector = Selector::parse("form").unwrap();
    static ref INPUT_SEL: Selector = Selector::parse("input").unwrap();
    static ref SCRIPT_SEL: Selector = Selector::parse("script[src]").unwrap();
    static ref EMAIL_RE: Regex =
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap();
    static ref PHONE_RE: Regex =
        Regex::new(r"\+?\(?\d{1,4}\)?[\s.-]?\(?\d{2,4}\)?[\s.-]\d{3,4}[\s.-]\d{3,4}").unwrap();
    static ref COMMENT_RE: Regex = Regex::new(r"(?s)<!--.*?-->").unwrap();
}

/// Hosts whose links count as social profiles
const SOCIAL_HOSTS: &[&str] = &[
    "facebook.com",
    "twitter.com",
    "x.com",
    "instagram.com",
    "linkedin.com",
    "youtube.com",
    "github.com",
    "tiktok.com",
    "pinterest.com",
    "reddit.com",
    "t.me",
    "discord.gg",
    "medium.com",
    "mastodon.social",
];

/// Image and asset suffixes that look like emails to the regex (logo@2x.png)
const EMAIL_FALSE_SUFFIXES: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp", ".css", ".js"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormInfo {
    pub action: Option<String>,
    pub method: String,
    pub has_password: bool,
    pub input_count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentReport {
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub meta_keywords: Option<String>,
    pub generator: Option<String>,
    pub h1: Vec<String>,
    pub h2: Vec<String>,
    pub internal_links: Vec<String>,
    pub external_links: Vec<String>,
    pub emails: Vec<String>,
    pub phone_numbers: Vec<String>,
    pub forms: Vec<FormInfo>,
    pub scripts: Vec<String>,
    pub social_profiles: Vec<String>,
    pub comments_count: usize,
}

impl ContentReport {
    pub fn login_forms(&self) -> usize {
        self.forms.iter().filter(|f| f.has_password).count()
    }
}

fn make_absolute_url(base: &Url, reference: &str) -> Option<Url> {
    let reference = reference.trim();
    if reference.is_empty()
        || reference.starts_with('#')
        || reference.starts_with("javascript:")
        || reference.starts_with("mailto:")
        || reference.starts_with("tel:")
        || reference.starts_with("data:")
    {
        return None;
    }

    let mut joined = base.join(reference).ok()?;
    joined.set_fragment(None);
    match joined.scheme() {
        "http" | "https" => Some(joined),
        _ => None,
    }
}

fn host_matches(host: &str, domain: &str) -> bool {
    let host = host.trim_start_matches("www.");
    let domain = domain.trim_start_matches("www.");
    host == domain || host.ends_with(&format!(".{}", domain))
}

fn clean_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse `html` fetched from `page_url`
pub fn scrape(html: &str, page_url: &str) -> ContentReport {
    let document = Html::parse_document(html);
    let base = Url::parse(page_url).ok();
    let page_host = base
        .as_ref()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
        .unwrap_or_default();

    let mut report = ContentReport {
        title: document
            .select(&TITLE_SEL)
            .next()
            .map(|t| clean_text(&t.text().collect::<String>()))
            .filter(|t| !t.is_empty()),
        ..Default::default()
    };

    for meta in document.select(&META_SEL) {
        let name = meta.value().attr("name").unwrap_or_default().to_lowercase();
        let content = meta.value().attr("content").map(|c| c.trim().to_string());
        match name.as_str() {
            "description" => report.meta_description = content,
            "keywords" => report.meta_keywords = content,
            "generator" => report.generator = content,
            _ => {}
        }
    }

    report.h1 = document
        .select(&H1_SEL)
        .map(|h| clean_text(&h.text().collect::<String>()))
        .filter(|h| !h.is_empty())
        .collect();
    report.h2 = document
        .select(&H2_SEL)
        .map(|h| clean_text(&h.text().collect::<String>()))
        .filter(|h| !h.is_empty())
        .collect();

    let mut internal = BTreeSet::new();
    let mut external = BTreeSet::new();
    let mut social = BTreeSet::new();
    let mut emails: BTreeSet<String> = BTreeSet::new();

    for anchor in document.select(&LINK_SEL) {
        let Some(href) = anchor.value().attr("href") else { continue };

        if let Some(address) = href.trim().strip_prefix("mailto:") {
            let address = address.split('?').next().unwrap_or_default().trim().to_lowercase();
            if !address.is_empty() {
                emails.insert(address);
            }
            continue;
        }

        let Some(base) = base.as_ref() else { continue };
        let Some(absolute) = make_absolute_url(base, href) else { continue };
        let host = absolute.host_str().unwrap_or_default().to_lowercase();

        if host_matches(&host, &page_host) {
            internal.insert(absolute.to_string());
        } else {
            if SOCIAL_HOSTS.iter().any(|s| host_matches(&host, s)) {
                social.insert(absolute.to_string());
            }
            external.insert(absolute.to_string());
        }
    }

    for m in EMAIL_RE.find_iter(html) {
        let candidate = m.as_str().to_lowercase();
        if !EMAIL_FALSE_SUFFIXES.iter().any(|s| candidate.ends_with(s)) {
            emails.insert(candidate);
        }
    }

    let text: String = document.root_element().text().collect::<Vec<_>>().join(" ");
    let phones: BTreeSet<String> = PHONE_RE
        .find_iter(&text)
        .map(|m| m.as_str().trim().to_string())
        .filter(|p| p.chars().filter(|c| c.is_ascii_digit()).count() >= 7)
        .collect();

    for form in document.select(&FORM_SEL) {
        let inputs: Vec<_> = form.select(&INPUT_SEL).collect();
        report.forms.push(FormInfo {
            action: form
                .value()
                .attr("action")
                .map(|a| match base.as_ref().and_then(|b| make_absolute_url(b, a)) {
                    Some(url) => url.to_string(),
                    None => a.to_string(),
                }),
            method: form.value().attr("method").unwrap_or("get").to_lowercase(),
            has_password: inputs
                .iter()
                .any(|i| i.value().attr("type").map(|t| t.eq_ignore_ascii_case("password")).unwrap_or(false)),
            input_count: inputs.len(),
        });
    }

    let mut scripts = BTreeSet::new();
    for script in document.select(&SCRIPT_SEL) {
        if let Some(src) = script.value().attr("src") {
            match base.as_ref().and_then(|b| make_absolute_url(b, src)) {
                Some(url) => scripts.insert(url.to_string()),
                None => scripts.insert(src.to_string()),
            };
        }
    }

    report.internal_links = internal.into_iter().collect();
    report.external_links = external.into_iter().collect();
    report.social_profiles = social.into_iter().collect();
    report.emails = emails.into_iter().collect();
    report.phone_numbers = phones.into_iter().collect();
    report.scripts = scripts.into_iter().collect();
    report.comments_count = COMMENT_RE.find_iter(html).count();

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!DOCTYPE html>
<html><head>
  <title>  Acme   Corp </title>
  <meta name="description" content="We build rockets">
  <meta name="keywords" content="rockets, space">
  <meta name="generator" content="Hugo 0.120">
  <script src="/static/app.js"></script>
  <script src="https://cdn.example.net/lib.js"></script>
  <!-- build 42 -->
</head><body>
  <h1>Welcome</h1><h2>Products</h2><h2>Team</h2>
  <a href="/about#team">About</a>
  <a href="https://www.acme.test/contact">Contact</a>
  <a href="https://blog.acme.test/">Blog</a>
  <a href="https://github.com/acme">GitHub</a>
  <a href="https://partner.test/x">Partner</a>
  <a href="mailto:Sales@acme.test?subject=hi">Mail</a>
  <a href="javascript:void(0)">nothing</a>
  <p>Call +1 555-123-4567 or write to info@acme.test. Logo: logo@2x.png</p>
  <form action="/login" method="POST"><input name="u"><input type="password" name="p"></form>
  <form><input name="q"></form>
  <!-- todo remove -->
</body></html>"#;

    #[test]
    fn test_scrape_metadata_and_headings() {
        let report = scrape(PAGE, "https://acme.test/");
        assert_eq!(report.title.as_deref(), Some("Acme Corp"));
        assert_eq!(report.meta_description.as_deref(), Some("We build rockets"));
        assert_eq!(report.meta_keywords.as_deref(), Some("rockets, space"));
        assert_eq!(report.generator.as_deref(), Some("Hugo 0.120"));
        assert_eq!(report.h1, vec!["Welcome"]);
        assert_eq!(report.h2, vec!["Products", "Team"]);
        assert_eq!(report.comments_count, 2);
    }

    #[test]
    fn test_scrape_links_and_contacts() {
        let report = scrape(PAGE, "https://acme.test/");
        assert!(report.internal_links.contains(&"https://acme.test/about".to_string()));
        assert!(report.internal_links.contains(&"https://www.acme.test/contact".to_string()));
        assert!(report.internal_links.contains(&"https://blog.acme.test/".to_string()));
        assert!(report.external_links.contains(&"https://partner.test/x".to_string()));
        assert_eq!(report.social_profiles, vec!["https://github.com/acme"]);

        assert!(report.emails.contains(&"sales@acme.test".to_string()));
        assert!(report.emails.contains(&"info@acme.test".to_string()));
        assert!(!report.emails.iter().any(|e| e.ends_with(".png")));
        assert_eq!(report.phone_numbers.len(), 1);
    }

    #[test]
    fn test_scrape_forms_and_scripts() {
        let report = scrape(PAGE, "https://acme.test/");
        assert_eq!(report.forms.len(), 2);
        assert_eq!(report.login_forms(), 1);
        assert_eq!(report.forms[0].action.as_deref(), Some("https://acme.test/login"));
        assert_eq!(report.forms[0].method, "post");
        assert_eq!(report.forms[1].method, "get");
        assert_eq!(
            report.scripts,
            vec!["https://acme.test/static/app.js", "https://cdn.example.net/lib.js"]
        );
    }
}
