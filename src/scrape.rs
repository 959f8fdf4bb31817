//! Website scraping and LLM-backed profile extraction.
//!
//! Policy: this step always produces *something*. Network failures, empty
//! pages, and malformed model output all degrade to a hostname-derived
//! default profile instead of aborting the generation run.

use crate::constants::{EXTRACT_PROMPT, EXTRACT_SYSTEM};
use crate::llm::LlmService;
use crate::model::CompanyProfile;
use once_cell::sync::Lazy;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::{instrument, warn};
use url::Url;

/// Partial company facts: either the LLM extraction result or the optional
/// user-supplied `companyData` from the generate request. Missing fields
/// fall through to the layer below.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct PartialProfile {
    pub company_name: Option<String>,
    pub industry: Option<String>,
    pub target_audience: Option<String>,
    pub pain_points: Option<Vec<String>>,
    pub offer: Option<String>,
    pub testimonials: Option<Vec<String>>,
}

/// Scrape a website into a [`CompanyProfile`]. `overrides` (user-supplied
/// data) wins over scraped fields, which win over the hostname fallback.
#[instrument(skip_all, fields(url = website_url))]
pub async fn scrape_company(
    http: &Client,
    llm: &dyn LlmService,
    website_url: &str,
    char_budget: usize,
    overrides: Option<&PartialProfile>,
) -> CompanyProfile {
    let mut profile = CompanyProfile::fallback(website_url, &hostname_label(website_url));

    match fetch_html(http, website_url).await {
        Ok(html) => {
            let text = extract_visible_text(&html, char_budget);
            if text.trim().is_empty() {
                warn!("no visible text extracted; using fallback profile");
            } else {
                match extract_with_llm(llm, website_url, &text).await {
                    Some(extracted) => apply_partial(&mut profile, &extracted),
                    None => warn!("LLM extraction failed; using fallback profile"),
                }
            }
        }
        Err(err) => {
            warn!(?err, "failed to fetch website; using fallback profile");
        }
    }

    if let Some(overrides) = overrides {
        apply_partial(&mut profile, overrides);
    }
    profile
}

async fn fetch_html(http: &Client, url: &str) -> anyhow::Result<String> {
    let res = http.get(url).send().await?.error_for_status()?;
    Ok(res.text().await?)
}

async fn extract_with_llm(
    llm: &dyn LlmService,
    url: &str,
    text: &str,
) -> Option<PartialProfile> {
    let prompt = EXTRACT_PROMPT.replace("{url}", url).replace("{text}", text);
    match llm.complete(EXTRACT_SYSTEM, &prompt).await {
        Ok(reply) => parse_profile_reply(&reply),
        Err(err) => {
            warn!(?err, "profile extraction call failed");
            None
        }
    }
}

static TITLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("title").expect("title selector"));
static META_DESCRIPTION_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("meta[name=\"description\"]").expect("meta description selector"));
static META_KEYWORDS_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("meta[name=\"keywords\"]").expect("meta keywords selector"));
static BODY_TEXT_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h1, h2, h3, p, li, blockquote").expect("body text selector"));

/// Visible page text: title, meta description/keywords, then headline and
/// body copy. Scripts and styles never match these selectors, so they are
/// excluded by construction. Output is truncated to `char_budget` on a char
/// boundary.
pub fn extract_visible_text(html: &str, char_budget: usize) -> String {
    let document = Html::parse_document(html);
    let mut parts: Vec<String> = Vec::new();

    if let Some(el) = document.select(&TITLE_SELECTOR).next() {
        push_clean(&mut parts, &el.text().collect::<Vec<_>>().join(" "));
    }

    for sel in [&*META_DESCRIPTION_SELECTOR, &*META_KEYWORDS_SELECTOR] {
        for el in document.select(sel) {
            if let Some(content) = el.value().attr("content") {
                push_clean(&mut parts, content);
            }
        }
    }

    for el in document.select(&BODY_TEXT_SELECTOR) {
        push_clean(&mut parts, &el.text().collect::<Vec<_>>().join(" "));
    }

    truncate_chars(&parts.join("\n"), char_budget)
}

fn push_clean(parts: &mut Vec<String>, raw: &str) {
    let cleaned = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if !cleaned.is_empty() {
        parts.push(cleaned);
    }
}

fn truncate_chars(s: &str, budget: usize) -> String {
    if s.chars().count() <= budget {
        return s.to_string();
    }
    s.chars().take(budget).collect()
}

/// Parse the extraction reply as JSON, tolerating a Markdown code fence
/// around the object. Returns None on malformed output.
pub fn parse_profile_reply(reply: &str) -> Option<PartialProfile> {
    let trimmed = reply.trim();
    let body = strip_code_fence(trimmed);
    serde_json::from_str(body).ok()
}

fn strip_code_fence(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    // Drop an optional language tag on the fence line.
    let rest = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn apply_partial(profile: &mut CompanyProfile, partial: &PartialProfile) {
    if let Some(v) = non_empty(&partial.company_name) {
        profile.company_name = v;
    }
    if let Some(v) = non_empty(&partial.industry) {
        profile.industry = v;
    }
    if let Some(v) = non_empty(&partial.target_audience) {
        profile.target_audience = v;
    }
    if let Some(v) = partial.pain_points.as_ref().filter(|v| !v.is_empty()) {
        profile.pain_points = v.clone();
    }
    if let Some(v) = non_empty(&partial.offer) {
        profile.offer = v;
    }
    if let Some(v) = partial.testimonials.as_ref().filter(|v| !v.is_empty()) {
        profile.testimonials = v.clone();
    }
}

fn non_empty(field: &Option<String>) -> Option<String> {
    field
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Derive a presentable company name from the URL hostname:
/// `https://www.acme-fitness.com/x` becomes `Acme Fitness`. Input that has
/// no parseable hostname comes back unchanged.
pub fn hostname_label(website_url: &str) -> String {
    let Some(host) = Url::parse(website_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
    else {
        return website_url.to_string();
    };
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let label = host.split('.').next().unwrap_or(host);
    let words: Vec<String> = label
        .split(['-', '_'])
        .filter(|w| !w.is_empty())
        .map(capitalize)
        .collect();
    if words.is_empty() {
        host.to_string()
    } else {
        words.join(" ")
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
