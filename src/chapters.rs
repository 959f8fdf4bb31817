//! Sequential chapter generation.
//!
//! Chapters are generated strictly one at a time because each prompt carries
//! the titles of everything written so far. A single failed call never aborts
//! the book: the slot is filled with a placeholder and the loop continues, so
//! the returned list always has exactly the requested length.

use crate::constants::{CHAPTER_PROMPT, CHAPTER_SYSTEM, TITLE_PROMPT, TITLE_SYSTEM};
use crate::llm::LlmService;
use crate::model::{Chapter, CompanyProfile};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Fixed delimiter convention: `h2N: <title> ### contentN: <body> ###`.
static CHAPTER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)h2\d*\s*:\s*(.+?)\s*###\s*content\d*\s*:\s*(.+?)\s*###")
        .expect("chapter delimiter regex")
});

/// Rate-limit pacing: sleep `delay` after every `every` chapters.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    pub every: usize,
    pub delay: Duration,
}

impl Pacing {
    pub fn none() -> Self {
        Self {
            every: usize::MAX,
            delay: Duration::ZERO,
        }
    }
}

/// Generate `count` chapters in order. Infallible by policy: LLM errors and
/// malformed replies degrade per-chapter, never abort the run.
#[instrument(skip_all, fields(company = %profile.company_name, count))]
pub async fn generate_chapters(
    llm: &dyn LlmService,
    profile: &CompanyProfile,
    notes: Option<&str>,
    count: usize,
    pacing: Pacing,
) -> Vec<Chapter> {
    let mut chapters: Vec<Chapter> = Vec::with_capacity(count);

    for number in 1..=count {
        let prompt = build_chapter_prompt(profile, notes, number, count, &chapters);
        let chapter = match llm.complete(CHAPTER_SYSTEM, &prompt).await {
            Ok(reply) => parse_chapter_reply(&reply, number),
            Err(err) => {
                warn!(?err, number, "chapter call failed; substituting placeholder");
                placeholder_chapter(number)
            }
        };
        info!(number, title = %chapter.title, "chapter ready");
        chapters.push(chapter);

        if number < count && number % pacing.every == 0 {
            tokio::time::sleep(pacing.delay).await;
        }
    }

    chapters
}

/// Ask once for a book title; a failure falls back to a templated title.
#[instrument(skip_all)]
pub async fn generate_title(llm: &dyn LlmService, profile: &CompanyProfile) -> String {
    let prompt = TITLE_PROMPT
        .replace("{company}", &profile.company_name)
        .replace("{industry}", &profile.industry)
        .replace("{audience}", &profile.target_audience);
    match llm.complete(TITLE_SYSTEM, &prompt).await {
        Ok(reply) => {
            let title = reply.trim().trim_matches('"').trim();
            if title.is_empty() {
                fallback_title(profile)
            } else {
                title.to_string()
            }
        }
        Err(err) => {
            warn!(?err, "title call failed; using fallback title");
            fallback_title(profile)
        }
    }
}

fn fallback_title(profile: &CompanyProfile) -> String {
    format!(
        "The {} Guide from {}",
        profile.industry, profile.company_name
    )
}

pub fn build_chapter_prompt(
    profile: &CompanyProfile,
    notes: Option<&str>,
    number: usize,
    total: usize,
    prior: &[Chapter],
) -> String {
    let prior_titles = if prior.is_empty() {
        "(none yet)".to_string()
    } else {
        prior
            .iter()
            .map(|c| format!("{}. {}", c.number, c.title))
            .collect::<Vec<_>>()
            .join("\n")
    };
    CHAPTER_PROMPT
        .replace("{number}", &number.to_string())
        .replace("{total}", &total.to_string())
        .replace("{company}", &profile.company_name)
        .replace("{industry}", &profile.industry)
        .replace("{audience}", &profile.target_audience)
        .replace("{pain_points}", &profile.pain_points.join("; "))
        .replace("{offer}", &profile.offer)
        .replace("{notes}", notes.unwrap_or(""))
        .replace("{prior_titles}", &prior_titles)
}

/// Parse a reply against the delimiter convention. A reply that does not
/// match degrades to `Chapter N` over the raw trimmed text; an empty reply
/// degrades to a full placeholder.
pub fn parse_chapter_reply(reply: &str, number: usize) -> Chapter {
    if let Some(caps) = CHAPTER_RE.captures(reply) {
        let title = caps[1].trim().to_string();
        let content = caps[2].trim().to_string();
        if !title.is_empty() && !content.is_empty() {
            return Chapter {
                number,
                title,
                content,
            };
        }
    }

    let trimmed = reply.trim();
    if trimmed.is_empty() {
        return placeholder_chapter(number);
    }
    Chapter {
        number,
        title: format!("Chapter {}", number),
        content: trimmed.to_string(),
    }
}

pub fn placeholder_chapter(number: usize) -> Chapter {
    Chapter {
        number,
        title: format!("Chapter {}", number),
        content: "This chapter could not be generated. Please contact support for a \
                  regenerated copy of your book."
            .to_string(),
    }
}
