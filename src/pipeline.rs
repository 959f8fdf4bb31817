//! Generation orchestrator: one linear pass per book row.
//!
//! State machine per request: `generating -> completed` or
//! `generating -> failed`, nothing else. Any error escaping the step chain is
//! caught once here and recorded on the row; there is no retry and no
//! partial-progress resume. Scraping, cover art, and email delivery are
//! best-effort steps that degrade without failing the run.

use crate::chapters::{self, Pacing};
use crate::constants::COVER_PROMPT;
use crate::db::{self, Pool};
use crate::email::{Attachment, Mailer};
use crate::llm::LlmService;
use crate::model::CompanyProfile;
use crate::scrape::{self, PartialProfile};
use crate::{assemble, email};
use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// External services and tuning shared by every generation run.
#[derive(Clone)]
pub struct Services {
    pub llm: Arc<dyn LlmService>,
    pub mailer: Arc<dyn Mailer>,
    pub http: Client,
    pub scrape_char_budget: usize,
    pub pacing: Pacing,
}

/// Run one generation to a terminal state. Never returns an error: failures
/// are recorded on the book row for the polling client.
#[instrument(skip_all, fields(book_id))]
pub async fn run_generation(
    pool: &Pool,
    services: &Services,
    book_id: &str,
    overrides: Option<PartialProfile>,
) {
    if let Err(err) = run_steps(pool, services, book_id, overrides).await {
        error!(?err, book_id, "generation failed");
        match db::fail_book(pool, book_id, &format!("{err:#}")).await {
            Ok(true) => {}
            Ok(false) => warn!(book_id, "book already terminal; failure not recorded"),
            Err(db_err) => error!(?db_err, book_id, "could not record failure"),
        }
    }
}

async fn run_steps(
    pool: &Pool,
    services: &Services,
    book_id: &str,
    overrides: Option<PartialProfile>,
) -> Result<()> {
    let book = db::fetch_book(pool, book_id)
        .await?
        .ok_or_else(|| anyhow!("unknown book id: {}", book_id))?;
    if book.status.is_terminal() {
        warn!(book_id, status = book.status.as_str(), "book already terminal; skipping");
        return Ok(());
    }

    note_progress(pool, book_id, "scrape", "Analyzing your website", 5).await;
    let profile = scrape::scrape_company(
        &services.http,
        services.llm.as_ref(),
        &book.website_url,
        services.scrape_char_budget,
        overrides.as_ref(),
    )
    .await;
    let profile_id = db::upsert_company_profile(pool, &book.email, &profile).await?;
    db::link_profile(pool, book_id, profile_id).await?;

    note_progress(pool, book_id, "chapters", "Writing your chapters", 15).await;
    let chapters = chapters::generate_chapters(
        services.llm.as_ref(),
        &profile,
        book.additional_info.as_deref(),
        book.chapter_count as usize,
        services.pacing,
    )
    .await;

    note_progress(pool, book_id, "title", "Naming your book", 70).await;
    let title = chapters::generate_title(services.llm.as_ref(), &profile).await;

    let cover_url = generate_cover(services.llm.as_ref(), &title, &profile).await;

    note_progress(pool, book_id, "assemble", "Packaging EPUB and PDF", 85).await;
    let epub = assemble::build_epub(&title, &profile, &chapters)?;
    let pdf = assemble::build_pdf(&title, &profile, &chapters)?;
    let epub_b64 = BASE64.encode(&epub);
    let pdf_b64 = BASE64.encode(&pdf);

    let completed = db::complete_book(
        pool,
        book_id,
        &title,
        &chapters,
        cover_url.as_deref(),
        &epub_b64,
        &pdf_b64,
    )
    .await?;
    if !completed {
        warn!(book_id, "book turned terminal mid-run; artifacts discarded");
        return Ok(());
    }
    note_progress(pool, book_id, "done", "Your book is ready", 100).await;
    info!(book_id, %title, chapter_count = chapters.len(), "generation completed");

    deliver_by_email(services.mailer.as_ref(), &book.email, &title, &epub_b64, &pdf_b64).await;
    Ok(())
}

/// Progress rows only feed the polling UI; a failed write is logged and the
/// run keeps going.
async fn note_progress(pool: &Pool, book_id: &str, step: &str, message: &str, percent: i64) {
    if let Err(err) = db::record_progress(pool, book_id, step, message, percent).await {
        warn!(?err, book_id, step, "could not record progress");
    }
}

/// Best-effort cover art; a failure is logged and the book ships without one.
async fn generate_cover(
    llm: &dyn LlmService,
    title: &str,
    profile: &CompanyProfile,
) -> Option<String> {
    let prompt = COVER_PROMPT
        .replace("{title}", title)
        .replace("{industry}", &profile.industry);
    match llm.generate_image(&prompt).await {
        Ok(url) => Some(url),
        Err(err) => {
            warn!(?err, "cover image generation failed; continuing without cover");
            None
        }
    }
}

/// Best-effort delivery; the book stays completed even if mail bounces.
async fn deliver_by_email(
    mailer: &dyn Mailer,
    to: &str,
    title: &str,
    epub_b64: &str,
    pdf_b64: &str,
) {
    let subject = format!("Your ebook is ready: {}", title);
    let html = format!(
        "<p>Your lead-magnet ebook <strong>{}</strong> is attached as EPUB and PDF.</p>",
        assemble::escape_html(title)
    );
    let attachments = [
        Attachment {
            filename: "book.epub".to_string(),
            content_base64: epub_b64.to_string(),
        },
        Attachment {
            filename: "book.pdf".to_string(),
            content_base64: pdf_b64.to_string(),
        },
    ];
    if let Err(err) = mailer.send_book(to, &subject, &html, &attachments).await {
        warn!(?err, to, "email delivery failed; book remains available via status endpoint");
    }
}

/// Convenience constructor wiring the real clients from config.
pub fn services_from_config(cfg: &crate::config::Config) -> Result<Services> {
    let llm = crate::llm::OpenAiClient::from_config(&cfg.llm)?;
    let mailer = email::ResendClient::from_config(&cfg.email)?;
    let http = Client::builder().user_agent("leadbook/0.1").build()?;
    Ok(Services {
        llm: Arc::new(llm),
        mailer: Arc::new(mailer),
        http,
        scrape_char_budget: cfg.generation.scrape_char_budget,
        pacing: Pacing {
            every: cfg.generation.chapter_pause_every,
            delay: std::time::Duration::from_millis(cfg.generation.chapter_pause_ms),
        },
    })
}
