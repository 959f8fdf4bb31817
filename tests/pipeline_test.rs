use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use leadbook::chapters::Pacing;
use leadbook::db;
use leadbook::email::{Attachment, Mailer};
use leadbook::llm::LlmService;
use leadbook::model::BookStatus;
use leadbook::pipeline::{run_generation, Services};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

#[derive(Clone, Default)]
struct ScriptedLlm {
    completions: Arc<Mutex<VecDeque<Result<String>>>>,
    image: Arc<Mutex<Option<Result<String>>>>,
}

impl ScriptedLlm {
    fn with_completions(replies: Vec<Result<String>>) -> Self {
        Self {
            completions: Arc::new(Mutex::new(VecDeque::from(replies))),
            ..Default::default()
        }
    }

    async fn set_image(&self, result: Result<String>) {
        *self.image.lock().await = Some(result);
    }
}

#[async_trait]
impl LlmService for ScriptedLlm {
    async fn complete(&self, _system: &str, _prompt: &str) -> Result<String> {
        self.completions
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("no scripted reply")))
    }

    async fn generate_image(&self, _prompt: &str) -> Result<String> {
        self.image
            .lock()
            .await
            .take()
            .unwrap_or_else(|| Err(anyhow!("no scripted image")))
    }
}

#[derive(Debug, Clone)]
struct SentMail {
    to: String,
    subject: String,
    attachments: Vec<Attachment>,
}

#[derive(Clone, Default)]
struct RecordingMailer {
    fail: bool,
    sent: Arc<Mutex<Vec<SentMail>>>,
}

impl RecordingMailer {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    async fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_book(
        &self,
        to: &str,
        subject: &str,
        _html: &str,
        attachments: &[Attachment],
    ) -> Result<()> {
        if self.fail {
            return Err(anyhow!("mailbox on fire"));
        }
        self.sent.lock().await.push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            attachments: attachments.to_vec(),
        });
        Ok(())
    }
}

fn services(llm: ScriptedLlm, mailer: RecordingMailer) -> Services {
    Services {
        llm: Arc::new(llm),
        mailer: Arc::new(mailer),
        http: reqwest::Client::new(),
        scrape_char_budget: 10_000,
        pacing: Pacing::none(),
    }
}

fn chapter_reply(n: usize) -> Result<String> {
    Ok(format!(
        "h2{n}: Topic {n} ### content{n}: Body of chapter {n}. ###"
    ))
}

/// The `.invalid` TLD never resolves, so scraping falls back to the
/// hostname-derived profile without consuming any scripted LLM replies.
const UNREACHABLE_SITE: &str = "https://acme-fitness.invalid/";

#[tokio::test]
async fn full_run_completes_and_emails_the_book() {
    let pool = setup_pool().await;

    let mut replies: Vec<Result<String>> = (1..=15).map(chapter_reply).collect();
    replies.push(Ok("Stronger Every Week".into()));
    let llm = ScriptedLlm::with_completions(replies);
    llm.set_image(Ok("https://cdn.example/cover.png".into())).await;
    let mailer = RecordingMailer::default();
    let services = services(llm, mailer.clone());

    let book_id = db::insert_book(&pool, "reader@example.com", UNREACHABLE_SITE, None, 15)
        .await
        .unwrap();
    run_generation(&pool, &services, &book_id, None).await;

    let book = db::fetch_book(&pool, &book_id).await.unwrap().unwrap();
    assert_eq!(book.status, BookStatus::Completed);
    assert_eq!(book.title.as_deref(), Some("Stronger Every Week"));
    assert_eq!(book.cover_url.as_deref(), Some("https://cdn.example/cover.png"));
    assert!(book.error.is_none());

    let chapters = book.chapters.unwrap();
    assert_eq!(chapters.len(), 15);
    assert_eq!(
        chapters.iter().map(|c| c.number).collect::<Vec<_>>(),
        (1..=15).collect::<Vec<_>>()
    );
    assert_eq!(chapters[0].title, "Topic 1");

    // Fallback profile was derived from the hostname and persisted.
    let company: String =
        sqlx::query_scalar("SELECT company_name FROM company_profiles WHERE email = ?")
            .bind("reader@example.com")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(company, "Acme Fitness");

    // The stored blob is a real EPUB container.
    let epub = BASE64.decode(book.epub_base64.unwrap()).unwrap();
    assert_eq!(&epub[..2], b"PK");
    let pdf = BASE64.decode(book.pdf_base64.unwrap()).unwrap();
    assert!(pdf.starts_with(b"%PDF"));

    let sent = mailer.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "reader@example.com");
    assert!(sent[0].subject.contains("Stronger Every Week"));
    assert_eq!(sent[0].attachments.len(), 2);

    let progress = db::latest_progress(&pool, &book_id).await.unwrap().unwrap();
    assert_eq!(progress.percent, 100);
}

#[tokio::test]
async fn failed_chapter_calls_degrade_to_placeholders() {
    let pool = setup_pool().await;

    // Chapters 2 and 4 fail outright, the title call fails too.
    let replies: Vec<Result<String>> = vec![
        chapter_reply(1),
        Err(anyhow!("rate limited")),
        chapter_reply(3),
        Err(anyhow!("rate limited")),
        chapter_reply(5),
    ];
    let llm = ScriptedLlm::with_completions(replies);
    let mailer = RecordingMailer::default();
    let services = services(llm, mailer);

    let book_id = db::insert_book(&pool, "reader@example.com", UNREACHABLE_SITE, None, 15)
        .await
        .unwrap();
    run_generation(&pool, &services, &book_id, None).await;

    let book = db::fetch_book(&pool, &book_id).await.unwrap().unwrap();
    assert_eq!(book.status, BookStatus::Completed);

    let chapters = book.chapters.unwrap();
    assert_eq!(chapters.len(), 15);
    assert_eq!(chapters[1].title, "Chapter 2");
    assert_eq!(chapters[3].title, "Chapter 4");
    // Chapters beyond the scripted replies also fall back.
    assert_eq!(chapters[14].title, "Chapter 15");
    // Title call had no scripted reply left, so the templated fallback ran.
    assert!(book.title.unwrap().contains("Acme Fitness"));
}

#[tokio::test]
async fn email_failure_does_not_fail_the_book() {
    let pool = setup_pool().await;

    let mut replies: Vec<Result<String>> = (1..=15).map(chapter_reply).collect();
    replies.push(Ok("The Guide".into()));
    let llm = ScriptedLlm::with_completions(replies);
    let services = services(llm, RecordingMailer::failing());

    let book_id = db::insert_book(&pool, "reader@example.com", UNREACHABLE_SITE, None, 15)
        .await
        .unwrap();
    run_generation(&pool, &services, &book_id, None).await;

    let book = db::fetch_book(&pool, &book_id).await.unwrap().unwrap();
    assert_eq!(book.status, BookStatus::Completed);
    assert!(book.epub_base64.is_some());
}

#[tokio::test]
async fn progress_write_failure_does_not_fail_the_book() {
    let pool = setup_pool().await;

    let mut replies: Vec<Result<String>> = (1..=15).map(chapter_reply).collect();
    replies.push(Ok("The Guide".into()));
    let llm = ScriptedLlm::with_completions(replies);
    let mailer = RecordingMailer::default();
    let services = services(llm, mailer.clone());

    let book_id = db::insert_book(&pool, "reader@example.com", UNREACHABLE_SITE, None, 15)
        .await
        .unwrap();

    // Every progress insert now errors; the run must still reach completed.
    sqlx::query("DROP TABLE generation_progress")
        .execute(&pool)
        .await
        .unwrap();
    run_generation(&pool, &services, &book_id, None).await;

    let book = db::fetch_book(&pool, &book_id).await.unwrap().unwrap();
    assert_eq!(book.status, BookStatus::Completed);
    assert_eq!(mailer.sent().await.len(), 1);
}

#[tokio::test]
async fn unknown_book_id_leaves_no_rows_behind() {
    let pool = setup_pool().await;
    let services = services(ScriptedLlm::default(), RecordingMailer::default());

    run_generation(&pool, &services, "no-such-book", None).await;

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM books")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn rerunning_a_terminal_book_changes_nothing() {
    let pool = setup_pool().await;

    let mut replies: Vec<Result<String>> = (1..=15).map(chapter_reply).collect();
    replies.push(Ok("First Title".into()));
    let llm = ScriptedLlm::with_completions(replies);
    let mailer = RecordingMailer::default();
    let services_first = services(llm, mailer.clone());

    let book_id = db::insert_book(&pool, "reader@example.com", UNREACHABLE_SITE, None, 15)
        .await
        .unwrap();
    run_generation(&pool, &services_first, &book_id, None).await;

    // Second run with different scripted output must be a no-op.
    let mut replies: Vec<Result<String>> = (1..=15).map(chapter_reply).collect();
    replies.push(Ok("Second Title".into()));
    let services_second = services(ScriptedLlm::with_completions(replies), mailer.clone());
    run_generation(&pool, &services_second, &book_id, None).await;

    let book = db::fetch_book(&pool, &book_id).await.unwrap().unwrap();
    assert_eq!(book.status, BookStatus::Completed);
    assert_eq!(book.title.as_deref(), Some("First Title"));
    assert_eq!(mailer.sent().await.len(), 1);
}

#[tokio::test]
async fn user_supplied_company_data_overrides_the_fallback() {
    let pool = setup_pool().await;

    let mut replies: Vec<Result<String>> = (1..=15).map(chapter_reply).collect();
    replies.push(Ok("The Guide".into()));
    let llm = ScriptedLlm::with_completions(replies);
    let services = services(llm, RecordingMailer::default());

    let overrides: leadbook::scrape::PartialProfile = serde_json::from_value(serde_json::json!({
        "companyName": "Handwritten Name",
        "industry": "Consulting"
    }))
    .unwrap();

    let book_id = db::insert_book(&pool, "reader@example.com", UNREACHABLE_SITE, None, 15)
        .await
        .unwrap();
    run_generation(&pool, &services, &book_id, Some(overrides)).await;

    let (company, industry): (String, String) = sqlx::query_as(
        "SELECT company_name, industry FROM company_profiles WHERE email = ?",
    )
    .bind("reader@example.com")
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(company, "Handwritten Name");
    assert_eq!(industry, "Consulting");
}
