use crate::model::{Book, BookStatus, Chapter, CompanyProfile, ProgressEvent};
use anyhow::{anyhow, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::instrument;
use uuid::Uuid;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    // Pass through non-sqlite schemes
    if !url.starts_with("sqlite:") {
        return url.to_string();
    }

    // In-memory URLs like sqlite::memory: or sqlite::memory:?cache=shared
    if url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    // Strip prefix and optional //
    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    // Separate query string if any
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        // nothing to normalize
        return url.to_string();
    }

    // Expand leading ~/ to HOME
    let expanded_path = if let Some(rest) = path_part.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            format!("{}/{}", home.trim_end_matches('/'), rest)
        } else {
            path_part.to_string()
        }
    } else {
        path_part.to_string()
    };

    // Ensure parent directory exists if any
    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Insert or refresh the profile for a purchaser email. Profiles are never
/// deleted automatically; a repeat purchase overwrites the scraped fields.
#[instrument(skip_all)]
pub async fn upsert_company_profile(
    pool: &Pool,
    email: &str,
    profile: &CompanyProfile,
) -> Result<i64> {
    let pain_points = serde_json::to_string(&profile.pain_points)?;
    let testimonials = serde_json::to_string(&profile.testimonials)?;
    let rec = sqlx::query(
        "INSERT INTO company_profiles (email, website_url, company_name, industry, target_audience, pain_points, offer, testimonials) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(email) DO UPDATE SET \
           website_url = excluded.website_url, \
           company_name = excluded.company_name, \
           industry = excluded.industry, \
           target_audience = excluded.target_audience, \
           pain_points = excluded.pain_points, \
           offer = excluded.offer, \
           testimonials = excluded.testimonials, \
           updated_at = CURRENT_TIMESTAMP \
         RETURNING id",
    )
    .bind(email)
    .bind(&profile.website_url)
    .bind(&profile.company_name)
    .bind(&profile.industry)
    .bind(&profile.target_audience)
    .bind(pain_points)
    .bind(&profile.offer)
    .bind(testimonials)
    .fetch_one(pool)
    .await?;
    Ok(rec.get::<i64, _>("id"))
}

/// Create the single row tracking one generation attempt. Status starts at
/// `generating`; the returned id is what the client polls with.
#[instrument(skip_all)]
pub async fn insert_book(
    pool: &Pool,
    email: &str,
    website_url: &str,
    additional_info: Option<&str>,
    chapter_count: i64,
) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO books (id, email, website_url, additional_info, chapter_count, status) \
         VALUES (?, ?, ?, ?, ?, 'generating')",
    )
    .bind(&id)
    .bind(email)
    .bind(website_url)
    .bind(additional_info)
    .bind(chapter_count)
    .execute(pool)
    .await?;
    Ok(id)
}

/// Attach the upserted profile to the book row once scraping resolves it.
#[instrument(skip_all)]
pub async fn link_profile(pool: &Pool, book_id: &str, profile_id: i64) -> Result<()> {
    sqlx::query("UPDATE books SET profile_id = ? WHERE id = ?")
        .bind(profile_id)
        .bind(book_id)
        .execute(pool)
        .await?;
    Ok(())
}

fn book_from_row(row: &SqliteRow) -> Result<Book> {
    let status_str: String = row.get("status");
    let status = BookStatus::parse(&status_str)
        .ok_or_else(|| anyhow!("unknown book status: {}", status_str))?;
    let chapters: Option<Vec<Chapter>> = match row.get::<Option<String>, _>("chapters") {
        Some(json) => Some(serde_json::from_str(&json)?),
        None => None,
    };
    Ok(Book {
        id: row.get("id"),
        email: row.get("email"),
        website_url: row.get("website_url"),
        additional_info: row.get("additional_info"),
        chapter_count: row.get("chapter_count"),
        status,
        title: row.get("title"),
        chapters,
        cover_url: row.get("cover_url"),
        epub_base64: row.get("epub_base64"),
        pdf_base64: row.get("pdf_base64"),
        error: row.get("error"),
        created_at: row.get("created_at"),
        finished_at: row.get("finished_at"),
    })
}

#[instrument(skip_all)]
pub async fn fetch_book(pool: &Pool, id: &str) -> Result<Option<Book>> {
    let row = sqlx::query("SELECT * FROM books WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    match row {
        Some(row) => Ok(Some(book_from_row(&row)?)),
        None => Ok(None),
    }
}

/// Mark a book completed with its artifacts. Guarded so a terminal row is
/// never overwritten; returns false when the row was not `generating`.
#[instrument(skip_all)]
pub async fn complete_book(
    pool: &Pool,
    id: &str,
    title: &str,
    chapters: &[Chapter],
    cover_url: Option<&str>,
    epub_base64: &str,
    pdf_base64: &str,
) -> Result<bool> {
    let chapters_json = serde_json::to_string(chapters)?;
    let res = sqlx::query(
        "UPDATE books SET status = 'completed', title = ?, chapters = ?, cover_url = ?, \
         epub_base64 = ?, pdf_base64 = ?, finished_at = CURRENT_TIMESTAMP \
         WHERE id = ? AND status = 'generating'",
    )
    .bind(title)
    .bind(chapters_json)
    .bind(cover_url)
    .bind(epub_base64)
    .bind(pdf_base64)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

/// Mark a book failed with the captured error text. Same terminal guard as
/// [`complete_book`].
#[instrument(skip_all)]
pub async fn fail_book(pool: &Pool, id: &str, error: &str) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE books SET status = 'failed', error = ?, finished_at = CURRENT_TIMESTAMP \
         WHERE id = ? AND status = 'generating'",
    )
    .bind(error)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

#[instrument(skip_all)]
pub async fn record_progress(
    pool: &Pool,
    book_id: &str,
    step: &str,
    message: &str,
    percent: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO generation_progress (book_id, step, message, percent) VALUES (?, ?, ?, ?)",
    )
    .bind(book_id)
    .bind(step)
    .bind(message)
    .bind(percent)
    .execute(pool)
    .await?;
    Ok(())
}

/// Only the most recent event matters to the polling client.
#[instrument(skip_all)]
pub async fn latest_progress(pool: &Pool, book_id: &str) -> Result<Option<ProgressEvent>> {
    let row = sqlx::query(
        "SELECT step, message, percent FROM generation_progress \
         WHERE book_id = ? ORDER BY id DESC LIMIT 1",
    )
    .bind(book_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|row| ProgressEvent {
        step: row.get("step"),
        message: row.get("message"),
        percent: row.get("percent"),
    }))
}
