use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BookStatus {
    Generating,
    Completed,
    Failed,
}

impl BookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookStatus::Generating => "generating",
            BookStatus::Completed => "completed",
            BookStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "generating" => Some(BookStatus::Generating),
            "completed" => Some(BookStatus::Completed),
            "failed" => Some(BookStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BookStatus::Generating)
    }
}

/// Facts about a business, scraped or user-supplied. Upserted per purchaser
/// email; a generation run owns its copy exclusively.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompanyProfile {
    pub company_name: String,
    pub website_url: String,
    pub industry: String,
    pub target_audience: String,
    pub pain_points: Vec<String>,
    pub offer: String,
    pub testimonials: Vec<String>,
}

impl CompanyProfile {
    /// Minimal record used when scraping yields nothing usable.
    pub fn fallback(website_url: &str, hostname: &str) -> Self {
        Self {
            company_name: hostname.to_string(),
            website_url: website_url.to_string(),
            industry: "General business".to_string(),
            target_audience: "Prospective customers".to_string(),
            pain_points: Vec::new(),
            offer: String::new(),
            testimonials: Vec::new(),
        }
    }
}

/// Ordered chapter tuple; the list is append-only and immutable once the
/// book reaches a terminal status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chapter {
    pub number: usize,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    pub id: String,
    pub email: String,
    pub website_url: String,
    pub additional_info: Option<String>,
    pub chapter_count: i64,
    pub status: BookStatus,
    pub title: Option<String>,
    pub chapters: Option<Vec<Chapter>>,
    pub cover_url: Option<String>,
    pub epub_base64: Option<String>,
    pub pdf_base64: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressEvent {
    pub step: String,
    pub message: String,
    pub percent: i64,
}
