use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use tracing::debug;

/// An attachment carried inline as base64 text, the way transactional mail
/// APIs accept binary payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_base64: String,
}

/// Outbound transactional mail. Implemented by the real API client and by
/// recording fakes in tests.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_book(
        &self,
        to: &str,
        subject: &str,
        html: &str,
        attachments: &[Attachment],
    ) -> Result<()>;
}

#[derive(Clone)]
pub struct ResendClient {
    http: Client,
    base_url: Url,
    api_key: String,
    from: String,
}

impl fmt::Debug for ResendClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResendClient")
            .field("base_url", &self.base_url)
            .field("from", &self.from)
            .finish_non_exhaustive()
    }
}

impl ResendClient {
    pub fn from_config(cfg: &crate::config::Email) -> Result<Self> {
        let base_url = Url::parse(&cfg.base_url).context("invalid email.base_url")?;
        Ok(Self::with_base_url(
            cfg.api_key.clone(),
            cfg.from.clone(),
            base_url,
        ))
    }

    pub fn with_base_url(api_key: String, from: String, base_url: Url) -> Self {
        let http = Client::builder()
            .user_agent("leadbook/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            api_key,
            from,
        }
    }

    pub fn build_request(&self, body: &Value) -> Result<reqwest::Request> {
        let endpoint = self.base_url.join("emails").context("invalid email base URL")?;
        self.http
            .post(endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .build()
            .context("failed to build email request")
    }
}

#[async_trait]
impl Mailer for ResendClient {
    async fn send_book(
        &self,
        to: &str,
        subject: &str,
        html: &str,
        attachments: &[Attachment],
    ) -> Result<()> {
        let body = build_email_body(&self.from, to, subject, html, attachments);
        let request = self.build_request(&body)?;
        debug!(url = %request.url(), to, "sending email request");
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach email API")?;

        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("received 429 from email API: {}", body));
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("email API error {}: {}", status, body));
        }

        let payload: SendResponse = res.json().await.context("invalid email API response")?;
        debug!(id = %payload.id, "email accepted");
        Ok(())
    }
}

pub fn build_email_body(
    from: &str,
    to: &str,
    subject: &str,
    html: &str,
    attachments: &[Attachment],
) -> Value {
    let attachments: Vec<Value> = attachments
        .iter()
        .map(|a| {
            json!({
                "filename": a.filename,
                "content": a.content_base64,
            })
        })
        .collect();
    json!({
        "from": from,
        "to": [to],
        "subject": subject,
        "html": html,
        "attachments": attachments,
    })
}

#[derive(Deserialize)]
struct SendResponse {
    id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_body_includes_attachments() {
        let attachments = vec![
            Attachment {
                filename: "book.epub".into(),
                content_base64: "ZXB1Yg==".into(),
            },
            Attachment {
                filename: "book.pdf".into(),
                content_base64: "cGRm".into(),
            },
        ];
        let body = build_email_body(
            "books@example.com",
            "reader@example.com",
            "Your book is ready",
            "<p>Enjoy!</p>",
            &attachments,
        );
        assert_eq!(body["from"], "books@example.com");
        assert_eq!(body["to"][0], "reader@example.com");
        assert_eq!(body["attachments"][0]["filename"], "book.epub");
        assert_eq!(body["attachments"][1]["content"], "cGRm");
    }

    #[test]
    fn build_request_sets_headers() {
        let client = ResendClient::with_base_url(
            "re-test".into(),
            "books@example.com".into(),
            Url::parse("https://api.resend.com/").unwrap(),
        );
        let body = json!({ "sample": true });
        let request = client.build_request(&body).unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().path(), "/emails");
        assert_eq!(
            request
                .headers()
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "Bearer re-test"
        );
    }
}
