use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::fmt;
use tracing::debug;

/// A retrieved checkout session, reduced to the fields generation needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub paid: bool,
    pub customer_email: Option<String>,
    pub chapter_count: i64,
}

/// Server-side payment session retrieval, behind a trait so tests can
/// substitute canned sessions.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn fetch_session(&self, session_id: &str) -> Result<CheckoutSession>;
}

#[derive(Clone)]
pub struct StripeClient {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl fmt::Debug for StripeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StripeClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl StripeClient {
    pub fn from_config(cfg: &crate::config::Payment) -> Result<Self> {
        let base_url = Url::parse(&cfg.base_url).context("invalid payment.base_url")?;
        Ok(Self::with_base_url(cfg.api_key.clone(), base_url))
    }

    pub fn with_base_url(api_key: String, base_url: Url) -> Self {
        let http = Client::builder()
            .user_agent("leadbook/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            api_key,
        }
    }

    pub fn build_request(&self, session_id: &str) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join(&format!("v1/checkout/sessions/{}", session_id))
            .context("invalid payment base URL")?;
        self.http
            .get(endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .build()
            .context("failed to build payment request")
    }
}

#[async_trait]
impl PaymentGateway for StripeClient {
    async fn fetch_session(&self, session_id: &str) -> Result<CheckoutSession> {
        let request = self.build_request(session_id)?;
        debug!(url = %request.url(), "retrieving checkout session");
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach payment API")?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("payment API error {}: {}", status, body));
        }

        let payload: SessionResponse = res.json().await.context("invalid payment API response")?;
        Ok(session_from_payload(payload))
    }
}

fn session_from_payload(payload: SessionResponse) -> CheckoutSession {
    let email = payload
        .customer_details
        .and_then(|d| d.email)
        .or(payload.customer_email);
    CheckoutSession {
        paid: payload.payment_status.as_deref() == Some("paid"),
        customer_email: email,
        chapter_count: chapter_count_for_tier(
            payload
                .metadata
                .as_ref()
                .and_then(|m| m.tier.as_deref())
                .unwrap_or(""),
        ),
    }
}

/// Tier mapping: the extended tier buys the long book, everything else the
/// standard one.
pub fn chapter_count_for_tier(tier: &str) -> i64 {
    match tier {
        "extended" => 30,
        _ => 15,
    }
}

#[derive(Deserialize)]
struct SessionResponse {
    payment_status: Option<String>,
    customer_email: Option<String>,
    customer_details: Option<CustomerDetails>,
    metadata: Option<SessionMetadata>,
}

#[derive(Deserialize)]
struct CustomerDetails {
    email: Option<String>,
}

#[derive(Deserialize)]
struct SessionMetadata {
    tier: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn build_request_targets_session_path() {
        let client = StripeClient::with_base_url(
            "sk-live-nope".into(),
            Url::parse("https://api.stripe.com/").unwrap(),
        );
        let request = client.build_request("cs_test_123").unwrap();
        assert_eq!(request.method(), reqwest::Method::GET);
        assert_eq!(request.url().path(), "/v1/checkout/sessions/cs_test_123");
        assert_eq!(
            request
                .headers()
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "Bearer sk-live-nope"
        );
    }

    #[test]
    fn paid_session_with_tier_parses() {
        let payload: SessionResponse = serde_json::from_value(json!({
            "payment_status": "paid",
            "customer_details": { "email": "reader@example.com" },
            "metadata": { "tier": "extended" }
        }))
        .unwrap();
        let session = session_from_payload(payload);
        assert!(session.paid);
        assert_eq!(session.customer_email.as_deref(), Some("reader@example.com"));
        assert_eq!(session.chapter_count, 30);
    }

    #[test]
    fn unpaid_session_defaults_to_standard_tier() {
        let payload: SessionResponse = serde_json::from_value(json!({
            "payment_status": "unpaid",
            "customer_email": "reader@example.com"
        }))
        .unwrap();
        let session = session_from_payload(payload);
        assert!(!session.paid);
        assert_eq!(session.customer_email.as_deref(), Some("reader@example.com"));
        assert_eq!(session.chapter_count, 15);
    }

    #[test]
    fn tier_mapping() {
        assert_eq!(chapter_count_for_tier("extended"), 30);
        assert_eq!(chapter_count_for_tier("standard"), 15);
        assert_eq!(chapter_count_for_tier(""), 15);
    }
}
