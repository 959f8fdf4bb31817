use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use tracing::debug;

/// Language-model operations the pipeline depends on. Implemented by the
/// real OpenAI-compatible client and by scripted fakes in tests.
#[async_trait]
pub trait LlmService: Send + Sync {
    /// One chat completion; returns the assistant reply text.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;

    /// One image generation; returns a hosted image URL.
    async fn generate_image(&self, prompt: &str) -> Result<String>;
}

#[derive(Clone)]
pub struct OpenAiClient {
    http: Client,
    base_url: Url,
    api_key: String,
    model: String,
    image_model: String,
}

impl fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl OpenAiClient {
    pub fn from_config(cfg: &crate::config::Llm) -> Result<Self> {
        let base_url = Url::parse(&cfg.base_url).context("invalid llm.base_url")?;
        Ok(Self::with_base_url(
            cfg.api_key.clone(),
            cfg.model.clone(),
            cfg.image_model.clone(),
            base_url,
        ))
    }

    pub fn with_base_url(api_key: String, model: String, image_model: String, base_url: Url) -> Self {
        let http = Client::builder()
            .user_agent("leadbook/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            api_key,
            model,
            image_model,
        }
    }

    pub fn build_request(&self, path: &str, body: &Value) -> Result<reqwest::Request> {
        let endpoint = self.base_url.join(path).context("invalid LLM base URL")?;
        self.http
            .post(endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .build()
            .context("failed to build LLM request")
    }

    async fn execute(&self, path: &str, body: Value) -> Result<Value> {
        let request = self.build_request(path, &body)?;
        debug!(url = %request.url(), "sending LLM request");
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach LLM API")?;

        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("received 429 from LLM API: {}", body));
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("LLM API error {}: {}", status, body));
        }

        res.json().await.context("invalid LLM API response")
    }
}

#[async_trait]
impl LlmService for OpenAiClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let body = build_chat_body(&self.model, system, prompt);
        let payload = self.execute("v1/chat/completions", body).await?;
        let parsed: ChatResponse =
            serde_json::from_value(payload).context("invalid chat completion payload")?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("chat completion returned no choices"))?;
        Ok(choice.message.content)
    }

    async fn generate_image(&self, prompt: &str) -> Result<String> {
        let body = build_image_body(&self.image_model, prompt);
        let payload = self.execute("v1/images/generations", body).await?;
        let parsed: ImageResponse =
            serde_json::from_value(payload).context("invalid image generation payload")?;
        let item = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("image generation returned no data"))?;
        Ok(item.url)
    }
}

pub fn build_chat_body(model: &str, system: &str, prompt: &str) -> Value {
    json!({
        "model": model,
        "messages": [
            { "role": "system", "content": system },
            { "role": "user", "content": prompt },
        ],
    })
}

pub fn build_image_body(model: &str, prompt: &str) -> Value {
    json!({
        "model": model,
        "prompt": prompt,
        "n": 1,
        "size": "1024x1792",
    })
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize)]
struct ImageResponse {
    data: Vec<ImageItem>,
}

#[derive(Deserialize)]
struct ImageItem {
    url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_client() -> OpenAiClient {
        OpenAiClient::with_base_url(
            "sk-test".into(),
            "gpt-4o-mini".into(),
            "dall-e-3".into(),
            Url::parse("https://api.openai.com/").unwrap(),
        )
    }

    #[test]
    fn chat_body_carries_both_messages() {
        let body = build_chat_body("gpt-4o-mini", "be terse", "write chapter 1");
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "be terse");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "write chapter 1");
    }

    #[test]
    fn image_body_requests_single_image() {
        let body = build_image_body("dall-e-3", "a cover");
        assert_eq!(body["model"], "dall-e-3");
        assert_eq!(body["prompt"], "a cover");
        assert_eq!(body["n"], 1);
    }

    #[test]
    fn build_request_sets_headers() {
        let client = sample_client();
        let body = json!({ "sample": true });
        let request = client.build_request("v1/chat/completions", &body).unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().path(), "/v1/chat/completions");
        let headers = request.headers();
        assert_eq!(
            headers
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "Bearer sk-test"
        );
        assert_eq!(
            headers
                .get("Content-Type")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "application/json"
        );
    }

    #[test]
    fn chat_response_parses() {
        let payload = json!({
            "choices": [ { "message": { "role": "assistant", "content": "hello" } } ]
        });
        let parsed: ChatResponse = serde_json::from_value(payload).unwrap();
        assert_eq!(parsed.choices[0].message.content, "hello");
    }
}
