use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::Client;
use serde::Deserialize;

use crate::application::ports::{Captioner, CaptionerError};
use crate::infrastructure::text_processing::sanitize_extracted_text;

pub const CAPTION_PROMPT: &str = "Describe this image for a document search index. \
Cover all visible elements: text, charts, graphs, tables and figures. \
If the image contains a chart or diagram, list its text labels and summarize \
in one or two sentences what the visual data shows. \
Output only the description, with no conversational filler.";

/// OpenAI-style chat/completions vision client. One bounded request per
/// image region; never retries internally, the Ledger owns retry policy.
pub struct OpenAiCaptioner {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    max_tokens: usize,
}

impl OpenAiCaptioner {
    pub fn new(base_url: &str, model: &str, api_key: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client build never fails with valid TLS config");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            max_tokens: 1024,
        }
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

fn retry_after_hint(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl Captioner for OpenAiCaptioner {
    #[tracing::instrument(skip(self, image), fields(image_bytes = image.len()))]
    async fn caption(&self, image: &[u8]) -> Result<String, CaptionerError> {
        let b64 = general_purpose::STANDARD.encode(image);
        let data_uri = format!("data:image/png;base64,{b64}");

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {
                    "role": "user",
                    "content": [
                        {
                            "type": "image_url",
                            "image_url": { "url": data_uri }
                        },
                        {
                            "type": "text",
                            "text": CAPTION_PROMPT
                        }
                    ]
                }
            ],
            "max_tokens": self.max_tokens,
            "temperature": 0.0,
            "stream": false
        });

        let url = format!("{}/v1/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CaptionerError::Timeout
                } else {
                    CaptionerError::ApiRequestFailed(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CaptionerError::RateLimited {
                retry_after: retry_after_hint(&response),
            });
        }
        if status == reqwest::StatusCode::PAYMENT_REQUIRED
            || status == reqwest::StatusCode::INSUFFICIENT_STORAGE
        {
            let text = response.text().await.unwrap_or_default();
            return Err(CaptionerError::QuotaExhausted(format!("HTTP {status}: {text}")));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CaptionerError::ApiRequestFailed(format!(
                "HTTP {status}: {text}"
            )));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| CaptionerError::InvalidResponse(e.to_string()))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(CaptionerError::InvalidResponse(
                "empty caption in response".to_string(),
            ));
        }

        Ok(sanitize_extracted_text(&content))
    }
}
