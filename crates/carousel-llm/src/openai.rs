use async_trait::async_trait;
use serde_json::json;

use crate::{FinishReason, ProviderAdapter, Request, Response, Role, Usage};
use carousel_types::CarouselError;

const PROVIDER: &str = "openai";

// ---------------------------------------------------------------------------
// OpenAiAdapter
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct OpenAiAdapter {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
}

impl OpenAiAdapter {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            base_url: "https://api.openai.com".to_string(),
        }
    }

    pub fn from_env() -> Result<Self, CarouselError> {
        let key = std::env::var("OPENAI_API_KEY").map_err(|_| CarouselError::AuthError {
            provider: PROVIDER.into(),
        })?;
        Ok(Self::new(key))
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }
}

fn build_request_body(request: &Request) -> serde_json::Value {
    let input: Vec<serde_json::Value> = request
        .messages
        .iter()
        .map(|msg| {
            let role = match msg.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            json!({ "role": role, "content": msg.content })
        })
        .collect();

    let mut body = json!({
        "model": request.model,
        "input": input,
    });

    if let Some(max_tokens) = request.max_tokens {
        body["max_output_tokens"] = json!(max_tokens);
    }
    if let Some(temp) = request.temperature {
        body["temperature"] = json!(temp);
    }

    body
}

fn parse_response(body: &serde_json::Value) -> Response {
    let id = body["id"].as_str().unwrap_or("").to_string();
    let model = body["model"].as_str().unwrap_or("").to_string();

    let finish_reason = match body["status"].as_str() {
        Some("incomplete") => FinishReason::MaxTokens,
        _ => FinishReason::EndTurn,
    };

    let mut text = String::new();
    for item in body["output"].as_array().into_iter().flatten() {
        if item["type"] != "message" {
            continue;
        }
        for block in item["content"].as_array().into_iter().flatten() {
            if block["type"] == "output_text" {
                if let Some(t) = block["text"].as_str() {
                    text.push_str(t);
                }
            }
        }
    }

    let usage_obj = &body["usage"];
    let usage = Usage {
        cache_read_tokens: usage_obj["input_tokens_details"]["cached_tokens"].as_u64(),
        ..Usage::new(
            usage_obj["input_tokens"].as_u64().unwrap_or(0),
            usage_obj["output_tokens"].as_u64().unwrap_or(0),
        )
    };

    Response {
        id,
        text,
        usage,
        model,
        finish_reason,
    }
}

fn map_error(status: reqwest::StatusCode, body: &str) -> CarouselError {
    let status_u16 = status.as_u16();
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.to_string());
    match status_u16 {
        429 => CarouselError::RateLimited {
            provider: PROVIDER.into(),
            retry_after_ms: 1000,
        },
        401 | 403 => CarouselError::AuthError {
            provider: PROVIDER.into(),
        },
        400 if message.contains("context_length_exceeded")
            || message.contains("maximum context length") =>
        {
            CarouselError::ContextLengthExceeded {
                provider: PROVIDER.into(),
                message,
            }
        }
        500 | 502 | 503 => CarouselError::ProviderError {
            provider: PROVIDER.into(),
            status: status_u16,
            message,
            retryable: true,
        },
        _ => CarouselError::ProviderError {
            provider: PROVIDER.into(),
            status: status_u16,
            message,
            retryable: false,
        },
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    async fn complete(&self, request: &Request) -> Result<Response, CarouselError> {
        let body = build_request_body(request);

        let resp = self
            .client
            .post(format!("{}/v1/responses", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| CarouselError::ProviderError {
                provider: PROVIDER.into(),
                status: 0,
                message: e.to_string(),
                retryable: true,
            })?;

        let status = resp.status();
        let response_body = resp.text().await.map_err(|e| CarouselError::ProviderError {
            provider: PROVIDER.into(),
            status: 0,
            message: e.to_string(),
            retryable: true,
        })?;

        if !status.is_success() {
            return Err(map_error(status, &response_body));
        }

        let json: serde_json::Value =
            serde_json::from_str(&response_body).map_err(|e| CarouselError::ProviderError {
                provider: PROVIDER.into(),
                status: status.as_u16(),
                message: format!("Failed to parse response JSON: {e}"),
                retryable: false,
            })?;

        Ok(parse_response(&json))
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}
