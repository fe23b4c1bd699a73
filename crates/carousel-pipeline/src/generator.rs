//! The generation-service seam.
//!
//! The executor only sees [`Generator::invoke`]: one stage, one instruction
//! block, one user payload, one complete response. Provider routing, transport
//! retry and the per-call timeout all live behind it.

use std::time::Duration;

use async_trait::async_trait;
use carousel_llm::{FinishReason, LlmClient, Request, Usage};
use carousel_types::{CarouselError, Result, Stage};

use crate::config::{PipelineConfig, StageModels};

/// A complete generation result. `text` is untrusted.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub usage: Usage,
}

#[async_trait]
pub trait Generator: Send + Sync {
    async fn invoke(
        &self,
        stage: Stage,
        system: &str,
        user: &str,
        max_output_tokens: u32,
    ) -> Result<Generation>;
}

// ---------------------------------------------------------------------------
// LlmGenerator
// ---------------------------------------------------------------------------

/// [`Generator`] backed by an [`LlmClient`], one model per stage.
pub struct LlmGenerator {
    client: LlmClient,
    models: StageModels,
    timeout: Duration,
}

impl LlmGenerator {
    pub fn new(client: LlmClient, config: &PipelineConfig) -> Self {
        Self {
            client,
            models: config.models.clone(),
            timeout: config.generation_timeout,
        }
    }
}

#[async_trait]
impl Generator for LlmGenerator {
    async fn invoke(
        &self,
        stage: Stage,
        system: &str,
        user: &str,
        max_output_tokens: u32,
    ) -> Result<Generation> {
        let model = self.models.for_stage(stage);
        let budget = self
            .client
            .model_catalog()
            .clamp_output_tokens(model, max_output_tokens);
        if budget < max_output_tokens {
            tracing::debug!(
                stage = %stage,
                model,
                requested = max_output_tokens,
                budget,
                "Output budget clamped to model limit"
            );
        }
        let request = Request::instructed(model, system, user).with_max_tokens(budget);

        let response = tokio::time::timeout(self.timeout, self.client.complete(&request))
            .await
            .map_err(|_| CarouselError::RequestTimeout {
                provider: model.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            })??;

        if response.finish_reason == FinishReason::MaxTokens {
            tracing::warn!(
                stage = %stage,
                max_output_tokens = budget,
                "Generation hit the output token limit; payload may be truncated"
            );
        }

        Ok(Generation {
            text: response.text,
            usage: response.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carousel_llm::{ProviderAdapter, Response};
    use std::sync::{Arc, Mutex};

    struct EchoProvider {
        seen: Arc<Mutex<Vec<Request>>>,
        delay: Duration,
    }

    #[async_trait]
    impl ProviderAdapter for EchoProvider {
        async fn complete(&self, request: &Request) -> std::result::Result<Response, CarouselError> {
            self.seen.lock().unwrap().push(request.clone());
            tokio::time::sleep(self.delay).await;
            Ok(Response {
                id: "r1".into(),
                text: "{\"ok\":true}".into(),
                usage: Usage::new(12, 3),
                model: request.model.clone(),
                finish_reason: FinishReason::EndTurn,
            })
        }
        fn name(&self) -> &str {
            "echo"
        }
    }

    fn generator(delay: Duration, timeout: Duration) -> (LlmGenerator, Arc<Mutex<Vec<Request>>>) {
        generator_with_build_model("echo-build", delay, timeout)
    }

    fn generator_with_build_model(
        build_model: &str,
        delay: Duration,
        timeout: Duration,
    ) -> (LlmGenerator, Arc<Mutex<Vec<Request>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut client = LlmClient::new();
        client.register_provider(EchoProvider {
            seen: Arc::clone(&seen),
            delay,
        });
        let mut config = PipelineConfig::default();
        config.models.build = build_model.into();
        config.generation_timeout = timeout;
        (LlmGenerator::new(client, &config), seen)
    }

    #[tokio::test]
    async fn routes_stage_model_and_budget() {
        let (gen, seen) = generator(Duration::ZERO, Duration::from_secs(5));
        let out = gen
            .invoke(Stage::Build, "build slides", "{}", 16384)
            .await
            .unwrap();
        assert_eq!(out.text, "{\"ok\":true}");
        assert_eq!(out.usage.total_tokens, 15);

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].model, "echo-build");
        assert_eq!(seen[0].max_tokens, Some(16384));
        assert_eq!(seen[0].system_text(), "build slides");
    }

    #[tokio::test]
    async fn budget_is_clamped_to_catalog_limit() {
        let (gen, seen) =
            generator_with_build_model("gpt-4o", Duration::ZERO, Duration::from_secs(5));
        gen.invoke(Stage::Build, "s", "u", 32_000).await.unwrap();
        gen.invoke(Stage::Build, "s", "u", 8192).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].max_tokens, Some(16_384));
        assert_eq!(seen[1].max_tokens, Some(8192));
    }

    #[tokio::test]
    async fn slow_call_becomes_request_timeout() {
        let (gen, _) = generator(Duration::from_secs(5), Duration::from_millis(20));
        let err = gen.invoke(Stage::Plan, "s", "u", 10).await.unwrap_err();
        assert!(matches!(err, CarouselError::RequestTimeout { timeout_ms: 20, .. }));
    }
}
