use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use carousel_types::CarouselError;

use crate::retry::{execute_with_retry, BackoffPolicy};
use crate::{DynProvider, ProviderAdapter, Request, Response};

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

pub trait Middleware: Send + Sync {
    fn before(&self, _request: &mut Request) {}
    fn after(&self, _request: &Request, _response: &mut Response) {}
}

// ---------------------------------------------------------------------------
// Built-in middleware: LoggingMiddleware
// ---------------------------------------------------------------------------

pub struct LoggingMiddleware;

impl Middleware for LoggingMiddleware {
    fn before(&self, request: &mut Request) {
        tracing::info!(
            model = %request.model,
            messages = request.messages.len(),
            max_tokens = ?request.max_tokens,
            "Generation request"
        );
    }

    fn after(&self, _request: &Request, response: &mut Response) {
        tracing::info!(
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            finish = ?response.finish_reason,
            "Generation response"
        );
    }
}

// ---------------------------------------------------------------------------
// Built-in middleware: UsageTrackingMiddleware
// ---------------------------------------------------------------------------

/// Accumulates token counts across every call made through the client.
/// Clones share the same counters.
#[derive(Clone, Default)]
pub struct UsageTrackingMiddleware {
    total_input: Arc<AtomicU64>,
    total_output: Arc<AtomicU64>,
}

impl UsageTrackingMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_input_tokens(&self) -> u64 {
        self.total_input.load(Ordering::Relaxed)
    }

    pub fn total_output_tokens(&self) -> u64 {
        self.total_output.load(Ordering::Relaxed)
    }
}

impl Middleware for UsageTrackingMiddleware {
    fn after(&self, _request: &Request, response: &mut Response) {
        self.total_input
            .fetch_add(response.usage.input_tokens, Ordering::Relaxed);
        self.total_output
            .fetch_add(response.usage.output_tokens, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// ModelInfo / ModelCatalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub id: String,
    pub provider: String,
    /// Largest completion the model accepts.
    pub max_output_tokens: u32,
}

pub struct ModelCatalog {
    models: HashMap<String, ModelInfo>,
}

impl ModelCatalog {
    pub fn new() -> Self {
        let mut models = HashMap::new();

        for (id, provider, max_out) in [
            ("claude-sonnet-4-5", "anthropic", 64_000),
            ("claude-haiku-4-5", "anthropic", 64_000),
            ("gpt-4o", "openai", 16_384),
            ("gpt-4o-mini", "openai", 16_384),
        ] {
            models.insert(
                id.to_string(),
                ModelInfo {
                    id: id.to_string(),
                    provider: provider.to_string(),
                    max_output_tokens: max_out,
                },
            );
        }

        Self { models }
    }

    pub fn lookup(&self, model: &str) -> Option<&ModelInfo> {
        self.models.get(model)
    }

    /// Clamp an output budget to what `model` accepts. Unknown models keep
    /// the requested budget.
    pub fn clamp_output_tokens(&self, model: &str, requested: u32) -> u32 {
        match self.lookup(model) {
            Some(info) => requested.min(info.max_output_tokens),
            None => requested,
        }
    }

    /// Provider for a model id: exact catalog hit first, then the model
    /// family prefix.
    pub fn provider_for_model(&self, model: &str) -> Option<&str> {
        if let Some(info) = self.models.get(model) {
            return Some(info.provider.as_str());
        }
        if model.starts_with("claude") {
            Some("anthropic")
        } else if model.starts_with("gpt") || model.starts_with("o1") || model.starts_with("o3") {
            Some("openai")
        } else {
            None
        }
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// LlmClient
// ---------------------------------------------------------------------------

pub struct LlmClient {
    providers: BTreeMap<String, DynProvider>,
    model_catalog: ModelCatalog,
    middleware: Vec<Box<dyn Middleware>>,
    max_retries: usize,
    backoff: BackoffPolicy,
}

impl LlmClient {
    pub fn new() -> Self {
        Self {
            providers: BTreeMap::new(),
            model_catalog: ModelCatalog::new(),
            middleware: Vec::new(),
            max_retries: 2,
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn register_provider(&mut self, provider: impl ProviderAdapter + 'static) {
        let name = provider.name().to_string();
        self.providers.insert(name, DynProvider::new(provider));
    }

    pub fn with_middleware(mut self, m: impl Middleware + 'static) -> Self {
        self.middleware.push(Box::new(m));
        self
    }

    pub fn with_retry(mut self, max_retries: usize, backoff: BackoffPolicy) -> Self {
        self.max_retries = max_retries;
        self.backoff = backoff;
        self
    }

    pub fn model_catalog(&self) -> &ModelCatalog {
        &self.model_catalog
    }

    pub async fn complete(&self, request: &Request) -> Result<Response, CarouselError> {
        let provider = self.resolve_provider(request)?;
        let mut req = request.clone();

        for m in &self.middleware {
            m.before(&mut req);
        }

        let mut resp = execute_with_retry(
            || provider.complete(&req),
            self.max_retries,
            &self.backoff,
            provider.name(),
        )
        .await?;

        for m in &self.middleware {
            m.after(&req, &mut resp);
        }

        Ok(resp)
    }

    fn resolve_provider(&self, request: &Request) -> Result<&DynProvider, CarouselError> {
        // 1. Explicit provider field
        if let Some(ref provider_name) = request.provider {
            return self.providers.get(provider_name).ok_or_else(|| {
                CarouselError::Other(format!("Provider '{}' not registered", provider_name))
            });
        }

        // 2. Model catalog lookup
        if let Some(provider_name) = self.model_catalog.provider_for_model(&request.model) {
            if let Some(provider) = self.providers.get(provider_name) {
                return Ok(provider);
            }
        }

        // 3. First registered provider, in name order
        if let Some(provider) = self.providers.values().next() {
            return Ok(provider);
        }

        Err(CarouselError::Other("No providers registered".to_string()))
    }

    /// Create from environment variables (detect available API keys).
    #[cfg(feature = "providers")]
    pub fn from_env() -> Result<Self, CarouselError> {
        let mut client = Self::new();
        let mut found_any = false;

        if let Ok(adapter) = crate::AnthropicAdapter::from_env() {
            client.register_provider(adapter);
            found_any = true;
        }

        if let Ok(adapter) = crate::OpenAiAdapter::from_env() {
            client.register_provider(adapter);
            found_any = true;
        }

        if !found_any {
            return Err(CarouselError::AuthError {
                provider: "any (set ANTHROPIC_API_KEY or OPENAI_API_KEY)".to_string(),
            });
        }

        Ok(client)
    }
}

impl Default for LlmClient {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FinishReason, Usage};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    struct MockProvider {
        name: &'static str,
        call_count: Arc<AtomicUsize>,
        failures_before_success: usize,
    }

    impl MockProvider {
        fn named(name: &'static str) -> Self {
            Self {
                name,
                call_count: Arc::new(AtomicUsize::new(0)),
                failures_before_success: 0,
            }
        }
    }

    #[async_trait]
    impl ProviderAdapter for MockProvider {
        async fn complete(&self, request: &Request) -> Result<Response, CarouselError> {
            let n = self.call_count.fetch_add(1, Ordering::SeqCst);
            if n < self.failures_before_success {
                return Err(CarouselError::ProviderError {
                    provider: self.name.into(),
                    status: 529,
                    message: "overloaded".into(),
                    retryable: true,
                });
            }
            Ok(Response {
                id: format!("{}-resp", self.name),
                text: "Hello from mock".into(),
                usage: Usage::new(10, 20),
                model: request.model.clone(),
                finish_reason: FinishReason::EndTurn,
            })
        }

        fn name(&self) -> &str {
            self.name
        }
    }

    fn make_request(model: &str, provider: Option<&str>) -> Request {
        let mut req = Request::instructed(model, "system", "hello");
        req.provider = provider.map(String::from);
        req
    }

    #[tokio::test]
    async fn register_provider_and_complete() {
        let mut client = LlmClient::new();
        client.register_provider(MockProvider::named("mock"));

        let resp = client
            .complete(&make_request("mock-model", Some("mock")))
            .await
            .unwrap();
        assert_eq!(resp.id, "mock-resp");
        assert_eq!(resp.text, "Hello from mock");
    }

    #[tokio::test]
    async fn resolve_provider_by_model_family() {
        let mut client = LlmClient::new();
        client.register_provider(MockProvider::named("openai"));
        client.register_provider(MockProvider::named("anthropic"));

        let resp = client
            .complete(&make_request("claude-sonnet-4-5", None))
            .await
            .unwrap();
        assert_eq!(resp.id, "anthropic-resp");

        let resp = client
            .complete(&make_request("gpt-4o-mini", None))
            .await
            .unwrap();
        assert_eq!(resp.id, "openai-resp");
    }

    #[tokio::test]
    async fn retryable_provider_errors_are_retried_inside_client() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut client = LlmClient::new().with_retry(2, BackoffPolicy::None);
        client.register_provider(MockProvider {
            name: "mock",
            call_count: calls.clone(),
            failures_before_success: 2,
        });

        let resp = client
            .complete(&make_request("mock-model", Some("mock")))
            .await
            .unwrap();
        assert_eq!(resp.text, "Hello from mock");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn middleware_before_after_called_once_per_call() {
        struct RecordingMiddleware {
            seen: Arc<Mutex<Vec<String>>>,
        }

        impl Middleware for RecordingMiddleware {
            fn before(&self, request: &mut Request) {
                self.seen.lock().unwrap().push(format!("before:{}", request.model));
            }
            fn after(&self, _request: &Request, response: &mut Response) {
                self.seen.lock().unwrap().push(format!("after:{}", response.id));
            }
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut client = LlmClient::new().with_middleware(RecordingMiddleware { seen: seen.clone() });
        client.register_provider(MockProvider::named("mock"));

        client
            .complete(&make_request("mock-model", Some("mock")))
            .await
            .unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["before:mock-model".to_string(), "after:mock-resp".to_string()]
        );
    }

    #[tokio::test]
    async fn usage_tracking_middleware_accumulates() {
        let usage = UsageTrackingMiddleware::new();
        let mut client = LlmClient::new().with_middleware(usage.clone());
        client.register_provider(MockProvider::named("mock"));

        let req = make_request("mock-model", Some("mock"));
        client.complete(&req).await.unwrap();
        assert_eq!(usage.total_input_tokens(), 10);
        assert_eq!(usage.total_output_tokens(), 20);

        client.complete(&req).await.unwrap();
        assert_eq!(usage.total_input_tokens(), 20);
        assert_eq!(usage.total_output_tokens(), 40);
    }

    #[test]
    fn resolve_provider_unknown_returns_error() {
        let client = LlmClient::new();
        let result = client.resolve_provider(&make_request("some-model", Some("nonexistent")));
        assert!(result.is_err());
    }

    #[test]
    fn no_providers_returns_error() {
        let client = LlmClient::new();
        let result = client.resolve_provider(&make_request("some-model", None));
        assert!(result.err().unwrap().to_string().contains("No providers"));
    }

    #[test]
    fn model_catalog_provider_for_model() {
        let catalog = ModelCatalog::new();
        assert_eq!(catalog.provider_for_model("claude-haiku-4-5"), Some("anthropic"));
        assert_eq!(catalog.provider_for_model("claude-future-9"), Some("anthropic"));
        assert_eq!(catalog.provider_for_model("gpt-4o"), Some("openai"));
        assert_eq!(catalog.provider_for_model("unknown"), None);
        assert_eq!(catalog.lookup("gpt-4o").unwrap().max_output_tokens, 16_384);
    }

    #[test]
    fn output_budget_clamps_to_catalog_limit() {
        let catalog = ModelCatalog::new();
        assert_eq!(catalog.clamp_output_tokens("gpt-4o", 32_000), 16_384);
        assert_eq!(catalog.clamp_output_tokens("gpt-4o", 4096), 4096);
        assert_eq!(catalog.clamp_output_tokens("claude-sonnet-4-5", 16_384), 16_384);
        assert_eq!(catalog.clamp_output_tokens("local-model", 50_000), 50_000);
    }
}
