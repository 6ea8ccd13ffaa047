use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::errors::ExtractError;
use crate::modules::capabilities::{
    Base64Codec, CapabilitySet, ConsoleMessage, ConsoleSink, FetchCapability, TokenGenerator,
};
use crate::modules::config::ModuleConfig;
use crate::modules::provider::{
    ExtractionProvider, FunctionName, ProviderCapabilities, ProviderFactory, ProviderInput,
};

const CONSOLE_CAPACITY: usize = 256;

/// One loaded module's execution state: the provider instance, its capability
/// handles, the console ring buffer and activity bookkeeping. Contexts are
/// never shared between modules.
pub struct ExecutionContext {
    pub id: String,
    pub module_id: String,
    pub display_name: String,
    provider: Box<dyn ExtractionProvider>,
    caps: ProviderCapabilities,
    console: ConsoleSink,
    fetch: FetchCapability,
    call_timeout: Duration,
    rate_limit: Duration,
    last_call: Mutex<Option<Instant>>,
    last_activity: Mutex<Instant>,
}

impl ExecutionContext {
    pub(crate) fn new(
        module_id: &str,
        display_name: &str,
        factory: &dyn ProviderFactory,
        config: &ModuleConfig,
    ) -> Result<Self, ExtractError> {
        let console = ConsoleSink::new(module_id, CONSOLE_CAPACITY);
        let fetch = FetchCapability::new(config.allowed_hosts.clone())?;
        let capability_set = CapabilitySet {
            console: console.clone(),
            fetch: fetch.clone(),
            codec: Base64Codec,
            tokens: TokenGenerator,
        };
        let provider = factory
            .create(capability_set)
            .map_err(|e| ExtractError::Load(e.to_string()))?;
        let caps = provider.capabilities();

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            module_id: module_id.to_string(),
            display_name: display_name.to_string(),
            provider,
            caps,
            console,
            fetch,
            call_timeout: Duration::from_millis(config.call_timeout_ms()),
            rate_limit: Duration::from_millis(config.rate_limit_ms()),
            last_call: Mutex::new(None),
            last_activity: Mutex::new(Instant::now()),
        })
    }

    pub fn capabilities(&self) -> ProviderCapabilities {
        self.caps
    }

    pub fn has_function(&self, function: FunctionName) -> bool {
        self.caps.supports(function)
    }

    pub fn console_messages(&self) -> Vec<ConsoleMessage> {
        self.console.messages()
    }

    pub fn drain_console(&self) -> Vec<ConsoleMessage> {
        self.console.drain()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().unwrap().elapsed()
    }

    pub(crate) fn touch(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    /// Space calls out by the configured rate limit.
    async fn throttle(&self) {
        let wait = {
            let mut last = self.last_call.lock().unwrap();
            let now = Instant::now();
            let wait = match *last {
                Some(prev) => self.rate_limit.saturating_sub(now.duration_since(prev)),
                None => Duration::ZERO,
            };
            *last = Some(now + wait);
            wait
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    /// Invoke one registered function, racing it against the per-call timeout
    /// and the caller's cancellation token. A losing invocation is dropped
    /// and its in-flight fetches aborted; the context stays usable for
    /// subsequent calls.
    pub(crate) async fn call(
        &self,
        function: FunctionName,
        input: ProviderInput,
        cancel: &CancellationToken,
    ) -> Result<Value, ExtractError> {
        if !self.caps.supports(function) {
            return Err(ExtractError::FunctionMissing(function.to_string()));
        }
        self.throttle().await;
        self.touch();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.fetch.abort_inflight();
                Err(ExtractError::Cancelled)
            }
            outcome = tokio::time::timeout(self.call_timeout, self.dispatch(function, input)) => {
                match outcome {
                    Ok(inner) => inner,
                    Err(_) => {
                        warn!(module = %self.module_id, %function, timeout = ?self.call_timeout, "module call timed out");
                        self.fetch.abort_inflight();
                        Err(ExtractError::Timeout(self.call_timeout))
                    }
                }
            }
        };
        self.touch();
        result
    }

    async fn dispatch(
        &self,
        function: FunctionName,
        input: ProviderInput,
    ) -> Result<Value, ExtractError> {
        match function {
            FunctionName::SearchResults => self.provider.search_results(input).await,
            FunctionName::ExtractDetails => self.provider.extract_details(input).await,
            FunctionName::ExtractEpisodes => self.provider.extract_episodes(input).await,
            FunctionName::ExtractStreamUrl => self.provider.extract_stream_url(input).await,
            FunctionName::ExtractChapters => self.provider.extract_chapters(input).await,
            FunctionName::ExtractText => self.provider.extract_text(input).await,
        }
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        // Eviction aborts whatever the provider still has on the wire.
        self.fetch.abort_inflight();
    }
}
