use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::ExtractError;

pub mod capabilities;
pub mod config;
pub mod context;
pub mod provider;

pub use capabilities::{
    Base64Codec, CapabilitySet, ConsoleLevel, ConsoleMessage, ConsoleSink, FetchCapability,
    FetchResponse, TokenGenerator,
};
pub use config::ModuleConfig;
pub use context::ExecutionContext;
pub use provider::{
    ExtractionProvider, FunctionName, ProviderCapabilities, ProviderFactory, ProviderInput,
};

const DEFAULT_MAX_CONTEXTS: usize = 8;
const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(600);

/// Owns every loaded module's [`ExecutionContext`]. One context per module;
/// loading a module again replaces its old context, a bounded context count
/// evicts the least-recently-active one, and an idle sweep drops contexts
/// untouched past the TTL.
pub struct ModuleHost {
    contexts: Mutex<HashMap<String, Arc<ExecutionContext>>>,
    max_contexts: usize,
    idle_ttl: Duration,
}

impl Default for ModuleHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleHost {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_CONTEXTS, DEFAULT_IDLE_TTL)
    }

    pub fn with_limits(max_contexts: usize, idle_ttl: Duration) -> Self {
        Self {
            contexts: Mutex::new(HashMap::new()),
            max_contexts: max_contexts.max(1),
            idle_ttl,
        }
    }

    /// Instantiate a provider and register its context. The old context for
    /// the same module id (if any) is destroyed first; a factory failure
    /// registers nothing.
    pub fn load(
        &self,
        module_id: &str,
        display_name: &str,
        factory: &dyn ProviderFactory,
        config: &ModuleConfig,
    ) -> Result<(), ExtractError> {
        let context = ExecutionContext::new(module_id, display_name, factory, config)?;
        let mut contexts = self.contexts.lock().unwrap();
        if contexts.remove(module_id).is_some() {
            debug!(module = module_id, "replacing existing execution context");
        }
        if contexts.len() >= self.max_contexts {
            // Room for the newcomer: drop whichever context has been quiet
            // the longest.
            if let Some(stalest) = contexts
                .iter()
                .max_by_key(|(_, c)| c.idle_for())
                .map(|(id, _)| id.clone())
            {
                warn!(module = %stalest, "context limit reached, evicting least recently active");
                contexts.remove(&stalest);
            }
        }
        info!(module = module_id, "loaded module");
        contexts.insert(module_id.to_string(), Arc::new(context));
        Ok(())
    }

    /// Destroy a module's context. Returns whether one existed.
    pub fn evict(&self, module_id: &str) -> bool {
        self.contexts.lock().unwrap().remove(module_id).is_some()
    }

    pub fn list_modules(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.contexts.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_loaded(&self, module_id: &str) -> bool {
        self.contexts.lock().unwrap().contains_key(module_id)
    }

    /// Whether a loaded module registered the given function. `false` for
    /// unknown modules.
    pub fn has_function(&self, module_id: &str, function: FunctionName) -> bool {
        self.contexts
            .lock()
            .unwrap()
            .get(module_id)
            .map(|c| c.has_function(function))
            .unwrap_or(false)
    }

    pub fn capabilities(&self, module_id: &str) -> Option<ProviderCapabilities> {
        self.contexts
            .lock()
            .unwrap()
            .get(module_id)
            .map(|c| c.capabilities())
    }

    pub fn console_messages(&self, module_id: &str) -> Vec<ConsoleMessage> {
        self.contexts
            .lock()
            .unwrap()
            .get(module_id)
            .map(|c| c.console_messages())
            .unwrap_or_default()
    }

    pub fn context(&self, module_id: &str) -> Result<Arc<ExecutionContext>, ExtractError> {
        self.contexts
            .lock()
            .unwrap()
            .get(module_id)
            .cloned()
            .ok_or_else(|| ExtractError::ContextMissing(module_id.to_string()))
    }

    /// Call one of a module's registered functions under its per-call
    /// timeout. Timeouts and failures are scoped to this call; other modules
    /// and later calls on the same module are unaffected.
    pub async fn call(
        &self,
        module_id: &str,
        function: FunctionName,
        input: ProviderInput,
        cancel: &CancellationToken,
    ) -> Result<Value, ExtractError> {
        let context = self.context(module_id)?;
        context.call(function, input, cancel).await
    }

    /// Evict contexts idle past the TTL. Returns how many were dropped.
    pub fn sweep_idle(&self) -> usize {
        let mut contexts = self.contexts.lock().unwrap();
        let before = contexts.len();
        contexts.retain(|id, c| {
            let keep = c.idle_for() < self.idle_ttl;
            if !keep {
                info!(module = %id, "evicting idle context");
            }
            keep
        });
        before - contexts.len()
    }

    /// Background task running [`ModuleHost::sweep_idle`] on an interval.
    pub fn spawn_idle_sweeper(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let host = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                host.sweep_idle();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoProvider {
        caps: ProviderCapabilities,
        delay: Duration,
    }

    #[async_trait]
    impl ExtractionProvider for EchoProvider {
        fn capabilities(&self) -> ProviderCapabilities {
            self.caps
        }

        async fn search_results(&self, input: ProviderInput) -> Result<Value, ExtractError> {
            tokio::time::sleep(self.delay).await;
            Ok(json!([{ "title": input.as_str(), "imageUrl": "x.jpg", "href": "/r" }]))
        }

        async fn extract_details(&self, _input: ProviderInput) -> Result<Value, ExtractError> {
            Ok(json!([{ "description": "d", "aliases": "", "airdate": "" }]))
        }
    }

    fn echo_factory(delay: Duration) -> impl ProviderFactory {
        move |_caps: CapabilitySet| {
            Ok(Box::new(EchoProvider {
                caps: ProviderCapabilities {
                    search_results: true,
                    extract_details: true,
                    ..Default::default()
                },
                delay,
            }) as Box<dyn ExtractionProvider>)
        }
    }

    fn fast_config() -> ModuleConfig {
        ModuleConfig {
            rate_limit_ms: Some(0),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn load_call_and_function_registry() {
        let host = ModuleHost::new();
        host.load("echo", "Echo", &echo_factory(Duration::ZERO), &fast_config())
            .unwrap();

        assert!(host.has_function("echo", FunctionName::SearchResults));
        assert!(!host.has_function("echo", FunctionName::ExtractStreamUrl));
        assert!(!host.has_function("missing", FunctionName::SearchResults));

        let cancel = CancellationToken::new();
        let value = host
            .call("echo", FunctionName::SearchResults, ProviderInput::Keyword("naruto".into()), &cancel)
            .await
            .unwrap();
        assert_eq!(value[0]["title"], "naruto");
    }

    #[tokio::test]
    async fn unknown_function_and_missing_context() {
        let host = ModuleHost::new();
        host.load("echo", "Echo", &echo_factory(Duration::ZERO), &fast_config())
            .unwrap();
        let cancel = CancellationToken::new();

        let err = host
            .call("echo", FunctionName::ExtractStreamUrl, ProviderInput::Url("u".into()), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::FunctionMissing(_)));

        host.evict("echo");
        let err = host
            .call("echo", FunctionName::SearchResults, ProviderInput::Keyword("q".into()), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::ContextMissing(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_isolated_per_call() {
        let host = ModuleHost::new();
        let config = ModuleConfig {
            call_timeout_ms: Some(50),
            rate_limit_ms: Some(0),
            ..Default::default()
        };
        host.load("slow", "Slow", &echo_factory(Duration::from_secs(3600)), &config)
            .unwrap();
        let cancel = CancellationToken::new();

        let err = host
            .call("slow", FunctionName::SearchResults, ProviderInput::Keyword("q".into()), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        // Other functions on the same module still work afterwards.
        let value = host
            .call("slow", FunctionName::ExtractDetails, ProviderInput::Url("u".into()), &cancel)
            .await
            .unwrap();
        assert!(value.is_array());
    }

    #[tokio::test]
    async fn cancellation_is_reported_distinctly() {
        let host = ModuleHost::new();
        host.load("slow", "Slow", &echo_factory(Duration::from_secs(60)), &fast_config())
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = host
            .call("slow", FunctionName::SearchResults, ProviderInput::Keyword("q".into()), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn reload_replaces_and_capacity_evicts() {
        let host = ModuleHost::with_limits(2, Duration::from_secs(600));
        let factory = echo_factory(Duration::ZERO);
        host.load("a", "A", &factory, &fast_config()).unwrap();
        let first = host.context("a").unwrap().id.clone();
        host.load("a", "A", &factory, &fast_config()).unwrap();
        assert_ne!(host.context("a").unwrap().id, first);
        assert_eq!(host.list_modules(), vec!["a".to_string()]);

        host.load("b", "B", &factory, &fast_config()).unwrap();
        // "a" is older than "b"; the third module pushes it out.
        host.context("b").unwrap().touch();
        host.load("c", "C", &factory, &fast_config()).unwrap();
        assert_eq!(host.list_modules().len(), 2);
        assert!(!host.is_loaded("a"));
        assert!(host.is_loaded("b"));
        assert!(host.is_loaded("c"));
    }

    #[tokio::test]
    async fn failed_factory_registers_nothing() {
        let host = ModuleHost::new();
        let broken = |_caps: CapabilitySet| -> Result<Box<dyn ExtractionProvider>, ExtractError> {
            Err(ExtractError::Malformed("bad script".into()))
        };
        let err = host.load("broken", "Broken", &broken, &fast_config()).unwrap_err();
        assert!(matches!(err, ExtractError::Load(_)));
        assert!(!host.is_loaded("broken"));
    }

    #[tokio::test]
    async fn idle_sweep_drops_stale_contexts() {
        let host = ModuleHost::with_limits(8, Duration::ZERO);
        host.load("a", "A", &echo_factory(Duration::ZERO), &fast_config())
            .unwrap();
        assert_eq!(host.sweep_idle(), 1);
        assert!(host.list_modules().is_empty());
    }
}
