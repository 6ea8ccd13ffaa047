use std::sync::Arc;

use futures::future;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::ExtractError;
use crate::metadata::ModuleMetadata;
use crate::models::{EpisodeLink, MediaItem, SearchItem, StreamResult};
use crate::modules::{FunctionName, ModuleHost, ProviderInput};
use crate::normalizer::normalize_stream_result;

/// Result of one extraction operation. Operations are total: exhausted
/// strategies yield `Empty` and caller-initiated aborts yield `Cancelled`;
/// neither is an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Complete(T),
    Empty,
    Cancelled,
}

impl<T> Outcome<T> {
    pub fn is_empty(&self) -> bool {
        matches!(self, Outcome::Empty)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Outcome::Complete(v) => Some(v),
            _ => None,
        }
    }
}

/// Details and episode list for one piece of content. Either side may be
/// empty when its extraction failed; the other is still reported.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetailsBundle {
    pub details: Vec<MediaItem>,
    pub episodes: Vec<EpisodeLink>,
}

/// One concrete technique for driving an extraction function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    /// Hand the module the semantic input; it fetches on its own.
    ModuleAsync,
    /// Fetch the target page here, hand the module its HTML.
    HtmlPrefetch,
    /// Prefetch even though the module is marked async; some modules fetch
    /// internally yet still accept HTML as a fallback input.
    ForcedPrefetch,
}

/// Runs the search / details+episodes / stream-url operations against loaded
/// modules. Each operation tries an ordered strategy list until one produces
/// a usable result; module failures are absorbed as strategy failures and
/// never propagate past the operation boundary.
pub struct Orchestrator {
    host: Arc<ModuleHost>,
    client: reqwest::Client,
}

impl Orchestrator {
    pub fn new(host: Arc<ModuleHost>) -> Result<Self, ExtractError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("scour/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { host, client })
    }

    pub fn host(&self) -> &Arc<ModuleHost> {
        &self.host
    }

    /// Search a module for a keyword.
    pub async fn search(
        &self,
        module_id: &str,
        meta: &ModuleMetadata,
        keyword: &str,
        cancel: &CancellationToken,
    ) -> Result<Outcome<Vec<SearchItem>>, ExtractError> {
        let target_url = meta.search_url(keyword);
        let strategies: &[Strategy] = if meta.async_js {
            &[Strategy::ModuleAsync, Strategy::HtmlPrefetch]
        } else {
            &[Strategy::HtmlPrefetch]
        };
        self.run_strategies(
            module_id,
            FunctionName::SearchResults,
            ProviderInput::Keyword(keyword.to_string()),
            &target_url,
            strategies,
            cancel,
            decode_search_items,
        )
        .await
    }

    /// Extract content details and the episode list concurrently. The two
    /// calls are independent reads of the same page; whichever succeeds is
    /// reported even when the sibling fails.
    pub async fn details_and_episodes(
        &self,
        module_id: &str,
        meta: &ModuleMetadata,
        content_url: &str,
        cancel: &CancellationToken,
    ) -> Result<Outcome<DetailsBundle>, ExtractError> {
        let strategies: &[Strategy] = if meta.async_js {
            &[Strategy::ModuleAsync, Strategy::HtmlPrefetch]
        } else {
            &[Strategy::HtmlPrefetch]
        };

        let details = self.run_strategies(
            module_id,
            FunctionName::ExtractDetails,
            ProviderInput::Url(content_url.to_string()),
            content_url,
            strategies,
            cancel,
            decode_media_items,
        );
        let episodes = self.run_strategies(
            module_id,
            FunctionName::ExtractEpisodes,
            ProviderInput::Url(content_url.to_string()),
            content_url,
            strategies,
            cancel,
            decode_episode_links,
        );
        let (details, episodes) = future::join(details, episodes).await;

        if cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }
        let details = details?.into_option().unwrap_or_default();
        let episodes = episodes?.into_option().unwrap_or_default();
        if details.is_empty() && episodes.is_empty() {
            return Ok(Outcome::Empty);
        }
        Ok(Outcome::Complete(DetailsBundle { details, episodes }))
    }

    /// Resolve playable stream URLs for an episode page.
    pub async fn stream_url(
        &self,
        module_id: &str,
        meta: &ModuleMetadata,
        episode_url: &str,
        cancel: &CancellationToken,
    ) -> Result<Outcome<StreamResult>, ExtractError> {
        let strategies: &[Strategy] = if meta.stream_async_js {
            &[Strategy::ModuleAsync, Strategy::ForcedPrefetch]
        } else {
            &[Strategy::HtmlPrefetch]
        };
        self.run_strategies(
            module_id,
            FunctionName::ExtractStreamUrl,
            ProviderInput::Url(episode_url.to_string()),
            episode_url,
            strategies,
            cancel,
            |raw| {
                let result = normalize_stream_result(raw);
                (!result.is_empty()).then_some(result)
            },
        )
        .await
    }

    /// Try each strategy in priority order until `decode` yields a value.
    /// Strategy-level failures (timeouts, network errors, missing functions,
    /// malformed output) are logged and skipped; only a missing execution
    /// context raises.
    async fn run_strategies<T>(
        &self,
        module_id: &str,
        function: FunctionName,
        semantic_input: ProviderInput,
        target_url: &str,
        strategies: &[Strategy],
        cancel: &CancellationToken,
        decode: impl Fn(&Value) -> Option<T>,
    ) -> Result<Outcome<T>, ExtractError> {
        for strategy in strategies {
            if cancel.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }

            let input = match strategy {
                Strategy::ModuleAsync => semantic_input.clone(),
                Strategy::HtmlPrefetch | Strategy::ForcedPrefetch => {
                    match self.fetch_html(target_url, cancel).await {
                        Ok(html) => ProviderInput::Html(html),
                        Err(ExtractError::Cancelled) => return Ok(Outcome::Cancelled),
                        Err(e) => {
                            warn!(module = module_id, %function, ?strategy, error = %e, "prefetch failed");
                            continue;
                        }
                    }
                }
            };

            match self.host.call(module_id, function, input, cancel).await {
                Ok(raw) => {
                    if let Some(value) = decode(&raw) {
                        debug!(module = module_id, %function, ?strategy, "strategy produced a result");
                        return Ok(Outcome::Complete(value));
                    }
                    debug!(module = module_id, %function, ?strategy, "strategy returned nothing usable");
                }
                Err(ExtractError::Cancelled) => return Ok(Outcome::Cancelled),
                Err(e @ ExtractError::ContextMissing(_)) => return Err(e),
                Err(e) => {
                    warn!(module = module_id, %function, ?strategy, error = %e, "strategy failed");
                }
            }
        }
        Ok(Outcome::Empty)
    }

    async fn fetch_html(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ExtractError> {
        let request = self.client.get(url).send();
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ExtractError::Cancelled),
            r = request => r?.error_for_status()?,
        };
        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(ExtractError::Cancelled),
            b = response.text() => b?,
        };
        Ok(body)
    }
}

/// Module output is either a JSON string or a native value. Strings are
/// parsed; anything that is not an array or object afterwards counts as "no
/// result".
pub(crate) fn decode_raw(raw: &Value) -> Option<Value> {
    match raw {
        Value::String(s) => serde_json::from_str::<Value>(s)
            .ok()
            .filter(|v| v.is_array() || v.is_object()),
        Value::Array(_) | Value::Object(_) => Some(raw.clone()),
        _ => None,
    }
}

fn as_items(raw: &Value) -> Option<Vec<Value>> {
    match decode_raw(raw)? {
        Value::Array(items) => Some(items),
        // A single object is accepted as a one-element listing.
        v @ Value::Object(_) => Some(vec![v]),
        _ => None,
    }
}

/// Per-item validation is best-effort: bad records are logged and dropped,
/// the survivors are kept.
fn collect_valid<T, E: std::fmt::Display>(
    items: Vec<Value>,
    what: &str,
    parse: impl Fn(Value) -> Result<T, E>,
) -> Option<Vec<T>> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match parse(item) {
            Ok(v) => out.push(v),
            Err(e) => warn!(error = %e, "dropping malformed {what} record"),
        }
    }
    (!out.is_empty()).then_some(out)
}

fn decode_search_items(raw: &Value) -> Option<Vec<SearchItem>> {
    collect_valid(as_items(raw)?, "search", |item| {
        serde_json::from_value::<SearchItem>(item)
    })
}

fn decode_media_items(raw: &Value) -> Option<Vec<MediaItem>> {
    collect_valid(as_items(raw)?, "details", |item| {
        serde_json::from_value::<MediaItem>(item)
    })
}

fn decode_episode_links(raw: &Value) -> Option<Vec<EpisodeLink>> {
    collect_valid(as_items(raw)?, "episode", |item| {
        serde_json::from_value::<EpisodeLink>(item)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::{
        CapabilitySet, ExtractionProvider, ModuleConfig, ProviderCapabilities, ProviderFactory,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn metadata(async_js: bool, stream_async_js: bool) -> ModuleMetadata {
        ModuleMetadata::from_json(&format!(
            r#"{{
                "sourceName": "Test",
                "version": "1.0.0",
                "language": "en",
                "author": "t",
                "baseUrl": "http://127.0.0.1:9",
                "scriptUrl": "http://127.0.0.1:9/m.js",
                "asyncJS": {async_js},
                "streamAsyncJS": {stream_async_js}
            }}"#
        ))
        .unwrap()
    }

    /// Provider with canned values per function, counting calls.
    struct CannedProvider {
        caps: ProviderCapabilities,
        search: Value,
        details: Value,
        episodes: Result<Value, ()>,
        stream: Vec<Value>,
        stream_calls: AtomicUsize,
    }

    impl Default for CannedProvider {
        fn default() -> Self {
            Self {
                caps: ProviderCapabilities {
                    search_results: true,
                    extract_details: true,
                    extract_episodes: true,
                    extract_stream_url: true,
                    ..Default::default()
                },
                search: Value::Null,
                details: Value::Null,
                episodes: Ok(Value::Null),
                stream: vec![Value::Null],
                stream_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ExtractionProvider for CannedProvider {
        fn capabilities(&self) -> ProviderCapabilities {
            self.caps
        }

        async fn search_results(&self, _input: ProviderInput) -> Result<Value, ExtractError> {
            Ok(self.search.clone())
        }

        async fn extract_details(&self, _input: ProviderInput) -> Result<Value, ExtractError> {
            Ok(self.details.clone())
        }

        async fn extract_episodes(&self, _input: ProviderInput) -> Result<Value, ExtractError> {
            self.episodes
                .clone()
                .map_err(|_| ExtractError::Malformed("boom".into()))
        }

        async fn extract_stream_url(&self, _input: ProviderInput) -> Result<Value, ExtractError> {
            let i = self.stream_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.stream[i.min(self.stream.len() - 1)].clone())
        }
    }

    fn canned_factory(provider: fn() -> CannedProvider) -> impl ProviderFactory {
        move |_caps: CapabilitySet| Ok(Box::new(provider()) as Box<dyn ExtractionProvider>)
    }

    fn orchestrator_with(provider: fn() -> CannedProvider) -> Orchestrator {
        let host = Arc::new(ModuleHost::new());
        let config = ModuleConfig {
            rate_limit_ms: Some(0),
            ..Default::default()
        };
        host.load("test", "Test", &canned_factory(provider), &config)
            .unwrap();
        Orchestrator::new(host).unwrap()
    }

    #[tokio::test]
    async fn async_search_decodes_and_drops_invalid_items() {
        let orchestrator = orchestrator_with(|| CannedProvider {
            search: json!([
                { "title": "Good", "imageUrl": "a.jpg", "href": "/watch/1" },
                { "title": "", "imageUrl": "b.jpg", "href": "/watch/2" },
                { "title": "Bad href", "imageUrl": "c.jpg", "href": "nonsense" },
            ]),
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let outcome = orchestrator
            .search("test", &metadata(true, false), "good", &cancel)
            .await
            .unwrap();
        let items = outcome.into_option().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Good");
    }

    #[tokio::test]
    async fn search_accepts_json_string_payload() {
        let orchestrator = orchestrator_with(|| CannedProvider {
            search: json!(
                "[{\"title\": \"Str\", \"imageUrl\": \"s.jpg\", \"href\": \"/watch/s\"}]"
            ),
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let outcome = orchestrator
            .search("test", &metadata(true, false), "str", &cancel)
            .await
            .unwrap();
        assert_eq!(outcome.into_option().unwrap()[0].title, "Str");
    }

    #[tokio::test]
    async fn all_invalid_items_means_empty_outcome() {
        let orchestrator = orchestrator_with(|| CannedProvider {
            search: json!([{ "title": "", "imageUrl": "", "href": "" }]),
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let outcome = orchestrator
            .search("test", &metadata(true, false), "q", &cancel)
            .await
            .unwrap();
        assert!(outcome.is_empty());
    }

    #[tokio::test]
    async fn details_survive_failing_episodes() {
        let orchestrator = orchestrator_with(|| CannedProvider {
            details: json!([{ "description": "A show", "aliases": "x", "airdate": "2020-01-02" }]),
            episodes: Err(()),
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let outcome = orchestrator
            .details_and_episodes("test", &metadata(true, false), "http://127.0.0.1:9/show", &cancel)
            .await
            .unwrap();
        let bundle = outcome.into_option().unwrap();
        assert_eq!(bundle.details.len(), 1);
        assert_eq!(bundle.details[0].description, "A show");
        assert!(bundle.episodes.is_empty());
    }

    #[tokio::test]
    async fn malformed_episode_batch_is_idempotent() {
        let orchestrator = orchestrator_with(|| CannedProvider {
            episodes: Ok(json!([
                { "number": 1, "title": "ok", "href": "/ep/1" },
                { "number": "x", "title": "bad number", "href": "/ep/2" },
                { "number": 3, "title": "no href" },
            ])),
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let meta = metadata(true, false);
        let first = orchestrator
            .details_and_episodes("test", &meta, "http://127.0.0.1:9/show", &cancel)
            .await
            .unwrap()
            .into_option()
            .unwrap();
        let second = orchestrator
            .details_and_episodes("test", &meta, "http://127.0.0.1:9/show", &cancel)
            .await
            .unwrap()
            .into_option()
            .unwrap();
        assert_eq!(first.episodes.len(), 1);
        assert_eq!(first.episodes[0].number, 1);
        assert_eq!(first.episodes, second.episodes);
    }

    #[tokio::test]
    async fn stream_result_normalizes_bare_string() {
        let orchestrator = orchestrator_with(|| CannedProvider {
            stream: vec![json!("http://x/a.mp4")],
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let outcome = orchestrator
            .stream_url("test", &metadata(false, true), "http://127.0.0.1:9/ep/1", &cancel)
            .await
            .unwrap();
        let result = outcome.into_option().unwrap();
        assert_eq!(result.streams, Some(vec!["http://x/a.mp4".to_string()]));
        assert!(result.sources.is_none());
    }

    #[tokio::test]
    async fn pre_cancelled_operation_reports_cancelled() {
        let orchestrator = orchestrator_with(CannedProvider::default);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = orchestrator
            .search("test", &metadata(true, false), "q", &cancel)
            .await
            .unwrap();
        assert!(outcome.is_cancelled());
    }

    #[tokio::test]
    async fn missing_context_raises() {
        let host = Arc::new(ModuleHost::new());
        let orchestrator = Orchestrator::new(host).unwrap();
        let cancel = CancellationToken::new();
        let err = orchestrator
            .search("ghost", &metadata(true, false), "q", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::ContextMissing(_)));
    }

    #[test]
    fn raw_decode_rules() {
        assert!(decode_raw(&json!(42)).is_none());
        assert!(decode_raw(&json!("not json")).is_none());
        assert!(decode_raw(&json!("[1, 2]")).unwrap().is_array());
        assert_eq!(decode_raw(&json!([1])), Some(json!([1])));
    }
}
