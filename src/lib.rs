pub mod cache;
pub mod errors;
pub mod metadata;
pub mod models;
pub mod modules;
pub mod normalizer;
pub mod orchestrator;
pub mod providers;
pub mod quality;
pub mod subtitles;

// --- Library API for embedding ---

/// Convenience re-exports for embedders.
pub mod prelude {
    pub use crate::errors::ExtractError;
    pub use crate::metadata::ModuleMetadata;
    pub use crate::models::{
        EpisodeLink, MediaItem, SearchItem, StreamResult, StreamSource, SubtitleCue,
    };
    pub use crate::modules::{
        CapabilitySet, ExtractionProvider, FunctionName, ModuleConfig, ProviderCapabilities,
        ProviderFactory, ProviderInput,
    };
    pub use crate::orchestrator::{DetailsBundle, Outcome};
    pub use crate::quality::{NetworkConditions, QualityPolicy, QualitySelector};
    pub use crate::subtitles::SubtitleTrack;
}

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::{MemoryCache, Storage};
use crate::errors::ExtractError;
use crate::metadata::ModuleMetadata;
use crate::models::{SearchItem, StreamResult};
use crate::modules::{
    ConsoleMessage, FunctionName, ModuleConfig, ModuleHost, ProviderCapabilities, ProviderFactory,
};
use crate::orchestrator::{DetailsBundle, Orchestrator, Outcome};
use crate::subtitles::SubtitleTrack;

/// Async library entry point. Owns the module host, the orchestrator and a
/// TTL result cache.
pub struct Scour {
    host: Arc<ModuleHost>,
    orchestrator: Orchestrator,
    cache: MemoryCache,
    // Caching TTLs (seconds)
    search_ttl_secs: i64,
    stream_ttl_secs: i64,
}

impl Scour {
    pub fn new() -> Result<Self> {
        Self::with_limits(8, Duration::from_secs(600))
    }

    /// `max_contexts` bounds loaded modules; `idle_ttl` controls the idle
    /// eviction sweep.
    pub fn with_limits(max_contexts: usize, idle_ttl: Duration) -> Result<Self> {
        let host = Arc::new(ModuleHost::with_limits(max_contexts, idle_ttl));
        let orchestrator = Orchestrator::new(Arc::clone(&host))?;
        // TTLs via env with defaults
        let search_ttl_secs = std::env::var("SCOUR_SEARCH_TTL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(60 * 60);
        let stream_ttl_secs = std::env::var("SCOUR_STREAM_TTL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5 * 60);
        Ok(Self {
            host,
            orchestrator,
            cache: MemoryCache::new(),
            search_ttl_secs,
            stream_ttl_secs,
        })
    }

    // --- Module management ---

    /// Register a module under `module_id`, replacing any previous context.
    pub fn load_module(
        &self,
        module_id: &str,
        display_name: &str,
        factory: &dyn ProviderFactory,
        config: &ModuleConfig,
    ) -> Result<(), ExtractError> {
        self.host.load(module_id, display_name, factory, config)
    }

    pub fn evict_module(&self, module_id: &str) -> bool {
        self.host.evict(module_id)
    }

    pub fn list_modules(&self) -> Vec<String> {
        self.host.list_modules()
    }

    pub fn has_function(&self, module_id: &str, function: FunctionName) -> bool {
        self.host.has_function(module_id, function)
    }

    pub fn capabilities(&self, module_id: &str) -> Option<ProviderCapabilities> {
        self.host.capabilities(module_id)
    }

    /// Buffered console output of a module's provider.
    pub fn console_messages(&self, module_id: &str) -> Vec<ConsoleMessage> {
        self.host.console_messages(module_id)
    }

    /// Evict contexts idle past the TTL; returns how many were dropped.
    pub fn sweep_idle(&self) -> usize {
        self.host.sweep_idle()
    }

    /// Background idle sweeper running until the handle is aborted.
    pub fn spawn_idle_sweeper(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        self.host.spawn_idle_sweeper(every)
    }

    // --- Operations ---

    /// Search with per-module caching keyed by the normalized query.
    pub async fn search(
        &self,
        module_id: &str,
        meta: &ModuleMetadata,
        query: &str,
        refresh: bool,
        cancel: &CancellationToken,
    ) -> Result<Outcome<Vec<SearchItem>>, ExtractError> {
        let key = format!("{}|search|{}", module_id, norm_query(query));
        let now = current_epoch();

        if !refresh {
            if let Some(payload) = self.cache.get_cache(&key, now).await.ok().flatten() {
                if let Ok(items) = serde_json::from_str::<Vec<SearchItem>>(&payload) {
                    debug!(module = module_id, "search cache hit");
                    return Ok(if items.is_empty() {
                        Outcome::Empty
                    } else {
                        Outcome::Complete(items)
                    });
                }
            }
        }

        let outcome = self
            .orchestrator
            .search(module_id, meta, query, cancel)
            .await?;
        match &outcome {
            Outcome::Complete(items) => {
                let payload = serde_json::to_string(items)?;
                let _ = self
                    .cache
                    .put_cache(&key, &payload, now + self.search_ttl_secs)
                    .await;
            }
            Outcome::Empty => {
                let _ = self
                    .cache
                    .put_cache(&key, "[]", now + self.search_ttl_secs)
                    .await;
            }
            Outcome::Cancelled => {}
        }
        Ok(outcome)
    }

    /// Details and episode list for a content URL. Uncached; both extractions
    /// run concurrently and partial results are kept.
    pub async fn details_and_episodes(
        &self,
        module_id: &str,
        meta: &ModuleMetadata,
        content_url: &str,
        cancel: &CancellationToken,
    ) -> Result<Outcome<DetailsBundle>, ExtractError> {
        self.orchestrator
            .details_and_episodes(module_id, meta, content_url, cancel)
            .await
    }

    /// Stream extraction with a short-TTL cache keyed by the episode URL.
    pub async fn stream_url(
        &self,
        module_id: &str,
        meta: &ModuleMetadata,
        episode_url: &str,
        refresh: bool,
        cancel: &CancellationToken,
    ) -> Result<Outcome<StreamResult>, ExtractError> {
        let key = format!("{}|stream|{}", module_id, episode_url);
        let now = current_epoch();

        if !refresh {
            if let Some(payload) = self.cache.get_cache(&key, now).await.ok().flatten() {
                if let Ok(result) = serde_json::from_str::<StreamResult>(&payload) {
                    debug!(module = module_id, "stream cache hit");
                    return Ok(if result.is_empty() {
                        Outcome::Empty
                    } else {
                        Outcome::Complete(result)
                    });
                }
            }
        }

        let outcome = self
            .orchestrator
            .stream_url(module_id, meta, episode_url, cancel)
            .await?;
        if let Outcome::Complete(result) = &outcome {
            let payload = serde_json::to_string(result)?;
            let _ = self
                .cache
                .put_cache(&key, &payload, now + self.stream_ttl_secs)
                .await;
        }
        Ok(outcome)
    }

    /// Parse a subtitle file (WebVTT or SRT) with the default sync offset.
    pub fn parse_subtitles(&self, content: &str, file_name: Option<&str>) -> SubtitleTrack {
        SubtitleTrack::parse(content, file_name)
    }

    // --- Cache administration ---

    /// Clear cache entries by key prefix (`"<module_id>|"` scopes to one
    /// module). Returns the number of rows removed.
    pub fn clear_cache_prefix(&self, prefix: Option<&str>) -> u64 {
        self.cache.clear_prefix(prefix)
    }

    pub fn cache_entries(&self) -> usize {
        self.cache.len()
    }
}

// --- helpers ---

fn norm_query(q: &str) -> String {
    let trimmed = q.trim().to_ascii_lowercase();
    let mut out = String::with_capacity(trimmed.len());
    let mut last_space = false;
    for ch in trimmed.chars() {
        if ch.is_whitespace() {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else {
            out.push(ch);
            last_space = false;
        }
    }
    out
}

fn current_epoch() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
