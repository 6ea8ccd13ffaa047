use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::ExtractError;
use crate::modules::capabilities::CapabilitySet;

/// The named extraction entry points a provider may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionName {
    SearchResults,
    ExtractDetails,
    ExtractEpisodes,
    ExtractStreamUrl,
    ExtractChapters,
    ExtractText,
}

impl FunctionName {
    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionName::SearchResults => "searchResults",
            FunctionName::ExtractDetails => "extractDetails",
            FunctionName::ExtractEpisodes => "extractEpisodes",
            FunctionName::ExtractStreamUrl => "extractStreamUrl",
            FunctionName::ExtractChapters => "extractChapters",
            FunctionName::ExtractText => "extractText",
        }
    }
}

impl fmt::Display for FunctionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which entry points a provider implements. Declared up front instead of
/// probed dynamically; absent functions are simply not registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderCapabilities {
    pub search_results: bool,
    pub extract_details: bool,
    pub extract_episodes: bool,
    pub extract_stream_url: bool,
    pub extract_chapters: bool,
    pub extract_text: bool,
}

impl ProviderCapabilities {
    pub fn supports(&self, function: FunctionName) -> bool {
        match function {
            FunctionName::SearchResults => self.search_results,
            FunctionName::ExtractDetails => self.extract_details,
            FunctionName::ExtractEpisodes => self.extract_episodes,
            FunctionName::ExtractStreamUrl => self.extract_stream_url,
            FunctionName::ExtractChapters => self.extract_chapters,
            FunctionName::ExtractText => self.extract_text,
        }
    }
}

/// Input handed to an extraction call: prefetched page HTML in normal mode,
/// or the semantic value (search keyword / content URL) when the provider
/// does its own fetching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderInput {
    Html(String),
    Keyword(String),
    Url(String),
}

impl ProviderInput {
    pub fn as_str(&self) -> &str {
        match self {
            ProviderInput::Html(s) | ProviderInput::Keyword(s) | ProviderInput::Url(s) => s,
        }
    }

    pub fn is_html(&self) -> bool {
        matches!(self, ProviderInput::Html(_))
    }
}

/// A source module's executable surface.
///
/// Implementations receive their [`CapabilitySet`] at construction and return
/// loosely-typed values: native JSON arrays/objects, or a `Value::String`
/// that itself holds JSON text. The orchestrator owns decoding; providers
/// never construct result models directly.
#[async_trait]
pub trait ExtractionProvider: Send + Sync {
    fn capabilities(&self) -> ProviderCapabilities;

    async fn search_results(&self, input: ProviderInput) -> Result<Value, ExtractError> {
        let _ = input;
        Err(ExtractError::FunctionMissing(FunctionName::SearchResults.to_string()))
    }

    async fn extract_details(&self, input: ProviderInput) -> Result<Value, ExtractError> {
        let _ = input;
        Err(ExtractError::FunctionMissing(FunctionName::ExtractDetails.to_string()))
    }

    async fn extract_episodes(&self, input: ProviderInput) -> Result<Value, ExtractError> {
        let _ = input;
        Err(ExtractError::FunctionMissing(FunctionName::ExtractEpisodes.to_string()))
    }

    async fn extract_stream_url(&self, input: ProviderInput) -> Result<Value, ExtractError> {
        let _ = input;
        Err(ExtractError::FunctionMissing(FunctionName::ExtractStreamUrl.to_string()))
    }

    async fn extract_chapters(&self, input: ProviderInput) -> Result<Value, ExtractError> {
        let _ = input;
        Err(ExtractError::FunctionMissing(FunctionName::ExtractChapters.to_string()))
    }

    async fn extract_text(&self, input: ProviderInput) -> Result<Value, ExtractError> {
        let _ = input;
        Err(ExtractError::FunctionMissing(FunctionName::ExtractText.to_string()))
    }
}

/// Builds a provider instance around the capability handles of one execution
/// context. A factory failure means the module cannot be loaded; no context
/// is registered.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, caps: CapabilitySet) -> Result<Box<dyn ExtractionProvider>, ExtractError>;
}

impl<F> ProviderFactory for F
where
    F: Fn(CapabilitySet) -> Result<Box<dyn ExtractionProvider>, ExtractError> + Send + Sync,
{
    fn create(&self, caps: CapabilitySet) -> Result<Box<dyn ExtractionProvider>, ExtractError> {
        self(caps)
    }
}
