use serde::{Deserialize, Serialize};

/// Descriptor that identifies a source module. Consumed as JSON with camelCase
/// keys; immutable once loaded and passed by reference into every operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleMetadata {
    pub source_name: String,
    pub version: String,
    pub language: String,
    pub author: String,
    pub base_url: String,
    pub script_url: String,
    /// Search URL template; a `%s` placeholder is replaced with the
    /// URL-encoded query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_base_url: Option<String>,
    /// Module performs its own network I/O for search/details/episodes and
    /// expects a keyword or URL instead of prefetched HTML.
    #[serde(rename = "asyncJS", default)]
    pub async_js: bool,
    /// Same as `async_js` but for stream-URL extraction only.
    #[serde(rename = "streamAsyncJS", default)]
    pub stream_async_js: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_type: Option<String>,
}

impl ModuleMetadata {
    pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    /// Build the search page URL for a query. Falls back to a `?s=` query on
    /// the base URL when no template is configured.
    pub fn search_url(&self, query: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
        match &self.search_base_url {
            Some(template) if template.contains("%s") => template.replace("%s", &encoded),
            Some(template) => format!("{}{}", template, encoded),
            None => format!("{}/?s={}", self.base_url.trim_end_matches('/'), encoded),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "sourceName": "Example",
        "version": "1.2.0",
        "language": "en",
        "author": "someone",
        "baseUrl": "https://example.org",
        "scriptUrl": "https://example.org/module.js",
        "searchBaseUrl": "https://example.org/search?q=%s",
        "asyncJS": true,
        "quality": "1080p"
    }"#;

    #[test]
    fn parses_camel_case_descriptor() {
        let meta = ModuleMetadata::from_json(SAMPLE).unwrap();
        assert_eq!(meta.source_name, "Example");
        assert_eq!(meta.base_url, "https://example.org");
        assert!(meta.async_js);
        assert!(!meta.stream_async_js);
        assert_eq!(meta.quality.as_deref(), Some("1080p"));
        assert!(meta.stream_type.is_none());
    }

    #[test]
    fn search_url_replaces_placeholder_with_encoded_query() {
        let meta = ModuleMetadata::from_json(SAMPLE).unwrap();
        assert_eq!(
            meta.search_url("one piece"),
            "https://example.org/search?q=one+piece"
        );
    }

    #[test]
    fn search_url_falls_back_to_base_url() {
        let mut meta = ModuleMetadata::from_json(SAMPLE).unwrap();
        meta.search_base_url = None;
        assert_eq!(meta.search_url("naruto"), "https://example.org/?s=naruto");
    }
}
