use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::ExtractError;
use crate::modules::{
    Base64Codec, CapabilitySet, ExtractionProvider, ProviderCapabilities, ProviderFactory,
    ProviderInput,
};

/// CSS-selector rules driving a [`SelectorProvider`]. Each section is
/// optional; absent sections leave the matching function unregistered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectorRules {
    #[serde(default)]
    pub search: Option<SearchRules>,
    #[serde(default)]
    pub details: Option<DetailRules>,
    #[serde(default)]
    pub episodes: Option<EpisodeRules>,
    #[serde(default)]
    pub stream: Option<StreamRules>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRules {
    /// Selector for one result card.
    pub item: String,
    /// Selectors relative to the card.
    pub title: String,
    pub image: String,
    pub href: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailRules {
    pub description: String,
    #[serde(default)]
    pub aliases: Option<String>,
    #[serde(default)]
    pub airdate: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeRules {
    pub item: String,
    pub href: String,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRules {
    /// Selector for the element carrying the stream URL.
    pub source: String,
    /// Attribute to read; element text when absent.
    #[serde(default)]
    pub attr: Option<String>,
    /// Sites frequently stash the real URL base64-encoded in the attribute.
    #[serde(default)]
    pub base64: bool,
}

impl SelectorRules {
    pub fn from_toml(payload: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(payload)
    }
}

/// A compiled-in extraction provider driven entirely by CSS selectors: parse
/// the page, pull text and attributes, emit the loosely-typed values the
/// orchestrator expects from any module.
pub struct SelectorProvider {
    rules: SelectorRules,
    caps: CapabilitySet,
}

impl SelectorProvider {
    pub fn new(rules: SelectorRules, caps: CapabilitySet) -> Self {
        Self { rules, caps }
    }

    /// Factory registering this provider under a [`crate::modules::ModuleHost`].
    pub fn factory(rules: SelectorRules) -> impl ProviderFactory {
        move |caps: CapabilitySet| {
            Ok(Box::new(SelectorProvider::new(rules.clone(), caps)) as Box<dyn ExtractionProvider>)
        }
    }

    /// HTML is used as-is; a URL is fetched through the fetch capability.
    async fn page(&self, input: ProviderInput) -> Result<String, ExtractError> {
        match input {
            ProviderInput::Html(html) => Ok(html),
            ProviderInput::Url(url) => self.caps.fetch.fetch(&url, None).await,
            ProviderInput::Keyword(k) => Err(ExtractError::Malformed(format!(
                "selector provider needs a page or URL, got keyword '{k}'"
            ))),
        }
    }
}

#[async_trait]
impl ExtractionProvider for SelectorProvider {
    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            search_results: self.rules.search.is_some(),
            extract_details: self.rules.details.is_some(),
            extract_episodes: self.rules.episodes.is_some(),
            extract_stream_url: self.rules.stream.is_some(),
            ..Default::default()
        }
    }

    async fn search_results(&self, input: ProviderInput) -> Result<Value, ExtractError> {
        let rules = self
            .rules
            .search
            .clone()
            .ok_or_else(|| ExtractError::FunctionMissing("searchResults".into()))?;
        let html = self.page(input).await?;
        let items = scrape_search(&html, &rules)?;
        self.caps
            .console
            .log(format!("search matched {} items", items.len()));
        Ok(Value::Array(items))
    }

    async fn extract_details(&self, input: ProviderInput) -> Result<Value, ExtractError> {
        let rules = self
            .rules
            .details
            .clone()
            .ok_or_else(|| ExtractError::FunctionMissing("extractDetails".into()))?;
        let html = self.page(input).await?;
        scrape_details(&html, &rules)
    }

    async fn extract_episodes(&self, input: ProviderInput) -> Result<Value, ExtractError> {
        let rules = self
            .rules
            .episodes
            .clone()
            .ok_or_else(|| ExtractError::FunctionMissing("extractEpisodes".into()))?;
        let html = self.page(input).await?;
        let items = scrape_episodes(&html, &rules)?;
        self.caps
            .console
            .log(format!("episode list matched {} entries", items.len()));
        Ok(Value::Array(items))
    }

    async fn extract_stream_url(&self, input: ProviderInput) -> Result<Value, ExtractError> {
        let rules = self
            .rules
            .stream
            .clone()
            .ok_or_else(|| ExtractError::FunctionMissing("extractStreamUrl".into()))?;
        let html = self.page(input).await?;
        scrape_streams(&html, &rules, &self.caps.codec)
    }
}

fn compile(selector: &str) -> Result<Selector, ExtractError> {
    Selector::parse(selector)
        .map_err(|e| ExtractError::Malformed(format!("bad selector '{selector}': {e}")))
}

fn element_text(element: ElementRef<'_>) -> String {
    let text: String = element.text().collect();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn select_text(scope: ElementRef<'_>, selector: &Selector) -> String {
    scope.select(selector).next().map(element_text).unwrap_or_default()
}

fn select_attr(scope: ElementRef<'_>, selector: &Selector, attr: &str) -> String {
    scope
        .select(selector)
        .next()
        .and_then(|el| el.value().attr(attr))
        .unwrap_or_default()
        .to_string()
}

fn scrape_search(html: &str, rules: &SearchRules) -> Result<Vec<Value>, ExtractError> {
    let document = Html::parse_document(html);
    let item = compile(&rules.item)?;
    let title = compile(&rules.title)?;
    let image = compile(&rules.image)?;
    let href = compile(&rules.href)?;

    Ok(document
        .select(&item)
        .map(|card| {
            json!({
                "title": select_text(card, &title),
                "imageUrl": select_attr(card, &image, "src"),
                "href": select_attr(card, &href, "href"),
            })
        })
        .collect())
}

fn scrape_details(html: &str, rules: &DetailRules) -> Result<Value, ExtractError> {
    let document = Html::parse_document(html);
    let description = compile(&rules.description)?;
    let root = document.root_element();

    let aliases = match &rules.aliases {
        Some(sel) => select_text(root, &compile(sel)?),
        None => String::new(),
    };
    let airdate = match &rules.airdate {
        Some(sel) => select_text(root, &compile(sel)?),
        None => String::new(),
    };

    Ok(json!([{
        "description": select_text(root, &description),
        "aliases": aliases,
        "airdate": airdate,
    }]))
}

fn scrape_episodes(html: &str, rules: &EpisodeRules) -> Result<Vec<Value>, ExtractError> {
    let document = Html::parse_document(html);
    let item = compile(&rules.item)?;
    let href = compile(&rules.href)?;
    let number = rules.number.as_deref().map(compile).transpose()?;
    let title = rules.title.as_deref().map(compile).transpose()?;

    Ok(document
        .select(&item)
        .enumerate()
        .map(|(index, entry)| {
            let number = number
                .as_ref()
                .map(|sel| select_text(entry, sel))
                .and_then(|text| first_number(&text))
                .unwrap_or(index as u64 + 1);
            let title = title
                .as_ref()
                .map(|sel| select_text(entry, sel))
                .unwrap_or_default();
            json!({
                "number": number,
                "title": title,
                "href": select_attr(entry, &href, "href"),
            })
        })
        .collect())
}

fn scrape_streams(
    html: &str,
    rules: &StreamRules,
    codec: &Base64Codec,
) -> Result<Value, ExtractError> {
    let document = Html::parse_document(html);
    let source = compile(&rules.source)?;

    let mut urls: Vec<String> = Vec::new();
    for element in document.select(&source) {
        let raw = match &rules.attr {
            Some(attr) => element.value().attr(attr).unwrap_or_default().to_string(),
            None => element_text(element),
        };
        if raw.trim().is_empty() {
            continue;
        }
        let url = if rules.base64 {
            match codec.atob(&raw) {
                Ok(decoded) => decoded,
                // Skip values that only look encoded.
                Err(_) => continue,
            }
        } else {
            raw
        };
        urls.push(url.trim().to_string());
    }

    match urls.len() {
        0 => Ok(Value::Null),
        1 => Ok(Value::String(urls.remove(0))),
        _ => Ok(json!(urls)),
    }
}

fn first_number(text: &str) -> Option<u64> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::{
        ConsoleSink, FetchCapability, FunctionName, ModuleConfig, ModuleHost, TokenGenerator,
    };
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    const SEARCH_PAGE: &str = r#"
        <html><body>
          <article class="bs">
            <h2 class="title">First Show</h2>
            <img class="cover" src="https://cdn.example.org/1.jpg">
            <a class="link" href="/show/first">watch</a>
          </article>
          <article class="bs">
            <h2 class="title">Second Show</h2>
            <img class="cover" src="https://cdn.example.org/2.jpg">
            <a class="link" href="/show/second">watch</a>
          </article>
        </body></html>"#;

    fn search_rules() -> SelectorRules {
        SelectorRules {
            search: Some(SearchRules {
                item: "article.bs".into(),
                title: "h2.title".into(),
                image: "img.cover".into(),
                href: "a.link".into(),
            }),
            ..Default::default()
        }
    }

    fn caps() -> CapabilitySet {
        CapabilitySet {
            console: ConsoleSink::new("test", 16),
            fetch: FetchCapability::new(None).unwrap(),
            codec: Base64Codec,
            tokens: TokenGenerator,
        }
    }

    #[tokio::test]
    async fn scrapes_search_cards() {
        let provider = SelectorProvider::new(search_rules(), caps());
        let value = provider
            .search_results(ProviderInput::Html(SEARCH_PAGE.into()))
            .await
            .unwrap();
        assert_eq!(value.as_array().unwrap().len(), 2);
        assert_eq!(value[0]["title"], "First Show");
        assert_eq!(value[1]["href"], "/show/second");
    }

    #[tokio::test]
    async fn capabilities_follow_configured_rules() {
        let provider = SelectorProvider::new(search_rules(), caps());
        let capabilities = provider.capabilities();
        assert!(capabilities.search_results);
        assert!(!capabilities.extract_stream_url);

        let err = provider
            .extract_stream_url(ProviderInput::Html("<html></html>".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::FunctionMissing(_)));
    }

    #[tokio::test]
    async fn episodes_number_falls_back_to_index() {
        let rules = SelectorRules {
            episodes: Some(EpisodeRules {
                item: "li.ep".into(),
                href: "a".into(),
                number: Some("span.num".into()),
                title: Some("span.t".into()),
            }),
            ..Default::default()
        };
        let page = r#"
            <ul>
              <li class="ep"><span class="num">Episode 12</span><span class="t">Finale</span><a href="/ep/12"></a></li>
              <li class="ep"><span class="t">Unnumbered</span><a href="/ep/x"></a></li>
            </ul>"#;
        let provider = SelectorProvider::new(rules, caps());
        let value = provider
            .extract_episodes(ProviderInput::Html(page.into()))
            .await
            .unwrap();
        assert_eq!(value[0]["number"], 12);
        assert_eq!(value[0]["title"], "Finale");
        // No digits in the entry: positional fallback.
        assert_eq!(value[1]["number"], 2);
    }

    #[tokio::test]
    async fn stream_urls_decode_base64_attributes() {
        let encoded = Base64Codec.btoa("https://cdn.example.org/ep1.m3u8");
        let page = format!(r#"<div data-src="{encoded}" class="player"></div>"#);
        let rules = SelectorRules {
            stream: Some(StreamRules {
                source: "div.player".into(),
                attr: Some("data-src".into()),
                base64: true,
            }),
            ..Default::default()
        };
        let provider = SelectorProvider::new(rules, caps());
        let value = provider
            .extract_stream_url(ProviderInput::Html(page))
            .await
            .unwrap();
        assert_eq!(value, Value::String("https://cdn.example.org/ep1.m3u8".into()));
    }

    #[tokio::test]
    async fn registers_and_runs_under_a_host() {
        let host = Arc::new(ModuleHost::new());
        let config = ModuleConfig {
            rate_limit_ms: Some(0),
            ..Default::default()
        };
        host.load("sel", "Selector", &SelectorProvider::factory(search_rules()), &config)
            .unwrap();
        assert!(host.has_function("sel", FunctionName::SearchResults));
        let value = host
            .call(
                "sel",
                FunctionName::SearchResults,
                ProviderInput::Html(SEARCH_PAGE.into()),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(value.as_array().unwrap().len(), 2);
        // The provider logged through its console capability.
        assert_eq!(host.console_messages("sel").len(), 1);
    }

    #[test]
    fn rules_parse_from_toml() {
        let rules = SelectorRules::from_toml(
            r#"
            [search]
            item = "article.bs"
            title = "h2"
            image = "img"
            href = "a"

            [stream]
            source = "video source"
            attr = "src"
            "#,
        )
        .unwrap();
        assert!(rules.search.is_some());
        assert!(rules.stream.as_ref().map(|s| !s.base64).unwrap());
        assert!(rules.details.is_none());
    }
}
