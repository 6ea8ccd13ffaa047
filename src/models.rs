use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Validation failure while constructing a result model.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("href is neither an absolute URL nor a relative path: {0}")]
    BadHref(String),
    #[error("episode number must be a non-negative integer, got {0}")]
    BadEpisodeNumber(String),
}

/// Accept absolute URLs and anything that is recognizably a path fragment.
fn href_like(href: &str) -> bool {
    if Url::parse(href).is_ok() {
        return true;
    }
    href.contains('/') || href.contains('?') || href.contains('#')
}

fn non_empty(field: &'static str, value: String) -> Result<String, ModelError> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        return Err(ModelError::Empty(field));
    }
    Ok(trimmed)
}

// --- Search ---

/// One entry of a search result listing.
///
/// Deserialization runs through the same validation as [`SearchItem::new`], so
/// a partially valid instance cannot exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "SearchItemRaw")]
pub struct SearchItem {
    pub title: String,
    pub image_url: String,
    pub href: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItemRaw {
    title: String,
    image_url: String,
    href: String,
}

impl TryFrom<SearchItemRaw> for SearchItem {
    type Error = ModelError;
    fn try_from(raw: SearchItemRaw) -> Result<Self, ModelError> {
        SearchItem::new(raw.title, raw.image_url, raw.href)
    }
}

impl SearchItem {
    pub fn new(title: String, image_url: String, href: String) -> Result<Self, ModelError> {
        let title = non_empty("title", title)?;
        let image_url = non_empty("imageUrl", image_url)?;
        let href = non_empty("href", href)?;
        if !href_like(&href) {
            return Err(ModelError::BadHref(href));
        }
        Ok(Self { title, image_url, href })
    }
}

// --- Details ---

/// Descriptive metadata for one piece of content. All fields are free-form
/// strings; `airdate` additionally carries a best-effort parsed date that is
/// `None` when the text is unparsable (the record is still accepted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "MediaItemRaw")]
pub struct MediaItem {
    pub description: String,
    pub aliases: String,
    pub airdate: String,
    #[serde(skip_serializing)]
    pub airdate_parsed: Option<NaiveDate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaItemRaw {
    #[serde(default)]
    description: String,
    #[serde(default)]
    aliases: String,
    #[serde(default)]
    airdate: String,
}

impl From<MediaItemRaw> for MediaItem {
    fn from(raw: MediaItemRaw) -> Self {
        MediaItem::new(raw.description, raw.aliases, raw.airdate)
    }
}

const AIRDATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%m/%d/%Y",
];

impl MediaItem {
    pub fn new(description: String, aliases: String, airdate: String) -> Self {
        let airdate = airdate.trim().to_string();
        let airdate_parsed = Self::parse_airdate(&airdate);
        Self {
            description: description.trim().to_string(),
            aliases: aliases.trim().to_string(),
            airdate,
            airdate_parsed,
        }
    }

    fn parse_airdate(text: &str) -> Option<NaiveDate> {
        // Labels like "Aired: Apr 3, 2016" carry a prefix before the date.
        let text = text.rsplit(':').next().unwrap_or(text).trim();
        AIRDATE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
    }
}

// --- Episodes ---

/// One playable episode entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "EpisodeLinkRaw")]
pub struct EpisodeLink {
    pub number: u32,
    pub title: String,
    pub href: String,
    /// Seconds; `None` when the source value was missing or invalid.
    pub duration: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EpisodeLinkRaw {
    number: serde_json::Value,
    #[serde(default)]
    title: String,
    href: String,
    #[serde(default)]
    duration: Option<serde_json::Value>,
}

impl TryFrom<EpisodeLinkRaw> for EpisodeLink {
    type Error = ModelError;
    fn try_from(raw: EpisodeLinkRaw) -> Result<Self, ModelError> {
        let number = non_negative_int(&raw.number)
            .ok_or_else(|| ModelError::BadEpisodeNumber(raw.number.to_string()))?;
        EpisodeLink::new(number, raw.title, raw.href, raw.duration.as_ref().and_then(non_negative_int))
    }
}

/// Coerce a JSON value into a non-negative integer: accepts unsigned numbers,
/// whole floats and numeric strings.
pub(crate) fn non_negative_int(value: &serde_json::Value) -> Option<u32> {
    match value {
        serde_json::Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                return u32::try_from(u).ok();
            }
            let f = n.as_f64()?;
            if f >= 0.0 && f.fract() == 0.0 && f <= u32::MAX as f64 {
                Some(f as u32)
            } else {
                None
            }
        }
        serde_json::Value::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    }
}

impl EpisodeLink {
    pub fn new(
        number: u32,
        title: String,
        href: String,
        duration: Option<u32>,
    ) -> Result<Self, ModelError> {
        let href = non_empty("href", href)?;
        Ok(Self {
            number,
            title: title.trim().to_string(),
            href,
            duration,
        })
    }
}

// --- Streams ---

/// One candidate playable URL, optionally with custom HTTP headers and a
/// quality label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSource {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Canonical stream extraction output. A result with neither `streams` nor
/// `sources` signals that extraction found nothing playable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamResult {
    #[serde(default)]
    pub streams: Option<Vec<String>>,
    #[serde(default)]
    pub subtitles: Option<Vec<String>>,
    #[serde(default)]
    pub sources: Option<Vec<StreamSource>>,
}

impl StreamResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_none() && self.sources.is_none()
    }
}

// --- Subtitles ---

/// One timed subtitle entry. Times are seconds from stream start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtitleCue {
    pub id: String,
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
}
