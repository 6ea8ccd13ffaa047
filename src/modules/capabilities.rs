use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::errors::ExtractError;

/// The complete capability surface handed to a provider at construction.
/// Providers hold these handles; nothing else of the host is reachable.
pub struct CapabilitySet {
    pub console: ConsoleSink,
    pub fetch: FetchCapability,
    pub codec: Base64Codec,
    pub tokens: TokenGenerator,
}

// --- Console ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    Log,
    Info,
    Warn,
    Error,
    Debug,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleMessage {
    pub level: ConsoleLevel,
    pub text: String,
}

/// Provider-facing logger. Messages land in a bounded per-context ring buffer
/// and are mirrored to `tracing`; providers never reach the host console
/// directly.
#[derive(Clone)]
pub struct ConsoleSink {
    module: String,
    capacity: usize,
    buffer: Arc<Mutex<VecDeque<ConsoleMessage>>>,
}

impl ConsoleSink {
    pub(crate) fn new(module: &str, capacity: usize) -> Self {
        Self {
            module: module.to_string(),
            capacity,
            buffer: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    fn push(&self, level: ConsoleLevel, text: String) {
        debug!(module = %self.module, ?level, "{}", text);
        let mut buffer = self.buffer.lock().unwrap();
        if buffer.len() == self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(ConsoleMessage { level, text });
    }

    pub fn log(&self, text: impl Into<String>) {
        self.push(ConsoleLevel::Log, text.into());
    }

    pub fn info(&self, text: impl Into<String>) {
        self.push(ConsoleLevel::Info, text.into());
    }

    pub fn warn(&self, text: impl Into<String>) {
        self.push(ConsoleLevel::Warn, text.into());
    }

    pub fn error(&self, text: impl Into<String>) {
        self.push(ConsoleLevel::Error, text.into());
    }

    pub fn debug(&self, text: impl Into<String>) {
        self.push(ConsoleLevel::Debug, text.into());
    }

    /// Snapshot of buffered messages, oldest first.
    pub fn messages(&self) -> Vec<ConsoleMessage> {
        self.buffer.lock().unwrap().iter().cloned().collect()
    }

    /// Take and clear the buffered messages.
    pub fn drain(&self) -> Vec<ConsoleMessage> {
        self.buffer.lock().unwrap().drain(..).collect()
    }
}

// --- Fetch ---

/// Response wrapper for the extended fetch form.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    body: String,
}

impl FetchResponse {
    pub fn text(&self) -> &str {
        &self.body
    }

    pub fn json(&self) -> Result<Value, ExtractError> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Network capability given to providers. Requests are filtered against the
/// module's allowed-host list and abort when the owning context cancels or
/// times out.
#[derive(Clone)]
pub struct FetchCapability {
    client: reqwest::Client,
    no_redirect: reqwest::Client,
    allowed_hosts: Option<Vec<String>>,
    // Swapped for a fresh token whenever in-flight requests must abort, so
    // later calls proceed normally.
    gate: Arc<Mutex<CancellationToken>>,
}

impl FetchCapability {
    pub(crate) fn new(allowed_hosts: Option<Vec<String>>) -> Result<Self, ExtractError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("scour/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let no_redirect = reqwest::Client::builder()
            .user_agent(concat!("scour/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        let allowed_hosts = allowed_hosts.map(|v| {
            v.iter()
                .map(|h| h.trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect()
        });
        Ok(Self {
            client,
            no_redirect,
            allowed_hosts,
            gate: Arc::new(Mutex::new(CancellationToken::new())),
        })
    }

    pub(crate) fn url_allowed(&self, url: &str) -> bool {
        match &self.allowed_hosts {
            None => true,
            Some(list) => {
                if list.is_empty() {
                    return false;
                }
                let Ok(parsed) = Url::parse(url) else { return false };
                match parsed.scheme() {
                    "http" | "https" => {}
                    _ => return false,
                }
                let Some(host) = parsed.host_str() else { return false };
                let host = host.to_ascii_lowercase();
                list.iter().any(|allowed| {
                    let a = allowed.as_str();
                    if let Some(stripped) = a.strip_prefix("*.") {
                        host == stripped || host.ends_with(&format!(".{}", stripped))
                    } else {
                        host == a
                    }
                })
            }
        }
    }

    /// Cancel every in-flight request without poisoning later calls.
    pub(crate) fn abort_inflight(&self) {
        let mut gate = self.gate.lock().unwrap();
        gate.cancel();
        *gate = CancellationToken::new();
    }

    fn current_gate(&self) -> CancellationToken {
        self.gate.lock().unwrap().child_token()
    }

    /// Two-arity form: GET the URL and return the response body as text.
    pub async fn fetch(
        &self,
        url: &str,
        headers: Option<&HashMap<String, String>>,
    ) -> Result<String, ExtractError> {
        let response = self.fetch_v2(url, headers, "GET", None, true, None).await?;
        Ok(response.body)
    }

    /// Extended form with method, body, redirect toggle and body encoding
    /// ("base64" returns the raw bytes base64-encoded; anything else decodes
    /// as UTF-8, lossily).
    pub async fn fetch_v2(
        &self,
        url: &str,
        headers: Option<&HashMap<String, String>>,
        method: &str,
        body: Option<String>,
        redirect: bool,
        encoding: Option<&str>,
    ) -> Result<FetchResponse, ExtractError> {
        if !self.url_allowed(url) {
            return Err(ExtractError::HostNotAllowed(url.to_string()));
        }
        let method = reqwest::Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| ExtractError::Malformed(format!("unsupported method: {method}")))?;
        let client = if redirect { &self.client } else { &self.no_redirect };

        let mut request = client.request(method, url).headers(header_map(headers));
        if let Some(body) = body {
            request = request.body(body);
        }

        let gate = self.current_gate();
        let response = tokio::select! {
            _ = gate.cancelled() => return Err(ExtractError::Cancelled),
            r = request.send() => r?,
        };

        let status = response.status().as_u16();
        let mut response_headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                response_headers.insert(name.to_string(), v.to_string());
            }
        }

        let bytes = tokio::select! {
            _ = gate.cancelled() => return Err(ExtractError::Cancelled),
            b = response.bytes() => b?,
        };
        let body = match encoding {
            Some("base64") => STANDARD.encode(&bytes),
            _ => String::from_utf8_lossy(&bytes).into_owned(),
        };

        Ok(FetchResponse { status, headers: response_headers, body })
    }
}

fn header_map(headers: Option<&HashMap<String, String>>) -> HeaderMap {
    let mut map = HeaderMap::new();
    if let Some(headers) = headers {
        for (name, value) in headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(n), Ok(v)) => {
                    map.insert(n, v);
                }
                _ => warn!(%name, "skipping invalid header"),
            }
        }
    }
    map
}

// --- Base64 ---

/// `btoa`/`atob` pair exposed to providers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Codec;

impl Base64Codec {
    pub fn btoa(&self, input: &str) -> String {
        STANDARD.encode(input.as_bytes())
    }

    pub fn atob(&self, input: &str) -> Result<String, ExtractError> {
        let bytes = STANDARD
            .decode(input.trim())
            .map_err(|e| ExtractError::Malformed(format!("invalid base64: {e}")))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

// --- Tokens ---

pub const TOKEN_LEN: usize = 16;
// Fixed infix some sources expect somewhere inside the token. The token is
// otherwise opaque; only its shape is stable.
const TOKEN_INFIX: &str = "kQvToa";
const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Request-signature token source: 16 characters, the fixed infix spliced at
/// a random position, the remainder random alphanumerics.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenGenerator;

impl TokenGenerator {
    pub fn generate(&self) -> String {
        let mut rng = rand::rng();
        let fill = TOKEN_LEN - TOKEN_INFIX.len();
        let pos = rng.random_range(0..=fill);
        let mut out = String::with_capacity(TOKEN_LEN);
        for i in 0..=fill {
            if i == pos {
                out.push_str(TOKEN_INFIX);
            }
            if i < fill {
                out.push(TOKEN_ALPHABET[rng.random_range(0..TOKEN_ALPHABET.len())] as char);
            }
        }
        out
    }
}
