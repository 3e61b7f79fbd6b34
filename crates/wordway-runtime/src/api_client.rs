//! API client used by the broker's `request` method.
//!
//! The broker treats the client as an opaque collaborator: one call, one
//! settled value or one [`ApiError`]. [`HttpApiClient`] is the production
//! implementation; the message `arguments` are a request descriptor:
//!
//! ```json
//! { "url": "/words/hello", "method": "GET", "params": { "lang": "en" },
//!   "data": null, "headers": { "x-client": "extension" } }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use wordway_core::ApiError;

use crate::config_manager::ConfigManager;

/// Upper bound on a single request, connect to last body byte.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// How long a cached GET response stays servable.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
/// Most GET responses held at once; the oldest is evicted first.
pub const MAX_CACHE_ENTRIES: usize = 256;

// ── ApiClient ─────────────────────────────────────────────────────────────────

#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Issue the request described by `arguments`.
    ///
    /// `use_cache` allows a previously fetched response to be reused.
    async fn request(&self, arguments: Value, use_cache: bool) -> Result<Value, ApiError>;
}

// ── RequestDescriptor ─────────────────────────────────────────────────────────

/// The shape of `arguments` for a `request` message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDescriptor {
    /// Absolute URL, or a path resolved against the client's base URL.
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    /// Query string parameters.
    #[serde(default)]
    pub params: Map<String, Value>,
    /// JSON request body.
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl RequestDescriptor {
    pub fn from_arguments(arguments: Value) -> Result<Self, ApiError> {
        let descriptor: RequestDescriptor =
            serde_json::from_value(arguments).map_err(|e| ApiError::InvalidArguments {
                message: e.to_string(),
            })?;
        if descriptor.url.trim().is_empty() {
            return Err(ApiError::InvalidArguments {
                message: "url must not be empty".to_string(),
            });
        }
        Ok(descriptor)
    }

    pub fn http_method(&self) -> Result<reqwest::Method, ApiError> {
        reqwest::Method::from_bytes(self.method.to_ascii_uppercase().as_bytes()).map_err(|_| {
            ApiError::InvalidArguments {
                message: format!("unsupported HTTP method {:?}", self.method),
            }
        })
    }

    /// Query parameters as strings; `null` values are omitted.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.params
            .iter()
            .filter_map(|(key, value)| {
                let value = match value {
                    Value::Null => return None,
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Some((key.clone(), value))
            })
            .collect()
    }
}

// ── HttpApiClient ─────────────────────────────────────────────────────────────

pub struct HttpApiClient {
    http: reqwest::Client,
    base_url: String,
    /// Source of the bearer credential, when wired up.
    config: Option<Arc<ConfigManager>>,
    /// GET responses keyed by URL plus query, filled only on cached calls.
    cache: parking_lot::Mutex<HashMap<String, CachedResponse>>,
    cache_ttl: Duration,
    cache_capacity: usize,
}

struct CachedResponse {
    value: Value,
    stored_at: Instant,
}

impl HttpApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .user_agent(concat!("wordway/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Network {
                message: e.to_string(),
            })?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            config: None,
            cache: parking_lot::Mutex::new(HashMap::new()),
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_capacity: MAX_CACHE_ENTRIES,
        })
    }

    /// Override how long cached responses live and how many are kept.
    pub fn with_cache_limits(mut self, ttl: Duration, capacity: usize) -> Self {
        self.cache_ttl = ttl;
        self.cache_capacity = capacity;
        self
    }

    /// Attach the signed-in user's credential to every request.
    pub fn with_config(mut self, config: Arc<ConfigManager>) -> Self {
        self.config = Some(config);
        self
    }

    /// Resolve `url` against the base URL unless it is already absolute.
    pub fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            return url.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            url.trim_start_matches('/')
        )
    }

    /// Number of responses currently cached.
    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }

    fn cached(&self, key: &str) -> Option<Value> {
        let mut cache = self.cache.lock();
        match cache.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.cache_ttl => Some(entry.value.clone()),
            Some(_) => {
                cache.remove(key);
                None
            }
            None => None,
        }
    }

    fn store_cached(&self, key: String, value: Value) {
        if self.cache_capacity == 0 {
            return;
        }
        let mut cache = self.cache.lock();
        let ttl = self.cache_ttl;
        cache.retain(|_, entry| entry.stored_at.elapsed() < ttl);
        while cache.len() >= self.cache_capacity && !cache.contains_key(&key) {
            let oldest = cache
                .iter()
                .min_by_key(|(_, entry)| entry.stored_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(oldest) => {
                    cache.remove(&oldest);
                }
                None => break,
            }
        }
        cache.insert(
            key,
            CachedResponse {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    fn cache_key(method: &reqwest::Method, url: &str, query: &[(String, String)]) -> Option<String> {
        if *method != reqwest::Method::GET {
            return None;
        }
        let query: Vec<String> = query.iter().map(|(k, v)| format!("{k}={v}")).collect();
        Some(format!("{url}?{}", query.join("&")))
    }

    async fn bearer_token(&self) -> Option<String> {
        let config = self.config.as_ref()?;
        match config.get_config().await {
            Ok(config) => config.bearer_token().map(str::to_string),
            Err(e) => {
                warn!(error = %e, "could not read config for bearer token");
                None
            }
        }
    }
}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn request(&self, arguments: Value, use_cache: bool) -> Result<Value, ApiError> {
        let descriptor = RequestDescriptor::from_arguments(arguments)?;
        let method = descriptor.http_method()?;
        let url = self.resolve_url(&descriptor.url);
        let query = descriptor.query_pairs();

        let cache_key = if use_cache {
            Self::cache_key(&method, &url, &query)
        } else {
            None
        };
        if let Some(key) = &cache_key {
            if let Some(hit) = self.cached(key) {
                debug!(%url, "serving cached response");
                return Ok(hit);
            }
        }

        let mut builder = self.http.request(method.clone(), &url).query(&query);
        for (name, value) in &descriptor.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(data) = &descriptor.data {
            builder = builder.json(data);
        }
        if let Some(token) = self.bearer_token().await {
            builder = builder.bearer_auth(token);
        }

        debug!(%method, %url, "sending API request");
        let response = builder.send().await.map_err(|e| ApiError::Network {
            message: e.to_string(),
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| ApiError::Network {
            message: e.to_string(),
        })?;

        if !status.is_success() {
            let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
            debug!(%url, status = status.as_u16(), "API request rejected");
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| ApiError::Decode {
                message: e.to_string(),
            })?
        };

        if let Some(key) = cache_key {
            self.store_cached(key, value.clone());
        }
        Ok(value)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
