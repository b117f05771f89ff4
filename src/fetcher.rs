//! Outbound HTTP: the transport seam and the caching fetch wrapper.
//!
//! [`Transport`] is the only thing that touches the network. [`CachedFetcher`]
//! layers the request cache, status handling and the `{ "data": ... }`
//! envelope quirk of the PeeringDB API on top of it.

use std::future::Future;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use crate::cache::{cache_key, RequestCache};
use crate::error::{AppError, FetchError};

const USER_AGENT: &str = concat!("pdb-footprint/", env!("CARGO_PKG_VERSION"));

/// Method and optional JSON body of an outbound request.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub body: Option<Value>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            body: None,
        }
    }
}

impl RequestOptions {
    #[cfg(test)]
    pub fn post(body: Value) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
        }
    }
}

/// Status and raw body of a completed request.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

/// Sends one request. Implementations must not cache.
pub trait Transport: Send + Sync {
    fn send<'a>(
        &'a self,
        url: &'a str,
        options: &'a RequestOptions,
    ) -> impl Future<Output = Result<RawResponse, FetchError>> + Send + 'a;
}

/// reqwest-backed transport with optional PeeringDB API key.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    headers: HeaderMap,
}

impl HttpTransport {
    pub fn new(api_key: Option<&str>, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        let mut headers = HeaderMap::new();
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            info!("API Key for PeeringDB found, using it.");
            headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Api-Key {}", key))?);
        }

        Ok(Self { client, headers })
    }
}

impl Transport for HttpTransport {
    fn send<'a>(
        &'a self,
        url: &'a str,
        options: &'a RequestOptions,
    ) -> impl Future<Output = Result<RawResponse, FetchError>> + Send + 'a {
        async move {
            let mut request = self
                .client
                .request(options.method.clone(), url)
                .headers(self.headers.clone());
            if let Some(body) = &options.body {
                request = request.json(body);
            }

            let resp = request
                .send()
                .await
                .map_err(|e| FetchError::transport(url, e))?;
            let status = resp.status();
            let body = resp
                .bytes()
                .await
                .map_err(|e| FetchError::transport(url, e))?;
            Ok(RawResponse {
                status,
                body: body.to_vec(),
            })
        }
    }
}

/// Strips the `{ "data": ... }` envelope when present.
fn unwrap_envelope(body: Value) -> Value {
    match body {
        Value::Object(mut map) => match map.remove("data") {
            Some(data) => data,
            None => Value::Object(map),
        },
        other => other,
    }
}

fn decode<T: DeserializeOwned>(url: &str, payload: Value) -> Result<T, FetchError> {
    serde_json::from_value(payload).map_err(|source| FetchError::Decode {
        url: url.to_string(),
        source,
    })
}

/// Fetch wrapper that memoizes successful GETs in a [`RequestCache`].
pub struct CachedFetcher<T> {
    transport: T,
    cache: RequestCache,
}

impl<T: Transport> CachedFetcher<T> {
    pub fn new(transport: T, cache: RequestCache) -> Self {
        Self { transport, cache }
    }

    pub fn cache(&self) -> &RequestCache {
        &self.cache
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Fetches `url`, serving GETs from the cache while they are fresh.
    pub async fn fetch<R: DeserializeOwned>(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<R, FetchError> {
        let cacheable = options.method == Method::GET;
        let key = cache_key(&options.method, url);

        if cacheable {
            if let Some(payload) = self.cache.get(&key) {
                debug!("Cache hit for {}", key);
                return decode(url, payload);
            }
        }

        let payload = self.request(url, options).await?;
        let decoded = decode(url, payload.clone())?;
        if cacheable {
            self.cache.put(key, payload);
        }
        Ok(decoded)
    }

    /// Same request path as [`fetch`](Self::fetch) without touching the cache.
    pub async fn fetch_uncached<R: DeserializeOwned>(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<R, FetchError> {
        let payload = self.request(url, options).await?;
        decode(url, payload)
    }

    async fn request(&self, url: &str, options: &RequestOptions) -> Result<Value, FetchError> {
        debug!("{} {}", options.method, url);
        let resp = self.transport.send(url, options).await?;
        if !resp.status.is_success() {
            return Err(FetchError::Status {
                status: resp.status.to_string(),
                url: url.to_string(),
            });
        }
        let body: Value =
            serde_json::from_slice(&resp.body).map_err(|source| FetchError::Decode {
                url: url.to_string(),
                source,
            })?;
        Ok(unwrap_envelope(body))
    }
}
