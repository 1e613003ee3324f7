//! Upstream REST Module
//!
//! Memoized read-through client for the dashboard's REST backend. Responses
//! are cached per resource and query; stream events invalidate them.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};

use crate::cache::{Memoizer, SharedCache};
use crate::config::Config;
use crate::dispatcher::{Dispatcher, SubscriptionHandle};
use crate::error::{MemoizeError, UpstreamError};

/// Query parameters of an upstream request, ordered for stable keys.
pub type Query = BTreeMap<String, String>;

// == Upstream Client ==
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    memo: Memoizer<Value>,
    ttl: Option<Duration>,
}

impl UpstreamClient {
    /// Client for `base_url`, caching into `cache` with its default TTL.
    ///
    /// Concurrent misses on the same resource share one request.
    pub fn new(base_url: impl Into<String>, cache: SharedCache<Value>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            memo: Memoizer::new(cache).with_coalescing(),
            ttl: None,
        }
    }

    /// Client for `UPSTREAM_URL`, or None when it is unset.
    pub fn from_config(config: &Config, cache: SharedCache<Value>) -> Option<Self> {
        config
            .upstream_url
            .as_deref()
            .map(|url| Self::new(url, cache))
    }

    /// Overrides the cache TTL for upstream responses.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // == Fetch ==
    /// GETs `{base_url}/{resource}?{query}` as JSON, answering from the cache
    /// while a previous response is still valid.
    pub async fn fetch(
        &self,
        resource: &str,
        query: &Query,
    ) -> Result<Value, MemoizeError<UpstreamError>> {
        self.memo
            .call(resource, query, self.ttl, || self.request(resource, query))
            .await
    }

    // == Invalidate ==
    /// Drops every cached response for `resource`, whatever its query.
    /// Returns how many valid responses were dropped.
    pub fn invalidate_resource(&self, resource: &str) -> usize {
        let exact = format!("{resource}:");
        let hashed = format!("{resource}#");
        let removed = self
            .memo
            .cache()
            .invalidate_where(|key| key.starts_with(&exact) || key.starts_with(&hashed));
        if removed > 0 {
            info!(resource, removed, "upstream responses invalidated");
        }
        removed
    }

    /// Invalidates `resource` whenever `event_type` is published.
    pub fn invalidate_on(
        &self,
        dispatcher: &Dispatcher,
        event_type: &str,
        resource: &str,
    ) -> SubscriptionHandle {
        let upstream = self.clone();
        let resource = resource.to_string();
        dispatcher.subscribe(event_type, move |_payload: &Value| {
            upstream.invalidate_resource(&resource);
            Ok(())
        })
    }

    async fn request(&self, resource: &str, query: &Query) -> Result<Value, UpstreamError> {
        let url = format!("{}/{}", self.base_url, resource);
        debug!(url = %url, "upstream request");

        let response = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| UpstreamError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status(status.as_u16()));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))
    }
}

impl std::fmt::Debug for UpstreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamClient")
            .field("base_url", &self.base_url)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStore;
    use serde_json::json;

    fn cache() -> SharedCache<Value> {
        SharedCache::new(CacheStore::new(Duration::from_secs(60)))
    }

    #[test]
    fn test_from_config_requires_url() {
        assert!(UpstreamClient::from_config(&Config::default(), cache()).is_none());

        let config = Config {
            upstream_url: Some("http://127.0.0.1:8080/api/".to_string()),
            ..Config::default()
        };
        let client = UpstreamClient::from_config(&config, cache()).unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:8080/api");
    }

    #[test]
    fn test_invalidate_resource_keeps_other_resources() {
        let cache = cache();
        let client = UpstreamClient::new("http://127.0.0.1:8080", cache.clone());
        cache.set("orders:{}", json!([]), None).unwrap();
        cache
            .set("orders:{\"side\":\"buy\"}", json!([]), None)
            .unwrap();
        cache.set("orders_archive:{}", json!([]), None).unwrap();

        assert_eq!(client.invalidate_resource("orders"), 2);
        assert!(cache.contains("orders_archive:{}"));
        assert_eq!(client.invalidate_resource("orders"), 0);
    }
}
