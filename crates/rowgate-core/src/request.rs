//! Logical request descriptors and the cache keys derived from them.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde_json::Value;

use crate::http_client::HttpMethod;

/// One caller-intended call against the remote API.
///
/// Query parameters live in a `BTreeMap` so that two descriptors built with
/// the same pairs in a different order still produce the same URL and the
/// same [`CacheKey`].
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: HttpMethod,
    pub path: String,
    pub body: Option<Value>,
    pub query: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub skip_cache: bool,
    /// Path prefixes whose cached reads are dropped after this call succeeds.
    pub invalidates: Vec<String>,
}

impl RequestDescriptor {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
            skip_cache: false,
            invalidates: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Patch, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.insert(name.into(), value.to_string());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn skip_cache(mut self) -> Self {
        self.skip_cache = true;
        self
    }

    pub fn invalidating(mut self, path_prefix: impl Into<String>) -> Self {
        self.invalidates.push(path_prefix.into());
        self
    }

    pub fn is_cacheable(&self) -> bool {
        self.method.is_read() && !self.skip_cache
    }

    /// Percent-encoded `k=v&k=v`, sorted by key. Empty when there is no query.
    pub fn query_string(&self) -> String {
        self.query
            .iter()
            .map(|(name, value)| {
                format!(
                    "{}={}",
                    urlencoding::encode(name),
                    urlencoding::encode(value)
                )
            })
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Path plus query string, as it appears on the wire.
    pub fn target(&self) -> String {
        let query = self.query_string();
        if query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{query}", self.path)
        }
    }

    pub fn url(&self, base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');
        let target = self.target();
        if target.starts_with('/') {
            format!("{base}{target}")
        } else {
            format!("{base}/{target}")
        }
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(self.method, &self.target())
    }
}

/// Deterministic cache key: `"{METHOD} {path}?{query}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(method: HttpMethod, target: &str) -> Self {
        Self(format!("{} {target}", method.as_str()))
    }

    /// Key prefix covering every cached read whose path starts with `path_prefix`.
    pub fn read_prefix(path_prefix: &str) -> String {
        format!("{} {path_prefix}", HttpMethod::Get.as_str())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0.as_str())
    }
}
