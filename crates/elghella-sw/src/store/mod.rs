//! Cache Store abstraction.
//!
//! A store holds named partitions, each mapping a [`RequestKey`] to one
//! [`StoredResponse`]. Every mutation is atomic at the store level and
//! concurrent writers resolve by last write wins.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use elghella_net::{Request, Response};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::StoreError;

mod memory;
mod sqlite;

pub use memory::MemoryCacheStore;
pub use sqlite::SqliteCacheStore;

// ==================== Keys ====================

/// Identity of a cached request: method plus full URL including the query
/// string, compared case-sensitively. The fragment never participates and
/// neither do headers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    method: String,
    url: String,
}

impl RequestKey {
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: method.as_str().to_string(),
            url: url.into(),
        }
    }

    /// Key for a GET of `url`.
    pub fn get(url: &Url) -> Self {
        Self::new(&Method::GET, url)
    }

    pub fn from_request(request: &Request) -> Self {
        Self::new(&request.method, &request.url)
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

// ==================== Entries ====================

/// A captured network response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResponse {
    /// Final URL the response came from.
    pub url: String,
    pub status: u16,
    /// Header names with their raw value bytes.
    pub headers: Vec<(String, Vec<u8>)>,
    pub body: Vec<u8>,
    pub stored_at: DateTime<Utc>,
}

impl StoredResponse {
    /// Capture a response. Header values are kept byte for byte.
    pub fn from_response(response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
            .collect();

        Self {
            url: response.url.to_string(),
            status: response.status.as_u16(),
            headers,
            body: response.body.to_vec(),
            stored_at: Utc::now(),
        }
    }

    /// Rebuild a response marked as served from cache.
    pub fn to_response(&self) -> Result<Response, StoreError> {
        let url = Url::parse(&self.url)
            .map_err(|e| StoreError::Corrupt(format!("url '{}': {}", self.url, e)))?;
        let status = StatusCode::from_u16(self.status)
            .map_err(|_| StoreError::Corrupt(format!("status {}", self.status)))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::try_from(name.as_str())
                .map_err(|e| StoreError::Corrupt(format!("header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_bytes(value)
                .map_err(|e| StoreError::Corrupt(format!("header {}: {}", name, e)))?;
            headers.append(name, value);
        }

        Ok(Response {
            url,
            status,
            headers,
            body: self.body.clone().into(),
            from_cache: true,
        })
    }
}

// ==================== Store ====================

/// Durable partitioned key-value storage for responses.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Create the partition if it does not exist.
    async fn open(&self, partition: &str) -> Result<(), StoreError>;

    /// Whether the partition exists.
    async fn has(&self, partition: &str) -> Result<bool, StoreError>;

    /// Look up a key. A missing partition is a miss.
    async fn match_request(
        &self,
        partition: &str,
        key: &RequestKey,
    ) -> Result<Option<StoredResponse>, StoreError>;

    /// Insert or overwrite one entry, creating the partition if needed.
    async fn put(
        &self,
        partition: &str,
        key: RequestKey,
        response: StoredResponse,
    ) -> Result<(), StoreError>;

    /// Insert or overwrite several entries. Either all land or none do.
    async fn put_all(
        &self,
        partition: &str,
        entries: Vec<(RequestKey, StoredResponse)>,
    ) -> Result<(), StoreError>;

    /// Remove one entry. Returns whether it existed.
    async fn delete(&self, partition: &str, key: &RequestKey) -> Result<bool, StoreError>;

    /// Keys held by the partition, sorted.
    async fn keys(&self, partition: &str) -> Result<Vec<RequestKey>, StoreError>;

    /// Names of all partitions, sorted.
    async fn partition_names(&self) -> Result<Vec<String>, StoreError>;

    /// Drop a partition and all its entries. Returns whether it existed.
    async fn delete_partition(&self, name: &str) -> Result<bool, StoreError>;
}

// ==================== Partition Handle ====================

/// An opened partition.
#[derive(Clone)]
pub struct Partition {
    store: Arc<dyn CacheStore>,
    name: String,
}

impl fmt::Debug for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partition").field("name", &self.name).finish()
    }
}

impl Partition {
    /// Open (lazily creating) a partition.
    pub async fn open(store: Arc<dyn CacheStore>, name: impl Into<String>) -> Result<Self, StoreError> {
        let name = name.into();
        store.open(&name).await?;
        Ok(Self { store, name })
    }

    /// Handle to a partition without touching the store. It is created on first write.
    pub fn lazy(store: Arc<dyn CacheStore>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn match_request(&self, key: &RequestKey) -> Result<Option<StoredResponse>, StoreError> {
        self.store.match_request(&self.name, key).await
    }

    pub async fn put(&self, key: RequestKey, response: StoredResponse) -> Result<(), StoreError> {
        self.store.put(&self.name, key, response).await
    }

    pub async fn put_all(&self, entries: Vec<(RequestKey, StoredResponse)>) -> Result<(), StoreError> {
        self.store.put_all(&self.name, entries).await
    }

    pub async fn delete(&self, key: &RequestKey) -> Result<bool, StoreError> {
        self.store.delete(&self.name, key).await
    }

    pub async fn keys(&self) -> Result<Vec<RequestKey>, StoreError> {
        self.store.keys(&self.name).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_key_includes_query() {
        let a = RequestKey::get(&url("https://elghella.test/api/products?page=1"));
        let b = RequestKey::get(&url("https://elghella.test/api/products?page=2"));
        assert_ne!(a, b);
        assert_eq!(a.url(), "https://elghella.test/api/products?page=1");
    }

    #[test]
    fn test_key_ignores_fragment() {
        let a = RequestKey::get(&url("https://elghella.test/map#farm-12"));
        let b = RequestKey::get(&url("https://elghella.test/map"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_is_case_sensitive_in_path() {
        let a = RequestKey::get(&url("https://elghella.test/Logo.svg"));
        let b = RequestKey::get(&url("https://elghella.test/logo.svg"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_key_distinguishes_method() {
        let u = url("https://elghella.test/api/orders");
        assert_ne!(RequestKey::new(&Method::GET, &u), RequestKey::new(&Method::POST, &u));
        assert_eq!(
            RequestKey::new(&Method::POST, &u).to_string(),
            "POST https://elghella.test/api/orders"
        );
    }

    #[test]
    fn test_stored_response_round_trip() {
        let response = Response::synthetic(
            url("https://elghella.test/logo.svg"),
            StatusCode::OK,
            "image/svg+xml",
            "<svg/>",
        );
        let stored = StoredResponse::from_response(&response);
        let restored = stored.to_response().unwrap();

        assert_eq!(restored.status, StatusCode::OK);
        assert_eq!(restored.body, response.body);
        assert_eq!(restored.content_type().unwrap().essence_str(), "image/svg+xml");
        assert!(restored.from_cache);
    }

    /// A response carrying a header value that is not visible ASCII.
    pub(crate) fn download_response() -> Response {
        let mut response = Response::synthetic(
            Url::parse("https://elghella.test/reports/harvest").unwrap(),
            StatusCode::OK,
            "application/pdf",
            "%PDF",
        );
        response.headers.insert(
            http::header::CONTENT_DISPOSITION,
            HeaderValue::from_bytes("attachment; filename=\"récolte.pdf\"".as_bytes()).unwrap(),
        );
        response
    }

    pub(crate) fn assert_same_headers(restored: &Response, original: &Response) {
        assert_eq!(restored.headers.len(), original.headers.len());
        assert_eq!(
            restored.headers[http::header::CONTENT_DISPOSITION].as_bytes(),
            "attachment; filename=\"récolte.pdf\"".as_bytes()
        );
    }

    #[test]
    fn test_non_ascii_header_survives_round_trip() {
        let response = download_response();
        let restored = StoredResponse::from_response(&response).to_response().unwrap();
        assert_same_headers(&restored, &response);
    }

    #[test]
    fn test_corrupt_header_is_rejected() {
        let stored = StoredResponse {
            url: "https://elghella.test/".to_string(),
            status: 200,
            headers: vec![("content-type".to_string(), b"text/plain\n".to_vec())],
            body: Vec::new(),
            stored_at: Utc::now(),
        };
        assert!(matches!(stored.to_response(), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_corrupt_status_is_rejected() {
        let stored = StoredResponse {
            url: "https://elghella.test/".to_string(),
            status: 42,
            headers: Vec::new(),
            body: Vec::new(),
            stored_at: Utc::now(),
        };
        assert!(matches!(stored.to_response(), Err(StoreError::Corrupt(_))));
    }
}
