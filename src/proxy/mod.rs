//! Cache-aside resource proxy.
//!
//! [`CacheProxy`] turns a request into one of three store operations:
//!
//! | Verb     | Operation                      | Success           | Failure |
//! |----------|--------------------------------|-------------------|---------|
//! | `GET`    | [`read`](CacheProxy::read)     | `200` image bytes | `404`   |
//! | `PUT`    | [`write`](CacheProxy::write)   | `201 Created`     | `500`   |
//! | `DELETE` | [`delete`](CacheProxy::delete) | `200 Deleted`     | `404`   |
//!
//! Keys are validated before anything else; a bad key is `400` on every verb
//! and any other verb is `405`. Neither touches the store or the origin.

use std::io;

use bytes::Bytes;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::http::{Method, Request, Response, StatusCode};
use crate::key::{self, ResourceKey};
use crate::store::{Removal, ResourceStore};
use crate::upstream::{Upstream, UpstreamError};

/// Content type every cached resource is served with.
pub const IMAGE_CONTENT_TYPE: &str = "image/jpeg";

/// Failures that escape an operation and become a `500`.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("cache storage error: {0}")]
    Storage(#[from] io::Error),
}

/// Result of a read.
///
/// Both `NotFound*` variants are answered with `404`; they are kept apart so
/// the two causes stay visible in logs and tests.
#[derive(Debug)]
pub enum ReadOutcome {
    Found(Bytes),
    /// No cache entry, and the origin did not produce one.
    NotFoundMiss(UpstreamError),
    /// The store failed: the entry could not be read and the origin did not
    /// produce one, or the origin produced one that could not be persisted.
    NotFoundError(io::Error),
}

impl ReadOutcome {
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

/// The cache-aside store: a local [`ResourceStore`] in front of an [`Upstream`].
///
/// Shared across connections behind an `Arc`; it holds no per-request state.
pub struct CacheProxy<S, U> {
    store: S,
    upstream: U,
}

impl<S, U> CacheProxy<S, U>
where
    S: ResourceStore,
    U: Upstream,
{
    pub fn new(store: S, upstream: U) -> Self {
        Self { store, upstream }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn upstream(&self) -> &U {
        &self.upstream
    }

    /// Serves `key` from the store, filling it from the origin on a miss.
    ///
    /// A local read failure is logged and treated as a miss. A failed fetch is
    /// never retried and leaves the store untouched. Fetched bytes are only
    /// served once they are persisted; a failed write is a not-found outcome.
    pub async fn read(&self, key: &ResourceKey) -> ReadOutcome {
        let read_error = match self.store.load(key).await {
            Ok(Some(data)) => return ReadOutcome::Found(data),
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "cache read failed, treating as miss");
                Some(e)
            }
        };

        let data = match self.upstream.fetch(key).await {
            Ok(data) => data,
            Err(e) => {
                warn!(key = %key, error = %e, "upstream fetch failed");
                return match read_error {
                    Some(read_error) => ReadOutcome::NotFoundError(read_error),
                    None => ReadOutcome::NotFoundMiss(e),
                };
            }
        };

        if let Err(e) = self.store.save(key, data.clone()).await {
            warn!(key = %key, error = %e, "fetched from upstream but caching failed");
            return ReadOutcome::NotFoundError(e);
        }

        info!(key = %key, bytes = data.len(), "fetched from upstream and cached");
        ReadOutcome::Found(data)
    }

    /// Stores `data` under `key`, replacing any existing entry.
    ///
    /// # Errors
    ///
    /// [`ProxyError::Storage`] if the entry could not be written.
    pub async fn write(&self, key: &ResourceKey, data: Bytes) -> Result<(), ProxyError> {
        self.store.save(key, data).await?;
        Ok(())
    }

    pub async fn delete(&self, key: &ResourceKey) -> Removal {
        self.store.remove(key).await
    }

    /// Validates the key, dispatches on the method and maps the outcome to a response.
    pub async fn handle(&self, request: Request) -> Response {
        let key = match key::validate(request.path()) {
            Ok(key) => key,
            Err(_) => return Response::text(StatusCode::BadRequest, "Bad request"),
        };

        match self.dispatch(request, &key).await {
            Ok(response) => response,
            Err(e) => {
                error!(key = %key, error = %e, "request failed");
                Response::text(StatusCode::InternalServerError, "Internal Server Error")
            }
        }
    }

    async fn dispatch(&self, request: Request, key: &ResourceKey) -> Result<Response, ProxyError> {
        let method = request.method().clone();
        let response = match method {
            Method::Get => match self.read(key).await {
                ReadOutcome::Found(data) => Response::new(StatusCode::Ok)
                    .header("Content-Type", IMAGE_CONTENT_TYPE)
                    .body(data),
                ReadOutcome::NotFoundMiss(_) | ReadOutcome::NotFoundError(_) => {
                    Response::text(StatusCode::NotFound, "Not Found")
                }
            },
            Method::Put => {
                self.write(key, request.into_body()).await?;
                Response::text(StatusCode::Created, "Created")
            }
            Method::Delete => match self.delete(key).await {
                Removal::Deleted => Response::text(StatusCode::Ok, "Deleted"),
                Removal::Missing | Removal::Failed(_) => {
                    Response::text(StatusCode::NotFound, "Not Found")
                }
            },
            _ => Response::text(StatusCode::MethodNotAllowed, "Method Not Allowed"),
        };
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::store::DiskStore;

    #[derive(Default)]
    struct MemoryStore {
        entries: Mutex<HashMap<String, Bytes>>,
        calls: AtomicUsize,
        fail_writes: bool,
        fail_reads: bool,
    }

    impl MemoryStore {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn contains(&self, key: &str) -> bool {
            self.entries.lock().unwrap().contains_key(key)
        }
    }

    #[async_trait]
    impl ResourceStore for MemoryStore {
        async fn load(&self, key: &ResourceKey) -> io::Result<Option<Bytes>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_reads {
                return Err(io::Error::other("disk on fire"));
            }
            Ok(self.entries.lock().unwrap().get(key.as_str()).cloned())
        }

        async fn save(&self, key: &ResourceKey, data: Bytes) -> io::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_writes {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"));
            }
            self.entries.lock().unwrap().insert(key.to_string(), data);
            Ok(())
        }

        async fn remove(&self, key: &ResourceKey) -> Removal {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.entries.lock().unwrap().remove(key.as_str()) {
                Some(_) => Removal::Deleted,
                None => Removal::Missing,
            }
        }
    }

    struct FakeOrigin {
        body: Option<&'static [u8]>,
        calls: AtomicUsize,
    }

    impl FakeOrigin {
        fn serving(body: &'static [u8]) -> Self {
            Self {
                body: Some(body),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                body: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Upstream for FakeOrigin {
        async fn fetch(&self, key: &ResourceKey) -> Result<Bytes, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.body.map(Bytes::from_static).ok_or(UpstreamError::Status {
                url: format!("fake://{key}"),
                status: 404,
            })
        }
    }

    fn request(method: &str, path: &str, body: &'static [u8]) -> Request {
        let raw = format!("{method} {path} HTTP/1.1\r\nHost: test\r\n\r\n");
        let (req, _) = Request::parse(raw.as_bytes()).unwrap();
        req.with_body(Bytes::from_static(body))
    }

    fn key(k: &str) -> ResourceKey {
        key::validate(&format!("/{k}")).unwrap()
    }

    #[tokio::test]
    async fn write_then_read_skips_upstream() {
        let proxy = CacheProxy::new(MemoryStore::default(), FakeOrigin::failing());

        proxy.write(&key("201"), Bytes::from_static(b"made")).await.unwrap();

        match proxy.read(&key("201")).await {
            ReadOutcome::Found(data) => assert_eq!(data, "made"),
            other => panic!("expected hit, got {other:?}"),
        }
        assert_eq!(proxy.upstream().calls(), 0);
    }

    #[tokio::test]
    async fn miss_with_failing_upstream_is_not_found_and_stores_nothing() {
        let proxy = CacheProxy::new(MemoryStore::default(), FakeOrigin::failing());

        let outcome = proxy.read(&key("599")).await;

        assert!(matches!(outcome, ReadOutcome::NotFoundMiss(_)));
        assert!(!proxy.store().contains("599"));
        assert_eq!(proxy.upstream().calls(), 1);
    }

    #[tokio::test]
    async fn miss_fills_cache_once() {
        let proxy = CacheProxy::new(MemoryStore::default(), FakeOrigin::serving(b"cat"));

        assert!(proxy.read(&key("200")).await.is_found());
        assert!(proxy.store().contains("200"));
        assert!(proxy.read(&key("200")).await.is_found());

        assert_eq!(proxy.upstream().calls(), 1);
    }

    #[tokio::test]
    async fn fetched_bytes_that_cannot_be_cached_are_not_found() {
        let store = MemoryStore {
            fail_writes: true,
            ..MemoryStore::default()
        };
        let proxy = CacheProxy::new(store, FakeOrigin::serving(b"cat"));

        assert!(matches!(
            proxy.read(&key("200")).await,
            ReadOutcome::NotFoundError(_)
        ));

        let response = proxy.handle(request("GET", "/200", b"")).await;
        assert_eq!(response.status(), StatusCode::NotFound);
        assert_eq!(response.body_bytes(), "Not Found");
        assert_eq!(proxy.upstream().calls(), 2);
    }

    #[tokio::test]
    async fn missing_cache_root_turns_a_fetched_miss_into_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path().join("gone"));
        let proxy = CacheProxy::new(store, FakeOrigin::serving(b"cat"));

        let response = proxy.handle(request("GET", "/200", b"")).await;

        assert_eq!(response.status(), StatusCode::NotFound);
        assert_eq!(proxy.upstream().calls(), 1);
    }

    #[tokio::test]
    async fn delete_that_fails_on_disk_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("418.jpg")).unwrap();
        let proxy = CacheProxy::new(DiskStore::new(dir.path()), FakeOrigin::failing());

        let response = proxy.handle(request("DELETE", "/418", b"")).await;

        assert_eq!(response.status(), StatusCode::NotFound);
        assert_eq!(response.body_bytes(), "Not Found");
        assert!(dir.path().join("418.jpg").is_dir());
    }

    #[tokio::test]
    async fn unreadable_cache_falls_back_to_upstream() {
        let store = MemoryStore {
            fail_reads: true,
            ..MemoryStore::default()
        };
        let proxy = CacheProxy::new(store, FakeOrigin::serving(b"cat"));

        assert!(proxy.read(&key("302")).await.is_found());
        assert_eq!(proxy.upstream().calls(), 1);
    }

    #[tokio::test]
    async fn unreadable_cache_and_failing_upstream_is_tagged_as_error() {
        let store = MemoryStore {
            fail_reads: true,
            ..MemoryStore::default()
        };
        let proxy = CacheProxy::new(store, FakeOrigin::failing());

        let outcome = proxy.read(&key("302")).await;
        assert!(matches!(outcome, ReadOutcome::NotFoundError(_)));

        let response = proxy.handle(request("GET", "/302", b"")).await;
        assert_eq!(response.status(), StatusCode::NotFound);
    }

    #[tokio::test]
    async fn get_hit_is_served_as_jpeg() {
        let proxy = CacheProxy::new(MemoryStore::default(), FakeOrigin::serving(b"\xFF\xD8"));

        let response = proxy.handle(request("GET", "/200", b"")).await;

        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(response.headers().get("content-type"), Some(IMAGE_CONTENT_TYPE));
        assert_eq!(response.body_bytes().as_ref(), b"\xFF\xD8");
    }

    #[tokio::test]
    async fn put_failure_is_internal_error() {
        let store = MemoryStore {
            fail_writes: true,
            ..MemoryStore::default()
        };
        let proxy = CacheProxy::new(store, FakeOrigin::failing());

        let response = proxy.handle(request("PUT", "/500", b"x")).await;

        assert_eq!(response.status(), StatusCode::InternalServerError);
        assert_eq!(response.body_bytes(), "Internal Server Error");
    }

    #[tokio::test]
    async fn invalid_keys_never_reach_store_or_upstream() {
        let proxy = CacheProxy::new(MemoryStore::default(), FakeOrigin::serving(b"cat"));

        for method in ["GET", "PUT", "DELETE", "PATCH"] {
            for path in ["/", "/favicon.ico", "/abc", "/12abc"] {
                let response = proxy.handle(request(method, path, b"body")).await;
                assert_eq!(response.status(), StatusCode::BadRequest, "{method} {path}");
                assert_eq!(response.body_bytes(), "Bad request");
            }
        }

        assert_eq!(proxy.store().calls(), 0);
        assert_eq!(proxy.upstream().calls(), 0);
    }

    #[tokio::test]
    async fn unsupported_methods_are_rejected_without_io() {
        let proxy = CacheProxy::new(MemoryStore::default(), FakeOrigin::serving(b"cat"));

        for method in ["PATCH", "POST", "HEAD", "OPTIONS", "PURGE"] {
            let response = proxy.handle(request(method, "/418", b"")).await;
            assert_eq!(response.status(), StatusCode::MethodNotAllowed, "{method}");
        }

        assert_eq!(proxy.store().calls(), 0);
        assert_eq!(proxy.upstream().calls(), 0);
    }

    #[tokio::test]
    async fn teapot_lifecycle() {
        let proxy = CacheProxy::new(MemoryStore::default(), FakeOrigin::failing());

        let put = proxy.handle(request("PUT", "/418", b"short and stout")).await;
        assert_eq!(put.status(), StatusCode::Created);
        assert_eq!(put.body_bytes(), "Created");

        let get = proxy.handle(request("GET", "/418", b"")).await;
        assert_eq!(get.status(), StatusCode::Ok);
        assert_eq!(get.body_bytes(), "short and stout");

        let delete = proxy.handle(request("DELETE", "/418", b"")).await;
        assert_eq!(delete.status(), StatusCode::Ok);
        assert_eq!(delete.body_bytes(), "Deleted");

        let get = proxy.handle(request("GET", "/418", b"")).await;
        assert_eq!(get.status(), StatusCode::NotFound);

        let delete = proxy.handle(request("DELETE", "/418", b"")).await;
        assert_eq!(delete.status(), StatusCode::NotFound);
        assert_eq!(delete.body_bytes(), "Not Found");

        assert_eq!(proxy.upstream().calls(), 1);
    }
}
