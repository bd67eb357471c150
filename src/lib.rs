//! # catcache
//!
//! A read-through disk cache in front of an HTTP image origin. `GET /<code>`
//! serves `<cache>/<code>.jpg`, fetching it from the origin the first time;
//! `PUT` and `DELETE` manage entries directly.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use catcache::proxy::CacheProxy;
//! use catcache::server::Server;
//! use catcache::store::DiskStore;
//! use catcache::upstream::{DEFAULT_ORIGIN, HttpUpstream};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = DiskStore::new("./cache");
//!     store.ensure_root().await?;
//!     let proxy = Arc::new(CacheProxy::new(store, HttpUpstream::new(DEFAULT_ORIGIN, None)?));
//!
//!     let server = Server::bind("127.0.0.1:8080").await?;
//!     server
//!         .run(move |req| {
//!             let proxy = Arc::clone(&proxy);
//!             async move { proxy.handle(req).await }
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod http;
pub mod key;
pub mod proxy;
pub mod server;
pub mod store;
pub mod upstream;

pub use config::Config;
pub use http::{Method, Request, Response, StatusCode};
pub use proxy::CacheProxy;
pub use server::{Server, ServerError};
