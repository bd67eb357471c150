//! Async HTTP/1.1 server using Tokio.
//!
//! Accepts TCP connections and hands each complete request to a handler.
//! Connections are persistent unless the client asks otherwise, and each one is
//! served by its own task, so a slow upstream fetch never stalls other clients.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::http::{
    StatusCode,
    chunked::{ChunkedDecoder, ChunkedError},
    request::{BodyFraming, Request, RequestError},
    response::Response,
};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Largest request (head plus body, chunk framing included) buffered before
/// answering `413` (8 MiB).
pub const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

const INITIAL_BUF_SIZE: usize = 4096;

/// A bound listener waiting to [`run`](Server::run).
///
/// # Examples
///
/// ```rust,no_run
/// use catcache::server::Server;
/// use catcache::http::{Response, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Server::bind("127.0.0.1:8080").await?;
///     server.run(|_req| async {
///         Response::text(StatusCode::NotFound, "Not Found")
///     }).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the server to `addr`.
    ///
    /// # Errors
    ///
    /// [`ServerError::Bind`] if the address cannot be bound.
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections forever, dispatching each request to `handler`.
    ///
    /// Every handler invocation runs in its own task. If it panics, the client
    /// gets a `500` and the connection carries on.
    ///
    /// # Errors
    ///
    /// Accept errors are logged and skipped, so this only returns on a listener
    /// failure surfaced as [`ServerError::Io`].
    pub async fn run<H, F>(self, handler: H) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        let handler = Arc::new(handler);
        info!(address = %self.local_addr, "catcache listening");

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let handler = Arc::clone(&handler);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, handler).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

async fn handle_connection<H, F>(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<H>,
) -> Result<(), std::io::Error>
where
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        // Only read when the buffer holds no complete request; a pipelined
        // request may already be waiting.
        let (request, body_offset) = match Request::parse(&buf) {
            Ok(pair) => pair,
            Err(RequestError::Incomplete) => {
                if buf.len() > MAX_REQUEST_SIZE {
                    reject(&mut stream, peer_addr, payload_too_large()).await?;
                    break;
                }
                if stream.read_buf(&mut buf).await? == 0 {
                    debug!(peer = %peer_addr, "connection closed by peer");
                    break;
                }
                continue;
            }
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "malformed request");
                let response = Response::text(StatusCode::BadRequest, "Bad Request");
                reject(&mut stream, peer_addr, response).await?;
                break;
            }
        };

        let framing = match request.body_framing() {
            Ok(framing) => framing,
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "unusable body framing");
                reject(&mut stream, peer_addr, framing_error_response(&e)).await?;
                break;
            }
        };

        let body = match framing {
            BodyFraming::Length(content_length) => {
                let total_needed = body_offset + content_length;
                if total_needed > MAX_REQUEST_SIZE {
                    reject(&mut stream, peer_addr, payload_too_large()).await?;
                    break;
                }
                while buf.len() < total_needed {
                    if stream.read_buf(&mut buf).await? == 0 {
                        debug!(peer = %peer_addr, "connection closed mid-body");
                        return Ok(());
                    }
                }
                buf.split_to(total_needed).freeze().slice(body_offset..)
            }
            BodyFraming::Chunked => {
                let mut decoder = ChunkedDecoder::new(MAX_REQUEST_SIZE);
                let consumed = loop {
                    match decoder.decode(&buf[body_offset..]) {
                        Ok(Some(consumed)) => break Some(consumed),
                        Ok(None) if buf.len() > MAX_REQUEST_SIZE => break None,
                        Ok(None) => {
                            if stream.read_buf(&mut buf).await? == 0 {
                                debug!(peer = %peer_addr, "connection closed mid-body");
                                return Ok(());
                            }
                        }
                        Err(ChunkedError::TooLarge { .. }) => break None,
                        Err(e) => {
                            warn!(peer = %peer_addr, error = %e, "malformed chunked body");
                            let response = Response::text(StatusCode::BadRequest, "Bad Request");
                            reject(&mut stream, peer_addr, response).await?;
                            return Ok(());
                        }
                    }
                };
                let Some(consumed) = consumed else {
                    reject(&mut stream, peer_addr, payload_too_large()).await?;
                    break;
                };
                let _ = buf.split_to(body_offset + consumed);
                decoder.into_body()
            }
        };

        let request = request.with_body(body);
        let keep_alive = request.is_keep_alive();

        let response = dispatch(&handler, request, peer_addr)
            .await
            .keep_alive(keep_alive);
        stream.write_all(&response.into_bytes()).await?;
        stream.flush().await?;

        if !keep_alive {
            debug!(peer = %peer_addr, "Connection: close, shutting down");
            break;
        }
    }

    Ok(())
}

async fn dispatch<H, F>(handler: &Arc<H>, request: Request, peer_addr: SocketAddr) -> Response
where
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.path().to_owned();

    let response = match tokio::spawn(handler(request)).await {
        Ok(response) => response,
        Err(e) => {
            error!(
                peer = %peer_addr,
                method = %method,
                path = %path,
                error = %e,
                "handler failed"
            );
            Response::text(StatusCode::InternalServerError, "Internal Server Error")
        }
    };

    info!(
        peer = %peer_addr,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed = ?start.elapsed(),
        "request served"
    );
    response
}

fn payload_too_large() -> Response {
    Response::text(StatusCode::PayloadTooLarge, "Payload Too Large")
}

fn framing_error_response(e: &RequestError) -> Response {
    match e {
        RequestError::UnsupportedTransferCoding { .. } => {
            Response::text(StatusCode::NotImplemented, "Not Implemented")
        }
        _ => Response::text(StatusCode::BadRequest, "Bad Request"),
    }
}

// Writes a final response and marks the connection for closing.
async fn reject(
    stream: &mut TcpStream,
    peer_addr: SocketAddr,
    response: Response,
) -> Result<(), std::io::Error> {
    debug!(peer = %peer_addr, status = response.status().as_u16(), "rejecting request");
    let response = response.keep_alive(false);
    stream.write_all(&response.into_bytes()).await?;
    stream.flush().await
}
