//! HTTP/1.1 request parsing using the [`httparse`] crate.

use bytes::Bytes;
use thiserror::Error;

use super::{Headers, Method};

/// Errors that can occur while parsing an HTTP/1.1 request head.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid Content-Length header: {value:?}")]
    InvalidContentLength { value: String },

    #[error("{name} header is not valid UTF-8")]
    InvalidHeaderValue { name: String },

    #[error("request carries both Transfer-Encoding and Content-Length")]
    AmbiguousFraming,

    #[error("invalid Transfer-Encoding header: {value:?}")]
    InvalidTransferEncoding { value: String },

    #[error("unsupported transfer coding: {coding:?}")]
    UnsupportedTransferCoding { coding: String },
}

/// How the body of a request is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// Exactly this many bytes follow the head.
    Length(usize),
    /// `Transfer-Encoding: chunked`.
    Chunked,
}

// Headers that decide where the body ends. Dropping an unreadable one would
// misframe the body, so they must decode.
const FRAMING_HEADERS: [&str; 2] = ["content-length", "transfer-encoding"];

/// A parsed HTTP/1.1 request.
///
/// [`Request::parse`] reads the head only; the server attaches the body with
/// [`Request::with_body`] once it has arrived, as described by
/// [`Request::body_framing`].
///
/// # Examples
///
/// ```
/// use catcache::http::request::Request;
///
/// let raw = b"GET /404?size=large HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, _offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.path(), "/404");
/// assert_eq!(request.query_string(), Some("size=large"));
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    path: String,
    query: Option<String>,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    body: Bytes,
}

impl Request {
    const MAX_HEADERS: usize = 64;

    /// Parse a request head from `buf`.
    ///
    /// Returns the request (with an empty body) and the offset at which the
    /// body begins in `buf`.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`] if the head is not fully buffered yet.
    /// - [`RequestError::Parse`] if the data is malformed.
    /// - [`RequestError::MissingField`] if method, path or version is absent.
    /// - [`RequestError::InvalidHeaderValue`] if `Content-Length` or
    ///   `Transfer-Encoding` is not UTF-8. Other such headers are dropped.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw = httparse::Request::new(&mut headers);

        let body_offset = match raw.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method = match raw.method {
            Some(token) => match token.parse::<Method>() {
                Ok(method) => method,
                Err(never) => match never {},
            },
            None => return Err(RequestError::MissingField { field: "method" }),
        };

        let target = raw.path.ok_or(RequestError::MissingField { field: "path" })?;
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
            None => (target.to_owned(), None),
        };

        let version = raw
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw.headers.len());
        for header in raw.headers.iter() {
            match std::str::from_utf8(header.value) {
                Ok(value) => header_map.insert(header.name, value),
                Err(_) if is_framing_header(header.name) => {
                    return Err(RequestError::InvalidHeaderValue {
                        name: header.name.to_owned(),
                    });
                }
                Err(_) => {}
            }
        }

        Ok((
            Self {
                method,
                path,
                query,
                version,
                headers: header_map,
                body: Bytes::new(),
            },
            body_offset,
        ))
    }

    /// Attaches the request body.
    #[must_use]
    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request path, without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Consumes the request, returning its body.
    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Returns `true` if the connection should be kept alive after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive; HTTP/1.0 only with an explicit
    /// `Connection: keep-alive`.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }

    /// The declared body length. A missing header means an empty body.
    ///
    /// Repeated headers, or comma-separated lists, are accepted only when
    /// every value is the same number.
    ///
    /// # Errors
    ///
    /// [`RequestError::InvalidContentLength`] if a value is not a number or
    /// the values disagree.
    pub fn content_length(&self) -> Result<usize, RequestError> {
        let mut declared = None;
        for value in self.headers.get_all("content-length") {
            let invalid = || RequestError::InvalidContentLength {
                value: value.to_owned(),
            };
            for item in value.split(',') {
                let item = item.trim();
                if item.is_empty() || !item.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(invalid());
                }
                let len: usize = item.parse().map_err(|_| invalid())?;
                match declared {
                    Some(prev) if prev != len => return Err(invalid()),
                    _ => declared = Some(len),
                }
            }
        }
        Ok(declared.unwrap_or(0))
    }

    /// Works out how the body is delimited.
    ///
    /// # Errors
    ///
    /// - [`RequestError::AmbiguousFraming`] if both framing headers are set.
    /// - [`RequestError::InvalidTransferEncoding`] unless `chunked` is the
    ///   final coding and appears once.
    /// - [`RequestError::UnsupportedTransferCoding`] for any coding besides
    ///   `chunked`.
    /// - Anything [`content_length`](Self::content_length) rejects.
    pub fn body_framing(&self) -> Result<BodyFraming, RequestError> {
        if !self.headers.contains("transfer-encoding") {
            return self.content_length().map(BodyFraming::Length);
        }
        if self.headers.contains("content-length") {
            return Err(RequestError::AmbiguousFraming);
        }

        let codings: Vec<&str> = self
            .headers
            .get_all("transfer-encoding")
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|coding| !coding.is_empty())
            .collect();
        let is_chunked = |coding: &str| coding.eq_ignore_ascii_case("chunked");

        if codings.last().is_none_or(|&last| !is_chunked(last))
            || codings.iter().filter(|&&coding| is_chunked(coding)).count() > 1
        {
            return Err(RequestError::InvalidTransferEncoding {
                value: codings.join(", "),
            });
        }
        if let Some(&other) = codings.iter().find(|&&coding| !is_chunked(coding)) {
            return Err(RequestError::UnsupportedTransferCoding {
                coding: other.to_owned(),
            });
        }
        Ok(BodyFraming::Chunked)
    }
}

fn is_framing_header(name: &str) -> bool {
    FRAMING_HEADERS
        .iter()
        .any(|framing| framing.eq_ignore_ascii_case(name))
}
