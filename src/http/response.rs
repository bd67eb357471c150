//! HTTP/1.1 response builder and serializer.

use bytes::{BufMut, Bytes, BytesMut};

use super::{Headers, StatusCode};

/// An HTTP/1.1 response, ready to be serialized and sent.
///
/// # Examples
///
/// ```
/// use catcache::http::{Response, StatusCode};
///
/// let bytes = Response::text(StatusCode::Created, "Created").into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 201 Created\r\n"));
/// assert!(text.ends_with("\r\n\r\nCreated"));
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
    keep_alive: bool,
}

impl Response {
    /// Creates a response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
            keep_alive: true,
        }
    }

    /// Plain-text response, the shape of every non-image reply the proxy sends.
    pub fn text(status: StatusCode, message: &'static str) -> Self {
        Self::new(status)
            .header("Content-Type", "text/plain")
            .body(Bytes::from_static(message.as_bytes()))
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Controls whether `Connection: keep-alive` or `Connection: close` is written.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Serializes the response in HTTP/1.1 wire format.
    ///
    /// `Connection` and `Content-Length` are always written here; callers
    /// should not set them.
    pub fn into_bytes(self) -> BytesMut {
        let content_length = self.body.len();
        let connection = if self.keep_alive { "keep-alive" } else { "close" };

        let mut buf = BytesMut::with_capacity(128 + self.headers.len() * 48 + content_length);

        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );
        for (name, value) in self.headers.iter() {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }
        buf.put(format!("Connection: {connection}\r\n").as_bytes());
        buf.put(format!("Content-Length: {content_length}\r\n\r\n").as_bytes());
        buf.put(self.body);

        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_string(bytes: BytesMut) -> String {
        String::from_utf8_lossy(&bytes).into_owned()
    }

    #[test]
    fn text_response() {
        let s = to_string(Response::text(StatusCode::NotFound, "Not Found").into_bytes());
        assert!(s.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(s.contains("Content-Type: text/plain\r\n"));
        assert!(s.contains("Content-Length: 9\r\n"));
        assert!(s.ends_with("\r\n\r\nNot Found"));
    }

    #[test]
    fn binary_body_is_written_verbatim() {
        let jpeg = [0xFF, 0xD8, 0xFF, 0xE0, 0x00];
        let bytes = Response::new(StatusCode::Ok)
            .header("Content-Type", "image/jpeg")
            .body(Bytes::copy_from_slice(&jpeg))
            .into_bytes();
        assert!(bytes.ends_with(&jpeg));
        assert!(to_string(bytes).contains("Content-Length: 5\r\n"));
    }

    #[test]
    fn empty_body() {
        let s = to_string(Response::new(StatusCode::Ok).into_bytes());
        assert!(s.contains("Content-Length: 0\r\n"));
        assert!(!s.contains("Content-Type"));
    }

    #[test]
    fn connection_close() {
        let s = to_string(Response::new(StatusCode::Ok).keep_alive(false).into_bytes());
        assert!(s.contains("Connection: close\r\n"));
    }
}
