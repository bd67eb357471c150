//! Incremental decoder for `Transfer-Encoding: chunked` request bodies.
//!
//! The server feeds it the bytes after the request head each time more data
//! arrives. Decoding resumes where the previous call stopped, so a body that
//! trickles in is scanned once.

use bytes::{Bytes, BytesMut};
use thiserror::Error;

/// Errors raised while decoding a chunked body.
#[derive(Debug, Error)]
pub enum ChunkedError {
    #[error("invalid chunk size line")]
    InvalidSize,

    #[error("chunk data not followed by CRLF")]
    MissingDelimiter,

    #[error("chunked body exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Size,
    Data { remaining: u64 },
    DataEnd,
    Trailer,
    Done,
}

/// Reassembles a chunked body.
///
/// # Examples
///
/// ```
/// use catcache::http::chunked::ChunkedDecoder;
///
/// let mut decoder = ChunkedDecoder::new(1024);
/// assert_eq!(decoder.decode(b"4\r\nmeow\r\n").unwrap(), None);
///
/// let wire = b"4\r\nmeow\r\n0\r\n\r\nGET /";
/// let consumed = decoder.decode(wire).unwrap().unwrap();
/// assert_eq!(&wire[consumed..], b"GET /");
/// assert_eq!(decoder.into_body(), "meow");
/// ```
#[derive(Debug)]
pub struct ChunkedDecoder {
    state: State,
    // Offset into the encoded input already consumed.
    pos: usize,
    body: BytesMut,
    limit: usize,
}

impl ChunkedDecoder {
    /// Creates a decoder that refuses bodies longer than `limit` bytes.
    pub fn new(limit: usize) -> Self {
        Self {
            state: State::Size,
            pos: 0,
            body: BytesMut::new(),
            limit,
        }
    }

    /// Decodes as much of `encoded` as possible.
    ///
    /// `encoded` must start at the first chunk and grow between calls without
    /// its prefix changing. Returns `Ok(None)` while the terminating chunk and
    /// trailer section have not arrived yet, and `Ok(Some(n))` once they have,
    /// where `n` is the encoded length. Bytes past `n` belong to the next
    /// request.
    ///
    /// # Errors
    ///
    /// [`ChunkedError::InvalidSize`] or [`ChunkedError::MissingDelimiter`] for
    /// malformed framing, [`ChunkedError::TooLarge`] once the decoded body
    /// would pass the limit.
    pub fn decode(&mut self, encoded: &[u8]) -> Result<Option<usize>, ChunkedError> {
        loop {
            let rest = &encoded[self.pos..];
            match self.state {
                State::Size => match httparse::parse_chunk_size(rest) {
                    Ok(httparse::Status::Complete((used, 0))) => {
                        self.pos += used;
                        self.state = State::Trailer;
                    }
                    Ok(httparse::Status::Complete((used, size))) => {
                        let fits = usize::try_from(size)
                            .ok()
                            .and_then(|size| self.body.len().checked_add(size))
                            .is_some_and(|total| total <= self.limit);
                        if !fits {
                            return Err(ChunkedError::TooLarge { limit: self.limit });
                        }
                        self.pos += used;
                        self.state = State::Data { remaining: size };
                    }
                    Ok(httparse::Status::Partial) => return Ok(None),
                    Err(_) => return Err(ChunkedError::InvalidSize),
                },
                State::Data { remaining } => {
                    // `remaining` fits in usize: it was bounded by the limit.
                    let take = rest.len().min(remaining as usize);
                    self.body.extend_from_slice(&rest[..take]);
                    self.pos += take;
                    let remaining = remaining - take as u64;
                    if remaining > 0 {
                        self.state = State::Data { remaining };
                        return Ok(None);
                    }
                    self.state = State::DataEnd;
                }
                State::DataEnd => {
                    if rest.len() < 2 {
                        return Ok(None);
                    }
                    if &rest[..2] != b"\r\n" {
                        return Err(ChunkedError::MissingDelimiter);
                    }
                    self.pos += 2;
                    self.state = State::Size;
                }
                // Trailer fields are read past and discarded.
                State::Trailer => match rest.windows(2).position(|w| w == b"\r\n") {
                    Some(0) => {
                        self.pos += 2;
                        self.state = State::Done;
                    }
                    Some(end) => self.pos += end + 2,
                    None => return Ok(None),
                },
                State::Done => return Ok(Some(self.pos)),
            }
        }
    }

    /// The decoded body. Only meaningful once [`decode`](Self::decode) has
    /// returned `Some`.
    pub fn into_body(self) -> Bytes {
        self.body.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(wire: &[u8]) -> Result<(Bytes, usize), ChunkedError> {
        let mut decoder = ChunkedDecoder::new(1024);
        let consumed = decoder.decode(wire)?.expect("complete body");
        Ok((decoder.into_body(), consumed))
    }

    #[test]
    fn single_and_multiple_chunks() {
        let (body, used) = decode_all(b"5\r\nhello\r\n0\r\n\r\n").unwrap();
        assert_eq!(body, "hello");
        assert_eq!(used, 15);

        let (body, _) = decode_all(b"3\r\nabc\r\nA\r\n0123456789\r\n0\r\n\r\n").unwrap();
        assert_eq!(body, "abc0123456789");
    }

    #[test]
    fn empty_body() {
        let (body, used) = decode_all(b"0\r\n\r\n").unwrap();
        assert!(body.is_empty());
        assert_eq!(used, 5);
    }

    #[test]
    fn extensions_and_trailers_are_skipped() {
        let wire = b"4;name=value\r\nmeow\r\n0\r\nX-Checksum: abc\r\n\r\nnext";
        let (body, used) = decode_all(wire).unwrap();
        assert_eq!(body, "meow");
        assert_eq!(&wire[used..], b"next");
    }

    #[test]
    fn resumes_across_partial_input() {
        let wire = b"4\r\nmeow\r\n3\r\npur\r\n0\r\n\r\n";
        let mut decoder = ChunkedDecoder::new(1024);
        for end in 0..wire.len() {
            assert_eq!(decoder.decode(&wire[..end]).unwrap(), None, "at {end}");
        }
        assert_eq!(decoder.decode(wire).unwrap(), Some(wire.len()));
        assert_eq!(decoder.into_body(), "meowpur");
    }

    #[test]
    fn malformed_framing() {
        assert!(matches!(
            decode_all(b"zz\r\nhello\r\n0\r\n\r\n"),
            Err(ChunkedError::InvalidSize)
        ));
        assert!(matches!(
            decode_all(b"2\r\nhello\r\n0\r\n\r\n"),
            Err(ChunkedError::MissingDelimiter)
        ));
    }

    #[test]
    fn limit_applies_to_declared_sizes() {
        let mut decoder = ChunkedDecoder::new(4);
        assert!(matches!(
            decoder.decode(b"5\r\n"),
            Err(ChunkedError::TooLarge { limit: 4 })
        ));

        let mut decoder = ChunkedDecoder::new(4);
        assert!(matches!(
            decoder.decode(b"3\r\nabc\r\n2\r\n"),
            Err(ChunkedError::TooLarge { limit: 4 })
        ));
    }
}
