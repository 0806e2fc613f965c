//! Chunked transfer-coding support ([RFC 7230 §4.1](https://tools.ietf.org/html/rfc7230#section-4.1)).
//!
//! The reading side decodes chunk framing in place inside the connection's
//! pre-allocated request buffer (the same trick the parser uses for
//! percent-decoding: framing bytes are only ever removed, so the decoded
//! body always fits in the space the encoded one occupied). The writing
//! side is a thin framer over the response's `Vec<u8>` buffer.

use memchr::memchr;

use crate::primitives::{read_hex_usize, write_hex_usize};

/// Parses a chunk-size line (`"1a\r\n"` or `"1a;ext=1\r\n"`), ignoring extensions.
///
/// `line` must not include the trailing CRLF.
#[inline]
pub(crate) fn parse_chunk_size(line: &[u8]) -> Option<usize> {
    let size_part = match memchr(b';', line) {
        Some(pos) => &line[..pos],
        None => line,
    };
    read_hex_usize(size_part)
}

/// Chunk-framed writer over a response body buffer.
///
/// Used by [`Response::body_chunked`](crate::Response::body_chunked) once a
/// response commits to `Transfer-Encoding: chunked` instead of a precomputed
/// `Content-Length`.
pub struct ChunkedWriter<'a>(pub(crate) &'a mut Vec<u8>);

impl ChunkedWriter<'_> {
    /// Appends one chunk. A zero-length write is a no-op (an empty chunk
    /// would be indistinguishable from the terminator).
    #[inline]
    pub fn write_chunk(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        write_hex_usize(data.len(), self.0);
        self.0.extend_from_slice(b"\r\n");
        self.0.extend_from_slice(data);
        self.0.extend_from_slice(b"\r\n");
    }

    #[inline]
    pub(crate) fn finish(&mut self, trailers: &[(&[u8], &[u8])]) {
        self.0.extend_from_slice(b"0\r\n");
        for (name, value) in trailers {
            self.0.extend_from_slice(name);
            self.0.extend_from_slice(b": ");
            self.0.extend_from_slice(value);
            self.0.extend_from_slice(b"\r\n");
        }
        self.0.extend_from_slice(b"\r\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_size_parsing() {
        assert_eq!(parse_chunk_size(b"1a"), Some(26));
        assert_eq!(parse_chunk_size(b"1a;ext=1"), Some(26));
        assert_eq!(parse_chunk_size(b"0"), Some(0));
        assert_eq!(parse_chunk_size(b""), None);
        assert_eq!(parse_chunk_size(b"zz"), None);
    }

    #[test]
    fn writer_basic() {
        let mut buf = Vec::new();
        {
            let mut w = ChunkedWriter(&mut buf);
            w.write_chunk(b"hello");
            w.write_chunk(b"");
            w.write_chunk(b" world");
            w.finish(&[]);
        }
        assert_eq!(buf, b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n");
    }

    #[test]
    fn writer_with_trailers() {
        let mut buf = Vec::new();
        {
            let mut w = ChunkedWriter(&mut buf);
            w.write_chunk(b"x");
            w.finish(&[(b"x-checksum", b"abc")]);
        }
        assert_eq!(buf, b"1\r\nx\r\n0\r\nx-checksum: abc\r\n\r\n");
    }
}
