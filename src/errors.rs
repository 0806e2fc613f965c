use crate::{query, Version};
use std::{error, fmt, io};

#[derive(Debug, PartialEq)]
pub(crate) enum ErrorKind {
    InvalidMethod,

    InvalidUrl,
    #[allow(dead_code)]
    Query(query::Error),

    InvalidVersion,
    UnsupportedVersion,

    InvalidHeader,
    TooManyHeaders,
    InvalidContentLength,
    InvalidConnection,

    BodyTooLarge,
    #[allow(dead_code)]
    BodyMismatch {
        expected: usize,
        available: usize,
    },
    #[allow(dead_code)]
    UnexpectedBody(usize),

    InvalidChunkSize,
    ChunkedBodyTooLarge,
    InvalidTrailer,

    ServiceUnavailable,
    Io(IoError),
}

macro_rules! http_errors {
    ($($name:ident: $status_code:expr, $len:literal => $json:literal; )*) => {
        pub(crate) const fn as_http(
            &self,
            version: Version,
            json: bool,
        ) -> &'static [u8] {
            match (json, self, version) { $(
                (true, Self::$name { .. }, Version::Http11) => concat!(
                    "HTTP/1.1 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: ", $len, "\r\n",
                    "content-type: application/json\r\n",
                    "\r\n",
                    $json
                ),
                (false, Self::$name { .. }, Version::Http11) => concat!(
                    "HTTP/1.1 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: 0\r\n\r\n",
                ),
                (true, Self::$name { .. }, Version::Http10) => concat!(
                    "HTTP/1.0 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: ", $len, "\r\n",
                    "content-type: application/json\r\n",
                    "\r\n",
                    $json
                ),
                (false, Self::$name { .. }, Version::Http10) => concat!(
                    "HTTP/1.0 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: 0\r\n\r\n",
                ),
                (_, Self::$name { .. }, Version::Http09) => concat!(
                    "ERROR: ", stringify!($status_code)
                ),
            )* }.as_bytes()
        }
    };
}

impl ErrorKind {
    http_errors! {
        InvalidMethod: "400 Bad Request", "55"
            => r#"{"error":"Invalid HTTP method","code":"INVALID_METHOD"}"#;

        InvalidUrl: "400 Bad Request", "51"
            => r#"{"error":"Invalid URL format","code":"INVALID_URL"}"#;
        Query: "400 Bad Request", "55"
            => r#"{"error":"Invalid query string","code":"INVALID_QUERY"}"#;

        InvalidVersion: "400 Bad Request", "57"
            => r#"{"error":"Invalid HTTP version","code":"INVALID_VERSION"}"#;
        UnsupportedVersion: "505 HTTP Version Not Supported", "67"
            => r#"{"error":"HTTP version not supported","code":"UNSUPPORTED_VERSION"}"#;

        InvalidHeader: "400 Bad Request", "57"
            => r#"{"error":"Invalid header format","code":"INVALID_HEADER"}"#;
        TooManyHeaders: "431 Request Header Fields Too Large", "54"
            => r#"{"error":"Too many headers","code":"TOO_MANY_HEADERS"}"#;
        InvalidContentLength: "400 Bad Request", "66"
            => r#"{"error":"Invalid Content-Length","code":"INVALID_CONTENT_LENGTH"}"#;
        InvalidConnection: "400 Bad Request", "65"
            => r#"{"error":"Invalid Connection header","code":"INVALID_CONNECTION"}"#;

        BodyTooLarge: "413 Payload Too Large", "58"
            => r#"{"error":"Request body too large","code":"BODY_TOO_LARGE"}"#;
        BodyMismatch: "400 Bad Request", "55"
            => r#"{"error":"Body length mismatch","code":"BODY_MISMATCH"}"#;
        UnexpectedBody: "400 Bad Request", "60"
            => r#"{"error":"Unexpected request body","code":"UNEXPECTED_BODY"}"#;

        InvalidChunkSize: "400 Bad Request", "59"
            => r#"{"error":"Invalid chunk size line","code":"INVALID_CHUNK_SIZE"}"#;
        ChunkedBodyTooLarge: "413 Payload Too Large", "66"
            => r#"{"error":"Chunked request body too large","code":"CHUNKED_BODY_TOO_LARGE"}"#;
        InvalidTrailer: "400 Bad Request", "54"
            => r#"{"error":"Invalid trailer field","code":"INVALID_TRAILER"}"#;

        ServiceUnavailable: "503 Service Unavailable", "72"
            => r#"{"error":"Service temporarily unavailable","code":"SERVICE_UNAVAILABLE"}"#;
        Io: "503 Service Unavailable", "48"
            => r#"{"error":"I/O error occurred","code":"IO_ERROR"}"#;
    }
}

impl error::Error for ErrorKind {}
impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<query::Error> for ErrorKind {
    fn from(err: query::Error) -> Self {
        ErrorKind::Query(err)
    }
}
impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        ErrorKind::Io(IoError(err))
    }
}

#[derive(Debug)]
pub(crate) struct IoError(pub(crate) io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

/// Errors returned by [`HostClient`](crate::client::HostClient) and
/// [`Client`](crate::client::Client).
///
/// Mirrors [`ErrorKind`] in spirit (a closed enum with a lightweight
/// `Display`), but covers failure modes that only make sense on the dialing
/// side: pool exhaustion, redirect policy violations, and connection reuse
/// races.
#[derive(Debug)]
pub enum ClientErrorKind {
    /// The host's connection pool was full and
    /// [`max_conn_wait_timeout`](crate::limits::HostClientLimits::max_conn_wait_timeout)
    /// elapsed (or was unset) before a connection freed up.
    NoFreeConns,
    /// The request exceeded [`ConnLimits`](crate::limits::HostClientLimits)'
    /// read or write timeout.
    Timeout,
    /// The TLS handshake did not complete before the connection's timeout.
    TlsHandshakeTimeout,
    /// The peer closed the connection before a full response was read.
    ConnectionClosed,
    /// A redirect response pointed at a different scheme than the original
    /// request (e.g. `https://` -> `http://`); not followed automatically.
    RedirectToDifferentScheme,
    /// The number of redirects for a single logical request exceeded the
    /// configured maximum.
    TooManyRedirects,
    /// A caller-supplied body stream panicked while being written to the wire.
    BodyStreamWritePanic,
    /// The request URI was not a well-formed absolute `http://`/`https://` URI.
    InvalidUri,
    /// Transport-level I/O failure (connect, read, or write).
    Io(IoError),
}

impl error::Error for ClientErrorKind {}
impl fmt::Display for ClientErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::NoFreeConns => "no free connections in host pool",
            Self::Timeout => "request timed out",
            Self::TlsHandshakeTimeout => "TLS handshake timed out",
            Self::ConnectionClosed => "connection closed by peer",
            Self::RedirectToDifferentScheme => "redirect changed scheme",
            Self::TooManyRedirects => "too many redirects",
            Self::BodyStreamWritePanic => "body stream panicked while writing",
            Self::InvalidUri => "invalid request uri",
            Self::Io(err) => return write!(f, "io error: {}", err.0),
        };
        write!(f, "{}", message)
    }
}

impl From<io::Error> for ClientErrorKind {
    fn from(err: io::Error) -> Self {
        ClientErrorKind::Io(IoError(err))
    }
}
