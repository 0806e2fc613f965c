use crate::{
    ctx::{HandlerCtx, HijackFn, RequestCtx, StealState},
    errors::ErrorKind,
    http::{
        request::{Parser, Request},
        response::Response,
        types::{StatusCode, Version},
    },
    limits::{ConnLimits, Http09Limits, ReqLimits, RespLimits, ServerLimits},
    server::server_impl::{AllLimits, Handler},
    Handled,
};
use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Instant};
use tokio::{io::AsyncWriteExt, net::TcpStream, time::sleep};

pub(crate) struct HttpConnection<H: Handler<S>, S: ConnectionData> {
    handler: Arc<H>,
    connection_data: S,

    connection: Connection,
    pub(crate) ctx: RequestCtx,
    pub(crate) parser: Parser,
    pub(crate) request: Request,
    pub(crate) response: Response,

    pub(crate) server_limits: ServerLimits,
    pub(crate) conn_limits: ConnLimits,
    pub(crate) http_09_limits: Option<Http09Limits>,
    pub(crate) req_limits: ReqLimits,
    pub(crate) resp_limits: RespLimits,
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    pub(crate) fn new(handler: Arc<H>, limits: AllLimits) -> Self {
        Self {
            handler,
            connection_data: S::new(),

            connection: Connection::new(),
            ctx: RequestCtx::new(),
            parser: Parser::new(&limits.3),
            request: Request::new(&limits.3),
            response: Response::new(&limits.4),

            server_limits: limits.0,
            conn_limits: limits.1,
            http_09_limits: limits.2,
            req_limits: limits.3,
            resp_limits: limits.4,
        }
    }
}

/// Outcome of serving one request off an already-parsed head, used by
/// [`HttpConnection::impl_run`] to decide what the loop does next.
enum Step {
    /// Wrote a normal response; keep serving the connection.
    Continue,
    /// The handler hijacked the raw connection: here's the callback and the
    /// leftover bytes it needs handed back, ready for the caller (which
    /// still owns the stream) to spawn.
    Hijacked(HijackFn, Vec<u8>),
    /// Either the response said not to keep the connection alive, or the
    /// peer closed before sending a full request.
    Done,
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    pub(crate) async fn run(
        &mut self,
        mut stream: TcpStream,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
    ) -> Result<(), io::Error> {
        self.ctx.begin_connection(client_addr, server_addr);

        match self.impl_run(&mut stream).await {
            Ok(None) => Ok(()),
            Ok(Some((hijack, leftover))) => {
                tokio::spawn(hijack(stream, leftover));
                Ok(())
            }
            Err(ErrorKind::Io(e)) => Err(e.0),
            Err(error) => {
                self.conn_limits
                    .send_error(
                        &mut stream,
                        error,
                        self.request.version(),
                        self.server_limits.json_errors,
                    )
                    .await
            }
        }
    }

    /// Reads more data off `stream` until the buffered head is complete, the
    /// buffer fills up (letting the real parser produce the authoritative
    /// error), or the peer closes the connection.
    ///
    /// Returns `false` only for a clean close with nothing at all buffered —
    /// the ordinary end of a keep-alive connection. Any other outcome
    /// (including a truncated head) returns `true` so the caller proceeds to
    /// `parse_head`, which will raise its own error for malformed input.
    #[inline]
    async fn ensure_head(&mut self, stream: &mut TcpStream) -> Result<bool, ErrorKind> {
        while !self.parser.has_complete_head() && !self.parser.is_full() {
            if self
                .parser
                .fill_buffer(stream, self.conn_limits.socket_read_timeout)
                .await?
                == 0
            {
                return Ok(self.parser.has_pending());
            }
        }
        Ok(true)
    }

    /// Same idea as [`Self::ensure_head`] but for the body, once its framing
    /// (`Content-Length` or chunked) is known.
    #[inline]
    async fn ensure_body(
        &mut self,
        stream: &mut TcpStream,
        content_length: Option<usize>,
        chunked: bool,
    ) -> Result<(), ErrorKind> {
        while !self.parser.has_complete_body(content_length, chunked) && !self.parser.is_full() {
            if self
                .parser
                .fill_buffer(stream, self.conn_limits.socket_read_timeout)
                .await?
                == 0
            {
                break;
            }
        }
        Ok(())
    }

    /// Writes the `100 Continue` interim response, or `417 Expectation
    /// Failed` if the handler declined, for a request carrying
    /// `Expect: 100-continue`. Only meaningful for HTTP/1.1; older versions
    /// never send the header in the first place per RFC 7230 §5.1.1.
    ///
    /// Returns `true` if the caller should keep going and read the body,
    /// `false` if the expectation was rejected and the connection must close
    /// without reading it (the client is, per spec, not supposed to send it).
    #[inline]
    async fn handle_expect_continue(&mut self, stream: &mut TcpStream) -> Result<bool, ErrorKind> {
        if self.request.version() != Version::Http11 {
            return Ok(true);
        }
        let Some(expect) = self.request.header(b"expect") else {
            return Ok(true);
        };
        if !expect.eq_ignore_ascii_case(b"100-continue") {
            return Ok(true);
        }

        if self.handler.accept_continue(&self.request) {
            self.conn_limits
                .write_bytes(stream, b"HTTP/1.1 100 Continue\r\n\r\n")
                .await?;
            Ok(true)
        } else {
            self.response.version = Version::Http11;
            self.response
                .status(StatusCode::ExpectationFailed)
                .close()
                .body(b"");
            self.conn_limits
                .write_bytes(stream, self.response.buffer())
                .await?;
            Ok(false)
        }
    }

    /// Runs the handler for the request currently sitting fully parsed in
    /// `self.request`/`self.response`, then applies whatever hijack or steal
    /// hand-off it requested. Returns the [`Step`] the caller's loop should
    /// take next.
    #[inline]
    async fn serve_parsed_request(&mut self, stream: &mut TcpStream) -> Result<Step, ErrorKind> {
        self.handler
            .handle(
                &mut self.connection_data,
                &HandlerCtx::new(&self.ctx),
                &self.request,
                &mut self.response,
            )
            .await;

        if let Some(hijack) = self.ctx.take_hijack() {
            self.conn_limits
                .write_bytes(stream, self.response.buffer())
                .await?;
            let leftover = self.parser.take_leftover();
            return Ok(Step::Hijacked(hijack, leftover));
        }

        if let StealState::Stolen(message) = self.ctx.steal_state() {
            self.response.reset(&self.resp_limits);
            self.response.version = Version::Http11;
            self.response
                .status(StatusCode::RequestTimeout)
                .close()
                .body(message);
        }

        self.conn_limits
            .write_bytes(stream, self.response.buffer())
            .await?;

        if !self.response.keep_alive {
            return Ok(Step::Done);
        }
        Ok(Step::Continue)
    }

    #[inline]
    pub(crate) async fn impl_run(
        &mut self,
        stream: &mut TcpStream,
    ) -> Result<Option<(HijackFn, Vec<u8>)>, ErrorKind> {
        self.connection.reset();
        self.connection_data.reset();

        let mut fresh_buffer = true;

        while !self.is_expired()? {
            match fresh_buffer {
                true => self.parser.reset(),
                false => self.parser.compact(),
            }
            fresh_buffer = false;
            self.request.reset();
            self.response.reset(&self.resp_limits);

            if !self.ensure_head(stream).await? {
                break;
            }

            let is_http09 = self.parse_head()?;
            self.response.version = self.request.version();

            if !is_http09 {
                if !self.handle_expect_continue(stream).await? {
                    break;
                }

                let content_length = self.request.content_length();
                let chunked = self.request.is_chunked();
                self.ensure_body(stream, content_length, chunked).await?;
                self.check_body()?;
            }

            match self.serve_parsed_request(stream).await? {
                Step::Hijacked(hijack, leftover) => return Ok(Some((hijack, leftover))),
                Step::Done => break,
                Step::Continue => {}
            }

            self.connection.request_count += 1;
            self.ctx.next_request();

            if !self.parser.has_pending() {
                fresh_buffer = true;
            }
        }

        Ok(None)
    }
}

impl ConnLimits {
    #[inline]
    pub(crate) async fn send_error(
        &self,
        stream: &mut TcpStream,
        error: ErrorKind,
        version: Version,
        json_errors: bool,
    ) -> Result<(), io::Error> {
        self.write_bytes(stream, error.as_http(version, json_errors))
            .await
    }

    #[inline]
    pub(crate) async fn write_bytes(
        &self,
        stream: &mut TcpStream,
        response: &[u8],
    ) -> Result<(), io::Error> {
        tokio::select! {
            biased;

            result = stream.write_all(response) => result,
            _ = sleep(self.socket_write_timeout) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "write timeout"))
            },
        }
    }
}

macro_rules! is_expired {
    ($self:expr, $limits:expr) => {
        Ok(!$self.response.keep_alive
            || $self.connection.request_count >= $limits.max_requests_per_connection
            || $self.connection.created.elapsed() > $limits.connection_lifetime)
    };
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    fn is_expired(&self) -> Result<bool, ErrorKind> {
        match (self.response.version, &self.http_09_limits) {
            (Version::Http09, Some(limits)) => is_expired!(self, limits),
            (Version::Http09, None) => Err(ErrorKind::UnsupportedVersion),
            _ => is_expired!(self, self.conn_limits),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Connection {
    created: Instant,
    request_count: usize,
}

impl Connection {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            created: Instant::now(),
            request_count: 0,
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.created = Instant::now();
        self.request_count = 0;
    }
}

//

/// Managing user session data stored between requests within a single HTTP connection.
///
/// This trait allows you to store arbitrary state (e.g., authentication data,
/// multistep form status, cache, etc.). The state is available across all requests
/// within a single HTTP keep-alive connection.
///
/// # Examples
/// ```no_run
/// use hotwire::ConnectionData;
/// use std::collections::HashMap;
///
/// struct MyConnectionData {
///     user_id: Option<i32>,
///     request_count: usize,
///     cache: HashMap<usize, [u8; 4]>,
/// }
///
/// impl ConnectionData for MyConnectionData {
///     fn new() -> Self {
///         Self {
///             user_id: None,
///             request_count: 0,
///             cache: HashMap::new(),
///         }
///     }
///
///     fn reset(&mut self) {
///         self.user_id = None;
///         self.request_count = 0;
///         self.cache.clear(); // Saving the allocated memory
///     }
/// }
/// ```
///
/// Check out a [real-world example
/// ](https://github.com/AmakeSashaDev/hotwire/blob/main/demos/request_counter.rs)
/// (well, almost)
pub trait ConnectionData: Sync + Send + 'static {
    /// Creates a new instance of user data.
    ///
    /// It is called once at server startup, which avoids runtime allocations.
    fn new() -> Self;

    /// Resets the internal state of the instance to its initial values.
    ///
    /// It is called after the connection is closed. Allows repeated
    /// use of the instance for the following connections. If implemented
    /// correctly, avoids any allocations.
    fn reset(&mut self);
}

impl ConnectionData for () {
    #[inline(always)]
    fn new() -> Self {}

    #[inline(always)]
    fn reset(&mut self) {}
}

/// A trait for filtering TCP connections before HTTP processing.
///
/// # Examples
///
/// Simple IP Blacklist:
/// ```
/// use std::{collections::HashSet, net::{SocketAddr, IpAddr}};
/// use hotwire::{Server, ConnectionFilter, Response, Handled, StatusCode};
///
/// struct MyConnFilter {
///     blacklist: HashSet<IpAddr>
/// }
///
/// impl ConnectionFilter for MyConnFilter {
///     fn filter(
///         &self, client_addr: SocketAddr, _: SocketAddr, err_resp: &mut Response
///     ) -> Result<(), Handled> {
///         if self.blacklist.contains(&client_addr.ip()) {
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("Your IP is permanently banned"))
///         } else {
///             Ok(())
///         }
///     }
/// }
/// ```
/// File-based IP blacklist:
/// ```
/// use std::net::SocketAddr;
/// use hotwire::{Server, ConnectionFilter, Response, Handled, StatusCode};
///
/// # struct DatabaseClient;
/// #
/// # impl DatabaseClient {
/// #     async fn execute(&self, _: &str) -> Option<Vec<&str>> {
/// #         Some(vec!["true"])
/// #     }
/// # }
/// #
/// #
/// struct MyConnFilter {
///     db: DatabaseClient
/// }
///
/// impl ConnectionFilter for MyConnFilter {
///     fn filter(&self, _: SocketAddr, _: SocketAddr, _: &mut Response) -> Result<(), Handled> {
///         Ok(())
///     }
///
///     async fn filter_async(
///         &self,
///         client_addr: SocketAddr,
///         _: SocketAddr,
///         err_resp: &mut Response,
///     ) -> Result<(), Handled> {
///         let request = format!(
///             "SELECT EXISTS (SELECT 1 FROM ip_blacklist WHERE ip_address = '{}')",
///             client_addr.ip()
///         );
///
///         if self.db.execute(&request).await == Some(vec!["false"]) {
///             Ok(()) // IP not found in blacklist
///         } else {
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("IP found in blacklist file"))
///         }
///     }
/// }
/// ```
/// Two-stage filtering with cache:
/// ```
/// use std::{collections::HashSet, sync::RwLock, net::{SocketAddr, IpAddr}};
/// use hotwire::{Server, ConnectionFilter, Response, Handled, StatusCode};
///
/// # struct DatabaseClient;
/// #
/// # impl DatabaseClient {
/// #     async fn execute(&self, _: &str) -> Option<Vec<&str>> {
/// #         Some(vec!["true"])
/// #     }
/// # }
/// #
/// #
/// struct MyConnFilter {
///     cache: RwLock<HashSet<IpAddr>>,
///     db: DatabaseClient,
/// }
///
/// impl ConnectionFilter for MyConnFilter {
///     fn filter(
///         &self, client_addr: SocketAddr, _: SocketAddr, err_resp: &mut Response
///     ) -> Result<(), Handled> {
///         let Ok(guard) = self.cache.read() else {
///             return Err(err_resp.status(StatusCode::InternalServerError)
///                 .body("Internal server error"));
///         };
///
///         if guard.contains(&client_addr.ip()) {
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("Your IP is permanently banned"))
///         } else {
///             Ok(())
///         }
///     }
///
///     async fn filter_async(
///         &self,
///         client_addr: SocketAddr,
///         _: SocketAddr,
///         err_resp: &mut Response,
///     ) -> Result<(), Handled> {
///         let request = format!(
///             "SELECT EXISTS (SELECT 1 FROM ip_blacklist WHERE ip_address = '{}')",
///             client_addr.ip()
///         );
///
///         if self.db.execute(&request).await == Some(vec!["false"]) {
///             Ok(()) // IP not found in blacklist
///         } else {
///             let Ok(mut guard) = self.cache.write() else {
///                 return Err(err_resp.status(StatusCode::InternalServerError)
///                     .body("Internal server error"));
///             };
///             guard.insert(client_addr.ip());
///
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("IP found in blacklist file"))
///         }
///     }
/// }
/// ```
/// # Connection Filter Architecture
/// ```text
///                     [ QUEUE TCP_STREAM ]
///                              ||
/// /----------------------------||----------------------------------\
/// |                            || TCP_STREAM            Tokio Task |
/// |       /=====================/                                  |
/// |       \/                                                       |
/// |   [--------]   Err(Handled)   [----------------------]         |
/// |   [ filter ] ===============> [ Send `error_response`]         |
/// |   [--------]                  [----------------------]         |
/// |       ||                                 /\                    |
/// |       || Ok(())                          ||                    |
/// |       \/                Err(Handled)     ||                    |
/// |   [--------------] ========================/                   |
/// |   [ filter_async ]                             [-----------]   |
/// |   [--------------] ==========================> [  Handler  ]   |
/// |                             Ok(())             [-----------]   |
/// |                                                                |
/// \----------------------------------------------------------------/
/// ```
pub trait ConnectionFilter: Sync + Send + 'static {
    /// Synchronous connection validation.
    ///
    /// Perform fast, in-memory checks here. Expensive operations should be deferred
    /// to [`filter_async`](Self::filter_async).
    ///
    /// Use for:
    /// - IP blacklist/whitelist (in-memory cache)
    /// - Geographic IP restrictions
    /// - Rate limiting counters
    fn filter(
        &self,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
        error_response: &mut Response,
    ) -> Result<(), Handled>;

    /// Asynchronous connection inspection.
    ///
    /// Called after [`filter`](Self::filter) succeeds.Executes asynchronously within
    /// the Tokio runtime.
    ///
    /// Use for:
    /// - Database lookups
    /// - External API calls
    /// - File system operations
    /// - Complex business logic
    /// - Machine learning inference
    fn filter_async(
        &self,
        #[allow(unused_variables)] client_addr: SocketAddr,
        #[allow(unused_variables)] server_addr: SocketAddr,
        #[allow(unused_variables)] error_response: &mut Response,
    ) -> impl Future<Output = Result<(), Handled>> + Send {
        async { Ok(()) }
    }
}

impl ConnectionFilter for () {
    fn filter(&self, _: SocketAddr, _: SocketAddr, _: &mut Response) -> Result<(), Handled> {
        Ok(())
    }
}

//
