//! Per-request context carried alongside a parsed [`Request`](crate::Request).
//!
//! The wire codec (`http::request`, `http::response`) only knows about bytes;
//! addressing and per-request bookkeeping that handlers care about — who
//! connected, from where, which attempt this is, and the hijack/steal
//! hand-offs described on [`HandlerCtx`] — lives here instead, the same
//! separation drawn between `Connection` (keep-alive accounting) and
//! `Request` (wire data).

use crate::Handled;
use std::{
    future::Future,
    net::SocketAddr,
    pin::Pin,
    sync::{Arc, Mutex},
};
use tokio::net::TcpStream;

pub(crate) type HijackFn =
    Box<dyn FnOnce(TcpStream, Vec<u8>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

#[derive(Debug, Clone)]
pub(crate) enum StealState {
    Live,
    Stolen(String),
}

/// Address and identity data for the request currently being served on a
/// connection, plus the hijack/steal hand-off slots [`HandlerCtx`] exposes
/// to the handler.
///
/// One `RequestCtx` is created per [`HttpConnection`](crate::server::connection::HttpConnection)
/// and its addresses are refreshed once per accepted TCP stream; `request_id`
/// increments for every request served on that connection, matching
/// [`Connection::request_count`](crate::server::connection::Connection). The
/// hijack and steal slots are cleared at the start of every request by
/// [`Self::begin_request`] — neither carries over from one request to the
/// next on the same keep-alive connection.
pub(crate) struct RequestCtx {
    pub(crate) client_addr: SocketAddr,
    pub(crate) server_addr: SocketAddr,
    pub(crate) request_id: u64,
    hijack: Mutex<Option<HijackFn>>,
    steal: Arc<Mutex<StealState>>,
}

impl RequestCtx {
    #[inline]
    pub(crate) fn new() -> Self {
        let unspecified: SocketAddr = ([0, 0, 0, 0], 0).into();
        Self {
            client_addr: unspecified,
            server_addr: unspecified,
            request_id: 0,
            hijack: Mutex::new(None),
            steal: Arc::new(Mutex::new(StealState::Live)),
        }
    }

    #[inline]
    pub(crate) fn begin_connection(&mut self, client_addr: SocketAddr, server_addr: SocketAddr) {
        self.client_addr = client_addr;
        self.server_addr = server_addr;
        self.request_id = 0;
        self.begin_request();
    }

    #[inline]
    pub(crate) fn next_request(&mut self) {
        self.request_id += 1;
        self.begin_request();
    }

    /// Resets the per-request hand-off slots. Called once per request (by
    /// [`Self::begin_connection`] for the first one, [`Self::next_request`]
    /// for every one after) so a hijack or steal from a finished request
    /// never leaks into the next one on the same connection.
    #[inline]
    fn begin_request(&mut self) {
        self.hijack = Mutex::new(None);
        self.steal = Arc::new(Mutex::new(StealState::Live));
    }

    /// Takes the hijack callback registered via [`HandlerCtx::hijack`], if
    /// any, for the serve loop to hand the raw connection off to.
    #[inline]
    pub(crate) fn take_hijack(&self) -> Option<HijackFn> {
        self.hijack.lock().unwrap().take()
    }

    /// Current steal state, for the serve loop to check after the handler
    /// future resolves.
    #[inline]
    pub(crate) fn steal_state(&self) -> StealState {
        self.steal.lock().unwrap().clone()
    }
}

/// Handle to a request's steal slot, obtained from [`HandlerCtx::steal_handle`].
///
/// A `StealHandle` can be cloned and moved onto another task — unlike the
/// rest of [`HandlerCtx`], which only lives for the duration of one
/// [`Handler::handle`](crate::Handler::handle) call, this is how an external
/// timeout or cancellation source reaches into a request that's still being
/// handled.
#[derive(Clone)]
pub struct StealHandle(Arc<Mutex<StealState>>);

impl StealHandle {
    /// Marks the request as stolen: the connection will respond with
    /// `408 Request Timeout` and `message` as the body instead of whatever
    /// the handler produces (or was producing), then close. Calling this
    /// more than once keeps the first message.
    #[inline]
    pub fn timeout_error(&self, message: impl Into<String>) {
        let mut state = self.0.lock().unwrap();
        if matches!(*state, StealState::Live) {
            *state = StealState::Stolen(message.into());
        }
    }
}

/// Per-request handle passed to [`Handler::handle`](crate::Handler::handle).
///
/// Carries the connection's addresses and exposes the two hand-off paths a
/// handler can't reach through `Request`/`Response` alone: taking over the
/// raw socket ([`Self::hijack`]) and letting an external timeout source
/// cancel the in-flight response ([`Self::steal_handle`]).
pub struct HandlerCtx<'a> {
    inner: &'a RequestCtx,
}

impl<'a> HandlerCtx<'a> {
    #[inline]
    pub(crate) fn new(inner: &'a RequestCtx) -> Self {
        Self { inner }
    }

    /// Address of the connected client.
    #[inline]
    pub fn client_addr(&self) -> SocketAddr {
        self.inner.client_addr
    }

    /// Local address the connection was accepted on.
    #[inline]
    pub fn server_addr(&self) -> SocketAddr {
        self.inner.server_addr
    }

    /// Index of the current request on this keep-alive connection, starting
    /// at `0`.
    #[inline]
    pub fn request_id(&self) -> u64 {
        self.inner.request_id
    }

    /// Hands the raw connection off to `f`, which runs on its own task once
    /// any response already written is flushed. The server never touches the
    /// connection again afterward.
    ///
    /// `f` receives the `TcpStream` and any bytes already read off the wire
    /// past the current request (e.g. the start of a WebSocket frame sent
    /// immediately after the upgrade request, or a pipelined request that
    /// arrived in the same read) — it must treat those as already consumed
    /// from the socket.
    ///
    /// Returns the [`Handled`] value the handler should return.
    #[inline]
    pub fn hijack<Func, Fut>(&self, f: Func) -> Handled
    where
        Func: FnOnce(TcpStream, Vec<u8>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        *self.inner.hijack.lock().unwrap() = Some(Box::new(move |stream, leftover| {
            Box::pin(f(stream, leftover))
        }));
        Handled::mark()
    }

    /// A cloneable, `'static` handle another task can use to steal this
    /// request out from under its handler. See [`StealHandle::timeout_error`].
    #[inline]
    pub fn steal_handle(&self) -> StealHandle {
        StealHandle(Arc::clone(&self.inner.steal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_increments_per_request() {
        let mut ctx = RequestCtx::new();
        ctx.begin_connection(([127, 0, 0, 1], 4000).into(), ([127, 0, 0, 1], 8080).into());
        assert_eq!(ctx.request_id, 0);
        ctx.next_request();
        ctx.next_request();
        assert_eq!(ctx.request_id, 2);
    }

    #[test]
    fn new_connection_resets_request_id() {
        let mut ctx = RequestCtx::new();
        ctx.begin_connection(([127, 0, 0, 1], 1).into(), ([127, 0, 0, 1], 2).into());
        ctx.next_request();
        ctx.begin_connection(([127, 0, 0, 1], 3).into(), ([127, 0, 0, 1], 4).into());
        assert_eq!(ctx.request_id, 0);
    }

    #[test]
    fn steal_handle_sets_state() {
        let ctx = RequestCtx::new();
        let handler_ctx = HandlerCtx::new(&ctx);
        assert!(matches!(ctx.steal_state(), StealState::Live));

        handler_ctx.steal_handle().timeout_error("slow backend");
        match ctx.steal_state() {
            StealState::Stolen(msg) => assert_eq!(msg, "slow backend"),
            StealState::Live => panic!("expected Stolen"),
        }
    }

    #[test]
    fn new_request_clears_steal_state() {
        let mut ctx = RequestCtx::new();
        HandlerCtx::new(&ctx).steal_handle().timeout_error("timed out");
        ctx.next_request();
        assert!(matches!(ctx.steal_state(), StealState::Live));
    }

    #[test]
    fn hijack_registers_and_is_taken_once() {
        let ctx = RequestCtx::new();
        let handler_ctx = HandlerCtx::new(&ctx);
        let _ = handler_ctx.hijack(|_stream, _leftover| async {});

        assert!(ctx.take_hijack().is_some());
        assert!(ctx.take_hijack().is_none());
    }
}
