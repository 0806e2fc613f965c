//! A bounded connection pool to a single origin host.
//!
//! Mirrors the server's philosophy of a small, fixed amount of reusable
//! state instead of per-request allocation: connections are checked out of
//! a LIFO stack (most-recently-used first, so the idle reaper can reclaim
//! the coldest ones) and returned after a successful exchange.

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::{Duration, Instant},
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{lookup_host, TcpStream},
    sync::Semaphore,
    time::sleep,
};

use crate::{errors::ClientErrorKind, limits::HostClientLimits};

struct PooledConn {
    stream: TcpStream,
    last_used: Instant,
}

/// A connection pool dedicated to one `(host, port)` pair.
///
/// Created on demand by [`Client::get`](crate::client::Client::get) and kept
/// alive until the background reaper observes it has been idle and empty
/// for longer than [`ClientLimits::reaper_interval`](crate::limits::ClientLimits::reaper_interval).
pub struct HostClient {
    https: bool,
    host: String,
    port: u16,
    limits: HostClientLimits,

    idle: Mutex<Vec<PooledConn>>,
    permits: Semaphore,
    resolved: Mutex<Vec<SocketAddr>>,
    resolved_at: Mutex<Option<Instant>>,
    next_addr: AtomicUsize,
}

const DNS_CACHE_TTL: Duration = Duration::from_secs(60);

impl HostClient {
    pub(crate) fn new(https: bool, host: String, port: u16, limits: HostClientLimits) -> Self {
        let permits = Semaphore::new(limits.max_conns);
        Self {
            https,
            host,
            port,
            limits,
            idle: Mutex::new(Vec::new()),
            permits,
            resolved: Mutex::new(Vec::new()),
            resolved_at: Mutex::new(None),
            next_addr: AtomicUsize::new(0),
        }
    }

    /// Sends `request`, following same-origin redirects (301/302/303/307/308)
    /// up to `max_redirects` hops. A redirect to a different scheme, host, or
    /// port fails with [`RedirectToDifferentScheme`](ClientErrorKind::RedirectToDifferentScheme)
    /// instead of being followed — this client is bound to one origin;
    /// [`Client::send`](crate::client::Client::send) is what crosses origins.
    pub async fn send_with_redirects(
        &self,
        request: &[u8],
        max_redirects: usize,
    ) -> Result<Vec<u8>, ClientErrorKind> {
        let mut current = request.to_vec();
        let mut hops_left = max_redirects;

        loop {
            let response = self.send(&current).await?;

            let Some((status, location)) = parse_redirect(&response) else {
                return Ok(response);
            };

            if hops_left == 0 {
                return Err(ClientErrorKind::TooManyRedirects);
            }
            hops_left -= 1;

            let target = resolve_redirect_target(self.https, &self.host, self.port, &location)?;
            if target.https != self.https || target.host != self.host || target.port != self.port {
                return Err(ClientErrorKind::RedirectToDifferentScheme);
            }

            current = rewrite_for_redirect(
                &current,
                &target.path_and_query,
                &target.host_header(),
                matches!(status, 301 | 302 | 303),
            );
        }
    }

    /// Writes `request` and returns the full raw response bytes (status
    /// line, headers, and body as the peer sent them).
    ///
    /// Acquires a pooled connection if one is idle, otherwise dials a fresh
    /// one (subject to [`HostClientLimits::max_conns`] and
    /// [`HostClientLimits::max_conn_wait_timeout`]). The connection is
    /// returned to the pool on success so the next call can reuse it.
    pub async fn send(&self, request: &[u8]) -> Result<Vec<u8>, ClientErrorKind> {
        let _permit = self.acquire_permit().await?;
        let mut conn = self.checkout().await?;

        let result = self.exchange(&mut conn.stream, request).await;
        match result {
            Ok(response) => {
                conn.last_used = Instant::now();
                self.idle.lock().unwrap().push(conn);
                Ok(response)
            }
            Err(err) => Err(err),
        }
    }

    async fn acquire_permit(&self) -> Result<tokio::sync::SemaphorePermit<'_>, ClientErrorKind> {
        match self.limits.max_conn_wait_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.permits.acquire())
                .await
                .map_err(|_| ClientErrorKind::NoFreeConns)?
                .map_err(|_| ClientErrorKind::NoFreeConns),
            None => self
                .permits
                .try_acquire()
                .map_err(|_| ClientErrorKind::NoFreeConns),
        }
    }

    async fn checkout(&self) -> Result<PooledConn, ClientErrorKind> {
        if let Some(conn) = self.idle.lock().unwrap().pop() {
            if !self.expired(&conn) {
                return Ok(conn);
            }
        }
        self.dial().await
    }

    fn expired(&self, conn: &PooledConn) -> bool {
        let idle_too_long = conn.last_used.elapsed() > self.limits.max_idle_conn_duration;
        let past_max_duration = !self.limits.max_conn_duration.is_zero()
            && conn.last_used.elapsed() > self.limits.max_conn_duration;
        idle_too_long || past_max_duration
    }

    async fn dial(&self) -> Result<PooledConn, ClientErrorKind> {
        let addr = self.next_resolved_addr().await?;
        let stream = TcpStream::connect(addr).await?;
        Ok(PooledConn {
            stream,
            last_used: Instant::now(),
        })
    }

    /// Resolves `host:port` with a round-robin rotation across the answer
    /// set, refreshing the cache once [`DNS_CACHE_TTL`] has elapsed.
    async fn next_resolved_addr(&self) -> Result<SocketAddr, ClientErrorKind> {
        let stale = match *self.resolved_at.lock().unwrap() {
            Some(at) => at.elapsed() > DNS_CACHE_TTL,
            None => true,
        };

        if stale {
            let addrs: Vec<SocketAddr> = lookup_host((self.host.as_str(), self.port))
                .await?
                .collect();
            *self.resolved.lock().unwrap() = addrs;
            *self.resolved_at.lock().unwrap() = Some(Instant::now());
            self.next_addr.store(0, Ordering::Relaxed);
        }

        let addrs = self.resolved.lock().unwrap();
        if addrs.is_empty() {
            return Err(ClientErrorKind::ConnectionClosed);
        }
        let index = self.next_addr.fetch_add(1, Ordering::Relaxed) % addrs.len();
        Ok(addrs[index])
    }

    async fn exchange(
        &self,
        stream: &mut TcpStream,
        request: &[u8],
    ) -> Result<Vec<u8>, ClientErrorKind> {
        tokio::select! {
            biased;
            result = stream.write_all(request) => result?,
            _ = sleep(self.limits.write_timeout) => return Err(ClientErrorKind::Timeout),
        }

        let mut response = Vec::with_capacity(4 * 1024);
        let mut chunk = [0u8; 4096];
        loop {
            let read = tokio::select! {
                biased;
                result = stream.read(&mut chunk) => result?,
                _ = sleep(self.limits.read_timeout) => return Err(ClientErrorKind::Timeout),
            };
            if read == 0 {
                break;
            }
            response.extend_from_slice(&chunk[..read]);
            if response_looks_complete(&response) {
                break;
            }
        }

        if response.is_empty() {
            return Err(ClientErrorKind::ConnectionClosed);
        }
        Ok(response)
    }

    /// Number of connections currently sitting idle in the pool.
    pub(crate) fn idle_len(&self) -> usize {
        self.idle.lock().unwrap().len()
    }

    /// Drops idle connections that have exceeded `max_idle_conn_duration`.
    /// Called periodically by [`Client`](crate::client::Client)'s reaper task.
    pub(crate) fn reap_idle(&self) {
        self.idle.lock().unwrap().retain(|c| !self.expired(c));
    }
}

/// A crude but cheap completeness check used by the read loop above: once a
/// `Content-Length`-declared body has fully arrived, stop reading rather
/// than waiting for the peer to close or the read timeout to fire.
fn response_looks_complete(buf: &[u8]) -> bool {
    let Some(header_end) = find_double_crlf(buf) else {
        return false;
    };
    let headers = &buf[..header_end];
    let Some(len) = parse_content_length(headers) else {
        // No Content-Length: rely on the peer closing the connection, or
        // the caller's read timeout, to end the read loop.
        return false;
    };
    buf.len() >= header_end + 4 + len
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_content_length(headers: &[u8]) -> Option<usize> {
    for line in headers.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let Some(rest) = strip_prefix_ignore_case(line, b"content-length:") else {
            continue;
        };
        let digits = rest.trim_ascii();
        return std::str::from_utf8(digits).ok()?.parse().ok();
    }
    None
}

fn strip_prefix_ignore_case<'a>(haystack: &'a [u8], prefix: &[u8]) -> Option<&'a [u8]> {
    if haystack.len() < prefix.len() {
        return None;
    }
    let (head, tail) = haystack.split_at(prefix.len());
    head.eq_ignore_ascii_case(prefix).then_some(tail)
}

fn header_value<'a>(headers: &'a [u8], name: &[u8]) -> Option<&'a [u8]> {
    for line in headers.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if let Some(rest) = strip_prefix_ignore_case(line, name) {
            if let Some(rest) = rest.strip_prefix(b":") {
                return Some(rest.trim_ascii());
            }
        }
    }
    None
}

fn status_code(response: &[u8]) -> Option<u16> {
    let line_end = response.iter().position(|&b| b == b'\n')?;
    let line = response[..line_end]
        .strip_suffix(b"\r")
        .unwrap_or(&response[..line_end]);
    let mut parts = line.splitn(3, |&b| b == b' ');
    parts.next()?;
    std::str::from_utf8(parts.next()?).ok()?.parse().ok()
}

/// Status code and `Location` header of `response`, if it's a redirect this
/// client follows. Returns `None` for any other status or a redirect with no
/// `Location`, in which case the caller should treat `response` as final.
pub(crate) fn parse_redirect(response: &[u8]) -> Option<(u16, String)> {
    let status = status_code(response)?;
    if !matches!(status, 301 | 302 | 303 | 307 | 308) {
        return None;
    }
    let header_end = find_double_crlf(response).unwrap_or(response.len());
    let location = header_value(&response[..header_end], b"location")?;
    Some((status, std::str::from_utf8(location).ok()?.to_string()))
}

/// Where a redirect's `Location` points, resolved against the request that
/// produced it. A relative `Location` (no `scheme://`) stays on
/// `(base_https, base_host, base_port)`.
pub(crate) struct RedirectTarget {
    pub(crate) https: bool,
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) path_and_query: String,
}

impl RedirectTarget {
    /// `Host` header value: bare hostname unless the port is non-default for
    /// the scheme.
    pub(crate) fn host_header(&self) -> String {
        match (self.https, self.port) {
            (true, 443) | (false, 80) => self.host.clone(),
            _ => format!("{}:{}", self.host, self.port),
        }
    }
}

pub(crate) fn resolve_redirect_target(
    base_https: bool,
    base_host: &str,
    base_port: u16,
    location: &str,
) -> Result<RedirectTarget, ClientErrorKind> {
    if location.starts_with("http://") || location.starts_with("https://") {
        let parsed = crate::client::parse_uri(location)?;
        return Ok(RedirectTarget {
            https: parsed.https,
            host: parsed.host.to_string(),
            port: parsed.port,
            path_and_query: parsed.path_and_query.to_string(),
        });
    }

    if !location.starts_with('/') {
        return Err(ClientErrorKind::InvalidUri);
    }
    Ok(RedirectTarget {
        https: base_https,
        host: base_host.to_string(),
        port: base_port,
        path_and_query: location.to_string(),
    })
}

/// Rewrites `request`'s request line and `Host` header for a redirect hop.
/// `downgrade_to_get` drops the body and `Content-Length`/`Content-Type`
/// headers, matching how 301/302/303 are conventionally followed (307/308
/// preserve method and body).
pub(crate) fn rewrite_for_redirect(
    request: &[u8],
    path_and_query: &str,
    host_header: &str,
    downgrade_to_get: bool,
) -> Vec<u8> {
    let header_end = find_double_crlf(request).unwrap_or(request.len());
    let head = &request[..header_end];
    let body = if downgrade_to_get {
        &[][..]
    } else {
        &request[(header_end + 4).min(request.len())..]
    };

    let mut lines = head.split(|&b| b == b'\n');
    let old_request_line = lines.next().unwrap_or(b"");
    let method = old_request_line
        .split(|&b| b == b' ')
        .next()
        .unwrap_or(b"GET");

    let mut out = Vec::with_capacity(request.len());
    out.extend_from_slice(if downgrade_to_get { b"GET" } else { method });
    out.push(b' ');
    out.extend_from_slice(path_and_query.as_bytes());
    out.extend_from_slice(b" HTTP/1.1\r\n");
    out.extend_from_slice(b"Host: ");
    out.extend_from_slice(host_header.as_bytes());
    out.extend_from_slice(b"\r\n");

    for line in lines {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty()
            || strip_prefix_ignore_case(line, b"host:").is_some()
            || (downgrade_to_get
                && (strip_prefix_ignore_case(line, b"content-length:").is_some()
                    || strip_prefix_ignore_case(line, b"content-type:").is_some()))
        {
            continue;
        }
        out.extend_from_slice(line);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_length_response_is_complete_once_body_arrives() {
        let partial = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhel";
        assert!(!response_looks_complete(partial));

        let full = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";
        assert!(response_looks_complete(full));
    }

    #[test]
    fn missing_content_length_never_completes_early() {
        let buf = b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\nbody";
        assert!(!response_looks_complete(buf));
    }

    #[test]
    fn case_insensitive_header_match() {
        let headers = b"CONTENT-LENGTH: 3\r\n";
        assert_eq!(parse_content_length(headers), Some(3));
    }

    #[test]
    fn parse_redirect_reads_status_and_location() {
        let response = b"HTTP/1.1 302 Found\r\nLocation: /new-path\r\n\r\n";
        let (status, location) = parse_redirect(response).unwrap();
        assert_eq!(status, 302);
        assert_eq!(location, "/new-path");
    }

    #[test]
    fn parse_redirect_ignores_non_redirect_status() {
        let response = b"HTTP/1.1 200 OK\r\nLocation: /ignored\r\n\r\n";
        assert!(parse_redirect(response).is_none());
    }

    #[test]
    fn resolve_redirect_target_keeps_origin_for_relative_location() {
        let target = resolve_redirect_target(false, "example.com", 80, "/elsewhere").unwrap();
        assert!(!target.https);
        assert_eq!(target.host, "example.com");
        assert_eq!(target.port, 80);
        assert_eq!(target.path_and_query, "/elsewhere");
    }

    #[test]
    fn resolve_redirect_target_parses_absolute_location() {
        let target =
            resolve_redirect_target(false, "example.com", 80, "https://other.com/x").unwrap();
        assert!(target.https);
        assert_eq!(target.host, "other.com");
        assert_eq!(target.port, 443);
        assert_eq!(target.path_and_query, "/x");
    }

    #[test]
    fn rewrite_for_redirect_downgrades_post_to_get_and_drops_body() {
        let request = b"POST /submit HTTP/1.1\r\nHost: old.com\r\nContent-Length: 4\r\n\r\nbody";
        let rewritten = rewrite_for_redirect(request, "/new", "new.com", true);
        let rewritten = std::str::from_utf8(&rewritten).unwrap();

        assert!(rewritten.starts_with("GET /new HTTP/1.1\r\n"));
        assert!(rewritten.contains("Host: new.com\r\n"));
        assert!(!rewritten.contains("Content-Length"));
        assert!(!rewritten.ends_with("body"));
    }

    #[test]
    fn rewrite_for_redirect_preserves_method_and_body_for_307() {
        let request = b"POST /submit HTTP/1.1\r\nHost: old.com\r\nContent-Length: 4\r\n\r\nbody";
        let rewritten = rewrite_for_redirect(request, "/new", "old.com", false);
        let rewritten = std::str::from_utf8(&rewritten).unwrap();

        assert!(rewritten.starts_with("POST /new HTTP/1.1\r\n"));
        assert!(rewritten.ends_with("body"));
    }
}
