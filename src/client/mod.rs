//! A pooling HTTP/1.1 client built on top of [`HostClient`].
//!
//! [`Client`] is the entry point: it owns one [`HostClient`] per origin
//! `(scheme, host, port)` and creates them lazily on first use, the same
//! "fixed pool of reusable state per target" shape the server uses for
//! connections, just keyed by destination instead of by accept() slot.

pub mod host;

pub use host::HostClient;

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};

use tokio::time::interval;

use crate::{errors::ClientErrorKind, limits::ClientLimits};

/// A minimal absolute-URL split, just enough to route a request to a
/// [`HostClient`] and build a request line.
///
/// Unlike [`Url`](crate::Url), which only ever sees a request-target path
/// (what a server reads off the wire), this also carries the scheme and
/// authority a client needs to pick a destination before dialing.
pub(crate) struct ParsedUri<'a> {
    pub(crate) https: bool,
    pub(crate) host: &'a str,
    pub(crate) port: u16,
    pub(crate) path_and_query: &'a str,
}

pub(crate) fn parse_uri(uri: &str) -> Result<ParsedUri<'_>, ClientErrorKind> {
    let (scheme, rest) = uri.split_once("://").ok_or(ClientErrorKind::InvalidUri)?;
    let https = match scheme {
        "http" => false,
        "https" => true,
        _ => return Err(ClientErrorKind::InvalidUri),
    };

    let (authority, path_and_query) = match rest.find('/') {
        Some(pos) => (&rest[..pos], &rest[pos..]),
        None => (rest, "/"),
    };
    let path_and_query = if path_and_query.is_empty() {
        "/"
    } else {
        path_and_query
    };

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().unwrap_or(if https { 443 } else { 80 })),
        None => (authority, if https { 443 } else { 80 }),
    };

    Ok(ParsedUri {
        https,
        host,
        port,
        path_and_query,
    })
}

/// Pools and reuses outbound connections across many origin hosts.
///
/// One `Client` is normally shared (behind an `Arc`) across every task that
/// issues outbound requests. A background task periodically reaps
/// [`HostClient`]s left with an empty, idle pool so a long-running process
/// doesn't accumulate one forever per transient destination.
pub struct Client {
    limits: ClientLimits,
    hosts: RwLock<HashMap<(bool, String, u16), Arc<HostClient>>>,
}

impl Client {
    /// Creates a client and starts its background idle-host reaper.
    pub fn new(limits: ClientLimits) -> Arc<Self> {
        let client = Arc::new(Self {
            limits,
            hosts: RwLock::new(HashMap::new()),
        });
        tokio::spawn(reap_task(Arc::clone(&client)));
        client
    }

    /// Returns the [`HostClient`] for `(https, host, port)`, creating one on
    /// first use.
    pub fn get(&self, https: bool, host: &str, port: u16) -> Arc<HostClient> {
        let key = (https, host.to_string(), port);
        if let Some(existing) = self.hosts.read().unwrap().get(&key) {
            return Arc::clone(existing);
        }

        let mut hosts = self.hosts.write().unwrap();
        Arc::clone(
            hosts
                .entry(key)
                .or_insert_with_key(|(https, host, port)| {
                    Arc::new(HostClient::new(*https, host.clone(), *port, self.limits.host.clone()))
                }),
        )
    }

    /// Sends a pre-built HTTP/1.1 request to `uri`, retrying idempotent
    /// requests (`method` is one of the safe/idempotent methods) up to
    /// [`HostClientLimits::max_idempotent_call_attempts`](crate::limits::HostClientLimits::max_idempotent_call_attempts)
    /// times on a connection-level failure, and following redirects
    /// (301/302/303/307/308) across origins up to
    /// [`HostClientLimits::max_redirects`](crate::limits::HostClientLimits::max_redirects)
    /// total hops. A single [`HostClient`] refuses to follow a redirect that
    /// leaves its origin; this crosses origins by re-resolving onto the new
    /// one via [`Self::get`] and continuing the chain there.
    ///
    /// `request` must be the full request head plus body, with `Host`
    /// already set; this only supplies routing, retry, and redirect policy,
    /// it does not build the request for you.
    pub async fn send(
        &self,
        method_is_idempotent: bool,
        uri: &str,
        request: &[u8],
    ) -> Result<Vec<u8>, ClientErrorKind> {
        let mut current_uri = uri.to_string();
        let mut current_request = request.to_vec();
        let mut idempotent = method_is_idempotent;
        let mut hops_left = self.limits.host.max_redirects;

        loop {
            let parsed = parse_uri(&current_uri)?;
            let host_client = self.get(parsed.https, parsed.host, parsed.port);

            let response = self
                .send_with_retries(idempotent, &host_client, &current_request)
                .await?;

            let Some((status, location)) = host::parse_redirect(&response) else {
                return Ok(response);
            };

            if hops_left == 0 {
                return Err(ClientErrorKind::TooManyRedirects);
            }
            hops_left -= 1;

            let target =
                host::resolve_redirect_target(parsed.https, parsed.host, parsed.port, &location)?;
            let downgrade_to_get = matches!(status, 301 | 302 | 303);

            current_request = host::rewrite_for_redirect(
                &current_request,
                &target.path_and_query,
                &target.host_header(),
                downgrade_to_get,
            );
            if downgrade_to_get {
                idempotent = true;
            }
            current_uri = format!(
                "{}://{}:{}{}",
                if target.https { "https" } else { "http" },
                target.host,
                target.port,
                target.path_and_query,
            );
        }
    }

    async fn send_with_retries(
        &self,
        method_is_idempotent: bool,
        host_client: &HostClient,
        request: &[u8],
    ) -> Result<Vec<u8>, ClientErrorKind> {
        let attempts = if method_is_idempotent {
            self.limits.host.max_idempotent_call_attempts.max(1)
        } else {
            1
        };

        let mut last_err = ClientErrorKind::ConnectionClosed;
        for _ in 0..attempts {
            match host_client.send(request).await {
                Ok(response) => return Ok(response),
                Err(err) => last_err = err,
            }
        }
        Err(last_err)
    }

    /// Path and query a caller should send the request line for, given a
    /// full URI (the authority is consumed by host routing, not resent).
    pub fn request_target(uri: &str) -> Result<&str, ClientErrorKind> {
        Ok(parse_uri(uri)?.path_and_query)
    }
}

async fn reap_task(client: Arc<Client>) {
    let mut ticker = interval(client.limits.reaper_interval.max(Duration::from_secs(1)));
    loop {
        ticker.tick().await;
        let mut hosts = client.hosts.write().unwrap();
        hosts.retain(|_, host_client| {
            host_client.reap_idle();
            host_client.idle_len() > 0 || Arc::strong_count(host_client) > 1
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_absolute_http_uri() {
        let parsed = parse_uri("http://example.com/foo?a=1").unwrap();
        assert!(!parsed.https);
        assert_eq!(parsed.host, "example.com");
        assert_eq!(parsed.port, 80);
        assert_eq!(parsed.path_and_query, "/foo?a=1");
    }

    #[test]
    fn parses_https_uri_with_explicit_port() {
        let parsed = parse_uri("https://example.com:8443/").unwrap();
        assert!(parsed.https);
        assert_eq!(parsed.port, 8443);
    }

    #[test]
    fn defaults_path_to_root() {
        let parsed = parse_uri("http://example.com").unwrap();
        assert_eq!(parsed.path_and_query, "/");
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(parse_uri("ftp://example.com/").is_err());
    }

    #[test]
    fn get_returns_same_host_client_for_same_key() {
        let client = Client {
            limits: ClientLimits::default(),
            hosts: RwLock::new(HashMap::new()),
        };
        let a = client.get(false, "example.com", 80);
        let b = client.get(false, "example.com", 80);
        assert!(Arc::ptr_eq(&a, &b));
    }
}
