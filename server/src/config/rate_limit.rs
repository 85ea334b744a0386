//! Fixed-window request limiting per client address.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::extract::ConnectInfo;
use axum::http::{header, HeaderMap, HeaderValue, Request, Response, StatusCode};
use tower::{Layer, Service};

/// Windows are pruned once this many clients are tracked.
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

#[derive(Debug)]
struct Limiter {
    limit: u32,
    window: Duration,
    clients: Mutex<HashMap<String, Window>>,
}

impl Limiter {
    /// Counts a request and reports whether it fits in the client's window.
    fn allow(&self, client: &str, now: Instant) -> bool {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if clients.len() >= PRUNE_THRESHOLD {
            let window = self.window;
            clients.retain(|_, w| now.duration_since(w.started) < window);
        }

        let entry = clients.entry(client.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }
        if entry.count >= self.limit {
            return false;
        }
        entry.count += 1;
        true
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitLayer {
    limiter: Arc<Limiter>,
    trust_proxy_headers: bool,
}

impl RateLimitLayer {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limiter: Arc::new(Limiter {
                limit,
                window,
                clients: Mutex::new(HashMap::new()),
            }),
            trust_proxy_headers: false,
        }
    }

    pub fn per_minute(limit: u32) -> Self {
        tracing::info!(limit, "Rate limiting: requests per minute per client");
        Self::new(limit, Duration::from_secs(60))
    }

    /// Identify clients by proxy headers instead of the peer address.
    pub fn trust_proxy_headers(mut self, trust: bool) -> Self {
        if trust {
            tracing::info!("Rate limiting: keying clients on proxy headers");
        }
        self.trust_proxy_headers = trust;
        self
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
            trust_proxy_headers: self.trust_proxy_headers,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<Limiter>,
    trust_proxy_headers: bool,
}

/// Client key: the peer address, unless proxy headers are trusted, in which
/// case the first `X-Forwarded-For` hop or `X-Real-IP` wins.
fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy_headers: bool) -> String {
    let from_proxy = trust_proxy_headers
        .then(|| {
            let forwarded = headers
                .get("x-forwarded-for")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.split(',').next())
                .map(str::trim)
                .filter(|value| !value.is_empty());
            let real_ip = headers
                .get("x-real-ip")
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty());
            forwarded.or(real_ip)
        })
        .flatten();

    from_proxy
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for RateLimitService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    ResBody: Default,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = RateLimitFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let client = client_key(request.headers(), peer, self.trust_proxy_headers);

        if self.limiter.allow(&client, Instant::now()) {
            RateLimitFuture::Allowed {
                future: self.inner.call(request),
            }
        } else {
            tracing::warn!(client = %client, "Rate limit exceeded");
            RateLimitFuture::Limited {
                retry_after: self.limiter.window.as_secs(),
            }
        }
    }
}

#[pin_project::pin_project(project = RateLimitProj)]
pub enum RateLimitFuture<F> {
    Allowed {
        #[pin]
        future: F,
    },
    Limited {
        retry_after: u64,
    },
}

impl<F, ResBody, E> Future for RateLimitFuture<F>
where
    F: Future<Output = Result<Response<ResBody>, E>>,
    ResBody: Default,
{
    type Output = Result<Response<ResBody>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project() {
            RateLimitProj::Allowed { future } => future.poll(cx),
            RateLimitProj::Limited { retry_after } => {
                let mut response = Response::new(ResBody::default());
                *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(*retry_after));
                Poll::Ready(Ok(response))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_limits_and_resets() {
        let limiter = RateLimitLayer::new(2, Duration::from_secs(60)).limiter;
        let start = Instant::now();
        assert!(limiter.allow("1.2.3.4", start));
        assert!(limiter.allow("1.2.3.4", start));
        assert!(!limiter.allow("1.2.3.4", start + Duration::from_secs(1)));
        assert!(limiter.allow("5.6.7.8", start + Duration::from_secs(1)));
        assert!(limiter.allow("1.2.3.4", start + Duration::from_secs(61)));
    }

    fn proxied_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("192.168.1.2"));
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers
    }

    #[test]
    fn test_client_key_ignores_proxy_headers_by_default() {
        let peer: SocketAddr = "10.0.0.9:5555".parse().unwrap();
        assert_eq!(client_key(&HeaderMap::new(), Some(peer), false), "10.0.0.9");
        assert_eq!(client_key(&proxied_headers(), Some(peer), false), "10.0.0.9");
        assert_eq!(client_key(&proxied_headers(), None, false), "unknown");
    }

    #[test]
    fn test_client_key_uses_trusted_proxy_headers() {
        let peer: SocketAddr = "10.0.0.9:5555".parse().unwrap();
        assert_eq!(client_key(&HeaderMap::new(), Some(peer), true), "10.0.0.9");

        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("192.168.1.2"));
        assert_eq!(client_key(&headers, Some(peer), true), "192.168.1.2");

        assert_eq!(client_key(&proxied_headers(), Some(peer), true), "203.0.113.7");
        assert_eq!(client_key(&proxied_headers(), None, true), "203.0.113.7");
    }
}
