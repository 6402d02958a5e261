use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
    task::{Context, Poll},
    time::Duration,
};

use axum::{
    Json,
    body::Body,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
};
use tokio::time::Instant;
use tower::{Layer, Service, util::ServiceExt};
use tracing::debug;

use crate::http::ApiError;

const CLIENT_HEADER: &str = "x-forwarded-for";

/// Upper bound on the number of clients tracked at once.
pub const MAX_TRACKED_CLIENTS: usize = 10_000;

struct Bucket {
    tokens: u32,
    refilled_at: Instant,
    seen_at: Instant,
}

impl Bucket {
    fn full(cap: u32, now: Instant) -> Self {
        Self {
            tokens: cap,
            refilled_at: now,
            seen_at: now,
        }
    }

    /// Adds whole tokens earned since the last refill. Partial progress toward
    /// the next token is kept.
    fn refill(&mut self, now: Instant, cap: u32, per_sec: u32) {
        if per_sec == 0 || self.tokens >= cap {
            self.refilled_at = now;
            return;
        }
        let elapsed = now.saturating_duration_since(self.refilled_at);
        let earned = (elapsed.as_secs_f64() * f64::from(per_sec)).floor();
        if earned < 1.0 {
            return;
        }
        let room = f64::from(cap - self.tokens);
        if earned >= room {
            self.tokens = cap;
            self.refilled_at = now;
        } else {
            self.tokens += earned as u32;
            self.refilled_at += Duration::from_secs_f64(earned / f64::from(per_sec));
        }
    }
}

/// Per-client token bucket guarding session submission.
///
/// Buckets that have refilled to capacity carry no state worth keeping, so
/// they are dropped whenever the table reaches `max_clients`. If every bucket
/// is still draining, the least recently seen client is forgotten.
#[derive(Clone)]
pub struct SubmitLimiter {
    buckets: Arc<Mutex<HashMap<String, Bucket>>>,
    cap: u32,
    refill_per_sec: u32,
    max_clients: usize,
}

impl SubmitLimiter {
    pub fn new(cap: u32, refill_per_sec: u32) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            cap,
            refill_per_sec,
            max_clients: MAX_TRACKED_CLIENTS,
        }
    }

    #[cfg(test)]
    fn with_max_clients(mut self, max_clients: usize) -> Self {
        self.max_clients = max_clients.max(1);
        self
    }

    /// Takes one token for `client`; `false` means the submission is throttled.
    pub fn check(&self, client: &str) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        if !buckets.contains_key(client) && buckets.len() >= self.max_clients {
            self.make_room(&mut buckets, now);
        }
        let bucket = buckets
            .entry(client.to_string())
            .or_insert_with(|| Bucket::full(self.cap, now));
        bucket.refill(now, self.cap, self.refill_per_sec);
        bucket.seen_at = now;
        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            false
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn make_room(&self, buckets: &mut HashMap<String, Bucket>, now: Instant) {
        let (cap, per_sec) = (self.cap, self.refill_per_sec);
        buckets.retain(|_, bucket| {
            bucket.refill(now, cap, per_sec);
            bucket.tokens < cap
        });
        while buckets.len() >= self.max_clients {
            let Some(oldest) = buckets
                .iter()
                .min_by_key(|(_, bucket)| bucket.seen_at)
                .map(|(client, _)| client.clone())
            else {
                break;
            };
            buckets.remove(&oldest);
        }
    }
}

#[derive(Clone)]
pub struct SubmitLimitLayer {
    limiter: SubmitLimiter,
}

impl SubmitLimitLayer {
    pub fn new(cap: u32, refill_per_sec: u32) -> Self {
        Self {
            limiter: SubmitLimiter::new(cap, refill_per_sec),
        }
    }
}

impl<S> Layer<S> for SubmitLimitLayer
where
    S: Service<Request<Body>, Response = Response> + Clone,
    S::Error: Send + 'static,
    S::Future: Send + 'static,
{
    type Service = SubmitLimit<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SubmitLimit {
            inner,
            limiter: self.limiter.clone(),
        }
    }
}

#[derive(Clone)]
pub struct SubmitLimit<S> {
    inner: S,
    limiter: SubmitLimiter,
}

impl<S> Service<Request<Body>> for SubmitLimit<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Error: Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let client = client_key(&req);
        let allow = self.limiter.check(&client);
        let mut inner = self.inner.clone();
        Box::pin(async move {
            if allow {
                inner.ready().await?.call(req).await
            } else {
                debug!(client = %client, "submission throttled");
                metrics::counter!("gateway_submissions_throttled_total").increment(1);
                Ok(too_many_requests())
            }
        })
    }
}

/// First `x-forwarded-for` hop, which is the original caller behind a proxy.
fn client_key(req: &Request<Body>) -> String {
    req.headers()
        .get(CLIENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

fn too_many_requests() -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(ApiError {
            error: "too many submissions, slow down".into(),
            code: "rate_limited".into(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower::service_fn;

    #[tokio::test(start_paused = true)]
    async fn limiter_refills_after_wait() {
        let limiter = SubmitLimiter::new(1, 10);
        assert!(limiter.check("client"));
        assert!(!limiter.check("client"));
        tokio::time::advance(Duration::from_millis(120)).await;
        assert!(limiter.check("client"));
    }

    #[tokio::test(start_paused = true)]
    async fn partial_refill_progress_is_kept() {
        let limiter = SubmitLimiter::new(3, 2);
        for _ in 0..3 {
            assert!(limiter.check("client"));
        }
        tokio::time::advance(Duration::from_millis(750)).await;
        assert!(limiter.check("client"));
        assert!(!limiter.check("client"));
        tokio::time::advance(Duration::from_millis(250)).await;
        assert!(limiter.check("client"));
    }

    #[test]
    fn limiter_isolated_per_client() {
        let limiter = SubmitLimiter::new(1, 0);
        assert!(limiter.check("a"));
        assert!(limiter.check("b"));
        assert!(!limiter.check("a"));
        assert!(!limiter.check("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn many_distinct_clients_stay_within_bound() {
        let limiter = SubmitLimiter::new(2, 0).with_max_clients(8);
        for n in 0..500 {
            assert!(limiter.check(&format!("198.51.100.{n}")));
            assert!(limiter.tracked() <= 8);
        }
        assert_eq!(limiter.tracked(), 8);

        // The most recent client keeps its partly drained bucket.
        assert!(limiter.check("198.51.100.499"));
        assert!(!limiter.check("198.51.100.499"));
    }

    #[tokio::test(start_paused = true)]
    async fn refilled_buckets_are_swept_first() {
        let limiter = SubmitLimiter::new(1, 10).with_max_clients(4);
        for client in ["a", "b", "c"] {
            assert!(limiter.check(client));
        }
        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(limiter.check("d"));
        assert!(!limiter.check("d"));
        assert_eq!(limiter.tracked(), 4);

        assert!(limiter.check("e"));
        assert_eq!(limiter.tracked(), 2);
        assert!(!limiter.check("d"));
    }

    #[tokio::test]
    async fn middleware_answers_429_when_exhausted() {
        let base = service_fn(|_req: Request<Body>| async {
            Ok::<_, std::convert::Infallible>(Response::new(Body::empty()))
        });
        let mut svc = SubmitLimitLayer::new(1, 0).layer(base);
        let request = || {
            Request::builder()
                .uri("/api/submit")
                .header(CLIENT_HEADER, "1.2.3.4, 10.0.0.1")
                .body(Body::empty())
                .unwrap()
        };

        let first = svc.ready().await.unwrap().call(request()).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = svc.ready().await.unwrap().call(request()).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
