//! Request logging for the upstream HTTP client.

use http::Extensions;
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next};
use std::time::Instant;
use tracing::{debug, trace, warn};

use crate::utils::fmt_duration;

/// Logs each upstream call with its latency and the remaining rate budget
/// the upstream reports in its response headers.
pub struct TransactionLogMiddleware;

fn header<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

#[async_trait::async_trait]
impl Middleware for TransactionLogMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let method = req.method().clone();
        let path = req.url().path().to_owned();
        trace!(method = %method, path = path.as_str(), "Upstream request");

        let start = Instant::now();
        let result = next.run(req, extensions).await;
        let duration = fmt_duration(start.elapsed());

        match &result {
            Ok(response) => {
                let status = response.status().as_u16();
                let remaining = header(response, "x-ratelimit-remaining").unwrap_or("-");
                let reset = header(response, "x-ratelimit-reset").unwrap_or("-");
                if response.status().is_success() {
                    debug!(method = %method, path = path.as_str(), status, duration, remaining, reset, "Upstream response");
                } else {
                    warn!(method = %method, path = path.as_str(), status, duration, remaining, reset, "Upstream error response");
                }
            }
            Err(e) => {
                warn!(method = %method, path = path.as_str(), duration, error = %e, "Upstream request failed");
            }
        }

        result
    }
}
