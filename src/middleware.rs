use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use tracing::info;

use crate::auth::authenticate;
use crate::error::ApiError;
use crate::handlers::SharedState;
use crate::key_generator::KeyGenerator;
use crate::rate_limit_config::Tier;
use crate::rate_limiter::{Admission, RateLimitKey, RateLimiter};

/// Admission state for an IP-scoped route group
#[derive(Clone)]
pub struct IpTierGuard {
    pub limiter: RateLimiter,
    pub tier: Tier,
}

/// Admission state for a user-scoped route group
#[derive(Clone)]
pub struct UserTierGuard {
    pub state: SharedState,
    pub tier: Tier,
}

/// Logging middleware for request/response tracking
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client_ip = KeyGenerator::extract_client_ip(request.headers(), remote_addr(&request));

    info!(
        target: "registrar::middleware",
        method = %method,
        uri = %uri,
        client_ip = %client_ip,
        "Incoming request"
    );

    let response = next.run(request).await;

    let status = response.status();
    info!(
        target: "registrar::middleware",
        method = %method,
        uri = %uri,
        status = %status,
        "Request completed"
    );

    response
}

/// Rate limit by client IP before the handler runs.
pub async fn ip_admission(State(guard): State<IpTierGuard>, request: Request, next: Next) -> Response {
    let key = KeyGenerator::ip_key(guard.tier, request.headers(), remote_addr(&request));
    admit_and_run(&guard.limiter, key, request, next).await
}

/// Rate limit by authenticated user id. Resolves the bearer token first and
/// leaves the user in the request extensions for the handler's extractor.
pub async fn user_admission(State(guard): State<UserTierGuard>, request: Request, next: Next) -> Response {
    let (mut parts, body) = request.into_parts();
    let user = match authenticate(&mut parts, &guard.state).await {
        Ok(user) => user,
        Err(e) => return e.into_response(),
    };
    let request = Request::from_parts(parts, body);

    let key = KeyGenerator::user_key(guard.tier, &user.id);
    admit_and_run(&guard.state.rate_limiter, key, request, next).await
}

async fn admit_and_run(limiter: &RateLimiter, key: RateLimitKey, request: Request, next: Next) -> Response {
    let rule = limiter.rule(key.tier);
    let limit = rule.max_requests;

    match limiter.check(&key) {
        Admission::Denied { retry_after } => {
            // Round up so clients never retry early
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            ApiError::RateLimited {
                message: rule.error_message.clone(),
                retry_after: secs.max(1),
            }
            .into_response()
        }
        Admission::Allowed { remaining } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
            headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
            response
        }
    }
}

fn remote_addr(request: &Request) -> Option<SocketAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}
