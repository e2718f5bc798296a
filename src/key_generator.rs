//! Caller identity resolution for rate limiting.

use axum::http::HeaderMap;
use std::net::{IpAddr, SocketAddr};

use crate::rate_limit_config::Tier;
use crate::rate_limiter::RateLimitKey;

/// How a tier identifies its callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStrategy {
    /// Client IP address, proxy headers first
    IpAddress,
    /// Authenticated user id
    UserId,
}

impl KeyStrategy {
    pub fn for_tier(tier: Tier) -> Self {
        match tier {
            Tier::Email => KeyStrategy::UserId,
            Tier::Strict | Tier::Standard | Tier::Admin => KeyStrategy::IpAddress,
        }
    }
}

/// Builds rate limit keys from request context
pub struct KeyGenerator;

impl KeyGenerator {
    /// Key for an IP-scoped tier
    pub fn ip_key(tier: Tier, headers: &HeaderMap, remote: Option<SocketAddr>) -> RateLimitKey {
        RateLimitKey::new(tier, Self::extract_client_ip(headers, remote))
    }

    /// Key for a user-scoped tier
    pub fn user_key(tier: Tier, user_id: &str) -> RateLimitKey {
        RateLimitKey::new(tier, user_id)
    }

    /// Extract the client IP: first `X-Forwarded-For` hop, then `X-Real-IP`,
    /// then the socket address.
    pub fn extract_client_ip(headers: &HeaderMap, remote: Option<SocketAddr>) -> String {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .and_then(parse_ip);

        let real_ip = || {
            headers
                .get("x-real-ip")
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .and_then(parse_ip)
        };

        forwarded
            .or_else(real_ip)
            .or_else(|| remote.map(|addr| addr.ip()))
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

fn parse_ip(raw: &str) -> Option<IpAddr> {
    raw.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_static(value));
        }
        headers
    }

    #[test]
    fn test_forwarded_for_first_hop_wins() {
        let headers = headers(&[
            ("x-forwarded-for", "192.168.1.1, 10.0.0.1"),
            ("x-real-ip", "203.0.113.1"),
        ]);
        let remote = Some(SocketAddr::from(([127, 0, 0, 1], 9000)));
        assert_eq!(KeyGenerator::extract_client_ip(&headers, remote), "192.168.1.1");
    }

    #[test]
    fn test_real_ip_used_when_forwarded_missing_or_garbage() {
        let headers = headers(&[
            ("x-forwarded-for", "not-an-ip"),
            ("x-real-ip", "203.0.113.1"),
        ]);
        assert_eq!(KeyGenerator::extract_client_ip(&headers, None), "203.0.113.1");
    }

    #[test]
    fn test_socket_address_fallback() {
        let remote = Some(SocketAddr::from(([198, 51, 100, 4], 443)));
        assert_eq!(
            KeyGenerator::extract_client_ip(&HeaderMap::new(), remote),
            "198.51.100.4"
        );
        assert_eq!(KeyGenerator::extract_client_ip(&HeaderMap::new(), None), "unknown");
    }

    #[test]
    fn test_ipv6_forwarded() {
        let headers = headers(&[("x-forwarded-for", "2001:db8::1")]);
        assert_eq!(KeyGenerator::extract_client_ip(&headers, None), "2001:db8::1");
    }

    #[test]
    fn test_keys_by_strategy() {
        assert_eq!(KeyStrategy::for_tier(Tier::Email), KeyStrategy::UserId);
        assert_eq!(KeyStrategy::for_tier(Tier::Admin), KeyStrategy::IpAddress);

        let key = KeyGenerator::ip_key(Tier::Strict, &headers(&[("x-real-ip", "10.1.1.1")]), None);
        assert_eq!(key.to_string(), "strict:10.1.1.1");
        assert_eq!(KeyGenerator::user_key(Tier::Email, "user-9").to_string(), "email:user-9");
    }
}
