//! Rate limiting middleware using tower-governor
//!
//! Keyed by peer IP; over-limit requests are answered with 429 and a
//! retry-after hint. The server must be driven with connect info for the
//! key extractor to see the peer address.

use std::sync::Arc;

use axum::Router;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

/// Rate limiting configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests per minute allowed per client
    pub requests_per_minute: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 100,
        }
    }
}

/// Wrap a router with the rate limiting layer
pub fn apply<S>(router: Router<S>, config: RateLimitConfig) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    // For 100 requests per minute:
    // - Replenishment period = 60,000ms / 100 = 600ms per request
    // - Burst size = 100
    let replenishment_ms = 60_000 / config.requests_per_minute.max(1);
    let burst_size = config.requests_per_minute.try_into().unwrap_or(100);

    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(replenishment_ms)
            .burst_size(burst_size)
            .finish()
            .unwrap_or_default(),
    );

    router.layer(GovernorLayer {
        config: governor_conf,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_config_default() {
        let config = RateLimitConfig::default();
        assert_eq!(config.requests_per_minute, 100);
    }

    #[test]
    fn test_apply_wraps_router() {
        let router: Router<()> = Router::new();
        let _wrapped = apply(
            router,
            RateLimitConfig {
                requests_per_minute: 60,
            },
        );
    }
}
