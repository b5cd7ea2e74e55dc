//! Fetcher configuration

use serde::{Deserialize, Serialize};

/// Token-bucket limits applied globally and per sender
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    pub global_rps: f64,
    pub global_burst: u32,
    pub per_sender_rps: f64,
    pub per_sender_burst: u32,
}

impl RateLimiterConfig {
    /// Limits for requests leaving this node towards a gateway.
    pub fn outgoing_default() -> Self {
        Self {
            global_rps: 100.0,
            global_burst: 100,
            per_sender_rps: 5.0,
            per_sender_burst: 50,
        }
    }

    /// Limits for messages arriving from gateways.
    pub fn incoming_default() -> Self {
        Self {
            global_rps: 100.0,
            global_burst: 100,
            per_sender_rps: 100.0,
            per_sender_burst: 100,
        }
    }
}

/// Fetcher service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// Limits keyed by workflow ID for outgoing requests
    #[serde(default = "RateLimiterConfig::outgoing_default")]
    pub outgoing_rate_limit: RateLimiterConfig,

    /// Limits keyed by gateway sender for incoming responses
    #[serde(default = "RateLimiterConfig::incoming_default")]
    pub incoming_rate_limit: RateLimiterConfig,

    /// Deadline applied to a gateway request that carries none
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Pause between full passes over the gateway list
    #[serde(default = "default_gateway_retry_delay")]
    pub gateway_retry_delay_ms: u64,

    /// Always begin the gateway round robin at the first gateway
    #[serde(default)]
    pub fixed_gateway_start: bool,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            outgoing_rate_limit: RateLimiterConfig::outgoing_default(),
            incoming_rate_limit: RateLimiterConfig::incoming_default(),
            request_timeout_ms: default_request_timeout(),
            gateway_retry_delay_ms: default_gateway_retry_delay(),
            fixed_gateway_start: false,
        }
    }
}

/// Method name the syncer registers with the gateway connector.
pub const METHOD_WORKFLOW_SYNCER: &str = "workflow_syncer";

/// Timeout of the direct HTTP fetcher's client.
pub const HTTP_CLIENT_TIMEOUT_SECS: u64 = 30;

fn default_request_timeout() -> u64 {
    30_000
}

fn default_gateway_retry_delay() -> u64 {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FetcherConfig::default();
        assert_eq!(config.incoming_rate_limit.per_sender_burst, 100);
        assert_eq!(config.outgoing_rate_limit.per_sender_rps, 5.0);
        assert_eq!(config.request_timeout_ms, 30_000);
        assert!(!config.fixed_gateway_start);
    }

    #[test]
    fn test_partial_deserialize_fills_defaults() {
        let config: FetcherConfig =
            serde_json::from_str(r#"{ "fixed_gateway_start": true }"#).unwrap();
        assert!(config.fixed_gateway_start);
        assert_eq!(config.gateway_retry_delay_ms, 100);
    }
}
