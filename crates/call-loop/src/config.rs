//! Harness configuration: the two endpoints and the loop pacing
//!
//! Loaded from an optional TOML file; command-line flags override the
//! pacing fields.
//!
//! ```toml
//! iterations = 100
//! interval_ms = 25
//! network_timeout_ms = 32000
//!
//! [caller]
//! display_name = "Alice Phone"
//! user_name = "alice"
//! host = "127.0.0.1"
//! port = 5062
//! transport = "UDP"
//!
//! [callee]
//! display_name = "Bob Phone"
//! user_name = "bob"
//! host = "127.0.0.1"
//! port = 5060
//! ack_timeout_ms = 2000
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use rvoip_call_flow::EndpointConfig;
use serde::Deserialize;

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Number of calls to place; `0` loops until interrupted
    pub iterations: u64,
    pub interval_ms: u64,
    /// Loopback network's own transaction timer (Timer B/F); unset means none
    pub network_timeout_ms: Option<u64>,
    pub caller: EndpointConfig,
    pub callee: EndpointConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            iterations: 0,
            interval_ms: DEFAULT_INTERVAL.as_millis() as u64,
            network_timeout_ms: None,
            caller: EndpointConfig::new("Alice Phone", "alice", "127.0.0.1", 5062),
            callee: EndpointConfig::new("Bob Phone", "bob", "127.0.0.1", 5060),
        }
    }
}

impl HarnessConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("invalid harness configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("in {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        self.caller.validate().context("caller")?;
        self.callee.validate().context("callee")?;
        anyhow::ensure!(self.network_timeout_ms != Some(0), "network_timeout_ms must be greater than zero");
        anyhow::ensure!(
            self.caller.identity.address() != self.callee.identity.address(),
            "caller and callee must listen on different addresses"
        );
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn network_timeout(&self) -> Option<Duration> {
        self.network_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rvoip_call_flow::{ResponseDelay, TransportProtocol};

    #[test]
    fn test_defaults_are_alice_and_bob() {
        let config = HarnessConfig::default();
        assert_eq!(config.caller.identity.address(), "127.0.0.1:5062");
        assert_eq!(config.callee.identity.address(), "127.0.0.1:5060");
        assert_eq!(config.interval(), DEFAULT_INTERVAL);
        assert_eq!(config.network_timeout(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let config = HarnessConfig::from_toml_str(
            r#"
            iterations = 3
            interval_ms = 10

            [caller]
            display_name = "Carol"
            user_name = "carol"
            host = "10.0.0.1"
            port = 5070
            transport = "tcp"

            [callee]
            display_name = "Dave"
            user_name = "dave"
            host = "10.0.0.2"
            port = 5080
            request_timeout_ms = 1500
            "#,
        )
        .unwrap();

        assert_eq!(config.iterations, 3);
        assert_eq!(config.interval(), Duration::from_millis(10));
        assert_eq!(config.caller.identity.transport, TransportProtocol::Tcp);
        assert_eq!(config.callee.identity.transport, TransportProtocol::Udp);
        assert_eq!(config.callee.request_timeout, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_sample_file_parses() {
        let config = HarnessConfig::from_toml_str(include_str!("../call-loop.toml")).unwrap();
        assert_eq!(config.iterations, 100);
        assert_eq!(config.network_timeout(), Some(Duration::from_secs(32)));
        assert_eq!(config.caller.transaction_timeout, None);
        assert_eq!(config.callee.response_delay, ResponseDelay::Fixed(Duration::from_millis(1)));
    }

    #[test]
    fn test_zero_network_timeout_is_rejected() {
        let config = HarnessConfig {
            network_timeout_ms: Some(0),
            ..HarnessConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_same_address_is_rejected() {
        let err = HarnessConfig::from_toml_str(
            r#"
            [caller]
            display_name = "A"
            user_name = "a"
            host = "127.0.0.1"
            port = 5060

            [callee]
            display_name = "B"
            user_name = "b"
            host = "127.0.0.1"
            port = 5060
            "#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("different addresses"));
    }
}
