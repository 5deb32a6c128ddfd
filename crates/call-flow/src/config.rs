//! Endpoint configuration
//!
//! An endpoint is described by its SIP identity (display name, user, host,
//! port, transport) plus a few behavioural knobs for the call-flow
//! controllers: wait deadlines and the server's pre-response delay.
//!
//! ```rust
//! use rvoip_call_flow::config::{EndpointConfig, ResponseDelay, TransportProtocol};
//! use std::time::Duration;
//!
//! let config = EndpointConfig::new("Alice Phone", "alice", "127.0.0.1", 5062)
//!     .with_transport(TransportProtocol::Udp)
//!     .with_transaction_timeout(Duration::from_secs(32))
//!     .with_response_delay(ResponseDelay::None);
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.identity.address(), "127.0.0.1:5062");
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{CallFlowError, CallFlowResult};

/// Transport protocol an endpoint sends with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportProtocol {
    #[serde(rename = "UDP", alias = "udp")]
    Udp,
    #[serde(rename = "TCP", alias = "tcp")]
    Tcp,
}

impl TransportProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportProtocol::Udp => "UDP",
            TransportProtocol::Tcp => "TCP",
        }
    }
}

impl Default for TransportProtocol {
    fn default() -> Self {
        TransportProtocol::Udp
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportProtocol {
    type Err = CallFlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "UDP" => Ok(TransportProtocol::Udp),
            "TCP" => Ok(TransportProtocol::Tcp),
            other => Err(CallFlowError::config(format!("unsupported transport: {}", other))),
        }
    }
}

/// Who an endpoint is: everything the message builder needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointIdentity {
    pub display_name: String,
    pub user_name: String,
    pub host: String,
    /// Listens on this port
    pub port: u16,
    /// Sends using this transport
    #[serde(default)]
    pub transport: TransportProtocol,
}

impl EndpointIdentity {
    pub fn new(
        display_name: impl Into<String>,
        user_name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            display_name: display_name.into(),
            user_name: user_name.into(),
            host: host.into(),
            port,
            transport: TransportProtocol::default(),
        }
    }

    /// `host:port`, the address the transaction layer routes on
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Delay the server applies before sending its automatic final response
///
/// This is a processing delay, not a protocol timer, and it cannot be
/// cancelled once started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseDelay {
    /// Respond immediately
    None,
    /// Sleep for a fixed duration (milliseconds in config files)
    Fixed(#[serde(with = "millis")] Duration),
}

impl ResponseDelay {
    pub fn from_millis(ms: u64) -> Self {
        if ms == 0 {
            ResponseDelay::None
        } else {
            ResponseDelay::Fixed(Duration::from_millis(ms))
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            ResponseDelay::None => Duration::ZERO,
            ResponseDelay::Fixed(d) => *d,
        }
    }

    pub async fn wait(&self) {
        if let ResponseDelay::Fixed(d) = self {
            tokio::time::sleep(*d).await;
        }
    }
}

impl Default for ResponseDelay {
    fn default() -> Self {
        ResponseDelay::Fixed(Duration::from_millis(1))
    }
}

/// Full configuration of one endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(flatten)]
    pub identity: EndpointIdentity,

    /// Deadline for a client exchange to reach a final response
    #[serde(default, with = "opt_millis", rename = "transaction_timeout_ms")]
    pub transaction_timeout: Option<Duration>,

    /// Deadline for a server to receive an inbound request
    #[serde(default, with = "opt_millis", rename = "request_timeout_ms")]
    pub request_timeout: Option<Duration>,

    /// Deadline for a server to receive the ACK of its 2xx
    #[serde(default, with = "opt_millis", rename = "ack_timeout_ms")]
    pub ack_timeout: Option<Duration>,

    #[serde(default)]
    pub response_delay: ResponseDelay,
}

impl EndpointConfig {
    pub fn new(
        display_name: impl Into<String>,
        user_name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self::from_identity(EndpointIdentity::new(display_name, user_name, host, port))
    }

    pub fn from_identity(identity: EndpointIdentity) -> Self {
        Self {
            identity,
            transaction_timeout: None,
            request_timeout: None,
            ack_timeout: None,
            response_delay: ResponseDelay::default(),
        }
    }

    pub fn with_transport(mut self, transport: TransportProtocol) -> Self {
        self.identity.transport = transport;
        self
    }

    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = Some(timeout);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = Some(timeout);
        self
    }

    pub fn with_response_delay(mut self, delay: ResponseDelay) -> Self {
        self.response_delay = delay;
        self
    }

    /// Check the configuration before an endpoint is built from it
    pub fn validate(&self) -> CallFlowResult<()> {
        if self.identity.user_name.trim().is_empty() {
            return Err(CallFlowError::config("user name must not be empty"));
        }
        if self.identity.host.trim().is_empty() {
            return Err(CallFlowError::config("host must not be empty"));
        }
        if self.identity.port == 0 {
            return Err(CallFlowError::config("port must be non-zero"));
        }
        for (name, value) in [
            ("transaction_timeout", self.transaction_timeout),
            ("request_timeout", self.request_timeout),
            ("ack_timeout", self.ack_timeout),
        ] {
            if value == Some(Duration::ZERO) {
                return Err(CallFlowError::config(format!("{} must be greater than zero", name)));
            }
        }
        Ok(())
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}
