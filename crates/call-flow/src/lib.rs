//! # rvoip-call-flow
//!
//! Call-signaling dialog engine for two SIP endpoints: INVITE, ACK and BYE
//! exchanges plus the minimal per-call state needed to correlate them.
//!
//! ## Layers
//!
//! ```text
//!   Endpoint ─┬─ ClientCallFlow ─┐
//!             └─ ServerCallFlow ─┼─▶ message::builder ─▶ TransactionLayer
//!   Dialog  ◀─────────────────────┘        ▲
//!   IdGenerator ───────────────────────────┘
//! ```
//!
//! - [`ids`]: branch, tag and Call-ID tokens from an injectable random source
//! - [`message`]: typed headers, requests, responses and their builders
//! - [`dialog`]: call id, tags, sequence counter and the exchange in flight
//! - [`client`] / [`server`]: the outbound and inbound call-flow controllers
//! - [`transaction`]: the transaction layer contract, plus an in-memory
//!   loopback implementation behind the `loopback` feature
//! - [`endpoint`]: composition root exposing `invite`, `bye` and `serve_*`
//!
//! Wire encoding, sockets and retransmission timers live in the transaction
//! layer, not here.

pub mod client;
pub mod config;
pub mod dialog;
pub mod endpoint;
pub mod errors;
pub mod ids;
pub mod message;
pub mod server;
pub mod transaction;

pub use client::{ClientState, ExchangeOutcome};
pub use config::{EndpointConfig, EndpointIdentity, ResponseDelay, TransportProtocol};
pub use dialog::Dialog;
pub use endpoint::Endpoint;
pub use errors::{CallFlowError, CallFlowResult};
pub use ids::IdGenerator;
pub use message::{Method, Request, Response};
pub use server::ServedExchange;
pub use transaction::{ClientExchange, ExchangeEvent, ServerExchange, TransactionError, TransactionLayer};

/// Re-exported so callers can build cancellation inputs without a direct dependency
pub use tokio_util::sync::CancellationToken;
