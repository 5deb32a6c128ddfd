//! Transaction layer contract
//!
//! The call-flow controllers never touch sockets, timers or transaction
//! matching. They hand requests to a [`TransactionLayer`] and talk to each
//! outstanding exchange through channels:
//!
//! ```text
//!   client side                              server side
//!   ───────────                              ───────────
//!   TransactionLayer::send ──▶ ClientExchange
//!       responses  ◀── Response              ServerExchange ◀── TransactionLayer::next_request
//!       errors     ◀── TransactionError          origin()
//!       ack()      ──▶ ClientCommand::Ack        respond()  ──▶ ServerCommand::Respond
//!                                                wait_ack() ◀── ACK request
//! ```
//!
//! Layer implementations create both halves of an exchange with
//! [`ClientExchange::channel`] and [`ServerExchange::channel`] and keep the
//! returned remote ends.

#[cfg(feature = "loopback")]
pub mod loopback;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;
use uuid::Uuid;

use crate::errors::{CallFlowError, CallFlowResult};
use crate::message::{Request, Response};

/// Buffer size of the per-exchange channels
pub const EXCHANGE_CHANNEL_CAPACITY: usize = 16;

/// Terminal failures reported on an exchange's error source
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    /// No final response arrived in time
    #[error("transaction timed out")]
    Timeout,

    /// Nothing is listening at the destination
    #[error("no route to {0}")]
    NoRoute(String),

    /// The address is already bound by another layer
    #[error("address already in use: {0}")]
    AddressInUse(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// The layer or the exchange went away
    #[error("transaction layer closed")]
    Closed,
}

/// Identifier of one exchange inside a transaction layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExchangeId(Uuid);

impl ExchangeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExchangeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Next thing that happened on a client exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeEvent {
    Response(Response),
    Error(TransactionError),
}

/// Commands a client exchange sends back to its layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Acknowledge the final 2xx of an INVITE
    Ack,
}

/// Commands a server exchange sends back to its layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerCommand {
    Respond(Response),
}

/// What a transaction layer provides to the call-flow controllers
#[async_trait]
pub trait TransactionLayer: Send + Sync + fmt::Debug {
    /// Start a client exchange for `request` towards `destination` (`host:port`)
    async fn send(&self, request: Request, destination: &str) -> Result<ClientExchange, TransactionError>;

    /// Wait for the next newly arrived inbound request; `None` once the layer shuts down
    async fn next_request(&self) -> Option<ServerExchange>;
}

/// Layer end of a client exchange
#[derive(Debug)]
pub struct ClientExchangeRemote {
    pub responses: mpsc::Sender<Response>,
    pub errors: mpsc::Sender<TransactionError>,
    pub commands: mpsc::Receiver<ClientCommand>,
}

/// One outstanding outbound request/response cycle
#[derive(Debug)]
pub struct ClientExchange {
    id: ExchangeId,
    branch: String,
    responses: mpsc::Receiver<Response>,
    errors: mpsc::Receiver<TransactionError>,
    commands: mpsc::Sender<ClientCommand>,
    responses_closed: bool,
    errors_closed: bool,
}

enum Polled {
    Cancelled,
    Deadline,
    Response(Option<Response>),
    Error(Option<TransactionError>),
}

impl ClientExchange {
    /// Create a client exchange and the remote end its layer keeps
    pub fn channel(id: ExchangeId, branch: impl Into<String>) -> (Self, ClientExchangeRemote) {
        let (responses_tx, responses_rx) = mpsc::channel(EXCHANGE_CHANNEL_CAPACITY);
        let (errors_tx, errors_rx) = mpsc::channel(EXCHANGE_CHANNEL_CAPACITY);
        let (commands_tx, commands_rx) = mpsc::channel(EXCHANGE_CHANNEL_CAPACITY);

        let exchange = Self {
            id,
            branch: branch.into(),
            responses: responses_rx,
            errors: errors_rx,
            commands: commands_tx,
            responses_closed: false,
            errors_closed: false,
        };
        let remote = ClientExchangeRemote {
            responses: responses_tx,
            errors: errors_tx,
            commands: commands_rx,
        };
        (exchange, remote)
    }

    pub fn id(&self) -> ExchangeId {
        self.id
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Wait on the response and error sources at once
    ///
    /// Returns exactly one event per call. When both sources are ready the
    /// response wins; cancellation wins over both. Once both sources have
    /// closed the exchange is reported as closed instead of waiting forever.
    pub async fn next_event(
        &mut self,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> CallFlowResult<ExchangeEvent> {
        loop {
            if self.responses_closed && self.errors_closed {
                return Err(CallFlowError::ExchangeClosed);
            }
            let responses_open = !self.responses_closed;
            let errors_open = !self.errors_closed;

            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => Polled::Cancelled,
                r = self.responses.recv(), if responses_open => Polled::Response(r),
                e = self.errors.recv(), if errors_open => Polled::Error(e),
                _ = sleep_until_deadline(deadline) => Polled::Deadline,
            };

            match polled {
                Polled::Cancelled => return Err(CallFlowError::Cancelled("awaiting a final response")),
                Polled::Deadline => return Err(CallFlowError::Timeout("awaiting a final response")),
                Polled::Response(Some(response)) => return Ok(ExchangeEvent::Response(response)),
                Polled::Error(Some(error)) => return Ok(ExchangeEvent::Error(error)),
                Polled::Response(None) => {
                    trace!(exchange = %self.id, "response source closed");
                    self.responses_closed = true;
                }
                Polled::Error(None) => {
                    trace!(exchange = %self.id, "error source closed");
                    self.errors_closed = true;
                }
            }
        }
    }

    /// Ask the layer to acknowledge the final response
    pub async fn ack(&self) -> Result<(), TransactionError> {
        self.commands
            .send(ClientCommand::Ack)
            .await
            .map_err(|_| TransactionError::Closed)
    }
}

/// Layer end of a server exchange
#[derive(Debug)]
pub struct ServerExchangeRemote {
    pub commands: mpsc::Receiver<ServerCommand>,
    pub acks: mpsc::Sender<Request>,
}

/// One inbound request waiting for this endpoint's response
#[derive(Debug)]
pub struct ServerExchange {
    id: ExchangeId,
    origin: Request,
    commands: mpsc::Sender<ServerCommand>,
    acks: mpsc::Receiver<Request>,
}

impl ServerExchange {
    /// Create a server exchange for `origin` and the remote end its layer keeps
    pub fn channel(id: ExchangeId, origin: Request) -> (Self, ServerExchangeRemote) {
        let (commands_tx, commands_rx) = mpsc::channel(EXCHANGE_CHANNEL_CAPACITY);
        let (acks_tx, acks_rx) = mpsc::channel(EXCHANGE_CHANNEL_CAPACITY);
        let exchange = Self {
            id,
            origin,
            commands: commands_tx,
            acks: acks_rx,
        };
        let remote = ServerExchangeRemote {
            commands: commands_rx,
            acks: acks_tx,
        };
        (exchange, remote)
    }

    pub fn id(&self) -> ExchangeId {
        self.id
    }

    /// The request that opened this exchange
    pub fn origin(&self) -> &Request {
        &self.origin
    }

    pub async fn respond(&self, response: Response) -> Result<(), TransactionError> {
        self.commands
            .send(ServerCommand::Respond(response))
            .await
            .map_err(|_| TransactionError::Closed)
    }

    /// Wait for the ACK of a final response
    pub async fn wait_ack(
        &mut self,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> CallFlowResult<Request> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CallFlowError::Cancelled("awaiting ACK")),
            ack = self.acks.recv() => ack.ok_or(CallFlowError::Transport(TransactionError::Closed)),
            _ = sleep_until_deadline(deadline) => Err(CallFlowError::Timeout("awaiting ACK")),
        }
    }
}

/// Sleep until `deadline`, or forever when there is none
pub(crate) async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Headers;
    use std::time::Duration;

    fn response(status: u16) -> Response {
        Response::new(status, "", Headers::new())
    }

    #[tokio::test]
    async fn test_response_wins_over_error_when_both_ready() {
        let (mut exchange, remote) = ClientExchange::channel(ExchangeId::new(), "z9hG4bKAaBbCcDd");
        remote.errors.send(TransactionError::Timeout).await.unwrap();
        remote.responses.send(response(200)).await.unwrap();

        let cancel = CancellationToken::new();
        let first = exchange.next_event(&cancel, None).await.unwrap();
        assert_eq!(first, ExchangeEvent::Response(response(200)));
        let second = exchange.next_event(&cancel, None).await.unwrap();
        assert_eq!(second, ExchangeEvent::Error(TransactionError::Timeout));
    }

    #[tokio::test]
    async fn test_closed_sources_do_not_hang() {
        let (mut exchange, remote) = ClientExchange::channel(ExchangeId::new(), "z9hG4bKAaBbCcDd");
        drop(remote);
        let cancel = CancellationToken::new();
        assert_eq!(exchange.next_event(&cancel, None).await, Err(CallFlowError::ExchangeClosed));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_wait() {
        let (mut exchange, _remote) = ClientExchange::channel(ExchangeId::new(), "z9hG4bKAaBbCcDd");
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            exchange.next_event(&cancel, None).await,
            Err(CallFlowError::Cancelled(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_elapses() {
        let (mut exchange, _remote) = ClientExchange::channel(ExchangeId::new(), "z9hG4bKAaBbCcDd");
        let cancel = CancellationToken::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        assert!(matches!(
            exchange.next_event(&cancel, Some(deadline)).await,
            Err(CallFlowError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_ack_reaches_remote() {
        let (exchange, mut remote) = ClientExchange::channel(ExchangeId::new(), "z9hG4bKAaBbCcDd");
        exchange.ack().await.unwrap();
        assert_eq!(remote.commands.recv().await, Some(ClientCommand::Ack));

        drop(remote);
        assert_eq!(exchange.ack().await, Err(TransactionError::Closed));
    }
}
