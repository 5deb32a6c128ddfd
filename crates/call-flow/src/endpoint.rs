//! Endpoint: identity, one dialog, and the call-flow operations
//!
//! An [`Endpoint`] is built from an [`EndpointConfig`], bound once to a
//! [`TransactionLayer`] with [`Endpoint::start`], and then drives calls:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rvoip_call_flow::{Endpoint, EndpointConfig};
//! use rvoip_call_flow::transaction::loopback::LoopbackNetwork;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let network = LoopbackNetwork::new();
//! let alice = Arc::new(Endpoint::new(EndpointConfig::new("Alice Phone", "alice", "127.0.0.1", 5062))?);
//! let bob = Arc::new(Endpoint::new(EndpointConfig::new("Bob Phone", "bob", "127.0.0.1", 5060))?);
//! alice.start(network.bind(alice.identity().address())?)?;
//! bob.start(network.bind(bob.identity().address())?)?;
//!
//! let server = tokio::spawn({
//!     let bob = bob.clone();
//!     async move { bob.serve_invite().await }
//! });
//! alice.invite(bob.identity()).await?;
//! server.await??;
//! # Ok(())
//! # }
//! ```
//!
//! Client operations on one endpoint are serialised: a second `invite` or
//! `bye` waits until the exchange in flight has finished, because the dialog
//! tracks a single current exchange.

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::{ClientCallFlow, ExchangeOutcome};
use crate::config::{EndpointConfig, EndpointIdentity};
use crate::dialog::Dialog;
use crate::errors::{CallFlowError, CallFlowResult};
use crate::ids::IdGenerator;
use crate::message::Method;
use crate::server::{ServedExchange, ServerCallFlow, ServerTiming};
use crate::transaction::TransactionLayer;

#[derive(Debug)]
pub struct Endpoint {
    config: EndpointConfig,
    ids: IdGenerator,
    dialog: Mutex<Dialog>,
    client_exchange: AsyncMutex<()>,
    layer: OnceLock<Arc<dyn TransactionLayer>>,
}

impl Endpoint {
    /// Build an endpoint whose identifiers come from OS entropy
    pub fn new(config: EndpointConfig) -> CallFlowResult<Self> {
        Self::with_id_generator(config, IdGenerator::from_entropy())
    }

    /// Build an endpoint with an injected identifier source
    pub fn with_id_generator(config: EndpointConfig, ids: IdGenerator) -> CallFlowResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ids,
            dialog: Mutex::new(Dialog::new()),
            client_exchange: AsyncMutex::new(()),
            layer: OnceLock::new(),
        })
    }

    pub fn identity(&self) -> &EndpointIdentity {
        &self.config.identity
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Bind the transaction layer; only the first call succeeds
    pub fn start(&self, layer: Arc<dyn TransactionLayer>) -> CallFlowResult<()> {
        self.layer.set(layer).map_err(|_| CallFlowError::AlreadyStarted)?;
        info!(address = %self.config.identity.address(), transport = %self.config.identity.transport, "endpoint started");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.layer.get().is_some()
    }

    /// Snapshot of the dialog
    pub fn dialog(&self) -> Dialog {
        self.dialog.lock().clone()
    }

    pub fn clear_dialog(&self) {
        self.dialog.lock().clear();
        debug!(user = %self.config.identity.user_name, "dialog cleared");
    }

    fn layer(&self) -> CallFlowResult<&dyn TransactionLayer> {
        self.layer
            .get()
            .map(|layer| layer.as_ref())
            .ok_or(CallFlowError::NotStarted)
    }

    fn client(&self) -> CallFlowResult<ClientCallFlow<'_>> {
        Ok(ClientCallFlow::new(
            &self.config.identity,
            &self.dialog,
            self.layer()?,
            &self.ids,
            self.config.transaction_timeout,
        ))
    }

    fn server(&self) -> CallFlowResult<ServerCallFlow<'_>> {
        Ok(ServerCallFlow::new(
            &self.config.identity,
            &self.dialog,
            self.layer()?,
            &self.ids,
            ServerTiming {
                request_timeout: self.config.request_timeout,
                ack_timeout: self.config.ack_timeout,
                response_delay: self.config.response_delay,
            },
        ))
    }

    /// Wait for the client exchange in flight to finish
    async fn exchange_slot(&self, cancel: &CancellationToken) -> CallFlowResult<AsyncMutexGuard<'_, ()>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CallFlowError::Cancelled("awaiting the exchange in flight")),
            guard = self.client_exchange.lock() => Ok(guard),
        }
    }

    /// Start a new call to `callee`
    pub async fn invite(&self, callee: &EndpointIdentity) -> CallFlowResult<ExchangeOutcome> {
        self.invite_with_cancel(callee, &CancellationToken::new()).await
    }

    pub async fn invite_with_cancel(
        &self,
        callee: &EndpointIdentity,
        cancel: &CancellationToken,
    ) -> CallFlowResult<ExchangeOutcome> {
        let client = self.client()?;
        let _in_flight = self.exchange_slot(cancel).await?;
        client.invite(callee, cancel).await
    }

    /// Hang up the current call
    pub async fn bye(&self, callee: &EndpointIdentity) -> CallFlowResult<ExchangeOutcome> {
        self.non_invite(callee, Method::Bye).await
    }

    pub async fn bye_with_cancel(
        &self,
        callee: &EndpointIdentity,
        cancel: &CancellationToken,
    ) -> CallFlowResult<ExchangeOutcome> {
        self.non_invite_with_cancel(callee, Method::Bye, cancel).await
    }

    /// Send `method` inside the current dialog
    pub async fn non_invite(&self, callee: &EndpointIdentity, method: Method) -> CallFlowResult<ExchangeOutcome> {
        self.non_invite_with_cancel(callee, method, &CancellationToken::new()).await
    }

    pub async fn non_invite_with_cancel(
        &self,
        callee: &EndpointIdentity,
        method: Method,
        cancel: &CancellationToken,
    ) -> CallFlowResult<ExchangeOutcome> {
        let client = self.client()?;
        let _in_flight = self.exchange_slot(cancel).await?;
        client.non_invite(callee, method, cancel).await
    }

    /// Answer the next inbound request and wait for its ACK
    pub async fn serve_invite(&self) -> CallFlowResult<ServedExchange> {
        self.serve_invite_with_cancel(&CancellationToken::new()).await
    }

    pub async fn serve_invite_with_cancel(&self, cancel: &CancellationToken) -> CallFlowResult<ServedExchange> {
        self.server()?.serve_invite(cancel).await
    }

    /// Answer the next inbound request without waiting for an ACK
    pub async fn serve_non_invite(&self) -> CallFlowResult<ServedExchange> {
        self.serve_non_invite_with_cancel(&CancellationToken::new()).await
    }

    pub async fn serve_non_invite_with_cancel(&self, cancel: &CancellationToken) -> CallFlowResult<ServedExchange> {
        self.server()?.serve_non_invite(cancel).await
    }
}
