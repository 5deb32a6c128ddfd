//! In-memory transaction layer
//!
//! A [`LoopbackNetwork`] is a routing table from `host:port` addresses to
//! bound [`LoopbackTransactionLayer`]s. Sending a request to a bound address
//! hands a [`ServerExchange`] to that layer's inbound stream and spawns a
//! bridge task that carries responses back to the client and turns the
//! client's ACK into an ACK request for the server. Unbound destinations are
//! reported on the client's error source.
//!
//! There are no retransmissions; the only timer is the optional transaction
//! timeout, which stands in for Timer B/F.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::message::builder::ack_request;
use crate::message::{Method, Request, Response};

use super::{
    sleep_until_deadline, ClientCommand, ClientExchange, ClientExchangeRemote, ExchangeId,
    ServerCommand, ServerExchange, ServerExchangeRemote, TransactionError, TransactionLayer,
};

const INBOUND_QUEUE_CAPACITY: usize = 64;

/// Shared routing table for in-memory endpoints
#[derive(Debug, Clone, Default)]
pub struct LoopbackNetwork {
    routes: Arc<Mutex<HashMap<String, mpsc::Sender<ServerExchange>>>>,
    transaction_timeout: Option<Duration>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail client exchanges with [`TransactionError::Timeout`] when no final
    /// response arrives within `timeout`
    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = Some(timeout);
        self
    }

    /// Bind `address` and return the layer listening on it
    pub fn bind(&self, address: impl Into<String>) -> Result<Arc<LoopbackTransactionLayer>, TransactionError> {
        let address = address.into();
        let (tx, rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);

        {
            let mut routes = self.routes.lock();
            if routes.get(&address).is_some_and(|existing| !existing.is_closed()) {
                return Err(TransactionError::AddressInUse(address));
            }
            routes.insert(address.clone(), tx);
        }

        debug!(%address, "loopback layer bound");
        Ok(Arc::new(LoopbackTransactionLayer {
            address,
            network: self.clone(),
            inbound: AsyncMutex::new(rx),
        }))
    }

    pub fn unbind(&self, address: &str) {
        if self.routes.lock().remove(address).is_some() {
            debug!(%address, "loopback layer unbound");
        }
    }

    fn route(&self, destination: &str) -> Option<mpsc::Sender<ServerExchange>> {
        self.routes.lock().get(destination).cloned()
    }
}

/// Transaction layer bound to one address of a [`LoopbackNetwork`]
#[derive(Debug)]
pub struct LoopbackTransactionLayer {
    address: String,
    network: LoopbackNetwork,
    inbound: AsyncMutex<mpsc::Receiver<ServerExchange>>,
}

impl LoopbackTransactionLayer {
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Drop for LoopbackTransactionLayer {
    fn drop(&mut self) {
        self.network.unbind(&self.address);
    }
}

#[async_trait]
impl TransactionLayer for LoopbackTransactionLayer {
    async fn send(&self, request: Request, destination: &str) -> Result<ClientExchange, TransactionError> {
        let id = ExchangeId::new();
        let branch = request
            .headers
            .via()
            .and_then(|via| via.branch())
            .unwrap_or_default()
            .to_string();
        let (client, client_remote) = ClientExchange::channel(id, branch);

        let delivered = match self.network.route(destination) {
            Some(inbound) => {
                let (server, server_remote) = ServerExchange::channel(id, request.clone());
                match inbound.send(server).await {
                    Ok(()) => Some(server_remote),
                    Err(_) => None,
                }
            }
            None => None,
        };

        match delivered {
            Some(server_remote) => {
                trace!(exchange = %id, from = %self.address, to = %destination, "{}", request.short());
                let deadline = self.network.transaction_timeout.map(|t| Instant::now() + t);
                tokio::spawn(bridge(id, request, client_remote, server_remote, deadline));
            }
            None => {
                warn!(exchange = %id, %destination, "no loopback layer bound at destination");
                // Buffered; the client still reads it after the remote end drops.
                let _ = client_remote
                    .errors
                    .send(TransactionError::NoRoute(destination.to_string()))
                    .await;
            }
        }

        Ok(client)
    }

    async fn next_request(&self) -> Option<ServerExchange> {
        self.inbound.lock().await.recv().await
    }
}

/// Carry one exchange between its client and server halves
async fn bridge(
    id: ExchangeId,
    request: Request,
    mut client: ClientExchangeRemote,
    mut server: ServerExchangeRemote,
    deadline: Option<Instant>,
) {
    let is_invite = request.method == Method::Invite;
    let mut final_response: Option<Response> = None;
    let mut server_open = true;

    loop {
        let awaiting_final = final_response.is_none();
        tokio::select! {
            cmd = server.commands.recv(), if server_open => match cmd {
                Some(ServerCommand::Respond(response)) => {
                    let is_final = response.status >= 200;
                    let expects_ack = is_invite && response.is_success();
                    if is_final && final_response.is_none() {
                        final_response = Some(response.clone());
                    }
                    if client.responses.send(response).await.is_err() {
                        trace!(exchange = %id, "client exchange dropped");
                        break;
                    }
                    if is_final && !expects_ack {
                        break;
                    }
                }
                None => {
                    server_open = false;
                    if final_response.is_none() {
                        let _ = client
                            .errors
                            .send(TransactionError::Transport(
                                "server abandoned the exchange without a final response".to_string(),
                            ))
                            .await;
                        break;
                    }
                }
            },
            cmd = client.commands.recv() => match cmd {
                Some(ClientCommand::Ack) => {
                    match &final_response {
                        Some(response) => {
                            let ack = ack_request(&request, response);
                            trace!(exchange = %id, "{}", ack.short());
                            let _ = server.acks.send(ack).await;
                        }
                        None => warn!(exchange = %id, "ACK requested before a final response"),
                    }
                    break;
                }
                None => break,
            },
            _ = sleep_until_deadline(deadline), if awaiting_final => {
                debug!(exchange = %id, "transaction timed out");
                let _ = client.errors.send(TransactionError::Timeout).await;
                break;
            }
        }
    }
    trace!(exchange = %id, "loopback bridge finished");
}
