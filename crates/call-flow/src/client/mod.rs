//! Client call-flow controller
//!
//! Drives one outbound exchange from request construction to its final
//! response:
//!
//! ```text
//!   Building ──send──▶ Sent ──▶ AwaitingFinal ──2xx──▶ Confirmed
//!                                   │  ▲
//!                                   │  └── 1xx
//!                                   └──── ≥300 / error ──▶ Failed
//! ```
//!
//! INVITE starts a new call on the endpoint's dialog and acknowledges its 2xx.
//! Every other method reuses the dialog as is and is never acknowledged. The
//! dialog is left untouched on failure.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::EndpointIdentity;
use crate::dialog::Dialog;
use crate::errors::{CallFlowError, CallFlowResult};
use crate::ids::IdGenerator;
use crate::message::builder::{self, RequestParts};
use crate::message::{Method, Request, Response};
use crate::transaction::{ClientExchange, ExchangeEvent, TransactionLayer};

/// States of one client exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Building,
    Sent,
    AwaitingFinal,
    Confirmed,
    Failed,
}

/// Result of a client exchange that reached a 2xx
#[derive(Debug, Clone)]
pub struct ExchangeOutcome {
    pub method: Method,
    pub call_id: String,
    /// CSeq number the request carried
    pub cseq: u32,
    /// Number of 1xx responses seen before the final one
    pub provisional_responses: usize,
    pub final_response: Response,
    /// Whether an ACK was handed to the transaction layer
    pub acknowledged: bool,
    pub state: ClientState,
}

/// One client exchange on an endpoint's dialog
pub(crate) struct ClientCallFlow<'a> {
    local: &'a EndpointIdentity,
    dialog: &'a Mutex<Dialog>,
    layer: &'a dyn TransactionLayer,
    ids: &'a IdGenerator,
    timeout: Option<Duration>,
    state: ClientState,
}

impl<'a> ClientCallFlow<'a> {
    pub(crate) fn new(
        local: &'a EndpointIdentity,
        dialog: &'a Mutex<Dialog>,
        layer: &'a dyn TransactionLayer,
        ids: &'a IdGenerator,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            local,
            dialog,
            layer,
            ids,
            timeout,
            state: ClientState::Building,
        }
    }

    /// INVITE `callee` on a fresh call and acknowledge the 2xx
    pub(crate) async fn invite(
        mut self,
        callee: &EndpointIdentity,
        cancel: &CancellationToken,
    ) -> CallFlowResult<ExchangeOutcome> {
        let call_id = self.ids.call_id();
        let local_tag = self.ids.tag();
        let branch = self.ids.branch();

        let built = {
            let mut dialog = self.dialog.lock();
            dialog.next_cseq().map(|cseq| {
                dialog.begin_call(call_id, local_tag, branch.clone());
                (Self::build(self.local, callee, &dialog, &Method::Invite, &branch, cseq), cseq)
            })
        };
        let (request, cseq) = built.ok_or_else(|| self.fail(CallFlowError::SequenceExhausted))?;

        let mut exchange = self.submit(request, callee).await?;
        self.await_final(&mut exchange, &Method::Invite, cseq, cancel).await
    }

    /// Any non-INVITE request inside the current dialog
    pub(crate) async fn non_invite(
        mut self,
        callee: &EndpointIdentity,
        method: Method,
        cancel: &CancellationToken,
    ) -> CallFlowResult<ExchangeOutcome> {
        if matches!(method, Method::Invite | Method::Ack) {
            return Err(CallFlowError::config(format!("{} is not a non-INVITE exchange", method)));
        }
        let branch = self.ids.branch();

        let built = {
            let mut dialog = self.dialog.lock();
            dialog.next_cseq().map(|cseq| {
                dialog.begin_exchange(branch.clone());
                (Self::build(self.local, callee, &dialog, &method, &branch, cseq), cseq)
            })
        };
        let (request, cseq) = built.ok_or_else(|| self.fail(CallFlowError::SequenceExhausted))?;

        let mut exchange = self.submit(request, callee).await?;
        self.await_final(&mut exchange, &method, cseq, cancel).await
    }

    fn build(
        local: &EndpointIdentity,
        callee: &EndpointIdentity,
        dialog: &Dialog,
        method: &Method,
        branch: &str,
        cseq: u32,
    ) -> Request {
        builder::request(
            local,
            callee,
            RequestParts {
                method,
                branch,
                call_id: &dialog.call_id,
                local_tag: &dialog.local_tag,
                remote_tag: dialog.remote_tag_or_empty(),
                cseq,
            },
        )
    }

    async fn submit(
        &mut self,
        request: Request,
        callee: &EndpointIdentity,
    ) -> CallFlowResult<ClientExchange> {
        info!(
            call_id = request.headers.call_id().unwrap_or_default(),
            cseq = request.headers.cseq().map(|c| c.seq).unwrap_or_default(),
            "Sending: {}",
            request.short()
        );
        debug!("Full form:\n{}", request);

        let exchange = match self.layer.send(request, &callee.address()).await {
            Ok(exchange) => exchange,
            Err(e) => {
                self.transition(ClientState::Failed);
                warn!(error = %e, destination = %callee.address(), "transaction layer refused request");
                return Err(e.into());
            }
        };

        self.dialog.lock().exchange_submitted(exchange.id());
        self.transition(ClientState::Sent);
        Ok(exchange)
    }

    async fn await_final(
        &mut self,
        exchange: &mut ClientExchange,
        method: &Method,
        cseq: u32,
        cancel: &CancellationToken,
    ) -> CallFlowResult<ExchangeOutcome> {
        self.transition(ClientState::AwaitingFinal);
        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut provisional_responses = 0;

        loop {
            let event = match exchange.next_event(cancel, deadline).await {
                Ok(event) => event,
                Err(e) => return Err(self.fail(e)),
            };

            let response = match event {
                ExchangeEvent::Response(response) => response,
                ExchangeEvent::Error(e) => {
                    warn!(branch = %exchange.branch(), "{}", e);
                    return Err(self.fail(e.into()));
                }
            };

            info!(status = response.status, branch = %exchange.branch(), "Received response: {}", response.short());
            debug!("Full form:\n{}", response);

            match response.status {
                status if response.is_provisional() => {
                    provisional_responses += 1;
                    trace!(status, "informational response, still waiting");
                }
                _ if response.is_success() => {
                    let acknowledged = if *method == Method::Invite {
                        self.confirm_invite(exchange, &response).await?;
                        true
                    } else {
                        info!("Successful transaction");
                        false
                    };
                    self.transition(ClientState::Confirmed);

                    let call_id = self.dialog.lock().call_id.clone();
                    return Ok(ExchangeOutcome {
                        method: method.clone(),
                        call_id,
                        cseq,
                        provisional_responses,
                        final_response: response,
                        acknowledged,
                        state: self.state,
                    });
                }
                status => {
                    return Err(self.fail(CallFlowError::NegativeResponse {
                        status,
                        reason: response.reason.clone(),
                    }));
                }
            }
        }
    }

    /// Store the callee's tag and acknowledge the 2xx
    async fn confirm_invite(
        &mut self,
        exchange: &ClientExchange,
        response: &Response,
    ) -> CallFlowResult<()> {
        match response.headers.to_addr().and_then(|to| to.tag()) {
            Some(tag) => self.dialog.lock().set_remote_tag(tag),
            None => debug!("2xx carried no To tag, remote tag left unset"),
        }

        info!("Sending Ack");
        if let Err(e) = exchange.ack().await {
            return Err(self.fail(e.into()));
        }
        Ok(())
    }

    fn fail(&mut self, error: CallFlowError) -> CallFlowError {
        self.transition(ClientState::Failed);
        error
    }

    fn transition(&mut self, next: ClientState) {
        trace!(from = ?self.state, to = ?next, "client exchange state");
        self.state = next;
    }
}
