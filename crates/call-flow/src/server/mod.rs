//! Server call-flow controller
//!
//! Serves exactly one inbound exchange per invocation: take the next request
//! from the transaction layer, record it in the endpoint's dialog, answer it
//! with an automatic 200 OK and, for INVITE, wait for the ACK. Serving the
//! next call means invoking the controller again.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{EndpointIdentity, ResponseDelay};
use crate::dialog::Dialog;
use crate::errors::{CallFlowError, CallFlowResult};
use crate::ids::IdGenerator;
use crate::message::builder;
use crate::message::{HeaderName, Method, Request, Response};
use crate::transaction::{sleep_until_deadline, ServerExchange, TransactionError, TransactionLayer};

/// What one served exchange looked like
#[derive(Debug, Clone)]
pub struct ServedExchange {
    pub request: Request,
    pub response: Response,
    /// The ACK, when one was awaited
    pub ack: Option<Request>,
}

/// Deadlines and delay a server invocation runs with
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ServerTiming {
    pub request_timeout: Option<Duration>,
    pub ack_timeout: Option<Duration>,
    pub response_delay: ResponseDelay,
}

pub(crate) struct ServerCallFlow<'a> {
    local: &'a EndpointIdentity,
    dialog: &'a Mutex<Dialog>,
    layer: &'a dyn TransactionLayer,
    ids: &'a IdGenerator,
    timing: ServerTiming,
}

impl<'a> ServerCallFlow<'a> {
    pub(crate) fn new(
        local: &'a EndpointIdentity,
        dialog: &'a Mutex<Dialog>,
        layer: &'a dyn TransactionLayer,
        ids: &'a IdGenerator,
        timing: ServerTiming,
    ) -> Self {
        Self { local, dialog, layer, ids, timing }
    }

    /// Answer one request; wait for the ACK when it was an INVITE
    pub(crate) async fn serve_invite(self, cancel: &CancellationToken) -> CallFlowResult<ServedExchange> {
        self.serve(cancel, true).await
    }

    /// Answer one request without waiting for an ACK
    pub(crate) async fn serve_non_invite(self, cancel: &CancellationToken) -> CallFlowResult<ServedExchange> {
        self.serve(cancel, false).await
    }

    async fn serve(self, cancel: &CancellationToken, await_ack: bool) -> CallFlowResult<ServedExchange> {
        info!("Listening for incoming requests...");
        let mut exchange = self.next_request(cancel).await?;
        let request = exchange.origin().clone();
        info!("Received request: {}", request.short());
        debug!("Full form:\n{}", request);

        let local_tag = self.record(&request)?;
        let response = builder::ok_response(&request, self.local, &local_tag);

        self.timing.response_delay.wait().await;
        info!("Sending 200 OK");
        exchange.respond(response.clone()).await?;

        let ack = if await_ack && request.method == Method::Invite {
            let deadline = self.timing.ack_timeout.map(|t| Instant::now() + t);
            let ack = exchange.wait_ack(cancel, deadline).await?;
            info!("Received ACK");
            debug!("Full form:\n{}", ack);
            Some(ack)
        } else {
            if await_ack {
                warn!(method = %request.method, "request is not an INVITE, not waiting for ACK");
            }
            None
        };

        Ok(ServedExchange { request, response, ack })
    }

    async fn next_request(&self, cancel: &CancellationToken) -> CallFlowResult<ServerExchange> {
        let deadline = self.timing.request_timeout.map(|t| Instant::now() + t);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CallFlowError::Cancelled("awaiting an inbound request")),
            exchange = self.layer.next_request() => {
                exchange.ok_or(CallFlowError::Transport(TransactionError::Closed))
            }
            _ = sleep_until_deadline(deadline) => Err(CallFlowError::Timeout("awaiting an inbound request")),
        }
    }

    /// Record the inbound call in the dialog and pick our To tag
    ///
    /// An untagged To means a new call, so a fresh local tag is generated;
    /// an in-dialog request keeps the tag it already carries.
    fn record(&self, request: &Request) -> CallFlowResult<String> {
        let call_id = request
            .headers
            .call_id()
            .ok_or(CallFlowError::MissingHeader(HeaderName::CallId))?;
        let local_tag = match request.headers.to_addr().and_then(|to| to.tag()) {
            Some(tag) => tag.to_string(),
            None => self.ids.tag(),
        };
        let remote_tag = request.headers.from_addr().and_then(|from| from.tag());

        self.dialog
            .lock()
            .accept_call(call_id.to_string(), local_tag.clone(), remote_tag.map(str::to_string));
        Ok(local_tag)
    }
}
