//! The call loop: one INVITE/ACK/BYE call per tick between two endpoints
//!
//! Each call runs both sides of every exchange concurrently. If either side
//! fails, the other is cancelled through a per-call child token so a lost
//! request never leaves a server waiting forever.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rvoip_call_flow::transaction::loopback::LoopbackNetwork;
use rvoip_call_flow::{CallFlowError, CallFlowResult, CancellationToken, Endpoint};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::HarnessConfig;

/// Counters reported at the end of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub attempted: u64,
    pub completed: u64,
    pub invite_failures: u64,
    pub bye_failures: u64,
}

impl Summary {
    pub fn failed(&self) -> u64 {
        self.invite_failures + self.bye_failures
    }
}

/// Which leg of a call went wrong
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallFailure {
    Invite(CallFlowError),
    Bye(CallFlowError),
}

pub struct CallLoop {
    caller: Arc<Endpoint>,
    callee: Arc<Endpoint>,
    iterations: u64,
    interval: Duration,
}

impl CallLoop {
    /// Build both endpoints and bind them on a fresh loopback network
    pub fn new(config: &HarnessConfig) -> Result<Self> {
        let network = match config.network_timeout() {
            Some(timeout) => LoopbackNetwork::new().with_transaction_timeout(timeout),
            None => LoopbackNetwork::new(),
        };

        let caller = Arc::new(Endpoint::new(config.caller.clone()).context("caller endpoint")?);
        let callee = Arc::new(Endpoint::new(config.callee.clone()).context("callee endpoint")?);
        for endpoint in [&caller, &callee] {
            let address = endpoint.identity().address();
            let layer = network
                .bind(address.clone())
                .with_context(|| format!("failed to bind {}", address))?;
            endpoint.start(layer)?;
        }

        Ok(Self {
            caller,
            callee,
            iterations: config.iterations,
            interval: config.interval(),
        })
    }

    /// Place calls until the iteration count is reached or `shutdown` fires
    pub async fn run(&self, shutdown: &CancellationToken) -> Summary {
        let mut summary = Summary::default();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.iterations == 0 || summary.attempted < self.iterations {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                _ = ticker.tick() => {}
            }

            summary.attempted += 1;
            match self.call_once(shutdown).await {
                Ok(()) => {
                    summary.completed += 1;
                    debug!(call = summary.attempted, "Call completed");
                }
                Err(CallFailure::Invite(e)) => {
                    summary.invite_failures += 1;
                    warn!(call = summary.attempted, error = %e, "INVITE failed");
                }
                Err(CallFailure::Bye(e)) => {
                    summary.bye_failures += 1;
                    warn!(call = summary.attempted, error = %e, "BYE failed");
                }
            }
        }

        summary
    }

    /// Callee answers an INVITE from the caller, then hangs up with a BYE
    pub async fn call_once(&self, shutdown: &CancellationToken) -> Result<(), CallFailure> {
        let call = shutdown.child_token();

        let (placed, served) = tokio::join!(
            cancel_on_error(&call, self.caller.invite_with_cancel(self.callee.identity(), &call)),
            cancel_on_error(&call, self.callee.serve_invite_with_cancel(&call)),
        );
        let outcome = root_cause(placed, served).map_err(CallFailure::Invite)?;
        debug!(call_id = %outcome.call_id, "Call established");

        let (placed, served) = tokio::join!(
            cancel_on_error(&call, self.callee.bye_with_cancel(self.caller.identity(), &call)),
            cancel_on_error(&call, self.caller.serve_non_invite_with_cancel(&call)),
        );
        root_cause(placed, served).map_err(CallFailure::Bye)?;
        Ok(())
    }

    pub fn caller(&self) -> &Endpoint {
        &self.caller
    }

    pub fn callee(&self) -> &Endpoint {
        &self.callee
    }
}

async fn cancel_on_error<T>(
    token: &CancellationToken,
    exchange: impl Future<Output = CallFlowResult<T>>,
) -> CallFlowResult<T> {
    let result = exchange.await;
    if result.is_err() {
        token.cancel();
    }
    result
}

/// Keep the client's result, but report the first error that is not just
/// the other side being cancelled
fn root_cause<T, U>(placed: CallFlowResult<T>, served: CallFlowResult<U>) -> CallFlowResult<T> {
    match (placed, served) {
        (Ok(outcome), Ok(_)) => Ok(outcome),
        (Err(CallFlowError::Cancelled(_)), Err(e)) if !matches!(e, CallFlowError::Cancelled(_)) => Err(e),
        (Err(e), _) => Err(e),
        (Ok(_), Err(e)) => Err(e),
    }
}

pub fn log_summary(summary: &Summary) {
    info!(
        attempted = summary.attempted,
        completed = summary.completed,
        failed = summary.failed(),
        invite_failures = summary.invite_failures,
        bye_failures = summary.bye_failures,
        "Call loop finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use rvoip_call_flow::{EndpointConfig, ResponseDelay, TransactionError};

    fn config(iterations: u64) -> HarnessConfig {
        HarnessConfig {
            iterations,
            interval_ms: 1,
            network_timeout_ms: None,
            caller: EndpointConfig::new("Alice Phone", "alice", "127.0.0.1", 5062)
                .with_response_delay(ResponseDelay::None),
            callee: EndpointConfig::new("Bob Phone", "bob", "127.0.0.1", 5060)
                .with_response_delay(ResponseDelay::None),
        }
    }

    #[tokio::test]
    async fn test_runs_requested_iterations() {
        let calls = CallLoop::new(&config(5)).unwrap();
        let summary = calls.run(&CancellationToken::new()).await;

        assert_eq!(summary.attempted, 5);
        assert_eq!(summary.completed, 5);
        assert_eq!(summary.failed(), 0);

        // Every call consumed one caller INVITE and one callee BYE
        assert_eq!(calls.caller().dialog().cseq(), 5);
        assert_eq!(calls.callee().dialog().cseq(), 5);
        assert_eq!(calls.caller().dialog().call_id, calls.callee().dialog().call_id);
    }

    #[tokio::test]
    async fn test_shutdown_stops_an_endless_loop() {
        let calls = CallLoop::new(&config(0)).unwrap();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let summary = calls.run(&shutdown).await;
        assert_eq!(summary, Summary::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_invite_fails_on_the_network_timer() {
        let mut config = config(1);
        config.network_timeout_ms = Some(32_000);
        let calls = CallLoop::new(&config).unwrap();
        assert_eq!(calls.caller().config().transaction_timeout, None);

        // The callee never serves, so only the network timer can end the wait
        let err = calls.caller().invite(calls.callee().identity()).await.unwrap_err();
        assert_eq!(err, CallFlowError::Transport(TransactionError::Timeout));
    }

    #[test]
    fn test_root_cause_prefers_the_real_error() {
        let placed: CallFlowResult<()> = Err(CallFlowError::Cancelled("awaiting final response"));
        let served: CallFlowResult<()> = Err(CallFlowError::Transport(TransactionError::Closed));
        assert_eq!(
            root_cause(placed, served),
            Err(CallFlowError::Transport(TransactionError::Closed))
        );

        let placed: CallFlowResult<()> = Err(CallFlowError::Transport(TransactionError::Timeout));
        let served: CallFlowResult<()> = Err(CallFlowError::Cancelled("awaiting request"));
        assert_eq!(
            root_cause(placed, served),
            Err(CallFlowError::Transport(TransactionError::Timeout))
        );
    }
}
