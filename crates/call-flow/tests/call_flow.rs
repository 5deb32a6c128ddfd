//! End-to-end call flows between two endpoints over the loopback layer

use std::sync::Arc;
use std::time::Duration;

use rvoip_call_flow::message::builder::{self, RequestParts};
use rvoip_call_flow::message::{HeaderName, Headers, Method, SipUri};
use rvoip_call_flow::transaction::loopback::LoopbackNetwork;
use rvoip_call_flow::{
    CallFlowError, CancellationToken, Dialog, Endpoint, EndpointConfig, EndpointIdentity, ExchangeEvent,
    IdGenerator, Request, ResponseDelay, TransactionError, TransactionLayer,
};
use tokio::time::Instant;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("rvoip_call_flow=debug")
        .with_test_writer()
        .try_init();
}

fn endpoint(display: &str, user: &str, port: u16, seed: u64, delay: ResponseDelay) -> Arc<Endpoint> {
    let config = EndpointConfig::new(display, user, "127.0.0.1", port).with_response_delay(delay);
    Arc::new(Endpoint::with_id_generator(config, IdGenerator::from_seed(seed)).unwrap())
}

fn start_pair(network: &LoopbackNetwork, delay: ResponseDelay) -> (Arc<Endpoint>, Arc<Endpoint>) {
    let alice = endpoint("Alice Phone", "alice", 5062, 1, delay);
    let bob = endpoint("Bob Phone", "bob", 5060, 2, delay);
    alice.start(network.bind(alice.identity().address()).unwrap()).unwrap();
    bob.start(network.bind(bob.identity().address()).unwrap()).unwrap();
    (alice, bob)
}

#[tokio::test]
async fn test_invite_then_bye() {
    init_tracing();
    let network = LoopbackNetwork::new();
    let (alice, bob) = start_pair(&network, ResponseDelay::default());

    // INVITE
    let server = tokio::spawn({
        let bob = bob.clone();
        async move { bob.serve_invite().await }
    });
    let invite = alice.invite(bob.identity()).await.unwrap();
    let served_invite = server.await.unwrap().unwrap();

    assert!(invite.acknowledged);
    assert_eq!(invite.final_response.status, 200);
    let ack = served_invite.ack.expect("bob saw the ACK");
    assert_eq!(ack.method, Method::Ack);
    assert_eq!(ack.headers.cseq().map(|c| c.seq), Some(invite.cseq));

    let alice_dialog = alice.dialog();
    let bob_dialog = bob.dialog();
    assert_eq!(bob_dialog.call_id, alice_dialog.call_id);
    assert_eq!(alice_dialog.remote_tag.as_deref(), Some(bob_dialog.local_tag.as_str()));
    assert_eq!(bob_dialog.remote_tag.as_deref(), Some(alice_dialog.local_tag.as_str()));

    // BYE
    let server = tokio::spawn({
        let bob = bob.clone();
        async move { bob.serve_non_invite().await }
    });
    let bye = alice.bye(bob.identity()).await.unwrap();
    let served_bye = server.await.unwrap().unwrap();

    assert!(!bye.acknowledged);
    assert!(served_bye.ack.is_none());
    assert_eq!(bye.cseq, invite.cseq + 1);
    assert_eq!(bye.call_id, invite.call_id);

    let bye_req = &served_bye.request;
    assert_eq!(bye_req.method, Method::Bye);
    assert_eq!(bye_req.headers.call_id(), Some(alice_dialog.call_id.as_str()));
    assert_eq!(bye_req.headers.from_addr().and_then(|f| f.tag()), Some(alice_dialog.local_tag.as_str()));
    assert_eq!(bye_req.headers.to_addr().and_then(|t| t.tag()), Some(bob_dialog.local_tag.as_str()));

    // An in-dialog BYE keeps bob's tag
    assert_eq!(bob.dialog().local_tag, bob_dialog.local_tag);
}

#[tokio::test]
async fn test_callee_hangs_up() {
    init_tracing();
    let network = LoopbackNetwork::new();
    let (alice, bob) = start_pair(&network, ResponseDelay::None);

    let server = tokio::spawn({
        let bob = bob.clone();
        async move { bob.serve_invite().await }
    });
    alice.invite(bob.identity()).await.unwrap();
    server.await.unwrap().unwrap();

    let server = tokio::spawn({
        let alice = alice.clone();
        async move { alice.serve_non_invite().await }
    });
    let bye = bob.bye(alice.identity()).await.unwrap();
    let served = server.await.unwrap().unwrap();

    assert_eq!(bye.call_id, alice.dialog().call_id);
    assert_eq!(bye.cseq, 0, "bob's own counter starts fresh");
    assert_eq!(served.request.headers.from_addr().and_then(|f| f.tag()), Some(bob.dialog().local_tag.as_str()));
    assert_eq!(served.request.headers.to_addr().and_then(|t| t.tag()), Some(alice.dialog().local_tag.as_str()));
}

#[tokio::test]
async fn test_repeated_calls_need_repeated_serve() {
    let network = LoopbackNetwork::new();
    let (alice, bob) = start_pair(&network, ResponseDelay::None);

    let mut call_ids = Vec::new();
    for _ in 0..3 {
        let server = tokio::spawn({
            let bob = bob.clone();
            async move { bob.serve_invite().await }
        });
        let outcome = alice.invite(bob.identity()).await.unwrap();
        server.await.unwrap().unwrap();
        call_ids.push(outcome.call_id);
    }

    call_ids.dedup();
    assert_eq!(call_ids.len(), 3);
    assert_eq!(alice.dialog().cseq(), 3);
}

#[tokio::test]
async fn test_invite_to_unbound_address_fails() {
    let network = LoopbackNetwork::new();
    let alice = endpoint("Alice Phone", "alice", 5062, 1, ResponseDelay::None);
    alice.start(network.bind(alice.identity().address()).unwrap()).unwrap();
    let ghost = EndpointConfig::new("Ghost", "ghost", "127.0.0.1", 5999).identity;

    let err = alice.invite(&ghost).await.unwrap_err();
    assert_eq!(
        err,
        CallFlowError::Transport(TransactionError::NoRoute("127.0.0.1:5999".into()))
    );
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_invite_times_out_in_layer() {
    let network = LoopbackNetwork::new().with_transaction_timeout(Duration::from_secs(32));
    let (alice, bob) = start_pair(&network, ResponseDelay::None);

    let err = alice.invite(bob.identity()).await.unwrap_err();
    assert_eq!(err, CallFlowError::Transport(TransactionError::Timeout));
    assert_eq!(alice.dialog().remote_tag, None);
}

#[tokio::test]
async fn test_serve_can_be_cancelled() {
    let network = LoopbackNetwork::new();
    let (_alice, bob) = start_pair(&network, ResponseDelay::None);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = bob.serve_invite_with_cancel(&cancel).await.unwrap_err();
    assert!(matches!(err, CallFlowError::Cancelled(_)));
}

#[tokio::test(start_paused = true)]
async fn test_serve_request_deadline() {
    let network = LoopbackNetwork::new();
    let bob = Arc::new(
        Endpoint::new(
            EndpointConfig::new("Bob Phone", "bob", "127.0.0.1", 5060)
                .with_request_timeout(Duration::from_secs(5)),
        )
        .unwrap(),
    );
    bob.start(network.bind(bob.identity().address()).unwrap()).unwrap();

    let err = bob.serve_non_invite().await.unwrap_err();
    assert!(matches!(err, CallFlowError::Timeout(_)));
}

async fn answer_time(delay: ResponseDelay) -> Duration {
    let network = LoopbackNetwork::new();
    let alice = endpoint("Alice Phone", "alice", 5062, 1, ResponseDelay::None);
    let bob = endpoint("Bob Phone", "bob", 5060, 2, delay);
    alice.start(network.bind(alice.identity().address()).unwrap()).unwrap();
    bob.start(network.bind(bob.identity().address()).unwrap()).unwrap();

    let server = tokio::spawn({
        let bob = bob.clone();
        async move { bob.serve_invite().await }
    });
    let started = Instant::now();
    alice.invite(bob.identity()).await.unwrap();
    let elapsed = started.elapsed();
    server.await.unwrap().unwrap();
    elapsed
}

#[tokio::test(start_paused = true)]
async fn test_response_delay_is_applied_before_the_200() {
    let delay = Duration::from_secs(2);
    let elapsed = answer_time(ResponseDelay::Fixed(delay)).await;
    assert!(elapsed >= delay, "answered after {:?}", elapsed);
    assert!(elapsed < delay + Duration::from_millis(100), "answered after {:?}", elapsed);

    let elapsed = answer_time(ResponseDelay::None).await;
    assert!(elapsed < Duration::from_millis(1), "answered after {:?}", elapsed);
}

#[tokio::test]
async fn test_clear_dialog_after_call() {
    let network = LoopbackNetwork::new();
    let (alice, bob) = start_pair(&network, ResponseDelay::None);

    let server = tokio::spawn({
        let bob = bob.clone();
        async move { bob.serve_invite().await }
    });
    alice.invite(bob.identity()).await.unwrap();
    server.await.unwrap().unwrap();
    assert!(alice.dialog().is_established());
    assert!(alice.dialog().current_exchange().is_some());

    alice.clear_dialog();
    let dialog = alice.dialog();
    assert_eq!(dialog, Dialog::new());
    assert!(dialog.call_id.is_empty());
    assert!(dialog.local_tag.is_empty());
    assert_eq!(dialog.remote_tag, None);
    assert_eq!(dialog.cseq(), 0);
    assert!(dialog.current_exchange().is_none());
}

#[tokio::test]
async fn test_serve_invite_answers_non_invite_without_ack() {
    let network = LoopbackNetwork::new();
    let (alice, bob) = start_pair(&network, ResponseDelay::None);

    let server = tokio::spawn({
        let bob = bob.clone();
        async move { bob.serve_invite().await }
    });
    let outcome = alice.non_invite(bob.identity(), Method::Options).await.unwrap();
    let served = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("serve_invite must not wait for an ACK")
        .unwrap()
        .unwrap();

    assert_eq!(outcome.final_response.status, 200);
    assert!(!outcome.acknowledged);
    assert_eq!(served.request.method, Method::Options);
    assert_eq!(served.response.status, 200);
    assert!(served.ack.is_none());
}

#[tokio::test]
async fn test_request_without_call_id_is_rejected() {
    let network = LoopbackNetwork::new();
    let raw = network.bind("127.0.0.1:5062").unwrap();
    let bob = endpoint("Bob Phone", "bob", 5060, 2, ResponseDelay::None);
    bob.start(network.bind(bob.identity().address()).unwrap()).unwrap();

    let request = Request::new(Method::Invite, SipUri::new("bob", "127.0.0.1"), Headers::new());
    let mut exchange = raw.send(request, "127.0.0.1:5060").await.unwrap();

    let err = bob.serve_invite().await.unwrap_err();
    assert_eq!(err, CallFlowError::MissingHeader(HeaderName::CallId));
    assert_eq!(bob.dialog(), Dialog::new());

    let event = tokio::time::timeout(
        Duration::from_secs(5),
        exchange.next_event(&CancellationToken::new(), None),
    )
    .await
    .expect("client must not hang")
    .unwrap();
    assert!(matches!(event, ExchangeEvent::Error(TransactionError::Transport(_))));
}

#[tokio::test(start_paused = true)]
async fn test_missing_ack_times_out() {
    let network = LoopbackNetwork::new();
    let raw = network.bind("127.0.0.1:5062").unwrap();
    let bob = Arc::new(
        Endpoint::new(
            EndpointConfig::new("Bob Phone", "bob", "127.0.0.1", 5060)
                .with_response_delay(ResponseDelay::None)
                .with_ack_timeout(Duration::from_secs(32)),
        )
        .unwrap(),
    );
    bob.start(network.bind(bob.identity().address()).unwrap()).unwrap();

    let alice = EndpointIdentity::new("Alice Phone", "alice", "127.0.0.1", 5062);
    let invite = builder::request(
        &alice,
        bob.identity(),
        RequestParts {
            method: &Method::Invite,
            branch: "z9hG4bKAaBbCcDd",
            call_id: "KkLlMmNn",
            local_tag: "AaBbCc",
            remote_tag: "",
            cseq: 0,
        },
    );
    // Kept alive and never acknowledged
    let mut exchange = raw.send(invite, "127.0.0.1:5060").await.unwrap();

    let err = bob.serve_invite().await.unwrap_err();
    assert!(matches!(err, CallFlowError::Timeout(_)), "{:?}", err);

    let event = exchange.next_event(&CancellationToken::new(), None).await.unwrap();
    match event {
        ExchangeEvent::Response(response) => assert_eq!(response.status, 200),
        other => panic!("unexpected event: {:?}", other),
    }
}
