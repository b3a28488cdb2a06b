//! Routing behavior over the in-process transport.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::timeout;

use eventsocket_client::transport::{MemoryConnector, MemoryPeer};
use eventsocket_client::{Client, ClientConfig, Inbox, LinkState};
use eventsocket_core::protocol::{Envelope, MessageType, Payload};

const QUIET: Duration = Duration::from_millis(50);
const WAIT: Duration = Duration::from_secs(2);

struct Fixture {
    client: Client,
    inbox: Inbox,
    peer: MemoryPeer,
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
    connector: Arc<MemoryConnector>,
}

async fn fixture() -> Fixture {
    fixture_with(ClientConfig::new("mem:0")).await
}

async fn fixture_with(cfg: ClientConfig) -> Fixture {
    let (connector, mut peers) = MemoryConnector::new("client-1");
    let connector = Arc::new(connector);
    let (client, inbox) = Client::with_connector(connector.clone(), cfg)
        .await
        .unwrap();
    let peer = timeout(WAIT, peers.recv()).await.unwrap().unwrap();
    Fixture {
        client,
        inbox,
        peer,
        peers,
        connector,
    }
}

fn payload(v: Value) -> Payload {
    match v {
        Value::Object(m) => m,
        other => panic!("not an object: {other}"),
    }
}

#[tokio::test]
async fn registers_then_dials_with_the_assigned_id() {
    let f = fixture().await;
    assert_eq!(f.client.id(), "client-1");
    assert_eq!(f.peer.client_id(), "client-1");
    assert_eq!(f.client.state(), LinkState::Connected);
}

#[tokio::test]
async fn disjoint_subscriptions_receive_exactly_their_events() {
    let mut f = fixture().await;

    let mut subs = Vec::new();
    for topics in [["a1", "a2"], ["b1", "b2"], ["c1", "c2"]] {
        subs.push(f.client.subscribe(&topics).await.unwrap());
        let sent = f.peer.next_sent().await.unwrap();
        assert_eq!(sent.message_type, MessageType::Subscribe);
        assert_eq!(sent.topics(), topics.to_vec());
    }

    // interleaved across subscribers
    for topic in ["c2", "a1", "b2", "a2", "c1", "b1"] {
        f.peer
            .push(&Envelope::standard(topic, payload(json!({ "t": topic }))))
            .await
            .unwrap();
    }

    for (sub, expect) in subs.iter_mut().zip([["a1", "a2"], ["b2", "b1"], ["c2", "c1"]]) {
        for topic in expect {
            let got = timeout(WAIT, sub.recv()).await.unwrap().unwrap();
            assert_eq!(got.event(), Some(topic));
            assert_eq!(got.payload()["t"], topic);
        }
    }
    for sub in subs.iter_mut() {
        assert!(timeout(QUIET, sub.recv()).await.is_err(), "no extra deliveries");
    }
}

#[tokio::test]
async fn request_gets_exactly_one_reply() {
    let mut f = fixture().await;

    let mut pending = f
        .client
        .request("client-2", payload(json!({ "q": 1 })))
        .await
        .unwrap();

    let sent = f.peer.next_sent().await.unwrap();
    assert_eq!(sent.message_type, MessageType::Request);
    assert_eq!(sent.request_id.as_deref(), Some(pending.request_id()));
    assert_eq!(sent.request_client_id.as_deref(), Some("client-2"));

    let reply = Envelope::reply(pending.request_id(), "client-1", payload(json!({ "a": 2 })));
    f.peer.push(&reply).await.unwrap();
    // a duplicate must be absorbed
    f.peer.push(&reply).await.unwrap();

    let got = timeout(WAIT, pending.recv()).await.unwrap().unwrap();
    assert_eq!(got.message_type(), MessageType::Reply);
    assert_eq!(got.payload()["a"], 2);
    assert!(pending.recv().await.is_none());
    assert_eq!(f.client.pending_requests(), 0);
}

#[tokio::test]
async fn unknown_reply_has_no_effect() {
    let mut f = fixture().await;

    f.peer
        .push(&Envelope::reply("never-issued", "client-1", Payload::new()))
        .await
        .unwrap();
    f.peer
        .push(&Envelope::broadcast(payload(json!({ "after": true }))))
        .await
        .unwrap();

    let b = timeout(WAIT, f.inbox.broadcasts.recv()).await.unwrap().unwrap();
    assert_eq!(b.payload()["after"], true);
    assert!(timeout(QUIET, f.inbox.errors.recv()).await.is_err());
    assert_eq!(f.client.state(), LinkState::Connected);
}

#[tokio::test]
async fn broadcasts_keep_receive_order() {
    let mut f = fixture().await;

    for n in 1..=3 {
        f.peer
            .push(&Envelope::broadcast(payload(json!({ "n": n }))))
            .await
            .unwrap();
    }
    for n in 1..=3 {
        let b = timeout(WAIT, f.inbox.broadcasts.recv()).await.unwrap().unwrap();
        assert_eq!(b.payload()["n"], n);
    }
}

#[tokio::test]
async fn malformed_frame_is_reported_and_loop_continues() {
    let mut f = fixture().await;

    f.peer.push_raw("{\"MessageType\":1,").await.unwrap();
    f.peer.push_raw("{\"MessageType\":4,\"Payload\":{}}").await.unwrap();
    f.peer
        .push(&Envelope::broadcast(payload(json!({ "ok": 1 }))))
        .await
        .unwrap();

    let e1 = timeout(WAIT, f.inbox.errors.recv()).await.unwrap().unwrap();
    assert_eq!(e1.code().as_str(), "DECODE_FAILED");
    let e2 = timeout(WAIT, f.inbox.errors.recv()).await.unwrap().unwrap();
    assert_eq!(e2.code().as_str(), "INVALID_ENVELOPE");

    let b = timeout(WAIT, f.inbox.broadcasts.recv()).await.unwrap().unwrap();
    assert_eq!(b.payload()["ok"], 1);
}

#[tokio::test]
async fn emit_reaches_the_wire_intact() {
    let mut f = fixture().await;
    let p = payload(json!({ "z": [1, 2], "a": { "deep": "x" } }));

    f.client.emit("topic", p.clone()).await.unwrap();

    let sent = f.peer.next_sent().await.unwrap();
    assert_eq!(sent.message_type, MessageType::Standard);
    assert_eq!(sent.event.as_deref(), Some("topic"));
    assert_eq!(sent.payload, p);
}

#[tokio::test]
async fn duplicate_topic_last_subscription_wins() {
    let f = fixture().await;

    let mut first = f.client.subscribe(&["alerts"]).await.unwrap();
    let mut second = f.client.subscribe(&["alerts"]).await.unwrap();

    f.peer
        .push(&Envelope::standard("alerts", payload(json!({ "n": 1 }))))
        .await
        .unwrap();

    let got = timeout(WAIT, second.recv()).await.unwrap().unwrap();
    assert_eq!(got.payload()["n"], 1);
    // the first channel lost its only topic and ends
    assert!(timeout(WAIT, first.recv()).await.unwrap().is_none());
}

#[tokio::test]
async fn failed_subscribe_keeps_the_earlier_subscriber() {
    let mut f = fixture().await;

    let mut first = f.client.subscribe(&["alerts"]).await.unwrap();

    // with the server end gone every write fails
    drop(f.peer);
    let err = f.client.subscribe(&["alerts", "other"]).await.unwrap_err();
    assert_eq!(err.code().as_str(), "SEND_FAILED");
    assert_eq!(f.client.subscribed_topics(), vec!["alerts".to_string()]);

    f.client.reconnect().await.unwrap();
    let peer = timeout(WAIT, f.peers.recv()).await.unwrap().unwrap();
    peer.push(&Envelope::standard("alerts", payload(json!({ "n": 7 }))))
        .await
        .unwrap();

    let got = timeout(WAIT, first.recv()).await.unwrap().unwrap();
    assert_eq!(got.payload()["n"], 7);
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let mut f = fixture().await;

    let mut sub = f.client.subscribe(&["x", "y"]).await.unwrap();
    f.client.unsubscribe(&["x"]).await.unwrap();
    let _subscribe = f.peer.next_sent().await.unwrap();
    let sent = f.peer.next_sent().await.unwrap();
    assert_eq!(sent.message_type, MessageType::Unsubscribe);
    assert_eq!(sent.topics(), vec!["x".to_string()]);

    f.peer.push(&Envelope::standard("x", Payload::new())).await.unwrap();
    f.peer.push(&Envelope::standard("y", Payload::new())).await.unwrap();

    let got = timeout(WAIT, sub.recv()).await.unwrap().unwrap();
    assert_eq!(got.event(), Some("y"));
    assert_eq!(f.client.subscribed_topics(), vec!["y".to_string()]);

    drop(sub);
    assert!(f.client.subscribed_topics().is_empty());
}

#[tokio::test]
async fn inbound_request_can_be_answered() {
    let mut f = fixture().await;

    let mut req = Envelope::request("r-77", "client-1", payload(json!({ "ping": true })));
    req.reply_client_id = Some("client-9".into());
    f.peer.push(&req).await.unwrap();

    let got = timeout(WAIT, f.inbox.requests.recv()).await.unwrap().unwrap();
    let rid = got.request_id().unwrap().to_string();
    let from = got.envelope.reply_client_id.clone().unwrap();

    f.client
        .reply(&rid, &from, payload(json!({ "pong": true })))
        .await
        .unwrap();

    let sent = f.peer.next_sent().await.unwrap();
    assert_eq!(sent.message_type, MessageType::Reply);
    assert_eq!(sent.request_id.as_deref(), Some("r-77"));
    assert_eq!(sent.reply_client_id.as_deref(), Some("client-9"));
}

#[tokio::test]
async fn peer_close_ends_the_loop_and_reconnect_restores_it() {
    let mut f = fixture().await;

    let mut sub = f.client.subscribe(&["news"]).await.unwrap();
    let mut pending = f.client.request("client-2", Payload::new()).await.unwrap();

    f.peer.close().await;
    timeout(WAIT, f.client.closed()).await.unwrap();
    assert_eq!(f.client.state(), LinkState::Closed);

    let e = timeout(WAIT, f.inbox.errors.recv()).await.unwrap().unwrap();
    assert!(e.is_fatal());

    f.client.reconnect().await.unwrap();
    assert_eq!(f.client.state(), LinkState::Connected);
    let peer = timeout(WAIT, f.peers.recv()).await.unwrap().unwrap();
    assert_eq!(peer.client_id(), "client-1");

    // table entries survive the reconnect
    peer.push(&Envelope::standard("news", Payload::new())).await.unwrap();
    assert!(timeout(WAIT, sub.recv()).await.unwrap().is_some());

    let rid = pending.request_id().to_string();
    peer.push(&Envelope::reply(rid, "client-1", Payload::new()))
        .await
        .unwrap();
    assert!(timeout(WAIT, pending.recv()).await.unwrap().is_some());
}

#[tokio::test]
async fn failed_redial_is_surfaced() {
    let f = fixture().await;

    f.connector.refuse_dials(true);
    let err = f.client.reconnect().await.unwrap_err();
    assert_eq!(err.code().as_str(), "DIAL_FAILED");
    assert_eq!(f.client.state(), LinkState::Closed);

    let err = f.client.broadcast(Payload::new()).await.unwrap_err();
    assert_eq!(err.code().as_str(), "NOT_CONNECTED");

    f.connector.refuse_dials(false);
    f.client.reconnect().await.unwrap();
    assert_eq!(f.client.state(), LinkState::Connected);
}

#[tokio::test]
async fn close_releases_waiting_requesters() {
    let f = fixture().await;

    let mut pending = f.client.request("client-2", Payload::new()).await.unwrap();
    f.client.close().await;

    assert!(timeout(WAIT, pending.recv()).await.unwrap().is_none());
    assert_eq!(f.client.state(), LinkState::Closed);
    assert!(f.client.emit("t", Payload::new()).await.is_err());
}

#[tokio::test]
async fn oversized_frames_are_rejected_without_closing() {
    let mut f = fixture().await;

    f.client.set_max_message_size(Some(64));
    let big = "x".repeat(256);
    f.peer
        .push(&Envelope::broadcast(payload(json!({ "big": big }))))
        .await
        .unwrap();
    f.peer
        .push(&Envelope::broadcast(payload(json!({ "n": 1 }))))
        .await
        .unwrap();

    let e = timeout(WAIT, f.inbox.errors.recv()).await.unwrap().unwrap();
    assert_eq!(e.code().as_str(), "PAYLOAD_TOO_LARGE");
    let b = timeout(WAIT, f.inbox.broadcasts.recv()).await.unwrap().unwrap();
    assert_eq!(b.payload()["n"], 1);
}

#[tokio::test]
async fn read_deadline_is_not_fatal() {
    let mut cfg = ClientConfig::new("mem:0");
    cfg.transport.read_timeout_ms = Some(20);
    let mut f = fixture_with(cfg).await;

    let e = timeout(WAIT, f.inbox.errors.recv()).await.unwrap().unwrap();
    assert_eq!(e.code().as_str(), "READ_TIMEOUT");
    f.client.set_read_deadline(None);

    f.peer.push(&Envelope::broadcast(Payload::new())).await.unwrap();
    assert!(timeout(WAIT, f.inbox.broadcasts.recv()).await.unwrap().is_some());
    assert_eq!(f.client.state(), LinkState::Connected);
}
