use std::sync::Arc;
use std::time::Duration;

use courier_core::{
    Acknowledge, BoxFuture, BoxedMessage, Destination, Endpoint, EndpointUsage, Headers, IN_MEMORY_TRANSPORT,
    MessageCallback, MessageType, MessagingEngine, ProcessingOptions, SerializationFormat,
    SubscribeRequest, TransportError, UnknownTypeCallback,
};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::timeout;

use super::InMemoryMessagingEngine;

#[derive(Debug, Clone, Serialize)]
struct OrderPlaced {
    id: u32,
}

fn endpoint(name: &str) -> Endpoint {
    Endpoint::new(
        IN_MEMORY_TRANSPORT,
        Destination::new(name),
        true,
        SerializationFormat::Json,
    )
}

fn ignore_unknown() -> UnknownTypeCallback {
    Arc::new(|_: MessageType, ack: Acknowledge| ack.ack())
}

/// Forwards every delivery to a channel and acknowledges it with `outcome`.
fn forwarding(
    tx: mpsc::UnboundedSender<(BoxedMessage, Headers)>,
    outcome: (u64, bool),
) -> MessageCallback {
    Arc::new(
        move |message: BoxedMessage, ack: Acknowledge, headers: Headers| -> BoxFuture<'static, ()> {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send((message, headers));
                ack.call(outcome.0, outcome.1);
            })
        },
    )
}

fn request(name: &str, callback: MessageCallback, priority: u32) -> SubscribeRequest {
    SubscribeRequest {
        endpoint: endpoint(name),
        callback,
        unknown_type_callback: ignore_unknown(),
        processing_group: "group".to_string(),
        priority,
        accepted_types: vec![MessageType::of::<OrderPlaced>()],
    }
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a delivery")
        .expect("channel closed")
}

#[tokio::test]
async fn delivers_to_every_subscriber() {
    let engine = InMemoryMessagingEngine::new();
    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    let _a = engine
        .subscribe(request("orders", forwarding(tx_a, (0, true)), 0))
        .unwrap();
    let _b = engine
        .subscribe(request("orders", forwarding(tx_b, (0, true)), 0))
        .unwrap();

    let mut headers = Headers::new();
    headers.insert("trace".to_string(), "abc".to_string());
    engine
        .send(BoxedMessage::new(OrderPlaced { id: 1 }), &endpoint("orders"), headers)
        .await
        .unwrap();

    let (message, headers) = next(&mut rx_a).await;
    assert_eq!(message.downcast_ref::<OrderPlaced>().map(|m| m.id), Some(1));
    assert_eq!(headers.get("trace").map(String::as_str), Some("abc"));
    let (message, _) = next(&mut rx_b).await;
    assert!(message.is::<OrderPlaced>());
}

#[tokio::test]
async fn sending_without_subscribers_drops_the_message() {
    let engine = InMemoryMessagingEngine::new();

    let result = engine
        .send(BoxedMessage::new(OrderPlaced { id: 1 }), &endpoint("nowhere"), Headers::new())
        .await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn unknown_transports_are_rejected() {
    let engine = InMemoryMessagingEngine::new();
    let mut endpoint = endpoint("orders");
    endpoint.transport_id = "RabbitMq".to_string();

    let result = engine
        .send(BoxedMessage::new(OrderPlaced { id: 1 }), &endpoint, Headers::new())
        .await;

    assert!(matches!(result, Err(TransportError::UnknownTransport(id)) if id == "RabbitMq"));
}

#[tokio::test(start_paused = true)]
async fn nacked_messages_are_redelivered_after_the_delay() {
    let engine = InMemoryMessagingEngine::new();
    let attempts = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&attempts);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let callback: MessageCallback = Arc::new(
        move |_: BoxedMessage, ack: Acknowledge, _: Headers| -> BoxFuture<'static, ()> {
            let recorded = Arc::clone(&recorded);
            let tx = tx.clone();
            Box::pin(async move {
                let attempt = {
                    let mut attempts = recorded.lock();
                    attempts.push(tokio::time::Instant::now());
                    attempts.len()
                };
                if attempt == 1 {
                    ack.nack(500);
                } else {
                    ack.ack();
                    let _ = tx.send(attempt);
                }
            })
        },
    );
    let _subscription = engine.subscribe(request("orders", callback, 0)).unwrap();

    engine
        .send(BoxedMessage::new(OrderPlaced { id: 1 }), &endpoint("orders"), Headers::new())
        .await
        .unwrap();

    assert_eq!(next(&mut rx).await, 2);
    let attempts = attempts.lock();
    assert!(attempts[1] - attempts[0] >= Duration::from_millis(500));
}

#[tokio::test]
async fn unaccepted_types_go_to_the_unknown_type_callback() {
    let engine = InMemoryMessagingEngine::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (unknown_tx, mut unknown_rx) = mpsc::unbounded_channel();

    let mut request = request("orders", forwarding(tx, (0, true)), 0);
    request.unknown_type_callback = Arc::new(move |message_type: MessageType, ack: Acknowledge| {
        let _ = unknown_tx.send(message_type);
        ack.ack();
    });
    let _subscription = engine.subscribe(request).unwrap();

    engine
        .send(BoxedMessage::new("stray".to_string()), &endpoint("orders"), Headers::new())
        .await
        .unwrap();
    engine
        .send(BoxedMessage::new(OrderPlaced { id: 2 }), &endpoint("orders"), Headers::new())
        .await
        .unwrap();

    assert_eq!(next(&mut unknown_rx).await, MessageType::of::<String>());
    let (message, _) = next(&mut rx).await;
    assert!(message.is::<OrderPlaced>());
}

#[tokio::test]
async fn lower_priority_numbers_are_served_first() {
    let engine = InMemoryMessagingEngine::new();
    engine.add_processing_group(
        "group",
        ProcessingOptions {
            thread_count: 1,
            queue_capacity: 16,
        },
    );
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _low = engine
        .subscribe(request("orders.low", forwarding(tx.clone(), (0, true)), 2))
        .unwrap();
    let _high = engine
        .subscribe(request("orders.high", forwarding(tx, (0, true)), 1))
        .unwrap();

    // Nothing yields between the sends, so the single worker sees both queued.
    engine
        .send(BoxedMessage::new(OrderPlaced { id: 2 }), &endpoint("orders.low"), Headers::new())
        .await
        .unwrap();
    engine
        .send(BoxedMessage::new(OrderPlaced { id: 1 }), &endpoint("orders.high"), Headers::new())
        .await
        .unwrap();

    let first = next(&mut rx).await.0.downcast::<OrderPlaced>().unwrap();
    let second = next(&mut rx).await.0.downcast::<OrderPlaced>().unwrap();
    assert_eq!((first.id, second.id), (1, 2));
}

#[tokio::test]
async fn dropping_the_subscription_stops_delivery() {
    let engine = InMemoryMessagingEngine::new();
    let (tx, _rx) = mpsc::unbounded_channel();
    let subscription = engine
        .subscribe(request("orders", forwarding(tx, (0, true)), 0))
        .unwrap();
    assert_eq!(engine.subscriber_count("orders"), 1);

    drop(subscription);

    assert_eq!(engine.subscriber_count("orders"), 0);
}

#[test]
fn endpoint_verification() {
    let engine = InMemoryMessagingEngine::new();
    engine.declare("known");
    let mut foreign = endpoint("known");
    foreign.transport_id = "RabbitMq".to_string();
    let endpoints = [endpoint("known"), endpoint("missing"), foreign.clone()];

    let report = engine.verify_endpoints(EndpointUsage::Publish, &endpoints, false);
    assert_eq!(report[&endpoint("known")], None);
    assert!(report[&endpoint("missing")].is_some());
    assert!(report[&foreign].is_some());

    let report = engine.verify_endpoints(EndpointUsage::Subscribe, &endpoints[..2], true);
    assert!(report.values().all(Option::is_none));
    let report = engine.verify_endpoints(EndpointUsage::Publish, &endpoints[1..2], false);
    assert_eq!(report[&endpoint("missing")], None);
}

#[test]
fn subscribing_outside_a_runtime_fails() {
    let engine = InMemoryMessagingEngine::new();
    let (tx, _rx) = mpsc::unbounded_channel();

    let result = engine.subscribe(request("orders", forwarding(tx, (0, true)), 0));

    assert!(matches!(result, Err(TransportError::SubscribeFailed { .. })));
}
