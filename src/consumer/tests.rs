use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc::UnboundedReceiver;

use super::{Consumer, Delivery, HandlerResult};
use crate::endpoint::{EndpointEvent, Link};
use crate::protocol::{self, Packet};
use crate::transport::memory;

async fn next_data(events: &mut UnboundedReceiver<EndpointEvent>) -> Bytes {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("timed out waiting for data")
            .expect("link closed");
        if let EndpointEvent::DataReceived { data, .. } = event {
            return data;
        }
    }
}

fn echo(delivery: &Delivery) -> HandlerResult {
    match &delivery.payload[..] {
        b"quiet" => Ok(Bytes::new()),
        b"fail" => Err("cannot answer".into()),
        payload => {
            let mut answer = b"Answer to ".to_vec();
            answer.extend_from_slice(payload);
            Ok(Bytes::from(answer))
        }
    }
}

/// Start a consumer and complete its handshake. Returns the broker side.
async fn handshake(commands: Vec<String>) -> (std::sync::Arc<Consumer>, Link) {
    let (link, mut broker) = memory::link("consumer", "broker");
    let (consumer, _handle) = Consumer::start(link, commands, echo);

    let hello = next_data(&mut broker.events).await;
    assert_eq!(&hello[..], protocol::CONSUMER_HELLO);
    assert!(!consumer.is_registered());

    broker
        .endpoint
        .send(Bytes::from_static(protocol::CONSUMER_HELLO_ACK))
        .unwrap();
    (consumer, broker)
}

#[tokio::test]
async fn test_subscribes_after_ack() {
    let (consumer, mut broker) = handshake(vec!["aaa".into(), "bbb".into()]).await;

    assert_eq!(&next_data(&mut broker.events).await[..], b"subscribe/aaa");
    assert_eq!(&next_data(&mut broker.events).await[..], b"subscribe/bbb");
    assert!(consumer.is_registered());

    consumer.unsubscribe("aaa").unwrap();
    assert_eq!(&next_data(&mut broker.events).await[..], b"unsubscribe/aaa");
}

#[tokio::test]
async fn test_answers_with_delivery_id() {
    let (_consumer, mut broker) = handshake(Vec::new()).await;

    let id = broker.endpoint.send(Bytes::from_static(b"ping")).unwrap();
    let answer = Packet::decode(&next_data(&mut broker.events).await).unwrap();
    assert_eq!(answer, Packet::new(id, Bytes::from_static(b"Answer to ping")));
}

#[tokio::test]
async fn test_ack_token_after_registration_is_a_request() {
    let (consumer, mut broker) = handshake(vec!["aaa".into()]).await;
    assert_eq!(&next_data(&mut broker.events).await[..], b"subscribe/aaa");
    assert!(consumer.is_registered());

    let id = broker
        .endpoint
        .send(Bytes::from_static(protocol::CONSUMER_HELLO_ACK))
        .unwrap();
    let answer = Packet::decode(&next_data(&mut broker.events).await).unwrap();
    assert_eq!(
        answer,
        Packet::new(id, Bytes::from_static(b"Answer to Connected to broker"))
    );
}

#[tokio::test]
async fn test_empty_or_failed_answers_are_not_sent() {
    let (_consumer, mut broker) = handshake(Vec::new()).await;

    broker.endpoint.send(Bytes::from_static(b"quiet")).unwrap();
    broker.endpoint.send(Bytes::from_static(b"fail")).unwrap();
    let id = broker.endpoint.send(Bytes::from_static(b"last")).unwrap();

    let answer = Packet::decode(&next_data(&mut broker.events).await).unwrap();
    assert_eq!(answer.id, id);
    assert_eq!(&answer.payload[..], b"Answer to last");
}

#[tokio::test]
async fn test_disconnect_clears_registration() {
    let (consumer, broker) = handshake(Vec::new()).await;
    for _ in 0..100 {
        if consumer.is_registered() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(consumer.is_registered());

    broker.endpoint.close();
    for _ in 0..100 {
        if !consumer.is_registered() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!consumer.is_registered());
}
