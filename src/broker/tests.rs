use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc::UnboundedReceiver;

use super::answers::{AnswerKey, AnswerRecord, AnswerTable};
use super::consumers::ConsumerRegistry;
use super::message::Message;
use super::queue::MessageQueue;
use super::subscriptions::SubscriptionTable;
use super::{Broker, BrokerStats, DispatchMode, Inbound, Pass};
use crate::command::CommandRegistry;
use crate::endpoint::{EndpointEvent, EndpointRef, Link};
use crate::protocol::{self, Packet};
use crate::transport::memory;
use crate::utils::Error;

/// A peer connected to the broker over an in-memory link. `link` is the
/// peer's own side, `at_broker` is the endpoint the broker talks to.
struct Peer {
    link: Link,
    at_broker: EndpointRef,
}

impl Peer {
    fn connect(name: &str) -> Self {
        let (mut link, server) = memory::link(name, "broker");
        assert_eq!(link.events.try_recv().unwrap(), EndpointEvent::Connected);
        Peer {
            link,
            at_broker: server.endpoint,
        }
    }

    fn recv(&mut self) -> (u32, Bytes) {
        match self.link.events.try_recv() {
            Ok(EndpointEvent::DataReceived { id, data }) => (id, data),
            other => panic!("expected data, got {other:?}"),
        }
    }

    fn is_idle(&mut self) -> bool {
        self.link.events.try_recv().is_err()
    }
}

fn endpoint(name: &str) -> EndpointRef {
    memory::link("broker", name).0.endpoint
}

fn msg(producer: &str, id: u32, payload: &'static str) -> Message {
    Message::new(producer, id, Bytes::from_static(payload.as_bytes()))
}

fn command_broker(commands: &[&str], max_attempts: u32) -> Broker {
    Broker::with_commands(
        DispatchMode::Command,
        Arc::new(CommandRegistry::with_names(commands.iter().copied())),
        max_attempts,
    )
}

fn register(broker: &Broker, consumer: &mut Peer) {
    let hello = Bytes::from_static(protocol::CONSUMER_HELLO);
    assert_eq!(
        broker.handle_data(&consumer.at_broker, 1, hello),
        Ok(Inbound::ConsumerRegistered)
    );
    let (_, ack) = consumer.recv();
    assert!(protocol::is_consumer_hello_ack(&ack));
}

fn produce(broker: &Broker, producer: &Peer, id: u32, payload: &'static str) -> Inbound {
    broker
        .handle_data(&producer.at_broker, id, Bytes::from_static(payload.as_bytes()))
        .unwrap()
}

fn answer(broker: &Broker, consumer: &Peer, local_id: u32, payload: &'static str) -> Result<Inbound, Error> {
    broker.handle_data(
        &consumer.at_broker,
        1,
        Packet::new(local_id, Bytes::from_static(payload.as_bytes())).encode(),
    )
}

#[test]
fn test_queue_is_fifo() {
    let queue = MessageQueue::new();
    assert_eq!(queue.peek(), Err(Error::MessageNotFound));

    assert_eq!(queue.enqueue(msg("p", 1, "a")), 1);
    assert_eq!(queue.enqueue(msg("p", 2, "b")), 2);
    assert_eq!(queue.len(), 2);

    assert_eq!(queue.peek().unwrap().producer_id, 1);
    assert_eq!(queue.len(), 2);
    assert_eq!(queue.dequeue().unwrap().producer_id, 1);
    assert_eq!(queue.dequeue().unwrap().producer_id, 2);
    assert!(queue.is_empty());
    assert_eq!(queue.dequeue(), Err(Error::MessageNotFound));
}

#[test]
fn test_queue_remove_front_checks_seq() {
    let queue = MessageQueue::new();
    let first = queue.enqueue(msg("p", 1, "a"));
    let second = queue.enqueue(msg("p", 2, "b"));

    assert_eq!(queue.remove_front(second), Err(Error::MessageNotFound));
    assert_eq!(queue.record_attempt(first), Ok(1));
    assert_eq!(queue.record_attempt(first), Ok(2));
    assert_eq!(queue.peek().unwrap().attempts, 2);
    assert_eq!(queue.remove_front(first).unwrap().seq, first);
    assert_eq!(queue.peek().unwrap().seq, second);
}

#[test]
fn test_registry_round_robin() {
    let registry = ConsumerRegistry::new();
    assert!(matches!(registry.next(), Err(Error::ConsumerNotFound)));

    registry.add(endpoint("a")).unwrap();
    registry.add(endpoint("b")).unwrap();

    let order: Vec<String> = (0..5)
        .map(|_| registry.next().unwrap().address().to_string())
        .collect();
    assert_eq!(order, ["a", "b", "a", "b", "a"]);
}

#[test]
fn test_registry_rejects_duplicates() {
    let registry = ConsumerRegistry::new();
    registry.add(endpoint("a")).unwrap();
    assert!(matches!(
        registry.add(endpoint("a")),
        Err(Error::ConsumerAlreadyExists)
    ));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_registry_removal_keeps_rotation() {
    let registry = ConsumerRegistry::new();
    for name in ["a", "b", "c"] {
        registry.add(endpoint(name)).unwrap();
    }
    assert_eq!(registry.next().unwrap().address(), "a");
    assert_eq!(registry.next().unwrap().address(), "b");

    registry.remove("a").unwrap();
    assert_eq!(registry.next().unwrap().address(), "c");
    assert_eq!(registry.next().unwrap().address(), "b");

    registry.remove("c").unwrap();
    assert_eq!(registry.next().unwrap().address(), "b");
    assert!(matches!(registry.remove("c"), Err(Error::ConsumerNotFound)));
    assert!(!registry.exists("c"));
}

#[test]
fn test_answer_table_takes_once() {
    let table = AnswerTable::new();
    let key = AnswerKey::new("c1", 5);
    table.record(key.clone(), AnswerRecord::new("p1", 9));

    assert_eq!(table.take_and_remove(&key), Ok(AnswerRecord::new("p1", 9)));
    assert_eq!(table.take_and_remove(&key), Err(Error::AnswerNotFound));
    assert!(table.is_empty());
}

#[test]
fn test_answer_table_records_only_sent_copies() {
    let table = AnswerTable::new();

    let sent = table.send_and_record("c1", AnswerRecord::new("p1", 9), || Ok(4));
    assert_eq!(sent, Ok(4));
    let failed = table.send_and_record("c2", AnswerRecord::new("p1", 9), || {
        Err(Error::SendFailure("closed".to_string()))
    });
    assert!(failed.is_err());

    assert_eq!(table.len(), 1);
    assert_eq!(
        table.take_and_remove(&AnswerKey::new("c1", 4)),
        Ok(AnswerRecord::new("p1", 9))
    );
}

#[test]
fn test_subscription_table() {
    let table = SubscriptionTable::new();
    assert!(table.subscribe("c1", "aaa"));
    assert!(!table.subscribe("c1", "aaa"));
    assert!(table.subscribe("c1", "bbb"));
    assert!(table.is_subscribed("c1", "aaa"));
    assert!(!table.is_subscribed("c2", "aaa"));
    assert_eq!(table.commands("c1"), ["aaa", "bbb"]);

    assert!(table.unsubscribe("c1", "aaa"));
    assert!(!table.unsubscribe("c1", "aaa"));
    assert_eq!(table.len(), 1);
    table.drop_all("c1");
    assert!(table.is_empty());
}

#[test]
fn test_direct_round_robin_with_answers() {
    let broker = Broker::default();
    let mut c1 = Peer::connect("c1");
    let mut c2 = Peer::connect("c2");
    let mut p = Peer::connect("p");
    register(&broker, &mut c1);
    register(&broker, &mut c2);

    assert_eq!(produce(&broker, &p, 1, "a"), Inbound::Enqueued { seq: 1 });
    produce(&broker, &p, 2, "b");
    produce(&broker, &p, 3, "c");
    assert_eq!(broker.dispatcher().drain(), 3);
    assert!(broker.queue().is_empty());

    let (a_id, a) = c1.recv();
    let (b_id, b) = c2.recv();
    let (c_id, c) = c1.recv();
    assert_eq!((&a[..], &b[..], &c[..]), (&b"a"[..], &b"b"[..], &b"c"[..]));
    assert_eq!(broker.answers().len(), 3);

    assert_eq!(
        answer(&broker, &c2, b_id, "B"),
        Ok(Inbound::AnswerForwarded {
            producer: "p".to_string(),
            producer_id: 2,
        })
    );
    answer(&broker, &c1, a_id, "A").unwrap();
    answer(&broker, &c1, c_id, "C").unwrap();

    let answers: Vec<Packet> = (0..3)
        .map(|_| Packet::decode(&p.recv().1).unwrap())
        .collect();
    assert_eq!(
        answers,
        [
            Packet::new(2, Bytes::from_static(b"B")),
            Packet::new(1, Bytes::from_static(b"A")),
            Packet::new(3, Bytes::from_static(b"C")),
        ]
    );
    assert!(broker.answers().is_empty());
}

#[test]
fn test_direct_waits_for_consumer() {
    let broker = Broker::default();
    let p = Peer::connect("p");
    produce(&broker, &p, 1, "a");
    assert_eq!(broker.dispatcher().dispatch_once(), Pass::Idle);
    assert_eq!(broker.queue().len(), 1);

    let mut c1 = Peer::connect("c1");
    register(&broker, &mut c1);
    assert_eq!(broker.dispatcher().dispatch_once(), Pass::Dispatched(1));
    assert_eq!(&c1.recv().1[..], b"a");
}

#[test]
fn test_direct_failed_send_drops_message() {
    let broker = Broker::default();
    let mut c1 = Peer::connect("c1");
    let p = Peer::connect("p");
    register(&broker, &mut c1);
    c1.at_broker.close();

    produce(&broker, &p, 1, "a");
    assert_eq!(broker.dispatcher().dispatch_once(), Pass::Dropped);
    assert!(broker.queue().is_empty());
    assert!(broker.answers().is_empty());
}

#[test]
fn test_duplicate_hello_is_rejected() {
    let broker = Broker::default();
    let mut c1 = Peer::connect("c1");
    register(&broker, &mut c1);

    let hello = Bytes::from_static(protocol::CONSUMER_HELLO);
    assert_eq!(
        broker.handle_data(&c1.at_broker, 2, hello),
        Err(Error::ConsumerAlreadyExists)
    );
    assert!(c1.is_idle());
    assert_eq!(broker.consumers().len(), 1);
}

#[test]
fn test_unknown_and_repeated_answers_are_dropped() {
    let broker = Broker::default();
    let mut c1 = Peer::connect("c1");
    let mut p = Peer::connect("p");
    register(&broker, &mut c1);

    assert_eq!(answer(&broker, &c1, 99, "x"), Err(Error::AnswerNotFound));

    produce(&broker, &p, 4, "a");
    broker.dispatcher().drain();
    let (local_id, _) = c1.recv();
    answer(&broker, &c1, local_id, "first").unwrap();
    assert_eq!(
        answer(&broker, &c1, local_id, "second"),
        Err(Error::AnswerNotFound)
    );
    p.recv();
    assert!(p.is_idle());
}

#[test]
fn test_answer_for_departed_producer() {
    let broker = Broker::default();
    let mut c1 = Peer::connect("c1");
    let p = Peer::connect("p");
    register(&broker, &mut c1);

    produce(&broker, &p, 1, "a");
    broker.dispatcher().drain();
    let (local_id, _) = c1.recv();
    broker.disconnect("p");

    assert_eq!(
        answer(&broker, &c1, local_id, "late"),
        Err(Error::PeerNotFound("p".to_string()))
    );
    assert!(broker.answers().is_empty());
}

#[test]
fn test_api_handshake_is_ignored() {
    let broker = Broker::default();
    let mut c1 = Peer::connect("c1");
    register(&broker, &mut c1);

    let frame = Bytes::from_static(&[protocol::API_HANDSHAKE]);
    assert_eq!(
        broker.handle_data(&c1.at_broker, 2, frame),
        Ok(Inbound::ApiHandshake)
    );
    assert!(matches!(
        broker.handle_data(&c1.at_broker, 3, Bytes::from_static(&[1, 2])),
        Err(Error::TruncatedPacket(2))
    ));
}

#[test]
fn test_fanout_to_subscribers() {
    let broker = command_broker(&["aaa", "bbb"], 16);
    let mut c1 = Peer::connect("c1");
    let mut c2 = Peer::connect("c2");
    let mut p = Peer::connect("p");
    register(&broker, &mut c1);
    register(&broker, &mut c2);

    let subscribe = |peer: &Peer, cmd: &str| {
        broker.handle_data(
            &peer.at_broker,
            1,
            Bytes::from(crate::command::subscribe_message(cmd)),
        )
    };
    assert_eq!(subscribe(&c1, "aaa"), Ok(Inbound::Subscribed("aaa".to_string())));
    subscribe(&c2, "aaa").unwrap();
    subscribe(&c2, "bbb").unwrap();

    produce(&broker, &p, 7, "aaa/x");
    assert_eq!(broker.dispatcher().dispatch_once(), Pass::Dispatched(2));
    let (id1, d1) = c1.recv();
    let (id2, d2) = c2.recv();
    assert_eq!(&d1[..], b"aaa/x");
    assert_eq!(&d2[..], b"aaa/x");

    produce(&broker, &p, 8, "bbb");
    assert_eq!(broker.dispatcher().dispatch_once(), Pass::Dispatched(1));
    assert_eq!(&c2.recv().1[..], b"bbb");
    assert!(c1.is_idle());

    answer(&broker, &c1, id1, "one").unwrap();
    answer(&broker, &c2, id2, "two").unwrap();
    let first = Packet::decode(&p.recv().1).unwrap();
    let second = Packet::decode(&p.recv().1).unwrap();
    assert_eq!((first.id, &first.payload[..]), (7, &b"one"[..]));
    assert_eq!((second.id, &second.payload[..]), (7, &b"two"[..]));
}

#[test]
fn test_fanout_rejects_unknown_command() {
    let broker = command_broker(&["aaa"], 16);
    let p = Peer::connect("p");
    assert_eq!(
        broker.handle_data(&p.at_broker, 1, Bytes::from_static(b"zzz/1")),
        Err(Error::CommandNotFound("zzz".to_string()))
    );
    assert!(broker.queue().is_empty());
}

#[test]
fn test_fanout_holds_then_drops_undeliverable_head() {
    let broker = command_broker(&["aaa"], 3);
    let mut c1 = Peer::connect("c1");
    let p = Peer::connect("p");
    register(&broker, &mut c1);

    produce(&broker, &p, 1, "aaa");
    assert_eq!(broker.dispatcher().dispatch_once(), Pass::Stalled);
    assert_eq!(broker.dispatcher().dispatch_once(), Pass::Stalled);
    assert_eq!(broker.queue().len(), 1);
    assert_eq!(broker.dispatcher().dispatch_once(), Pass::Dropped);
    assert!(broker.queue().is_empty());
    assert!(c1.is_idle());
}

#[test]
fn test_fanout_unlimited_attempts_waits_for_subscriber() {
    let broker = command_broker(&["aaa"], 0);
    let mut c1 = Peer::connect("c1");
    let p = Peer::connect("p");
    register(&broker, &mut c1);

    produce(&broker, &p, 1, "aaa");
    for _ in 0..20 {
        assert_eq!(broker.dispatcher().dispatch_once(), Pass::Stalled);
    }

    broker.subscriptions().subscribe("c1", "aaa");
    assert_eq!(broker.dispatcher().drain(), 1);
    assert_eq!(&c1.recv().1[..], b"aaa");
}

#[test]
fn test_fanout_unparseable_head_is_dropped() {
    let broker = command_broker(&["aaa"], 1);
    let mut c1 = Peer::connect("c1");
    register(&broker, &mut c1);

    broker.queue().enqueue(msg("p", 1, "zzz"));
    assert_eq!(broker.dispatcher().dispatch_once(), Pass::Dropped);
    assert!(broker.queue().is_empty());
}

#[test]
fn test_disconnect_forgets_consumer() {
    let broker = command_broker(&["aaa"], 16);
    let mut c1 = Peer::connect("c1");
    register(&broker, &mut c1);
    broker.subscriptions().subscribe("c1", "aaa");

    assert_eq!(
        broker.stats(),
        BrokerStats {
            consumers: 1,
            subscribed_consumers: 1,
            peers: 1,
            ..Default::default()
        }
    );

    broker.handle_event(&c1.at_broker, EndpointEvent::Disconnected);
    assert_eq!(broker.stats(), BrokerStats::default());

    broker.disconnect("c1");
    assert!(broker.consumers().is_empty());
}

async fn next_data(events: &mut UnboundedReceiver<EndpointEvent>) -> (u32, Bytes) {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("timed out waiting for data")
            .expect("link closed");
        if let EndpointEvent::DataReceived { id, data } = event {
            return (id, data);
        }
    }
}

#[tokio::test]
async fn test_attached_links_round_trip() {
    let broker = Arc::new(Broker::default());
    let dispatcher = broker.start();

    let (mut consumer, server) = memory::link("c1", "broker");
    broker.attach(server);
    let (mut producer, server) = memory::link("p1", "broker");
    broker.attach(server);

    consumer
        .endpoint
        .send(Bytes::from_static(protocol::CONSUMER_HELLO))
        .unwrap();
    let (_, ack) = next_data(&mut consumer.events).await;
    assert!(protocol::is_consumer_hello_ack(&ack));

    let request_id = producer.endpoint.send(Bytes::from_static(b"ping")).unwrap();
    let (local_id, request) = next_data(&mut consumer.events).await;
    assert_eq!(&request[..], b"ping");

    consumer
        .endpoint
        .send(Packet::new(local_id, Bytes::from_static(b"pong")).encode())
        .unwrap();
    let (_, answer) = next_data(&mut producer.events).await;
    assert_eq!(
        Packet::decode(&answer).unwrap(),
        Packet::new(request_id, Bytes::from_static(b"pong"))
    );

    consumer.endpoint.close();
    for _ in 0..100 {
        if broker.consumers().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(broker.consumers().is_empty());
    dispatcher.abort();
}
