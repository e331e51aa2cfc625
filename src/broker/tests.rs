use super::Broker;
use super::engine::DEFAULT_OUTBOUND_LIMIT;
use super::connection::Connection;
use super::message::Push;
use super::topic::Topic;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn connect(broker: &mut Broker) -> (String, mpsc::UnboundedReceiver<String>) {
    let (id, rx, _cancel) = connect_with_token(broker);
    (id, rx)
}

fn connect_with_token(
    broker: &mut Broker,
) -> (String, mpsc::UnboundedReceiver<String>, CancellationToken) {
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let cancel = CancellationToken::new();
    let id = broker.register_connection(Connection::new(tx, None, cancel.clone()));
    (id, rx, cancel)
}

fn next_push(rx: &mut mpsc::UnboundedReceiver<String>) -> Push {
    let line = rx.try_recv().expect("expected a queued frame");
    serde_json::from_str(&line).unwrap()
}

#[test]
fn test_topic_new() {
    let topic = Topic::new("test_topic");
    assert_eq!(topic.name, "test_topic");
    assert!(topic.subscribers.is_empty());
    assert!(topic.backlog.is_empty());
}

#[test]
fn test_topic_subscribe_is_idempotent() {
    let mut topic = Topic::new("test_topic");
    topic.subscribe("client1".to_string());
    topic.subscribe("client1".to_string());
    assert_eq!(topic.subscribers.len(), 1);
    assert!(topic.unsubscribe(&"client1".to_string()));
    assert!(!topic.unsubscribe(&"client1".to_string()));
}

#[test]
fn test_topic_snapshot_leaves_backlog() {
    let mut topic = Topic::new("test_topic");
    topic.push(json!(1));
    topic.push(json!(2));
    assert_eq!(topic.snapshot(), vec![json!(1), json!(2)]);
    assert_eq!(topic.backlog.len(), 2);
}

#[test]
fn test_broker_new() {
    let broker = Broker::default();
    assert!(broker.topics.is_empty());
    assert!(broker.connections.is_empty());
    assert_eq!(broker.outbound_limit, DEFAULT_OUTBOUND_LIMIT);
    assert_eq!(Broker::new().with_outbound_limit(0).outbound_limit, 1);
}

#[test]
fn test_fetch_is_fifo_and_exactly_once() {
    let mut broker = Broker::new();
    for p in ["p1", "p2", "p3"] {
        broker.publish("news", json!(p));
    }

    assert_eq!(broker.fetch("news"), Some(json!("p1")));
    assert_eq!(broker.fetch("news"), Some(json!("p2")));
    assert_eq!(broker.fetch("news"), Some(json!("p3")));
    assert_eq!(broker.fetch("news"), None);
}

#[test]
fn test_topics_are_created_lazily_by_any_operation() {
    let mut broker = Broker::new();
    assert_eq!(broker.fetch("a"), None);
    broker.unsubscribe("b", &"nobody".to_string());
    broker.publish("c", Value::Null);

    for name in ["a", "b", "c"] {
        assert!(broker.topics.contains_key(name), "topic {name} missing");
    }
}

#[test]
fn test_topics_are_exact_strings() {
    let mut broker = Broker::new();
    broker.publish("news", json!("x"));
    assert_eq!(broker.fetch("News"), None);
    assert_eq!(broker.fetch("news/sports"), None);
    assert_eq!(broker.fetch("news"), Some(json!("x")));
}

#[test]
fn test_subscribe_returns_snapshot_without_consuming() {
    let mut broker = Broker::new();
    let (id, _rx) = connect(&mut broker);
    broker.publish("news", json!("p1"));
    broker.publish("news", json!("p2"));

    let backlog = broker.subscribe("news", &id).unwrap();
    assert_eq!(backlog, vec![json!("p1"), json!("p2")]);

    assert_eq!(broker.fetch("news"), Some(json!("p1")));
    assert_eq!(broker.fetch("news"), Some(json!("p2")));
}

#[test]
fn test_subscribe_maintains_reverse_index() {
    let mut broker = Broker::new();
    let (id, _rx) = connect(&mut broker);

    broker.subscribe("a", &id).unwrap();
    broker.subscribe("b", &id).unwrap();
    broker.subscribe("a", &id).unwrap();

    let topics = &broker.connections[&id].topics;
    assert_eq!(topics.len(), 2);
    assert!(broker.topics["a"].subscribers.contains(&id));
    assert!(broker.topics["b"].subscribers.contains(&id));

    broker.unsubscribe("a", &id);
    assert!(!broker.connections[&id].topics.contains("a"));
    assert!(!broker.topics["a"].subscribers.contains(&id));

    // not subscribed any more: still fine
    broker.unsubscribe("a", &id);
}

#[test]
fn test_subscribe_unknown_connection_is_rejected() {
    let mut broker = Broker::new();
    let result = broker.subscribe("news", &"ghost".to_string());
    assert!(result.is_err());
    assert!(
        broker
            .topics
            .get("news")
            .is_none_or(|t| t.subscribers.is_empty())
    );
}

#[test]
fn test_fan_out_reaches_every_subscriber_in_order() {
    let mut broker = Broker::new();
    let (a, mut rx_a) = connect(&mut broker);
    let (b, mut rx_b) = connect(&mut broker);
    broker.subscribe("news", &a).unwrap();
    broker.subscribe("news", &b).unwrap();

    for p in ["first", "second"] {
        broker.publish("news", json!(p));
        assert_eq!(broker.fan_out("news", &json!(p)), 2);
    }

    for rx in [&mut rx_a, &mut rx_b] {
        assert_eq!(next_push(rx), Push::new("news", json!("first")));
        assert_eq!(next_push(rx), Push::new("news", json!("second")));
        assert!(rx.try_recv().is_err());
    }
}

#[test]
fn test_fan_out_wire_format() {
    let mut broker = Broker::new();
    let (a, mut rx) = connect(&mut broker);
    broker.subscribe("news", &a).unwrap();
    broker.fan_out("news", &json!({"id": 1}));

    let line = rx.try_recv().unwrap();
    let value: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(
        value,
        json!({"type": "message", "topic": "news", "data": {"id": 1}})
    );
}

#[test]
fn test_fan_out_without_topic_is_a_no_op() {
    let mut broker = Broker::new();
    assert_eq!(broker.fan_out("nobody_home", &json!("hello")), 0);
}

#[test]
fn test_fan_out_drops_dead_subscriber_and_keeps_going() {
    let mut broker = Broker::new();
    let (dead, rx_dead) = connect(&mut broker);
    let (alive, mut rx_alive) = connect(&mut broker);
    broker.subscribe("news", &dead).unwrap();
    broker.subscribe("other", &dead).unwrap();
    broker.subscribe("news", &alive).unwrap();

    // the writer side of `dead` is gone
    drop(rx_dead);

    assert_eq!(broker.fan_out("news", &json!("hello")), 1);
    assert_eq!(next_push(&mut rx_alive).data, json!("hello"));

    assert!(!broker.connections.contains_key(&dead));
    assert!(!broker.topics["news"].subscribers.contains(&dead));
    assert!(!broker.topics["other"].subscribers.contains(&dead));
    assert!(broker.topics["news"].subscribers.contains(&alive));
}

#[test]
fn test_drop_connection_cleans_every_topic_and_is_idempotent() {
    let mut broker = Broker::new();
    let (id, _rx) = connect(&mut broker);
    broker.subscribe("a", &id).unwrap();
    broker.subscribe("b", &id).unwrap();

    assert!(broker.drop_connection(&id));
    assert!(!broker.drop_connection(&id));

    assert!(!broker.connections.contains_key(&id));
    assert!(broker.topics.values().all(|t| !t.subscribers.contains(&id)));
    assert_eq!(broker.fan_out("a", &json!("after")), 0);
}

#[test]
fn test_deliver_to_closed_connection_fails() {
    let mut broker = Broker::new();
    let (id, rx) = connect(&mut broker);
    drop(rx);
    assert!(broker.deliver(&id, &json!({"status": "ok"})).is_err());
    assert!(broker.deliver(&"ghost".to_string(), &json!({})).is_err());
}

#[test]
fn test_fan_out_evicts_subscriber_that_stopped_reading() {
    let mut broker = Broker::new().with_outbound_limit(3);
    let (stalled, _rx_stalled, cancel) = connect_with_token(&mut broker);
    let (reader, mut rx_reader) = connect(&mut broker);
    broker.subscribe("news", &stalled).unwrap();
    broker.subscribe("other", &stalled).unwrap();
    broker.subscribe("news", &reader).unwrap();

    for n in 0..3 {
        assert_eq!(broker.fan_out("news", &json!(n)), 2);
        assert_eq!(next_push(&mut rx_reader).data, json!(n));
    }
    assert_eq!(broker.connections[&stalled].queued(), 3);
    assert!(!cancel.is_cancelled());

    // the fourth push finds three frames still unwritten
    assert_eq!(broker.fan_out("news", &json!(3)), 1);
    assert_eq!(next_push(&mut rx_reader).data, json!(3));

    assert!(cancel.is_cancelled());
    assert!(!broker.connections.contains_key(&stalled));
    assert!(!broker.topics["news"].subscribers.contains(&stalled));
    assert!(!broker.topics["other"].subscribers.contains(&stalled));
    assert!(broker.topics["news"].subscribers.contains(&reader));
}

#[test]
fn test_replies_and_replay_are_not_limited() {
    let mut broker = Broker::new().with_outbound_limit(2);
    for n in 0..5 {
        broker.publish("news", json!(n));
    }
    let (id, mut rx, cancel) = connect_with_token(&mut broker);

    for payload in broker.subscribe("news", &id).unwrap() {
        broker.deliver(&id, &Push::new("news", payload)).unwrap();
    }
    assert_eq!(broker.connections[&id].queued(), 5);
    assert!(!cancel.is_cancelled());

    let replayed: Vec<Value> = (0..5).map(|_| next_push(&mut rx).data).collect();
    assert_eq!(replayed, (0..5).map(|n| json!(n)).collect::<Vec<_>>());
}
