//! Consumer-group semantics of [`InMemoryBroker`].
//!
//! - different groups each receive every message
//! - members of one group receive disjoint subsets that together cover the topic
//! - a member rejoining after committing does not see committed messages again
//! - partitions of a topic only some members subscribe to go to those members

#![allow(clippy::expect_used)]

use carebridge_core::event_bus::{
    EventBus, IncomingMessage, OffsetReset, OutboundMessage, Subscription,
};
use carebridge_testing::{InMemoryBroker, take_messages, wait_until};
use std::collections::HashSet;
use std::time::Duration;

const IDLE: Duration = Duration::from_millis(200);

fn earliest(group: &str) -> Subscription {
    Subscription::new("patient", group).with_offset_reset(OffsetReset::Earliest)
}

async fn publish_keys(broker: &InMemoryBroker, count: usize) -> HashSet<Vec<u8>> {
    let mut payloads = HashSet::new();
    for i in 0..count {
        let key = format!("patient-{i}");
        let payload = key.clone().into_bytes();
        broker
            .publish("patient", OutboundMessage::keyed(key, payload.clone()))
            .await
            .expect("publish");
        payloads.insert(payload);
    }
    payloads
}

#[tokio::test]
async fn every_group_receives_every_message() {
    let broker = InMemoryBroker::new();
    let mut analytics = broker.subscribe(&earliest("analytics-service")).await.expect("subscribe");
    let mut audit = broker.subscribe(&earliest("audit")).await.expect("subscribe");

    let published = publish_keys(&broker, 12).await;

    let seen_analytics: HashSet<Vec<u8>> = take_messages(&mut analytics, 12, IDLE)
        .await
        .iter()
        .filter_map(|m| m.payload().map(<[u8]>::to_vec))
        .collect();
    let seen_audit: HashSet<Vec<u8>> = take_messages(&mut audit, 12, IDLE)
        .await
        .iter()
        .filter_map(|m| m.payload().map(<[u8]>::to_vec))
        .collect();

    assert_eq!(seen_analytics, published);
    assert_eq!(seen_audit, published);
}

#[tokio::test]
async fn shared_group_members_split_the_topic() {
    let broker = InMemoryBroker::new();
    let mut first = broker.subscribe(&earliest("analytics-service")).await.expect("subscribe");
    let mut second = broker.subscribe(&earliest("analytics-service")).await.expect("subscribe");
    assert_eq!(broker.member_count("analytics-service"), 2);

    let published = publish_keys(&broker, 30).await;

    let first_seen: Vec<Vec<u8>> = take_messages(&mut first, 30, IDLE)
        .await
        .iter()
        .filter_map(|m| m.payload().map(<[u8]>::to_vec))
        .collect();
    let second_seen: Vec<Vec<u8>> = take_messages(&mut second, 30, IDLE)
        .await
        .iter()
        .filter_map(|m| m.payload().map(<[u8]>::to_vec))
        .collect();

    let first_set: HashSet<_> = first_seen.iter().cloned().collect();
    let second_set: HashSet<_> = second_seen.iter().cloned().collect();

    assert!(first_set.is_disjoint(&second_set));
    assert_eq!(first_seen.len() + second_seen.len(), published.len());
    assert_eq!(&first_set | &second_set, published);
}

#[tokio::test]
async fn rejoining_member_resumes_after_committed_offset() {
    let broker = InMemoryBroker::new();

    {
        let mut stream = broker.subscribe(&earliest("analytics-service")).await.expect("subscribe");
        publish_keys(&broker, 5).await;
        for message in take_messages(&mut stream, 5, IDLE).await {
            message.commit().expect("commit");
        }
    }
    assert!(wait_until(Duration::from_secs(1), || broker.member_count("analytics-service") == 0).await);

    let mut restarted = broker.subscribe(&earliest("analytics-service")).await.expect("subscribe");
    assert!(take_messages(&mut restarted, 1, IDLE).await.is_empty());

    broker
        .publish("patient", OutboundMessage::keyed("late", b"late".to_vec()))
        .await
        .expect("publish");
    let after = take_messages(&mut restarted, 1, IDLE).await;
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].payload(), Some(&b"late"[..]));
}

#[tokio::test]
async fn uncommitted_messages_are_redelivered_after_restart() {
    let broker = InMemoryBroker::with_partitions(1);

    {
        let mut stream = broker.subscribe(&earliest("analytics-service")).await.expect("subscribe");
        publish_keys(&broker, 2).await;
        let received = take_messages(&mut stream, 2, IDLE).await;
        assert_eq!(received.len(), 2);
        received[0].commit().expect("commit");
    }
    assert!(wait_until(Duration::from_secs(1), || broker.member_count("analytics-service") == 0).await);

    let mut restarted = broker.subscribe(&earliest("analytics-service")).await.expect("subscribe");
    let redelivered = take_messages(&mut restarted, 2, IDLE).await;
    assert_eq!(redelivered.len(), 1);
    assert_eq!(redelivered[0].offset(), 1);
}

#[tokio::test]
async fn multi_topic_member_owns_topics_others_skip() {
    let broker = InMemoryBroker::with_partitions(2);
    assert_eq!(broker.partitions(), 2);

    let both = Subscription::new("patient", "analytics-service")
        .and_topic("audit")
        .with_offset_reset(OffsetReset::Earliest);
    let mut wide = broker.subscribe(&both).await.expect("subscribe");
    let mut narrow = broker.subscribe(&earliest("analytics-service")).await.expect("subscribe");

    for i in 0..2u8 {
        broker
            .publish("patient", OutboundMessage::unkeyed(vec![i]))
            .await
            .expect("publish");
        broker
            .publish("audit", OutboundMessage::unkeyed(vec![10 + i]))
            .await
            .expect("publish");
    }

    let wide_seen = take_messages(&mut wide, 4, IDLE).await;
    let narrow_seen = take_messages(&mut narrow, 4, IDLE).await;

    assert_eq!(wide_seen.iter().filter(|m| m.topic() == "audit").count(), 2);
    assert_eq!(wide_seen.iter().filter(|m| m.topic() == "patient").count(), 1);
    assert_eq!(narrow_seen.len(), 1);
    assert_eq!(narrow_seen[0].topic(), "patient");
    assert_ne!(
        narrow_seen[0].partition(),
        wide_seen
            .iter()
            .find(|m| m.topic() == "patient")
            .map(IncomingMessage::partition)
            .expect("patient message")
    );
}
