//! In-memory broker with partitions and consumer groups.
//!
//! [`InMemoryBroker`] implements [`EventBus`] closely enough to Kafka to test the
//! behaviour consumers rely on:
//!
//! - topics are split into a fixed number of partitions (default 3)
//! - keyed messages always land on the same partition; unkeyed ones go round-robin
//! - every consumer group sees every message
//! - members of one group split the partitions between them, rebalancing on join/leave
//! - committed offsets survive members leaving, so a restarted consumer resumes after
//!   the last committed message
//! - [`set_available`](InMemoryBroker::set_available) simulates a broker outage
//!
//! # Example
//!
//! ```
//! use carebridge_core::event_bus::{EventBus, OutboundMessage, OffsetReset, Subscription};
//! use carebridge_testing::InMemoryBroker;
//! use futures::StreamExt;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = InMemoryBroker::new();
//! let subscription = Subscription::new("patient", "analytics-service")
//!     .with_offset_reset(OffsetReset::Earliest);
//! let mut stream = broker.subscribe(&subscription).await?;
//!
//! broker.publish("patient", OutboundMessage::keyed("p1", vec![1, 2, 3])).await?;
//!
//! let message = stream.next().await.ok_or("stream ended")??;
//! assert_eq!(message.payload(), Some(&[1, 2, 3][..]));
//! message.commit()?;
//! # Ok(())
//! # }
//! ```

#![allow(clippy::unwrap_used)] // Test infrastructure: a poisoned lock means a test already failed
#![allow(clippy::missing_panics_doc)]

use carebridge_core::event_bus::{
    EventBus, EventBusError, IncomingMessage, MessageStream, OffsetCommitter, OffsetReset,
    OutboundMessage, PublishReceipt, Subscription,
};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

/// Partitions created per topic unless configured otherwise.
pub const DEFAULT_PARTITIONS: usize = 3;

/// Messages a subscriber may have in flight before delivery waits.
const DELIVERY_BUFFER: usize = 64;

type TopicPartition = (String, i32);

#[derive(Clone, Debug)]
struct StoredMessage {
    key: Option<Vec<u8>>,
    payload: Option<Vec<u8>>,
}

#[derive(Debug)]
struct Member {
    topics: Vec<String>,
    offset_reset: OffsetReset,
    assignment: Vec<TopicPartition>,
    /// Next offset to fetch, per assigned partition
    positions: HashMap<TopicPartition, i64>,
    /// Rotates the starting partition so one busy partition cannot starve the rest
    cursor: usize,
}

#[derive(Debug, Default)]
struct Group {
    members: BTreeMap<u64, Member>,
    /// Next offset to read, per partition
    committed: HashMap<TopicPartition, i64>,
}

#[derive(Debug, Default)]
struct State {
    topics: HashMap<String, Vec<Vec<StoredMessage>>>,
    round_robin: HashMap<String, usize>,
    groups: HashMap<String, Group>,
    next_member_id: u64,
}

struct Inner {
    state: Mutex<State>,
    changes: watch::Sender<u64>,
    partitions: usize,
    available: AtomicBool,
}

/// In-memory, Kafka-like broker for tests.
///
/// Cloning is cheap; clones share the same topics and groups.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Broker with [`DEFAULT_PARTITIONS`] partitions per topic.
    #[must_use]
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }

    /// Broker with `partitions` partitions per topic.
    ///
    /// # Panics
    ///
    /// Panics if `partitions` is 0.
    #[must_use]
    pub fn with_partitions(partitions: usize) -> Self {
        assert!(partitions > 0, "partitions must be greater than 0");
        let (changes, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                changes,
                partitions,
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Simulate the broker going down (`false`) or coming back (`true`).
    ///
    /// While unavailable, publish and subscribe fail with transport errors.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
        tracing::debug!(available, "In-memory broker availability changed");
    }

    /// Partition a key is routed to.
    #[must_use]
    pub fn partition_for_key(&self, key: &[u8]) -> i32 {
        partition_for_key(key, self.inner.partitions)
    }

    /// Number of partitions per topic.
    #[must_use]
    pub fn partitions(&self) -> usize {
        self.inner.partitions
    }

    /// Every payload stored on `topic`, as `(partition, offset, payload)`.
    #[must_use]
    pub fn messages(&self, topic: &str) -> Vec<(i32, i64, Option<Vec<u8>>)> {
        let state = self.inner.state.lock().unwrap();
        let Some(partitions) = state.topics.get(topic) else {
            return Vec::new();
        };
        partitions
            .iter()
            .enumerate()
            .flat_map(|(partition, log)| {
                log.iter().enumerate().map(move |(offset, message)| {
                    (to_i32(partition), to_i64(offset), message.payload.clone())
                })
            })
            .collect()
    }

    /// Committed position (next offset to read) of `group` on a partition.
    #[must_use]
    pub fn committed_offset(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        let state = self.inner.state.lock().unwrap();
        state
            .groups
            .get(group)
            .and_then(|g| g.committed.get(&(topic.to_string(), partition)))
            .copied()
    }

    /// Number of live members in `group`.
    #[must_use]
    pub fn member_count(&self, group: &str) -> usize {
        let state = self.inner.state.lock().unwrap();
        state.groups.get(group).map_or(0, |g| g.members.len())
    }

    /// Append a message with an explicit (possibly absent) payload.
    ///
    /// Lets tests inject tombstones and corrupted bytes that a real producer would
    /// never write.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::TransportError`] while the broker is unavailable.
    pub fn inject(
        &self,
        topic: &str,
        key: Option<Vec<u8>>,
        payload: Option<Vec<u8>>,
    ) -> Result<PublishReceipt, EventBusError> {
        self.append(topic, StoredMessage { key, payload })
    }

    fn ensure_available(&self) -> Result<(), EventBusError> {
        if self.inner.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EventBusError::TransportError(
                "broker unavailable".to_string(),
            ))
        }
    }

    fn append(&self, topic: &str, message: StoredMessage) -> Result<PublishReceipt, EventBusError> {
        self.ensure_available()?;
        if topic.is_empty() {
            return Err(EventBusError::InvalidTopic(topic.to_string()));
        }

        let partitions = self.inner.partitions;
        let receipt = {
            let mut state = self.inner.state.lock().unwrap();
            let partition = match &message.key {
                Some(key) => partition_for_key(key, partitions),
                None => {
                    let next = state.round_robin.entry(topic.to_string()).or_insert(0);
                    let partition = *next % partitions;
                    *next = next.wrapping_add(1);
                    to_i32(partition)
                }
            };
            let log = &mut state
                .topics
                .entry(topic.to_string())
                .or_insert_with(|| vec![Vec::new(); partitions])[usize::try_from(partition).unwrap_or(0)];
            log.push(message);
            PublishReceipt {
                topic: topic.to_string(),
                partition,
                offset: to_i64(log.len() - 1),
            }
        };

        self.inner.changes.send_modify(|generation| *generation += 1);
        tracing::trace!(
            topic = %receipt.topic,
            partition = receipt.partition,
            offset = receipt.offset,
            "Message appended"
        );
        Ok(receipt)
    }
}

impl Inner {
    fn join(&self, subscription: &Subscription) -> u64 {
        let mut state = self.state.lock().unwrap();
        for topic in subscription.topics() {
            state
                .topics
                .entry(topic.clone())
                .or_insert_with(|| vec![Vec::new(); self.partitions]);
        }

        let member_id = state.next_member_id;
        state.next_member_id += 1;

        let group = state
            .groups
            .entry(subscription.consumer_group().to_string())
            .or_default();
        group.members.insert(
            member_id,
            Member {
                topics: subscription.topics().to_vec(),
                offset_reset: subscription.offset_reset(),
                assignment: Vec::new(),
                positions: HashMap::new(),
                cursor: 0,
            },
        );
        rebalance(&mut state, subscription.consumer_group(), self.partitions);
        drop(state);

        self.changes.send_modify(|generation| *generation += 1);
        member_id
    }

    fn leave(&self, group_id: &str, member_id: u64) {
        let mut state = self.state.lock().unwrap();
        let removed = state
            .groups
            .get_mut(group_id)
            .and_then(|group| group.members.remove(&member_id))
            .is_some();
        if removed {
            rebalance(&mut state, group_id, self.partitions);
        }
        drop(state);

        self.changes.send_modify(|generation| *generation += 1);
        tracing::debug!(group = group_id, member_id, "Member left consumer group");
    }

    /// Take the next undelivered message for a member, advancing its fetch position.
    fn poll(&self, group_id: &str, member_id: u64) -> Option<(TopicPartition, i64, StoredMessage)> {
        let mut state = self.state.lock().unwrap();
        let State { topics, groups, .. } = &mut *state;
        let member = groups.get_mut(group_id)?.members.get_mut(&member_id)?;

        let count = member.assignment.len();
        for step in 0..count {
            let index = (member.cursor + step) % count;
            let tp = member.assignment[index].clone();
            let position = member.positions.get(&tp).copied().unwrap_or(0);
            let log = topics
                .get(&tp.0)
                .and_then(|partitions| partitions.get(usize::try_from(tp.1).ok()?))?;

            if let Some(message) = usize::try_from(position).ok().and_then(|p| log.get(p)) {
                let message = message.clone();
                member.positions.insert(tp.clone(), position + 1);
                member.cursor = index + 1;
                return Some((tp, position, message));
            }
        }
        None
    }

    fn commit(&self, group_id: &str, topic: &str, partition: i32, offset: i64) {
        let mut state = self.state.lock().unwrap();
        let group = state.groups.entry(group_id.to_string()).or_default();
        let next = group
            .committed
            .entry((topic.to_string(), partition))
            .or_insert(0);
        *next = (*next).max(offset + 1);
    }
}

/// Reassign a group's partitions round-robin over its members, ordered by member id.
///
/// Members keep their fetch position on partitions they still own; newly assigned
/// partitions start from the group's committed offset, or the member's reset policy.
fn rebalance(state: &mut State, group_id: &str, partitions: usize) {
    let State { topics, groups, .. } = state;
    let Some(group) = groups.get_mut(group_id) else {
        return;
    };

    let mut assignments: BTreeMap<u64, Vec<TopicPartition>> =
        group.members.keys().map(|id| (*id, Vec::new())).collect();

    let mut all_topics: Vec<&String> = group.members.values().flat_map(|m| &m.topics).collect();
    all_topics.sort();
    all_topics.dedup();

    for topic in all_topics {
        let subscribers: Vec<u64> = group
            .members
            .iter()
            .filter(|(_, member)| member.topics.contains(topic))
            .map(|(id, _)| *id)
            .collect();
        for partition in 0..partitions {
            let owner = subscribers[partition % subscribers.len()];
            if let Some(assigned) = assignments.get_mut(&owner) {
                assigned.push((topic.clone(), to_i32(partition)));
            }
        }
    }

    for (id, assignment) in assignments {
        let Some(member) = group.members.get_mut(&id) else {
            continue;
        };
        let mut positions = HashMap::new();
        for tp in &assignment {
            let position = member.positions.get(tp).copied().unwrap_or_else(|| {
                group.committed.get(tp).copied().unwrap_or_else(|| match member.offset_reset {
                    OffsetReset::Earliest => 0,
                    OffsetReset::Latest => topics
                        .get(&tp.0)
                        .and_then(|p| p.get(usize::try_from(tp.1).ok()?))
                        .map_or(0, |log| to_i64(log.len())),
                })
            });
            positions.insert(tp.clone(), position);
        }
        tracing::debug!(group = group_id, member_id = id, partitions = ?assignment, "Partitions assigned");
        member.assignment = assignment;
        member.positions = positions;
        member.cursor = 0;
    }
}

fn partition_for_key(key: &[u8], partitions: usize) -> i32 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    let bucket = hasher.finish() % partitions as u64;
    to_i32(usize::try_from(bucket).unwrap_or(0))
}

fn to_i32(value: usize) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

struct GroupCommitter {
    inner: Arc<Inner>,
    group: String,
}

impl OffsetCommitter for GroupCommitter {
    fn commit(&self, topic: &str, partition: i32, offset: i64) -> Result<(), EventBusError> {
        self.inner.commit(&self.group, topic, partition, offset);
        Ok(())
    }
}

impl EventBus for InMemoryBroker {
    fn publish(
        &self,
        topic: &str,
        message: OutboundMessage,
    ) -> Pin<Box<dyn Future<Output = Result<PublishReceipt, EventBusError>> + Send + '_>> {
        let result = self.append(
            topic,
            StoredMessage {
                key: message.key,
                payload: Some(message.payload),
            },
        );
        Box::pin(async move { result })
    }

    fn subscribe(
        &self,
        subscription: &Subscription,
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, EventBusError>> + Send + '_>> {
        let subscription = subscription.clone();

        Box::pin(async move {
            self.ensure_available()
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: subscription.topics().to_vec(),
                    reason: e.to_string(),
                })?;
            if subscription.topics().is_empty() {
                return Err(EventBusError::SubscriptionFailed {
                    topics: Vec::new(),
                    reason: "no topics".to_string(),
                });
            }

            let inner = Arc::clone(&self.inner);
            let group = subscription.consumer_group().to_string();
            let member_id = inner.join(&subscription);
            let committer: Arc<dyn OffsetCommitter> = Arc::new(GroupCommitter {
                inner: Arc::clone(&inner),
                group: group.clone(),
            });

            tracing::debug!(
                topics = ?subscription.topics(),
                group = %group,
                member_id,
                "Joined consumer group"
            );

            let (tx, rx) = mpsc::channel(DELIVERY_BUFFER);

            tokio::spawn(async move {
                let mut changes = inner.changes.subscribe();
                loop {
                    changes.borrow_and_update();
                    if let Some(((topic, partition), offset, message)) = inner.poll(&group, member_id) {
                        let incoming = IncomingMessage::new(
                            topic,
                            partition,
                            offset,
                            message.key,
                            message.payload,
                            Arc::clone(&committer),
                        );
                        if tx.send(Ok(incoming)).await.is_err() {
                            break; // Receiver dropped
                        }
                        continue;
                    }

                    tokio::select! {
                        changed = changes.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        () = tx.closed() => break,
                    }
                }
                inner.leave(&group, member_id);
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as MessageStream)
        })
    }
}
