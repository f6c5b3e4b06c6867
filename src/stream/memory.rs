//! In-process stream with consumer-group semantics
//!
//! Mirrors the subset of Redis streams the engine relies on: new entries are
//! delivered once per group, stay pending for their consumer until acked, can
//! be re-read by that consumer and claimed by another after an idle period.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{message_fields, IntentSource, ReadCursor, StreamError, StreamMessage, StreamSink};

#[derive(Debug)]
struct PendingEntry {
    consumer: String,
    delivered_at: Instant,
}

#[derive(Debug, Default)]
struct GroupState {
    /// Sequence of the last entry handed out to the group
    last_delivered: u64,
    pending: BTreeMap<u64, PendingEntry>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: VecDeque<(u64, StreamMessage)>,
    next_seq: u64,
    groups: HashMap<String, GroupState>,
}

impl Inner {
    fn message(&self, seq: u64) -> Option<&StreamMessage> {
        self.entries.iter().find(|(s, _)| *s == seq).map(|(_, m)| m)
    }
}

pub struct MemoryStream {
    name: String,
    maxlen: Option<usize>,
    inner: Mutex<Inner>,
    notify: Notify,
}

impl MemoryStream {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_maxlen(name, None)
    }

    pub fn with_maxlen(name: impl Into<String>, maxlen: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            maxlen,
            inner: Mutex::new(Inner {
                next_seq: 1,
                ..Inner::default()
            }),
            notify: Notify::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append raw fields, returning the entry id
    pub fn push(&self, fields: &[(&str, String)]) -> String {
        let id = {
            let mut inner = self.inner.lock();
            let seq = inner.next_seq;
            inner.next_seq += 1;
            let id = format!("{seq}-0");
            let message = StreamMessage {
                id: id.clone(),
                fields: fields.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            };
            inner.entries.push_back((seq, message));
            if let Some(max) = self.maxlen {
                while inner.entries.len() > max {
                    inner.entries.pop_front();
                }
            }
            id
        };
        self.notify.notify_waiters();
        id
    }

    /// Every entry still held, oldest first
    pub fn entries(&self) -> Vec<StreamMessage> {
        self.inner.lock().entries.iter().map(|(_, m)| m.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivered but unacked entries of a group
    pub fn pending_count(&self, group: &str) -> usize {
        self.inner
            .lock()
            .groups
            .get(group)
            .map(|g| g.pending.len())
            .unwrap_or(0)
    }

    pub fn consumer(self: &Arc<Self>, group: impl Into<String>, consumer: impl Into<String>) -> MemoryIntentSource {
        MemoryIntentSource {
            stream: Arc::clone(self),
            group: group.into(),
            consumer: consumer.into(),
        }
    }

    fn take_new(&self, group: &str, consumer: &str, count: usize) -> Vec<StreamMessage> {
        let mut inner = self.inner.lock();
        let Inner { entries, groups, .. } = &mut *inner;
        let Some(state) = groups.get_mut(group) else {
            return Vec::new();
        };
        let now = Instant::now();
        let last = state.last_delivered;
        let mut out = Vec::new();
        for (seq, message) in entries.iter().filter(|(s, _)| *s > last).take(count) {
            state.last_delivered = *seq;
            state.pending.insert(
                *seq,
                PendingEntry {
                    consumer: consumer.to_string(),
                    delivered_at: now,
                },
            );
            out.push(message.clone());
        }
        out
    }

    fn take_pending(&self, group: &str, consumer: &str, count: usize) -> Vec<StreamMessage> {
        let inner = self.inner.lock();
        let Some(state) = inner.groups.get(group) else {
            return Vec::new();
        };
        state
            .pending
            .iter()
            .filter(|(_, p)| p.consumer == consumer)
            .filter_map(|(seq, _)| inner.message(*seq).cloned())
            .take(count)
            .collect()
    }

    fn claim(&self, group: &str, consumer: &str, min_idle: Duration, count: usize) -> Vec<StreamMessage> {
        let mut inner = self.inner.lock();
        let Inner { entries, groups, .. } = &mut *inner;
        let Some(state) = groups.get_mut(group) else {
            return Vec::new();
        };
        let now = Instant::now();
        let mut out = Vec::new();
        let mut trimmed = Vec::new();
        for (seq, pending) in state.pending.iter_mut() {
            if out.len() >= count {
                break;
            }
            if now.duration_since(pending.delivered_at) < min_idle {
                continue;
            }
            match entries.iter().find(|(s, _)| s == seq) {
                Some((_, message)) => {
                    pending.consumer = consumer.to_string();
                    pending.delivered_at = now;
                    out.push(message.clone());
                }
                None => trimmed.push(*seq),
            }
        }
        // Like XAUTOCLAIM, entries trimmed from the stream leave the pending list
        for seq in trimmed {
            state.pending.remove(&seq);
        }
        out
    }
}

#[async_trait]
impl StreamSink for MemoryStream {
    fn stream(&self) -> &str {
        &self.name
    }

    async fn append_stamped(&self, data: &str, timestamp: &str) -> Result<String, StreamError> {
        Ok(self.push(&message_fields(data, timestamp)))
    }
}

/// One consumer of a [`MemoryStream`] group
pub struct MemoryIntentSource {
    stream: Arc<MemoryStream>,
    group: String,
    consumer: String,
}

#[async_trait]
impl IntentSource for MemoryIntentSource {
    fn name(&self) -> &str {
        &self.consumer
    }

    async fn prepare(&self) -> Result<(), StreamError> {
        self.stream
            .inner
            .lock()
            .groups
            .entry(self.group.clone())
            .or_default();
        Ok(())
    }

    async fn read_batch(
        &self,
        cursor: ReadCursor,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamMessage>, StreamError> {
        if cursor == ReadCursor::Pending {
            return Ok(self.stream.take_pending(&self.group, &self.consumer, count));
        }

        let deadline = Instant::now() + block;
        loop {
            // Registered before the check so an append in between is not missed
            let notified = self.stream.notify.notified();
            let batch = self.stream.take_new(&self.group, &self.consumer, count);
            if !batch.is_empty() {
                return Ok(batch);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn claim_stale(&self, min_idle: Duration, count: usize) -> Result<Vec<StreamMessage>, StreamError> {
        Ok(self.stream.claim(&self.group, &self.consumer, min_idle, count))
    }

    async fn ack(&self, id: &str) -> Result<(), StreamError> {
        let seq = id
            .split('-')
            .next()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| StreamError::Encode(format!("bad entry id {id}")))?;
        if let Some(state) = self.stream.inner.lock().groups.get_mut(&self.group) {
            state.pending.remove(&seq);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROUP: &str = "trading:swap_event";

    #[tokio::test]
    async fn test_group_delivers_each_entry_once() {
        let stream = MemoryStream::new("swap_event");
        let a = stream.consumer(GROUP, "c:0");
        let b = stream.consumer(GROUP, "c:1");
        a.prepare().await.unwrap();
        b.prepare().await.unwrap();

        stream.append("one").await.unwrap();
        stream.append("two").await.unwrap();

        let first = a.read_batch(ReadCursor::New, 1, Duration::ZERO).await.unwrap();
        let second = b.read_batch(ReadCursor::New, 10, Duration::ZERO).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_ne!(first[0].id, second[0].id);
        assert_eq!(stream.pending_count(GROUP), 2);

        a.ack(&first[0].id).await.unwrap();
        assert_eq!(stream.pending_count(GROUP), 1);
    }

    #[tokio::test]
    async fn test_unacked_entries_replay_for_same_consumer() {
        let stream = MemoryStream::new("swap_event");
        let a = stream.consumer(GROUP, "c:0");
        a.prepare().await.unwrap();
        stream.append("one").await.unwrap();

        let read = a.read_batch(ReadCursor::New, 10, Duration::ZERO).await.unwrap();
        let replay = a.read_batch(ReadCursor::Pending, 10, Duration::ZERO).await.unwrap();
        assert_eq!(read, replay);

        let other = stream.consumer(GROUP, "c:1");
        assert!(other.read_batch(ReadCursor::Pending, 10, Duration::ZERO).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_entries_can_be_claimed() {
        let stream = MemoryStream::new("swap_event");
        let dead = stream.consumer(GROUP, "c:0");
        let live = stream.consumer(GROUP, "c:1");
        dead.prepare().await.unwrap();
        stream.append("one").await.unwrap();
        dead.read_batch(ReadCursor::New, 10, Duration::ZERO).await.unwrap();

        assert!(live.claim_stale(Duration::from_secs(60), 10).await.unwrap().is_empty());
        tokio::time::advance(Duration::from_secs(61)).await;
        let claimed = live.claim_stale(Duration::from_secs(60), 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(live.read_batch(ReadCursor::Pending, 10, Duration::ZERO).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_blocking_read_wakes_on_append() {
        let stream = MemoryStream::new("swap_event");
        let reader = stream.consumer(GROUP, "c:0");
        reader.prepare().await.unwrap();

        let producer = Arc::clone(&stream);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.append("late").await.unwrap();
        });
        let batch = reader.read_batch(ReadCursor::New, 10, Duration::from_secs(5)).await.unwrap();
        assert_eq!(batch.len(), 1);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_maxlen_trims_oldest() {
        let stream = MemoryStream::with_maxlen("swap_event:result", Some(2));
        for i in 0..5 {
            stream.append(&i.to_string()).await.unwrap();
        }
        let data: Vec<String> = stream
            .entries()
            .iter()
            .map(|m| m.field("data").unwrap().to_string())
            .collect();
        assert_eq!(data, vec!["3", "4"]);
    }
}
