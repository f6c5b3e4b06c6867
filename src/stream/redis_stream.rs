//! Redis streams backend
//!
//! Each reader owns its own connection: a blocking `XREADGROUP` holds the
//! connection for the whole block window and would stall anything sharing it.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{
    StreamAutoClaimOptions, StreamAutoClaimReply, StreamId, StreamMaxlen, StreamReadOptions, StreamReadReply,
};
use redis::{AsyncCommands, FromRedisValue};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use super::{message_fields, IntentSource, ReadCursor, StreamError, StreamMessage, StreamSink};

pub struct RedisIntentSource {
    con: ConnectionManager,
    stream: String,
    group: String,
    consumer: String,
}

impl RedisIntentSource {
    pub fn new(
        con: ConnectionManager,
        stream: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Self {
        Self {
            con,
            stream: stream.into(),
            group: group.into(),
            consumer: consumer.into(),
        }
    }

    /// Open a dedicated connection for one consumer
    pub async fn connect(
        client: &redis::Client,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Self, StreamError> {
        let con = ConnectionManager::new(client.clone()).await?;
        Ok(Self::new(con, stream, group, consumer))
    }
}

fn to_message(entry: StreamId) -> StreamMessage {
    let fields: HashMap<String, String> = entry
        .map
        .iter()
        .filter_map(|(k, v)| String::from_redis_value(v).ok().map(|s| (k.clone(), s)))
        .collect();
    StreamMessage { id: entry.id, fields }
}

#[async_trait]
impl IntentSource for RedisIntentSource {
    fn name(&self) -> &str {
        &self.consumer
    }

    async fn prepare(&self) -> Result<(), StreamError> {
        let mut con = self.con.clone();
        let created: Result<(), redis::RedisError> =
            con.xgroup_create_mkstream(&self.stream, &self.group, "0").await;
        match created {
            Ok(()) => {
                info!(stream = %self.stream, group = %self.group, "Consumer group created");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_batch(
        &self,
        cursor: ReadCursor,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamMessage>, StreamError> {
        let mut con = self.con.clone();
        let mut opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(count);
        let id = match cursor {
            ReadCursor::Pending => "0",
            ReadCursor::New => {
                opts = opts.block(block.as_millis() as usize);
                ">"
            }
        };

        // Nil when a blocking read times out
        let reply: Option<StreamReadReply> = con.xread_options(&[&self.stream], &[id], &opts).await?;
        let messages: Vec<StreamMessage> = reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).map(to_message).collect())
            .unwrap_or_default();
        if !messages.is_empty() {
            debug!(consumer = %self.consumer, ?cursor, count = messages.len(), "Read batch");
        }
        Ok(messages)
    }

    async fn claim_stale(&self, min_idle: Duration, count: usize) -> Result<Vec<StreamMessage>, StreamError> {
        let mut con = self.con.clone();
        let opts = StreamAutoClaimOptions::default().count(count);
        let reply: StreamAutoClaimReply = con
            .xautoclaim_options(
                &self.stream,
                &self.group,
                &self.consumer,
                min_idle.as_millis() as u64,
                "0-0",
                opts,
            )
            .await?;
        if !reply.deleted_ids.is_empty() {
            debug!(consumer = %self.consumer, deleted = reply.deleted_ids.len(), "Claimed entries were trimmed");
        }
        Ok(reply.claimed.into_iter().map(to_message).collect())
    }

    async fn ack(&self, id: &str) -> Result<(), StreamError> {
        let mut con = self.con.clone();
        let _: i64 = con.xack(&self.stream, &self.group, &[id]).await?;
        Ok(())
    }
}

/// `XADD ... MAXLEN ~ n` producer
#[derive(Clone)]
pub struct RedisStreamSink {
    con: ConnectionManager,
    stream: String,
    maxlen: Option<usize>,
}

impl RedisStreamSink {
    pub fn new(con: ConnectionManager, stream: impl Into<String>, maxlen: Option<usize>) -> Self {
        Self {
            con,
            stream: stream.into(),
            maxlen,
        }
    }
}

#[async_trait]
impl StreamSink for RedisStreamSink {
    fn stream(&self) -> &str {
        &self.stream
    }

    async fn append_stamped(&self, data: &str, timestamp: &str) -> Result<String, StreamError> {
        let mut con = self.con.clone();
        let fields = message_fields(data, timestamp);
        let id: String = match self.maxlen {
            Some(n) => con.xadd_maxlen(&self.stream, StreamMaxlen::Approx(n), "*", &fields).await?,
            None => con.xadd(&self.stream, "*", &fields).await?,
        };
        Ok(id)
    }
}
