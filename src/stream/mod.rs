//! Inbound and outbound event streams
//!
//! Messages carry two fields: `data` (JSON) and `timestamp` (unix seconds).
//! Inbound delivery is at-least-once through consumer groups; a message stays
//! pending for its consumer until acked.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

pub mod memory;
pub mod redis_stream;

pub use memory::{MemoryIntentSource, MemoryStream};
pub use redis_stream::{RedisIntentSource, RedisStreamSink};

use crate::types::{unix_now, SwapIntent};

pub const DATA_FIELD: &str = "data";
pub const TIMESTAMP_FIELD: &str = "timestamp";

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Failed to encode stream payload: {0}")]
    Encode(String),

    #[error("Stream {0} is closed")]
    Closed(String),
}

/// A raw stream entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    pub id: String,
    pub fields: HashMap<String, String>,
}

impl StreamMessage {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Where a reader resumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadCursor {
    /// Entries already delivered to this consumer and not yet acked (`0`)
    Pending,
    /// Entries never delivered to the group (`>`)
    New,
}

/// One consumer of the inbound stream's group
#[async_trait]
pub trait IntentSource: Send + Sync {
    /// Consumer name within the group
    fn name(&self) -> &str;

    /// Create the group (and the stream) when missing
    async fn prepare(&self) -> Result<(), StreamError>;

    /// Blocks up to `block` for [`ReadCursor::New`]; pending reads return immediately
    async fn read_batch(
        &self,
        cursor: ReadCursor,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamMessage>, StreamError>;

    /// Take over entries other consumers left pending for longer than `min_idle`
    async fn claim_stale(&self, min_idle: Duration, count: usize) -> Result<Vec<StreamMessage>, StreamError>;

    async fn ack(&self, id: &str) -> Result<(), StreamError>;
}

/// Append-only producer side of a stream
#[async_trait]
pub trait StreamSink: Send + Sync {
    fn stream(&self) -> &str;

    /// Append `{data, timestamp}` stamped now and return the entry id
    async fn append(&self, data: &str) -> Result<String, StreamError> {
        self.append_stamped(data, &unix_now().to_string()).await
    }

    /// Append with a caller-supplied `timestamp`, so entries derived from an
    /// older event age from that event
    async fn append_stamped(&self, data: &str, timestamp: &str) -> Result<String, StreamError>;
}

/// Field pairs of an outgoing message
pub fn message_fields(data: &str, timestamp: &str) -> [(&'static str, String); 2] {
    [
        (DATA_FIELD, data.to_string()),
        (TIMESTAMP_FIELD, timestamp.to_string()),
    ]
}

/// Seconds since the entry's `timestamp`, `None` when it is missing or unparseable
pub fn message_age(message: &StreamMessage, now_secs: f64) -> Option<f64> {
    message
        .field(TIMESTAMP_FIELD)
        .and_then(|t| t.trim().parse::<f64>().ok())
        .filter(|t| t.is_finite())
        .map(|t| now_secs - t)
}

/// Missing timestamps count as stale
pub fn is_stale(age_secs: Option<f64>, stale_after: Duration) -> bool {
    age_secs.map_or(true, |age| age > stale_after.as_secs_f64())
}

/// What a reader does with an inbound entry
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Intent(SwapIntent),
    /// Too old, or no usable timestamp
    Stale { age_secs: Option<f64> },
    Malformed(String),
}

/// Staleness is checked before the payload is decoded
pub fn classify(message: &StreamMessage, now_secs: f64, stale_after: Duration) -> Inbound {
    let age_secs = message_age(message, now_secs);
    if is_stale(age_secs, stale_after) {
        return Inbound::Stale { age_secs };
    }

    let Some(data) = message.field(DATA_FIELD) else {
        return Inbound::Malformed("missing data field".to_string());
    };
    match serde_json::from_str::<SwapIntent>(data) {
        Ok(intent) => Inbound::Intent(intent),
        Err(e) => Inbound::Malformed(e.to_string()),
    }
}

/// Unix seconds with sub-second precision
pub fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SwapDirection, SwapInType};

    fn message(data: Option<&str>, timestamp: Option<&str>) -> StreamMessage {
        let mut fields = HashMap::new();
        if let Some(d) = data {
            fields.insert(DATA_FIELD.to_string(), d.to_string());
        }
        if let Some(t) = timestamp {
            fields.insert(TIMESTAMP_FIELD.to_string(), t.to_string());
        }
        StreamMessage {
            id: "1-0".into(),
            fields,
        }
    }

    const INTENT: &str = r#"{"direction":"sell","input_mint":"M","output_mint":"So11111111111111111111111111111111111111112","user_pubkey":"U","amount":50,"in_type":"pct","slippage_bps":300,"use_jito":true,"priority_fee":0.001}"#;

    #[test]
    fn test_fresh_intent_is_decoded() {
        let now = 1_700_000_000.0;
        match classify(&message(Some(INTENT), Some("1700000000")), now + 3.0, Duration::from_secs(15)) {
            Inbound::Intent(intent) => {
                assert_eq!(intent.direction, SwapDirection::Sell);
                assert_eq!(intent.in_type, Some(SwapInType::Percentage));
                assert!(intent.use_priority_relay);
                assert_eq!(intent.slippage_bps, 300);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_staleness() {
        let stale = Duration::from_secs(15);
        let now = 1_700_000_100.0;
        assert_eq!(
            classify(&message(Some(INTENT), Some("1700000080.5")), now, stale),
            Inbound::Stale { age_secs: Some(19.5) }
        );
        assert_eq!(
            classify(&message(Some(INTENT), None), now, stale),
            Inbound::Stale { age_secs: None }
        );
        assert_eq!(
            classify(&message(Some(INTENT), Some("yesterday")), now, stale),
            Inbound::Stale { age_secs: None }
        );
        // Exactly at the limit is still fresh
        assert!(matches!(
            classify(&message(Some(INTENT), Some("1700000085")), now, stale),
            Inbound::Intent(_)
        ));
    }

    #[test]
    fn test_malformed_payloads() {
        let now = 1_700_000_000.0;
        let stale = Duration::from_secs(15);
        assert!(matches!(
            classify(&message(None, Some("1700000000")), now, stale),
            Inbound::Malformed(_)
        ));
        assert!(matches!(
            classify(&message(Some("{not json"), Some("1700000000")), now, stale),
            Inbound::Malformed(_)
        ));
    }

    #[test]
    fn test_unknown_direction_still_decodes() {
        let data = INTENT.replace("\"sell\"", "\"short\"");
        match classify(&message(Some(&data), Some("1700000000")), 1_700_000_000.0, Duration::from_secs(15)) {
            Inbound::Intent(intent) => assert_eq!(intent.direction, SwapDirection::Unsupported),
            other => panic!("unexpected {other:?}"),
        }
    }
}
