//! Terminal result publication
//!
//! Publishing is best effort. A failure is logged and counted, never returned:
//! the run has already reached a terminal state and the inbound entry is acked
//! regardless, so a lost result never causes a re-execution.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::metrics::metrics;
use crate::stream::StreamSink;
use crate::types::SwapResult;

pub struct ResultPublisher {
    sink: Arc<dyn StreamSink>,
}

impl ResultPublisher {
    pub fn new(sink: Arc<dyn StreamSink>) -> Self {
        Self { sink }
    }

    /// Returns whether the result reached the stream
    pub async fn publish(&self, result: &SwapResult) -> bool {
        let data = match serde_json::to_string(result) {
            Ok(data) => data,
            Err(e) => {
                metrics().publish_failures.inc();
                warn!(intent_id = %result.intent.id, error = %e, "Failed to encode swap result");
                return false;
            }
        };
        match self.sink.append(&data).await {
            Ok(id) => {
                debug!(intent_id = %result.intent.id, stream = self.sink.stream(), entry = %id, "Result published");
                true
            }
            Err(e) => {
                metrics().publish_failures.inc();
                warn!(
                    intent_id = %result.intent.id,
                    stream = self.sink.stream(),
                    error = %e,
                    "Failed to publish swap result"
                );
                false
            }
        }
    }
}
