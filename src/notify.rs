//! Defines the messages published by the function and the topic
//! publisher that carries them.

use crate::propagation::{TraceContext, TRACE_FIELD};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, instrument};

/// Left on the recursive topic when a shop still has pending orders
/// after a round of ingestion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Continuation {
    pub shop_url: String,

    /// Absent in messages published before the depth was tracked.
    #[serde(default)]
    pub depth: u32,
}

/// Build the message announcing a fully fetched order. The order's own
/// fields come first; the ingestion fields and the trace context the
/// order was ingested under are set on top of them.
pub fn order_received(
    shop_url: &str,
    limit: usize,
    order: Value,
    trace: Option<&TraceContext>,
) -> Value {
    let mut message = match order {
        Value::Object(fields) => fields,
        other => {
            let mut fields = Map::new();
            fields.insert(String::from("order"), other);
            fields
        }
    };
    message.insert(String::from("shopId"), Value::String(shop_url.to_string()));
    message.insert(String::from("limit"), json!(limit));
    message.insert(String::from("is_full_order"), Value::Bool(true));
    if let Some(trace) = trace {
        message.insert(
            String::from(TRACE_FIELD),
            json!({ "traceId": trace.trace_id, "spanId": trace.span_id }),
        );
    }
    Value::Object(message)
}

/// Wrap a message for publishing with the `json` message structure,
/// where every protocol receives the `default` entry.
pub fn envelope(message: &Value) -> Result<String> {
    let inner = serde_json::to_string(message).context("Failed to serialize message")?;
    serde_json::to_string(&json!({ "default": inner })).context("Failed to serialize envelope")
}

/// Publishes messages to topics.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, topic_arn: &str, message: &Value) -> Result<()>;
}

/// Publishes through SNS.
pub struct SnsNotifier {
    client: aws_sdk_sns::Client,
}

impl SnsNotifier {
    pub fn new(client: aws_sdk_sns::Client) -> Self {
        SnsNotifier { client }
    }
}

#[async_trait]
impl Notifier for SnsNotifier {
    #[instrument(skip(self, message))]
    async fn publish(&self, topic_arn: &str, message: &Value) -> Result<()> {
        let response = self
            .client
            .publish()
            .target_arn(topic_arn)
            .message(envelope(message)?)
            .message_structure("json")
            .send()
            .await
            .with_context(|| format!("Failed to publish message to topic {:?}", topic_arn))?;
        info!(message_id = ?response.message_id(), "Published message");
        Ok(())
    }
}
