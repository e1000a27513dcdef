//! Defines a _trigger_, the input for one round of ingestion for one
//! shop. Triggers are built from the records of an invocation, which
//! are either change stream records from the flags table or
//! continuations delivered through the recursive topic.

use crate::notify::Continuation;
use crate::stack::mapping::FilterPattern;
use anyhow::{anyhow, Context, Result};
use aws_lambda_events::event::dynamodb::EventRecord;
use aws_lambda_events::event::sns::SnsRecord;
use serde_dynamo::AttributeValue;
use serde_json::Value;
use tracing::{info, instrument};

/// Where a trigger came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    /// A new ingestion flag was inserted.
    StreamInsert,

    /// A previous invocation left work for this one.
    Continuation,
}

/// One round of ingestion for one shop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Trigger {
    pub shop_url: String,

    /// How many continuations preceded this trigger.
    pub depth: u32,

    pub origin: Origin,
}

impl Trigger {
    /// Builds triggers from the records of an invocation payload.
    /// Stream records are checked against the given filter again;
    /// records it rejects are skipped.
    #[instrument(skip_all)]
    pub fn from_payload(payload: &Value, filter: &FilterPattern) -> Result<Vec<Self>> {
        let records = payload
            .get("Records")
            .and_then(Value::as_array)
            .ok_or_else(|| anyhow!("invocation payload has no Records"))?;
        let mut triggers = Vec::with_capacity(records.len());
        for record in records {
            if record.get("Sns").is_some() {
                triggers.push(Self::from_sns(record)?);
            } else if filter.matches(record) {
                triggers.push(Self::from_stream(record)?);
            } else {
                info!(
                    event_name = ?record.get("eventName"),
                    "Skipping change record rejected by the filter"
                );
            }
        }
        Ok(triggers)
    }

    fn from_sns(record: &Value) -> Result<Self> {
        let record: SnsRecord =
            serde_json::from_value(record.clone()).context("Malformed SNS record")?;
        let continuation: Continuation = serde_json::from_str(&record.sns.message)
            .with_context(|| {
                format!(
                    "Malformed continuation message {:?} from {:?}",
                    record.sns.message, record.sns.topic_arn
                )
            })?;
        Ok(Trigger {
            shop_url: continuation.shop_url,
            depth: continuation.depth,
            origin: Origin::Continuation,
        })
    }

    fn from_stream(record: &Value) -> Result<Self> {
        let record: EventRecord =
            serde_json::from_value(record.clone()).context("Malformed change stream record")?;
        match record.change.keys.get("shop_url") {
            Some(AttributeValue::S(shop_url)) => Ok(Trigger {
                shop_url: shop_url.clone(),
                depth: 0,
                origin: Origin::StreamInsert,
            }),
            other => Err(anyhow!(
                "change record {:?} has no string shop_url key (found {:?})",
                record.event_id,
                other
            )),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::stack::mapping::insert_only;
    use serde_json::json;

    pub(crate) fn stream_record(event_name: &str, shop_url: &str) -> Value {
        json!({
            "eventID": "c4ca4238a0b923820dcc509a6f75849b",
            "eventName": event_name,
            "eventVersion": "1.1",
            "eventSource": "aws:dynamodb",
            "awsRegion": "us-east-1",
            "dynamodb": {
                "ApproximateCreationDateTime": 1479499740.0,
                "Keys": { "shop_url": { "S": shop_url } },
                "NewImage": {
                    "shop_url": { "S": shop_url },
                    "created_at": { "N": "1479499740" }
                },
                "SequenceNumber": "13021600000000001596893679",
                "SizeBytes": 112,
                "StreamViewType": "NEW_AND_OLD_IMAGES"
            },
            "eventSourceARN": "arn:aws:dynamodb:us-east-1:123456789012:table/flags/stream/2016-11-16T20:42:48.104"
        })
    }

    pub(crate) fn sns_record(message: &str) -> Value {
        json!({
            "EventVersion": "1.0",
            "EventSubscriptionArn": "arn:aws:sns:us-east-1:123456789012:order-recursive:21be56ed-a058-49f5-8c98-aedd2564c486",
            "EventSource": "aws:sns",
            "Sns": {
                "SignatureVersion": "1",
                "Timestamp": "2019-01-02T12:45:07.000Z",
                "Signature": "tcc6faL2yUC6dgZdmrwh1Y4cGa/ebXEkAi6RibDsvpi+tE/1+82j...65r==",
                "SigningCertUrl": "https://sns.us-east-1.amazonaws.com/SimpleNotificationService-ac565b8b1a6c5d002d285f9598aa1d9b.pem",
                "MessageId": "95df01b4-ee98-5cb9-9903-4c221d41eb5e",
                "Message": message,
                "MessageAttributes": {},
                "Type": "Notification",
                "UnsubscribeUrl": "https://sns.us-east-1.amazonaws.com/?Action=Unsubscribe&SubscriptionArn=arn:aws:sns:us-east-1:123456789012:order-recursive:21be56ed-a058-49f5-8c98-aedd2564c486",
                "TopicArn": "arn:aws:sns:us-east-1:123456789012:order-recursive",
                "Subject": null
            }
        })
    }

    #[test]
    fn inserts_become_fresh_triggers() {
        let payload = json!({ "Records": [stream_record("INSERT", "shop.example.com")] });
        let triggers = Trigger::from_payload(&payload, &insert_only()).unwrap();
        assert_eq!(
            triggers,
            vec![Trigger {
                shop_url: String::from("shop.example.com"),
                depth: 0,
                origin: Origin::StreamInsert,
            }]
        );
    }

    #[test]
    fn updates_and_removals_are_skipped() {
        let payload = json!({
            "Records": [
                stream_record("MODIFY", "a.example.com"),
                stream_record("REMOVE", "b.example.com"),
            ]
        });
        assert!(Trigger::from_payload(&payload, &insert_only())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn continuations_carry_their_depth() {
        let payload = json!({
            "Records": [
                sns_record(r#"{"shop_url":"shop.example.com","depth":3}"#),
                sns_record(r#"{"shop_url":"legacy.example.com"}"#),
            ]
        });
        let triggers = Trigger::from_payload(&payload, &insert_only()).unwrap();
        assert_eq!(triggers[0].depth, 3);
        assert_eq!(triggers[0].origin, Origin::Continuation);
        assert_eq!(triggers[1].shop_url, "legacy.example.com");
        assert_eq!(triggers[1].depth, 0);
    }

    #[test]
    fn malformed_input_is_an_error() {
        assert!(Trigger::from_payload(&json!({}), &insert_only()).is_err());
        let payload = json!({ "Records": [sns_record("not json")] });
        assert!(Trigger::from_payload(&payload, &insert_only()).is_err());
        let mut record = stream_record("INSERT", "shop.example.com");
        record["dynamodb"]["Keys"] = json!({ "shop_url": { "N": "1" } });
        let payload = json!({ "Records": [record] });
        assert!(Trigger::from_payload(&payload, &insert_only()).is_err());
    }
}
