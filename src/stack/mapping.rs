//! Defines the event source mapping from a table's change stream to the
//! function, including the filter criteria that decide which change
//! records reach it.

use crate::stack::expr::Expr;
use crate::stack::template::{Resource, Template};
use crate::stack::Construct;
use anyhow::{anyhow, bail, Context, Result};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// A node of a filter pattern.
#[derive(Clone, Debug, PartialEq)]
pub enum Pattern {
    /// The field must equal one of these values.
    OneOf(Vec<Value>),

    /// The field must be an object matching every nested pattern.
    Nested(BTreeMap<String, Pattern>),
}

impl Pattern {
    fn matches(&self, field: Option<&Value>) -> bool {
        match (self, field) {
            (_, None) => false,
            (Pattern::OneOf(allowed), Some(Value::Array(items))) => items
                .iter()
                .any(|item| allowed.iter().any(|value| same_value(value, item))),
            (Pattern::OneOf(allowed), Some(field)) => {
                allowed.iter().any(|value| same_value(value, field))
            }
            (Pattern::Nested(nested), Some(Value::Object(object))) => nested
                .iter()
                .all(|(key, pattern)| pattern.matches(object.get(key))),
            (Pattern::Nested(_), Some(_)) => false,
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Pattern::OneOf(values) => Value::Array(values.clone()),
            Pattern::Nested(nested) => Value::Object(
                nested
                    .iter()
                    .map(|(key, pattern)| (key.clone(), pattern.to_value()))
                    .collect(),
            ),
        }
    }

    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Array(values) => {
                if let Some(filter) = values.iter().find(|value| value.is_object()) {
                    bail!("content filter {} isn't supported", filter);
                }
                Ok(Pattern::OneOf(values.clone()))
            }
            Value::Object(object) => Ok(Pattern::Nested(parse_fields(object)?)),
            other => Err(anyhow!(
                "filter pattern entries must be arrays or objects, found {}",
                other
            )),
        }
    }
}

/// Numbers compare by value, so `1` matches `1.0`.
fn same_value(pattern: &Value, field: &Value) -> bool {
    match (pattern, field) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => pattern == field,
    }
}

fn parse_fields(object: &Map<String, Value>) -> Result<BTreeMap<String, Pattern>> {
    object
        .iter()
        .map(|(key, value)| Ok((key.clone(), Pattern::from_value(value)?)))
        .collect()
}

/// A filter applied to each record of the event source before the
/// function is invoked. An empty pattern matches everything.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilterPattern {
    pub fields: BTreeMap<String, Pattern>,
}

impl FilterPattern {
    /// Accept only records whose `eventName` is one of the given names.
    pub fn event_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut fields = BTreeMap::new();
        fields.insert(
            String::from("eventName"),
            Pattern::OneOf(
                names
                    .into_iter()
                    .map(|name| Value::String(name.into()))
                    .collect(),
            ),
        );
        FilterPattern { fields }
    }

    /// Evaluate the pattern against a raw record.
    pub fn matches(&self, record: &Value) -> bool {
        match record {
            Value::Object(object) => self
                .fields
                .iter()
                .all(|(key, pattern)| pattern.matches(object.get(key))),
            _ => self.fields.is_empty(),
        }
    }

    /// The pattern as the JSON string that goes into `FilterCriteria`.
    pub fn to_pattern_string(&self) -> String {
        Pattern::Nested(self.fields.clone()).to_value().to_string()
    }

    /// Parse a pattern string as found in `FilterCriteria`.
    pub fn parse(pattern: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(pattern)
            .with_context(|| format!("Filter pattern {:?} isn't valid JSON", pattern))?;
        match value {
            Value::Object(object) => Ok(FilterPattern {
                fields: parse_fields(&object)?,
            }),
            _ => Err(anyhow!("filter pattern {:?} isn't a JSON object", pattern)),
        }
    }
}

/// Only row insertions reach the function; updates and removals are
/// dropped by the provider.
pub fn insert_only() -> FilterPattern {
    FilterPattern::event_names(["INSERT"])
}

/// Where a new mapping starts reading the stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartingPosition {
    TrimHorizon,
    Latest,
}

impl StartingPosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            StartingPosition::TrimHorizon => "TRIM_HORIZON",
            StartingPosition::Latest => "LATEST",
        }
    }
}

/// Binds a change stream to a function.
#[derive(Clone, Debug)]
pub struct EventMapping {
    pub logical_id: String,
    pub source_arn: Expr,
    pub function_name: Expr,
    pub starting_position: StartingPosition,
    pub batch_size: u32,
    pub batching_window_seconds: u32,
    pub filters: Vec<FilterPattern>,
}

impl Construct for EventMapping {
    fn declare(&self, template: &mut Template) -> Result<()> {
        let mut properties = json!({
            "EventSourceArn": self.source_arn,
            "FunctionName": self.function_name,
            "StartingPosition": self.starting_position.as_str(),
            "BatchSize": self.batch_size,
            "MaximumBatchingWindowInSeconds": self.batching_window_seconds,
        });
        if !self.filters.is_empty() {
            properties["FilterCriteria"] = json!({
                "Filters": self
                    .filters
                    .iter()
                    .map(|filter| json!({ "Pattern": filter.to_pattern_string() }))
                    .collect::<Vec<_>>(),
            });
        }
        template.add(
            &self.logical_id,
            Resource::new("AWS::Lambda::EventSourceMapping", properties),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(event_name: &str) -> Value {
        json!({
            "eventID": "1",
            "eventName": event_name,
            "eventSource": "aws:dynamodb",
            "dynamodb": { "Keys": { "shop_url": { "S": "shop.example.com" } } },
        })
    }

    #[test]
    fn insert_only_admits_inserts() {
        let filter = insert_only();
        assert!(filter.matches(&record("INSERT")));
        for rejected in ["MODIFY", "REMOVE", "insert", ""] {
            assert!(!filter.matches(&record(rejected)), "{} was admitted", rejected);
        }
        assert!(!filter.matches(&json!({ "eventID": "1" })));
        assert!(!filter.matches(&json!("INSERT")));
    }

    #[test]
    fn pattern_string_is_stable() {
        assert_eq!(insert_only().to_pattern_string(), r#"{"eventName":["INSERT"]}"#);
        assert_eq!(
            FilterPattern::parse(&insert_only().to_pattern_string()).unwrap(),
            insert_only()
        );
    }

    #[test]
    fn nested_patterns() {
        let filter =
            FilterPattern::parse(r#"{"dynamodb":{"Keys":{"shop_url":{"S":["shop.example.com"]}}}}"#)
                .unwrap();
        assert!(filter.matches(&record("MODIFY")));
        assert!(!filter.matches(&json!({ "dynamodb": { "Keys": {} } })));
        assert!(!filter.matches(&json!({ "dynamodb": "flat" })));
    }

    #[test]
    fn array_fields_match_any_element() {
        let filter = FilterPattern::parse(r#"{"tags":["a"]}"#).unwrap();
        assert!(filter.matches(&json!({ "tags": ["b", "a"] })));
        assert!(!filter.matches(&json!({ "tags": ["b"] })));
    }

    #[test]
    fn rejects_malformed_patterns() {
        assert!(FilterPattern::parse("[]").is_err());
        assert!(FilterPattern::parse(r#"{"eventName":"INSERT"}"#).is_err());
        assert!(FilterPattern::parse("{").is_err());
        for content_filter in [
            r#"{"eventName":[{"prefix":"INS"}]}"#,
            r#"{"eventName":["INSERT",{"anything-but":["REMOVE"]}]}"#,
        ] {
            let err = FilterPattern::parse(content_filter).unwrap_err();
            assert!(err.to_string().contains("content filter"), "{}", err);
        }
    }

    #[test]
    fn numbers_match_by_value() {
        let filter = FilterPattern::parse(r#"{"size":[1]}"#).unwrap();
        assert!(filter.matches(&json!({ "size": 1.0 })));
        assert!(filter.matches(&json!({ "size": [2, 1.0] })));
        assert!(!filter.matches(&json!({ "size": 2 })));
        assert!(!filter.matches(&json!({ "size": "1" })));
    }

    #[test]
    fn mapping_renders_filter_criteria() {
        let mapping = EventMapping {
            logical_id: String::from("Mapping"),
            source_arn: Expr::import("stream"),
            function_name: Expr::reference("Function"),
            starting_position: StartingPosition::TrimHorizon,
            batch_size: 1,
            batching_window_seconds: 1,
            filters: vec![insert_only()],
        };
        let mut template = Template::new(None);
        mapping.declare(&mut template).unwrap();
        let resource = &template.resources["Mapping"];
        assert_eq!(resource.kind, "AWS::Lambda::EventSourceMapping");
        assert_eq!(
            resource.properties["FilterCriteria"]["Filters"][0]["Pattern"],
            r#"{"eventName":["INSERT"]}"#
        );
        assert_eq!(resource.properties["StartingPosition"], "TRIM_HORIZON");
    }
}
