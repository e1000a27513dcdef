//! Defines the trace context carried from upstream producers, through
//! the function, to the consumers of the order-received topic.

use serde::{Deserialize, Serialize};

/// Message field holding the trace context.
pub const TRACE_FIELD: &str = "opentelemetry_tracing";

/// A trace id and the id of the span that produced a message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
}

impl TraceContext {
    /// Read the context of an invocation from its X-Ray trace header,
    /// e.g. `Root=1-5759e988-bd862e3fe1be46a994272793;Parent=53995c3f42cd8ad8;Sampled=1`.
    /// The trace id is the root without its version and dashes, so it
    /// reads as a W3C trace id.
    pub fn from_xray_header(header: &str) -> Option<Self> {
        let mut root = None;
        let mut parent = None;
        for field in header.split(';') {
            match field.trim().split_once('=') {
                Some(("Root", value)) => root = Some(value),
                Some(("Parent", value)) => parent = Some(value),
                _ => {}
            }
        }
        let mut parts = root?.split('-');
        if parts.next()? != "1" {
            return None;
        }
        let trace_id = format!("{}{}", parts.next()?, parts.next()?);
        let span_id = parent?.to_string();
        if parts.next().is_some() || !is_hex(&trace_id, 32) || !is_hex(&span_id, 16) {
            return None;
        }
        Some(TraceContext { trace_id, span_id })
    }
}

fn is_hex(value: &str, len: usize) -> bool {
    value.len() == len && value.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_xray_headers() {
        let context = TraceContext::from_xray_header(
            "Root=1-5759e988-bd862e3fe1be46a994272793;Parent=53995c3f42cd8ad8;Sampled=1",
        )
        .unwrap();
        assert_eq!(context.trace_id, "5759e988bd862e3fe1be46a994272793");
        assert_eq!(context.span_id, "53995c3f42cd8ad8");
        assert_eq!(
            serde_json::to_value(&context).unwrap(),
            json!({ "traceId": "5759e988bd862e3fe1be46a994272793", "spanId": "53995c3f42cd8ad8" })
        );
    }

    #[test]
    fn rejects_incomplete_headers() {
        for header in [
            "",
            "Root=1-5759e988-bd862e3fe1be46a994272793;Sampled=1",
            "Parent=53995c3f42cd8ad8",
            "Root=2-5759e988-bd862e3fe1be46a994272793;Parent=53995c3f42cd8ad8",
            "Root=1-5759e988-bd862e3f;Parent=53995c3f42cd8ad8",
            "Root=1-5759e988-bd862e3fe1be46a994272793;Parent=not-hex-at-all!",
        ] {
            assert_eq!(TraceContext::from_xray_header(header), None, "{}", header);
        }
    }
}
