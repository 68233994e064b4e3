use serde::Serialize;
use std::collections::BTreeMap;

/// One record line after the metadata line.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Event {
    Transaction(Transaction),
    Span(Span),
}

#[derive(Clone, Debug, Serialize)]
pub(crate) struct Transaction {
    pub(crate) id: String,
    pub(crate) trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) parent_id: Option<String>,
    pub(crate) name: String,
    #[serde(rename = "type")]
    pub(crate) kind: String,
    /// Microseconds since the Unix epoch.
    pub(crate) timestamp: u64,
    /// Milliseconds.
    pub(crate) duration: f64,
    pub(crate) span_count: SpanCount,
    pub(crate) outcome: Outcome,
    pub(crate) sampled: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) labels: BTreeMap<String, Label>,
}

#[derive(Clone, Debug, Serialize)]
pub(crate) struct Span {
    pub(crate) id: String,
    pub(crate) trace_id: String,
    pub(crate) parent_id: String,
    pub(crate) transaction_id: String,
    pub(crate) name: String,
    #[serde(rename = "type")]
    pub(crate) kind: String,
    pub(crate) timestamp: u64,
    pub(crate) duration: f64,
    pub(crate) outcome: Outcome,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) labels: BTreeMap<String, Label>,
}

#[derive(Clone, Copy, Debug, Serialize)]
pub(crate) struct SpanCount {
    pub(crate) started: u32,
    pub(crate) dropped: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Outcome {
    Success,
    Failure,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub(crate) enum Label {
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_json_serialization(event: Event, desired: &str) {
        let result = serde_json::to_string(&event).unwrap();
        assert_eq!(result, desired.to_owned());
    }

    #[test]
    fn transaction_line() {
        test_json_serialization(
            Event::Transaction(Transaction {
                id: "00f067aa0ba902b7".into(),
                trace_id: "4bf92f3577b34da6a3ce929d0e0e4736".into(),
                parent_id: None,
                name: "GET /orders".into(),
                kind: "request".into(),
                timestamp: 1_502_787_600_000_000,
                duration: 32.5,
                span_count: SpanCount {
                    started: 2,
                    dropped: 0,
                },
                outcome: Outcome::Success,
                sampled: true,
                labels: BTreeMap::new(),
            }),
            "{\"transaction\":{\"id\":\"00f067aa0ba902b7\",\"trace_id\":\"4bf92f3577b34da6a3ce929d0e0e4736\",\"name\":\"GET /orders\",\"type\":\"request\",\"timestamp\":1502787600000000,\"duration\":32.5,\"span_count\":{\"started\":2,\"dropped\":0},\"outcome\":\"success\",\"sampled\":true}}",
        );
    }

    #[test]
    fn span_line_with_labels() {
        let mut labels = BTreeMap::new();
        labels.insert("rows".to_string(), Label::I64(3));
        labels.insert("truncated".to_string(), Label::Bool(true));
        test_json_serialization(
            Event::Span(Span {
                id: "b7ad6b7169203331".into(),
                trace_id: "4bf92f3577b34da6a3ce929d0e0e4736".into(),
                parent_id: "00f067aa0ba902b7".into(),
                transaction_id: "00f067aa0ba902b7".into(),
                name: "SELECT orders".into(),
                kind: "db".into(),
                timestamp: 1_502_787_600_001_000,
                duration: 10.0,
                outcome: Outcome::Unknown,
                labels,
            }),
            "{\"span\":{\"id\":\"b7ad6b7169203331\",\"trace_id\":\"4bf92f3577b34da6a3ce929d0e0e4736\",\"parent_id\":\"00f067aa0ba902b7\",\"transaction_id\":\"00f067aa0ba902b7\",\"name\":\"SELECT orders\",\"type\":\"db\",\"timestamp\":1502787600001000,\"duration\":10.0,\"outcome\":\"unknown\",\"labels\":{\"rows\":3,\"truncated\":true}}}",
        );
    }
}
