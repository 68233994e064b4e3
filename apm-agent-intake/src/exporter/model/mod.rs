use apm_agent::trace::{SpanData, Status};
use apm_agent::{KeyValue, Value};
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

pub(crate) mod event;
pub(crate) mod metadata;

use event::{Event, Label, Outcome};
pub(crate) use metadata::Metadata;

/// Label set on spans their transaction force-ended.
const TRUNCATED_LABEL: &str = "truncated";

/// Encodes one request body: the metadata line followed by one line per
/// record, in batch order.
pub(crate) fn encode_events(
    metadata_line: &[u8],
    batch: Vec<SpanData>,
) -> Result<Vec<u8>, serde_json::Error> {
    let mut body = Vec::with_capacity(metadata_line.len() + batch.len() * 256);
    body.extend_from_slice(metadata_line);
    for span_data in batch {
        serde_json::to_writer(&mut body, &into_event(span_data))?;
        body.push(b'\n');
    }
    Ok(body)
}

/// Converts a finished record into a `transaction` or `span` event.
pub(crate) fn into_event(span_data: SpanData) -> Event {
    let outcome = outcome(&span_data.status, span_data.truncated);
    let timestamp = span_data
        .start_time
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_micros() as u64;
    let duration = span_data.duration().as_micros() as f64 / 1_000.0;
    let mut labels = into_labels(span_data.attributes);
    if span_data.truncated {
        labels.insert(TRUNCATED_LABEL.to_string(), Label::Bool(true));
    }

    match span_data.span_count {
        Some(span_count) => Event::Transaction(event::Transaction {
            id: span_data.span_context.span_id().to_string(),
            trace_id: span_data.span_context.trace_id().to_string(),
            parent_id: span_data.parent_span_id.map(|id| id.to_string()),
            name: span_data.name.into_owned(),
            kind: span_data.kind.as_str().to_string(),
            timestamp,
            duration,
            span_count: event::SpanCount {
                started: span_count.started,
                dropped: span_count.dropped,
            },
            outcome,
            sampled: true,
            labels,
        }),
        None => Event::Span(event::Span {
            id: span_data.span_context.span_id().to_string(),
            trace_id: span_data.span_context.trace_id().to_string(),
            // Children always have a parent; fall back to the transaction.
            parent_id: span_data
                .parent_span_id
                .unwrap_or(span_data.transaction_id)
                .to_string(),
            transaction_id: span_data.transaction_id.to_string(),
            name: span_data.name.into_owned(),
            kind: span_data.kind.as_str().to_string(),
            timestamp,
            duration,
            outcome,
            labels,
        }),
    }
}

fn outcome(status: &Status, truncated: bool) -> Outcome {
    match status {
        Status::Error { .. } => Outcome::Failure,
        Status::Ok => Outcome::Success,
        Status::Unset if truncated => Outcome::Unknown,
        Status::Unset => Outcome::Success,
    }
}

fn into_labels(attributes: Vec<KeyValue>) -> BTreeMap<String, Label> {
    attributes
        .into_iter()
        .map(|kv| {
            let value = match kv.value {
                Value::Bool(v) => Label::Bool(v),
                Value::I64(v) => Label::I64(v),
                Value::F64(v) => Label::F64(v),
                Value::String(v) => Label::String(v.into_owned()),
            };
            (label_key(kv.key.as_str()), value)
        })
        .collect()
}

/// The intake rejects `.`, `*` and `"` in label keys.
fn label_key(key: &str) -> String {
    key.replace(['.', '*', '"'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use apm_agent::trace::{SpanContext, SpanCount, SpanId, SpanKind, TraceId};

    const TRACE_ID: TraceId = TraceId::from_u128(0x4bf9_2f35_77b3_4da6_a3ce_929d_0e0e_4736);
    const TX_ID: SpanId = SpanId::from_u64(0x00f0_67aa_0ba9_02b7);
    const SPAN_ID: SpanId = SpanId::from_u64(0xb7ad_6b71_6920_3331);

    fn record(span_id: SpanId, parent: Option<SpanId>, span_count: Option<SpanCount>) -> SpanData {
        let start_time = SystemTime::UNIX_EPOCH + Duration::from_micros(1_502_787_600_000_000);
        SpanData {
            span_context: SpanContext::new(TRACE_ID, span_id, false),
            parent_span_id: parent,
            transaction_id: TX_ID,
            name: "work".into(),
            kind: SpanKind::Custom,
            start_time,
            end_time: start_time + Duration::from_micros(12_345),
            attributes: Vec::new(),
            status: Status::Unset,
            truncated: false,
            span_count,
        }
    }

    fn to_json(event: &Event) -> serde_json::Value {
        serde_json::to_value(event).unwrap()
    }

    #[test]
    fn transaction_record() {
        let event = into_event(record(
            TX_ID,
            None,
            Some(SpanCount {
                started: 3,
                dropped: 1,
            }),
        ));
        let json = to_json(&event);
        let tx = &json["transaction"];
        assert_eq!(tx["id"], "00f067aa0ba902b7");
        assert_eq!(tx["trace_id"], "4bf92f3577b34da6a3ce929d0e0e4736");
        assert!(tx.get("parent_id").is_none());
        assert_eq!(tx["type"], "custom");
        assert_eq!(tx["timestamp"], 1_502_787_600_000_000u64);
        assert_eq!(tx["duration"], 12.345);
        assert_eq!(tx["span_count"]["started"], 3);
        assert_eq!(tx["span_count"]["dropped"], 1);
        assert_eq!(tx["outcome"], "success");
    }

    #[test]
    fn remote_parent_is_kept_on_transaction() {
        let remote = SpanId::from_u64(0x1111);
        let json = to_json(&into_event(record(
            TX_ID,
            Some(remote),
            Some(SpanCount::default()),
        )));
        assert_eq!(json["transaction"]["parent_id"], "0000000000001111");
    }

    #[test]
    fn span_record() {
        let mut data = record(SPAN_ID, Some(TX_ID), None);
        data.kind = SpanKind::Db;
        data.attributes = vec![
            KeyValue::new("db.statement", "SELECT 1"),
            KeyValue::new("rows", 3i64),
        ];
        let json = to_json(&into_event(data));
        let span = &json["span"];
        assert_eq!(span["id"], "b7ad6b7169203331");
        assert_eq!(span["parent_id"], "00f067aa0ba902b7");
        assert_eq!(span["transaction_id"], "00f067aa0ba902b7");
        assert_eq!(span["type"], "db");
        assert_eq!(span["labels"]["db_statement"], "SELECT 1");
        assert_eq!(span["labels"]["rows"], 3);
        assert!(span["labels"].get("truncated").is_none());
    }

    #[test]
    fn truncated_span_is_labelled() {
        let mut data = record(SPAN_ID, Some(TX_ID), None);
        data.truncated = true;
        let json = to_json(&into_event(data));
        assert_eq!(json["span"]["labels"]["truncated"], true);
        assert_eq!(json["span"]["outcome"], "unknown");
    }

    #[test]
    fn error_status_is_failure() {
        let mut data = record(SPAN_ID, Some(TX_ID), None);
        data.status = Status::error("boom");
        assert_eq!(to_json(&into_event(data))["span"]["outcome"], "failure");
    }

    #[test]
    fn body_is_metadata_then_one_line_per_record() {
        let metadata = Metadata::new("checkout".into(), None, None).to_line().unwrap();
        let batch = vec![
            record(TX_ID, None, Some(SpanCount::default())),
            record(SPAN_ID, Some(TX_ID), None),
        ];
        let body = String::from_utf8(encode_events(&metadata, batch).unwrap()).unwrap();
        let lines: Vec<&str> = body.lines().collect();

        assert!(body.ends_with('\n'));
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("{\"metadata\":"));
        assert!(lines[1].starts_with("{\"transaction\":"));
        assert!(lines[2].starts_with("{\"span\":"));
    }

    #[test]
    fn label_keys_are_sanitized() {
        assert_eq!(label_key("exception.message"), "exception_message");
        assert_eq!(label_key("a*b\"c"), "a_b_c");
        assert_eq!(label_key("plain"), "plain");
    }
}
