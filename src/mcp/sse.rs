//! `text/event-stream` framing.
//!
//! Only the `data` field matters to MCP; `event`, `id` and `retry` lines are
//! accepted and ignored on decode.

use crate::mcp::jsonrpc::JsonRpcMessage;

/// Collect the data payload of every event in `body`.
///
/// Multi-line `data` fields are joined with `\n`. A trailing event without
/// the terminating blank line is still returned.
pub fn decode_events(body: &str) -> Vec<String> {
    let mut events = Vec::new();
    let mut data: Option<String> = None;

    for raw in body.split('\n') {
        let line = raw.strip_suffix('\r').unwrap_or(raw);

        if line.is_empty() {
            if let Some(payload) = data.take() {
                events.push(payload);
            }
            continue;
        }
        if line.starts_with(':') {
            continue;
        }

        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        if field == "data" {
            match data.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => data = Some(value.to_string()),
            }
        }
    }

    if let Some(payload) = data {
        events.push(payload);
    }
    events
}

/// Decode every JSON-RPC message carried by an event stream.
///
/// Events whose data is not a JSON-RPC message are skipped.
pub fn decode_messages(body: &str) -> Vec<JsonRpcMessage> {
    decode_events(body)
        .iter()
        .filter(|payload| !payload.trim().is_empty())
        .filter_map(|payload| match serde_json::from_str(payload) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping non JSON-RPC event");
                None
            }
        })
        .collect()
}

/// Frame one message as a `message` event.
pub fn encode_message(message: &JsonRpcMessage) -> String {
    let json = serde_json::to_string(message).unwrap_or_default();
    encode_event("message", &json)
}

/// Frame `data` as a single event. Embedded newlines become extra `data:` lines.
pub fn encode_event(event: &str, data: &str) -> String {
    let mut out = format!("event: {event}\n");
    for line in data.split('\n') {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_handles_comments_crlf_and_multiline() {
        let body = ": keep-alive\r\nevent: message\r\ndata: {\"a\":\r\ndata: 1}\r\n\r\ndata: second\n";
        assert_eq!(decode_events(body), vec!["{\"a\":\n1}", "second"]);
    }

    #[test]
    fn test_decode_messages_skips_garbage() {
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\ndata: hello\n\n";
        let messages = decode_messages(body);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, Some(json!(1)));
    }

    #[test]
    fn test_encoded_message_decodes_to_same_message() {
        let msg = JsonRpcMessage::result(json!("abc"), json!({"tools": []}));
        let framed = encode_message(&msg);
        assert!(framed.starts_with("event: message\ndata: "));
        assert!(framed.ends_with("\n\n"));
        assert_eq!(decode_messages(&framed), vec![msg]);
    }
}
