//! Server-Sent Events framing

use bytes::Bytes;

/// One event on a session's stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// First event of every stream: where to POST calls for this session
    Endpoint(String),
    /// A complete JSON-RPC frame
    Message(String),
    /// Comment line used as heartbeat, carries unix seconds
    KeepAlive(i64),
}

impl SseEvent {
    pub fn keepalive_now() -> Self {
        SseEvent::KeepAlive(chrono::Utc::now().timestamp())
    }

    /// Format as SSE wire text, terminated by the blank line
    pub fn format(&self) -> String {
        match self {
            SseEvent::Endpoint(url) => format!("event: endpoint\ndata: {}\n\n", url),
            SseEvent::Message(json) => {
                // Encoded JSON never contains raw newlines, but keep the frame valid if it does
                let mut out = String::with_capacity(json.len() + 32);
                out.push_str("event: message\n");
                for line in json.split('\n') {
                    out.push_str("data: ");
                    out.push_str(line);
                    out.push('\n');
                }
                out.push('\n');
                out
            }
            SseEvent::KeepAlive(ts) => format!(": keepalive {}\n\n", ts),
        }
    }

    /// The formatted event as one body frame
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.format())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_formats() {
        assert_eq!(
            SseEvent::Endpoint("/message?sessionId=abc".into()).format(),
            "event: endpoint\ndata: /message?sessionId=abc\n\n"
        );
        assert_eq!(
            SseEvent::Message(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#.into()).format(),
            "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\n"
        );
        assert_eq!(SseEvent::KeepAlive(42).format(), ": keepalive 42\n\n");
    }

    #[test]
    fn test_multiline_payload_stays_one_event() {
        let formatted = SseEvent::Message("{\n}".into()).format();
        assert_eq!(formatted, "event: message\ndata: {\ndata: }\n\n");
        assert_eq!(formatted.matches("\n\n").count(), 1);
    }
}
