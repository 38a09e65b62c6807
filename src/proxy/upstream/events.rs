//! Upstream stream events and SSE line framing.
//!
//! The upstream answers with newline-delimited `data: {json}` frames closed
//! by `data: end`. Events are discriminated by a `type` field; two
//! historical tool-call shapes (`ToolCall` and `FunctionCall`) exist and are
//! treated as one logical event. Under the shared convention a non-empty
//! `name` begins a new call and a nameless event continues the previous
//! call's argument bytes.

use bytes::BytesMut;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum GrazieEvent {
    Content {
        #[serde(default)]
        content: String,
    },
    ToolCall {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        content: Option<String>,
    },
    FunctionCall {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        content: Option<String>,
    },
    FinishMetadata {
        #[serde(default)]
        reason: Option<String>,
    },
    #[serde(other)]
    Ignored,
}

/// Normalized state-machine input produced from one SSE line.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOp {
    Text(String),
    /// `name = Some(..)` starts a new tool call, `None` continues the
    /// previous call's argument buffer.
    ToolFragment {
        name: Option<String>,
        args: String,
    },
    Finish {
        reason: Option<String>,
    },
    Skip,
}

/// Parse one SSE line into a stream operation. Blank lines, the `data: end`
/// terminator, non-data lines and unparseable payloads are all skipped.
pub fn parse_sse_line(line: &str) -> StreamOp {
    let line = line.trim_end_matches('\r');
    let Some(data) = line.strip_prefix("data: ") else {
        return StreamOp::Skip;
    };
    if data == "end" || data.is_empty() {
        return StreamOp::Skip;
    }
    let Ok(event) = serde_json::from_str::<GrazieEvent>(data) else {
        tracing::debug!("Unparseable stream event: {}", data);
        return StreamOp::Skip;
    };
    classify(event)
}

fn classify(event: GrazieEvent) -> StreamOp {
    match event {
        GrazieEvent::Content { content } => {
            if content.is_empty() {
                StreamOp::Skip
            } else {
                StreamOp::Text(content)
            }
        }
        GrazieEvent::ToolCall { name, content } | GrazieEvent::FunctionCall { name, content } => {
            let name = name.filter(|n| !n.is_empty());
            StreamOp::ToolFragment {
                name,
                args: content.unwrap_or_default(),
            }
        }
        GrazieEvent::FinishMetadata { reason } => StreamOp::Finish { reason },
        GrazieEvent::Ignored => StreamOp::Skip,
    }
}

/// Reassembles complete lines out of arbitrary byte chunks.
#[derive(Default)]
pub struct LineBuffer {
    buf: BytesMut,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning every complete line it closed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line = self.buf.split_to(pos + 1);
            let text = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
            lines.push(text);
        }
        lines
    }

    /// Whatever is left after the stream ends (an unterminated final line).
    pub fn remainder(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = self.buf.split();
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_event() {
        assert_eq!(
            parse_sse_line(r#"data: {"type":"Content","content":"hel"}"#),
            StreamOp::Text("hel".into())
        );
    }

    #[test]
    fn test_empty_content_skipped() {
        assert_eq!(
            parse_sse_line(r#"data: {"type":"Content","content":""}"#),
            StreamOp::Skip
        );
    }

    #[test]
    fn test_function_call_start_and_continuation() {
        assert_eq!(
            parse_sse_line(r#"data: {"type":"FunctionCall","name":"lookup","content":"{\"q\":"}"#),
            StreamOp::ToolFragment {
                name: Some("lookup".into()),
                args: "{\"q\":".into()
            }
        );
        // Null name continues the previous call.
        assert_eq!(
            parse_sse_line(r#"data: {"type":"FunctionCall","name":null,"content":"\"go\"}"}"#),
            StreamOp::ToolFragment {
                name: None,
                args: "\"go\"}".into()
            }
        );
        // Empty-string name is also a continuation.
        assert_eq!(
            parse_sse_line(r#"data: {"type":"FunctionCall","name":"","content":"x"}"#),
            StreamOp::ToolFragment {
                name: None,
                args: "x".into()
            }
        );
    }

    #[test]
    fn test_both_historical_tool_shapes_accepted() {
        let a = parse_sse_line(r#"data: {"type":"ToolCall","name":"f","content":"{}"}"#);
        let b = parse_sse_line(r#"data: {"type":"FunctionCall","name":"f","content":"{}"}"#);
        assert_eq!(a, b);
    }

    #[test]
    fn test_finish_metadata() {
        assert_eq!(
            parse_sse_line(r#"data: {"type":"FinishMetadata"}"#),
            StreamOp::Finish { reason: None }
        );
        assert_eq!(
            parse_sse_line(r#"data: {"type":"FinishMetadata","reason":"stop"}"#),
            StreamOp::Finish {
                reason: Some("stop".into())
            }
        );
    }

    #[test]
    fn test_envelope_and_noise_skipped() {
        assert_eq!(parse_sse_line(""), StreamOp::Skip);
        assert_eq!(parse_sse_line("data: end"), StreamOp::Skip);
        assert_eq!(parse_sse_line("event: ping"), StreamOp::Skip);
        assert_eq!(parse_sse_line("data: not json"), StreamOp::Skip);
        assert_eq!(
            parse_sse_line(r#"data: {"type":"QuotaMetadata","updated":{}}"#),
            StreamOp::Skip
        );
    }

    #[test]
    fn test_crlf_tolerated() {
        assert_eq!(
            parse_sse_line("data: {\"type\":\"Content\",\"content\":\"x\"}\r"),
            StreamOp::Text("x".into())
        );
    }

    #[test]
    fn test_line_buffer_reassembles_split_chunks() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"data: {\"type\":\"Con").is_empty());
        let lines = buf.push(b"tent\",\"content\":\"a\"}\ndata: en");
        assert_eq!(lines, vec![r#"data: {"type":"Content","content":"a"}"#]);
        let lines = buf.push(b"d\n");
        assert_eq!(lines, vec!["data: end"]);
        assert!(buf.remainder().is_none());
    }

    #[test]
    fn test_line_buffer_remainder() {
        let mut buf = LineBuffer::new();
        buf.push(b"partial line without newline");
        assert_eq!(buf.remainder().as_deref(), Some("partial line without newline"));
        assert!(buf.remainder().is_none());
    }

    #[test]
    fn test_multiple_lines_in_one_chunk() {
        let mut buf = LineBuffer::new();
        let lines = buf.push(b"one\ntwo\n\nthree\n");
        assert_eq!(lines, vec!["one", "two", "", "three"]);
    }
}
