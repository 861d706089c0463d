use serde_json::{Value, json};

/// Terminal sentinel sent as the last SSE data frame of every chat stream.
pub const DONE_SENTINEL: &str = "[DONE]";

// ---------------------------------------------------------------------------
// Line buffer
// ---------------------------------------------------------------------------

/// Accumulates raw bytes from an upstream read and yields complete lines,
/// retaining any trailing partial line until a newline completes it.
///
/// Lines are only converted to UTF-8 once complete, so a read boundary that
/// splits a multi-byte character never corrupts output.
#[derive(Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes; returns every line completed by this chunk,
    /// in order, without the trailing newline (or CRLF).
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut raw: Vec<u8> = self.buf.drain(..=pos).collect();
            raw.pop();
            if raw.last() == Some(&b'\r') {
                raw.pop();
            }
            lines.push(String::from_utf8_lossy(&raw).into_owned());
        }
        lines
    }

    /// Drain the trailing partial line, if any. Called once the upstream
    /// source has closed.
    pub fn flush(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        Some(line)
    }
}

// ---------------------------------------------------------------------------
// Outbound frame model
// ---------------------------------------------------------------------------

/// One outbound SSE frame, serialized as `{"type": .., "content": ..}`.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    ToolUse { tool: String, input: Value },
    Result(String),
    Cost(f64),
    Error(String),
}

impl Frame {
    pub fn to_json(&self) -> String {
        let value = match self {
            Frame::Text(text) => json!({"type": "text", "content": text}),
            Frame::ToolUse { tool, input } => {
                json!({"type": "tool_use", "content": {"tool": tool, "input": input}})
            }
            Frame::Result(text) => json!({"type": "result", "content": text}),
            Frame::Cost(cost) => json!({"type": "cost", "content": cost}),
            Frame::Error(message) => json!({"type": "error", "content": message}),
        };
        value.to_string()
    }
}

// ---------------------------------------------------------------------------
// Upstream event translation
// ---------------------------------------------------------------------------

/// Translate one upstream line into outbound frames.
///
/// Non-JSON lines (CLI banners, progress noise) are dropped without
/// surfacing anything to the client.
pub fn parse_line(line: &str) -> Vec<Frame> {
    match serde_json::from_str::<Value>(line) {
        Ok(event) => parse_event(&event),
        Err(_) => Vec::new(),
    }
}

/// Translate one upstream JSON event into outbound frames, preserving
/// content-block order. Handles both the agent CLI's stream-json vocabulary
/// (`assistant`/`result`) and the remote API's delta vocabulary
/// (`content_block_delta`/`content_block_start`/`error`). Unknown event
/// types produce nothing.
pub fn parse_event(event: &Value) -> Vec<Frame> {
    let event_type = event.get("type").and_then(|v| v.as_str()).unwrap_or("");

    match event_type {
        "assistant" => {
            let Some(content) = event
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(|c| c.as_array())
            else {
                return Vec::new();
            };

            let mut frames = Vec::new();
            for block in content {
                match block.get("type").and_then(|v| v.as_str()) {
                    Some("text") => {
                        let text = block.get("text").and_then(|v| v.as_str()).unwrap_or("");
                        frames.push(Frame::Text(text.to_string()));
                    }
                    Some("tool_use") => {
                        let tool = block
                            .get("name")
                            .and_then(|v| v.as_str())
                            .unwrap_or("?")
                            .to_string();
                        let input = block.get("input").cloned().unwrap_or(Value::Null);
                        frames.push(Frame::ToolUse { tool, input });
                    }
                    _ => {}
                }
            }
            frames
        }
        "result" => {
            let mut frames = Vec::new();
            if let Some(text) = event.get("result").and_then(|v| v.as_str()) {
                frames.push(Frame::Result(text.to_string()));
            }
            // The CLI has shipped both spellings of the cost field.
            let cost = event
                .get("total_cost_usd")
                .or_else(|| event.get("cost_usd"))
                .and_then(|v| v.as_f64());
            if let Some(cost) = cost {
                frames.push(Frame::Cost(cost));
            }
            if let Some(turns) = event.get("num_turns").and_then(|v| v.as_u64()) {
                tracing::debug!(turns, "agent run finished");
            }
            frames
        }
        "content_block_delta" => {
            let Some(delta) = event.get("delta") else {
                return Vec::new();
            };
            if delta.get("type").and_then(|v| v.as_str()) != Some("text_delta") {
                return Vec::new();
            }
            match delta.get("text").and_then(|v| v.as_str()) {
                Some(text) if !text.is_empty() => vec![Frame::Text(text.to_string())],
                _ => Vec::new(),
            }
        }
        "content_block_start" => {
            let Some(block) = event.get("content_block") else {
                return Vec::new();
            };
            if block.get("type").and_then(|v| v.as_str()) != Some("tool_use") {
                return Vec::new();
            }
            let tool = block
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("?")
                .to_string();
            vec![Frame::ToolUse {
                tool,
                input: Value::Null,
            }]
        }
        "error" => {
            let message = event
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|v| v.as_str())
                .unwrap_or("upstream error")
                .to_string();
            vec![Frame::Error(message)]
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- LineBuffer ---

    fn collect_lines(chunks: &[&[u8]]) -> Vec<String> {
        let mut buf = LineBuffer::new();
        let mut lines = Vec::new();
        for chunk in chunks {
            lines.extend(buf.push(chunk));
        }
        if let Some(rest) = buf.flush() {
            lines.push(rest);
        }
        lines
    }

    #[test]
    fn test_line_buffer_single_chunk() {
        let lines = collect_lines(&[b"one\ntwo\n"]);
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[test]
    fn test_line_buffer_partial_line_retained() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"hel").is_empty());
        assert_eq!(buf.push(b"lo\nwor"), vec!["hello"]);
        assert_eq!(buf.flush().as_deref(), Some("wor"));
        assert!(buf.flush().is_none());
    }

    #[test]
    fn test_line_buffer_chunking_is_idempotent() {
        let stream = b"{\"a\":1}\nbanner line\n{\"b\":2}\ntrailing";
        let whole = collect_lines(&[stream]);

        // Every possible split point yields the identical line sequence.
        for split in 0..stream.len() {
            let chunked = collect_lines(&[&stream[..split], &stream[split..]]);
            assert_eq!(chunked, whole, "split at {split}");
        }
    }

    #[test]
    fn test_line_buffer_split_inside_multibyte_char() {
        let stream = "h\u{e9}llo\n".as_bytes();
        // Split in the middle of the two-byte e-acute.
        let lines = collect_lines(&[&stream[..2], &stream[2..]]);
        assert_eq!(lines, vec!["h\u{e9}llo"]);
    }

    #[test]
    fn test_line_buffer_crlf() {
        let lines = collect_lines(&[b"one\r\ntwo\r\n"]);
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[test]
    fn test_line_buffer_empty_lines_preserved() {
        let lines = collect_lines(&[b"a\n\nb\n"]);
        assert_eq!(lines, vec!["a", "", "b"]);
    }

    // --- parse_line / parse_event ---

    #[test]
    fn test_non_json_line_is_dropped() {
        assert!(parse_line("Starting up v1.2.3...").is_empty());
        assert!(parse_line("").is_empty());
    }

    #[test]
    fn test_unknown_event_type_ignored() {
        assert!(parse_line(r#"{"type":"system","subtype":"init"}"#).is_empty());
        assert!(parse_line(r#"{"type":"user"}"#).is_empty());
        assert!(parse_line(r#"{"no_type":true}"#).is_empty());
    }

    #[test]
    fn test_assistant_mixed_blocks_preserve_order() {
        let line = r#"{"type":"assistant","message":{"content":[
            {"type":"text","text":"first"},
            {"type":"tool_use","name":"Read","input":{"path":"a.rs"}},
            {"type":"text","text":"second"}
        ]}}"#;
        let frames = parse_line(line);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0], Frame::Text("first".to_string()));
        assert_eq!(
            frames[1],
            Frame::ToolUse {
                tool: "Read".to_string(),
                input: json!({"path": "a.rs"}),
            }
        );
        assert_eq!(frames[2], Frame::Text("second".to_string()));
    }

    #[test]
    fn test_assistant_without_content_array() {
        assert!(parse_line(r#"{"type":"assistant","message":{}}"#).is_empty());
    }

    #[test]
    fn test_result_with_total_cost_usd() {
        let frames = parse_line(r#"{"type":"result","result":"ok","total_cost_usd":0.01}"#);
        assert_eq!(
            frames,
            vec![Frame::Result("ok".to_string()), Frame::Cost(0.01)]
        );
    }

    #[test]
    fn test_result_with_cost_usd_variant() {
        let frames = parse_line(r#"{"type":"result","result":"done","cost_usd":0.25}"#);
        assert_eq!(
            frames,
            vec![Frame::Result("done".to_string()), Frame::Cost(0.25)]
        );
    }

    #[test]
    fn test_result_without_cost() {
        let frames = parse_line(r#"{"type":"result","result":"bare"}"#);
        assert_eq!(frames, vec![Frame::Result("bare".to_string())]);
    }

    #[test]
    fn test_result_without_result_field() {
        let frames = parse_line(r#"{"type":"result","total_cost_usd":0.5}"#);
        assert_eq!(frames, vec![Frame::Cost(0.5)]);
    }

    #[test]
    fn test_delta_vocabulary() {
        let frames =
            parse_line(r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"hi"}}"#);
        assert_eq!(frames, vec![Frame::Text("hi".to_string())]);

        let frames = parse_line(
            r#"{"type":"content_block_start","content_block":{"type":"tool_use","name":"Bash"}}"#,
        );
        assert_eq!(
            frames,
            vec![Frame::ToolUse {
                tool: "Bash".to_string(),
                input: Value::Null,
            }]
        );
    }

    #[test]
    fn test_error_event() {
        let frames =
            parse_line(r#"{"type":"error","error":{"type":"overloaded_error","message":"busy"}}"#);
        assert_eq!(frames, vec![Frame::Error("busy".to_string())]);
    }

    #[test]
    fn test_frame_json_shape() {
        let frame = Frame::Text("hello".to_string());
        let value: Value = serde_json::from_str(&frame.to_json()).unwrap();
        assert_eq!(value, json!({"type": "text", "content": "hello"}));

        let frame = Frame::ToolUse {
            tool: "Grep".to_string(),
            input: json!({"pattern": "x"}),
        };
        let value: Value = serde_json::from_str(&frame.to_json()).unwrap();
        assert_eq!(
            value,
            json!({"type": "tool_use", "content": {"tool": "Grep", "input": {"pattern": "x"}}})
        );
    }

    #[test]
    fn test_typical_session_stream() {
        // A subprocess emitting one assistant line then one result line
        // yields text, result, cost.
        let raw = concat!(
            "{\"type\":\"assistant\",\"message\":{\"content\":[{\"type\":\"text\",\"text\":\"hello\"}]}}\n",
            "{\"type\":\"result\",\"result\":\"ok\",\"total_cost_usd\":0.01}\n",
        );
        let mut buf = LineBuffer::new();
        let mut frames = Vec::new();
        for line in buf.push(raw.as_bytes()) {
            frames.extend(parse_line(&line));
        }
        assert!(buf.flush().is_none());
        assert_eq!(
            frames,
            vec![
                Frame::Text("hello".to_string()),
                Frame::Result("ok".to_string()),
                Frame::Cost(0.01),
            ]
        );
    }
}
