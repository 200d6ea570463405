use bytes::Bytes;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE decoder. Bytes accumulate until a blank-line frame
/// boundary arrives; each complete frame is parsed in one pass. Comment
/// lines (`:`) are dropped, CRLF is tolerated, multi-line `data:` fields
/// join with `\n`.
#[derive(Debug, Default)]
pub struct SseParser {
    pending: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, chunk: &Bytes) -> Vec<SseEvent> {
        match std::str::from_utf8(chunk) {
            Ok(text) => self.push_str(text),
            Err(_) => Vec::new(),
        }
    }

    pub fn push_str(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.pending.push_str(chunk);

        let mut events = Vec::new();
        while let Some((frame_end, resume_at)) = frame_boundary(&self.pending) {
            let frame: String = self.pending[..frame_end].to_string();
            self.pending.drain(..resume_at);
            if let Some(event) = parse_frame(&frame) {
                events.push(event);
            }
        }
        events
    }

    /// Flush at EOF: a trailing frame without its blank line still counts.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let rest = std::mem::take(&mut self.pending);
        parse_frame(&rest).into_iter().collect()
    }
}

/// Earliest blank-line boundary in the buffer, as
/// `(frame_end, resume_index)`. A boundary is two consecutive line breaks
/// in any CR/LF mixture.
fn frame_boundary(buffer: &str) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize)> = None;
    for (pattern, width) in [("\r\n\r\n", 4), ("\n\r\n", 3), ("\n\n", 2)] {
        if let Some(position) = buffer.find(pattern) {
            let candidate = (position, position + width);
            best = match best {
                Some(current) if current.0 <= candidate.0 => Some(current),
                _ => Some(candidate),
            };
        }
    }
    best
}

/// Decode one frame's `event:`/`data:` fields. Frames holding neither
/// (comments only, padding) decode to `None`.
fn parse_frame(frame: &str) -> Option<SseEvent> {
    let mut event: Option<String> = None;
    let mut data: Option<String> = None;

    for raw in frame.split('\n') {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => {
                event = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "data" => match &mut data {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => data = Some(value.to_string()),
            },
            _ => {}
        }
    }

    if event.is_none() && data.is_none() {
        return None;
    }
    Some(SseEvent {
        event,
        data: data.unwrap_or_default(),
    })
}

/// Minimal SSE encoding: `event:` is optional, multi-line data gets one
/// `data:` prefix per line.
pub fn encode_sse(event: Option<&str>, data: &str) -> Bytes {
    let mut out = String::new();
    if let Some(event) = event {
        out.push_str("event: ");
        out.push_str(event);
        out.push('\n');
    }
    for line in data.split('\n') {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    Bytes::from(out)
}

/// Comment frame, ignored by clients; used for keep-alive heartbeats.
pub fn encode_comment(text: &str) -> Bytes {
    Bytes::from(format!(": {text}\n\n"))
}

pub fn encode_openai_done() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_data_only_frames() {
        let mut parser = SseParser::new();
        let events = parser.push_str("data: {\"a\":1}\n\ndata: [DONE]\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "{\"a\":1}");
        assert_eq!(events[1].data, "[DONE]");
        assert!(events[0].event.is_none());
    }

    #[test]
    fn parses_named_events_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.push_str("event: message_start\nda").is_empty());
        let events = parser.push_str("ta: {}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("message_start"));
        assert_eq!(events[0].data, "{}");
    }

    #[test]
    fn comment_lines_are_skipped() {
        let mut parser = SseParser::new();
        let events = parser.push_str(": pre-heartbeat 123\n\ndata: x\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn crlf_is_tolerated() {
        let mut parser = SseParser::new();
        let events = parser.push_str("data: a\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "a");
    }

    #[test]
    fn mixed_line_endings_split_at_the_earliest_boundary() {
        let mut parser = SseParser::new();
        let events = parser.push_str("data: a\n\ndata: b\r\n\r\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "a");
        assert_eq!(events[1].data, "b");
    }

    #[test]
    fn multiline_data_joins_with_newline() {
        let mut parser = SseParser::new();
        let events = parser.push_str("data: line1\ndata: line2\n\n");
        assert_eq!(events[0].data, "line1\nline2");
    }

    #[test]
    fn bare_field_names_and_unknown_fields_are_tolerated() {
        let mut parser = SseParser::new();
        let events = parser.push_str("retry: 500\nid: 7\ndata\ndata: x\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "\nx");
    }

    #[test]
    fn finish_flushes_a_trailing_partial_frame() {
        let mut parser = SseParser::new();
        assert!(parser.push_str("data: tail").is_empty());
        let events = parser.finish();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "tail");
        assert!(parser.finish().is_empty());
    }

    #[test]
    fn encode_round_trips_through_parser() {
        let frame = encode_sse(Some("response.created"), "{\"x\":1}");
        let mut parser = SseParser::new();
        let events = parser.push_bytes(&frame);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("response.created"));
        assert_eq!(events[0].data, "{\"x\":1}");
    }
}
