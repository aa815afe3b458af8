//! Server-sent event stream decoder.
//!
//! Tool servers push `event:`/`data:` frames separated by blank lines.  The
//! decoder buffers raw bytes (a frame, or even a UTF-8 sequence, may be split
//! across network chunks) and yields complete [`SseEvent`]s.

/// A single decoded server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The event tag; `"message"` when the frame carried no `event:` field.
    pub event: String,
    /// The payload; multiple `data:` lines are joined with `\n`.
    pub data: String,
}

/// Incremental decoder for an event stream.
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Bytes received but not yet terminated by a newline.
    pending: Vec<u8>,
    /// `event:` field of the frame being assembled.
    event: Option<String>,
    /// `data:` lines of the frame being assembled.
    data: Vec<String>,
}

impl SseDecoder {
    /// Create a new decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning every event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(event) = self.parse_line(line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing frame that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.pending.is_empty() {
            let raw = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&raw).into_owned();
            if let Some(event) = self.parse_line(line.trim_end_matches('\r')) {
                return Some(event);
            }
        }
        self.dispatch()
    }

    fn parse_line(&mut self, line: &str) -> Option<SseEvent> {
        // A blank line terminates the frame.
        if line.is_empty() {
            return self.dispatch();
        }

        // Comment / keepalive.
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_owned()),
            "data" => self.data.push(value.to_owned()),
            // `id` and `retry` carry nothing the client needs.
            _ => tracing::trace!(field, "ignoring SSE field"),
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".into()),
            data,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_named_event() {
        let mut d = SseDecoder::new();
        let events = d.feed(b"event: endpoint\ndata: /messages?session_id=abc\n\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: "endpoint".into(),
                data: "/messages?session_id=abc".into(),
            }]
        );
    }

    #[test]
    fn default_event_tag_is_message() {
        let mut d = SseDecoder::new();
        let events = d.feed(b"data: {\"id\":1}\n\n");
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "{\"id\":1}");
    }

    #[test]
    fn frame_split_across_chunks() {
        let mut d = SseDecoder::new();
        assert!(d.feed(b"event: mess").is_empty());
        assert!(d.feed(b"age\r\ndata: {\"a\"").is_empty());
        let events = d.feed(b":1}\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "{\"a\":1}");
    }

    #[test]
    fn multibyte_character_split_across_chunks() {
        let mut d = SseDecoder::new();
        let bytes = "data: 18°C\n\n".as_bytes();
        let split = bytes.iter().position(|b| *b == 0xC2).unwrap() + 1;
        assert!(d.feed(&bytes[..split]).is_empty());
        let events = d.feed(&bytes[split..]);
        assert_eq!(events[0].data, "18°C");
    }

    #[test]
    fn multiple_data_lines_are_joined() {
        let mut d = SseDecoder::new();
        let events = d.feed(b"data: line one\ndata: line two\n\n");
        assert_eq!(events[0].data, "line one\nline two");
    }

    #[test]
    fn comments_and_empty_frames_are_skipped() {
        let mut d = SseDecoder::new();
        assert!(d.feed(b": keepalive\n\n").is_empty());
        assert!(d.feed(b"event: ping\n\n").is_empty());
        // The dangling `event: ping` must not leak into the next frame.
        let events = d.feed(b"data: x\n\n");
        assert_eq!(events[0].event, "message");
    }

    #[test]
    fn finish_flushes_unterminated_frame() {
        let mut d = SseDecoder::new();
        assert!(d.feed(b"event: message\ndata: tail").is_empty());
        let event = d.finish().unwrap();
        assert_eq!(event.data, "tail");
        assert!(d.finish().is_none());
    }
}
