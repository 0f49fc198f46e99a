use bytes::Bytes;

/// One parsed item from a `data:`-framed event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SsePayload {
    /// JSON text after the `data:` prefix (not yet decoded).
    Data(String),
    /// The literal `[DONE]` sentinel.
    Done,
}

/// Incremental parser for the completion endpoint's `text/event-stream`
/// framing. Chunks may split lines arbitrarily; lines without a `data:`
/// prefix (comments, blank separators) are dropped.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, chunk: &Bytes) -> Vec<SsePayload> {
        match std::str::from_utf8(chunk) {
            Ok(text) => self.push_str(text),
            Err(_) => Vec::new(),
        }
    }

    pub fn push_str(&mut self, chunk: &str) -> Vec<SsePayload> {
        self.buffer.push_str(chunk);
        let mut payloads = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let mut line = self.buffer[..pos].to_string();
            self.buffer.drain(..=pos);

            if line.ends_with('\r') {
                line.pop();
            }
            if let Some(payload) = parse_line(&line) {
                payloads.push(payload);
            }
        }

        payloads
    }

    /// Flush a trailing line that arrived without a final newline.
    pub fn finish(&mut self) -> Option<SsePayload> {
        if self.buffer.is_empty() {
            return None;
        }
        let mut line = std::mem::take(&mut self.buffer);
        if line.ends_with('\r') {
            line.pop();
        }
        parse_line(&line)
    }
}

fn parse_line(line: &str) -> Option<SsePayload> {
    let value = line.strip_prefix("data:")?.trim_start();
    if value.trim_end() == "[DONE]" {
        return Some(SsePayload::Done);
    }
    if value.is_empty() {
        return None;
    }
    Some(SsePayload::Data(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_event_then_done() {
        let mut parser = SseParser::new();
        let payloads = parser.push_str(
            "data: {\"choices\":[{\"delta\":{\"phase\":\"answer\",\"content\":\"Hi\"}}]}\ndata: [DONE]\n",
        );
        assert_eq!(payloads.len(), 2);
        assert!(matches!(payloads[0], SsePayload::Data(_)));
        assert_eq!(payloads[1], SsePayload::Done);
    }

    #[test]
    fn lines_split_across_chunks_reassemble() {
        let mut parser = SseParser::new();
        assert!(parser.push_str("data: {\"a\":").is_empty());
        let payloads = parser.push_str("1}\n");
        assert_eq!(payloads, vec![SsePayload::Data("{\"a\":1}".to_string())]);
    }

    #[test]
    fn non_data_lines_are_dropped() {
        let mut parser = SseParser::new();
        let payloads = parser.push_str(": keepalive\n\nevent: ping\ndata: {}\n");
        assert_eq!(payloads, vec![SsePayload::Data("{}".to_string())]);
    }

    #[test]
    fn crlf_framing_is_accepted() {
        let mut parser = SseParser::new();
        let payloads = parser.push_str("data: [DONE]\r\n");
        assert_eq!(payloads, vec![SsePayload::Done]);
    }

    #[test]
    fn finish_flushes_unterminated_line() {
        let mut parser = SseParser::new();
        assert!(parser.push_str("data: tail").is_empty());
        assert_eq!(parser.finish(), Some(SsePayload::Data("tail".to_string())));
        assert_eq!(parser.finish(), None);
    }
}
