//! Incremental Server-Sent Events framing for streaming chat completions.

/// One dispatched SSE frame.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

impl SseFrame {
    fn is_empty(&self) -> bool {
        self.event.is_none() && self.data.is_empty()
    }

    /// OpenAI-compatible gateways terminate the stream with `data: [DONE]`.
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

/// Accepts arbitrary byte-chunk boundaries and yields complete frames.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    /// Trailing bytes of a UTF-8 sequence cut by a chunk boundary.
    pending: Vec<u8>,
    current: SseFrame,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) -> Vec<SseFrame> {
        self.buffer.push_str(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                if !self.current.is_empty() {
                    frames.push(std::mem::take(&mut self.current));
                }
                continue;
            }
            self.apply_line(line);
        }

        frames
    }

    /// Byte-level entry point for network chunks. A multibyte character split
    /// across chunks is held back until its remaining bytes arrive; invalid
    /// sequences decode to U+FFFD.
    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.pending.extend_from_slice(chunk);
        let mut text = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.pending.clear();
                    break;
                }
                Err(error) => {
                    let valid_up_to = error.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[..valid_up_to]));
                    match error.error_len() {
                        Some(invalid) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid_up_to + invalid);
                        }
                        None => {
                            self.pending.drain(..valid_up_to);
                            break;
                        }
                    }
                }
            }
        }
        self.push(&text)
    }

    /// Flush a trailing frame that was not followed by a blank line.
    pub fn finish(mut self) -> Option<SseFrame> {
        let mut rest = std::mem::take(&mut self.buffer);
        rest.push_str(&String::from_utf8_lossy(&self.pending));
        let rest = rest.trim_end_matches(['\r', '\n']);
        if !rest.is_empty() {
            self.apply_line(rest);
        }
        (!self.current.is_empty()).then_some(self.current)
    }

    fn apply_line(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.current.event = Some(value.to_string()),
            "data" => {
                if !self.current.data.is_empty() {
                    self.current.data.push('\n');
                }
                self.current.data.push_str(value);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_split_across_chunks_are_reassembled() {
        let mut parser = SseParser::new();
        assert!(parser.push("data: {\"a\":").is_empty());
        let frames = parser.push("1}\n\ndata: [DONE]\n\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, "{\"a\":1}");
        assert!(frames[1].is_done());
    }

    #[test]
    fn comments_are_skipped_and_multiline_data_joined() {
        let mut parser = SseParser::new();
        let frames = parser.push(": OPENROUTER PROCESSING\r\ndata: one\r\ndata: two\r\n\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "one\ntwo");
    }

    #[test]
    fn character_split_across_byte_chunks_survives() {
        let mut parser = SseParser::new();
        let payload = "data: café\n\n".as_bytes();
        let cut = payload
            .iter()
            .position(|byte| *byte == 0xC3)
            .expect("payload has a two-byte character")
            + 1;
        assert!(parser.push_bytes(&payload[..cut]).is_empty());
        let frames = parser.push_bytes(&payload[cut..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "café");
    }

    #[test]
    fn invalid_bytes_decode_to_replacement_without_stalling() {
        let mut parser = SseParser::new();
        let frames = parser.push_bytes(b"data: a\xFFb\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "a\u{FFFD}b");
    }

    #[test]
    fn finish_flushes_unterminated_frame() {
        let mut parser = SseParser::new();
        assert!(parser.push("event: error\ndata: boom").is_empty());
        let frame = parser.finish().expect("trailing frame should flush");
        assert_eq!(frame.event.as_deref(), Some("error"));
        assert_eq!(frame.data, "boom");
    }
}
