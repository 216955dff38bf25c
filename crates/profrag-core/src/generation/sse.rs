//! Incremental server-sent events decoder.
//!
//! Network chunks can end anywhere, including inside a line or a multi-byte
//! character, so bytes are buffered until a full line is available.

use super::GenerationError;

/// Terminal payload sent by OpenAI-compatible streams
pub const DONE_MARKER: &str = "[DONE]";

/// Longest line accepted before the stream is treated as malformed
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning the data payload of every event it completed.
    /// Fails once an unterminated line exceeds [`MAX_LINE_BYTES`].
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, GenerationError> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(event) = self.process_line(line) {
                events.push(event);
            }
        }

        if self.buffer.len() > MAX_LINE_BYTES {
            self.buffer.clear();
            return Err(GenerationError::Parse(format!(
                "event line exceeds {MAX_LINE_BYTES} bytes"
            )));
        }

        Ok(events)
    }

    /// Flush whatever is left once the body has ended
    pub fn finish(&mut self) -> Vec<String> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).into_owned();
            if let Some(event) = self.process_line(line.trim_end_matches('\r')) {
                events.push(event);
            }
        }
        if let Some(event) = self.dispatch() {
            events.push(event);
        }
        events
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.dispatch();
        }
        // Comment / keep-alive
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        if field == "data" {
            self.data.push(value.to_string());
        }
        // event/id/retry fields carry nothing the chat stream needs
        None
    }

    fn dispatch(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.data).join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_event() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: {\"a\":1}\n\n").unwrap();
        assert_eq!(events, vec!["{\"a\":1}".to_string()]);
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"da").unwrap().is_empty());
        assert!(decoder.push(b"ta: hel").unwrap().is_empty());
        assert!(decoder.push(b"lo\r\n").unwrap().is_empty());
        assert_eq!(decoder.push(b"\r\ndata: [DONE]\n\n").unwrap(), vec!["hello", DONE_MARKER]);
    }

    #[test]
    fn test_multibyte_char_split() {
        let bytes = "data: café\n\n".as_bytes();
        let split = bytes.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let mut decoder = SseDecoder::new();
        assert!(decoder.push(&bytes[..split]).unwrap().is_empty());
        assert_eq!(decoder.push(&bytes[split..]).unwrap(), vec!["café"]);
    }

    #[test]
    fn test_comments_and_other_fields_ignored() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b": keep-alive\n\nevent: message\nid: 7\ndata: x\n\n").unwrap();
        assert_eq!(events, vec!["x"]);
    }

    #[test]
    fn test_multiline_data_joined() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: line1\ndata: line2\n\n").unwrap();
        assert_eq!(events, vec!["line1\nline2"]);
    }

    #[test]
    fn test_finish_flushes_unterminated_event() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: tail").unwrap().is_empty());
        assert_eq!(decoder.finish(), vec!["tail"]);
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn test_unterminated_line_is_capped() {
        let mut decoder = SseDecoder::new();
        let chunk = vec![b'x'; 64 * 1024];

        let mut result = Ok(Vec::new());
        for _ in 0..=(MAX_LINE_BYTES / chunk.len()) {
            result = decoder.push(&chunk);
            if result.is_err() {
                break;
            }
        }

        assert!(matches!(result, Err(GenerationError::Parse(_))));
    }

    #[test]
    fn test_long_but_terminated_lines_pass() {
        let mut decoder = SseDecoder::new();
        let payload = "y".repeat(MAX_LINE_BYTES / 2);

        for _ in 0..3 {
            let events = decoder.push(format!("data: {payload}\n\n").as_bytes()).unwrap();
            assert_eq!(events.len(), 1);
        }
    }
}
