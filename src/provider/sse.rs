//! Generic Server-Sent-Events frame scanner.
//!
//! Generalizes the line-at-a-time `data: ` scanning `client.rs` used to do
//! inline for OpenAI's single-field frames into full SSE frames (`event:` +
//! one or more `data:` lines, terminated by a blank line) so the Anthropic,
//! Responses, and Gemini adapters — which all rely on the `event:` field —
//! can share one parsing idiom with the OpenAI adapter.

const MAX_LINE_BYTES: usize = 512 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

#[derive(Default)]
pub struct SseScanner {
    buffer: String,
    event: Option<String>,
    data_lines: Vec<String>,
}

impl SseScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed newly-received bytes, returning every complete frame the new
    /// bytes made available. Partial trailing lines are retained.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.len() > MAX_LINE_BYTES {
                // Drop oversized lines rather than buffering unbounded memory.
                continue;
            }

            if line.is_empty() {
                if !self.data_lines.is_empty() || self.event.is_some() {
                    frames.push(SseFrame {
                        event: self.event.take(),
                        data: self.data_lines.join("\n"),
                    });
                    self.data_lines.clear();
                }
                continue;
            }

            if let Some(rest) = line.strip_prefix("event:") {
                self.event = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("data:") {
                self.data_lines.push(rest.trim_start().to_string());
            }
            // id:/retry:/comment (`:`) lines are accepted but not needed downstream.
        }

        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scanner_yields_frame_on_blank_line() {
        let mut scanner = SseScanner::new();
        let frames = scanner.push(b"event: message_stop\ndata: {\"a\":1}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("message_stop"));
        assert_eq!(frames[0].data, "{\"a\":1}");
    }

    #[test]
    fn test_scanner_buffers_partial_frame() {
        let mut scanner = SseScanner::new();
        assert!(scanner.push(b"data: {\"a\":1}\n").is_empty());
        let frames = scanner.push(b"\n");
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_scanner_joins_multiple_data_lines() {
        let mut scanner = SseScanner::new();
        let frames = scanner.push(b"data: line1\ndata: line2\n\n");
        assert_eq!(frames[0].data, "line1\nline2");
    }

    #[test]
    fn test_scanner_plain_data_only_frame() {
        let mut scanner = SseScanner::new();
        let frames = scanner.push(b"data: [DONE]\n\n");
        assert_eq!(frames[0].event, None);
        assert_eq!(frames[0].data, "[DONE]");
    }
}
