//! Incremental decoder for `text/event-stream` bodies
//!
//! Network chunks do not line up with event boundaries, and a multi-byte
//! character can be split between two chunks. The decoder buffers both.

/// One decoded server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    pending_bytes: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every event completed by this chunk
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.pending_bytes.extend_from_slice(chunk);
        let bytes = std::mem::take(&mut self.pending_bytes);

        match String::from_utf8(bytes) {
            Ok(text) => self.buffer.push_str(&text),
            Err(err) => {
                let valid_up_to = err.utf8_error().valid_up_to();
                let mut bytes = err.into_bytes();
                let tail = bytes.split_off(valid_up_to);
                // Up to three trailing bytes may be an incomplete character.
                // Anything longer is garbage and gets replaced.
                if tail.len() < 4 {
                    self.pending_bytes = tail;
                } else {
                    bytes.extend_from_slice(String::from_utf8_lossy(&tail).as_bytes());
                }
                self.buffer.push_str(&String::from_utf8_lossy(&bytes));
            }
        }

        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut frames = Vec::new();
        while let Some(end) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..end + 2).collect();
            if let Some(frame) = parse_block(&block) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush whatever is left once the body ends without a trailing blank line
    pub fn finish(&mut self) -> Option<SseFrame> {
        let block = std::mem::take(&mut self.buffer);
        self.pending_bytes.clear();
        parse_block(&block)
    }
}

fn parse_block(block: &str) -> Option<SseFrame> {
    let mut event = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data_lines.push(value),
            _ => {}
        }
    }

    if data_lines.is_empty() {
        return None;
    }
    Some(SseFrame {
        event,
        data: data_lines.join("\n"),
    })
}
