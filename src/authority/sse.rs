//! Incremental decoder for `text/event-stream` bodies.

/// Accumulates raw body chunks and yields the `data` payload of each complete
/// frame. Frames are terminated by a blank line; comment lines and fields other
/// than `data` are ignored.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk read from the connection.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer
            .extend(chunk.iter().copied().filter(|b| *b != b'\r'));
    }

    /// Next complete frame that carried data, if one is buffered.
    pub fn next_payload(&mut self) -> Option<String> {
        loop {
            let end = self.buffer.windows(2).position(|w| w == b"\n\n")?;
            let frame: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(payload) = Self::parse_frame(&frame) {
                return Some(payload);
            }
        }
    }

    fn parse_frame(frame: &[u8]) -> Option<String> {
        let text = String::from_utf8_lossy(frame);
        let mut payload: Option<String> = None;
        for line in text.lines() {
            if line.starts_with(':') {
                continue;
            }
            if let Some(rest) = line.strip_prefix("data:") {
                let rest = rest.strip_prefix(' ').unwrap_or(rest);
                match payload.as_mut() {
                    Some(existing) => {
                        existing.push('\n');
                        existing.push_str(rest);
                    }
                    None => payload = Some(rest.to_string()),
                }
            }
        }
        payload.filter(|p| !p.trim().is_empty())
    }
}
