//! Incremental Server-Sent Events decoder shared by the SSE and Streamable HTTP
//! transports.

/// SSE Event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

impl SseEvent {
    /// Event name, defaulting to `message`
    pub fn name(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }
}

/// Buffers raw bytes until complete events (terminated by a blank line) are
/// available. Text is decoded per event, so a UTF-8 sequence may span chunks.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event completed by it
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        // CR never occurs inside a multi-byte UTF-8 sequence
        self.buffer.extend(chunk.iter().filter(|b| **b != b'\r'));

        let mut events = Vec::new();
        while let Some(event_end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..event_end + 2).collect();
            if let Some(event) = parse_sse_event(&String::from_utf8_lossy(&block)) {
                events.push(event);
            }
        }
        events
    }
}

/// Parse one SSE event block
pub fn parse_sse_event(text: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data: Option<String> = None;
    let mut id = None;

    for line in text.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value.to_string()),
            "data" => match data.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => data = Some(value.to_string()),
            },
            "id" => id = Some(value.to_string()),
            _ => {}
        }
    }

    data.map(|data| SseEvent { event, data, id })
}
