//! Incremental parser for the `text/event-stream` wire format.

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

/// Feeds arbitrary byte chunks and yields complete events.
#[derive(Debug, Default)]
pub struct SseParser {
    line: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    last_id: Option<String>,
    // A '\r' ended the previous line; swallow a directly following '\n'.
    skip_lf: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume `chunk` and return every event it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();

        for &b in chunk {
            if self.skip_lf {
                self.skip_lf = false;
                if b == b'\n' {
                    continue;
                }
            }
            match b {
                b'\n' => self.end_line(&mut events),
                b'\r' => {
                    self.end_line(&mut events);
                    self.skip_lf = true;
                }
                _ => self.line.push(b),
            }
        }

        events
    }

    fn end_line(&mut self, events: &mut Vec<SseEvent>) {
        let line = String::from_utf8_lossy(&self.line).into_owned();
        self.line.clear();

        if line.is_empty() {
            if let Some(event) = self.dispatch() {
                events.push(event);
            }
            return;
        }

        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.find(':') {
            Some(i) => {
                let value = &line[i + 1..];
                (&line[..i], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line.as_str(), ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.last_id = Some(value.to_string()),
            "retry" => {}
            other => tracing::trace!("SSE: ignoring field {:?}", other),
        }
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        let data = std::mem::take(&mut self.data);

        if event.is_none() && data.is_empty() {
            return None;
        }

        Some(SseEvent {
            event: event
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| "message".to_string()),
            data: data.join("\n"),
            id: self.last_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_event() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"event: metrics\ndata: {\"cpu\": 1}\n\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: "metrics".to_string(),
                data: "{\"cpu\": 1}".to_string(),
                id: None,
            }]
        );
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"event: met").is_empty());
        assert!(parser.feed(b"rics\r").is_empty());
        assert!(parser.feed(b"\ndata: a").is_empty());
        let events = parser.feed(b"bc\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "metrics");
        assert_eq!(events[0].data, "abc");
    }

    #[test]
    fn test_multiline_data_and_defaults() {
        let mut parser = SseParser::new();
        let events = parser.feed(b": keepalive\nid: 5\ndata:one\ndata: two\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "one\ntwo");
        assert_eq!(events[0].id.as_deref(), Some("5"));
    }

    #[test]
    fn test_event_without_data_is_dispatched() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"event: connected\n\n\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "connected");
        assert_eq!(events[0].data, "");
    }

    #[test]
    fn test_bare_cr_line_endings() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"event: metrics\rdata: x\r\revent: connected\r\r");
        let names: Vec<&str> = events.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(names, vec!["metrics", "connected"]);
    }
}
