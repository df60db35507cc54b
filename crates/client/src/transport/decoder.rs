//! Incremental `text/event-stream` decoder.
//!
//! Follows the event-stream interpretation rules of the
//! [HTML Living Standard](https://html.spec.whatwg.org/multipage/server-sent-events.html#event-stream-interpretation):
//! lines end in LF, CR or CRLF, a blank line dispatches the pending event,
//! lines starting with `:` are comments.

use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tender_stream_shared::DEFAULT_EVENT_TYPE;

const LF: u8 = b'\n';
const CR: u8 = b'\r';
const BOM: &[u8] = "\u{FEFF}".as_bytes();

/// A complete event decoded from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event_type: String,
    pub data: String,
    pub id: Option<String>,
    /// Reconnection delay advertised by the server.
    pub retry: Option<Duration>,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
    bom_checked: bool,
    event_type: Option<String>,
    data: Option<String>,
    id: Option<String>,
    retry: Option<Duration>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of the body and return every event it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);

        if !self.bom_checked {
            if self.buffer.len() < BOM.len() && BOM.starts_with(&self.buffer) {
                return Vec::new();
            }
            if self.buffer.starts_with(BOM) {
                self.buffer.advance(BOM.len());
            }
            self.bom_checked = true;
        }

        let mut frames = Vec::new();
        while let Some(line) = self.next_line() {
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Split the next complete line off the buffer. A trailing lone CR is left
    /// in place until we know whether an LF follows it.
    fn next_line(&mut self) -> Option<Bytes> {
        let pos = memchr::memchr2(CR, LF, &self.buffer)?;
        let terminator_len = match self.buffer[pos] {
            LF => 1,
            _ => match self.buffer.get(pos + 1) {
                None => return None,
                Some(&LF) => 2,
                Some(_) => 1,
            },
        };

        let line = self.buffer.split_to(pos).freeze();
        self.buffer.advance(terminator_len);
        Some(line)
    }

    fn process_line(&mut self, line: &[u8]) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }

        let (name, value) = match memchr::memchr(b':', line) {
            Some(0) => return None,
            Some(colon) => {
                let value = &line[colon + 1..];
                (&line[..colon], value.strip_prefix(b" ").unwrap_or(value))
            }
            None => (line, &[][..]),
        };
        let value = String::from_utf8_lossy(value);

        match name {
            b"event" => self.event_type = Some(value.into_owned()),
            b"data" => match self.data.take() {
                Some(mut data) => {
                    data.push('\n');
                    data.push_str(&value);
                    self.data = Some(data);
                }
                None => self.data = Some(value.into_owned()),
            },
            b"id" if !value.contains('\0') => self.id = Some(value.into_owned()),
            b"retry" if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) => {
                if let Ok(ms) = value.parse() {
                    self.retry = Some(Duration::from_millis(ms));
                }
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event_type = self.event_type.take();
        let id = self.id.take();
        let retry = self.retry.take();
        let data = self.data.take()?;

        Some(SseFrame {
            event_type: event_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string()),
            data,
            id,
            retry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_named_event_with_id() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"id: 7\nevent: progress\ndata: {\"percent\":10}\n\n");
        assert_eq!(
            frames,
            vec![SseFrame {
                event_type: "progress".to_string(),
                data: "{\"percent\":10}".to_string(),
                id: Some("7".to_string()),
                retry: None,
            }]
        );
    }

    #[test]
    fn unnamed_events_default_to_message() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"data: hello\n\n");
        assert_eq!(frames[0].event_type, "message");
        assert_eq!(frames[0].data, "hello");
    }

    #[test]
    fn joins_multi_line_data() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"data: first\ndata:second\ndata\n\n");
        assert_eq!(frames[0].data, "first\nsecond\n");
    }

    #[test]
    fn events_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: bid.upd").is_empty());
        assert!(decoder.feed(b"ated\ndata: {\"id\"").is_empty());
        let frames = decoder.feed(b":1}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event_type, "bid.updated");
        assert_eq!(frames[0].data, "{\"id\":1}");
    }

    #[test]
    fn handles_crlf_and_lone_cr() {
        let mut decoder = SseDecoder::new();
        // CR at the end of a chunk must wait for the next byte.
        assert!(decoder.feed(b"data: a\r").is_empty());
        let frames = decoder.feed(b"\n\r\ndata: b\r\r\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, "a");
        assert_eq!(frames[1].data, "b");
    }

    #[test]
    fn skips_comments_and_events_without_data() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b": keep-alive\n\nevent: ping\n\nretry: 3000\ndata: x\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event_type, "message");
        assert_eq!(frames[0].retry, Some(Duration::from_millis(3000)));
    }

    #[test]
    fn strips_leading_bom_even_when_split() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(&BOM[..1]).is_empty());
        let mut rest = BOM[1..].to_vec();
        rest.extend_from_slice(b"data: ok\n\n");
        let frames = decoder.feed(&rest);
        assert_eq!(frames[0].data, "ok");
    }

    #[test]
    fn ignores_invalid_retry_and_unknown_fields() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"retry: soon\nfoo: bar\ndata: x\n\n");
        assert_eq!(frames[0].retry, None);
    }
}
