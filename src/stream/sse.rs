use futures_util::{Stream, StreamExt};
use memchr::memchr_iter;
use smallvec::SmallVec;

use super::SseEvent;

struct PendingEvents {
    events: SmallVec<[SseEvent; 8]>,
    head: usize,
}

impl PendingEvents {
    fn new() -> Self {
        Self {
            events: SmallVec::new(),
            head: 0,
        }
    }

    fn pop_front(&mut self) -> Option<SseEvent> {
        if self.head >= self.events.len() {
            return None;
        }
        let event = std::mem::take(&mut self.events[self.head]);
        self.head += 1;
        if self.head == self.events.len() {
            self.events.clear();
            self.head = 0;
        }
        Some(event)
    }

    fn extend_from_vec(&mut self, parsed: &mut Vec<SseEvent>) {
        self.events.extend(parsed.drain(..));
    }
}

/// Incremental SSE line parser.
///
/// Text may arrive split at arbitrary points; complete frames come out once
/// their terminating blank line has been seen.
#[derive(Default)]
pub struct SseParser {
    buffer: String,
    read_offset: usize,
    event_type: Option<String>,
    data_buffer: String,
    has_data: bool,
    last_event_id: Option<String>,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw text and return any complete events.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed raw text and append complete events to `out`.
    ///
    /// `data:` lines of one frame are joined with `\n`, one space after the
    /// colon is stripped, `:` comment lines and unknown fields are ignored.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<SseEvent>) {
        self.buffer.push_str(chunk);
        let mut processed_up_to = self.read_offset;
        let scan_start = processed_up_to;
        for rel_pos in memchr_iter(b'\n', &self.buffer.as_bytes()[scan_start..]) {
            let line_end = scan_start + rel_pos;
            let line = &self.buffer[processed_up_to..line_end];
            let line = line.strip_suffix('\r').unwrap_or(line);
            Self::process_line(
                line,
                &mut self.event_type,
                &mut self.data_buffer,
                &mut self.has_data,
                &mut self.last_event_id,
                out,
            );
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
        } else if self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024 {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    /// Flush a frame left open when the body ended without a blank line.
    pub fn finish_into(&mut self, out: &mut Vec<SseEvent>) {
        // First newline closes a partial line, second dispatches the frame.
        self.feed_into("\n", out);
        self.feed_into("\n", out);
    }

    fn process_line(
        line: &str,
        event_type: &mut Option<String>,
        data_buffer: &mut String,
        has_data: &mut bool,
        last_event_id: &mut Option<String>,
        events: &mut Vec<SseEvent>,
    ) {
        if line.is_empty() {
            if *has_data {
                events.push(SseEvent {
                    event: event_type.take(),
                    data: std::mem::take(data_buffer),
                    id: last_event_id.clone(),
                });
                *has_data = false;
            }
            return;
        }

        if line.starts_with(':') {
            return;
        }

        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            if *has_data {
                data_buffer.push('\n');
            } else {
                *has_data = true;
            }
            data_buffer.push_str(value);
        } else if let Some(value) = line.strip_prefix("event:") {
            *event_type = Some(value.strip_prefix(' ').unwrap_or(value).to_string());
        } else if let Some(value) = line.strip_prefix("id:") {
            *last_event_id = Some(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
    }
}

/// Decode the longest valid UTF-8 prefix of `remainder` into the parser and
/// keep the incomplete tail for the next chunk.
fn feed_utf8(parser: &mut SseParser, remainder: &mut Vec<u8>, parsed: &mut Vec<SseEvent>) {
    let valid_up_to = match std::str::from_utf8(remainder) {
        Ok(text) => {
            parser.feed_into(text, parsed);
            remainder.clear();
            return;
        }
        Err(err) => err.valid_up_to(),
    };
    if let Ok(text) = std::str::from_utf8(&remainder[..valid_up_to]) {
        parser.feed_into(text, parsed);
    }
    remainder.drain(..valid_up_to);
}

/// Split a response byte stream into SSE events.
///
/// Transport errors are passed through and end the stream.
pub fn sse_frame_stream<S, E>(byte_stream: S) -> impl Stream<Item = Result<SseEvent, E>> + Send
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: Send + 'static,
{
    struct State<S> {
        stream: std::pin::Pin<Box<S>>,
        parser: SseParser,
        remainder: Vec<u8>,
        parsed: Vec<SseEvent>,
        pending: PendingEvents,
        finished: bool,
    }

    let state = State {
        stream: Box::pin(byte_stream),
        parser: SseParser::new(),
        remainder: Vec::new(),
        parsed: Vec::with_capacity(8),
        pending: PendingEvents::new(),
        finished: false,
    };

    futures_util::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(event) = st.pending.pop_front() {
                return Some((Ok(event), st));
            }
            if st.finished {
                return None;
            }

            match st.stream.as_mut().next().await {
                Some(Ok(bytes)) => {
                    st.remainder.extend_from_slice(&bytes);
                    feed_utf8(&mut st.parser, &mut st.remainder, &mut st.parsed);
                }
                Some(Err(err)) => {
                    st.finished = true;
                    return Some((Err(err), st));
                }
                None => {
                    st.finished = true;
                    st.parser.finish_into(&mut st.parsed);
                }
            }
            st.pending.extend_from_vec(&mut st.parsed);
        }
    })
}
