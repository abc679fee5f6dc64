//! Incremental consumer for the relay's event stream.
//!
//! Bytes are decoded statefully and scanned line by line. A `data:` record
//! whose JSON ends early is left in the buffer and, once more bytes arrive,
//! extended across the retained line break(s) until it parses. A record
//! that is syntactically wrong is skipped so later records keep flowing.

use serde_json::Value;

use flowboard_common::chunk::{Delta, is_task_confirmation};
use flowboard_common::sse::{DATA_PREFIX, SseLine, Utf8Decoder, classify};

/// A pending record larger than this is given up on.
const MAX_PENDING_RECORD: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerEvent {
    /// New assistant text. The full reply so far is
    /// [`StreamConsumer::assistant_text`].
    Content(String),
    /// The reply involved a tool call (or its confirmation); the task list
    /// may have changed. Reported once per stream.
    ToolActivity,
    Done,
}

#[derive(Debug, Default)]
pub struct StreamConsumer {
    decoder: Utf8Decoder,
    buffer: String,
    /// Scan progress on the front record, kept across feeds.
    progress: Progress,
    /// Dropping an oversized line until its newline arrives.
    discarding: bool,
    done: bool,
    saw_tool_call: bool,
    assistant_text: String,
}

/// `buffer[..searched]` holds no newline past `tried_end` (or at all when
/// `tried_end` is `None`). `tried_end` is the newline ending the longest
/// candidate already found to be incomplete.
#[derive(Debug, Default, Clone, Copy)]
struct Progress {
    searched: usize,
    tried_end: Option<usize>,
}

enum Scan {
    NeedMore(Progress),
    Overflow,
    Skip(usize),
    Done(usize),
    Record { value: Value, consumed: usize },
    Malformed { consumed: usize, reason: String },
}

enum Attempt {
    Parsed(Value),
    Incomplete,
    Malformed(String),
}

impl StreamConsumer {
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<ConsumerEvent> {
        if self.done {
            return Vec::new();
        }
        let text = self.decoder.decode(bytes);
        if self.discarding {
            let Some(nl) = text.find('\n') else {
                return Vec::new();
            };
            self.discarding = false;
            self.buffer.push_str(&text[nl + 1..]);
        } else {
            self.buffer.push_str(&text);
        }
        self.drain()
    }

    /// End of input: flush the decoder and handle whatever is still
    /// buffered, including a final record without a trailing newline.
    pub fn finish(&mut self) -> Vec<ConsumerEvent> {
        if self.done {
            return Vec::new();
        }
        let tail = self.decoder.finish();
        if self.discarding {
            self.discarding = false;
        } else {
            self.buffer.push_str(&tail);
        }
        if !self.buffer.is_empty() && !self.buffer.ends_with('\n') {
            self.buffer.push('\n');
        }
        let mut events = self.drain();

        // Records still waiting for a continuation will never get one.
        let rest = std::mem::take(&mut self.buffer);
        self.progress = Progress::default();
        for line in rest.lines() {
            if self.done {
                break;
            }
            match classify(strip_cr(line)) {
                SseLine::Done => {
                    self.done = true;
                    events.push(ConsumerEvent::Done);
                }
                SseLine::Data(payload) if !payload.is_empty() => {
                    match serde_json::from_str::<Value>(payload) {
                        Ok(value) => self.apply(&value, &mut events),
                        Err(e) => tracing::warn!("Skipping malformed stream record: {}", e),
                    }
                }
                _ => {}
            }
        }
        events
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn saw_tool_call(&self) -> bool {
        self.saw_tool_call
    }

    pub fn assistant_text(&self) -> &str {
        &self.assistant_text
    }

    fn drain(&mut self) -> Vec<ConsumerEvent> {
        let mut events = Vec::new();
        while !self.done {
            let consumed = match self.scan() {
                Scan::NeedMore(progress) => {
                    self.progress = progress;
                    break;
                }
                Scan::Overflow => {
                    tracing::warn!(
                        len = self.buffer.len(),
                        "Dropping stream line without a newline past the size limit"
                    );
                    self.buffer.clear();
                    self.progress = Progress::default();
                    self.discarding = true;
                    break;
                }
                Scan::Skip(consumed) => consumed,
                Scan::Done(consumed) => {
                    self.done = true;
                    events.push(ConsumerEvent::Done);
                    consumed
                }
                Scan::Record { value, consumed } => {
                    self.apply(&value, &mut events);
                    consumed
                }
                Scan::Malformed { consumed, reason } => {
                    tracing::warn!("Skipping malformed stream record: {}", reason);
                    consumed
                }
            };
            self.buffer.drain(..consumed);
            self.progress = Progress::default();
        }
        events
    }

    /// Look at the front of the buffer without consuming anything. Work
    /// recorded in `self.progress` is not repeated.
    fn scan(&self) -> Scan {
        let Progress {
            searched,
            tried_end,
        } = self.progress;

        let (nl, mut end, mut parts) = match tried_end {
            None => {
                let Some(found) = self.buffer[searched..].find('\n') else {
                    if self.buffer.len() > MAX_PENDING_RECORD {
                        return Scan::Overflow;
                    }
                    return Scan::NeedMore(Progress {
                        searched: self.buffer.len(),
                        tried_end: None,
                    });
                };
                let nl = searched + found;
                let payload = match classify(strip_cr(&self.buffer[..nl])) {
                    SseLine::Blank | SseLine::Comment | SseLine::Other => {
                        return Scan::Skip(nl + 1);
                    }
                    SseLine::Done => return Scan::Done(nl + 1),
                    SseLine::Data(payload) => payload,
                };
                if payload.is_empty() {
                    return Scan::Skip(nl + 1);
                }
                match attempt(&[payload]) {
                    Attempt::Parsed(value) => {
                        return Scan::Record {
                            value,
                            consumed: nl + 1,
                        };
                    }
                    Attempt::Malformed(reason) => {
                        return Scan::Malformed {
                            consumed: nl + 1,
                            reason,
                        };
                    }
                    Attempt::Incomplete => (nl, nl, vec![payload]),
                }
            }
            Some(end) => {
                // Rebuild the parts already known to be incomplete.
                let nl = self.buffer.find('\n').unwrap_or(end);
                let SseLine::Data(payload) = classify(strip_cr(&self.buffer[..nl])) else {
                    return Scan::Skip(nl + 1);
                };
                let mut parts = vec![payload];
                if end > nl {
                    parts.extend(self.buffer[nl + 1..end].split('\n').map(strip_cr));
                }
                (nl, end, parts)
            }
        };

        loop {
            let from = searched.max(end + 1);
            let Some(found) = self.buffer[from..].find('\n') else {
                if self.buffer.len() > MAX_PENDING_RECORD {
                    return Scan::Malformed {
                        consumed: nl + 1,
                        reason: "record exceeds size limit".to_string(),
                    };
                }
                return Scan::NeedMore(Progress {
                    searched: self.buffer.len(),
                    tried_end: Some(end),
                });
            };
            let next = from + found;
            let continuation = strip_cr(&self.buffer[end + 1..next]);
            if continuation.starts_with(DATA_PREFIX.trim_end()) {
                // A new record began; the pending one was cut short.
                return Scan::Malformed {
                    consumed: nl + 1,
                    reason: "truncated record".to_string(),
                };
            }
            parts.push(continuation);
            end = next;
            match attempt(&parts) {
                Attempt::Parsed(value) => {
                    return Scan::Record {
                        value,
                        consumed: end + 1,
                    };
                }
                Attempt::Malformed(reason) => {
                    return Scan::Malformed {
                        consumed: nl + 1,
                        reason,
                    };
                }
                Attempt::Incomplete => {}
            }
        }
    }

    fn apply(&mut self, record: &Value, events: &mut Vec<ConsumerEvent>) {
        let delta = Delta::from_record(record);
        if delta.has_tool_calls() {
            self.note_tool_activity(events);
        }
        if let Some(text) = delta.text() {
            if is_task_confirmation(text) {
                self.note_tool_activity(events);
            }
            self.assistant_text.push_str(text);
            events.push(ConsumerEvent::Content(text.to_string()));
        }
    }

    fn note_tool_activity(&mut self, events: &mut Vec<ConsumerEvent>) {
        if !self.saw_tool_call {
            self.saw_tool_call = true;
            events.push(ConsumerEvent::ToolActivity);
        }
    }
}

fn strip_cr(line: &str) -> &str {
    line.strip_suffix('\r').unwrap_or(line)
}

/// Parse a candidate record spread over `parts`. The line breaks between
/// parts are first kept (they may sit between JSON tokens) and, failing
/// that, dropped (they may have split a string).
fn attempt(parts: &[&str]) -> Attempt {
    let joined = parts.join("\n");
    match serde_json::from_str::<Value>(joined.trim()) {
        Ok(value) => return Attempt::Parsed(value),
        Err(e) if e.is_eof() => return Attempt::Incomplete,
        Err(e) if parts.len() == 1 => return Attempt::Malformed(e.to_string()),
        Err(_) => {}
    }
    let glued = parts.concat();
    match serde_json::from_str::<Value>(glued.trim()) {
        Ok(value) => Attempt::Parsed(value),
        Err(e) if e.is_eof() => Attempt::Incomplete,
        Err(e) => Attempt::Malformed(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowboard_common::chunk::{ChatChunk, task_confirmation};

    fn content_line(text: &str) -> String {
        ChatChunk::content(text).to_sse_line()
    }

    fn contents(events: &[ConsumerEvent]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|e| match e {
                ConsumerEvent::Content(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_content_records_accumulate() {
        let mut consumer = StreamConsumer::default();
        let body = format!("{}{}data: [DONE]\n", content_line("Hel"), content_line("lo!"));
        let events = consumer.feed(body.as_bytes());
        assert_eq!(contents(&events), vec!["Hel", "lo!"]);
        assert_eq!(events.last(), Some(&ConsumerEvent::Done));
        assert_eq!(consumer.assistant_text(), "Hello!");
        assert!(!consumer.saw_tool_call());
        assert!(consumer.is_done());
    }

    #[test]
    fn test_any_chunking_yields_same_text() {
        let body = format!(
            ": keep-alive\r\n\r\n{}{}{}data: [DONE]\n",
            content_line("Déjà "),
            content_line("vu ☕"),
            content_line(" done")
        );
        for n in 1..=9 {
            let mut consumer = StreamConsumer::default();
            for chunk in body.as_bytes().chunks(n) {
                consumer.feed(chunk);
            }
            consumer.finish();
            assert_eq!(consumer.assistant_text(), "Déjà vu ☕ done", "chunk size {}", n);
        }
    }

    #[test]
    fn test_record_split_across_reads_waits_for_rest() {
        let mut consumer = StreamConsumer::default();
        let line = content_line("Hello");
        let (a, b) = line.split_at(20);
        assert!(consumer.feed(a.as_bytes()).is_empty());
        assert_eq!(contents(&consumer.feed(b.as_bytes())), vec!["Hello"]);
    }

    #[test]
    fn test_record_with_embedded_newline_is_reconstructed() {
        let mut consumer = StreamConsumer::default();
        // Line break inside a string value.
        let first = consumer.feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel\n");
        assert!(first.is_empty());
        let second = consumer.feed(b"lo\"}}]}\n");
        assert_eq!(contents(&second), vec!["Hello"]);

        // Line break between tokens.
        let third = consumer.feed(b"data: {\"choices\":\n[{\"delta\":{\"content\":\"!\"}}]}\n");
        assert_eq!(contents(&third), vec!["!"]);
        assert_eq!(consumer.assistant_text(), "Hello!");
    }

    #[test]
    fn test_malformed_record_is_skipped() {
        let mut consumer = StreamConsumer::default();
        let body = format!("data: {{not json}}\n{}data: [DONE]\n", content_line("after"));
        let events = consumer.feed(body.as_bytes());
        assert_eq!(contents(&events), vec!["after"]);
        assert!(consumer.is_done());
    }

    #[test]
    fn test_truncated_record_followed_by_new_record() {
        let mut consumer = StreamConsumer::default();
        let body = format!("data: {{\"choices\":[\n{}", content_line("kept"));
        let events = consumer.feed(body.as_bytes());
        assert_eq!(contents(&events), vec!["kept"]);
    }

    #[test]
    fn test_nothing_after_done_is_consumed() {
        let mut consumer = StreamConsumer::default();
        let body = format!("{}data: [DONE]\n{}", content_line("a"), content_line("b"));
        consumer.feed(body.as_bytes());
        assert!(consumer.feed(content_line("c").as_bytes()).is_empty());
        assert!(consumer.finish().is_empty());
        assert_eq!(consumer.assistant_text(), "a");
    }

    #[test]
    fn test_finish_flushes_unterminated_record() {
        let mut consumer = StreamConsumer::default();
        let line = content_line("tail");
        consumer.feed(line.trim_end().as_bytes());
        assert_eq!(consumer.assistant_text(), "");
        let events = consumer.finish();
        assert_eq!(contents(&events), vec!["tail"]);
    }

    #[test]
    fn test_finish_skips_never_completed_record() {
        let mut consumer = StreamConsumer::default();
        consumer.feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"cut");
        let events = consumer.finish();
        assert!(contents(&events).is_empty());
        assert_eq!(consumer.assistant_text(), "");
    }

    #[test]
    fn test_tool_activity_from_tool_calls_or_confirmation() {
        let mut consumer = StreamConsumer::default();
        let events = consumer.feed(
            b"data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0}]}}]}\n\
              data: {\"choices\":[{\"delta\":{\"tool_calls\":[]}}]}\n",
        );
        assert_eq!(events, vec![ConsumerEvent::ToolActivity]);

        let mut consumer = StreamConsumer::default();
        let body = content_line(&task_confirmation("Fix logo"));
        let events = consumer.feed(body.as_bytes());
        assert_eq!(
            events,
            vec![
                ConsumerEvent::ToolActivity,
                ConsumerEvent::Content("\u{2705} Task \"Fix logo\" created!".into())
            ]
        );
        assert!(consumer.saw_tool_call());
    }

    #[test]
    fn test_irregular_tool_call_record_is_tool_activity() {
        let mut consumer = StreamConsumer::default();
        let events = consumer.feed(
            br#"data: {"choices":[{"delta":{"tool_calls":[{"index":"0","function":{"arguments":{"title":"X"}}}]}}]}
"#,
        );
        assert_eq!(events, vec![ConsumerEvent::ToolActivity]);
        assert_eq!(consumer.assistant_text(), "");
    }

    #[test]
    fn test_pending_record_keeps_progress_across_feeds() {
        let mut consumer = StreamConsumer::default();
        assert!(consumer.feed(b"data: {\"choices\":[{\"delta\":\n").is_empty());
        let first_nl = consumer.buffer.find('\n');
        assert_eq!(consumer.progress.tried_end, first_nl);

        assert!(consumer.feed(b"{\"content\"").is_empty());
        assert_eq!(consumer.progress.tried_end, first_nl);
        assert_eq!(consumer.progress.searched, consumer.buffer.len());

        let events = consumer.feed(b":\"hi\"}}]}\n");
        assert_eq!(contents(&events), vec!["hi"]);
        assert!(consumer.buffer.is_empty());
        assert_eq!(consumer.progress.tried_end, None);
        assert_eq!(consumer.progress.searched, 0);
    }

    #[test]
    fn test_oversized_line_without_newline_is_dropped() {
        let mut consumer = StreamConsumer::default();
        let filler = vec![b'x'; MAX_PENDING_RECORD / 2 + 1];
        assert!(consumer.feed(b"data: ").is_empty());
        assert!(consumer.feed(&filler).is_empty());
        assert!(consumer.feed(&filler).is_empty());
        assert!(consumer.buffer.is_empty());
        assert!(consumer.feed(&filler).is_empty());
        assert!(consumer.buffer.is_empty());

        let events = consumer.feed(format!("xx\n{}", content_line("after")).as_bytes());
        assert_eq!(contents(&events), vec!["after"]);
        assert_eq!(consumer.assistant_text(), "after");
    }

    #[test]
    fn test_split_multibyte_character() {
        let mut consumer = StreamConsumer::default();
        let line = content_line("✅");
        let bytes = line.as_bytes();
        let pos = line.find('✅').unwrap() + 1;
        consumer.feed(&bytes[..pos]);
        consumer.feed(&bytes[pos..]);
        assert_eq!(consumer.assistant_text(), "✅");
    }
}
