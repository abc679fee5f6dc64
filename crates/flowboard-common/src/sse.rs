//! Incremental event-stream decoding.
//!
//! Network reads arrive in arbitrary pieces: a UTF-8 sequence or a
//! `data: ...\n` record may be split anywhere. [`Utf8Decoder`] carries
//! incomplete byte sequences between reads and [`LineBuffer`] hands out
//! complete lines only. [`classify`] sorts a line into the record classes
//! both the relay and the client act on.

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";

/// Stateful UTF-8 decoder. Invalid sequences become U+FFFD; an incomplete
/// trailing sequence is held back until the next call.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::with_capacity(self.pending.len());

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush whatever is still held back. A dangling partial sequence
    /// decodes to U+FFFD.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }

    #[cfg(test)]
    fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// An unterminated line longer than this is dropped up to its newline.
pub const MAX_LINE_LEN: usize = 1024 * 1024;

/// Line splitter over an incrementally decoded byte stream.
#[derive(Debug, Default)]
pub struct LineBuffer {
    decoder: Utf8Decoder,
    buffer: String,
    /// `buffer[..searched]` holds no newline.
    searched: usize,
    discarding: bool,
}

impl LineBuffer {
    pub fn push(&mut self, bytes: &[u8]) {
        let text = self.decoder.decode(bytes);
        if self.discarding {
            let Some(nl) = text.find('\n') else {
                return;
            };
            self.discarding = false;
            self.buffer.push_str(&text[nl + 1..]);
        } else {
            self.buffer.push_str(&text);
        }

        if self.buffer.len() > MAX_LINE_LEN && !self.buffer[self.searched..].contains('\n') {
            tracing::warn!(
                len = self.buffer.len(),
                "Dropping stream line without a newline past the size limit"
            );
            self.buffer.clear();
            self.searched = 0;
            self.discarding = true;
        }
    }

    /// Next complete line without its `\n` (and without a trailing `\r`).
    pub fn next_line(&mut self) -> Option<String> {
        let Some(found) = self.buffer[self.searched..].find('\n') else {
            self.searched = self.buffer.len();
            return None;
        };
        let idx = self.searched + found;
        self.searched = 0;
        let mut line: String = self.buffer.drain(..=idx).collect();
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
        Some(line)
    }

    /// End of input: the unterminated remainder, if any.
    pub fn finish(&mut self) -> Option<String> {
        let tail = self.decoder.finish();
        self.searched = 0;
        if std::mem::take(&mut self.discarding) {
            return None;
        }
        self.buffer.push_str(&tail);
        if self.buffer.is_empty() {
            return None;
        }
        let mut rest = std::mem::take(&mut self.buffer);
        if rest.ends_with('\r') {
            rest.pop();
        }
        Some(rest)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseLine<'a> {
    /// Empty or whitespace only.
    Blank,
    /// Starts with `:` (keep-alive).
    Comment,
    /// Anything without the `data: ` prefix.
    Other,
    /// `data: [DONE]`.
    Done,
    /// `data: <payload>`, payload trimmed.
    Data(&'a str),
}

pub fn classify(line: &str) -> SseLine<'_> {
    if line.trim().is_empty() {
        return SseLine::Blank;
    }
    if line.starts_with(':') {
        return SseLine::Comment;
    }
    match line.strip_prefix(DATA_PREFIX) {
        Some(payload) => {
            let payload = payload.trim();
            if payload == DONE_SENTINEL {
                SseLine::Done
            } else {
                SseLine::Data(payload)
            }
        }
        None => SseLine::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_carries_split_multibyte_sequence() {
        let bytes = "✅ ok".as_bytes();
        let mut decoder = Utf8Decoder::default();
        // U+2705 is three bytes; split after the first.
        let first = decoder.decode(&bytes[..1]);
        assert_eq!(first, "");
        assert!(decoder.has_pending());
        let second = decoder.decode(&bytes[1..2]);
        assert_eq!(second, "");
        let rest = decoder.decode(&bytes[2..]);
        assert_eq!(rest, "✅ ok");
        assert!(!decoder.has_pending());
    }

    #[test]
    fn test_decoder_replaces_invalid_bytes_and_continues() {
        let mut decoder = Utf8Decoder::default();
        let out = decoder.decode(&[b'a', 0xff, b'b']);
        assert_eq!(out, "a\u{FFFD}b");
    }

    #[test]
    fn test_decoder_finish_flushes_dangling_sequence() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(&[0xe2, 0x9c]), "");
        assert_eq!(decoder.finish(), "\u{FFFD}");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_line_buffer_splits_across_pushes() {
        let mut lines = LineBuffer::default();
        lines.push(b"data: {\"a\"");
        assert_eq!(lines.next_line(), None);
        lines.push(b":1}\r\n: ping\n\ndata: tail");
        assert_eq!(lines.next_line().as_deref(), Some("data: {\"a\":1}"));
        assert_eq!(lines.next_line().as_deref(), Some(": ping"));
        assert_eq!(lines.next_line().as_deref(), Some(""));
        assert_eq!(lines.next_line(), None);
        assert_eq!(lines.finish().as_deref(), Some("data: tail"));
        assert_eq!(lines.finish(), None);
    }

    #[test]
    fn test_line_buffer_drops_oversized_unterminated_line() {
        let mut lines = LineBuffer::default();
        let filler = vec![b'x'; MAX_LINE_LEN / 2 + 1];
        lines.push(b"data: ");
        lines.push(&filler);
        assert_eq!(lines.next_line(), None);
        lines.push(&filler);
        assert!(lines.buffer.is_empty());
        lines.push(&filler);
        assert!(lines.buffer.is_empty());
        assert_eq!(lines.next_line(), None);

        lines.push(b"xx\r\ndata: after\npart");
        assert_eq!(lines.next_line().as_deref(), Some("data: after"));
        assert_eq!(lines.next_line(), None);
        assert_eq!(lines.finish().as_deref(), Some("part"));
    }

    #[test]
    fn test_line_buffer_finish_while_dropping_yields_nothing() {
        let mut lines = LineBuffer::default();
        let filler = vec![b'x'; MAX_LINE_LEN + 1];
        lines.push(&filler);
        assert_eq!(lines.finish(), None);
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(""), SseLine::Blank);
        assert_eq!(classify("   "), SseLine::Blank);
        assert_eq!(classify(": keep-alive"), SseLine::Comment);
        assert_eq!(classify("event: message"), SseLine::Other);
        assert_eq!(classify("data:{}"), SseLine::Other);
        assert_eq!(classify("data: [DONE]"), SseLine::Done);
        assert_eq!(classify("data: [DONE]  "), SseLine::Done);
        assert_eq!(classify("data: {\"x\":1} "), SseLine::Data("{\"x\":1}"));
    }
}
