use std::sync::LazyLock;

use encoding_rs::{CoderResult, Decoder, UTF_8};
use regex::Regex;

static ANSI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]").unwrap()
});

/// Longest trailing escape sequence held back while waiting for its end.
const MAX_PENDING_ESCAPE: usize = 64;

/// Remove ANSI escape sequences (CSI, OSC and two-byte escapes).
#[must_use]
pub fn strip_ansi(text: &str) -> String {
    ANSI_RE.replace_all(text, "").into_owned()
}

/// Incremental UTF-8 decoder for one output stream.
///
/// Multi-byte characters and escape sequences split across reads are
/// buffered until complete. Invalid bytes become U+FFFD.
pub(crate) struct StreamDecoder {
    decoder: Decoder,
    pending_escape: String,
}

impl StreamDecoder {
    pub(crate) fn new() -> Self {
        Self {
            decoder: UTF_8.new_decoder_without_bom_handling(),
            pending_escape: String::new(),
        }
    }

    /// Decode the next chunk, returning ANSI-free text ready to emit.
    pub(crate) fn decode(&mut self, bytes: &[u8]) -> String {
        self.decode_inner(bytes, false)
    }

    /// Flush whatever is still buffered at end of stream.
    pub(crate) fn finish(&mut self) -> String {
        self.decode_inner(&[], true)
    }

    fn decode_inner(&mut self, bytes: &[u8], last: bool) -> String {
        let mut text = std::mem::take(&mut self.pending_escape);
        let mut src = bytes;
        loop {
            let needed = self
                .decoder
                .max_utf8_buffer_length(src.len())
                .unwrap_or(src.len() * 3 + 4);
            text.reserve(needed);
            let (result, read, _replaced) = self.decoder.decode_to_string(src, &mut text, last);
            src = &src[read..];
            match result {
                CoderResult::InputEmpty => break,
                CoderResult::OutputFull => {}
            }
        }

        if !last && let Some(idx) = text.rfind('\x1b') {
            let tail = &text[idx..];
            let complete = ANSI_RE.find(tail).is_some_and(|m| m.start() == 0);
            if !complete && tail.len() <= MAX_PENDING_ESCAPE {
                self.pending_escape = tail.to_owned();
                text.truncate(idx);
            }
        }

        strip_ansi(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_color_codes() {
        assert_eq!(strip_ansi("\x1b[31mred\x1b[0m plain"), "red plain");
    }

    #[test]
    fn strips_osc_title() {
        assert_eq!(strip_ansi("\x1b]0;title\x07text"), "text");
    }

    #[test]
    fn split_multibyte_character_is_buffered() {
        let bytes = "héllo".as_bytes();
        let mut d = StreamDecoder::new();
        let first = d.decode(&bytes[..2]);
        let second = d.decode(&bytes[2..]);
        assert_eq!(first, "h");
        assert_eq!(second, "éllo");
    }

    #[test]
    fn split_escape_sequence_is_buffered() {
        let mut d = StreamDecoder::new();
        let first = d.decode(b"ok \x1b[3");
        let second = d.decode(b"1mred\x1b[0m");
        assert_eq!(first, "ok ");
        assert_eq!(second, "red");
    }

    #[test]
    fn invalid_bytes_become_replacement() {
        let mut d = StreamDecoder::new();
        let mut out = d.decode(&[b'a', 0xff, b'b']);
        out.push_str(&d.finish());
        assert_eq!(out, "a\u{fffd}b");
    }

    #[test]
    fn finish_flushes_truncated_character() {
        let mut d = StreamDecoder::new();
        assert_eq!(d.decode(&[0xe2, 0x82]), "");
        assert_eq!(d.finish(), "\u{fffd}");
    }
}
