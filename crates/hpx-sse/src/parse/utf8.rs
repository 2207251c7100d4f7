//! Streaming UTF-8 decoding for response bodies.

use bytes::{Buf, BytesMut};

use super::constants::BOM;

/// Decodes a byte stream into text chunk by chunk.
///
/// Incomplete multi-byte sequences at the end of a chunk are held back until
/// the next call. Invalid sequences become `U+FFFD`. A single byte-order mark
/// at the start of the stream is dropped.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: BytesMut,
    started: bool,
}

impl Utf8Decoder {
    /// Create a decoder positioned at the start of a stream.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next chunk, returning all text that is complete so far.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        if !self.started {
            match starts_with_bom(&self.pending) {
                Some(true) => {
                    self.started = true;
                    self.pending.advance(BOM.len());
                }
                Some(false) => self.started = true,
                None => return String::new(),
            }
        }

        let mut text = String::with_capacity(self.pending.len());
        let mut start = 0;
        loop {
            match core::str::from_utf8(&self.pending[start..]) {
                Ok(valid) => {
                    text.push_str(valid);
                    start = self.pending.len();
                    break;
                }
                Err(err) => {
                    let valid_end = start + err.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[start..valid_end]));
                    match err.error_len() {
                        Some(invalid_len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            start = valid_end + invalid_len;
                        }
                        None => {
                            // Incomplete sequence: wait for more bytes.
                            start = valid_end;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.advance(start);
        text
    }

    /// Flush any bytes still held back, replacing them with `U+FFFD`.
    pub fn finish(&mut self) -> String {
        self.started = true;
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }

    /// Number of bytes waiting for the rest of their sequence.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// `None` while `buf` is still a prefix of the BOM and more bytes are needed.
const fn starts_with_bom(buf: &[u8]) -> Option<bool> {
    match buf.len() {
        0 => None,
        1 => {
            if buf[0] == BOM[0] {
                None
            } else {
                Some(false)
            }
        }
        2 => {
            if buf[0] == BOM[0] && buf[1] == BOM[1] {
                None
            } else {
                Some(false)
            }
        }
        _gte_3 => Some(buf[0] == BOM[0] && buf[1] == BOM[1] && buf[2] == BOM[2]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passthrough() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(b"data: hi\n\n"), "data: hi\n\n");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_multibyte_split_across_chunks() {
        let bytes = "é🎉".as_bytes();
        let mut decoder = Utf8Decoder::new();
        let mut text = String::new();
        for byte in bytes {
            text.push_str(&decoder.decode(core::slice::from_ref(byte)));
        }
        assert_eq!(text, "é🎉");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_incomplete_sequence_is_held_back() {
        let bytes = "✓".as_bytes();
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(&bytes[..2]), "");
        assert_eq!(decoder.pending_len(), 2);
        assert_eq!(decoder.decode(&bytes[2..]), "✓");
    }

    #[test]
    fn test_invalid_bytes_are_replaced() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(b"a\xFFb"), "a\u{FFFD}b");
    }

    #[test]
    fn test_leading_bom_is_stripped_once() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(&BOM[..1]), "");
        assert_eq!(decoder.decode(&BOM[1..]), "");
        assert_eq!(decoder.decode(b"data: x"), "data: x");

        // A BOM later in the stream is regular content.
        let later = decoder.decode(BOM);
        assert_eq!(later, "\u{FEFF}");
    }

    #[test]
    fn test_bom_prefix_mismatch() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(&[BOM[0]]), "");
        assert_eq!(decoder.decode(b"x"), "\u{FFFD}x");
    }

    #[test]
    fn test_finish_flushes_dangling_bytes() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(&"é".as_bytes()[..1]), "");
        assert_eq!(decoder.finish(), "\u{FFFD}");
        assert_eq!(decoder.pending_len(), 0);
    }
}
