//! Incremental UTF-8 decoding of network chunks.

/// Decodes a byte stream chunk by chunk.
///
/// A multi-byte character split across two chunks is held back until the
/// rest of it arrives. Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `pending + bytes` as is complete.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    // valid_up_to guarantees this prefix is well-formed.
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            // Incomplete trailing sequence; wait for more bytes.
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    /// Flush whatever is left at end of stream.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }

    /// True if bytes of an unfinished character are buffered.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passes_through() {
        let mut decoder = Utf8ChunkDecoder::new();
        assert_eq!(decoder.push(b"hello "), "hello ");
        assert_eq!(decoder.push(b"world"), "world");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_split_multibyte_character_is_carried_over() {
        let bytes = "größe ✓".as_bytes();
        // 'ö' is two bytes starting at index 2.
        let mut decoder = Utf8ChunkDecoder::new();
        assert_eq!(decoder.push(&bytes[..3]), "gr");
        assert!(decoder.has_pending());
        assert_eq!(decoder.push(&bytes[3..]), "öße ✓");
        assert!(!decoder.has_pending());
    }

    #[test]
    fn test_three_byte_character_split_in_every_position() {
        let bytes = "✓".as_bytes();
        let mut decoder = Utf8ChunkDecoder::new();
        assert_eq!(decoder.push(&bytes[..1]), "");
        assert_eq!(decoder.push(&bytes[1..2]), "");
        assert_eq!(decoder.push(&bytes[2..]), "✓");
    }

    #[test]
    fn test_invalid_bytes_are_replaced() {
        let mut decoder = Utf8ChunkDecoder::new();
        assert_eq!(decoder.push(b"a\xFFb"), "a\u{FFFD}b");
    }

    #[test]
    fn test_truncated_tail_is_replaced_on_finish() {
        let mut decoder = Utf8ChunkDecoder::new();
        assert_eq!(decoder.push(&"é".as_bytes()[..1]), "");
        assert_eq!(decoder.finish(), "\u{FFFD}");
        assert!(!decoder.has_pending());
    }
}
