//! Incremental UTF-8 decoding of token byte pieces.

/// Accumulates raw token bytes and only ever emits complete UTF-8 text.
///
/// A single token's bytes frequently end mid code point, particularly for non-Latin
/// scripts and emoji. `add_token` returns whatever prefix decodes cleanly and buffers
/// the incomplete tail for the next call; genuinely invalid sequences are replaced with
/// [`char::REPLACEMENT_CHARACTER`] rather than dropped.
pub struct TokenDecoder {
    buf: Vec<u8>,
}

impl TokenDecoder {
    /// Creates a decoder with an empty carry buffer.
    pub fn new() -> TokenDecoder {
        TokenDecoder { buf: Vec::new() }
    }

    /// Appends one token's bytes and returns all text that can be decoded so far.
    ///
    /// Returns an empty string when the accumulated bytes still end inside a multi-byte
    /// code point.
    pub fn add_token(&mut self, token: &[u8]) -> String {
        let mut token = token;
        let mut out = String::new();

        if !self.buf.is_empty() {
            self.buf.extend_from_slice(token);
            token = self.buf.as_slice();
        }

        loop {
            match std::str::from_utf8(token) {
                Ok(s) => {
                    out.push_str(s);
                    self.buf.clear();
                    break;
                }
                Err(err) => {
                    let valid_len = err.valid_up_to();
                    out.push_str(unsafe { std::str::from_utf8_unchecked(&token[..valid_len]) });

                    if let Some(len) = err.error_len() {
                        out.push(char::REPLACEMENT_CHARACTER);
                        token = &token[valid_len + len..];
                    } else {
                        let mut last_bytes = [0; 4];
                        let last_part_len = token.len() - valid_len;
                        last_bytes[..last_part_len].clone_from_slice(&token[valid_len..]);

                        self.buf.clear();
                        self.buf.extend_from_slice(&last_bytes[..last_part_len]);

                        break;
                    }
                }
            }
        }

        out
    }

    /// Drains whatever trailing bytes remain at end of generation, lossily decoded.
    ///
    /// Returns `None` when nothing is buffered.
    pub fn flush(&mut self) -> Option<String> {
        (!self.buf.is_empty()).then(|| {
            let out = String::from_utf8_lossy(&self.buf).to_string();
            self.buf.clear();
            out
        })
    }

    /// Discards any buffered partial code point.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl Default for TokenDecoder {
    fn default() -> Self {
        Self::new()
    }
}
