//! Byte-to-text decoding for PTY output.

use std::fmt;
use std::str::FromStr;

/// Text encoding used on the terminal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Encoding {
    #[default]
    Utf8,
    /// ISO-8859-1: every byte is the code point of the same value.
    Latin1,
}

impl Encoding {
    /// Encode outgoing text. Characters Latin-1 cannot represent become `?`.
    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            Encoding::Utf8 => text.as_bytes().to_vec(),
            Encoding::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
        }
    }

    /// Decode a complete buffer, replacing invalid sequences.
    pub fn decode_lossy(self, bytes: &[u8]) -> String {
        let mut decoder = Decoder::new(self);
        let mut text = decoder.decode(bytes);
        text.push_str(&decoder.finish());
        text
    }
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" => Ok(Encoding::Utf8),
            "latin-1" | "latin1" | "iso-8859-1" => Ok(Encoding::Latin1),
            other => Err(format!(
                "unsupported encoding `{other}` (expected utf-8 or latin-1)"
            )),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::Utf8 => f.write_str("utf-8"),
            Encoding::Latin1 => f.write_str("latin-1"),
        }
    }
}

/// Streaming decoder that never splits a character across chunk boundaries.
///
/// A trailing incomplete UTF-8 sequence is held until the next chunk.
/// Genuinely invalid bytes are replaced with U+FFFD.
#[derive(Debug)]
pub struct Decoder {
    encoding: Encoding,
    buf: Vec<u8>,
}

impl Decoder {
    pub fn new(encoding: Encoding) -> Self {
        Self {
            encoding,
            buf: Vec::new(),
        }
    }

    /// Feed a chunk and return all text that is complete so far.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        match self.encoding {
            Encoding::Latin1 => chunk.iter().map(|&b| char::from(b)).collect(),
            Encoding::Utf8 => self.decode_utf8(chunk),
        }
    }

    /// Flush held-back bytes at end of stream.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.buf);
        String::from_utf8_lossy(&rest).into_owned()
    }

    fn decode_utf8(&mut self, chunk: &[u8]) -> String {
        self.buf.extend_from_slice(chunk);
        let mut result = String::new();

        loop {
            match std::str::from_utf8(&self.buf) {
                Ok(s) => {
                    result.push_str(s);
                    self.buf.clear();
                    break;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    // Validated by from_utf8 up to this index.
                    result.push_str(&String::from_utf8_lossy(&self.buf[..valid_up_to]));

                    match e.error_len() {
                        None => {
                            self.buf.drain(..valid_up_to);
                            break;
                        }
                        Some(len) => {
                            result.push('\u{FFFD}');
                            self.buf.drain(..valid_up_to + len);
                        }
                    }
                }
            }
        }

        result
    }
}
