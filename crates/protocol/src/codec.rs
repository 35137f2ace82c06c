//! Line codec for newline-delimited JSON messages.
//!
//! # Line Format
//!
//! Each message is a single JSON object followed by `\n`. The driver emits
//! ASCII-only JSON (non-ASCII characters are `\u` escaped), so a message
//! never contains a raw newline. A trailing `\r` is tolerated on decode.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ProtocolError, Result};

/// Line terminator.
pub const LINE_DELIMITER: u8 = b'\n';

/// Maximum line size (64 MB). Large enough for inline PNG payloads.
pub const MAX_LINE_SIZE: usize = 64 * 1024 * 1024;

/// Encoder and decoder for protocol lines.
#[derive(Debug, Clone)]
pub struct LineCodec {
    /// Largest accepted line, delimiter included.
    max_line_size: usize,
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl LineCodec {
    /// Create a codec with the default size limit.
    pub fn new() -> Self {
        Self {
            max_line_size: MAX_LINE_SIZE,
        }
    }

    /// Create a codec with a custom size limit.
    pub fn with_max_line_size(max_line_size: usize) -> Self {
        Self { max_line_size }
    }

    /// Returns the configured size limit.
    pub fn max_line_size(&self) -> usize {
        self.max_line_size
    }

    /// Encode a message as one line, delimiter included.
    pub fn encode<T: Serialize>(&self, message: &T) -> Result<Vec<u8>> {
        let mut output = serde_json::to_vec(message)?;
        output.push(LINE_DELIMITER);

        if output.len() > self.max_line_size {
            return Err(ProtocolError::LineTooLarge {
                size: output.len(),
                max: self.max_line_size,
            });
        }

        Ok(output)
    }

    /// Decode a single line. The delimiter is optional.
    pub fn decode<T: DeserializeOwned>(&self, line: &[u8]) -> Result<T> {
        if line.len() > self.max_line_size {
            return Err(ProtocolError::LineTooLarge {
                size: line.len(),
                max: self.max_line_size,
            });
        }

        let text = std::str::from_utf8(trim_line_end(line))?;
        if text.trim().is_empty() {
            return Err(ProtocolError::Deserialization("empty line".to_string()));
        }

        Ok(serde_json::from_str(text)?)
    }
}

/// Strip a trailing `\n` or `\r\n`.
fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
