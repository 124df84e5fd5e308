// Copyright 2026 The Ferry Project
// SPDX-License-Identifier: Apache-2.0

// Line reframer
//
// Turns arbitrary byte chunks into complete text lines. Chunk boundaries
// carry no meaning: a line, or a single UTF-8 character, may be split
// across any number of chunks.

use super::types::ReframeError;

/// Incremental UTF-8 decoder that carries an incomplete trailing sequence
/// over to the next chunk instead of replacing it.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode_into(&mut self, chunk: &[u8], out: &mut String) {
        if self.pending.is_empty() {
            self.decode_bytes(chunk, out);
        } else {
            let mut joined = std::mem::take(&mut self.pending);
            joined.extend_from_slice(chunk);
            self.decode_bytes(&joined, out);
        }
    }

    fn decode_bytes(&mut self, mut bytes: &[u8], out: &mut String) {
        loop {
            match std::str::from_utf8(bytes) {
                Ok(text) => {
                    out.push_str(text);
                    return;
                }
                Err(e) => {
                    let (valid, rest) = bytes.split_at(e.valid_up_to());
                    // valid_up_to guarantees this prefix is UTF-8
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            bytes = &rest[bad..];
                        }
                        None => {
                            self.pending.extend_from_slice(rest);
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Flush at end of stream. A dangling partial character becomes U+FFFD.
    fn finish(&mut self, out: &mut String) {
        if !self.pending.is_empty() {
            out.push_str(&String::from_utf8_lossy(&self.pending));
            self.pending.clear();
        }
    }
}

/// Accumulates the unterminated tail of the stream and yields complete lines.
///
/// Lines are split on `\n` only; a trailing `\r` stays on the line and is
/// trimmed later by the normalizer.
#[derive(Debug)]
pub struct LineReframer {
    decoder: Utf8Decoder,
    buffer: String,
    max_line_bytes: usize,
}

impl Default for LineReframer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineReframer {
    /// Reframer without a line-length bound.
    pub fn new() -> Self {
        Self::with_limit(usize::MAX)
    }

    /// Reframer that refuses to hold more than `max_line_bytes` of an
    /// unterminated line.
    pub fn with_limit(max_line_bytes: usize) -> Self {
        Self {
            decoder: Utf8Decoder::default(),
            buffer: String::new(),
            max_line_bytes,
        }
    }

    /// Append a chunk and drain every line it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<String>, ReframeError> {
        self.decoder.decode_into(chunk, &mut self.buffer);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.buffer[start..].find('\n') {
            lines.push(self.buffer[start..start + pos].to_string());
            start += pos + 1;
        }
        self.buffer.drain(..start);

        if self.buffer.len() > self.max_line_bytes {
            return Err(ReframeError::LineTooLong {
                limit: self.max_line_bytes,
            });
        }
        Ok(lines)
    }

    /// End of stream: the leftover tail, if it holds anything but whitespace.
    pub fn finish(&mut self) -> Option<String> {
        self.decoder.finish(&mut self.buffer);
        let rest = std::mem::take(&mut self.buffer);
        if rest.trim().is_empty() {
            None
        } else {
            Some(rest)
        }
    }

    /// Bytes currently held back waiting for a newline.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}
