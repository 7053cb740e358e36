//! Cursor over the text payload of an extension record.
//!
//! Several extension subtypes embed a small key/value language in their
//! payload. [`TextRecord`] provides the shared scanning primitives; each
//! subtype decoder in [`super::extension`] drives it with its own grammar.

use crate::sav::types::error::{Result, SavError};

#[derive(Debug, Clone)]
pub struct TextRecord<'a> {
    buffer: &'a [u8],
    pos: usize,
    /// File offset of `buffer[0]`, for error messages.
    base_offset: u64,
}

impl<'a> TextRecord<'a> {
    pub fn new(buffer: &'a [u8], base_offset: u64) -> Self {
        Self {
            buffer,
            pos: 0,
            base_offset,
        }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    /// File offset of the cursor.
    pub fn offset(&self) -> u64 {
        self.base_offset + self.pos as u64
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.buffer.len()
    }

    /// The unconsumed tail of the buffer.
    pub fn rest(&self) -> &'a [u8] {
        &self.buffer[self.pos.min(self.buffer.len())..]
    }

    fn peek(&self) -> Option<u8> {
        self.buffer.get(self.pos).copied()
    }

    /// Scans to `delim` or NUL and returns the bytes before it.
    ///
    /// The terminator is consumed. An empty span yields `None`.
    pub fn tokenize(&mut self, delim: u8) -> Option<&'a [u8]> {
        self.tokenize_any(&[delim])
    }

    fn tokenize_any(&mut self, delims: &[u8]) -> Option<&'a [u8]> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b == 0 || delims.contains(&b) {
                break;
            }
            self.pos += 1;
        }
        if self.pos == start {
            return None;
        }
        let token = &self.buffer[start..self.pos];
        if !self.at_end() {
            self.pos += 1;
        }
        Some(token)
    }

    /// Skips leading delimiters, then scans to the next delimiter or NUL.
    pub fn get_token(&mut self, delims: &[u8]) -> Option<&'a [u8]> {
        while self.peek().is_some_and(|b| delims.contains(&b)) {
            self.pos += 1;
        }
        self.tokenize_any(delims)
    }

    /// Consumes one byte if it equals `byte`.
    pub fn matches(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Skips through the next newline, or to the end of the buffer.
    pub fn skip_line(&mut self) {
        while let Some(b) = self.peek() {
            self.pos += 1;
            if b == b'\n' {
                break;
            }
        }
    }

    /// Parses `<decimal length> <space> <bytes> <space>`.
    ///
    /// # Errors
    /// Missing digits, missing spaces or a length that runs past the buffer
    /// are reported as [`SavError::TextRecord`] at the failing offset.
    pub fn parse_counted_string(&mut self) -> Result<&'a [u8]> {
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error("expecting digit at start of counted string"));
        }
        let digits = &self.buffer[start..self.pos];
        let len: usize = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| self.error("counted string length is out of range"))?;

        if !self.matches(b' ') {
            return Err(self.error("expecting space after counted string length"));
        }
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buffer.len())
            .ok_or_else(|| self.error(format!("{}-byte counted string runs past end of record", len)))?;
        let value = &self.buffer[self.pos..end];
        self.pos = end;
        if !self.matches(b' ') {
            return Err(self.error("expecting space after counted string"));
        }
        Ok(value)
    }

    /// A syntax error at the cursor.
    pub fn error(&self, message: impl Into<String>) -> SavError {
        SavError::TextRecord {
            offset: self.offset(),
            message: message.into(),
        }
    }
}
