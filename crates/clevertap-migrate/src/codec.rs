//! Line splitting for NDJSON bodies.
//!
//! Vendor exports mix `\n`, `\r\n` and bare `\r` terminators, so both the
//! async [`LineCodec`] and the blocking [`SyncLines`] split on either byte
//! and drop the empty lines that `\r\n` produces.

use bytes::BytesMut;
use std::io::Read;
use tokio_util::codec::Decoder;

use crate::error::{Error, Result};

/// Default maximum line length (20 MiB).
pub const MAX_LINE_LENGTH: usize = 20 * 1024 * 1024;

/// CR/LF tolerant line decoder with a length limit.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_length: usize,
    next_index: usize,
}

impl LineCodec {
    /// Creates a decoder rejecting lines longer than `max_length` bytes.
    #[must_use]
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
        }
    }

    fn too_long(&self) -> Error {
        Error::FatalSource(format!("line exceeds {} bytes", self.max_length))
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new(MAX_LINE_LENGTH)
    }
}

fn to_line(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.strip_prefix('\u{feff}').unwrap_or(&*text).trim().to_string()
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>> {
        loop {
            let found = buf[self.next_index..]
                .iter()
                .position(|b| *b == b'\n' || *b == b'\r');
            let Some(offset) = found else {
                if buf.len() > self.max_length {
                    return Err(self.too_long());
                }
                self.next_index = buf.len();
                return Ok(None);
            };
            let end = self.next_index + offset;
            self.next_index = 0;
            if end > self.max_length {
                return Err(self.too_long());
            }
            let raw = buf.split_to(end + 1);
            let line = to_line(&raw[..end]);
            if !line.is_empty() {
                return Ok(Some(line));
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        self.next_index = 0;
        if buf.is_empty() {
            return Ok(None);
        }
        let raw = buf.split_to(buf.len());
        let line = to_line(&raw);
        Ok((!line.is_empty()).then_some(line))
    }
}

/// Blocking line iterator over any reader, sharing [`LineCodec`] rules.
pub struct SyncLines<R> {
    reader: R,
    codec: LineCodec,
    buf: BytesMut,
    eof: bool,
}

impl<R: Read> SyncLines<R> {
    /// Wraps `reader`.
    pub fn new(reader: R, max_length: usize) -> Self {
        Self {
            reader,
            codec: LineCodec::new(max_length),
            buf: BytesMut::with_capacity(64 * 1024),
            eof: false,
        }
    }
}

impl<R: Read> Iterator for SyncLines<R> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut chunk = [0u8; 64 * 1024];
        loop {
            if self.eof {
                return self.codec.decode_eof(&mut self.buf).transpose();
            }
            match self.codec.decode(&mut self.buf) {
                Ok(Some(line)) => return Some(Ok(line)),
                Ok(None) => {}
                Err(e) => return Some(Err(e)),
            }
            match self.reader.read(&mut chunk) {
                Ok(0) => self.eof = true,
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}
