//! Newline framing for process output
//!
//! Unlike `LinesCodec`, invalid UTF-8 never ends the stream: bytes are
//! decoded lossily. Lines longer than `max_length` are cut at the limit and
//! the remainder up to the next newline is skipped.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

/// Default upper bound on one output line
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// Lossy, length-bounded line decoder
#[derive(Debug, Clone)]
pub struct LossyLineCodec {
    max_length: usize,
    /// Inside an overlong line whose head was already emitted
    discarding: bool,
}

impl LossyLineCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length: max_length.max(1),
            discarding: false,
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for LossyLineCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_LENGTH)
    }
}

fn to_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

impl Decoder for LossyLineCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        loop {
            let newline = buf.iter().position(|b| *b == b'\n');

            if self.discarding {
                match newline {
                    Some(at) => {
                        buf.advance(at + 1);
                        self.discarding = false;
                    }
                    None => {
                        buf.clear();
                        return Ok(None);
                    }
                }
                continue;
            }

            return match newline {
                Some(at) if at <= self.max_length => {
                    let line = buf.split_to(at + 1);
                    Ok(Some(to_line(&line[..at])))
                }
                _ if buf.len() > self.max_length => {
                    let head = buf.split_to(self.max_length);
                    self.discarding = true;
                    tracing::warn!("Output line longer than {} bytes, truncated", self.max_length);
                    Ok(Some(to_line(&head)))
                }
                _ => Ok(None),
            };
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if buf.is_empty() || self.discarding {
            buf.clear();
            return Ok(None);
        }
        let rest = buf.split();
        Ok(Some(to_line(&rest)))
    }
}
