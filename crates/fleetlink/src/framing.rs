//! JSON reassembly for the telemetry path
//!
//! QUIC streams carry bytes, not messages: a telemetry object may arrive
//! split across reads, or several objects may arrive in one read. The
//! assembler buffers incoming chunks and peels complete JSON objects off the
//! front, forwarding exactly the parsed span — trailing bytes stay buffered
//! for the next round.

use bytes::{Bytes, BytesMut};

use crate::protocol::MAX_JSON_BUFFER;

/// Telemetry framing failure. Both variants are connection-fatal.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    /// Buffer exceeded [`MAX_JSON_BUFFER`] without yielding a complete object.
    #[error("telemetry buffer exceeded {MAX_JSON_BUFFER} bytes without a complete JSON object")]
    Oversized,

    /// The buffer head can never parse as JSON.
    #[error("telemetry stream is not valid JSON: {0}")]
    Malformed(serde_json::Error),

    /// Parsed fine, but was an array/number/string instead of an object.
    #[error("telemetry value is not a JSON object")]
    NotAnObject,
}

/// Incremental reassembler that turns a chunked byte stream into a sequence
/// of complete JSON objects.
#[derive(Debug, Default)]
pub struct JsonAssembler {
    buf: BytesMut,
}

impl JsonAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently buffered and not yet parsed.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Feed one chunk from the wire, returning every complete object it
    /// finishes. An empty result just means the object is still partial.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Bytes>, FramingError> {
        self.buf.extend_from_slice(chunk);
        let mut complete = Vec::new();

        loop {
            // Whitespace between objects is consumed, never forwarded.
            let lead = self
                .buf
                .iter()
                .take_while(|b| b.is_ascii_whitespace())
                .count();
            if lead > 0 {
                let _ = self.buf.split_to(lead);
            }
            if self.buf.is_empty() {
                break;
            }

            let mut objects = serde_json::Deserializer::from_slice(&self.buf)
                .into_iter::<serde_json::Value>();
            match objects.next() {
                Some(Ok(value)) => {
                    let span = objects.byte_offset();
                    if !value.is_object() {
                        return Err(FramingError::NotAnObject);
                    }
                    complete.push(self.buf.split_to(span).freeze());
                }
                Some(Err(err)) if err.is_eof() => break,
                Some(Err(err)) => return Err(FramingError::Malformed(err)),
                None => break,
            }
        }

        if self.buf.len() > MAX_JSON_BUFFER {
            return Err(FramingError::Oversized);
        }
        Ok(complete)
    }
}
