//! Line codecs for the bridge socket.
//!
//! Outbound progress lines are produced by [`encode`] (wrapped by
//! [`ProgressCodec`] for framed writers). Inbound commands are split by
//! [`CommandCodec`], a strict wrapper over `LinesCodec`.

use std::fmt::Write as _;
use std::io;

use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use super::protocol::{NOT_APPLICABLE, ProgressUpdate};
use crate::error::ParseError;

const FIELD_NAMES: [&str; 4] = ["stage", "total_stages", "partial", "total"];

/// Render an update as one newline-terminated line.
///
/// Field order is fixed: description, stage, total stages, partial, total.
/// The description is written as-is; see [`sanitize_description`].
pub fn encode(update: &ProgressUpdate, delimiter: char) -> String {
    let mut line = String::with_capacity(update.description.len() + 24);
    line.push_str(&update.description);
    for value in update.wire_fields() {
        line.push(delimiter);
        // Writing to a String cannot fail.
        let _ = write!(line, "{value}");
    }
    line.push('\n');
    line
}

/// Replace characters that would break line framing with a space.
pub fn sanitize_description(description: &str, delimiter: char) -> String {
    description
        .chars()
        .map(|c| {
            if c == delimiter || c == '\n' || c == '\r' {
                ' '
            } else {
                c
            }
        })
        .collect()
}

/// Parse a progress line back into an update (supervisor side).
///
/// Splits from the right, so a stray delimiter inside the description is
/// tolerated.
pub fn parse_progress_line(line: &str, delimiter: char) -> Result<ProgressUpdate, ParseError> {
    let line = line
        .strip_suffix('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .unwrap_or(line);

    let mut fields: Vec<&str> = line.rsplitn(5, delimiter).collect();
    if fields.len() != 5 {
        return Err(ParseError::FieldCount(fields.len()));
    }
    fields.reverse();

    let mut values = [None; 4];
    for (slot, (raw, name)) in values.iter_mut().zip(fields[1..].iter().zip(FIELD_NAMES)) {
        *slot = parse_field(raw, name)?;
    }
    let [stage, total_stages, partial, total] = values;

    Ok(ProgressUpdate {
        description: fields[0].to_string(),
        stage,
        total_stages,
        partial,
        total,
    })
}

fn parse_field(raw: &str, field: &'static str) -> Result<Option<u64>, ParseError> {
    let invalid = || ParseError::InvalidNumber {
        field,
        value: raw.to_string(),
    };
    match raw.parse::<i64>().map_err(|_| invalid())? {
        NOT_APPLICABLE => Ok(None),
        v if v >= 0 => Ok(Some(v as u64)),
        _ => Err(invalid()),
    }
}

/// Encoder for outbound progress lines.
#[derive(Debug, Clone, Copy)]
pub struct ProgressCodec {
    delimiter: char,
}

impl ProgressCodec {
    pub fn new(delimiter: char) -> Self {
        Self { delimiter }
    }
}

impl<'a> Encoder<&'a ProgressUpdate> for ProgressCodec {
    type Error = io::Error;

    fn encode(&mut self, item: &'a ProgressUpdate, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = encode(item, self.delimiter);
        tracing::trace!(line_len = line.len(), "Encoding progress line");
        dst.extend_from_slice(line.as_bytes());
        Ok(())
    }
}

/// Decoder for inbound command lines.
///
/// Differs from a bare `LinesCodec` in three ways:
/// - over-long lines and invalid UTF-8 are skipped instead of ending the stream
/// - a trailing line without `\n` at EOF is discarded, never dispatched
/// - errors are plain `io::Error`
#[derive(Debug)]
pub struct CommandCodec {
    inner: LinesCodec,
}

impl CommandCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_length),
        }
    }
}

impl Decoder for CommandCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.inner.decode(src) {
                Ok(line) => return Ok(line),
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    tracing::warn!(
                        max_length = self.inner.max_length(),
                        "Command line too long, skipping"
                    );
                }
                Err(LinesCodecError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => {
                    tracing::warn!(error = %e, "Command line is not valid UTF-8, skipping");
                }
                Err(LinesCodecError::Io(e)) => return Err(e),
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if !buf.is_empty() {
            tracing::debug!(bytes = buf.len(), "Discarding unterminated command at EOF");
            buf.clear();
        }
        Ok(None)
    }
}
