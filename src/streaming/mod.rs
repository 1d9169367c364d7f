//! Answer stream framing and parsing
//!
//! The backend streams an answer as a sequence of JSON units, one per line.
//! Byte chunks from the transport do not line up with units, so they are
//! buffered here until a full line is available.

use serde::Deserialize;
use serde_json::Value;

/// Buffer for accumulating incomplete lines across chunk boundaries.
///
/// Lines come back as raw bytes. Decoding is left to [`parse_unit`], so a
/// unit with invalid UTF-8 fails like any other malformed unit instead of
/// being patched up here.
///
/// # Example
/// ```
/// use docent::streaming::LineBuffer;
///
/// let mut buffer = LineBuffer::new();
///
/// let lines1 = buffer.feed(b"{\"content\":\"Sun");
/// assert!(lines1.is_empty());
///
/// let lines2 = buffer.feed(b"ny\"}\n");
/// assert_eq!(lines2, vec![b"{\"content\":\"Sunny\"}".to_vec()]);
/// ```
#[derive(Debug, Default)]
pub struct LineBuffer {
    incomplete: Vec<u8>,
}

impl LineBuffer {
    /// Create a new empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes into the buffer and return any complete, non-blank lines.
    ///
    /// Surrounding whitespace (including `\r`) is stripped. Incomplete
    /// trailing data is kept for the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.incomplete.extend_from_slice(bytes);

        let mut complete_lines = Vec::new();
        while let Some(newline_pos) = self.incomplete.iter().position(|b| *b == b'\n') {
            let rest = self.incomplete.split_off(newline_pos + 1);
            let line = std::mem::replace(&mut self.incomplete, rest);
            let line = trim(&line);
            if !line.is_empty() {
                complete_lines.push(line.to_vec());
            }
        }

        complete_lines
    }

    /// Take whatever is left at end of stream as a final line
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        let rest = std::mem::take(&mut self.incomplete);
        let line = trim(&rest);
        (!line.is_empty()).then(|| line.to_vec())
    }
}

fn trim(raw: &[u8]) -> &[u8] {
    let start = raw
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(raw.len());
    let end = raw
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &raw[start..end]
}

/// One parsed unit of an answer stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamUnit {
    /// A piece of answer text
    Fragment(String),
    /// The backend reported a failure mid-stream
    Failed(String),
    /// Well-formed but carries nothing to relay (keep-alive, metadata, `[DONE]`)
    Ignored,
}

#[derive(Debug, Deserialize)]
struct AnswerChunk {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    error: Option<Value>,
}

/// Parse one line of the answer stream.
///
/// An optional SSE `data:` prefix is accepted. Invalid JSON and invalid
/// UTF-8 are both returned as errors; the caller decides to drop the unit.
pub fn parse_unit(line: &[u8]) -> Result<StreamUnit, serde_json::Error> {
    let payload = match line.strip_prefix(b"data:") {
        Some(rest) => trim(rest),
        None => line,
    };

    if payload == b"[DONE]" {
        return Ok(StreamUnit::Ignored);
    }

    let chunk: AnswerChunk = serde_json::from_slice(payload)?;

    if let Some(error) = chunk.error {
        let message = match error {
            Value::String(s) => s,
            other => other.to_string(),
        };
        return Ok(StreamUnit::Failed(message));
    }

    Ok(match chunk.content {
        Some(content) => StreamUnit::Fragment(content),
        None => StreamUnit::Ignored,
    })
}
