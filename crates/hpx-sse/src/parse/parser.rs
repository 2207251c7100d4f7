//! Incremental, stateless SSE block parser.
//!
//! The parser never holds state between calls. Whatever could not be turned
//! into a complete message is handed back as `leftover` and must be passed in
//! again, unmodified, ahead of the next piece of decoded text.

use core::mem;

use memchr::memchr2;

use super::{
    constants::{CR, DATA_PREFIX, DEFAULT_EVENT, EVENT_PREFIX, ID_PREFIX, LF, RETRY_PREFIX},
    message::Message,
};

/// A recognised field line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    /// `data:` line.
    Data(String),
    /// `id:` line. The value may be empty.
    Id(String),
    /// `event:` line.
    Event(String),
    /// `retry:` line with a numeric value, rounded to whole milliseconds.
    Retry(i64),
}

/// Result of parsing one piece of text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedChunk {
    /// Complete messages, in stream order.
    pub messages: Vec<Message>,
    /// Unterminated tail that must prefix the next chunk.
    pub leftover: String,
}

/// Field values collected for the block currently being assembled.
#[derive(Debug, Default)]
struct PendingMessage {
    id: Option<String>,
    event: Option<String>,
    data: Option<String>,
    retry: Option<i64>,
}

impl PendingMessage {
    fn apply(&mut self, field: Field) {
        match field {
            Field::Data(value) => self.data = Some(value),
            Field::Id(value) => self.id = Some(value),
            Field::Event(value) => self.event = Some(value),
            Field::Retry(value) => self.retry = Some(value),
        }
    }

    /// Reset the accumulator, yielding a message if a `data:` line was seen.
    fn flush(&mut self) -> Option<Message> {
        let PendingMessage {
            id,
            event,
            data,
            retry,
        } = mem::take(self);

        Some(Message {
            id,
            event: event.unwrap_or_else(|| DEFAULT_EVENT.to_owned()),
            data: data?,
            retry,
        })
    }
}

/// Parse `chunk` as the continuation of `leftover`.
///
/// Splitting a stream into arbitrary pieces and threading `leftover` through
/// successive calls yields the same messages as parsing it in one go.
#[must_use]
pub fn parse_chunk(leftover: &str, chunk: &str) -> ParsedChunk {
    if leftover.is_empty() {
        return parse_messages(chunk);
    }

    let mut input = String::with_capacity(leftover.len() + chunk.len());
    input.push_str(leftover);
    input.push_str(chunk);
    parse_messages(&input)
}

/// Parse a block of decoded text into messages plus the unconsumed tail.
///
/// `\n`, `\r\n` and a lone `\r` all terminate a line. An empty line ends the
/// current block. An empty first line of `input` has nothing pending and is
/// just skipped: it is either a stray blank line or the `\n` half of a `\r\n`
/// pair split across two chunks.
#[must_use]
pub fn parse_messages(input: &str) -> ParsedChunk {
    let bytes = input.as_bytes();
    let mut messages = Vec::new();
    let mut pending = PendingMessage::default();
    let mut line_start = 0;
    let mut consumed = 0;

    while let Some(offset) = memchr2(CR, LF, &bytes[line_start..]) {
        let line_end = line_start + offset;
        let next_start = if bytes[line_end] == CR && bytes.get(line_end + 1) == Some(&LF) {
            line_end + 2
        } else {
            line_end + 1
        };

        let line = &input[line_start..line_end];
        if !line.is_empty() {
            if let Some(field) = parse_line(line) {
                pending.apply(field);
            }
        } else {
            if line_start > 0
                && let Some(message) = pending.flush()
            {
                messages.push(message);
            }
            consumed = next_start;
        }

        line_start = next_start;
    }

    ParsedChunk {
        messages,
        leftover: input[consumed..].to_owned(),
    }
}

/// Interpret a single line without its terminator.
///
/// Returns `None` for comments, unknown fields and `retry:` values that are
/// not numbers.
#[must_use]
pub fn parse_line(line: &str) -> Option<Field> {
    if let Some(value) = line.strip_prefix(DATA_PREFIX) {
        return Some(Field::Data(value.trim().to_owned()));
    }
    if let Some(value) = line.strip_prefix(ID_PREFIX) {
        return Some(Field::Id(value.trim().to_owned()));
    }
    if let Some(value) = line.strip_prefix(EVENT_PREFIX) {
        return Some(Field::Event(value.trim().to_owned()));
    }
    if let Some(value) = line.strip_prefix(RETRY_PREFIX) {
        return parse_retry(value.trim()).map(Field::Retry);
    }
    None
}

fn parse_retry(value: &str) -> Option<i64> {
    let number: f64 = value.parse().ok()?;
    if !number.is_finite() {
        return None;
    }

    // Halves round towards positive infinity.
    let floor = number.floor();
    let rounded = if number - floor >= 0.5 {
        floor + 1.0
    } else {
        floor
    };

    #[allow(clippy::cast_possible_truncation)]
    Some(rounded as i64)
}
