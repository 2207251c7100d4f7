//! SSE stream parsing.
//!
//! - [`parse_chunk`] / [`parse_messages`]: pure functions turning decoded text
//!   into [`Message`]s plus an unconsumed `leftover` tail.
//! - [`Utf8Decoder`]: streaming-safe byte to text decoding.

mod constants;
mod message;
mod parser;
mod utf8;

pub use constants::DEFAULT_EVENT;
pub use message::Message;
pub use parser::{Field, ParsedChunk, parse_chunk, parse_line, parse_messages};
pub use utf8::Utf8Decoder;
