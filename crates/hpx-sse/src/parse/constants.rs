//! Common constants used across the SSE parser.

/// Newline byte
pub(crate) const LF: u8 = b'\n';
/// Carriage return byte
pub(crate) const CR: u8 = b'\r';

/// Byte Order Mark as char
const BOM_CHAR: char = '\u{FEFF}';
const BOM_LEN: usize = BOM_CHAR.len_utf8();
/// Byte representation of the BOM [`char`]
pub(crate) const BOM: &[u8; BOM_LEN] = &{
    let mut buf = [0u8; BOM_LEN];
    BOM_CHAR.encode_utf8(&mut buf);
    buf
};

/// Event name used when a block carries no `event:` field.
pub const DEFAULT_EVENT: &str = "message";

pub(crate) const DATA_PREFIX: &str = "data:";
pub(crate) const ID_PREFIX: &str = "id:";
pub(crate) const EVENT_PREFIX: &str = "event:";
pub(crate) const RETRY_PREFIX: &str = "retry:";
