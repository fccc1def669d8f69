//! RESP2 wire codec
//!
//! Commands are sent as arrays of bulk strings. Replies are decoded from a
//! buffered reader one value at a time:
//!
//! | Prefix | Type          |
//! |--------|---------------|
//! | `+`    | simple string |
//! | `-`    | error         |
//! | `:`    | integer       |
//! | `$`    | bulk string (`$-1` is null) |
//! | `*`    | array (`*-1` is null) |

use std::io::BufRead;

use crate::error::{StoreError, StoreResult};

/// Largest bulk string accepted from the server
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Longest reply line accepted from the server, CRLF included
const MAX_LINE_LEN: usize = 64 * 1024;

/// Deepest array nesting accepted from the server
const MAX_DEPTH: usize = 8;

/// A decoded RESP2 reply
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// `+OK`
    Simple(String),
    /// `-ERR ...`
    Error(String),
    /// `:42`
    Integer(i64),
    /// `$3\r\nfoo`, or `None` for `$-1`
    Bulk(Option<Vec<u8>>),
    /// `*2\r\n...`, or `None` for `*-1`
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// Bulk or simple string contents as UTF-8 (lossy)
    pub fn as_text(&self) -> Option<String> {
        match self {
            RespValue::Simple(s) => Some(s.clone()),
            RespValue::Bulk(Some(b)) => Some(String::from_utf8_lossy(b).into_owned()),
            _ => None,
        }
    }

    /// Convert an error reply into `StoreError::Server`, or
    /// `StoreError::Auth` when the server demands authentication
    pub fn into_result(self) -> StoreResult<RespValue> {
        match self {
            RespValue::Error(msg) if msg.starts_with("NOAUTH") => Err(StoreError::Auth(msg)),
            RespValue::Error(msg) => Err(StoreError::Server(msg)),
            other => Ok(other),
        }
    }
}

/// Append `args` to `out` as a RESP command array
pub fn encode_command(args: &[&[u8]], out: &mut Vec<u8>) {
    out.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

/// Read one complete reply from `reader`
pub fn read_value<R: BufRead>(reader: &mut R) -> StoreResult<RespValue> {
    read_nested(reader, 0)
}

fn read_nested<R: BufRead>(reader: &mut R, depth: usize) -> StoreResult<RespValue> {
    if depth > MAX_DEPTH {
        return Err(StoreError::Protocol("reply nested too deeply".to_string()));
    }
    let line = read_line(reader)?;
    let (prefix, rest) = line
        .split_first()
        .ok_or_else(|| StoreError::Protocol("empty reply line".to_string()))?;
    let text = String::from_utf8_lossy(rest).into_owned();

    match prefix {
        b'+' => Ok(RespValue::Simple(text)),
        b'-' => Ok(RespValue::Error(text)),
        b':' => Ok(RespValue::Integer(parse_len_i64(&text)?)),
        b'$' => {
            let len = parse_len_i64(&text)?;
            if len < 0 {
                return Ok(RespValue::Bulk(None));
            }
            let len = len as usize;
            if len > MAX_BULK_LEN {
                return Err(StoreError::Protocol(format!("bulk string of {} bytes", len)));
            }
            let mut data = vec![0u8; len + 2];
            reader.read_exact(&mut data)?;
            if &data[len..] != b"\r\n" {
                return Err(StoreError::Protocol("bulk string not CRLF terminated".to_string()));
            }
            data.truncate(len);
            Ok(RespValue::Bulk(Some(data)))
        }
        b'*' => {
            let len = parse_len_i64(&text)?;
            if len < 0 {
                return Ok(RespValue::Array(None));
            }
            let mut items = Vec::with_capacity((len as usize).min(1024));
            for _ in 0..len {
                items.push(read_nested(reader, depth + 1)?);
            }
            Ok(RespValue::Array(Some(items)))
        }
        other => Err(StoreError::Protocol(format!(
            "unknown reply prefix 0x{:02x}",
            other
        ))),
    }
}

fn read_line<R: BufRead>(reader: &mut R) -> StoreResult<Vec<u8>> {
    let mut line = Vec::new();
    let mut limited = std::io::Read::take(&mut *reader, MAX_LINE_LEN as u64);
    let n = limited.read_until(b'\n', &mut line)?;
    if n == 0 {
        return Err(StoreError::Protocol("connection closed by server".to_string()));
    }
    if n == MAX_LINE_LEN && !line.ends_with(b"\n") {
        return Err(StoreError::Protocol(format!(
            "reply line longer than {} bytes",
            MAX_LINE_LEN
        )));
    }
    if !line.ends_with(b"\r\n") {
        return Err(StoreError::Protocol("reply line not CRLF terminated".to_string()));
    }
    line.truncate(line.len() - 2);
    Ok(line)
}

fn parse_len_i64(text: &str) -> StoreResult<i64> {
    text.parse()
        .map_err(|_| StoreError::Protocol(format!("invalid integer '{}'", text)))
}
