//! Incremental RESP parser.
//!
//! The parser inspects a byte slice and either returns one complete value
//! together with the number of bytes it occupies, returns `Ok(None)` when
//! more input is required, or fails with [`io::ErrorKind::InvalidData`]
//! when the input can never become a valid value. The slice is never
//! consumed; the caller advances its buffer by the reported length.
//!
//! | Prefix | Type          | Example              |
//! |--------|---------------|----------------------|
//! | `+`    | Simple string | `+OK\r\n`            |
//! | `-`    | Error         | `-ERR unknown\r\n`   |
//! | `:`    | Integer       | `:42\r\n`            |
//! | `$`    | Bulk string   | `$3\r\nfoo\r\n`      |
//! | `*`    | Array         | `*2\r\n:1\r\n:2\r\n` |

use std::{io, str};

use super::value::RespValue;

/// Maximum number of elements accepted in a single array header.
pub const MAX_ARRAY_ELEMENTS: usize = 1024 * 1024;

/// Maximum nesting depth for arrays.
pub const MAX_DEPTH: usize = 32;

/// Upper bound applied to any single header line (type byte excluded).
const MAX_LINE_LENGTH: usize = 64 * 1024;

fn invalid(message: &'static str) -> io::Error { io::Error::new(io::ErrorKind::InvalidData, message) }

/// Parse one value from the front of `buf`.
///
/// `max_frame_length` bounds the encoded size of the value; larger values
/// are rejected as malformed.
///
/// # Errors
///
/// Returns an [`io::Error`] of kind `InvalidData` for malformed input.
///
/// # Examples
///
/// ```
/// use redis_proxy::resp::{RespValue, parse_value};
///
/// let parsed = parse_value(b":7\r\n+OK", 1024).expect("valid input");
/// assert_eq!(parsed, Some((RespValue::Integer(7), 4)));
/// assert_eq!(parse_value(b"+OK", 1024).expect("partial input"), None);
/// ```
pub fn parse_value(buf: &[u8], max_frame_length: usize) -> io::Result<Option<(RespValue, usize)>> {
    let parser = Parser {
        buf,
        max_frame_length,
    };
    parser.value_at(0, 0)
}

/// One step of resumable decoding: a whole scalar, or the header of an
/// array whose elements follow.
#[derive(Debug, PartialEq)]
pub(super) enum Token {
    Value(RespValue),
    ArrayHeader(usize),
}

/// Parse the next token from the front of `buf` without descending into
/// array elements.
///
/// Null and empty arrays are returned as complete values. The returned
/// length covers only the token itself.
pub(super) fn next_token(buf: &[u8], max_frame_length: usize) -> io::Result<Option<(Token, usize)>> {
    let parser = Parser {
        buf,
        max_frame_length,
    };
    match buf.first().copied() {
        None => Ok(None),
        Some(b'*') => parser.array_header_at(0),
        Some(_) => Ok(parser
            .scalar_at(0)?
            .map(|(value, end)| (Token::Value(value), end))),
    }
}

#[derive(Clone, Copy)]
struct Parser<'a> {
    buf: &'a [u8],
    max_frame_length: usize,
}

impl<'a> Parser<'a> {
    fn value_at(self, start: usize, depth: usize) -> io::Result<Option<(RespValue, usize)>> {
        if depth > MAX_DEPTH {
            return Err(invalid("maximum nesting depth exceeded"));
        }
        let parsed = match self.buf.get(start).copied() {
            None => return Ok(None),
            Some(b'*') => self.array_at(start, depth)?,
            Some(_) => self.scalar_at(start)?,
        };
        match parsed {
            Some((_, end)) if end - start > self.max_frame_length => {
                Err(invalid("value exceeds max frame length"))
            }
            Some((value, end)) => Ok(Some((value, end - start))),
            None => Ok(None),
        }
    }

    fn scalar_at(self, start: usize) -> io::Result<Option<(RespValue, usize)>> {
        match self.buf.get(start).copied() {
            None => Ok(None),
            Some(b'+') => self.text_at(start, RespValue::SimpleString),
            Some(b'-') => self.text_at(start, RespValue::Error),
            Some(b':') => self.integer_at(start),
            Some(b'$') => self.bulk_at(start),
            Some(_) => Err(invalid("unsupported RESP prefix")),
        }
    }

    /// Locate the CRLF-terminated line starting at `start`, returning the
    /// line contents and the offset just past the terminator.
    fn line_at(self, start: usize) -> io::Result<Option<(&'a [u8], usize)>> {
        let Some(rest) = self.buf.get(start..) else {
            return Ok(None);
        };
        let Some(pos) = rest.iter().position(|&byte| byte == b'\n') else {
            if rest.len() > MAX_LINE_LENGTH {
                return Err(invalid("line too long"));
            }
            return Ok(None);
        };
        if pos == 0 || rest[pos - 1] != b'\r' {
            return Err(invalid("line not terminated by CRLF"));
        }
        if pos - 1 > MAX_LINE_LENGTH {
            return Err(invalid("line too long"));
        }
        Ok(Some((&rest[..pos - 1], start + pos + 1)))
    }

    fn signed_at(self, start: usize, what: &'static str) -> io::Result<Option<(i64, usize)>> {
        let Some((line, next)) = self.line_at(start + 1)? else {
            return Ok(None);
        };
        let value = str::from_utf8(line)
            .ok()
            .and_then(|text| text.parse::<i64>().ok())
            .ok_or_else(|| invalid(what))?;
        Ok(Some((value, next)))
    }

    fn text_at<F>(self, start: usize, build: F) -> io::Result<Option<(RespValue, usize)>>
    where
        F: FnOnce(String) -> RespValue,
    {
        let Some((line, next)) = self.line_at(start + 1)? else {
            return Ok(None);
        };
        let text = str::from_utf8(line).map_err(|_| invalid("simple string is not UTF-8"))?;
        Ok(Some((build(text.to_owned()), next)))
    }

    fn integer_at(self, start: usize) -> io::Result<Option<(RespValue, usize)>> {
        Ok(self
            .signed_at(start, "invalid integer")?
            .map(|(value, next)| (RespValue::Integer(value), next)))
    }

    fn bulk_at(self, start: usize) -> io::Result<Option<(RespValue, usize)>> {
        let Some((len, payload_start)) = self.signed_at(start, "invalid bulk length")? else {
            return Ok(None);
        };
        let len = match len {
            -1 => return Ok(Some((RespValue::BulkString(None), payload_start))),
            len if len < -1 => return Err(invalid("invalid bulk length")),
            len => usize::try_from(len).map_err(|_| invalid("bulk length too large"))?,
        };
        if len > self.max_frame_length {
            return Err(invalid("bulk length exceeds max frame length"));
        }
        let end = payload_start
            .checked_add(len)
            .and_then(|value| value.checked_add(2))
            .ok_or_else(|| invalid("bulk length too large"))?;
        let Some(body) = self.buf.get(payload_start..end) else {
            return Ok(None);
        };
        let (data, terminator) = body.split_at(len);
        if terminator != b"\r\n" {
            return Err(invalid("bulk string missing terminator"));
        }
        Ok(Some((RespValue::BulkString(Some(data.to_vec())), end)))
    }

    fn array_header_at(self, start: usize) -> io::Result<Option<(Token, usize)>> {
        let Some((count, next)) = self.signed_at(start, "invalid array length")? else {
            return Ok(None);
        };
        let token = match count {
            -1 => Token::Value(RespValue::Array(None)),
            0 => Token::Value(RespValue::Array(Some(Vec::new()))),
            count if count < -1 => return Err(invalid("invalid negative array length")),
            count => {
                let count = usize::try_from(count).map_err(|_| invalid("array too large"))?;
                if count > MAX_ARRAY_ELEMENTS {
                    return Err(invalid("array element count exceeds limit"));
                }
                Token::ArrayHeader(count)
            }
        };
        Ok(Some((token, next)))
    }

    fn array_at(self, start: usize, depth: usize) -> io::Result<Option<(RespValue, usize)>> {
        let Some((header, mut cursor)) = self.array_header_at(start)? else {
            return Ok(None);
        };
        let count = match header {
            Token::Value(value) => return Ok(Some((value, cursor))),
            Token::ArrayHeader(count) => count,
        };
        // Every element needs at least four bytes, so cap the reservation by
        // what the buffer could possibly hold.
        let mut items = Vec::with_capacity(count.min(self.buf.len() / 4 + 1));
        for _ in 0..count {
            let Some((item, consumed)) = self.value_at(cursor, depth + 1)? else {
                return Ok(None);
            };
            cursor += consumed;
            if cursor - start > self.max_frame_length {
                return Err(invalid("value exceeds max frame length"));
            }
            items.push(item);
        }
        Ok(Some((RespValue::Array(Some(items)), cursor)))
    }
}
