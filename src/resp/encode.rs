//! RESP serialization.

use bytes::{BufMut, BytesMut};

use super::value::RespValue;

/// Number of bytes `value` occupies once encoded.
#[must_use]
pub fn encoded_len(value: &RespValue) -> usize {
    match value {
        RespValue::SimpleString(text) | RespValue::Error(text) => text.len() + 3,
        RespValue::Integer(number) => itoa::Buffer::new().format(*number).len() + 3,
        RespValue::BulkString(None) | RespValue::Array(None) => 5,
        RespValue::BulkString(Some(data)) => header_len(data.len()) + data.len() + 2,
        RespValue::Array(Some(items)) => {
            header_len(items.len()) + items.iter().map(encoded_len).sum::<usize>()
        }
    }
}

fn header_len(count: usize) -> usize { itoa::Buffer::new().format(count).len() + 3 }

/// Append the wire form of `value` to `dst`.
///
/// Line-oriented values have any CR or LF bytes replaced by spaces so a
/// reply can never break framing.
///
/// # Examples
///
/// ```
/// use bytes::BytesMut;
/// use redis_proxy::resp::{RespValue, encode_value};
///
/// let mut out = BytesMut::new();
/// encode_value(&RespValue::command(["PING"]), &mut out);
/// assert_eq!(&out[..], b"*1\r\n$4\r\nPING\r\n");
/// ```
pub fn encode_value(value: &RespValue, dst: &mut BytesMut) {
    dst.reserve(encoded_len(value));
    write_value(value, dst);
}

fn write_value(value: &RespValue, dst: &mut BytesMut) {
    match value {
        RespValue::SimpleString(text) => write_line(b'+', text, dst),
        RespValue::Error(text) => write_line(b'-', text, dst),
        RespValue::Integer(number) => {
            dst.put_u8(b':');
            dst.extend_from_slice(itoa::Buffer::new().format(*number).as_bytes());
            dst.extend_from_slice(b"\r\n");
        }
        RespValue::BulkString(None) => dst.extend_from_slice(b"$-1\r\n"),
        RespValue::Array(None) => dst.extend_from_slice(b"*-1\r\n"),
        RespValue::BulkString(Some(data)) => {
            write_header(b'$', data.len(), dst);
            dst.extend_from_slice(data);
            dst.extend_from_slice(b"\r\n");
        }
        RespValue::Array(Some(items)) => {
            write_header(b'*', items.len(), dst);
            for item in items {
                write_value(item, dst);
            }
        }
    }
}

fn write_header(prefix: u8, count: usize, dst: &mut BytesMut) {
    dst.put_u8(prefix);
    dst.extend_from_slice(itoa::Buffer::new().format(count).as_bytes());
    dst.extend_from_slice(b"\r\n");
}

fn write_line(prefix: u8, text: &str, dst: &mut BytesMut) {
    dst.put_u8(prefix);
    dst.extend(
        text.bytes()
            .map(|byte| if byte == b'\r' || byte == b'\n' { b' ' } else { byte }),
    );
    dst.extend_from_slice(b"\r\n");
}
