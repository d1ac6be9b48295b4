//! Tokio codec adapter for RESP values.

use std::io;

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{
    encode::encode_value,
    parse::{MAX_DEPTH, Token, next_token},
    value::RespValue,
};

/// Default maximum encoded size of one value: the RESP bulk string cap
/// (512 MiB).
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 512 * 1024 * 1024;

/// Upper bound on the element capacity reserved up front for one array.
const PREALLOCATE_ELEMENTS: usize = 1024;

/// RESP decoder and encoder for use with the proxy filter.
///
/// Decoding is resumable. Array headers and complete elements are taken
/// out of the source buffer as soon as they arrive and held until their
/// array is whole, so a large pipelined array is scanned once no matter
/// how it is chunked. Only a partially received scalar stays in the
/// source buffer between calls.
#[derive(Clone, Debug)]
pub struct RespCodec {
    max_frame_length: usize,
    open_arrays: Vec<OpenArray>,
    frame_len: usize,
}

/// An array whose header has been consumed but whose elements have not
/// all arrived.
#[derive(Clone, Debug)]
struct OpenArray {
    len: usize,
    items: Vec<RespValue>,
}

impl OpenArray {
    fn new(len: usize) -> Self {
        Self {
            len,
            items: Vec::with_capacity(len.min(PREALLOCATE_ELEMENTS)),
        }
    }
}

impl RespCodec {
    /// Create a codec accepting values up to `max_frame_length` bytes.
    #[must_use]
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            max_frame_length,
            open_arrays: Vec::new(),
            frame_len: 0,
        }
    }

    /// Maximum encoded value size accepted by the decoder.
    #[must_use]
    pub fn max_frame_length(&self) -> usize { self.max_frame_length }

    fn fail(&mut self, message: &'static str) -> io::Error {
        self.reset();
        io::Error::new(io::ErrorKind::InvalidData, message)
    }

    fn reset(&mut self) {
        self.open_arrays.clear();
        self.frame_len = 0;
    }

    /// Attach `value` to the innermost open array, closing every array it
    /// completes. Returns the top-level value once nothing is left open.
    fn attach(&mut self, mut value: RespValue) -> Option<RespValue> {
        while let Some(mut open) = self.open_arrays.pop() {
            open.items.push(value);
            if open.items.len() < open.len {
                self.open_arrays.push(open);
                return None;
            }
            value = RespValue::Array(Some(open.items));
        }
        Some(value)
    }
}

impl Default for RespCodec {
    fn default() -> Self { Self::new(DEFAULT_MAX_FRAME_LENGTH) }
}

impl Decoder for RespCodec {
    type Item = RespValue;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if self.open_arrays.len() > MAX_DEPTH {
                return Err(self.fail("maximum nesting depth exceeded"));
            }
            let (token, consumed) = match next_token(src, self.max_frame_length) {
                Ok(Some(parsed)) => parsed,
                Ok(None) => return Ok(None),
                Err(e) => {
                    self.reset();
                    return Err(e);
                }
            };
            self.frame_len += consumed;
            if self.frame_len > self.max_frame_length {
                return Err(self.fail("value exceeds max frame length"));
            }
            src.advance(consumed);
            let value = match token {
                Token::ArrayHeader(len) => {
                    self.open_arrays.push(OpenArray::new(len));
                    continue;
                }
                Token::Value(value) => value,
            };
            if let Some(value) = self.attach(value) {
                self.frame_len = 0;
                return Ok(Some(value));
            }
        }
    }
}

impl Encoder<RespValue> for RespCodec {
    type Error = io::Error;

    fn encode(&mut self, item: RespValue, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_value(&item, dst);
        Ok(())
    }
}
