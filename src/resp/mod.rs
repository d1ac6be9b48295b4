//! Redis Serialization Protocol (RESP2) support.
//!
//! The proxy filter consumes these as its decoder and encoder
//! capabilities through the `tokio_util` codec traits.

mod codec;
mod encode;
mod parse;
mod value;

pub use codec::{DEFAULT_MAX_FRAME_LENGTH, RespCodec};
pub use encode::{encode_value, encoded_len};
pub use parse::{MAX_ARRAY_ELEMENTS, MAX_DEPTH, parse_value};
pub use value::RespValue;
