//! RESP value type shared by commands and replies.

use std::fmt;

/// A single RESP2 value.
///
/// Commands arrive as arrays of bulk strings; replies may take any shape.
/// Null bulk strings (`$-1`) and null arrays (`*-1`) are carried as `None`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RespValue {
    /// Simple string prefixed with `+`.
    SimpleString(String),
    /// Error prefixed with `-`.
    Error(String),
    /// Integer prefixed with `:`.
    Integer(i64),
    /// Bulk string prefixed with `$`.
    BulkString(Option<Vec<u8>>),
    /// Array prefixed with `*`.
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// Build a non-null bulk string.
    #[must_use]
    pub fn bulk(data: impl Into<Vec<u8>>) -> Self { Self::BulkString(Some(data.into())) }

    /// Build an error reply from any displayable message.
    #[must_use]
    pub fn error(message: impl fmt::Display) -> Self { Self::Error(message.to_string()) }

    /// Build a command array from its arguments.
    ///
    /// # Examples
    ///
    /// ```
    /// use redis_proxy::resp::RespValue;
    ///
    /// let cmd = RespValue::command(["GET", "foo"]);
    /// assert_eq!(cmd.command_name().as_deref(), Some("GET"));
    /// ```
    #[must_use]
    pub fn command<I, A>(args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Vec<u8>>,
    {
        Self::Array(Some(args.into_iter().map(Self::bulk).collect()))
    }

    /// Returns `true` for error replies.
    #[must_use]
    pub fn is_error(&self) -> bool { matches!(self, Self::Error(_)) }

    /// Arguments of a command array, or `None` if the value is not a
    /// non-empty array of bulk strings.
    #[must_use]
    pub fn command_args(&self) -> Option<Vec<&[u8]>> {
        let Self::Array(Some(items)) = self else {
            return None;
        };
        if items.is_empty() {
            return None;
        }
        items
            .iter()
            .map(|item| match item {
                Self::BulkString(Some(data)) => Some(data.as_slice()),
                _ => None,
            })
            .collect()
    }

    /// Upper-cased command name of a command array.
    #[must_use]
    pub fn command_name(&self) -> Option<String> {
        let args = self.command_args()?;
        let name = args.first()?;
        Some(String::from_utf8_lossy(name).to_ascii_uppercase())
    }
}

impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SimpleString(text) => write!(f, "\"{text}\""),
            Self::Error(text) => write!(f, "(error) {text}"),
            Self::Integer(value) => write!(f, "(integer) {value}"),
            Self::BulkString(None) | Self::Array(None) => f.write_str("(nil)"),
            Self::BulkString(Some(data)) => write!(f, "\"{}\"", String::from_utf8_lossy(data)),
            Self::Array(Some(items)) => {
                f.write_str("[")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}
