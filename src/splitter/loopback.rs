//! In-process splitter answering connection-level commands inline.
//!
//! `LoopbackSplitter` backs the bundled binary and the integration tests.
//! It answers `PING` and `ECHO` without touching a backend and rejects
//! everything else with an error reply.

use super::{CommandSplitter, Completion, SplitError, SplitRequest, SplitResult};
use crate::resp::RespValue;

/// Splitter that completes every request before `submit` returns.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoopbackSplitter;

impl LoopbackSplitter {
    fn reply(command: &RespValue) -> SplitResult {
        let args = command.command_args().ok_or(SplitError::InvalidRequest)?;
        let name = String::from_utf8_lossy(args[0]).to_ascii_uppercase();
        match (name.as_str(), &args[1..]) {
            ("PING", []) => Ok(RespValue::SimpleString("PONG".into())),
            ("PING", [message]) | ("ECHO", [message]) => Ok(RespValue::bulk(*message)),
            ("PING" | "ECHO", _) => Err(SplitError::Upstream(format!(
                "wrong number of arguments for '{}' command",
                name.to_ascii_lowercase()
            ))),
            _ => Err(SplitError::UnsupportedCommand(name)),
        }
    }
}

impl CommandSplitter for LoopbackSplitter {
    fn submit(&self, command: RespValue, completion: Completion) -> Option<Box<dyn SplitRequest>> {
        completion.complete(Self::reply(&command));
        None
    }
}
