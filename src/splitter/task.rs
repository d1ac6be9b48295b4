//! Splitter adapter that runs each command as a tokio task.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::task::AbortHandle;

use super::{CommandSplitter, Completion, SplitRequest, SplitResult};
use crate::resp::RespValue;

/// Async handler invoked once per command.
pub type CommandHandler = Arc<dyn Fn(RespValue) -> BoxFuture<'static, SplitResult> + Send + Sync>;

/// [`CommandSplitter`] that spawns `handler(command)` on the current tokio
/// runtime and delivers its output as the completion.
///
/// Cancelling the returned request aborts the task. Submission must happen
/// from within a runtime context.
///
/// # Examples
///
/// ```
/// use futures::FutureExt;
/// use redis_proxy::{resp::RespValue, splitter::TaskSplitter};
///
/// let splitter = TaskSplitter::new(|command: RespValue| async move { Ok(command) }.boxed());
/// # drop(splitter);
/// ```
#[derive(Clone)]
pub struct TaskSplitter {
    handler: CommandHandler,
}

impl TaskSplitter {
    /// Wrap an async handler.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(RespValue) -> BoxFuture<'static, SplitResult> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
        }
    }
}

impl std::fmt::Debug for TaskSplitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSplitter").finish_non_exhaustive()
    }
}

struct TaskRequest {
    abort: AbortHandle,
}

impl SplitRequest for TaskRequest {
    fn cancel(self: Box<Self>) { self.abort.abort(); }
}

impl CommandSplitter for TaskSplitter {
    fn submit(&self, command: RespValue, completion: Completion) -> Option<Box<dyn SplitRequest>> {
        let work = (self.handler)(command);
        let handle = tokio::spawn(async move {
            let result = work.await;
            completion.complete(result);
        });
        Some(Box::new(TaskRequest {
            abort: handle.abort_handle(),
        }))
    }
}
