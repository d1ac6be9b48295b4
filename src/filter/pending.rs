//! In-flight request tracking.
//!
//! Requests live in a ring ordered by arrival. Each is addressed by a
//! [`RequestToken`] whose sequence number is its position in the stream of
//! all requests ever admitted on the connection, so a token resolves to a
//! ring slot by subtracting the sequence of the current head. Tokens below
//! the head belong to requests that were already retired or cancelled and
//! resolve to nothing.

use std::collections::VecDeque;

use crate::{
    metrics::ActiveRequest,
    splitter::{RequestToken, SplitRequest, SplitResult},
};

/// Lifecycle of one submitted command.
pub(crate) struct PendingRequest {
    request: Option<Box<dyn SplitRequest>>,
    response: Option<SplitResult>,
    _active: ActiveRequest,
}

impl PendingRequest {
    pub(crate) fn new(active: ActiveRequest) -> Self {
        Self {
            request: None,
            response: None,
            _active: active,
        }
    }

    pub(crate) fn is_complete(&self) -> bool { self.response.is_some() }

    /// Store the splitter's handle for later cancellation.
    pub(crate) fn attach(&mut self, request: Option<Box<dyn SplitRequest>>) {
        if self.is_complete() {
            return;
        }
        self.request = request;
    }

    /// Record the reply. Returns `false` if one was already recorded.
    pub(crate) fn complete(&mut self, result: SplitResult) -> bool {
        if self.is_complete() {
            return false;
        }
        // The request has finished; its handle is released without cancelling.
        self.request = None;
        self.response = Some(result);
        true
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        if let Some(request) = self.request.take() {
            request.cancel();
        }
    }
}

/// Arrival-ordered ring of pending requests.
#[derive(Default)]
pub(crate) struct PendingQueue {
    entries: VecDeque<PendingRequest>,
    head: u64,
}

impl PendingQueue {
    pub(crate) fn len(&self) -> usize { self.entries.len() }

    /// Append a request at the tail and return its token.
    pub(crate) fn push(&mut self, request: PendingRequest) -> RequestToken {
        let token = RequestToken(self.head + self.entries.len() as u64);
        self.entries.push_back(request);
        token
    }

    pub(crate) fn get_mut(&mut self, token: RequestToken) -> Option<&mut PendingRequest> {
        let offset = token.0.checked_sub(self.head)?;
        let index = usize::try_from(offset).ok()?;
        self.entries.get_mut(index)
    }

    /// Remove the head if it has completed and return its reply.
    pub(crate) fn pop_completed(&mut self) -> Option<SplitResult> {
        if !self.entries.front()?.is_complete() {
            return None;
        }
        let mut entry = self.entries.pop_front()?;
        self.head += 1;
        entry.response.take()
    }

    /// Drop every request, cancelling those still pending.
    ///
    /// Returns the number of requests that were cancelled.
    pub(crate) fn cancel_all(&mut self) -> usize {
        self.head += self.entries.len() as u64;
        self.entries
            .drain(..)
            .filter(|entry| !entry.is_complete())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use rstest::{fixture, rstest};

    use super::*;
    use crate::{metrics::ProxyStats, resp::RespValue};

    struct Counted(Arc<AtomicUsize>);

    impl SplitRequest for Counted {
        fn cancel(self: Box<Self>) { self.0.fetch_add(1, Ordering::SeqCst); }
    }

    #[fixture]
    fn stats() -> ProxyStats { ProxyStats::new("pending_test") }

    fn entry(stats: &ProxyStats, cancels: &Arc<AtomicUsize>) -> PendingRequest {
        let mut entry = PendingRequest::new(ActiveRequest::new(stats));
        entry.attach(Some(Box::new(Counted(Arc::clone(cancels)))));
        entry
    }

    #[rstest]
    fn tokens_increase_monotonically(stats: ProxyStats) {
        let cancels = Arc::new(AtomicUsize::new(0));
        let mut queue = PendingQueue::default();
        let first = queue.push(entry(&stats, &cancels));
        let second = queue.push(entry(&stats, &cancels));
        assert!(second > first);

        queue.cancel_all();
        let third = queue.push(entry(&stats, &cancels));
        assert!(third > second);
    }

    #[rstest]
    fn pops_only_completed_head(stats: ProxyStats) {
        let cancels = Arc::new(AtomicUsize::new(0));
        let mut queue = PendingQueue::default();
        let first = queue.push(entry(&stats, &cancels));
        let second = queue.push(entry(&stats, &cancels));

        assert!(queue.get_mut(second).expect("live").complete(Ok(RespValue::Integer(2))));
        assert!(queue.pop_completed().is_none());

        assert!(queue.get_mut(first).expect("live").complete(Ok(RespValue::Integer(1))));
        assert_eq!(queue.pop_completed(), Some(Ok(RespValue::Integer(1))));
        assert_eq!(queue.pop_completed(), Some(Ok(RespValue::Integer(2))));
        assert_eq!(queue.len(), 0);
        assert_eq!(cancels.load(Ordering::SeqCst), 0);
    }

    #[rstest]
    fn retired_tokens_resolve_to_nothing(stats: ProxyStats) {
        let cancels = Arc::new(AtomicUsize::new(0));
        let mut queue = PendingQueue::default();
        let first = queue.push(entry(&stats, &cancels));
        queue.get_mut(first).expect("live").complete(Ok(RespValue::Integer(1)));
        queue.pop_completed();
        queue.push(entry(&stats, &cancels));

        assert!(queue.get_mut(first).is_none());
        assert!(queue.get_mut(RequestToken(99)).is_none());
    }

    #[rstest]
    fn second_completion_is_rejected(stats: ProxyStats) {
        let cancels = Arc::new(AtomicUsize::new(0));
        let mut queue = PendingQueue::default();
        let token = queue.push(entry(&stats, &cancels));
        let slot = queue.get_mut(token).expect("live");
        assert!(slot.complete(Ok(RespValue::Integer(1))));
        assert!(!slot.complete(Ok(RespValue::Integer(2))));
        assert_eq!(queue.pop_completed(), Some(Ok(RespValue::Integer(1))));
    }

    #[rstest]
    fn cancel_all_cancels_pending_entries_once(stats: ProxyStats) {
        let cancels = Arc::new(AtomicUsize::new(0));
        let mut queue = PendingQueue::default();
        let done = queue.push(entry(&stats, &cancels));
        queue.push(entry(&stats, &cancels));
        queue.push(entry(&stats, &cancels));
        queue.get_mut(done).expect("live").complete(Ok(RespValue::Integer(0)));

        assert_eq!(queue.cancel_all(), 2);
        assert_eq!(cancels.load(Ordering::SeqCst), 2);
        assert_eq!(queue.cancel_all(), 0);
        assert_eq!(cancels.load(Ordering::SeqCst), 2);
        assert!(queue.get_mut(done).is_none());
    }
}
