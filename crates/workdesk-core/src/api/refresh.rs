//! Single-flight coordination of access-token refreshes.
//!
//! At most one refresh cycle runs per session. The first request to see a
//! 401 leads the cycle; every other request that hits a 401 meanwhile is
//! parked in a FIFO queue together with the channel that resumes it. The
//! flag and the queue only ever change inside one short critical section,
//! never across an `.await`.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::debug;

use super::request::{ApiRequest, ApiResponse};
use super::ApiError;
use crate::utils::lock;

pub(crate) type Resume = oneshot::Sender<Result<ApiResponse, ApiError>>;

/// A request parked until the refresh it is waiting on resolves.
pub(crate) struct PendingRequest {
    pub(crate) request: ApiRequest,
    pub(crate) resume: Resume,
}

#[derive(Default)]
struct RefreshState {
    in_flight: bool,
    pending: VecDeque<PendingRequest>,
}

#[derive(Default)]
pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
}

pub(crate) enum Admission<'a> {
    /// This request starts the cycle and must finish it.
    Leader(RefreshCycle<'a>),
    /// Another cycle is running; the result arrives on this channel.
    Queued(oneshot::Receiver<Result<ApiResponse, ApiError>>),
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_refreshing(&self) -> bool {
        lock(&self.state).in_flight
    }

    pub fn pending_len(&self) -> usize {
        lock(&self.state).pending.len()
    }

    /// Either start a cycle or join the one in flight.
    pub(crate) fn admit(&self, request: ApiRequest) -> Admission<'_> {
        let mut state = lock(&self.state);
        if state.in_flight {
            let (resume, rx) = oneshot::channel();
            state.pending.push_back(PendingRequest { request, resume });
            debug!(queued = state.pending.len(), "Refresh in flight, request queued");
            Admission::Queued(rx)
        } else {
            state.in_flight = true;
            Admission::Leader(RefreshCycle {
                coordinator: self,
                finished: false,
            })
        }
    }
}

/// The leader's hold on the running cycle.
///
/// The in-flight flag is cleared only by `next_batch` observing an empty
/// queue, by `fail`, or by dropping the cycle (which aborts it).
pub(crate) struct RefreshCycle<'a> {
    coordinator: &'a RefreshCoordinator,
    finished: bool,
}

impl RefreshCycle<'_> {
    /// Everything queued so far, oldest first. `None` once the queue is
    /// empty, at which point the cycle is over.
    pub(crate) fn next_batch(&mut self) -> Option<Vec<PendingRequest>> {
        let mut state = lock(&self.coordinator.state);
        if state.pending.is_empty() {
            state.in_flight = false;
            self.finished = true;
            None
        } else {
            Some(state.pending.drain(..).collect())
        }
    }

    /// End the cycle and reject every queued request with `err`.
    pub(crate) fn fail(mut self, err: &ApiError) {
        self.reject_all(err);
    }

    fn reject_all(&mut self, err: &ApiError) {
        let pending = {
            let mut state = lock(&self.coordinator.state);
            state.in_flight = false;
            std::mem::take(&mut state.pending)
        };
        self.finished = true;
        if !pending.is_empty() {
            debug!(rejected = pending.len(), error = %err, "Rejecting queued requests");
        }
        for entry in pending {
            let _ = entry.resume.send(Err(err.clone()));
        }
    }
}

impl Drop for RefreshCycle<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.reject_all(&ApiError::Aborted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_admission_is_queued() {
        let coordinator = RefreshCoordinator::new();
        let leader = coordinator.admit(ApiRequest::get("http://x/1"));
        assert!(matches!(leader, Admission::Leader(_)));
        assert!(coordinator.is_refreshing());

        let queued = coordinator.admit(ApiRequest::get("http://x/2"));
        assert!(matches!(queued, Admission::Queued(_)));
        assert_eq!(coordinator.pending_len(), 1);
        drop(queued);
        drop(leader);
    }

    #[test]
    fn test_batches_drain_in_fifo_order_then_flag_clears() {
        let coordinator = RefreshCoordinator::new();
        let Admission::Leader(mut cycle) = coordinator.admit(ApiRequest::get("http://x/0")) else {
            panic!("first admission must lead");
        };
        let _rx: Vec<_> = (1..=3)
            .map(|i| coordinator.admit(ApiRequest::get(format!("http://x/{}", i))))
            .collect();

        let batch = cycle.next_batch().expect("queued requests");
        let urls: Vec<_> = batch.iter().map(|p| p.request.url().to_string()).collect();
        assert_eq!(urls, vec!["http://x/1", "http://x/2", "http://x/3"]);
        assert!(coordinator.is_refreshing());

        assert!(cycle.next_batch().is_none());
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_fail_rejects_every_queued_request() {
        let coordinator = RefreshCoordinator::new();
        let Admission::Leader(cycle) = coordinator.admit(ApiRequest::get("http://x/0")) else {
            panic!("first admission must lead");
        };
        let Admission::Queued(rx) = coordinator.admit(ApiRequest::get("http://x/1")) else {
            panic!("second admission must queue");
        };

        cycle.fail(&ApiError::NoRefreshToken);
        assert!(matches!(rx.await.unwrap(), Err(ApiError::NoRefreshToken)));
        assert!(!coordinator.is_refreshing());
        assert_eq!(coordinator.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_dropped_leader_aborts_queue() {
        let coordinator = RefreshCoordinator::new();
        let leader = coordinator.admit(ApiRequest::get("http://x/0"));
        let Admission::Queued(rx) = coordinator.admit(ApiRequest::get("http://x/1")) else {
            panic!("second admission must queue");
        };

        drop(leader);
        assert!(matches!(rx.await.unwrap(), Err(ApiError::Aborted)));
        assert!(!coordinator.is_refreshing());
    }
}
