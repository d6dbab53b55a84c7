use crate::core::errors::ChannelError;
use crate::core::types::RequestId;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Completion callback of a request: exactly one of data or error
pub type OnDone = Box<dyn FnOnce(Result<Value, ChannelError>) + Send>;

struct PendingRequest {
    command: String,
    on_done: OnDone,
    deadline: Option<Instant>,
    timer: Option<JoinHandle<()>>,
}

/// Snapshot of an in-flight request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInfo {
    pub request_id: RequestId,
    pub command: String,
    pub deadline: Option<Instant>,
}

/// Tracks outstanding requests of one session.
///
/// Every registered request is resolved exactly once: by its response, or by its
/// timeout, whichever removes it from the table first. Later resolutions are no-ops.
pub struct RequestRegistry {
    prev_id: AtomicI64,
    pending: Mutex<HashMap<RequestId, PendingRequest>>,
    runtime: Handle,
}

impl RequestRegistry {
    pub fn new(runtime: Handle) -> Self {
        Self {
            prev_id: AtomicI64::new(0),
            pending: Mutex::new(HashMap::new()),
            runtime,
        }
    }

    /// Assign the next request ID (starts at 1, strictly increasing, never reused)
    pub fn next_id(&self) -> RequestId {
        self.prev_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Register a request under an ID obtained from [`next_id`](Self::next_id)
    ///
    /// With a timeout, a timer is armed that fails the request with
    /// [`ChannelError::RequestTimeout`] unless a response arrives first. A timeout
    /// too large to represent as a deadline arms no timer.
    pub fn register(
        self: &Arc<Self>,
        request_id: RequestId,
        command: impl Into<String>,
        on_done: OnDone,
        timeout: Option<Duration>,
    ) {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        self.pending.lock().insert(
            request_id,
            PendingRequest {
                command: command.into(),
                on_done,
                deadline,
                timer: None,
            },
        );

        let Some(deadline) = deadline else {
            return;
        };
        let registry = Arc::downgrade(self);
        let timer = self.runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(registry) = registry.upgrade() {
                registry.expire(request_id);
            }
        });

        // the timer may already have fired for a very short timeout
        match self.pending.lock().get_mut(&request_id) {
            Some(pending) => pending.timer = Some(timer),
            None => timer.abort(),
        }
    }

    /// Deliver a response; returns false when nothing was waiting for it
    pub fn resolve(&self, command: &str, request_id: RequestId, data: Value) -> bool {
        let pending = {
            let mut table = self.pending.lock();
            let expected = table.get(&request_id).map(|p| p.command.clone());
            match expected {
                Some(expected) if expected == command => table.remove(&request_id),
                Some(expected) => {
                    debug!(
                        request_id,
                        expected = %expected,
                        received = %command,
                        "Response command does not match request"
                    );
                    None
                }
                None => None,
            }
        };

        let Some(pending) = pending else {
            debug!(request_id, command, "Ignoring response with no pending request");
            return false;
        };
        if let Some(timer) = pending.timer {
            timer.abort();
        }
        (pending.on_done)(Ok(data));
        true
    }

    /// Fail a request with a timeout error; returns false if it was already resolved
    pub fn expire(&self, request_id: RequestId) -> bool {
        let Some(pending) = self.pending.lock().remove(&request_id) else {
            return false;
        };
        debug!(request_id, command = %pending.command, "Request timed out");
        (pending.on_done)(Err(ChannelError::RequestTimeout {
            command: pending.command,
        }));
        true
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// In-flight requests ordered by ID
    pub fn pending(&self) -> Vec<PendingInfo> {
        let mut infos: Vec<PendingInfo> = self
            .pending
            .lock()
            .iter()
            .map(|(id, p)| PendingInfo {
                request_id: *id,
                command: p.command.clone(),
                deadline: p.deadline,
            })
            .collect();
        infos.sort_by_key(|info| info.request_id);
        infos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn registry() -> Arc<RequestRegistry> {
        Arc::new(RequestRegistry::new(Handle::current()))
    }

    fn collector() -> (
        mpsc::UnboundedSender<Result<Value, ChannelError>>,
        mpsc::UnboundedReceiver<Result<Value, ChannelError>>,
    ) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn test_ids_strictly_increase() {
        let registry = registry();
        let ids: Vec<RequestId> = (0..5).map(|_| registry.next_id()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_resolve_once() {
        let registry = registry();
        let (tx, mut rx) = collector();
        let id = registry.next_id();
        registry.register(id, "echo", Box::new(move |r| tx.send(r).unwrap()), None);

        assert!(registry.resolve("echo", id, json!(1)));
        assert!(!registry.resolve("echo", id, json!(2)));
        assert!(!registry.expire(id));

        assert_eq!(rx.recv().await.unwrap().unwrap(), json!(1));
        assert!(rx.recv().await.is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_requires_matching_command() {
        let registry = registry();
        let id = registry.next_id();
        registry.register(id, "login", Box::new(|_| {}), None);

        assert!(!registry.resolve("logout", id, json!(null)));
        assert_eq!(registry.len(), 1);
        assert!(registry.resolve("login", id, json!(null)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_late_response() {
        let registry = registry();
        let (tx, mut rx) = collector();
        let id = registry.next_id();
        registry.register(
            id,
            "slow",
            Box::new(move |r| tx.send(r).unwrap()),
            Some(Duration::from_millis(50)),
        );
        assert_eq!(registry.pending()[0].command, "slow");

        let result = rx.recv().await.unwrap();
        match result {
            Err(ChannelError::RequestTimeout { command }) => assert_eq!(command, "slow"),
            other => panic!("Expected timeout, got {:?}", other),
        }
        assert!(!registry.resolve("slow", id, json!("late")));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_disarms_timer() {
        let registry = registry();
        let (tx, mut rx) = collector();
        let id = registry.next_id();
        registry.register(
            id,
            "fast",
            Box::new(move |r| tx.send(r).unwrap()),
            Some(Duration::from_millis(50)),
        );

        assert!(registry.resolve("fast", id, json!("ok")));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(rx.recv().await.unwrap().unwrap(), json!("ok"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_timeout_arms_no_timer() {
        let registry = registry();
        let (tx, mut rx) = collector();
        let id = registry.next_id();
        registry.register(
            id,
            "forever",
            Box::new(move |r| tx.send(r).unwrap()),
            Some(Duration::MAX),
        );
        assert_eq!(registry.pending()[0].deadline, None);

        tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
        assert!(rx.try_recv().is_err());
        assert!(registry.resolve("forever", id, json!("done")));
        assert_eq!(rx.recv().await.unwrap().unwrap(), json!("done"));
    }
}
