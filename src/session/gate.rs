use super::{SessionEvent, ARRIVED};
use crate::core::kernel::bus::{EventBus, ListenerId};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::runtime::Handle;

pub type GateCallback = Box<dyn FnOnce() + Send>;

/// Every push command the session has seen since it was created
#[derive(Debug, Default)]
pub struct ArrivalLog {
    seen: Mutex<HashSet<String>>,
}

impl ArrivalLog {
    /// Record an arrival; returns true the first time a command is seen
    pub fn mark(&self, command: &str) -> bool {
        self.seen.lock().insert(command.to_string())
    }

    pub fn has_arrived(&self, command: &str) -> bool {
        self.seen.lock().contains(command)
    }
}

struct GateState {
    pending: HashSet<String>,
    callback: Option<GateCallback>,
    listener: Option<ListenerId>,
}

/// One-time barrier that opens once each requested command has arrived at least once.
///
/// Commands that arrived before the gate was armed count as already seen. The callback
/// always runs on a spawned task, never inside the call that opened the gate.
#[derive(Clone)]
pub struct ReadinessGate {
    state: Arc<Mutex<GateState>>,
}

impl ReadinessGate {
    pub(crate) fn arm<S: AsRef<str>>(
        bus: &Arc<EventBus<SessionEvent>>,
        log: &ArrivalLog,
        runtime: &Handle,
        commands: &[S],
        callback: GateCallback,
    ) -> Self {
        // held until the listener is in place so no arrival slips between the two
        let seen = log.seen.lock();
        let pending: HashSet<String> = commands
            .iter()
            .map(|c| c.as_ref().to_string())
            .filter(|c| !seen.contains(c))
            .collect();

        let gate = Self {
            state: Arc::new(Mutex::new(GateState {
                pending,
                callback: Some(callback),
                listener: None,
            })),
        };

        if gate.state.lock().pending.is_empty() {
            drop(seen);
            gate.open(runtime);
            return gate;
        }

        let state = Arc::clone(&gate.state);
        let weak_bus = Arc::downgrade(bus);
        let handle = runtime.clone();
        let id = bus.on(ARRIVED, move |event| {
            let SessionEvent::Arrived(command) = event else {
                return;
            };
            let mut guard = state.lock();
            if !guard.pending.remove(command) || !guard.pending.is_empty() {
                return;
            }
            if let Some(callback) = guard.callback.take() {
                handle.spawn(async move { callback() });
            }
            if let (Some(id), Some(bus)) = (guard.listener.take(), weak_bus.upgrade()) {
                bus.off(ARRIVED, id);
            }
        });
        drop(seen);

        let mut guard = gate.state.lock();
        if guard.callback.is_some() {
            guard.listener = Some(id);
        } else {
            bus.off(ARRIVED, id);
        }
        drop(guard);

        gate
    }

    /// True once the callback has been scheduled
    pub fn is_open(&self) -> bool {
        self.state.lock().callback.is_none()
    }

    /// Commands still awaited
    pub fn pending(&self) -> Vec<String> {
        let mut pending: Vec<String> = self.state.lock().pending.iter().cloned().collect();
        pending.sort();
        pending
    }

    fn open(&self, runtime: &Handle) {
        if let Some(callback) = self.state.lock().callback.take() {
            runtime.spawn(async move { callback() });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn arrive(bus: &EventBus<SessionEvent>, log: &ArrivalLog, command: &str) {
        log.mark(command);
        bus.trigger(ARRIVED, &SessionEvent::Arrived(command.to_string()));
    }

    fn counter() -> (Arc<AtomicUsize>, GateCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        (
            count,
            Box::new(move || {
                inner.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[tokio::test]
    async fn test_empty_gate_opens_deferred() {
        let bus = Arc::new(EventBus::new());
        let log = ArrivalLog::default();
        let (count, callback) = counter();

        let gate = ReadinessGate::arm(&bus, &log, &Handle::current(), &[] as &[&str], callback);
        assert!(gate.is_open());
        // not run inside arm()
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_waits_for_every_command() {
        let bus = Arc::new(EventBus::new());
        let log = ArrivalLog::default();
        let (count, callback) = counter();

        let gate = ReadinessGate::arm(&bus, &log, &Handle::current(), &["a", "b"], callback);
        arrive(&bus, &log, "b");
        arrive(&bus, &log, "b");
        assert!(!gate.is_open());
        assert_eq!(gate.pending(), vec!["a"]);

        arrive(&bus, &log, "a");
        arrive(&bus, &log, "a");
        assert!(gate.is_open());
        assert_eq!(bus.listener_count(ARRIVED), 0);

        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_history_counts() {
        let bus = Arc::new(EventBus::new());
        let log = ArrivalLog::default();
        arrive(&bus, &log, "ready");

        let (_count, callback) = counter();
        let gate = ReadinessGate::arm(&bus, &log, &Handle::current(), &["ready"], callback);
        assert!(gate.is_open());
        assert_eq!(bus.listener_count(ARRIVED), 0);
    }

    #[tokio::test]
    async fn test_gates_are_independent() {
        let bus = Arc::new(EventBus::new());
        let log = ArrivalLog::default();
        let (_a, first) = counter();
        let (_b, second) = counter();

        let gate_a = ReadinessGate::arm(&bus, &log, &Handle::current(), &["x"], first);
        let gate_b = ReadinessGate::arm(&bus, &log, &Handle::current(), &["x", "y"], second);
        arrive(&bus, &log, "x");

        assert!(gate_a.is_open());
        assert!(!gate_b.is_open());
        assert_eq!(gate_b.pending(), vec!["y"]);
    }
}
