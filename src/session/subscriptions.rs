use parking_lot::Mutex;

/// Control command asking the server to push a notification type
pub const SUBSCRIBE_COMMAND: &str = "subscribe";

#[derive(Debug, Default)]
struct SubscriptionSet {
    commands: Vec<String>,
    live: bool,
}

/// Durable set of pushed notification types, in first-subscribed order.
///
/// Survives reconnects; the session replays it in full on every `connected` event.
/// The set is *live* between that replay and the end of the connection: taking the
/// replay snapshot and flipping the flag happen under one lock, so a command added
/// concurrently is sent either by the replay or by its caller, never by both.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    set: Mutex<SubscriptionSet>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `command`; returns true if the caller must send it now because the
    /// current connection has already been replayed
    pub fn add(&self, command: &str) -> bool {
        let mut set = self.set.lock();
        if !set.commands.iter().any(|c| c == command) {
            set.commands.push(command.to_string());
        }
        set.live
    }

    /// Returns true if the command was in the set
    pub fn remove(&self, command: &str) -> bool {
        let mut set = self.set.lock();
        let before = set.commands.len();
        set.commands.retain(|c| c != command);
        set.commands.len() != before
    }

    pub fn contains(&self, command: &str) -> bool {
        self.set.lock().commands.iter().any(|c| c == command)
    }

    /// Commands to replay on a fresh connection; the set is live afterwards
    pub fn activate(&self) -> Vec<String> {
        let mut set = self.set.lock();
        set.live = true;
        set.commands.clone()
    }

    /// The connection is gone; new commands wait for the next replay
    pub fn deactivate(&self) {
        self.set.lock().live = false;
    }

    pub fn is_live(&self) -> bool {
        self.set.lock().live
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.set.lock().commands.clone()
    }

    pub fn len(&self) -> usize {
        self.set.lock().commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.lock().commands.is_empty()
    }
}
