//! Session layer: one reconnecting connection to one endpoint.
//!
//! A [`Session`] multiplexes three kinds of traffic over its connection:
//!
//! - **requests** (`requestID > 0`) correlated with their responses by the
//!   [`RequestRegistry`](requests::RequestRegistry), failing with a timeout error if
//!   no answer arrives in time;
//! - **one-way sends** (`requestID == 0`) that expect nothing back;
//! - **pushes** from the server (`requestID == 0` inbound), dispatched to
//!   [`Session::read`] handlers and recorded for [`Session::wait`].
//!
//! A single driver task owns the transport. When the connection closes, for whatever
//! reason, the driver opens a new one after the configured fixed delay, forever. On
//! every successful connect it publishes `connected`, which replays the subscription
//! set and flushes sends that were issued while disconnected.

pub mod gate;
pub mod requests;
pub mod subscriptions;

use crate::core::config::ChannelConfig;
use crate::core::errors::ChannelError;
use crate::core::kernel::bus::EventBus;
use crate::core::kernel::codec::{sanitize_command, FrameCodec, LineCodec};
use crate::core::kernel::ws::{Transport, TransportFactory};
use crate::core::types::{Endpoint, InboundFrame, RequestId};
use gate::{ArrivalLog, GateCallback, ReadinessGate};
use parking_lot::Mutex;
use requests::{PendingInfo, RequestRegistry};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use subscriptions::{SubscriptionManager, SUBSCRIBE_COMMAND};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Published after every successful (re)connect
pub const CONNECTED: &str = "connected";
/// Published after the live transport is gone
pub const DISCONNECTED: &str = "disconnected";
/// Published for every inbound push, carrying its command name
pub const ARRIVED: &str = "arrived";

/// Topic of pushes for `command`
pub fn read_topic(command: &str) -> String {
    format!("read:{}", command)
}

/// Whole milliseconds, saturating at `u64::MAX`
pub(crate) fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Internal bus payload
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    Push(InboundFrame),
    Arrived(String),
}

enum Control {
    Reconnect,
}

/// Answer handle passed to [`Session::read`] handlers
#[derive(Clone)]
pub struct Reply {
    session: Weak<SessionInner>,
    command: String,
    srv_request_id: RequestId,
}

impl Reply {
    /// True when the server asked for an answer to this push
    pub fn expects_answer(&self) -> bool {
        self.srv_request_id != 0
    }

    /// Answer the server's request; does nothing if no answer was asked for
    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) -> Result<(), ChannelError> {
        if !self.expects_answer() {
            return Ok(());
        }
        let session = self.session.upgrade().ok_or(ChannelError::Closed)?;
        session.send(&self.command, payload, self.srv_request_id)
    }
}

struct SessionInner {
    endpoint: Endpoint,
    codec: Arc<dyn FrameCodec>,
    factory: Arc<dyn TransportFactory>,
    bus: Arc<EventBus<SessionEvent>>,
    requests: Arc<RequestRegistry>,
    subscriptions: SubscriptionManager,
    arrivals: ArrivalLog,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    control: mpsc::UnboundedSender<Control>,
    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
    request_timeout_ms: AtomicU64,
    reconnect_delay: Duration,
    runtime: Handle,
}

/// Handle to a session; clones share the same connection
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.inner.endpoint)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session and start connecting in the background
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        endpoint: Endpoint,
        config: &ChannelConfig,
        factory: Arc<dyn TransportFactory>,
    ) -> Result<Self, ChannelError> {
        Self::with_codec(
            endpoint,
            config,
            factory,
            Arc::new(LineCodec::new(config.encoding)),
        )
    }

    pub fn with_codec(
        endpoint: Endpoint,
        config: &ChannelConfig,
        factory: Arc<dyn TransportFactory>,
        codec: Arc<dyn FrameCodec>,
    ) -> Result<Self, ChannelError> {
        let runtime =
            Handle::try_current().map_err(|e| ChannelError::Runtime(e.to_string()))?;
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let inner = Arc::new(SessionInner {
            endpoint,
            codec,
            factory,
            bus: Arc::new(EventBus::new()),
            requests: Arc::new(RequestRegistry::new(runtime.clone())),
            subscriptions: SubscriptionManager::new(),
            arrivals: ArrivalLog::default(),
            outbound: Mutex::new(None),
            control: control_tx,
            shutdown: shutdown_tx,
            closed: AtomicBool::new(false),
            request_timeout_ms: AtomicU64::new(saturating_millis(config.request_timeout)),
            reconnect_delay: config.reconnect_delay,
            runtime: runtime.clone(),
        });

        // first `connected` listener: subscriptions go out before anything else
        let weak = Arc::downgrade(&inner);
        inner.bus.on(CONNECTED, move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.replay_subscriptions();
            }
        });

        runtime.spawn(SessionInner::drive(
            Arc::clone(&inner),
            control_rx,
            shutdown_rx,
        ));

        Ok(Self { inner })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.inner.outbound.lock().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// True if both handles refer to the same session
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Send a frame. With `request_id == 0` this is a one-way send.
    ///
    /// While disconnected the frame is held until the next `connected` event, then
    /// written once.
    pub fn send<T: Serialize + ?Sized>(
        &self,
        command: &str,
        payload: &T,
        request_id: RequestId,
    ) -> Result<(), ChannelError> {
        self.inner.send(command, payload, request_id)
    }

    /// Register a persistent handler for server pushes of `command`
    pub fn read<F>(&self, command: &str, handler: F)
    where
        F: Fn(Value, Reply) + Send + Sync + 'static,
    {
        let session = Arc::downgrade(&self.inner);
        let reply_command = command.to_string();
        self.inner.bus.on(read_topic(command), move |event| {
            if let SessionEvent::Push(frame) = event {
                let reply = Reply {
                    session: session.clone(),
                    command: reply_command.clone(),
                    srv_request_id: frame.srv_request_id,
                };
                handler(frame.data.clone(), reply);
            }
        });
    }

    /// Send a request and get its answer through `on_done`
    ///
    /// `timeout` of `None` uses the session default; a zero timeout waits forever.
    /// `on_done` runs exactly once, with the response data or with an error.
    pub fn request<T, F>(
        &self,
        command: &str,
        payload: &T,
        on_done: F,
        timeout: Option<Duration>,
    ) -> Result<RequestId, ChannelError>
    where
        T: Serialize + ?Sized,
        F: FnOnce(Result<Value, ChannelError>) + Send + 'static,
    {
        let inner = &self.inner;
        inner.ensure_open()?;

        let command = sanitize_command(command);
        let payload = serde_json::to_value(payload)?;
        let timeout = timeout.unwrap_or_else(|| self.request_timeout());

        let request_id = inner.requests.next_id();
        let message = inner.codec.encode(request_id, &command, &payload)?;
        inner.requests.register(
            request_id,
            command.as_str(),
            Box::new(on_done),
            (!timeout.is_zero()).then_some(timeout),
        );
        inner.dispatch(message);

        Ok(request_id)
    }

    /// [`request`](Self::request) as a future
    pub async fn request_async<T: Serialize + ?Sized>(
        &self,
        command: &str,
        payload: &T,
        timeout: Option<Duration>,
    ) -> Result<Value, ChannelError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            command,
            payload,
            move |result| {
                let _ = tx.send(result);
            },
            timeout,
        )?;
        rx.await.map_err(|_| ChannelError::Closed)?
    }

    /// Set the default request timeout; zero disables it
    pub fn set_request_timeout(&self, timeout: Duration) {
        self.inner
            .request_timeout_ms
            .store(saturating_millis(timeout), Ordering::SeqCst);
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.inner.request_timeout_ms.load(Ordering::SeqCst))
    }

    /// Ask the server to push `command`, now if connected and again after every reconnect
    pub fn subscribe(&self, command: &str) -> Result<(), ChannelError> {
        let inner = &self.inner;
        inner.ensure_open()?;
        // once replayed on this connection, later subscriptions go out directly
        if inner.subscriptions.add(command) {
            inner.send(SUBSCRIBE_COMMAND, command, 0)?;
        }
        Ok(())
    }

    /// Stop receiving pushes of `command`
    ///
    /// There is no unsubscribe command on the wire: the server forgets subscriptions
    /// with the connection, so a connected session drops its transport and the regular
    /// reconnect replays what is left of the set.
    pub fn unsubscribe(&self, command: &str) -> bool {
        let removed = self.inner.subscriptions.remove(command);
        if removed && self.is_connected() {
            let _ = self.inner.control.send(Control::Reconnect);
        }
        removed
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.subscriptions.snapshot()
    }

    /// Run `callback` once every command in `commands` has arrived at least once
    pub fn wait<S, F>(&self, commands: &[S], callback: F) -> ReadinessGate
    where
        S: AsRef<str>,
        F: FnOnce() + Send + 'static,
    {
        let inner = &self.inner;
        let callback: GateCallback = Box::new(callback);
        ReadinessGate::arm(
            &inner.bus,
            &inner.arrivals,
            &inner.runtime,
            commands,
            callback,
        )
    }

    /// [`wait`](Self::wait) as a future
    pub async fn wait_async<S: AsRef<str>>(&self, commands: &[S]) {
        let (tx, rx) = oneshot::channel();
        self.wait(commands, move || {
            let _ = tx.send(());
        });
        let _ = rx.await;
    }

    /// True if a push of `command` has arrived since the session was created
    pub fn has_arrived(&self, command: &str) -> bool {
        self.inner.arrivals.has_arrived(command)
    }

    /// Run `handler` after every successful (re)connect
    pub fn on_connect<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.bus.on(CONNECTED, move |_| handler());
    }

    /// Run `handler` every time the live connection is lost
    pub fn on_disconnect<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.bus.on(DISCONNECTED, move |_| handler());
    }

    pub fn pending_requests(&self) -> Vec<PendingInfo> {
        self.inner.requests.pending()
    }

    /// Stop reconnecting and close the live connection
    ///
    /// Pending requests are left to their timeouts.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            info!(endpoint = %self.inner.endpoint, "Closing session");
            self.inner.shutdown.send_replace(true);
        }
    }
}

impl SessionInner {
    fn ensure_open(&self) -> Result<(), ChannelError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }
        Ok(())
    }

    fn send<T: Serialize + ?Sized>(
        self: &Arc<Self>,
        command: &str,
        payload: &T,
        request_id: RequestId,
    ) -> Result<(), ChannelError> {
        self.ensure_open()?;
        let payload = serde_json::to_value(payload)?;
        let message = self.codec.encode(request_id, command, &payload)?;
        self.dispatch(message);
        Ok(())
    }

    /// Write now if connected, otherwise once on the next `connected` event
    fn dispatch(self: &Arc<Self>, message: Message) {
        let outbound = self.outbound.lock();
        if let Some(tx) = outbound.as_ref() {
            if tx.send(message).is_err() {
                debug!(endpoint = %self.endpoint, "Connection closing, frame dropped");
            }
            return;
        }

        // registered under the lock: the driver cannot attach a writer in between
        let weak = Arc::downgrade(self);
        let deferred = Mutex::new(Some(message));
        self.bus.one(CONNECTED, move |_| {
            if let (Some(inner), Some(message)) = (weak.upgrade(), deferred.lock().take()) {
                inner.write_now(message);
            }
        });
        drop(outbound);
    }

    fn write_now(&self, message: Message) {
        let sent = self
            .outbound
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(message).is_ok());
        if !sent {
            debug!(endpoint = %self.endpoint, "Deferred frame dropped");
        }
    }

    fn replay_subscriptions(self: &Arc<Self>) {
        let commands = self.subscriptions.activate();
        if commands.is_empty() {
            return;
        }
        debug!(endpoint = %self.endpoint, count = commands.len(), "Replaying subscriptions");
        for command in commands {
            if let Err(e) = self.send(SUBSCRIBE_COMMAND, &command, 0) {
                warn!(endpoint = %self.endpoint, command = %command, "Failed to resubscribe: {}", e);
            }
        }
    }

    fn on_message(&self, message: Message) {
        let frame = match self.codec.decode(message) {
            Ok(Some(frame)) => frame,
            Ok(None) => return,
            Err(e) => {
                debug!(endpoint = %self.endpoint, "Dropping frame: {}", e);
                return;
            }
        };

        if frame.is_response() {
            self.requests
                .resolve(&frame.command, frame.request_id, frame.data);
            return;
        }

        let command = frame.command.clone();
        self.bus
            .trigger(&read_topic(&command), &SessionEvent::Push(frame));
        self.arrivals.mark(&command);
        self.bus.trigger(ARRIVED, &SessionEvent::Arrived(command));
    }

    fn attach(&self, tx: mpsc::UnboundedSender<Message>) {
        *self.outbound.lock() = Some(tx);
    }

    fn detach(&self) {
        self.subscriptions.deactivate();
        self.outbound.lock().take();
    }

    /// Defer frames queued for a connection that ended before writing them
    fn requeue(self: &Arc<Self>, rx: &mut mpsc::UnboundedReceiver<Message>) {
        let mut count = 0usize;
        while let Ok(message) = rx.try_recv() {
            self.dispatch(message);
            count += 1;
        }
        if count > 0 {
            debug!(endpoint = %self.endpoint, count, "Unsent frames deferred to next connection");
        }
    }

    /// Connection loop: connect, serve until the transport ends, wait, repeat.
    async fn drive(
        inner: Arc<Self>,
        mut control: mpsc::UnboundedReceiver<Control>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let endpoint = inner.endpoint.clone();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let mut transport = inner.factory.create(&endpoint);
            let connected = tokio::select! {
                result = transport.connect() => result,
                _ = shutdown.changed() => break,
            };

            match connected {
                Ok(()) => {
                    // reconnect requests aimed at an earlier connection
                    while control.try_recv().is_ok() {}

                    let (tx, mut rx) = mpsc::unbounded_channel();
                    inner.attach(tx);
                    info!(endpoint = %endpoint, "Connected");
                    inner.bus.trigger(CONNECTED, &SessionEvent::Connected);

                    let stop = Self::serve(
                        &inner,
                        transport.as_mut(),
                        &mut rx,
                        &mut control,
                        &mut shutdown,
                    )
                    .await;

                    inner.detach();
                    if !stop {
                        inner.requeue(&mut rx);
                    }
                    let _ = transport.close().await;
                    inner.bus.trigger(DISCONNECTED, &SessionEvent::Disconnected);
                    if stop {
                        break;
                    }
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, "Connection failed: {}", e);
                }
            }

            info!(
                endpoint = %endpoint,
                delay_ms = inner.reconnect_delay.as_millis() as u64,
                "Reconnecting"
            );
            tokio::select! {
                () = tokio::time::sleep(inner.reconnect_delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        inner.detach();
        info!(endpoint = %endpoint, "Session stopped");
    }

    /// Pump one live connection; returns true when the session is shutting down
    async fn serve(
        inner: &Arc<Self>,
        transport: &mut dyn Transport,
        outbound: &mut mpsc::UnboundedReceiver<Message>,
        control: &mut mpsc::UnboundedReceiver<Control>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        loop {
            tokio::select! {
                Some(message) = outbound.recv() => {
                    if let Err(e) = transport.send_raw(message).await {
                        warn!(endpoint = %inner.endpoint, "Write failed: {}", e);
                        return false;
                    }
                }
                inbound = transport.next_raw() => match inbound {
                    Some(Ok(message)) => inner.on_message(message),
                    Some(Err(e)) => {
                        warn!(endpoint = %inner.endpoint, "Connection error: {}", e);
                        return false;
                    }
                    None => {
                        info!(endpoint = %inner.endpoint, "Connection closed");
                        return false;
                    }
                },
                Some(Control::Reconnect) = control.recv() => {
                    info!(endpoint = %inner.endpoint, "Dropping connection to reset subscriptions");
                    return false;
                }
                _ = shutdown.changed() => return true,
            }
        }
    }
}
