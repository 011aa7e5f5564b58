//! Session layer on top of the transport.
//!
//! This module implements request/response correlation and event dispatch:
//!
//! - Generating unique request ids
//! - Correlating responses with pending requests
//! - Buffering caller activity until the driver handshake completes
//! - Tracking remote object initializers across create/dispose lifecycle
//!   events
//! - Fanning out unsolicited events to guid subscribers
//!
//! # Message flow
//!
//! 1. Caller invokes [`Connection::send`] with guid, method, and params
//! 2. Connection assigns the next id and registers a oneshot waiter
//! 3. The request is serialized and queued for the transport writer
//! 4. Caller awaits the oneshot, bounded by the call deadline plus grace
//! 5. The dispatch loop receives the response from the transport
//! 6. The waiter is removed and completed; at most one delivery per id
//!
//! # Session phases
//!
//! The connection starts `Pending`: the `initialize` request is sent
//! immediately, but caller requests, subscribes, and inbound messages are
//! queued. The lifecycle `create` event for the well-known root guid flips
//! the session to `Started`, drains the postponed queue in original order,
//! and replays held inbound messages in arrival order. There is no
//! transition out of `Started`.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use drover_protocol::{ErrorPayload, Event, Message, Metadata, Request};
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportParts, TransportReceiver};


/// Guid of the root driver object whose `create` event completes the
/// handshake.
pub const ROOT_GUID: &str = "Root";

/// Default remote-side call deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// The local wait for a response is the remote deadline inflated by this
/// factor; the driver is expected to report its own timeout first.
const RESPONSE_GRACE_MULTIPLIER: u64 = 2;

/// Floor for the local wait, so a tiny requested deadline cannot starve the
/// delivery of a nearly-on-time driver response.
const MIN_RESPONSE_WAIT_MS: u64 = 500;

/// Collaborator receiving driver console output and page errors.
///
/// When configured on a [`Connection`], the `console` and `page_error`
/// events are diverted here instead of being fanned out to subscribers.
/// Without a logger they are dropped.
pub trait DriverLogger: Send + Sync {
    fn log(&self, level: &str, text: &str, raw: &Event);
}

/// Session phase. `Started` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pending,
    Started,
}

/// Caller activity queued while the session is `Pending`.
enum Postponed {
    /// A serialized request awaiting the transition to `Started`.
    Send(Value),
    /// A subscription awaiting registration.
    Subscribe(Arc<str>, mpsc::UnboundedSender<Event>),
}

/// Phase plus the two FIFO queues drained on transition.
struct SessionState {
    phase: Phase,
    postponed: Vec<Postponed>,
    held_inbound: VecDeque<Message>,
}

/// Pending request waiters keyed by request id.
type CallbackMap = Arc<Mutex<HashMap<u32, oneshot::Sender<Result<Value>>>>>;

/// RAII guard reaping the waiter entry when a request future is dropped
/// without completing, so locally timed-out calls do not accumulate orphaned
/// entries.
struct CancelGuard {
    id: u32,
    callbacks: CallbackMap,
    completed: bool,
}

impl CancelGuard {
    fn new(id: u32, callbacks: CallbackMap) -> Self {
        Self {
            id,
            callbacks,
            completed: false,
        }
    }

    fn complete(&mut self) {
        self.completed = true;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        if self.callbacks.lock().remove(&self.id).is_some() {
            tracing::debug!(id = self.id, "reaped pending call with no response");
        }
    }
}

/// Future returned by [`Connection::send`] with automatic waiter cleanup.
struct ResponseFuture {
    rx: oneshot::Receiver<Result<Value>>,
    guard: CancelGuard,
}

impl Future for ResponseFuture {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(result) => {
                self.guard.complete();
                Poll::Ready(result.map_err(|_| Error::ChannelClosed).and_then(|r| r))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// The session: one per driver subprocess, shared by many concurrent
/// callers.
pub struct Connection {
    /// Sequential request id counter. Ids start at 1.
    last_id: AtomicU32,
    /// Pending request waiters keyed by request id.
    callbacks: CallbackMap,
    /// Queue feeding the transport writer task.
    outbound_tx: mpsc::UnboundedSender<Value>,
    /// Transport sender, taken by `run()` to start the writer task.
    transport_sender: Mutex<Option<Box<dyn Transport>>>,
    /// Transport receiver, taken by `run()` to start the reader task.
    transport_receiver: Mutex<Option<Box<dyn TransportReceiver>>>,
    /// Inbound message channel, taken by `run()`.
    message_rx: Mutex<Option<mpsc::UnboundedReceiver<Value>>>,
    /// Writer-side of the outbound queue, taken by `run()`.
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Value>>>,
    /// Session phase and the queues drained on transition.
    state: Mutex<SessionState>,
    /// Initializer registry: guid -> initializer payload, create to dispose.
    initializers: Mutex<HashMap<Arc<str>, Value>>,
    /// Subscriber registry: guid -> endpoints, exact-guid addressing.
    subscribers: Mutex<HashMap<Arc<str>, Vec<mpsc::UnboundedSender<Event>>>>,
    /// Optional sink for diverted console/page-error events.
    logger: Mutex<Option<Arc<dyn DriverLogger>>>,
    /// Deadline applied when a caller does not supply `params.timeout`.
    default_timeout: Duration,
}

impl Connection {
    /// Creates a connection over the given transport and immediately queues
    /// the `initialize` handshake request.
    pub fn new(parts: TransportParts) -> Self {
        Self::with_default_timeout(parts, DEFAULT_TIMEOUT)
    }

    /// Like [`new`](Self::new) with an explicit default call deadline.
    pub fn with_default_timeout(parts: TransportParts, default_timeout: Duration) -> Self {
        let TransportParts {
            sender,
            receiver,
            message_rx,
        } = parts;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let connection = Self {
            last_id: AtomicU32::new(1),
            callbacks: Arc::new(Mutex::new(HashMap::new())),
            outbound_tx,
            transport_sender: Mutex::new(Some(sender)),
            transport_receiver: Mutex::new(Some(receiver)),
            message_rx: Mutex::new(Some(message_rx)),
            outbound_rx: Mutex::new(Some(outbound_rx)),
            state: Mutex::new(SessionState {
                phase: Phase::Pending,
                postponed: Vec::new(),
                held_inbound: VecDeque::new(),
            }),
            initializers: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            logger: Mutex::new(None),
            default_timeout,
        };

        connection.send_initialize();
        connection
    }

    /// Installs the sink for diverted driver log events.
    pub fn set_logger(&self, logger: Arc<dyn DriverLogger>) {
        *self.logger.lock() = Some(logger);
    }

    /// True once the root `create` event has been processed.
    pub fn is_started(&self) -> bool {
        self.state.lock().phase == Phase::Started
    }

    fn next_id(&self) -> u32 {
        self.last_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Queues the handshake request. Its reply is consumed and discarded:
    /// the waiter is registered so the response routes cleanly, but nobody
    /// awaits it. Sent directly, bypassing the postponed queue.
    fn send_initialize(&self) {
        let id = self.next_id();
        let (tx, _rx) = oneshot::channel();
        self.callbacks.lock().insert(id, tx);

        let request = Request {
            id,
            guid: Arc::from(""),
            method: "initialize".to_string(),
            params: json!({
                "sdk_language": "rust",
                "timeout": self.default_timeout.as_millis() as u64,
            }),
            metadata: Metadata::now(),
        };

        match serde_json::to_value(&request) {
            Ok(value) => {
                let _ = self.outbound_tx.send(value);
            }
            Err(e) => tracing::error!("failed to encode initialize request: {e}"),
        }
    }

    /// Sends a request to the driver and awaits its response.
    ///
    /// `params` must be a JSON object or null. A missing `params.timeout` is
    /// filled with the connection default; the same deadline, inflated by a
    /// grace factor, bounds the local wait. A lapsed local wait returns
    /// [`Error::Timeout`]; a driver-reported error returns
    /// [`Error::Remote`].
    pub async fn send(&self, guid: &str, method: &str, params: Value) -> Result<Value> {
        let mut params = match params {
            Value::Null => Value::Object(Map::new()),
            Value::Object(_) => params,
            other => {
                return Err(Error::ProtocolError(format!(
                    "params must be an object, got: {other}"
                )));
            }
        };
        let timeout_ms = params
            .get("timeout")
            .and_then(Value::as_u64)
            .unwrap_or(self.default_timeout.as_millis() as u64);
        params["timeout"] = Value::from(timeout_ms);

        let id = self.next_id();
        tracing::debug!(id, guid, method, "sending request");

        let (tx, rx) = oneshot::channel();
        self.callbacks.lock().insert(id, tx);
        let guard = CancelGuard::new(id, Arc::clone(&self.callbacks));

        let request = Request {
            id,
            guid: Arc::from(guid),
            method: method.to_string(),
            params,
            metadata: Metadata::now(),
        };
        let request_value = serde_json::to_value(&request)?;

        {
            let mut state = self.state.lock();
            match state.phase {
                Phase::Pending => state.postponed.push(Postponed::Send(request_value)),
                Phase::Started => {
                    drop(state);
                    if self.outbound_tx.send(request_value).is_err() {
                        return Err(Error::ChannelClosed);
                    }
                }
            }
        }

        let wait = Duration::from_millis(
            timeout_ms
                .saturating_mul(RESPONSE_GRACE_MULTIPLIER)
                .max(MIN_RESPONSE_WAIT_MS),
        );
        match tokio::time::timeout(wait, ResponseFuture { rx, guard }).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "{method}: no response from driver within {}ms",
                wait.as_millis()
            ))),
        }
    }

    /// Registers a subscriber for events addressed to exactly `guid`.
    ///
    /// Addressing is by exact guid only; events for descendant objects do
    /// not fan out to ancestors. Repeated subscription is allowed and yields
    /// duplicate deliveries. The channel ends when the guid is disposed.
    pub fn subscribe(&self, guid: &str) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        match state.phase {
            Phase::Pending => state.postponed.push(Postponed::Subscribe(Arc::from(guid), tx)),
            Phase::Started => {
                drop(state);
                self.subscribers
                    .lock()
                    .entry(Arc::from(guid))
                    .or_default()
                    .push(tx);
            }
        }
        rx
    }

    /// Returns the initializer recorded for `guid`.
    ///
    /// Looking up a guid the driver never created, or already disposed, is a
    /// caller programming error and fails with [`Error::ObjectNotFound`].
    pub fn initializer(&self, guid: &str) -> Result<Value> {
        self.initializers
            .lock()
            .get(guid)
            .cloned()
            .ok_or_else(|| Error::ObjectNotFound {
                guid: guid.to_string(),
            })
    }

    /// Runs the session: spawns the transport reader and writer tasks and
    /// dispatches inbound messages sequentially until the transport ends.
    /// On exit every in-flight caller is failed with
    /// [`Error::ChannelClosed`].
    pub async fn run(self: &Arc<Self>) {
        let transport_receiver = self
            .transport_receiver
            .lock()
            .take()
            .expect("run() can only be called once - transport receiver already taken");

        let mut transport_sender = self
            .transport_sender
            .lock()
            .take()
            .expect("run() can only be called once - transport sender already taken");

        let mut outbound_rx = self
            .outbound_rx
            .lock()
            .take()
            .expect("run() can only be called once - outbound receiver already taken");

        let mut message_rx = self
            .message_rx
            .lock()
            .take()
            .expect("run() can only be called once - message receiver already taken");

        let reader_handle = tokio::spawn(async move {
            if let Err(e) = transport_receiver.run().await {
                tracing::error!("transport read error: {e}");
            }
        });

        let writer_handle = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = transport_sender.send(message).await {
                    tracing::error!("transport write error: {e}");
                    break;
                }
            }
        });

        while let Some(value) = message_rx.recv().await {
            match serde_json::from_value::<Message>(value) {
                Ok(message) => {
                    if let Err(e) = self.dispatch_internal(message) {
                        tracing::error!("error dispatching message: {e}");
                    }
                }
                Err(e) => {
                    // Protocol desync; there is no per-message recovery.
                    tracing::error!("unparseable message, terminating session: {e}");
                    break;
                }
            }
        }

        // Session over: fail all in-flight callers.
        self.callbacks.lock().clear();

        writer_handle.abort();
        reader_handle.abort();
        let _ = writer_handle.await;
        let _ = reader_handle.await;
    }

    /// Dispatch an incoming message (test-only public version).
    #[cfg(test)]
    pub fn dispatch(self: &Arc<Self>, message: Message) -> Result<()> {
        self.dispatch_internal(message)
    }

    fn dispatch_internal(self: &Arc<Self>, message: Message) -> Result<()> {
        let held = {
            let mut state = self.state.lock();
            match state.phase {
                Phase::Started => None,
                Phase::Pending => {
                    if is_root_create(&message) {
                        Some(self.enter_started(&mut state, &message))
                    } else {
                        state.held_inbound.push_back(message);
                        return Ok(());
                    }
                }
            }
        };

        if let Some(held) = held {
            tracing::debug!(held = held.len(), "session started, replaying held messages");
            for message in held {
                if let Err(e) = self.dispatch_started(message) {
                    tracing::error!("error dispatching held message: {e}");
                }
            }
            return Ok(());
        }

        self.dispatch_started(message)
    }

    /// Records the root initializer, flips the phase, and drains the
    /// postponed caller queue in original order. Returns the held inbound
    /// messages for replay. Runs under the state lock so no caller can slip
    /// ahead of the drained queue.
    fn enter_started(&self, state: &mut SessionState, message: &Message) -> VecDeque<Message> {
        let Message::Event(event) = message else {
            unreachable!("checked by is_root_create");
        };
        let initializer = event
            .params
            .get("initializer")
            .cloned()
            .unwrap_or(Value::Null);
        self.initializers
            .lock()
            .insert(Arc::from(ROOT_GUID), initializer);

        state.phase = Phase::Started;
        for op in state.postponed.drain(..) {
            match op {
                Postponed::Send(value) => {
                    let _ = self.outbound_tx.send(value);
                }
                Postponed::Subscribe(guid, tx) => {
                    self.subscribers.lock().entry(guid).or_default().push(tx);
                }
            }
        }
        std::mem::take(&mut state.held_inbound)
    }

    fn dispatch_started(self: &Arc<Self>, message: Message) -> Result<()> {
        match message {
            Message::Response(response) => {
                let callback = self.callbacks.lock().remove(&response.id);
                match callback {
                    Some(callback) => {
                        let result = if let Some(wrapper) = response.error {
                            Err(parse_driver_error(wrapper.error))
                        } else {
                            Ok(response.result.unwrap_or(Value::Null))
                        };
                        // The receiver may have timed out locally; a failed
                        // send is the discard of a late response.
                        let _ = callback.send(result);
                    }
                    None => {
                        tracing::debug!(id = response.id, "late response discarded");
                    }
                }
                Ok(())
            }
            Message::Event(event) => match event.method.as_str() {
                "create" => self.handle_create(&event),
                "dispose" => self.handle_dispose(&event),
                "console" | "page_error" => {
                    self.divert_to_logger(&event);
                    Ok(())
                }
                _ => {
                    self.fan_out(event);
                    Ok(())
                }
            },
            Message::Unknown(value) => {
                tracing::debug!("unknown message shape (ignored): {value}");
                Ok(())
            }
        }
    }

    /// Handles a lifecycle `create` event: records the new object's
    /// initializer under its guid.
    fn handle_create(&self, event: &Event) -> Result<()> {
        let guid: Arc<str> = Arc::from(
            event
                .params
                .get("guid")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::ProtocolError("create event missing 'guid'".to_string()))?,
        );
        let initializer = event
            .params
            .get("initializer")
            .cloned()
            .unwrap_or(Value::Null);

        tracing::debug!(guid = %guid, parent = %event.guid, "object created");
        self.initializers.lock().insert(guid, initializer);
        Ok(())
    }

    /// Handles a lifecycle `dispose` event: drops the initializer and the
    /// subscriber list for the guid, ending subscriber channels.
    fn handle_dispose(&self, event: &Event) -> Result<()> {
        let removed = self.initializers.lock().remove(event.guid.as_ref());
        self.subscribers.lock().remove(event.guid.as_ref());

        if removed.is_some() {
            tracing::debug!(guid = %event.guid, "object disposed");
        } else {
            tracing::debug!(guid = %event.guid, "dispose for unknown object (ignored)");
        }
        Ok(())
    }

    /// Delivers an event to every current subscriber of its exact guid.
    /// Delivery is fire-and-forget; subscribers whose receiver is gone are
    /// pruned.
    fn fan_out(&self, event: Event) {
        let mut subscribers = self.subscribers.lock();
        match subscribers.get_mut(event.guid.as_ref()) {
            Some(endpoints) => {
                endpoints.retain(|tx| tx.send(event.clone()).is_ok());
                if endpoints.is_empty() {
                    subscribers.remove(event.guid.as_ref());
                }
            }
            None => {
                tracing::debug!(
                    guid = %event.guid,
                    method = %event.method,
                    "event with no subscribers (ignored)"
                );
            }
        }
    }

    /// Routes `console` and `page_error` events to the configured logger,
    /// or drops them.
    fn divert_to_logger(&self, event: &Event) {
        let logger = self.logger.lock().clone();
        let Some(logger) = logger else {
            tracing::debug!(method = %event.method, "driver log event dropped (no logger)");
            return;
        };

        let (level, text) = if event.method == "console" {
            (
                event
                    .params
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("log")
                    .to_string(),
                event
                    .params
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            )
        } else {
            let message = event
                .params
                .get("error")
                .and_then(|e| e.get("error"))
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .or_else(|| {
                    event
                        .params
                        .get("error")
                        .and_then(|e| e.get("message"))
                        .and_then(Value::as_str)
                })
                .map(str::to_string)
                .unwrap_or_else(|| event.params.to_string());
            ("error".to_string(), message)
        };

        logger.log(&level, &text, event);
    }
}

/// True for the lifecycle `create` event announcing the root driver object.
fn is_root_create(message: &Message) -> bool {
    match message {
        Message::Event(event) => {
            event.method == "create" && event.params.get("guid").and_then(Value::as_str) == Some(ROOT_GUID)
        }
        _ => false,
    }
}

/// Converts a driver error payload into [`Error::Remote`].
fn parse_driver_error(error: ErrorPayload) -> Error {
    Error::Remote {
        name: error.name.unwrap_or_else(|| "Error".to_string()),
        message: error.message,
        stack: error.stack,
    }
}
