//! Reconnecting room client.
//!
//! [`TransportClient`] owns one logical connection to a room server. A driver
//! task dials through a [`Connector`], joins the room, classifies inbound
//! frames into [`TransportEvent`]s for registered listeners, and reconnects
//! with exponential backoff when the link drops unexpectedly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use url::Url;
use uuid::Uuid;

use crate::config::TransportConfig;
use crate::error::{TransportError, TransportResult};
use crate::event::{ClientEvent, TransportEvent};
use crate::link::{Connector, Link};
use crate::machine::{Connection, ConnectionMachine, ConnectionState, ReconnectDecision};
use crate::protocol::{self, Frame};
use crate::timer::{Timer, TokioTimer};

/// Handle returned by [`TransportClient::on`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Handler = Arc<dyn Fn(&TransportEvent) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the client handle and its driver task.
struct Shared {
    machine: Mutex<ConnectionMachine>,
    listeners: Mutex<Vec<(ListenerId, Handler)>>,
    next_listener: AtomicU64,
    outbound: Mutex<Option<mpsc::Sender<Frame>>>,
}

impl Shared {
    /// Call every listener. The list is copied first so handlers may
    /// register or remove listeners.
    fn dispatch(&self, event: &TransportEvent) {
        let handlers: Vec<Handler> = lock(&self.listeners)
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in handlers {
            handler(event);
        }
    }
}

struct DriverHandle {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Event-based client for one collaboration room.
///
/// Dropping the client stops its driver as if [`close`](Self::close) had
/// been called, without waiting for it.
pub struct TransportClient {
    id: String,
    connector: Arc<dyn Connector>,
    timer: Arc<dyn Timer>,
    shared: Arc<Shared>,
    driver: Option<DriverHandle>,
}

impl std::fmt::Debug for TransportClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportClient")
            .field("id", &self.id)
            .field("connection", &self.connection())
            .finish_non_exhaustive()
    }
}

impl TransportClient {
    /// Create a client using the tokio clock for reconnect delays.
    #[must_use]
    pub fn new(config: TransportConfig, connector: impl Connector) -> Self {
        Self::with_timer(config, connector, TokioTimer)
    }

    /// Create a client with a custom reconnect timer.
    #[must_use]
    pub fn with_timer(
        config: TransportConfig,
        connector: impl Connector,
        timer: impl Timer,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            connector: Arc::new(connector),
            timer: Arc::new(timer),
            shared: Arc::new(Shared {
                machine: Mutex::new(ConnectionMachine::new(config.reconnect)),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(0),
                outbound: Mutex::new(None),
            }),
            driver: None,
        }
    }

    /// This client's connection ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        lock(&self.shared.machine).state()
    }

    /// Current state with attempt counter and pending delay.
    #[must_use]
    pub fn connection(&self) -> Connection {
        lock(&self.shared.machine).connection()
    }

    /// Whether the link is open.
    #[must_use]
    pub fn connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Register a listener for every [`TransportEvent`].
    ///
    /// Handlers run on the driver task and must not block.
    #[must_use]
    pub fn on<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&TransportEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.shared.next_listener.fetch_add(1, Ordering::Relaxed));
        lock(&self.shared.listeners).push((id, Arc::new(handler)));
        id
    }

    /// Remove a listener. Returns whether it was registered.
    #[must_use]
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.shared.listeners);
        let before = listeners.len();
        listeners.retain(|(listener, _)| *listener != id);
        listeners.len() != before
    }

    /// Connect to `url` and join `room_id`.
    ///
    /// Returns once the driver is started; progress is reported through
    /// listeners. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidUrl`] if `url` does not parse, or
    /// [`TransportError::AlreadyConnected`] if a previous connection is
    /// still being driven.
    pub fn connect(&mut self, url: &str, room_id: impl Into<String>) -> TransportResult<()> {
        if self
            .driver
            .as_ref()
            .is_some_and(|driver| !driver.task.is_finished())
        {
            return Err(TransportError::AlreadyConnected);
        }

        let url = Url::parse(url)?;
        let room_id = room_id.into();
        lock(&self.shared.machine).start();
        lock(&self.shared.outbound).take();

        tracing::info!(client_id = %self.id, %url, %room_id, "Connecting to room");

        let (shutdown_tx, shutdown) = oneshot::channel();
        let driver = Driver {
            shared: Arc::clone(&self.shared),
            connector: Arc::clone(&self.connector),
            timer: Arc::clone(&self.timer),
            url,
            room_id,
            client_id: self.id.clone(),
        };
        let task = tokio::spawn(driver.run(shutdown));
        self.driver = Some(DriverHandle { shutdown_tx, task });
        Ok(())
    }

    /// Send an event to the room.
    ///
    /// Returns whether the frame was queued. Nothing is buffered while the
    /// connection is not open; such events are dropped with a warning.
    #[must_use]
    pub fn emit(&self, event: &ClientEvent) -> bool {
        let state = self.state();
        if state != ConnectionState::Open {
            tracing::warn!(event = event.name(), ?state, "Dropping event: not connected");
            return false;
        }
        let Some(outbound) = lock(&self.shared.outbound).clone() else {
            tracing::warn!(event = event.name(), "Dropping event: link not ready");
            return false;
        };

        let frame = match protocol::encode_event(event) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(event = event.name(), error = %e, "Dropping unencodable event");
                return false;
            }
        };

        match outbound.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(event = event.name(), "Dropping event: outbound queue full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(event = event.name(), "Dropping event: link closing");
                false
            }
        }
    }

    /// Close the connection and cancel any pending reconnect.
    ///
    /// Waits for the driver to stop, so no event is delivered after this
    /// returns.
    pub async fn close(&mut self) {
        if let Some(driver) = self.driver.take() {
            let _ = driver.shutdown_tx.send(());
            if let Err(e) = driver.task.await {
                tracing::warn!(error = %e, "Connection driver ended abnormally");
            }
        }
        lock(&self.shared.outbound).take();
        lock(&self.shared.machine).closed();
    }
}

/// How a served link ended.
enum Outcome {
    /// The client closed it.
    Closed,
    /// It dropped after opening.
    Lost(String),
    /// It never opened.
    Failed(String),
}

struct Driver {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    timer: Arc<dyn Timer>,
    url: Url,
    room_id: String,
    client_id: String,
}

impl Driver {
    async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        loop {
            let dialed = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    self.close_intentionally(false);
                    return;
                }
                result = self.connector.connect(&self.url, &self.room_id) => result,
            };

            let outcome = match dialed {
                Ok(link) => self.serve(link, &mut shutdown).await,
                Err(e) => Outcome::Failed(e.to_string()),
            };

            let lost_reason = match outcome {
                Outcome::Closed => return,
                Outcome::Lost(reason) => {
                    tracing::warn!(%reason, "Connection lost");
                    Some(reason)
                }
                Outcome::Failed(reason) => {
                    tracing::warn!(%reason, "Failed to connect");
                    None
                }
            };

            let decision = lock(&self.shared.machine).lost();
            if let Some(reason) = lost_reason {
                self.shared.dispatch(&TransportEvent::Disconnected {
                    intentional: false,
                    reason,
                });
            }

            match decision {
                Some(ReconnectDecision::Retry { attempt, delay }) => {
                    tracing::info!(attempt, ?delay, "Scheduling reconnect");
                    self.shared
                        .dispatch(&TransportEvent::ReconnectScheduled { attempt, delay });

                    tokio::select! {
                        biased;
                        _ = &mut shutdown => {
                            self.close_intentionally(false);
                            return;
                        }
                        () = self.timer.sleep(delay) => {}
                    }
                    if !lock(&self.shared.machine).redial() {
                        return;
                    }
                }
                Some(ReconnectDecision::GiveUp) => {
                    tracing::error!(room_id = %self.room_id, "Reconnect attempts exhausted");
                    self.shared.dispatch(&TransportEvent::ReconnectExhausted);
                    return;
                }
                None => return,
            }
        }
    }

    async fn serve(&self, link: Link, shutdown: &mut oneshot::Receiver<()>) -> Outcome {
        let Link {
            outbound,
            mut inbound,
        } = link;

        let join = match protocol::encode_event(&ClientEvent::JoinRoom {
            room_id: self.room_id.clone(),
        }) {
            Ok(frame) => frame,
            Err(e) => return Outcome::Failed(e.to_string()),
        };
        if outbound.send(join).await.is_err() {
            return Outcome::Failed("link closed before join".to_string());
        }

        lock(&self.shared.machine).opened();
        *lock(&self.shared.outbound) = Some(outbound);
        tracing::info!(client_id = %self.client_id, room_id = %self.room_id, "Connected to room");
        self.shared.dispatch(&TransportEvent::Connected);

        let outcome = loop {
            tokio::select! {
                biased;
                _ = &mut *shutdown => {
                    self.close_intentionally(true);
                    return Outcome::Closed;
                }
                next = inbound.recv() => match next {
                    Some(Ok(frame)) => self.handle_frame(frame),
                    Some(Err(e)) => break Outcome::Lost(e.to_string()),
                    None => break Outcome::Lost("connection closed by server".to_string()),
                },
            }
        };
        lock(&self.shared.outbound).take();
        outcome
    }

    fn handle_frame(&self, frame: Frame) {
        match protocol::decode_frame(frame) {
            Ok(Some(event)) => {
                tracing::trace!(event = event.name(), "Inbound event");
                self.shared.dispatch(&event);
            }
            Ok(None) => tracing::debug!("Ignoring unrecognized control message"),
            Err(e) => tracing::warn!(error = %e, "Dropping malformed frame"),
        }
    }

    fn close_intentionally(&self, was_open: bool) {
        lock(&self.shared.outbound).take();
        let changed = lock(&self.shared.machine).closed();
        tracing::info!(room_id = %self.room_id, "Connection closed by client");
        if changed && was_open {
            self.shared.dispatch(&TransportEvent::Disconnected {
                intentional: true,
                reason: "closed by client".to_string(),
            });
        }
    }
}
