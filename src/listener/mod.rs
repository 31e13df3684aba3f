//! The listener: a single pollable sequence of Messenger events
//!
//! [`Listener`] composes the connection supervisor, the sequence tracker,
//! the frame translator and the event queue. All work happens inside
//! [`Listener::next_event`]: queued events are handed out first, and only
//! when the queue is empty does the listener run another scheduling tick.
//!
//! ```no_run
//! use messenger_listener::config::ListenerConfig;
//! use messenger_listener::listener::Listener;
//! use messenger_listener::transport::mqtt::MqttTransport;
//! use std::path::Path;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ListenerConfig::load_from_file(Path::new("listener.toml"))?;
//! let mut listener = Listener::from_config(MqttTransport::new(), &config)?;
//! let handle = listener.handle();
//! handle.set_sequence_id(4242);
//!
//! while let Some(event) = listener.next_event().await {
//!     println!("{:?}", event?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod health;
pub mod queue;
pub mod sequence;
pub mod supervisor;

use crate::config::{ConfigError, ListenerConfig};
use crate::error::{ListenerError, ListenerResult};
use crate::events::{decode_payload, translate, DomainEvent};
use crate::observability::metrics;
use crate::protocol::auth::{ConnectTiming, PresenceFlags};
use crate::protocol::control::ControlFrame;
use crate::protocol::topics::is_control_topic;
use crate::session::CredentialSource;
use crate::transport::{DisconnectCause, RawFrame, Transport, TransportEvent};
use futures::Stream;
use health::{HealthTransition, ReconnectConfig};
use queue::{EventQueue, EventSink};
use sequence::SequenceTracker;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use supervisor::ConnectionSupervisor;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn, Instrument, Span};

pub use sequence::SequenceState;

/// Shortest non-zero MQTT keep-alive; the protocol counts it in whole seconds
pub const MIN_KEEP_ALIVE: Duration = Duration::from_secs(1);

/// Runtime settings of a [`Listener`]
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerSettings {
    /// Show the user as available while in the foreground
    pub chat_on: bool,
    pub foreground: bool,
    /// Sleep between scheduling ticks
    pub tick_interval: Duration,
    /// Longest a single reactor step may wait for I/O
    pub poll_wait: Duration,
    pub queue_capacity: usize,
    /// How long a full queue may hold up a producer before dropping
    pub enqueue_timeout: Duration,
    /// Known sequence id to start from
    pub sequence_id: Option<u64>,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub reconnect: ReconnectConfig,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            chat_on: true,
            foreground: true,
            tick_interval: Duration::from_millis(1000),
            poll_wait: Duration::from_millis(50),
            queue_capacity: 64,
            enqueue_timeout: Duration::from_millis(50),
            sequence_id: None,
            keep_alive: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(30),
            reconnect: ReconnectConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    SetSequenceId(u64),
    SetForeground(bool),
    SetChatOn(bool),
}

/// Cloneable control surface of a running [`Listener`]
///
/// Calls only record a request; the listener acts on it at its next tick.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    shutdown: Arc<watch::Sender<bool>>,
    commands: mpsc::UnboundedSender<Command>,
}

impl ListenerHandle {
    /// Ask the listener to stop; the event sequence ends on the next tick
    pub fn disconnect(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_disconnect_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Supply the sequence id the listener is waiting for
    pub fn set_sequence_id(&self, sequence_id: u64) {
        self.send(Command::SetSequenceId(sequence_id));
    }

    /// Report whether the client is in the foreground
    pub fn set_foreground(&self, value: bool) {
        self.send(Command::SetForeground(value));
    }

    /// Set whether the user appears available while in the foreground
    pub fn set_chat_on(&self, value: bool) {
        self.send(Command::SetChatOn(value));
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!(?command, "Listener is gone, dropping command");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingSequence,
    Connecting,
    Running,
    Finished,
}

/// Drives one listening session from first connect to teardown
///
/// Not restartable: once the sequence has ended, build a new listener.
pub struct Listener<T: Transport> {
    supervisor: ConnectionSupervisor<T>,
    tracker: SequenceTracker,
    queue: EventQueue,
    sink: EventSink,
    settings: ListenerSettings,
    phase: Phase,
    /// Frames received but not yet dispatched because the queue was full
    pending_frames: VecDeque<RawFrame>,
    /// Disconnect seen by the reactor, handled once earlier frames are out
    pending_disconnect: Option<DisconnectCause>,
    /// Translated and lifecycle events waiting for queue room, in order
    ///
    /// A new frame is only dispatched once this is empty, so it never holds
    /// more than one frame's worth of events plus lifecycle notices.
    backlog: VecDeque<DomainEvent>,
    fatal: Option<ListenerError>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    commands_tx: mpsc::UnboundedSender<Command>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
    span: Span,
}

impl<T: Transport> Listener<T> {
    pub fn new(
        transport: T,
        credentials: Arc<dyn CredentialSource>,
        mut settings: ListenerSettings,
    ) -> Self {
        if !settings.keep_alive.is_zero() && settings.keep_alive < MIN_KEEP_ALIVE {
            warn!(
                keep_alive_ms = settings.keep_alive.as_millis() as u64,
                "Keep-alive below one second, using one second"
            );
            settings.keep_alive = MIN_KEEP_ALIVE;
        }

        let supervisor = ConnectionSupervisor::new(
            transport,
            credentials,
            settings.reconnect.clone(),
            PresenceFlags {
                chat_on: settings.chat_on,
                foreground: settings.foreground,
            },
            ConnectTiming {
                keep_alive: settings.keep_alive,
                connect_timeout: settings.connect_timeout,
            },
        );
        let queue = EventQueue::new(settings.queue_capacity, settings.enqueue_timeout);
        let sink = queue.sink();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let span = crate::listener_span!(queue_capacity = queue.capacity());

        Self {
            supervisor,
            tracker: SequenceTracker::with_seed(settings.sequence_id),
            queue,
            sink,
            settings,
            phase: Phase::AwaitingSequence,
            pending_frames: VecDeque::new(),
            pending_disconnect: None,
            backlog: VecDeque::new(),
            fatal: None,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            commands_tx,
            commands_rx,
            span,
        }
    }

    /// Build a listener from a validated configuration file
    pub fn from_config(transport: T, config: &ListenerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(
            transport,
            Arc::new(config.credential_source()),
            config.listener_settings(),
        ))
    }

    pub fn handle(&self) -> ListenerHandle {
        ListenerHandle {
            shutdown: Arc::clone(&self.shutdown_tx),
            commands: self.commands_tx.clone(),
        }
    }

    pub fn settings(&self) -> &ListenerSettings {
        &self.settings
    }

    /// Current resumption cursor
    pub fn sequence_state(&self) -> &SequenceState {
        self.tracker.state()
    }

    /// Next event, `Some(Err(_))` once for a fatal failure, then `None`
    pub async fn next_event(&mut self) -> Option<ListenerResult<DomainEvent>> {
        let span = self.span.clone();
        async move {
            loop {
                if let Some(event) = self.queue.try_dequeue() {
                    metrics().event_emitted(event.kind());
                    return Some(Ok(event));
                }

                match self.phase {
                    // Events translated before a fatal error still go out first
                    Phase::Finished if !self.backlog.is_empty() => {
                        self.flush_backlog().await;
                    }
                    Phase::Finished => return self.fatal.take().map(Err),
                    Phase::AwaitingSequence => self.await_sequence_id().await,
                    Phase::Connecting => self.initial_connect().await,
                    Phase::Running => self.tick().await,
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Turn the listener into a [`Stream`] of events
    pub fn into_stream(self) -> impl Stream<Item = ListenerResult<DomainEvent>> {
        futures::stream::unfold(self, |mut listener| async move {
            listener.next_event().await.map(|item| (item, listener))
        })
    }

    fn cancel_requested(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    async fn await_sequence_id(&mut self) {
        if self.tracker.sequence_id().is_some() {
            self.phase = Phase::Connecting;
            return;
        }

        info!("Waiting for a sequence id before connecting");
        let wait = self.tracker.begin_wait().wait();
        tokio::pin!(wait);

        loop {
            if self.cancel_requested() {
                info!("Disconnect requested while waiting for a sequence id");
                self.cancel().await;
                return;
            }

            tokio::select! {
                resolved = &mut wait => {
                    if let Some(sequence_id) = resolved {
                        debug!(sequence_id, "Sequence id resolved");
                    }
                    self.phase = if self.tracker.sequence_id().is_some() {
                        Phase::Connecting
                    } else {
                        Phase::AwaitingSequence
                    };
                    return;
                }
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() {
                        self.phase = Phase::Finished;
                        return;
                    }
                }
                Some(command) = self.commands_rx.recv() => {
                    self.apply_command(command).await;
                }
            }
        }
    }

    async fn initial_connect(&mut self) {
        let shutdown = self.shutdown_rx.clone();
        match self
            .supervisor
            .connect_with_retry(&self.tracker, &shutdown)
            .await
        {
            Ok(true) => {
                info!("Listening");
                self.phase = Phase::Running;
                self.emit_lifecycle(DomainEvent::Connect).await;
            }
            Ok(false) => self.cancel().await,
            Err(e) => self.fail(e).await,
        }
    }

    /// One scheduling tick
    async fn tick(&mut self) {
        tokio::time::sleep(self.settings.tick_interval).await;

        if self.cancel_requested() {
            info!("Disconnect requested, stopping listener");
            self.cancel().await;
            return;
        }

        while let Ok(command) = self.commands_rx.try_recv() {
            self.apply_command(command).await;
        }

        if self.pending_disconnect.is_none() {
            for event in self.supervisor.poll(self.settings.poll_wait).await {
                match event {
                    TransportEvent::Frame(frame) => self.pending_frames.push_back(frame),
                    TransportEvent::Disconnected(cause) => {
                        // Anything after the first disconnect belongs to a dead connection
                        self.pending_disconnect = Some(cause);
                        break;
                    }
                }
            }
        }

        self.dispatch_pending().await;

        if self.pending_frames.is_empty() {
            if let Some(cause) = self.pending_disconnect.take() {
                self.handle_disconnect(cause).await;
            }
        }
    }

    /// Dispatch received frames while the queue has room
    async fn dispatch_pending(&mut self) {
        loop {
            if !self.flush_backlog().await {
                break;
            }
            if self.queue.free_capacity() == 0 {
                debug!(
                    deferred = self.pending_frames.len(),
                    "Event queue full, deferring frames to the next tick"
                );
                break;
            }
            if self.tracker.resync_pending() {
                self.resync().await;
                continue;
            }
            let Some(frame) = self.pending_frames.pop_front() else {
                break;
            };
            let span = crate::frame_span!(topic = %frame.topic);
            self.dispatch_frame(frame).instrument(span).await;
        }
    }

    async fn dispatch_frame(&mut self, frame: RawFrame) {
        metrics().frame_received();

        let value = match decode_payload(&frame.payload) {
            Ok(value) => value,
            Err(e) => {
                metrics().decode_failure();
                warn!(topic = %frame.topic, error = %e, "Skipping undecodable frame");
                return;
            }
        };
        debug!(topic = %frame.topic, payload = %value, "Received frame");

        if is_control_topic(&frame.topic) {
            let control = ControlFrame::classify(&value);
            if matches!(control, ControlFrame::ServerError { .. }) {
                metrics().protocol_warning();
            }
            self.tracker.on_control_frame(&control);
            if !control.carries_deltas() {
                return;
            }
        }

        match translate(&frame.topic, &value) {
            Ok(events) => {
                if events.len() > self.queue.free_capacity() {
                    debug!(
                        events = events.len(),
                        free = self.queue.free_capacity(),
                        "Frame larger than the free queue space, holding the rest back"
                    );
                }
                self.backlog.extend(events);
            }
            Err(e) => {
                metrics().decode_failure();
                warn!(topic = %frame.topic, error = %e, "Skipping malformed frame");
            }
        }
    }

    /// Re-create the server queue after it was lost
    async fn resync(&mut self) {
        self.tracker.take_resync();
        metrics().resync();

        // Without a connection the create request goes out on the next connect
        if self.supervisor.is_connected() {
            if let Err(e) = self.supervisor.publish_queue_request(&self.tracker).await {
                warn!(error = %e.sanitized(), "Failed to request a new sync queue");
            }
        }
        self.emit_lifecycle(DomainEvent::Resync).await;
    }

    async fn handle_disconnect(&mut self, cause: DisconnectCause) {
        match self.supervisor.on_disconnect(&cause) {
            HealthTransition::Retry { reason } => {
                warn!(reason = %reason, "Listener disconnected");
                self.emit_lifecycle(DomainEvent::Disconnect { reason }).await;

                let shutdown = self.shutdown_rx.clone();
                match self
                    .supervisor
                    .connect_with_retry(&self.tracker, &shutdown)
                    .await
                {
                    Ok(true) => self.emit_lifecycle(DomainEvent::Connect).await,
                    Ok(false) => self.cancel().await,
                    Err(e) => self.fail(e).await,
                }
            }
            HealthTransition::Fatal { reason } => {
                self.fail(ListenerError::not_logged_in(reason)).await;
            }
        }
    }

    async fn emit_lifecycle(&mut self, event: DomainEvent) {
        self.backlog.push_back(event);
        self.flush_backlog().await;
    }

    /// Move backlog events into the queue; true once the backlog is empty
    ///
    /// Only moves what fits, so the sink never has to wait on a consumer that
    /// runs in this same task.
    async fn flush_backlog(&mut self) -> bool {
        while self.queue.free_capacity() > 0 {
            let Some(event) = self.backlog.pop_front() else {
                break;
            };
            self.sink.enqueue(event).await;
        }
        self.backlog.is_empty()
    }

    async fn apply_command(&mut self, command: Command) {
        let result = match command {
            Command::SetSequenceId(sequence_id) => {
                self.tracker.set_sequence_id(sequence_id);
                Ok(())
            }
            Command::SetForeground(value) => self.supervisor.set_foreground(value).await,
            Command::SetChatOn(value) => self.supervisor.set_chat_on(value).await,
        };
        if let Err(e) = result {
            warn!(?command, error = %e.sanitized(), "Failed to apply listener command");
        }
    }

    /// Record a fatal error, shut down, and end the sequence with it
    async fn fail(&mut self, e: ListenerError) {
        error!(error = %e.sanitized(), "Listener failed");
        self.fatal = Some(e);
        self.teardown().await;
    }

    /// Requested shutdown: undelivered events are discarded
    async fn cancel(&mut self) {
        let discarded = self.backlog.iter().filter(|e| !e.is_lifecycle()).count();
        if discarded > 0 {
            info!(discarded, "Discarding undelivered events on disconnect");
        }
        self.backlog.clear();
        self.teardown().await;
    }

    /// Orderly protocol-level disconnect; no events are produced afterwards
    async fn teardown(&mut self) {
        if self.supervisor.is_connected() {
            if let Err(e) = self.supervisor.disconnect().await {
                warn!(error = %e.sanitized(), "Error while disconnecting");
            }
            // One housekeeping step so the disconnect packet gets flushed
            let _ = self.supervisor.poll(Duration::ZERO).await;
        }
        self.pending_frames.clear();
        self.pending_disconnect = None;
        self.phase = Phase::Finished;
    }
}
