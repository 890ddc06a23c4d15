//! The session runtime: public API and lifecycle supervision.
//!
//! One `Session` owns one transport slot, one consolidator, one playback
//! worker, one tool orchestrator, and the receive/keepalive tasks. The
//! root cancellation token is the single teardown signal: `close()`
//! cancels it, drains every task within a bounded window, half-closes and
//! closes the transport, and cleans up the player.
//!
//! Tasks never hold the `Session` itself — each is handed a value struct
//! of the capability handles it needs, so ownership stays acyclic.

use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use confab_core::{
    ClientConfig, ClientError, ClientFrame, Message, Player, ServerFrame, SessionEvent,
    ToolCall, ToolDefinition, TransportConnector,
};
use confab_transport::{CredentialResolver, RetryPolicy, ServiceConnector};

use crate::bus::{DEFAULT_EVENT_CAPACITY, EventBus};
use crate::consolidator::{Consolidator, ConsolidatorCmd, ConsolidatorConfig};
use crate::extract::extract_output;
use crate::outbound::TransportSlot;
use crate::playback::{DEFAULT_PLAYBACK_CAPACITY, PlaybackStatus, PlaybackWorker};
use crate::send::{build_setup, build_user_text};
use crate::state::{SessionState, StateInput, StateMachine};
use crate::store::MessageStore;
use crate::tools::{ToolHandler, ToolOrchestrator};

/// Capacity of the consolidator command mailbox.
const CONSOLIDATOR_MAILBOX: usize = 64;

/// Runtime knobs with sensible defaults.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Backoff schedule for transport reopen.
    pub retry: RetryPolicy,
    /// Idle interval after which a keepalive ping is sent.
    pub keepalive_interval: Duration,
    /// UI event mailbox capacity.
    pub event_capacity: usize,
    /// Playback queue capacity.
    pub playback_capacity: usize,
    /// Whether tool calls require user approval before dispatch.
    pub require_approval: bool,
    /// Consolidation knobs; derived from the audio format when `None`.
    pub consolidator: Option<ConsolidatorConfig>,
    /// How long `close()` waits for each task before aborting it.
    pub drain_window: Duration,
    /// How long `start()` waits for the server's setup acknowledgement.
    pub setup_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            keepalive_interval: Duration::from_secs(300),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            playback_capacity: DEFAULT_PLAYBACK_CAPACITY,
            require_approval: true,
            consolidator: None,
            drain_window: Duration::from_secs(2),
            setup_timeout: Duration::from_secs(30),
        }
    }
}

/// One live conversation with the model service.
pub struct Session {
    config: ClientConfig,
    options: SessionOptions,
    connector: Arc<dyn TransportConnector>,
    player: Arc<dyn Player>,
    slot: Arc<TransportSlot>,
    store: Arc<MessageStore>,
    bus: EventBus,
    state: Arc<StdMutex<StateMachine>>,
    tools: Arc<ToolOrchestrator>,
    consolidator_tx: StdMutex<Option<mpsc::Sender<ConsolidatorCmd>>>,
    cancel: CancellationToken,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    ready: Arc<Notify>,
    last_activity: Arc<StdMutex<Instant>>,
    started: AtomicBool,
    closed: AtomicBool,
}

impl Session {
    /// Create a session against the default service endpoints, resolving
    /// credentials from the environment.
    pub fn new(
        config: ClientConfig,
        player: Arc<dyn Player>,
    ) -> Result<(Arc<Self>, mpsc::Receiver<SessionEvent>), ClientError> {
        let connector = Arc::new(ServiceConnector::new(CredentialResolver::new(None)));
        Self::with_connector(config, connector, player)
    }

    /// Create a session with an injected connector (tests, gateways).
    pub fn with_connector(
        config: ClientConfig,
        connector: Arc<dyn TransportConnector>,
        player: Arc<dyn Player>,
    ) -> Result<(Arc<Self>, mpsc::Receiver<SessionEvent>), ClientError> {
        Self::with_options(config, connector, player, SessionOptions::default())
    }

    /// Create a session with explicit runtime options.
    pub fn with_options(
        config: ClientConfig,
        connector: Arc<dyn TransportConnector>,
        player: Arc<dyn Player>,
        options: SessionOptions,
    ) -> Result<(Arc<Self>, mpsc::Receiver<SessionEvent>), ClientError> {
        config.validate()?;

        let (bus, events) = EventBus::new(options.event_capacity);
        let slot = TransportSlot::new();
        let tools = ToolOrchestrator::new(options.require_approval, Arc::clone(&slot), bus.clone());

        let session = Arc::new(Self {
            config,
            options,
            connector,
            player,
            slot,
            store: Arc::new(MessageStore::new()),
            bus,
            state: Arc::new(StdMutex::new(StateMachine::new())),
            tools,
            consolidator_tx: StdMutex::new(None),
            cancel: CancellationToken::new(),
            tasks: StdMutex::new(Vec::new()),
            ready: Arc::new(Notify::new()),
            last_activity: Arc::new(StdMutex::new(Instant::now())),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        Ok((session, events))
    }

    /// Register a tool handler. Call before [`Session::start`] so the
    /// declaration makes it into the setup frame.
    pub fn register_tool(
        &self,
        definition: ToolDefinition,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), ClientError> {
        self.tools.register(definition, handler)
    }

    /// Open the transport, send the setup frame, spawn the supervised
    /// tasks, and wait for the server's setup acknowledgement.
    pub async fn start(self: &Arc<Self>) -> Result<(), ClientError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ClientError::Internal("session already started".into()));
        }

        tracing::info!(model = %self.config.model, "Starting session");

        let transport = {
            let bus = self.bus.clone();
            let connector = Arc::clone(&self.connector);
            let config = self.config.clone();
            self.options
                .retry
                .retry(
                    &self.cancel,
                    move |attempt, next_delay| {
                        bus.emit(SessionEvent::Reconnecting {
                            attempt,
                            next_delay,
                        });
                    },
                    move |_| {
                        let connector = Arc::clone(&connector);
                        let config = config.clone();
                        async move { connector.open(&config).await }
                    },
                )
                .await?
        };
        let _ = self.slot.replace(Some(transport)).await;
        self.slot.send(self.setup_frame()).await?;
        self.touch_activity();

        // Consolidator actor.
        let (consolidator_tx, consolidator_rx) = mpsc::channel(CONSOLIDATOR_MAILBOX);
        *self
            .consolidator_tx
            .lock()
            .expect("consolidator slot poisoned") = Some(consolidator_tx.clone());

        let playing = PlaybackStatus::new();
        let (playback_tx, playback_rx) = mpsc::channel(self.options.playback_capacity);
        let consolidator = Consolidator::new(
            self.options
                .consolidator
                .unwrap_or_else(|| ConsolidatorConfig::for_format(&self.config.audio_format)),
            self.config.audio_format,
            Arc::clone(&self.store),
            playback_tx,
            Arc::clone(&playing),
            self.player.estimated_latency(),
        );

        // Playback worker.
        let worker = PlaybackWorker::new(
            Arc::clone(&self.player),
            self.config.audio_format,
            playing,
            self.bus.clone(),
        );

        // Keepalive.
        let keepalive = KeepaliveTask {
            slot: Arc::clone(&self.slot),
            interval: self.options.keepalive_interval,
            last_activity: Arc::clone(&self.last_activity),
        };

        // Receive loop.
        let receiver = ReceiveLoop {
            setup: self.setup_frame(),
            config: self.config.clone(),
            retry: self.options.retry,
            connector: Arc::clone(&self.connector),
            slot: Arc::clone(&self.slot),
            store: Arc::clone(&self.store),
            bus: self.bus.clone(),
            state: Arc::clone(&self.state),
            tools: Arc::clone(&self.tools),
            consolidator_tx,
            ready: Arc::clone(&self.ready),
            last_activity: Arc::clone(&self.last_activity),
            current_turn: None,
            turn_usage_seen: false,
        };

        {
            let mut tasks = self.tasks.lock().expect("task list poisoned");
            tasks.push(tokio::spawn(
                consolidator.run(self.cancel.child_token(), consolidator_rx),
            ));
            tasks.push(tokio::spawn(
                worker.run(self.cancel.child_token(), playback_rx),
            ));
            tasks.push(tokio::spawn(keepalive.run(self.cancel.child_token())));
            tasks.push(tokio::spawn(receiver.run(self.cancel.child_token())));
        }

        // Block until the server acknowledges the setup frame.
        tokio::time::timeout(self.options.setup_timeout, self.ready.notified())
            .await
            .map_err(|_| ClientError::Timeout {
                context: "waiting for setup acknowledgement".into(),
                elapsed: self.options.setup_timeout,
                retryable: true,
            })?;
        Ok(())
    }

    /// Send one user text message; marks the client turn complete.
    pub async fn send_user_text(&self, text: &str) -> Result<(), ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::TransportClosed);
        }
        if self.cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        if text.trim().is_empty() {
            return Err(ClientError::Config("user message is empty".into()));
        }

        self.store.push(Message::user(text));
        self.state
            .lock()
            .expect("state machine poisoned")
            .apply(StateInput::UserMessageSent);
        self.slot.send(build_user_text(text)).await?;
        self.touch_activity();
        Ok(())
    }

    /// Approve a pending tool call.
    pub async fn approve_tool(&self, id: &str, remember: bool) -> Result<(), ClientError> {
        self.tools.approve(id, remember).await
    }

    /// Reject a pending tool call with a reason.
    pub async fn reject_tool(&self, id: &str, reason: &str) -> Result<(), ClientError> {
        self.tools.reject(id, reason).await
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.lock().expect("state machine poisoned").state()
    }

    /// Copy of the message history.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.store.snapshot()
    }

    /// Tear the session down: cancel every task, drain within the
    /// configured window, close the transport and the player.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Closing session");

        self.state
            .lock()
            .expect("state machine poisoned")
            .apply(StateInput::Close);
        self.cancel.cancel();

        // Closing the mailbox lets a mid-flush consolidator exit cleanly.
        self.consolidator_tx
            .lock()
            .expect("consolidator slot poisoned")
            .take();

        if let Some(transport) = self.slot.replace(None).await {
            let _ = transport.close_send().await;
            let _ = transport.close().await;
        }

        let tasks: Vec<JoinHandle<()>> = {
            let mut guard = self.tasks.lock().expect("task list poisoned");
            guard.drain(..).collect()
        };
        for mut task in tasks {
            if tokio::time::timeout(self.options.drain_window, &mut task)
                .await
                .is_err()
            {
                tracing::warn!("Task outlived the drain window — aborting");
                task.abort();
            }
        }

        if let Err(err) = self.player.cleanup().await {
            tracing::warn!(error = %err, "Player cleanup failed");
        }
        self.bus.emit(SessionEvent::SessionClosed);
    }

    /// Setup frame covering both configured declarations and registered
    /// handlers.
    fn setup_frame(&self) -> ClientFrame {
        let mut config = self.config.clone();
        for definition in self.tools.definitions() {
            if !config.tools.iter().any(|t| t.name == definition.name) {
                config.tools.push(definition);
            }
        }
        build_setup(&config)
    }

    fn touch_activity(&self) {
        *self.last_activity.lock().expect("activity clock poisoned") = Instant::now();
    }
}

// ── Keepalive ──────────────────────────────────────────────────────

/// Sends a transport-level ping when the stream has been idle for a full
/// keepalive interval.
struct KeepaliveTask {
    slot: Arc<TransportSlot>,
    interval: Duration,
    last_activity: Arc<StdMutex<Instant>>,
}

impl KeepaliveTask {
    async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // the first tick fires immediately
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let idle = self
                        .last_activity
                        .lock()
                        .expect("activity clock poisoned")
                        .elapsed()
                        >= self.interval;
                    if !idle {
                        continue;
                    }
                    match self.slot.send(ClientFrame::Ping).await {
                        Ok(()) => tracing::debug!("Sent keepalive ping"),
                        Err(err) => {
                            tracing::debug!(error = %err, "Keepalive ping failed");
                        }
                    }
                }
            }
        }
    }
}

// ── Receive loop ───────────────────────────────────────────────────

/// The single receive task. Owns the per-turn bookkeeping and the
/// reconnect flow; everything else is a capability handle.
struct ReceiveLoop {
    setup: ClientFrame,
    config: ClientConfig,
    retry: RetryPolicy,
    connector: Arc<dyn TransportConnector>,
    slot: Arc<TransportSlot>,
    store: Arc<MessageStore>,
    bus: EventBus,
    state: Arc<StdMutex<StateMachine>>,
    tools: Arc<ToolOrchestrator>,
    consolidator_tx: mpsc::Sender<ConsolidatorCmd>,
    ready: Arc<Notify>,
    last_activity: Arc<StdMutex<Instant>>,

    /// Index of the model message for the in-flight turn.
    current_turn: Option<usize>,
    /// Whether server usage counts arrived for the in-flight turn.
    turn_usage_seen: bool,
}

impl ReceiveLoop {
    async fn run(mut self, cancel: CancellationToken) {
        loop {
            let Some(transport) = self.slot.current().await else {
                break;
            };
            let received = tokio::select! {
                () = cancel.cancelled() => break,
                received = transport.recv() => received,
            };

            match received {
                Ok(Some(ServerFrame::GoAway { reason })) => {
                    // The server is shedding this connection; reconnect.
                    if !self.reconnect(&cancel, &format!("server going away: {reason}")).await {
                        break;
                    }
                }
                Ok(Some(frame)) => self.handle_frame(frame).await,
                Ok(None) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    // Idle connection drop mid-session is retryable.
                    if !self.reconnect(&cancel, "stream ended unexpectedly").await {
                        break;
                    }
                }
                Err(ClientError::Cancelled) => break,
                Err(err) if err.is_retryable() => {
                    if !self.reconnect(&cancel, &err.to_string()).await {
                        break;
                    }
                }
                Err(err) => {
                    self.fail(err);
                    break;
                }
            }
        }
        tracing::debug!("Receive loop stopped");
    }

    async fn handle_frame(&mut self, frame: ServerFrame) {
        self.touch_activity();
        let output = extract_output(&frame);

        if output.setup_complete {
            let transitioned = self
                .state
                .lock()
                .expect("state machine poisoned")
                .apply(StateInput::SetupComplete)
                .is_some();
            if transitioned {
                self.bus.emit(SessionEvent::SessionReady);
            }
            self.ready.notify_one();
            return;
        }
        if output.is_empty() {
            return;
        }

        // First frame of a turn.
        let turn_started = self
            .state
            .lock()
            .expect("state machine poisoned")
            .apply(StateInput::ResponseFrame)
            .is_some();
        if turn_started {
            self.bus.emit(SessionEvent::TurnStarted);
        }
        let index = match self.current_turn {
            Some(index) => index,
            None => {
                let index = self.store.push(Message::model());
                self.current_turn = Some(index);
                self.turn_usage_seen = false;
                index
            }
        };

        if !output.text.is_empty() {
            self.store.append_text(index, &output.text);
            self.bus.emit(SessionEvent::TextDelta(output.text.clone()));
        }

        if let Some(audio) = output.audio {
            // Never block the socket on the consolidator: overflow is
            // dropped with a warning, like a full playback queue.
            let cmd = ConsolidatorCmd::Chunk {
                data: audio,
                text: output.text.clone(),
                message_index: index,
            };
            if let Err(err) = self.consolidator_tx.try_send(cmd) {
                tracing::warn!(error = %err, "Consolidator mailbox full — dropping audio chunk");
            }
        }

        if let Some(call) = output.function_call {
            self.store.update(index, |message| {
                message.tool_call = Some(ToolCall::new(
                    call.id.clone(),
                    call.name.clone(),
                    call.args.clone(),
                ));
            });
            self.tools.handle_call(call).await;
        }

        if let Some(code) = output.executable_code {
            self.store
                .update(index, |message| message.executable_code = Some(code));
        }
        if let Some(result) = output.code_execution_result {
            self.store
                .update(index, |message| message.code_execution_result = Some(result));
        }
        if !output.safety_ratings.is_empty() {
            let ratings = output.safety_ratings;
            self.store.update(index, |message| {
                message.safety_ratings.extend(ratings);
            });
        }
        if let Some(grounding) = output.grounding_metadata {
            self.store
                .update(index, |message| message.grounding = Some(grounding));
        }
        if let Some(usage) = output.usage {
            // Server counts override any earlier estimate.
            self.turn_usage_seen = true;
            self.store.update(index, |message| message.usage = Some(usage));
        }

        if output.interrupted {
            let _ = self.consolidator_tx.try_send(ConsolidatorCmd::DropCurrent);
        }

        if output.turn_complete {
            let _ = self.consolidator_tx.try_send(ConsolidatorCmd::TurnBoundary);
            if !self.turn_usage_seen {
                let text = self
                    .store
                    .get(index)
                    .map(|m| m.content)
                    .unwrap_or_default();
                if !text.is_empty() {
                    let estimate = confab_core::UsageMetadata::estimate_from_text(&text);
                    self.store
                        .update(index, |message| message.usage = Some(estimate));
                }
            }
            self.state
                .lock()
                .expect("state machine poisoned")
                .apply(StateInput::TurnComplete);
            self.bus.emit(SessionEvent::TurnCompleted);
            self.current_turn = None;
        }
    }

    /// Reopen the transport with backoff. Returns false when the session
    /// has to give up.
    async fn reconnect(&mut self, cancel: &CancellationToken, reason: &str) -> bool {
        tracing::warn!(reason, "Connection lost — attempting reconnect");
        self.bus.emit(SessionEvent::ConnectionLost(reason.to_string()));

        // The stream those calls arrived on is gone.
        self.tools
            .fail_all_pending("connection lost before approval")
            .await;
        let _ = self.consolidator_tx.try_send(ConsolidatorCmd::DropCurrent);
        self.current_turn = None;

        {
            let mut state = self.state.lock().expect("state machine poisoned");
            state.apply(StateInput::Failure);
            state.apply(StateInput::Reconnect);
        }
        if let Some(old) = self.slot.replace(None).await {
            let _ = old.close().await;
        }

        let bus = self.bus.clone();
        let connector = Arc::clone(&self.connector);
        let config = self.config.clone();
        let setup = self.setup.clone();
        let slot = Arc::clone(&self.slot);
        let result = self
            .retry
            .retry(
                cancel,
                move |attempt, next_delay| {
                    bus.emit(SessionEvent::Reconnecting {
                        attempt,
                        next_delay,
                    });
                },
                move |_| {
                    let connector = Arc::clone(&connector);
                    let config = config.clone();
                    let setup = setup.clone();
                    let slot = Arc::clone(&slot);
                    async move {
                        let transport = connector.open(&config).await?;
                        transport.send(setup).await?;
                        let _ = slot.replace(Some(transport)).await;
                        Ok(())
                    }
                },
            )
            .await;

        match result {
            Ok(()) => {
                tracing::info!("Reconnected");
                self.touch_activity();
                true
            }
            Err(ClientError::Cancelled) => false,
            Err(err) => {
                self.fail(err);
                false
            }
        }
    }

    fn fail(&self, err: ClientError) {
        tracing::error!(error = %err, "Session failed");
        self.state
            .lock()
            .expect("state machine poisoned")
            .apply(StateInput::Failure);
        self.bus.emit(SessionEvent::SessionError {
            kind: err.kind(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        });
    }

    fn touch_activity(&self) {
        *self.last_activity.lock().expect("activity clock poisoned") = Instant::now();
    }
}
