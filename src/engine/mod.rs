//! Conversation engine
//!
//! One `ConversationEngine` owns a whole conversation: history, turn state,
//! the active capture, and whichever capability call or playback is in
//! flight. It runs as a single task; hosts talk to it through an
//! [`EngineHandle`].
//!
//! The driver loop races the current activity against incoming commands, so
//! `close` interrupts any suspended operation. In-flight work lives in
//! `self.pending` and survives commands that do not cancel it.

mod host;
mod state;

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot, watch};

pub use host::{HostInterface, NoopHost};
pub use state::{EngineState, TurnEvent, transition};

use crate::capability::Capabilities;
use crate::conversation::{
    AssistantReply, ContextAssembler, ConversationHistory, ConversationTurn, SiteContent,
};
use crate::error::Operation;
use crate::voice::{
    AudioCaptureSession, AudioClip, CaptureSession, NoopTranscriptView, ResourceKind,
    ResourceTracker, SpeechPlaybackSession, StopReason, TranscriptView,
};
use crate::{Error, Result};

/// Commands buffered between the handle and the engine task
const COMMAND_QUEUE: usize = 32;

/// Turn policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// User/assistant pairs kept in history
    pub max_exchanges: usize,
    /// Consecutive empty transcripts before the conversation goes idle
    pub max_empty_attempts: u32,
    /// Upper bound on each transcription, completion and synthesis call
    pub request_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_exchanges: 5,
            max_empty_attempts: 3,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Requests from the host
#[derive(Debug)]
pub enum Command {
    /// Begin listening; answered once the microphone opened or failed
    StartTurn(oneshot::Sender<Result<()>>),
    /// Manual stop: ends capture while listening, closes otherwise
    Stop,
    /// Cancel everything and clear history; answered after cleanup
    Close(oneshot::Sender<()>),
    /// Read the current state and history
    Snapshot(oneshot::Sender<EngineSnapshot>),
}

/// Point-in-time view of an engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSnapshot {
    pub state: EngineState,
    pub history: Vec<ConversationTurn>,
    pub empty_attempts: u32,
}

/// Result of one suspended activity
enum Step {
    Opened(Result<CaptureSession>),
    CaptureEnded(Result<StopReason>),
    Transcribed(Result<String>),
    Completed(Result<String>),
    Synthesized(Result<AudioClip>),
    Played(Result<()>),
}

/// The voice conversation state machine
pub struct ConversationEngine {
    config: EngineConfig,
    capture: Arc<AudioCaptureSession>,
    playback: Arc<SpeechPlaybackSession>,
    capabilities: Capabilities,
    assembler: ContextAssembler,
    site: SiteContent,
    view: Arc<dyn TranscriptView>,
    host: Arc<dyn HostInterface>,
    resources: ResourceTracker,

    state: EngineState,
    state_tx: watch::Sender<EngineState>,
    history: ConversationHistory,
    empty_attempts: u32,
    active_capture: Option<CaptureSession>,
    pending: Option<BoxFuture<'static, Step>>,
    start_reply: Option<oneshot::Sender<Result<()>>>,
    redirect: Option<String>,
}

impl ConversationEngine {
    /// Create an idle engine
    ///
    /// `resources` must be the tracker the capture and playback sessions were
    /// built with.
    #[must_use]
    pub fn new(
        config: EngineConfig,
        capture: AudioCaptureSession,
        playback: SpeechPlaybackSession,
        capabilities: Capabilities,
        resources: ResourceTracker,
    ) -> Self {
        let (state_tx, _) = watch::channel(EngineState::Idle);
        Self {
            config,
            capture: Arc::new(capture),
            playback: Arc::new(playback),
            capabilities,
            assembler: ContextAssembler::default(),
            site: SiteContent::default(),
            view: Arc::new(NoopTranscriptView),
            host: Arc::new(NoopHost),
            resources,
            state: EngineState::Idle,
            state_tx,
            history: ConversationHistory::new(config.max_exchanges),
            empty_attempts: 0,
            active_capture: None,
            pending: None,
            start_reply: None,
            redirect: None,
        }
    }

    /// Site content and prompt assembly settings
    #[must_use]
    pub fn with_context(mut self, assembler: ContextAssembler, site: SiteContent) -> Self {
        self.assembler = assembler;
        self.site = site;
        self
    }

    /// Where live captions and recent turns are rendered
    #[must_use]
    pub fn with_view(mut self, view: Arc<dyn TranscriptView>) -> Self {
        self.view = view;
        self
    }

    /// Receiver of mic, state, bubble, error and redirect updates
    #[must_use]
    pub fn with_host(mut self, host: Arc<dyn HostInterface>) -> Self {
        self.host = host;
        self
    }

    /// Run the engine on the current runtime and return a handle to it
    #[must_use]
    pub fn spawn(self) -> EngineHandle {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);
        let handle = EngineHandle {
            commands: commands_tx,
            state: self.state_tx.subscribe(),
            resources: self.resources.clone(),
        };
        tokio::spawn(self.run(commands_rx));
        handle
    }

    /// Drive the conversation until every command sender is dropped
    ///
    /// Closes the conversation before returning.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        tracing::debug!("conversation engine started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                step = self.next_step() => self.apply(step),
            }
        }

        self.close();
        tracing::debug!("conversation engine stopped");
    }

    #[must_use]
    pub const fn state(&self) -> EngineState {
        self.state
    }

    #[must_use]
    pub const fn history(&self) -> &ConversationHistory {
        &self.history
    }

    #[must_use]
    pub const fn resources(&self) -> &ResourceTracker {
        &self.resources
    }

    #[must_use]
    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            state: self.state,
            history: self.history.turns().cloned().collect(),
            empty_attempts: self.empty_attempts,
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::StartTurn(reply) => self.start_turn(reply),
            Command::Stop => self.stop(),
            Command::Close(ack) => {
                self.close();
                let _ = ack.send(());
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    /// Wait for whatever the current state is suspended on
    ///
    /// Cancel-safe: capture progress lives in the session and in-flight work
    /// lives in `self.pending`.
    async fn next_step(&mut self) -> Step {
        if let Some(session) = self.active_capture.as_mut() {
            return Step::CaptureEnded(session.wait_for_stop(self.view.as_ref()).await);
        }
        match self.pending.as_mut() {
            Some(task) => task.await,
            None => std::future::pending().await,
        }
    }

    fn apply(&mut self, step: Step) {
        self.pending = None;
        match step {
            Step::Opened(result) => self.on_opened(result),
            Step::CaptureEnded(Ok(reason)) => {
                tracing::debug!(?reason, "capture ended");
                self.finish_capture();
            }
            Step::CaptureEnded(Err(e))
            | Step::Transcribed(Err(e))
            | Step::Completed(Err(e))
            | Step::Synthesized(Err(e))
            | Step::Played(Err(e)) => self.fail(&e),
            Step::Transcribed(Ok(transcript)) => self.complete_turn(&transcript),
            Step::Completed(Ok(text)) => self.on_completed(&text),
            Step::Synthesized(Ok(clip)) => self.on_synthesized(clip),
            Step::Played(Ok(())) => self.on_played(),
        }
    }

    /// Begin a user-initiated turn
    ///
    /// Allowed from Idle, or from Listening to restart capture. Resets the
    /// empty-attempt counter. The reply settles once the microphone is open;
    /// a refusal leaves the engine where it was.
    fn start_turn(&mut self, reply: oneshot::Sender<Result<()>>) {
        let opening = self.pending.is_some();
        match self.state {
            EngineState::Idle if opening => {
                let _ = reply.send(Err(Error::InvalidState(
                    "a turn is already starting".to_string(),
                )));
            }
            EngineState::Idle | EngineState::Listening => {
                if let Some(session) = self.active_capture.take() {
                    self.capture.abort(session);
                }
                self.pending = None;
                if let Some(previous) = self.start_reply.take() {
                    let _ = previous.send(Err(Error::InvalidState(
                        "superseded by a newer turn".to_string(),
                    )));
                }
                self.empty_attempts = 0;
                self.open_capture(Some(reply));
            }
            state => {
                let _ = reply.send(Err(Error::InvalidState(format!(
                    "cannot start a turn while {state}"
                ))));
            }
        }
    }

    /// Manual stop from the host
    fn stop(&mut self) {
        match self.state {
            EngineState::Listening if self.active_capture.is_some() => {
                tracing::debug!("manual stop");
                self.finish_capture();
            }
            EngineState::Idle | EngineState::Listening if self.pending.is_some() => {
                self.abandon_open();
            }
            EngineState::Idle => {}
            _ => self.close(),
        }
    }

    /// Cancel a pending microphone open, keeping the conversation
    fn abandon_open(&mut self) {
        tracing::debug!(state = %self.state, "manual stop before the microphone opened");
        self.pending = None;
        self.empty_attempts = 0;
        if let Some(reply) = self.start_reply.take() {
            let _ = reply.send(Err(Error::InvalidState(
                "stopped before the microphone opened".to_string(),
            )));
        }
        self.enter(TurnEvent::Abandoned);
    }

    /// Cancel everything, clear history and return to Idle
    ///
    /// No-op when already idle with nothing held.
    pub fn close(&mut self) {
        let busy = self.pending.is_some() || self.active_capture.is_some();
        if self.state == EngineState::Idle && !busy && self.history.is_empty() {
            return;
        }

        tracing::info!(state = %self.state, "closing conversation");
        self.enter(TurnEvent::Close);
        self.release();
        if let Some(reply) = self.start_reply.take() {
            let _ = reply.send(Err(Error::Closed));
        }
        self.history.clear();
        self.empty_attempts = 0;
        self.view.clear();
        self.enter(TurnEvent::Closed);
    }

    /// Handle a clip-level transcript
    ///
    /// Blank text counts as an empty attempt: the engine re-arms until the
    /// attempt limit, then goes idle without surfacing an error. Anything
    /// else is appended as a user turn before the completion request is
    /// issued.
    fn complete_turn(&mut self, transcript: &str) {
        let transcript = transcript.trim();

        if transcript.is_empty() {
            self.empty_attempts += 1;
            let exhausted = self.empty_attempts >= self.config.max_empty_attempts;
            tracing::info!(
                attempts = self.empty_attempts,
                max = self.config.max_empty_attempts,
                "empty transcription"
            );
            self.enter(TurnEvent::EmptyTranscript { exhausted });
            if exhausted {
                tracing::info!("no speech after repeated attempts, going idle");
                self.empty_attempts = 0;
            } else {
                self.open_capture(None);
            }
            return;
        }

        self.empty_attempts = 0;
        tracing::info!(transcript, "user turn");
        self.host.append_bubble(self.history.append_user(transcript));
        self.view.show_recent(&self.history.recent(2));

        let prompt = self.assembler.build(&self.history, &self.site).render();
        self.enter(TurnEvent::NonEmptyTranscript);

        let completer = Arc::clone(&self.capabilities.completer);
        let resources = self.resources.clone();
        let limit = self.config.request_timeout;
        self.pending = Some(Box::pin(async move {
            let _request = resources.acquire(ResourceKind::CompletionRequest);
            Step::Completed(bounded(Operation::Complete, limit, completer.complete(&prompt)).await)
        }));
    }

    fn on_opened(&mut self, result: Result<CaptureSession>) {
        let reply = self.start_reply.take();

        match result {
            Ok(session) => {
                self.active_capture = Some(session);
                self.view.clear();
                if self.state == EngineState::Idle {
                    self.enter(TurnEvent::UserStartsTurn);
                }
                tracing::info!("listening");
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(()));
                }
            }
            Err(e) => {
                if self.state == EngineState::Idle {
                    tracing::warn!(error = %e, "turn not started");
                    self.host.show_error(&e);
                } else {
                    self.fail(&e);
                }
                if let Some(reply) = reply {
                    let _ = reply.send(Err(e));
                }
            }
        }
    }

    /// Stop the active capture and hand the clip to transcription
    fn finish_capture(&mut self) {
        let Some(mut session) = self.active_capture.take() else {
            return;
        };
        let clip = self.capture.stop(&mut session);
        drop(session);

        match clip {
            Ok(clip) => {
                self.enter(TurnEvent::CaptureStopped);
                let transcriber = Arc::clone(&self.capabilities.transcriber);
                let limit = self.config.request_timeout;
                self.pending = Some(Box::pin(async move {
                    Step::Transcribed(
                        bounded(Operation::Transcribe, limit, transcriber.transcribe(&clip)).await,
                    )
                }));
            }
            Err(e) => self.fail(&e),
        }
    }

    fn on_completed(&mut self, text: &str) {
        let reply = AssistantReply::parse(text);
        if reply.speech.is_empty() {
            self.fail(&Error::Completion("empty reply".to_string()));
            return;
        }

        tracing::info!(reply = %reply.speech, redirect = ?reply.redirect_url, "assistant turn");
        self.host
            .append_bubble(self.history.append_assistant(reply.speech.clone()));
        self.view.show_recent(&self.history.recent(2));
        self.redirect = reply.redirect_url;

        let synthesizer = Arc::clone(&self.capabilities.synthesizer);
        let limit = self.config.request_timeout;
        let speech = reply.speech;
        self.pending = Some(Box::pin(async move {
            Step::Synthesized(
                bounded(Operation::Synthesize, limit, synthesizer.synthesize(&speech)).await,
            )
        }));
    }

    fn on_synthesized(&mut self, clip: AudioClip) {
        self.enter(TurnEvent::ReplyReady);
        let playback = Arc::clone(&self.playback);
        self.pending = Some(Box::pin(async move {
            Step::Played(playback.play(&clip).await)
        }));
    }

    fn on_played(&mut self) {
        if let Some(url) = self.redirect.take() {
            tracing::info!(url = %url, "redirecting");
            self.host.redirect(&url);
        }
        self.enter(TurnEvent::PlaybackEnded);
        self.open_capture(None);
    }

    /// Schedule a microphone open
    fn open_capture(&mut self, reply: Option<oneshot::Sender<Result<()>>>) {
        let capture = Arc::clone(&self.capture);
        self.start_reply = reply;
        self.pending = Some(Box::pin(async move { Step::Opened(capture.start().await) }));
    }

    /// Release everything, surface the error and return to Idle
    fn fail(&mut self, error: &Error) {
        tracing::error!(error = %error, kind = ?error.kind(), state = %self.state, "turn failed");
        self.release();
        self.empty_attempts = 0;
        self.host.show_error(error);
        self.enter(TurnEvent::Failed);
    }

    /// Drop in-flight work and the active capture
    fn release(&mut self) {
        self.pending = None;
        self.redirect = None;
        if let Some(session) = self.active_capture.take() {
            self.capture.abort(session);
        }
    }

    fn enter(&mut self, event: TurnEvent) {
        let Some(next) = transition(self.state, event) else {
            tracing::warn!(state = %self.state, ?event, "ignoring invalid transition");
            return;
        };
        if next == self.state {
            return;
        }

        tracing::debug!(from = %self.state, to = %next, ?event, "state change");
        let mic_was_enabled = self.state.mic_enabled();
        self.state = next;
        self.state_tx.send_replace(next);
        self.host.state_changed(next);
        if next.mic_enabled() != mic_was_enabled {
            self.host.set_mic_enabled(next.mic_enabled());
        }
    }
}

/// Apply the capability timeout
async fn bounded<T>(
    operation: Operation,
    limit: Duration,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| Error::Timeout {
            operation,
            secs: limit.as_secs(),
        })?
}

/// Host-side handle to a running engine
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<EngineState>,
    resources: ResourceTracker,
}

impl EngineHandle {
    /// Start a turn, resolving once the microphone is open
    ///
    /// # Errors
    ///
    /// Returns `Error::PermissionDenied` if microphone access is refused,
    /// `Error::InvalidState` if a turn is already in progress, or
    /// `Error::Closed` if the engine has stopped
    pub async fn start_turn(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::StartTurn(tx)).await?;
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Manual stop
    ///
    /// While listening this ends the utterance, or abandons the turn if the
    /// microphone has not reopened yet; in any later state it closes the
    /// conversation.
    ///
    /// # Errors
    ///
    /// Returns `Error::Closed` if the engine has stopped
    pub async fn stop(&self) -> Result<()> {
        self.send(Command::Stop).await
    }

    /// Close the conversation and wait for cleanup
    ///
    /// When this returns no microphone track or audio context is held.
    ///
    /// # Errors
    ///
    /// Returns `Error::Closed` if the engine has stopped
    pub async fn close(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Close(tx)).await?;
        rx.await.map_err(|_| Error::Closed)
    }

    /// Current state and history
    ///
    /// # Errors
    ///
    /// Returns `Error::Closed` if the engine has stopped
    pub async fn snapshot(&self) -> Result<EngineSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx)).await?;
        rx.await.map_err(|_| Error::Closed)
    }

    /// Latest published state
    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    /// Receiver for state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state.clone()
    }

    /// Wait until the engine reaches `target`
    ///
    /// # Errors
    ///
    /// Returns `Error::Closed` if the engine stops first
    pub async fn wait_for(&self, target: EngineState) -> Result<()> {
        let mut rx = self.state.clone();
        rx.wait_for(|state| *state == target)
            .await
            .map(|_| ())
            .map_err(|_| Error::Closed)
    }

    /// The engine's resource ledger
    #[must_use]
    pub const fn resources(&self) -> &ResourceTracker {
        &self.resources
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).await.map_err(|_| Error::Closed)
    }
}
