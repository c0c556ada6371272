//! Conversation session state machine
//!
//! One [`ConversationSession`] owns the state, the history and the adapters
//! for a single conversation. Every input (caller commands as well as
//! adapter callbacks and completions) arrives as a [`SessionEvent`] on one
//! ingress channel and is handled to completion by [`handle_event`] before
//! the next one is looked at.
//!
//! Asynchronous work (policy evaluation, playback, timers) runs as tokio
//! tasks on the session's own runtime. Each task's only effect is posting an
//! epoch-tagged completion back to the ingress, so state is only ever
//! mutated on the thread handling events.
//!
//! [`handle_event`]: ConversationSession::handle_event

use super::events::{SessionEvent, SessionNotification};
use super::handle::SessionHandle;
use super::state::{Epoch, SessionState, SharedSessionState};
use crate::config::SessionConfig;
use crate::conversation::ConversationHistory;
use crate::policy::{DialoguePolicy, PolicyResponse, RuleEngine};
use crate::speech::{
    GrantedMicrophone, MicrophoneAccess, RecognitionAdapter, RecognitionEvent, RecognitionSink,
    SynthesisAdapter,
};
use crate::{ParleyError, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::runtime::{self, Runtime};
use tokio::task::JoinHandle as TaskHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// The conversation loop: Idle → Listening → Processing → Speaking → Idle
pub struct ConversationSession {
    id: Uuid,
    config: SessionConfig,

    state: SessionState,
    epoch: Epoch,
    history: ConversationHistory,
    /// Set while speaking a response that closes the conversation
    closing: bool,
    conversation_closed: bool,
    shut_down: bool,

    recognizer: Box<dyn RecognitionAdapter>,
    synthesizer: Arc<dyn SynthesisAdapter>,
    policy: Arc<dyn DialoguePolicy>,
    microphone: Arc<dyn MicrophoneAccess>,

    runtime: Option<Runtime>,
    tasks: Vec<TaskHandle<()>>,

    // Unbounded: recognizers may call back synchronously from inside `start`
    ingress_tx: Sender<SessionEvent>,
    ingress_rx: Receiver<SessionEvent>,
    notify_tx: Sender<SessionNotification>,
    shared: SharedSessionState,
}

impl ConversationSession {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Unique id, used as a tracing field
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Current epoch
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Turns recorded so far
    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Single ingress: dispatch one event on (current state, event kind)
    pub fn handle_event(&mut self, event: SessionEvent) {
        if self.shut_down {
            debug!(session = %self.id, "Session shut down, ignoring {}", event.kind());
            return;
        }

        if let Some(epoch) = event.epoch() {
            if epoch != self.epoch {
                debug!(
                    session = %self.id,
                    "Discarding stale {} from epoch {} (current {})",
                    event.kind(),
                    epoch,
                    self.epoch
                );
                return;
            }
        }

        match (self.state, event) {
            (_, SessionEvent::StartSession) => self.start_session(),
            (SessionState::Listening, SessionEvent::StopListening) => {
                info!(session = %self.id, "Stop listening, waiting for final result");
                self.recognizer.stop();
            }
            (_, SessionEvent::Reset) => self.reset(),
            (_, SessionEvent::Shutdown) => self.shutdown(),

            (_, SessionEvent::Recognition { event: RecognitionEvent::Start, .. }) => {
                self.notify(SessionNotification::RecognitionStarted);
            }
            (_, SessionEvent::Recognition { event: RecognitionEvent::End, .. }) => {
                debug!(session = %self.id, state = %self.state, "Recognizer reported end of speech");
                self.notify(SessionNotification::RecognitionEnded);
            }
            (
                SessionState::Listening,
                SessionEvent::Recognition {
                    event: RecognitionEvent::Transcript(result),
                    ..
                },
            ) => {
                if result.is_final {
                    self.on_final_result(result.text);
                } else {
                    self.notify(SessionNotification::PartialTranscript(result.text));
                }
            }
            (
                SessionState::Listening,
                SessionEvent::Recognition {
                    event: RecognitionEvent::Error(kind),
                    ..
                },
            ) => {
                self.recognizer.cancel();
                self.fail(ParleyError::RecognitionFailed(kind.to_string()));
            }

            (SessionState::Processing, SessionEvent::PolicyCompleted { outcome, .. }) => {
                match outcome {
                    Ok(response) => self.on_policy_response(response),
                    Err(e) => {
                        self.discard_unanswered_turn();
                        self.fail(e);
                    }
                }
            }

            (SessionState::Speaking, SessionEvent::SynthesisCompleted { outcome, .. }) => {
                self.on_synthesis_completed(outcome)
            }
            (SessionState::Speaking, SessionEvent::GraceElapsed { .. }) => {
                self.close_conversation()
            }
            (SessionState::Error, SessionEvent::ErrorRecovered { .. }) => {
                info!(session = %self.id, "Recovered from error");
                self.transition(SessionState::Idle);
            }

            (state, event) => {
                warn!(session = %self.id, "Ignoring {} in state {}", event.kind(), state);
            }
        }
    }

    /// Wait up to `timeout` for one event and handle it
    ///
    /// Returns false if nothing arrived in time.
    pub fn step(&mut self, timeout: Duration) -> bool {
        match self.ingress_rx.recv_timeout(timeout) {
            Ok(event) => {
                self.handle_event(event);
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
            // The session holds a sender itself, so this cannot happen
            Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Handle events until `done` holds or `timeout` expires
    ///
    /// Returns whether `done` was reached.
    pub fn run_until(
        &mut self,
        timeout: Duration,
        mut done: impl FnMut(&ConversationSession) -> bool,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        while !done(self) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            self.step(remaining);
        }
        true
    }

    /// Run the event loop on a dedicated thread until shutdown
    pub fn start(mut self) -> Result<JoinHandle<()>> {
        let name = format!("parley-session-{}", &self.id.to_string()[..8]);
        let handle = thread::Builder::new().name(name).spawn(move || {
            info!(session = %self.id, "Session worker starting");
            while !self.shut_down {
                match self.ingress_rx.recv() {
                    Ok(event) => self.handle_event(event),
                    Err(_) => {
                        error!("Session ingress disconnected");
                        break;
                    }
                }
            }
            info!(session = %self.id, "Session worker stopped");
        })?;
        Ok(handle)
    }

    // === Transitions ===

    fn start_session(&mut self) {
        if !self.state.can_start() {
            debug!(session = %self.id, state = %self.state, "start_session ignored while busy");
            return;
        }

        // Supersedes a pending error recovery
        self.abort_tasks();
        self.epoch = self.epoch.next();

        if self.conversation_closed {
            self.conversation_closed = false;
            self.history.clear();
            self.publish_transcript();
        }

        if let Err(e) = self.microphone.request_access() {
            self.fail(e);
            return;
        }

        let sink = RecognitionSink::new(self.epoch, self.ingress_tx.clone());
        match self.recognizer.start(&self.config.locale, sink) {
            Ok(()) => {
                info!(session = %self.id, epoch = %self.epoch, "Listening ({})", self.config.locale);
                self.transition(SessionState::Listening);
            }
            Err(e) => {
                let e = match e {
                    ParleyError::MicrophoneUnavailable(_) => e,
                    other => ParleyError::MicrophoneUnavailable(other.to_string()),
                };
                self.fail(e);
            }
        }
    }

    fn on_final_result(&mut self, text: String) {
        self.recognizer.stop();

        let text = text.trim();
        if text.is_empty() {
            info!(session = %self.id, "Nothing heard");
            self.transition(SessionState::Idle);
            return;
        }

        info!(session = %self.id, "User: {}", text);
        self.history.push_user(text);
        self.publish_transcript();
        self.transition(SessionState::Processing);
        self.evaluate_policy();
    }

    fn evaluate_policy(&mut self) {
        let policy = Arc::clone(&self.policy);
        let history = self.history.clone();
        let bound = self.config.policy_timeout();
        let epoch = self.epoch;
        let tx = self.ingress_tx.clone();

        self.spawn(async move {
            let evaluation = tokio::task::spawn_blocking(move || policy.respond(&history));
            let outcome = match tokio::time::timeout(bound, evaluation).await {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(e)) => Err(ParleyError::PolicyFailed(e.to_string())),
                Err(_) => Err(ParleyError::PolicyTimeout(bound.as_millis() as u64)),
            };
            let _ = tx.send(SessionEvent::PolicyCompleted { epoch, outcome });
        });
    }

    /// The phrase the policy failed on must not steer later turns
    fn discard_unanswered_turn(&mut self) {
        if let Some(turn) = self.history.discard_unanswered() {
            debug!(session = %self.id, "Dropping unanswered turn: {}", turn.content());
            self.publish_transcript();
        }
    }

    fn on_policy_response(&mut self, response: PolicyResponse) {
        info!(session = %self.id, end_session = response.end_session, "System: {}", response.content);
        self.history.push_system(&response.content);
        self.closing = response.end_session;
        self.publish_transcript();
        self.transition(SessionState::Speaking);

        let speech = self.synthesizer.speak(&response.content);
        let epoch = self.epoch;
        let tx = self.ingress_tx.clone();
        self.spawn(async move {
            let outcome = speech.await;
            let _ = tx.send(SessionEvent::SynthesisCompleted { epoch, outcome });
        });
    }

    fn on_synthesis_completed(&mut self, outcome: Result<()>) {
        match outcome {
            Ok(()) if self.closing => {
                let grace = self.config.end_session_grace();
                debug!(session = %self.id, "Final response spoken, closing in {:?}", grace);
                self.schedule(grace, |epoch| SessionEvent::GraceElapsed { epoch });
            }
            Ok(()) => self.transition(SessionState::Idle),
            Err(e) => {
                if self.closing {
                    self.closing = false;
                    self.mark_closed();
                }
                let e = match e {
                    ParleyError::SynthesisFailed(_) => e,
                    other => ParleyError::SynthesisFailed(other.to_string()),
                };
                self.fail(e);
            }
        }
    }

    fn close_conversation(&mut self) {
        info!(session = %self.id, "Conversation ended");
        self.closing = false;
        self.mark_closed();
        self.transition(SessionState::Idle);
        self.notify(SessionNotification::ConversationEnded);
    }

    fn mark_closed(&mut self) {
        self.conversation_closed = true;
        self.shared.update(|s| s.conversation_closed = true);
    }

    fn reset(&mut self) {
        info!(session = %self.id, state = %self.state, "Reset");
        self.cancel_in_flight();

        self.epoch = self.epoch.next();
        self.history.clear();
        self.closing = false;
        self.conversation_closed = false;
        self.shared.update(|s| {
            s.conversation_closed = false;
            s.last_error = None;
        });

        self.publish_transcript();
        self.transition(SessionState::Idle);
    }

    fn shutdown(&mut self) {
        info!(session = %self.id, "Shutdown requested");
        self.cancel_in_flight();
        self.epoch = self.epoch.next();
        self.shut_down = true;

        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(self.config.shutdown_timeout());
        }
        self.notify(SessionNotification::Shutdown);
    }

    fn fail(&mut self, error: ParleyError) {
        warn!(session = %self.id, kind = error.kind(), "Session failure: {}", error);

        let shown = error.clone();
        self.shared.update(|s| s.last_error = Some(shown));
        self.transition(SessionState::Error);
        self.notify(SessionNotification::Error(error));
        self.schedule(self.config.error_recovery(), |epoch| {
            SessionEvent::ErrorRecovered { epoch }
        });
    }

    fn transition(&mut self, next: SessionState) {
        let previous = self.state;
        self.state = next;
        debug!(session = %self.id, epoch = %self.epoch, "{} -> {}", previous, next);

        let epoch = self.epoch;
        self.shared.update(|s| {
            s.state = next;
            s.epoch = epoch;
        });
        self.notify(SessionNotification::StateChanged { state: next, epoch });
    }

    // === Effects ===

    /// Cancel whatever the current state has outstanding
    fn cancel_in_flight(&mut self) {
        match self.state {
            SessionState::Listening => self.recognizer.cancel(),
            SessionState::Speaking => self.synthesizer.cancel(),
            _ => {}
        }
        self.abort_tasks();
    }

    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    fn spawn<F>(&mut self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tasks.retain(|task| !task.is_finished());
        match &self.runtime {
            Some(runtime) => self.tasks.push(runtime.spawn(future)),
            None => warn!(session = %self.id, "Runtime stopped, dropping task"),
        }
    }

    /// Post an event tagged with the current epoch after `delay`
    fn schedule(&mut self, delay: Duration, event: impl FnOnce(Epoch) -> SessionEvent) {
        let event = event(self.epoch);
        let tx = self.ingress_tx.clone();
        self.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event);
        });
    }

    fn publish_transcript(&mut self) {
        let transcript = self.history.turns().to_vec();
        let shown = transcript.clone();
        self.shared.update(|s| s.transcript = shown);
        self.notify(SessionNotification::TranscriptUpdated(transcript));
    }

    fn notify(&self, notification: SessionNotification) {
        match self.notify_tx.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(n)) => {
                debug!(session = %self.id, "Presentation lagging, dropped {:?}", n);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

impl Drop for ConversationSession {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Builder for creating a conversation session
pub struct SessionBuilder {
    config: SessionConfig,
    recognizer: Option<Box<dyn RecognitionAdapter>>,
    synthesizer: Option<Arc<dyn SynthesisAdapter>>,
    policy: Arc<dyn DialoguePolicy>,
    microphone: Arc<dyn MicrophoneAccess>,
}

impl SessionBuilder {
    /// Create a builder with the default config, rule engine and granted mic
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
            recognizer: None,
            synthesizer: None,
            policy: Arc::new(RuleEngine::default()),
            microphone: Arc::new(GrantedMicrophone),
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_recognizer(mut self, recognizer: impl RecognitionAdapter + 'static) -> Self {
        self.recognizer = Some(Box::new(recognizer));
        self
    }

    pub fn with_synthesizer(mut self, synthesizer: impl SynthesisAdapter + 'static) -> Self {
        self.synthesizer = Some(Arc::new(synthesizer));
        self
    }

    pub fn with_policy(mut self, policy: impl DialoguePolicy + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    pub fn with_microphone(mut self, microphone: impl MicrophoneAccess + 'static) -> Self {
        self.microphone = Arc::new(microphone);
        self
    }

    /// Build the session and a handle for controlling it
    pub fn build(self) -> Result<(ConversationSession, SessionHandle)> {
        self.config.validate()?;

        let recognizer = self
            .recognizer
            .ok_or_else(|| ParleyError::ConfigError("no recognition adapter configured".into()))?;
        let synthesizer = self
            .synthesizer
            .ok_or_else(|| ParleyError::ConfigError("no synthesis adapter configured".into()))?;

        let runtime = runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("parley-session-rt")
            .enable_all()
            .build()?;

        let (ingress_tx, ingress_rx) = unbounded();
        let (notify_tx, notify_rx) = bounded(self.config.notification_buffer_size);
        let shared = SharedSessionState::new();
        let id = Uuid::new_v4();

        let handle = SessionHandle::new(id, ingress_tx.clone(), notify_rx, shared.clone());
        let session = ConversationSession {
            id,
            config: self.config,
            state: SessionState::Idle,
            epoch: Epoch::default(),
            history: ConversationHistory::new(),
            closing: false,
            conversation_closed: false,
            shut_down: false,
            recognizer,
            synthesizer,
            policy: self.policy,
            microphone: self.microphone,
            runtime: Some(runtime),
            tasks: Vec::new(),
            ingress_tx,
            ingress_rx,
            notify_tx,
            shared,
        };

        debug!(session = %id, "Session created");
        Ok((session, handle))
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Speaker;
    use crate::speech::{
        DeniedMicrophone, RecognitionErrorKind, RecognizerCall, ScriptedRecognizer,
        ScriptedSynthesizer, ScriptedUtterance,
    };

    const WAIT: Duration = Duration::from_secs(2);

    fn test_config() -> SessionConfig {
        SessionConfig::new()
            .with_end_session_grace(Duration::from_millis(150))
            .with_error_recovery(Duration::from_millis(30))
            .with_policy_timeout(Duration::from_millis(500))
    }

    fn session_with(
        recognizer: ScriptedRecognizer,
        synthesizer: ScriptedSynthesizer,
    ) -> (ConversationSession, SessionHandle) {
        ConversationSession::builder()
            .with_config(test_config())
            .with_recognizer(recognizer)
            .with_synthesizer(synthesizer)
            .build()
            .unwrap()
    }

    fn reach(session: &mut ConversationSession, state: SessionState) -> bool {
        session.run_until(WAIT, |s| s.state() == state)
    }

    #[test]
    fn test_full_turn_returns_to_idle() {
        let recognizer = ScriptedRecognizer::saying(["buying a drone"]);
        let synthesizer = ScriptedSynthesizer::default();
        let (mut session, _handle) = session_with(recognizer.clone(), synthesizer.clone());

        session.handle_event(SessionEvent::StartSession);
        assert_eq!(session.state(), SessionState::Listening);

        assert!(reach(&mut session, SessionState::Speaking));
        assert!(reach(&mut session, SessionState::Idle));

        let turns = session.history().turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].speaker(), Speaker::User);
        assert_eq!(turns[0].content(), "buying a drone");
        assert_eq!(turns[1].speaker(), Speaker::System);
        assert!(turns[1].content().contains("drone"));

        assert_eq!(synthesizer.spoken(), vec![turns[1].content().to_string()]);
        assert_eq!(
            recognizer.calls(),
            vec![RecognizerCall::Start("en-US".into()), RecognizerCall::Stop]
        );
    }

    #[test]
    fn test_start_while_busy_is_noop() {
        let recognizer = ScriptedRecognizer::new([ScriptedUtterance::Silence]);
        let (mut session, _handle) = session_with(recognizer.clone(), ScriptedSynthesizer::default());

        session.handle_event(SessionEvent::StartSession);
        let epoch = session.epoch();
        assert_eq!(session.state(), SessionState::Listening);

        session.handle_event(SessionEvent::StartSession);
        assert_eq!(session.state(), SessionState::Listening);
        assert_eq!(session.epoch(), epoch);
        assert!(session.history().is_empty());
        assert_eq!(recognizer.calls().len(), 1);
    }

    #[test]
    fn test_microphone_denied_goes_to_error_then_idle() {
        let (mut session, _handle) = ConversationSession::builder()
            .with_config(test_config())
            .with_recognizer(ScriptedRecognizer::saying(["hello"]))
            .with_synthesizer(ScriptedSynthesizer::default())
            .with_microphone(DeniedMicrophone("permission denied".into()))
            .build()
            .unwrap();

        session.handle_event(SessionEvent::StartSession);
        assert_eq!(session.state(), SessionState::Error);
        assert!(matches!(
            session.shared.last_error(),
            Some(ParleyError::MicrophoneUnavailable(_))
        ));

        assert!(reach(&mut session, SessionState::Idle));
        assert!(session.history().is_empty());
    }

    #[test]
    fn test_recognition_error_appends_nothing() {
        let recognizer =
            ScriptedRecognizer::new([ScriptedUtterance::Fail(RecognitionErrorKind::NoMatch)]);
        let (mut session, _handle) = session_with(recognizer, ScriptedSynthesizer::default());

        session.handle_event(SessionEvent::StartSession);
        assert!(reach(&mut session, SessionState::Error));
        assert!(session.history().is_empty());

        assert!(reach(&mut session, SessionState::Idle));
        assert!(session.history().is_empty());
    }

    #[test]
    fn test_blank_transcript_returns_to_idle() {
        let recognizer = ScriptedRecognizer::saying(["   "]);
        let (mut session, _handle) = session_with(recognizer, ScriptedSynthesizer::default());

        session.handle_event(SessionEvent::StartSession);
        assert!(reach(&mut session, SessionState::Idle));
        assert!(session.history().is_empty());
    }

    #[test]
    fn test_reset_from_every_state() {
        for target in [
            SessionState::Idle,
            SessionState::Listening,
            SessionState::Processing,
            SessionState::Speaking,
            SessionState::Error,
        ] {
            let recognizer = match target {
                SessionState::Listening => ScriptedRecognizer::new([ScriptedUtterance::Silence]),
                SessionState::Error => ScriptedRecognizer::new([ScriptedUtterance::Fail(
                    RecognitionErrorKind::Audio,
                )]),
                _ => ScriptedRecognizer::saying(["buying a drone"]),
            };
            let synthesizer = ScriptedSynthesizer::new(Duration::from_millis(300));
            let (mut session, _handle) = ConversationSession::builder()
                .with_config(test_config().with_error_recovery(Duration::from_secs(5)))
                .with_recognizer(recognizer)
                .with_synthesizer(synthesizer)
                .with_policy(|history: &ConversationHistory| {
                    std::thread::sleep(Duration::from_millis(100));
                    PolicyResponse::reply(format!("heard {} turns", history.len()))
                })
                .build()
                .unwrap();

            if target != SessionState::Idle {
                session.handle_event(SessionEvent::StartSession);
                assert!(reach(&mut session, target), "never reached {}", target);
            }

            session.handle_event(SessionEvent::Reset);
            assert_eq!(session.state(), SessionState::Idle, "reset from {}", target);
            assert!(session.history().is_empty(), "reset from {}", target);

            // Nothing from the cancelled cycle may land afterwards
            while session.step(Duration::from_millis(400)) {}
            assert_eq!(session.state(), SessionState::Idle, "late event after {}", target);
            assert!(session.history().is_empty(), "late turn after {}", target);
        }
    }

    #[test]
    fn test_stale_recognition_callback_is_ignored() {
        let recognizer = ScriptedRecognizer::new([ScriptedUtterance::Silence]);
        let (mut session, _handle) = session_with(recognizer.clone(), ScriptedSynthesizer::default());

        session.handle_event(SessionEvent::StartSession);
        let stale_sink = recognizer.last_sink().unwrap();
        session.handle_event(SessionEvent::Reset);

        stale_sink.on_final_result("buying a drone");
        stale_sink.on_error(RecognitionErrorKind::Network);
        while session.step(Duration::from_millis(50)) {}

        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.history().is_empty());
        assert!(recognizer.calls().contains(&RecognizerCall::Cancel));
    }

    #[test]
    fn test_end_session_waits_for_grace() {
        let recognizer = ScriptedRecognizer::saying(["thank you"]);
        let (mut session, _handle) = session_with(recognizer, ScriptedSynthesizer::default());

        session.handle_event(SessionEvent::StartSession);
        assert!(reach(&mut session, SessionState::Speaking));

        // Playback finishes, grace starts
        let spoken_at = Instant::now();
        assert!(session.run_until(WAIT, |s| s.state() != SessionState::Speaking));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(spoken_at.elapsed() >= Duration::from_millis(150));
        assert!(session.shared.is_conversation_closed());
    }

    #[test]
    fn test_start_after_closed_conversation_clears_history() {
        let recognizer = ScriptedRecognizer::saying(["thank you", "buying a drone"]);
        let (mut session, _handle) = session_with(recognizer, ScriptedSynthesizer::default());

        session.handle_event(SessionEvent::StartSession);
        assert!(session.run_until(WAIT, |s| s.shared.is_conversation_closed()));
        assert_eq!(session.history().len(), 2);

        session.handle_event(SessionEvent::StartSession);
        assert!(reach(&mut session, SessionState::Speaking));
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.history().turns()[0].content(), "buying a drone");
    }

    #[test]
    fn test_policy_timeout_drops_unanswered_turn() {
        let (mut session, _handle) = ConversationSession::builder()
            .with_config(test_config().with_policy_timeout(Duration::from_millis(50)))
            .with_recognizer(ScriptedRecognizer::saying(["buying a drone"]))
            .with_synthesizer(ScriptedSynthesizer::default())
            .with_policy(|_: &ConversationHistory| {
                std::thread::sleep(Duration::from_millis(300));
                PolicyResponse::reply("too late")
            })
            .build()
            .unwrap();

        session.handle_event(SessionEvent::StartSession);
        assert!(reach(&mut session, SessionState::Error));
        assert_eq!(session.shared.last_error(), Some(ParleyError::PolicyTimeout(50)));
        assert!(session.history().is_empty());
        assert!(session.shared.transcript().is_empty());

        assert!(reach(&mut session, SessionState::Idle));
    }

    #[test]
    fn test_timed_out_farewell_does_not_close_next_turn() {
        let rules = RuleEngine::default();
        let (mut session, _handle) = ConversationSession::builder()
            .with_config(test_config().with_policy_timeout(Duration::from_millis(50)))
            .with_recognizer(ScriptedRecognizer::saying(["thank you", "buying a drone"]))
            .with_synthesizer(ScriptedSynthesizer::default())
            .with_policy(move |history: &ConversationHistory| {
                if history.user_text().contains("thank you") {
                    std::thread::sleep(Duration::from_millis(300));
                }
                rules.respond(history)
            })
            .build()
            .unwrap();

        session.handle_event(SessionEvent::StartSession);
        assert!(reach(&mut session, SessionState::Error));
        assert!(reach(&mut session, SessionState::Idle));

        session.handle_event(SessionEvent::StartSession);
        assert!(reach(&mut session, SessionState::Speaking));
        assert!(reach(&mut session, SessionState::Idle));

        let turns = session.history().turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].content(), "buying a drone");
        assert!(!session.shared.is_conversation_closed());
    }

    #[test]
    fn test_panicking_policy_drops_unanswered_turn() {
        let (mut session, _handle) = ConversationSession::builder()
            .with_config(test_config())
            .with_recognizer(ScriptedRecognizer::saying(["hello"]))
            .with_synthesizer(ScriptedSynthesizer::default())
            .with_policy(|_: &ConversationHistory| -> PolicyResponse {
                panic!("rule table broken")
            })
            .build()
            .unwrap();

        session.handle_event(SessionEvent::StartSession);
        assert!(reach(&mut session, SessionState::Error));
        assert!(matches!(
            session.shared.last_error(),
            Some(ParleyError::PolicyFailed(_))
        ));
        assert!(session.history().is_empty());
    }

    #[test]
    fn test_stop_listening_lets_final_result_through() {
        let recognizer =
            ScriptedRecognizer::new([ScriptedUtterance::until_stopped("buying a drone")]);
        let (mut session, _handle) =
            session_with(recognizer.clone(), ScriptedSynthesizer::default());

        session.handle_event(SessionEvent::StartSession);
        assert_eq!(session.state(), SessionState::Listening);

        session.handle_event(SessionEvent::StopListening);
        assert_eq!(session.state(), SessionState::Listening);
        assert_eq!(recognizer.calls()[1], RecognizerCall::Stop);

        assert!(reach(&mut session, SessionState::Speaking));
        assert!(reach(&mut session, SessionState::Idle));
        let turns = session.history().turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].speaker(), Speaker::User);
        assert_eq!(turns[0].content(), "buying a drone");
    }

    #[test]
    fn test_stop_listening_outside_listening_is_ignored() {
        let recognizer = ScriptedRecognizer::saying(["buying a drone"]);
        let synthesizer = ScriptedSynthesizer::new(Duration::from_millis(100));
        let (mut session, _handle) = session_with(recognizer.clone(), synthesizer);

        session.handle_event(SessionEvent::StopListening);
        assert_eq!(session.state(), SessionState::Idle);
        assert!(recognizer.calls().is_empty());

        session.handle_event(SessionEvent::StartSession);
        assert!(reach(&mut session, SessionState::Speaking));
        let calls = recognizer.calls().len();
        let epoch = session.epoch();

        session.handle_event(SessionEvent::StopListening);
        assert_eq!(session.state(), SessionState::Speaking);
        assert_eq!(session.epoch(), epoch);
        assert_eq!(recognizer.calls().len(), calls);

        assert!(reach(&mut session, SessionState::Idle));
        assert_eq!(session.history().len(), 2);
    }

    #[test]
    fn test_synthesis_failure_recovers() {
        let synthesizer = ScriptedSynthesizer::default();
        synthesizer.fail_next();
        let (mut session, _handle) =
            session_with(ScriptedRecognizer::saying(["buying a drone"]), synthesizer);

        session.handle_event(SessionEvent::StartSession);
        assert!(reach(&mut session, SessionState::Error));
        assert!(matches!(
            session.shared.last_error(),
            Some(ParleyError::SynthesisFailed(_))
        ));
        assert!(reach(&mut session, SessionState::Idle));
    }

    #[test]
    fn test_start_from_error_supersedes_recovery() {
        let recognizer = ScriptedRecognizer::new([
            ScriptedUtterance::Fail(RecognitionErrorKind::NoMatch),
            ScriptedUtterance::Silence,
        ]);
        let (mut session, _handle) = ConversationSession::builder()
            .with_config(test_config().with_error_recovery(Duration::from_millis(100)))
            .with_recognizer(recognizer)
            .with_synthesizer(ScriptedSynthesizer::default())
            .build()
            .unwrap();

        session.handle_event(SessionEvent::StartSession);
        assert!(reach(&mut session, SessionState::Error));

        session.handle_event(SessionEvent::StartSession);
        assert_eq!(session.state(), SessionState::Listening);

        // The old recovery timer must not yank us out of Listening
        while session.step(Duration::from_millis(250)) {}
        assert_eq!(session.state(), SessionState::Listening);
    }

    #[test]
    fn test_events_for_wrong_state_are_ignored() {
        let (mut session, _handle) =
            session_with(ScriptedRecognizer::default(), ScriptedSynthesizer::default());

        let epoch = session.epoch();
        session.handle_event(SessionEvent::PolicyCompleted {
            epoch,
            outcome: Ok(PolicyResponse::reply("unsolicited")),
        });
        session.handle_event(SessionEvent::SynthesisCompleted {
            epoch,
            outcome: Ok(()),
        });

        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.history().is_empty());
    }

    #[test]
    fn test_shutdown_stops_handling() {
        let (mut session, _handle) =
            session_with(ScriptedRecognizer::saying(["hello"]), ScriptedSynthesizer::default());

        session.handle_event(SessionEvent::Shutdown);
        assert!(session.is_shut_down());

        session.handle_event(SessionEvent::StartSession);
        assert_eq!(session.state(), SessionState::Idle);
    }
}
