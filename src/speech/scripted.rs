//! Scripted adapters for non-interactive runs and tests
//!
//! The recognizer replays a queue of utterances, one per capture; the
//! synthesizer "plays" each utterance for a fixed delay. Both record the
//! calls they receive so callers can assert on them.

use super::recognition::{RecognitionAdapter, RecognitionErrorKind, RecognitionSink};
use super::synthesis::SynthesisAdapter;
use crate::{ParleyError, Result};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// What the scripted recognizer does for one capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedUtterance {
    /// Hear the given text, emitting partial results word by word
    Say(String),
    /// Report a recognition error
    Fail(RecognitionErrorKind),
    /// Emit partial results, then hold the final result until `stop`
    UntilStopped(String),
    /// Keep listening without ever producing a result
    Silence,
}

impl ScriptedUtterance {
    pub fn say(text: impl Into<String>) -> Self {
        ScriptedUtterance::Say(text.into())
    }

    pub fn until_stopped(text: impl Into<String>) -> Self {
        ScriptedUtterance::UntilStopped(text.into())
    }
}

/// A call the scripted recognizer received
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerCall {
    Start(String),
    Stop,
    Cancel,
}

#[derive(Default)]
struct RecognizerInner {
    script: VecDeque<ScriptedUtterance>,
    calls: Vec<RecognizerCall>,
    last_sink: Option<RecognitionSink>,
    /// Final text waiting for `stop`
    held: Option<String>,
}

/// Recognizer replaying a fixed script
///
/// Clones share the same script and call log, so a test can keep one clone
/// while the session owns another.
#[derive(Clone, Default)]
pub struct ScriptedRecognizer {
    inner: Arc<Mutex<RecognizerInner>>,
}

impl ScriptedRecognizer {
    pub fn new(script: impl IntoIterator<Item = ScriptedUtterance>) -> Self {
        let recognizer = Self::default();
        recognizer.inner.lock().script.extend(script);
        recognizer
    }

    /// Build from plain utterances
    pub fn saying<I, S>(utterances: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(utterances.into_iter().map(ScriptedUtterance::say))
    }

    /// Queue another utterance
    pub fn push(&self, utterance: ScriptedUtterance) {
        self.inner.lock().script.push_back(utterance);
    }

    pub fn remaining(&self) -> usize {
        self.inner.lock().script.len()
    }

    pub fn calls(&self) -> Vec<RecognizerCall> {
        self.inner.lock().calls.clone()
    }

    /// Sink handed to the most recent `start`, for injecting late callbacks
    pub fn last_sink(&self) -> Option<RecognitionSink> {
        self.inner.lock().last_sink.clone()
    }
}

impl RecognitionAdapter for ScriptedRecognizer {
    fn start(&mut self, locale: &str, sink: RecognitionSink) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.calls.push(RecognizerCall::Start(locale.to_string()));

        let utterance = inner.script.pop_front().ok_or_else(|| {
            ParleyError::MicrophoneUnavailable("scripted input exhausted".into())
        })?;
        inner.last_sink = Some(sink.clone());
        drop(inner);

        debug!("Scripted capture for epoch {}: {:?}", sink.epoch(), utterance);
        sink.on_start();
        match utterance {
            ScriptedUtterance::Say(text) => {
                emit_partials(&sink, &text);
                sink.on_end();
                sink.on_final_result(text);
            }
            ScriptedUtterance::UntilStopped(text) => {
                emit_partials(&sink, &text);
                self.inner.lock().held = Some(text);
            }
            ScriptedUtterance::Fail(kind) => {
                sink.on_error(kind);
            }
            ScriptedUtterance::Silence => {}
        }
        Ok(())
    }

    fn stop(&mut self) {
        let (held, sink) = {
            let mut inner = self.inner.lock();
            inner.calls.push(RecognizerCall::Stop);
            (inner.held.take(), inner.last_sink.clone())
        };
        if let (Some(text), Some(sink)) = (held, sink) {
            sink.on_end();
            sink.on_final_result(text);
        }
    }

    fn cancel(&mut self) {
        let mut inner = self.inner.lock();
        inner.calls.push(RecognizerCall::Cancel);
        inner.held = None;
    }
}

/// Report `text` word by word as growing partial results
fn emit_partials(sink: &RecognitionSink, text: &str) {
    let mut partial = String::new();
    for word in text.split_whitespace() {
        if !partial.is_empty() {
            partial.push(' ');
        }
        partial.push_str(word);
        sink.on_partial_result(partial.clone());
    }
}

#[derive(Default)]
struct SynthesizerInner {
    spoken: Vec<String>,
    cancels: usize,
    fail_next: bool,
}

/// Synthesizer that completes each utterance after a fixed delay
#[derive(Clone)]
pub struct ScriptedSynthesizer {
    delay: Duration,
    inner: Arc<Mutex<SynthesizerInner>>,
}

impl ScriptedSynthesizer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            inner: Arc::new(Mutex::new(SynthesizerInner::default())),
        }
    }

    /// Make the next `speak` call fail
    pub fn fail_next(&self) {
        self.inner.lock().fail_next = true;
    }

    /// Every utterance passed to `speak`, in order
    pub fn spoken(&self) -> Vec<String> {
        self.inner.lock().spoken.clone()
    }

    pub fn cancel_count(&self) -> usize {
        self.inner.lock().cancels
    }
}

impl Default for ScriptedSynthesizer {
    fn default() -> Self {
        Self::new(Duration::from_millis(10))
    }
}

impl SynthesisAdapter for ScriptedSynthesizer {
    fn speak(&self, text: &str) -> BoxFuture<'static, Result<()>> {
        let fail = {
            let mut inner = self.inner.lock();
            inner.spoken.push(text.to_string());
            std::mem::take(&mut inner.fail_next)
        };
        let delay = self.delay;

        async move {
            tokio::time::sleep(delay).await;
            if fail {
                Err(ParleyError::SynthesisFailed("scripted playback failure".into()))
            } else {
                Ok(())
            }
        }
        .boxed()
    }

    fn cancel(&self) {
        self.inner.lock().cancels += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Epoch, SessionEvent};
    use crate::speech::RecognitionEvent;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_say_emits_partials_then_final() {
        let (tx, rx) = unbounded();
        let mut recognizer = ScriptedRecognizer::saying(["buying a drone"]);
        recognizer
            .start("en-US", RecognitionSink::new(Epoch::default(), tx))
            .unwrap();

        let kinds: Vec<_> = rx
            .try_iter()
            .map(|event| match event {
                SessionEvent::Recognition { event, .. } => event.kind(),
                other => panic!("unexpected event: {:?}", other),
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                "recognition_start",
                "partial_result",
                "partial_result",
                "partial_result",
                "recognition_end",
                "final_result",
            ]
        );
        assert_eq!(recognizer.calls(), vec![RecognizerCall::Start("en-US".into())]);
    }

    #[test]
    fn test_until_stopped_holds_final_result() {
        let (tx, rx) = unbounded();
        let mut recognizer =
            ScriptedRecognizer::new([ScriptedUtterance::until_stopped("hello there")]);
        recognizer
            .start("en-US", RecognitionSink::new(Epoch::default(), tx))
            .unwrap();
        let before: Vec<_> = rx.try_iter().collect();
        assert_eq!(before.len(), 3);

        recognizer.stop();
        let finals: Vec<_> = rx
            .try_iter()
            .filter_map(|event| match event {
                SessionEvent::Recognition {
                    event: RecognitionEvent::Transcript(result),
                    ..
                } if result.is_final => Some(result.text),
                _ => None,
            })
            .collect();
        assert_eq!(finals, vec!["hello there".to_string()]);

        // Nothing left to deliver
        recognizer.stop();
        assert_eq!(rx.try_iter().count(), 0);
    }

    #[test]
    fn test_cancel_discards_held_result() {
        let (tx, rx) = unbounded();
        let mut recognizer = ScriptedRecognizer::new([ScriptedUtterance::until_stopped("hello")]);
        recognizer
            .start("en-US", RecognitionSink::new(Epoch::default(), tx))
            .unwrap();
        rx.try_iter().for_each(drop);

        recognizer.cancel();
        recognizer.stop();
        assert_eq!(rx.try_iter().count(), 0);
    }

    #[test]
    fn test_exhausted_script_is_unavailable() {
        let (tx, _rx) = unbounded();
        let mut recognizer = ScriptedRecognizer::default();
        let result = recognizer.start("en-US", RecognitionSink::new(Epoch::default(), tx));
        assert!(matches!(result, Err(ParleyError::MicrophoneUnavailable(_))));
    }

    #[test]
    fn test_fail_reports_error() {
        let (tx, rx) = unbounded();
        let mut recognizer =
            ScriptedRecognizer::new([ScriptedUtterance::Fail(RecognitionErrorKind::NoMatch)]);
        recognizer
            .start("en-US", RecognitionSink::new(Epoch::default(), tx))
            .unwrap();

        let last = rx.try_iter().last().unwrap();
        assert!(matches!(
            last,
            SessionEvent::Recognition {
                event: RecognitionEvent::Error(RecognitionErrorKind::NoMatch),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_synthesizer_records_and_fails_once() {
        let synth = ScriptedSynthesizer::new(Duration::from_millis(1));
        synth.fail_next();

        assert!(synth.speak("first").await.is_err());
        assert!(synth.speak("second").await.is_ok());
        assert_eq!(synth.spoken(), vec!["first".to_string(), "second".to_string()]);
    }
}
