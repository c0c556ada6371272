//! Terminal adapters: stdin lines stand in for speech, stdout for the speaker

use super::recognition::{RecognitionAdapter, RecognitionErrorKind, RecognitionSink};
use super::synthesis::SynthesisAdapter;
use crate::{ParleyError, Result};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Recognizer reading one utterance per line from stdin
///
/// A single reader thread is spawned on the first `start` and lives for the
/// rest of the process. Lines typed while nobody is listening are dropped.
pub struct ConsoleRecognizer {
    active: Arc<Mutex<Option<RecognitionSink>>>,
    closed: Arc<AtomicBool>,
    reader_started: bool,
}

impl ConsoleRecognizer {
    pub fn new() -> Self {
        Self {
            active: Arc::new(Mutex::new(None)),
            closed: Arc::new(AtomicBool::new(false)),
            reader_started: false,
        }
    }

    /// Flag set once stdin reaches end of file
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }

    fn spawn_reader(&mut self) -> Result<()> {
        let active = Arc::clone(&self.active);
        let closed = Arc::clone(&self.closed);

        thread::Builder::new()
            .name("console-recognizer".into())
            .spawn(move || {
                debug!("Console reader started");
                let stdin = io::stdin();
                for line in stdin.lock().lines() {
                    let line = match line {
                        Ok(line) => line,
                        Err(e) => {
                            warn!("Failed to read stdin: {}", e);
                            break;
                        }
                    };

                    match active.lock().take() {
                        Some(sink) => {
                            sink.on_end();
                            sink.on_final_result(line);
                        }
                        None => debug!("Not listening, dropping input: {}", line),
                    }
                }

                info!("Console input closed");
                closed.store(true, Ordering::SeqCst);
                if let Some(sink) = active.lock().take() {
                    sink.on_error(RecognitionErrorKind::InputClosed);
                }
            })?;

        self.reader_started = true;
        Ok(())
    }
}

impl Default for ConsoleRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl RecognitionAdapter for ConsoleRecognizer {
    fn start(&mut self, _locale: &str, sink: RecognitionSink) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ParleyError::MicrophoneUnavailable("console input closed".into()));
        }
        if !self.reader_started {
            self.spawn_reader()?;
        }

        print!("you> ");
        let _ = io::stdout().flush();

        sink.on_start();
        *self.active.lock() = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        // Lines are final as soon as they arrive, so an open capture heard nothing
        if let Some(sink) = self.active.lock().take() {
            println!();
            sink.on_end();
            sink.on_final_result(String::new());
        }
    }

    fn cancel(&mut self) {
        self.active.lock().take();
    }
}

/// Synthesizer printing each utterance and pausing as if it were spoken
#[derive(Debug, Clone)]
pub struct ConsoleSynthesizer {
    per_word: Duration,
}

impl ConsoleSynthesizer {
    pub fn new(per_word: Duration) -> Self {
        Self { per_word }
    }
}

impl Default for ConsoleSynthesizer {
    fn default() -> Self {
        Self::new(Duration::from_millis(60))
    }
}

impl SynthesisAdapter for ConsoleSynthesizer {
    fn speak(&self, text: &str) -> BoxFuture<'static, Result<()>> {
        let words = text.split_whitespace().count() as u32;
        let playback = self.per_word * words;

        let mut stdout = io::stdout();
        let written = writeln!(stdout, "parley> {}", text).and_then(|_| stdout.flush());

        async move {
            written.map_err(|e| ParleyError::SynthesisFailed(e.to_string()))?;
            tokio::time::sleep(playback).await;
            Ok(())
        }
        .boxed()
    }
}
