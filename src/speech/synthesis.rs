//! Speech synthesis adapter contract

use crate::Result;
use futures::future::BoxFuture;

/// Text-to-speech playback
///
/// `speak` returns a future that resolves once the utterance has finished
/// playing (or failed). The session drives the future on its own runtime and
/// drops it on reset, so implementations should stop playback when dropped
/// or when `cancel` is called.
pub trait SynthesisAdapter: Send + Sync {
    fn speak(&self, text: &str) -> BoxFuture<'static, Result<()>>;

    /// Stop any utterance currently playing
    fn cancel(&self) {}
}
