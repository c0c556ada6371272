//! Speech adapters: the recognition, synthesis and microphone-access
//! contracts the session drives, plus console and scripted implementations.

pub mod console;
pub mod microphone;
pub mod recognition;
pub mod scripted;
pub mod synthesis;

pub use console::{ConsoleRecognizer, ConsoleSynthesizer};
pub use microphone::{DeniedMicrophone, GrantedMicrophone, MicrophoneAccess};
pub use recognition::{
    RecognitionAdapter, RecognitionErrorKind, RecognitionEvent, RecognitionResult,
    RecognitionSink,
};
pub use scripted::{RecognizerCall, ScriptedRecognizer, ScriptedSynthesizer, ScriptedUtterance};
pub use synthesis::SynthesisAdapter;
