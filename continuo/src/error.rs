// Error types for the continuation pipeline.
//
// Each fallible stage has its own small error enum so callers can match on
// what went wrong; `ContinuoError` wraps them (plus I/O, MIDI, WAV and JSON
// failures) for the end-to-end pipeline in pipeline.rs and the CLI.
//
// Not every outcome is an error: a generator that runs out of context and
// has an empty fallback pool simply returns fewer pitches (see
// `Continuation::early_stop` in generate.rs), and audio buffer growth is
// handled inside synth.rs.

use std::fmt;
use std::io;

/// Input timeline could not be turned into notes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Stream ended with notes still open and no note was ever closed.
    Truncated { open_notes: usize },
    /// Structurally invalid input.
    Malformed(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Truncated { open_notes } => write!(
                f,
                "timeline truncated: {open_notes} note(s) never closed and no complete notes"
            ),
            ParseError::Malformed(reason) => write!(f, "malformed timeline: {reason}"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Markov model could not be built or loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Fewer than two notes: no transition can be observed.
    InsufficientData { notes: usize },
    /// A persisted model violates the order invariant.
    InvalidState(String),
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::InsufficientData { notes } => {
                write!(f, "need at least 2 notes to build a model, got {notes}")
            }
            ModelError::InvalidState(reason) => write!(f, "invalid model: {reason}"),
        }
    }
}

impl std::error::Error for ModelError {}

/// A configuration value is out of range.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigError(pub String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid configuration: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

/// Anything that can stop the pipeline.
#[derive(Debug)]
pub enum ContinuoError {
    Parse(ParseError),
    Model(ModelError),
    Config(ConfigError),
    /// Input bytes are not a readable Standard MIDI File.
    Midi(midly::Error),
    /// Merged timeline does not fit the SMF encoding.
    MidiEncode(String),
    Wav(hound::Error),
    Json(serde_json::Error),
    Io(io::Error),
}

impl fmt::Display for ContinuoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContinuoError::Parse(e) => write!(f, "{e}"),
            ContinuoError::Model(e) => write!(f, "{e}"),
            ContinuoError::Config(e) => write!(f, "{e}"),
            ContinuoError::Midi(e) => write!(f, "MIDI read error: {e}"),
            ContinuoError::MidiEncode(reason) => write!(f, "MIDI write error: {reason}"),
            ContinuoError::Wav(e) => write!(f, "WAV error: {e}"),
            ContinuoError::Json(e) => write!(f, "JSON error: {e}"),
            ContinuoError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for ContinuoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ContinuoError::Parse(e) => Some(e),
            ContinuoError::Model(e) => Some(e),
            ContinuoError::Config(e) => Some(e),
            ContinuoError::Midi(e) => Some(e),
            ContinuoError::Wav(e) => Some(e),
            ContinuoError::Json(e) => Some(e),
            ContinuoError::Io(e) => Some(e),
            ContinuoError::MidiEncode(_) => None,
        }
    }
}

impl From<ParseError> for ContinuoError {
    fn from(e: ParseError) -> Self {
        ContinuoError::Parse(e)
    }
}

impl From<ModelError> for ContinuoError {
    fn from(e: ModelError) -> Self {
        ContinuoError::Model(e)
    }
}

impl From<ConfigError> for ContinuoError {
    fn from(e: ConfigError) -> Self {
        ContinuoError::Config(e)
    }
}

impl From<midly::Error> for ContinuoError {
    fn from(e: midly::Error) -> Self {
        ContinuoError::Midi(e)
    }
}

impl From<hound::Error> for ContinuoError {
    fn from(e: hound::Error) -> Self {
        ContinuoError::Wav(e)
    }
}

impl From<serde_json::Error> for ContinuoError {
    fn from(e: serde_json::Error) -> Self {
        ContinuoError::Json(e)
    }
}

impl From<io::Error> for ContinuoError {
    fn from(e: io::Error) -> Self {
        ContinuoError::Io(e)
    }
}
