//! Capture-to-log engine for live MIDI.
//!
//! Takes a continuous stream of decoded MIDI messages plus two auxiliary
//! buttons (mark, tone toggle) and persists everything as a single-track
//! Standard MIDI File per session, with tick-accurate deltas between events.
//!
//! # Components
//!
//! - [`DeltaClock`]: monotonic milliseconds to tick deltas
//! - [`vlq`]: self-delimiting variable-length quantities
//! - [`SessionManager`]: log identity, preamble, periodic commit, idle rotation
//! - [`EdgeDetector`]: one pulse per 0→1 button transition
//! - [`Engine`]: the single controller that owns all of the above
//!
//! # Example
//!
//! ```rust,no_run
//! use midilog::{DirMedium, Engine, EngineConfig, LoggingToneFeedback, PollInputs};
//!
//! let medium = DirMedium::new("/mnt/sdcard");
//! let mut engine = Engine::new(
//!     EngineConfig::default(),
//!     Box::new(medium),
//!     Box::new(LoggingToneFeedback),
//!     0,
//! );
//!
//! // Called from a fixed-rate loop
//! engine.step(1, PollInputs::default());
//! ```

pub mod clock;
pub mod edge;
pub mod engine;
pub mod finalize;
pub mod medium;
pub mod session;
pub mod smf;
pub mod tone;
pub mod vlq;

pub use clock::{DeltaClock, ManualClock, MonotonicClock, RemainderPolicy, SystemClock};
pub use edge::EdgeDetector;
pub use engine::{
    ChronoTimeSource, Engine, EngineConfig, MarkerLabels, PollInputs, StepReport, TimeSource,
};
pub use finalize::{finalize_dir, finalize_file, FinalizeOutcome, FinalizeReport};
pub use medium::{DirMedium, LogMedium, LogStream};
pub use session::{Housekeeping, SessionConfig, SessionManager, SessionState, SessionStats};
pub use smf::{parse_session, ChannelMessage, Event, LoggedEvent, SessionLog, TimeBase, TrackEvent};
pub use tone::{frequency, LoggingToneFeedback, SilentFeedback, ToneFeedback};

use std::io;
use thiserror::Error;

/// A convenience `Result` type for log operations.
pub type Result<T> = std::result::Result<T, LogError>;

/// Errors produced while encoding, persisting, or reading session logs.
#[derive(Debug, Error)]
pub enum LogError {
    /// Underlying storage error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Every identity in the bounded namespace is already taken.
    #[error("No unused log identity among {capacity} candidates")]
    NamespaceExhausted { capacity: u32 },

    /// Value does not fit in a four-byte variable-length quantity.
    #[error("Value {0} exceeds the 28-bit variable-length ceiling")]
    DeltaOutOfRange(u32),

    /// Marker label longer than a variable-length quantity can describe.
    #[error("Marker label of {0} bytes is too long")]
    LabelTooLong(usize),

    /// Byte stream ended in the middle of a record.
    #[error("Truncated record at offset {offset}")]
    Truncated { offset: usize },

    /// Status byte the track decoder does not understand.
    #[error("Unexpected status byte {status:#04X} at offset {offset}")]
    UnexpectedStatus { offset: usize, status: u8 },

    /// File does not start with a single-track header and track envelope.
    #[error("Not a single-track MIDI log")]
    BadHeader,
}
