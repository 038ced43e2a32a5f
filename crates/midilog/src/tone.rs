//! Audible feedback hooks
//!
//! The engine only decides whether a note should sound. Producing the sound is
//! the collaborator's job; it receives the note and the current toggle state.

use tracing::debug;

/// Reference pitch: A4
pub const REFERENCE_NOTE: u8 = 69;
pub const REFERENCE_HZ: f64 = 440.0;

/// Twelve-tone equal temperament frequency of a MIDI note number
pub fn frequency(note: u8) -> f64 {
    REFERENCE_HZ * 2f64.powf((note as f64 - REFERENCE_NOTE as f64) / 12.0)
}

/// Receives every captured Note On with the feedback toggle state
pub trait ToneFeedback: Send {
    fn note(&mut self, pitch: u8, enabled: bool);
}

/// Feedback that only traces what it would play
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingToneFeedback;

impl ToneFeedback for LoggingToneFeedback {
    fn note(&mut self, pitch: u8, enabled: bool) {
        if enabled {
            debug!("Tone feedback: note {} at {:.2} Hz", pitch, frequency(pitch));
        }
    }
}

/// Feedback that plays nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentFeedback;

impl ToneFeedback for SilentFeedback {
    fn note(&mut self, _pitch: u8, _enabled: bool) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 0.01
    }

    #[test]
    fn test_reference_pitch() {
        assert_eq!(frequency(69), 440.0);
    }

    #[test]
    fn test_octaves_double() {
        assert!(approx(frequency(81), 880.0));
        assert!(approx(frequency(57), 220.0));
    }

    #[test]
    fn test_known_notes() {
        assert!(approx(frequency(60), 261.63));
        assert!(approx(frequency(0), 8.18));
        assert!(approx(frequency(127), 12543.85));
    }
}
