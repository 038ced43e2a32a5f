//! Bootstrap configuration - initial values that seed runtime state.
//!
//! These values are read once at startup. After that the engine owns the
//! state: the tone toggle button flips `tone_enabled` freely.

use serde::{Deserialize, Serialize};

/// How marker events are labelled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerLabelStyle {
    /// "Mark 1", "Mark 2", ... counted per session.
    #[default]
    Sequence,
    /// Wall-clock timestamp at the moment of the press.
    Clock,
}

/// Bootstrap configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Whether audible note feedback starts enabled.
    /// Default: false
    #[serde(default)]
    pub tone_enabled: bool,

    /// Marker label style.
    /// Default: sequence
    #[serde(default)]
    pub marker_labels: MarkerLabelStyle,
}
