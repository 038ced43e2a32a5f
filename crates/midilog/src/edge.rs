//! Level-to-edge conversion for the auxiliary buttons.
//!
//! No debouncing: bounce is left to the hardware. The detector only guarantees
//! one pulse per rising edge however often it is polled.

/// Fires once on every 0→1 transition of a sampled level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EdgeDetector {
    last_level: bool,
}

impl EdgeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sample the raw level; true exactly when it rose since the last poll
    pub fn poll(&mut self, level: bool) -> bool {
        let fired = level && !self.last_level;
        self.last_level = level;
        fired
    }

    /// Forget the previous level
    pub fn reset(&mut self) {
        self.last_level = false;
    }
}
