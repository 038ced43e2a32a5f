//! The capture controller
//!
//! One struct owns every piece of volatile state: the delta clock, both edge
//! detectors, the tone toggle, the marker counter, and the session manager.
//! The host calls [`Engine::step`] once per loop iteration; everything runs to
//! completion inside that call, so log order is exactly observation order.
//!
//! Within one step the order is fixed: housekeeping, mark button, tone button,
//! then the inbound message. A press seen in the same step as a message is
//! logged before it.

use tracing::{debug, info};

use crate::clock::{DeltaClock, RemainderPolicy};
use crate::edge::EdgeDetector;
use crate::medium::LogMedium;
use crate::session::{Housekeeping, SessionConfig, SessionManager, SessionState, SessionStats};
use crate::smf::{ChannelMessage, Event, LoggedEvent};
use crate::tone::ToneFeedback;

/// Human-readable labels for markers
pub trait TimeSource: Send {
    fn label(&self) -> String;
}

/// Local wall-clock labels, e.g. `2026-10-16 21:04:11`
#[derive(Debug, Clone, Copy, Default)]
pub struct ChronoTimeSource;

impl TimeSource for ChronoTimeSource {
    fn label(&self) -> String {
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

/// How marker labels are produced when no time source is attached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MarkerLabels {
    /// `Mark 1`, `Mark 2`, ... restarting with every session
    #[default]
    Sequence,
    /// Wall-clock timestamps from [`ChronoTimeSource`]
    Clock,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub session: SessionConfig,
    pub remainder: RemainderPolicy,
    /// Toggle state after every start or restart
    pub tone_enabled: bool,
    pub marker_labels: MarkerLabels,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            remainder: RemainderPolicy::default(),
            tone_enabled: false,
            marker_labels: MarkerLabels::default(),
        }
    }
}

/// Raw inputs sampled for one loop iteration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollInputs {
    pub mark_level: bool,
    pub tone_level: bool,
    /// Newly completed inbound message, if any
    pub message: Option<ChannelMessage>,
}

/// What one call to [`Engine::step`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub housekeeping: Housekeeping,
    pub restarted: bool,
    pub marker_logged: bool,
    pub tone_toggled: bool,
    pub message_logged: bool,
}

pub struct Engine {
    config: EngineConfig,
    session: SessionManager,
    clock: DeltaClock,
    mark_button: EdgeDetector,
    tone_button: EdgeDetector,
    tone_enabled: bool,
    marker_count: u32,
    feedback: Box<dyn ToneFeedback>,
    time_source: Option<Box<dyn TimeSource>>,
    restarts: u64,
}

impl Engine {
    /// Build the engine and open the first session at `now_ms`
    pub fn new(
        config: EngineConfig,
        medium: Box<dyn LogMedium>,
        feedback: Box<dyn ToneFeedback>,
        now_ms: u32,
    ) -> Self {
        let time_source: Option<Box<dyn TimeSource>> = match config.marker_labels {
            MarkerLabels::Clock => Some(Box::new(ChronoTimeSource)),
            MarkerLabels::Sequence => None,
        };

        let mut engine = Self {
            session: SessionManager::new(config.session.clone(), medium),
            clock: DeltaClock::new(config.session.time_base.tick_ms, config.remainder),
            mark_button: EdgeDetector::new(),
            tone_button: EdgeDetector::new(),
            tone_enabled: config.tone_enabled,
            marker_count: 0,
            feedback,
            time_source,
            restarts: 0,
            config,
        };
        engine.session.start(now_ms);
        engine
    }

    /// Label markers with this source instead of a counter
    pub fn with_time_source(mut self, source: Box<dyn TimeSource>) -> Self {
        self.time_source = Some(source);
        self
    }

    /// Run one loop iteration
    pub fn step(&mut self, now_ms: u32, inputs: PollInputs) -> StepReport {
        let housekeeping = self.session.tick(now_ms);
        let restarted = housekeeping.requires_restart();
        if restarted {
            self.restart(now_ms);
        }

        let marker_logged = self.mark_button.poll(inputs.mark_level);
        if marker_logged {
            self.log_marker(now_ms);
        }

        let tone_toggled = self.tone_button.poll(inputs.tone_level);
        if tone_toggled {
            self.tone_enabled = !self.tone_enabled;
            info!(
                "Tone feedback {}",
                if self.tone_enabled { "enabled" } else { "disabled" }
            );
        }

        let message_logged = match inputs.message {
            Some(message) => {
                self.log_message(message, now_ms);
                true
            }
            None => false,
        };

        StepReport {
            housekeeping,
            restarted,
            marker_logged,
            tone_toggled,
            message_logged,
        }
    }

    fn log_marker(&mut self, now_ms: u32) {
        self.marker_count += 1;
        let label = match &self.time_source {
            Some(source) => source.label(),
            None => format!("Mark {}", self.marker_count),
        };
        debug!("Marker: {}", label);
        self.append(LoggedEvent::Marker(label), now_ms);
    }

    fn log_message(&mut self, message: ChannelMessage, now_ms: u32) {
        if let ChannelMessage::NoteOn { key, .. } = message {
            self.feedback.note(key, self.tone_enabled);
        }
        self.append(LoggedEvent::Channel(message), now_ms);
    }

    fn append(&mut self, body: LoggedEvent, now_ms: u32) {
        let delta = self.clock.next_delta(now_ms);
        self.session.append(&Event::new(delta, body), now_ms);
    }

    /// Discard all volatile state and open a fresh session
    ///
    /// A session that is still open is closed first, with the usual
    /// keep-or-delete rule.
    pub fn restart(&mut self, now_ms: u32) {
        if self.session.state() == SessionState::Open {
            self.session.close();
        }
        self.clock = DeltaClock::new(self.config.session.time_base.tick_ms, self.config.remainder);
        self.mark_button.reset();
        self.tone_button.reset();
        self.tone_enabled = self.config.tone_enabled;
        self.marker_count = 0;
        self.restarts += 1;
        info!("Engine restart #{}", self.restarts);
        self.session.start(now_ms);
    }

    /// Commit and close the open session; empty sessions are removed
    pub fn shutdown(&mut self) -> Housekeeping {
        self.session.close()
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn current_session(&self) -> Option<&str> {
        self.session.current_name()
    }

    pub fn tone_enabled(&self) -> bool {
        self.tone_enabled
    }

    pub fn restarts(&self) -> u64 {
        self.restarts
    }

    pub fn stats(&self) -> SessionStats {
        self.session.stats()
    }
}
