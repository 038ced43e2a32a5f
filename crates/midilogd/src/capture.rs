//! The capture loop: ring buffer in, `Engine::step` out.

use std::time::Duration;

use anyhow::{Context, Result};
use midilog::{
    ChannelMessage, DirMedium, Engine, EngineConfig, LoggingToneFeedback, MarkerLabels,
    MonotonicClock, PollInputs, RemainderPolicy, SessionConfig, SystemClock, TimeBase,
};
use midilogconf::{MarkerLabelStyle, MidilogConfig, RemainderMode};
use rtrb::Consumer;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::input::{Arrival, Footswitches, MidiCapture};

/// Translate the loaded configuration into engine settings
pub fn engine_config(config: &MidilogConfig) -> EngineConfig {
    let capture = &config.infra.capture;
    EngineConfig {
        session: SessionConfig {
            file_prefix: capture.file_prefix.clone(),
            capacity: capture.session_capacity,
            flush_interval_ms: capture.flush_interval_ms,
            idle_timeout_ms: capture.idle_timeout_ms,
            time_base: TimeBase::new(capture.tick_ms, capture.ticks_per_beat),
        },
        remainder: match capture.remainder {
            RemainderMode::Carry => RemainderPolicy::Carry,
            RemainderMode::Drop => RemainderPolicy::Drop,
        },
        tone_enabled: config.bootstrap.tone_enabled,
        marker_labels: match config.bootstrap.marker_labels {
            MarkerLabelStyle::Sequence => MarkerLabels::Sequence,
            MarkerLabelStyle::Clock => MarkerLabels::Clock,
        },
    }
}

/// How far a backend timestamp may trail the callback's own stamp before the
/// backend timeline is re-anchored
pub const ANCHOR_TOLERANCE_MS: u32 = 2;

/// Maps arrival stamps onto the engine's millisecond counter
///
/// midir's microsecond timestamps carry less scheduling jitter than the
/// callback's receive time but live on their own epoch. The first arrival
/// anchors one timeline to the other. An arrival that maps ahead of its
/// receive time, or trails it by more than [`ANCHOR_TOLERANCE_MS`], re-anchors
/// (backends that report zero or restart their epoch end up here).
///
/// Returned times never go backwards, so the delta clock never sees a
/// wrapped-around negative interval.
#[derive(Debug, Default)]
pub struct ArrivalTimeline {
    anchor: Option<(u64, u32)>,
    last_ms: Option<u32>,
}

impl ArrivalTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine time at which `arrival` happened
    pub fn place(&mut self, arrival: &Arrival) -> u32 {
        let mapped = self.anchor.and_then(|(anchor_us, anchor_ms)| {
            let elapsed_us = arrival.timestamp_us.checked_sub(anchor_us)?;
            let elapsed_ms = u32::try_from(elapsed_us / 1000).ok()?;
            let mapped = anchor_ms.wrapping_add(elapsed_ms);
            let lag = arrival.received_ms.wrapping_sub(mapped);
            (lag <= ANCHOR_TOLERANCE_MS).then_some(mapped)
        });

        let ms = match mapped {
            Some(ms) => ms,
            None => {
                self.anchor = Some((arrival.timestamp_us, arrival.received_ms));
                arrival.received_ms
            }
        };
        self.monotonic(ms)
    }

    /// Clamp `ms` so it is not earlier than anything returned before
    pub fn monotonic(&mut self, ms: u32) -> u32 {
        let ms = match self.last_ms {
            Some(last) if ms.wrapping_sub(last) > u32::MAX / 2 => last,
            _ => ms,
        };
        self.last_ms = Some(ms);
        ms
    }
}

/// Host-side state between the ring and the engine
#[derive(Debug)]
pub struct Dispatcher {
    switches: Footswitches,
    timeline: ArrivalTimeline,
}

impl Dispatcher {
    pub fn new(switches: Footswitches) -> Self {
        Self {
            switches,
            timeline: ArrivalTimeline::new(),
        }
    }

    /// Feed everything waiting in `inbox` through the engine
    ///
    /// Each message gets its own step at its arrival time, so deltas reflect
    /// when notes were played rather than when the loop got to them, and a
    /// footswitch press and release between two ticks still produce an edge.
    /// A final step at `now_ms` drives housekeeping. Returns the number of
    /// steps.
    pub fn drain(
        &mut self,
        engine: &mut Engine,
        inbox: &mut Consumer<Arrival>,
        now_ms: u32,
    ) -> usize {
        let mut steps = 0;
        while let Ok(arrival) = inbox.pop() {
            let at = self.timeline.place(&arrival);
            let message = self.switches.route(arrival.message);
            engine.step(at, self.inputs(message));
            steps += 1;
        }
        let now = self.timeline.monotonic(now_ms);
        engine.step(now, self.inputs(None));
        steps + 1
    }

    fn inputs(&self, message: Option<ChannelMessage>) -> PollInputs {
        PollInputs {
            mark_level: self.switches.mark_level(),
            tone_level: self.switches.tone_level(),
            message,
        }
    }
}

/// Open the input port and log it until Ctrl-C
pub async fn run(config: &MidilogConfig) -> Result<()> {
    let capture = &config.infra.capture;
    let clock = SystemClock::new();
    let (mut midi, mut inbox) = MidiCapture::open(&config.infra.input.port, clock.clone())
        .with_context(|| format!("Failed to open MIDI input {:?}", config.infra.input.port))?;

    let log_dir = &config.infra.paths.log_dir;
    info!(
        "Logging {} to {} ({}ms ticks, {} ticks/beat)",
        midi.port_name,
        log_dir.display(),
        capture.tick_ms,
        capture.ticks_per_beat
    );

    let mut engine = Engine::new(
        engine_config(config),
        Box::new(DirMedium::new(log_dir)),
        Box::new(LoggingToneFeedback),
        clock.now_ms(),
    );
    if let Some(name) = engine.current_session() {
        info!("Session {} open", name);
    } else {
        warn!("No session open; capturing without persistence");
    }

    let mut dispatcher = Dispatcher::new(Footswitches::new(
        config.infra.input.mark_cc,
        config.infra.input.tone_cc,
    ));
    let mut ticker = tokio::time::interval(Duration::from_millis(capture.poll_interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;
            result = &mut shutdown => {
                result.context("Failed to listen for Ctrl-C")?;
                info!("Shutdown requested");
                break;
            }
            _ = ticker.tick() => {
                dispatcher.drain(&mut engine, &mut inbox, clock.now_ms());
            }
        }
    }

    midi.close();
    // Anything that arrived before the port closed still belongs to this session
    dispatcher.drain(&mut engine, &mut inbox, clock.now_ms());
    let outcome = engine.shutdown();
    let stats = engine.stats();
    info!("Final session: {:?}", outcome);
    info!(
        "Sessions opened={} rotated={} deleted={} events={} bytes={} commits={} write_failures={} commit_failures={}",
        stats.sessions_opened,
        stats.sessions_rotated,
        stats.sessions_deleted,
        stats.events_written,
        stats.bytes_written,
        stats.commits,
        stats.write_failures,
        stats.commit_failures
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use midilog::{parse_session, Event, LoggedEvent, SilentFeedback};
    use rtrb::RingBuffer;
    use tempfile::TempDir;

    fn engine_in(dir: &TempDir) -> Engine {
        let mut config = MidilogConfig::default();
        config.infra.capture.tick_ms = 10;
        config.infra.capture.ticks_per_beat = 50;
        Engine::new(
            engine_config(&config),
            Box::new(DirMedium::new(dir.path())),
            Box::new(SilentFeedback),
            0,
        )
    }

    fn arrival(received_ms: u32, message: ChannelMessage) -> Arrival {
        Arrival {
            timestamp_us: u64::from(received_ms) * 1000,
            received_ms,
            message,
        }
    }

    fn note_on(key: u8) -> ChannelMessage {
        ChannelMessage::NoteOn { key, velocity: 90 }
    }

    fn logged(dir: &TempDir) -> Vec<Event> {
        let bytes = std::fs::read(dir.path().join("MIDI000.MID")).unwrap();
        parse_session(&bytes).unwrap().events()
    }

    #[test]
    fn test_engine_config_from_defaults() {
        let config = engine_config(&MidilogConfig::default());
        assert_eq!(config.session.file_prefix, "MIDI");
        assert_eq!(config.session.capacity, 1000);
        assert_eq!(config.session.time_base, TimeBase::new(1, 500));
        assert_eq!(config.remainder, RemainderPolicy::Carry);
        assert_eq!(config.marker_labels, MarkerLabels::Sequence);
        assert!(!config.tone_enabled);
    }

    #[test]
    fn test_drain_steps_once_when_idle() {
        let dir = TempDir::new().unwrap();
        let mut engine = engine_in(&dir);
        let (_tx, mut rx) = RingBuffer::<Arrival>::new(8);
        let mut dispatcher = Dispatcher::new(Footswitches::new(80, 81));

        assert_eq!(dispatcher.drain(&mut engine, &mut rx, 5), 1);
        assert_eq!(engine.stats().events_written, 0);
    }

    #[test]
    fn test_queued_messages_keep_their_arrival_times() {
        let dir = TempDir::new().unwrap();
        let mut engine = engine_in(&dir);
        let (mut tx, mut rx) = RingBuffer::new(8);
        let mut dispatcher = Dispatcher::new(Footswitches::new(80, 81));

        // Loop stalled on storage while three notes came in
        tx.push(arrival(0, note_on(60))).unwrap();
        tx.push(arrival(400, note_on(62))).unwrap();
        tx.push(arrival(800, note_on(64))).unwrap();
        assert_eq!(dispatcher.drain(&mut engine, &mut rx, 950), 4);
        engine.shutdown();

        let deltas: Vec<u32> = logged(&dir).iter().map(|e| e.delta).collect();
        assert_eq!(deltas, vec![0, 40, 40]);
    }

    #[test]
    fn test_press_and_release_in_one_tick_logs_marker() {
        let dir = TempDir::new().unwrap();
        let mut engine = engine_in(&dir);
        let (mut tx, mut rx) = RingBuffer::new(8);
        let mut dispatcher = Dispatcher::new(Footswitches::new(80, 81));

        tx.push(arrival(0, note_on(60))).unwrap();
        tx.push(arrival(
            20,
            ChannelMessage::ControlChange { controller: 80, value: 127 },
        ))
        .unwrap();
        tx.push(arrival(
            60,
            ChannelMessage::ControlChange { controller: 80, value: 0 },
        ))
        .unwrap();
        assert_eq!(dispatcher.drain(&mut engine, &mut rx, 80), 4);

        tx.push(arrival(100, note_on(62))).unwrap();
        dispatcher.drain(&mut engine, &mut rx, 110);
        engine.shutdown();

        let events = logged(&dir);
        let bodies: Vec<_> = events.iter().map(|e| e.body.clone()).collect();
        // Footswitch controllers never reach the log
        assert_eq!(
            bodies,
            vec![
                LoggedEvent::Channel(note_on(60)),
                LoggedEvent::Marker("Mark 1".into()),
                LoggedEvent::Channel(note_on(62)),
            ]
        );
        assert_eq!(events[1].delta, 2);
        assert_eq!(events[2].delta, 8);
    }

    #[test]
    fn test_timeline_follows_backend_timestamps() {
        let mut timeline = ArrivalTimeline::new();
        let first = Arrival {
            timestamp_us: 5_000_000,
            received_ms: 100,
            message: note_on(60),
        };
        assert_eq!(timeline.place(&first), 100);

        // Callback ran 1ms late; the backend stamp wins
        let second = Arrival {
            timestamp_us: 5_040_000,
            received_ms: 141,
            message: note_on(62),
        };
        assert_eq!(timeline.place(&second), 140);
    }

    #[test]
    fn test_timeline_reanchors_on_useless_timestamps() {
        let mut timeline = ArrivalTimeline::new();
        for received_ms in [10, 50, 300] {
            let stuck = Arrival {
                timestamp_us: 0,
                received_ms,
                message: note_on(60),
            };
            assert_eq!(timeline.place(&stuck), received_ms);
        }
    }

    #[test]
    fn test_timeline_never_goes_backwards() {
        let mut timeline = ArrivalTimeline::new();
        assert_eq!(timeline.monotonic(500), 500);
        assert_eq!(timeline.monotonic(499), 500);
        assert_eq!(timeline.monotonic(u32::MAX), 500);
        assert_eq!(timeline.monotonic(600), 600);
    }

    #[test]
    fn test_timeline_crosses_counter_wrap() {
        let mut timeline = ArrivalTimeline::new();
        assert_eq!(timeline.monotonic(u32::MAX - 5), u32::MAX - 5);
        assert_eq!(timeline.monotonic(10), 10);
    }
}
