//! MIDI input via ALSA (through midir)
//!
//! The midir callback runs on its own thread. It parses each packet, stamps it
//! with its arrival time, and pushes it into a lock-free ring; the capture loop
//! pops from the other end. Nothing on the callback thread blocks or allocates
//! per message, so a slow storage commit in the loop delays logging but never
//! the timestamps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use midilog::{ChannelMessage, MonotonicClock, SystemClock};
use midir::{MidiInput, MidiInputConnection};
use rtrb::{Consumer, Producer, RingBuffer};
use tracing::{debug, info, warn};

/// Messages buffered between the callback thread and the capture loop
pub const RING_CAPACITY: usize = 1024;

/// Information about a discovered MIDI port
#[derive(Debug, Clone)]
pub struct MidiPortInfo {
    /// Port index (for midir connection)
    pub index: usize,
    /// Port name from ALSA
    pub name: String,
}

/// A parsed message and when it arrived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arrival {
    /// Backend timestamp in microseconds (midir's own epoch)
    pub timestamp_us: u64,
    /// Engine millisecond counter when the callback ran
    pub received_ms: u32,
    pub message: ChannelMessage,
}

/// Error type for MIDI operations
#[derive(Debug, thiserror::Error)]
pub enum MidiError {
    #[error("Failed to initialize MIDI: {0}")]
    InitFailed(String),

    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
}

/// Parse raw MIDI bytes into a loggable message
///
/// The source channel is discarded. Note On with velocity 0 becomes Note Off.
/// Anything other than note, controller, and pitch bend is ignored.
pub fn parse_midi_bytes(data: &[u8]) -> Option<ChannelMessage> {
    let status = *data.first()?;
    let msg_type = status & 0xF0;

    match msg_type {
        0x90 if data.len() >= 3 => {
            let velocity = data[2];
            if velocity == 0 {
                // Note On with velocity 0 is Note Off
                Some(ChannelMessage::NoteOff {
                    key: data[1],
                    velocity: 0,
                })
            } else {
                Some(ChannelMessage::NoteOn {
                    key: data[1],
                    velocity,
                })
            }
        }
        0x80 if data.len() >= 3 => Some(ChannelMessage::NoteOff {
            key: data[1],
            velocity: data[2],
        }),
        0xB0 if data.len() >= 3 => Some(ChannelMessage::ControlChange {
            controller: data[1],
            value: data[2],
        }),
        0xE0 if data.len() >= 3 => {
            // 14-bit value, LSB first
            let value = (u16::from(data[2] & 0x7F) << 7) | u16::from(data[1] & 0x7F);
            Some(ChannelMessage::PitchBend { value })
        }
        _ => None,
    }
}

/// Footswitch levels carried on two controller numbers
///
/// Pedals that send CC values instead of closing a contact drive the mark and
/// tone buttons here. A value of 64 or more is "pressed". These controllers
/// are consumed and never reach the log.
#[derive(Debug, Clone, Copy)]
pub struct Footswitches {
    mark_cc: u8,
    tone_cc: u8,
    mark_level: bool,
    tone_level: bool,
}

impl Footswitches {
    pub fn new(mark_cc: u8, tone_cc: u8) -> Self {
        Self {
            mark_cc,
            tone_cc,
            mark_level: false,
            tone_level: false,
        }
    }

    /// Update button levels from `message`; returns it unless it was consumed
    pub fn route(&mut self, message: ChannelMessage) -> Option<ChannelMessage> {
        if let ChannelMessage::ControlChange { controller, value } = message {
            let pressed = value >= 64;
            if controller == self.mark_cc {
                self.mark_level = pressed;
                return None;
            }
            if controller == self.tone_cc {
                self.tone_level = pressed;
                return None;
            }
        }
        Some(message)
    }

    pub fn mark_level(&self) -> bool {
        self.mark_level
    }

    pub fn tone_level(&self) -> bool {
        self.tone_level
    }
}

/// List available MIDI input ports
pub fn list_input_ports() -> Result<Vec<MidiPortInfo>, MidiError> {
    let midi_in =
        MidiInput::new("midilog-scan").map_err(|e| MidiError::InitFailed(e.to_string()))?;

    let ports: Vec<MidiPortInfo> = midi_in
        .ports()
        .iter()
        .enumerate()
        .filter_map(|(i, port)| {
            midi_in
                .port_name(port)
                .ok()
                .map(|name| MidiPortInfo { index: i, name })
        })
        .collect();

    Ok(ports)
}

/// Active MIDI input connection feeding a ring buffer
pub struct MidiCapture {
    /// Connection (dropped to close)
    connection: Option<MidiInputConnection<Producer<Arrival>>>,
    /// Port name
    pub port_name: String,
    /// Parsed messages lost because the ring was full
    pub overruns: Arc<AtomicU64>,
}

impl MidiCapture {
    /// Open the first input port whose name contains `port_pattern`
    ///
    /// An empty pattern matches the first port. Arrivals are stamped from
    /// `clock`, which must be the clock the engine runs on.
    pub fn open(
        port_pattern: &str,
        clock: SystemClock,
    ) -> Result<(Self, Consumer<Arrival>), MidiError> {
        let midi_in =
            MidiInput::new("midilog-in").map_err(|e| MidiError::InitFailed(e.to_string()))?;

        let ports = midi_in.ports();
        let port = ports
            .iter()
            .find(|p| {
                midi_in
                    .port_name(p)
                    .map(|n| n.contains(port_pattern))
                    .unwrap_or(false)
            })
            .ok_or_else(|| MidiError::PortNotFound(port_pattern.to_string()))?;

        let port_name = midi_in
            .port_name(port)
            .map_err(|e| MidiError::ConnectionFailed(e.to_string()))?;

        let (producer, consumer) = RingBuffer::new(RING_CAPACITY);
        let overruns = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&overruns);

        let connection = midi_in
            .connect(
                port,
                "midilog-input",
                move |timestamp_us, data, producer: &mut Producer<Arrival>| {
                    if let Some(message) = parse_midi_bytes(data) {
                        let arrival = Arrival {
                            timestamp_us,
                            received_ms: clock.now_ms(),
                            message,
                        };
                        if producer.push(arrival).is_err() {
                            counter.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                },
                producer,
            )
            .map_err(|e| MidiError::ConnectionFailed(e.to_string()))?;

        info!("Opened MIDI input: {}", port_name);

        Ok((
            Self {
                connection: Some(connection),
                port_name,
                overruns,
            },
            consumer,
        ))
    }

    /// Close the connection
    pub fn close(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.close();
            let lost = self.overruns.load(Ordering::Relaxed);
            if lost > 0 {
                warn!("{} MIDI messages dropped on a full ring", lost);
            }
            info!("Closed MIDI input: {}", self.port_name);
        } else {
            debug!("MIDI input {} already closed", self.port_name);
        }
    }
}

impl Drop for MidiCapture {
    fn drop(&mut self) {
        if self.connection.is_some() {
            self.close();
        }
    }
}
