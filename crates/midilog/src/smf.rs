//! Single-track Standard MIDI File layout for session logs
//!
//! A session on the medium is:
//!
//! ```text
//! MThd 00000006 0000 0001 <ticks/beat>      header, format 0, one track
//! MTrk 00000000                             track envelope, length left as placeholder
//! 00 FF 51 03 <µs/beat>                     tempo, delta 0
//! <vlq delta> <event> ...                   captured events in arrival order
//! ```
//!
//! The track length is never known while capturing, so it stays zero until the
//! finalizer patches it offline (see [`crate::finalize`]).

use crate::{vlq, LogError, Result};

/// Bytes from the start of the file through the track length field.
pub const PREFIX_LEN: usize = 22;

/// Offset of the 4-byte track length placeholder.
pub const TRACK_LENGTH_OFFSET: usize = 18;

/// Full preamble: header, track envelope, and the opening tempo event.
pub const PREAMBLE_LEN: usize = PREFIX_LEN + 7;

/// All channel messages are normalised onto this channel.
pub const OUTPUT_CHANNEL: u8 = 0;

const META: u8 = 0xFF;
const META_MARKER: u8 = 0x06;
const META_END_OF_TRACK: u8 = 0x2F;
const META_TEMPO: u8 = 0x51;

/// Fixed pairing of tick length, ticks per beat, and tempo
///
/// The tempo is derived so that `ticks_per_beat` ticks of `tick_ms` each span
/// exactly one beat; playback then reconstructs wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    pub tick_ms: u32,
    pub ticks_per_beat: u16,
}

impl TimeBase {
    pub fn new(tick_ms: u32, ticks_per_beat: u16) -> Self {
        Self {
            tick_ms,
            ticks_per_beat,
        }
    }

    /// Tempo value declared in the preamble
    pub fn microseconds_per_beat(&self) -> u32 {
        self.tick_ms * 1000 * self.ticks_per_beat as u32
    }

    /// Whether the pairing can be expressed in a file header
    pub fn is_valid(&self) -> bool {
        self.tick_ms > 0
            && self.ticks_per_beat > 0
            && self.ticks_per_beat < 0x8000
            && (self.tick_ms as u64 * 1000 * self.ticks_per_beat as u64) < (1 << 24)
    }
}

impl Default for TimeBase {
    /// 1ms ticks, 500 ticks per beat, 120 BPM
    fn default() -> Self {
        Self::new(1, 500)
    }
}

/// Preamble bytes written once when a session opens
pub fn preamble(time_base: &TimeBase) -> [u8; PREAMBLE_LEN] {
    let mut out = [0u8; PREAMBLE_LEN];
    out[0..4].copy_from_slice(b"MThd");
    out[4..8].copy_from_slice(&6u32.to_be_bytes());
    out[8..10].copy_from_slice(&0u16.to_be_bytes()); // format 0
    out[10..12].copy_from_slice(&1u16.to_be_bytes());
    out[12..14].copy_from_slice(&time_base.ticks_per_beat.to_be_bytes());
    out[14..18].copy_from_slice(b"MTrk");
    // 18..22 stays zero: length placeholder
    let usec = time_base.microseconds_per_beat();
    out[22..29].copy_from_slice(&[
        0x00,
        META,
        META_TEMPO,
        0x03,
        (usec >> 16) as u8,
        (usec >> 8) as u8,
        usec as u8,
    ]);
    out
}

/// A decoded channel message with the channel already discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMessage {
    NoteOn { key: u8, velocity: u8 },
    NoteOff { key: u8, velocity: u8 },
    ControlChange { controller: u8, value: u8 },
    /// 14-bit unsigned wire value, 8192 is centre
    PitchBend { value: u16 },
}

impl ChannelMessage {
    /// Build a pitch bend from a signed magnitude centred on zero
    pub fn pitch_bend(bend: i16) -> Self {
        let value = (bend as i32 + 8192).clamp(0, 0x3FFF) as u16;
        ChannelMessage::PitchBend { value }
    }

    fn wire_bytes(&self) -> [u8; 3] {
        match *self {
            ChannelMessage::NoteOn { key, velocity } => {
                [0x90 | OUTPUT_CHANNEL, key & 0x7F, velocity & 0x7F]
            }
            ChannelMessage::NoteOff { key, velocity } => {
                [0x80 | OUTPUT_CHANNEL, key & 0x7F, velocity & 0x7F]
            }
            ChannelMessage::ControlChange { controller, value } => {
                [0xB0 | OUTPUT_CHANNEL, controller & 0x7F, value & 0x7F]
            }
            ChannelMessage::PitchBend { value } => [
                0xE0 | OUTPUT_CHANNEL,
                (value & 0x7F) as u8,
                ((value >> 7) & 0x7F) as u8,
            ],
        }
    }
}

/// Anything the engine writes after the preamble
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoggedEvent {
    Channel(ChannelMessage),
    Marker(String),
}

/// A timed event ready to be appended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub delta: u32,
    pub body: LoggedEvent,
}

impl Event {
    pub fn new(delta: u32, body: LoggedEvent) -> Self {
        Self { delta, body }
    }

    /// Append the wire form: `<vlq delta><type/code><payload>`
    ///
    /// Nothing is written to `out` when an error is returned.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        let delta = vlq::encode(self.delta)?;
        match &self.body {
            LoggedEvent::Channel(message) => {
                out.extend_from_slice(delta.as_bytes());
                out.extend_from_slice(&message.wire_bytes());
            }
            LoggedEvent::Marker(label) => {
                let len = u32::try_from(label.len())
                    .ok()
                    .and_then(|len| vlq::encode(len).ok())
                    .ok_or(LogError::LabelTooLong(label.len()))?;
                out.extend_from_slice(delta.as_bytes());
                out.extend_from_slice(&[META, META_MARKER]);
                out.extend_from_slice(len.as_bytes());
                out.extend_from_slice(label.as_bytes());
            }
        }
        Ok(())
    }
}

/// One record of a decoded track
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackEvent {
    Logged(LoggedEvent),
    Tempo(u32),
    EndOfTrack,
    /// Any other message; kept so foreign files still scan
    Other { status: u8, data: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRecord {
    pub delta: u32,
    pub event: TrackEvent,
}

/// Result of scanning a track body as far as it is complete
#[derive(Debug, Clone, Default)]
pub struct TrackScan {
    pub records: Vec<TrackRecord>,
    /// Bytes covered by complete records
    pub complete_len: usize,
}

/// Scan records until the input ends or a record is cut short
///
/// A cut-off final record (power lost mid-write) is not an error here; it is
/// reflected by `complete_len` falling short of the input length. Unknown
/// status bytes are still errors.
pub fn scan_track(bytes: &[u8]) -> Result<TrackScan> {
    let mut scan = TrackScan::default();
    let mut pos = 0;

    while pos < bytes.len() {
        match decode_record(bytes, pos) {
            Ok((record, next)) => {
                scan.records.push(record);
                pos = next;
                scan.complete_len = pos;
            }
            Err(LogError::Truncated { .. }) => break,
            Err(e) => return Err(e),
        }
    }

    Ok(scan)
}

/// Decode a whole track body, rejecting a trailing partial record
pub fn decode_track(bytes: &[u8]) -> Result<Vec<TrackRecord>> {
    let scan = scan_track(bytes)?;
    if scan.complete_len != bytes.len() {
        return Err(LogError::Truncated {
            offset: scan.complete_len,
        });
    }
    Ok(scan.records)
}

fn decode_record(bytes: &[u8], start: usize) -> Result<(TrackRecord, usize)> {
    let truncated = LogError::Truncated { offset: start };
    let (delta, used) =
        vlq::decode(&bytes[start..]).map_err(|_| LogError::Truncated { offset: start })?;
    let mut pos = start + used;

    let status = *bytes.get(pos).ok_or(truncated)?;
    pos += 1;

    let take = |pos: usize, n: usize| slice_at(bytes, pos, n, start);

    let event = match status {
        0x80..=0xEF => {
            let data_len = if matches!(status & 0xF0, 0xC0 | 0xD0) { 1 } else { 2 };
            let data = take(pos, data_len)?;
            pos += data_len;
            match (status & 0xF0, data) {
                (0x90, &[key, velocity]) => {
                    TrackEvent::Logged(LoggedEvent::Channel(ChannelMessage::NoteOn { key, velocity }))
                }
                (0x80, &[key, velocity]) => {
                    TrackEvent::Logged(LoggedEvent::Channel(ChannelMessage::NoteOff { key, velocity }))
                }
                (0xB0, &[controller, value]) => TrackEvent::Logged(LoggedEvent::Channel(
                    ChannelMessage::ControlChange { controller, value },
                )),
                (0xE0, &[lsb, msb]) => TrackEvent::Logged(LoggedEvent::Channel(
                    ChannelMessage::PitchBend {
                        value: (lsb as u16) | ((msb as u16) << 7),
                    },
                )),
                _ => TrackEvent::Other {
                    status,
                    data: data.to_vec(),
                },
            }
        }
        META => {
            let kind = *bytes.get(pos).ok_or(LogError::Truncated { offset: start })?;
            pos += 1;
            let (len, used) =
                vlq::decode(&bytes[pos..]).map_err(|_| LogError::Truncated { offset: start })?;
            pos += used;
            let data = take(pos, len as usize)?;
            pos += len as usize;
            match (kind, data) {
                (META_END_OF_TRACK, _) => TrackEvent::EndOfTrack,
                (META_TEMPO, &[a, b, c]) => {
                    TrackEvent::Tempo(((a as u32) << 16) | ((b as u32) << 8) | c as u32)
                }
                (META_MARKER, label) => TrackEvent::Logged(LoggedEvent::Marker(
                    String::from_utf8_lossy(label).into_owned(),
                )),
                _ => {
                    let mut raw = vec![kind];
                    raw.extend_from_slice(data);
                    TrackEvent::Other { status, data: raw }
                }
            }
        }
        0xF0 | 0xF7 => {
            let (len, used) =
                vlq::decode(&bytes[pos..]).map_err(|_| LogError::Truncated { offset: start })?;
            pos += used;
            let data = take(pos, len as usize)?;
            pos += len as usize;
            TrackEvent::Other {
                status,
                data: data.to_vec(),
            }
        }
        _ => {
            return Err(LogError::UnexpectedStatus {
                offset: pos - 1,
                status,
            })
        }
    };

    Ok((TrackRecord { delta, event }, pos))
}

fn slice_at(bytes: &[u8], pos: usize, n: usize, start: usize) -> Result<&[u8]> {
    bytes
        .get(pos..pos + n)
        .ok_or(LogError::Truncated { offset: start })
}

/// A session file read back from storage
#[derive(Debug, Clone)]
pub struct SessionLog {
    pub ticks_per_beat: u16,
    /// Value currently in the track length field (0 until finalized)
    pub declared_length: u32,
    pub records: Vec<TrackRecord>,
}

impl SessionLog {
    /// Tempo from the opening tempo event
    pub fn tempo(&self) -> Option<u32> {
        self.records.iter().find_map(|r| match r.event {
            TrackEvent::Tempo(t) => Some(t),
            _ => None,
        })
    }

    /// Captured events with their deltas, preamble and terminator excluded
    pub fn events(&self) -> Vec<Event> {
        self.records
            .iter()
            .filter_map(|r| match &r.event {
                TrackEvent::Logged(body) => Some(Event::new(r.delta, body.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn is_terminated(&self) -> bool {
        matches!(
            self.records.last(),
            Some(TrackRecord {
                event: TrackEvent::EndOfTrack,
                ..
            })
        )
    }
}

/// Check the fixed header and track envelope; returns ticks per beat
pub fn parse_prefix(bytes: &[u8]) -> Result<(u16, u32)> {
    if bytes.len() < PREFIX_LEN
        || &bytes[0..4] != b"MThd"
        || bytes[4..8] != 6u32.to_be_bytes()
        || bytes[8..10] != 0u16.to_be_bytes()
        || bytes[10..12] != 1u16.to_be_bytes()
        || &bytes[14..18] != b"MTrk"
    {
        return Err(LogError::BadHeader);
    }
    let ticks_per_beat = u16::from_be_bytes([bytes[12], bytes[13]]);
    let declared = u32::from_be_bytes([bytes[18], bytes[19], bytes[20], bytes[21]]);
    Ok((ticks_per_beat, declared))
}

/// Parse a complete session file
pub fn parse_session(bytes: &[u8]) -> Result<SessionLog> {
    let (ticks_per_beat, declared_length) = parse_prefix(bytes)?;
    let records = decode_track(&bytes[PREFIX_LEN..])?;
    Ok(SessionLog {
        ticks_per_beat,
        declared_length,
        records,
    })
}

/// Bytes of an End-of-Track meta event with zero delta
pub const END_OF_TRACK: [u8; 4] = [0x00, META, META_END_OF_TRACK, 0x00];
