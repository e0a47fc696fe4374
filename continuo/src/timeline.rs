// Core timeline representation shared by every pipeline stage.
//
// A `Timeline` is what the parser produces from an input event stream and
// what the merger produces after appending generated material: a list of
// absolute-time `Note`s, the tempo map, and the tick resolution. `RawEvent`
// is the relative-time form (one delta per event) used on both ends of the
// pipeline: the SMF reader (midi.rs) emits it, the parser (parse.rs) consumes
// it, and the merger (merge.rs) re-derives it for the SMF writer and the
// synthesizer (synth.rs).
//
// Times are in ticks; `ticks_per_beat` converts them to beats and the tempo
// map converts beats to seconds.

use serde::{Deserialize, Serialize};

/// Highest valid pitch / velocity value.
pub const MAX_MIDI_VALUE: u8 = 127;

/// Tempo assumed when a timeline carries no tempo events (120 BPM).
pub const DEFAULT_MICROSECONDS_PER_BEAT: u32 = 500_000;

/// A single sounded pitch.
///
/// `duration == 0` marks a zero-length note; it survives in the timeline but
/// is never rendered to audio.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub pitch: u8,
    pub start: u64,
    pub duration: u64,
    pub velocity: u8,
}

impl Note {
    /// Absolute tick at which the note stops sounding.
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.duration)
    }
}

/// A tempo change at an absolute tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempoEvent {
    pub at: u64,
    pub microseconds_per_beat: u32,
}

/// Notes plus tempo map plus resolution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    pub notes: Vec<Note>,
    pub tempos: Vec<TempoEvent>,
    pub ticks_per_beat: u16,
}

impl Timeline {
    /// Latest note end, or 0 for an empty timeline.
    pub fn end_tick(&self) -> u64 {
        self.notes.iter().map(Note::end).max().unwrap_or(0)
    }

    /// Tempo in effect at tick 0.
    pub fn initial_tempo(&self) -> u32 {
        self.tempos
            .first()
            .map(|t| t.microseconds_per_beat)
            .unwrap_or(DEFAULT_MICROSECONDS_PER_BEAT)
    }

    /// Pitch sequence in note order.
    pub fn pitches(&self) -> Vec<u8> {
        self.notes.iter().map(|n| n.pitch).collect()
    }
}

/// What happens at an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// Pitch starts sounding. Velocity 0 is treated as `NoteEnd`.
    NoteStart { pitch: u8, velocity: u8 },
    /// Pitch stops sounding.
    NoteEnd { pitch: u8 },
    /// Tempo change, effective from this event on.
    Tempo { microseconds_per_beat: u32 },
}

/// An event positioned relative to the previous one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Ticks since the previous event (or since 0 for the first).
    pub delta: u64,
    pub kind: EventKind,
}

impl RawEvent {
    pub fn note_start(delta: u64, pitch: u8, velocity: u8) -> Self {
        RawEvent {
            delta,
            kind: EventKind::NoteStart { pitch, velocity },
        }
    }

    pub fn note_end(delta: u64, pitch: u8) -> Self {
        RawEvent {
            delta,
            kind: EventKind::NoteEnd { pitch },
        }
    }

    pub fn tempo(delta: u64, microseconds_per_beat: u32) -> Self {
        RawEvent {
            delta,
            kind: EventKind::Tempo {
                microseconds_per_beat,
            },
        }
    }
}

/// Convert a MIDI pitch number to its 12-TET frequency in Hz (A4 = 69 = 440 Hz).
pub fn pitch_to_frequency(pitch: u8) -> f64 {
    440.0 * 2f64.powf((f64::from(pitch) - 69.0) / 12.0)
}
