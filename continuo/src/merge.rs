// Appending generated pitches to a timeline and re-deriving its events.
//
// The Markov model only predicts pitches, so generated notes get synthetic
// timing: they start where the original material ends, one spacing unit
// apart, with a fixed length and the MIDI mid-point velocity. The merged
// note list is then turned back into a relative-time `RawEvent` stream for
// the SMF writer (midi.rs) and the synthesizer (synth.rs).
//
// Event order is chosen so that `parse::parse_events` reads the stream back
// to exactly the same note list. Events sort by (tick, tempo before notes,
// note index, start before end). For notes whose same-pitch ends are in
// start order, which the parser's FIFO pairing always produces, every end
// event then closes the note it belongs to.

use serde::{Deserialize, Serialize};

use crate::timeline::{Note, RawEvent, TempoEvent, Timeline};

/// Velocity given to generated notes.
pub const DEFAULT_VELOCITY: u8 = 64;

/// Length of each generated note relative to the spacing unit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteLength {
    /// Fills the whole unit (legato).
    #[default]
    Full,
    /// Half the unit, never shorter than one tick.
    Half,
}

/// Timing rules for generated notes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpacingPolicy {
    /// Ticks between generated note starts. `None` means one beat.
    pub spacing: Option<u64>,
    pub note_length: NoteLength,
}

impl SpacingPolicy {
    /// Resolve the spacing unit for a given resolution.
    pub fn unit(&self, ticks_per_beat: u16) -> u64 {
        self.spacing.unwrap_or(u64::from(ticks_per_beat))
    }

    /// Duration of each generated note for a given resolution.
    pub fn note_duration(&self, ticks_per_beat: u16) -> u64 {
        let unit = self.unit(ticks_per_beat);
        match self.note_length {
            NoteLength::Full => unit,
            NoteLength::Half => (unit / 2).max(1),
        }
    }
}

/// Lay generated pitches out after `original` and merge both into one
/// start-ordered list.
///
/// Generation starts at the latest original note end (0 if there are no
/// original notes). The sort is stable, so notes sharing a start keep their
/// original relative order. Placement saturates at `u64::MAX`; the SMF
/// encoder rejects such ticks rather than wrapping them.
pub fn merge_notes(
    original: &[Note],
    generated: &[u8],
    ticks_per_beat: u16,
    policy: &SpacingPolicy,
) -> Vec<Note> {
    let last_time = original.iter().map(Note::end).max().unwrap_or(0);
    let unit = policy.unit(ticks_per_beat);
    let duration = policy.note_duration(ticks_per_beat);

    let mut merged: Vec<Note> = original.to_vec();
    merged.extend(generated.iter().enumerate().map(|(i, &pitch)| Note {
        pitch,
        start: last_time.saturating_add((i as u64).saturating_mul(unit)),
        duration,
        velocity: DEFAULT_VELOCITY,
    }));
    merged.sort_by_key(|n| n.start);
    merged
}

/// Return a new timeline with `generated` appended, keeping tempos and
/// resolution.
pub fn merge_continuation(timeline: &Timeline, generated: &[u8], policy: &SpacingPolicy) -> Timeline {
    Timeline {
        notes: merge_notes(&timeline.notes, generated, timeline.ticks_per_beat, policy),
        tempos: timeline.tempos.clone(),
        ticks_per_beat: timeline.ticks_per_beat,
    }
}

/// Absolute-time event used only while ordering.
#[derive(Debug, Clone, Copy)]
struct Placed {
    tick: u64,
    /// 0 for tempo, 1 for notes.
    group: u8,
    index: usize,
    /// 0 for start, 1 for end.
    rank: u8,
    event: RawEvent,
}

/// Convert notes and tempos into a relative-time event stream.
pub fn timeline_events(notes: &[Note], tempos: &[TempoEvent]) -> Vec<RawEvent> {
    let mut placed: Vec<Placed> = Vec::with_capacity(notes.len() * 2 + tempos.len());

    for (index, tempo) in tempos.iter().enumerate() {
        placed.push(Placed {
            tick: tempo.at,
            group: 0,
            index,
            rank: 0,
            event: RawEvent::tempo(0, tempo.microseconds_per_beat),
        });
    }
    for (index, note) in notes.iter().enumerate() {
        placed.push(Placed {
            tick: note.start,
            group: 1,
            index,
            rank: 0,
            event: RawEvent::note_start(0, note.pitch, note.velocity),
        });
        placed.push(Placed {
            tick: note.end(),
            group: 1,
            index,
            rank: 1,
            event: RawEvent::note_end(0, note.pitch),
        });
    }

    placed.sort_by_key(|p| (p.tick, p.group, p.index, p.rank));

    let mut previous = 0;
    placed
        .into_iter()
        .map(|p| {
            let mut event = p.event;
            event.delta = p.tick - previous;
            previous = p.tick;
            event
        })
        .collect()
}

impl Timeline {
    /// This timeline as a relative-time event stream.
    pub fn events(&self) -> Vec<RawEvent> {
        timeline_events(&self.notes, &self.tempos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_events;
    use crate::timeline::EventKind;

    fn note(pitch: u8, start: u64, duration: u64, velocity: u8) -> Note {
        Note {
            pitch,
            start,
            duration,
            velocity,
        }
    }

    #[test]
    fn generated_notes_follow_original() {
        let original = vec![note(60, 0, 240, 100), note(62, 240, 480, 90)];
        let merged = merge_notes(&original, &[64, 65], 480, &SpacingPolicy::default());
        assert_eq!(
            merged,
            vec![
                note(60, 0, 240, 100),
                note(62, 240, 480, 90),
                note(64, 720, 480, 64),
                note(65, 1200, 480, 64),
            ]
        );
    }

    #[test]
    fn custom_spacing_and_half_length() {
        let policy = SpacingPolicy {
            spacing: Some(120),
            note_length: NoteLength::Half,
        };
        let merged = merge_notes(&[], &[60, 62], 480, &policy);
        assert_eq!(merged, vec![note(60, 0, 60, 64), note(62, 120, 60, 64)]);

        let tiny = SpacingPolicy {
            spacing: Some(1),
            note_length: NoteLength::Half,
        };
        assert_eq!(tiny.note_duration(480), 1);
    }

    #[test]
    fn last_time_uses_latest_end_not_last_start() {
        // A long first note outlasts the later short one.
        let original = vec![note(48, 0, 2000, 100), note(60, 100, 100, 100)];
        let merged = merge_notes(&original, &[62], 480, &SpacingPolicy::default());
        assert_eq!(merged.last().unwrap().start, 2000);
    }

    #[test]
    fn stable_sort_keeps_ties_in_order() {
        let original = vec![note(64, 0, 100, 100), note(60, 0, 100, 100)];
        let merged = merge_notes(&original, &[], 480, &SpacingPolicy::default());
        assert_eq!(merged[0].pitch, 64);
        assert_eq!(merged[1].pitch, 60);
    }

    #[test]
    fn events_have_relative_deltas_and_tempo_first() {
        let notes = vec![note(60, 0, 240, 100), note(62, 240, 240, 90)];
        let tempos = vec![TempoEvent {
            at: 240,
            microseconds_per_beat: 400_000,
        }];
        let events = timeline_events(&notes, &tempos);
        let expected = vec![
            RawEvent::note_start(0, 60, 100),
            RawEvent::tempo(240, 400_000),
            RawEvent::note_end(0, 60),
            RawEvent::note_start(0, 62, 90),
            RawEvent::note_end(240, 62),
        ];
        assert_eq!(events, expected);
    }

    #[test]
    fn round_trip_reproduces_notes() {
        // Covers overlaps, same-pitch repeats, a zero-length marker, and
        // back-to-back same-pitch notes.
        let events = vec![
            RawEvent::tempo(0, 500_000),
            RawEvent::note_start(0, 60, 100),
            RawEvent::note_start(0, 64, 80),
            RawEvent::note_start(100, 60, 70),
            RawEvent::note_end(140, 60),
            RawEvent::note_start(0, 60, 90),
            RawEvent::note_end(0, 64),
            RawEvent::note_start(0, 67, 50),
            RawEvent::note_end(0, 67),
            RawEvent::tempo(0, 450_000),
            RawEvent::note_end(240, 60),
            RawEvent::note_end(0, 60),
        ];
        let original = parse_events(&events, 480).unwrap();
        let merged = merge_continuation(&original, &[60, 60, 62, 67], &SpacingPolicy::default());

        let reparsed = parse_events(&merged.events(), merged.ticks_per_beat).unwrap();
        assert_eq!(reparsed.notes, merged.notes);
        assert_eq!(reparsed.tempos, merged.tempos);
    }

    #[test]
    fn round_trip_with_half_length_notes() {
        let original = parse_events(
            &[RawEvent::note_start(0, 72, 100), RawEvent::note_end(480, 72)],
            480,
        )
        .unwrap();
        let policy = SpacingPolicy {
            spacing: None,
            note_length: NoteLength::Half,
        };
        let merged = merge_continuation(&original, &[72, 72, 74], &policy);
        let reparsed = parse_events(&merged.events(), 480).unwrap();
        assert_eq!(reparsed.notes, merged.notes);
    }

    #[test]
    fn huge_spacing_saturates_instead_of_overflowing() {
        let original = vec![note(60, 0, 240, 100)];
        let policy = SpacingPolicy {
            spacing: Some(u64::MAX),
            note_length: NoteLength::Full,
        };
        let merged = merge_notes(&original, &[62, 64, 65], 480, &policy);
        assert_eq!(merged.len(), 4);
        assert_eq!(merged[1].start, 240);
        assert_eq!(merged[2].start, u64::MAX);
        assert_eq!(merged[3].end(), u64::MAX);

        let events = timeline_events(&merged, &[]);
        assert_eq!(events.len(), 8);
    }

    #[test]
    fn every_note_yields_start_and_end() {
        let merged = merge_notes(&[], &[60, 62, 64], 96, &SpacingPolicy::default());
        let events = timeline_events(&merged, &[]);
        let starts = events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::NoteStart { .. }))
            .count();
        let ends = events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::NoteEnd { .. }))
            .count();
        assert_eq!((starts, ends), (3, 3));
        let total: u64 = events.iter().map(|e| e.delta).sum();
        assert_eq!(total, 3 * 96);
    }
}
