// Timeline parser: relative-time event stream -> absolute-time notes.
//
// Walks a `RawEvent` stream accumulating absolute ticks. Note starts open an
// entry in a note arena; note ends (explicit, or a start with velocity 0)
// close the earliest still-open entry of the same pitch. Each pitch has its
// own FIFO of open arena indices, so closing is O(1) amortized and
// overlapping same-pitch notes pair first-in first-out.
//
// Notes still open when the stream ends are discarded rather than given a
// zero or guessed duration. The synthesizer (synth.rs) therefore never sees
// an unterminated note coming from the parser.
//
// The merger (merge.rs) emits streams this parser reads back to exactly the
// note list it started from; tests for that round trip live in merge.rs.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::error::ParseError;
use crate::timeline::{EventKind, MAX_MIDI_VALUE, Note, RawEvent, TempoEvent, Timeline};

/// A note in the arena. `end` is `None` while the note is still sounding.
#[derive(Debug, Clone, Copy)]
struct PendingNote {
    pitch: u8,
    start: u64,
    velocity: u8,
    end: Option<u64>,
}

/// Parse an event stream into a `Timeline`.
///
/// Fails if `ticks_per_beat` is zero, any pitch/velocity exceeds 127, a
/// tempo is zero, or no note is ever closed.
pub fn parse_events(events: &[RawEvent], ticks_per_beat: u16) -> Result<Timeline, ParseError> {
    if ticks_per_beat == 0 {
        return Err(ParseError::Malformed("ticks_per_beat must be positive".into()));
    }

    let mut arena: Vec<PendingNote> = Vec::new();
    let mut open: Vec<VecDeque<usize>> = vec![VecDeque::new(); MAX_MIDI_VALUE as usize + 1];
    let mut tempos: Vec<TempoEvent> = Vec::new();
    let mut now: u64 = 0;
    let mut stray_ends = 0usize;

    for (i, event) in events.iter().enumerate() {
        now = now.checked_add(event.delta).ok_or_else(|| {
            ParseError::Malformed(format!("event {i}: absolute time overflows"))
        })?;

        match event.kind {
            EventKind::Tempo {
                microseconds_per_beat,
            } => {
                if microseconds_per_beat == 0 {
                    return Err(ParseError::Malformed(format!("event {i}: zero tempo")));
                }
                tempos.push(TempoEvent {
                    at: now,
                    microseconds_per_beat,
                });
            }
            EventKind::NoteStart { pitch, velocity } => {
                check_range(i, "pitch", pitch)?;
                check_range(i, "velocity", velocity)?;
                if velocity > 0 {
                    open[pitch as usize].push_back(arena.len());
                    arena.push(PendingNote {
                        pitch,
                        start: now,
                        velocity,
                        end: None,
                    });
                } else if !close_earliest(&mut arena, &mut open, pitch, now) {
                    stray_ends += 1;
                }
            }
            EventKind::NoteEnd { pitch } => {
                check_range(i, "pitch", pitch)?;
                if !close_earliest(&mut arena, &mut open, pitch, now) {
                    stray_ends += 1;
                }
            }
        }
    }

    if stray_ends > 0 {
        debug!(stray_ends, "ignored note-offs with no sounding note");
    }

    let open_notes = arena.iter().filter(|n| n.end.is_none()).count();
    let notes: Vec<Note> = arena
        .into_iter()
        .filter_map(|n| {
            n.end.map(|end| Note {
                pitch: n.pitch,
                start: n.start,
                duration: end - n.start,
                velocity: n.velocity,
            })
        })
        .collect();

    if notes.is_empty() {
        return Err(if open_notes > 0 {
            ParseError::Truncated { open_notes }
        } else {
            ParseError::Malformed("timeline contains no notes".into())
        });
    }
    if open_notes > 0 {
        warn!(open_notes, "discarded notes never closed by end of stream");
    }

    Ok(Timeline {
        notes,
        tempos,
        ticks_per_beat,
    })
}

/// Close the earliest open note of `pitch`. Returns false if none is open.
fn close_earliest(
    arena: &mut [PendingNote],
    open: &mut [VecDeque<usize>],
    pitch: u8,
    now: u64,
) -> bool {
    match open[pitch as usize].pop_front() {
        Some(idx) => {
            arena[idx].end = Some(now);
            true
        }
        None => false,
    }
}

fn check_range(index: usize, what: &str, value: u8) -> Result<(), ParseError> {
    if value > MAX_MIDI_VALUE {
        return Err(ParseError::Malformed(format!(
            "event {index}: {what} {value} out of range 0-127"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(pitch: u8, start: u64, duration: u64, velocity: u8) -> Note {
        Note {
            pitch,
            start,
            duration,
            velocity,
        }
    }

    #[test]
    fn simple_melody() {
        let events = vec![
            RawEvent::tempo(0, 600_000),
            RawEvent::note_start(0, 60, 100),
            RawEvent::note_end(240, 60),
            RawEvent::note_start(0, 62, 90),
            RawEvent::note_end(480, 62),
        ];
        let timeline = parse_events(&events, 480).unwrap();
        assert_eq!(
            timeline.notes,
            vec![note(60, 0, 240, 100), note(62, 240, 480, 90)]
        );
        assert_eq!(
            timeline.tempos,
            vec![TempoEvent {
                at: 0,
                microseconds_per_beat: 600_000
            }]
        );
        assert_eq!(timeline.ticks_per_beat, 480);
    }

    #[test]
    fn zero_velocity_start_is_an_end() {
        let events = vec![
            RawEvent::note_start(0, 64, 80),
            RawEvent::note_start(120, 64, 0),
        ];
        let timeline = parse_events(&events, 96).unwrap();
        assert_eq!(timeline.notes, vec![note(64, 0, 120, 80)]);
    }

    #[test]
    fn same_pitch_closes_first_in_first_out() {
        let events = vec![
            RawEvent::note_start(0, 60, 100),
            RawEvent::note_start(100, 60, 50),
            RawEvent::note_end(100, 60),
            RawEvent::note_end(280, 60),
        ];
        let timeline = parse_events(&events, 480).unwrap();
        assert_eq!(
            timeline.notes,
            vec![note(60, 0, 200, 100), note(60, 100, 380, 50)]
        );
    }

    #[test]
    fn unclosed_notes_are_discarded() {
        let events = vec![
            RawEvent::note_start(0, 60, 100),
            RawEvent::note_start(0, 67, 100),
            RawEvent::note_end(480, 60),
        ];
        let timeline = parse_events(&events, 480).unwrap();
        assert_eq!(timeline.notes, vec![note(60, 0, 480, 100)]);
    }

    #[test]
    fn only_open_notes_is_truncated() {
        let events = vec![
            RawEvent::note_start(0, 60, 100),
            RawEvent::note_start(10, 62, 100),
        ];
        assert_eq!(
            parse_events(&events, 480),
            Err(ParseError::Truncated { open_notes: 2 })
        );
    }

    #[test]
    fn empty_stream_is_malformed() {
        let events = vec![RawEvent::tempo(0, 500_000)];
        assert!(matches!(
            parse_events(&events, 480),
            Err(ParseError::Malformed(_))
        ));
        assert!(matches!(parse_events(&[], 480), Err(ParseError::Malformed(_))));
    }

    #[test]
    fn stray_note_off_is_ignored() {
        let events = vec![
            RawEvent::note_end(0, 72),
            RawEvent::note_start(10, 60, 100),
            RawEvent::note_end(10, 60),
        ];
        let timeline = parse_events(&events, 480).unwrap();
        assert_eq!(timeline.notes, vec![note(60, 10, 10, 100)]);
    }

    #[test]
    fn rejects_bad_values() {
        let bad_pitch = vec![RawEvent::note_start(0, 128, 100)];
        assert!(matches!(
            parse_events(&bad_pitch, 480),
            Err(ParseError::Malformed(_))
        ));
        let bad_tempo = vec![RawEvent::tempo(0, 0)];
        assert!(matches!(
            parse_events(&bad_tempo, 480),
            Err(ParseError::Malformed(_))
        ));
        let ok = vec![RawEvent::note_start(0, 60, 1), RawEvent::note_end(1, 60)];
        assert!(matches!(parse_events(&ok, 0), Err(ParseError::Malformed(_))));
    }

    #[test]
    fn tempo_changes_get_absolute_times() {
        let events = vec![
            RawEvent::note_start(0, 60, 100),
            RawEvent::tempo(480, 400_000),
            RawEvent::note_end(0, 60),
            RawEvent::tempo(960, 300_000),
        ];
        let timeline = parse_events(&events, 480).unwrap();
        let ats: Vec<u64> = timeline.tempos.iter().map(|t| t.at).collect();
        assert_eq!(ats, vec![480, 1440]);
    }
}
