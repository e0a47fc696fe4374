// Standard MIDI File input and output.
//
// Reading flattens every track of an SMF into one relative-time `RawEvent`
// stream: each track's deltas are accumulated to absolute ticks, events are
// merged stably by (tick, track, position in track), and deltas are
// re-derived. Only note on/off and tempo meta events are kept; channels are
// ignored, so a multi-channel file is treated as one pitch stream.
//
// Writing produces SMF format 0 (one track) from a timeline's event stream,
// at the timeline's own resolution, so the output mirrors the input format.
//
// Uses the `midly` crate for both directions.

use std::path::Path;

use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
    num::{u4, u7, u15, u24, u28},
};
use tracing::info;

use crate::error::{ContinuoError, ParseError};
use crate::parse::parse_events;
use crate::timeline::{EventKind, RawEvent, Timeline};

/// Largest delta an SMF event can carry (28-bit VLQ).
pub(crate) const MAX_DELTA: u64 = (1 << 28) - 1;

/// Largest tempo an SMF tempo meta event can carry (24 bits).
const MAX_TEMPO: u32 = (1 << 24) - 1;

/// Largest metrical resolution (15 bits).
const MAX_TICKS_PER_BEAT: u16 = (1 << 15) - 1;

/// Name written into the output track.
const TRACK_NAME: &[u8] = b"continuo";

/// Extract the resolution and merged event stream from a parsed SMF.
pub fn smf_events(smf: &Smf<'_>) -> Result<(Vec<RawEvent>, u16), ParseError> {
    let ticks_per_beat = match smf.header.timing {
        Timing::Metrical(tpb) => tpb.as_int(),
        Timing::Timecode(..) => {
            return Err(ParseError::Malformed(
                "SMPTE timecode timing is not supported".into(),
            ));
        }
    };

    let mut placed: Vec<(u64, usize, usize, EventKind)> = Vec::new();
    for (track_index, track) in smf.tracks.iter().enumerate() {
        let mut tick: u64 = 0;
        for (position, event) in track.iter().enumerate() {
            tick += u64::from(event.delta.as_int());
            if let Some(kind) = convert_kind(&event.kind) {
                placed.push((tick, track_index, position, kind));
            }
        }
    }
    placed.sort_by_key(|&(tick, track, position, _)| (tick, track, position));

    let mut previous = 0;
    let events = placed
        .into_iter()
        .map(|(tick, _, _, kind)| {
            let delta = tick - previous;
            previous = tick;
            RawEvent { delta, kind }
        })
        .collect();
    Ok((events, ticks_per_beat))
}

fn convert_kind(kind: &TrackEventKind<'_>) -> Option<EventKind> {
    match kind {
        TrackEventKind::Midi { message, .. } => match message {
            MidiMessage::NoteOn { key, vel } => Some(EventKind::NoteStart {
                pitch: key.as_int(),
                velocity: vel.as_int(),
            }),
            MidiMessage::NoteOff { key, .. } => Some(EventKind::NoteEnd {
                pitch: key.as_int(),
            }),
            _ => None,
        },
        TrackEventKind::Meta(MetaMessage::Tempo(tempo)) => Some(EventKind::Tempo {
            microseconds_per_beat: tempo.as_int(),
        }),
        _ => None,
    }
}

/// Parse SMF bytes into a timeline.
pub fn timeline_from_bytes(bytes: &[u8]) -> Result<Timeline, ContinuoError> {
    let smf = Smf::parse(bytes)?;
    let (events, ticks_per_beat) = smf_events(&smf)?;
    Ok(parse_events(&events, ticks_per_beat)?)
}

/// Read and parse an SMF file.
pub fn read_smf(path: &Path) -> Result<Timeline, ContinuoError> {
    let bytes = std::fs::read(path)?;
    let timeline = timeline_from_bytes(&bytes)?;
    info!(
        path = %path.display(),
        notes = timeline.notes.len(),
        tempos = timeline.tempos.len(),
        ticks_per_beat = timeline.ticks_per_beat,
        "parsed input timeline"
    );
    Ok(timeline)
}

/// Encode a timeline as a format-0 SMF.
pub fn smf_bytes(timeline: &Timeline) -> Result<Vec<u8>, ContinuoError> {
    if timeline.ticks_per_beat == 0 || timeline.ticks_per_beat > MAX_TICKS_PER_BEAT {
        return Err(ContinuoError::MidiEncode(format!(
            "ticks_per_beat {} outside 1..={MAX_TICKS_PER_BEAT}",
            timeline.ticks_per_beat
        )));
    }

    let mut track: Track<'static> = Vec::new();
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::TrackName(TRACK_NAME)),
    });
    for event in timeline.events() {
        track.push(encode_event(&event)?);
    }
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });

    let mut smf = Smf::new(Header::new(
        Format::SingleTrack,
        Timing::Metrical(u15::new(timeline.ticks_per_beat)),
    ));
    smf.tracks.push(track);

    let mut buf: Vec<u8> = Vec::new();
    smf.write(&mut buf)
        .map_err(|e| ContinuoError::MidiEncode(e.to_string()))?;
    Ok(buf)
}

/// Write a timeline to `path` as a format-0 SMF.
pub fn write_smf(path: &Path, timeline: &Timeline) -> Result<(), ContinuoError> {
    let bytes = smf_bytes(timeline)?;
    std::fs::write(path, &bytes)?;
    Ok(())
}

fn encode_event(event: &RawEvent) -> Result<TrackEvent<'static>, ContinuoError> {
    if event.delta > MAX_DELTA {
        return Err(ContinuoError::MidiEncode(format!(
            "delta of {} ticks exceeds the SMF limit",
            event.delta
        )));
    }
    let delta = u28::new(event.delta as u32);
    let channel = u4::new(0);
    let kind = match event.kind {
        EventKind::NoteStart { pitch, velocity } => TrackEventKind::Midi {
            channel,
            message: MidiMessage::NoteOn {
                key: seven_bit(pitch)?,
                vel: seven_bit(velocity)?,
            },
        },
        EventKind::NoteEnd { pitch } => TrackEventKind::Midi {
            channel,
            message: MidiMessage::NoteOff {
                key: seven_bit(pitch)?,
                vel: u7::new(0),
            },
        },
        EventKind::Tempo {
            microseconds_per_beat,
        } => {
            if microseconds_per_beat > MAX_TEMPO {
                return Err(ContinuoError::MidiEncode(format!(
                    "tempo {microseconds_per_beat} us/beat exceeds 24 bits"
                )));
            }
            TrackEventKind::Meta(MetaMessage::Tempo(u24::new(microseconds_per_beat)))
        }
    };
    Ok(TrackEvent { delta, kind })
}

fn seven_bit(value: u8) -> Result<u7, ContinuoError> {
    if value > 127 {
        return Err(ContinuoError::MidiEncode(format!(
            "value {value} does not fit in 7 bits"
        )));
    }
    Ok(u7::new(value))
}
