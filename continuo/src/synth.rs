// Additive sine rendering of an event stream.
//
// Walks the merged `RawEvent` stream once, converting tick deltas to seconds
// with whatever tempo is in effect (tempo events change it mid-stream).
// Sounding notes are queued per pitch, first in first out like the parser,
// with their start sample. When a note ends, a sine at its 12-TET frequency,
// scaled by a fixed amplitude and velocity/127 and shaped by a linear ADSR
// envelope, is added into the mix at the note's start offset.
//
// The mix is pre-sized from the stream length at the initial tempo plus a
// padding margin. That estimate can undershoot (a later tempo change may
// slow the tail down), so the buffer zero-extends whenever a note ends past
// it. Growth is counted and logged, never reported as an error.
//
// Finally the mix is divided by its peak absolute value and quantized to
// i16. A silent mix is left at zero.

use std::collections::{BTreeMap, VecDeque};
use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::timeline::{DEFAULT_MICROSECONDS_PER_BEAT, EventKind, RawEvent, pitch_to_frequency};

/// ADSR stage lengths as fractions of each note's length.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Envelope {
    /// Linear ramp 0 -> 1.
    pub attack: f32,
    /// Linear ramp 1 -> sustain_level.
    pub decay: f32,
    /// Plateau level, 0..=1.
    pub sustain_level: f32,
    /// Linear ramp sustain_level -> 0 at the end of the note.
    pub release: f32,
}

impl Default for Envelope {
    fn default() -> Self {
        Envelope {
            attack: 0.1,
            decay: 0.1,
            sustain_level: 0.7,
            release: 0.2,
        }
    }
}

/// Envelope stage boundaries for a note of a given sample length.
#[derive(Clone, Copy, Debug)]
struct Stages {
    attack_end: usize,
    decay_end: usize,
    release_start: usize,
    len: usize,
    sustain: f32,
}

impl Envelope {
    fn stages(&self, len: usize) -> Stages {
        let attack = (len as f32 * self.attack) as usize;
        let decay = (len as f32 * self.decay) as usize;
        let release = (len as f32 * self.release) as usize;
        let attack_end = attack.min(len);
        let decay_end = (attack_end + decay).min(len);
        Stages {
            attack_end,
            decay_end,
            release_start: len.saturating_sub(release).max(decay_end),
            len,
            sustain: self.sustain_level,
        }
    }

    /// Gain at sample `i` of a note `len` samples long.
    pub fn level(&self, i: usize, len: usize) -> f32 {
        self.stages(len).level(i)
    }
}

impl Stages {
    fn level(&self, i: usize) -> f32 {
        if i < self.attack_end {
            i as f32 / self.attack_end as f32
        } else if i < self.decay_end {
            let span = (self.decay_end - self.attack_end) as f32;
            1.0 - (1.0 - self.sustain) * (i - self.attack_end) as f32 / span
        } else if i < self.release_start {
            self.sustain
        } else if i < self.len {
            let span = (self.len - self.release_start) as f32;
            self.sustain * (self.len - 1 - i) as f32 / span
        } else {
            0.0
        }
    }
}

/// Rendering parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    pub sample_rate: u32,
    /// Peak gain of a full-velocity note before normalization.
    pub amplitude: f32,
    /// Extra buffer capacity beyond the estimated length, as a fraction.
    pub padding: f32,
    /// Longest event stream, in seconds, that will be rendered.
    pub max_seconds: f64,
    pub envelope: Envelope,
}

impl Default for SynthConfig {
    fn default() -> Self {
        SynthConfig {
            sample_rate: 44_100,
            amplitude: 0.3,
            padding: 0.2,
            max_seconds: 3600.0,
            envelope: Envelope::default(),
        }
    }
}

impl SynthConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError("sample_rate must be positive".into()));
        }
        if !(self.amplitude > 0.0 && self.amplitude.is_finite()) {
            return Err(ConfigError("amplitude must be positive".into()));
        }
        if !(self.padding >= 0.0 && self.padding.is_finite()) {
            return Err(ConfigError("padding must be non-negative".into()));
        }
        if !(self.max_seconds > 0.0 && self.max_seconds.is_finite()) {
            return Err(ConfigError("max_seconds must be positive".into()));
        }
        let env = &self.envelope;
        for (name, value) in [
            ("attack", env.attack),
            ("decay", env.decay),
            ("release", env.release),
            ("sustain_level", env.sustain_level),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError(format!("envelope {name} must be within 0..=1")));
            }
        }
        if env.attack + env.decay + env.release > 1.0 {
            return Err(ConfigError(
                "envelope attack + decay + release must not exceed 1".into(),
            ));
        }
        Ok(())
    }

    /// Length of `events` in seconds, or an error if it exceeds
    /// `max_seconds`.
    pub fn check_duration(
        &self,
        events: &[RawEvent],
        ticks_per_beat: u16,
    ) -> Result<f64, ConfigError> {
        let seconds = stream_seconds(events, ticks_per_beat);
        if seconds > self.max_seconds {
            return Err(ConfigError(format!(
                "timeline lasts {seconds:.0} s, over the {:.0} s render limit",
                self.max_seconds
            )));
        }
        Ok(seconds)
    }
}

/// Un-normalized render output.
#[derive(Debug, Clone)]
pub struct Mix {
    pub buffer: Vec<f32>,
    /// Times the buffer had to be extended past the estimate.
    pub buffer_growths: usize,
    pub notes_rendered: usize,
    /// Notes too short to cover a single sample.
    pub notes_skipped: usize,
}

/// Final 16-bit render.
#[derive(Debug, Clone)]
pub struct RenderedAudio {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    /// Peak absolute amplitude of the mix before normalization.
    pub peak: f32,
    pub buffer_growths: usize,
    pub notes_rendered: usize,
}

impl RenderedAudio {
    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

#[derive(Debug, Clone, Copy)]
struct Voice {
    start_sample: usize,
    velocity: u8,
}

fn seconds_per_tick(microseconds_per_beat: u32, ticks_per_beat: u16) -> f64 {
    f64::from(microseconds_per_beat) / 1_000_000.0 / f64::from(ticks_per_beat.max(1))
}

/// Wall-clock length of an event stream, following its tempo changes.
pub fn stream_seconds(events: &[RawEvent], ticks_per_beat: u16) -> f64 {
    let mut spt = seconds_per_tick(DEFAULT_MICROSECONDS_PER_BEAT, ticks_per_beat);
    let mut seconds = 0.0;
    for event in events {
        seconds += event.delta as f64 * spt;
        if let EventKind::Tempo {
            microseconds_per_beat,
        } = event.kind
        {
            spt = seconds_per_tick(microseconds_per_beat, ticks_per_beat);
        }
    }
    seconds
}

/// Render an event stream into an un-normalized f32 mix.
///
/// The initial capacity never exceeds `max_seconds` plus padding; callers
/// should reject longer streams with [`SynthConfig::check_duration`] first.
pub fn render_mix(events: &[RawEvent], ticks_per_beat: u16, config: &SynthConfig) -> Mix {
    let sample_rate = f64::from(config.sample_rate);
    let initial_tempo = events
        .iter()
        .find_map(|e| match e.kind {
            EventKind::Tempo {
                microseconds_per_beat,
            } => Some(microseconds_per_beat),
            _ => None,
        })
        .unwrap_or(DEFAULT_MICROSECONDS_PER_BEAT);
    let total_ticks: u64 = events.iter().map(|e| e.delta).sum();
    let estimate = total_ticks as f64 * seconds_per_tick(initial_tempo, ticks_per_beat);
    let padded = estimate.min(config.max_seconds) * (1.0 + f64::from(config.padding));
    let capacity = (padded * sample_rate).ceil() as usize;

    let mut mix = Mix {
        buffer: vec![0.0; capacity],
        buffer_growths: 0,
        notes_rendered: 0,
        notes_skipped: 0,
    };
    let mut spt = seconds_per_tick(DEFAULT_MICROSECONDS_PER_BEAT, ticks_per_beat);
    let mut now = 0.0f64;
    let mut sounding: BTreeMap<u8, VecDeque<Voice>> = BTreeMap::new();

    for event in events {
        now += event.delta as f64 * spt;
        let sample = (now * sample_rate).round() as usize;
        match event.kind {
            EventKind::Tempo {
                microseconds_per_beat,
            } => spt = seconds_per_tick(microseconds_per_beat, ticks_per_beat),
            EventKind::NoteStart { pitch, velocity } if velocity > 0 => {
                sounding.entry(pitch).or_default().push_back(Voice {
                    start_sample: sample,
                    velocity,
                });
            }
            EventKind::NoteStart { pitch, .. } | EventKind::NoteEnd { pitch } => {
                let Some(voice) = sounding.get_mut(&pitch).and_then(VecDeque::pop_front) else {
                    continue;
                };
                if sample <= voice.start_sample {
                    mix.notes_skipped += 1;
                    continue;
                }
                if sample > mix.buffer.len() {
                    debug!(
                        from = mix.buffer.len(),
                        to = sample,
                        "extending audio buffer past estimate"
                    );
                    mix.buffer.resize(sample, 0.0);
                    mix.buffer_growths += 1;
                }
                let gain = config.amplitude * f32::from(voice.velocity) / 127.0;
                add_tone(
                    &mut mix.buffer[voice.start_sample..sample],
                    pitch_to_frequency(pitch),
                    gain,
                    &config.envelope,
                    sample_rate,
                );
                mix.notes_rendered += 1;
            }
        }
    }

    mix
}

/// Add an enveloped sine into `out`, which spans exactly the note.
fn add_tone(out: &mut [f32], frequency: f64, gain: f32, envelope: &Envelope, sample_rate: f64) {
    let stages = envelope.stages(out.len());
    let step = TAU * frequency / sample_rate;
    for (i, slot) in out.iter_mut().enumerate() {
        let wave = (step * i as f64).sin() as f32;
        *slot += wave * gain * stages.level(i);
    }
}

/// Scale a mix to full 16-bit range. Returns the samples and the peak.
pub fn normalize(buffer: &[f32]) -> (Vec<i16>, f32) {
    let peak = buffer.iter().fold(0.0f32, |m, &s| m.max(s.abs()));
    let scale = if peak > 0.0 { 1.0 / peak } else { 0.0 };
    let samples = buffer
        .iter()
        .map(|&s| (s * scale * f32::from(i16::MAX)).round() as i16)
        .collect();
    (samples, peak)
}

/// Render an event stream to normalized 16-bit PCM.
pub fn render(events: &[RawEvent], ticks_per_beat: u16, config: &SynthConfig) -> RenderedAudio {
    let mix = render_mix(events, ticks_per_beat, config);
    let (samples, peak) = normalize(&mix.buffer);
    info!(
        samples = samples.len(),
        notes = mix.notes_rendered,
        skipped = mix.notes_skipped,
        growths = mix.buffer_growths,
        "rendered audio"
    );
    RenderedAudio {
        samples,
        sample_rate: config.sample_rate,
        peak,
        buffer_growths: mix.buffer_growths,
        notes_rendered: mix.notes_rendered,
    }
}
