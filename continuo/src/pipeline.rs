// End-to-end continuation run.
//
// Stages run strictly in order: read the SMF into a timeline, build the
// Markov model, generate a continuation, merge it into the timeline, encode
// the merged timeline as SMF, then render it to audio. The SMF encoder and
// the render duration limit both check the merged ticks before rendering
// sizes any buffer from them. Everything is computed in memory first;
// `<base>.mid`, `<base>.wav` and the optional JSON dumps are written only
// once every stage has succeeded, and if one write fails the files already
// written are removed again.
//
// The generator is seeded with the last `effective_order` input pitches and
// falls back to a uniform draw over all input pitches when no context
// matches.
//
// `continue_timeline` is the in-memory core; `run` adds the file I/O and is
// what the `continuo` binary (main.rs) calls.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use continuo_prng::RandomSource;
use tracing::{info, warn};

use crate::config::ContinuationConfig;
use crate::error::ContinuoError;
use crate::generate::{Continuation, generate};
use crate::markov::{MarkovModel, build_model};
use crate::merge::merge_continuation;
use crate::midi::{read_smf, smf_bytes};
use crate::synth::{RenderedAudio, render};
use crate::timeline::Timeline;
use crate::wav::encode_wav;

/// Everything produced from one input timeline.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub model: MarkovModel,
    pub effective_order: usize,
    pub continuation: Continuation,
    pub merged: Timeline,
    /// `merged` encoded as a format-0 SMF.
    pub midi: Vec<u8>,
    pub audio: RenderedAudio,
}

/// Optional extra outputs.
#[derive(Debug, Clone, Default)]
pub struct Dumps {
    /// Where to save the Markov model as JSON.
    pub model: Option<PathBuf>,
    /// Where to save the merged timeline as JSON.
    pub timeline: Option<PathBuf>,
}

/// Summary of a completed run.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub input_notes: usize,
    pub effective_order: usize,
    pub generated: usize,
    pub requested: usize,
    pub fallback_draws: usize,
    pub early_stop: bool,
    pub midi_path: PathBuf,
    pub wav_path: PathBuf,
    pub duration_seconds: f64,
}

/// Continue `timeline` and render the result, without touching the disk.
pub fn continue_timeline<R: RandomSource>(
    timeline: &Timeline,
    config: &ContinuationConfig,
    rng: &mut R,
) -> Result<Outcome, ContinuoError> {
    config.validate()?;
    let (model, effective_order) = build_model(&timeline.notes, config.max_order)?;

    let pitches = timeline.pitches();
    let seed = &pitches[pitches.len().saturating_sub(effective_order)..];
    let continuation = generate(
        &model,
        seed,
        config.length,
        effective_order,
        &pitches,
        rng,
    );
    info!(
        seed = ?seed,
        generated = continuation.pitches.len(),
        requested = continuation.requested,
        fallback_draws = continuation.fallback_draws,
        "generated continuation"
    );

    let merged = merge_continuation(timeline, &continuation.pitches, &config.spacing);
    info!(
        notes = merged.notes.len(),
        end_tick = merged.end_tick(),
        "merged timeline"
    );

    let midi = smf_bytes(&merged)?;
    let events = merged.events();
    config.synth.check_duration(&events, merged.ticks_per_beat)?;
    let audio = render(&events, merged.ticks_per_beat, &config.synth);

    Ok(Outcome {
        model,
        effective_order,
        continuation,
        merged,
        midi,
        audio,
    })
}

/// `base` with `extension` appended (not substituted).
pub fn output_path(base: &Path, extension: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

/// Read `input`, continue it, and write `<output_base>.mid` and
/// `<output_base>.wav`.
pub fn run<R: RandomSource>(
    input: &Path,
    output_base: &Path,
    config: &ContinuationConfig,
    dumps: &Dumps,
    rng: &mut R,
) -> Result<PipelineReport, ContinuoError> {
    let timeline = read_smf(input)?;
    let outcome = continue_timeline(&timeline, config, rng)?;

    let midi_path = output_path(output_base, "mid");
    let wav_path = output_path(output_base, "wav");
    let mut outputs: Vec<(PathBuf, Vec<u8>)> = vec![
        (midi_path.clone(), outcome.midi.clone()),
        (
            wav_path.clone(),
            encode_wav(&outcome.audio.samples, outcome.audio.sample_rate)?,
        ),
    ];
    if let Some(path) = &dumps.model {
        outputs.push((path.clone(), outcome.model.to_json()?.into_bytes()));
    }
    if let Some(path) = &dumps.timeline {
        outputs.push((
            path.clone(),
            serde_json::to_string_pretty(&outcome.merged)?.into_bytes(),
        ));
    }
    write_all(&outputs)?;

    Ok(PipelineReport {
        input_notes: timeline.notes.len(),
        effective_order: outcome.effective_order,
        generated: outcome.continuation.pitches.len(),
        requested: outcome.continuation.requested,
        fallback_draws: outcome.continuation.fallback_draws,
        early_stop: outcome.continuation.early_stop,
        midi_path,
        wav_path,
        duration_seconds: outcome.audio.duration_seconds(),
    })
}

/// Write every output, or none: on the first failure, remove the files
/// already written and return the error.
fn write_all(outputs: &[(PathBuf, Vec<u8>)]) -> Result<(), ContinuoError> {
    for (written, (path, bytes)) in outputs.iter().enumerate() {
        if let Err(e) = std::fs::write(path, bytes) {
            for (done, _) in &outputs[..written] {
                let _ = std::fs::remove_file(done);
            }
            warn!(path = %path.display(), error = %e, "write failed; removed earlier outputs");
            return Err(e.into());
        }
        info!(path = %path.display(), bytes = bytes.len(), "wrote output");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::timeline::{Note, TempoEvent};
    use continuo_prng::SeededRng;

    fn timeline(pitches: &[u8]) -> Timeline {
        Timeline {
            notes: pitches
                .iter()
                .enumerate()
                .map(|(i, &pitch)| Note {
                    pitch,
                    start: i as u64 * 240,
                    duration: 240,
                    velocity: 100,
                })
                .collect(),
            tempos: vec![TempoEvent {
                at: 0,
                microseconds_per_beat: 500_000,
            }],
            ticks_per_beat: 480,
        }
    }

    fn small_config() -> ContinuationConfig {
        let mut config = ContinuationConfig::default();
        config.length = 8;
        config.max_order = 2;
        config.synth.sample_rate = 8_000;
        config
    }

    #[test]
    fn continuation_appends_after_input() {
        let input = timeline(&[60, 62, 64, 60, 62]);
        let outcome =
            continue_timeline(&input, &small_config(), &mut SeededRng::new(3)).unwrap();
        assert_eq!(outcome.effective_order, 2);
        assert_eq!(outcome.continuation.pitches.len(), 8);
        assert_eq!(outcome.merged.notes.len(), 13);
        assert_eq!(outcome.merged.notes[..5], input.notes[..]);
        // Generated notes start at the input's end, one beat apart.
        assert_eq!(outcome.merged.notes[5].start, 1200);
        assert_eq!(outcome.merged.notes[6].start, 1680);
        assert_eq!(outcome.merged.tempos, input.tempos);
        assert!(!outcome.audio.samples.is_empty());
        assert_eq!(outcome.audio.sample_rate, 8_000);
    }

    #[test]
    fn generated_pitches_come_from_input_material() {
        let input = timeline(&[60, 62, 64, 60, 62]);
        let outcome =
            continue_timeline(&input, &small_config(), &mut SeededRng::new(11)).unwrap();
        for pitch in &outcome.continuation.pitches {
            assert!([60, 62, 64].contains(pitch));
        }
    }

    #[test]
    fn same_seed_same_outcome() {
        let input = timeline(&[60, 62, 64, 65, 67, 65, 64, 62, 60]);
        let a = continue_timeline(&input, &small_config(), &mut SeededRng::new(99)).unwrap();
        let b = continue_timeline(&input, &small_config(), &mut SeededRng::new(99)).unwrap();
        assert_eq!(a.continuation, b.continuation);
        assert_eq!(a.merged, b.merged);
        assert_eq!(a.audio.samples, b.audio.samples);
    }

    #[test]
    fn single_note_is_insufficient() {
        let err = continue_timeline(&timeline(&[60]), &small_config(), &mut SeededRng::new(1))
            .unwrap_err();
        assert!(matches!(
            err,
            ContinuoError::Model(ModelError::InsufficientData { notes: 1 })
        ));
    }

    #[test]
    fn invalid_config_fails_before_modelling() {
        let mut config = small_config();
        config.synth.sample_rate = 0;
        let err = continue_timeline(&timeline(&[60, 62]), &config, &mut SeededRng::new(1))
            .unwrap_err();
        assert!(matches!(err, ContinuoError::Config(_)));
    }

    #[test]
    fn oversized_spacing_is_a_config_error() {
        for spacing in [u64::MAX, 1 << 30] {
            let mut config = small_config();
            config.length = 2;
            config.spacing.spacing = Some(spacing);
            let err = continue_timeline(&timeline(&[60, 62]), &config, &mut SeededRng::new(1))
                .unwrap_err();
            assert!(matches!(err, ContinuoError::Config(_)), "spacing {spacing}");
        }
    }

    #[test]
    fn render_limit_stops_long_timelines_before_rendering() {
        // The widest legal spacing still encodes as SMF but would last days.
        let mut config = small_config();
        config.length = 2;
        config.spacing.spacing = Some(crate::midi::MAX_DELTA);
        let err = continue_timeline(&timeline(&[60, 62]), &config, &mut SeededRng::new(1))
            .unwrap_err();
        assert!(matches!(err, ContinuoError::Config(_)));
    }

    #[test]
    fn outcome_carries_encoded_midi() {
        let outcome =
            continue_timeline(&timeline(&[60, 62, 64]), &small_config(), &mut SeededRng::new(4))
                .unwrap();
        assert_eq!(outcome.midi, smf_bytes(&outcome.merged).unwrap());
        assert_eq!(
            crate::midi::timeline_from_bytes(&outcome.midi).unwrap(),
            outcome.merged
        );
    }

    #[test]
    fn failed_write_removes_earlier_outputs() {
        let dir = std::env::temp_dir().join(format!("continuo-write-all-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let first = dir.join("song.mid");
        let outputs = vec![
            (first.clone(), b"MThd".to_vec()),
            (dir.join("missing").join("model.json"), b"{}".to_vec()),
        ];
        assert!(matches!(write_all(&outputs), Err(ContinuoError::Io(_))));
        assert!(!first.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn output_path_appends_extension() {
        assert_eq!(
            output_path(Path::new("out/song.v2"), "mid"),
            PathBuf::from("out/song.v2.mid")
        );
        assert_eq!(output_path(Path::new("take"), "wav"), PathBuf::from("take.wav"));
    }
}
