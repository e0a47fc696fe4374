// Continuo: variable-order Markov melody continuation.
//
// Takes a melody from a Standard MIDI File, learns which pitch follows each
// recent pitch history, samples a continuation, and renders the original
// plus the continuation both as a MIDI file and as additive sine audio.
//
// Architecture:
// - timeline.rs: Note / TempoEvent / Timeline records and the raw event stream
// - parse.rs: Event stream to timeline, pairing note-offs FIFO per pitch
// - midi.rs: SMF reading (all tracks merged) and format-0 writing via midly
// - markov.rs: Multi-order transition counts, probability queries, JSON persistence
// - generate.rs: Weighted sampling with an explicit order-backoff state machine
// - merge.rs: Timing for generated notes and re-derivation of the event stream
// - synth.rs: ADSR-shaped sine mixing with a growable buffer, then normalization
// - wav.rs: 16-bit mono WAV encoding via hound
// - config.rs: JSON-loadable run configuration
// - error.rs: Error types for every stage
// - pipeline.rs: The end-to-end run, writing outputs only after all stages succeed
//
// Randomness comes from `continuo_prng`, injected into generation, so a run
// is deterministic given a seed.

pub mod config;
pub mod error;
pub mod generate;
pub mod markov;
pub mod merge;
pub mod midi;
pub mod parse;
pub mod pipeline;
pub mod synth;
pub mod timeline;
pub mod wav;
