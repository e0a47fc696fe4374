// Data-driven run configuration.
//
// Every tunable of a continuation run lives in `ContinuationConfig`: how much
// to generate, the Markov order cap, the random seed, the timing policy for
// generated notes, and the synthesizer settings. It can be loaded from a JSON
// file; missing fields take their defaults, so a file only needs the values
// it changes. The CLI (main.rs) applies its flags on top of whatever was
// loaded.
//
// See also: `merge::SpacingPolicy`, `synth::SynthConfig`.

use std::path::Path;

use continuo_prng::SeededRng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ConfigError, ContinuoError};
use crate::merge::SpacingPolicy;
use crate::midi::MAX_DELTA;
use crate::synth::SynthConfig;

/// Parameters for one continuation run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContinuationConfig {
    /// Number of pitches to generate.
    pub length: usize,
    /// Requested maximum Markov order; the model caps it by input length.
    pub max_order: usize,
    /// Seed for reproducible runs. `None` derives one from the clock.
    /// Turned into a generator by [`ContinuationConfig::rng`].
    pub seed: Option<u64>,
    pub spacing: SpacingPolicy,
    pub synth: SynthConfig,
}

impl Default for ContinuationConfig {
    fn default() -> Self {
        ContinuationConfig {
            length: 50,
            max_order: 3,
            seed: None,
            spacing: SpacingPolicy::default(),
            synth: SynthConfig::default(),
        }
    }
}

impl ContinuationConfig {
    /// Parse a JSON config string.
    pub fn from_json(json: &str) -> Result<Self, ContinuoError> {
        let config: ContinuationConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ContinuoError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Check value ranges the pipeline relies on.
    ///
    /// Spacing must fit a single SMF delta, so one generated note never
    /// needs more than one event gap to reach the next.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(spacing) = self.spacing.spacing {
            if !(1..=MAX_DELTA).contains(&spacing) {
                return Err(ConfigError(format!(
                    "spacing {spacing} outside 1..={MAX_DELTA} ticks"
                )));
            }
        }
        self.synth.validate()
    }

    /// Generator for this run, plus the seed it was built from.
    ///
    /// Uses `seed` when set, otherwise a clock-derived seed that is logged
    /// so the run can be repeated.
    pub fn rng(&self) -> (u64, SeededRng) {
        match self.seed {
            Some(seed) => (seed, SeededRng::new(seed)),
            None => {
                let (seed, rng) = SeededRng::from_clock();
                info!(seed, "no seed configured; derived one from the clock");
                (seed, rng)
            }
        }
    }
}
