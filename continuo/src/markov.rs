// Variable-order Markov model over pitches.
//
// Built from the parsed note sequence: for every order k from 1 up to an
// effective maximum, a window of k+1 pitches slides over the melody; the
// first k pitches are the state and the last one is counted as an observed
// continuation. The effective maximum is capped by how much data exists
// (`len(notes) - 1`), so short inputs still get an order-1 table.
//
// Tables are ordered maps throughout. Sampling walks counts in key order, so
// a given random draw always maps to the same pitch and seeded generation is
// reproducible.
//
// Models can be saved to / loaded from JSON. State tuples are written as
// comma-joined context keys ("60,62") since JSON object keys must be strings.
//
// See also: generate.rs (backoff sampling over this model).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use tracing::info;

use crate::error::{ContinuoError, ModelError};
use crate::timeline::{MAX_MIDI_VALUE, Note};

/// Observed continuations of one state. Key: next pitch. Value: count (>= 1).
pub type TransitionCounts = BTreeMap<u8, u32>;

/// All states of one order.
pub type OrderTable = BTreeMap<Vec<u8>, TransitionCounts>;

/// Multi-order pitch transition counts.
///
/// Invariant: for every order k present, every state has exactly k pitches
/// and a non-empty count map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkovModel {
    tables: BTreeMap<usize, OrderTable>,
}

/// On-disk form of a model.
#[derive(Debug, Serialize, Deserialize)]
struct ModelFile {
    max_order: usize,
    orders: BTreeMap<usize, BTreeMap<String, TransitionCounts>>,
}

/// Build a model of every order up to the data-supported maximum.
///
/// Returns the model and the effective maximum order
/// `max(1, min(max_order, notes.len() - 1))`.
pub fn build_model(notes: &[Note], max_order: usize) -> Result<(MarkovModel, usize), ModelError> {
    if notes.len() < 2 {
        return Err(ModelError::InsufficientData { notes: notes.len() });
    }
    let effective = max_order.min(notes.len() - 1).max(1);
    let pitches: Vec<u8> = notes.iter().map(|n| n.pitch).collect();

    let mut model = MarkovModel::default();
    for order in 1..=effective {
        let table = model.tables.entry(order).or_default();
        for window in pitches.windows(order + 1) {
            let (state, next) = window.split_at(order);
            *table
                .entry(state.to_vec())
                .or_default()
                .entry(next[0])
                .or_insert(0) += 1;
        }
    }

    info!(
        notes = notes.len(),
        requested_order = max_order,
        effective_order = effective,
        states = model.total_states(),
        "built markov model"
    );
    Ok((model, effective))
}

impl MarkovModel {
    /// Continuation counts for an exact state at a given order.
    ///
    /// `state.len()` must equal `order` for a hit.
    pub fn transitions(&self, order: usize, state: &[u8]) -> Option<&TransitionCounts> {
        if state.len() != order {
            return None;
        }
        self.tables
            .get(&order)?
            .get(state)
            .filter(|counts| !counts.is_empty())
    }

    /// Orders present, ascending.
    pub fn orders(&self) -> impl Iterator<Item = usize> + '_ {
        self.tables.keys().copied()
    }

    /// Highest order present (0 for an empty model).
    pub fn max_order(&self) -> usize {
        self.tables.keys().next_back().copied().unwrap_or(0)
    }

    /// All states of one order.
    pub fn table(&self, order: usize) -> Option<&OrderTable> {
        self.tables.get(&order)
    }

    /// Number of distinct states at an order.
    pub fn state_count(&self, order: usize) -> usize {
        self.tables.get(&order).map_or(0, BTreeMap::len)
    }

    pub fn total_states(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }

    /// Probability of `next` following `context`, using the longest suffix
    /// of `context` the model has seen. Returns 0.0 if no suffix matches or
    /// `next` was never observed after the matching state.
    pub fn probability(&self, context: &[u8], next: u8) -> f64 {
        let longest = context.len().min(self.max_order());
        for order in (1..=longest).rev() {
            let state = &context[context.len() - order..];
            if let Some(counts) = self.transitions(order, state) {
                let total: u32 = counts.values().sum();
                let hits = counts.get(&next).copied().unwrap_or(0);
                return f64::from(hits) / f64::from(total);
            }
        }
        0.0
    }

    /// Write the model as JSON.
    pub fn save(&self, path: &Path) -> Result<(), ContinuoError> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// The model in the JSON form read by [`MarkovModel::load`].
    pub fn to_json(&self) -> Result<String, ContinuoError> {
        let file = ModelFile {
            max_order: self.max_order(),
            orders: self
                .tables
                .iter()
                .map(|(&order, table)| {
                    let keyed = table
                        .iter()
                        .map(|(state, counts)| (context_key(state), counts.clone()))
                        .collect();
                    (order, keyed)
                })
                .collect(),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    /// Load and validate a model saved with [`MarkovModel::save`].
    pub fn load(path: &Path) -> Result<Self, ContinuoError> {
        let data = std::fs::read_to_string(path)?;
        let file: ModelFile = serde_json::from_str(&data)?;
        Ok(Self::from_file(file)?)
    }

    fn from_file(file: ModelFile) -> Result<Self, ModelError> {
        let mut tables = BTreeMap::new();
        for (order, keyed) in file.orders {
            if order == 0 {
                return Err(ModelError::InvalidState("order 0 table".into()));
            }
            let mut table = OrderTable::new();
            for (key, counts) in keyed {
                let state = parse_context_key(&key)?;
                if state.len() != order {
                    return Err(ModelError::InvalidState(format!(
                        "state \"{key}\" has {} pitches at order {order}",
                        state.len()
                    )));
                }
                if counts.is_empty() || counts.values().any(|&c| c == 0) {
                    return Err(ModelError::InvalidState(format!(
                        "state \"{key}\" has empty or zero counts"
                    )));
                }
                if let Some(&bad) = counts.keys().find(|&&p| p > MAX_MIDI_VALUE) {
                    return Err(ModelError::InvalidState(format!(
                        "state \"{key}\" continues to pitch {bad}"
                    )));
                }
                table.insert(state, counts);
            }
            tables.insert(order, table);
        }
        let model = MarkovModel { tables };
        if model.max_order() != file.max_order {
            return Err(ModelError::InvalidState(format!(
                "declared max order {} but highest table is {}",
                file.max_order,
                model.max_order()
            )));
        }
        Ok(model)
    }
}

/// Encode a state as a string key, e.g. `[60, 62]` -> `"60,62"`.
fn context_key(state: &[u8]) -> String {
    state.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(",")
}

fn parse_context_key(key: &str) -> Result<Vec<u8>, ModelError> {
    key.split(',')
        .map(|part| {
            part.trim()
                .parse::<u8>()
                .ok()
                .filter(|&p| p <= MAX_MIDI_VALUE)
                .ok_or_else(|| ModelError::InvalidState(format!("bad state key \"{key}\"")))
        })
        .collect()
}

/// Pick a continuation given a uniform draw in [0, 1).
///
/// Each pitch owns a slice of [0, 1) proportional to `count / total`.
/// Returns `None` for empty or all-zero counts.
pub fn sample_from_counts(counts: &TransitionCounts, rng_val: f64) -> Option<u8> {
    let total: u32 = counts.values().sum();
    if total == 0 {
        return None;
    }

    let target = rng_val * f64::from(total);
    let mut cumulative = 0.0;
    for (&pitch, &count) in counts {
        cumulative += f64::from(count);
        if cumulative > target {
            return Some(pitch);
        }
    }
    // rng_val rounding up to 1.0
    counts.keys().next_back().copied()
}
