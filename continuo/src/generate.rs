// Continuation sampling with order backoff.
//
// Each step resolves the current context through a small state machine:
//
//   Order(k) --hit--> weighted draw from the state's counts
//   Order(k) --miss-> Order(k-1) ... Order(1) --miss-> Fallback
//   Fallback --pool non-empty--> uniform draw from the fallback pool
//   Fallback --pool empty-----> Exhausted (generation stops early)
//
// Higher orders are always tried first, so longer matching context wins
// whenever the source melody supports it. Running out of context is never an
// error: with a non-empty pool the output always has the requested length,
// and with an empty pool a shorter output is a legitimate result.
//
// Randomness comes only from the injected `RandomSource`; the model's
// ordered maps make each draw deterministic given the source's output.

use std::collections::{BTreeMap, VecDeque};

use continuo_prng::RandomSource;
use tracing::{debug, warn};

use crate::markov::{MarkovModel, TransitionCounts, sample_from_counts};

/// Where the backoff machine currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Look up the state's last `k` pitches at order `k`.
    Order(usize),
    /// No order matched; draw uniformly from the fallback pool.
    Fallback,
    /// No order matched and the pool is empty.
    Exhausted,
}

/// How a generated pitch was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawSource {
    Order(usize),
    Fallback,
}

/// Result of a generation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Continuation {
    pub pitches: Vec<u8>,
    /// Length that was asked for.
    pub requested: usize,
    /// Draws per matching order.
    pub order_hits: BTreeMap<usize, usize>,
    /// Draws taken from the fallback pool.
    pub fallback_draws: usize,
    /// True if generation stopped before `requested` pitches.
    pub early_stop: bool,
}

/// Advance the backoff machine by one transition.
///
/// `Order(k)` moves to `Order(k - 1)` on a miss; a miss at order 1 (or an
/// empty state, `Order(0)`) moves to `Fallback`. `Fallback` moves to
/// `Exhausted` when the pool is empty. Hits are handled by the caller.
fn on_miss(step: Backoff, pool_empty: bool) -> Backoff {
    match step {
        Backoff::Order(k) if k > 1 => Backoff::Order(k - 1),
        Backoff::Order(_) if pool_empty => Backoff::Exhausted,
        Backoff::Order(_) => Backoff::Fallback,
        Backoff::Fallback | Backoff::Exhausted => Backoff::Exhausted,
    }
}

/// Find the highest order whose suffix of `state` the model has seen.
///
/// Returns the order and its counts, or `None` if no suffix matches.
pub fn backoff<'m>(model: &'m MarkovModel, state: &[u8]) -> Option<(usize, &'m TransitionCounts)> {
    let mut step = Backoff::Order(state.len());
    loop {
        match step {
            Backoff::Order(0) => return None,
            Backoff::Order(k) => {
                if let Some(counts) = model.transitions(k, &state[state.len() - k..]) {
                    return Some((k, counts));
                }
                step = on_miss(step, true);
            }
            Backoff::Fallback | Backoff::Exhausted => return None,
        }
    }
}

/// Choose the next pitch for `state`, or `None` when exhausted.
fn next_pitch<R: RandomSource>(
    model: &MarkovModel,
    state: &[u8],
    fallback_pool: &[u8],
    rng: &mut R,
) -> Option<(u8, DrawSource)> {
    if let Some((order, counts)) = backoff(model, state) {
        if let Some(pitch) = sample_from_counts(counts, rng.next_f64()) {
            return Some((pitch, DrawSource::Order(order)));
        }
    }

    // Every order down to 1 missed.
    match on_miss(Backoff::Order(1), fallback_pool.is_empty()) {
        Backoff::Fallback => rng
            .choose(fallback_pool)
            .map(|&pitch| (pitch, DrawSource::Fallback)),
        Backoff::Order(_) | Backoff::Exhausted => None,
    }
}

/// Generate up to `length` pitches continuing `seed`.
///
/// The rolling state holds the most recent `max_order` pitches (a longer
/// seed is truncated to its suffix). The output has exactly `length` pitches
/// unless no context matches and `fallback_pool` is empty.
pub fn generate<R: RandomSource>(
    model: &MarkovModel,
    seed: &[u8],
    length: usize,
    max_order: usize,
    fallback_pool: &[u8],
    rng: &mut R,
) -> Continuation {
    let window = max_order.max(1);
    let mut state: VecDeque<u8> = seed[seed.len().saturating_sub(window)..]
        .iter()
        .copied()
        .collect();

    let mut out = Continuation {
        pitches: Vec::with_capacity(length),
        requested: length,
        order_hits: BTreeMap::new(),
        fallback_draws: 0,
        early_stop: false,
    };

    while out.pitches.len() < length {
        let context = state.make_contiguous();
        let Some((pitch, source)) = next_pitch(model, context, fallback_pool, rng) else {
            out.early_stop = true;
            break;
        };
        match source {
            DrawSource::Order(k) => *out.order_hits.entry(k).or_insert(0) += 1,
            DrawSource::Fallback => out.fallback_draws += 1,
        }
        out.pitches.push(pitch);
        state.push_back(pitch);
        if state.len() > window {
            state.pop_front();
        }
    }

    if out.early_stop {
        warn!(
            generated = out.pitches.len(),
            requested = length,
            "generation stopped early: no matching context and empty fallback pool"
        );
    }
    debug!(
        order_hits = ?out.order_hits,
        fallback_draws = out.fallback_draws,
        "generation finished"
    );
    out
}
