// Seedable pseudo-random source for melody continuation.
//
// Implements xoshiro256++ (Blackman & Vigna, 2019) with SplitMix64 seeding,
// hand-rolled with zero external dependencies so that a given seed yields
// the same continuation on every platform and compiler version.
//
// The generator in `continuo::generate` never touches a global RNG. It takes
// `&mut impl RandomSource`, so callers can pass a `SeededRng` for
// reproducible output or a scripted source in tests to force particular
// draws.
//
// **Critical constraint: determinism.** `SeededRng` must produce identical
// output given the same prior state. The core generator uses integer
// arithmetic only; floats are derived from its output bits.

use std::time::{SystemTime, UNIX_EPOCH};

/// Anything that can hand out uniformly distributed 64-bit words.
///
/// Only `next_u64` is required. The provided methods derive unit-interval
/// floats, bounded integers and uniform picks from it, so every implementor
/// gets the same, bias-free derivations.
pub trait RandomSource {
    /// Next uniformly distributed `u64`.
    fn next_u64(&mut self) -> u64;

    /// Uniform `f64` in [0, 1), built from the upper 53 bits.
    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Uniform integer in `[low, high)`.
    ///
    /// Uses rejection sampling to avoid modulo bias.
    /// Panics if `low >= high`.
    fn range_u64(&mut self, low: u64, high: u64) -> u64 {
        assert!(low < high, "range_u64: low must be less than high");
        let range = high - low;
        if range.is_power_of_two() {
            return low + (self.next_u64() & (range - 1));
        }
        let threshold = range.wrapping_neg() % range;
        loop {
            let r = self.next_u64();
            if r >= threshold {
                return low + (r % range);
            }
        }
    }

    /// Uniform `usize` in `[low, high)`. Panics if `low >= high`.
    fn range_usize(&mut self, low: usize, high: usize) -> usize {
        self.range_u64(low as u64, high as u64) as usize
    }

    /// Uniformly pick one element, or `None` for an empty slice.
    fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T>
    where
        Self: Sized,
    {
        if items.is_empty() {
            return None;
        }
        items.get(self.range_usize(0, items.len()))
    }
}

/// Xoshiro256++ generator, seeded from a single `u64`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeededRng {
    s: [u64; 4],
}

impl SeededRng {
    /// Create a generator from a `u64` seed.
    ///
    /// SplitMix64 expands the seed into the 256-bit state, so nearby seeds
    /// still produce unrelated streams.
    pub fn new(seed: u64) -> Self {
        let mut sm = seed;
        Self {
            s: [
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
            ],
        }
    }

    /// Derive a seed from the wall clock for unseeded runs.
    ///
    /// Returns the seed alongside the generator so the caller can report it
    /// and the run can be repeated.
    pub fn from_clock() -> (u64, Self) {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let seed = nanos ^ u64::from(std::process::id()).rotate_left(32);
        (seed, Self::new(seed))
    }
}

impl RandomSource for SeededRng {
    fn next_u64(&mut self) -> u64 {
        let result = (self.s[0].wrapping_add(self.s[3]))
            .rotate_left(23)
            .wrapping_add(self.s[0]);

        let t = self.s[1] << 17;

        self.s[2] ^= self.s[0];
        self.s[3] ^= self.s[1];
        self.s[1] ^= self.s[2];
        self.s[0] ^= self.s[3];

        self.s[2] ^= t;
        self.s[3] = self.s[3].rotate_left(45);

        result
    }
}

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
