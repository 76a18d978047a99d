//! Deterministic random streams.
//!
//! Every random decision in the scheduler draws from an [`EffectRng`]. The
//! session seeds a master stream from the run seed and branches one
//! stream per consumer, so effect selection, instance seeding and vote
//! resolution never steal draws from each other. The state is two 64-bit
//! words and serializes with the snapshot, so a restored run continues
//! the exact same sequence.

use rand::{Rng, RngCore, SeedableRng};
use rand_xoshiro::Xoroshiro128Plus;
use serde::{Deserialize, Serialize};

/// A seedable, serializable random stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EffectRng(Xoroshiro128Plus);

impl EffectRng {
    /// Create a stream from a 64-bit seed.
    pub fn from_seed(seed: u64) -> Self {
        Self(Xoroshiro128Plus::seed_from_u64(seed))
    }

    /// Create a stream seeded from the thread-local entropy source.
    pub fn from_entropy() -> Self {
        Self::from_seed(rand::rng().random())
    }

    /// Draw a full 64-bit value, used as the seed of a derived stream.
    pub fn next_seed(&mut self) -> u64 {
        self.0.next_u64()
    }

    /// Draw a uniform value in `[0, 1)`.
    pub fn next_normalized(&mut self) -> f32 {
        self.0.random::<f32>()
    }

    /// Derive an independent stream seeded from the next draw.
    pub fn branch(&mut self) -> Self {
        Self::from_seed(self.next_seed())
    }

    /// Draw a uniform index in `[0, len)`, or `None` when `len` is zero.
    pub fn index(&mut self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        Some(self.0.random_range(0..len))
    }
}

impl RngCore for EffectRng {
    fn next_u32(&mut self) -> u32 {
        self.0.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.0.next_u64()
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        self.0.fill_bytes(dst);
    }
}
