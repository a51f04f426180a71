//! Per-unit random streams.
//!
//! Every unit gets its own ChaCha20 stream keyed by the master seed and the
//! unit's composite id, so a trajectory depends only on its own draws and not on
//! which rayon worker happens to run it.

use crate::population::UnitId;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

/// Stream for `unit` under `seed`. The 256-bit key packs
/// `(seed, strategy_id, patient_id, sample)` as little-endian words.
pub fn unit_stream(seed: u64, unit: UnitId) -> ChaCha20Rng {
    let mut key = [0u8; 32];
    let words = [seed, unit.strategy_id, unit.patient_id, unit.sample as u64];
    for (chunk, word) in key.chunks_exact_mut(8).zip(words) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    ChaCha20Rng::from_seed(key)
}
