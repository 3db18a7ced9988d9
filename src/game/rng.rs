//! # Random Stream
//!
//! Seeded, substream-capable deterministic generator. All stochastic
//! decisions in the simulation draw from a single [`GameRng`] owned by the
//! simulation context, so a seed plus an ordered intent sequence reproduces
//! a run exactly.
//!
//! ChaCha is used as the backing generator because it exposes both a word
//! cursor (for point-in-time save snapshots) and 2^64 independent streams
//! per seed (for deterministically derived substreams that leave the main
//! cursor untouched).

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Stream id of the main simulation stream. Substream tags must not collide
/// with it.
const MAIN_STREAM: u64 = 0;

/// The authoritative random stream for a simulation.
pub struct GameRng {
    seed: u64,
    stream: ChaCha8Rng,
}

impl GameRng {
    /// Creates the main stream for the given seed, positioned at the start.
    pub fn new(seed: u64) -> Self {
        let mut stream = ChaCha8Rng::seed_from_u64(seed);
        stream.set_stream(MAIN_STREAM);
        Self { seed, stream }
    }

    /// The seed this stream was created from.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Current cursor position within the main stream.
    pub fn cursor(&self) -> RngCursor {
        let pos = self.stream.get_word_pos();
        RngCursor {
            lo: pos as u64,
            hi: (pos >> 64) as u64,
        }
    }

    /// Reconstructs a stream at an exact cursor position, for resuming a
    /// saved simulation bit-identically.
    pub fn restore(seed: u64, cursor: RngCursor) -> Self {
        let mut rng = Self::new(seed);
        rng.stream
            .set_word_pos(((cursor.hi as u128) << 64) | cursor.lo as u128);
        rng
    }

    /// Derives an independent substream for the given tag.
    ///
    /// Derivation reads nothing from the main stream, so the main cursor is
    /// unaffected by whether or when the substream is consumed. The same
    /// `(seed, tag)` pair always yields the same sequence.
    ///
    /// # Examples
    ///
    /// ```
    /// use dungeon_descent::GameRng;
    /// use rand::RngCore;
    ///
    /// let rng = GameRng::new(42);
    /// let before = rng.cursor();
    /// let mut sub = rng.substream(7);
    /// sub.next_u64();
    /// assert_eq!(rng.cursor(), before);
    /// ```
    pub fn substream(&self, tag: u64) -> ChaCha8Rng {
        let mut sub = ChaCha8Rng::seed_from_u64(self.seed);
        // Tag 0 is reserved for the main stream.
        sub.set_stream(tag.wrapping_add(1));
        sub
    }
}

impl RngCore for GameRng {
    fn next_u32(&mut self) -> u32 {
        self.stream.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.stream.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.stream.fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.stream.try_fill_bytes(dest)
    }
}

impl std::fmt::Debug for GameRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameRng")
            .field("seed", &self.seed)
            .field("cursor", &self.cursor())
            .finish()
    }
}

/// Serializable cursor position within the main stream.
///
/// Stored as two halves because the underlying word position is 128 bits
/// and JSON numbers cap out at 64.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RngCursor {
    pub lo: u64,
    pub hi: u64,
}
