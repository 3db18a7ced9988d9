//! # Background Level Generation
//!
//! Speculative generation of the next level on a worker thread. The worker
//! consumes only a substream derived from the seed and produces fully
//! disjoint map and spawn data, so abandoning it (dropping the handle)
//! cannot perturb the running simulation.

use crate::generation::{generate_level, GenerationProfile, SpawnPoints};
use crate::{DescentError, DescentResult, GameMap};
use log::debug;
use std::thread::{self, JoinHandle};

/// Handle to an in-flight background generation.
///
/// Dropping the handle abandons the work; the thread finishes (or fails)
/// on its own and its result is discarded.
#[derive(Debug)]
pub struct LevelPrefetch {
    depth: u32,
    handle: Option<JoinHandle<DescentResult<(GameMap, SpawnPoints)>>>,
}

impl LevelPrefetch {
    /// Starts generating `(seed, depth)` on a worker thread.
    pub fn start(
        seed: u64,
        depth: u32,
        width: u32,
        height: u32,
        profile: GenerationProfile,
    ) -> Self {
        debug!("prefetching depth {depth}");
        let handle =
            thread::spawn(move || generate_level(seed, depth, width, height, &profile));
        Self {
            depth,
            handle: Some(handle),
        }
    }

    /// The depth this handle is generating.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Whether the worker has finished (successfully or not).
    pub fn is_finished(&self) -> bool {
        self.handle
            .as_ref()
            .map(JoinHandle::is_finished)
            .unwrap_or(true)
    }

    /// Joins the worker and yields the finished level.
    ///
    /// Blocks if generation is still running. A panicked worker surfaces
    /// as [`DescentError::Generation`].
    pub fn take(mut self) -> DescentResult<(GameMap, SpawnPoints)> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| DescentError::InvalidState("prefetch already taken".to_string()))?;
        match handle.join() {
            Ok(result) => result,
            Err(_) => Err(DescentError::Generation(
                "background generation worker panicked".to_string(),
            )),
        }
    }
}
