//! # Generation Module
//!
//! Procedural level construction: BSP rooms with corridor connectivity,
//! cellular-automata cave texture, vault stamping, and the depth-bracketed
//! spawn and loot tables that populate the result.

pub mod dungeon;
pub mod prefetch;
pub mod spawn;

pub use dungeon::*;
pub use prefetch::*;
pub use spawn::*;

use crate::Position;
use serde::{Deserialize, Serialize};

/// Tunable knobs for level generation.
///
/// The defaults reproduce the classic layout: rooms no smaller than 6
/// tiles, caves seeded at 45% wall density, and a small chance of a vault
/// per level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationProfile {
    /// Smallest allowed BSP leaf dimension; rooms are carved inside leaves
    /// with at least a one-tile wall border.
    pub min_room_size: u32,
    /// Initial wall seeding probability for the cellular automata pass.
    pub wall_probability: f64,
    /// Moore-majority smoothing iterations for the cave pass.
    pub smoothing_iterations: u32,
    /// Shallowest depth at which cave texture is layered over the rooms.
    pub cave_minimum_depth: u32,
    /// Chance that a level contains the vault template.
    pub vault_probability: f64,
    /// Fraction of floor-adjacent interior walls converted to secret walls.
    pub secret_wall_fraction: f64,
    /// Fraction of floor tiles carrying a lever.
    pub lever_fraction: f64,
    /// Fraction of floor tiles that start as open hazards.
    pub hazard_fraction: f64,
    /// Fraction of floor tiles flagged flammable.
    pub flammable_fraction: f64,
    /// Fraction of floor tiles hiding an armed trap.
    pub trap_fraction: f64,
    /// Whole-level regeneration attempts before giving up.
    pub max_retries: u32,
}

impl Default for GenerationProfile {
    fn default() -> Self {
        Self {
            min_room_size: 6,
            wall_probability: 0.45,
            smoothing_iterations: 4,
            cave_minimum_depth: 2,
            vault_probability: 0.15,
            secret_wall_fraction: 0.02,
            lever_fraction: 0.005,
            hazard_fraction: 0.004,
            flammable_fraction: 0.08,
            trap_fraction: 0.008,
            max_retries: 8,
        }
    }
}

/// Candidate entity placements produced alongside a generated map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpawnPoints {
    /// Room centers, in carve order. The first is the player start.
    pub rooms: Vec<Position>,
    /// Open pockets inside the cave texture.
    pub pockets: Vec<Position>,
}

impl SpawnPoints {
    /// All candidate positions, rooms first.
    pub fn all(&self) -> impl Iterator<Item = Position> + '_ {
        self.rooms.iter().chain(self.pockets.iter()).copied()
    }
}
