//! # Dungeon Descent Core
//!
//! A deterministic, turn-based dungeon simulation core.
//!
//! ## Architecture Overview
//!
//! The crate is organized around a handful of cooperating systems:
//!
//! - **Random Stream**: a seeded, substream-capable generator that every
//!   stochastic decision draws from, so a seed plus an intent sequence
//!   reproduces a run bit-for-bit
//! - **Dungeon Generator**: BSP rooms, cellular-automata cave texture, and
//!   optional vault stamping, validated for full floor connectivity
//! - **Entity Store**: a generational arena owning all entities and their
//!   component slots
//! - **Turn Scheduler**: a strict per-turn phase machine that applies the
//!   player action, drives every AI entity, and ticks the environment
//! - **Field of View / Pathfinding**: shadow casting for visibility, A* for
//!   pursuit, and Dijkstra cost fields for flight
//!
//! Rendering, input devices, and packaging live outside this crate; they
//! consume the read-only snapshot accessors and feed validated intents into
//! [`Simulation::step_turn`].
//!
//! ## Determinism
//!
//! All mutation happens on the simulation thread in a fixed phase order.
//! The only work permitted off-thread is speculative generation of the next
//! level, which consumes a derived substream so the main cursor is never
//! disturbed.

pub mod game;
pub mod generation;

pub use game::*;
pub use generation::*;

/// Core error type for the simulation engine.
#[derive(thiserror::Error, Debug)]
pub enum DescentError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Level generation exhausted its retry budget
    #[error("Generation failed: {0}")]
    Generation(String),

    /// Malformed configuration (e.g. spawn weights that do not sum to 1)
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// An operation required a component the entity does not carry
    #[error("Entity {entity:?} is missing required component {component}")]
    MissingComponent {
        entity: game::EntityId,
        component: &'static str,
    },

    /// Player intent violates movement or targeting rules
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    /// A position is out of bounds or non-traversable
    #[error("Invalid position ({x}, {y}): {reason}")]
    InvalidPosition { x: i32, y: i32, reason: String },

    /// Save snapshot failed verification
    #[error("Load failed: {0}")]
    Load(String),

    /// Simulation state is internally inconsistent
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type used throughout the crate.
pub type DescentResult<T> = Result<T, DescentError>;

/// Version information for the engine.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine configuration constants.
pub mod config {
    /// Minimum map dimension accepted by the generator
    pub const MIN_MAP_DIMENSION: u32 = 64;

    /// Default map width in tiles
    pub const DEFAULT_MAP_WIDTH: u32 = 80;

    /// Default map height in tiles
    pub const DEFAULT_MAP_HEIGHT: u32 = 64;

    /// Inventory slot limit (one per letter of the alphabet)
    pub const INVENTORY_CAPACITY: usize = 26;

    /// Default player starting health
    pub const PLAYER_HP: i32 = 30;

    /// Default player defense
    pub const PLAYER_DEFENSE: i32 = 2;

    /// Default player power
    pub const PLAYER_POWER: i32 = 5;

    /// Default sight radius for the player
    pub const PLAYER_SIGHT_RADIUS: u32 = 8;
}
