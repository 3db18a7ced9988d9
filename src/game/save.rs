//! # Save / Load
//!
//! Point-in-time snapshots taken between turns: the full entity store, the
//! tile grid, the seed and random-stream cursor, the turn counter, the
//! depth, and the generation profile (so a resumed run descends into the
//! same levels). The payload is serialized with `serde_json` and wrapped
//! with an
//! xxh3 checksum over the exact payload bytes.
//!
//! Loading verifies the checksum before deserializing the payload, so a
//! corrupted file fails fast with [`DescentError::Load`] and never leaves a
//! half-constructed simulation behind. Resuming from a snapshot is
//! bit-identical: the same intents replay into the same events.

use crate::{
    DescentError, DescentResult, EntityId, EntityStore, GameMap, GenerationProfile, RngCursor,
    Simulation,
};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use xxhash_rust::xxh3::xxh3_64;

/// The serialized simulation state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavePayload {
    pub version: String,
    pub seed: u64,
    pub cursor: RngCursor,
    pub turn_number: u64,
    pub depth: u32,
    pub profile: GenerationProfile,
    pub player: EntityId,
    pub map: GameMap,
    pub entities: EntityStore,
}

impl SavePayload {
    /// Captures a snapshot of the simulation. Only meaningful between
    /// turns, when no phase is in flight.
    pub fn capture(sim: &Simulation) -> Self {
        Self {
            version: crate::VERSION.to_string(),
            seed: sim.seed(),
            cursor: sim.rng_cursor(),
            turn_number: sim.turn_number(),
            depth: sim.depth(),
            profile: sim.profile().clone(),
            player: sim.player(),
            map: sim.map().clone(),
            entities: sim.entities().clone(),
        }
    }

    /// Rebuilds a simulation from the snapshot.
    pub fn restore(self) -> DescentResult<Simulation> {
        Simulation::from_saved(
            self.map,
            self.entities,
            self.player,
            self.seed,
            self.cursor,
            self.turn_number,
            self.depth,
            self.profile,
        )
    }
}

/// The on-disk envelope: checksum over the exact payload bytes, then the
/// payload itself as a JSON string so re-serialization cannot perturb it.
#[derive(Debug, Serialize, Deserialize)]
struct SaveEnvelope {
    checksum: u64,
    payload: String,
}

/// Serializes a snapshot to a save string.
pub fn to_save_string(sim: &Simulation) -> DescentResult<String> {
    let payload = serde_json::to_string(&SavePayload::capture(sim))?;
    let envelope = SaveEnvelope {
        checksum: xxh3_64(payload.as_bytes()),
        payload,
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Verifies and deserializes a save string back into a simulation.
///
/// The checksum is checked before the payload is parsed; on mismatch
/// nothing is constructed and the caller's state is untouched.
pub fn from_save_string(data: &str) -> DescentResult<Simulation> {
    let envelope: SaveEnvelope =
        serde_json::from_str(data).map_err(|e| DescentError::Load(format!("bad envelope: {e}")))?;
    let actual = xxh3_64(envelope.payload.as_bytes());
    if actual != envelope.checksum {
        warn!(
            "save rejected: checksum {actual:#018x} != {:#018x}",
            envelope.checksum
        );
        return Err(DescentError::Load(
            "checksum mismatch, save file is corrupt".to_string(),
        ));
    }
    let payload: SavePayload = serde_json::from_str(&envelope.payload)
        .map_err(|e| DescentError::Load(format!("bad payload: {e}")))?;
    payload.restore()
}

/// Writes a snapshot to disk.
pub fn save_simulation(sim: &Simulation, path: &Path) -> DescentResult<()> {
    let data = to_save_string(sim)?;
    fs::write(path, data)?;
    info!(
        "saved turn {} depth {} to {}",
        sim.turn_number(),
        sim.depth(),
        path.display()
    );
    Ok(())
}

/// Reads and verifies a snapshot from disk.
pub fn load_simulation(path: &Path) -> DescentResult<Simulation> {
    let data = fs::read_to_string(path)?;
    from_save_string(&data)
}
