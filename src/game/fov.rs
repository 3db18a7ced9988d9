//! # Field of View
//!
//! Recursive shadow casting over the eight octants. Visible tiles are also
//! marked explored, and exploration is sticky: once seen, a tile stays
//! explored for the rest of the level.
//!
//! Recomputation is gated by a dirty flag so a turn in which neither the
//! observer nor any sight-blocking tile changed costs nothing.

use crate::{GameMap, Position};
use std::collections::BTreeSet;

/// Octant transforms (xx, xy, yx, yy) for the shadow-casting sweep.
const OCTANTS: [[i32; 4]; 8] = [
    [1, 0, 0, 1],
    [0, 1, 1, 0],
    [0, -1, 1, 0],
    [-1, 0, 0, 1],
    [-1, 0, 0, -1],
    [0, -1, -1, 0],
    [0, 1, -1, 0],
    [1, 0, 0, -1],
];

/// Computes the set of tiles visible from `origin` within `radius`.
///
/// Pure function of the map's sight-blocking tiles; used directly by AI
/// sight checks and via [`FovEngine`] for the player.
pub fn visible_set(map: &GameMap, origin: Position, radius: u32) -> BTreeSet<Position> {
    let mut visible = BTreeSet::new();
    visible.insert(origin);
    for octant in OCTANTS {
        cast_light(map, origin, radius, 1, 1.0, 0.0, octant, &mut visible);
    }
    visible
}

/// Whether `target` is visible from `origin` within `radius`.
pub fn can_see(map: &GameMap, origin: Position, target: Position, radius: u32) -> bool {
    if origin.chebyshev_distance(target) > radius {
        return false;
    }
    visible_set(map, origin, radius).contains(&target)
}

#[allow(clippy::too_many_arguments)]
fn cast_light(
    map: &GameMap,
    origin: Position,
    radius: u32,
    row: i32,
    mut start_slope: f64,
    end_slope: f64,
    octant: [i32; 4],
    visible: &mut BTreeSet<Position>,
) {
    if start_slope < end_slope {
        return;
    }
    let [xx, xy, yx, yy] = octant;
    let radius_sq = (radius * radius) as i32;
    let mut next_start = start_slope;

    for j in row..=radius as i32 {
        let dy = -j;
        let mut dx = -j - 1;
        let mut blocked = false;

        while dx <= 0 {
            dx += 1;
            let pos = Position::new(origin.x + dx * xx + dy * xy, origin.y + dx * yx + dy * yy);
            let l_slope = (dx as f64 - 0.5) / (dy as f64 + 0.5);
            let r_slope = (dx as f64 + 0.5) / (dy as f64 - 0.5);

            if start_slope < r_slope {
                continue;
            }
            if end_slope > l_slope {
                break;
            }

            if dx * dx + dy * dy < radius_sq && map.in_bounds(pos) {
                visible.insert(pos);
            }

            if blocked {
                if map.blocks_sight(pos) {
                    next_start = r_slope;
                } else {
                    blocked = false;
                    start_slope = next_start;
                }
            } else if map.blocks_sight(pos) && j < radius as i32 {
                blocked = true;
                cast_light(
                    map, origin, radius, j + 1, start_slope, l_slope, octant, visible,
                );
                next_start = r_slope;
            }
        }

        if blocked {
            break;
        }
    }
}

/// Caches the player's field of view between turns.
///
/// Not serialized; a loaded simulation reconstructs it dirty so the first
/// turn after load recomputes from scratch.
#[derive(Debug, Clone)]
pub struct FovEngine {
    radius: u32,
    dirty: bool,
    last_origin: Option<Position>,
    visible: BTreeSet<Position>,
}

impl FovEngine {
    pub fn new(radius: u32) -> Self {
        Self {
            radius,
            dirty: true,
            last_origin: None,
            visible: BTreeSet::new(),
        }
    }

    /// Flags the cache stale. Call whenever a sight-blocking tile changes
    /// (secret wall revealed, wall burned down, ...).
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_visible(&self, pos: Position) -> bool {
        self.visible.contains(&pos)
    }

    /// Recomputes visibility if the observer moved or the map changed, and
    /// applies the result to the map's tile flags.
    ///
    /// Returns the positions whose visibility changed since the previous
    /// computation, in ascending coordinate order.
    pub fn refresh(&mut self, map: &mut GameMap, origin: Position) -> Vec<Position> {
        if !self.dirty && self.last_origin == Some(origin) {
            return Vec::new();
        }

        let new_visible = visible_set(map, origin, self.radius);
        let delta: Vec<Position> = self
            .visible
            .symmetric_difference(&new_visible)
            .copied()
            .collect();

        map.clear_visibility();
        for &pos in &new_visible {
            if let Some(tile) = map.tile_mut(pos) {
                tile.visible = true;
                tile.explored = true;
            }
        }

        self.visible = new_visible;
        self.last_origin = Some(origin);
        self.dirty = false;
        delta
    }
}
