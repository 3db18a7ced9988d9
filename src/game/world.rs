//! # World Map
//!
//! The tile grid owned exclusively by the simulation, plus the derived
//! visibility and exploration state. Rendering and persistence consume it
//! through read-only accessors; all mutation goes through the simulation.

use crate::{DescentError, DescentResult, Position};
use serde::{Deserialize, Serialize};

/// Terrain classification of a single tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TileKind {
    Wall,
    Floor,
    /// Wall that can be revealed/opened; blocks movement and sight until
    /// discovered
    SecretWall,
    /// Traversable but damaging terrain (fire, etc.)
    Hazard,
}

impl TileKind {
    /// Whether entities can stand on this tile.
    pub fn is_walkable(self) -> bool {
        matches!(self, TileKind::Floor | TileKind::Hazard)
    }

    /// Whether this tile blocks line of sight.
    pub fn blocks_sight(self) -> bool {
        matches!(self, TileKind::Wall | TileKind::SecretWall)
    }
}

/// A single cell of the world grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    pub kind: TileKind,
    /// Fire can spread here
    pub flammable: bool,
    /// An armed trap triggers on entry
    pub trap_armed: bool,
    /// Turns until a sprung trap rearms; 0 when idle or armed
    pub trap_timer: u8,
    /// A lever is mounted on this tile
    pub lever: bool,
    /// Seen at some point (sticky)
    pub explored: bool,
    /// Currently within the player's field of view
    pub visible: bool,
}

impl Tile {
    pub fn wall() -> Self {
        Self {
            kind: TileKind::Wall,
            flammable: false,
            trap_armed: false,
            trap_timer: 0,
            lever: false,
            explored: false,
            visible: false,
        }
    }

    pub fn floor() -> Self {
        Self {
            kind: TileKind::Floor,
            ..Self::wall()
        }
    }

    pub fn is_walkable(&self) -> bool {
        self.kind.is_walkable()
    }

    pub fn blocks_sight(&self) -> bool {
        self.kind.blocks_sight()
    }
}

/// Fixed-size grid of tiles.
///
/// Dimensions are validated once at construction; every accessor after that
/// treats out-of-bounds coordinates as absent rather than panicking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameMap {
    width: u32,
    height: u32,
    tiles: Vec<Tile>,
}

impl GameMap {
    /// Creates a map filled with solid wall.
    pub fn filled(width: u32, height: u32) -> DescentResult<Self> {
        if width < crate::config::MIN_MAP_DIMENSION || height < crate::config::MIN_MAP_DIMENSION {
            return Err(DescentError::Generation(format!(
                "map dimensions {}x{} below minimum {}",
                width,
                height,
                crate::config::MIN_MAP_DIMENSION
            )));
        }
        Ok(Self {
            width,
            height,
            tiles: vec![Tile::wall(); (width * height) as usize],
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn in_bounds(&self, pos: Position) -> bool {
        pos.x >= 0 && pos.y >= 0 && (pos.x as u32) < self.width && (pos.y as u32) < self.height
    }

    fn index(&self, pos: Position) -> usize {
        (pos.y as u32 * self.width + pos.x as u32) as usize
    }

    pub fn tile(&self, pos: Position) -> Option<&Tile> {
        if self.in_bounds(pos) {
            Some(&self.tiles[self.index(pos)])
        } else {
            None
        }
    }

    pub fn tile_mut(&mut self, pos: Position) -> Option<&mut Tile> {
        if self.in_bounds(pos) {
            let idx = self.index(pos);
            Some(&mut self.tiles[idx])
        } else {
            None
        }
    }

    /// Whether an entity can stand at the position.
    pub fn is_walkable(&self, pos: Position) -> bool {
        self.tile(pos).map(|t| t.is_walkable()).unwrap_or(false)
    }

    /// Whether the tile at the position occludes sight.
    pub fn blocks_sight(&self, pos: Position) -> bool {
        self.tile(pos).map(|t| t.blocks_sight()).unwrap_or(true)
    }

    /// Iterates all positions in row-major scan order.
    pub fn positions(&self) -> impl Iterator<Item = Position> + '_ {
        let (w, h) = (self.width as i32, self.height as i32);
        (0..h).flat_map(move |y| (0..w).map(move |x| Position::new(x, y)))
    }

    /// Read-only view of the full tile grid, row-major.
    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    /// Total number of walkable tiles.
    pub fn walkable_count(&self) -> usize {
        self.tiles.iter().filter(|t| t.is_walkable()).count()
    }

    /// Clears the visible flag on every tile, preserving exploration.
    pub fn clear_visibility(&mut self) {
        for tile in &mut self.tiles {
            tile.visible = false;
        }
    }

    /// Number of walkable tiles reachable from `start` by cardinal steps.
    ///
    /// Used by generation to confirm the floor forms a single connected
    /// component.
    pub fn reachable_from(&self, start: Position) -> usize {
        let mut visited = vec![false; self.tiles.len()];
        let mut queue = std::collections::VecDeque::new();
        if !self.is_walkable(start) {
            return 0;
        }
        visited[self.index(start)] = true;
        queue.push_back(start);
        let mut count = 0;
        while let Some(pos) = queue.pop_front() {
            count += 1;
            for next in pos.cardinal_adjacent_positions() {
                if self.is_walkable(next) && !visited[self.index(next)] {
                    visited[self.index(next)] = true;
                    queue.push_back(next);
                }
            }
        }
        count
    }

    /// Whether the outer border is an unbroken ring of sight-blocking wall.
    pub fn boundary_sealed(&self) -> bool {
        let (w, h) = (self.width as i32, self.height as i32);
        let mut edge = Vec::new();
        for x in 0..w {
            edge.push(Position::new(x, 0));
            edge.push(Position::new(x, h - 1));
        }
        for y in 0..h {
            edge.push(Position::new(0, y));
            edge.push(Position::new(w - 1, y));
        }
        edge.iter()
            .all(|&p| self.tile(p).map(|t| !t.is_walkable()).unwrap_or(false))
    }
}
