//! # Dungeon Generator
//!
//! Levels are built in layers over a solid rock grid:
//!
//! 1. BSP partitioning carves centered rooms into the leaves and joins
//!    sibling subtrees with L-corridors as the recursion unwinds, so the
//!    room graph is connected by construction.
//! 2. On deeper levels a cellular-automata pass grows cave texture, and
//!    cave cells are composed into the grid only where they join the
//!    existing floor component.
//! 3. An optional vault template is stamped where it overlaps no room,
//!    then tied into the nearest room with a corridor.
//! 4. Secret walls, levers, hazards, flammable patches, and traps are
//!    sprinkled over the result.
//!
//! A flood-fill validation backstops the construction: a level whose floor
//! is not a single connected component (or whose border leaks) is thrown
//! away and regenerated from a freshly derived substream, up to the
//! profile's retry budget.

use crate::{DescentError, DescentResult, GameMap, GameRng, Position, TileKind};
use crate::generation::{GenerationProfile, SpawnPoints};
use log::{debug, info, warn};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::collections::VecDeque;

/// Most cave pockets reported per level.
const MAX_POCKETS: usize = 16;

/// Placement attempts for the vault template before giving up.
const VAULT_ATTEMPTS: u32 = 10;

/// An axis-aligned rectangular region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    pub fn center(&self) -> Position {
        Position::new(self.x + self.w / 2, self.y + self.h / 2)
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.x + other.w
            && other.x < self.x + self.w
            && self.y < other.y + other.h
            && other.y < self.y + self.h
    }
}

/// Hand-authored vault template. `#` wall, `.` floor, `+` the doorway the
/// connecting corridor targets.
const VAULT_TEMPLATE: [&str; 7] = [
    "#######",
    "#.....#",
    "#.###.#",
    "#.#...#",
    "#.#.###",
    "#.....#",
    "###+###",
];

/// Generates a complete level for `(seed, depth)`.
///
/// Each attempt draws from its own substream derived from the seed, the
/// depth, and the attempt index, so retries never disturb the simulation's
/// main random cursor and a given `(seed, depth)` always yields the same
/// level.
pub fn generate_level(
    seed: u64,
    depth: u32,
    width: u32,
    height: u32,
    profile: &GenerationProfile,
) -> DescentResult<(GameMap, SpawnPoints)> {
    let source = GameRng::new(seed);
    for attempt in 0..profile.max_retries {
        let tag = ((depth as u64) << 16) | attempt as u64;
        let mut rng = source.substream(tag);
        let (map, points) = build_level(&mut rng, depth, width, height, profile)?;

        if points.rooms.is_empty() {
            warn!("depth {depth} attempt {attempt}: no rooms carved, retrying");
            continue;
        }
        let reachable = map.reachable_from(points.rooms[0]);
        if reachable != map.walkable_count() {
            warn!(
                "depth {depth} attempt {attempt}: disconnected floor ({} of {} reachable), retrying",
                reachable,
                map.walkable_count()
            );
            continue;
        }
        if !map.boundary_sealed() {
            warn!("depth {depth} attempt {attempt}: open border, retrying");
            continue;
        }

        info!(
            "generated depth {depth}: {} rooms, {} pockets, {} walkable tiles (attempt {attempt})",
            points.rooms.len(),
            points.pockets.len(),
            map.walkable_count()
        );
        return Ok((map, points));
    }
    Err(DescentError::Generation(format!(
        "no connected level for seed {seed} depth {depth} after {} attempts",
        profile.max_retries
    )))
}

fn build_level(
    rng: &mut ChaCha8Rng,
    depth: u32,
    width: u32,
    height: u32,
    profile: &GenerationProfile,
) -> DescentResult<(GameMap, SpawnPoints)> {
    let mut map = GameMap::filled(width, height)?;
    let mut rooms = Vec::new();

    // The outermost ring stays wall; partition everything inside it.
    let interior = Rect::new(1, 1, width as i32 - 2, height as i32 - 2);
    split_region(rng, interior, profile.min_room_size as i32, &mut map, &mut rooms);
    debug!("depth {depth}: carved {} rooms", rooms.len());

    let mut pockets = Vec::new();
    if depth >= profile.cave_minimum_depth {
        pockets = grow_caves(rng, &mut map, profile);
        debug!("depth {depth}: composed {} cave pockets", pockets.len());
    }

    if rng.gen_bool(profile.vault_probability) {
        stamp_vault(rng, &mut map, &rooms);
    }

    decorate(rng, &mut map, profile);

    // The vault may have been stamped over cave cells recorded earlier.
    pockets.retain(|&p| map.is_walkable(p));

    let points = SpawnPoints {
        rooms: rooms.iter().map(Rect::center).collect(),
        pockets,
    };
    Ok((map, points))
}

/// Recursive BSP split. Returns a connector position inside the subtree
/// (a carved room center) so the caller can join sibling subtrees.
fn split_region(
    rng: &mut ChaCha8Rng,
    region: Rect,
    min_size: i32,
    map: &mut GameMap,
    rooms: &mut Vec<Rect>,
) -> Option<Position> {
    let can_split_h = region.w >= 2 * min_size + 1;
    let can_split_v = region.h >= 2 * min_size + 1;

    if !can_split_h && !can_split_v {
        return carve_room(rng, region, map, rooms);
    }

    let split_horizontally = if can_split_h && can_split_v {
        // Bias toward cutting the longer axis to keep leaves roughly square.
        if region.w > region.h {
            true
        } else if region.h > region.w {
            false
        } else {
            rng.gen_bool(0.5)
        }
    } else {
        can_split_h
    };

    let (first, second) = if split_horizontally {
        let cut = rng.gen_range(min_size..=region.w - min_size);
        (
            Rect::new(region.x, region.y, cut, region.h),
            Rect::new(region.x + cut, region.y, region.w - cut, region.h),
        )
    } else {
        let cut = rng.gen_range(min_size..=region.h - min_size);
        (
            Rect::new(region.x, region.y, region.w, cut),
            Rect::new(region.x, region.y + cut, region.w, region.h - cut),
        )
    };

    let a = split_region(rng, first, min_size, map, rooms);
    let b = split_region(rng, second, min_size, map, rooms);

    match (a, b) {
        (Some(left), Some(right)) => {
            carve_corridor(rng, map, left, right);
            Some(if rng.gen_bool(0.5) { left } else { right })
        }
        (Some(p), None) | (None, Some(p)) => Some(p),
        (None, None) => None,
    }
}

/// Carves a centered room into a BSP leaf, leaving at least a one-tile
/// wall border on every side.
fn carve_room(
    rng: &mut ChaCha8Rng,
    leaf: Rect,
    map: &mut GameMap,
    rooms: &mut Vec<Rect>,
) -> Option<Position> {
    let max_w = leaf.w - 2;
    let max_h = leaf.h - 2;
    if max_w < 3 || max_h < 3 {
        return None;
    }
    let w = rng.gen_range(3..=max_w);
    let h = rng.gen_range(3..=max_h);
    let room = Rect::new(leaf.x + (leaf.w - w) / 2, leaf.y + (leaf.h - h) / 2, w, h);

    for y in room.y..room.y + room.h {
        for x in room.x..room.x + room.w {
            if let Some(tile) = map.tile_mut(Position::new(x, y)) {
                tile.kind = TileKind::Floor;
            }
        }
    }
    rooms.push(room);
    Some(room.center())
}

/// Joins two positions with an L-shaped corridor, corner order chosen at
/// random.
fn carve_corridor(rng: &mut ChaCha8Rng, map: &mut GameMap, from: Position, to: Position) {
    let corner = if rng.gen_bool(0.5) {
        Position::new(to.x, from.y)
    } else {
        Position::new(from.x, to.y)
    };
    carve_line(map, from, corner);
    carve_line(map, corner, to);
}

fn carve_line(map: &mut GameMap, from: Position, to: Position) {
    let mut pos = from;
    let dx = (to.x - from.x).signum();
    let dy = (to.y - from.y).signum();
    loop {
        if let Some(tile) = map.tile_mut(pos) {
            tile.kind = TileKind::Floor;
        }
        if pos == to {
            break;
        }
        if pos.x != to.x {
            pos.x += dx;
        } else {
            pos.y += dy;
        }
    }
}

/// Cellular-automata cave pass.
///
/// A candidate grid is seeded and smoothed independently of the map, then
/// composed in by flooding outward from candidate cells that touch the
/// existing floor component. Cells the flood never reaches are discarded
/// rather than patched in, so composition cannot break connectivity.
///
/// Returns open cave pockets usable as spawn points.
fn grow_caves(
    rng: &mut ChaCha8Rng,
    map: &mut GameMap,
    profile: &GenerationProfile,
) -> Vec<Position> {
    let w = map.width() as i32;
    let h = map.height() as i32;
    let idx = |x: i32, y: i32| (y * w + x) as usize;

    // true = open cave floor candidate.
    let mut cave = vec![false; (w * h) as usize];
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            cave[idx(x, y)] = !rng.gen_bool(profile.wall_probability);
        }
    }

    for _ in 0..profile.smoothing_iterations {
        let mut next = cave.clone();
        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let mut walls = 0;
                for dy in -1..=1 {
                    for dx in -1..=1 {
                        if dx == 0 && dy == 0 {
                            continue;
                        }
                        let (nx, ny) = (x + dx, y + dy);
                        // Out-of-interior counts as wall.
                        if nx <= 0 || ny <= 0 || nx >= w - 1 || ny >= h - 1 {
                            walls += 1;
                        } else if !cave[idx(nx, ny)] {
                            walls += 1;
                        }
                    }
                }
                next[idx(x, y)] = walls < 5;
            }
        }
        cave = next;
    }

    // Compose: flood from candidate cells already adjacent to carved floor.
    let mut visited = vec![false; (w * h) as usize];
    let mut queue = VecDeque::new();
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let pos = Position::new(x, y);
            if cave[idx(x, y)]
                && !map.is_walkable(pos)
                && pos
                    .cardinal_adjacent_positions()
                    .iter()
                    .any(|&n| map.is_walkable(n))
            {
                visited[idx(x, y)] = true;
                queue.push_back(pos);
            }
        }
    }
    while let Some(pos) = queue.pop_front() {
        for next in pos.cardinal_adjacent_positions() {
            if next.x <= 0 || next.y <= 0 || next.x >= w - 1 || next.y >= h - 1 {
                continue;
            }
            if cave[idx(next.x, next.y)] && !visited[idx(next.x, next.y)] {
                visited[idx(next.x, next.y)] = true;
                queue.push_back(next);
            }
        }
    }

    let mut carved = 0usize;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            if visited[idx(x, y)] {
                if let Some(tile) = map.tile_mut(Position::new(x, y)) {
                    if tile.kind == TileKind::Wall {
                        tile.kind = TileKind::Floor;
                        carved += 1;
                    }
                }
            }
        }
    }
    debug!("cave pass carved {carved} tiles");

    // Pockets: composed cells fully surrounded by open floor.
    let mut pockets = Vec::new();
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let pos = Position::new(x, y);
            if visited[idx(x, y)]
                && pos.adjacent_positions().iter().all(|&n| map.is_walkable(n))
            {
                pockets.push(pos);
            }
        }
    }
    if pockets.len() > MAX_POCKETS {
        let step = pockets.len() / MAX_POCKETS;
        pockets = pockets.into_iter().step_by(step.max(1)).take(MAX_POCKETS).collect();
    }
    pockets
}

/// Stamps the vault template somewhere it overlaps no room, then ties its
/// doorway into the nearest room center.
fn stamp_vault(rng: &mut ChaCha8Rng, map: &mut GameMap, rooms: &[Rect]) {
    let vw = VAULT_TEMPLATE[0].len() as i32;
    let vh = VAULT_TEMPLATE.len() as i32;
    let w = map.width() as i32;
    let h = map.height() as i32;
    if w < vw + 4 || h < vh + 4 {
        return;
    }

    for _ in 0..VAULT_ATTEMPTS {
        let vx = rng.gen_range(2..w - vw - 2);
        let vy = rng.gen_range(2..h - vh - 2);
        let bounds = Rect::new(vx - 1, vy - 1, vw + 2, vh + 2);
        if rooms.iter().any(|r| r.intersects(&bounds)) {
            continue;
        }

        let mut door = None;
        for (row, line) in VAULT_TEMPLATE.iter().enumerate() {
            for (col, ch) in line.chars().enumerate() {
                let pos = Position::new(vx + col as i32, vy + row as i32);
                if let Some(tile) = map.tile_mut(pos) {
                    tile.kind = match ch {
                        '#' => TileKind::Wall,
                        _ => TileKind::Floor,
                    };
                    if ch == '+' {
                        door = Some(pos);
                    }
                }
            }
        }

        if let Some(door) = door {
            let nearest = rooms
                .iter()
                .map(Rect::center)
                .min_by_key(|c| door.manhattan_distance(*c));
            if let Some(nearest) = nearest {
                carve_corridor(rng, map, door, nearest);
            }
        }
        debug!("stamped vault at ({vx}, {vy})");
        return;
    }
    debug!("vault placement abandoned after {VAULT_ATTEMPTS} attempts");
}

/// Sprinkles secret walls, levers, hazards, flammable patches, and traps.
fn decorate(rng: &mut ChaCha8Rng, map: &mut GameMap, profile: &GenerationProfile) {
    let w = map.width() as i32;
    let h = map.height() as i32;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let pos = Position::new(x, y);
            let is_wall = map
                .tile(pos)
                .map(|t| t.kind == TileKind::Wall)
                .unwrap_or(false);
            if is_wall {
                let touches_floor = pos
                    .cardinal_adjacent_positions()
                    .iter()
                    .any(|&n| map.is_walkable(n));
                if touches_floor && rng.gen_bool(profile.secret_wall_fraction) {
                    if let Some(tile) = map.tile_mut(pos) {
                        tile.kind = TileKind::SecretWall;
                    }
                }
                continue;
            }

            if !map.is_walkable(pos) {
                continue;
            }
            let hazard = rng.gen_bool(profile.hazard_fraction);
            let lever = rng.gen_bool(profile.lever_fraction);
            let flammable = rng.gen_bool(profile.flammable_fraction);
            let trap = rng.gen_bool(profile.trap_fraction);
            if let Some(tile) = map.tile_mut(pos) {
                if hazard {
                    tile.kind = TileKind::Hazard;
                }
                tile.lever = lever;
                tile.flammable = flammable && !hazard;
                tile.trap_armed = trap && !hazard;
            }
        }
    }
}
