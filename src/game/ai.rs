//! # AI Controller
//!
//! Per-entity finite state machine with three states: Idle, Alert, Flee.
//! Transition predicates are evaluated immediately before each entity acts,
//! so an entity wounded below its flee threshold earlier in the same turn
//! flees on its very next action rather than one turn later.
//!
//! Pursuit uses A* over the tile grid; flight uses a cost field radiating
//! from the threat (a Dijkstra map), climbing toward the locally maximal
//! neighbor.

use crate::{
    below_flee_threshold, can_see, resolve_attack, AiState, Faction, GameEvent, GameMap,
    Position,
};
use crate::{DescentResult, EntityId, EntityStore};
use pathfinding::prelude::astar;
use rand::Rng;
use std::collections::VecDeque;

/// Hp fraction an entity must recover to before it stops fleeing.
const RECOVER_HP_FRACTION: f64 = 0.5;

/// Chance an idle entity stands still instead of wandering.
const IDLE_REST_CHANCE: f64 = 0.3;

/// Shortest-cost path between two positions, stepping through walkable
/// tiles not occupied by blocking entities (the goal tile is exempt so a
/// pursuer can path onto its target).
pub fn direct_path(
    map: &GameMap,
    store: &EntityStore,
    from: Position,
    to: Position,
) -> Option<Vec<Position>> {
    let result = astar(
        &from,
        |&pos| {
            let successors: Vec<(Position, u32)> = pos
                .adjacent_positions()
                .into_iter()
                .filter(|&next| {
                    map.is_walkable(next)
                        && (next == to || store.blocking_entity_at(next).is_none())
                })
                .map(|next| (next, 1))
                .collect();
            successors
        },
        |&pos| pos.chebyshev_distance(to),
        |&pos| pos == to,
    );
    result.map(|(path, _cost)| path)
}

/// Uniform-cost field of distances from `source` over walkable tiles.
///
/// `None` marks unreachable tiles. Inverted (by walking uphill) this is the
/// flight map: the neighbor with the greatest cost is the step that most
/// increases distance from the source.
pub fn cost_field(map: &GameMap, source: Position) -> Vec<Option<u32>> {
    let mut field = vec![None; (map.width() * map.height()) as usize];
    let idx = |pos: Position| (pos.y as u32 * map.width() + pos.x as u32) as usize;
    if !map.is_walkable(source) {
        return field;
    }
    field[idx(source)] = Some(0);
    let mut queue = VecDeque::new();
    queue.push_back(source);
    while let Some(pos) = queue.pop_front() {
        let here = field[idx(pos)].unwrap_or(0);
        for next in pos.adjacent_positions() {
            if map.is_walkable(next) && field[idx(next)].is_none() {
                field[idx(next)] = Some(here + 1);
                queue.push_back(next);
            }
        }
    }
    field
}

/// Drives one entity for one turn.
///
/// Expects a live entity; entities without `Ai` or `Fighter` components are
/// skipped silently. A stale target id (entity destroyed since last turn)
/// is recovered locally by falling back to Idle, never surfaced as an
/// error.
pub fn take_turn(
    map: &GameMap,
    store: &mut EntityStore,
    rng: &mut impl Rng,
    actor: EntityId,
    player: EntityId,
) -> DescentResult<Vec<GameEvent>> {
    let mut events = Vec::new();

    let (pos, mut ai) = match store.get(actor) {
        Some(e) => match (&e.ai, &e.fighter) {
            (Some(ai), Some(_)) => (e.position, ai.clone()),
            _ => return Ok(events),
        },
        None => return Ok(events),
    };

    // Resolve the current threat. A destroyed or disarmed target falls back
    // to the player; a player corpse is not a threat either.
    let threat = match ai.target {
        Some(id) if store.get(id).map(|e| e.fighter.is_some()).unwrap_or(false) => Some(id),
        _ => {
            ai.target = None;
            store
                .get(player)
                .map(|e| e.fighter.is_some())
                .unwrap_or(false)
                .then_some(player)
        }
    };
    let (threat, threat_pos) = match threat.and_then(|id| store.get(id).map(|e| (id, e.position))) {
        Some(pair) => pair,
        None => {
            // No live threat exists at all; wander.
            ai.state = AiState::Idle;
            let ev = wander(map, store, rng, actor, pos, ai.wander_radius)?;
            events.extend(ev);
            if let Some(entity) = store.get_mut(actor) {
                entity.ai = Some(ai);
            }
            return Ok(events);
        }
    };

    let visible = can_see(map, pos, threat_pos, ai.sight_radius);
    let wounded = store.get(actor).map(below_flee_threshold).unwrap_or(false);
    let recovered = store
        .get(actor)
        .and_then(|e| e.fighter.as_ref())
        .map(|f| (f.hp as f64) >= (f.max_hp as f64) * RECOVER_HP_FRACTION)
        .unwrap_or(false);

    // Transition predicates, evaluated before the action is chosen.
    ai.state = match ai.state {
        AiState::Idle => {
            let engages = match ai.faction {
                Faction::Hostile => visible,
                Faction::Neutral => visible && ai.provoked,
                Faction::Friendly => false,
            };
            if engages {
                ai.target = Some(threat);
                AiState::Alert
            } else {
                AiState::Idle
            }
        }
        AiState::Alert => {
            if wounded {
                AiState::Flee
            } else {
                AiState::Alert
            }
        }
        AiState::Flee => {
            if !visible && recovered {
                ai.target = None;
                AiState::Idle
            } else {
                AiState::Flee
            }
        }
    };

    match ai.state {
        AiState::Idle => {
            events.extend(wander(map, store, rng, actor, pos, ai.wander_radius)?);
        }
        AiState::Alert => {
            if pos.chebyshev_distance(threat_pos) == 1 {
                let outcome = resolve_attack(store, rng, actor, threat)?;
                events.push(GameEvent::Attacked {
                    attacker: actor,
                    defender: threat,
                    damage: outcome.damage,
                });
                if outcome.defender_died {
                    events.push(GameEvent::Died { entity: threat });
                }
            } else if let Some(path) = direct_path(map, store, pos, threat_pos) {
                if path.len() > 1 {
                    let step = path[1];
                    if store.blocking_entity_at(step).is_none() {
                        move_entity(store, actor, step);
                        events.push(GameEvent::Moved {
                            entity: actor,
                            from: pos,
                            to: step,
                        });
                    }
                }
            }
        }
        AiState::Flee => {
            let field = cost_field(map, threat_pos);
            let idx =
                |p: Position| (p.y as u32 * map.width() + p.x as u32) as usize;
            let here = field.get(idx(pos)).copied().flatten().unwrap_or(0);

            let mut best: Option<(Position, u32)> = None;
            for next in pos.adjacent_positions() {
                if !map.is_walkable(next) || store.blocking_entity_at(next).is_some() {
                    continue;
                }
                if let Some(cost) = field.get(idx(next)).copied().flatten() {
                    // Strictly greater keeps ties on the first neighbor in
                    // scan order, which keeps flight deterministic.
                    if cost > best.map(|(_, c)| c).unwrap_or(here) {
                        best = Some((next, cost));
                    }
                }
            }

            if let Some((step, _)) = best {
                move_entity(store, actor, step);
                events.push(GameEvent::Moved {
                    entity: actor,
                    from: pos,
                    to: step,
                });
            } else {
                // Flee path exhausted: cornered, give up fleeing.
                ai.state = AiState::Idle;
            }
        }
    }

    if let Some(entity) = store.get_mut(actor) {
        if entity.ai.is_some() {
            entity.ai = Some(ai);
        }
    }
    Ok(events)
}

/// Idle wandering: pick a random reachable tile within the wander radius
/// and take one step toward it. Tiles on the far side of a wall are never
/// chosen as goals.
fn wander(
    map: &GameMap,
    store: &mut EntityStore,
    rng: &mut impl Rng,
    actor: EntityId,
    pos: Position,
    radius: u32,
) -> DescentResult<Vec<GameEvent>> {
    if rng.gen_bool(IDLE_REST_CHANCE) {
        return Ok(Vec::new());
    }

    let field = cost_field(map, pos);
    let idx = |p: Position| (p.y as u32 * map.width() + p.x as u32) as usize;
    let r = radius as i32;
    let mut candidates = Vec::new();
    for dy in -r..=r {
        for dx in -r..=r {
            let p = Position::new(pos.x + dx, pos.y + dy);
            if p != pos && map.is_walkable(p) && field[idx(p)].is_some() {
                candidates.push(p);
            }
        }
    }
    if candidates.is_empty() {
        return Ok(Vec::new());
    }
    let goal = candidates[rng.gen_range(0..candidates.len())];

    let dx = (goal.x - pos.x).signum();
    let dy = (goal.y - pos.y).signum();
    // Prefer the diagonal step, then each axis.
    let steps = [
        Position::new(pos.x + dx, pos.y + dy),
        Position::new(pos.x + dx, pos.y),
        Position::new(pos.x, pos.y + dy),
    ];
    for step in steps {
        if step != pos && map.is_walkable(step) && store.blocking_entity_at(step).is_none() {
            move_entity(store, actor, step);
            return Ok(vec![GameEvent::Moved {
                entity: actor,
                from: pos,
                to: step,
            }]);
        }
    }
    Ok(Vec::new())
}

fn move_entity(store: &mut EntityStore, id: EntityId, to: Position) {
    if let Some(entity) = store.get_mut(id) {
        entity.position = to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Ai, Entity, Fighter, TileKind};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn open_map() -> GameMap {
        let mut map = GameMap::filled(64, 64).unwrap();
        for y in 1..63 {
            for x in 1..63 {
                map.tile_mut(Position::new(x, y)).unwrap().kind = TileKind::Floor;
            }
        }
        map
    }

    fn monster(pos: Position, faction: Faction) -> Entity {
        Entity::new(pos, 'o', (0, 128, 0), "orc", true)
            .with_fighter(Fighter::new(20, 0, 4))
            .with_ai(Ai::new(faction, 8))
    }

    fn player_entity(pos: Position) -> Entity {
        Entity::new(pos, '@', (255, 255, 255), "Player", true)
            .with_fighter(Fighter::new(30, 2, 5))
    }

    #[test]
    fn test_direct_path_reaches_goal() {
        let map = open_map();
        let store = EntityStore::new();
        let path = direct_path(&map, &store, Position::new(2, 2), Position::new(10, 10)).unwrap();
        assert_eq!(path.first(), Some(&Position::new(2, 2)));
        assert_eq!(path.last(), Some(&Position::new(10, 10)));
        // Diagonal moves allowed: 8 steps.
        assert_eq!(path.len(), 9);
    }

    #[test]
    fn test_direct_path_routes_around_walls() {
        let mut map = open_map();
        // Vertical wall with a single gap.
        for y in 1..63 {
            map.tile_mut(Position::new(20, y)).unwrap().kind = TileKind::Wall;
        }
        map.tile_mut(Position::new(20, 40)).unwrap().kind = TileKind::Floor;
        let store = EntityStore::new();
        let path = direct_path(&map, &store, Position::new(5, 5), Position::new(35, 5)).unwrap();
        assert!(path.contains(&Position::new(20, 40)));
    }

    #[test]
    fn test_cost_field_increases_with_distance() {
        let map = open_map();
        let field = cost_field(&map, Position::new(32, 32));
        let idx = |p: Position| (p.y as u32 * map.width() + p.x as u32) as usize;
        assert_eq!(field[idx(Position::new(32, 32))], Some(0));
        assert_eq!(field[idx(Position::new(33, 33))], Some(1));
        assert_eq!(field[idx(Position::new(40, 32))], Some(8));
        // Walls are unreachable.
        assert_eq!(field[idx(Position::new(0, 0))], None);
    }

    #[test]
    fn test_hostile_idles_until_player_visible() {
        let map = open_map();
        let mut store = EntityStore::new();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let player = store.spawn(player_entity(Position::new(50, 50)));
        let orc = store.spawn(monster(Position::new(5, 5), Faction::Hostile));

        take_turn(&map, &mut store, &mut rng, orc, player).unwrap();
        assert_eq!(store.get(orc).unwrap().ai.as_ref().unwrap().state, AiState::Idle);
    }

    #[test]
    fn test_hostile_alerts_on_sight_and_closes_in() {
        let map = open_map();
        let mut store = EntityStore::new();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let player = store.spawn(player_entity(Position::new(10, 5)));
        let orc = store.spawn(monster(Position::new(5, 5), Faction::Hostile));

        let events = take_turn(&map, &mut store, &mut rng, orc, player).unwrap();
        let ai = store.get(orc).unwrap().ai.clone().unwrap();
        assert_eq!(ai.state, AiState::Alert);
        assert!(matches!(events.first(), Some(GameEvent::Moved { .. })));
        // Moved one step closer.
        let new_pos = store.get(orc).unwrap().position;
        assert!(new_pos.chebyshev_distance(Position::new(10, 5)) < 5);
    }

    #[test]
    fn test_adjacent_alert_entity_attacks() {
        let map = open_map();
        let mut store = EntityStore::new();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let player = store.spawn(player_entity(Position::new(6, 5)));
        let orc = store.spawn(monster(Position::new(5, 5), Faction::Hostile));

        let events = take_turn(&map, &mut store, &mut rng, orc, player).unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, GameEvent::Attacked { .. })));
        assert!(store.get(player).unwrap().fighter.as_ref().unwrap().hp < 30);
    }

    #[test]
    fn test_neutral_only_engages_when_provoked() {
        let map = open_map();
        let mut store = EntityStore::new();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let player = store.spawn(player_entity(Position::new(7, 5)));
        let deer = store.spawn(monster(Position::new(5, 5), Faction::Neutral));

        take_turn(&map, &mut store, &mut rng, deer, player).unwrap();
        assert_eq!(store.get(deer).unwrap().ai.as_ref().unwrap().state, AiState::Idle);

        store.get_mut(deer).unwrap().ai.as_mut().unwrap().provoked = true;
        take_turn(&map, &mut store, &mut rng, deer, player).unwrap();
        assert_eq!(store.get(deer).unwrap().ai.as_ref().unwrap().state, AiState::Alert);
    }

    #[test]
    fn test_friendly_never_alerts_against_player() {
        let map = open_map();
        let mut store = EntityStore::new();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let player = store.spawn(player_entity(Position::new(6, 5)));
        let ally = store.spawn(monster(Position::new(5, 5), Faction::Friendly));

        for _ in 0..5 {
            take_turn(&map, &mut store, &mut rng, ally, player).unwrap();
            let state = store.get(ally).unwrap().ai.as_ref().unwrap().state;
            assert_ne!(state, AiState::Alert);
        }
    }

    #[test]
    fn test_wounded_alert_entity_flees_before_acting() {
        let map = open_map();
        let mut store = EntityStore::new();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let player = store.spawn(player_entity(Position::new(6, 5)));
        let orc = store.spawn(monster(Position::new(5, 5), Faction::Hostile));

        // Put the orc into Alert, then wound it below 25%.
        store.get_mut(orc).unwrap().ai.as_mut().unwrap().state = AiState::Alert;
        store.get_mut(orc).unwrap().fighter.as_mut().unwrap().hp = 4;

        let events = take_turn(&map, &mut store, &mut rng, orc, player).unwrap();
        assert_eq!(store.get(orc).unwrap().ai.as_ref().unwrap().state, AiState::Flee);
        // It fled rather than attacked, in the same invocation.
        assert!(!events.iter().any(|e| matches!(e, GameEvent::Attacked { .. })));
        let new_pos = store.get(orc).unwrap().position;
        assert!(new_pos.chebyshev_distance(Position::new(6, 5)) > 1);
    }

    #[test]
    fn test_flee_moves_away_from_threat() {
        let map = open_map();
        let mut store = EntityStore::new();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let player = store.spawn(player_entity(Position::new(30, 30)));
        let orc = store.spawn(monster(Position::new(32, 30), Faction::Hostile));
        store.get_mut(orc).unwrap().ai.as_mut().unwrap().state = AiState::Flee;
        store.get_mut(orc).unwrap().fighter.as_mut().unwrap().hp = 2;

        let before = store.get(orc).unwrap().position.chebyshev_distance(Position::new(30, 30));
        take_turn(&map, &mut store, &mut rng, orc, player).unwrap();
        let after = store.get(orc).unwrap().position.chebyshev_distance(Position::new(30, 30));
        assert!(after > before);
    }

    #[test]
    fn test_player_corpse_is_not_attacked() {
        let map = open_map();
        let mut store = EntityStore::new();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let player = store.spawn(player_entity(Position::new(6, 5)));
        store.get_mut(player).unwrap().into_corpse();
        let orc = store.spawn(monster(Position::new(5, 5), Faction::Hostile));
        store.get_mut(orc).unwrap().ai.as_mut().unwrap().state = AiState::Alert;

        // Adjacent and alert, but the player is a corpse: no attack, no
        // error, back to wandering.
        let events = take_turn(&map, &mut store, &mut rng, orc, player).unwrap();
        assert!(!events.iter().any(|e| matches!(e, GameEvent::Attacked { .. })));
        assert_eq!(store.get(orc).unwrap().ai.as_ref().unwrap().state, AiState::Idle);
    }

    #[test]
    fn test_wander_skips_goals_behind_walls() {
        let mut map = GameMap::filled(64, 64).unwrap();
        // A lone open tile, with more floor nearby across solid wall.
        map.tile_mut(Position::new(10, 10)).unwrap().kind = TileKind::Floor;
        for x in 13..16 {
            map.tile_mut(Position::new(x, 10)).unwrap().kind = TileKind::Floor;
        }
        let mut store = EntityStore::new();
        let orc = store.spawn(monster(Position::new(10, 10), Faction::Hostile));

        // Every in-radius candidate is unreachable, so there is no goal to
        // pick: nothing is drawn past the rest check and nothing moves.
        for seed in 0..20 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let events =
                wander(&map, &mut store, &mut rng, orc, Position::new(10, 10), 5).unwrap();
            assert!(events.is_empty());
            assert_eq!(store.get(orc).unwrap().position, Position::new(10, 10));
            assert!(rng.get_word_pos() <= 2, "seed {seed} drew a goal");
        }
    }

    #[test]
    fn test_stale_target_recovers_to_player_threat() {
        let map = open_map();
        let mut store = EntityStore::new();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let player = store.spawn(player_entity(Position::new(50, 50)));
        let orc = store.spawn(monster(Position::new(5, 5), Faction::Hostile));
        let victim = store.spawn(player_entity(Position::new(6, 5)));

        store.get_mut(orc).unwrap().ai.as_mut().unwrap().state = AiState::Alert;
        store.get_mut(orc).unwrap().ai.as_mut().unwrap().target = Some(victim);
        store.release(victim);

        // No error; target falls back to the player.
        take_turn(&map, &mut store, &mut rng, orc, player).unwrap();
        let ai = store.get(orc).unwrap().ai.clone().unwrap();
        assert_ne!(ai.target, Some(victim));
    }
}
