//! # Turn Scheduler
//!
//! [`Simulation`] is the explicit context object owning the map, the entity
//! store, the random stream, the field-of-view cache, and the spawn tables.
//! Every turn advances through the same fixed phases:
//!
//! ```text
//! AwaitingPlayerIntent -> ApplyingPlayerAction -> ResolvingAI
//!     -> ResolvingEnvironment -> Committed
//! ```
//!
//! then the turn counter increments. All mutation happens here, on the
//! calling thread, in phase order; combined with the single random stream
//! this makes a run a pure function of seed plus intent sequence.

use crate::generation::{
    generate_level, GenerationProfile, LevelPrefetch, MonsterKind, SpawnPoints, SpawnTables,
};
use crate::{
    ai, apply_status_effect, config, resolve_attack, tick_status_effects, Ai, DescentError,
    DescentResult, Direction, Entity, EntityId, EntityStore, Faction, Fighter, FovEngine, GameMap,
    GameRng, ItemKind, Position, RngCursor, StatusEffectKind, TileKind,
};
use log::{debug, info};

/// Healing granted by a potion.
const POTION_HEAL: i32 = 10;
/// Burn duration applied by a scroll.
const SCROLL_BURN_DURATION: u32 = 4;
/// Scroll targeting range, in tiles.
const SCROLL_RANGE: u32 = 8;
/// Permanent power bonus from equipping a sword.
const SWORD_POWER_BONUS: i32 = 2;
/// Permanent defense bonus from equipping armor.
const ARMOR_DEFENSE_BONUS: i32 = 2;
/// Damage per turn to anything standing in a hazard.
const HAZARD_DAMAGE: i32 = 2;
/// Damage dealt by a triggered trap.
const TRAP_DAMAGE: i32 = 4;
/// Turns until a triggered trap rearms.
const TRAP_REARM_TURNS: u8 = 5;
/// Radius within which a pulled lever reveals secret walls.
const LEVER_REVEAL_RADIUS: u32 = 3;
/// Chance a room past the first holds a monster.
const ROOM_MONSTER_CHANCE: f64 = 0.6;
/// Chance a room past the first also holds loot.
const ROOM_LOOT_CHANCE: f64 = 0.4;
/// Chance a cave pocket holds a monster.
const POCKET_MONSTER_CHANCE: f64 = 0.5;

/// Carried items are parked here, off the grid, until used or dropped.
const HELD_ITEM_POSITION: Position = Position { x: -1, y: -1 };

/// The player's validated action for one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerIntent {
    /// Step one tile; bump-attacks blockers, auto-picks-up items.
    Move(Direction),
    /// Melee attack an adjacent tile.
    Attack(Direction),
    /// Use the item in the given inventory slot.
    UseItem(usize),
    /// Pass the turn.
    Wait,
}

/// Phases of the per-turn state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    AwaitingPlayerIntent,
    ApplyingPlayerAction,
    ResolvingAI,
    ResolvingEnvironment,
    Committed,
}

/// Everything observable that happened during one turn, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEvent {
    Moved {
        entity: EntityId,
        from: Position,
        to: Position,
    },
    Attacked {
        attacker: EntityId,
        defender: EntityId,
        damage: i32,
    },
    Died {
        entity: EntityId,
    },
    PickedUp {
        entity: EntityId,
        item: EntityId,
    },
    ItemUsed {
        entity: EntityId,
        kind: ItemKind,
    },
    Healed {
        entity: EntityId,
        amount: i32,
    },
    StatusApplied {
        entity: EntityId,
        kind: StatusEffectKind,
    },
    StatusExpired {
        entity: EntityId,
        kind: StatusEffectKind,
    },
    StatusDamage {
        entity: EntityId,
        damage: i32,
    },
    FireSpread {
        position: Position,
    },
    HazardDamage {
        entity: EntityId,
        damage: i32,
    },
    TrapTriggered {
        entity: EntityId,
        position: Position,
    },
    LeverPulled {
        entity: EntityId,
        position: Position,
    },
    Descended {
        depth: u32,
    },
}

/// The outcome of one committed turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnResult {
    /// Observable events in resolution order.
    pub events: Vec<GameEvent>,
    /// Entities that died this turn.
    pub deaths: Vec<EntityId>,
    /// Tiles whose visibility changed, ascending.
    pub fov_delta: Vec<Position>,
    /// The turn number after this turn committed. An invalid intent leaves
    /// it unchanged.
    pub turn_number: u64,
}

impl TurnResult {
    fn rejected(turn_number: u64) -> Self {
        Self {
            events: Vec::new(),
            deaths: Vec::new(),
            fov_delta: Vec::new(),
            turn_number,
        }
    }
}

/// The simulation context: one dungeon level and everything alive on it.
#[derive(Debug)]
pub struct Simulation {
    map: GameMap,
    store: EntityStore,
    rng: GameRng,
    player: EntityId,
    fov: FovEngine,
    tables: SpawnTables,
    profile: GenerationProfile,
    spawn_points: SpawnPoints,
    phase: TurnPhase,
    turn_number: u64,
    depth: u32,
    prefetch: Option<LevelPrefetch>,
}

impl Simulation {
    /// Creates a new simulation at depth 1 for the given seed, generating
    /// and populating the first level.
    pub fn new(seed: u64, width: u32, height: u32, profile: GenerationProfile) -> DescentResult<Self> {
        let depth = 1;
        let (mut map, spawn_points) = generate_level(seed, depth, width, height, &profile)?;
        let mut store = EntityStore::new();

        let start = spawn_points.rooms.first().copied().ok_or_else(|| {
            DescentError::Generation("level produced no player start".to_string())
        })?;
        let player = store.spawn(
            Entity::new(start, '@', (255, 255, 255), "Player", true)
                .with_fighter(Fighter::new(
                    config::PLAYER_HP,
                    config::PLAYER_DEFENSE,
                    config::PLAYER_POWER,
                ))
                .with_inventory(),
        );

        let mut rng = GameRng::new(seed);
        let tables = SpawnTables::for_depth(depth)?;
        populate(&mut store, &mut rng, &tables, &spawn_points)?;

        let mut fov = FovEngine::new(config::PLAYER_SIGHT_RADIUS);
        fov.refresh(&mut map, start);

        info!(
            "simulation started: seed {seed}, depth {depth}, {} entities",
            store.len()
        );
        Ok(Self {
            map,
            store,
            rng,
            player,
            fov,
            tables,
            profile,
            spawn_points,
            phase: TurnPhase::AwaitingPlayerIntent,
            turn_number: 0,
            depth,
            prefetch: None,
        })
    }

    /// Reconstructs a simulation from saved state. The field-of-view cache
    /// is rebuilt dirty and the spawn tables re-derived from the depth, so
    /// only the payload's data is trusted.
    #[allow(clippy::too_many_arguments)]
    pub fn from_saved(
        map: GameMap,
        store: EntityStore,
        player: EntityId,
        seed: u64,
        cursor: RngCursor,
        turn_number: u64,
        depth: u32,
        profile: GenerationProfile,
    ) -> DescentResult<Self> {
        if !store.contains(player) {
            return Err(DescentError::Load(
                "saved player id does not resolve".to_string(),
            ));
        }
        let mut sim = Self {
            map,
            store,
            rng: GameRng::restore(seed, cursor),
            player,
            fov: FovEngine::new(config::PLAYER_SIGHT_RADIUS),
            tables: SpawnTables::for_depth(depth)?,
            profile,
            spawn_points: SpawnPoints::default(),
            phase: TurnPhase::AwaitingPlayerIntent,
            turn_number,
            depth,
            prefetch: None,
        };
        let start = sim
            .store
            .get(sim.player)
            .map(|e| e.position)
            .ok_or_else(|| DescentError::Load("saved player has no entity".to_string()))?;
        sim.fov.refresh(&mut sim.map, start);
        Ok(sim)
    }

    pub fn map(&self) -> &GameMap {
        &self.map
    }

    pub fn entities(&self) -> &EntityStore {
        &self.store
    }

    pub fn player(&self) -> EntityId {
        self.player
    }

    pub fn turn_number(&self) -> u64 {
        self.turn_number
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn profile(&self) -> &GenerationProfile {
        &self.profile
    }

    pub fn seed(&self) -> u64 {
        self.rng.seed()
    }

    pub fn rng_cursor(&self) -> RngCursor {
        self.rng.cursor()
    }

    /// Whether a position is visible to the player right now.
    pub fn player_can_see(&self, pos: Position) -> bool {
        self.fov.is_visible(pos)
    }

    /// Inserts an entity at its position, validating traversability first.
    pub fn spawn_entity(&mut self, entity: Entity) -> DescentResult<EntityId> {
        let pos = entity.position;
        if !self.map.in_bounds(pos) {
            return Err(DescentError::InvalidPosition {
                x: pos.x,
                y: pos.y,
                reason: "out of bounds".to_string(),
            });
        }
        if !self.map.is_walkable(pos) {
            return Err(DescentError::InvalidPosition {
                x: pos.x,
                y: pos.y,
                reason: "not traversable".to_string(),
            });
        }
        if entity.blocks_movement && self.store.blocking_entity_at(pos).is_some() {
            return Err(DescentError::InvalidPosition {
                x: pos.x,
                y: pos.y,
                reason: "occupied by a blocking entity".to_string(),
            });
        }
        Ok(self.store.spawn(entity))
    }

    /// Spawns a monster of the given kind at a position.
    pub fn spawn_monster(&mut self, kind: MonsterKind, pos: Position) -> DescentResult<EntityId> {
        self.spawn_entity(monster_entity(kind, pos))
    }

    /// Spawns an item of the given kind on the floor at a position.
    pub fn spawn_item(&mut self, kind: ItemKind, pos: Position) -> DescentResult<EntityId> {
        self.spawn_entity(item_entity(kind, pos))
    }

    /// Runs one full turn for the given player intent.
    ///
    /// An invalid intent (blocked move, attack into empty air, empty
    /// inventory slot) rejects the turn: no events, no AI or environment
    /// resolution, turn number unchanged.
    pub fn step_turn(&mut self, intent: PlayerIntent) -> DescentResult<TurnResult> {
        let mut events = Vec::new();

        self.phase = TurnPhase::ApplyingPlayerAction;
        let accepted = self.apply_player_action(intent, &mut events)?;
        if !accepted {
            self.phase = TurnPhase::AwaitingPlayerIntent;
            debug!("turn {} rejected intent {intent:?}", self.turn_number);
            return Ok(TurnResult::rejected(self.turn_number));
        }

        self.phase = TurnPhase::ResolvingAI;
        self.resolve_ai(&mut events)?;

        self.phase = TurnPhase::ResolvingEnvironment;
        self.resolve_environment(&mut events)?;

        self.phase = TurnPhase::Committed;
        self.turn_number += 1;

        let fov_delta = match self.store.get(self.player) {
            Some(p) => self.fov.refresh(&mut self.map, p.position),
            None => Vec::new(),
        };

        let deaths = events
            .iter()
            .filter_map(|e| match e {
                GameEvent::Died { entity } => Some(*entity),
                _ => None,
            })
            .collect();

        self.phase = TurnPhase::AwaitingPlayerIntent;
        Ok(TurnResult {
            events,
            deaths,
            fov_delta,
            turn_number: self.turn_number,
        })
    }

    /// Starts speculative generation of the next level, if not already
    /// running.
    pub fn prefetch_next_level(&mut self) {
        let next = self.depth + 1;
        let already = self
            .prefetch
            .as_ref()
            .map(|p| p.depth() == next)
            .unwrap_or(false);
        if !already {
            self.prefetch = Some(LevelPrefetch::start(
                self.rng.seed(),
                next,
                self.map.width(),
                self.map.height(),
                self.profile.clone(),
            ));
        }
    }

    /// Moves the simulation one level deeper.
    ///
    /// The map and all entities are replaced wholesale; only the player
    /// entity (with its components, inventory, and wounds) migrates. Uses
    /// the prefetched level when one is ready for this depth.
    pub fn descend(&mut self) -> DescentResult<Vec<GameEvent>> {
        let next = self.depth + 1;
        let prefetched = match self.prefetch.take() {
            Some(p) if p.depth() == next => Some(p.take()?),
            Some(_) | None => None,
        };
        let (mut map, spawn_points) = match prefetched {
            Some(level) => level,
            None => generate_level(
                self.rng.seed(),
                next,
                self.map.width(),
                self.map.height(),
                &self.profile,
            )?,
        };

        let start = spawn_points.rooms.first().copied().ok_or_else(|| {
            DescentError::Generation("level produced no player start".to_string())
        })?;
        let mut migrated = self
            .store
            .get(self.player)
            .cloned()
            .ok_or_else(|| DescentError::InvalidState("player entity missing".to_string()))?;
        migrated.position = start;

        let mut store = EntityStore::new();
        let player = store.spawn(migrated);

        // Held items migrate too; everything else stays behind.
        let held: Vec<EntityId> = store
            .get(player)
            .and_then(|e| e.inventory.as_ref())
            .map(|inv| inv.items.clone())
            .unwrap_or_default();
        let mut remapped = Vec::with_capacity(held.len());
        for old_id in held {
            if let Some(item) = self.store.get(old_id).cloned() {
                remapped.push(store.spawn(item));
            }
        }
        if let Some(inv) = store.get_mut(player).and_then(|e| e.inventory.as_mut()) {
            inv.items = remapped;
        }

        self.depth = next;
        self.tables = SpawnTables::for_depth(next)?;
        populate(&mut store, &mut self.rng, &self.tables, &spawn_points)?;

        self.store = store;
        self.player = player;
        self.fov = FovEngine::new(config::PLAYER_SIGHT_RADIUS);
        self.fov.refresh(&mut map, start);
        self.map = map;
        self.spawn_points = spawn_points;

        info!("descended to depth {next}");
        Ok(vec![GameEvent::Descended { depth: next }])
    }

    /// Applies the player's intent. Returns false for invalid intents, in
    /// which case nothing has been mutated.
    fn apply_player_action(
        &mut self,
        intent: PlayerIntent,
        events: &mut Vec<GameEvent>,
    ) -> DescentResult<bool> {
        let player_pos = match self.store.get(self.player) {
            Some(p) => p.position,
            None => return Ok(false),
        };

        match intent {
            PlayerIntent::Wait => Ok(true),
            PlayerIntent::Move(dir) => {
                let target = player_pos + dir.to_delta();
                if !self.map.is_walkable(target) {
                    return Ok(false);
                }
                if let Some(blocker) = self.store.blocking_entity_at(target) {
                    let has_fighter = self
                        .store
                        .get(blocker)
                        .map(|e| e.fighter.is_some())
                        .unwrap_or(false);
                    if !has_fighter {
                        return Ok(false);
                    }
                    // Bump attack.
                    let outcome = resolve_attack(&mut self.store, &mut self.rng, self.player, blocker)?;
                    events.push(GameEvent::Attacked {
                        attacker: self.player,
                        defender: blocker,
                        damage: outcome.damage,
                    });
                    if outcome.defender_died {
                        events.push(GameEvent::Died { entity: blocker });
                    }
                    return Ok(true);
                }

                if let Some(p) = self.store.get_mut(self.player) {
                    p.position = target;
                }
                events.push(GameEvent::Moved {
                    entity: self.player,
                    from: player_pos,
                    to: target,
                });
                self.auto_pickup(target, events);
                self.pull_lever(target, events);
                Ok(true)
            }
            PlayerIntent::Attack(dir) => {
                let target = player_pos + dir.to_delta();
                let defender = match self.store.blocking_entity_at(target) {
                    Some(id)
                        if self
                            .store
                            .get(id)
                            .map(|e| e.fighter.is_some())
                            .unwrap_or(false) =>
                    {
                        id
                    }
                    _ => return Ok(false),
                };
                let outcome = resolve_attack(&mut self.store, &mut self.rng, self.player, defender)?;
                events.push(GameEvent::Attacked {
                    attacker: self.player,
                    defender,
                    damage: outcome.damage,
                });
                if outcome.defender_died {
                    events.push(GameEvent::Died { entity: defender });
                }
                Ok(true)
            }
            PlayerIntent::UseItem(slot) => self.use_item(slot, events),
        }
    }

    fn auto_pickup(&mut self, pos: Position, events: &mut Vec<GameEvent>) {
        for item_id in self.store.items_at(pos) {
            let added = self
                .store
                .get_mut(self.player)
                .and_then(|p| p.inventory.as_mut())
                .map(|inv| inv.add(item_id))
                .unwrap_or(false);
            if added {
                if let Some(item) = self.store.get_mut(item_id) {
                    item.position = HELD_ITEM_POSITION;
                }
                events.push(GameEvent::PickedUp {
                    entity: self.player,
                    item: item_id,
                });
            }
        }
    }

    fn pull_lever(&mut self, pos: Position, events: &mut Vec<GameEvent>) {
        let on_lever = self.map.tile(pos).map(|t| t.lever).unwrap_or(false);
        if !on_lever {
            return;
        }
        if let Some(tile) = self.map.tile_mut(pos) {
            tile.lever = false;
        }
        let mut revealed = false;
        let r = LEVER_REVEAL_RADIUS as i32;
        for dy in -r..=r {
            for dx in -r..=r {
                let p = Position::new(pos.x + dx, pos.y + dy);
                if let Some(tile) = self.map.tile_mut(p) {
                    if tile.kind == TileKind::SecretWall {
                        tile.kind = TileKind::Floor;
                        revealed = true;
                    }
                }
            }
        }
        if revealed {
            self.fov.mark_dirty();
        }
        events.push(GameEvent::LeverPulled {
            entity: self.player,
            position: pos,
        });
    }

    fn use_item(&mut self, slot: usize, events: &mut Vec<GameEvent>) -> DescentResult<bool> {
        let item_id = match self
            .store
            .get(self.player)
            .and_then(|p| p.inventory.as_ref())
            .and_then(|inv| inv.items.get(slot))
        {
            Some(&id) => id,
            None => return Ok(false),
        };
        let kind = match self.store.get(item_id).and_then(|e| e.item) {
            Some(kind) => kind,
            None => return Ok(false),
        };

        events.push(GameEvent::ItemUsed {
            entity: self.player,
            kind,
        });
        match kind {
            ItemKind::Potion => {
                if let Some(f) = self
                    .store
                    .get_mut(self.player)
                    .and_then(|p| p.fighter.as_mut())
                {
                    let healed = f.heal(POTION_HEAL);
                    events.push(GameEvent::Healed {
                        entity: self.player,
                        amount: healed,
                    });
                }
            }
            ItemKind::Scroll => {
                let origin = self
                    .store
                    .get(self.player)
                    .map(|p| p.position)
                    .ok_or_else(|| {
                        DescentError::InvalidState("player entity missing".to_string())
                    })?;
                let targets: Vec<EntityId> = self
                    .store
                    .iter()
                    .filter(|(id, e)| {
                        *id != self.player
                            && e.fighter.is_some()
                            && origin.chebyshev_distance(e.position) <= SCROLL_RANGE
                            && self.fov.is_visible(e.position)
                    })
                    .map(|(id, _)| id)
                    .collect();
                for target in targets {
                    apply_status_effect(
                        &mut self.store,
                        target,
                        StatusEffectKind::Burn,
                        SCROLL_BURN_DURATION,
                    )?;
                    events.push(GameEvent::StatusApplied {
                        entity: target,
                        kind: StatusEffectKind::Burn,
                    });
                }
            }
            ItemKind::Sword => {
                if let Some(f) = self
                    .store
                    .get_mut(self.player)
                    .and_then(|p| p.fighter.as_mut())
                {
                    f.power += SWORD_POWER_BONUS;
                }
            }
            ItemKind::Armor => {
                if let Some(f) = self
                    .store
                    .get_mut(self.player)
                    .and_then(|p| p.fighter.as_mut())
                {
                    f.defense += ARMOR_DEFENSE_BONUS;
                }
            }
        }

        // Consumed on use.
        if let Some(inv) = self
            .store
            .get_mut(self.player)
            .and_then(|p| p.inventory.as_mut())
        {
            inv.remove(slot);
        }
        self.store.release(item_id);
        Ok(true)
    }

    /// Drives every live non-player entity in ascending id order. Entities
    /// killed earlier in the phase have already lost their `Ai` component
    /// and are skipped.
    fn resolve_ai(&mut self, events: &mut Vec<GameEvent>) -> DescentResult<()> {
        let actors: Vec<EntityId> = self
            .store
            .iter()
            .filter(|(id, e)| *id != self.player && e.ai.is_some())
            .map(|(id, _)| id)
            .collect();
        for actor in actors {
            let turn_events =
                ai::take_turn(&self.map, &mut self.store, &mut self.rng, actor, self.player)?;
            events.extend(turn_events);
        }
        Ok(())
    }

    fn resolve_environment(&mut self, events: &mut Vec<GameEvent>) -> DescentResult<()> {
        self.tick_statuses(events);
        self.spread_fire(events);
        self.apply_hazard_damage(events)?;
        self.tick_traps(events)?;
        Ok(())
    }

    fn tick_statuses(&mut self, events: &mut Vec<GameEvent>) {
        let afflicted: Vec<EntityId> = self
            .store
            .iter()
            .filter(|(_, e)| !e.status_effects.is_empty())
            .map(|(id, _)| id)
            .collect();
        for id in afflicted {
            let Some(entity) = self.store.get_mut(id) else {
                continue;
            };
            let (damage, expired) = tick_status_effects(entity);
            if damage > 0 {
                events.push(GameEvent::StatusDamage { entity: id, damage });
            }
            for kind in expired {
                events.push(GameEvent::StatusExpired { entity: id, kind });
            }
            let died = entity.fighter.as_ref().map(|f| f.is_dead()).unwrap_or(false);
            if died {
                entity.into_corpse();
                events.push(GameEvent::Died { entity: id });
            }
        }
    }

    /// Fire spreads from hazard tiles to cardinally adjacent flammable
    /// floors, one ring per turn.
    fn spread_fire(&mut self, events: &mut Vec<GameEvent>) {
        let mut catching = Vec::new();
        for pos in self.map.positions() {
            let is_hazard = self
                .map
                .tile(pos)
                .map(|t| t.kind == TileKind::Hazard)
                .unwrap_or(false);
            if !is_hazard {
                continue;
            }
            for next in pos.cardinal_adjacent_positions() {
                if let Some(tile) = self.map.tile(next) {
                    if tile.kind == TileKind::Floor && tile.flammable {
                        catching.push(next);
                    }
                }
            }
        }
        catching.sort();
        catching.dedup();
        for pos in catching {
            if let Some(tile) = self.map.tile_mut(pos) {
                tile.kind = TileKind::Hazard;
                tile.flammable = false;
            }
            events.push(GameEvent::FireSpread { position: pos });
        }
    }

    fn apply_hazard_damage(&mut self, events: &mut Vec<GameEvent>) -> DescentResult<()> {
        let exposed: Vec<EntityId> = self
            .store
            .iter()
            .filter(|(_, e)| {
                e.fighter.is_some()
                    && self
                        .map
                        .tile(e.position)
                        .map(|t| t.kind == TileKind::Hazard)
                        .unwrap_or(false)
            })
            .map(|(id, _)| id)
            .collect();
        for id in exposed {
            let Some(entity) = self.store.get_mut(id) else {
                continue;
            };
            let Some(fighter) = entity.fighter.as_mut() else {
                continue;
            };
            fighter.take_damage(HAZARD_DAMAGE);
            events.push(GameEvent::HazardDamage {
                entity: id,
                damage: HAZARD_DAMAGE,
            });
            if fighter.is_dead() {
                entity.into_corpse();
                events.push(GameEvent::Died { entity: id });
            }
        }
        Ok(())
    }

    /// Armed traps fire under any fighter standing on them, then rearm
    /// after a fixed number of turns.
    fn tick_traps(&mut self, events: &mut Vec<GameEvent>) -> DescentResult<()> {
        let occupants: Vec<(EntityId, Position)> = self
            .store
            .iter()
            .filter(|(_, e)| e.fighter.is_some())
            .map(|(id, e)| (id, e.position))
            .collect();

        for (id, pos) in occupants {
            let armed = self.map.tile(pos).map(|t| t.trap_armed).unwrap_or(false);
            if !armed {
                continue;
            }
            if let Some(tile) = self.map.tile_mut(pos) {
                tile.trap_armed = false;
                tile.trap_timer = TRAP_REARM_TURNS;
            }
            events.push(GameEvent::TrapTriggered {
                entity: id,
                position: pos,
            });
            let Some(entity) = self.store.get_mut(id) else {
                continue;
            };
            let Some(fighter) = entity.fighter.as_mut() else {
                continue;
            };
            fighter.take_damage(TRAP_DAMAGE);
            if fighter.is_dead() {
                entity.into_corpse();
                events.push(GameEvent::Died { entity: id });
            }
        }

        // Rearm countdowns, scanned in row-major order.
        for pos in self.map.positions().collect::<Vec<_>>() {
            if let Some(tile) = self.map.tile_mut(pos) {
                if !tile.trap_armed && tile.trap_timer > 0 {
                    tile.trap_timer -= 1;
                    if tile.trap_timer == 0 {
                        tile.trap_armed = true;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Fills a freshly generated level with monsters and loot, drawing from the
/// main stream in spawn-point order.
fn populate(
    store: &mut EntityStore,
    rng: &mut GameRng,
    tables: &SpawnTables,
    points: &SpawnPoints,
) -> DescentResult<()> {
    use rand::Rng as _;

    for &center in points.rooms.iter().skip(1) {
        if rng.gen_bool(ROOM_MONSTER_CHANCE) {
            let kind = *tables.monsters.pick(rng);
            store.spawn(monster_entity(kind, center));
        }
        if rng.gen_bool(ROOM_LOOT_CHANCE) {
            let kind = tables.roll_loot(rng)?;
            let pos = Position::new(center.x, center.y + 1);
            store.spawn(item_entity(kind, pos));
        }
    }
    for &pocket in &points.pockets {
        if rng.gen_bool(POCKET_MONSTER_CHANCE) {
            let kind = *tables.monsters.pick(rng);
            if store.blocking_entity_at(pocket).is_none() {
                store.spawn(monster_entity(kind, pocket));
            }
        }
    }
    Ok(())
}

fn monster_entity(kind: MonsterKind, pos: Position) -> Entity {
    Entity::new(pos, kind.glyph(), kind.color(), kind.name(), true)
        .with_fighter(kind.fighter())
        .with_ai(Ai::new(Faction::Hostile, kind.sight_radius()))
}

fn item_entity(kind: ItemKind, pos: Position) -> Entity {
    let (glyph, color, name) = match kind {
        ItemKind::Potion => ('!', (127, 0, 255), "healing potion"),
        ItemKind::Scroll => ('?', (0, 255, 255), "scroll of immolation"),
        ItemKind::Sword => ('/', (0, 191, 255), "sword"),
        ItemKind::Armor => ('[', (139, 69, 19), "chain mail"),
    };
    Entity::new(pos, glyph, color, name, false).with_item(kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sim(seed: u64) -> Simulation {
        Simulation::new(seed, 64, 64, GenerationProfile::default()).unwrap()
    }

    fn first_open_direction(sim: &Simulation) -> Option<Direction> {
        let pos = sim.entities().get(sim.player()).unwrap().position;
        Direction::all().into_iter().find(|d| {
            let t = pos + d.to_delta();
            sim.map().is_walkable(t) && sim.entities().blocking_entity_at(t).is_none()
        })
    }

    #[test]
    fn test_new_simulation_places_player_on_floor() {
        let sim = sim(42);
        let pos = sim.entities().get(sim.player()).unwrap().position;
        assert!(sim.map().is_walkable(pos));
        assert_eq!(sim.turn_number(), 0);
        assert_eq!(sim.depth(), 1);
    }

    #[test]
    fn test_wait_advances_turn() {
        let mut sim = sim(42);
        let result = sim.step_turn(PlayerIntent::Wait).unwrap();
        assert_eq!(result.turn_number, 1);
        assert_eq!(sim.phase(), TurnPhase::AwaitingPlayerIntent);
    }

    #[test]
    fn test_move_into_wall_rejects_turn() {
        let mut sim = sim(42);
        // Find a walled-off direction.
        let pos = sim.entities().get(sim.player()).unwrap().position;
        let blocked = Direction::all()
            .into_iter()
            .find(|d| !sim.map().is_walkable(pos + d.to_delta()));
        if let Some(dir) = blocked {
            let result = sim.step_turn(PlayerIntent::Move(dir)).unwrap();
            assert!(result.events.is_empty());
            assert_eq!(result.turn_number, 0);
            assert_eq!(sim.turn_number(), 0);
        }
    }

    #[test]
    fn test_use_item_on_empty_slot_rejects_turn() {
        let mut sim = sim(42);
        let result = sim.step_turn(PlayerIntent::UseItem(0)).unwrap();
        assert!(result.events.is_empty());
        assert_eq!(result.turn_number, 0);
    }

    #[test]
    fn test_attack_into_empty_air_rejects_turn() {
        let mut sim = sim(42);
        if let Some(dir) = first_open_direction(&sim) {
            let result = sim.step_turn(PlayerIntent::Attack(dir)).unwrap();
            assert!(result.events.is_empty());
            assert_eq!(result.turn_number, 0);
        }
    }

    #[test]
    fn test_move_emits_moved_event() {
        let mut sim = sim(42);
        let dir = first_open_direction(&sim).unwrap();
        let before = sim.entities().get(sim.player()).unwrap().position;
        let result = sim.step_turn(PlayerIntent::Move(dir)).unwrap();
        assert!(result
            .events
            .iter()
            .any(|e| matches!(e, GameEvent::Moved { entity, from, .. }
                if *entity == sim.player() && *from == before)));
    }

    #[test]
    fn test_bump_attack_damages_blocker() {
        let mut sim = sim(42);
        let pos = sim.entities().get(sim.player()).unwrap().position;
        let dir = first_open_direction(&sim).unwrap();
        let target = pos + dir.to_delta();
        let orc = sim
            .spawn_entity(monster_entity(MonsterKind::Orc, target))
            .unwrap();
        let hp_before = sim
            .entities()
            .get(orc)
            .unwrap()
            .fighter
            .as_ref()
            .unwrap()
            .hp;

        let result = sim.step_turn(PlayerIntent::Move(dir)).unwrap();
        assert!(result
            .events
            .iter()
            .any(|e| matches!(e, GameEvent::Attacked { defender, .. } if *defender == orc)));
        // Player did not move.
        assert_eq!(sim.entities().get(sim.player()).unwrap().position, pos);
        let hp_after = sim
            .entities()
            .get(orc)
            .map(|e| e.fighter.as_ref().map(|f| f.hp).unwrap_or(0))
            .unwrap_or(0);
        assert!(hp_after < hp_before);
    }

    #[test]
    fn test_auto_pickup_on_move() {
        let mut sim = sim(42);
        let pos = sim.entities().get(sim.player()).unwrap().position;
        let dir = first_open_direction(&sim).unwrap();
        let target = pos + dir.to_delta();
        let potion = sim
            .spawn_entity(item_entity(ItemKind::Potion, target))
            .unwrap();

        let result = sim.step_turn(PlayerIntent::Move(dir)).unwrap();
        assert!(result
            .events
            .iter()
            .any(|e| matches!(e, GameEvent::PickedUp { item, .. } if *item == potion)));
        let inv = sim
            .entities()
            .get(sim.player())
            .unwrap()
            .inventory
            .clone()
            .unwrap();
        assert!(inv.items.contains(&potion));
        // Off the grid now; a second pass over the tile finds nothing.
        assert!(sim.entities().items_at(target).is_empty());
    }

    #[test]
    fn test_potion_heals_and_is_consumed() {
        let mut sim = sim(42);
        let pos = sim.entities().get(sim.player()).unwrap().position;
        let dir = first_open_direction(&sim).unwrap();
        sim.spawn_entity(item_entity(ItemKind::Potion, pos + dir.to_delta()))
            .unwrap();
        sim.step_turn(PlayerIntent::Move(dir)).unwrap();

        // Wound the player, then drink.
        let player = sim.player;
        sim.store.get_mut(player).unwrap().fighter.as_mut().unwrap().hp = 10;
        let result = sim.step_turn(PlayerIntent::UseItem(0)).unwrap();
        assert!(result
            .events
            .iter()
            .any(|e| matches!(e, GameEvent::Healed { amount, .. } if *amount == POTION_HEAL)));
        assert_eq!(
            sim.entities()
                .get(sim.player())
                .unwrap()
                .fighter
                .as_ref()
                .unwrap()
                .hp,
            10 + POTION_HEAL
        );
        // Consumed: slot is gone.
        assert!(sim
            .entities()
            .get(sim.player())
            .unwrap()
            .inventory
            .as_ref()
            .unwrap()
            .items
            .is_empty());
    }

    #[test]
    fn test_sword_and_armor_grant_bonuses() {
        let mut sim = sim(42);
        let pos = sim.entities().get(sim.player()).unwrap().position;
        let dir = first_open_direction(&sim).unwrap();
        sim.spawn_entity(item_entity(ItemKind::Sword, pos + dir.to_delta()))
            .unwrap();
        sim.step_turn(PlayerIntent::Move(dir)).unwrap();
        sim.step_turn(PlayerIntent::UseItem(0)).unwrap();

        let fighter = sim
            .entities()
            .get(sim.player())
            .unwrap()
            .fighter
            .clone()
            .unwrap();
        assert_eq!(fighter.power, config::PLAYER_POWER + SWORD_POWER_BONUS);
    }

    #[test]
    fn test_scroll_burns_visible_enemies() {
        let mut sim = sim(42);
        let pos = sim.entities().get(sim.player()).unwrap().position;
        let dir = first_open_direction(&sim).unwrap();
        let item_pos = pos + dir.to_delta();
        sim.spawn_entity(item_entity(ItemKind::Scroll, item_pos))
            .unwrap();
        sim.step_turn(PlayerIntent::Move(dir)).unwrap();

        // Place a victim right next to the player so it is surely visible.
        let victim_pos = Direction::all()
            .into_iter()
            .map(|d| item_pos + d.to_delta())
            .find(|&p| sim.map().is_walkable(p) && sim.entities().blocking_entity_at(p).is_none())
            .unwrap();
        let victim = sim
            .spawn_entity(monster_entity(MonsterKind::Zombie, victim_pos))
            .unwrap();

        let result = sim.step_turn(PlayerIntent::UseItem(0)).unwrap();
        assert!(result.events.iter().any(|e| matches!(
            e,
            GameEvent::StatusApplied { entity, kind: StatusEffectKind::Burn } if *entity == victim
        )));
        assert!(sim
            .entities()
            .get(victim)
            .unwrap()
            .status_effect(StatusEffectKind::Burn)
            .is_some());
    }

    #[test]
    fn test_spawn_entity_rejects_wall_position() {
        let mut sim = sim(42);
        let err = sim
            .spawn_entity(monster_entity(MonsterKind::Rat, Position::new(0, 0)))
            .unwrap_err();
        assert!(matches!(err, DescentError::InvalidPosition { .. }));
    }

    #[test]
    fn test_descend_migrates_only_player() {
        let mut sim = sim(42);
        // Wound the player so the migration is observable.
        sim.store
            .get_mut(sim.player)
            .unwrap()
            .fighter
            .as_mut()
            .unwrap()
            .hp = 17;
        let events = sim.descend().unwrap();
        assert!(matches!(events[0], GameEvent::Descended { depth: 2 }));
        assert_eq!(sim.depth(), 2);
        // Wounds carried over.
        assert_eq!(
            sim.entities()
                .get(sim.player())
                .unwrap()
                .fighter
                .as_ref()
                .unwrap()
                .hp,
            17
        );
        // No entity from the old level survives except the player and its
        // held items.
        for (id, e) in sim.entities().iter() {
            if id == sim.player() {
                continue;
            }
            assert!(e.ai.is_some() || e.item.is_some());
        }
    }

    #[test]
    fn test_descend_uses_prefetched_level() {
        let mut a = sim(42);
        let mut b = sim(42);
        a.prefetch_next_level();
        a.descend().unwrap();
        b.descend().unwrap();
        for (ta, tb) in a.map().tiles().iter().zip(b.map().tiles()) {
            assert_eq!(ta.kind, tb.kind);
        }
    }

    #[test]
    fn test_hazard_damages_occupant() {
        let mut sim = sim(42);
        let pos = sim.entities().get(sim.player()).unwrap().position;
        if let Some(tile) = sim.map.tile_mut(pos) {
            tile.kind = TileKind::Hazard;
        }
        let hp_before = sim
            .entities()
            .get(sim.player())
            .unwrap()
            .fighter
            .as_ref()
            .unwrap()
            .hp;
        let result = sim.step_turn(PlayerIntent::Wait).unwrap();
        assert!(result
            .events
            .iter()
            .any(|e| matches!(e, GameEvent::HazardDamage { .. })));
        let hp_after = sim
            .entities()
            .get(sim.player())
            .unwrap()
            .fighter
            .as_ref()
            .unwrap()
            .hp;
        assert_eq!(hp_after, hp_before - HAZARD_DAMAGE);
    }

    #[test]
    fn test_trap_fires_once_then_rearms() {
        let mut sim = sim(42);
        let pos = sim.entities().get(sim.player()).unwrap().position;
        let dir = first_open_direction(&sim).unwrap();
        let trap_pos = pos + dir.to_delta();
        if let Some(tile) = sim.map.tile_mut(trap_pos) {
            tile.trap_armed = true;
        }

        // Step onto the trap: it fires and disarms.
        let result = sim.step_turn(PlayerIntent::Move(dir)).unwrap();
        assert!(result
            .events
            .iter()
            .any(|e| matches!(e, GameEvent::TrapTriggered { position, .. } if *position == trap_pos)));
        assert!(!sim.map().tile(trap_pos).unwrap().trap_armed);

        // Step back off, then wait out the rearm timer.
        let back = Direction::from_delta(pos - trap_pos).unwrap();
        sim.step_turn(PlayerIntent::Move(back)).unwrap();
        for _ in 0..TRAP_REARM_TURNS {
            sim.step_turn(PlayerIntent::Wait).unwrap();
        }
        assert!(sim.map().tile(trap_pos).unwrap().trap_armed);
    }

    #[test]
    fn test_fire_spreads_to_flammable_neighbors() {
        let mut sim = sim(42);
        let pos = sim.entities().get(sim.player()).unwrap().position;
        let dir = first_open_direction(&sim).unwrap();
        let hazard_pos = pos + dir.to_delta();
        let neighbor = hazard_pos
            .cardinal_adjacent_positions()
            .into_iter()
            .find(|&p| p != pos && sim.map().tile(p).map(|t| t.kind == TileKind::Floor).unwrap_or(false))
            .unwrap();
        if let Some(tile) = sim.map.tile_mut(hazard_pos) {
            tile.kind = TileKind::Hazard;
        }
        if let Some(tile) = sim.map.tile_mut(neighbor) {
            tile.flammable = true;
        }

        let result = sim.step_turn(PlayerIntent::Wait).unwrap();
        assert!(result
            .events
            .iter()
            .any(|e| matches!(e, GameEvent::FireSpread { position } if *position == neighbor)));
        assert_eq!(sim.map().tile(neighbor).unwrap().kind, TileKind::Hazard);
    }
}
