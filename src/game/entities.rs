//! # Entity Store
//!
//! Generational arena owning every entity in the simulation.
//!
//! Entities are addressed by [`EntityId`], an index/generation pair. A slot
//! is reused only after explicit release, and the generation increments on
//! reuse, so a stale id held by an AI target field can never alias a new
//! entity that happens to occupy the same slot. Component presence is
//! modeled as fixed optional slots per known component kind rather than a
//! dynamic keyed lookup.

use crate::config;
use crate::Position;
use serde::{Deserialize, Serialize};

/// Stable identifier for a game entity.
///
/// Two ids with the same index but different generations refer to
/// different entities; lookups against a released slot return `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId {
    index: u32,
    generation: u32,
}

impl EntityId {
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

/// Combat statistics component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fighter {
    pub hp: i32,
    pub max_hp: i32,
    pub defense: i32,
    pub power: i32,
}

impl Fighter {
    pub fn new(hp: i32, defense: i32, power: i32) -> Self {
        Self {
            hp,
            max_hp: hp,
            defense,
            power,
        }
    }

    /// Applies raw damage, clamping hp at zero.
    pub fn take_damage(&mut self, amount: i32) {
        self.hp = (self.hp - amount).max(0);
    }

    /// Restores hp up to the maximum. Returns the amount actually healed.
    pub fn heal(&mut self, amount: i32) -> i32 {
        let healed = amount.min(self.max_hp - self.hp);
        self.hp += healed;
        healed
    }

    pub fn is_dead(&self) -> bool {
        self.hp <= 0
    }
}

/// Ordered item container component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub items: Vec<EntityId>,
    pub capacity: usize,
}

impl Inventory {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            capacity: config::INVENTORY_CAPACITY,
        }
    }

    /// Adds an item reference if there is a free slot.
    pub fn add(&mut self, item: EntityId) -> bool {
        if self.items.len() >= self.capacity {
            return false;
        }
        self.items.push(item);
        true
    }

    /// Removes and returns the item in the given slot, if occupied.
    pub fn remove(&mut self, slot: usize) -> Option<EntityId> {
        if slot < self.items.len() {
            Some(self.items.remove(slot))
        } else {
            None
        }
    }
}

impl Default for Inventory {
    fn default() -> Self {
        Self::new()
    }
}

/// Finite-state-machine states for AI-driven entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AiState {
    Idle,
    Alert,
    Flee,
}

/// Disposition category governing default engagement rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Faction {
    Hostile,
    Neutral,
    Friendly,
}

/// AI behavior component.
///
/// `target` is a weak reference: when the target entity is destroyed the id
/// stops resolving and the controller falls back to `Idle` rather than
/// erroring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ai {
    pub state: AiState,
    pub faction: Faction,
    pub target: Option<EntityId>,
    /// Radius of random wandering while idle
    pub wander_radius: u32,
    /// How far this entity can see
    pub sight_radius: u32,
    /// Set when the entity takes damage; lets Neutral entities retaliate
    pub provoked: bool,
}

impl Ai {
    pub fn new(faction: Faction, sight_radius: u32) -> Self {
        Self {
            state: AiState::Idle,
            faction,
            target: None,
            wander_radius: 5,
            sight_radius,
            provoked: false,
        }
    }
}

/// Kinds of status effects that can stack on a fighter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusEffectKind {
    Bleed,
    Poison,
    Burn,
}

impl StatusEffectKind {
    /// Maximum stack count for this kind.
    pub fn max_stacks(self) -> u32 {
        match self {
            StatusEffectKind::Bleed => 5,
            StatusEffectKind::Poison => 3,
            StatusEffectKind::Burn => 1,
        }
    }

    /// Damage dealt per stack per environment tick.
    pub fn damage_per_stack(self) -> i32 {
        match self {
            StatusEffectKind::Bleed => 1,
            StatusEffectKind::Poison => 2,
            StatusEffectKind::Burn => 3,
        }
    }

    /// Whether a reapplication adds a stack or refreshes the duration.
    pub fn stacks_on_reapply(self) -> bool {
        match self {
            StatusEffectKind::Bleed | StatusEffectKind::Poison => true,
            StatusEffectKind::Burn => false,
        }
    }
}

/// An active status effect on an entity. At most one stack record exists
/// per kind; reapplication mutates it per the kind's rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEffectStack {
    pub kind: StatusEffectKind,
    pub count: u32,
    pub remaining: u32,
}

/// Item categories, for entities that can be carried and used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemKind {
    /// Heals the user
    Potion,
    /// Burns every visible enemy in range when read
    Scroll,
    /// Grants a power bonus when used (equipped)
    Sword,
    /// Grants a defense bonus when used (equipped)
    Armor,
}

/// A simulated entity: position, display descriptor, and component slots.
///
/// The display fields (glyph, color, name) are opaque to the core; they
/// exist so rendering and messages have something to show.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub position: Position,
    pub glyph: char,
    pub color: (u8, u8, u8),
    pub name: String,
    pub blocks_movement: bool,
    pub fighter: Option<Fighter>,
    pub inventory: Option<Inventory>,
    pub ai: Option<Ai>,
    pub item: Option<ItemKind>,
    pub status_effects: Vec<StatusEffectStack>,
}

impl Entity {
    /// Creates a bare entity with no components attached.
    pub fn new(
        position: Position,
        glyph: char,
        color: (u8, u8, u8),
        name: impl Into<String>,
        blocks_movement: bool,
    ) -> Self {
        Self {
            position,
            glyph,
            color,
            name: name.into(),
            blocks_movement,
            fighter: None,
            inventory: None,
            ai: None,
            item: None,
            status_effects: Vec::new(),
        }
    }

    pub fn with_fighter(mut self, fighter: Fighter) -> Self {
        self.fighter = Some(fighter);
        self
    }

    pub fn with_inventory(mut self) -> Self {
        self.inventory = Some(Inventory::new());
        self
    }

    pub fn with_ai(mut self, ai: Ai) -> Self {
        self.ai = Some(ai);
        self
    }

    pub fn with_item(mut self, kind: ItemKind) -> Self {
        self.item = Some(kind);
        self
    }

    /// Looks up the active stack record for a status effect kind.
    pub fn status_effect(&self, kind: StatusEffectKind) -> Option<&StatusEffectStack> {
        self.status_effects.iter().find(|s| s.kind == kind)
    }

    /// Turns a dead fighter into an inert corpse record: no longer blocks,
    /// no longer fights, no longer thinks.
    pub fn into_corpse(&mut self) {
        self.name = format!("remains of {}", self.name);
        self.glyph = '%';
        self.color = (128, 0, 0);
        self.blocks_movement = false;
        self.fighter = None;
        self.ai = None;
        self.status_effects.clear();
    }
}

/// Arena of entities indexed by stable generational ids.
///
/// Iteration orders are always ascending slot index, which keeps every
/// per-turn sweep deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityStore {
    slots: Vec<Option<Entity>>,
    generations: Vec<u32>,
    free: Vec<u32>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entity, reusing a released slot if one is available.
    pub fn spawn(&mut self, entity: Entity) -> EntityId {
        if let Some(index) = self.free.pop() {
            self.slots[index as usize] = Some(entity);
            EntityId {
                index,
                generation: self.generations[index as usize],
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Some(entity));
            self.generations.push(0);
            EntityId {
                index,
                generation: 0,
            }
        }
    }

    /// Releases an entity, invalidating its id and making the slot
    /// available for reuse. Returns true if the entity existed.
    pub fn release(&mut self, id: EntityId) -> bool {
        if !self.contains(id) {
            return false;
        }
        self.slots[id.index as usize] = None;
        self.generations[id.index as usize] += 1;
        self.free.push(id.index);
        true
    }

    /// Whether the id refers to a live slot of the matching generation.
    pub fn contains(&self, id: EntityId) -> bool {
        self.slots
            .get(id.index as usize)
            .map(|slot| slot.is_some() && self.generations[id.index as usize] == id.generation)
            .unwrap_or(false)
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        if self.contains(id) {
            self.slots[id.index as usize].as_ref()
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        if self.contains(id) {
            self.slots[id.index as usize].as_mut()
        } else {
            None
        }
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates live ids in ascending slot order.
    pub fn ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.as_ref().map(|_| EntityId {
                index: i as u32,
                generation: self.generations[i],
            })
        })
    }

    /// Iterates (id, entity) pairs in ascending slot order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &Entity)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.as_ref().map(|e| {
                (
                    EntityId {
                        index: i as u32,
                        generation: self.generations[i],
                    },
                    e,
                )
            })
        })
    }

    /// First live entity at the given position, in slot order.
    pub fn entity_at(&self, position: Position) -> Option<EntityId> {
        self.iter()
            .find(|(_, e)| e.position == position)
            .map(|(id, _)| id)
    }

    /// First movement-blocking entity at the given position.
    pub fn blocking_entity_at(&self, position: Position) -> Option<EntityId> {
        self.iter()
            .find(|(_, e)| e.position == position && e.blocks_movement)
            .map(|(id, _)| id)
    }

    /// All non-blocking item entities at the given position.
    pub fn items_at(&self, position: Position) -> Vec<EntityId> {
        self.iter()
            .filter(|(_, e)| e.position == position && e.item.is_some())
            .map(|(id, _)| id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy(pos: Position) -> Entity {
        Entity::new(pos, 'x', (255, 255, 255), "dummy", true)
    }

    #[test]
    fn test_spawn_and_lookup() {
        let mut store = EntityStore::new();
        let id = store.spawn(dummy(Position::new(1, 2)));
        assert!(store.contains(id));
        assert_eq!(store.get(id).unwrap().position, Position::new(1, 2));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_release_invalidates_id() {
        let mut store = EntityStore::new();
        let id = store.spawn(dummy(Position::new(0, 0)));
        assert!(store.release(id));
        assert!(!store.contains(id));
        assert!(store.get(id).is_none());
        // Double release is a no-op.
        assert!(!store.release(id));
    }

    #[test]
    fn test_slot_reuse_bumps_generation() {
        let mut store = EntityStore::new();
        let old = store.spawn(dummy(Position::new(0, 0)));
        store.release(old);
        let new = store.spawn(dummy(Position::new(3, 3)));
        assert_eq!(old.index(), new.index());
        assert_ne!(old.generation(), new.generation());
        // The stale id must not resolve to the new entity.
        assert!(store.get(old).is_none());
        assert!(store.get(new).is_some());
    }

    #[test]
    fn test_ids_iterate_in_slot_order() {
        let mut store = EntityStore::new();
        let a = store.spawn(dummy(Position::new(0, 0)));
        let b = store.spawn(dummy(Position::new(1, 0)));
        let c = store.spawn(dummy(Position::new(2, 0)));
        store.release(b);
        let ids: Vec<EntityId> = store.ids().collect();
        assert_eq!(ids, vec![a, c]);
    }

    #[test]
    fn test_blocking_lookup() {
        let mut store = EntityStore::new();
        let pos = Position::new(4, 4);
        let mut item = dummy(pos);
        item.blocks_movement = false;
        item.item = Some(ItemKind::Potion);
        store.spawn(item);
        let blocker = store.spawn(dummy(pos));

        assert_eq!(store.blocking_entity_at(pos), Some(blocker));
        assert_eq!(store.items_at(pos).len(), 1);
    }

    #[test]
    fn test_inventory_capacity() {
        let mut store = EntityStore::new();
        let mut inv = Inventory::new();
        for _ in 0..inv.capacity {
            let id = store.spawn(dummy(Position::new(0, 0)));
            assert!(inv.add(id));
        }
        let overflow = store.spawn(dummy(Position::new(0, 0)));
        assert!(!inv.add(overflow));
    }

    #[test]
    fn test_corpse_conversion() {
        let mut e = dummy(Position::new(1, 1))
            .with_fighter(Fighter::new(10, 0, 3))
            .with_ai(Ai::new(Faction::Hostile, 8));
        e.into_corpse();
        assert!(!e.blocks_movement);
        assert!(e.fighter.is_none());
        assert!(e.ai.is_none());
        assert!(e.name.starts_with("remains of"));
    }
}
