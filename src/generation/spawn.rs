//! # Spawn and Loot Tables
//!
//! Weighted selection with strict weight validation, plus the depth
//! brackets that decide which monsters and loot rarities a level draws
//! from. Selection walks cumulative ranges in declaration order, so two
//! builds of the same table pick identically for the same draw.

use crate::{DescentError, DescentResult, Fighter, ItemKind};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Tolerance when validating that weights sum to 1.
const WEIGHT_EPSILON: f64 = 1e-9;

/// A discrete distribution over `T`.
///
/// Construction fails with [`DescentError::Configuration`] unless the
/// weights sum to exactly 1 within a small epsilon; a malformed table is a
/// content bug worth failing loudly on, not something to renormalize
/// silently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightedTable<T> {
    entries: Vec<(T, f64)>,
}

impl<T: Clone> WeightedTable<T> {
    pub fn new(entries: Vec<(T, f64)>) -> DescentResult<Self> {
        if entries.is_empty() {
            return Err(DescentError::Configuration(
                "weighted table needs at least one entry".to_string(),
            ));
        }
        if entries.iter().any(|(_, w)| *w < 0.0) {
            return Err(DescentError::Configuration(
                "weighted table weights must be non-negative".to_string(),
            ));
        }
        let total: f64 = entries.iter().map(|(_, w)| w).sum();
        if (total - 1.0).abs() > WEIGHT_EPSILON {
            return Err(DescentError::Configuration(format!(
                "weighted table weights sum to {total}, expected 1"
            )));
        }
        Ok(Self { entries })
    }

    /// Draws one entry. Cumulative ranges are walked in declaration order;
    /// the final entry absorbs any floating-point remainder.
    pub fn pick(&self, rng: &mut impl Rng) -> &T {
        let roll: f64 = rng.gen_range(0.0..1.0);
        let mut cumulative = 0.0;
        for (value, weight) in &self.entries {
            cumulative += weight;
            if roll < cumulative {
                return value;
            }
        }
        &self.entries[self.entries.len() - 1].0
    }

    pub fn entries(&self) -> &[(T, f64)] {
        &self.entries
    }
}

/// The monster roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MonsterKind {
    Rat,
    Kobold,
    Orc,
    Zombie,
    Troll,
}

impl MonsterKind {
    pub fn name(self) -> &'static str {
        match self {
            MonsterKind::Rat => "rat",
            MonsterKind::Kobold => "kobold",
            MonsterKind::Orc => "orc",
            MonsterKind::Zombie => "zombie",
            MonsterKind::Troll => "troll",
        }
    }

    pub fn glyph(self) -> char {
        match self {
            MonsterKind::Rat => 'r',
            MonsterKind::Kobold => 'k',
            MonsterKind::Orc => 'o',
            MonsterKind::Zombie => 'z',
            MonsterKind::Troll => 'T',
        }
    }

    pub fn color(self) -> (u8, u8, u8) {
        match self {
            MonsterKind::Rat => (139, 101, 8),
            MonsterKind::Kobold => (178, 34, 34),
            MonsterKind::Orc => (63, 127, 63),
            MonsterKind::Zombie => (112, 128, 105),
            MonsterKind::Troll => (0, 127, 0),
        }
    }

    pub fn fighter(self) -> Fighter {
        match self {
            MonsterKind::Rat => Fighter::new(6, 0, 2),
            MonsterKind::Kobold => Fighter::new(8, 0, 3),
            MonsterKind::Orc => Fighter::new(16, 1, 4),
            MonsterKind::Zombie => Fighter::new(20, 0, 3),
            MonsterKind::Troll => Fighter::new(30, 2, 8),
        }
    }

    /// Per-kind sight radius: trolls smell far, zombies barely notice.
    pub fn sight_radius(self) -> u32 {
        match self {
            MonsterKind::Troll => 12,
            MonsterKind::Orc => 10,
            MonsterKind::Zombie => 6,
            _ => 8,
        }
    }
}

/// Loot rarity tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
}

/// Monster distribution for a depth bracket.
pub fn monster_table(depth: u32) -> DescentResult<WeightedTable<MonsterKind>> {
    let weights = match depth {
        0..=3 => [0.4, 0.3, 0.2, 0.08, 0.02],
        4..=6 => [0.2, 0.25, 0.3, 0.15, 0.1],
        _ => [0.05, 0.15, 0.35, 0.25, 0.2],
    };
    WeightedTable::new(vec![
        (MonsterKind::Rat, weights[0]),
        (MonsterKind::Kobold, weights[1]),
        (MonsterKind::Orc, weights[2]),
        (MonsterKind::Zombie, weights[3]),
        (MonsterKind::Troll, weights[4]),
    ])
}

/// Rarity distribution for a depth bracket. The global 0.70/0.25/0.05
/// split holds until the deep floors, which skew richer.
pub fn rarity_table(depth: u32) -> DescentResult<WeightedTable<Rarity>> {
    let weights = match depth {
        0..=6 => [0.70, 0.25, 0.05],
        _ => [0.60, 0.30, 0.10],
    };
    WeightedTable::new(vec![
        (Rarity::Common, weights[0]),
        (Rarity::Uncommon, weights[1]),
        (Rarity::Rare, weights[2]),
    ])
}

/// Item distribution within a rarity tier.
pub fn loot_table(rarity: Rarity) -> DescentResult<WeightedTable<ItemKind>> {
    match rarity {
        Rarity::Common => WeightedTable::new(vec![
            (ItemKind::Potion, 0.8),
            (ItemKind::Scroll, 0.2),
        ]),
        Rarity::Uncommon => WeightedTable::new(vec![
            (ItemKind::Scroll, 0.4),
            (ItemKind::Sword, 0.35),
            (ItemKind::Armor, 0.25),
        ]),
        Rarity::Rare => WeightedTable::new(vec![
            (ItemKind::Sword, 0.5),
            (ItemKind::Armor, 0.5),
        ]),
    }
}

/// The per-depth tables a simulation draws from when populating a level.
#[derive(Debug, Clone)]
pub struct SpawnTables {
    pub monsters: WeightedTable<MonsterKind>,
    pub rarity: WeightedTable<Rarity>,
}

impl SpawnTables {
    pub fn for_depth(depth: u32) -> DescentResult<Self> {
        Ok(Self {
            monsters: monster_table(depth)?,
            rarity: rarity_table(depth)?,
        })
    }

    /// Draws a loot item: rarity tier first, then the item within it.
    pub fn roll_loot(&self, rng: &mut impl Rng) -> DescentResult<ItemKind> {
        let rarity = *self.rarity.pick(rng);
        Ok(*loot_table(rarity)?.pick(rng))
    }
}
