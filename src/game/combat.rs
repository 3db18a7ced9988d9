//! # Combat Resolver
//!
//! Hit resolution, damage application, death handling, and status-effect
//! stacking rules.
//!
//! Damage follows the classic formula: attacker power minus defender
//! defense, plus a uniform variance of [-2, 2] drawn from the simulation's
//! random stream, floored at 1 on any successful hit.

use crate::{
    DescentError, DescentResult, Entity, EntityId, EntityStore, StatusEffectKind,
    StatusEffectStack,
};
use log::debug;
use rand::Rng;

/// Uniform variance added to every damage roll.
const DAMAGE_VARIANCE: std::ops::RangeInclusive<i32> = -2..=2;

/// Fraction of max hp below which an entity is considered critically
/// wounded (drives the Alert -> Flee transition).
pub const FLEE_HP_FRACTION: f64 = 0.25;

/// The result of one resolved attack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttackOutcome {
    pub attacker: EntityId,
    pub defender: EntityId,
    pub damage: i32,
    pub defender_died: bool,
}

/// Result of applying a status effect to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusApplyResult {
    /// First application of this kind
    Added,
    /// Stack count incremented (stacking kinds below their cap)
    Stacked(u32),
    /// Duration reset (refresh kinds, or implicit for stacking kinds)
    Refreshed,
    /// Already at the kind's cap; application had no effect
    AtCap,
}

/// Resolves a single melee attack between two fighters.
///
/// Both entities must carry a `Fighter` component; otherwise the call fails
/// with [`DescentError::MissingComponent`] and no state changes (in
/// particular, nothing is drawn from the random stream).
///
/// On a hit, damage is applied immediately. A defender reduced to 0 hp is
/// converted to a corpse record in place: it stops blocking movement and
/// loses its `Fighter` and `Ai` components, so later iteration within the
/// same turn phase skips it naturally.
pub fn resolve_attack(
    store: &mut EntityStore,
    rng: &mut impl Rng,
    attacker: EntityId,
    defender: EntityId,
) -> DescentResult<AttackOutcome> {
    let power = store
        .get(attacker)
        .and_then(|e| e.fighter.as_ref())
        .map(|f| f.power)
        .ok_or(DescentError::MissingComponent {
            entity: attacker,
            component: "Fighter",
        })?;
    let defense = store
        .get(defender)
        .and_then(|e| e.fighter.as_ref())
        .map(|f| f.defense)
        .ok_or(DescentError::MissingComponent {
            entity: defender,
            component: "Fighter",
        })?;

    let variance = rng.gen_range(DAMAGE_VARIANCE);
    let damage = (power - defense + variance).max(1);

    let target = store
        .get_mut(defender)
        .ok_or(DescentError::InvalidState("defender vanished".to_string()))?;
    let fighter = target
        .fighter
        .as_mut()
        .ok_or(DescentError::InvalidState("defender lost Fighter".to_string()))?;
    fighter.take_damage(damage);
    let defender_died = fighter.is_dead();

    if let Some(ai) = target.ai.as_mut() {
        // Taking damage provokes Neutral entities into engaging.
        ai.provoked = true;
    }

    if defender_died {
        debug!("entity {:?} killed by {:?}", defender, attacker);
        target.into_corpse();
    }

    Ok(AttackOutcome {
        attacker,
        defender,
        damage,
        defender_died,
    })
}

/// Applies a status effect to an entity carrying a `Fighter`.
///
/// A new application of an already-present kind either increments the stack
/// count (stacking kinds) or refreshes the duration (refresh kinds);
/// exceeding the kind's cap is a no-op, not an error.
pub fn apply_status_effect(
    store: &mut EntityStore,
    target: EntityId,
    kind: StatusEffectKind,
    duration: u32,
) -> DescentResult<StatusApplyResult> {
    let entity = store.get_mut(target).ok_or(DescentError::InvalidState(
        "status effect target vanished".to_string(),
    ))?;
    if entity.fighter.is_none() {
        return Err(DescentError::MissingComponent {
            entity: target,
            component: "Fighter",
        });
    }
    Ok(apply_status_to_entity(entity, kind, duration))
}

fn apply_status_to_entity(
    entity: &mut Entity,
    kind: StatusEffectKind,
    duration: u32,
) -> StatusApplyResult {
    if let Some(stack) = entity.status_effects.iter_mut().find(|s| s.kind == kind) {
        if kind.stacks_on_reapply() {
            if stack.count >= kind.max_stacks() {
                return StatusApplyResult::AtCap;
            }
            stack.count += 1;
            stack.remaining = duration;
            StatusApplyResult::Stacked(stack.count)
        } else {
            stack.remaining = duration;
            StatusApplyResult::Refreshed
        }
    } else {
        entity.status_effects.push(StatusEffectStack {
            kind,
            count: 1,
            remaining: duration,
        });
        StatusApplyResult::Added
    }
}

/// One environment tick of an entity's status effects.
///
/// Deals per-stack damage, decays durations, and drops expired stacks.
/// Returns the total damage dealt and the kinds that expired this tick.
/// The caller is responsible for death handling if the damage is lethal.
pub fn tick_status_effects(entity: &mut Entity) -> (i32, Vec<StatusEffectKind>) {
    let mut total = 0;
    let mut expired = Vec::new();
    for stack in &mut entity.status_effects {
        total += stack.count as i32 * stack.kind.damage_per_stack();
        stack.remaining = stack.remaining.saturating_sub(1);
        if stack.remaining == 0 {
            expired.push(stack.kind);
        }
    }
    entity.status_effects.retain(|s| s.remaining > 0);
    if let Some(fighter) = entity.fighter.as_mut() {
        fighter.take_damage(total);
    }
    (total, expired)
}

/// Whether a fighter is below the flee threshold.
pub fn below_flee_threshold(entity: &Entity) -> bool {
    entity
        .fighter
        .as_ref()
        .map(|f| (f.hp as f64) < (f.max_hp as f64) * FLEE_HP_FRACTION)
        .unwrap_or(false)
}
