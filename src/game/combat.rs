//! Combat Resolution
//!
//! Pure damage and healing math. Every HP mutation in the simulation
//! routes through this module so clamping rules live in one place.

use rand::Rng;

/// Multiplier applied to ATK on a critical hit, before DEF subtraction.
pub const CRIT_MULTIPLIER: f64 = 1.2;

/// Outcome of a single attack roll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DamageRoll {
    /// Final damage, never negative.
    pub amount: i32,
    /// Whether the crit draw succeeded.
    pub critical: bool,
}

/// Resolve one attack.
///
/// Base damage is `max(0, atk - def)`. When `can_crit` holds and the
/// uniform draw lands below `crit_chance`, ATK is multiplied by
/// [`CRIT_MULTIPLIER`] and truncated before DEF is subtracted. DEF is
/// applied after the multiplier, so a crit against heavy armor can still
/// deal zero.
pub fn compute_damage(
    atk: i32,
    def: i32,
    can_crit: bool,
    crit_chance: f64,
    rng: &mut impl Rng,
) -> DamageRoll {
    if can_crit && rng.gen::<f64>() < crit_chance {
        let boosted = (atk as f64 * CRIT_MULTIPLIER) as i32;
        DamageRoll {
            amount: (boosted - def).max(0),
            critical: true,
        }
    } else {
        DamageRoll {
            amount: (atk - def).max(0),
            critical: false,
        }
    }
}

/// Subtract damage from an HP pool, clamping at zero.
pub fn apply_damage(hp: &mut i32, amount: i32) {
    *hp = (*hp - amount).max(0);
}

/// Add healing to an HP pool, clamping at `max_hp`.
///
/// Returns the amount actually restored.
pub fn apply_heal(hp: &mut i32, max_hp: i32, amount: i32) -> i32 {
    let before = *hp;
    *hp = (*hp + amount).min(max_hp);
    *hp - before
}
