//! Experience Curve and Level Scaling
//!
//! Pure progression math: how much experience a level-up costs, how a
//! batch of earned experience is consumed, and how base stats scale with
//! the owner's persistent level.

/// Experience required to advance from `level` to `level + 1`.
///
/// 100 at level 1, growing 10% cumulatively per level
/// (`100 * 1.1^(level - 1)`, truncated).
pub fn exp_to_next_level(level: u32) -> u32 {
    (100.0 * 1.1f64.powi(level.saturating_sub(1) as i32)) as u32
}

/// Result of applying an experience delta to an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelProgress {
    /// Level after the award.
    pub level: u32,
    /// Remaining experience inside the new level.
    pub exp: u32,
    /// Whether at least one level-up occurred.
    pub leveled_up: bool,
}

/// Apply `earned` experience to a player at `level` with `exp` banked.
///
/// A single large award may trigger several sequential level-ups; each
/// step consumes exactly its own requirement and the remainder rolls
/// forward into the new level.
pub fn apply_experience(level: u32, exp: u32, earned: u32) -> LevelProgress {
    let mut level = level.max(1);
    let mut exp = exp + earned;
    let mut leveled_up = false;

    while exp >= exp_to_next_level(level) {
        exp -= exp_to_next_level(level);
        level += 1;
        leveled_up = true;
    }

    LevelProgress {
        level,
        exp,
        leveled_up,
    }
}

/// Scale a base stat by the owner's persistent level.
///
/// `base * 1.1^(level - 1)`, truncated. Level 1 leaves the stat untouched.
/// Computed once at instantiation time; never re-derived mid-match.
pub fn scale_stat(base: i32, level: u32) -> i32 {
    (base as f64 * 1.1f64.powi(level.saturating_sub(1) as i32)) as i32
}
