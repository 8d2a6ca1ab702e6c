//! Target Selection
//!
//! Deterministic targeting rules for troops, towers, and the queen heal.
//! All selections break ties on a stable key (tower id string, troop
//! instance id) so identical states produce identical picks.

use std::collections::BTreeMap;

use crate::game::state::{ActiveTroop, PlayerSlot, TowerInstance, TowerKind};

/// Pick the tower a troop owned by `attacker` should hit.
///
/// While the enemy's first guard tower stands, it is the only legal
/// target. Once it falls, the lowest-HP alive enemy tower is chosen,
/// ties broken by tower id.
pub fn select_tower_target(towers: &[TowerInstance], attacker: PlayerSlot) -> Option<usize> {
    let enemy = attacker.opponent();

    if let Some(gate) = towers
        .iter()
        .position(|t| t.owner == enemy && t.kind == TowerKind::Guard1 && t.is_alive())
    {
        return Some(gate);
    }

    towers
        .iter()
        .enumerate()
        .filter(|(_, t)| t.owner == enemy && t.is_alive())
        .min_by(|(_, a), (_, b)| a.hp.cmp(&b.hp).then_with(|| a.id.cmp(&b.id)))
        .map(|(i, _)| i)
}

/// Pick the troop a tower owned by `tower_owner` should hit: the
/// oldest-deployed live enemy troop, ties broken by instance id.
pub fn select_troop_target(
    troops: &BTreeMap<u64, ActiveTroop>,
    tower_owner: PlayerSlot,
) -> Option<u64> {
    troops
        .values()
        .filter(|t| t.owner != tower_owner)
        .min_by(|a, b| a.deployed_at.cmp(&b.deployed_at).then(a.id.cmp(&b.id)))
        .map(|t| t.id)
}

/// Pick the friendly tower a queen deploy should heal: alive, below max
/// HP, lowest HP first, ties broken by tower id. `None` when every
/// friendly tower is destroyed or at full HP.
pub fn select_heal_target(towers: &[TowerInstance], owner: PlayerSlot) -> Option<usize> {
    towers
        .iter()
        .enumerate()
        .filter(|(_, t)| t.owner == owner && t.is_alive() && t.hp < t.max_hp)
        .min_by(|(_, a), (_, b)| a.hp.cmp(&b.hp).then_with(|| a.id.cmp(&b.id)))
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::test_support::test_session;
    use std::time::{Duration, Instant};

    fn tower_index(towers: &[TowerInstance], id: &str) -> usize {
        towers.iter().position(|t| t.id == id).unwrap()
    }

    #[test]
    fn test_guard_gate_holds_while_alive() {
        let mut state = test_session(Instant::now());
        // Even with the king nearly dead, guard 1 must be hit first.
        let king = tower_index(&state.towers, "bob_king_tower");
        state.towers[king].hp = 1;

        let target = select_tower_target(&state.towers, PlayerSlot::One).unwrap();
        assert_eq!(state.towers[target].id, "bob_guard_tower_1");
    }

    #[test]
    fn test_lowest_hp_after_gate_falls() {
        let mut state = test_session(Instant::now());
        let gate = tower_index(&state.towers, "bob_guard_tower_1");
        state.towers[gate].hp = 0;
        state.towers[gate].destroyed = true;
        let king = tower_index(&state.towers, "bob_king_tower");
        state.towers[king].hp = 10;

        let target = select_tower_target(&state.towers, PlayerSlot::One).unwrap();
        assert_eq!(state.towers[target].id, "bob_king_tower");
    }

    #[test]
    fn test_tower_tie_breaks_on_id() {
        let mut state = test_session(Instant::now());
        let gate = tower_index(&state.towers, "bob_guard_tower_1");
        state.towers[gate].hp = 0;
        state.towers[gate].destroyed = true;
        // Equal HP on the survivors: guard_tower_2 sorts before king_tower.
        let king = tower_index(&state.towers, "bob_king_tower");
        let guard2 = tower_index(&state.towers, "bob_guard_tower_2");
        state.towers[king].hp = 100;
        state.towers[guard2].hp = 100;

        let target = select_tower_target(&state.towers, PlayerSlot::One).unwrap();
        assert_eq!(state.towers[target].id, "bob_guard_tower_2");
    }

    #[test]
    fn test_no_target_when_all_enemy_towers_down() {
        let mut state = test_session(Instant::now());
        for t in state.towers.iter_mut().filter(|t| t.owner == PlayerSlot::Two) {
            t.hp = 0;
            t.destroyed = true;
        }
        assert!(select_tower_target(&state.towers, PlayerSlot::One).is_none());
    }

    #[test]
    fn test_oldest_troop_targeted_first() {
        let now = Instant::now();
        let mut state = test_session(now);
        let spec = state.troop_specs.get("pawn").unwrap().clone();
        state.troops.insert(
            2,
            ActiveTroop::new(2, &spec, PlayerSlot::One, 1, now + Duration::from_secs(5)),
        );
        state
            .troops
            .insert(7, ActiveTroop::new(7, &spec, PlayerSlot::One, 1, now));

        // Bob's towers shoot Alice's oldest troop.
        assert_eq!(select_troop_target(&state.troops, PlayerSlot::Two), Some(7));
        // No friendly fire.
        assert_eq!(select_troop_target(&state.troops, PlayerSlot::One), None);
    }

    #[test]
    fn test_troop_tie_breaks_on_instance_id() {
        let now = Instant::now();
        let mut state = test_session(now);
        let spec = state.troop_specs.get("pawn").unwrap().clone();
        state
            .troops
            .insert(3, ActiveTroop::new(3, &spec, PlayerSlot::One, 1, now));
        state
            .troops
            .insert(1, ActiveTroop::new(1, &spec, PlayerSlot::One, 1, now));

        assert_eq!(select_troop_target(&state.troops, PlayerSlot::Two), Some(1));
    }

    #[test]
    fn test_heal_prefers_lowest_hp_damaged_tower() {
        let mut state = test_session(Instant::now());
        let king = tower_index(&state.towers, "alice_king_tower");
        let guard2 = tower_index(&state.towers, "alice_guard_tower_2");
        state.towers[king].hp -= 50;
        state.towers[guard2].hp = 10;

        let target = select_heal_target(&state.towers, PlayerSlot::One).unwrap();
        assert_eq!(target, guard2);
    }

    #[test]
    fn test_heal_skips_destroyed_and_full() {
        let mut state = test_session(Instant::now());
        let guard1 = tower_index(&state.towers, "alice_guard_tower_1");
        state.towers[guard1].hp = 0;
        state.towers[guard1].destroyed = true;
        // King and guard 2 remain at full HP.
        assert!(select_heal_target(&state.towers, PlayerSlot::One).is_none());
    }
}
