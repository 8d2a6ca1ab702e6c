//! Game Events
//!
//! Events generated during simulation and streamed to clients over UDP.
//! Owners are reported by username so clients need no slot bookkeeping.

use serde::{Deserialize, Serialize};

/// A combat or deployment event visible to clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GameEvent {
    /// A tower took damage
    TowerDamaged {
        tower_id: String,
        owner: String,
        damage: i32,
        remaining_hp: i32,
    },

    /// A tower landed a critical hit on a troop; emitted alongside the
    /// troop-damage event
    CriticalHit {
        tower_id: String,
        troop_id: u64,
        damage: i32,
    },

    /// A tower was destroyed
    TowerDestroyed {
        tower_id: String,
        owner: String,
    },

    /// A troop took damage from a tower
    TroopDamaged {
        troop_id: u64,
        owner: String,
        damage: i32,
        remaining_hp: i32,
        critical: bool,
    },

    /// A troop was reduced to zero HP and removed
    TroopDefeated {
        troop_id: u64,
        owner: String,
    },

    /// A troop entered the arena
    TroopDeployed {
        troop_id: u64,
        spec_id: String,
        owner: String,
        hp: i32,
    },

    /// The queen restored HP to a friendly tower
    QueenHeal {
        tower_id: String,
        owner: String,
        healed: i32,
        new_hp: i32,
    },

    /// A deploy command was rejected; sent only to the issuing player
    DeployError {
        troop_id: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_tag() {
        let event = GameEvent::TowerDestroyed {
            tower_id: "alice_guard_tower_1".into(),
            owner: "alice".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "tower_destroyed");
        assert_eq!(json["tower_id"], "alice_guard_tower_1");
    }

    #[test]
    fn test_event_round_trip() {
        let event = GameEvent::TroopDamaged {
            troop_id: 7,
            owner: "bob".into(),
            damage: 12,
            remaining_hp: 38,
            critical: true,
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: GameEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
