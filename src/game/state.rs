//! Game State Definitions
//!
//! All state types for a running match session.
//! Uses BTreeMap for deterministic iteration order.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::game::progression::scale_stat;
use crate::network::reliable::CommandDedup;

// =============================================================================
// PLAYER SLOT
// =============================================================================

/// Which side of the arena a player occupies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerSlot {
    /// First player to pair
    One,
    /// Second player to pair
    Two,
}

impl PlayerSlot {
    /// The other side.
    pub fn opponent(self) -> Self {
        match self {
            PlayerSlot::One => PlayerSlot::Two,
            PlayerSlot::Two => PlayerSlot::One,
        }
    }

    /// Index into per-player arrays.
    pub fn index(self) -> usize {
        match self {
            PlayerSlot::One => 0,
            PlayerSlot::Two => 1,
        }
    }
}

// =============================================================================
// STATIC SPECS
// =============================================================================

/// Immutable tower definition loaded from a [`crate::store::SpecSource`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TowerSpec {
    /// Stable identifier, e.g. `king_tower`
    pub id: String,
    /// Display name
    pub name: String,
    /// HP before level scaling
    pub base_hp: i32,
    /// ATK before level scaling
    pub base_atk: i32,
    /// DEF before level scaling
    pub base_def: i32,
    /// Probability in [0, 1] of a critical hit per attack
    pub crit_chance: f64,
    /// Experience awarded to the destroyer's owner
    pub exp_yield: u32,
}

/// Immutable troop definition loaded from a [`crate::store::SpecSource`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TroopSpec {
    /// Stable identifier, e.g. `pawn`
    pub id: String,
    /// Display name
    pub name: String,
    /// Mana deducted on deployment
    pub mana_cost: u32,
    /// HP before level scaling
    pub base_hp: i32,
    /// ATK before level scaling
    pub base_atk: i32,
    /// DEF before level scaling
    pub base_def: i32,
}

/// Troop id with special heal semantics: never enters the live map.
pub const QUEEN_TROOP_ID: &str = "queen";

/// Spec ids every session requires, in instantiation order.
pub const REQUIRED_TOWER_SPECS: [&str; 3] = ["king_tower", "guard_tower_1", "guard_tower_2"];

// =============================================================================
// PERSISTENT ACCOUNT
// =============================================================================

/// Persistent player account snapshot carried into a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerAccount {
    /// Unique login name
    pub username: String,
    /// Persistent level, starts at 1
    pub level: u32,
    /// Experience banked inside the current level
    pub exp: u32,
}

// =============================================================================
// LIVE ENTITIES
// =============================================================================

/// What role a tower plays in targeting rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TowerKind {
    /// Destroying this ends the match
    King,
    /// Gates targeting while alive
    Guard1,
    /// Ordinary guard
    Guard2,
}

impl TowerKind {
    fn from_spec_id(spec_id: &str) -> Option<Self> {
        match spec_id {
            "king_tower" => Some(TowerKind::King),
            "guard_tower_1" => Some(TowerKind::Guard1),
            "guard_tower_2" => Some(TowerKind::Guard2),
            _ => None,
        }
    }
}

/// A tower instantiated for one session. Never removed, only flagged destroyed.
#[derive(Clone, Debug)]
pub struct TowerInstance {
    /// Stable per-match id, `<username>_<spec_id>`
    pub id: String,
    /// Spec this tower was built from
    pub spec_id: String,
    /// Targeting role
    pub kind: TowerKind,
    /// Owning side
    pub owner: PlayerSlot,
    /// Current HP, clamped [0, max_hp]
    pub hp: i32,
    /// Level-scaled maximum HP
    pub max_hp: i32,
    /// Level-scaled attack
    pub atk: i32,
    /// Level-scaled defense
    pub def: i32,
    /// Crit probability from the spec
    pub crit_chance: f64,
    /// Experience yielded on destruction
    pub exp_yield: u32,
    /// Set exactly once, when HP reaches zero
    pub destroyed: bool,
    /// Last attack timestamp for the 2 s cadence
    pub last_attack: Instant,
}

impl TowerInstance {
    /// Instantiate from a spec, scaling stats by the owner's level.
    pub fn new(spec: &TowerSpec, owner: PlayerSlot, username: &str, level: u32, now: Instant) -> Self {
        let kind = TowerKind::from_spec_id(&spec.id).unwrap_or(TowerKind::Guard2);
        let max_hp = scale_stat(spec.base_hp, level);
        Self {
            id: format!("{}_{}", username, spec.id),
            spec_id: spec.id.clone(),
            kind,
            owner,
            hp: max_hp,
            max_hp,
            atk: scale_stat(spec.base_atk, level),
            def: scale_stat(spec.base_def, level),
            crit_chance: spec.crit_chance,
            exp_yield: spec.exp_yield,
            destroyed: false,
            last_attack: now,
        }
    }

    /// Alive and targetable.
    pub fn is_alive(&self) -> bool {
        !self.destroyed
    }
}

/// A troop currently in the arena.
#[derive(Clone, Debug)]
pub struct ActiveTroop {
    /// Monotonic per-session id, assigned at deployment
    pub id: u64,
    /// Spec this troop was built from
    pub spec_id: String,
    /// Owning side
    pub owner: PlayerSlot,
    /// Current HP
    pub hp: i32,
    /// Level-scaled maximum HP
    pub max_hp: i32,
    /// Level-scaled attack
    pub atk: i32,
    /// Level-scaled defense
    pub def: i32,
    /// Deployment timestamp, primary tower-targeting key
    pub deployed_at: Instant,
    /// Last attack timestamp for the 2 s cadence
    pub last_attack: Instant,
}

impl ActiveTroop {
    /// Instantiate from a spec, scaling stats by the owner's level.
    pub fn new(id: u64, spec: &TroopSpec, owner: PlayerSlot, level: u32, now: Instant) -> Self {
        let max_hp = scale_stat(spec.base_hp, level);
        Self {
            id,
            spec_id: spec.id.clone(),
            owner,
            hp: max_hp,
            max_hp,
            atk: scale_stat(spec.base_atk, level),
            def: scale_stat(spec.base_def, level),
            deployed_at: now,
            // First attack lands one cadence interval after deployment.
            last_attack: now,
        }
    }
}

// =============================================================================
// PLAYER IN GAME
// =============================================================================

/// Per-player mutable state inside a session.
#[derive(Clone, Debug)]
pub struct PlayerInGame {
    /// Account snapshot at session start
    pub account: PlayerAccount,
    /// Current mana, clamped [0, mana_max]
    pub mana: u32,
    /// Opaque per-session token carried on every UDP command
    pub token: String,
    /// Set when the player sends a quit command; never unset
    pub quit: bool,
    /// Last-known UDP return address, learned from inbound datagrams
    pub addr: Option<std::net::SocketAddr>,
}

// =============================================================================
// OUTCOME
// =============================================================================

/// Why the match ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The 3-minute deadline elapsed
    Timeout,
    /// A king tower was destroyed
    KingTowerDestroyed,
    /// Both players quit
    PlayerQuit,
}

impl EndReason {
    /// Wire string for the game-over message.
    pub fn as_str(self) -> &'static str {
        match self {
            EndReason::Timeout => "timeout",
            EndReason::KingTowerDestroyed => "king_tower_destroyed",
            EndReason::PlayerQuit => "player_quit",
        }
    }
}

// =============================================================================
// SESSION STATE
// =============================================================================

/// Errors building a session's initial state.
#[derive(Debug, Error)]
pub enum SetupError {
    /// A required tower spec is missing from the spec source
    #[error("missing tower spec: {0}")]
    MissingTowerSpec(String),
}

/// Complete mutable state of one running match.
///
/// Mutated exclusively under the engine's lock. Troops live in a single
/// map keyed by instance id, with the owner recorded per entry;
/// per-player views are computed on demand.
#[derive(Debug)]
pub struct SessionState {
    /// Session identifier (UUID v4 string)
    pub id: String,
    /// Both players, indexed by [`PlayerSlot::index`]
    pub players: [PlayerInGame; 2],
    /// All six towers, three per player
    pub towers: Vec<TowerInstance>,
    /// Live troops keyed by monotonic instance id
    pub troops: BTreeMap<u64, ActiveTroop>,
    /// Next troop instance id to assign
    pub next_troop_id: u64,
    /// Session start
    pub started_at: Instant,
    /// Hard deadline, `started_at + match_duration`
    pub deadline: Instant,
    /// Last mana regeneration timestamp
    pub last_mana_regen: Instant,
    /// Processed-command table for duplicate suppression
    pub dedup: CommandDedup,
    /// Terminal flag, never unset once true
    pub over: bool,
    /// Recorded end reason, set together with `over`
    pub outcome: Option<EndReason>,
    /// Troop specs available for deployment this session
    pub troop_specs: BTreeMap<String, TroopSpec>,
}

impl SessionState {
    /// Build the initial state: six towers with level-scaled stats,
    /// starting mana, empty troop map.
    pub fn new(
        id: String,
        accounts: [PlayerAccount; 2],
        tokens: [String; 2],
        tower_specs: &BTreeMap<String, TowerSpec>,
        troop_specs: BTreeMap<String, TroopSpec>,
        mana_start: u32,
        match_duration: Duration,
        now: Instant,
    ) -> Result<Self, SetupError> {
        let mut towers = Vec::with_capacity(6);
        for (slot, account) in [PlayerSlot::One, PlayerSlot::Two].into_iter().zip(&accounts) {
            for spec_id in REQUIRED_TOWER_SPECS {
                let spec = tower_specs
                    .get(spec_id)
                    .ok_or_else(|| SetupError::MissingTowerSpec(spec_id.to_string()))?;
                towers.push(TowerInstance::new(
                    spec,
                    slot,
                    &account.username,
                    account.level,
                    now,
                ));
            }
        }

        let [account_one, account_two] = accounts;
        let [token_one, token_two] = tokens;
        let players = [
            PlayerInGame {
                account: account_one,
                mana: mana_start,
                token: token_one,
                quit: false,
                addr: None,
            },
            PlayerInGame {
                account: account_two,
                mana: mana_start,
                token: token_two,
                quit: false,
                addr: None,
            },
        ];

        Ok(Self {
            id,
            players,
            towers,
            troops: BTreeMap::new(),
            next_troop_id: 1,
            started_at: now,
            deadline: now + match_duration,
            last_mana_regen: now,
            dedup: CommandDedup::new(),
            over: false,
            outcome: None,
            troop_specs,
        })
    }

    /// Resolve a session token to the slot that owns it.
    pub fn slot_for_token(&self, token: &str) -> Option<PlayerSlot> {
        if self.players[0].token == token {
            Some(PlayerSlot::One)
        } else if self.players[1].token == token {
            Some(PlayerSlot::Two)
        } else {
            None
        }
    }

    /// Immutable view of one player.
    pub fn player(&self, slot: PlayerSlot) -> &PlayerInGame {
        &self.players[slot.index()]
    }

    /// Mutable view of one player.
    pub fn player_mut(&mut self, slot: PlayerSlot) -> &mut PlayerInGame {
        &mut self.players[slot.index()]
    }

    /// Username of a slot's player.
    pub fn username(&self, slot: PlayerSlot) -> &str {
        &self.players[slot.index()].account.username
    }

    /// Count destroyed towers owned by `slot`.
    pub fn destroyed_towers_of(&self, slot: PlayerSlot) -> usize {
        self.towers
            .iter()
            .filter(|t| t.owner == slot && t.destroyed)
            .count()
    }

    /// Whether a slot's king tower is destroyed.
    pub fn king_destroyed(&self, slot: PlayerSlot) -> bool {
        self.towers
            .iter()
            .any(|t| t.owner == slot && t.kind == TowerKind::King && t.destroyed)
    }

    /// Mark the session over with `reason`. The first call wins.
    pub fn finish(&mut self, reason: EndReason) {
        if !self.over {
            self.over = true;
            self.outcome = Some(reason);
        }
    }
}
