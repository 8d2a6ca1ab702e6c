//! Authoritative Simulation Tick
//!
//! The server-side game loop body: every state mutation for a running
//! match happens here, driven by the session engine's 500 ms interval.
//! Functions take explicit `now` and `rng` so tests drive time and
//! randomness directly.

use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::game::combat::{apply_damage, apply_heal, compute_damage};
use crate::game::events::GameEvent;
use crate::game::progression::{apply_experience, LevelProgress};
use crate::game::state::{
    ActiveTroop, EndReason, PlayerSlot, SessionState, QUEEN_TROOP_ID,
};
use crate::game::targeting::{select_heal_target, select_tower_target, select_troop_target};

// =============================================================================
// CONFIG
// =============================================================================

/// Tunable parameters of a match. One instance per engine, shared with
/// clients in the match-found notification.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Simulation step
    pub tick_interval: Duration,
    /// Hard match length
    pub match_duration: Duration,
    /// One mana per player per this interval
    pub mana_regen_interval: Duration,
    /// Minimum time between attacks, per entity
    pub attack_interval: Duration,
    /// Mana at session start
    pub mana_start: u32,
    /// Mana cap
    pub mana_max: u32,
    /// HP restored by a queen deploy
    pub queen_heal: i32,
    /// Experience bonus for winning
    pub win_bonus_exp: u32,
    /// Experience bonus for a draw
    pub draw_bonus_exp: u32,
    /// Inbound command queue depth per session
    pub command_queue_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(500),
            match_duration: Duration::from_secs(180),
            mana_regen_interval: Duration::from_secs(2),
            attack_interval: Duration::from_secs(2),
            mana_start: 5,
            mana_max: 10,
            queen_heal: 300,
            win_bonus_exp: 30,
            draw_bonus_exp: 10,
            command_queue_depth: 16,
        }
    }
}

// =============================================================================
// OUTPUT TYPES
// =============================================================================

/// Who should receive an event datagram.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    /// Both players
    Both,
    /// One player only
    Player(PlayerSlot),
}

/// Result of one tick.
#[derive(Debug, Default)]
pub struct TickOutput {
    /// Events generated this tick, with routing
    pub events: Vec<(Target, GameEvent)>,
    /// Set when the match ended this tick
    pub ended: Option<EndReason>,
}

impl TickOutput {
    fn push(&mut self, target: Target, event: GameEvent) {
        self.events.push((target, event));
    }
}

/// Result of applying one inbound command.
#[derive(Debug, Default)]
pub struct CommandOutput {
    /// Events generated, with routing
    pub events: Vec<(Target, GameEvent)>,
    /// Sequence number to acknowledge, when the command was accepted
    /// or was a duplicate of an accepted one
    pub ack_seq: Option<u32>,
    /// Set when the command ended the match (both players quit)
    pub ended: Option<EndReason>,
}

/// A command received from a client, already validated against the
/// session id and player token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientCommand {
    /// Spend mana to deploy a troop (or trigger the queen heal)
    DeployTroop {
        /// Troop spec id
        troop_id: String,
    },
    /// Forfeit the match
    Quit,
}

// =============================================================================
// TICK
// =============================================================================

/// Advance the simulation by one tick.
///
/// Order is fixed: deadline check, mana regeneration, troop attacks,
/// tower attacks. A king-tower destruction ends the tick immediately so
/// no further attacks land in a finished match.
pub fn advance(
    state: &mut SessionState,
    now: Instant,
    cfg: &EngineConfig,
    rng: &mut impl Rng,
) -> TickOutput {
    let mut out = TickOutput::default();

    if state.over {
        return out;
    }

    if now >= state.deadline {
        state.finish(EndReason::Timeout);
        out.ended = Some(EndReason::Timeout);
        return out;
    }

    regen_mana(state, now, cfg);

    if troop_attacks(state, now, cfg, rng, &mut out) {
        state.finish(EndReason::KingTowerDestroyed);
        out.ended = Some(EndReason::KingTowerDestroyed);
        return out;
    }

    tower_attacks(state, now, cfg, rng, &mut out);

    out
}

/// Grant +1 mana per player for each full regen interval elapsed.
fn regen_mana(state: &mut SessionState, now: Instant, cfg: &EngineConfig) {
    let elapsed = now.saturating_duration_since(state.last_mana_regen);
    let intervals = (elapsed.as_millis() / cfg.mana_regen_interval.as_millis()) as u32;
    if intervals == 0 {
        return;
    }
    for player in &mut state.players {
        player.mana = (player.mana + intervals).min(cfg.mana_max);
    }
    state.last_mana_regen += cfg.mana_regen_interval * intervals;
}

/// Every troop whose attack is due hits its selected enemy tower.
///
/// Returns true when a king tower fell.
fn troop_attacks(
    state: &mut SessionState,
    now: Instant,
    cfg: &EngineConfig,
    rng: &mut impl Rng,
    out: &mut TickOutput,
) -> bool {
    let due: Vec<u64> = state
        .troops
        .values()
        .filter(|t| now.saturating_duration_since(t.last_attack) >= cfg.attack_interval)
        .map(|t| t.id)
        .collect();

    for troop_id in due {
        let (owner, atk) = {
            let troop = match state.troops.get_mut(&troop_id) {
                Some(t) => t,
                None => continue,
            };
            // Cadence resets whether or not a target exists.
            troop.last_attack = now;
            (troop.owner, troop.atk)
        };

        let target = match select_tower_target(&state.towers, owner) {
            Some(i) => i,
            None => continue,
        };

        let tower = &mut state.towers[target];
        let roll = compute_damage(atk, tower.def, false, 0.0, rng);
        if roll.amount == 0 {
            continue;
        }
        apply_damage(&mut tower.hp, roll.amount);
        out.push(
            Target::Both,
            GameEvent::TowerDamaged {
                tower_id: tower.id.clone(),
                owner: state.players[tower.owner.index()].account.username.clone(),
                damage: roll.amount,
                remaining_hp: tower.hp,
            },
        );

        if tower.hp == 0 && !tower.destroyed {
            tower.destroyed = true;
            let destroyed_king = tower.kind == crate::game::state::TowerKind::King;
            out.push(
                Target::Both,
                GameEvent::TowerDestroyed {
                    tower_id: tower.id.clone(),
                    owner: state.players[tower.owner.index()].account.username.clone(),
                },
            );
            if destroyed_king {
                return true;
            }
        }
    }

    false
}

/// Every tower whose attack is due hits the oldest live enemy troop.
fn tower_attacks(
    state: &mut SessionState,
    now: Instant,
    cfg: &EngineConfig,
    rng: &mut impl Rng,
    out: &mut TickOutput,
) {
    let due: Vec<usize> = state
        .towers
        .iter()
        .enumerate()
        .filter(|(_, t)| {
            t.is_alive() && now.saturating_duration_since(t.last_attack) >= cfg.attack_interval
        })
        .map(|(i, _)| i)
        .collect();

    for tower_index in due {
        let (tower_id, owner, atk, crit_chance) = {
            let tower = &mut state.towers[tower_index];
            if !tower.is_alive() {
                continue;
            }
            tower.last_attack = now;
            (tower.id.clone(), tower.owner, tower.atk, tower.crit_chance)
        };

        let troop_id = match select_troop_target(&state.troops, owner) {
            Some(id) => id,
            None => continue,
        };

        let troop = match state.troops.get_mut(&troop_id) {
            Some(t) => t,
            None => continue,
        };
        let roll = compute_damage(atk, troop.def, true, crit_chance, rng);
        if roll.amount == 0 {
            continue;
        }
        apply_damage(&mut troop.hp, roll.amount);
        let remaining = troop.hp;
        let troop_owner = troop.owner;
        out.push(
            Target::Both,
            GameEvent::TroopDamaged {
                troop_id,
                owner: state.players[troop_owner.index()].account.username.clone(),
                damage: roll.amount,
                remaining_hp: remaining,
                critical: roll.critical,
            },
        );
        if roll.critical {
            out.push(
                Target::Both,
                GameEvent::CriticalHit {
                    tower_id: tower_id.clone(),
                    troop_id,
                    damage: roll.amount,
                },
            );
        }

        if remaining == 0 {
            state.troops.remove(&troop_id);
            out.push(
                Target::Both,
                GameEvent::TroopDefeated {
                    troop_id,
                    owner: state.players[troop_owner.index()].account.username.clone(),
                },
            );
        }
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

/// Apply one inbound command from `slot` carrying client sequence `seq`.
///
/// Rejected deploys (unknown troop, insufficient mana) emit a
/// deploy-error to the sender and are neither marked processed nor
/// acknowledged, so the client retries and fails again explicitly.
pub fn apply_command(
    state: &mut SessionState,
    slot: PlayerSlot,
    seq: u32,
    command: ClientCommand,
    now: Instant,
    cfg: &EngineConfig,
) -> CommandOutput {
    let mut out = CommandOutput::default();

    if state.over {
        return out;
    }

    let token = state.players[slot.index()].token.clone();
    if state.dedup.is_duplicate(&token, seq) {
        // Already applied: re-ack, never reapply.
        out.ack_seq = Some(seq);
        return out;
    }

    match command {
        ClientCommand::DeployTroop { troop_id } => {
            deploy_troop(state, slot, &troop_id, now, cfg, &mut out);
            if out.ack_seq.is_some() {
                state.dedup.mark(&token, seq);
                out.ack_seq = Some(seq);
            }
        }
        ClientCommand::Quit => {
            state.players[slot.index()].quit = true;
            state.dedup.mark(&token, seq);
            out.ack_seq = Some(seq);
            if state.players.iter().all(|p| p.quit) {
                state.finish(EndReason::PlayerQuit);
                out.ended = Some(EndReason::PlayerQuit);
            }
        }
    }

    out
}

/// Deploy handling. Sets `out.ack_seq` to a placeholder on acceptance;
/// `apply_command` rewrites it to the real sequence number after
/// marking the dedup table.
fn deploy_troop(
    state: &mut SessionState,
    slot: PlayerSlot,
    troop_id: &str,
    now: Instant,
    cfg: &EngineConfig,
    out: &mut CommandOutput,
) {
    if troop_id == QUEEN_TROOP_ID {
        deploy_queen(state, slot, cfg, out);
        return;
    }

    let spec = match state.troop_specs.get(troop_id) {
        Some(s) => s.clone(),
        None => {
            out.events.push((
                Target::Player(slot),
                GameEvent::DeployError {
                    troop_id: troop_id.to_string(),
                    reason: "unknown troop".to_string(),
                },
            ));
            return;
        }
    };

    let player = &mut state.players[slot.index()];
    if player.mana < spec.mana_cost {
        out.events.push((
            Target::Player(slot),
            GameEvent::DeployError {
                troop_id: troop_id.to_string(),
                reason: "insufficient mana".to_string(),
            },
        ));
        return;
    }
    player.mana -= spec.mana_cost;
    let level = player.account.level;
    let username = player.account.username.clone();

    let id = state.next_troop_id;
    state.next_troop_id += 1;
    let troop = ActiveTroop::new(id, &spec, slot, level, now);
    let hp = troop.hp;
    state.troops.insert(id, troop);

    out.events.push((
        Target::Both,
        GameEvent::TroopDeployed {
            troop_id: id,
            spec_id: spec.id.clone(),
            owner: username,
            hp,
        },
    ));
    out.ack_seq = Some(0);
}

/// Queen deploy: instant heal, never enters the troop map. Mana is
/// spent even when no tower is eligible; in that case no heal event is
/// emitted. Preserved quirk.
fn deploy_queen(
    state: &mut SessionState,
    slot: PlayerSlot,
    cfg: &EngineConfig,
    out: &mut CommandOutput,
) {
    let spec = match state.troop_specs.get(QUEEN_TROOP_ID) {
        Some(s) => s.clone(),
        None => {
            out.events.push((
                Target::Player(slot),
                GameEvent::DeployError {
                    troop_id: QUEEN_TROOP_ID.to_string(),
                    reason: "unknown troop".to_string(),
                },
            ));
            return;
        }
    };

    let player = &mut state.players[slot.index()];
    if player.mana < spec.mana_cost {
        out.events.push((
            Target::Player(slot),
            GameEvent::DeployError {
                troop_id: QUEEN_TROOP_ID.to_string(),
                reason: "insufficient mana".to_string(),
            },
        ));
        return;
    }
    player.mana -= spec.mana_cost;
    let username = player.account.username.clone();

    if let Some(target) = select_heal_target(&state.towers, slot) {
        let tower = &mut state.towers[target];
        let healed = apply_heal(&mut tower.hp, tower.max_hp, cfg.queen_heal);
        out.events.push((
            Target::Both,
            GameEvent::QueenHeal {
                tower_id: tower.id.clone(),
                owner: username,
                healed,
                new_hp: tower.hp,
            },
        ));
    }

    out.ack_seq = Some(0);
}

// =============================================================================
// CONCLUSION
// =============================================================================

/// Final per-player settlement computed when a match ends.
#[derive(Clone, Debug, PartialEq)]
pub struct PlayerResult {
    /// Player this result belongs to
    pub slot: PlayerSlot,
    /// Experience earned this match
    pub exp_earned: u32,
    /// Account progression after the award
    pub progress: LevelProgress,
    /// Enemy towers this player destroyed
    pub towers_destroyed: u32,
}

/// Full outcome of a finished match.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchConclusion {
    /// Why the match ended
    pub reason: EndReason,
    /// Winner, if any
    pub winner: Option<PlayerSlot>,
    /// Both players' settlements, indexed by slot
    pub results: [PlayerResult; 2],
}

/// Decide the winner and settle experience for both players.
///
/// Pure over the final state: win bonuses, tower-destruction
/// experience, and level-ups are all computed here so the network layer
/// only formats the result.
pub fn conclude(state: &SessionState, reason: EndReason, cfg: &EngineConfig) -> MatchConclusion {
    let winner = decide_winner(state, reason);

    let results = [PlayerSlot::One, PlayerSlot::Two].map(|slot| {
        let enemy = slot.opponent();
        let tower_exp: u32 = state
            .towers
            .iter()
            .filter(|t| t.owner == enemy && t.destroyed)
            .map(|t| t.exp_yield)
            .sum();
        let bonus = match winner {
            Some(w) if w == slot => cfg.win_bonus_exp,
            Some(_) => 0,
            None => cfg.draw_bonus_exp,
        };
        let exp_earned = tower_exp + bonus;
        let account = &state.players[slot.index()].account;
        PlayerResult {
            slot,
            exp_earned,
            progress: apply_experience(account.level, account.exp, exp_earned),
            towers_destroyed: state.destroyed_towers_of(enemy) as u32,
        }
    });

    MatchConclusion {
        reason,
        winner,
        results,
    }
}

fn decide_winner(state: &SessionState, reason: EndReason) -> Option<PlayerSlot> {
    match reason {
        EndReason::KingTowerDestroyed => {
            match (
                state.king_destroyed(PlayerSlot::One),
                state.king_destroyed(PlayerSlot::Two),
            ) {
                (true, false) => Some(PlayerSlot::Two),
                (false, true) => Some(PlayerSlot::One),
                // Both or neither: ambiguous, settle as a draw.
                _ => None,
            }
        }
        EndReason::Timeout => {
            let one = state.destroyed_towers_of(PlayerSlot::Two);
            let two = state.destroyed_towers_of(PlayerSlot::One);
            match one.cmp(&two) {
                std::cmp::Ordering::Greater => Some(PlayerSlot::One),
                std::cmp::Ordering::Less => Some(PlayerSlot::Two),
                std::cmp::Ordering::Equal => None,
            }
        }
        EndReason::PlayerQuit => {
            match (state.players[0].quit, state.players[1].quit) {
                (true, false) => Some(PlayerSlot::Two),
                (false, true) => Some(PlayerSlot::One),
                _ => None,
            }
        }
    }
}
