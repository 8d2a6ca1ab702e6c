//! Match Session Engine
//!
//! Drives one match from tower instantiation to result delivery: the
//! authoritative tick loop, the UDP command/snapshot channel, and the
//! final account settlement. One engine per session, each on its own
//! tokio task with a dedicated UDP socket.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::game::state::{PlayerAccount, PlayerSlot, SessionState, SetupError};
use crate::game::tick::{
    advance, apply_command, conclude, ClientCommand, CommandOutput, EngineConfig, Target,
};
use crate::network::protocol::{
    GameOverResults, StateSnapshot, TowerView, TroopView, UdpEnvelope, UdpPayload,
};
use crate::store::{AccountStore, SpecSource, StoreError};

/// Errors constructing or running a session engine.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Initial state could not be built
    #[error("session setup: {0}")]
    Setup(#[from] SetupError),
    /// Spec source failed
    #[error("spec source: {0}")]
    Specs(#[from] StoreError),
    /// UDP socket could not be bound
    #[error("udp bind on port {port}: {source}")]
    Bind {
        /// Requested port
        port: u16,
        /// Underlying error
        source: std::io::Error,
    },
}

/// A validated command queued for the next tick.
#[derive(Debug)]
pub struct InboundCommand {
    /// Issuing player
    pub slot: PlayerSlot,
    /// Client sequence number
    pub seq: u32,
    /// The command itself
    pub command: ClientCommand,
}

/// Final settlement handed to the rendezvous for TCP delivery.
#[derive(Debug)]
pub struct SessionConclusion {
    /// Session identifier
    pub session_id: String,
    /// Per-player results, indexed by [`PlayerSlot::index`]
    pub results: [(String, GameOverResults); 2],
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Live handle to a running session.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    /// UDP port the engine listens on
    pub udp_port: u16,
    /// Both usernames
    pub usernames: [String; 2],
}

/// Concurrency-safe directory of running engines by session id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<BTreeMap<String, SessionHandle>>,
}

impl SessionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. Replaces any stale entry under the same id.
    pub async fn insert(&self, session_id: String, handle: SessionHandle) {
        self.sessions.write().await.insert(session_id, handle);
    }

    /// Remove a concluded session.
    pub async fn remove(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }

    /// Look up a session.
    pub async fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Number of running sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether no sessions are running.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// One running match.
pub struct SessionEngine {
    id: String,
    state: Arc<Mutex<SessionState>>,
    socket: Arc<UdpSocket>,
    udp_port: u16,
    cfg: EngineConfig,
    commands_rx: mpsc::Receiver<InboundCommand>,
    commands_tx: mpsc::Sender<InboundCommand>,
    conclusion_tx: Option<oneshot::Sender<SessionConclusion>>,
    out_seq: u32,
}

impl SessionEngine {
    /// Build the initial state and bind the UDP socket.
    ///
    /// Returns the engine plus the receiver the rendezvous awaits for
    /// the final settlement. Any failure here leaves no side effects.
    pub async fn new(
        session_id: String,
        accounts: [PlayerAccount; 2],
        tokens: [String; 2],
        specs: &dyn SpecSource,
        cfg: EngineConfig,
        udp_port: u16,
    ) -> Result<(Self, oneshot::Receiver<SessionConclusion>), SessionError> {
        let tower_specs = specs.tower_specs()?;
        let troop_specs = specs.troop_specs()?;

        let state = SessionState::new(
            session_id.clone(),
            accounts,
            tokens,
            &tower_specs,
            troop_specs,
            cfg.mana_start,
            cfg.match_duration,
            Instant::now(),
        )?;

        let socket = UdpSocket::bind(("0.0.0.0", udp_port))
            .await
            .map_err(|source| SessionError::Bind {
                port: udp_port,
                source,
            })?;

        let (commands_tx, commands_rx) = mpsc::channel(cfg.command_queue_depth);
        let (conclusion_tx, conclusion_rx) = oneshot::channel();

        info!(session_id = %session_id, udp_port, "session initialized");

        Ok((
            Self {
                id: session_id,
                state: Arc::new(Mutex::new(state)),
                socket: Arc::new(socket),
                udp_port,
                cfg,
                commands_rx,
                commands_tx,
                conclusion_tx: Some(conclusion_tx),
                out_seq: 0,
            },
            conclusion_rx,
        ))
    }

    /// UDP port this engine listens on.
    pub fn udp_port(&self) -> u16 {
        self.udp_port
    }

    /// Run the match to conclusion, then settle accounts and deliver
    /// the result through the conclusion channel.
    pub async fn run(mut self, accounts: Arc<dyn AccountStore>, registry: Arc<SessionRegistry>) {
        let reader = tokio::spawn(read_commands(
            Arc::clone(&self.state),
            Arc::clone(&self.socket),
            self.commands_tx.clone(),
        ));

        let mut ticker = tokio::time::interval(self.cfg.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut rng = SmallRng::from_entropy();

        loop {
            ticker.tick().await;
            let ended = self.run_tick(&mut rng);
            if ended {
                break;
            }
        }

        reader.abort();
        self.conclude_session(accounts).await;
        registry.remove(&self.id).await;
    }

    /// One tick: mutate under the lock, collect datagrams, send after
    /// release. Returns whether the match ended.
    fn run_tick(&mut self, rng: &mut SmallRng) -> bool {
        let now = Instant::now();
        let mut datagrams: Vec<(std::net::SocketAddr, Vec<u8>)> = Vec::new();
        let ended;
        let state_handle = Arc::clone(&self.state);

        {
            let mut state = state_handle.lock().unwrap_or_else(|e| e.into_inner());

            let tick_out = advance(&mut state, now, &self.cfg, rng);
            for (target, event) in &tick_out.events {
                self.queue_event(&state, *target, event, &mut datagrams);
            }
            let mut match_over = tick_out.ended.is_some();

            // Snapshot reflects this tick's mutations.
            if !match_over {
                self.queue_snapshot(&state, now, &mut datagrams);
            }

            // Drain without blocking; commands past the first that ends
            // the match are dropped by apply_command's terminal check.
            while let Ok(inbound) = self.commands_rx.try_recv() {
                let out = apply_command(
                    &mut state,
                    inbound.slot,
                    inbound.seq,
                    inbound.command,
                    now,
                    &self.cfg,
                );
                self.queue_command_output(&state, inbound.slot, &out, &mut datagrams);
                if out.ended.is_some() {
                    match_over = true;
                }
            }

            ended = match_over;
        }

        for (addr, bytes) in datagrams {
            if let Err(e) = self.socket.try_send_to(&bytes, addr) {
                debug!(session_id = %self.id, %addr, error = %e, "datagram send failed");
            }
        }

        ended
    }

    fn queue_command_output(
        &mut self,
        state: &SessionState,
        slot: PlayerSlot,
        out: &CommandOutput,
        datagrams: &mut Vec<(std::net::SocketAddr, Vec<u8>)>,
    ) {
        for (target, event) in &out.events {
            self.queue_event(state, *target, event, datagrams);
        }
        if let Some(ack_seq) = out.ack_seq {
            // Acks are unsequenced.
            self.queue_payload(
                state,
                Target::Player(slot),
                0,
                UdpPayload::CommandAck { ack_seq },
                datagrams,
            );
        }
    }

    fn queue_event(
        &mut self,
        state: &SessionState,
        target: Target,
        event: &crate::game::events::GameEvent,
        datagrams: &mut Vec<(std::net::SocketAddr, Vec<u8>)>,
    ) {
        self.out_seq += 1;
        let seq = self.out_seq;
        self.queue_payload(
            state,
            target,
            seq,
            UdpPayload::GameEvent(event.clone()),
            datagrams,
        );
    }

    fn queue_snapshot(
        &mut self,
        state: &SessionState,
        now: Instant,
        datagrams: &mut Vec<(std::net::SocketAddr, Vec<u8>)>,
    ) {
        self.out_seq += 1;
        let seq = self.out_seq;
        let snapshot = build_snapshot(state, now);
        self.queue_payload(
            state,
            Target::Both,
            seq,
            UdpPayload::StateSnapshot(snapshot),
            datagrams,
        );
    }

    fn queue_payload(
        &self,
        state: &SessionState,
        target: Target,
        seq: u32,
        payload: UdpPayload,
        datagrams: &mut Vec<(std::net::SocketAddr, Vec<u8>)>,
    ) {
        let slots = match target {
            Target::Both => vec![PlayerSlot::One, PlayerSlot::Two],
            Target::Player(slot) => vec![slot],
        };

        for slot in slots {
            let player = state.player(slot);
            let addr = match player.addr {
                Some(a) => a,
                // No datagram seen from this player yet.
                None => continue,
            };
            let envelope = UdpEnvelope {
                seq,
                timestamp: Utc::now(),
                session_id: state.id.clone(),
                player_token: player.token.clone(),
                payload: payload.clone(),
            };
            match serde_json::to_vec(&envelope) {
                Ok(bytes) => datagrams.push((addr, bytes)),
                Err(e) => warn!(session_id = %state.id, error = %e, "envelope encode failed"),
            }
        }
    }

    /// Settle experience, persist accounts, deliver the conclusion.
    async fn conclude_session(&mut self, accounts: Arc<dyn AccountStore>) {
        let conclusion = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let reason = match state.outcome {
                Some(r) => r,
                // Should be unreachable: run() only exits on a terminal tick.
                None => return,
            };
            let settled = conclude(&state, reason, &self.cfg);

            let winner_name = settled
                .winner
                .map(|slot| state.username(slot).to_string());

            let mut destroyed = BTreeMap::new();
            for slot in [PlayerSlot::One, PlayerSlot::Two] {
                destroyed.insert(
                    state.username(slot).to_string(),
                    state.destroyed_towers_of(slot) as u32,
                );
            }

            let results = settled.results.map(|r| {
                let username = state.username(r.slot).to_string();
                let updated = PlayerAccount {
                    username: username.clone(),
                    level: r.progress.level,
                    exp: r.progress.exp,
                };
                if let Err(e) = accounts.save(&updated) {
                    warn!(session_id = %self.id, username = %username, error = %e,
                        "account save failed");
                }
                (
                    username,
                    GameOverResults {
                        outcome: settled.reason.as_str().to_string(),
                        winner: winner_name.clone(),
                        exp_change: r.exp_earned,
                        new_exp: r.progress.exp,
                        new_level: r.progress.level,
                        level_up: r.progress.leveled_up,
                        destroyed_towers: destroyed.clone(),
                    },
                )
            });

            SessionConclusion {
                session_id: self.id.clone(),
                results,
            }
        };

        info!(session_id = %self.id, "session concluded");
        if let Some(tx) = self.conclusion_tx.take() {
            // Receiver dropped means the rendezvous gave up waiting.
            let _ = tx.send(conclusion);
        }
    }
}

/// Reader task: decode datagrams defensively, validate identity, record
/// the sender's return address, queue the command for the next tick.
async fn read_commands(
    state: Arc<Mutex<SessionState>>,
    socket: Arc<UdpSocket>,
    commands: mpsc::Sender<InboundCommand>,
) {
    let mut buf = vec![0u8; 4096];
    loop {
        let (len, addr) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "udp recv failed");
                continue;
            }
        };

        let envelope: UdpEnvelope = match serde_json::from_slice(&buf[..len]) {
            Ok(e) => e,
            Err(e) => {
                debug!(%addr, error = %e, "malformed datagram dropped");
                continue;
            }
        };

        let command = match envelope.payload {
            UdpPayload::DeployTroop { troop_id } => ClientCommand::DeployTroop { troop_id },
            UdpPayload::PlayerQuit => ClientCommand::Quit,
            // Server-to-client payloads reflected back are ignored.
            _ => continue,
        };

        let slot = {
            let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
            if envelope.session_id != state.id {
                debug!(%addr, "datagram for wrong session dropped");
                continue;
            }
            let slot = match state.slot_for_token(&envelope.player_token) {
                Some(s) => s,
                None => {
                    debug!(%addr, "datagram with unknown token dropped");
                    continue;
                }
            };
            state.player_mut(slot).addr = Some(addr);
            slot
        };

        let inbound = InboundCommand {
            slot,
            seq: envelope.seq,
            command,
        };
        if let Err(e) = commands.try_send(inbound) {
            warn!(error = %e, "command queue full, dropping command");
        }
    }
}

/// Project the authoritative state into the client-visible snapshot.
fn build_snapshot(state: &SessionState, now: Instant) -> StateSnapshot {
    let time_remaining_secs = state.deadline.saturating_duration_since(now).as_secs();

    let mut mana = BTreeMap::new();
    for slot in [PlayerSlot::One, PlayerSlot::Two] {
        mana.insert(state.username(slot).to_string(), state.player(slot).mana);
    }

    let towers = state
        .towers
        .iter()
        .map(|t| TowerView {
            id: t.id.clone(),
            spec_id: t.spec_id.clone(),
            owner: state.username(t.owner).to_string(),
            hp: t.hp,
            max_hp: t.max_hp,
            destroyed: t.destroyed,
        })
        .collect();

    let troops = state
        .troops
        .values()
        .map(|t| TroopView {
            id: t.id,
            spec_id: t.spec_id.clone(),
            owner: state.username(t.owner).to_string(),
            hp: t.hp,
            max_hp: t.max_hp,
        })
        .collect();

    StateSnapshot {
        time_remaining_secs,
        mana,
        towers,
        troops,
    }
}
