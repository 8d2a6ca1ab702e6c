//! Matchmaking Rendezvous
//!
//! Single-slot pairing: the first caller waits, the second caller
//! builds the session engine and both switch to UDP. The slot is an
//! explicit three-state machine so a construction failure can hand the
//! waiting player back without losing them.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use uuid::Uuid;

use crate::game::state::PlayerAccount;
use crate::game::tick::EngineConfig;
use crate::network::protocol::{MatchFoundInfo, TcpServerMessage};
use crate::network::session::{
    SessionConclusion, SessionEngine, SessionError, SessionHandle, SessionRegistry,
};
use crate::store::{AccountStore, SpecSource};

/// First UDP port handed out when none is configured.
pub const DEFAULT_UDP_PORT_BASE: u16 = 8081;

/// How long the result-delivery task waits for an engine to conclude.
pub const RESULT_WAIT: Duration = Duration::from_secs(600);

/// Errors pairing a player into a match.
#[derive(Debug, Error)]
pub enum MatchError {
    /// Session engine construction failed; the waiting player was
    /// returned to the slot
    #[error("session construction: {0}")]
    Session(#[from] SessionError),
    /// The match was set up but its completion signal was lost
    #[error("match interrupted before results were delivered")]
    Interrupted,
}

// =============================================================================
// PORT ALLOCATOR
// =============================================================================

/// Hands out one UDP port per session, monotonically.
#[derive(Debug)]
pub struct PortAllocator {
    base: u16,
    next: AtomicU16,
}

impl PortAllocator {
    /// Allocator starting at `base`.
    pub fn new(base: u16) -> Self {
        Self {
            base,
            next: AtomicU16::new(base),
        }
    }

    /// Next port. Past 65535 the counter returns to `base` rather than
    /// wrapping into the reserved low range.
    pub fn allocate(&self) -> u16 {
        let base = self.base;
        self.next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |port| {
                Some(if port == u16::MAX { base } else { port + 1 })
            })
            .unwrap_or(base)
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_UDP_PORT_BASE)
    }
}

// =============================================================================
// SLOT
// =============================================================================

struct Waiter {
    account: PlayerAccount,
    conn: mpsc::Sender<TcpServerMessage>,
    done_tx: oneshot::Sender<()>,
}

enum SlotState {
    /// Nobody waiting
    Empty,
    /// One player waiting for an opponent
    Waiting(Waiter),
    /// A pairing is mid-construction; callers back off briefly
    Matching,
}

// =============================================================================
// RENDEZVOUS
// =============================================================================

/// The single pairing point for the whole server.
pub struct MatchmakingRendezvous {
    slot: Mutex<SlotState>,
    ports: PortAllocator,
    registry: Arc<SessionRegistry>,
    specs: Arc<dyn SpecSource>,
    accounts: Arc<dyn AccountStore>,
    cfg: EngineConfig,
    result_wait: Duration,
}

impl MatchmakingRendezvous {
    /// New rendezvous with the default result wait.
    pub fn new(
        ports: PortAllocator,
        registry: Arc<SessionRegistry>,
        specs: Arc<dyn SpecSource>,
        accounts: Arc<dyn AccountStore>,
        cfg: EngineConfig,
    ) -> Self {
        Self {
            slot: Mutex::new(SlotState::Empty),
            ports,
            registry,
            specs,
            accounts,
            cfg,
            result_wait: RESULT_WAIT,
        }
    }

    /// Override the result wait. Tests shorten it.
    pub fn with_result_wait(mut self, wait: Duration) -> Self {
        self.result_wait = wait;
        self
    }

    /// Pair `account` into a match and block until its results have
    /// been delivered over `conn`.
    ///
    /// The first caller parks in the slot; the second constructs the
    /// engine. Construction failure restores the waiting player and
    /// fails only the current caller.
    pub async fn request_match(
        &self,
        account: PlayerAccount,
        conn: mpsc::Sender<TcpServerMessage>,
    ) -> Result<(), MatchError> {
        enum Claim {
            Parked(oneshot::Receiver<()>),
            Opponent(Waiter),
            Busy,
        }

        let done_rx = loop {
            // Decide under the lock, act after releasing it.
            let claim = {
                let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
                match std::mem::replace(&mut *slot, SlotState::Matching) {
                    SlotState::Empty => {
                        let (done_tx, done_rx) = oneshot::channel();
                        *slot = SlotState::Waiting(Waiter {
                            account: account.clone(),
                            conn: conn.clone(),
                            done_tx,
                        });
                        Claim::Parked(done_rx)
                    }
                    SlotState::Waiting(waiter) => Claim::Opponent(waiter),
                    SlotState::Matching => Claim::Busy,
                }
            };

            match claim {
                Claim::Parked(done_rx) => {
                    info!(username = %account.username, "waiting for opponent");
                    break done_rx;
                }
                Claim::Opponent(waiter) => {
                    break self
                        .build_match(waiter, account.clone(), conn.clone())
                        .await?;
                }
                Claim::Busy => {
                    // Another pairing is in flight; retry shortly.
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        };

        await_done(done_rx).await
    }

    /// Construct and launch a session for `waiter` vs `account`.
    ///
    /// The slot is `Matching` on entry and is set to `Empty` on
    /// success or back to `Waiting(waiter)` on failure.
    async fn build_match(
        &self,
        waiter: Waiter,
        account: PlayerAccount,
        conn: mpsc::Sender<TcpServerMessage>,
    ) -> Result<oneshot::Receiver<()>, MatchError> {
        let session_id = Uuid::new_v4().to_string();
        let udp_port = self.ports.allocate();
        let tokens = [Uuid::new_v4().to_string(), Uuid::new_v4().to_string()];
        let accounts = [waiter.account.clone(), account.clone()];

        let built = SessionEngine::new(
            session_id.clone(),
            accounts.clone(),
            tokens.clone(),
            self.specs.as_ref(),
            self.cfg.clone(),
            udp_port,
        )
        .await;

        let (engine, conclusion_rx) = match built {
            Ok(v) => v,
            Err(e) => {
                let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
                *slot = SlotState::Waiting(waiter);
                warn!(error = %e, "session construction failed, waiter restored");
                return Err(e.into());
            }
        };

        {
            let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
            *slot = SlotState::Empty;
        }

        self.registry
            .insert(
                session_id.clone(),
                SessionHandle {
                    udp_port,
                    usernames: [
                        accounts[0].username.clone(),
                        accounts[1].username.clone(),
                    ],
                },
            )
            .await;

        // Notify both sides before the engine starts ticking.
        notify_match_found(
            &waiter.conn,
            &session_id,
            udp_port,
            &accounts[1],
            &tokens[0],
            &self.cfg,
        )
        .await;
        notify_match_found(
            &conn,
            &session_id,
            udp_port,
            &accounts[0],
            &tokens[1],
            &self.cfg,
        )
        .await;

        info!(
            session_id = %session_id,
            player_one = %accounts[0].username,
            player_two = %accounts[1].username,
            udp_port,
            "match made"
        );

        tokio::spawn(engine.run(Arc::clone(&self.accounts), Arc::clone(&self.registry)));

        let (done_tx, done_rx) = oneshot::channel();
        let conns = [
            (accounts[0].username.clone(), waiter.conn),
            (accounts[1].username.clone(), conn),
        ];
        tokio::spawn(deliver_results(
            conclusion_rx,
            conns,
            [waiter.done_tx, done_tx],
            self.result_wait,
            session_id,
        ));

        Ok(done_rx)
    }
}

async fn await_done(done_rx: oneshot::Receiver<()>) -> Result<(), MatchError> {
    done_rx.await.map_err(|_| MatchError::Interrupted)
}

async fn notify_match_found(
    conn: &mpsc::Sender<TcpServerMessage>,
    session_id: &str,
    udp_port: u16,
    opponent: &PlayerAccount,
    token: &str,
    cfg: &EngineConfig,
) {
    let msg = TcpServerMessage::MatchFound(MatchFoundInfo {
        session_id: session_id.to_string(),
        udp_port,
        opponent: opponent.clone(),
        session_token: token.to_string(),
        config: cfg.clone(),
    });
    if let Err(e) = conn.send(msg).await {
        warn!(session_id, error = %e, "match-found notification failed");
    }
}

/// Await the engine's conclusion (bounded), deliver both result
/// messages over TCP, then release both `request_match` callers.
async fn deliver_results(
    conclusion_rx: oneshot::Receiver<SessionConclusion>,
    conns: [(String, mpsc::Sender<TcpServerMessage>); 2],
    done: [oneshot::Sender<()>; 2],
    result_wait: Duration,
    session_id: String,
) {
    match tokio::time::timeout(result_wait, conclusion_rx).await {
        Ok(Ok(conclusion)) => {
            // Results and connections are both slot-ordered; pair by
            // index, not by username, which need not be unique.
            for ((username, results), (_, conn)) in conclusion.results.into_iter().zip(conns) {
                if let Err(e) = conn.send(TcpServerMessage::GameOver(results)).await {
                    warn!(session_id = %session_id, username = %username, error = %e,
                        "game-over delivery failed");
                }
            }
        }
        Ok(Err(_)) => {
            warn!(session_id = %session_id, "engine dropped without concluding");
        }
        Err(_) => {
            warn!(session_id = %session_id, "timed out waiting for session result");
        }
    }

    for tx in done {
        let _ = tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{TowerSpec, TroopSpec};
    use crate::store::{MemoryAccounts, SpecSource, StaticSpecs, StoreError};
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicBool;

    fn account(name: &str) -> PlayerAccount {
        PlayerAccount {
            username: name.to_string(),
            level: 1,
            exp: 0,
        }
    }

    fn rendezvous_with_specs(
        specs: Arc<dyn SpecSource>,
        port_base: u16,
    ) -> Arc<MatchmakingRendezvous> {
        let accounts = Arc::new(MemoryAccounts::new());
        accounts.register("alice", "x");
        accounts.register("bob", "x");
        accounts.register("carol", "x");
        Arc::new(
            MatchmakingRendezvous::new(
                // Each test gets its own high base so parallel tests
                // never contend for a port.
                PortAllocator::new(port_base),
                Arc::new(SessionRegistry::new()),
                specs,
                accounts,
                EngineConfig {
                    tick_interval: Duration::from_millis(10),
                    match_duration: Duration::from_millis(100),
                    ..EngineConfig::default()
                },
            )
            .with_result_wait(Duration::from_secs(5)),
        )
    }

    #[test]
    fn test_port_allocator_is_monotonic() {
        let ports = PortAllocator::new(8081);
        assert_eq!(ports.allocate(), 8081);
        assert_eq!(ports.allocate(), 8082);
        assert_eq!(ports.allocate(), 8083);
    }

    #[test]
    fn test_port_allocator_wraps_to_base() {
        let ports = PortAllocator::new(u16::MAX);
        assert_eq!(ports.allocate(), u16::MAX);
        // The counter returns to the configured base instead of
        // overflowing into the reserved low range.
        assert_eq!(ports.allocate(), u16::MAX);
        let ports = PortAllocator::new(60000);
        ports.next.store(u16::MAX, Ordering::Relaxed);
        assert_eq!(ports.allocate(), u16::MAX);
        assert_eq!(ports.allocate(), 60000);
        assert_eq!(ports.allocate(), 60001);
    }

    #[tokio::test]
    async fn test_two_callers_pair_and_both_get_results() {
        let rendezvous = rendezvous_with_specs(Arc::new(StaticSpecs), 47311);

        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);

        let r = Arc::clone(&rendezvous);
        let first = tokio::spawn(async move { r.request_match(account("alice"), tx_a).await });
        // Give the first caller time to park in the slot.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let r = Arc::clone(&rendezvous);
        let second = tokio::spawn(async move { r.request_match(account("bob"), tx_b).await });

        let (first, second) = tokio::join!(first, second);
        first.unwrap().unwrap();
        second.unwrap().unwrap();

        for rx in [&mut rx_a, &mut rx_b] {
            let found = rx.recv().await.unwrap();
            assert!(matches!(found, TcpServerMessage::MatchFound(_)));
            let over = rx.recv().await.unwrap();
            match over {
                // The 100 ms match times out as a draw.
                TcpServerMessage::GameOver(results) => {
                    assert_eq!(results.outcome, "timeout");
                    assert_eq!(results.winner, None);
                }
                other => panic!("expected game over, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_match_found_carries_distinct_tokens() {
        let rendezvous = rendezvous_with_specs(Arc::new(StaticSpecs), 47331);

        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);

        let r = Arc::clone(&rendezvous);
        let first = tokio::spawn(async move { r.request_match(account("alice"), tx_a).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let r = Arc::clone(&rendezvous);
        let second = tokio::spawn(async move { r.request_match(account("bob"), tx_b).await });

        let found_a = rx_a.recv().await.unwrap();
        let found_b = rx_b.recv().await.unwrap();
        let (info_a, info_b) = match (found_a, found_b) {
            (TcpServerMessage::MatchFound(a), TcpServerMessage::MatchFound(b)) => (a, b),
            other => panic!("expected match found pair, got {other:?}"),
        };
        assert_eq!(info_a.session_id, info_b.session_id);
        assert_ne!(info_a.session_token, info_b.session_token);
        assert_eq!(info_a.opponent.username, "bob");
        assert_eq!(info_b.opponent.username, "alice");

        let _ = tokio::join!(first, second);
    }

    #[tokio::test]
    async fn test_same_account_connections_each_get_one_result() {
        let rendezvous = rendezvous_with_specs(Arc::new(StaticSpecs), 47371);

        // Nothing stops one account from logging in twice; the two
        // connections pair with each other and results must still
        // arrive one per connection.
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);

        let r = Arc::clone(&rendezvous);
        let first = tokio::spawn(async move { r.request_match(account("alice"), tx_a).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let r = Arc::clone(&rendezvous);
        let second = tokio::spawn(async move { r.request_match(account("alice"), tx_b).await });

        let (first, second) = tokio::join!(first, second);
        first.unwrap().unwrap();
        second.unwrap().unwrap();

        for rx in [&mut rx_a, &mut rx_b] {
            let found = rx.recv().await.unwrap();
            assert!(matches!(found, TcpServerMessage::MatchFound(_)));
            let over = rx.recv().await.unwrap();
            assert!(matches!(over, TcpServerMessage::GameOver(_)));
            // Exactly one game-over per connection, never two.
            assert!(rx.try_recv().is_err());
        }
    }

    /// Spec source that fails exactly once, then delegates.
    struct FlakySpecs {
        failed: AtomicBool,
    }

    impl SpecSource for FlakySpecs {
        fn tower_specs(&self) -> Result<BTreeMap<String, TowerSpec>, StoreError> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(StoreError::Backend("spec file unreadable".into()));
            }
            StaticSpecs.tower_specs()
        }

        fn troop_specs(&self) -> Result<BTreeMap<String, TroopSpec>, StoreError> {
            StaticSpecs.troop_specs()
        }
    }

    #[tokio::test]
    async fn test_construction_failure_restores_waiter() {
        let rendezvous = rendezvous_with_specs(
            Arc::new(FlakySpecs {
                failed: AtomicBool::new(false),
            }),
            47351,
        );

        let (tx_a, mut rx_a) = mpsc::channel(8);
        let r = Arc::clone(&rendezvous);
        let first = tokio::spawn(async move { r.request_match(account("alice"), tx_a).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Second caller hits the spec failure and errors out alone.
        let (tx_b, _rx_b) = mpsc::channel(8);
        let err = rendezvous.request_match(account("bob"), tx_b).await;
        assert!(matches!(err, Err(MatchError::Session(_))));

        // The waiter survived: a third caller pairs with them.
        let (tx_c, mut rx_c) = mpsc::channel(8);
        let r = Arc::clone(&rendezvous);
        let third = tokio::spawn(async move { r.request_match(account("carol"), tx_c).await });

        let found = rx_a.recv().await.unwrap();
        assert!(matches!(found, TcpServerMessage::MatchFound(_)));
        let found = rx_c.recv().await.unwrap();
        assert!(matches!(found, TcpServerMessage::MatchFound(_)));

        let (first, third) = tokio::join!(first, third);
        first.unwrap().unwrap();
        third.unwrap().unwrap();
    }
}
