//! # Tower Clash Match Server
//!
//! Server-authoritative match server for Tower Clash, a real-time
//! two-player tower combat game.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   TOWER CLASH SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  game/           - Match rules (pure over time + rng)        │
//! │  ├── state.rs    - Session, tower, and troop state           │
//! │  ├── tick.rs     - Authoritative simulation step             │
//! │  ├── combat.rs   - Damage and healing resolution             │
//! │  ├── targeting.rs- Deterministic target selection            │
//! │  ├── progression.rs - Experience curve, level scaling        │
//! │  └── events.rs   - Events streamed to clients                │
//! │                                                              │
//! │  network/        - Transports and orchestration              │
//! │  ├── server.rs   - TCP accept loop and login                 │
//! │  ├── rendezvous.rs - Single-slot matchmaking                 │
//! │  ├── session.rs  - Per-match engine over UDP                 │
//! │  ├── reliable.rs - Command sequencing, retry, dedup          │
//! │  └── protocol.rs - Wire types (JSON)                         │
//! │                                                              │
//! │  store.rs        - Spec and account collaborators            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Authority Guarantee
//!
//! Clients never mutate state: every deploy travels over UDP with a
//! sequence number, is deduplicated server-side, and takes effect only
//! inside the 500 ms tick loop. Snapshots broadcast after each tick
//! are the single source of truth for what clients render.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod game;
pub mod network;
pub mod store;

// Re-export commonly used types
pub use game::state::{PlayerAccount, PlayerSlot, SessionState, TowerSpec, TroopSpec};
pub use game::tick::EngineConfig;
pub use network::{GameServer, ServerConfig};
pub use store::{AccountStore, SpecSource};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Simulation tick interval (milliseconds)
pub const TICK_INTERVAL_MS: u64 = 500;

/// Match duration (seconds)
pub const MATCH_DURATION_SECS: u64 = 180;
