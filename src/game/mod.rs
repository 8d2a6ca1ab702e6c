//! Game Logic Module
//!
//! All match simulation code. Pure over explicit time and randomness.
//!
//! ## Module Structure
//!
//! - `state`: Session state, towers, troops, player accounts
//! - `tick`: Authoritative simulation step and command handling
//! - `combat`: Damage and healing resolution
//! - `targeting`: Deterministic target selection
//! - `progression`: Experience curve and level scaling
//! - `events`: Game events streamed to clients

pub mod combat;
pub mod events;
pub mod progression;
pub mod state;
pub mod targeting;
pub mod tick;

// Re-export key types
pub use events::GameEvent;
pub use state::{EndReason, PlayerAccount, PlayerSlot, SessionState, TowerSpec, TroopSpec};
pub use tick::{ClientCommand, EngineConfig, MatchConclusion, TickOutput};
