//! Network Layer
//!
//! TCP for login, matchmaking, and result delivery; UDP for the
//! realtime channel. This layer is **transport only** - all game
//! rules run through `game/`.

pub mod protocol;
pub mod reliable;
pub mod rendezvous;
pub mod server;
pub mod session;

pub use protocol::{
    GameOverResults, MatchFoundInfo, StateSnapshot, TcpClientMessage, TcpServerMessage,
    UdpEnvelope, UdpPayload,
};
pub use reliable::{CommandDedup, CommandSequencer};
pub use rendezvous::{MatchError, MatchmakingRendezvous, PortAllocator};
pub use server::{GameServer, GameServerError, ServerConfig};
pub use session::{SessionEngine, SessionError, SessionRegistry};
