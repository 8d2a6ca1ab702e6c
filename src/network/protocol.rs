//! Protocol Messages
//!
//! Wire format for client-server communication. The reliable channel is
//! newline-delimited JSON over TCP; the realtime channel is one JSON
//! envelope per UDP datagram. JSON everywhere for debugging ease.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::game::events::GameEvent;
use crate::game::state::PlayerAccount;
use crate::game::tick::EngineConfig;

// =============================================================================
// TCP: CLIENT -> SERVER
// =============================================================================

/// Messages sent from client to server over TCP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TcpClientMessage {
    /// Authenticate. A successful login doubles as a match request.
    Login {
        /// Account name
        username: String,
        /// Plain password, verified by the account store
        password: String,
    },
}

// =============================================================================
// TCP: SERVER -> CLIENT
// =============================================================================

/// Messages sent from server to client over TCP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TcpServerMessage {
    /// Outcome of a login attempt.
    LoginResult {
        /// Whether credentials were accepted
        success: bool,
        /// Human-readable status
        message: String,
        /// Account snapshot on success
        account: Option<PlayerAccount>,
    },

    /// A match was made; switch to the UDP channel.
    MatchFound(MatchFoundInfo),

    /// Final results after the match concluded.
    GameOver(GameOverResults),
}

/// Everything a client needs to join its match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchFoundInfo {
    /// Session identifier, echoed on every datagram
    pub session_id: String,
    /// UDP port the session engine listens on
    pub udp_port: u16,
    /// Opponent's public snapshot
    pub opponent: PlayerAccount,
    /// Per-player token, echoed on every datagram
    pub session_token: String,
    /// Match parameters
    pub config: EngineConfig,
}

/// Per-player match settlement delivered over TCP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameOverResults {
    /// Why the match ended: `timeout`, `king_tower_destroyed`,
    /// `player_quit`
    pub outcome: String,
    /// Winner's username, absent on a draw
    pub winner: Option<String>,
    /// Experience earned this match
    pub exp_change: u32,
    /// Experience banked after the award
    pub new_exp: u32,
    /// Level after the award
    pub new_level: u32,
    /// Whether at least one level-up occurred
    pub level_up: bool,
    /// Destroyed-tower counts by owner username
    pub destroyed_towers: BTreeMap<String, u32>,
}

// =============================================================================
// UDP ENVELOPE
// =============================================================================

/// One UDP datagram, either direction.
///
/// Server-to-client envelopes carry a per-engine outbound sequence;
/// acks use sequence 0 since they are themselves unsequenced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdpEnvelope {
    /// Sequence number; client commands count up from 1
    pub seq: u32,
    /// Sender wall-clock timestamp
    pub timestamp: DateTime<Utc>,
    /// Session this datagram belongs to
    pub session_id: String,
    /// Sender's session token; server fills its own side with the
    /// recipient's token
    pub player_token: String,
    /// The actual message
    pub payload: UdpPayload,
}

/// Payload of a UDP datagram.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UdpPayload {
    /// C2S: spend mana to deploy a troop
    DeployTroop {
        /// Troop spec id
        troop_id: String,
    },

    /// C2S: forfeit
    PlayerQuit,

    /// S2C: full authoritative state
    StateSnapshot(StateSnapshot),

    /// S2C: a simulation event
    GameEvent(GameEvent),

    /// S2C: acknowledge a client command
    CommandAck {
        /// The client sequence being acknowledged
        ack_seq: u32,
    },
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Full authoritative state broadcast every tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Whole seconds until the deadline
    pub time_remaining_secs: u64,
    /// Current mana by username
    pub mana: BTreeMap<String, u32>,
    /// All six towers
    pub towers: Vec<TowerView>,
    /// All live troops
    pub troops: Vec<TroopView>,
}

/// Client-visible tower state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TowerView {
    /// Stable per-match id
    pub id: String,
    /// Spec id
    pub spec_id: String,
    /// Owner username
    pub owner: String,
    /// Current HP
    pub hp: i32,
    /// Maximum HP
    pub max_hp: i32,
    /// Destroyed flag
    pub destroyed: bool,
}

/// Client-visible troop state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TroopView {
    /// Monotonic instance id
    pub id: u64,
    /// Spec id
    pub spec_id: String,
    /// Owner username
    pub owner: String,
    /// Current HP
    pub hp: i32,
    /// Maximum HP
    pub max_hp: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_login_wire_shape() {
        let json = r#"{"type":"login","username":"alice","password":"hunter2"}"#;
        let msg: TcpClientMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, TcpClientMessage::Login { ref username, .. } if username == "alice"));
    }

    #[test]
    fn test_udp_deploy_round_trip() {
        let envelope = UdpEnvelope {
            seq: 3,
            timestamp: Utc::now(),
            session_id: "s-1".into(),
            player_token: "tok".into(),
            payload: UdpPayload::DeployTroop {
                troop_id: "pawn".into(),
            },
        };
        let json = serde_json::to_string(&envelope).unwrap();
        let back: UdpEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.seq, 3);
        assert!(matches!(
            back.payload,
            UdpPayload::DeployTroop { ref troop_id } if troop_id == "pawn"
        ));
    }

    #[test]
    fn test_snapshot_payload_tag() {
        let payload = UdpPayload::StateSnapshot(StateSnapshot {
            time_remaining_secs: 90,
            mana: BTreeMap::new(),
            towers: vec![],
            troops: vec![],
        });
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "state_snapshot");
        assert_eq!(json["time_remaining_secs"], 90);
    }

    #[test]
    fn test_event_payload_nests_event_tag() {
        let payload = UdpPayload::GameEvent(GameEvent::TowerDestroyed {
            tower_id: "bob_king_tower".into(),
            owner: "bob".into(),
        });
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "game_event");
        assert_eq!(json["event"], "tower_destroyed");
    }

    #[test]
    fn test_malformed_datagram_rejected() {
        let err = serde_json::from_str::<UdpEnvelope>("{\"seq\":true}");
        assert!(err.is_err());
    }
}
