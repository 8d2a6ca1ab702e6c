//! Spec and Account Collaborators
//!
//! Static game data and persistent accounts enter the server through
//! the two traits here. The in-memory implementations back the demo
//! binary and tests; a deployment swaps in file or database backends
//! without touching the engine.

use std::collections::BTreeMap;
use std::sync::Mutex;

use thiserror::Error;

use crate::game::state::{PlayerAccount, TowerSpec, TroopSpec};

/// Errors from spec or account backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Username/password pair rejected
    #[error("invalid credentials for {0}")]
    InvalidCredentials(String),
    /// No account with that username
    #[error("unknown account: {0}")]
    UnknownAccount(String),
    /// Backend failure
    #[error("storage backend: {0}")]
    Backend(String),
}

/// Source of immutable tower and troop definitions.
pub trait SpecSource: Send + Sync {
    /// All tower specs keyed by spec id.
    fn tower_specs(&self) -> Result<BTreeMap<String, TowerSpec>, StoreError>;
    /// All troop specs keyed by spec id.
    fn troop_specs(&self) -> Result<BTreeMap<String, TroopSpec>, StoreError>;
}

/// Persistent account storage.
pub trait AccountStore: Send + Sync {
    /// Verify credentials and return the account snapshot.
    fn authenticate(&self, username: &str, password: &str) -> Result<PlayerAccount, StoreError>;
    /// Load an account by username.
    fn load(&self, username: &str) -> Result<PlayerAccount, StoreError>;
    /// Persist an updated account.
    fn save(&self, account: &PlayerAccount) -> Result<(), StoreError>;
}

// =============================================================================
// STATIC SPECS
// =============================================================================

/// Built-in spec tables.
#[derive(Clone, Debug, Default)]
pub struct StaticSpecs;

impl SpecSource for StaticSpecs {
    fn tower_specs(&self) -> Result<BTreeMap<String, TowerSpec>, StoreError> {
        let specs = [
            TowerSpec {
                id: "king_tower".to_string(),
                name: "King Tower".to_string(),
                base_hp: 2000,
                base_atk: 120,
                base_def: 40,
                crit_chance: 0.10,
                exp_yield: 200,
            },
            TowerSpec {
                id: "guard_tower_1".to_string(),
                name: "Guard Tower I".to_string(),
                base_hp: 1000,
                base_atk: 80,
                base_def: 20,
                crit_chance: 0.05,
                exp_yield: 100,
            },
            TowerSpec {
                id: "guard_tower_2".to_string(),
                name: "Guard Tower II".to_string(),
                base_hp: 1000,
                base_atk: 80,
                base_def: 20,
                crit_chance: 0.05,
                exp_yield: 100,
            },
        ];
        Ok(specs.into_iter().map(|s| (s.id.clone(), s)).collect())
    }

    fn troop_specs(&self) -> Result<BTreeMap<String, TroopSpec>, StoreError> {
        let specs = [
            TroopSpec {
                id: "pawn".to_string(),
                name: "Pawn".to_string(),
                mana_cost: 3,
                base_hp: 50,
                base_atk: 60,
                base_def: 10,
            },
            TroopSpec {
                id: "knight".to_string(),
                name: "Knight".to_string(),
                mana_cost: 5,
                base_hp: 120,
                base_atk: 90,
                base_def: 30,
            },
            TroopSpec {
                id: "rook".to_string(),
                name: "Rook".to_string(),
                mana_cost: 7,
                base_hp: 250,
                base_atk: 130,
                base_def: 50,
            },
            TroopSpec {
                id: "queen".to_string(),
                name: "Queen".to_string(),
                mana_cost: 5,
                base_hp: 0,
                base_atk: 0,
                base_def: 0,
            },
        ];
        Ok(specs.into_iter().map(|s| (s.id.clone(), s)).collect())
    }
}

// =============================================================================
// MEMORY ACCOUNTS
// =============================================================================

struct StoredAccount {
    password: String,
    account: PlayerAccount,
}

/// Mutex-guarded account table. Passwords compared in plain text; a
/// production backend hashes before storage.
#[derive(Default)]
pub struct MemoryAccounts {
    inner: Mutex<BTreeMap<String, StoredAccount>>,
}

impl MemoryAccounts {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an account, creating it at level 1 with no experience.
    pub fn register(&self, username: &str, password: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.insert(
            username.to_string(),
            StoredAccount {
                password: password.to_string(),
                account: PlayerAccount {
                    username: username.to_string(),
                    level: 1,
                    exp: 0,
                },
            },
        );
    }
}

impl AccountStore for MemoryAccounts {
    fn authenticate(&self, username: &str, password: &str) -> Result<PlayerAccount, StoreError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let stored = inner
            .get(username)
            .ok_or_else(|| StoreError::UnknownAccount(username.to_string()))?;
        if stored.password != password {
            return Err(StoreError::InvalidCredentials(username.to_string()));
        }
        Ok(stored.account.clone())
    }

    fn load(&self, username: &str) -> Result<PlayerAccount, StoreError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .get(username)
            .map(|s| s.account.clone())
            .ok_or_else(|| StoreError::UnknownAccount(username.to_string()))
    }

    fn save(&self, account: &PlayerAccount) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let stored = inner
            .get_mut(&account.username)
            .ok_or_else(|| StoreError::UnknownAccount(account.username.clone()))?;
        stored.account = account.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_specs_contain_required_towers() {
        let specs = StaticSpecs.tower_specs().unwrap();
        for id in crate::game::state::REQUIRED_TOWER_SPECS {
            assert!(specs.contains_key(id), "missing {id}");
        }
    }

    #[test]
    fn test_static_specs_contain_queen() {
        let specs = StaticSpecs.troop_specs().unwrap();
        assert!(specs.contains_key("queen"));
        assert!(specs.get("pawn").unwrap().mana_cost > 0);
    }

    #[test]
    fn test_authenticate_happy_path() {
        let store = MemoryAccounts::new();
        store.register("alice", "hunter2");
        let account = store.authenticate("alice", "hunter2").unwrap();
        assert_eq!(account.username, "alice");
        assert_eq!(account.level, 1);
    }

    #[test]
    fn test_wrong_password_rejected() {
        let store = MemoryAccounts::new();
        store.register("alice", "hunter2");
        assert!(matches!(
            store.authenticate("alice", "nope"),
            Err(StoreError::InvalidCredentials(_))
        ));
    }

    #[test]
    fn test_unknown_account_rejected() {
        let store = MemoryAccounts::new();
        assert!(matches!(
            store.authenticate("ghost", "x"),
            Err(StoreError::UnknownAccount(_))
        ));
    }

    #[test]
    fn test_save_round_trips_progress() {
        let store = MemoryAccounts::new();
        store.register("alice", "hunter2");
        let mut account = store.load("alice").unwrap();
        account.level = 3;
        account.exp = 42;
        store.save(&account).unwrap();
        assert_eq!(store.load("alice").unwrap().level, 3);
    }
}
