//! In-memory record storage of the coordination role.
//! Shared by every inter connection; each map has its own lock.

use parking_lot::Mutex;
use shared::{GameAccount, SessionRecord};
use std::collections::HashMap;

#[derive(Default)]
pub struct InterStore {
    sessions: Mutex<HashMap<u32, SessionRecord>>,
    accounts: Mutex<HashMap<u32, GameAccount>>,
}

impl InterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_session(&self, auth_code: u32) -> Option<SessionRecord> {
        self.sessions.lock().get(&auth_code).cloned()
    }

    /// Inserts or replaces the session under its auth code
    pub fn store_session(&self, record: SessionRecord) {
        self.sessions.lock().insert(record.auth_code, record);
    }

    pub fn delete_session(&self, auth_code: u32) -> bool {
        self.sessions.lock().remove(&auth_code).is_some()
    }

    pub fn get_account(&self, account_id: u32) -> Option<GameAccount> {
        self.accounts.lock().get(&account_id).cloned()
    }

    pub fn store_account(&self, account: GameAccount) {
        self.accounts.lock().insert(account.account_id, account);
    }

    pub fn delete_account(&self, account_id: u32) -> bool {
        self.accounts.lock().remove(&account_id).is_some()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn account_count(&self) -> usize {
        self.accounts.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::ServerRole;

    fn session(auth_code: u32) -> SessionRecord {
        SessionRecord {
            auth_code,
            account_id: 2000000,
            current_server: ServerRole::Auth,
            client_version: 20190530,
            client_type: 0,
            map_name: String::new(),
            login_time: 0,
        }
    }

    #[test]
    fn test_session_lifecycle() {
        let store = InterStore::new();
        assert!(store.get_session(7).is_none());

        store.store_session(session(7));
        let mut updated = session(7);
        updated.current_server = ServerRole::Char;
        store.store_session(updated.clone());
        assert_eq!(store.session_count(), 1);
        assert_eq!(store.get_session(7), Some(updated));

        assert!(store.delete_session(7));
        assert!(!store.delete_session(7));
    }

    #[test]
    fn test_accounts_are_keyed_by_id() {
        let store = InterStore::new();
        store.store_account(GameAccount {
            account_id: 2000001,
            username: "tester".to_string(),
            gender: 1,
            group_id: 0,
            character_slots: 9,
            last_ip: "127.0.0.1".to_string(),
            last_login: 0,
        });
        assert_eq!(store.get_account(2000001).unwrap().username, "tester");
        assert!(store.get_account(2000000).is_none());
        assert!(store.delete_account(2000001));
        assert_eq!(store.account_count(), 0);
    }
}
