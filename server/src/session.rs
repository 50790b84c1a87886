//! Per-connection session state
//!
//! A session is owned by exactly one connection driver and is only ever
//! touched from that driver's task, so handlers take `&mut self` without
//! any locking. Work that has to wait (inter calls, shard placement) runs
//! in a spawned task that reports back through [`SessionContext::events`].

use crate::connection_manager::ConnectionId;
use crate::network::{CloseReason, Outbound};
use shared::HandleError;
use tokio::sync::mpsc;

/// Callbacks a connection driver makes into its session.
///
/// Inbound messages reach the session through its dispatch table; these
/// hooks cover everything else. `on_close` runs exactly once, after which
/// the driver makes no further calls.
pub trait Session: Send + Sized + 'static {
    /// Result of background work, delivered back on the driver's task
    type Event: Send + 'static;

    fn on_open(&mut self) {}

    fn on_event(&mut self, _event: Self::Event) -> Result<(), HandleError> {
        Ok(())
    }

    fn on_close(&mut self, reason: &CloseReason);
}

/// Handles a session is created with
pub struct SessionContext<E> {
    pub id: ConnectionId,
    pub peer: String,
    pub outbound: Outbound,
    pub events: mpsc::UnboundedSender<E>,
}

impl<E> Clone for SessionContext<E> {
    fn clone(&self) -> Self {
        SessionContext {
            id: self.id,
            peer: self.peer.clone(),
            outbound: self.outbound.clone(),
            events: self.events.clone(),
        }
    }
}

/// The entity a zone session controls once it has entered a map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityBinding {
    pub character_id: u32,
    pub name: String,
    pub map_name: String,
}

/// Identity progression of a session: anonymous, then authenticated, then
/// bound to an entity. Each step only moves forward.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Anonymous,
    Authenticated {
        account_id: u32,
        auth_code: u32,
    },
    EntityBound {
        account_id: u32,
        auth_code: u32,
        entity: EntityBinding,
    },
}

impl SessionState {
    pub fn account_id(&self) -> Option<u32> {
        match self {
            SessionState::Anonymous => None,
            SessionState::Authenticated { account_id, .. }
            | SessionState::EntityBound { account_id, .. } => Some(*account_id),
        }
    }

    pub fn auth_code(&self) -> Option<u32> {
        match self {
            SessionState::Anonymous => None,
            SessionState::Authenticated { auth_code, .. }
            | SessionState::EntityBound { auth_code, .. } => Some(*auth_code),
        }
    }

    pub fn entity(&self) -> Option<&EntityBinding> {
        match self {
            SessionState::EntityBound { entity, .. } => Some(entity),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        !matches!(self, SessionState::Anonymous)
    }

    /// Moves an anonymous session to authenticated
    pub fn authenticate(
        &mut self,
        packet: &'static str,
        account_id: u32,
        auth_code: u32,
    ) -> Result<(), HandleError> {
        if self.is_authenticated() {
            return Err(HandleError::rejected(packet, "session already authenticated"));
        }
        *self = SessionState::Authenticated {
            account_id,
            auth_code,
        };
        Ok(())
    }

    /// Binds an authenticated session to an entity
    pub fn bind_entity(
        &mut self,
        packet: &'static str,
        entity: EntityBinding,
    ) -> Result<(), HandleError> {
        match *self {
            SessionState::Authenticated {
                account_id,
                auth_code,
            } => {
                *self = SessionState::EntityBound {
                    account_id,
                    auth_code,
                    entity,
                };
                Ok(())
            }
            SessionState::Anonymous => {
                Err(HandleError::rejected(packet, "session is not authenticated"))
            }
            SessionState::EntityBound { .. } => {
                Err(HandleError::rejected(packet, "session already controls an entity"))
            }
        }
    }

    /// Releases the bound entity, returning it
    pub fn unbind_entity(&mut self) -> Option<EntityBinding> {
        match std::mem::take(self) {
            SessionState::EntityBound {
                account_id,
                auth_code,
                entity,
            } => {
                *self = SessionState::Authenticated {
                    account_id,
                    auth_code,
                };
                Some(entity)
            }
            other => {
                *self = other;
                None
            }
        }
    }

    /// Account id, or a rejection naming `packet` when anonymous
    pub fn require_authenticated(&self, packet: &'static str) -> Result<u32, HandleError> {
        self.account_id()
            .ok_or_else(|| HandleError::rejected(packet, "session is not authenticated"))
    }

    pub fn require_entity(&self, packet: &'static str) -> Result<&EntityBinding, HandleError> {
        self.entity()
            .ok_or_else(|| HandleError::rejected(packet, "no entity bound to session"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity() -> EntityBinding {
        EntityBinding {
            character_id: 150000,
            name: "Tester".to_string(),
            map_name: "prontera".to_string(),
        }
    }

    #[test]
    fn test_progression() {
        let mut state = SessionState::default();
        assert!(state.require_authenticated("CH_PING").is_err());
        assert!(state.bind_entity("CZ_ENTER", entity()).is_err());

        state.authenticate("CH_ENTER", 2000000, 99).unwrap();
        assert_eq!(state.require_authenticated("CH_PING").unwrap(), 2000000);
        assert_eq!(state.auth_code(), Some(99));
        assert!(state.authenticate("CH_ENTER", 1, 1).is_err());
        assert!(state.require_entity("CZ_REQUEST_MOVE").is_err());

        state.bind_entity("CZ_ENTER", entity()).unwrap();
        assert_eq!(state.require_entity("CZ_REQUEST_MOVE").unwrap().name, "Tester");
        assert!(state.bind_entity("CZ_ENTER", entity()).is_err());

        assert_eq!(state.unbind_entity(), Some(entity()));
        assert_eq!(state.account_id(), Some(2000000));
        assert_eq!(state.unbind_entity(), None);
    }

    #[test]
    fn test_rejections_keep_connection_open() {
        let state = SessionState::Anonymous;
        let err = state.require_authenticated("CH_SELECT_CHAR").unwrap_err();
        assert!(!err.closes_connection());
        assert!(err.to_string().contains("CH_SELECT_CHAR"));
    }
}
