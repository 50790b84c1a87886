//! Character role: admits clients carrying an auth code issued by the auth
//! role. Character storage itself lives elsewhere; this role only checks
//! the session and reports the account's slot count.

use crate::config::ServerConfig;
use crate::connection_manager::{ConnectionKind, ConnectionManager};
use crate::error::{InterError, ServerError};
use crate::inter::InterApi;
use crate::network::CloseReason;
use crate::roles::auth::DEFAULT_CHARACTER_SLOTS;
use crate::roles::{main_loop_with_inter, Launch, RoleHandle};
use crate::session::{Session, SessionContext, SessionState};
use log::{debug, info, warn};
use shared::packets::char::*;
use shared::{DispatchTable, Handle, HandleError, Packet, PacketVersion, ServerRole};
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Debug)]
pub enum CharEvent {
    Admitted {
        account_id: u32,
        auth_code: u32,
        slots: u8,
    },
    Refused(CharEnterError),
}

pub struct CharSession {
    ctx: SessionContext<CharEvent>,
    inter: Arc<InterApi>,
    state: SessionState,
    enter_pending: bool,
}

/// Confirms the auth code belongs to `account_id` and moves the session
/// record over to this role. Returns the account's slot count.
async fn admit(inter: &InterApi, account_id: u32, auth_code: u32) -> Result<Option<u8>, InterError> {
    let mut record = match inter.get_session(auth_code).await? {
        Some(record) if record.account_id == account_id => record,
        _ => return Ok(None),
    };
    let slots = inter
        .get_game_account(account_id)
        .await?
        .map_or(DEFAULT_CHARACTER_SLOTS, |account| account.character_slots);

    record.current_server = ServerRole::Char;
    inter.store_session(&record).await?;
    Ok(Some(slots))
}

impl CharSession {
    pub fn new(ctx: SessionContext<CharEvent>, inter: Arc<InterApi>) -> Self {
        CharSession {
            ctx,
            inter,
            state: SessionState::default(),
            enter_pending: false,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    fn require_account(&self, packet: &'static str, account_id: u32) -> Result<(), HandleError> {
        match self.state.account_id() {
            None => Err(HandleError::rejected(packet, "session is not authenticated")),
            Some(id) if id != account_id => {
                Err(HandleError::fatal(packet, format!("account {} does not own this session", account_id)))
            }
            Some(_) => Ok(()),
        }
    }
}

impl Session for CharSession {
    type Event = CharEvent;

    fn on_event(&mut self, event: CharEvent) -> Result<(), HandleError> {
        self.enter_pending = false;
        match event {
            CharEvent::Admitted {
                account_id,
                auth_code,
                slots,
            } => {
                self.state.authenticate(ChEnter::NAME, account_id, auth_code)?;
                info!("Account {} entered character server from {}", account_id, self.ctx.peer);
                self.ctx.outbound.send(&HcAcceptEnter::new(slots));
            }
            CharEvent::Refused(error) => {
                self.ctx.outbound.send(&HcRefuseEnter::new(error));
                self.ctx.outbound.close();
            }
        }
        Ok(())
    }

    fn on_close(&mut self, reason: &CloseReason) {
        debug!("Char session {} closed: {:?}", self.ctx.id, reason);
    }
}

impl Handle<CharSession> for ChEnter {
    fn handle(self, session: &mut CharSession) -> Result<(), HandleError> {
        if session.state.is_authenticated() || session.enter_pending {
            return Err(HandleError::rejected(Self::NAME, "enter already requested"));
        }
        // The account id goes out before any reply, as the client expects
        session
            .ctx
            .outbound
            .send_bytes(bytes::Bytes::copy_from_slice(&self.account_id.to_le_bytes()));

        session.enter_pending = true;
        let inter = Arc::clone(&session.inter);
        let events = session.ctx.events.clone();
        tokio::spawn(async move {
            let event = match admit(&inter, self.account_id, self.auth_code).await {
                Ok(Some(slots)) => CharEvent::Admitted {
                    account_id: self.account_id,
                    auth_code: self.auth_code,
                    slots,
                },
                Ok(None) => {
                    info!("Account {} presented an unknown auth code", self.account_id);
                    CharEvent::Refused(CharEnterError::Rejected)
                }
                Err(e) => {
                    warn!("Could not verify account {}: {}", self.account_id, e);
                    CharEvent::Refused(CharEnterError::ServerClosed)
                }
            };
            let _ = events.send(event);
        });
        Ok(())
    }
}

impl Handle<CharSession> for ChPing {
    fn handle(self, session: &mut CharSession) -> Result<(), HandleError> {
        session.require_account(Self::NAME, self.account_id)
    }
}

impl Handle<CharSession> for ChSelectChar {
    fn handle(self, session: &mut CharSession) -> Result<(), HandleError> {
        session.state.require_authenticated(Self::NAME)?;
        Err(HandleError::rejected(Self::NAME, format!("no character in slot {}", self.slot)))
    }
}

impl Handle<CharSession> for ChSelectAccessibleMapname {
    fn handle(self, session: &mut CharSession) -> Result<(), HandleError> {
        session.state.require_authenticated(Self::NAME)?;
        Err(HandleError::rejected(Self::NAME, format!("no character in slot {}", self.slot)))
    }
}

impl Handle<CharSession> for ChDeleteChar3 {
    fn handle(self, session: &mut CharSession) -> Result<(), HandleError> {
        session.state.require_authenticated(Self::NAME)?;
        session.ctx.outbound.send(&HcDeleteChar3 {
            character_id: self.character_id,
            result: CharacterDeleteResult::DatabaseError as u32,
        });
        Ok(())
    }
}

impl Handle<CharSession> for ChMakeSecondPasswd {
    fn handle(self, session: &mut CharSession) -> Result<(), HandleError> {
        session.require_account(Self::NAME, self.account_id)?;
        debug!("Account {} set a PIN", self.account_id);
        Ok(())
    }
}

pub fn dispatch_table(version: PacketVersion) -> DispatchTable<CharSession> {
    DispatchTable::builder(version)
        .handle::<ChEnter>()
        .handle::<ChSelectChar>()
        .handle::<ChPing>()
        .handle::<ChDeleteChar3>()
        .handle::<ChSelectAccessibleMapname>()
        .handle::<ChMakeSecondPasswd>()
        .transmit::<HcAcceptEnter>()
        .transmit::<HcRefuseEnter>()
        .transmit::<HcDeleteChar3>()
        .build()
}

pub async fn start(config: ServerConfig) -> Result<RoleHandle, ServerError> {
    let listener = TcpListener::bind(config.network.listen_address()).await?;
    let manager = Arc::new(ConnectionManager::new());
    let (main_loop, inter) = main_loop_with_inter(ServerRole::Char, &config, &manager);

    let launch = Launch {
        role: ServerRole::Char,
        listener,
        kind: ConnectionKind::Client,
        table: Arc::new(dispatch_table(config.core.packet_version)),
        manager,
        main_loop,
    };
    launch.spawn(move |ctx| CharSession::new(ctx, Arc::clone(&inter)), || async {})
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Connection;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn connect() -> DuplexStream {
        let manager = Arc::new(ConnectionManager::new());
        let (client, server) = duplex(1024);
        let connection = Connection::new(
            server,
            "127.0.0.1:51000".to_string(),
            ConnectionKind::Client,
            Arc::new(dispatch_table(PacketVersion::DEFAULT)),
            &manager,
        );
        let session = CharSession::new(connection.context(), Arc::new(InterApi::new()));
        connection.spawn(session);
        client
    }

    #[tokio::test]
    async fn test_enter_without_inter_server_is_refused() {
        let mut client = connect();
        let enter = ChEnter {
            account_id: 2000000,
            auth_code: 77,
            user_level: 0,
            unused: 0,
            gender: 1,
        };
        client.write_all(&enter.serialize().unwrap()).await.unwrap();

        let mut account = [0u8; 4];
        client.read_exact(&mut account).await.unwrap();
        assert_eq!(u32::from_le_bytes(account), 2000000);

        let mut reply = [0u8; 3];
        client.read_exact(&mut reply).await.unwrap();
        let refused = HcRefuseEnter::deserialize(&reply).unwrap();
        assert_eq!(refused.error, CharEnterError::ServerClosed as u8);

        // closed after the refusal
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_delete_requires_login() {
        let mut client = connect();
        let delete = ChDeleteChar3 {
            character_id: 150000,
            birthdate: shared::FixedString::new("990101"),
        };
        client.write_all(&delete.serialize().unwrap()).await.unwrap();
        client.write_all(&ChPing { account_id: 1 }.serialize().unwrap()).await.unwrap();
        client.shutdown().await.unwrap();

        // Rejected messages get no reply and leave the connection open
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[test]
    fn test_table_follows_version() {
        let table = dispatch_table(PacketVersion(20100101));
        assert!(table.handled_length(ChEnter::OPCODE).is_some());
        assert!(table.handled_length(ChDeleteChar3::OPCODE).is_none());
        assert!(table.transmitted_length(HcDeleteChar3::OPCODE).is_none());
    }
}
