//! Authentication role: verifies credentials, issues the auth code and
//! hands the client the list of character servers

use crate::config::{AccountConfig, CharServerConfig, ServerConfig};
use crate::connection_manager::{ConnectionKind, ConnectionManager};
use crate::error::{InterError, ServerError};
use crate::inter::InterApi;
use crate::network::CloseReason;
use crate::roles::{main_loop_with_inter, Launch, RoleHandle};
use crate::session::{Session, SessionContext, SessionState};
use log::{debug, error, info, warn};
use rand::Rng;
use shared::packets::auth::*;
use shared::{
    DispatchTable, FixedString, GameAccount, Handle, HandleError, Packet, PacketVersion,
    ServerRole, SessionRecord,
};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;

pub const DEFAULT_CHARACTER_SLOTS: u8 = 9;
const HASH_SALT_LENGTH: usize = 16;

/// State shared by every auth session
pub struct AuthContext {
    accounts: HashMap<String, AccountConfig>,
    servers: Vec<CharServerEntry>,
    inter: Arc<InterApi>,
}

impl AuthContext {
    pub fn new(
        accounts: &[AccountConfig],
        character_servers: &[CharServerConfig],
        inter: Arc<InterApi>,
    ) -> Self {
        let accounts = accounts
            .iter()
            .map(|account| (account.username.clone(), account.clone()))
            .collect();
        let mut servers: Vec<CharServerEntry> =
            character_servers.iter().filter_map(server_entry).collect();
        if servers.len() > AcAcceptLogin::MAX_SERVERS {
            warn!(
                "{} character servers configured, only the first {} fit in a login reply",
                servers.len(),
                AcAcceptLogin::MAX_SERVERS
            );
            servers.truncate(AcAcceptLogin::MAX_SERVERS);
        }
        AuthContext {
            accounts,
            servers,
            inter,
        }
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }
}

fn server_entry(server: &CharServerConfig) -> Option<CharServerEntry> {
    let ip: Ipv4Addr = match server.host.parse() {
        Ok(ip) => ip,
        Err(_) => {
            error!(
                "character server `{}` has non-IPv4 host {}, leaving it out",
                server.name, server.host
            );
            return None;
        }
    };
    Some(CharServerEntry {
        ip: u32::from_le_bytes(ip.octets()),
        port: server.port,
        name: FixedString::new(&server.name),
        users: 0,
        server_type: server.server_type,
        is_new: u16::from(server.is_new),
    })
}

fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

#[derive(Debug)]
pub enum AuthEvent {
    Accepted { account: GameAccount, auth_code: u32 },
    Refused(LoginError),
}

pub struct AuthSession {
    ctx: SessionContext<AuthEvent>,
    shared: Arc<AuthContext>,
    state: SessionState,
    login_pending: bool,
}

/// Credentials common to every login message
struct LoginAttempt {
    packet: &'static str,
    version: u32,
    client_type: u8,
    username: String,
    password: String,
}

async fn persist_login(
    inter: &InterApi,
    record: &SessionRecord,
    account: &GameAccount,
) -> Result<(), InterError> {
    inter.store_session(record).await?;
    inter.store_game_account(account).await
}

impl AuthSession {
    pub fn new(ctx: SessionContext<AuthEvent>, shared: Arc<AuthContext>) -> Self {
        AuthSession {
            ctx,
            shared,
            state: SessionState::default(),
            login_pending: false,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    fn refuse(&self, error: LoginError) {
        self.ctx.outbound.send(&AcRefuseLogin::new(error));
    }

    fn begin_login(&mut self, attempt: LoginAttempt) -> Result<(), HandleError> {
        if self.state.is_authenticated() {
            return Err(HandleError::rejected(attempt.packet, "already logged in"));
        }
        if self.login_pending {
            return Err(HandleError::rejected(attempt.packet, "login already in progress"));
        }

        let account = match self.shared.accounts.get(&attempt.username) {
            None => {
                info!("Login for unknown user `{}` refused", attempt.username);
                self.refuse(LoginError::UnregisteredId);
                return Ok(());
            }
            Some(account) if account.password != attempt.password => {
                info!("Login for `{}` refused: wrong password", attempt.username);
                self.refuse(LoginError::IncorrectPassword);
                return Ok(());
            }
            Some(account) => account,
        };

        let auth_code = rand::thread_rng().gen_range(1..=u32::MAX);
        let now = unix_time();
        let record = SessionRecord {
            auth_code,
            account_id: account.account_id,
            current_server: ServerRole::Auth,
            client_version: attempt.version,
            client_type: attempt.client_type,
            map_name: String::new(),
            login_time: now,
        };
        let game_account = GameAccount {
            account_id: account.account_id,
            username: account.username.clone(),
            gender: account.gender,
            group_id: account.group_id,
            character_slots: DEFAULT_CHARACTER_SLOTS,
            last_ip: self.ctx.peer.clone(),
            last_login: now,
        };

        self.login_pending = true;
        let inter = Arc::clone(&self.shared.inter);
        let events = self.ctx.events.clone();
        tokio::spawn(async move {
            let event = match persist_login(&inter, &record, &game_account).await {
                Ok(()) => AuthEvent::Accepted {
                    account: game_account,
                    auth_code,
                },
                Err(e) => {
                    warn!("Could not store session for `{}`: {}", game_account.username, e);
                    AuthEvent::Refused(LoginError::Rejected)
                }
            };
            let _ = events.send(event);
        });
        Ok(())
    }
}

impl Session for AuthSession {
    type Event = AuthEvent;

    fn on_event(&mut self, event: AuthEvent) -> Result<(), HandleError> {
        self.login_pending = false;
        match event {
            AuthEvent::Accepted { account, auth_code } => {
                self.state
                    .authenticate(AcAcceptLogin::NAME, account.account_id, auth_code)?;
                info!(
                    "Account {} (`{}`) logged in from {}",
                    account.account_id, account.username, self.ctx.peer
                );
                self.ctx.outbound.send(&AcAcceptLogin {
                    auth_code,
                    account_id: account.account_id,
                    user_level: account.group_id,
                    last_login_ip: 0,
                    last_login_time: FixedString::default(),
                    gender: account.gender,
                    servers: self.shared.servers.clone(),
                });
            }
            AuthEvent::Refused(error) => self.refuse(error),
        }
        Ok(())
    }

    fn on_close(&mut self, reason: &CloseReason) {
        debug!("Auth session {} closed: {:?}", self.ctx.id, reason);
    }
}

impl Handle<AuthSession> for CaLogin {
    fn handle(self, session: &mut AuthSession) -> Result<(), HandleError> {
        session.begin_login(LoginAttempt {
            packet: Self::NAME,
            version: self.version,
            client_type: self.client_type,
            username: self.username.as_str(),
            password: self.password.as_str(),
        })
    }
}

impl Handle<AuthSession> for CaLoginPcbang {
    fn handle(self, session: &mut AuthSession) -> Result<(), HandleError> {
        debug!("Internet-cafe login from {} ({})", self.ip.as_str(), self.mac_address.as_str());
        session.begin_login(LoginAttempt {
            packet: Self::NAME,
            version: self.version,
            client_type: self.client_type,
            username: self.username.as_str(),
            password: self.password.as_str(),
        })
    }
}

impl Handle<AuthSession> for CaSsoLoginReq {
    fn handle(self, session: &mut AuthSession) -> Result<(), HandleError> {
        session.begin_login(LoginAttempt {
            packet: Self::NAME,
            version: self.version,
            client_type: self.client_type,
            username: self.username.as_str(),
            password: self.password.as_str(),
        })
    }
}

impl Handle<AuthSession> for CaReqHash {
    fn handle(self, session: &mut AuthSession) -> Result<(), HandleError> {
        let mut salt = vec![0u8; HASH_SALT_LENGTH];
        rand::thread_rng().fill(&mut salt[..]);
        session.ctx.outbound.send(&AcAckHash { salt });
        Ok(())
    }
}

impl Handle<AuthSession> for CaConnectInfoChanged {
    fn handle(self, session: &mut AuthSession) -> Result<(), HandleError> {
        debug!("`{}` still connected on {}", self.username.as_str(), session.ctx.id);
        Ok(())
    }
}

impl Handle<AuthSession> for CaExeHashcheck {
    fn handle(self, session: &mut AuthSession) -> Result<(), HandleError> {
        debug!("Client hash from {}: {:02x?}", session.ctx.peer, self.hash);
        Ok(())
    }
}

pub fn dispatch_table(version: PacketVersion) -> DispatchTable<AuthSession> {
    DispatchTable::builder(version)
        .handle::<CaLogin>()
        .handle::<CaReqHash>()
        .handle::<CaConnectInfoChanged>()
        .handle::<CaExeHashcheck>()
        .handle::<CaLoginPcbang>()
        .handle::<CaSsoLoginReq>()
        .transmit::<AcAcceptLogin>()
        .transmit::<AcRefuseLogin>()
        .transmit::<AcAckHash>()
        .transmit::<AcAckEkeyFailNotusedekey>()
        .build()
}

pub async fn start(config: ServerConfig) -> Result<RoleHandle, ServerError> {
    let listener = TcpListener::bind(config.network.listen_address()).await?;
    let manager = Arc::new(ConnectionManager::new());
    let (main_loop, inter) = main_loop_with_inter(ServerRole::Auth, &config, &manager);

    let shared = Arc::new(AuthContext::new(
        &config.accounts,
        &config.character_servers,
        inter,
    ));
    info!(
        "Auth server knows {} account(s) and {} character server(s)",
        shared.accounts.len(),
        shared.server_count()
    );

    let launch = Launch {
        role: ServerRole::Auth,
        listener,
        kind: ConnectionKind::Client,
        table: Arc::new(dispatch_table(config.core.packet_version)),
        manager,
        main_loop,
    };
    launch.spawn(move |ctx| AuthSession::new(ctx, Arc::clone(&shared)), || async {})
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Connection;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    fn context() -> Arc<AuthContext> {
        let accounts = vec![AccountConfig {
            account_id: 2000000,
            username: "admin".to_string(),
            password: "secret".to_string(),
            gender: 1,
            group_id: 99,
        }];
        let servers = vec![
            CharServerConfig {
                id: 1,
                name: "Horizon".to_string(),
                host: "127.0.0.1".to_string(),
                port: 6121,
                server_type: 0,
                is_new: true,
            },
            CharServerConfig {
                id: 2,
                name: "Named host".to_string(),
                host: "char.example".to_string(),
                port: 6122,
                server_type: 0,
                is_new: false,
            },
        ];
        Arc::new(AuthContext::new(&accounts, &servers, Arc::new(InterApi::new())))
    }

    fn login(username: &str, password: &str) -> Vec<u8> {
        CaLogin {
            version: 55,
            username: FixedString::new(username),
            password: FixedString::new(password),
            client_type: 0,
        }
        .serialize()
        .unwrap()
        .to_vec()
    }

    #[test]
    fn test_server_list_skips_unresolvable_hosts() {
        let shared = context();
        assert_eq!(shared.server_count(), 1);
        assert_eq!(shared.servers[0].ip.to_le_bytes(), [127, 0, 0, 1]);
        assert_eq!(shared.servers[0].is_new, 1);
    }

    #[test]
    fn test_server_list_is_capped_to_one_reply() {
        let servers: Vec<CharServerConfig> = (0..2100)
            .map(|id| CharServerConfig {
                id,
                name: format!("char{}", id),
                host: "10.0.0.1".to_string(),
                port: 6121,
                server_type: 0,
                is_new: false,
            })
            .collect();
        let shared = AuthContext::new(&[], &servers, Arc::new(InterApi::new()));
        assert_eq!(shared.server_count(), AcAcceptLogin::MAX_SERVERS);

        let accept = AcAcceptLogin {
            auth_code: 1,
            account_id: 2000000,
            user_level: 0,
            last_login_ip: 0,
            last_login_time: FixedString::default(),
            gender: 0,
            servers: shared.servers.clone(),
        };
        let bytes = accept.serialize().unwrap();
        assert_eq!(u16::from_le_bytes([bytes[2], bytes[3]]) as usize, bytes.len());
    }

    #[test]
    fn test_version_gates_sso_login() {
        let old = dispatch_table(PacketVersion(20090101));
        assert!(old.handled_length(CaSsoLoginReq::OPCODE).is_none());
        assert!(old.handled_length(CaLoginPcbang::OPCODE).is_some());
        let new = dispatch_table(PacketVersion::DEFAULT);
        assert!(new.handled_length(CaSsoLoginReq::OPCODE).is_some());
    }

    #[tokio::test]
    async fn test_bad_credentials_are_refused() {
        let manager = Arc::new(ConnectionManager::new());
        let (mut client, server) = duplex(1024);
        let connection = Connection::new(
            server,
            "127.0.0.1:50000".to_string(),
            ConnectionKind::Client,
            Arc::new(dispatch_table(PacketVersion::DEFAULT)),
            &manager,
        );
        let session = AuthSession::new(connection.context(), context());
        connection.spawn(session);

        client.write_all(&login("nobody", "x")).await.unwrap();
        let mut reply = [0u8; 23];
        client.read_exact(&mut reply).await.unwrap();
        let refused = AcRefuseLogin::deserialize(&reply).unwrap();
        assert_eq!(refused.error, LoginError::UnregisteredId as u8);

        client.write_all(&login("admin", "wrong")).await.unwrap();
        client.read_exact(&mut reply).await.unwrap();
        let refused = AcRefuseLogin::deserialize(&reply).unwrap();
        assert_eq!(refused.error, LoginError::IncorrectPassword as u8);
    }

    #[tokio::test]
    async fn test_login_without_inter_server_is_rejected() {
        let manager = Arc::new(ConnectionManager::new());
        let (mut client, server) = duplex(1024);
        let connection = Connection::new(
            server,
            "127.0.0.1:50001".to_string(),
            ConnectionKind::Client,
            Arc::new(dispatch_table(PacketVersion::DEFAULT)),
            &manager,
        );
        let session = AuthSession::new(connection.context(), context());
        connection.spawn(session);

        client.write_all(&login("admin", "secret")).await.unwrap();
        let mut reply = [0u8; 23];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(AcRefuseLogin::deserialize(&reply).unwrap().error, LoginError::Rejected as u8);
    }

    #[tokio::test]
    async fn test_hash_request_gets_salt() {
        let manager = Arc::new(ConnectionManager::new());
        let (mut client, server) = duplex(1024);
        let connection = Connection::new(
            server,
            "127.0.0.1:50002".to_string(),
            ConnectionKind::Client,
            Arc::new(dispatch_table(PacketVersion::DEFAULT)),
            &manager,
        );
        let session = AuthSession::new(connection.context(), context());
        connection.spawn(session);

        client.write_all(&CaReqHash.serialize().unwrap()).await.unwrap();
        let mut reply = [0u8; 4 + HASH_SALT_LENGTH];
        client.read_exact(&mut reply).await.unwrap();
        let ack = AcAckHash::deserialize(&reply).unwrap();
        assert_eq!(ack.salt.len(), HASH_SALT_LENGTH);
    }
}
