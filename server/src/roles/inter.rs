//! Coordination role: answers session and account requests from the
//! other roles out of a shared in-memory store

use crate::config::ServerConfig;
use crate::connection_manager::{ConnectionKind, ConnectionManager};
use crate::error::ServerError;
use crate::inter::InterStore;
use crate::network::CloseReason;
use crate::roles::{Launch, MainLoop, RoleHandle};
use crate::session::{Session, SessionContext};
use log::{debug, info, warn};
use shared::packets::inter::*;
use shared::{DispatchTable, Handle, HandleError, Packet, PacketVersion, ServerRole};
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct InterPeerSession {
    ctx: SessionContext<()>,
    store: Arc<InterStore>,
    password: Arc<str>,
    peer_role: Option<ServerRole>,
}

impl InterPeerSession {
    pub fn new(ctx: SessionContext<()>, store: Arc<InterStore>, password: Arc<str>) -> Self {
        InterPeerSession {
            ctx,
            store,
            password,
            peer_role: None,
        }
    }

    pub fn peer_role(&self) -> Option<ServerRole> {
        self.peer_role
    }

    /// Every request except the handshake needs a completed handshake
    fn require_connected(&self, packet: &'static str) -> Result<ServerRole, HandleError> {
        self.peer_role
            .ok_or_else(|| HandleError::fatal(packet, "request before INTER_CONNECT_INIT"))
    }

    fn reply<P: Packet>(&self, packet: &P) {
        self.ctx.outbound.send(packet);
    }
}

impl Session for InterPeerSession {
    type Event = ();

    fn on_close(&mut self, reason: &CloseReason) {
        match self.peer_role {
            Some(role) => info!("{} server on {} disconnected: {:?}", role.name(), self.ctx.peer, reason),
            None => debug!("Inter peer {} closed before handshake: {:?}", self.ctx.peer, reason),
        }
    }
}

impl Handle<InterPeerSession> for InterConnectInit {
    fn handle(self, session: &mut InterPeerSession) -> Result<(), HandleError> {
        if session.peer_role.is_some() {
            return Err(HandleError::rejected(Self::NAME, "handshake already completed"));
        }

        let result = match ServerRole::from_u8(self.role) {
            _ if self.password != *session.password => InterResult::BadPassword,
            None | Some(ServerRole::Inter) => InterResult::BadRole,
            Some(role) => {
                session.peer_role = Some(role);
                info!("{} server connected from {}", role.name(), session.ctx.peer);
                InterResult::Ok
            }
        };

        session.reply(&InterConnectAck::new(result));
        if result != InterResult::Ok {
            warn!("Refused inter connection from {}: {:?}", session.ctx.peer, result);
            session.ctx.outbound.close();
        }
        Ok(())
    }
}

impl Handle<InterPeerSession> for InterPing {
    fn handle(self, session: &mut InterPeerSession) -> Result<(), HandleError> {
        session.require_connected(Self::NAME)?;
        session.reply(&InterPong);
        Ok(())
    }
}

impl Handle<InterPeerSession> for InterSessionReq {
    fn handle(self, session: &mut InterPeerSession) -> Result<(), HandleError> {
        session.require_connected(Self::NAME)?;
        let reply = match session.store.get_session(self.auth_code) {
            Some(record) => InterSessionGet::found(&record).map_err(|source| HandleError::Malformed {
                packet: Self::NAME,
                source,
            })?,
            None => InterSessionGet::not_found(),
        };
        session.reply(&reply);
        Ok(())
    }
}

impl Handle<InterPeerSession> for InterSessionSet {
    fn handle(self, session: &mut InterPeerSession) -> Result<(), HandleError> {
        session.require_connected(Self::NAME)?;
        match self.decode() {
            Ok(record) => {
                session.store.store_session(record);
                session.reply(&InterSessionSetAck::new(InterResult::Ok));
                Ok(())
            }
            Err(source) => {
                session.reply(&InterSessionSetAck::new(InterResult::Malformed));
                Err(HandleError::Malformed {
                    packet: Self::NAME,
                    source,
                })
            }
        }
    }
}

impl Handle<InterPeerSession> for InterSessionDel {
    fn handle(self, session: &mut InterPeerSession) -> Result<(), HandleError> {
        session.require_connected(Self::NAME)?;
        let result = if session.store.delete_session(self.auth_code) {
            InterResult::Ok
        } else {
            InterResult::NotFound
        };
        session.reply(&InterSessionDelAck::new(result));
        Ok(())
    }
}

impl Handle<InterPeerSession> for InterGameAccountReq {
    fn handle(self, session: &mut InterPeerSession) -> Result<(), HandleError> {
        session.require_connected(Self::NAME)?;
        let reply = match session.store.get_account(self.account_id) {
            Some(account) => {
                InterGameAccountGet::found(&account).map_err(|source| HandleError::Malformed {
                    packet: Self::NAME,
                    source,
                })?
            }
            None => InterGameAccountGet::not_found(),
        };
        session.reply(&reply);
        Ok(())
    }
}

impl Handle<InterPeerSession> for InterGameAccountSet {
    fn handle(self, session: &mut InterPeerSession) -> Result<(), HandleError> {
        session.require_connected(Self::NAME)?;
        match self.decode() {
            Ok(account) => {
                session.store.store_account(account);
                session.reply(&InterGameAccountSetAck::new(InterResult::Ok));
                Ok(())
            }
            Err(source) => {
                session.reply(&InterGameAccountSetAck::new(InterResult::Malformed));
                Err(HandleError::Malformed {
                    packet: Self::NAME,
                    source,
                })
            }
        }
    }
}

impl Handle<InterPeerSession> for InterGameAccountDel {
    fn handle(self, session: &mut InterPeerSession) -> Result<(), HandleError> {
        session.require_connected(Self::NAME)?;
        let result = if session.store.delete_account(self.account_id) {
            InterResult::Ok
        } else {
            InterResult::NotFound
        };
        session.reply(&InterGameAccountDelAck::new(result));
        Ok(())
    }
}

/// Requests are handled, replies transmitted
pub fn dispatch_table() -> DispatchTable<InterPeerSession> {
    DispatchTable::builder(PacketVersion::ANY)
        .handle::<InterConnectInit>()
        .handle::<InterPing>()
        .handle::<InterSessionReq>()
        .handle::<InterSessionSet>()
        .handle::<InterSessionDel>()
        .handle::<InterGameAccountReq>()
        .handle::<InterGameAccountSet>()
        .handle::<InterGameAccountDel>()
        .transmit::<InterConnectAck>()
        .transmit::<InterPong>()
        .transmit::<InterSessionGet>()
        .transmit::<InterSessionSetAck>()
        .transmit::<InterSessionDelAck>()
        .transmit::<InterGameAccountGet>()
        .transmit::<InterGameAccountSetAck>()
        .transmit::<InterGameAccountDelAck>()
        .build()
}

pub async fn start(config: ServerConfig) -> Result<RoleHandle, ServerError> {
    start_with_store(config, Arc::new(InterStore::new())).await
}

/// Starts the coordination role on an existing store
pub async fn start_with_store(
    config: ServerConfig,
    store: Arc<InterStore>,
) -> Result<RoleHandle, ServerError> {
    let listener = TcpListener::bind(config.network.listen_address()).await?;
    let manager = Arc::new(ConnectionManager::new());
    let password: Arc<str> = Arc::from(config.inter_server.password.as_str());

    let launch = Launch {
        role: ServerRole::Inter,
        listener,
        kind: ConnectionKind::InterPeer,
        table: Arc::new(dispatch_table()),
        manager: Arc::clone(&manager),
        main_loop: MainLoop::new(ServerRole::Inter, config.core.update_interval, manager),
    };

    let session_store = Arc::clone(&store);
    launch.spawn(
        move |ctx| InterPeerSession::new(ctx, Arc::clone(&session_store), Arc::clone(&password)),
        move || async move {
            info!(
                "Inter store held {} session(s) and {} account(s) at shutdown",
                store.session_count(),
                store.account_count()
            )
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Connection;
    use shared::{GameAccount, SessionRecord};
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::task::JoinHandle;

    struct Peer {
        stream: DuplexStream,
        store: Arc<InterStore>,
        driver: JoinHandle<CloseReason>,
    }

    fn peer() -> Peer {
        let manager = Arc::new(ConnectionManager::new());
        let store = Arc::new(InterStore::new());
        let (stream, server) = duplex(4096);
        let connection = Connection::new(
            server,
            "peer".to_string(),
            ConnectionKind::InterPeer,
            Arc::new(dispatch_table()),
            &manager,
        );
        let session = InterPeerSession::new(connection.context(), Arc::clone(&store), Arc::from("secret"));
        Peer {
            stream,
            store,
            driver: connection.spawn(session),
        }
    }

    async fn read_exact(stream: &mut DuplexStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).await.unwrap();
        buf
    }

    /// Reads one variable-length reply
    async fn read_variable(stream: &mut DuplexStream) -> Vec<u8> {
        let mut head = read_exact(stream, 4).await;
        let len = u16::from_le_bytes([head[2], head[3]]) as usize;
        head.extend(read_exact(stream, len - 4).await);
        head
    }

    async fn handshake(stream: &mut DuplexStream, password: &str) -> InterConnectAck {
        stream
            .write_all(&InterConnectInit::new(ServerRole::Char, password).serialize().unwrap())
            .await
            .unwrap();
        InterConnectAck::deserialize(&read_exact(stream, 3).await).unwrap()
    }

    #[tokio::test]
    async fn test_request_before_handshake_closes() {
        let mut peer = peer();
        peer.stream.write_all(&InterPing.serialize().unwrap()).await.unwrap();
        assert!(matches!(peer.driver.await.unwrap(), CloseReason::Fatal(_)));
    }

    #[tokio::test]
    async fn test_bad_password_is_refused_and_closed() {
        let mut peer = peer();
        let ack = handshake(&mut peer.stream, "wrong").await;
        assert_eq!(ack.result, InterResult::BadPassword as u8);
        assert_eq!(peer.driver.await.unwrap(), CloseReason::Requested);
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let mut peer = peer();
        assert!(handshake(&mut peer.stream, "secret").await.is_ok());

        peer.stream.write_all(&InterPing.serialize().unwrap()).await.unwrap();
        assert_eq!(read_exact(&mut peer.stream, 2).await, vec![0x03, 0x40]);

        let record = SessionRecord {
            auth_code: 77,
            account_id: 2000000,
            current_server: ServerRole::Auth,
            client_version: 20190530,
            client_type: 0,
            map_name: String::new(),
            login_time: 1,
        };
        peer.stream
            .write_all(&InterSessionSet::new(&record).unwrap().serialize().unwrap())
            .await
            .unwrap();
        let ack = InterSessionSetAck::deserialize(&read_exact(&mut peer.stream, 3).await).unwrap();
        assert!(ack.is_ok());
        assert_eq!(peer.store.get_session(77), Some(record.clone()));

        peer.stream
            .write_all(&InterSessionReq { auth_code: 77 }.serialize().unwrap())
            .await
            .unwrap();
        let reply = InterSessionGet::deserialize(&read_variable(&mut peer.stream).await).unwrap();
        assert_eq!(reply.decode().unwrap(), Some(record));

        peer.stream
            .write_all(&InterSessionDel { auth_code: 77 }.serialize().unwrap())
            .await
            .unwrap();
        peer.stream
            .write_all(&InterSessionDel { auth_code: 77 }.serialize().unwrap())
            .await
            .unwrap();
        let first = InterSessionDelAck::deserialize(&read_exact(&mut peer.stream, 3).await).unwrap();
        let second = InterSessionDelAck::deserialize(&read_exact(&mut peer.stream, 3).await).unwrap();
        assert!(first.is_ok());
        assert_eq!(second.result, InterResult::NotFound as u8);
    }

    #[tokio::test]
    async fn test_undecodable_record_is_malformed_not_missing() {
        let mut peer = peer();
        assert!(handshake(&mut peer.stream, "secret").await.is_ok());

        let garbage = InterSessionSet { record: vec![1, 2] };
        peer.stream.write_all(&garbage.serialize().unwrap()).await.unwrap();
        let ack = InterSessionSetAck::deserialize(&read_exact(&mut peer.stream, 3).await).unwrap();
        assert_eq!(ack.result, InterResult::Malformed as u8);

        let garbage = InterGameAccountSet { record: vec![9] };
        peer.stream.write_all(&garbage.serialize().unwrap()).await.unwrap();
        let ack = InterGameAccountSetAck::deserialize(&read_exact(&mut peer.stream, 3).await).unwrap();
        assert_eq!(ack.result, InterResult::Malformed as u8);

        // The connection survives a bad record
        peer.stream.write_all(&InterPing.serialize().unwrap()).await.unwrap();
        assert_eq!(read_exact(&mut peer.stream, 2).await, vec![0x03, 0x40]);
        assert_eq!(peer.store.get_session(0), None);
    }

    #[tokio::test]
    async fn test_missing_account() {
        let mut peer = peer();
        assert!(handshake(&mut peer.stream, "secret").await.is_ok());

        peer.stream
            .write_all(&InterGameAccountReq { account_id: 5 }.serialize().unwrap())
            .await
            .unwrap();
        let reply = InterGameAccountGet::deserialize(&read_variable(&mut peer.stream).await).unwrap();
        assert_eq!(reply.decode().unwrap(), None::<GameAccount>);
    }
}
