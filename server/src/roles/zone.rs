//! Zone role: admits players into the sharded world and relays their
//! movement to the shard that owns them

use crate::config::ServerConfig;
use crate::connection_manager::{ConnectionKind, ConnectionManager};
use crate::error::{InterError, ServerError};
use crate::inter::InterApi;
use crate::network::CloseReason;
use crate::roles::{main_loop_with_inter, Launch, RoleHandle};
use crate::session::{EntityBinding, Session, SessionContext, SessionState};
use crate::world::{map_cache, Player, ShardRegistry};
use log::{debug, info, warn};
use shared::packets::zone::*;
use shared::{DispatchTable, Handle, HandleError, Packet, PacketVersion, ServerRole};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;

/// Visible range sent with `ZC_ACCEPT_ENTER`
const VIEW_SIZE: u8 = 5;

pub struct ZoneContext {
    inter: Arc<InterApi>,
    registry: Arc<ShardRegistry>,
    start_map: String,
    started: Instant,
}

impl ZoneContext {
    pub fn new(inter: Arc<InterApi>, registry: Arc<ShardRegistry>, start_map: &str) -> Self {
        ZoneContext {
            inter,
            registry,
            start_map: start_map.to_string(),
            started: Instant::now(),
        }
    }

    pub fn registry(&self) -> &Arc<ShardRegistry> {
        &self.registry
    }

    /// Milliseconds since the zone started, as the client clock expects
    fn server_time(&self) -> u32 {
        self.started.elapsed().as_millis() as u32
    }
}

#[derive(Debug)]
pub enum ZoneEvent {
    Entered {
        account_id: u32,
        auth_code: u32,
        entity: EntityBinding,
        x: u16,
        y: u16,
    },
    Refused(ZoneEnterError),
}

pub struct ZoneSession {
    ctx: SessionContext<ZoneEvent>,
    shared: Arc<ZoneContext>,
    state: SessionState,
    enter_pending: bool,
}

/// Checks the session with the inter server and places the player.
/// Returns the binding and the cell the player landed on.
async fn enter_world(shared: &ZoneContext, request: &CzEnter) -> Result<(EntityBinding, u16, u16), ZoneEnterError> {
    let inter_failed = |e: InterError| {
        warn!("Inter call for account {} failed: {}", request.account_id, e);
        ZoneEnterError::ServerClosed
    };

    let mut record = match shared.inter.get_session(request.auth_code).await.map_err(inter_failed)? {
        Some(record) if record.account_id == request.account_id => record,
        _ => return Err(ZoneEnterError::SessionInvalid),
    };
    let account = shared
        .inter
        .get_game_account(request.account_id)
        .await
        .map_err(inter_failed)?
        .ok_or(ZoneEnterError::SessionInvalid)?;

    if shared.registry.find_player(&account.username).is_some() {
        info!("`{}` is already in the world", account.username);
        return Err(ZoneEnterError::SessionInvalid);
    }

    let map_name = if record.map_name.is_empty() {
        shared.start_map.clone()
    } else {
        record.map_name.clone()
    };
    let mut player = Player::new(request.account_id, request.character_id, &account.username);
    let spawn = shared
        .registry
        .get_map(&map_name)
        .and_then(|map| map.spawn_point())
        .ok_or(ZoneEnterError::MapUnavailable)?;
    (player.x, player.y) = spawn;
    let map = shared
        .registry
        .add_player_to_map(&map_name, player)
        .await
        .ok_or(ZoneEnterError::MapUnavailable)?;
    let (x, y) = map
        .player(&account.username)
        .map_or((0, 0), |player| (player.x, player.y));

    record.current_server = ServerRole::Zone;
    record.map_name = map_name.clone();
    if let Err(e) = shared.inter.store_session(&record).await {
        shared
            .registry
            .remove_player_from_map(&map_name, &account.username)
            .await;
        return Err(inter_failed(e));
    }

    let entity = EntityBinding {
        character_id: request.character_id,
        name: account.username,
        map_name,
    };
    Ok((entity, x, y))
}

impl ZoneSession {
    pub fn new(ctx: SessionContext<ZoneEvent>, shared: Arc<ZoneContext>) -> Self {
        ZoneSession {
            ctx,
            shared,
            state: SessionState::default(),
            enter_pending: false,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }
}

impl Session for ZoneSession {
    type Event = ZoneEvent;

    fn on_event(&mut self, event: ZoneEvent) -> Result<(), HandleError> {
        self.enter_pending = false;
        match event {
            ZoneEvent::Entered {
                account_id,
                auth_code,
                entity,
                x,
                y,
            } => {
                info!("`{}` entered {} at ({}, {})", entity.name, entity.map_name, x, y);
                self.state.authenticate(CzEnter::NAME, account_id, auth_code)?;
                self.state.bind_entity(CzEnter::NAME, entity)?;
                self.ctx.outbound.send(&ZcAcceptEnter {
                    start_time: self.shared.server_time(),
                    position: PackedPosition::new(x, y, 0),
                    x_size: VIEW_SIZE,
                    y_size: VIEW_SIZE,
                });
            }
            ZoneEvent::Refused(error) => {
                self.ctx.outbound.send(&ZcRefuseEnter::new(error));
                self.ctx.outbound.close();
            }
        }
        Ok(())
    }

    fn on_close(&mut self, reason: &CloseReason) {
        debug!("Zone session {} closed: {:?}", self.ctx.id, reason);
        let Some(entity) = self.state.unbind_entity() else {
            return;
        };
        let registry = Arc::clone(&self.shared.registry);
        tokio::spawn(async move {
            if registry
                .remove_player_from_map(&entity.map_name, &entity.name)
                .await
            {
                info!("`{}` left {}", entity.name, entity.map_name);
            }
        });
    }
}

impl Handle<ZoneSession> for CzEnter {
    fn handle(self, session: &mut ZoneSession) -> Result<(), HandleError> {
        if session.state.is_authenticated() || session.enter_pending {
            return Err(HandleError::rejected(Self::NAME, "enter already requested"));
        }
        session.enter_pending = true;

        let shared = Arc::clone(&session.shared);
        let events = session.ctx.events.clone();
        tokio::spawn(async move {
            let event = match enter_world(&shared, &self).await {
                Ok((entity, x, y)) => ZoneEvent::Entered {
                    account_id: self.account_id,
                    auth_code: self.auth_code,
                    entity,
                    x,
                    y,
                },
                Err(error) => ZoneEvent::Refused(error),
            };
            if let Err(unsent) = events.send(event) {
                // Connection closed while entering; release what was placed
                if let ZoneEvent::Entered { entity, .. } = unsent.0 {
                    shared
                        .registry
                        .remove_player_from_map(&entity.map_name, &entity.name)
                        .await;
                }
            }
        });
        Ok(())
    }
}

impl Handle<ZoneSession> for CzNotifyActorinit {
    fn handle(self, session: &mut ZoneSession) -> Result<(), HandleError> {
        let entity = session.state.require_entity(Self::NAME)?;
        debug!("`{}` finished loading {}", entity.name, entity.map_name);
        Ok(())
    }
}

impl Handle<ZoneSession> for CzRequestTime {
    fn handle(self, session: &mut ZoneSession) -> Result<(), HandleError> {
        session.state.require_entity(Self::NAME)?;
        session.ctx.outbound.send(&ZcNotifyTime {
            server_time: session.shared.server_time(),
        });
        Ok(())
    }
}

impl Handle<ZoneSession> for CzRequestMove {
    fn handle(self, session: &mut ZoneSession) -> Result<(), HandleError> {
        let entity = session.state.require_entity(Self::NAME)?;
        let (x, y) = (self.destination.x(), self.destination.y());
        if !session.shared.registry.move_player(&entity.name, x, y) {
            return Err(HandleError::rejected(Self::NAME, format!("`{}` is not on a map", entity.name)));
        }
        Ok(())
    }
}

impl Handle<ZoneSession> for CzRequestQuit {
    fn handle(self, session: &mut ZoneSession) -> Result<(), HandleError> {
        session.state.require_entity(Self::NAME)?;
        session.ctx.outbound.send(&ZcAcceptQuit { result: 0 });
        Ok(())
    }
}

pub fn dispatch_table(version: PacketVersion) -> DispatchTable<ZoneSession> {
    DispatchTable::builder(version)
        .handle::<CzEnter>()
        .handle::<CzNotifyActorinit>()
        .handle::<CzRequestTime>()
        .handle::<CzRequestMove>()
        .handle::<CzRequestQuit>()
        .transmit::<ZcAcceptEnter>()
        .transmit::<ZcRefuseEnter>()
        .transmit::<ZcNotifyTime>()
        .transmit::<ZcAcceptQuit>()
        .build()
}

pub async fn start(config: ServerConfig) -> Result<RoleHandle, ServerError> {
    let maps = map_cache::load(&config.zone.map_cache_path)?;
    info!(
        "Loaded {} map(s) from {}",
        maps.len(),
        config.zone.map_cache_path.display()
    );
    let registry = ShardRegistry::start(maps, config.zone.shard_count, config.zone.shard_tick)?;

    let listener = match TcpListener::bind(config.network.listen_address()).await {
        Ok(listener) => listener,
        Err(e) => {
            registry.stop_all().await;
            return Err(e.into());
        }
    };
    let manager = Arc::new(ConnectionManager::new());
    let (main_loop, inter) = main_loop_with_inter(ServerRole::Zone, &config, &manager);
    let shared = Arc::new(ZoneContext::new(
        inter,
        Arc::clone(&registry),
        &config.zone.start_map,
    ));

    let launch = Launch {
        role: ServerRole::Zone,
        listener,
        kind: ConnectionKind::Client,
        table: Arc::new(dispatch_table(config.core.packet_version)),
        manager,
        main_loop,
    };
    launch.spawn(
        move |ctx| ZoneSession::new(ctx, Arc::clone(&shared)),
        move || async move { registry.stop_all().await },
    )
}
