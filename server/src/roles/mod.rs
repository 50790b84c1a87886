//! The four server roles and the loop that drives each of them
//!
//! Every role follows the same shape: a composition root (`start`) builds
//! the role's shared state and dispatch table, binds its listener and
//! spawns two things, the accept loop and the [`MainLoop`]. The returned
//! [`RoleHandle`] stops both.

pub mod auth;
pub mod char;
pub mod inter;
pub mod zone;

use crate::config::ServerConfig;
use crate::connection_manager::{ConnectionKind, ConnectionManager};
use crate::error::ServerError;
use crate::inter::{InterApi, InterLink, LinkEvent};
use crate::network;
use crate::scheduler::TaskScheduler;
use crate::session::{Session, SessionContext};
use log::{error, info};
use shared::{DispatchTable, ServerRole};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

const STATUS_INTERVAL: Duration = Duration::from_secs(60);
const CONNECTION_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Single-threaded loop of a role: fires the scheduler every update
/// interval and applies inter link events
pub struct MainLoop {
    role: ServerRole,
    update_interval: Duration,
    manager: Arc<ConnectionManager>,
    scheduler: TaskScheduler,
    link: Option<InterLink>,
    link_events: Option<mpsc::UnboundedReceiver<LinkEvent>>,
}

async fn next_link_event(
    events: &mut Option<mpsc::UnboundedReceiver<LinkEvent>>,
) -> Option<LinkEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

impl MainLoop {
    pub fn new(role: ServerRole, update_interval: Duration, manager: Arc<ConnectionManager>) -> Self {
        MainLoop {
            role,
            update_interval,
            manager,
            scheduler: TaskScheduler::new(),
            link: None,
            link_events: None,
        }
    }

    pub fn with_inter_link(
        mut self,
        link: InterLink,
        events: mpsc::UnboundedReceiver<LinkEvent>,
    ) -> Self {
        self.link = Some(link);
        self.link_events = Some(events);
        self
    }

    pub fn scheduler_mut(&mut self) -> &mut TaskScheduler {
        &mut self.scheduler
    }

    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        if let Some(link) = &mut self.link {
            link.start();
        }

        let role = self.role;
        let manager = Arc::clone(&self.manager);
        self.scheduler.schedule_repeating(STATUS_INTERVAL, move |_| {
            info!(
                "{} server: {} connection(s), {} client(s)",
                role.name(),
                manager.len(),
                manager.count(ConnectionKind::Client)
            );
        });

        let mut ticker = interval(self.update_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_update = Instant::now();

        loop {
            if *stop.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    let now = Instant::now();
                    self.scheduler.update(now - last_update);
                    last_update = now;
                }
                Some(event) = next_link_event(&mut self.link_events) => {
                    if let Some(link) = &mut self.link {
                        link.handle_event(event, &mut self.scheduler);
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.scheduler.begin_shutdown();
        if let Some(link) = &mut self.link {
            link.shutdown(&mut self.scheduler);
        }
        self.scheduler.clear();
        info!("{} main loop stopped", self.role.name());
    }
}

/// Main loop that keeps an inter link up, plus the API sessions call
/// through that link
pub(crate) fn main_loop_with_inter(
    role: ServerRole,
    config: &ServerConfig,
    manager: &Arc<ConnectionManager>,
) -> (MainLoop, Arc<InterApi>) {
    let api = Arc::new(InterApi::new());
    let (link, events) = InterLink::new(
        role,
        config.inter_server.clone(),
        Arc::clone(manager),
        Arc::clone(&api),
    );
    let main_loop = MainLoop::new(role, config.core.update_interval, Arc::clone(manager))
        .with_inter_link(link, events);
    (main_loop, api)
}

/// A running role
pub struct RoleHandle {
    role: ServerRole,
    local_addr: SocketAddr,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RoleHandle {
    pub fn role(&self) -> ServerRole {
        self.role
    }

    /// Address the role actually listens on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting, closes every connection and waits for the role to
    /// wind down
    pub async fn shutdown(self) {
        info!("Shutting down {} server", self.role.name());
        self.stop_tx.send_replace(true);
        if let Err(e) = self.task.await {
            error!("{} server task failed: {}", self.role.name(), e);
        }
    }
}

/// Everything a role needs to go live
pub(crate) struct Launch<S: Session> {
    pub role: ServerRole,
    pub listener: TcpListener,
    pub kind: ConnectionKind,
    pub table: Arc<DispatchTable<S>>,
    pub manager: Arc<ConnectionManager>,
    pub main_loop: MainLoop,
}

impl<S: Session> Launch<S> {
    /// Spawns the accept loop and main loop. `on_stop` runs after every
    /// connection has been closed.
    pub fn spawn<F, G, W>(self, make_session: F, on_stop: G) -> Result<RoleHandle, ServerError>
    where
        F: FnMut(SessionContext<S::Event>) -> S + Send + 'static,
        G: FnOnce() -> W + Send + 'static,
        W: Future<Output = ()> + Send,
    {
        let Launch {
            role,
            listener,
            kind,
            table,
            manager,
            main_loop,
        } = self;
        let local_addr = listener.local_addr()?;
        let (stop_tx, stop_rx) = watch::channel(false);

        info!(
            "{} server listening on {} (packet version {}, {} handled / {} transmitted opcodes)",
            role.name(),
            local_addr,
            table.version(),
            table.handled_count(),
            table.transmitted_count()
        );

        let task = tokio::spawn(async move {
            let accept = tokio::spawn(network::serve(
                listener,
                kind,
                table,
                Arc::clone(&manager),
                make_session,
            ));

            main_loop.run(stop_rx).await;

            manager.close_all();
            match accept.await {
                Ok(Err(e)) => error!("{} accept loop failed: {}", role.name(), e),
                Err(e) => error!("{} accept loop panicked: {}", role.name(), e),
                Ok(Ok(())) => {}
            }
            let started = Instant::now();
            while !manager.is_empty() && started.elapsed() < CONNECTION_DRAIN_TIMEOUT {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }

            on_stop().await;
            info!("{} server stopped", role.name());
        });

        Ok(RoleHandle {
            role,
            local_addr,
            stop_tx,
            task,
        })
    }
}

/// Starts the role named in `config`
pub async fn start(config: ServerConfig) -> Result<RoleHandle, ServerError> {
    match config.role {
        ServerRole::Auth => auth::start(config).await,
        ServerRole::Char => char::start(config).await,
        ServerRole::Zone => zone::start(config).await,
        ServerRole::Inter => inter::start(config).await,
    }
}

/// Runs a role until Ctrl-C
pub async fn run(config: ServerConfig) -> Result<(), ServerError> {
    let handle = start(config).await?;
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down gracefully...");
    handle.shutdown().await;
    Ok(())
}
