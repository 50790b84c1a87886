//! Keeps a game role connected to the coordination server
//!
//! The link itself never blocks: connection attempts and keepalive pings
//! run in spawned tasks and report back as [`LinkEvent`]s, which the role's
//! main loop feeds into [`InterLink::handle_event`] together with its
//! scheduler. While the link is up a keepalive ping fires every
//! `reconnect_interval`; when the channel goes down a reconnect attempt is
//! scheduled on the same cadence.

use crate::config::InterServerConfig;
use crate::connection_manager::{ConnectionId, ConnectionManager};
use crate::error::InterError;
use crate::inter::api::InterApi;
use crate::inter::channel::{connect_inter, InterChannel};
use crate::scheduler::{TaskId, TaskScheduler};
use log::{debug, info, warn};
use shared::ServerRole;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug)]
pub enum LinkEvent {
    Connected(Arc<InterChannel>),
    ConnectFailed(String),
    Down {
        channel_id: ConnectionId,
        reason: String,
    },
    ReconnectDue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    Up(ConnectionId),
    Down,
    Stopped,
}

pub struct InterLink {
    role: ServerRole,
    config: InterServerConfig,
    manager: Arc<ConnectionManager>,
    api: Arc<InterApi>,
    events_tx: mpsc::UnboundedSender<LinkEvent>,
    state: LinkState,
    keepalive: Option<TaskId>,
    reconnect: Option<TaskId>,
}

impl InterLink {
    pub fn new(
        role: ServerRole,
        config: InterServerConfig,
        manager: Arc<ConnectionManager>,
        api: Arc<InterApi>,
    ) -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let link = InterLink {
            role,
            config,
            manager,
            api,
            events_tx,
            state: LinkState::Idle,
            keepalive: None,
            reconnect: None,
        };
        (link, events_rx)
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_up(&self) -> bool {
        matches!(self.state, LinkState::Up(_))
    }

    pub fn reconnect_interval(&self) -> Duration {
        self.config.reconnect_interval
    }

    pub fn keepalive_task(&self) -> Option<TaskId> {
        self.keepalive
    }

    pub fn reconnect_task(&self) -> Option<TaskId> {
        self.reconnect
    }

    /// Sender for events produced outside the link (tests, shutdown hooks)
    pub fn events(&self) -> mpsc::UnboundedSender<LinkEvent> {
        self.events_tx.clone()
    }

    /// Starts the first connection attempt
    pub fn start(&mut self) {
        if self.state == LinkState::Idle {
            self.spawn_connect();
        }
    }

    fn spawn_connect(&mut self) {
        self.state = LinkState::Connecting;
        let config = self.config.clone();
        let role = self.role;
        let manager = Arc::clone(&self.manager);
        let events = self.events_tx.clone();

        info!("Connecting to inter server at {}", config.address());
        tokio::spawn(async move {
            let event = match connect_inter(&config, role, &manager, Some(events.clone())).await {
                Ok(channel) => LinkEvent::Connected(channel),
                Err(e) => LinkEvent::ConnectFailed(e.to_string()),
            };
            let _ = events.send(event);
        });
    }

    pub fn handle_event(&mut self, event: LinkEvent, scheduler: &mut TaskScheduler) {
        if self.state == LinkState::Stopped {
            if let LinkEvent::Connected(channel) = event {
                channel.close("link stopped");
            }
            return;
        }

        match event {
            LinkEvent::Connected(channel) => {
                if let Some(task) = self.reconnect.take() {
                    scheduler.cancel(task);
                }
                self.state = LinkState::Up(channel.id());
                if let Some(previous) = self.api.set_channel(Some(Arc::clone(&channel))) {
                    previous.close("replaced by new connection");
                }
                self.schedule_keepalive(channel.id(), scheduler);
            }
            LinkEvent::ConnectFailed(reason) => {
                warn!("Inter server connection failed: {}", reason);
                self.state = LinkState::Down;
                self.schedule_reconnect(scheduler);
            }
            LinkEvent::Down { channel_id, reason } => {
                if self.state != LinkState::Up(channel_id) {
                    debug!("Ignoring down event for stale inter channel {}", channel_id);
                    return;
                }
                warn!("Inter server link down: {}", reason);
                if let Some(task) = self.keepalive.take() {
                    scheduler.cancel(task);
                }
                if let Some(channel) = self.api.set_channel(None) {
                    channel.close(&reason);
                }
                self.state = LinkState::Down;
                self.schedule_reconnect(scheduler);
            }
            LinkEvent::ReconnectDue => {
                self.reconnect = None;
                if self.state == LinkState::Down {
                    self.spawn_connect();
                }
            }
        }
    }

    fn schedule_keepalive(&mut self, channel_id: ConnectionId, scheduler: &mut TaskScheduler) {
        if let Some(task) = self.keepalive.take() {
            scheduler.cancel(task);
        }
        let api = Arc::clone(&self.api);
        let events = self.events_tx.clone();

        let task = scheduler.schedule_repeating(self.config.reconnect_interval, move |_| {
            let api = Arc::clone(&api);
            let events = events.clone();
            tokio::spawn(async move {
                match api.ping().await {
                    Ok(()) => debug!("Inter keepalive ok"),
                    // Another call holds the channel, which proves it alive
                    Err(InterError::Busy) => {}
                    Err(e) => {
                        let _ = events.send(LinkEvent::Down {
                            channel_id,
                            reason: format!("keepalive failed: {}", e),
                        });
                    }
                }
            });
        });
        self.keepalive = Some(task);
    }

    fn schedule_reconnect(&mut self, scheduler: &mut TaskScheduler) {
        if let Some(task) = self.reconnect.take() {
            scheduler.cancel(task);
        }
        let events = self.events_tx.clone();
        let interval = self.config.reconnect_interval;
        info!("Reconnecting to inter server in {:?}", interval);
        self.reconnect = Some(scheduler.schedule(interval, move |_| {
            let _ = events.send(LinkEvent::ReconnectDue);
        }));
    }

    /// Cancels pending link tasks and closes the channel
    pub fn shutdown(&mut self, scheduler: &mut TaskScheduler) {
        for task in [self.keepalive.take(), self.reconnect.take()].into_iter().flatten() {
            scheduler.cancel(task);
        }
        if let Some(channel) = self.api.set_channel(None) {
            channel.close("shutting down");
        }
        self.state = LinkState::Stopped;
    }
}
