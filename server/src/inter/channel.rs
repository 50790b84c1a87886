//! Request/reply over an asynchronous inter connection
//!
//! At most one call is outstanding per channel. The caller suspends on a
//! oneshot until the reply handler completes it or the call timeout runs
//! out; a timeout marks the channel unhealthy and closes it.

use crate::config::InterServerConfig;
use crate::connection_manager::{ConnectionId, ConnectionKind, ConnectionManager};
use crate::error::InterError;
use crate::inter::link::LinkEvent;
use crate::network::{self, CloseReason, Outbound};
use crate::session::Session;
use bytes::Bytes;
use log::{info, warn};
use parking_lot::Mutex;
use shared::packets::inter::*;
use shared::{DispatchTable, DispatchTableBuilder, HandleError, Packet, PacketVersion, ServerRole};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

struct PendingCall {
    expected: u16,
    reply: oneshot::Sender<Bytes>,
}

pub struct InterChannel {
    outbound: Outbound,
    call_timeout: Duration,
    pending: Mutex<Option<PendingCall>>,
    healthy: AtomicBool,
}

impl fmt::Debug for InterChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterChannel")
            .field("id", &self.id())
            .field("healthy", &self.is_healthy())
            .field("pending", &self.has_pending_call())
            .finish()
    }
}

impl InterChannel {
    pub fn new(outbound: Outbound, call_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            outbound,
            call_timeout,
            pending: Mutex::new(None),
            healthy: AtomicBool::new(true),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.outbound.id()
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn has_pending_call(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Sends `request` and waits for its reply
    pub async fn send_and_receive<R: InterRequest>(&self, request: &R) -> Result<R::Reply, InterError> {
        if !self.is_healthy() {
            return Err(InterError::ChannelDown);
        }
        let bytes = request.serialize()?;

        let reply_rx = {
            let mut pending = self.pending.lock();
            if pending.is_some() {
                return Err(InterError::Busy);
            }
            let (reply, reply_rx) = oneshot::channel();
            *pending = Some(PendingCall {
                expected: R::Reply::OPCODE,
                reply,
            });
            reply_rx
        };

        if !self.outbound.send_bytes(bytes) {
            self.pending.lock().take();
            return Err(InterError::ChannelDown);
        }

        match tokio::time::timeout(self.call_timeout, reply_rx).await {
            Ok(Ok(frame)) => Ok(R::Reply::deserialize(&frame)?),
            // Reply slot dropped: the connection went away mid-call
            Ok(Err(_)) => Err(InterError::ChannelDown),
            Err(_) => {
                self.pending.lock().take();
                self.mark_unhealthy(&format!("{} timed out", R::NAME));
                Err(InterError::Timeout {
                    packet: R::NAME,
                    timeout_ms: self.call_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Hands a reply frame to the waiting call.
    /// Returns false when no call is waiting for this opcode.
    pub fn complete(&self, frame: &[u8]) -> bool {
        let opcode = match frame {
            [lo, hi, ..] => u16::from_le_bytes([*lo, *hi]),
            _ => return false,
        };
        let mut pending = self.pending.lock();
        match pending.as_ref() {
            Some(call) if call.expected == opcode => {}
            _ => return false,
        }
        match pending.take() {
            Some(call) => call.reply.send(Bytes::copy_from_slice(frame)).is_ok(),
            None => false,
        }
    }

    /// Marks the channel unhealthy and closes its connection.
    /// Only the first call has any effect; returns whether it was this one.
    pub fn mark_unhealthy(&self, reason: &str) -> bool {
        if !self.healthy.swap(false, Ordering::AcqRel) {
            return false;
        }
        warn!("Inter channel {} unhealthy: {}", self.id(), reason);
        self.outbound.close();
        true
    }

    /// Fails any waiting call and closes the channel
    pub fn close(&self, reason: &str) {
        self.mark_unhealthy(reason);
        self.pending.lock().take();
    }
}

/// Session on our end of the link to the coordination server
pub struct InterClientSession {
    channel: Arc<InterChannel>,
    link_events: Option<mpsc::UnboundedSender<LinkEvent>>,
}

impl InterClientSession {
    pub fn new(
        channel: Arc<InterChannel>,
        link_events: Option<mpsc::UnboundedSender<LinkEvent>>,
    ) -> Self {
        Self {
            channel,
            link_events,
        }
    }
}

impl Session for InterClientSession {
    type Event = ();

    fn on_close(&mut self, reason: &CloseReason) {
        self.channel.close(&format!("connection closed: {:?}", reason));
        if let Some(events) = &self.link_events {
            let _ = events.send(LinkEvent::Down {
                channel_id: self.channel.id(),
                reason: format!("{:?}", reason),
            });
        }
    }
}

fn complete_reply(session: &mut InterClientSession, frame: &[u8]) -> Result<(), HandleError> {
    if session.channel.complete(frame) {
        Ok(())
    } else {
        Err(HandleError::rejected("INTER_REPLY", "no call is waiting for this reply"))
    }
}

fn reply<P: Packet>(builder: DispatchTableBuilder<InterClientSession>) -> DispatchTableBuilder<InterClientSession> {
    builder.handle_raw(P::OPCODE, P::NAME, P::LENGTH, complete_reply)
}

/// Replies are handled, requests transmitted
pub fn client_table() -> DispatchTable<InterClientSession> {
    let builder = DispatchTable::builder(PacketVersion::ANY);
    let builder = reply::<InterConnectAck>(builder);
    let builder = reply::<InterPong>(builder);
    let builder = reply::<InterSessionGet>(builder);
    let builder = reply::<InterSessionSetAck>(builder);
    let builder = reply::<InterSessionDelAck>(builder);
    let builder = reply::<InterGameAccountGet>(builder);
    let builder = reply::<InterGameAccountSetAck>(builder);
    let builder = reply::<InterGameAccountDelAck>(builder);
    builder
        .transmit::<InterConnectInit>()
        .transmit::<InterPing>()
        .transmit::<InterSessionReq>()
        .transmit::<InterSessionSet>()
        .transmit::<InterSessionDel>()
        .transmit::<InterGameAccountReq>()
        .transmit::<InterGameAccountSet>()
        .transmit::<InterGameAccountDel>()
        .build()
}

/// Dials the coordination server and performs the password handshake
pub async fn connect_inter(
    config: &InterServerConfig,
    role: ServerRole,
    manager: &Arc<ConnectionManager>,
    link_events: Option<mpsc::UnboundedSender<LinkEvent>>,
) -> Result<Arc<InterChannel>, InterError> {
    let addr = config.address();
    let table = Arc::new(client_table());

    let connection = match tokio::time::timeout(
        config.call_timeout,
        network::connect(addr.as_str(), ConnectionKind::InterLink, table, manager),
    )
    .await
    {
        Ok(Ok(connection)) => connection,
        Ok(Err(source)) => return Err(InterError::Connect { addr, source }),
        Err(_) => {
            return Err(InterError::Connect {
                addr,
                source: io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
            })
        }
    };

    let channel = InterChannel::new(connection.outbound(), config.call_timeout);
    connection.spawn(InterClientSession::new(Arc::clone(&channel), link_events));

    let ack = channel
        .send_and_receive(&InterConnectInit::new(role, &config.password))
        .await?;
    if !ack.is_ok() {
        channel.close("handshake refused");
        return Err(InterError::Refused {
            packet: InterConnectInit::NAME,
            code: ack.result,
        });
    }

    info!("Connected to inter server at {} as {}", addr, role.name());
    Ok(channel)
}
