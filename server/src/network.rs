//! Connection layer: turns a byte stream into calls on a typed session
//!
//! Each connection is driven by exactly one task. The driver reads into an
//! inbound buffer, frames complete messages with the role's dispatch table
//! and hands each one to the session before reading again. Outbound bytes
//! go through an unbounded queue to a separate writer task, so senders
//! never wait on the socket.

use crate::connection_manager::{ConnectionId, ConnectionKind, ConnectionManager};
use crate::session::{Session, SessionContext};
use bytes::{Bytes, BytesMut};
use log::{debug, error, info, warn};
use shared::{DispatchTable, Packet};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

pub const READ_BUFFER_SIZE: usize = 8192;
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Why a connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed its end
    PeerClosed,
    /// Read failed
    Transport(String),
    /// A handler reported an error the session cannot recover from
    Fatal(String),
    /// Closed through [`Outbound::close`]
    Requested,
    /// Process shutdown
    Shutdown,
}

#[derive(Debug)]
enum WriteCommand {
    Data(Bytes),
    Shutdown,
}

/// Sending side of a connection; cheap to clone and usable from any task
#[derive(Clone)]
pub struct Outbound {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<WriteCommand>,
    close_tx: Arc<watch::Sender<bool>>,
}

impl Outbound {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues a message. Returns false once the connection is closing or
    /// when the message cannot be encoded.
    pub fn send<P: Packet>(&self, packet: &P) -> bool {
        let bytes = match packet.serialize() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Connection {}: not sending {}: {}", self.id, P::NAME, e);
                return false;
            }
        };
        let sent = self.send_bytes(bytes);
        if sent {
            debug!("Connection {} <- {}", self.id, P::NAME);
        }
        sent
    }

    pub fn send_bytes(&self, bytes: Bytes) -> bool {
        if self.is_closed() {
            return false;
        }
        self.tx.send(WriteCommand::Data(bytes)).is_ok()
    }

    /// Asks the driver to close the connection after the current message
    pub fn close(&self) {
        self.close_tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.close_tx.borrow()
    }
}

/// A connection that has not started yet.
///
/// Splitting creation from [`spawn`](Connection::spawn) lets the caller hand
/// the [`Outbound`] to other components before the session exists.
pub struct Connection<S: Session, IO> {
    id: ConnectionId,
    peer: String,
    io: IO,
    table: Arc<DispatchTable<S>>,
    manager: Arc<ConnectionManager>,
    outbound: Outbound,
    write_rx: mpsc::UnboundedReceiver<WriteCommand>,
    close_rx: watch::Receiver<bool>,
    events_tx: mpsc::UnboundedSender<S::Event>,
    events_rx: mpsc::UnboundedReceiver<S::Event>,
}

impl<S, IO> Connection<S, IO>
where
    S: Session,
    IO: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(
        io: IO,
        peer: String,
        kind: ConnectionKind,
        table: Arc<DispatchTable<S>>,
        manager: &Arc<ConnectionManager>,
    ) -> Self {
        let id = manager.register(&peer, kind);
        let (tx, write_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = watch::channel(false);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            id,
            peer,
            io,
            table,
            manager: Arc::clone(manager),
            outbound: Outbound {
                id,
                tx,
                close_tx: Arc::new(close_tx),
            },
            write_rx,
            close_rx,
            events_tx,
            events_rx,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn outbound(&self) -> Outbound {
        self.outbound.clone()
    }

    pub fn context(&self) -> SessionContext<S::Event> {
        SessionContext {
            id: self.id,
            peer: self.peer.clone(),
            outbound: self.outbound.clone(),
            events: self.events_tx.clone(),
        }
    }

    pub fn spawn(self, session: S) -> JoinHandle<CloseReason> {
        tokio::spawn(self.run(session))
    }

    /// Drives the connection until it closes, then returns why
    pub async fn run(self, mut session: S) -> CloseReason {
        let Connection {
            id,
            peer: _,
            io,
            table,
            manager,
            outbound,
            write_rx,
            mut close_rx,
            events_tx: _events_tx,
            mut events_rx,
        } = self;

        let (mut reader, writer) = tokio::io::split(io);
        let writer_task = tokio::spawn(write_loop(id, writer, write_rx, outbound.clone()));
        let mut shutdown = manager.shutdown_signal();
        let mut inbound = BytesMut::with_capacity(READ_BUFFER_SIZE);

        session.on_open();

        let reason = loop {
            if *shutdown.borrow() {
                break CloseReason::Shutdown;
            }
            if *close_rx.borrow() {
                break CloseReason::Requested;
            }

            tokio::select! {
                _ = shutdown.changed() => {}
                _ = close_rx.changed() => {}
                Some(event) = events_rx.recv() => {
                    if let Err(e) = session.on_event(event) {
                        if e.closes_connection() {
                            error!("Connection {}: {}", id, e);
                            break CloseReason::Fatal(e.to_string());
                        }
                        warn!("Connection {}: {}", id, e);
                    }
                }
                result = reader.read_buf(&mut inbound) => match result {
                    Ok(0) => break CloseReason::PeerClosed,
                    Ok(_) => {
                        if let Some(reason) = process_inbound(id, &table, &mut session, &mut inbound, &outbound) {
                            break reason;
                        }
                    }
                    Err(e) => break CloseReason::Transport(e.to_string()),
                },
            }
        };

        debug!("Connection {} closing: {:?}", id, reason);
        session.on_close(&reason);

        // Flush whatever was queued before the close, including from on_close
        let _ = outbound.tx.send(WriteCommand::Shutdown);
        outbound.close();
        if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer_task)
            .await
            .is_err()
        {
            warn!("Connection {}: writer did not drain in time", id);
        }

        manager.deregister(id);
        reason
    }
}

/// Frames and dispatches every complete message in `inbound`.
/// Returns a close reason when the session must end.
fn process_inbound<S: Session>(
    id: ConnectionId,
    table: &DispatchTable<S>,
    session: &mut S,
    inbound: &mut BytesMut,
    outbound: &Outbound,
) -> Option<CloseReason> {
    loop {
        if outbound.is_closed() {
            return Some(CloseReason::Requested);
        }

        match table.frame(inbound) {
            Ok(None) => return None,
            Ok(Some(frame)) => {
                let message = inbound.split_to(frame.len).freeze();
                debug!(
                    "Connection {} -> {} ({} bytes)",
                    id,
                    table.handled_name(frame.opcode).unwrap_or("?"),
                    frame.len
                );
                match table.dispatch(session, &message) {
                    Ok(()) => {}
                    Err(e) if e.closes_connection() => {
                        error!("Connection {}: {}", id, e);
                        return Some(CloseReason::Fatal(e.to_string()));
                    }
                    Err(e) => warn!("Connection {}: {}", id, e),
                }
            }
            Err(e) => {
                // Stream position is lost; discard and resynchronise on the next read
                warn!(
                    "Connection {}: {}, dropping {} buffered byte(s)",
                    id,
                    e,
                    inbound.len()
                );
                inbound.clear();
                return None;
            }
        }
    }
}

async fn write_loop<W>(
    id: ConnectionId,
    writer: W,
    mut rx: mpsc::UnboundedReceiver<WriteCommand>,
    outbound: Outbound,
) where
    W: AsyncWrite + Unpin,
{
    let mut writer = BufWriter::new(writer);

    'outer: while let Some(command) = rx.recv().await {
        let mut next = Some(command);
        while let Some(command) = next.take() {
            match command {
                WriteCommand::Data(bytes) => {
                    if let Err(e) = writer.write_all(&bytes).await {
                        warn!("Connection {}: write failed: {}", id, e);
                        outbound.close();
                        return;
                    }
                }
                WriteCommand::Shutdown => break 'outer,
            }
            next = rx.try_recv().ok();
        }
        if let Err(e) = writer.flush().await {
            warn!("Connection {}: flush failed: {}", id, e);
            outbound.close();
            return;
        }
    }

    let _ = writer.flush().await;
    let _ = writer.shutdown().await;
}

/// Accepts connections until the manager signals shutdown
pub async fn serve<S, F>(
    listener: TcpListener,
    kind: ConnectionKind,
    table: Arc<DispatchTable<S>>,
    manager: Arc<ConnectionManager>,
    mut make_session: F,
) -> io::Result<()>
where
    S: Session,
    F: FnMut(SessionContext<S::Event>) -> S + Send + 'static,
{
    let mut shutdown = manager.shutdown_signal();
    info!("Listening on {}", listener.local_addr()?);

    loop {
        if *shutdown.borrow() {
            info!("Stopped accepting connections");
            return Ok(());
        }

        tokio::select! {
            _ = shutdown.changed() => {}
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("set_nodelay failed for {}: {}", addr, e);
                    }
                    let connection = Connection::new(
                        stream,
                        addr.to_string(),
                        kind,
                        Arc::clone(&table),
                        &manager,
                    );
                    let session = make_session(connection.context());
                    connection.spawn(session);
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            },
        }
    }
}

/// Dials `addr` and wraps the stream in a connection that is not started yet
pub async fn connect<S, A>(
    addr: A,
    kind: ConnectionKind,
    table: Arc<DispatchTable<S>>,
    manager: &Arc<ConnectionManager>,
) -> io::Result<Connection<S, TcpStream>>
where
    S: Session,
    A: ToSocketAddrs,
{
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    let peer = stream.peer_addr()?.to_string();
    Ok(Connection::new(stream, peer, kind, table, manager))
}
