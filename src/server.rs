//! TCP calculation server.
//!
//! ```text
//!   ┌──────────────────────────────┐
//!   │  Server::run_until()         │
//!   │  tokio::select! over:        │
//!   │  • shutdown future           │
//!   │  • listener.accept()         │
//!   │  • events_rx (all clients)   │◄── reader task (client A)
//!   └──────────────┬───────────────┘◄── reader task (client B)
//!                  │ Outgoing               ...
//!                  ▼
//!           writer task per client
//! ```
//!
//! Reader tasks only forward raw bytes, writer tasks only write frames. Every
//! [`Session`] lives in the loop's connection table, so all protocol state and
//! history appends are touched from one task.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::expr::CompileOptions;
use crate::history::HistoryLog;
use crate::protocol::framing::write_frame;
use crate::protocol::message::ServerMessage;
use crate::protocol::session::Session;

const READ_CHUNK: usize = 4096;

type ConnectionId = u64;

/// Sent from reader tasks to the loop.
#[derive(Debug)]
enum ConnEvent {
    Data(ConnectionId, Vec<u8>),
    Closed(ConnectionId),
}

/// Sent from the loop to a writer task.
#[derive(Debug)]
enum Outgoing {
    Frame(Vec<u8>),
    /// Flush what was queued, then shut the socket down.
    Close,
}

struct Connection {
    peer: SocketAddr,
    session: Session,
    outbox: mpsc::UnboundedSender<Outgoing>,
    reader: JoinHandle<()>,
}

/// Accepts clients and runs one protocol session per connection.
pub struct Server {
    listener: TcpListener,
    options: CompileOptions,
    history: HistoryLog,
    connections: HashMap<ConnectionId, Connection>,
    next_id: ConnectionId,
    events_tx: mpsc::UnboundedSender<ConnEvent>,
    events_rx: mpsc::UnboundedReceiver<ConnEvent>,
}

impl Server {
    /// Bind the listening socket. Port 0 picks a free port.
    pub async fn bind<A: ToSocketAddrs>(addr: A, options: CompileOptions) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .context("Failed to bind listening socket")?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            listener,
            options,
            history: HistoryLog::new(),
            connections: HashMap::new(),
            next_id: 1,
            events_tx,
            events_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Listening socket has no local address")
    }

    /// Handle to the shared history; stays valid after the server stops.
    pub fn history(&self) -> HistoryLog {
        self.history.clone()
    }

    /// Serve clients until `shutdown` completes, then close every connection.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(addr = %self.local_addr()?, power = self.options.allow_power, "Server listening");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.open(stream, peer),
                    Err(e) => warn!(error = %e, "Accept failed"),
                },
                Some(event) = self.events_rx.recv() => self.dispatch(event),
            }
        }

        let ids: Vec<_> = self.connections.keys().copied().collect();
        for id in ids {
            self.close(id, "server shutting down");
        }
        info!(summary = %self.history.summary(), "Server stopped");
        Ok(())
    }

    fn open(&mut self, stream: TcpStream, peer: SocketAddr) {
        let id = self.next_id;
        self.next_id += 1;

        let (read_half, write_half) = stream.into_split();
        let (outbox, outbox_rx) = mpsc::unbounded_channel();
        tokio::spawn(writer_task(write_half, outbox_rx, peer));
        let reader = tokio::spawn(reader_task(read_half, id, self.events_tx.clone()));

        self.connections.insert(
            id,
            Connection {
                peer,
                session: Session::new(self.options),
                outbox,
                reader,
            },
        );
        info!(%peer, id, clients = self.connections.len(), "Client connected");
    }

    fn dispatch(&mut self, event: ConnEvent) {
        match event {
            ConnEvent::Data(id, bytes) => {
                // Late events from already-closed connections are dropped.
                let Some(conn) = self.connections.get_mut(&id) else {
                    return;
                };
                let output = conn.session.feed(&bytes);
                let mut close = output.close;

                for reply in &output.replies {
                    debug!(peer = %conn.peer, reply = ?reply.message_type(), "Sending reply");
                    match reply.encode() {
                        Ok(frame) => {
                            let _ = conn.outbox.send(Outgoing::Frame(frame));
                        }
                        Err(e) => {
                            // The client is owed a reply; end the session instead.
                            error!(peer = %conn.peer, error = %e, "Reply could not be encoded");
                            let fallback = ServerMessage::ProtocolError {
                                message: format!("server reply could not be encoded: {e}"),
                            };
                            if let Ok(frame) = fallback.clamped().encode() {
                                let _ = conn.outbox.send(Outgoing::Frame(frame));
                            }
                            close = true;
                            break;
                        }
                    }
                }
                self.history.extend(output.records);

                if close {
                    self.close(id, "protocol error");
                }
            }
            ConnEvent::Closed(id) => {
                if let Some(conn) = self.connections.remove(&id) {
                    info!(peer = %conn.peer, id, "Client disconnected");
                }
            }
        }
    }

    fn close(&mut self, id: ConnectionId, reason: &str) {
        if let Some(conn) = self.connections.remove(&id) {
            conn.reader.abort();
            let _ = conn.outbox.send(Outgoing::Close);
            info!(peer = %conn.peer, id, reason, "Closing connection");
        }
    }
}

async fn reader_task(
    mut read_half: OwnedReadHalf,
    id: ConnectionId,
    events: mpsc::UnboundedSender<ConnEvent>,
) {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match read_half.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if events.send(ConnEvent::Data(id, buf[..n].to_vec())).is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!(id, error = %e, "Read failed");
                break;
            }
        }
    }
    let _ = events.send(ConnEvent::Closed(id));
}

async fn writer_task(
    mut write_half: OwnedWriteHalf,
    mut outbox: mpsc::UnboundedReceiver<Outgoing>,
    peer: SocketAddr,
) {
    while let Some(outgoing) = outbox.recv().await {
        match outgoing {
            Outgoing::Frame(frame) => {
                if let Err(e) = write_frame(&mut write_half, &frame).await {
                    debug!(%peer, error = %e, "Write failed");
                    return;
                }
            }
            Outgoing::Close => break,
        }
    }
    let _ = write_half.shutdown().await;
}
