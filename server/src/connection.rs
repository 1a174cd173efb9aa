//! Per-client connection handling: the blocking read loop, the serialized
//! send path and single-fire teardown.

use crate::game::Game;
use crate::network::Registry;
use log::{debug, info, warn};
use shared::{ClientMessage, ServerMessage};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// One connected socket's identity and send handle.
///
/// Lines queued with `send` are drained by a dedicated writer task, so any
/// number of producers (read loops, the timer, broadcasts) get FIFO delivery
/// without ever blocking on network I/O. The `active` flag flips false
/// exactly once; whichever side of the socket fails first runs the teardown.
pub struct Connection {
    id: u32,
    addr: SocketAddr,
    name: Mutex<Option<String>>,
    tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    active: AtomicBool,
}

impl Connection {
    pub fn new(id: u32, addr: SocketAddr, tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            id,
            addr,
            name: Mutex::new(None),
            tx: Mutex::new(Some(tx)),
            active: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn name(&self) -> Option<String> {
        self.name.lock().unwrap().clone()
    }

    pub(crate) fn set_name(&self, name: &str) {
        *self.name.lock().unwrap() = Some(name.to_string());
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Returns true for the first caller only.
    pub fn deactivate(&self) -> bool {
        self.active.swap(false, Ordering::SeqCst)
    }

    /// Enqueues a line for delivery. Never blocks the caller.
    pub fn send(&self, line: &str) {
        if let Some(tx) = self.tx.lock().unwrap().as_ref() {
            let _ = tx.send(line.to_string());
        }
    }

    /// Drops the sender so the writer task drains what is queued and exits,
    /// closing the socket behind it.
    fn close_channel(&self) {
        self.tx.lock().unwrap().take();
    }
}

/// Runs one client from accept to teardown: handshake, then the line-read
/// loop dispatching into the match.
pub async fn handle_client(
    stream: TcpStream,
    addr: SocketAddr,
    id: u32,
    registry: Arc<Registry>,
    game: Arc<Game>,
) {
    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();
    let conn = Arc::new(Connection::new(id, addr, tx));
    registry.add(Arc::clone(&conn));

    spawn_writer(
        write_half,
        rx,
        Arc::clone(&conn),
        Arc::clone(&registry),
        Arc::clone(&game),
    );

    let mut reader = BufReader::new(read_half).lines();

    // Handshake: the first line is the display name.
    let name = match reader.next_line().await {
        Ok(Some(line)) => line.trim().to_string(),
        Ok(None) => {
            debug!("Connection {} closed before the handshake", id);
            teardown(&conn, &registry, &game).await;
            return;
        }
        Err(e) => {
            warn!("Handshake read error on connection {}: {}", id, e);
            teardown(&conn, &registry, &game).await;
            return;
        }
    };

    if name.is_empty() {
        conn.send(&ServerMessage::Notification("A name is required to join.".to_string()).to_string());
        teardown(&conn, &registry, &game).await;
        return;
    }
    if !registry.set_name(id, &name) {
        conn.send(
            &ServerMessage::Notification(format!("The name '{}' is already taken.", name))
                .to_string(),
        );
        teardown(&conn, &registry, &game).await;
        return;
    }

    info!("Player {} joined from {}", name, addr);
    game.add_player(&name);

    loop {
        match reader.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim_end_matches('\r');
                if line.is_empty() {
                    continue;
                }
                match ClientMessage::from_line(line) {
                    ClientMessage::Draw(payload) => {
                        // Opaque stroke data: relayed untouched, sender excluded.
                        registry.broadcast(&ServerMessage::Draw(payload).to_string(), Some(id));
                    }
                    ClientMessage::Clear => {
                        registry.broadcast(&ServerMessage::Clear.to_string(), None);
                    }
                    ClientMessage::ChosenWord(word) => game.choose_word(&name, &word),
                    ClientMessage::Chat(text) => {
                        if !text.is_empty() {
                            game.handle_chat(&name, &text).await;
                        }
                    }
                }
            }
            Ok(None) => {
                info!("Player {} closed the connection", name);
                break;
            }
            Err(e) => {
                warn!("Read error from {}: {}", name, e);
                break;
            }
        }
    }

    teardown(&conn, &registry, &game).await;
}

fn spawn_writer(
    mut write_half: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<String>,
    conn: Arc<Connection>,
    registry: Arc<Registry>,
    game: Arc<Game>,
) {
    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            let framed = format!("{}\n", line);
            if let Err(e) = write_half.write_all(framed.as_bytes()).await {
                warn!("Write error on connection {}: {}", conn.id(), e);
                teardown(&conn, &registry, &game).await;
                break;
            }
        }
    });
}

/// Deregisters the peer and removes its player. The `deactivate` swap makes
/// this safe to reach from both the read loop and the writer task.
async fn teardown(conn: &Arc<Connection>, registry: &Arc<Registry>, game: &Arc<Game>) {
    if !conn.deactivate() {
        return;
    }
    conn.close_channel();
    registry.remove(conn.id());
    if let Some(name) = conn.name() {
        game.remove_player(&name).await;
    } else {
        debug!("Connection {} left without registering", conn.id());
    }
}
