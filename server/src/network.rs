//! Session management: the connection registry used for all fan-out, the
//! accept loop with capacity enforcement, and the pre-game countdown.

use crate::connection::{handle_client, Connection};
use crate::game::{Game, GameConfig};
use crate::lexicon::Lexicon;
use log::{debug, error, info, warn};
use shared::ServerMessage;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{interval, sleep, timeout, Duration};

/// The live connection list and broadcast primitive shared by the whole
/// server. The list is snapshotted under its lock; the sends themselves are
/// non-blocking channel pushes, so a fan-out to many clients never holds the
/// lock while touching the network.
pub struct Registry {
    peers: Mutex<Vec<Arc<Connection>>>,
}

impl Registry {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> Arc<Registry> {
        Arc::new(Registry {
            peers: Mutex::new(Vec::new()),
        })
    }

    pub fn add(&self, conn: Arc<Connection>) {
        self.peers.lock().unwrap().push(conn);
    }

    pub fn remove(&self, id: u32) {
        self.peers.lock().unwrap().retain(|c| c.id() != id);
    }

    pub fn len(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.lock().unwrap().is_empty()
    }

    /// Claims a display name for the given connection. Refused when another
    /// live peer already answers to it.
    pub fn set_name(&self, id: u32, name: &str) -> bool {
        let peers = self.peers.lock().unwrap();
        if peers.iter().any(|c| c.name().as_deref() == Some(name)) {
            return false;
        }
        match peers.iter().find(|c| c.id() == id) {
            Some(conn) => {
                conn.set_name(name);
                true
            }
            None => false,
        }
    }

    /// True once every connected peer has completed the name handshake.
    pub fn all_named(&self) -> bool {
        self.peers.lock().unwrap().iter().all(|c| c.name().is_some())
    }

    pub fn broadcast(&self, line: &str, exclude: Option<u32>) {
        let peers: Vec<Arc<Connection>> = self.peers.lock().unwrap().to_vec();
        for peer in peers {
            if Some(peer.id()) == exclude || !peer.is_active() {
                continue;
            }
            peer.send(line);
        }
    }

    /// Directed send by player name. Returns false if nobody answers to it.
    pub fn send_to(&self, name: &str, line: &str) -> bool {
        let peer = {
            let peers = self.peers.lock().unwrap();
            peers
                .iter()
                .find(|c| c.name().as_deref() == Some(name))
                .cloned()
        };
        match peer {
            Some(peer) => {
                peer.send(line);
                true
            }
            None => false,
        }
    }
}

/// Accepts connections, enforces the player cap and decides when the match
/// starts.
pub struct Server {
    listener: TcpListener,
    registry: Arc<Registry>,
    game: Arc<Game>,
    config: GameConfig,
    next_id: AtomicU32,
    countdown_armed: AtomicBool,
}

impl Server {
    pub async fn new(
        addr: &str,
        config: GameConfig,
        words_path: &Path,
    ) -> Result<Server, Box<dyn std::error::Error>> {
        let lexicon = Lexicon::load(words_path)?;
        if lexicon.is_empty() {
            warn!("Word list at {} loaded no words", words_path.display());
        } else {
            info!("Loaded {} words from {}", lexicon.len(), words_path.display());
        }

        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let registry = Registry::new();
        let game = Game::new(Arc::clone(&registry), lexicon, config.clone());

        Ok(Server {
            listener,
            registry,
            game,
            config,
            next_id: AtomicU32::new(1),
            countdown_armed: AtomicBool::new(false),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop. Runs until the task is dropped.
    pub async fn run(self: Arc<Self>) {
        Self::spawn_start_checker(Arc::clone(&self));

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => self.accept(stream, addr).await,
                Err(e) => error!("Accept failed: {}", e),
            }
        }
    }

    async fn accept(&self, stream: TcpStream, addr: SocketAddr) {
        if self.registry.len() >= self.config.max_players {
            info!("Rejecting {}: the game is full", addr);
            reject(
                stream,
                &format!(
                    "The game is full (maximum {} players).",
                    self.config.max_players
                ),
            )
            .await;
            return;
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        debug!("Connection {} accepted from {}", id, addr);
        tokio::spawn(handle_client(
            stream,
            addr,
            id,
            Arc::clone(&self.registry),
            Arc::clone(&self.game),
        ));
    }

    /// Polls once per second until the lobby can start: enough peers, and
    /// every one of them has picked a name. The CAS on `countdown_armed`
    /// plus `Game::start`'s own phase guard make a double start impossible
    /// even if accept and countdown race.
    fn spawn_start_checker(server: Arc<Server>) {
        tokio::spawn(async move {
            let mut poll = interval(Duration::from_secs(1));
            loop {
                poll.tick().await;
                if server.game.has_started() {
                    break;
                }
                if server.registry.len() >= server.config.min_players {
                    if server.registry.all_named() {
                        if !server.countdown_armed.swap(true, Ordering::SeqCst) {
                            Self::spawn_countdown(Arc::clone(&server));
                        }
                    } else {
                        debug!("Waiting for every player to pick a name");
                    }
                }
            }
        });
    }

    fn spawn_countdown(server: Arc<Server>) {
        tokio::spawn(async move {
            info!("Lobby is ready, starting the countdown");
            for remaining in (1..=server.config.lobby_countdown_secs).rev() {
                server.registry.broadcast(
                    &ServerMessage::Notification(format!(
                        "The game starts in {} seconds!",
                        remaining
                    ))
                    .to_string(),
                    None,
                );
                sleep(Duration::from_secs(1)).await;
            }

            if server.registry.len() >= server.config.min_players {
                server.registry.broadcast(
                    &ServerMessage::Notification("The game starts now!".to_string()).to_string(),
                    None,
                );
                server.game.start();
            } else {
                // Leavers emptied the lobby during the countdown; re-arm.
                warn!("Countdown finished below the minimum, back to waiting");
                server.registry.broadcast(
                    &ServerMessage::Notification(
                        "Not enough players anymore, waiting for more.".to_string(),
                    )
                    .to_string(),
                    None,
                );
                server.countdown_armed.store(false, Ordering::SeqCst);
            }
        });
    }
}

/// Capacity refusals get an explicit notice before the socket closes; a
/// silent drop would look like a network fault to the client.
async fn reject(mut stream: TcpStream, reason: &str) {
    let line = format!("{}\n", ServerMessage::Notification(reason.to_string()));
    if let Err(e) = stream.write_all(line.as_bytes()).await {
        debug!("Failed to deliver rejection notice: {}", e);
        return;
    }
    let _ = stream.shutdown().await;

    // The client has usually sent its handshake line already; closing with
    // unread data can reset the connection and clobber the notice, so drain
    // briefly before dropping the socket.
    let mut sink = [0u8; 256];
    while let Ok(Ok(n)) = timeout(Duration::from_millis(250), stream.read(&mut sink)).await {
        if n == 0 {
            break;
        }
    }
}
