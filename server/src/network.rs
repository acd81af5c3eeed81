//! WebSocket transport and the single-threaded game event loop

use crate::broadcast::{BroadcastThrottle, FlushDecision};
use crate::connections::ConnectionManager;
use crate::game::{ClickOutcome, GameState};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{now_ms, ClientCommand, Phase, ServerEvent, Team, BOT_TICK_MS};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{interval, sleep_until, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;

/// Messages sent from connection tasks to the game loop
#[derive(Debug)]
pub enum ServerMessage {
    Connected {
        conn_id: u32,
        addr: SocketAddr,
        sender: mpsc::UnboundedSender<Message>,
    },
    CommandReceived {
        conn_id: u32,
        command: ClientCommand,
    },
    Disconnected {
        conn_id: u32,
    },
}

/// The server: accepts WebSocket clients and runs the match.
///
/// All game state lives on one task. Connection tasks translate socket frames
/// into [`ServerMessage`]s and everything, including bot ticks and deferred
/// snapshot flushes, is serialized through the event loop in `run`. Commands
/// run to completion one at a time, which is what makes the rules race-free
/// without locks.
pub struct Server {
    listener: TcpListener,
    game_state: GameState,
    connections: ConnectionManager,
    throttle: BroadcastThrottle,
    rng: StdRng,
    next_conn_id: u32,
    commands_seen: u64,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server {
    pub async fn new(addr: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener,
            game_state: GameState::new(),
            connections: ConnectionManager::new(),
            throttle: BroadcastThrottle::new(),
            rng: StdRng::from_entropy(),
            next_conn_id: 0,
            commands_seen: 0,
            server_tx,
            server_rx,
        })
    }

    /// Address the listener actually bound, useful with port 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Main event loop coordinating sockets, bots, and broadcasts
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let mut bot_timer = interval(Duration::from_millis(BOT_TICK_MS));
        bot_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut stats_timer = interval(Duration::from_secs(1));
        stats_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Server started successfully");

        loop {
            let flush_at = self.throttle.scheduled();

            tokio::select! {
                // New TCP connections; the handshake happens off-loop
                conn = self.listener.accept() => {
                    match conn {
                        Ok((stream, addr)) => {
                            self.next_conn_id += 1;
                            let conn_id = self.next_conn_id;
                            let server_tx = self.server_tx.clone();
                            tokio::spawn(handle_connection(conn_id, stream, addr, server_tx));
                        }
                        Err(e) => error!("Error accepting connection: {}", e),
                    }
                },

                // Events from connection tasks
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::Connected { conn_id, addr, sender }) => {
                            self.connections.add(conn_id, addr, sender);
                        }
                        Some(ServerMessage::CommandReceived { conn_id, command }) => {
                            self.commands_seen += 1;
                            self.handle_command(conn_id, command, &mut bot_timer);
                        }
                        Some(ServerMessage::Disconnected { conn_id }) => {
                            self.handle_disconnect(conn_id);
                        }
                        None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                // Bot pass, only while a match is live
                _ = bot_timer.tick(), if self.game_state.phase() == Phase::Playing => {
                    let sweep = self.game_state.simulate_bot_clicks(now_ms(), &mut self.rng);
                    if let Some(team) = sweep.victory {
                        self.announce_victory(team);
                    } else if sweep.clicks > 0 {
                        self.mark_state_dirty();
                    }
                },

                // Deferred snapshot flush armed by the throttle
                _ = sleep_until(flush_at.unwrap_or_else(Instant::now)), if flush_at.is_some() => {
                    self.broadcast_state_now();
                },

                // Once-a-second health line
                _ = stats_timer.tick() => {
                    if !self.connections.is_empty() {
                        debug!(
                            "phase={} clients={} players={} gaugeA={} gaugeB={} cmds/s={}",
                            self.game_state.phase(),
                            self.connections.len(),
                            self.game_state.player_count(),
                            self.game_state.gauge(Team::A),
                            self.game_state.gauge(Team::B),
                            self.commands_seen,
                        );
                    }
                    self.commands_seen = 0;
                },
            }
        }

        Ok(())
    }

    /// Applies one client command to the game and emits whatever broadcasts
    /// it calls for.
    fn handle_command(&mut self, conn_id: u32, command: ClientCommand, bot_timer: &mut Interval) {
        match command {
            ClientCommand::PlayerJoin { player_id, name } => {
                self.game_state.join(&player_id, &name);
                self.connections.register_player(conn_id, &player_id);

                // The joiner needs a full snapshot right away to render
                // itself; everyone else learns about the roster change.
                let now = now_ms();
                self.connections
                    .send_to(conn_id, &self.game_state.state_update(now));
                self.connections
                    .broadcast(&self.game_state.lobby_update(now));
            }

            ClientCommand::Click { player_id } => {
                match self.game_state.click(&player_id, now_ms()) {
                    ClickOutcome::Validated => self.mark_state_dirty(),
                    ClickOutcome::Victory(team) => self.announce_victory(team),
                    ClickOutcome::RejectedFull
                    | ClickOutcome::RejectedLate
                    | ClickOutcome::Ignored => {}
                }
            }

            ClientCommand::StartGame => {
                self.game_state.start();
                // Fresh cadence so the first bot pass lands a full tick in.
                bot_timer.reset();
                self.broadcast_state_now();
            }

            ClientCommand::ResetGame => {
                self.game_state.reset();
                self.connections
                    .broadcast(&self.game_state.lobby_update(now_ms()));
                self.broadcast_state_now();
            }

            ClientCommand::AddBot { name, team } => {
                self.game_state.add_bot(name, team);
                self.connections
                    .broadcast(&self.game_state.lobby_update(now_ms()));
            }

            ClientCommand::RemoveBot { bot_id } => {
                if self.game_state.remove_bot(&bot_id).is_some() {
                    self.connections
                        .broadcast(&self.game_state.lobby_update(now_ms()));
                }
            }

            ClientCommand::UpdateConfig { max_gauge } => {
                if self.game_state.update_config(max_gauge) {
                    self.connections
                        .broadcast(&self.game_state.lobby_update(now_ms()));
                    self.broadcast_state_now();
                }
            }
        }
    }

    /// Removes every player the dropped connection owned, telling the
    /// remaining clients who left.
    fn handle_disconnect(&mut self, conn_id: u32) {
        let orphaned = self.connections.remove(conn_id);
        if orphaned.is_empty() {
            return;
        }

        let now = now_ms();
        for player_id in orphaned {
            let player_name = match self.game_state.player(&player_id) {
                Some(player) => player.name.clone(),
                // Already gone, e.g. a bot removed by command in the meantime.
                None => continue,
            };
            self.game_state.remove_player(&player_id);
            info!(
                "Removed player {} after client {} disconnect",
                player_id, conn_id
            );
            self.connections.broadcast(&ServerEvent::PlayerLeft {
                player_id,
                player_name,
                timestamp: now,
            });
        }

        self.connections
            .broadcast(&self.game_state.lobby_update(now));
        self.mark_state_dirty();
    }

    /// Records a gauge change. Either snapshots immediately or leaves the
    /// armed deadline for the event loop's flush arm to pick up.
    fn mark_state_dirty(&mut self) {
        if let FlushDecision::SendNow = self.throttle.on_state_change(Instant::now()) {
            self.connections
                .broadcast(&self.game_state.state_update(now_ms()));
        }
    }

    /// Sends a state snapshot right now. Counts as a delivery for the rate
    /// limiter and absorbs any pending flush, whose changes this snapshot
    /// already carries.
    fn broadcast_state_now(&mut self) {
        self.throttle.flushed(Instant::now());
        self.connections
            .broadcast(&self.game_state.state_update(now_ms()));
    }

    /// Victory is rare and decisive; it goes out ahead of any throttling.
    fn announce_victory(&mut self, team: Team) {
        self.connections
            .broadcast(&self.game_state.victory_event(team, now_ms()));
    }
}

/// Owns one client socket: performs the WebSocket handshake, pumps inbound
/// frames into the game loop, and drains the outbound queue until either side
/// goes away.
async fn handle_connection(
    conn_id: u32,
    stream: TcpStream,
    addr: SocketAddr,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
) {
    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake failed for {}: {}", addr, e);
            return;
        }
    };

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();

    if server_tx
        .send(ServerMessage::Connected {
            conn_id,
            addr,
            sender: out_tx,
        })
        .is_err()
    {
        return;
    }

    // Writer half: ends when the game loop drops the queue sender.
    tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if let Err(e) = ws_tx.send(message).await {
                debug!("Send to client {} failed: {}", conn_id, e);
                break;
            }
        }
    });

    // Reader half: decode frames until the peer disconnects.
    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientCommand>(&text) {
                Ok(command) => {
                    if server_tx
                        .send(ServerMessage::CommandReceived { conn_id, command })
                        .is_err()
                    {
                        return;
                    }
                }
                Err(e) => warn!("Malformed command from client {}: {}", conn_id, e),
            },
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(_) => warn!("Ignoring non-text frame from client {}", conn_id),
            Err(e) => {
                debug!("Client {} connection error: {}", conn_id, e);
                break;
            }
        }
    }

    let _ = server_tx.send(ServerMessage::Disconnected { conn_id });
}
