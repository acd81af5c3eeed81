//! Connection registry and outbound fan-out for the game server
//!
//! This module tracks every live WebSocket connection, including:
//! - Connection metadata (ID, address, outbound frame queue)
//! - Which player ids each connection registered, so a dropped socket can
//!   cascade into roster removal
//! - Event fan-out, serializing each event once and queueing it per client
//!
//! Connections never touch game rules; they only carry frames. A connection
//! whose outbound queue is gone is skipped during broadcasts and reaped when
//! its reader task reports the disconnect.

use log::{error, info, warn};
use shared::ServerEvent;
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// A live client connection and the players it speaks for
///
/// The sender half feeds the connection's writer task. Multiple player ids
/// per connection are allowed; tools use that to drive whole teams through
/// one socket.
#[derive(Debug)]
pub struct Connection {
    /// Unique connection identifier assigned by the accept loop
    pub id: u32,
    /// Peer address, kept for log lines
    pub addr: SocketAddr,
    /// Queue of frames awaiting the writer task
    pub sender: mpsc::UnboundedSender<Message>,
    /// Player ids registered over this connection, in registration order
    pub player_ids: Vec<String>,
}

impl Connection {
    pub fn new(id: u32, addr: SocketAddr, sender: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            id,
            addr,
            sender,
            player_ids: Vec::new(),
        }
    }

    /// Records a player id as owned by this connection. Duplicates are
    /// collapsed so a re-join does not double the cascade on disconnect.
    pub fn register_player(&mut self, player_id: &str) -> bool {
        if self.player_ids.iter().any(|id| id == player_id) {
            return false;
        }
        self.player_ids.push(player_id.to_string());
        true
    }
}

/// Registry of all live connections, keyed by connection id
pub struct ConnectionManager {
    connections: HashMap<u32, Connection>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
        }
    }

    /// Registers a freshly accepted connection.
    pub fn add(&mut self, id: u32, addr: SocketAddr, sender: mpsc::UnboundedSender<Message>) {
        info!("Client {} connected from {}", id, addr);
        self.connections.insert(id, Connection::new(id, addr, sender));
    }

    /// Drops a connection and returns the player ids it owned, so the caller
    /// can remove them from the match.
    pub fn remove(&mut self, id: u32) -> Vec<String> {
        match self.connections.remove(&id) {
            Some(connection) => {
                info!("Client {} disconnected", id);
                connection.player_ids
            }
            None => Vec::new(),
        }
    }

    /// Ties a player id to a connection. Returns false for unknown
    /// connections or ids already registered there.
    pub fn register_player(&mut self, conn_id: u32, player_id: &str) -> bool {
        match self.connections.get_mut(&conn_id) {
            Some(connection) => connection.register_player(player_id),
            None => false,
        }
    }

    /// Sends an event to one connection. Serialization or queue failures are
    /// logged and swallowed; the game must not stall on one bad socket.
    pub fn send_to(&self, conn_id: u32, event: &ServerEvent) -> bool {
        let payload = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize event: {}", e);
                return false;
            }
        };

        match self.connections.get(&conn_id) {
            Some(connection) => {
                if connection.sender.send(Message::Text(payload)).is_err() {
                    warn!("Client {} outbound queue is closed", conn_id);
                    return false;
                }
                true
            }
            None => false,
        }
    }

    /// Queues an event on every connection. The event is serialized once and
    /// the text frame cloned per client. Returns how many queues accepted it.
    pub fn broadcast(&self, event: &ServerEvent) -> usize {
        if self.connections.is_empty() {
            return 0;
        }

        let payload = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize event: {}", e);
                return 0;
            }
        };

        let mut delivered = 0;
        for connection in self.connections.values() {
            if connection
                .sender
                .send(Message::Text(payload.clone()))
                .is_ok()
            {
                delivered += 1;
            } else {
                warn!("Client {} outbound queue is closed", connection.id);
            }
        }
        delivered
    }

    /// Returns the number of live connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns true if no client is connected
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
