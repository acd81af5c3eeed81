//! # Click Wars Server Library
//!
//! This library provides the authoritative server for a two-team click race.
//! Players join one of two teams and hammer a single button; every validated
//! click fills their team's gauge by one, and the first team whose gauge
//! reaches the configured maximum wins the match on the spot.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Rules
//! The server is the only judge of the match. Clients merely report click
//! attempts; whether a click counts, which team it credits, and when a match
//! ends are decided here and nowhere else. Clicks that arrive after a victory
//! are still accounted for, so the post-game audit shows exactly how much
//! input was in flight when the match ended.
//!
//! ### Connection Management
//! Handles the complete lifecycle of WebSocket clients:
//! - Connection acceptance and per-connection frame pumps
//! - Mapping connections to the player ids they registered
//! - Cascading roster removal when a socket drops
//!
//! ### State Broadcasting
//! Pushes JSON snapshots to every client on state changes. Gauge updates
//! during a click storm are coalesced to roughly thirty snapshots per second,
//! with a single deferred flush guaranteeing the final state always lands.
//! Roster, config, and victory events are delivered immediately.
//!
//! ## Architecture Design
//!
//! ### Single-Writer Event Loop
//! All match state is owned by one task. Socket readers, the bot simulation
//! timer, and the deferred-flush timer all funnel into a single `select!`
//! loop that applies one event at a time, to completion. There are no locks
//! because there is nothing to lock against.
//!
//! ### WebSocket Transport
//! Clients speak JSON text frames over WebSocket. Each accepted socket runs a
//! reader task (frames in, commands out) and a writer task draining an
//! unbounded outbound queue, so one slow client never blocks the match.
//!
//! ### Bot Simulation
//! The lobby can be seeded with server-driven bots. While a match is live, a
//! half-second timer gives every bot an independent 70% chance to click; bot
//! clicks take the exact same validation path as human ones.
//!
//! ## Module Organization
//!
//! ### Game Module (`game`)
//! The match state machine: rosters, gauges, phase transitions, click
//! validation, bot passes, and the victory latency window.
//!
//! ### Broadcast Module (`broadcast`)
//! The snapshot rate limiter: decides whether a state change is sent now,
//! scheduled, or absorbed by an already-armed flush.
//!
//! ### Connections Module (`connections`)
//! The registry of live sockets and their outbound queues, plus event
//! fan-out and player-id ownership for disconnect cleanup.
//!
//! ### Network Module (`network`)
//! The listener, the per-connection tasks, and the event loop tying the
//! other modules together.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new("0.0.0.0:7777").await?;
//!
//!     // Runs the main event loop, which:
//!     // - Accepts WebSocket clients and reads their commands
//!     // - Applies joins, clicks, and lifecycle commands in arrival order
//!     // - Drives bot clicks while a match is playing
//!     // - Broadcasts rate-limited state snapshots and immediate events
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod broadcast;
pub mod connections;
pub mod game;
pub mod network;
