//! Integration tests for the click-game server
//!
//! These tests validate cross-component interactions and real network
//! behavior against a live server on an ephemeral port.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use server::game::{ClickOutcome, GameState};
use server::network::Server;
use shared::{ClickStats, ClientCommand, Phase, ServerEvent, Team, LATENCY_WINDOW_MS};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// WIRE PROTOCOL TESTS
mod protocol_tests {
    use super::*;

    /// Tests event serialization round-trip for every broadcast type
    #[test]
    fn event_serialization_roundtrip() {
        let events = vec![
            ServerEvent::StateUpdate {
                team_a_gauge: 10,
                team_b_gauge: 4,
                max_gauge: 100,
                players: vec![],
                phase: Phase::Playing,
                timestamp: 123,
            },
            ServerEvent::LobbyUpdate {
                players: vec![],
                phase: Phase::Lobby,
                max_gauge: 50,
                timestamp: 456,
            },
            ServerEvent::Victory {
                winner: Team::A,
                final_scores: vec![],
                click_stats: ClickStats {
                    total: 12,
                    validated: 10,
                    rejected: 2,
                },
                latency_window_ms: LATENCY_WINDOW_MS,
                timestamp: 789,
            },
            ServerEvent::PlayerLeft {
                player_id: "p1".to_string(),
                player_name: "Alice".to_string(),
                timestamp: 999,
            },
        ];

        for event in events {
            let json = serde_json::to_string(&event).unwrap();
            let back: ServerEvent = serde_json::from_str(&json).unwrap();
            assert_eq!(back, event);
        }
    }

    /// Tests that the exact frames legacy JavaScript clients send still parse
    #[test]
    fn command_compatibility_with_legacy_clients() {
        let frames = vec![
            r#"{"type":"player_join","playerId":"p1","name":"Alice"}"#,
            r#"{"type":"click","playerId":"p1"}"#,
            r#"{"type":"start_game"}"#,
            r#"{"type":"reset_game"}"#,
            r#"{"type":"add_bot","name":"Bot 1","team":"A"}"#,
            r#"{"type":"add_bot"}"#,
            r#"{"type":"remove_bot","botId":"bot_1"}"#,
            r#"{"type":"update_config","maxGauge":42}"#,
        ];

        for frame in frames {
            let parsed = serde_json::from_str::<ClientCommand>(frame);
            assert!(parsed.is_ok(), "Failed to parse frame: {}", frame);
        }
    }

    /// Tests malformed frame handling
    #[test]
    fn malformed_command_handling() {
        let bad_frames = vec![
            "",
            "not json",
            r#"{"type":"click""#,
            r#"{"type":"warp_speed"}"#,
            r#"{"type":"click"}"#,
            r#"{"playerId":"p1"}"#,
        ];

        for frame in bad_frames {
            let parsed = serde_json::from_str::<ClientCommand>(frame);
            assert!(parsed.is_err(), "Should fail to parse frame: {}", frame);
        }
    }
}

/// MATCH FLOW TESTS
mod match_flow_tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Tests a complete match from lobby through victory and back
    #[test]
    fn full_match_lifecycle() {
        let mut game = GameState::with_max_gauge(10);
        assert_eq!(game.join("alice", "Alice"), Team::A);
        assert_eq!(game.join("bob", "Bob"), Team::B);

        game.start();
        assert_eq!(game.phase(), Phase::Playing);

        for t in 0..9 {
            assert_eq!(game.click("alice", t), ClickOutcome::Validated);
            game.click("bob", t);
        }
        assert_eq!(game.click("alice", 9), ClickOutcome::Victory(Team::A));
        assert_eq!(game.winner(), Some(Team::A));
        assert_eq!(game.gauge(Team::A), 10);
        assert_eq!(game.gauge(Team::B), 9);

        game.reset();
        assert_eq!(game.phase(), Phase::Lobby);
        assert_eq!(game.winner(), None);
        assert_eq!(game.gauge(Team::A), 0);
        assert_eq!(game.player_count(), 2);
        assert!(game.click_stats().is_consistent());
    }

    /// Tests the post-victory latency window boundaries to the millisecond
    #[test]
    fn latency_window_boundaries() {
        let mut game = GameState::with_max_gauge(10);
        game.join("alice", "Alice");
        game.join("bob", "Bob");
        game.start();
        for _ in 0..10 {
            game.click("alice", 10_000);
        }
        assert_eq!(game.victory_at(), Some(10_000));

        // 999ms late: counted and rejected.
        assert_eq!(game.click("bob", 10_999), ClickOutcome::RejectedLate);
        let stats = game.click_stats();
        assert_eq!(stats.rejected, 1);

        // 1000ms and 1001ms late: silently dropped.
        assert_eq!(game.click("bob", 11_000), ClickOutcome::Ignored);
        assert_eq!(game.click("bob", 11_001), ClickOutcome::Ignored);
        assert_eq!(game.click_stats(), stats);
        assert!(stats.is_consistent());
    }

    /// Tests that team sizes stay within one of each other over many joins
    #[test]
    fn team_balance_over_many_joins() {
        let mut game = GameState::new();
        for i in 0..40 {
            if i % 7 == 3 {
                game.add_bot(None, None);
            } else {
                game.join(&format!("player_{}", i), "");
            }
            let diff = game.roster_len(Team::A) as i64 - game.roster_len(Team::B) as i64;
            assert!(diff.abs() <= 1, "teams diverged after {} arrivals", i + 1);
        }
    }

    /// Tests a fully bot-driven match reaching a clean victory
    #[test]
    fn bot_driven_match_reaches_victory() {
        let mut game = GameState::with_max_gauge(30);
        for _ in 0..4 {
            game.add_bot(None, None);
        }
        game.start();

        let mut rng = StdRng::seed_from_u64(99);
        let mut winner = None;
        for tick in 0..200u64 {
            let sweep = game.simulate_bot_clicks(tick * 500, &mut rng);
            if let Some(team) = sweep.victory {
                winner = Some(team);
                break;
            }
        }

        let winner = winner.expect("bots never finished the match");
        assert_eq!(game.winner(), Some(winner));
        assert_eq!(game.gauge(winner), 30);
        assert!(game.gauge(winner.other()) < 30);
        assert!(game.click_stats().is_consistent());
    }
}

/// CLIENT-SERVER TESTS
mod server_tests {
    use super::*;

    /// Tests that a joiner immediately receives its own snapshot
    #[tokio::test]
    async fn join_receives_snapshot_and_lobby() {
        let addr = start_server().await;
        let (mut tx, mut rx) = connect(addr).await;

        send(
            &mut tx,
            &ClientCommand::PlayerJoin {
                player_id: "p1".to_string(),
                name: "Alice".to_string(),
            },
        )
        .await;

        match next_event(&mut rx).await {
            ServerEvent::StateUpdate { players, phase, .. } => {
                assert_eq!(phase, Phase::Lobby);
                assert_eq!(players.len(), 1);
                assert_eq!(players[0].id, "p1");
                assert_eq!(players[0].team, Team::A);
                assert!(!players[0].is_bot);
            }
            other => panic!("Expected state snapshot first, got {:?}", other),
        }

        match next_event(&mut rx).await {
            ServerEvent::LobbyUpdate { players, .. } => assert_eq!(players.len(), 1),
            other => panic!("Expected lobby update second, got {:?}", other),
        }
    }

    /// Tests that two clients land on opposite teams
    #[tokio::test]
    async fn two_clients_get_balanced_teams() {
        let addr = start_server().await;
        let (mut tx1, mut rx1) = connect(addr).await;
        let (mut tx2, mut rx2) = connect(addr).await;

        send(
            &mut tx1,
            &ClientCommand::PlayerJoin {
                player_id: "p1".to_string(),
                name: "Alice".to_string(),
            },
        )
        .await;
        next_event(&mut rx1).await;

        send(
            &mut tx2,
            &ClientCommand::PlayerJoin {
                player_id: "p2".to_string(),
                name: "Bob".to_string(),
            },
        )
        .await;

        match next_event(&mut rx2).await {
            ServerEvent::StateUpdate { players, .. } => {
                assert_eq!(players.len(), 2);
                let p1 = players.iter().find(|p| p.id == "p1").unwrap();
                let p2 = players.iter().find(|p| p.id == "p2").unwrap();
                assert_eq!(p1.team, Team::A);
                assert_eq!(p2.team, Team::B);
            }
            other => panic!("Expected state snapshot, got {:?}", other),
        }
    }

    /// Tests an entire match over the socket, ending in a victory broadcast
    #[tokio::test]
    async fn click_race_to_victory_over_socket() {
        let addr = start_server().await;
        let (mut tx, mut rx) = connect(addr).await;

        send(
            &mut tx,
            &ClientCommand::PlayerJoin {
                player_id: "p1".to_string(),
                name: "Alice".to_string(),
            },
        )
        .await;
        send(&mut tx, &ClientCommand::UpdateConfig { max_gauge: 10 }).await;
        send(&mut tx, &ClientCommand::StartGame).await;

        for _ in 0..10 {
            send(
                &mut tx,
                &ClientCommand::Click {
                    player_id: "p1".to_string(),
                },
            )
            .await;
        }

        let victory = wait_for(&mut rx, |e| matches!(e, ServerEvent::Victory { .. })).await;
        match victory {
            ServerEvent::Victory {
                winner,
                final_scores,
                click_stats,
                latency_window_ms,
                ..
            } => {
                assert_eq!(winner, Team::A);
                assert_eq!(click_stats.validated, 10);
                assert!(click_stats.is_consistent());
                assert_eq!(latency_window_ms, LATENCY_WINDOW_MS);
                let alice = final_scores.iter().find(|p| p.id == "p1").unwrap();
                assert_eq!(alice.score, 10);
            }
            _ => unreachable!(),
        }
    }

    /// Tests that a config update below the floor never reaches clients
    #[tokio::test]
    async fn config_floor_is_silent_over_socket() {
        let addr = start_server().await;
        let (mut tx, mut rx) = connect(addr).await;

        send(
            &mut tx,
            &ClientCommand::PlayerJoin {
                player_id: "p1".to_string(),
                name: "Alice".to_string(),
            },
        )
        .await;
        send(&mut tx, &ClientCommand::UpdateConfig { max_gauge: 5 }).await;
        send(&mut tx, &ClientCommand::UpdateConfig { max_gauge: 15 }).await;

        // Read until the accepted value shows up; the rejected one must
        // never have been broadcast along the way.
        loop {
            match next_event(&mut rx).await {
                ServerEvent::LobbyUpdate { max_gauge, .. }
                | ServerEvent::StateUpdate { max_gauge, .. } => {
                    assert_ne!(max_gauge, 5, "rejected config value leaked to clients");
                    if max_gauge == 15 {
                        break;
                    }
                }
                _ => {}
            }
        }
    }

    /// Tests that closing a socket removes its players and notifies the rest
    #[tokio::test]
    async fn disconnect_cascades_to_roster_removal() {
        let addr = start_server().await;
        let (mut tx1, rx1) = connect(addr).await;
        let (mut tx2, mut rx2) = connect(addr).await;

        send(
            &mut tx1,
            &ClientCommand::PlayerJoin {
                player_id: "p1".to_string(),
                name: "Alice".to_string(),
            },
        )
        .await;
        send(
            &mut tx2,
            &ClientCommand::PlayerJoin {
                player_id: "p2".to_string(),
                name: "Bob".to_string(),
            },
        )
        .await;
        wait_for(&mut rx2, |e| match e {
            ServerEvent::LobbyUpdate { players, .. } => players.len() == 2,
            _ => false,
        })
        .await;

        tx1.send(Message::Close(None)).await.unwrap();
        drop(tx1);
        drop(rx1);

        let left = wait_for(&mut rx2, |e| matches!(e, ServerEvent::PlayerLeft { .. })).await;
        match left {
            ServerEvent::PlayerLeft {
                player_id,
                player_name,
                ..
            } => {
                assert_eq!(player_id, "p1");
                assert_eq!(player_name, "Alice");
            }
            _ => unreachable!(),
        }

        let lobby = wait_for(&mut rx2, |e| matches!(e, ServerEvent::LobbyUpdate { .. })).await;
        match lobby {
            ServerEvent::LobbyUpdate { players, .. } => {
                assert_eq!(players.len(), 1);
                assert_eq!(players[0].id, "p2");
            }
            _ => unreachable!(),
        }
    }

    /// Tests that a click burst coalesces into a handful of snapshots while
    /// the final state still gets through
    #[tokio::test]
    async fn click_burst_coalesces_snapshots() {
        let addr = start_server().await;
        let (mut tx, mut rx) = connect(addr).await;

        send(
            &mut tx,
            &ClientCommand::PlayerJoin {
                player_id: "p1".to_string(),
                name: "Alice".to_string(),
            },
        )
        .await;
        send(&mut tx, &ClientCommand::StartGame).await;

        for _ in 0..40 {
            let click = ClientCommand::Click {
                player_id: "p1".to_string(),
            };
            tx.feed(Message::Text(serde_json::to_string(&click).unwrap()))
                .await
                .unwrap();
        }
        tx.flush().await.unwrap();

        let mut snapshots = 0;
        let mut final_gauge = 0;
        loop {
            match try_next_event(&mut rx, Duration::from_millis(300)).await {
                Some(ServerEvent::StateUpdate { team_a_gauge, .. }) if team_a_gauge > 0 => {
                    snapshots += 1;
                    final_gauge = team_a_gauge;
                    if final_gauge == 40 {
                        break;
                    }
                }
                Some(_) => {}
                None => break,
            }
        }

        // Every click mutated state, but the deferred flush folded the burst
        // into very few frames, and the last one carries the full gauge.
        assert_eq!(final_gauge, 40, "final snapshot must carry all clicks");
        assert!(snapshots >= 1);
        assert!(
            snapshots <= 6,
            "{} snapshots for a single burst is too many",
            snapshots
        );
    }
}

// HELPER FUNCTIONS

async fn start_server() -> SocketAddr {
    let server = Server::new("127.0.0.1:0").await.expect("bind server");
    let addr = server.local_addr().expect("server address");
    tokio::spawn(async move {
        let mut server = server;
        let _ = server.run().await;
    });
    addr
}

async fn connect(addr: SocketAddr) -> (WsWriter, WsReader) {
    let (ws, _) = connect_async(format!("ws://{}", addr))
        .await
        .expect("connect to server");
    ws.split()
}

async fn send(tx: &mut WsWriter, command: &ClientCommand) {
    let json = serde_json::to_string(command).expect("serialize command");
    tx.send(Message::Text(json)).await.expect("send frame");
}

async fn next_event(rx: &mut WsReader) -> ServerEvent {
    loop {
        let frame = timeout(Duration::from_secs(2), rx.next())
            .await
            .expect("timed out waiting for an event")
            .expect("server closed the stream")
            .expect("frame error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).expect("parse event");
        }
    }
}

async fn wait_for<F>(rx: &mut WsReader, pred: F) -> ServerEvent
where
    F: Fn(&ServerEvent) -> bool,
{
    loop {
        let event = next_event(rx).await;
        if pred(&event) {
            return event;
        }
    }
}

async fn try_next_event(rx: &mut WsReader, wait: Duration) -> Option<ServerEvent> {
    match timeout(wait, rx.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => serde_json::from_str(&text).ok(),
        _ => None,
    }
}
