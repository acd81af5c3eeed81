use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use shared::{now_ms, ClientCommand, Phase, ServerEvent};
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// Load generator: one autonomous player that floods clicks while a match is
/// playing and reports the server's audit when it ends.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server host to connect to
    #[clap(long, default_value = "127.0.0.1")]
    host: String,
    /// Server port
    #[clap(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,
    /// Display name (generated if omitted)
    #[clap(long)]
    name: Option<String>,
    /// Clicks per batch
    #[clap(short, long, default_value = "250")]
    rate: u32,
    /// Milliseconds between batches, jittered by up to 30% per process
    #[clap(short, long, default_value = "500")]
    interval: u64,
    /// Stop after this many seconds; 0 means run until victory
    #[clap(short, long, default_value = "0")]
    duration: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Per-process jitter so a fleet of bots never clicks in lockstep.
    let (bot_name, batch_interval) = {
        let mut rng = rand::thread_rng();
        let name = args
            .name
            .clone()
            .unwrap_or_else(|| format!("StressBot_{}", rng.gen_range(0..10_000)));
        let jittered = (args.interval as f64 * rng.gen_range(0.7..1.3)) as u64;
        (name, jittered.max(1))
    };
    let player_id = format!("stress_{}_{}", std::process::id(), now_ms());

    let url = format!("ws://{}:{}", args.host, args.port);
    println!("{} connecting to {}", bot_name, url);
    let (ws_stream, _) = connect_async(url.as_str()).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let join = ClientCommand::PlayerJoin {
        player_id: player_id.clone(),
        name: bot_name.clone(),
    };
    ws_tx.send(Message::Text(serde_json::to_string(&join)?)).await?;
    println!("{} joined as {} (batch {} clicks / {}ms)", bot_name, player_id, args.rate, batch_interval);

    let mut playing = false;
    let mut total_sent: u64 = 0;
    let mut batches: u64 = 0;
    let started = Instant::now();
    let deadline = if args.duration > 0 {
        Some(started + Duration::from_secs(args.duration))
    } else {
        None
    };

    let mut batch_timer = interval(Duration::from_millis(batch_interval));
    batch_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                println!("{} reached its duration limit", bot_name);
                break;
            }
        }

        tokio::select! {
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ServerEvent>(&text) {
                            Ok(ServerEvent::StateUpdate { phase, .. })
                            | Ok(ServerEvent::LobbyUpdate { phase, .. }) => {
                                if phase == Phase::Playing && !playing {
                                    println!("{} sees the match running, flooding clicks", bot_name);
                                }
                                playing = phase == Phase::Playing;
                            }
                            Ok(ServerEvent::Victory { winner, click_stats, .. }) => {
                                println!(
                                    "Team {} won. Server audit: {} total, {} validated, {} rejected",
                                    winner, click_stats.total, click_stats.validated, click_stats.rejected
                                );
                                playing = false;
                                break;
                            }
                            Ok(_) => {}
                            Err(e) => println!("Unparseable server frame: {}", e),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        println!("Server closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        println!("Connection error: {}", e);
                        break;
                    }
                }
            }
            _ = batch_timer.tick() => {
                if !playing {
                    continue;
                }
                for _ in 0..args.rate {
                    let click = ClientCommand::Click { player_id: player_id.clone() };
                    ws_tx.feed(Message::Text(serde_json::to_string(&click)?)).await?;
                }
                ws_tx.flush().await?;
                total_sent += args.rate as u64;
                batches += 1;

                if batches % 10 == 0 {
                    let elapsed = started.elapsed().as_secs_f64();
                    println!(
                        "{}: {} clicks in {} batches ({:.0} clicks/s)",
                        bot_name, total_sent, batches, total_sent as f64 / elapsed
                    );
                }
            }
        }
    }

    let elapsed = started.elapsed().as_secs_f64();
    let rate = if elapsed > 0.0 {
        total_sent as f64 / elapsed
    } else {
        0.0
    };
    println!(
        "{} done: {} clicks over {:.1}s ({:.0} clicks/s)",
        bot_name, total_sent, elapsed, rate
    );

    let _ = ws_tx.send(Message::Close(None)).await;
    Ok(())
}
