use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use shared::{ClientCommand, ServerEvent, Team};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// Seeds the lobby with server-driven bots, optionally starting the match
/// once they are all in.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server host to connect to
    #[clap(long, default_value = "127.0.0.1")]
    host: String,
    /// Server port
    #[clap(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,
    /// Bots to add to team A
    #[clap(long = "team-a", default_value = "0")]
    team_a: u32,
    /// Bots to add to team B
    #[clap(long = "team-b", default_value = "0")]
    team_b: u32,
    /// Bots the server assigns to the smaller team
    #[clap(long, default_value = "0")]
    auto: u32,
    /// Start the match after seeding
    #[clap(long)]
    start: bool,
    /// Milliseconds between add_bot commands
    #[clap(long, default_value = "10")]
    delay: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let total = args.team_a + args.team_b + args.auto;
    if total == 0 {
        return Err("nothing to do: pass --team-a, --team-b, or --auto".into());
    }

    let url = format!("ws://{}:{}", args.host, args.port);
    println!("Connecting to {}", url);
    let (ws_stream, _) = connect_async(url.as_str()).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let mut added = 0u32;
    let batches = [
        (args.team_a, Some(Team::A), "A"),
        (args.team_b, Some(Team::B), "B"),
        (args.auto, None, "auto"),
    ];

    for (count, team, label) in batches {
        for i in 0..count {
            let name = team.map(|t| format!("Bot_{}_{}", t, i + 1));
            let command = ClientCommand::AddBot { name, team };
            ws_tx
                .send(Message::Text(serde_json::to_string(&command)?))
                .await?;

            added += 1;
            if added % 25 == 0 {
                println!("{}/{} bots requested", added, total);
            }
            sleep(Duration::from_millis(args.delay)).await;
        }
        if count > 0 {
            println!("Requested {} bots for team {}", count, label);
        }
    }

    // The server answers every add_bot with a lobby snapshot; the last one
    // confirms how many players the lobby actually holds.
    let confirmation = timeout(Duration::from_secs(2), async {
        let mut roster_size = None;
        while let Ok(Some(Ok(Message::Text(text)))) =
            timeout(Duration::from_millis(200), ws_rx.next()).await
        {
            if let Ok(ServerEvent::LobbyUpdate { players, .. }) =
                serde_json::from_str::<ServerEvent>(&text)
            {
                roster_size = Some(players.len());
            }
        }
        roster_size
    })
    .await;

    match confirmation {
        Ok(Some(count)) => println!("Lobby now holds {} players", count),
        _ => println!("No lobby confirmation received (server busy?)"),
    }

    if args.start {
        println!("Starting the match");
        ws_tx
            .send(Message::Text(serde_json::to_string(
                &ClientCommand::StartGame,
            )?))
            .await?;
    }

    let _ = ws_tx.send(Message::Close(None)).await;
    Ok(())
}
