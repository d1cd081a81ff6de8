use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::bail;
use color_eyre::Result;
use tracing::info;

use dungeon_client::{replay_file, run_bot, BotOptions, BotSession, BotState};

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless dungeon client", long_about = None)]
struct Cli {
    /// Address of the dungeon server.
    #[arg(long, default_value = "127.0.0.1:32222")]
    endpoint: String,
    #[arg(long, default_value = "bot")]
    nick: String,
    /// Append every frame received from the server to this replay file.
    #[arg(long)]
    record: Option<PathBuf>,
    /// Play a replay file into a local mirror instead of connecting.
    #[arg(long, conflicts_with = "record")]
    replay: Option<PathBuf>,
    /// Mark tiles for digging every N turns.
    #[arg(long, value_name = "N")]
    auto_dig: Option<i64>,
    /// Disconnect after acknowledging this many turns.
    #[arg(long)]
    turns: Option<i64>,
    /// Print the run summary as JSON.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Some(path) = cli.replay {
        let mirror = replay_file(&path)?;
        if cli.json {
            let summary = serde_json::json!({
                "replay": path.display().to_string(),
                "turn": mirror.turn,
                "creatures": mirror.creatures.len(),
                "desyncs": mirror.desyncs(),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
            return Ok(());
        }
        println!(
            "replayed {}: turn {} creatures {} desyncs {}",
            path.display(),
            mirror.turn,
            mirror.creatures.len(),
            mirror.desyncs()
        );
        return Ok(());
    }

    let mut options = BotOptions::new(cli.nick);
    options.auto_dig_every = cli.auto_dig;
    options.max_turns = cli.turns;
    let (bot, summary) = run_bot(&cli.endpoint, BotSession::new(options), cli.record.as_deref()).await?;
    info!(
        target: "dungeon::client",
        turns = summary.turns_acked,
        frames = summary.frames,
        recorded = summary.recorded,
        "client.summary"
    );
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "turn {} acked {} desyncs {} creatures {}",
            summary.last_turn,
            summary.turns_acked,
            summary.desyncs,
            bot.mirror().creatures.len()
        );
    }
    if let BotState::Finished(reason) = &summary.state {
        if reason.starts_with("rejected") {
            bail!("{reason}");
        }
    }
    Ok(())
}
