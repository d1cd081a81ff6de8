use std::io::{BufRead, BufReader};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{error, info, warn};

use dungeon_core::{
    build_app, load_gameplay_config_from_env, load_level_from_env, ServerConfig, ServerContext,
    SessionId, Transport,
};

const IDLE_SLEEP: Duration = Duration::from_millis(2);

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ServerConfig::from_env();
    let gameplay = load_gameplay_config_from_env();
    let level = load_level_from_env();

    let transport = match Transport::listen(config.bind, config.max_frame_len) {
        Ok(transport) => transport,
        Err(err) => {
            error!(target: "dungeon::server", bind = %config.bind, error = %err, "server.bind_failed");
            return ExitCode::FAILURE;
        }
    };
    let admin_rx = match spawn_command_listener(config.admin_bind) {
        Ok(receiver) => receiver,
        Err(err) => {
            error!(target: "dungeon::server", bind = %config.admin_bind, error = %err, "admin.bind_failed");
            return ExitCode::FAILURE;
        }
    };

    let bind = config.bind;
    let admin_bind = config.admin_bind;
    let app = match build_app(config, gameplay, &level) {
        Ok(app) => app,
        Err(err) => {
            error!(target: "dungeon::server", error = %err, "level.install_failed");
            return ExitCode::FAILURE;
        }
    };
    let mut ctx = ServerContext::new(app, transport);

    info!(
        target: "dungeon::server",
        %bind,
        %admin_bind,
        level = %level.name,
        "Dungeon server ready"
    );

    loop {
        for command in admin_rx.try_iter() {
            if !apply_command(&mut ctx, command) {
                ctx.shutdown();
                return ExitCode::SUCCESS;
            }
        }
        match ctx.cycle(Instant::now()) {
            Ok(_) => thread::sleep(IDLE_SLEEP),
            Err(fault) => {
                error!(target: "dungeon::server", error = %fault, "simulation.fault");
                ctx.shutdown();
                return ExitCode::FAILURE;
            }
        }
    }
}

#[derive(Debug)]
enum Command {
    Start,
    TurnsPerSecond(f64),
    Kick(SessionId),
    Say(String),
    Save(Option<PathBuf>),
    Dump(PathBuf),
    Status,
    Quit,
}

/// Returns `false` once the server should stop.
fn apply_command(ctx: &mut ServerContext, command: Command) -> bool {
    match command {
        Command::Start => {
            if ctx.is_started() {
                warn!(target: "dungeon::server", "command.rejected=already_started");
            } else {
                ctx.auto_start();
            }
        }
        Command::TurnsPerSecond(tps) => ctx.set_turns_per_second(tps),
        Command::Kick(session) => {
            if !ctx.kick(session) {
                warn!(target: "dungeon::server", session = %session, "command.rejected=unknown_session");
            }
        }
        Command::Say(message) => ctx.say(message),
        Command::Save(path) => match ctx.save_map(path.as_deref()) {
            Ok(path) => info!(target: "dungeon::server", path = %path.display(), "level.saved"),
            Err(err) => warn!(target: "dungeon::server", error = %err, "level.save_failed"),
        },
        Command::Dump(path) => {
            let written = ctx
                .snapshot_json()
                .map_err(|err| err.to_string())
                .and_then(|json| std::fs::write(&path, json).map_err(|err| err.to_string()));
            match written {
                Ok(()) => info!(target: "dungeon::server", path = %path.display(), "snapshot.dumped"),
                Err(err) => warn!(target: "dungeon::server", path = %path.display(), error = %err, "snapshot.dump_failed"),
            }
        }
        Command::Status => info!(target: "dungeon::server", status = %ctx.status(), "server.status"),
        Command::Quit => return false,
    }
    true
}

fn spawn_command_listener(bind_addr: SocketAddr) -> std::io::Result<Receiver<Command>> {
    let listener = TcpListener::bind(bind_addr)?;
    listener.set_nonblocking(true)?;

    let (sender, receiver) = unbounded::<Command>();
    thread::Builder::new()
        .name("dungeon-admin".into())
        .spawn(move || loop {
            match listener.accept() {
                Ok((stream, addr)) => {
                    info!(target: "dungeon::server", %addr, "admin.connected");
                    let sender = sender.clone();
                    thread::spawn(move || handle_client(stream, sender));
                }
                Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(50));
                }
                Err(err) => {
                    warn!(target: "dungeon::server", error = %err, "admin.accept_failed");
                    thread::sleep(Duration::from_millis(200));
                }
            }
        })?;

    Ok(receiver)
}

fn handle_client(stream: TcpStream, sender: Sender<Command>) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match parse_command(trimmed) {
                    Some(cmd) => {
                        if sender.send(cmd).is_err() {
                            break;
                        }
                    }
                    None => warn!(target: "dungeon::server", command = trimmed, "admin.invalid_command"),
                }
            }
            Err(err) => {
                warn!(target: "dungeon::server", error = %err, "admin.read_failed");
                break;
            }
        }
    }
}

fn parse_command(input: &str) -> Option<Command> {
    let (word, rest) = input
        .split_once(char::is_whitespace)
        .map(|(word, rest)| (word, rest.trim()))
        .unwrap_or((input, ""));
    match word {
        "start" => Some(Command::Start),
        "tps" => rest.parse().ok().map(Command::TurnsPerSecond),
        "kick" => rest.parse().ok().map(|id| Command::Kick(SessionId(id))),
        "say" if !rest.is_empty() => Some(Command::Say(rest.to_string())),
        "save" => Some(Command::Save((!rest.is_empty()).then(|| PathBuf::from(rest)))),
        "dump" if !rest.is_empty() => Some(Command::Dump(PathBuf::from(rest))),
        "status" => Some(Command::Status),
        "quit" | "exit" => Some(Command::Quit),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_admin_commands() {
        assert!(matches!(parse_command("start"), Some(Command::Start)));
        assert!(matches!(parse_command("tps 2.5"), Some(Command::TurnsPerSecond(t)) if t == 2.5));
        assert!(matches!(parse_command("kick 3"), Some(Command::Kick(SessionId(3)))));
        assert!(matches!(parse_command("say  hello there"), Some(Command::Say(m)) if m == "hello there"));
        assert!(matches!(parse_command("save"), Some(Command::Save(None))));
        assert!(matches!(parse_command("dump /tmp/w.json"), Some(Command::Dump(_))));
        assert!(parse_command("say").is_none());
        assert!(parse_command("tps fast").is_none());
        assert!(parse_command("rollback 3").is_none());
    }
}
