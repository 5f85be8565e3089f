//! Nearby CLI binary.
//!
//! Runs an interactive peer on the local network.
//!
//! # Commands
//!
//! - `peer` - Discover, invite and exchange messages with nearby peers
//! - `config` - Print the effective configuration as TOML

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use nearby::{
    Config, ConsentPolicy, PeerAddress, Player, QuicTransport, ServiceTag, SessionManager, VERSION,
};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "nearby")]
#[command(version = VERSION)]
#[command(about = "Nearby - peer sessions over the local network", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an interactive peer
    Peer {
        /// Service tag to advertise and browse
        #[arg(short, long)]
        tag: Option<String>,

        /// Display name
        #[arg(short, long)]
        name: Option<String>,

        /// Accept every invitation automatically
        #[arg(long)]
        auto_accept: bool,

        /// Only trust peers after an explicit accept
        #[arg(long)]
        strict: bool,

        /// Config file (default: <config dir>/nearby/config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// QUIC listen address
        #[arg(long)]
        listen: Option<std::net::SocketAddr>,

        /// Static peer as JSON `{"peer":..., "addr":..., "fingerprint":...}`
        #[arg(long)]
        known: Vec<String>,

        /// Verbose logging
        #[arg(short, long)]
        verbose: bool,

        /// Log as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config {
        /// Config file (default: <config dir>/nearby/config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Peer {
            tag,
            name,
            auto_accept,
            strict,
            config,
            listen,
            known,
            verbose,
            json,
        } => {
            init_logging(verbose, json);

            let mut config = load_config(config)?;
            if let Some(tag) = tag {
                config.session.service_tag = ServiceTag::new(tag)?;
            }
            if let Some(name) = name {
                config.session.display_name = Some(name);
            }
            if strict {
                config.session.consent_policy = ConsentPolicy::Strict;
            }
            if let Some(addr) = listen {
                config.quic.listen_addr = addr;
            }

            let known = known
                .iter()
                .map(|raw| serde_json::from_str::<PeerAddress>(raw))
                .collect::<Result<Vec<_>, _>>()
                .context("Invalid --known peer")?;

            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(cmd_peer(config, known, auto_accept))
        }

        Commands::Config { config } => {
            let config = load_config(config)?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "nearby=debug" } else { "nearby=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => {
            let file = Config::from_file(&path)
                .with_context(|| format!("Failed to load {}", path.display()))?;
            Ok(file.merge(Config::from_env()))
        }
        None => Ok(Config::load()?),
    }
}

async fn cmd_peer(
    config: Config,
    known: Vec<PeerAddress>,
    auto_accept: bool,
) -> anyhow::Result<()> {
    let local = config.session.local_peer();
    let (transport, events) = QuicTransport::bind(local, config.transport_config()?)?;
    let transport = Arc::new(transport);
    for address in known {
        transport.add_known_peer(address);
    }

    let own = serde_json::to_string(&transport.peer_address())?;
    let session = SessionManager::start(transport, events, config.session).await?;
    let pending: Arc<Mutex<Vec<Player>>> = Arc::new(Mutex::new(Vec::new()));

    session.on_nearby_update(|player| {
        println!("[nearby] {} ({:?})", player.name, player.status);
    });
    session.on_data_received(|data, player| {
        println!("[{}] {}", player.name, String::from_utf8_lossy(&data));
    });
    session.on_connect_result(print_progress);

    {
        let pending = Arc::clone(&pending);
        let responder = session.clone();
        session.on_invitation_received(move |player| {
            println!("[invite] {} wants to connect", player.name);
            if auto_accept {
                let responder = responder.clone();
                tokio::spawn(async move {
                    if let Err(e) = responder.respond_to_invitation(&player, true).await {
                        tracing::warn!("Auto-accept failed: {}", e);
                    }
                });
            } else {
                let mut pending = pending.lock().unwrap_or_else(|e| e.into_inner());
                println!("  accept {0} / deny {0}", pending.len());
                pending.push(player);
            }
        });
    }

    println!("{} on '{}'", session.local_peer(), session.service_tag().await);
    println!("address: {}", own);
    println!(
        "commands: list, connected, connect <n>, accept <n>, deny <n>, send <text>, tag <tag>, quit"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let (command, arg) = match line.trim().split_once(' ') {
            Some((command, arg)) => (command, arg.trim()),
            None => (line.trim(), ""),
        };
        if let Flow::Quit = run_command(&session, &pending, command, arg).await {
            break;
        }
    }

    session.shutdown().await;
    Ok(())
}

enum Flow {
    Continue,
    Quit,
}

/// Run one interactive command. Failures are printed, never fatal.
async fn run_command(
    session: &SessionManager,
    pending: &Mutex<Vec<Player>>,
    command: &str,
    arg: &str,
) -> Flow {
    match command {
        "" => {}
        "list" => {
            for (i, player) in session.nearby_players().await.iter().enumerate() {
                println!("  {i}: {} ({:?})", player.name, player.status);
            }
        }
        "connected" => {
            for player in session.connected_players().await {
                println!("  {}", player.name);
            }
        }
        "connect" => match pick(&session.nearby_players().await, arg) {
            Some(player) => {
                println!("inviting {}", player.name);
                session.connect_to_player(&player, print_progress);
            }
            None => println!("no such player: {arg}"),
        },
        "accept" | "deny" => {
            let player = {
                let mut pending = pending.lock().unwrap_or_else(|e| e.into_inner());
                arg.parse::<usize>()
                    .ok()
                    .filter(|i| *i < pending.len())
                    .map(|i| pending.remove(i))
            };
            match player {
                Some(player) => {
                    match session
                        .respond_to_invitation(&player, command == "accept")
                        .await
                    {
                        Ok(report) if !report.is_complete() => {
                            println!("answer to {} was not delivered", player.name);
                        }
                        Ok(_) => {}
                        Err(e) => println!("cannot answer {}: {e}", player.name),
                    }
                }
                None => println!("no such invitation: {arg}"),
            }
        }
        "send" => {
            let report = session
                .send_data(Bytes::copy_from_slice(arg.as_bytes()), None)
                .await;
            println!(
                "sent to {} of {} peers",
                report.delivered.len(),
                report.attempted()
            );
        }
        "tag" => match ServiceTag::new(arg) {
            Ok(tag) => {
                if let Err(e) = session.set_service_tag(tag).await {
                    println!("cannot switch tag: {e}");
                }
            }
            Err(e) => println!("{e}"),
        },
        "quit" | "exit" => return Flow::Quit,
        other => println!("unknown command: {other}"),
    }
    Flow::Continue
}

fn print_progress(player: Player) {
    println!("[connect] {} ({:?})", player.name, player.status);
}

fn pick(players: &[Player], arg: &str) -> Option<Player> {
    arg.parse::<usize>()
        .ok()
        .and_then(|i| players.get(i).cloned())
}
