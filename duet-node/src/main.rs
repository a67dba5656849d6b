// Duet node: host or join a two-party room from the terminal.

mod config;
mod discovery;
mod media;
mod runner;
mod transport;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;

use duet_core::{generate_room_token, Participant, Role, Session};

use discovery::Rendezvous;
use media::HeadlessMedia;
use runner::{parse_command, Command, Runner};

/// Duet - two-party rooms with chat and file sharing
#[derive(Parser)]
#[command(name = "duet")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug output (implies --verbose)
    #[arg(short, long)]
    debug: bool,

    /// Display name shown to the other participant
    #[arg(short, long, global = true, default_value = "Guest")]
    name: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a room and wait for someone to join
    Host {
        /// Room token to claim (generated when omitted)
        #[arg(short, long)]
        token: Option<String>,
    },
    /// Join a room by its token
    Join {
        /// Room token shared by the host
        token: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load();
    let (role, token) = match cli.command {
        Commands::Host { token } => (Role::Host, token.unwrap_or_else(generate_room_token)),
        Commands::Join { token } => (Role::Joiner, token.trim().to_lowercase()),
    };
    let name = match cli.name.trim() {
        "" => "Guest",
        n => n,
    };
    let local = Participant::local(name);
    tracing::info!(?role, token = %token, name = %local.display_name, "starting");

    let session = Session::with_config(role, token, local, cfg.session_config());
    let rendezvous = Rendezvous::Lan {
        discovery_port: cfg.discovery_port,
        resolve_timeout: cfg.resolve_timeout(),
    };
    let node = Runner::new(session, rendezvous, HeadlessMedia::new(cfg.audio, cfg.video), &cfg);

    // Single-threaded: every session mutation happens on one dispatch context.
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build runtime")?;
    let session = rt.block_on(async move {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(read_commands(cmd_tx.clone()));
        tokio::spawn(async move {
            if shutdown_signal().await.is_ok() {
                let _ = cmd_tx.send(Command::Leave);
            }
        });
        node.run(cmd_rx).await
    })?;

    if let Some(err) = session.last_error() {
        anyhow::bail!("{err}");
    }
    Ok(())
}

/// Forward stdin lines as commands. EOF leaves the room.
async fn read_commands(tx: mpsc::UnboundedSender<Command>) {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(cmd) = parse_command(&line) {
                    if tx.send(cmd).is_err() {
                        return;
                    }
                }
            }
            Ok(None) => {
                let _ = tx.send(Command::Leave);
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "stdin closed");
                let _ = tx.send(Command::Leave);
                return;
            }
        }
    }
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
