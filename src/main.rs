mod commands;
mod display;
mod roster;
mod session;
#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use commands::{Input, HELP};
use session::{Session, SessionCommand, SessionUpdate};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tether_channels::{api::HttpDeviceApi, qr, socketio::SocketIoChannel};
use tether_core::{
    config::{self, Config},
    device::DeviceRoster,
    pairing::PairingState,
    plan,
    traits::DeviceApi,
};
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Parser)]
#[command(
    name = "tether",
    version,
    about = "Tether: link WhatsApp devices and watch their status"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive device-scan session.
    Start {
        /// Draw QR codes for dark-background terminals.
        #[arg(long)]
        invert: bool,
    },
    /// Pair one device, then exit.
    Pair {
        /// Also write each pairing code to this PNG file.
        #[arg(long)]
        png: Option<PathBuf>,
        #[arg(long)]
        invert: bool,
    },
    /// List devices and the plan limit.
    Devices,
    /// Delete a device from the account.
    Remove {
        /// Device id as shown by `tether devices`.
        id: String,
    },
    /// Show configuration and check the API.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.tether.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Start { invert } => run_interactive(&cfg, invert).await?,
        Commands::Pair { png, invert } => run_pair(&cfg, png, invert).await?,
        Commands::Devices => {
            let api = HttpDeviceApi::new(&cfg.api, &cfg.account)?;
            let roster = DeviceRoster::from_records(api.list_devices().await?);
            let at_limit = plan::is_at_limit(&roster, &cfg.account.plan);
            println!(
                "{}",
                display::render_roster(&roster, &cfg.account.plan, false, at_limit)
            );
        }
        Commands::Remove { id } => {
            let api = HttpDeviceApi::new(&cfg.api, &cfg.account)?;
            api.delete_device(&id).await?;
            println!("Device {id} removed.");
        }
        Commands::Status => {
            println!("{} status\n", cfg.tether.name);
            println!("Config:   {}", cli.config);
            println!(
                "User:     {}",
                cfg.account.owner_id().unwrap_or("(not set)")
            );
            println!(
                "Plan:     {} (up to {} devices)",
                cfg.account.plan,
                plan::PlanLimit::for_tier(&cfg.account.plan).max_devices
            );
            println!("API:      {}", cfg.api.base_url);
            println!("Realtime: {}{}", cfg.realtime.url, cfg.realtime.path);
            println!();

            let api = HttpDeviceApi::new(&cfg.api, &cfg.account)?;
            match api.list_devices().await {
                Ok(devices) => println!("  api: reachable ({} devices)", devices.len()),
                Err(e) => println!("  api: unreachable ({e})"),
            }
        }
    }

    Ok(())
}

/// Wire a session to the real channel and REST client.
fn spawn_session(
    cfg: &Config,
) -> anyhow::Result<(
    mpsc::Sender<SessionCommand>,
    mpsc::UnboundedReceiver<SessionUpdate>,
    tokio::task::JoinHandle<anyhow::Result<()>>,
)> {
    let channel = Arc::new(SocketIoChannel::new(cfg.realtime.clone()));
    let api = Arc::new(HttpDeviceApi::new(&cfg.api, &cfg.account)?);
    let (update_tx, update_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::channel(16);

    let session = Session::new(channel, api, &cfg.account, &cfg.roster, update_tx);
    let handle = tokio::spawn(session.run(command_rx));

    let quit = command_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = quit.send(SessionCommand::Quit).await;
        }
    });

    Ok((command_tx, update_rx, handle))
}

fn print_update(update: &SessionUpdate, plan: &str, invert: bool) {
    match update {
        SessionUpdate::State(state) => println!("{}", display::render_state(state, invert)),
        SessionUpdate::Roster {
            roster,
            stale,
            at_limit,
        } => println!("{}", display::render_roster(roster, plan, *stale, *at_limit)),
        SessionUpdate::ChannelOpen => println!("Realtime connection open."),
        SessionUpdate::Synced(state) => println!("Server status: {state}"),
        SessionUpdate::Notice(notice) => println!("{}", display::render_notice(notice)),
    }
}

async fn run_interactive(cfg: &Config, invert: bool) -> anyhow::Result<()> {
    let (commands, mut updates, handle) = spawn_session(cfg)?;

    // Blocking stdin on its own thread; it must not hold the runtime open at exit.
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            match Input::parse(&line) {
                Some(Input::Session(command)) => {
                    if commands.blocking_send(command).is_err() {
                        break;
                    }
                }
                Some(Input::Help) => println!("{HELP}"),
                Some(Input::Usage(usage)) => println!("usage: {usage}"),
                Some(Input::Unknown(word)) => println!("Unknown command '{word}'. Type 'help'."),
                None => {}
            }
        }
        let _ = commands.blocking_send(SessionCommand::Quit);
    });

    println!("{HELP}\n");
    while let Some(update) = updates.recv().await {
        print_update(&update, &cfg.account.plan, invert);
    }
    handle.await?
}

/// Next move for `tether pair` after a session update.
#[derive(Debug, PartialEq, Eq)]
enum PairStep {
    Wait,
    RequestPair,
    ShowCode(String),
    Done,
    Failed(String),
}

/// Drives `tether pair`. The pair request goes out once the server has
/// answered the status request sent on open, so a late resync answer cannot
/// undo it.
#[derive(Debug, Default)]
struct PairFlow {
    requested: bool,
}

impl PairFlow {
    fn step(&mut self, update: &SessionUpdate) -> PairStep {
        match update {
            SessionUpdate::Synced(PairingState::Linked) if !self.requested => {
                PairStep::Failed("a device is already linked for this user; unlink it first".into())
            }
            SessionUpdate::Synced(_) if !self.requested => {
                self.requested = true;
                PairStep::RequestPair
            }
            SessionUpdate::State(PairingState::WaitingForCode { code }) => {
                PairStep::ShowCode(code.clone())
            }
            SessionUpdate::State(PairingState::Linked) if self.requested => PairStep::Done,
            SessionUpdate::State(PairingState::LimitReached) => {
                PairStep::Failed("device limit reached for your plan".into())
            }
            SessionUpdate::State(PairingState::Unlinked) => {
                PairStep::Failed("pairing did not complete: the link was dropped".into())
            }
            _ => PairStep::Wait,
        }
    }
}

async fn run_pair(cfg: &Config, png: Option<PathBuf>, invert: bool) -> anyhow::Result<()> {
    if cfg.account.owner_id().is_none() {
        anyhow::bail!("no user id configured. Set account.user_id or TETHER_USER_ID.");
    }
    let (commands, mut updates, handle) = spawn_session(cfg)?;
    let mut flow = PairFlow::default();
    let mut outcome: Option<anyhow::Result<()>> = None;

    while let Some(update) = updates.recv().await {
        print_update(&update, &cfg.account.plan, invert);
        if outcome.is_some() {
            continue;
        }
        match flow.step(&update) {
            PairStep::Wait => {}
            PairStep::RequestPair => {
                let _ = commands.send(SessionCommand::Pair).await;
            }
            PairStep::ShowCode(code) => {
                if let Some(path) = &png {
                    match qr::write_png(&code, path) {
                        Ok(()) => println!("Pairing code written to {}", path.display()),
                        Err(e) => warn!("could not write {}: {e}", path.display()),
                    }
                }
            }
            PairStep::Done => {
                println!("Device linked.");
                outcome = Some(Ok(()));
                let _ = commands.send(SessionCommand::Quit).await;
            }
            PairStep::Failed(reason) => {
                outcome = Some(Err(anyhow::anyhow!(reason)));
                let _ = commands.send(SessionCommand::Quit).await;
            }
        }
    }
    handle.await??;
    outcome.unwrap_or_else(|| Err(anyhow::anyhow!("session ended before pairing finished")))
}
