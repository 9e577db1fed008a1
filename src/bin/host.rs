use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use log::{info, warn};
use pie_ipc::ipc::{InteractionTarget, ObserverCallbacks};
use pie_ipc::{IpcConfig, IpcServer};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Headless menu host: serves the IPC protocol and plays interactions typed on stdin
#[derive(Parser, Debug)]
#[command(name = "pie-menu-host", version)]
struct Args {
    /// Directory for the discovery record (overrides PIE_IPC_DIR)
    #[arg(long)]
    ipc_dir: Option<PathBuf>,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Clone, PartialEq)]
enum HostCommand {
    Open,
    Hover(InteractionTarget, Vec<usize>),
    Select(InteractionTarget, Vec<usize>),
    Cancel,
    Status,
}

/// Parse `hover submenu 0,2`, `select item 1`, `open`, `cancel` or `status`
fn parse_command(line: &str) -> Result<HostCommand> {
    let mut words = line.split_whitespace();
    let command = words.next().ok_or_else(|| anyhow!("empty command"))?;

    let parsed = match command {
        "open" => HostCommand::Open,
        "cancel" => HostCommand::Cancel,
        "status" => HostCommand::Status,
        "hover" | "select" => {
            let target: InteractionTarget = words
                .next()
                .ok_or_else(|| anyhow!("missing target (item or submenu)"))?
                .parse()?;
            let path = parse_path(words.next().unwrap_or(""))?;
            if command == "hover" {
                HostCommand::Hover(target, path)
            } else {
                HostCommand::Select(target, path)
            }
        }
        other => bail!("unknown command '{}'", other),
    };

    if let Some(extra) = words.next() {
        bail!("unexpected argument '{}'", extra);
    }
    Ok(parsed)
}

/// `0,2,1` -> [0, 2, 1]; empty or `root` is the root itself
fn parse_path(raw: &str) -> Result<Vec<usize>> {
    if raw.is_empty() || raw == "root" {
        return Ok(Vec::new());
    }
    raw.split(',')
        .map(|index| {
            index
                .trim()
                .parse::<usize>()
                .with_context(|| format!("invalid path index '{}'", index))
        })
        .collect()
}

/// Callbacks of every registration the host has been handed
#[derive(Default)]
struct Observers {
    active: Mutex<Vec<ObserverCallbacks>>,
}

impl Observers {
    fn add(&self, callbacks: ObserverCallbacks) {
        if let Ok(mut active) = self.active.lock() {
            active.push(callbacks);
        }
    }

    fn snapshot(&self) -> Vec<ObserverCallbacks> {
        match self.active.lock() {
            Ok(mut active) => {
                active.retain(|callbacks| callbacks.is_active());
                active.clone()
            }
            Err(_) => Vec::new(),
        }
    }

    fn dispatch(&self, command: &HostCommand) -> usize {
        let observers = self.snapshot();
        let mut delivered = 0;
        for callbacks in &observers {
            let sent = match command {
                HostCommand::Open => callbacks.on_open(),
                HostCommand::Hover(target, path) => callbacks.on_hover(*target, path),
                HostCommand::Select(target, path) => callbacks.on_select(*target, path),
                HostCommand::Cancel => callbacks.on_cancel(),
                HostCommand::Status => false,
            };
            if sent {
                delivered += 1;
            }
        }
        delivered
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    let mut config = IpcConfig::from_env();
    if let Some(dir) = args.ipc_dir {
        config.discovery_dir = dir;
    }

    info!("Starting pie-menu host...");
    let server = IpcServer::new(config);
    let observers = Arc::new(Observers::default());

    let shown = observers.clone();
    server.on_show_menu(move |menu, options, callbacks| {
        info!(
            "Showing menu '{}' ({} top-level items, {:?})",
            menu.name,
            menu.children.len(),
            options
        );
        shown.add(callbacks.clone());
        shown.dispatch(&HostCommand::Open);
    });

    let started = observers.clone();
    server.on_start_observing(move |observer_id, callbacks| {
        info!("Observer {} registered", observer_id);
        started.add(callbacks.clone());
    });

    server.on_stop_observing(|observer_id| {
        info!("Observer {} deregistered", observer_id);
    });

    let addr = server.start().await?;
    info!(
        "Menu host ready on {} (discovery record: {})",
        addr,
        server.discovery_path().display()
    );
    println!("Commands: open | hover <item|submenu> <path> | select <item|submenu> <path> | cancel | status");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line) {
                    Ok(HostCommand::Status) => {
                        println!(
                            "connections: {}, active observers: {}",
                            server.connection_count(),
                            observers.snapshot().len()
                        );
                    }
                    Ok(command) => {
                        let delivered = observers.dispatch(&command);
                        println!("delivered to {} observer(s)", delivered);
                    }
                    Err(e) => warn!("{}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C");
                break;
            }
        }
    }

    server.stop();
    info!("Menu host stopped");
    Ok(())
}
