use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use log::{debug, info};
use pie_ipc::ipc::ClientEvent;
use pie_ipc::{IpcConfig, MenuItem, MenuOptions, ObserverClient, ShowMenuClient};
use std::path::{Path, PathBuf};

/// Command-line client for a running pie-menu host
#[derive(Parser, Debug)]
#[command(name = "pie-menu", version)]
struct Args {
    /// Directory holding the discovery record (overrides PIE_IPC_DIR)
    #[arg(long, global = true)]
    ipc_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the menu described by a JSON file and print what the user picks
    Show {
        /// Path to the menu description (the root item of the tree)
        menu: PathBuf,

        /// Open the menu at the screen center instead of the pointer
        #[arg(long)]
        centered: bool,

        /// Keep the menu where it opened while navigating submenus
        #[arg(long)]
        anchored: bool,

        /// Select items by hovering instead of clicking
        #[arg(long)]
        hover_mode: bool,
    },
    /// Print every menu interaction until Ctrl-C
    Observe,
}

fn describe(event: &ClientEvent) -> String {
    match event {
        ClientEvent::Open => "open".to_string(),
        ClientEvent::Select { target, path } => format!("select {} {:?}", target, path),
        ClientEvent::Hover { target, path } => format!("hover {} {:?}", target, path),
        ClientEvent::Cancel => "cancel".to_string(),
        ClientEvent::Error {
            reason,
            description,
        } => format!("error {}: {}", reason, description),
        ClientEvent::Closed => "closed".to_string(),
    }
}

fn load_menu(path: &Path) -> Result<MenuItem> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read menu file {}", path.display()))?;
    let menu: MenuItem = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid menu in {}", path.display()))?;
    menu.validate()?;
    Ok(menu)
}

async fn show(config: &IpcConfig, menu_path: &Path, options: MenuOptions) -> Result<()> {
    let menu = load_menu(menu_path)?;
    let client = ShowMenuClient::discover(config)?;
    let mut events = client.events();
    client.init().await?;

    if !client.show_menu_with(&menu, options) {
        bail!("Menu host closed the connection");
    }
    info!("Requested menu '{}'", menu.name);

    while let Some(event) = events.recv().await {
        println!("{}", describe(&event));
        match event {
            ClientEvent::Select { .. } | ClientEvent::Cancel => break,
            ClientEvent::Error { reason, description } => {
                client.close();
                bail!("Menu host reported {}: {}", reason, description);
            }
            ClientEvent::Closed => bail!("Menu host closed the connection"),
            _ => {}
        }
    }

    client.close();
    Ok(())
}

async fn observe(config: &IpcConfig) -> Result<()> {
    let client = ObserverClient::discover(config)?;
    let mut events = client.events();
    client.init().await?;
    client.start_observing();
    info!("Observing menu interactions, press Ctrl-C to stop");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ClientEvent::Closed) | None => {
                    info!("Menu host closed the connection");
                    return Ok(());
                }
                Some(event) => println!("{}", describe(&event)),
            },
            _ = tokio::signal::ctrl_c() => {
                debug!("Received Ctrl-C");
                break;
            }
        }
    }

    client.stop_observing();
    client.close();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let mut config = IpcConfig::from_env();
    if let Some(dir) = args.ipc_dir {
        config.discovery_dir = dir;
    }

    match args.command {
        Command::Show {
            menu,
            centered,
            anchored,
            hover_mode,
        } => {
            let options = MenuOptions {
                centered,
                anchored,
                hover_mode,
            };
            show(&config, &menu, options).await
        }
        Command::Observe => observe(&config).await,
    }
}
