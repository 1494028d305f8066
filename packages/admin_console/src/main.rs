use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tracing::info;
use tracing_subscriber::prelude::*;

use realtime_handlers::{HandlerContext, init_handlers};
use realtime_link::{
    Collaborators, ConnectionManager, SessionState, SessionStore, TungsteniteConnector,
    spawn_auto_connect,
};

mod api;
mod config;
mod console;
mod surface;

use crate::api::ApiClient;
use crate::config::{ConsoleDirs, FileConfig, Profile, load_config};
use crate::console::Console;
use crate::surface::{ConsoleNotifier, ConsoleSurface, ConsoleTerminator};

#[derive(Parser)]
#[command(name = "admin-console")]
#[command(about = "Realtime link console for the admin back office")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Custom data directory (defaults to the platform config dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Configuration profile (overrides `profile` in config.toml)
    #[arg(long, global = true, value_enum)]
    profile: Option<Profile>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and open the interactive console (default)
    Run,
    /// Write a config.toml with every default filled in
    InitConfig,
    /// Print the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let dirs = ConsoleDirs::new(cli.data_dir.clone())?;
    let config: FileConfig = load_config(&dirs.data_dir, cli.profile.as_ref())
        .extract()
        .context("Failed to load configuration")?;

    match cli.command {
        Some(Commands::InitConfig) => {
            let path = dirs.write_default_config()?;
            println!("Wrote {}", path.display());
            Ok(())
        }
        Some(Commands::ShowConfig) => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Some(Commands::Run) | None => run(config, &dirs, cli.debug).await,
    }
}

async fn run(config: FileConfig, dirs: &ConsoleDirs, debug: bool) -> Result<()> {
    // Setup logging
    let default_directive = if debug || config.link.debug {
        "admin_console=debug,realtime_link=debug,realtime_handlers=debug,info"
    } else {
        "admin_console=info,realtime_link=info,realtime_handlers=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let ws_config = config.link.websocket_config(&config.api);
    info!(
        url = %ws_config.base_url,
        data_dir = %dirs.data_dir.display(),
        "Starting admin console"
    );

    let session = Arc::new(SessionStore::with_state(SessionState {
        access_token: config.session.access_token.clone(),
        refresh_token: config.session.refresh_token.clone(),
        tenant_id: config.session.tenant_id,
        visit_tenant_id: config.session.visit_tenant_id,
    }));
    let api = Arc::new(ApiClient::new(&config.api, session.clone())?);

    let link = ConnectionManager::spawn(
        ws_config,
        Arc::new(TungsteniteConnector::new()),
        Collaborators {
            session: session.clone(),
            refresher: api.clone(),
            terminator: Arc::new(ConsoleTerminator::new(
                session.clone(),
                config.session.route.clone(),
            )),
            surface: Arc::new(ConsoleSurface),
        },
    );

    let ctx = HandlerContext::new(Arc::new(ConsoleNotifier), api.clone());
    let notifications = ctx.notifications.clone();
    let handlers = Arc::new(OnceLock::new());
    let registered = handlers.clone();
    let auto_connect = spawn_auto_connect(&session, link.clone(), move |link| async move {
        let _ = registered.set(init_handlers(&link, ctx).await);
    });

    // Echo state transitions so the operator sees reconnects as they happen
    let mut status = link.watch_status();
    let status_task = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let state = *status.borrow_and_update();
            eprintln!("[link] {state}");
        }
    });

    if session.state().access_token.is_none() {
        eprintln!("No access token configured; sign in with `token <access> [refresh]`.");
    }

    let console = Console {
        link: link.clone(),
        session,
        notifications,
        handlers,
    };
    let result = console.run().await;

    info!("Shutting down");
    link.shutdown().await;
    auto_connect.abort();
    status_task.abort();
    result
}
