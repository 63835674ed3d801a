mod cache;
mod cancellation;
mod commands;
mod config;
mod credentials;
mod db_manager;
mod enrichment;
mod http;
mod library;
mod protocol;
mod rate_limiter;
mod sources;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{debug, error};

use commands::EnrichOverrides;

#[derive(Parser)]
#[command(
    name = "steam-pick",
    version,
    about = "Sync a Steam library and enrich it with store details"
)]
struct Cli {
    /// Config file to use instead of the per-user default
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log debug output
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Enrich stored games with store details
    Enrich {
        /// Re-fetch details for every stored game
        #[arg(long)]
        refresh: bool,
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long)]
        rate_limit_per_minute: Option<u32>,
        /// Stub failed lookups without asking PCGamingWiki
        #[arg(long)]
        no_fallback: bool,
    },
    /// Sync the owned-games list into the local database
    Sync {
        #[arg(long, conflicts_with = "vanity")]
        steamid: Option<String>,
        /// Steam community vanity name
        #[arg(long)]
        vanity: Option<String>,
        #[arg(long)]
        include_free_to_play: bool,
    },
    /// Show cache location and size, or clear it
    Cache {
        #[arg(long)]
        clear: bool,
    },
    /// List stored games that have never been played
    List {
        /// Maximum number of games to print; 0 prints all
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Pick a random unplayed game
    Pick {
        /// Seed for a reproducible pick
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        json: bool,
    },
    /// Print the stored details for one game
    Show {
        app_id: u32,
    },
    /// Save a Steam Web API key to the system keyring
    Login {
        #[arg(long)]
        api_key: String,
    },
}

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "non-string panic payload".to_string()
}

fn run(cli: Cli) -> Result<ExitCode, commands::CommandError> {
    if let Command::Login { api_key } = &cli.command {
        return commands::run_login(api_key);
    }

    let config_file = commands::config_path(cli.config)?;
    debug!("Config: loading {}", config_file.display());
    let config = config::load_or_create(&config_file)?;

    match cli.command {
        Command::Enrich {
            refresh,
            workers,
            rate_limit_per_minute,
            no_fallback,
        } => commands::run_enrich(
            &config,
            &EnrichOverrides {
                refresh,
                workers,
                rate_limit_per_minute,
                no_fallback,
            },
        ),
        Command::Sync {
            steamid,
            vanity,
            include_free_to_play,
        } => commands::run_sync(
            &config,
            steamid.as_deref(),
            vanity.as_deref(),
            include_free_to_play,
        ),
        Command::Cache { clear } => commands::run_cache(&config, clear),
        Command::List { limit, json } => commands::run_list(&config, limit, json),
        Command::Pick { seed, json } => commands::run_pick(&config, seed, json),
        Command::Show { app_id } => commands::run_show(&config, app_id),
        Command::Login { api_key } => commands::run_login(&api_key),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut clog = colog::default_builder();
    clog.filter(
        None,
        if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        },
    );
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!(
            "panic in thread '{}': {}",
            thread_name,
            panic_payload_to_string(panic_info.payload())
        );
    }));

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            error!("{}", err);
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}
