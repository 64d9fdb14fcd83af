use clap::{Parser, Subcommand};
use shelfdb::{DatabaseManager, ManagerSettings};
use std::path::PathBuf;

mod commands;

use commands::target::TargetArgs;

#[derive(Parser)]
#[command(name = "shelfdb-cli")]
#[command(about = "Verify and initialize shelfdb database targets")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Manager settings file (defaults to SHELFDB_CONFIG or ./shelfdb.toml)
    #[arg(short = 'S', long, global = true)]
    settings: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that a target is reachable; prints OK or FAILED
    Test {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Connect and run the schema pass, printing what changed
    Init {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Print the persisted default target (password redacted)
    ShowDefault {
        /// Config store file
        #[arg(long)]
        store: PathBuf,
    },

    /// Persist a default target
    SaveDefault {
        /// Config store file
        #[arg(long)]
        store: PathBuf,

        #[command(flatten)]
        target: TargetArgs,
    },
}

fn load_settings(path: Option<PathBuf>) -> anyhow::Result<ManagerSettings> {
    let settings = match path {
        Some(path) => {
            let settings = ManagerSettings::from_file(&path)?;
            settings.validate()?;
            settings
        }
        None => ManagerSettings::load()?,
    };
    Ok(settings)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    let settings = load_settings(cli.settings)?;
    log::debug!("Manager settings: {:?}", settings);
    let manager = DatabaseManager::new(settings);

    match cli.command {
        Commands::Test { target } => {
            let reachable = commands::test::run(&manager, &target).await;
            if !reachable {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Init { target } => {
            let result = commands::init::run(&manager, &target).await;
            manager.shutdown().await;
            result
        }
        Commands::ShowDefault { store } => commands::default_config::show(&manager, store).await,
        Commands::SaveDefault { store, target } => {
            commands::default_config::save(&manager, store, &target).await
        }
    }
}
