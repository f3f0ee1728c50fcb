use anyhow::Result;
use clap::{Parser, Subcommand};

use refgate::cli::{events, init_db, resolve, run, user};
use refgate::config::Config;
use refgate::store::Store;

#[derive(Parser)]
#[command(name = "refgate")]
#[command(about = "Referral attribution and redirect bot for Telegram")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "refgate.yaml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot (long polling)
    Run,

    /// List recorded attribution events, newest first
    Events {
        /// Only events of this user
        #[arg(short, long)]
        user: Option<i64>,

        /// Event kind (start, click)
        #[arg(short, long)]
        kind: Option<String>,

        /// Only events carrying this keyword
        #[arg(long)]
        keyword: Option<String>,

        /// Maximum number of rows
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },

    /// Show the keyword a user is currently attributed to
    Resolve {
        /// Telegram user id
        user_id: i64,
    },

    /// Show a stored user profile
    User {
        /// Telegram user id
        user_id: i64,
    },

    /// Create the database schema
    InitDb,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config; a broken config file is fatal
    let config = Config::load(&cli.config)?;
    config.validate()?;

    refgate::logging::init(&config.logging);

    match cli.command {
        Commands::Run => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(run::run(&config))?;
        }
        Commands::Events {
            user,
            kind,
            keyword,
            limit,
        } => {
            let store = Store::open(&config.database_path(), &config.database)?;
            events::run(&store, user, kind, keyword, limit)?;
        }
        Commands::Resolve { user_id } => {
            let store = Store::open(&config.database_path(), &config.database)?;
            resolve::run(&store, user_id)?;
        }
        Commands::User { user_id } => {
            let store = Store::open(&config.database_path(), &config.database)?;
            user::run(&store, user_id)?;
        }
        Commands::InitDb => {
            init_db::run(&config)?;
        }
    }

    Ok(())
}
