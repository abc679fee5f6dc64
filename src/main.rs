use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use flowboard::config::BoardConfig;

mod cmd;

#[derive(Parser)]
#[command(name = "flowboard")]
#[command(version, about = "Kanban board with a streaming AI task assistant")]
pub struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the board server (REST, chat relay and change feeds)
    Serve {
        /// Port to serve on (overrides FLOWBOARD_PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Database path (overrides FLOWBOARD_DB_PATH)
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Enable dev mode (permissive CORS, listen on all interfaces)
        #[arg(long)]
        dev: bool,
    },
    /// Create the board database and exit
    InitDb {
        /// Database path (overrides FLOWBOARD_DB_PATH)
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Create an account with the auth service
    Signup {
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        display_name: Option<String>,
        #[arg(long, env = "FLOWBOARD_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Sign in and print an access token
    Login {
        #[arg(long)]
        email: Option<String>,
        #[arg(long, env = "FLOWBOARD_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Revoke the current token
    Logout,
    /// Show who the current token belongs to
    Whoami,
    /// Chat with the board assistant (interactive without a message)
    Chat { message: Option<String> },
    /// Print both board columns
    Board,
    /// Follow the change feed and reprint the board on every change
    Watch,
    /// Add a task
    Add(AddArgs),
    /// Move a task to another column
    Move {
        /// Task id or unique id prefix
        id: String,
        /// todo or in_progress
        status: String,
    },
    /// Delete a task
    Rm {
        /// Task id or unique id prefix
        id: String,
        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Args, Clone)]
pub struct AddArgs {
    pub title: String,
    #[arg(short, long)]
    pub description: Option<String>,
    /// low, medium or high
    #[arg(short, long)]
    pub priority: Option<String>,
    /// Design, Dev, Media, Marketing or Research
    #[arg(short, long)]
    pub category: Option<String>,
    /// todo or in_progress
    #[arg(short, long)]
    pub status: Option<String>,
    /// Due date, YYYY-MM-DD
    #[arg(long)]
    pub due: Option<String>,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = BoardConfig::from_env()?;
    init_tracing(cli.log_json);

    match &cli.command {
        Commands::Serve { port, db_path, dev } => {
            cmd::cmd_serve(&config, *port, db_path.clone(), *dev).await?;
        }
        Commands::InitDb { db_path } => {
            let path = db_path.clone().unwrap_or_else(|| config.db_path.clone());
            cmd::cmd_init_db(&path)?;
        }
        Commands::Signup {
            email,
            display_name,
            password,
        } => {
            cmd::cmd_signup(&config, email.clone(), display_name.clone(), password.clone())
                .await?
        }
        Commands::Login { email, password } => {
            cmd::cmd_login(&config, email.clone(), password.clone()).await?
        }
        Commands::Logout => cmd::cmd_logout(&config).await?,
        Commands::Whoami => cmd::cmd_whoami(&config).await?,
        Commands::Chat { message } => cmd::cmd_chat(&config, message.clone()).await?,
        Commands::Board => cmd::cmd_board(&config).await?,
        Commands::Watch => cmd::cmd_watch(&config).await?,
        Commands::Add(args) => cmd::cmd_add(&config, args).await?,
        Commands::Move { id, status } => cmd::cmd_move(&config, id, status).await?,
        Commands::Rm { id, yes } => cmd::cmd_rm(&config, id, *yes).await?,
    }

    Ok(())
}
