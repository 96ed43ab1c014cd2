use clap::{Parser, Subcommand};
use rest_agent::AgentConfig;
use rest_agent::ipc::{IpcClient, Request, is_daemon_running};
use rest_core::ContextToken;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "screenrest")]
#[command(about = "Screen break enforcement", long_about = None)]
struct Cli {
    /// Control socket (defaults to the one in the config file)
    #[arg(long)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show usage and break status
    Status,

    /// Report that the screen turned on
    ScreenOn,

    /// Report that the screen turned off
    ScreenOff,

    /// Block screen for a break is visible
    Shown { token: u64 },

    /// Block screen went to the background
    Hidden { token: u64 },

    /// Block screen closed before the break ended
    Lost { token: u64 },

    /// Report the frontmost app
    Foreground { app_id: String },

    /// Start a break now
    Trigger,

    /// Stop the daemon
    Shutdown,

    /// Print the effective configuration
    Config,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let config = AgentConfig::load().unwrap_or_default();
    let socket = cli.socket.unwrap_or(config.ipc.socket_path.clone());

    let request = match cli.command {
        Commands::Config => {
            println!("# {}", AgentConfig::config_path().display());
            print!("{}", toml::to_string_pretty(&config)?);
            return Ok(());
        }
        Commands::Status => {
            if !is_daemon_running(&socket).await {
                println!("Daemon:  STOPPED");
                return Ok(());
            }
            Request::Status
        }
        Commands::ScreenOn => Request::ScreenOn,
        Commands::ScreenOff => Request::ScreenOff,
        Commands::Shown { token } => Request::Shown(ContextToken(token)),
        Commands::Hidden { token } => Request::Hidden(ContextToken(token)),
        Commands::Lost { token } => Request::Lost(ContextToken(token)),
        Commands::Foreground { app_id } => Request::Foreground(app_id),
        Commands::Trigger => Request::Trigger,
        Commands::Shutdown => Request::Shutdown,
    };

    let client = IpcClient::new(socket);
    match client.send(&request).await? {
        Some(text) if request == Request::Status => {
            println!("Daemon:  RUNNING");
            println!("Usage:   {text}");
        }
        Some(text) => println!("{text}"),
        None => {}
    }
    Ok(())
}
