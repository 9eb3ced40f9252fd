use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::link;
use crate::util::logging::init_logging;

#[derive(Parser)]
#[command(name = "fleet-agent")]
#[command(version, about = "Fleet agent - connects this machine to the fleet control plane", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent in the foreground
    Run {
        /// Override the configured server URL (e.g. ws://fleet.example:3000/ws)
        #[arg(long)]
        server_url: Option<String>,
    },

    /// Print the machine id this agent registers under
    Id,

    /// Print the resolved configuration
    Config,
}

pub async fn cli() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { server_url } => {
            let mut config = Config::load()?;
            if let Some(url) = server_url {
                config.server_url = url;
            }
            init_logging(&config.log_level);
            link::run(config).await
        }
        Commands::Id => {
            let config = Config::load()?;
            println!("{}", config.machine_id);
            Ok(())
        }
        Commands::Config => {
            let config = Config::load()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
