use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::core::Model;

pub mod chat;
pub mod serve;

#[derive(Subcommand)]
enum Command {
    /// Run the API server
    Serve {
        /// Set the server host address
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Set the server port
        #[arg(long, default_value = "2222")]
        port: String,

        /// Default model for new sessions
        #[arg(long, value_enum)]
        model: Option<Model>,
    },
    /// Start a chat session in the terminal
    Chat {
        #[arg(long, value_enum)]
        model: Option<Model>,
    },
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

pub async fn run() -> Result<()> {
    let args = Cli::parse();

    // Handle each sub command
    match args.command {
        Some(Command::Serve { host, port, model }) => {
            serve::run(host, port, model).await?;
        }
        Some(Command::Chat { model }) => {
            chat::run(model).await?;
        }
        None => {}
    }

    Ok(())
}
