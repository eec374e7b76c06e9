//! Filedock Client Binary
//!
//! Run with: cargo run --bin filedock-client -- --username alice --role admin ls

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use filedock_core::Role;
use filedock_server::Client;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value = "9000")]
    port: u16,

    /// Username announced in the handshake
    #[arg(short, long, default_value = "user")]
    username: String,

    /// Role token (admin or readonly)
    #[arg(short, long, default_value = "readonly")]
    role: String,

    /// Seconds to wait for each reply
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List stored files
    Ls,
    /// Print a stored text file
    Read {
        /// Remote file name
        name: String,
    },
    /// Upload a local file
    Put {
        /// Local file path
        local: PathBuf,
        /// Remote file name (defaults to the local file name)
        name: Option<String>,
    },
    /// Download a file
    Get {
        /// Remote file name
        name: String,
        /// Local file path (defaults to the remote name)
        local: Option<PathBuf>,
    },
    /// Delete a file
    Rm {
        /// Remote file name
        name: String,
    },
    /// Search file names
    Search {
        /// Case-insensitive keyword
        keyword: String,
    },
    /// Show size and timestamps of a file
    Info {
        /// Remote file name
        name: String,
    },
    /// Show server statistics
    Stats,
    /// Send a raw protocol line
    Raw {
        /// Line to send, e.g. "/list"
        line: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(std::io::stderr)
        .init();

    let role = Role::from_token(&args.role);
    let mut client = Client::connect((args.host.as_str(), args.port), &args.username, role)
        .await
        .with_context(|| format!("Failed to connect to {}:{}", args.host, args.port))?
        .with_reply_timeout(Duration::from_secs(args.timeout));
    eprintln!("{}", client.welcome());

    match args.command {
        Commands::Ls => {
            for name in client.list().await? {
                println!("{name}");
            }
        }
        Commands::Read { name } => {
            for line in client.read(&name).await? {
                println!("{line}");
            }
        }
        Commands::Put { local, name } => {
            let bytes = tokio::fs::read(&local)
                .await
                .with_context(|| format!("Failed to read {}", local.display()))?;
            let name = match name {
                Some(name) => name,
                None => local
                    .file_name()
                    .context("Local path has no file name")?
                    .to_string_lossy()
                    .into_owned(),
            };
            client.upload(&name, &bytes).await?;
            println!("Uploaded {name} ({} bytes)", bytes.len());
        }
        Commands::Get { name, local } => {
            let bytes = client.download(&name).await?;
            let local = local.unwrap_or_else(|| PathBuf::from(&name));
            tokio::fs::write(&local, &bytes)
                .await
                .with_context(|| format!("Failed to write {}", local.display()))?;
            println!("Saved {} ({} bytes)", local.display(), bytes.len());
        }
        Commands::Rm { name } => {
            client.delete(&name).await?;
            println!("Deleted {name}");
        }
        Commands::Search { keyword } => {
            for name in client.search(&keyword).await? {
                println!("{name}");
            }
        }
        Commands::Info { name } => println!("{}", client.info(&name).await?),
        Commands::Stats => println!("{}", client.stats().await?),
        Commands::Raw { line } => println!("{}", client.request(&line).await?),
    }

    client.close().await?;
    Ok(())
}
