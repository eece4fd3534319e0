mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use url::Url;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Base URL of the parley relay
    #[arg(long, default_value = "http://127.0.0.1:3000")]
    url: String,

    /// Access token sent as the bearer token
    #[arg(long, env = "PARLEY_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start an interactive chat (the default)
    Chat,
    /// Show the signed in user
    User,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let base = Url::parse(&cli.url).with_context(|| format!("Invalid relay URL: {}", cli.url))?;

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => commands::chat::run(endpoint(&base, "api/chat")?, cli.token).await,
        Command::User => commands::user::run(endpoint(&base, "api/user")?, cli.token).await,
    }
}

/// Resolve `path` below `base`, keeping any path prefix the relay is mounted under
fn endpoint(base: &Url, path: &str) -> Result<Url> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let prefixed = format!("{}/", base.path());
        base.set_path(&prefixed);
    }
    Ok(base.join(path)?)
}
