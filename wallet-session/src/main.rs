//! Headless host for the wallet session core.
//!
//!   wallet-session providers
//!   wallet-session connect injected --home ./.wallet-session
//!   wallet-session reconnect
//!
//! The injected provider talks to the bridge configured under
//! `injected.bridge_endpoint`; the modal provider prompts on stdin.

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use wallet_session_lib::{
    ContextOptions, ModalChooser, PairingDisplay, PairingProposal, ProviderDescriptor,
    SessionContext,
};

struct StdinChooser;

#[async_trait]
impl ModalChooser for StdinChooser {
    async fn choose(&self, options: &[ProviderDescriptor]) -> Option<String> {
        let ids: Vec<String> = options.iter().map(|d| d.id.clone()).collect();
        for (index, descriptor) in options.iter().enumerate() {
            println!("  [{}] {} ({})", index + 1, descriptor.display_name, descriptor.id);
        }
        print!("Choose a wallet (empty to cancel): ");
        let _ = std::io::stdout().flush();

        let line = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).map(|_| line)
        })
        .await
        .ok()?
        .ok()?;

        let index: usize = line.trim().parse().ok()?;
        ids.get(index.checked_sub(1)?).cloned()
    }
}

struct PrintPairing;

impl PairingDisplay for PrintPairing {
    fn show(&self, proposal: &PairingProposal) {
        println!("Scan with your wallet (expires {}):", proposal.expires_at);
        println!("  {}", proposal.uri);
    }
}

#[derive(Parser)]
#[command(name = "wallet-session")]
#[command(about = "Connect a wallet and manage the session")]
#[command(version)]
struct Cli {
    /// Directory holding the session configuration
    #[arg(long, global = true, default_value = ".wallet-session")]
    home: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the configured wallet providers
    Providers,

    /// Connect through a provider
    Connect {
        /// Provider id, e.g. `injected`
        provider: String,
    },

    /// Reconnect through the last provider that connected
    Reconnect,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("wallet_session_lib=info".parse()?),
        )
        .init();

    let options = ContextOptions {
        chooser: Some(Arc::new(StdinChooser)),
        pairing_display: Some(Arc::new(PrintPairing)),
    };
    let context = SessionContext::initialize(cli.home, options)?;

    match cli.command {
        Commands::Providers => {
            for descriptor in context.session().registry().list_providers() {
                println!(
                    "{:<16} {:<20} {:?}",
                    descriptor.id, descriptor.display_name, descriptor.kind
                );
            }
        }
        Commands::Connect { provider } => {
            report(&context, context.connect(&provider).await.is_ok());
        }
        Commands::Reconnect => {
            report(&context, context.reconnect().await.is_ok());
        }
    }

    Ok(())
}

fn report(context: &SessionContext, connected: bool) {
    if let Some(result) = context.session().results().latest() {
        println!("{}", result.message);
    }
    if connected {
        if let Some(account) = context.session().accounts().current() {
            println!("{} on chain {}", account.account, account.chain_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn home_is_accepted_before_or_after_the_subcommand() {
        let cli = Cli::try_parse_from(["wallet-session", "connect", "--home", "./x", "injected"])
            .unwrap();
        assert_eq!(cli.home, PathBuf::from("./x"));
        assert!(matches!(cli.command, Commands::Connect { provider } if provider == "injected"));

        let cli = Cli::try_parse_from(["wallet-session", "--home", "./x", "providers"]).unwrap();
        assert_eq!(cli.home, PathBuf::from("./x"));
        assert!(matches!(cli.command, Commands::Providers));

        let cli = Cli::try_parse_from(["wallet-session", "reconnect"]).unwrap();
        assert_eq!(cli.home, PathBuf::from(".wallet-session"));
    }

    #[test]
    fn connect_requires_a_provider() {
        assert!(Cli::try_parse_from(["wallet-session", "connect"]).is_err());
    }
}
