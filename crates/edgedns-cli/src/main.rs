#![deny(unsafe_code)]

//! edgedns CLI: runs the daemon and talks to it over the control socket.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use edgedns_config::AppConfig;
use edgedns_core::control::server::socket_path_from_config;
use edgedns_core::control::{
    ControlClient, ControlServer, ControlState, DeactivationStatus, LogShipStatus, LogView,
    ReloadStatus,
};
use edgedns_core::{Daemon, DeactivationPin, HttpRemoteApi, LogCollector};

/// edgedns: a DNS forwarder for routers and gateways.
#[derive(Parser)]
#[command(name = "edgedns", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "edgedns.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Control socket path. Overrides `control.socket_path`.
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the edgedns daemon in the foreground.
    Run,

    /// Inspect DNS clients.
    Clients {
        #[command(subcommand)]
        command: ClientsCommand,
    },

    /// Wait for the daemon to finish starting.
    Started,

    /// Reload the daemon configuration.
    Reload,

    /// Check whether the daemon may be deactivated.
    Deactivate {
        /// Deactivation PIN issued by the management service.
        #[arg(long, allow_negative_numbers = true)]
        pin: Option<i64>,
    },

    /// Print the device identifier.
    Identity,

    /// Print the interface DNS is bound to.
    Interface,

    /// Diagnostic logs.
    Logs {
        #[command(subcommand)]
        command: LogsCommand,
    },

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },
}

#[derive(Subcommand)]
enum ClientsCommand {
    /// List clients, sorted by IP.
    List,
}

#[derive(Subcommand)]
enum LogsCommand {
    /// Print the daemon's diagnostic log.
    View,
    /// Upload the diagnostic log to the management service.
    Send,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;
    let socket = cli
        .socket
        .clone()
        .unwrap_or_else(|| socket_path_from_config(&config));

    match cli.command {
        Commands::Run => {
            let collector = LogCollector::new(config.logging.buffer_capacity);
            let reader = collector.reader();
            tracing_subscriber::registry()
                .with(env_filter(cli.verbose, &config))
                .with(tracing_subscriber::fmt::layer())
                .with(collector)
                .init();

            let daemon = Daemon::with_config_path(config.clone(), cli.config.clone())?
                .interactive(std::io::stdin().is_terminal())
                .with_log_reader(reader);
            cmd_run(daemon, &config, &socket).await?;
        }
        command => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter(cli.verbose, &config))
                .with_writer(std::io::stderr)
                .init();
            run_client(command, &config, &cli.config, ControlClient::new(&socket)).await?;
        }
    }

    Ok(())
}

/// `RUST_LOG` wins, then `-v`, then `logging.level`.
fn env_filter(verbose: u8, config: &AppConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match verbose {
            0 => config.logging.level.as_str(),
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::new(level)
    })
}

async fn cmd_run(daemon: Daemon, config: &AppConfig, socket: &Path) -> Result<()> {
    info!(
        version = %edgedns_core::build_info::version_string(),
        "Starting edgedns daemon"
    );

    let daemon = Arc::new(daemon);
    let remote = Arc::new(HttpRemoteApi::new(&config.remote)?);
    let state = ControlState::from_daemon(&daemon, remote);
    // Seed the PIN cache; a failure here is retried on every deactivation.
    state.auth.refresh().await;

    let server = ControlServer::bind(socket).await?;
    let mut shutdown = daemon.shutdown_subscriber();
    let control = tokio::spawn(server.serve(Arc::new(state), async move {
        let _ = shutdown.recv().await;
    }));

    let result = daemon.run().await;
    // Ctrl-C already broadcast shutdown; make sure any other exit does too.
    daemon.shutdown();

    match control.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "control server failed"),
        Err(e) => warn!(error = %e, "control server task panicked"),
    }
    result.context("daemon failed")
}

async fn run_client(
    command: Commands,
    config: &AppConfig,
    config_path: &Path,
    client: ControlClient,
) -> Result<()> {
    match command {
        Commands::Run => bail!("`run` starts the daemon and is not a control request"),
        Commands::Clients {
            command: ClientsCommand::List,
        } => {
            let clients = client.clients().await?;
            println!("{:<40} {:<18} {:<24} {:>8}  SOURCE", "IP", "MAC", "HOSTNAME", "QUERIES");
            for c in clients {
                let queries = c.query_count.map(|n| n.to_string()).unwrap_or_default();
                let source: Vec<&str> = c.source.iter().map(String::as_str).collect();
                println!(
                    "{:<40} {:<18} {:<24} {:>8}  {}",
                    c.ip,
                    c.mac,
                    c.hostname,
                    queries,
                    source.join(",")
                );
            }
        }
        Commands::Started => {
            client.started().await?;
            println!("edgedns is started");
        }
        Commands::Reload => match client.reload().await? {
            ReloadStatus::Applied => println!("Configuration reloaded."),
            ReloadStatus::RestartRequired(changes) => {
                println!("Configuration reloaded; restart edgedns to apply:");
                for change in changes {
                    println!("  {change}");
                }
            }
        },
        Commands::Deactivate { pin } => {
            match client.deactivate(DeactivationPin::from(pin)).await? {
                DeactivationStatus::Allowed => println!("Deactivation allowed."),
                DeactivationStatus::PinRequired => bail!("deactivation PIN required, pass --pin"),
                DeactivationStatus::WrongPin => bail!("wrong deactivation PIN"),
                DeactivationStatus::Rejected => bail!("daemon rejected the deactivation request"),
            }
        }
        Commands::Identity => println!("{}", client.identity().await?),
        Commands::Interface => println!("{}", client.interface().await?),
        Commands::Logs {
            command: LogsCommand::View,
        } => match client.view_logs().await? {
            LogView::Content(text) => print!("{text}"),
            LogView::Empty => eprintln!("No logs available."),
        },
        Commands::Logs {
            command: LogsCommand::Send,
        } => match client.send_logs().await? {
            LogShipStatus::Sent { size } => println!("Sent {size} bytes of logs."),
            LogShipStatus::Throttled => bail!("logs were sent recently, try again later"),
            LogShipStatus::Empty => eprintln!("No logs to send."),
        },
        Commands::Config { show } => {
            if show {
                let toml_str = toml::to_string_pretty(config).context("TOML error")?;
                println!("{toml_str}");
            } else {
                println!("Configuration at '{}' is valid.", config_path.display());
            }
        }
    }
    Ok(())
}

async fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        AppConfig::load(path)
            .await
            .with_context(|| format!("failed to load {}", path.display()))
    } else {
        Ok(AppConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_parse_deactivate_pin() {
        let cli = Cli::try_parse_from(["edgedns", "deactivate", "--pin", "1234"]).unwrap();
        assert!(matches!(cli.command, Commands::Deactivate { pin: Some(1234) }));

        let cli = Cli::try_parse_from(["edgedns", "deactivate"]).unwrap();
        assert!(matches!(cli.command, Commands::Deactivate { pin: None }));
    }

    #[test]
    fn test_socket_flag_after_subcommand() {
        let cli =
            Cli::try_parse_from(["edgedns", "logs", "send", "--socket", "/tmp/e.sock"]).unwrap();
        assert_eq!(cli.socket, Some(PathBuf::from("/tmp/e.sock")));
        assert!(matches!(
            cli.command,
            Commands::Logs {
                command: LogsCommand::Send
            }
        ));
    }

    #[test]
    fn test_parse_nested_commands() {
        let cli = Cli::try_parse_from(["edgedns", "-vv", "clients", "list"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(
            cli.command,
            Commands::Clients {
                command: ClientsCommand::List
            }
        ));
        assert!(Cli::try_parse_from(["edgedns", "clients"]).is_err());
    }

    #[test]
    fn test_verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[tokio::test]
    async fn test_missing_config_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(&tmp.path().join("absent.toml")).await.unwrap();
        assert_eq!(config.control.socket_path, "/var/run/edgedns_control.sock");
    }

    #[tokio::test]
    async fn test_invalid_config_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("edgedns.toml");
        std::fs::write(&path, "[control\n").unwrap();
        let err = load_config(&path).await.unwrap_err();
        assert!(err.to_string().contains("edgedns.toml"));
    }
}
