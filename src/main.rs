//! hublink - CLI entry point
//!
//! Connects to a home-automation hub, mirrors its entity states and sends
//! service calls.

use clap::{Parser, Subcommand};
use hublink::client::HubClient;
use hublink::config::{default, loader::ConfigLoader, xdg, Config, ConfigError};
use hublink::logging;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

/// Home-automation hub client
#[derive(Parser)]
#[command(name = "hublink")]
#[command(version, about = "Live entity state and service calls for a home-automation hub")]
struct Cli {
    /// Hub WebSocket URL (overrides the config file)
    #[arg(long, global = true)]
    url: Option<String>,

    /// Access token (overrides the config file and environment)
    #[arg(long, global = true)]
    token: Option<String>,

    /// Configuration file to use instead of the XDG default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands for the hublink CLI
#[derive(Subcommand)]
enum Commands {
    /// Print every refreshed snapshot until interrupted
    Watch,

    /// Print the current entity states once and exit
    States,

    /// Call a service on one entity
    Call {
        /// Service domain, e.g. light
        domain: String,
        /// Service name, e.g. toggle
        service: String,
        /// Target entity id, e.g. light.kitchen
        entity_id: String,
        /// Extra service data as a JSON object
        #[arg(long)]
        data: Option<String>,
    },

    /// Manage configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Actions for the `config` subcommand.
#[derive(Subcommand)]
enum ConfigAction {
    /// Create default configuration file
    Init {
        /// Overwrite existing configuration (creates backup)
        #[arg(long)]
        force: bool,
    },
    /// Show configuration file path
    Path,
    /// Validate configuration file
    Validate,
}

/// Connection settings after applying command-line overrides.
#[derive(Debug, PartialEq)]
struct Settings {
    url: String,
    token: String,
    connect_timeout: Duration,
}

impl Settings {
    fn resolve(cli: &Cli, config: &Config) -> Result<Self, ConfigError> {
        let url = cli.url.clone().unwrap_or_else(|| config.hub.url.clone());
        let token = match &cli.token {
            Some(token) => token.clone(),
            None => config.hub.resolve_token()?,
        };
        Ok(Self {
            url,
            token,
            connect_timeout: config.hub.connect_timeout()?,
        })
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Commands::Config { action } = &cli.command {
        return run_config_command(action, cli.config.as_deref());
    }

    let config = match ConfigLoader::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Config error: {e}");
            return ExitCode::FAILURE;
        }
    };
    logging::init(config.logging.level);

    let settings = match Settings::resolve(&cli, &config) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Config error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    rt.block_on(async move {
        match cli.command {
            Commands::Watch => run_watch_command(&settings).await,
            Commands::States => run_states_command(&settings).await,
            Commands::Call {
                domain,
                service,
                entity_id,
                data,
            } => run_call_command(&settings, &domain, &service, &entity_id, data.as_deref()).await,
            Commands::Config { .. } => ExitCode::SUCCESS,
        }
    })
}

/// Handles `config init|path|validate`.
fn run_config_command(action: &ConfigAction, explicit: Option<&Path>) -> ExitCode {
    let path = explicit.map(Path::to_path_buf).unwrap_or_else(xdg::config_path);
    let result = match action {
        ConfigAction::Init { force } => default::create_default_config(&path, *force).map(|()| {
            println!("Created configuration at {}", path.display());
        }),
        ConfigAction::Path => {
            println!("{}", path.display());
            Ok(())
        }
        ConfigAction::Validate => ConfigLoader::load(explicit)
            .and_then(|config| config.validate().map(|()| config))
            .map(|config| {
                println!("Configuration is valid");
                println!("{config:#?}");
            }),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Config error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Connects and returns the client together with its snapshot receiver.
async fn connect(
    settings: &Settings,
) -> Option<(HubClient, hublink::client::SnapshotReceiver)> {
    let mut client = HubClient::new(settings.connect_timeout);
    let snapshots = client.snapshots()?;
    match client.connect(&settings.url, &settings.token).await {
        Ok(()) => Some((client, snapshots)),
        Err(e) => {
            eprintln!("Error: {e}");
            None
        }
    }
}

/// Prints each snapshot until Ctrl+C or until the hub goes away.
async fn run_watch_command(settings: &Settings) -> ExitCode {
    let Some((mut client, mut snapshots)) = connect(settings).await else {
        return ExitCode::FAILURE;
    };

    let code = loop {
        tokio::select! {
            snapshot = snapshots.recv() => match snapshot {
                Some(snapshot) => {
                    println!("--- {} entities ---", snapshot.len());
                    println!("{}", snapshot.summary());
                }
                None => break ExitCode::SUCCESS,
            },
            phase = client.closed() => {
                eprintln!("Connection ended ({phase})");
                break ExitCode::FAILURE;
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Received Ctrl+C, disconnecting...");
                break ExitCode::SUCCESS;
            }
        }
    };

    client.disconnect().await;
    code
}

/// Prints the first snapshot and exits.
async fn run_states_command(settings: &Settings) -> ExitCode {
    let Some((mut client, mut snapshots)) = connect(settings).await else {
        return ExitCode::FAILURE;
    };

    let first = tokio::time::timeout(settings.connect_timeout, snapshots.recv()).await;
    client.disconnect().await;

    match first {
        Ok(Some(snapshot)) => {
            println!("{}", snapshot.summary());
            ExitCode::SUCCESS
        }
        Ok(None) | Err(_) => {
            eprintln!(
                "Error: no state received within {}",
                humantime::format_duration(settings.connect_timeout)
            );
            ExitCode::FAILURE
        }
    }
}

/// Sends one service call and disconnects.
async fn run_call_command(
    settings: &Settings,
    domain: &str,
    service: &str,
    entity_id: &str,
    data: Option<&str>,
) -> ExitCode {
    let params = match parse_service_data(data) {
        Ok(params) => params,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let Some((mut client, _snapshots)) = connect(settings).await else {
        return ExitCode::FAILURE;
    };

    let sent = client.dispatch(domain, service, entity_id, params);
    // Frames queued before the close frame are still flushed.
    client.disconnect().await;

    if sent {
        println!("Called {domain}.{service} on {entity_id}");
        ExitCode::SUCCESS
    } else {
        eprintln!("Error: service call was not sent");
        ExitCode::FAILURE
    }
}

/// Parses `--data` into a JSON object.
fn parse_service_data(data: Option<&str>) -> Result<Map<String, Value>, String> {
    let Some(raw) = data else {
        return Ok(Map::new());
    };
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("--data must be a JSON object, got: {other}")),
        Err(e) => Err(format!("--data is not valid JSON: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use serde_json::json;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_call_subcommand_parses_positionals() {
        let cli = Cli::try_parse_from([
            "hublink",
            "call",
            "light",
            "turn_on",
            "light.kitchen",
            "--data",
            r#"{"brightness": 128}"#,
        ])
        .unwrap();
        match cli.command {
            Commands::Call {
                domain,
                service,
                entity_id,
                data,
            } => {
                assert_eq!(domain, "light");
                assert_eq!(service, "turn_on");
                assert_eq!(entity_id, "light.kitchen");
                assert_eq!(data.as_deref(), Some(r#"{"brightness": 128}"#));
            }
            _ => panic!("unexpected command variant"),
        }
    }

    #[test]
    fn test_call_requires_entity_id() {
        assert!(Cli::try_parse_from(["hublink", "call", "light", "toggle"]).is_err());
    }

    #[test]
    fn test_global_overrides_after_subcommand() {
        let cli = Cli::try_parse_from([
            "hublink",
            "states",
            "--url",
            "ws://10.0.0.2:8123/api/websocket",
            "--token",
            "abc",
        ])
        .unwrap();
        assert_eq!(cli.url.as_deref(), Some("ws://10.0.0.2:8123/api/websocket"));
        assert_eq!(cli.token.as_deref(), Some("abc"));
        assert!(matches!(cli.command, Commands::States));
    }

    #[test]
    fn test_config_init_force_flag() {
        let cli = Cli::try_parse_from(["hublink", "config", "init", "--force"]).unwrap();
        match cli.command {
            Commands::Config {
                action: ConfigAction::Init { force },
            } => assert!(force),
            _ => panic!("unexpected command variant"),
        }
    }

    #[test]
    fn test_settings_prefer_cli_overrides() {
        let cli = Cli::try_parse_from([
            "hublink",
            "watch",
            "--url",
            "ws://override/api/websocket",
            "--token",
            "cli-token",
        ])
        .unwrap();
        let mut config = Config::default();
        config.hub.access_token = "file-token".to_string();
        config.hub.connect_timeout = "2s".to_string();

        let settings = Settings::resolve(&cli, &config).unwrap();
        assert_eq!(
            settings,
            Settings {
                url: "ws://override/api/websocket".to_string(),
                token: "cli-token".to_string(),
                connect_timeout: Duration::from_secs(2),
            }
        );
    }

    #[test]
    fn test_settings_fall_back_to_config() {
        let cli = Cli::try_parse_from(["hublink", "watch"]).unwrap();
        let mut config = Config::default();
        config.hub.access_token = "file-token".to_string();

        let settings = Settings::resolve(&cli, &config).unwrap();
        assert_eq!(settings.url, config.hub.url);
        assert_eq!(settings.token, "file-token");
        assert_eq!(settings.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_parse_service_data() {
        assert!(parse_service_data(None).unwrap().is_empty());

        let map = parse_service_data(Some(r#"{"brightness": 128}"#)).unwrap();
        assert_eq!(map["brightness"], json!(128));

        assert!(parse_service_data(Some("[1, 2]")).is_err());
        assert!(parse_service_data(Some("{oops")).is_err());
    }
}
