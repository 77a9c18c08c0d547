// SPDX-FileCopyrightText: 2026 Brokerlink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Brokerlink - broker credential vault and session manager.
//!
//! This is the binary entry point.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod serve;
mod shutdown;

use std::path::PathBuf;

use brokerlink_config::{BrokerlinkConfig, ConfigError};
use clap::{Parser, Subcommand};

/// Brokerlink - broker credential vault and session manager.
#[derive(Parser, Debug)]
#[command(name = "brokerlink", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the standard locations.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the API server and the session workers.
    Serve,
    /// Print a fresh hex-encoded vault master key.
    Keygen,
    /// Inspect configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Load and validate the configuration, then exit.
    Check,
}

fn load(path: Option<&PathBuf>) -> Result<BrokerlinkConfig, Vec<ConfigError>> {
    match path {
        Some(path) => brokerlink_config::load_and_validate_path(path),
        None => brokerlink_config::load_and_validate(),
    }
}

fn load_or_exit(path: Option<&PathBuf>) -> BrokerlinkConfig {
    match load(path) {
        Ok(config) => config,
        Err(errors) => {
            brokerlink_config::render_errors(&errors);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve) => {
            let config = load_or_exit(cli.config.as_ref());
            if let Err(e) = serve::run_serve(config).await {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        }
        Some(Commands::Keygen) => match brokerlink_vault::crypto::generate_random_key() {
            Ok(key) => println!("{}", hex::encode(key)),
            Err(e) => {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        },
        Some(Commands::Config {
            action: ConfigAction::Check,
        }) => {
            let config = load_or_exit(cli.config.as_ref());
            let enabled: Vec<String> = brokerlink_core::BrokerKind::ALL
                .into_iter()
                .filter(|k| config.brokers.endpoint(*k).enabled)
                .map(|k| k.to_string())
                .collect();
            println!(
                "brokerlink: config OK (listen={}:{}, database={}, brokers=[{}])",
                config.server.host,
                config.server.port,
                config.storage.database_path,
                enabled.join(", ")
            );
        }
        None => {
            println!("brokerlink: use --help for available commands");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_config_check_with_path() {
        let cli = Cli::try_parse_from(["brokerlink", "config", "check", "--config", "x.toml"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        assert!(matches!(
            cli.command,
            Some(Commands::Config {
                action: ConfigAction::Check
            })
        ));
    }

    #[test]
    fn binary_loads_config_defaults() {
        let config = brokerlink_config::load_and_validate_str("")
            .expect("default config should be valid");
        assert_eq!(config.server.port, 8600);
    }
}
