// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parley - multi-tenant conversational message routing core.
//!
//! This is the binary entry point.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod flow_cmd;
mod serve;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use parley_config::ParleyConfig;

/// Parley - multi-tenant conversational message routing core.
#[derive(Parser, Debug)]
#[command(name = "parley", version, about, long_about = None)]
struct Cli {
    /// Configuration file used instead of the standard locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the routing pipeline until SIGINT or SIGTERM.
    Serve,
    /// Print the effective configuration as TOML.
    Config,
    /// Inspect flow definitions.
    Flow {
        #[command(subcommand)]
        command: FlowCommand,
    },
}

#[derive(Subcommand, Debug)]
enum FlowCommand {
    /// Check a flow definition (JSON) for structural errors.
    Validate { file: PathBuf },
    /// Run a flow definition against inputs without side effects.
    Simulate {
        file: PathBuf,
        /// Inbound text, repeatable, applied in order.
        #[arg(long = "input", short = 'i')]
        inputs: Vec<String>,
    },
}

fn load_config(path: Option<&Path>) -> ParleyConfig {
    let loaded = match path {
        Some(path) => parley_config::load_and_validate_path(path),
        None => parley_config::load_and_validate(),
    };
    match loaded {
        Ok(config) => config,
        Err(errors) => {
            parley_config::render_errors(&errors);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref());

    let code = match cli.command {
        Some(Commands::Serve) => match serve::run_serve(config).await {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("parley serve: {e}");
                1
            }
        },
        Some(Commands::Config) => match toml::to_string_pretty(&config) {
            Ok(rendered) => {
                print!("{rendered}");
                0
            }
            Err(e) => {
                eprintln!("parley config: {e}");
                1
            }
        },
        Some(Commands::Flow { command }) => match command {
            FlowCommand::Validate { file } => flow_cmd::run_validate(&file),
            FlowCommand::Simulate { file, inputs } => {
                flow_cmd::run_simulate(&file, &inputs, config.flow.max_chained_nodes)
            }
        },
        None => {
            println!("parley: use --help for available commands");
            0
        }
    };
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn cli_parses_flow_simulate() {
        let cli = Cli::try_parse_from([
            "parley", "flow", "simulate", "welcome.json", "-i", "oi", "--input", "Ana",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Flow {
                command: FlowCommand::Simulate { file, inputs },
            }) => {
                assert_eq!(file, PathBuf::from("welcome.json"));
                assert_eq!(inputs, vec!["oi", "Ana"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_accepts_global_config_flag() {
        let cli = Cli::try_parse_from(["parley", "serve", "--config", "/tmp/p.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/p.toml")));
        assert!(matches!(cli.command, Some(Commands::Serve)));
    }

    #[test]
    #[serial]
    fn config_file_with_env_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parley.toml");
        std::fs::write(&path, "[service]\nlog_level = \"debug\"\n[context]\nhistory_window = 5\n")
            .unwrap();

        // SAFETY: serialized with every other test touching the environment.
        unsafe { std::env::set_var("PARLEY_CONTEXT_HISTORY_WINDOW", "7") };
        let config = parley_config::load_and_validate_path(&path);
        unsafe { std::env::remove_var("PARLEY_CONTEXT_HISTORY_WINDOW") };

        let config = config.unwrap();
        assert_eq!(config.service.log_level, "debug");
        assert_eq!(config.context.history_window, 7);
    }

    #[test]
    fn effective_config_renders_as_toml() {
        let rendered = toml::to_string_pretty(&ParleyConfig::default()).unwrap();
        assert!(rendered.contains("[bus]"));
        assert!(rendered.contains("history_window = 20"));
    }
}
