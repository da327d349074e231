// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Repeaters - repeat-record delivery daemon and operator CLI.

mod admin;
mod daemon;
mod records;
mod status;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use repeaters_config::model::{RepeatersConfig, SchedulerConfig};
use repeaters_core::{PayloadType, RecordState, RepeaterError};

/// Repeaters - forwards payloads to external destinations with retries.
#[derive(Parser, Debug)]
#[command(name = "repeaters", version, about, long_about = None)]
struct Cli {
    /// Load this configuration file instead of searching the standard locations.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Restricts which due records a dispatcher selects.
#[derive(Args, Debug, Clone, Default)]
pub struct SelectionArgs {
    /// Only process records of this domain (repeatable).
    #[arg(long = "domain", value_name = "DOMAIN")]
    domains: Vec<String>,
    /// Only process records of this repeater (repeatable).
    #[arg(long = "repeater", value_name = "ID")]
    repeater_ids: Vec<String>,
    /// Records selected per poll.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    page_size: Option<u32>,
}

impl SelectionArgs {
    /// Override the configured scheduler scope with command-line values.
    fn apply(&self, scheduler: &mut SchedulerConfig) {
        if !self.domains.is_empty() {
            scheduler.domains = self.domains.clone();
        }
        if !self.repeater_ids.is_empty() {
            scheduler.repeater_ids = self.repeater_ids.clone();
        }
        if let Some(page_size) = self.page_size {
            scheduler.page_size = page_size;
        }
    }
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the dispatcher until SIGINT or SIGTERM.
    Run(SelectionArgs),
    /// Run a single poll, print its report and exit.
    ProcessOnce {
        #[command(flatten)]
        selection: SelectionArgs,
        /// Output the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Create records for a payload on every accepting repeater of its domain.
    Register {
        #[arg(long)]
        domain: String,
        #[arg(long)]
        payload_id: String,
        /// `case` or `form`.
        #[arg(long)]
        payload_type: PayloadType,
        /// Case type or form xmlns, matched against repeater filters.
        #[arg(long)]
        doc_type: Option<String>,
    },
    /// Manage repeaters.
    Repeaters {
        #[command(subcommand)]
        command: RepeaterCommands,
    },
    /// Inspect and act on repeat records.
    Records {
        #[command(subcommand)]
        command: RecordCommands,
    },
    /// Show record counts by state.
    Status {
        #[arg(long)]
        domain: Option<String>,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
        /// Disable colors.
        #[arg(long)]
        plain: bool,
    },
    /// Manage the bundled payload store.
    Payloads {
        #[command(subcommand)]
        command: PayloadCommands,
    },
}

#[derive(Subcommand, Debug)]
enum RepeaterCommands {
    /// List repeaters.
    List {
        #[arg(long)]
        domain: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Add or replace a repeater from a JSON file.
    Add { file: PathBuf },
    /// Disable a repeater. Its records are no longer selected.
    Disable { id: String },
}

#[derive(Subcommand, Debug)]
enum RecordCommands {
    /// List records, newest first.
    List {
        #[arg(long)]
        domain: Option<String>,
        #[arg(long)]
        repeater: Option<String>,
        /// PENDING, SUCCESS, FAILURE or CANCELLED.
        #[arg(long)]
        state: Option<RecordState>,
        #[arg(long)]
        payload_id: Option<String>,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        #[arg(long, default_value_t = 50)]
        limit: u64,
        #[arg(long)]
        json: bool,
    },
    /// Show the attempt log of a record.
    Attempts {
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// Cancel a pending or failed record.
    Cancel { id: String },
    /// Make a pending or failed record due now.
    Retry { id: String },
    /// Create a fresh record for the same repeater and payload.
    Resend { id: String },
    /// Delete every record of a removed domain, with its attempts.
    Purge {
        #[arg(long)]
        domain: String,
    },
}

#[derive(Subcommand, Debug)]
enum PayloadCommands {
    /// Store payloads from a JSON file holding one payload or an array.
    Put {
        file: PathBuf,
        /// Also register records for each stored payload.
        #[arg(long)]
        register: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => repeaters_config::load_and_validate_path(path),
        None => repeaters_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            repeaters_config::render_errors(&errors);
            std::process::exit(2);
        }
    };

    daemon::init_tracing(&config.logging);

    if let Err(e) = dispatch(cli.command, config).await {
        tracing::error!(error = %e, "command failed");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn dispatch(command: Commands, mut config: RepeatersConfig) -> Result<(), RepeaterError> {
    match command {
        Commands::Run(selection) => {
            selection.apply(&mut config.scheduler);
            daemon::run_daemon(&config).await
        }
        Commands::ProcessOnce { selection, json } => {
            selection.apply(&mut config.scheduler);
            daemon::process_once(&config, json).await
        }
        Commands::Register {
            domain,
            payload_id,
            payload_type,
            doc_type,
        } => {
            let storage = daemon::open_storage(&config).await?;
            admin::register(
                storage.as_ref(),
                &domain,
                &payload_id,
                payload_type,
                doc_type.as_deref(),
            )
            .await
        }
        Commands::Repeaters { command } => {
            let storage = daemon::open_storage(&config).await?;
            match command {
                RepeaterCommands::List { domain, json } => {
                    admin::list_repeaters(storage.as_ref(), domain.as_deref(), json).await
                }
                RepeaterCommands::Add { file } => admin::add_repeater(storage.as_ref(), &file).await,
                RepeaterCommands::Disable { id } => {
                    admin::disable_repeater(storage.as_ref(), &id).await
                }
            }
        }
        Commands::Records { command } => {
            let storage = daemon::open_storage(&config).await?;
            let store = storage.as_ref();
            match command {
                RecordCommands::List {
                    domain,
                    repeater,
                    state,
                    payload_id,
                    offset,
                    limit,
                    json,
                } => {
                    let filter = repeaters_core::RecordFilter {
                        domain,
                        repeater_id: repeater,
                        state,
                        payload_id,
                    };
                    records::list(store, &filter, offset, limit, json).await
                }
                RecordCommands::Attempts { id, json } => records::attempts(store, &id, json).await,
                RecordCommands::Cancel { id } => records::cancel(store, &id).await,
                RecordCommands::Retry { id } => records::retry(store, &id).await,
                RecordCommands::Resend { id } => records::resend(store, &id).await,
                RecordCommands::Purge { domain } => records::purge(store, &domain).await,
            }
        }
        Commands::Status {
            domain,
            json,
            plain,
        } => {
            let storage = daemon::open_storage(&config).await?;
            status::run_status(storage.as_ref(), &config, domain.as_deref(), json, plain).await
        }
        Commands::Payloads {
            command: PayloadCommands::Put { file, register },
        } => {
            let storage = daemon::open_storage(&config).await?;
            admin::put_payloads(storage.as_ref(), &file, register).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_with_scope() {
        let cli = Cli::try_parse_from([
            "repeaters",
            "run",
            "--domain",
            "a",
            "--domain",
            "b",
            "--page-size",
            "10",
        ])
        .unwrap();
        let Commands::Run(selection) = cli.command else {
            panic!("expected run");
        };
        let mut scheduler = SchedulerConfig::default();
        selection.apply(&mut scheduler);
        assert_eq!(scheduler.domains, ["a", "b"]);
        assert!(scheduler.repeater_ids.is_empty());
        assert_eq!(scheduler.page_size, 10);
    }

    #[test]
    fn rejects_zero_page_size() {
        assert!(Cli::try_parse_from(["repeaters", "process-once", "--page-size", "0"]).is_err());
    }

    #[test]
    fn parses_record_state_filter() {
        let cli = Cli::try_parse_from([
            "repeaters",
            "--config",
            "/tmp/r.toml",
            "records",
            "list",
            "--state",
            "FAILURE",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/r.toml")));
        match cli.command {
            Commands::Records {
                command: RecordCommands::List { state, limit, .. },
            } => {
                assert_eq!(state, Some(RecordState::Failure));
                assert_eq!(limit, 50);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_register() {
        let cli = Cli::try_parse_from([
            "repeaters",
            "register",
            "--domain",
            "demo",
            "--payload-id",
            "c1",
            "--payload-type",
            "case",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Register {
                payload_type: PayloadType::Case,
                doc_type: None,
                ..
            }
        ));
    }

    #[test]
    fn binary_loads_config_defaults() {
        let config = repeaters_config::load_and_validate_str("")
            .expect("default config should be valid");
        assert_eq!(config.scheduler.page_size, 500);
    }
}
