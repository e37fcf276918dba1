//! CLI definition and dispatch.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::error::OrbError;

#[derive(Parser, Debug)]
#[command(name = "orbedge", about = "Opening range breakout features and edge promotion")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build and persist daily feature rows
    Build {
        #[arg(short, long)]
        config: PathBuf,
        /// Restrict the build to one configured instrument
        #[arg(long)]
        instrument: Option<String>,
        /// Rebuild days that are already persisted
        #[arg(long)]
        no_resume: bool,
        /// Assemble days on the rayon thread pool
        #[arg(long)]
        parallel: bool,
    },
    /// Append bars from a CSV file to the bar store
    ImportBars {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        instrument: String,
        #[arg(long)]
        csv: PathBuf,
    },
    /// Edge-candidate lifecycle
    Candidate {
        #[arg(short, long)]
        config: PathBuf,
        #[command(subcommand)]
        action: CandidateAction,
    },
    /// Reconcile validated setups against the [live.*] view
    SyncCheck {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// List validated setups
    Setups {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        instrument: Option<String>,
    },
    /// Replay a validated setup over persisted feature rows
    Replay {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        setup: String,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
    },
}

#[derive(Subcommand, Debug)]
pub enum CandidateAction {
    /// Register a DRAFT candidate from a JSON manifest
    Create {
        #[arg(long)]
        manifest: PathBuf,
        #[arg(long)]
        by: String,
    },
    Submit {
        id: i64,
        #[arg(long)]
        by: String,
    },
    Approve {
        id: i64,
        #[arg(long)]
        by: String,
    },
    Reject {
        id: i64,
        #[arg(long)]
        by: String,
        #[arg(long)]
        reason: String,
    },
    /// Promote an APPROVED candidate into the validated-setup store
    Promote {
        id: i64,
        #[arg(long)]
        by: String,
    },
    Show {
        id: i64,
    },
    List {
        /// DRAFT, PENDING, APPROVED, REJECTED or PROMOTED
        #[arg(long)]
        status: Option<String>,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match execute(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, OrbError> {
    FileConfigAdapter::from_file(path).map_err(|e| OrbError::ConfigParse {
        file: path.display().to_string(),
        reason: e.to_string(),
    })
}

#[cfg(not(feature = "sqlite"))]
fn execute(_command: Command) -> Result<(), OrbError> {
    Err(OrbError::Database {
        reason: "orbedge was built without the sqlite feature".into(),
    })
}

#[cfg(feature = "sqlite")]
fn execute(command: Command) -> Result<(), OrbError> {
    match command {
        Command::Build {
            config,
            instrument,
            no_resume,
            parallel,
        } => store::run_build(&config, instrument.as_deref(), no_resume, parallel),
        Command::ImportBars {
            config,
            instrument,
            csv,
        } => store::run_import(&config, &instrument, &csv),
        Command::Candidate { config, action } => store::run_candidate(&config, action),
        Command::SyncCheck { config } => store::run_sync_check(&config),
        Command::Setups { config, instrument } => store::run_setups(&config, instrument.as_deref()),
        Command::Replay {
            config,
            setup,
            start,
            end,
        } => store::run_replay(&config, &setup, start, end),
    }
}

#[cfg(feature = "sqlite")]
mod store {
    use std::collections::BTreeSet;
    use std::fs;
    use std::path::Path;

    use chrono::{NaiveDate, Utc};

    use super::{load_config, CandidateAction};
    use crate::adapters::csv_adapter::CsvAdapter;
    use crate::adapters::sqlite_adapter::SqliteAdapter;
    use crate::domain::candidate::{CandidateManifest, CandidateStatus, EdgeCandidate};
    use crate::domain::config_sync::{verify_sync, SetupIndex};
    use crate::domain::config_validation::{split_list, validate_build_config, BUILD_SECTION};
    use crate::domain::error::{LifecycleError, OrbError};
    use crate::domain::instrument::InstrumentSpec;
    use crate::domain::pipeline;
    use crate::ports::config_port::ConfigPort;
    use crate::ports::registry_port::RegistryPort;

    fn open_store(config: &dyn ConfigPort) -> Result<SqliteAdapter, OrbError> {
        let store = SqliteAdapter::from_config(config)?;
        store.initialize_schema()?;
        Ok(store)
    }

    pub(super) fn run_build(
        config_path: &Path,
        instrument: Option<&str>,
        no_resume: bool,
        parallel: bool,
    ) -> Result<(), OrbError> {
        let adapter = load_config(config_path)?;
        let mut build = validate_build_config(&adapter)?;
        if let Some(code) = instrument {
            let spec = build.instrument(&code.trim().to_uppercase())?.clone();
            build.specs = vec![spec];
        }
        build.resume &= !no_resume;
        build.parallel |= parallel;

        let store = open_store(&adapter)?;
        let reports = pipeline::run_build(&build, &store, &store)?;
        for report in &reports {
            println!(
                "{}: built {}, skipped {}, failed {}",
                report.instrument,
                report.built.len(),
                report.skipped.len(),
                report.failed.len()
            );
            for failure in &report.failed {
                println!("  {} {}", failure.trading_day, failure.reason);
            }
        }
        Ok(())
    }

    pub(super) fn run_import(
        config_path: &Path,
        instrument: &str,
        csv: &Path,
    ) -> Result<(), OrbError> {
        let adapter = load_config(config_path)?;
        let store = open_store(&adapter)?;
        let code = instrument.trim().to_uppercase();
        let bars = CsvAdapter::read_file(csv, &code)?;
        let count = store.insert_bars(&bars)?;
        tracing::info!(instrument = %code, bars = count, "bars imported");
        println!("imported {count} bars for {code}");
        Ok(())
    }

    fn print_candidate(candidate: &EdgeCandidate) -> Result<(), OrbError> {
        println!("{}", serde_json::to_string_pretty(candidate)?);
        Ok(())
    }

    pub(super) fn run_candidate(
        config_path: &Path,
        action: CandidateAction,
    ) -> Result<(), OrbError> {
        let adapter = load_config(config_path)?;
        let store = open_store(&adapter)?;
        let now = Utc::now();
        match action {
            CandidateAction::Create { manifest, by } => {
                if by.trim().is_empty() {
                    return Err(LifecycleError::MissingApprover.into());
                }
                let manifest = CandidateManifest::from_json(&fs::read_to_string(&manifest)?)?;
                let candidate = store.create_candidate(&manifest, by.trim(), now)?;
                println!("created candidate {}", candidate.candidate_id);
            }
            CandidateAction::Submit { id, by } => {
                let candidate = store.submit(id, &by, now)?;
                println!("candidate {} is {}", candidate.candidate_id, candidate.status);
            }
            CandidateAction::Approve { id, by } => {
                let candidate = store.approve(id, &by, now)?;
                println!("candidate {} is {}", candidate.candidate_id, candidate.status);
            }
            CandidateAction::Reject { id, by, reason } => {
                let candidate = store.reject(id, &by, &reason, now)?;
                println!("candidate {} is {}", candidate.candidate_id, candidate.status);
            }
            CandidateAction::Promote { id, by } => {
                let setup = store.promote(id, &by, now)?;
                println!("candidate {id} promoted as {}", setup.setup_id);
            }
            CandidateAction::Show { id } => {
                print_candidate(&store.load_candidate(id)?)?;
                for t in store.transitions(id)? {
                    println!("{} {} -> {} by {}", t.at, t.from, t.to, t.actor);
                }
            }
            CandidateAction::List { status } => {
                let status = status
                    .map(|s| s.parse::<CandidateStatus>())
                    .transpose()
                    .map_err(|reason| LifecycleError::InvalidField {
                        field: "status".into(),
                        reason,
                    })?;
                for c in store.list_candidates(status)? {
                    println!(
                        "{:>5}  {:<9} {}",
                        c.candidate_id,
                        c.status,
                        c.manifest.name.as_deref().unwrap_or("-")
                    );
                }
            }
        }
        Ok(())
    }

    pub(super) fn run_sync_check(config_path: &Path) -> Result<(), OrbError> {
        let adapter = load_config(config_path)?;
        let store = open_store(&adapter)?;
        let setups = store.validated_setups(None)?;

        let mut instruments: BTreeSet<String> =
            setups.iter().map(|s| s.instrument.clone()).collect();
        if let Some(list) = adapter.get_string(BUILD_SECTION, "instruments") {
            instruments.extend(split_list(&list).into_iter().map(|s| s.to_uppercase()));
        }
        let instruments: Vec<String> = instruments.into_iter().collect();

        let view = SetupIndex::from_config(&adapter, &instruments)?;
        let report = verify_sync(&setups, &view)?;
        println!("{}", report.summary());
        Ok(())
    }

    pub(super) fn run_setups(config_path: &Path, instrument: Option<&str>) -> Result<(), OrbError> {
        let adapter = load_config(config_path)?;
        let store = open_store(&adapter)?;
        let code = instrument.map(|s| s.trim().to_uppercase());
        let setups = store.validated_setups(code.as_deref())?;
        let index = SetupIndex::from_setups(&setups);
        for (key, configs) in index.iter() {
            println!("{key}");
            for cfg in configs {
                println!("  {cfg}");
            }
        }
        Ok(())
    }

    pub(super) fn run_replay(
        config_path: &Path,
        setup_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<(), OrbError> {
        let adapter = load_config(config_path)?;
        let store = open_store(&adapter)?;
        let setup = store
            .validated_setups(None)?
            .into_iter()
            .find(|s| s.setup_id == setup_id)
            .ok_or_else(|| OrbError::ConfigInvalid {
                section: "replay".into(),
                key: "setup".into(),
                reason: format!("no validated setup `{setup_id}`"),
            })?;
        let spec = InstrumentSpec::from_config(&adapter, &setup.instrument)?;
        let (_, summary) = pipeline::replay_setup(&setup, &spec, start, end, &store, &store)?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        Ok(())
    }
}
