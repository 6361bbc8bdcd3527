use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info, warn};
use thiserror::Error;

use bagger::rules::BagValidationConfig;
use bagger::settings::{Settings, SettingsError};
use bagger::{RulesError, Validator, ValidatorError};
use bstore::{SqliteStore, Store, StoreError};

mod cli;
use crate::cli::Cli;
use crate::cli::Commands;

#[derive(Error, Debug)]
enum AppError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Rules(#[from] RulesError),
    #[error(transparent)]
    Validator(#[from] ValidatorError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    IO(#[from] io::Error),
}

const EXIT_INVALID: u8 = 2;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, AppError> {
    let settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };

    match cli.command {
        Commands::Validate {
            rules,
            attrs,
            keep_db,
            outfile,
            bag,
        } => {
            let config = BagValidationConfig::load(&rules)?;
            let validator = Validator::new(
                &bag,
                &config,
                settings.preserve_attributes || attrs,
                settings.limits,
            )?;

            let summary = validator.validate()?;
            let db_name = validator.db_name();

            if let Some(outfile) = outfile {
                let store = SqliteStore::open(&db_name)?;
                bstore::dump_json(&store, BufWriter::new(File::create(&outfile)?))?;
                store.close()?;
                info!("wrote {}", outfile.display());
            }

            if !(settings.keep_db || keep_db) {
                remove_sidecar(&db_name);
            }

            if let Some(run_time) = summary.run_time() {
                info!("validation took {:.3}s", run_time.as_seconds_f64());
            }

            let mut out = io::stdout().lock();
            if summary.succeeded() {
                writeln!(out, "Bag is valid")?;
                Ok(ExitCode::SUCCESS)
            } else {
                writeln!(out, "Bag is not valid")?;
                for e in &summary.errors {
                    writeln!(out, "  {}", e)?;
                }
                Ok(ExitCode::from(EXIT_INVALID))
            }
        }

        Commands::Dump {
            valdb,
            offset,
            limit,
        } => {
            if !valdb.exists() {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no sidecar store at {}", valdb.display()),
                )
                .into());
            }
            let store = SqliteStore::open(&valdb)?;
            let mut out = BufWriter::new(io::stdout().lock());

            match limit {
                Some(limit) => {
                    for id in store.file_identifier_batch(offset.unwrap_or(0), limit)? {
                        writeln!(out, "{}", id)?;
                    }
                    out.flush()?;
                }
                None => bstore::dump_json(&store, &mut out)?,
            }

            store.close()?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn remove_sidecar(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => info!("removed {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => (),
        Err(e) => warn!("could not remove {}: {}", path.display(), e),
    }
}
