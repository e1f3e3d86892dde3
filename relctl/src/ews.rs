//! `ews` commands: checks over a directory of OLM manifests.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use tracing::{info, warn};

use relctl_core::config::ReleaseConfig;
use relctl_core::graph::CsvSet;
use relctl_core::manifest::CsvDocument;
use relctl_core::version::OlmType;

use crate::cli::failure;
use crate::load_config::load_config;

#[derive(Subcommand, Debug)]
pub enum EwsCommand {
    /// Verify every package's replaces chain is complete
    CheckOlmGraph(CheckOlmGraphArgs),
    /// Write the current CSV of a package as JSON
    CurrentCsv(CurrentCsvArgs),
}

#[derive(Args, Debug)]
pub struct CheckOlmGraphArgs {
    /// Directory holding one sub-directory per package
    #[arg(short = 'd', long = "directory")]
    pub directory: PathBuf,
    /// Release configuration supplying baseline allow-lists
    #[arg(long = "addons-config")]
    pub addons_config: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct CurrentCsvArgs {
    /// Package directory holding one sub-directory per bundle
    #[arg(short = 'd', long = "directory")]
    pub directory: PathBuf,
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,
}

pub fn run(command: EwsCommand) -> Result<()> {
    match command {
        EwsCommand::CheckOlmGraph(args) => check_olm_graph(args),
        EwsCommand::CurrentCsv(args) => current_csv(args),
    }
}

fn check_olm_graph(args: CheckOlmGraphArgs) -> Result<()> {
    let config = match &args.addons_config {
        Some(path) => load_config(path)?,
        None => ReleaseConfig::default(),
    };

    let mut packages: Vec<(String, PathBuf)> = fs::read_dir(&args.directory)
        .with_context(|| format!("failed to read {}", args.directory.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .map(|entry| (entry.file_name().to_string_lossy().into_owned(), entry.path()))
        .collect();
    packages.sort();
    if packages.is_empty() {
        bail!("no packages found in {}", args.directory.display());
    }

    let mut failed = 0;
    for (package, dir) in &packages {
        let verdict = CsvSet::load(dir, OlmType::default())
            .and_then(|set| set.validate(&config.baselines_for(package)));
        match verdict {
            Ok(()) => println!("[{package}] OLM graph is complete"),
            Err(e) => {
                warn!(package = %package, kind = %e.kind(), error = %e, "[EWS] OLM graph check failed");
                println!("[{package}] {e}");
                failed += 1;
            }
        }
    }
    info!(packages = packages.len(), failed, "[EWS] OLM graph check finished");
    if failed > 0 {
        bail!("{failed} of {} packages failed the OLM graph check", packages.len());
    }
    Ok(())
}

fn current_csv(args: CurrentCsvArgs) -> Result<()> {
    let set = CsvSet::load(&args.directory, OlmType::default())
        .map_err(|e| failure("current-csv", e.kind(), e))?;
    let current = set
        .current()
        .map_err(|e| failure("current-csv", e.kind(), e))?;
    let document =
        CsvDocument::read(&current.path).map_err(|e| failure("current-csv", e.kind(), e))?;
    let json = serde_json::to_string_pretty(document.document())
        .with_context(|| format!("failed to render {} as JSON", current.path.display()))?;
    fs::write(&args.output, json)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    println!("[current-csv] {} written to {}", current.name, args.output.display());
    Ok(())
}
