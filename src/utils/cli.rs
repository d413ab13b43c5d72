use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use log::LevelFilter;

use crate::utils::config::Engine;

#[derive(Parser, Debug)]
#[command(name = "job-enrich")]
#[command(about = "Enrich scraped job listings with full descriptions from their detail pages", long_about = None)]
pub struct Args {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config.toml", global = true)]
    pub config: PathBuf,

    /// Sets the logger's verbosity level
    #[arg(short, long, value_name = "VERBOSITY", default_value_t = LevelFilter::Info, global = true)]
    pub verbosity: LevelFilter,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch descriptions for pending records (the default command)
    Enrich(EnrichArgs),
    /// Summarise how far an output file has been enriched
    Progress(PathArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct PathArgs {
    /// JSON file with the discovered job records
    #[arg(short, long, value_name = "FILE", default_value = "data/jobs.json")]
    pub input: PathBuf,

    /// JSON file the enriched records are written to
    #[arg(short, long, value_name = "FILE", default_value = "data/jobs_with_descriptions.json")]
    pub output: PathBuf,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct EnrichArgs {
    #[command(flatten)]
    pub paths: PathArgs,

    /// Maximum number of records to attempt
    #[arg(short, long, value_name = "N")]
    pub limit: Option<usize>,

    /// Show the browser window instead of running headless
    #[arg(long)]
    pub visible: bool,

    /// Disable anti-fingerprinting adjustments
    #[arg(long)]
    pub no_stealth: bool,

    /// Re-fetch records that already carry a description
    #[arg(long)]
    pub all: bool,

    /// Fetch engine, overrides the configuration file
    #[arg(long, value_enum, value_name = "ENGINE")]
    pub engine: Option<Engine>,

    /// Directory for page dumps of failed attempts, overrides the configuration file
    #[arg(long, value_name = "DIR")]
    pub dump_dir: Option<PathBuf>,
}

impl Default for EnrichArgs {
    fn default() -> Self {
        Self {
            paths: PathArgs {
                input: PathBuf::from("data/jobs.json"),
                output: PathBuf::from("data/jobs_with_descriptions.json"),
            },
            limit: None,
            visible: false,
            no_stealth: false,
            all: false,
            engine: None,
            dump_dir: None,
        }
    }
}
