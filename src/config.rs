use crate::benchmarks::{BenchmarkCatalog, ALL_BENCHMARKS};
use crate::classifier::StatusSections;
use crate::error::{CampaignError, Result};
use crate::fault_model::{FaultKind, HardwareFaultModel};
use crate::generator::CyclePolicy;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Configuration structure that can be loaded from JSON5
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "Config::default_threads")]
    pub threads: usize,
    #[serde(default = "Config::default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub cycle_policy: CyclePolicy,
    #[serde(default)]
    pub max_compute_units: u32,
    #[serde(default)]
    pub fault_model: HardwareFaultModel,
    /// Cycle bounds added to or replacing the built-in benchmark catalog
    #[serde(default)]
    pub benchmarks: HashMap<String, u64>,
    #[serde(default)]
    pub status_sections: StatusSections,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threads: Self::default_threads(),
            log_level: Self::default_log_level(),
            cycle_policy: CyclePolicy::default(),
            max_compute_units: 0,
            fault_model: HardwareFaultModel::default(),
            benchmarks: HashMap::new(),
            status_sections: StatusSections::default(),
            seed: None,
        }
    }
}

impl Config {
    // Keep defaults in sync with CLI defaults
    fn default_threads() -> usize {
        1
    }

    fn default_log_level() -> String {
        "warn".to_string()
    }

    /// Load configuration from JSON5 file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CampaignError::io(path, e))?;
        Self::from_json5(&content)
    }

    pub fn from_json5(content: &str) -> Result<Self> {
        let config: Self = json5::from_str(content)
            .map_err(|e| CampaignError::Config(format!("Failed to parse JSON5 config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Config file (if any) overridden by the command line.
    pub fn load(args: &Args) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.override_with_args(args);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(CampaignError::Config(
                "Number of threads must be greater than 0".to_string(),
            ));
        }
        if self.benchmarks.values().any(|bound| *bound == 0) {
            return Err(CampaignError::InvalidCycleBound);
        }
        self.fault_model.validate()
    }

    /// Override config values with command line arguments
    pub fn override_with_args(&mut self, args: &Args) {
        if let Some(threads) = args.threads {
            self.threads = threads;
        }
        if let Some(log_level) = &args.log_level {
            self.log_level = log_level.clone();
        }
        if let Command::Generate {
            max_compute_units,
            seed,
            one_based_cycles,
            ..
        } = &args.command
        {
            if let Some(max_compute_units) = max_compute_units {
                self.max_compute_units = *max_compute_units;
            }
            if seed.is_some() {
                self.seed = *seed;
            }
            // Only override if explicitly set by user
            if *one_based_cycles {
                self.cycle_policy = CyclePolicy::OneBased;
            }
        }
    }

    pub fn catalog(&self) -> BenchmarkCatalog {
        BenchmarkCatalog::builtin().with_overrides(&self.benchmarks)
    }
}

/// Command-line arguments of the fault campaign tool.
///
/// * `config` - Load configuration from JSON5 file.
/// * `threads` - Aggregation worker threads.
/// * `log_level` - Default log filter, `RUST_LOG` still wins.
/// * `command` - `generate` fault descriptors or `aggregate` trial results.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Load configuration from JSON5 file
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Number of threads parsing trial artifacts in parallel
    #[arg(short, long, global = true)]
    pub threads: Option<usize>,

    /// Log level: off, error, warn, info, debug, trace
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate randomized fault descriptors, one file per trial
    Generate {
        /// Fault type
        #[arg(value_enum)]
        fault_type: FaultKind,

        /// Number of trials
        trials: u32,

        /// Benchmark to generate faults for
        #[arg(short, long, default_value_t = String::from(ALL_BENCHMARKS))]
        bench: String,

        /// Directory where the <benchmark>_faults directories are created
        #[arg(short, long)]
        faults_dir: Option<PathBuf>,

        /// Cycle bound, replaces the benchmark's known run length
        #[arg(long)]
        cycle_max: Option<u64>,

        /// Highest compute unit id to target
        #[arg(long)]
        max_compute_units: Option<u32>,

        /// Seed for reproducible descriptors
        #[arg(long)]
        seed: Option<u64>,

        /// Draw cycles from [1, cycle_max] instead of [0, cycle_max)
        #[arg(long, default_value_t = false)]
        one_based_cycles: bool,
    },

    /// Parse the trial directories of a run into the result database
    Aggregate {
        /// Benchmark the trials ran
        benchmark: String,

        /// Directory holding one numbered subdirectory per trial
        results_dir: PathBuf,

        /// Run (job) id used in the status report file names
        run_id: String,

        /// Result database, defaults to <run_id>_<benchmark>.db
        #[arg(long)]
        database: Option<PathBuf>,
    },
}
