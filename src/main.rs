use clap::Parser;
use colored::Colorize;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;

use gpu_fault_campaign::prelude::*;

use git_version::git_version;
const GIT_VERSION: &str = git_version!(fallback = "unknown");

/// Fault campaign tool for a cycle-level GPU simulator
///
fn main() -> Result<(), String> {
    // Get parameter from command line
    let args = Args::parse();
    let config = Config::load(&args).map_err(|e| e.to_string())?;

    // RUST_LOG still takes precedence over the configured level
    let env = env_logger::Env::default().default_filter_or(config.log_level.as_str());
    env_logger::Builder::from_env(env).init();

    println!("--- GPU fault campaign: {GIT_VERSION} ---\n");

    match args.command {
        Command::Generate {
            fault_type,
            trials,
            bench,
            faults_dir,
            cycle_max,
            ..
        } => {
            let rng = match config.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let mut generator = FaultGenerator::new(&config.fault_model, rng, config.cycle_policy);
            let request = CampaignRequest {
                benchmark: bench,
                kind: fault_type,
                trials,
                faults_root: faults_dir.unwrap_or_else(|| PathBuf::from(".")),
                cycle_max,
                max_compute_units: config.max_compute_units,
            };
            let summary = generate_campaign(&mut generator, &config.catalog(), &request)
                .map_err(|e| e.to_string())?;

            for batch in &summary.batches {
                println!(
                    "{}: {} {} faults in {} (cycle bound {})",
                    batch.benchmark.bold(),
                    batch.trials,
                    fault_type,
                    batch.fault_dir.display(),
                    batch.cycle_max
                );
            }
            for benchmark in &summary.skipped {
                println!("{}", format!("{benchmark}: skipped, no cycle bound").yellow());
            }
        }
        Command::Aggregate {
            benchmark,
            results_dir,
            run_id,
            database,
        } => {
            let layout = ArtifactLayout::new(benchmark, run_id);
            let database = database.unwrap_or_else(|| PathBuf::from(layout.database_name()));
            let store = ResultStore::open(&database).map_err(|e| e.to_string())?;
            let processor = TrialProcessor::new(
                layout,
                RunArtifactClassifier::new(config.status_sections.clone()),
            );

            println!("Aggregating into {}:", database.display());
            let summary = Aggregator::new(processor, results_dir, &store, config.threads)
                .run()
                .map_err(|e| e.to_string())?;
            // Pretty print aggregation result
            summary.print();
        }
    }

    Ok(())
}
