use std::path::PathBuf;
use std::process;

use clap::Parser;

use rust_travel_demand_sim::{ModelError, PipelineOrchestrator, RunConfig};


/// Runs the travel demand model chain described by a property file.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to the run's yaml property file
    config: PathBuf,

    /// Restart from the checkpoint with this key instead of the one in the
    /// property file
    #[arg(long)]
    resume_from: Option<String>,
}

fn run(args: &Args) -> Result<(), ModelError> {
    let mut config = RunConfig::from_file(&args.config)?;
    if let Some(key) = &args.resume_from {
        config.resume_key = Some(key.clone());
    }
    let mut orchestrator = PipelineOrchestrator::new(config)?;
    let summary = orchestrator.run()?;
    for (stage, totals) in summary.stage_totals.iter() {
        println!("{}: {} households, {} decisions, {} tours, {} stops", stage.key(),
                 totals.households, totals.decisions, totals.tours_created,
                 totals.stops_created);
    }
    if let Some(report) = &summary.convergence {
        let last = report.trajectory.last();
        println!("shadow pricing {} after {} iterations (max rel diff {:.4})",
                 if report.converged { "converged" } else { "did not converge" },
                 report.trajectory.len(), last.map(|ll| ll.max_rel_diff).unwrap_or(0.));
    }
    return Ok(());
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(err) = run(&args) {
        log::error!("{}", err);
        match err.household_id() {
            Some(id) => eprintln!("model run failed at household {}: {}", id, err),
            None => eprintln!("model run failed: {}", err),
        }
        process::exit(1);
    }
}
