use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use glob::glob;
use tempfile::tempdir;

use rust_travel_demand_sim::{CheckpointStore, Household, ModelError, ModelStage,
                             PipelineOrchestrator, RunConfig};


const TOY_REGION: &str = "tests/envs/toy-region";

fn load_config(config_path: &Path, checkpoint_dir: Option<&Path>) -> RunConfig {
    let mut config = RunConfig::from_file(config_path).unwrap();
    config.checkpoint_file_base = checkpoint_dir.map(|dir| dir.join("toy"));
    return config;
}

fn run_households(config: RunConfig) -> Vec<Household> {
    let mut orchestrator = PipelineOrchestrator::new(config).unwrap();
    orchestrator.run().unwrap();
    return orchestrator.households().to_vec();
}

fn toy_config_path() -> PathBuf {
    PathBuf::from(TOY_REGION).join("config.yaml")
}

#[test]
fn test_run_is_deterministic() {
    let first = run_households(load_config(&toy_config_path(), None));
    let second = run_households(load_config(&toy_config_path(), None));
    assert_eq!(first.len(), 10);
    assert_eq!(first, second);
    assert!(first.iter().any(|hh| hh.num_tours() > 0));
}

#[test]
fn test_restart_matches_uninterrupted_run() {
    let dir = tempdir().unwrap();
    let uninterrupted = run_households(load_config(&toy_config_path(), Some(dir.path())));

    let store = CheckpointStore::new(&dir.path().join("toy"));
    for stage in ModelStage::all().iter() {
        assert!(store.exists(stage.output_key()), "no checkpoint after {}", stage.key());
    }
    assert!(!store.exists("uwsl"));

    for key in &["ao", "cdap", "jt", "stl"] {
        let mut config = load_config(&toy_config_path(), Some(dir.path()));
        config.resume_key = Some(String::from(*key));
        let resumed = run_households(config);
        assert_eq!(resumed, uninterrupted, "resuming at {} changed the result", key);
        for (aa, bb) in resumed.iter().zip(uninterrupted.iter()) {
            assert_eq!(aa.stream.draw_count(), bb.stream.draw_count());
        }
    }

    let mut config = load_config(&toy_config_path(), Some(dir.path()));
    config.resume_key = Some(String::from("final"));
    let mut orchestrator = PipelineOrchestrator::new(config).unwrap();
    let summary = orchestrator.run().unwrap();
    assert!(summary.stage_totals.is_empty());
    assert_eq!(orchestrator.households(), &uninterrupted[..]);
}

#[test]
fn test_results_independent_of_partitions() {
    let pattern = format!("{}/config_partitions_*.yaml", TOY_REGION);
    let mut results = vec![];
    for entry in glob(&pattern).unwrap() {
        let config_path = entry.unwrap();
        println!("running {:?}", config_path);
        let config = load_config(&config_path, None);
        let num_partitions = config.num_partitions;
        results.push((num_partitions, run_households(config)));
    }
    let mut partition_counts: Vec<usize> = results.iter().map(|(nn, _)| *nn).collect();
    partition_counts.sort();
    assert_eq!(partition_counts, vec![1, 2, 5]);
    for (num_partitions, households) in results.iter().skip(1) {
        assert_eq!(households, &results[0].1, "{} partitions changed the result",
                   num_partitions);
    }
}

#[derive(Debug, PartialEq, serde::Deserialize)]
struct UsualLocationRow {
    hh_id: u64,
    person_num: u8,
    segment: String,
    zone_id: u32,
    subzone: usize,
}

/// Compares the usual locations of the toy region with the recorded ones.
#[test]
fn test_golden_usual_locations() {
    let dir = tempdir().unwrap();
    let mut config = load_config(&toy_config_path(), None);
    config.shadow_price_output = Some(dir.path().join("prices.csv"));
    let mut orchestrator = PipelineOrchestrator::new(config).unwrap();
    let summary = orchestrator.run().unwrap();

    let report = summary.convergence.unwrap();
    assert_eq!(report.trajectory.len(), 3);
    assert!(!report.converged);
    for iteration in 0..3 {
        assert!(dir.path().join(format!("prices_{}.csv", iteration)).is_file());
    }
    let totals: HashMap<ModelStage, u64> = summary.stage_totals.iter()
        .map(|(stage, totals)| (*stage, totals.households))
        .collect();
    assert_eq!(totals.len(), ModelStage::all().len());
    assert!(totals.values().all(|nn| *nn == 10));

    let zones = orchestrator.zones();
    let mut rows = vec![];
    for household in orchestrator.households() {
        for person in household.persons.iter() {
            if let Some(usual) = &person.usual_location {
                rows.push(UsualLocationRow {
                    hh_id: household.id,
                    person_num: person.person_num,
                    segment: usual.segment.clone(),
                    zone_id: zones.zone_id(usual.alt.zone),
                    subzone: usual.alt.subzone,
                });
            }
        }
    }
    // 10 workers and 5 students
    assert_eq!(rows.iter().filter(|rr| rr.segment == "work").count(), 10);
    assert_eq!(rows.iter().filter(|rr| rr.segment == "school").count(), 5);
    for row in rows.iter().filter(|rr| rr.segment == "school") {
        assert!(row.zone_id == 102 || row.zone_id == 104);
    }

    let golden_path = PathBuf::from(TOY_REGION).join("golden_usual_locations.csv");
    let file = File::open(&golden_path)
        .unwrap_or_else(|ee| panic!("can't open {:?}: {}", golden_path, ee));
    let mut reader = csv::Reader::from_reader(file);
    let golden: Vec<UsualLocationRow> = reader.deserialize().map(|rr| rr.unwrap()).collect();
    assert_eq!(golden.len(), 15);
    assert_eq!(rows, golden);
}

#[test]
fn test_no_alternatives_stops_the_run() {
    let dir = tempdir().unwrap();
    let config_path = PathBuf::from("tests/envs/no-work-size/config.yaml");
    let config = load_config(&config_path, Some(dir.path()));
    let mut orchestrator = PipelineOrchestrator::new(config).unwrap();
    let err = orchestrator.run().unwrap_err();
    assert_eq!(err.household_id(), Some(2));
    match err {
        ModelError::TaskFailed { source, .. } => match *source {
            ModelError::NoAvailableAlternatives { stage, .. } => {
                assert_eq!(stage, ModelStage::UsualLocation);
            }
            other => panic!("expected no available alternatives, got {}", other),
        },
        other => panic!("expected a task failure, got {}", other),
    }

    let store = CheckpointStore::new(&dir.path().join("toy"));
    assert!(!store.exists("ao"));
}
