use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use yaml_rust::Yaml;

use super::config_utils::{load_yaml, optional_bool, optional_f64, optional_str, optional_usize,
                          required_i64, required_str, required_usize, str_to_absolute_path,
                          yaml_as_f64};
use super::errors::ModelError;
use super::pipeline::ModelStage;


const SPEED_PREFIX: &str = "Skims.Speed.";

/// Everything a run reads from its property file.  Keys are flat and
/// dotted, e.g. `ShadowPricing.MaximumIterations`; paths are relative to the
/// directory holding the file.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub random_seed: u64,
    pub trace_households: HashSet<u64>,
    pub enabled_stages: BTreeSet<ModelStage>,

    pub households_path: PathBuf,
    pub persons_path: PathBuf,
    pub zonal_data_path: PathBuf,
    pub model_specs_path: PathBuf,
    pub num_subzones: usize,

    pub beeline_factor: f64,
    pub congestion_factor: f64,
    /// km/h by mode name
    pub speeds: HashMap<String, f64>,

    pub sample_size: usize,

    pub shadow_price_max_iterations: usize,
    pub shadow_price_tolerance: f64,
    pub shadow_price_damping: f64,
    pub shadow_price_input: Option<PathBuf>,
    pub shadow_price_output: Option<PathBuf>,

    pub num_partitions: usize,
    /// 0 means one per core
    pub num_threads: usize,
    pub max_model_instances: Option<usize>,

    pub checkpoint_file_base: Option<PathBuf>,
    pub resume_key: Option<String>,
}

impl RunConfig {
    pub fn from_file(path: &Path) -> Result<RunConfig, ModelError> {
        let yaml_cfg = load_yaml(path)?;
        let base_dir = match path.parent() {
            Some(dir) => dir.to_path_buf(),
            None => PathBuf::from("."),
        };
        RunConfig::from_yaml(&yaml_cfg, &base_dir)
    }

    pub fn from_yaml(yaml_cfg: &Yaml, base_dir: &Path) -> Result<RunConfig, ModelError> {
        let path_of = |key: &str| -> Result<PathBuf, ModelError> {
            Ok(str_to_absolute_path(required_str(yaml_cfg, key)?, base_dir))
        };
        let optional_path = |key: &str| -> Result<Option<PathBuf>, ModelError> {
            Ok(optional_str(yaml_cfg, key)?.map(|ss| str_to_absolute_path(ss, base_dir)))
        };

        let seed = required_i64(yaml_cfg, "Model.RandomSeed")?;
        if seed < 0 {
            return Err(ModelError::config("Model.RandomSeed must not be negative"));
        }

        let mut trace_households = HashSet::new();
        let trace = &yaml_cfg["Model.TraceHouseholds"];
        if !trace.is_badvalue() {
            let ids = trace.as_vec().ok_or_else(|| {
                ModelError::config("Model.TraceHouseholds should be a list of household ids")
            })?;
            for id in ids {
                match id.as_i64() {
                    Some(id) if id >= 0 => trace_households.insert(id as u64),
                    _ => {
                        return Err(ModelError::config(
                            "Model.TraceHouseholds should be a list of household ids"));
                    }
                };
            }
        }

        let mut enabled_stages = BTreeSet::new();
        for stage in ModelStage::all().iter() {
            if optional_bool(yaml_cfg, stage.config_flag())?.unwrap_or(false) {
                enabled_stages.insert(*stage);
            }
        }

        let mut speeds = HashMap::new();
        if let Some(hash) = yaml_cfg.as_hash() {
            for (key, value) in hash {
                let key = match key.as_str() {
                    Some(key) if key.starts_with(SPEED_PREFIX) => key,
                    _ => continue,
                };
                let speed = yaml_as_f64(value).ok_or_else(|| {
                    ModelError::config(format!("{} should be a number", key))
                })?;
                speeds.insert(String::from(&key[SPEED_PREFIX.len()..]), speed);
            }
        }

        let num_subzones = required_usize(yaml_cfg, "Zones.NumSubZones")?;
        if num_subzones == 0 {
            return Err(ModelError::config("Zones.NumSubZones must be at least 1"));
        }
        let sample_size = required_usize(yaml_cfg, "SampleOfAlternatives.SampleSize")?;
        if sample_size == 0 {
            return Err(ModelError::config("SampleOfAlternatives.SampleSize must be at least 1"));
        }

        let config = RunConfig {
            random_seed: seed as u64,
            trace_households,
            enabled_stages,
            households_path: path_of("Input.Households")?,
            persons_path: path_of("Input.Persons")?,
            zonal_data_path: path_of("Input.ZonalData")?,
            model_specs_path: path_of("UecFile.ModelSpecs")?,
            num_subzones,
            beeline_factor: optional_f64(yaml_cfg, "Skims.BeelineFactor")?.unwrap_or(1.),
            congestion_factor: optional_f64(yaml_cfg, "Skims.CongestionFactor")?.unwrap_or(1.),
            speeds,
            sample_size,
            shadow_price_max_iterations:
                optional_usize(yaml_cfg, "ShadowPricing.MaximumIterations")?.unwrap_or(10),
            shadow_price_tolerance:
                optional_f64(yaml_cfg, "ShadowPricing.ConvergenceTolerance")?.unwrap_or(0.1),
            shadow_price_damping: optional_f64(yaml_cfg, "ShadowPricing.Damping")?.unwrap_or(1.),
            shadow_price_input: optional_path("ShadowPricing.InputFile")?,
            shadow_price_output: optional_path("ShadowPricing.OutputFile")?,
            num_partitions: optional_usize(yaml_cfg, "Parallel.NumPartitions")?.unwrap_or(1),
            num_threads: optional_usize(yaml_cfg, "Parallel.NumThreads")?.unwrap_or(0),
            max_model_instances: optional_usize(yaml_cfg, "Parallel.MaxModelInstances")?,
            checkpoint_file_base: optional_path("Checkpoint.FileBase")?,
            resume_key: optional_str(yaml_cfg, "Checkpoint.ResumeKey")?.map(String::from),
        };
        if config.shadow_price_damping <= 0. {
            return Err(ModelError::config("ShadowPricing.Damping must be positive"));
        }
        return Ok(config);
    }

    pub fn is_enabled(&self, stage: ModelStage) -> bool {
        self.enabled_stages.contains(&stage)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use yaml_rust::YamlLoader;

    const CONFIG: &str = "
Model.RandomSeed: 20
Model.TraceHouseholds: [3, 9]
RunModel.UsualWorkAndSchoolLocationChoice: true
RunModel.AutoOwnership: true
RunModel.TourModeChoice: false
Input.Households: households.csv
Input.Persons: /data/persons.csv
Input.ZonalData: zones.csv
UecFile.ModelSpecs: specs.yaml
Zones.NumSubZones: 2
Skims.Speed.auto: 40
Skims.Speed.walk: 4.5
SampleOfAlternatives.SampleSize: 10
ShadowPricing.MaximumIterations: 3
ShadowPricing.OutputFile: out/prices.csv
Parallel.NumPartitions: 4
";

    fn parse(text: &str) -> Result<RunConfig, ModelError> {
        let docs = YamlLoader::load_from_str(text).unwrap();
        RunConfig::from_yaml(&docs[0], Path::new("/runs/toy"))
    }

    #[test]
    fn test_from_yaml() {
        let config = parse(CONFIG).unwrap();
        assert_eq!(config.random_seed, 20);
        assert!(config.trace_households.contains(&9));
        assert_eq!(config.enabled_stages.len(), 2);
        assert!(config.is_enabled(ModelStage::AutoOwnership));
        assert!(!config.is_enabled(ModelStage::TourModeChoice));
        assert!(!config.is_enabled(ModelStage::StopLocation));
        assert_eq!(config.households_path, PathBuf::from("/runs/toy/households.csv"));
        assert_eq!(config.persons_path, PathBuf::from("/data/persons.csv"));
        assert_eq!(config.speeds.get("walk"), Some(&4.5));
        assert_eq!(config.speeds.get("auto"), Some(&40.));
        assert_eq!(config.shadow_price_max_iterations, 3);
        assert_eq!(config.shadow_price_tolerance, 0.1);
        assert_eq!(config.shadow_price_input, None);
        assert_eq!(config.shadow_price_output, Some(PathBuf::from("/runs/toy/out/prices.csv")));
        assert_eq!(config.num_partitions, 4);
        assert_eq!(config.max_model_instances, None);
        assert_eq!(config.resume_key, None);
    }

    #[test]
    fn test_missing_and_malformed_keys() {
        let missing = CONFIG.replace("Input.ZonalData: zones.csv\n", "");
        match parse(&missing) {
            Err(ModelError::Config(msg)) => assert!(msg.contains("Input.ZonalData")),
            other => panic!("expected a config error, got {:?}", other.map(|cc| cc.random_seed)),
        }
        let bad_speed = CONFIG.replace("Skims.Speed.walk: 4.5", "Skims.Speed.walk: fast");
        assert!(parse(&bad_speed).is_err());
        let no_sample = CONFIG.replace("SampleSize: 10", "SampleSize: 0");
        assert!(parse(&no_sample).is_err());
    }
}
