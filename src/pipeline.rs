use std::path::Path;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use super::checkpoint::{CheckpointStore, PopulationSnapshot, FINAL_KEY};
use super::errors::ModelError;
use super::household_models::{HouseholdChoiceModels, StageTotals};
use super::model_pool::ModelPool;
use super::population::{load_population, Household};
use super::random_streams::RandomStreamManager;
use super::run_config::RunConfig;
use super::sample_of_alternatives::{LocationFamily, ProbabilityCache};
use super::scheduler::TaskScheduler;
use super::shadow_price::{decision_maker_counts, ConvergenceReport, ShadowPriceBalancer,
                          SizeTable};
use super::utility::{ChoiceSpec, LocationSegmentSpec, ModelSpecs, Variable};
use super::zones::{AlternativeUniverse, DistanceSkims, SkimProvider, ZonalData};


/// The model stages, in the order they run.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModelStage {
    UsualLocation,
    AutoOwnership,
    DailyActivityPattern,
    MandatoryTourFrequency,
    MandatoryTimeOfDay,
    AtWorkSubtours,
    JointTours,
    NonMandatoryTours,
    TourModeChoice,
    StopFrequency,
    StopLocation,
}

impl ModelStage {
    pub fn all() -> [ModelStage; 11] {
        [
            ModelStage::UsualLocation,
            ModelStage::AutoOwnership,
            ModelStage::DailyActivityPattern,
            ModelStage::MandatoryTourFrequency,
            ModelStage::MandatoryTimeOfDay,
            ModelStage::AtWorkSubtours,
            ModelStage::JointTours,
            ModelStage::NonMandatoryTours,
            ModelStage::TourModeChoice,
            ModelStage::StopFrequency,
            ModelStage::StopLocation,
        ]
    }

    /// Short name used in checkpoint keys and log messages.
    pub fn key(&self) -> &'static str {
        match self {
            ModelStage::UsualLocation => "uwsl",
            ModelStage::AutoOwnership => "ao",
            ModelStage::DailyActivityPattern => "cdap",
            ModelStage::MandatoryTourFrequency => "imtf",
            ModelStage::MandatoryTimeOfDay => "imtod",
            ModelStage::AtWorkSubtours => "aw",
            ModelStage::JointTours => "jt",
            ModelStage::NonMandatoryTours => "inm",
            ModelStage::TourModeChoice => "tmc",
            ModelStage::StopFrequency => "stf",
            ModelStage::StopLocation => "stl",
        }
    }

    pub fn from_key(key: &str) -> Option<ModelStage> {
        ModelStage::all().iter().copied().find(|ss| ss.key() == key)
    }

    pub fn config_flag(&self) -> &'static str {
        match self {
            ModelStage::UsualLocation => "RunModel.UsualWorkAndSchoolLocationChoice",
            ModelStage::AutoOwnership => "RunModel.AutoOwnership",
            ModelStage::DailyActivityPattern => "RunModel.CoordinatedDailyActivityPattern",
            ModelStage::MandatoryTourFrequency => "RunModel.IndividualMandatoryTourFrequency",
            ModelStage::MandatoryTimeOfDay => "RunModel.MandatoryTourDepartureTimeAndDuration",
            ModelStage::AtWorkSubtours => "RunModel.AtWorkSubTours",
            ModelStage::JointTours => "RunModel.JointTours",
            ModelStage::NonMandatoryTours => "RunModel.IndividualNonMandatoryTours",
            ModelStage::TourModeChoice => "RunModel.TourModeChoice",
            ModelStage::StopFrequency => "RunModel.StopFrequency",
            ModelStage::StopLocation => "RunModel.StopLocation",
        }
    }

    pub fn next(&self) -> Option<ModelStage> {
        let all = ModelStage::all();
        let pos = all.iter().position(|ss| ss == self)?;
        all.get(pos + 1).copied()
    }

    /// Key of the checkpoint written when this stage is done, which is the
    /// key of the stage it restarts.
    pub fn output_key(&self) -> &'static str {
        match self.next() {
            Some(next) => next.key(),
            None => FINAL_KEY,
        }
    }
}

/// Everything a household's models read during one pass over a stage.  It
/// is built by the orchestrator and shared by reference with every worker.
pub struct PassContext<'a> {
    pub stage: ModelStage,
    pub specs: &'a ModelSpecs,
    pub universe: AlternativeUniverse,
    pub skims: &'a dyn SkimProvider,
    pub usual_sizes: &'a SizeTable,
    pub tour_sizes: &'a SizeTable,
    pub stop_sizes: &'a SizeTable,
    pub cache: &'a ProbabilityCache,
    pub streams: &'a RandomStreamManager,
    pub sample_size: usize,
}

impl<'a> PassContext<'a> {
    pub fn sizes(&self, family: LocationFamily) -> &'a SizeTable {
        match family {
            LocationFamily::UsualLocation => self.usual_sizes,
            LocationFamily::TourDestination => self.tour_sizes,
            LocationFamily::StopLocation => self.stop_sizes,
        }
    }

    pub fn location_specs(&self, family: LocationFamily) -> &'a [LocationSegmentSpec] {
        match family {
            LocationFamily::UsualLocation => &self.specs.usual_location,
            LocationFamily::TourDestination => &self.specs.tour_destination,
            LocationFamily::StopLocation => &self.specs.stop_location,
        }
    }
}

/// What a run did.
#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    pub stage_totals: Vec<(ModelStage, StageTotals)>,
    pub convergence: Option<ConvergenceReport>,
}

/// Owns the population and everything shared by the models, and runs the
/// enabled stages in order.
pub struct PipelineOrchestrator {
    config: RunConfig,
    specs: ModelSpecs,
    zones: ZonalData,
    skims: Box<dyn SkimProvider>,
    usual_sizes: SizeTable,
    tour_sizes: SizeTable,
    stop_sizes: SizeTable,
    cache: ProbabilityCache,
    streams: RandomStreamManager,
    households: Vec<Household>,
    scheduler: TaskScheduler,
    pool: ModelPool<HouseholdChoiceModels>,
    balancer: ShadowPriceBalancer,
    checkpoints: Option<CheckpointStore>,
    convergence: Option<ConvergenceReport>,
}

impl PipelineOrchestrator {
    pub fn from_config_file(path: &Path) -> Result<PipelineOrchestrator, ModelError> {
        let config = RunConfig::from_file(path)?;
        PipelineOrchestrator::new(config)
    }

    pub fn new(config: RunConfig) -> Result<PipelineOrchestrator, ModelError> {
        let specs = ModelSpecs::from_file(&config.model_specs_path)?;
        let zones = ZonalData::from_csv(&config.zonal_data_path, config.num_subzones)?;
        let skims = DistanceSkims::new(&zones, config.beeline_factor, config.speeds.clone(),
                                       config.congestion_factor)?;
        let usual_sizes = SizeTable::from_specs(&specs.usual_location, &zones)?;
        let tour_sizes = SizeTable::from_specs(&specs.tour_destination, &zones)?;
        let stop_sizes = SizeTable::from_specs(&specs.stop_location, &zones)?;
        let streams = RandomStreamManager::new(config.random_seed);
        let households = load_population(&config.households_path, &config.persons_path,
                                         &zones, &streams, &config.trace_households)?;

        let scheduler = TaskScheduler::new(config.num_threads, config.num_partitions)?;
        let num_usual_segments = usual_sizes.num_segments();
        let dims = usual_sizes.dims();
        let pool = ModelPool::new(config.max_model_instances, move |index| {
            Ok(HouseholdChoiceModels::new(index, num_usual_segments, dims))
        });
        let balancer = ShadowPriceBalancer {
            max_iterations: config.shadow_price_max_iterations,
            tolerance: config.shadow_price_tolerance,
            damping: config.shadow_price_damping,
            output_file: config.shadow_price_output.clone(),
        };
        let checkpoints = config.checkpoint_file_base.as_ref().map(|base| {
            CheckpointStore::new(base)
        });

        Ok(PipelineOrchestrator {
            config,
            specs,
            zones,
            skims: Box::new(skims),
            usual_sizes,
            tour_sizes,
            stop_sizes,
            cache: ProbabilityCache::new(),
            streams,
            households,
            scheduler,
            pool,
            balancer,
            checkpoints,
            convergence: None,
        })
    }

    /// Runs every enabled stage, starting from the configured checkpoint if
    /// there is one.  The first error stops the run; stages that completed
    /// before it keep their checkpoints.
    pub fn run(&mut self) -> Result<RunSummary, ModelError> {
        let stages: Vec<ModelStage> = match self.resume()? {
            Some(first) => ModelStage::all().iter().copied()
                .filter(|ss| *ss >= first && self.config.is_enabled(*ss))
                .collect(),
            None => vec![],
        };
        for stage in stages.iter() {
            self.specs.check_stage(*stage)?;
        }
        self.check_modes(&stages)?;
        log::info!("running stages [{}]", stages.iter().map(|ss| ss.key()).join(", "));

        let mut summary = RunSummary::default();
        for stage in stages {
            log::info!("starting stage {} on {} households", stage.key(), self.households.len());
            let totals = match stage {
                ModelStage::UsualLocation => self.run_usual_location()?,
                _ => self.run_single_pass(stage)?,
            };
            log::info!("finished stage {}: {} decisions, {} tours and {} stops created, \
                        {} time of day fallbacks",
                       stage.key(), totals.decisions, totals.tours_created, totals.stops_created,
                       totals.fallbacks);
            self.write_checkpoint(stage.output_key())?;
            summary.stage_totals.push((stage, totals));
        }
        summary.convergence = self.convergence.clone();
        return Ok(summary);
    }

    /// Restores the checkpoint named by the resume key and returns the
    /// stage to start from.  None means there is nothing left to run.
    fn resume(&mut self) -> Result<Option<ModelStage>, ModelError> {
        let key = match &self.config.resume_key {
            Some(key) => key.clone(),
            None => return Ok(Some(ModelStage::UsualLocation)),
        };
        let stage = ModelStage::from_key(&key);
        if stage.is_none() && key != FINAL_KEY {
            return Err(ModelError::config(format!("unknown checkpoint key '{}'", key)));
        }
        let store = self.checkpoints.as_ref().ok_or_else(|| {
            ModelError::config("Checkpoint.ResumeKey is set but Checkpoint.FileBase is not")
        })?;
        let snapshot = store.load(&key)?;
        self.households = snapshot.households;
        self.usual_sizes.restore_segments(snapshot.shadow_prices)?;
        self.cache.clear();
        if let Some(stage) = stage {
            for household in self.households.iter_mut() {
                self.streams.reset_to_stage(household, stage);
            }
            log::info!("resuming at stage {}", stage.key());
        }
        return Ok(stage);
    }

    /// Mode alternatives whose utility reads travel times need skims for
    /// their mode.
    fn check_modes(&self, stages: &[ModelStage]) -> Result<(), ModelError> {
        let mut mode_specs: Vec<&ChoiceSpec> = vec![];
        if stages.contains(&ModelStage::TourModeChoice) {
            mode_specs.push(&self.specs.tour_mode_choice);
        }
        if stages.contains(&ModelStage::StopLocation) {
            mode_specs.push(&self.specs.trip_mode_choice);
        }
        for spec in mode_specs {
            for alt in spec.alternatives.iter() {
                if alt.utility.uses(Variable::TravelTime) &&
                   !self.skims.supports_mode(alt.mode_name()) {
                    return Err(ModelError::config(format!(
                        "{} alternative {} uses travel_time but there is no speed for mode {}",
                        spec.name, alt.name, alt.mode_name())));
                }
            }
        }
        return Ok(());
    }

    fn run_single_pass(&mut self, stage: ModelStage) -> Result<StageTotals, ModelError> {
        let ctx = PassContext {
            stage,
            specs: &self.specs,
            universe: self.zones.universe(),
            skims: self.skims.as_ref(),
            usual_sizes: &self.usual_sizes,
            tour_sizes: &self.tour_sizes,
            stop_sizes: &self.stop_sizes,
            cache: &self.cache,
            streams: &self.streams,
            sample_size: self.config.sample_size,
        };
        self.scheduler.run_pass(&mut self.households, &self.pool, |models, household| {
            models.apply(&ctx, household)
        })
    }

    /// Runs usual location choice until the shadow prices balance the
    /// modeled choices against the sizes.
    fn run_usual_location(&mut self) -> Result<StageTotals, ModelError> {
        let person_types = self.households.iter()
            .flat_map(|hh| hh.persons.iter().map(|pp| &pp.person_type));
        let counts = decision_maker_counts(&self.specs.usual_location, person_types);
        self.usual_sizes.balance_to_decision_makers(&counts);
        if let Some(input) = &self.config.shadow_price_input {
            self.usual_sizes.restore_csv(input, &self.zones)?;
        }
        self.cache.clear();

        let specs = &self.specs;
        let universe = self.zones.universe();
        let skims = self.skims.as_ref();
        let tour_sizes = &self.tour_sizes;
        let stop_sizes = &self.stop_sizes;
        let cache = &self.cache;
        let streams = &self.streams;
        let sample_size = self.config.sample_size;
        let scheduler = &self.scheduler;
        let pool = &self.pool;
        let households = &mut self.households;
        let mut last_totals = StageTotals::default();

        let report = self.balancer.run(&mut self.usual_sizes, cache, &self.zones,
                                       |sizes, iteration| {
            log::info!("usual location pass {}", iteration);
            let ctx = PassContext {
                stage: ModelStage::UsualLocation,
                specs,
                universe,
                skims,
                usual_sizes: sizes,
                tour_sizes,
                stop_sizes,
                cache,
                streams,
                sample_size,
            };
            let totals = scheduler.run_pass(households, pool, |models, household| {
                models.apply(&ctx, household)
            })?;
            let modeled = totals.usual_locations.clone();
            last_totals = totals;
            Ok(modeled)
        })?;
        self.convergence = Some(report);
        return Ok(last_totals);
    }

    fn write_checkpoint(&self, key: &str) -> Result<(), ModelError> {
        let store = match &self.checkpoints {
            Some(store) => store,
            None => return Ok(()),
        };
        let snapshot = PopulationSnapshot::new(key, self.households.clone(),
                                               self.usual_sizes.segments().to_vec());
        store.store(&snapshot)
    }

    pub fn households(&self) -> &[Household] {
        &self.households
    }

    pub fn zones(&self) -> &ZonalData {
        &self.zones
    }

    pub fn usual_sizes(&self) -> &SizeTable {
        &self.usual_sizes
    }

    pub fn convergence(&self) -> Option<&ConvergenceReport> {
        self.convergence.as_ref()
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }
}
