mod errors;
pub use errors::ModelError;

mod config_utils;

mod geometry;
pub use geometry::Point2d;

mod zones;
pub use zones::{AlternativeUniverse, DistanceSkims, SkimProvider, TimePeriod, ZonalData, ZoneAlt};

mod random_streams;
pub use random_streams::{HouseholdStream, RandomStreamManager};

mod population;
pub use population::{load_population, ActivityPattern, Household, Person, PersonType, Stop,
                     TimeWindows, Tour, TourCategory, UsualLocation};

mod utility;
pub use utility::{AltAttributes, AlternativeSpec, ChoiceSpec, DecisionContext,
                  LocationSegmentSpec, ModelSpecs, UtilityExpression, Variable};

mod choice_model;
pub use choice_model::{LogitModel, NoAlternativeError, NoAlternativePolicy};

mod sample_of_alternatives;
pub use sample_of_alternatives::{sample_alternatives, LocationFamily, ProbabilityCache,
                                 SoaProbabilities, SoaSample};

mod shadow_price;
pub use shadow_price::{ConvergenceReport, IterationDiff, ModeledChoices, SegmentSizes,
                       ShadowPriceBalancer, SizeTable};

mod model_pool;
pub use model_pool::{ModelPool, PooledModel};

mod scheduler;
pub use scheduler::{partition_ranges, Accumulator, TaskScheduler};

mod location_choice;
pub use location_choice::LocationChoiceModel;

mod household_models;
pub use household_models::{HouseholdChoiceModels, StageTotals};

mod checkpoint;
pub use checkpoint::{CheckpointStore, PopulationSnapshot, CHECKPOINT_VERSION, FINAL_KEY};

mod run_config;
pub use run_config::RunConfig;

mod pipeline;
pub use pipeline::{ModelStage, PassContext, PipelineOrchestrator, RunSummary};

#[cfg(test)]
mod test_utils;
