use std::collections::HashMap;
use std::path::Path;

use yaml_rust::Yaml;

use super::config_utils::{load_yaml, str_list, yaml_as_f64};
use super::errors::ModelError;
use super::pipeline::ModelStage;
use super::population::{ActivityPattern, Household, PersonType, TourCategory};
use super::zones::{SkimProvider, TimePeriod};


/// The quantities a utility term can be multiplied by.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Variable {
    Constant,
    HouseholdSize,
    IncomeK,
    Autos,
    Workers,
    Age,
    IsPersonType(PersonType),
    IsJoint,
    Distance,
    TravelTime,
    LogSize,
    StartHour,
    EndHour,
    Duration,
}

impl Variable {
    pub fn from_name(name: &str) -> Option<Variable> {
        let var = match name {
            "constant" => Variable::Constant,
            "household_size" => Variable::HouseholdSize,
            "income_k" => Variable::IncomeK,
            "autos" => Variable::Autos,
            "workers" => Variable::Workers,
            "age" => Variable::Age,
            "is_joint" => Variable::IsJoint,
            "distance" => Variable::Distance,
            "travel_time" => Variable::TravelTime,
            "log_size" => Variable::LogSize,
            "start_hour" => Variable::StartHour,
            "end_hour" => Variable::EndHour,
            "duration" => Variable::Duration,
            other => Variable::IsPersonType(PersonType::from_name(other)?),
        };
        return Some(var);
    }
}

/// The decision maker's side of a utility calculation.  Built once per
/// decision and never modified while alternatives are evaluated.
#[derive(Clone, Debug, Default)]
pub struct DecisionContext {
    pub household_id: u64,
    pub household_size: f64,
    pub income_k: f64,
    pub autos: f64,
    pub workers: f64,
    pub age: f64,
    pub person_type: Option<PersonType>,
    pub is_joint: bool,
    pub origin_zone: usize,
    /// start hour of the tour being modelled, when the alternatives don't
    /// carry their own
    pub tour_start_hour: Option<u8>,
}

impl DecisionContext {
    /// A context that depends on nothing but the origin zone, used for the
    /// sampling utilities whose probabilities are shared between decision
    /// makers.
    pub fn for_origin(origin_zone: usize) -> DecisionContext {
        DecisionContext {
            origin_zone,
            ..Default::default()
        }
    }

    pub fn for_household(household: &Household) -> DecisionContext {
        DecisionContext {
            household_id: household.id,
            household_size: household.size() as f64,
            income_k: household.income / 1000.,
            autos: household.autos.unwrap_or(0) as f64,
            workers: household.num_workers() as f64,
            origin_zone: household.home_zone,
            ..Default::default()
        }
    }

    pub fn for_person(household: &Household, person_idx: usize) -> DecisionContext {
        let person = &household.persons[person_idx];
        let mut ctx = DecisionContext::for_household(household);
        ctx.age = person.age as f64;
        ctx.person_type = Some(person.person_type);
        return ctx;
    }

    pub fn with_origin(mut self, origin_zone: usize) -> DecisionContext {
        self.origin_zone = origin_zone;
        self
    }

    pub fn with_tour_start(mut self, hour: Option<u8>) -> DecisionContext {
        self.tour_start_hour = hour;
        self
    }

    pub fn joint(mut self) -> DecisionContext {
        self.is_joint = true;
        self
    }
}

/// The alternative's side of a utility calculation.
#[derive(Clone, Copy, Debug, Default)]
pub struct AltAttributes<'a> {
    pub destination: Option<usize>,
    pub log_size: f64,
    pub start_hour: Option<u8>,
    pub end_hour: Option<u8>,
    pub mode: Option<&'a str>,
}

/// A linear utility: a sum of coefficient times variable.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UtilityExpression {
    terms: Vec<(Variable, f64)>,
}

impl UtilityExpression {
    pub fn new(terms: Vec<(Variable, f64)>) -> UtilityExpression {
        UtilityExpression { terms }
    }

    pub fn from_yaml(yaml: &Yaml, context: &str) -> Result<UtilityExpression, ModelError> {
        if yaml.is_badvalue() || yaml.is_null() {
            return Ok(UtilityExpression::default());
        }
        let hash = yaml.as_hash().ok_or_else(|| {
            ModelError::config(format!("utility of {} should be a map of variable: coefficient",
                                       context))
        })?;
        let mut terms = vec![];
        for (key, value) in hash {
            let name = key.as_str().unwrap_or("");
            let var = Variable::from_name(name).ok_or_else(|| {
                ModelError::config(format!("unknown utility variable '{}' in {}", name, context))
            })?;
            let coef = yaml_as_f64(value).ok_or_else(|| {
                ModelError::config(format!("coefficient of {} in {} is not a number", name,
                                           context))
            })?;
            terms.push((var, coef));
        }
        return Ok(UtilityExpression { terms });
    }

    pub fn uses(&self, var: Variable) -> bool {
        self.terms.iter().any(|(vv, _)| *vv == var)
    }

    pub fn variables(&self) -> impl Iterator<Item = Variable> + '_ {
        self.terms.iter().map(|(vv, _)| *vv)
    }

    pub fn evaluate(&self, ctx: &DecisionContext, alt: &AltAttributes, skims: &dyn SkimProvider)
                    -> f64 {
        let mut utility = 0.;
        for (var, coef) in &self.terms {
            // skip zero coefficients so an infinite variable can't make a NaN
            if *coef == 0. {
                continue;
            }
            let value = match var {
                Variable::Constant => 1.,
                Variable::HouseholdSize => ctx.household_size,
                Variable::IncomeK => ctx.income_k,
                Variable::Autos => ctx.autos,
                Variable::Workers => ctx.workers,
                Variable::Age => ctx.age,
                Variable::IsPersonType(pt) => indicator(ctx.person_type == Some(*pt)),
                Variable::IsJoint => indicator(ctx.is_joint),
                Variable::Distance => match alt.destination {
                    Some(dest) => skims.distance(ctx.origin_zone, dest),
                    None => 0.,
                },
                Variable::TravelTime => match (alt.destination, alt.mode) {
                    (Some(dest), Some(mode)) => {
                        let hour = alt.start_hour.or(ctx.tour_start_hour).unwrap_or(12);
                        skims.travel_value(ctx.origin_zone, dest, mode,
                                           TimePeriod::from_hour(hour))
                    }
                    _ => 0.,
                },
                Variable::LogSize => alt.log_size,
                Variable::StartHour => alt.start_hour.unwrap_or(0) as f64,
                Variable::EndHour => alt.end_hour.unwrap_or(0) as f64,
                Variable::Duration => match (alt.start_hour, alt.end_hour) {
                    (Some(ss), Some(ee)) => (ee - ss) as f64,
                    _ => 0.,
                },
            };
            utility += coef * value;
        }
        return utility;
    }
}

fn indicator(flag: bool) -> f64 {
    if flag { 1. } else { 0. }
}

/// One row of an alternative list.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AlternativeSpec {
    pub name: String,
    pub utility: UtilityExpression,
    /// if not empty, only these person types may choose this alternative
    pub person_types: Vec<PersonType>,
    pub value: i64,
    pub tours: Vec<String>,
    pub outbound_stops: Vec<String>,
    pub inbound_stops: Vec<String>,
    pub mode: Option<String>,
}

impl AlternativeSpec {
    pub fn available_to(&self, person_type: Option<PersonType>) -> bool {
        match person_type {
            Some(pt) if !self.person_types.is_empty() => self.person_types.contains(&pt),
            _ => true,
        }
    }

    pub fn mode_name(&self) -> &str {
        self.mode.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChoiceSpec {
    pub name: String,
    pub alternatives: Vec<AlternativeSpec>,
}

impl ChoiceSpec {
    pub fn is_empty(&self) -> bool {
        self.alternatives.is_empty()
    }

    fn from_yaml(yaml: &Yaml, name: &str) -> Result<ChoiceSpec, ModelError> {
        let mut spec = ChoiceSpec {
            name: String::from(name),
            alternatives: vec![],
        };
        if yaml.is_badvalue() {
            return Ok(spec);
        }
        let rows = yaml.as_vec().ok_or_else(|| {
            ModelError::config(format!("{} should be a list of alternatives", name))
        })?;
        for row in rows {
            let alt_name = row["name"].as_str().ok_or_else(|| {
                ModelError::config(format!("an alternative of {} has no name", name))
            })?;
            let context = format!("{}/{}", name, alt_name);
            let value = match &row["value"] {
                Yaml::BadValue => 0,
                vv => vv.as_i64().ok_or_else(|| {
                    ModelError::config(format!("value of {} should be an integer", context))
                })?,
            };
            spec.alternatives.push(AlternativeSpec {
                name: String::from(alt_name),
                utility: UtilityExpression::from_yaml(&row["utility"], &context)?,
                person_types: parse_person_types(row, &context)?,
                value,
                tours: str_list(row, "tours")?,
                outbound_stops: str_list(row, "outbound_stops")?,
                inbound_stops: str_list(row, "inbound_stops")?,
                mode: row["mode"].as_str().map(String::from),
            });
        }
        return Ok(spec);
    }
}

/// A destination segment: who chooses it, how big each zone is for it, and
/// the utilities of the sampling and the full location model.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LocationSegmentSpec {
    pub name: String,
    pub person_types: Vec<PersonType>,
    /// zone attribute name and its coefficient in the size term
    pub size: Vec<(String, f64)>,
    pub sample_utility: UtilityExpression,
    pub utility: UtilityExpression,
}

/// Sampling probabilities are shared by every decision maker at an origin,
/// so their utility may only read the origin and the alternative.
const SAMPLING_VARIABLES: [Variable; 3] = [Variable::Constant, Variable::Distance,
                                           Variable::LogSize];

fn location_segments_from_yaml(yaml: &Yaml, section: &str)
                               -> Result<Vec<LocationSegmentSpec>, ModelError> {
    if yaml.is_badvalue() {
        return Ok(vec![]);
    }
    let rows = yaml.as_vec().ok_or_else(|| {
        ModelError::config(format!("{} should be a list of segments", section))
    })?;
    let mut segments = vec![];
    for row in rows {
        let name = row["name"].as_str().ok_or_else(|| {
            ModelError::config(format!("a segment of {} has no name", section))
        })?;
        let context = format!("{}/{}", section, name);
        let mut size = vec![];
        if let Some(hash) = row["size"].as_hash() {
            for (key, value) in hash {
                let attr = key.as_str().ok_or_else(|| {
                    ModelError::config(format!("bad size attribute in {}", context))
                })?;
                let coef = yaml_as_f64(value).ok_or_else(|| {
                    ModelError::config(format!("size coefficient of {} in {} is not a number",
                                               attr, context))
                })?;
                size.push((String::from(attr), coef));
            }
        }
        if size.is_empty() {
            return Err(ModelError::config(format!("segment {} has no size terms", context)));
        }
        if segments.iter().any(|ss: &LocationSegmentSpec| ss.name == name) {
            return Err(ModelError::config(format!("duplicate segment {}", context)));
        }
        let sample_utility = UtilityExpression::from_yaml(&row["sample_utility"], &context)?;
        if let Some(var) = sample_utility.variables().find(|vv| !SAMPLING_VARIABLES.contains(vv)) {
            return Err(ModelError::config(format!(
                "sample_utility of {} uses {:?}; only constant, distance and log_size are allowed",
                context, var)));
        }
        segments.push(LocationSegmentSpec {
            name: String::from(name),
            person_types: parse_person_types(row, &context)?,
            size,
            sample_utility,
            utility: UtilityExpression::from_yaml(&row["utility"], &context)?,
        });
    }
    return Ok(segments);
}

fn parse_person_types(row: &Yaml, context: &str) -> Result<Vec<PersonType>, ModelError> {
    let mut types = vec![];
    for name in str_list(row, "person_types")? {
        match PersonType::from_name(&name) {
            Some(pt) => types.push(pt),
            None => {
                return Err(ModelError::config(format!("unknown person type '{}' in {}",
                                                      name, context)));
            }
        }
    }
    return Ok(types);
}

/// Every utility specification the models read.
#[derive(Clone, Debug, Default)]
pub struct ModelSpecs {
    pub usual_location: Vec<LocationSegmentSpec>,
    pub tour_destination: Vec<LocationSegmentSpec>,
    pub stop_location: Vec<LocationSegmentSpec>,
    pub auto_ownership: ChoiceSpec,
    pub daily_activity_pattern: ChoiceSpec,
    pub mandatory_tour_frequency: ChoiceSpec,
    pub at_work_subtour_frequency: ChoiceSpec,
    pub joint_tour_frequency: ChoiceSpec,
    pub joint_participation: ChoiceSpec,
    pub non_mandatory_tour_frequency: ChoiceSpec,
    pub tour_mode_choice: ChoiceSpec,
    pub stop_frequency: ChoiceSpec,
    pub trip_mode_choice: ChoiceSpec,
    pub time_of_day: HashMap<TourCategory, UtilityExpression>,
    empty_utility: UtilityExpression,
}

impl ModelSpecs {
    pub fn from_file(path: &Path) -> Result<ModelSpecs, ModelError> {
        let yaml = load_yaml(path)?;
        ModelSpecs::from_yaml(&yaml)
    }

    pub fn from_yaml(yaml: &Yaml) -> Result<ModelSpecs, ModelError> {
        let mut time_of_day = HashMap::new();
        if let Some(hash) = yaml["time_of_day"].as_hash() {
            for (key, value) in hash {
                let name = key.as_str().unwrap_or("");
                let category = TourCategory::from_name(name).ok_or_else(|| {
                    ModelError::config(format!("unknown tour category '{}' in time_of_day", name))
                })?;
                let context = format!("time_of_day/{}", name);
                time_of_day.insert(category, UtilityExpression::from_yaml(value, &context)?);
            }
        }

        let specs = ModelSpecs {
            usual_location: location_segments_from_yaml(&yaml["usual_location"],
                                                         "usual_location")?,
            tour_destination: location_segments_from_yaml(&yaml["tour_destination"],
                                                          "tour_destination")?,
            stop_location: location_segments_from_yaml(&yaml["stop_location"],
                                                       "stop_location")?,
            auto_ownership: ChoiceSpec::from_yaml(&yaml["auto_ownership"], "auto_ownership")?,
            daily_activity_pattern: ChoiceSpec::from_yaml(&yaml["daily_activity_pattern"],
                                                          "daily_activity_pattern")?,
            mandatory_tour_frequency: ChoiceSpec::from_yaml(&yaml["mandatory_tour_frequency"],
                                                            "mandatory_tour_frequency")?,
            at_work_subtour_frequency: ChoiceSpec::from_yaml(&yaml["at_work_subtour_frequency"],
                                                             "at_work_subtour_frequency")?,
            joint_tour_frequency: ChoiceSpec::from_yaml(&yaml["joint_tour_frequency"],
                                                        "joint_tour_frequency")?,
            joint_participation: ChoiceSpec::from_yaml(&yaml["joint_participation"],
                                                       "joint_participation")?,
            non_mandatory_tour_frequency: ChoiceSpec::from_yaml(
                &yaml["non_mandatory_tour_frequency"], "non_mandatory_tour_frequency")?,
            tour_mode_choice: ChoiceSpec::from_yaml(&yaml["tour_mode_choice"],
                                                    "tour_mode_choice")?,
            stop_frequency: ChoiceSpec::from_yaml(&yaml["stop_frequency"], "stop_frequency")?,
            trip_mode_choice: ChoiceSpec::from_yaml(&yaml["trip_mode_choice"],
                                                    "trip_mode_choice")?,
            time_of_day,
            empty_utility: UtilityExpression::default(),
        };

        for alt in &specs.daily_activity_pattern.alternatives {
            if ActivityPattern::from_name(&alt.name).is_none() {
                return Err(ModelError::config(format!(
                    "daily_activity_pattern alternative '{}' is not one of M, N, H", alt.name)));
            }
        }
        return Ok(specs);
    }

    /// The time of day utility of a tour category; categories without one
    /// find every window equally attractive.
    pub fn time_of_day_utility(&self, category: TourCategory) -> &UtilityExpression {
        self.time_of_day.get(&category).unwrap_or(&self.empty_utility)
    }

    pub fn tour_destination_segment(&self, purpose: &str) -> Option<usize> {
        self.tour_destination.iter().position(|ss| ss.name == purpose)
    }

    pub fn stop_location_segment(&self, purpose: &str) -> Option<usize> {
        self.stop_location.iter().position(|ss| ss.name == purpose)
    }

    /// Checks that everything `stage` reads is specified.
    pub fn check_stage(&self, stage: ModelStage) -> Result<(), ModelError> {
        let required: Vec<&ChoiceSpec> = match stage {
            ModelStage::UsualLocation => {
                if self.usual_location.is_empty() {
                    return Err(ModelError::config("usual_location has no segments"));
                }
                vec![]
            }
            ModelStage::AutoOwnership => vec![&self.auto_ownership],
            ModelStage::DailyActivityPattern => vec![&self.daily_activity_pattern],
            ModelStage::MandatoryTourFrequency => vec![&self.mandatory_tour_frequency],
            ModelStage::MandatoryTimeOfDay => vec![],
            ModelStage::AtWorkSubtours => vec![&self.at_work_subtour_frequency],
            ModelStage::JointTours => {
                vec![&self.joint_tour_frequency, &self.joint_participation]
            }
            ModelStage::NonMandatoryTours => vec![&self.non_mandatory_tour_frequency],
            ModelStage::TourModeChoice => vec![&self.tour_mode_choice],
            ModelStage::StopFrequency => vec![&self.stop_frequency],
            ModelStage::StopLocation => vec![&self.trip_mode_choice],
        };
        for spec in required.iter() {
            if spec.is_empty() {
                return Err(ModelError::config(format!(
                    "stage {} is enabled but {} has no alternatives", stage.key(), spec.name)));
            }
            for purpose in spec.alternatives.iter().flat_map(|aa| aa.tours.iter()) {
                if self.tour_destination_segment(purpose).is_none() {
                    return Err(ModelError::config(format!(
                        "{} creates {} tours but tour_destination has no such segment",
                        spec.name, purpose)));
                }
            }
        }
        if stage == ModelStage::StopLocation {
            let purposes = self.stop_frequency.alternatives.iter()
                .flat_map(|aa| aa.outbound_stops.iter().chain(aa.inbound_stops.iter()));
            for purpose in purposes {
                if self.stop_location_segment(purpose).is_none() {
                    return Err(ModelError::config(format!(
                        "stop purpose {} has no stop_location segment", purpose)));
                }
            }
        }
        return Ok(());
    }
}
