use super::choice_model::{LogitModel, NoAlternativeError, NoAlternativePolicy};
use super::errors::ModelError;
use super::location_choice::LocationChoiceModel;
use super::model_pool::PooledModel;
use super::pipeline::{ModelStage, PassContext};
use super::population::{ActivityPattern, Household, Stop, TimeWindows, Tour, TourCategory,
                        UsualLocation, FIRST_HOUR, LAST_HOUR};
use super::sample_of_alternatives::LocationFamily;
use super::scheduler::Accumulator;
use super::shadow_price::ModeledChoices;
use super::utility::{AltAttributes, AlternativeSpec, ChoiceSpec, DecisionContext};
use super::zones::ZoneAlt;


const FULL_DAY: (u8, u8) = (FIRST_HOUR, LAST_HOUR);

/// What one pass over a stage produced, summed over the households.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StageTotals {
    pub households: u64,
    pub decisions: u64,
    pub tours_created: u64,
    pub stops_created: u64,
    /// time of day decisions that needed a fallback
    pub fallbacks: u64,
    pub usual_locations: ModeledChoices,
}

impl Accumulator for StageTotals {
    fn merge(&mut self, other: StageTotals) {
        self.households += other.households;
        self.decisions += other.decisions;
        self.tours_created += other.tours_created;
        self.stops_created += other.stops_created;
        self.fallbacks += other.fallbacks;
        self.usual_locations.merge(other.usual_locations);
    }
}

/// Identifies a tour within a household.
#[derive(Clone, Copy, Debug, PartialEq)]
enum TourRef {
    Individual(usize, usize),
    Joint(usize),
}

impl TourRef {
    fn all(household: &Household) -> Vec<TourRef> {
        let mut refs = vec![];
        for (pi, person) in household.persons.iter().enumerate() {
            refs.extend((0..person.tours.len()).map(|ti| TourRef::Individual(pi, ti)));
        }
        refs.extend((0..household.joint_tours.len()).map(TourRef::Joint));
        return refs;
    }

    fn get<'a>(&self, household: &'a Household) -> &'a Tour {
        match *self {
            TourRef::Individual(pi, ti) => &household.persons[pi].tours[ti],
            TourRef::Joint(ti) => &household.joint_tours[ti],
        }
    }

    fn get_mut<'a>(&self, household: &'a mut Household) -> &'a mut Tour {
        match *self {
            TourRef::Individual(pi, ti) => &mut household.persons[pi].tours[ti],
            TourRef::Joint(ti) => &mut household.joint_tours[ti],
        }
    }

    /// The decision maker of tour-level choices.
    fn context(&self, household: &Household) -> DecisionContext {
        let tour = self.get(household);
        let ctx = match *self {
            TourRef::Individual(pi, _) => DecisionContext::for_person(household, pi),
            TourRef::Joint(_) => DecisionContext::for_household(household).joint(),
        };
        ctx.with_origin(tour.origin_zone).with_tour_start(tour.start_hour)
    }

    fn describe(&self, household: &Household) -> String {
        match *self {
            TourRef::Individual(pi, ti) => {
                format!("person {} tour {}", household.persons[pi].person_num, ti)
            }
            TourRef::Joint(ti) => format!("joint tour {}", ti),
        }
    }
}

/// Logs a failed decision with its household, person and tour, and turns
/// it into the error that stops the run.
fn no_alternative(ctx: &PassContext, household_id: u64, context: String,
                  err: NoAlternativeError) -> ModelError {
    let detail = format!("{}: {}", context, err);
    log::error!("household {} in stage {}: {}", household_id, ctx.stage.key(), detail);
    ModelError::NoAvailableAlternatives {
        household_id,
        stage: ctx.stage,
        detail,
    }
}

/// One worker's set of choice models.  Holds the buffers the models reuse
/// from one decision to the next and the totals of the current pass.
pub struct HouseholdChoiceModels {
    index: usize,
    logit: LogitModel,
    locations: LocationChoiceModel,
    availability: Vec<bool>,
    sample: Vec<f64>,
    time_windows: Vec<(u8, u8)>,
    span_windows: Vec<(u8, u8)>,
    num_usual_segments: usize,
    dims: (usize, usize),
    totals: StageTotals,
}

impl HouseholdChoiceModels {
    pub fn new(index: usize, num_usual_segments: usize, dims: (usize, usize))
               -> HouseholdChoiceModels {
        HouseholdChoiceModels {
            index,
            logit: LogitModel::new("choice"),
            locations: LocationChoiceModel::new(),
            availability: vec![],
            sample: vec![],
            time_windows: TimeWindows::alternatives(),
            span_windows: vec![],
            num_usual_segments,
            dims,
            totals: HouseholdChoiceModels::empty_totals(num_usual_segments, dims),
        }
    }

    fn empty_totals(num_usual_segments: usize, dims: (usize, usize)) -> StageTotals {
        StageTotals {
            usual_locations: ModeledChoices::new(num_usual_segments, dims),
            ..Default::default()
        }
    }

    /// Runs the pass's stage for one household.
    pub fn apply(&mut self, ctx: &PassContext, household: &mut Household)
                 -> Result<(), ModelError> {
        ctx.streams.enter_stage(household, ctx.stage);
        self.totals.households += 1;
        match ctx.stage {
            ModelStage::UsualLocation => self.usual_locations(ctx, household),
            ModelStage::AutoOwnership => self.auto_ownership(ctx, household),
            ModelStage::DailyActivityPattern => self.activity_patterns(ctx, household),
            ModelStage::MandatoryTourFrequency => self.mandatory_tours(ctx, household),
            ModelStage::MandatoryTimeOfDay => self.mandatory_time_of_day(ctx, household),
            ModelStage::AtWorkSubtours => self.at_work_subtours(ctx, household),
            ModelStage::JointTours => self.joint_tours(ctx, household),
            ModelStage::NonMandatoryTours => self.non_mandatory_tours(ctx, household),
            ModelStage::TourModeChoice => self.tour_modes(ctx, household),
            ModelStage::StopFrequency => self.stop_frequencies(ctx, household),
            ModelStage::StopLocation => self.stop_locations(ctx, household),
        }
    }

    /// Chooses from an alternative list.  `attrs` gives each alternative's
    /// attributes, or None if it is unavailable; alternatives restricted to
    /// other person types are always unavailable.
    fn choose_from_spec<'s, G>(&mut self, ctx: &PassContext, spec: &'s ChoiceSpec,
                               dctx: &DecisionContext, rn: f64, debug: bool, attrs: G)
                               -> Result<usize, NoAlternativeError>
        where G: Fn(&'s AlternativeSpec) -> Option<AltAttributes<'s>>
    {
        let alt_attrs: Vec<Option<AltAttributes<'s>>> = spec.alternatives.iter().map(|alt| {
            if alt.available_to(dctx.person_type) { attrs(alt) } else { None }
        }).collect();
        self.availability.clear();
        self.availability.extend(alt_attrs.iter().map(|aa| aa.is_some()));
        self.sample.clear();
        self.sample.resize(alt_attrs.len(), 1.);

        self.logit.set_name(&spec.name);
        let skims = ctx.skims;
        self.logit.compute_utilities(&self.availability, &self.sample, |ii| {
            match &alt_attrs[ii] {
                Some(aa) => spec.alternatives[ii].utility.evaluate(dctx, aa, skims),
                None => f64::NEG_INFINITY,
            }
        });
        self.totals.decisions += 1;
        let result = self.logit.choice_result(rn);
        if debug {
            log::debug!("household {} {}: utilities {:?}, probabilities {:?}, draw {:.6}, \
                         chose {:?}", dctx.household_id, spec.name, self.logit.utilities(),
                        self.logit.probabilities(), rn, result);
        }
        return result;
    }

    /// Chooses a (start, end) hour pair among the windows free in
    /// `windows`, applying `policy` if none is free.  Only pairs between the
    /// hours of `span` are alternatives, so forced endpoints stay inside it.
    fn choose_time_window(&mut self, ctx: &PassContext, category: TourCategory,
                          dctx: &DecisionContext, windows: &TimeWindows, span: (u8, u8),
                          destination: Option<usize>, rn: f64, policy: NoAlternativePolicy,
                          debug: bool) -> Result<(u8, u8), NoAlternativeError> {
        let (first, last) = span;
        self.span_windows.clear();
        self.span_windows.extend(self.time_windows.iter()
            .filter(|(start, end)| first <= *start && *end <= last));
        let tod_alts = &self.span_windows;
        self.availability.clear();
        self.availability.extend(tod_alts.iter().map(|(ss, ee)| windows.is_free(*ss, *ee)));
        self.sample.clear();
        self.sample.resize(tod_alts.len(), 1.);

        let utility = ctx.specs.time_of_day_utility(category);
        let skims = ctx.skims;
        self.logit.set_name(&format!("{} time of day", category.name()));
        let choice = self.logit.choose_with_policy(&mut self.availability, &self.sample, |ii| {
            let (start, end) = tod_alts[ii];
            let attrs = AltAttributes {
                destination,
                start_hour: Some(start),
                end_hour: Some(end),
                ..Default::default()
            };
            utility.evaluate(dctx, &attrs, skims)
        }, rn, policy)?;
        self.totals.decisions += 1;

        let (start, end) = tod_alts[choice];
        if !windows.is_free(start, end) {
            self.totals.fallbacks += 1;
            log::debug!("household {}: no free {} window, fell back to {}-{}",
                        dctx.household_id, category.name(), start, end);
        }
        if debug {
            log::debug!("household {} {} time of day: draw {:.6}, chose {}-{}",
                        dctx.household_id, category.name(), rn, start, end);
        }
        return Ok((start, end));
    }

    fn choose_destination(&mut self, ctx: &PassContext, family: LocationFamily, segment: usize,
                          dctx: &DecisionContext, household: &mut Household)
                          -> Result<ZoneAlt, NoAlternativeError> {
        let debug = household.debug;
        self.totals.decisions += 1;
        self.locations.choose(ctx, family, segment, dctx, &mut household.stream, debug)
    }

    fn usual_locations(&mut self, ctx: &PassContext, household: &mut Household)
                       -> Result<(), ModelError> {
        for pi in 0..household.persons.len() {
            let person_type = household.persons[pi].person_type;
            let segment = ctx.specs.usual_location.iter()
                .position(|ss| ss.person_types.contains(&person_type));
            let segment = match segment {
                Some(segment) => segment,
                None => {
                    household.persons[pi].usual_location = None;
                    continue;
                }
            };
            let dctx = DecisionContext::for_person(household, pi);
            let alt = self.choose_destination(ctx, LocationFamily::UsualLocation, segment, &dctx,
                                              household)
                .map_err(|err| {
                    let context = format!("person {}", household.persons[pi].person_num);
                    no_alternative(ctx, household.id, context, err)
                })?;
            self.totals.usual_locations.add(segment, alt);
            household.persons[pi].usual_location = Some(UsualLocation {
                segment: ctx.specs.usual_location[segment].name.clone(),
                alt,
            });
        }
        return Ok(());
    }

    fn auto_ownership(&mut self, ctx: &PassContext, household: &mut Household)
                      -> Result<(), ModelError> {
        let dctx = DecisionContext::for_household(household);
        let rn = ctx.streams.draw(household);
        let spec = &ctx.specs.auto_ownership;
        let choice = self.choose_from_spec(ctx, spec, &dctx, rn, household.debug,
                                           |_| Some(AltAttributes::default()))
            .map_err(|err| no_alternative(ctx, household.id, String::from("household"), err))?;
        household.autos = Some(spec.alternatives[choice].value.max(0).min(255) as u8);
        return Ok(());
    }

    fn activity_patterns(&mut self, ctx: &PassContext, household: &mut Household)
                         -> Result<(), ModelError> {
        let spec = &ctx.specs.daily_activity_pattern;
        for pi in 0..household.persons.len() {
            let dctx = DecisionContext::for_person(household, pi);
            let has_usual_location = household.persons[pi].usual_location.is_some();
            let rn = ctx.streams.draw(household);
            let choice = self.choose_from_spec(ctx, spec, &dctx, rn, household.debug, |alt| {
                match ActivityPattern::from_name(&alt.name) {
                    Some(ActivityPattern::Mandatory) if !has_usual_location => None,
                    Some(_) => Some(AltAttributes::default()),
                    None => None,
                }
            }).map_err(|err| {
                let context = format!("person {}", household.persons[pi].person_num);
                no_alternative(ctx, household.id, context, err)
            })?;
            household.persons[pi].pattern = ActivityPattern::from_name(&spec.alternatives[choice].name);
        }
        return Ok(());
    }

    fn mandatory_tours(&mut self, ctx: &PassContext, household: &mut Household)
                       -> Result<(), ModelError> {
        let spec = &ctx.specs.mandatory_tour_frequency;
        for pi in 0..household.persons.len() {
            if household.persons[pi].pattern != Some(ActivityPattern::Mandatory) {
                continue;
            }
            let usual = match &household.persons[pi].usual_location {
                Some(usual) => usual.clone(),
                None => {
                    let context = format!("person {}", household.persons[pi].person_num);
                    let err = NoAlternativeError {
                        model: String::from("mandatory tours without a usual location"),
                    };
                    return Err(no_alternative(ctx, household.id, context, err));
                }
            };
            let dctx = DecisionContext::for_person(household, pi);
            let rn = ctx.streams.draw(household);
            let choice = self.choose_from_spec(ctx, spec, &dctx, rn, household.debug, |_| {
                Some(AltAttributes { destination: Some(usual.alt.zone), ..Default::default() })
            }).map_err(|err| {
                let context = format!("person {}", household.persons[pi].person_num);
                no_alternative(ctx, household.id, context, err)
            })?;

            let home = household.home_zone;
            let person = &mut household.persons[pi];
            for _ in 0..spec.alternatives[choice].value.max(0) {
                let mut tour = Tour::new(person.tours.len() as u32, TourCategory::Mandatory,
                                         &usual.segment, home);
                tour.destination = Some(usual.alt);
                person.tours.push(tour);
                self.totals.tours_created += 1;
            }
        }
        return Ok(());
    }

    fn mandatory_time_of_day(&mut self, ctx: &PassContext, household: &mut Household)
                             -> Result<(), ModelError> {
        for pi in 0..household.persons.len() {
            for ti in 0..household.persons[pi].tours.len() {
                let tour = &household.persons[pi].tours[ti];
                if tour.category != TourCategory::Mandatory {
                    continue;
                }
                let destination = tour.destination.map(|dd| dd.zone);
                let dctx = DecisionContext::for_person(household, pi);
                let windows = household.persons[pi].windows.clone();
                let rn = ctx.streams.draw(household);
                let (start, end) = self.choose_time_window(
                    ctx, TourCategory::Mandatory, &dctx, &windows, FULL_DAY, destination, rn,
                    NoAlternativePolicy::ForceEndpointsOrSplit, household.debug,
                ).map_err(|err| {
                    let context = TourRef::Individual(pi, ti).describe(household);
                    no_alternative(ctx, household.id, context, err)
                })?;
                let person = &mut household.persons[pi];
                person.tours[ti].start_hour = Some(start);
                person.tours[ti].end_hour = Some(end);
                person.windows.mark_busy(start, end);
            }
        }
        return Ok(());
    }

    /// Destination and time of day of a new tour leaving from `origin`,
    /// scheduled between the hours of `span`.
    fn locate_and_schedule(&mut self, ctx: &PassContext, household: &mut Household,
                           mut tour: Tour, dctx: &DecisionContext, windows: &TimeWindows,
                           span: (u8, u8), context: &str) -> Result<Tour, ModelError> {
        let segment = match ctx.specs.tour_destination_segment(&tour.purpose) {
            Some(segment) => segment,
            None => {
                return Err(ModelError::config(format!("no tour_destination segment for {}",
                                                      tour.purpose)));
            }
        };
        let dest = self.choose_destination(ctx, LocationFamily::TourDestination, segment, dctx,
                                           household)
            .map_err(|err| no_alternative(ctx, household.id, String::from(context), err))?;
        tour.destination = Some(dest);

        let rn = ctx.streams.draw(household);
        let (start, end) = self.choose_time_window(ctx, tour.category, dctx, windows, span,
                                                   Some(dest.zone), rn,
                                                   NoAlternativePolicy::ForceEndpoints,
                                                   household.debug)
            .map_err(|err| no_alternative(ctx, household.id, String::from(context), err))?;
        tour.start_hour = Some(start);
        tour.end_hour = Some(end);
        self.totals.tours_created += 1;
        return Ok(tour);
    }

    fn at_work_subtours(&mut self, ctx: &PassContext, household: &mut Household)
                        -> Result<(), ModelError> {
        let spec = &ctx.specs.at_work_subtour_frequency;
        for pi in 0..household.persons.len() {
            if !household.persons[pi].person_type.is_worker() {
                continue;
            }
            let num_parents = household.persons[pi].tours.len();
            let mut subtours = vec![];
            for ti in 0..num_parents {
                let parent = household.persons[pi].tours[ti].clone();
                if parent.category != TourCategory::Mandatory {
                    continue;
                }
                let work_zone = parent.destination.map(|dd| dd.zone)
                    .unwrap_or(household.home_zone);
                let dctx = DecisionContext::for_person(household, pi).with_origin(work_zone)
                    .with_tour_start(parent.start_hour);
                let rn = ctx.streams.draw(household);
                let context = TourRef::Individual(pi, ti).describe(household);
                let choice = self.choose_from_spec(ctx, spec, &dctx, rn, household.debug,
                                                   |_| Some(AltAttributes::default()))
                    .map_err(|err| no_alternative(ctx, household.id, context.clone(), err))?;

                // subtours happen within the parent's hours, one after another
                let (mut windows, span) = match (parent.start_hour, parent.end_hour) {
                    (Some(start), Some(end)) => (TimeWindows::nested_in(start, end), (start, end)),
                    _ => (TimeWindows::new(), FULL_DAY),
                };
                for purpose in &spec.alternatives[choice].tours {
                    let id = (num_parents + subtours.len()) as u32;
                    let mut tour = Tour::new(id, TourCategory::AtWork, purpose, work_zone);
                    tour.parent_tour = Some(parent.id);
                    let sub_context = format!("{} subtour {}", context, id);
                    let tour = self.locate_and_schedule(ctx, household, tour, &dctx, &windows,
                                                        span, &sub_context)?;
                    if let (Some(start), Some(end)) = (tour.start_hour, tour.end_hour) {
                        windows.mark_busy(start, end);
                    }
                    subtours.push(tour);
                }
            }
            household.persons[pi].tours.extend(subtours);
        }
        return Ok(());
    }

    fn joint_tours(&mut self, ctx: &PassContext, household: &mut Household)
                   -> Result<(), ModelError> {
        let eligible: Vec<usize> = household.persons.iter().enumerate()
            .filter(|(_, pp)| pp.pattern.is_some() && pp.pattern != Some(ActivityPattern::Home))
            .map(|(pi, _)| pi)
            .collect();
        if eligible.len() < 2 {
            return Ok(());
        }

        let hh_ctx = DecisionContext::for_household(household).joint();
        let rn = ctx.streams.draw(household);
        let spec = &ctx.specs.joint_tour_frequency;
        let choice = self.choose_from_spec(ctx, spec, &hh_ctx, rn, household.debug,
                                           |_| Some(AltAttributes::default()))
            .map_err(|err| no_alternative(ctx, household.id, String::from("household"), err))?;

        for purpose in &spec.alternatives[choice].tours {
            let tour_index = household.joint_tours.len();
            let context = format!("joint tour {}", tour_index);

            let mut participants = vec![];
            for &pi in &eligible {
                let dctx = DecisionContext::for_person(household, pi).joint();
                let rn = ctx.streams.draw(household);
                let participation = &ctx.specs.joint_participation;
                let choice = self.choose_from_spec(ctx, participation, &dctx, rn,
                                                   household.debug,
                                                   |_| Some(AltAttributes::default()))
                    .map_err(|err| {
                        let context = format!("{} person {}", context,
                                              household.persons[pi].person_num);
                        no_alternative(ctx, household.id, context, err)
                    })?;
                if participation.alternatives[choice].value != 0 {
                    participants.push(pi);
                }
            }
            if participants.len() < 2 {
                participants = eligible.clone();
            }

            let mut windows = TimeWindows::new();
            for &pi in &participants {
                windows.add_busy(&household.persons[pi].windows);
            }
            let mut tour = Tour::new(tour_index as u32, TourCategory::Joint, purpose,
                                     household.home_zone);
            tour.participants = participants.iter()
                .map(|pi| household.persons[*pi].person_num)
                .collect();
            let tour = self.locate_and_schedule(ctx, household, tour, &hh_ctx, &windows,
                                                FULL_DAY, &context)?;
            if let (Some(start), Some(end)) = (tour.start_hour, tour.end_hour) {
                for &pi in &participants {
                    household.persons[pi].windows.mark_busy(start, end);
                }
            }
            household.joint_tours.push(tour);
        }
        return Ok(());
    }

    fn non_mandatory_tours(&mut self, ctx: &PassContext, household: &mut Household)
                           -> Result<(), ModelError> {
        let spec = &ctx.specs.non_mandatory_tour_frequency;
        for pi in 0..household.persons.len() {
            match household.persons[pi].pattern {
                Some(ActivityPattern::Mandatory) | Some(ActivityPattern::NonMandatory) => (),
                _ => continue,
            }
            let dctx = DecisionContext::for_person(household, pi);
            let rn = ctx.streams.draw(household);
            let choice = self.choose_from_spec(ctx, spec, &dctx, rn, household.debug,
                                               |_| Some(AltAttributes::default()))
                .map_err(|err| {
                    let context = format!("person {}", household.persons[pi].person_num);
                    no_alternative(ctx, household.id, context, err)
                })?;
            for purpose in &spec.alternatives[choice].tours {
                let id = household.persons[pi].tours.len() as u32;
                let tour = Tour::new(id, TourCategory::IndividualNonMandatory, purpose,
                                     household.home_zone);
                let context = TourRef::Individual(pi, id as usize).describe(household);
                let windows = household.persons[pi].windows.clone();
                let tour = self.locate_and_schedule(ctx, household, tour, &dctx, &windows,
                                                    FULL_DAY, &context)?;
                if let (Some(start), Some(end)) = (tour.start_hour, tour.end_hour) {
                    household.persons[pi].windows.mark_busy(start, end);
                }
                household.persons[pi].tours.push(tour);
            }
        }
        return Ok(());
    }

    fn tour_modes(&mut self, ctx: &PassContext, household: &mut Household)
                  -> Result<(), ModelError> {
        let spec = &ctx.specs.tour_mode_choice;
        for tour_ref in TourRef::all(household) {
            let dctx = tour_ref.context(household);
            let tour = tour_ref.get(household);
            let destination = tour.destination.map(|dd| dd.zone);
            let start_hour = tour.start_hour;
            let rn = ctx.streams.draw(household);
            let choice = self.choose_from_spec(ctx, spec, &dctx, rn, household.debug, |alt| {
                Some(AltAttributes {
                    destination,
                    start_hour,
                    mode: Some(alt.mode_name()),
                    ..Default::default()
                })
            }).map_err(|err| {
                no_alternative(ctx, household.id, tour_ref.describe(household), err)
            })?;
            let mode = String::from(spec.alternatives[choice].mode_name());
            tour_ref.get_mut(household).mode = Some(mode);
        }
        return Ok(());
    }

    fn stop_frequencies(&mut self, ctx: &PassContext, household: &mut Household)
                        -> Result<(), ModelError> {
        let spec = &ctx.specs.stop_frequency;
        for tour_ref in TourRef::all(household) {
            let dctx = tour_ref.context(household);
            let destination = tour_ref.get(household).destination.map(|dd| dd.zone);
            let rn = ctx.streams.draw(household);
            let choice = self.choose_from_spec(ctx, spec, &dctx, rn, household.debug, |_| {
                Some(AltAttributes { destination, ..Default::default() })
            }).map_err(|err| {
                no_alternative(ctx, household.id, tour_ref.describe(household), err)
            })?;

            let alt = &spec.alternatives[choice];
            let outbound = alt.outbound_stops.iter().map(|pp| (true, pp));
            let inbound = alt.inbound_stops.iter().map(|pp| (false, pp));
            let tour = tour_ref.get_mut(household);
            tour.stops = outbound.chain(inbound).enumerate().map(|(id, (is_out, purpose))| {
                Stop {
                    id: id as u8,
                    outbound: is_out,
                    purpose: purpose.clone(),
                    origin: None,
                    destination: None,
                    mode: None,
                }
            }).collect();
            self.totals.stops_created += tour.stops.len() as u64;
        }
        return Ok(());
    }

    fn stop_locations(&mut self, ctx: &PassContext, household: &mut Household)
                      -> Result<(), ModelError> {
        let trip_modes = &ctx.specs.trip_mode_choice;
        for tour_ref in TourRef::all(household) {
            let tour = tour_ref.get(household);
            let tour_origin = tour.origin_zone;
            let tour_dest = tour.destination.map(|dd| dd.zone).unwrap_or(tour_origin);
            let (start_hour, end_hour) = (tour.start_hour, tour.end_hour);
            let num_stops = tour.stops.len();

            let mut previous = tour_origin;
            let mut on_outbound = true;
            for si in 0..num_stops {
                let stop = &tour_ref.get(household).stops[si];
                if on_outbound && !stop.outbound {
                    // the inbound half starts at the tour's destination
                    on_outbound = false;
                    previous = tour_dest;
                }
                let segment = match ctx.specs.stop_location_segment(&stop.purpose) {
                    Some(segment) => segment,
                    None => {
                        return Err(ModelError::config(format!(
                            "no stop_location segment for {}", stop.purpose)));
                    }
                };
                let hour = if on_outbound { start_hour } else { end_hour };
                let dctx = tour_ref.context(household).with_origin(previous)
                    .with_tour_start(hour);
                let context = format!("{} stop {}", tour_ref.describe(household), si);

                let dest = self.choose_destination(ctx, LocationFamily::StopLocation, segment,
                                                   &dctx, household)
                    .map_err(|err| no_alternative(ctx, household.id, context.clone(), err))?;
                let rn = ctx.streams.draw(household);
                let choice = self.choose_from_spec(ctx, trip_modes, &dctx, rn, household.debug,
                                                   |alt| {
                    Some(AltAttributes {
                        destination: Some(dest.zone),
                        start_hour: hour,
                        mode: Some(alt.mode_name()),
                        ..Default::default()
                    })
                }).map_err(|err| no_alternative(ctx, household.id, context, err))?;

                let stop = &mut tour_ref.get_mut(household).stops[si];
                stop.origin = Some(previous);
                stop.destination = Some(dest);
                stop.mode = Some(String::from(trip_modes.alternatives[choice].mode_name()));
                previous = dest.zone;
            }
        }
        return Ok(());
    }
}

impl PooledModel for HouseholdChoiceModels {
    type Totals = StageTotals;

    fn model_index(&self) -> usize {
        self.index
    }

    fn reset_pass_state(&mut self) {
        self.totals = HouseholdChoiceModels::empty_totals(self.num_usual_segments, self.dims);
    }

    fn take_totals(&mut self) -> StageTotals {
        let fresh = HouseholdChoiceModels::empty_totals(self.num_usual_segments, self.dims);
        std::mem::replace(&mut self.totals, fresh)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::prelude::*;
    use super::super::shadow_price::{SegmentSizes, SizeTable};
    use super::super::test_utils;

    fn make_models(fixture: &test_utils::ModelFixture) -> HouseholdChoiceModels {
        HouseholdChoiceModels::new(0, fixture.usual_sizes.num_segments(),
                                   fixture.usual_sizes.dims())
    }

    #[test]
    fn test_all_stages_on_one_household() {
        let fixture = test_utils::ModelFixture::new();
        let mut models = make_models(&fixture);
        let mut household = test_utils::make_household(&fixture.streams, 5, 0, &[40, 38, 9, 70]);
        household.debug = true;
        for stage in ModelStage::all().iter() {
            models.apply(&fixture.context(*stage), &mut household).unwrap();
        }

        let workers = &household.persons[..2];
        for worker in workers {
            let usual = worker.usual_location.as_ref().unwrap();
            assert_eq!(usual.segment, "work");
            assert!(usual.alt.zone != 3);
        }
        let child = household.persons[2].usual_location.as_ref().unwrap();
        assert_eq!(child.segment, "school");
        assert!(child.alt.zone == 1 || child.alt.zone == 3);
        assert_eq!(household.persons[3].usual_location, None);
        assert!(household.autos.unwrap() <= 2);

        for person in household.persons.iter() {
            assert!(person.pattern.is_some());
            if person.pattern == Some(ActivityPattern::Mandatory) {
                let usual = person.usual_location.as_ref().unwrap();
                assert!(person.tours.iter().any(|tt| {
                    tt.category == TourCategory::Mandatory && tt.destination == Some(usual.alt)
                }));
            }
            for tour in person.tours.iter().filter(|tt| tt.category == TourCategory::AtWork) {
                let parent = &person.tours[tour.parent_tour.unwrap() as usize];
                assert_eq!(Some(tour.origin_zone), parent.destination.map(|dd| dd.zone));
            }
        }
        assert_ne!(household.persons[3].pattern, Some(ActivityPattern::Mandatory));
        for tour in household.joint_tours.iter() {
            assert!(tour.participants.len() >= 2);
        }

        let all_tours = household.persons.iter().flat_map(|pp| pp.tours.iter())
            .chain(household.joint_tours.iter());
        for tour in all_tours {
            let (start, end) = (tour.start_hour.unwrap(), tour.end_hour.unwrap());
            assert!(5 <= start && start <= end && end <= 23);
            let mode = tour.mode.as_ref().unwrap();
            assert!(mode == "auto" || mode == "walk");
            for (si, stop) in tour.stops.iter().enumerate() {
                assert!(stop.destination.is_some());
                assert!(stop.mode.is_some());
                let starts_half = si == 0 || tour.stops[si - 1].outbound != stop.outbound;
                if starts_half && stop.outbound {
                    assert_eq!(stop.origin, Some(tour.origin_zone));
                } else if starts_half {
                    assert_eq!(stop.origin, tour.destination.map(|dd| dd.zone));
                } else {
                    assert_eq!(stop.origin, tour.stops[si - 1].destination.map(|dd| dd.zone));
                }
            }
        }

        let totals = models.take_totals();
        assert_eq!(totals.households, ModelStage::all().len() as u64);
        assert_eq!(totals.usual_locations.segment_total(0), 2.);
        assert_eq!(totals.usual_locations.segment_total(1), 1.);
        assert_eq!(household.stage_start_draws.len(), ModelStage::all().len());
    }

    #[test]
    fn test_usual_location_draws_and_reentry() {
        let fixture = test_utils::ModelFixture::new();
        let ctx = fixture.context(ModelStage::UsualLocation);
        let mut models = make_models(&fixture);
        let mut household = test_utils::make_household(&fixture.streams, 9, 1, &[40, 9, 70]);
        models.apply(&ctx, &mut household).unwrap();
        // two choosers, each with a sample and a choice; the retiree has no segment
        assert_eq!(household.stream.draw_count(), 2 * (ctx.sample_size as u64 + 1));
        let first: Vec<_> = household.persons.iter().map(|pp| pp.usual_location.clone())
            .collect();

        // a second shadow pricing pass sees the same numbers
        models.apply(&ctx, &mut household).unwrap();
        assert_eq!(household.stream.draw_count(), 2 * (ctx.sample_size as u64 + 1));
        let second: Vec<_> = household.persons.iter().map(|pp| pp.usual_location.clone())
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_no_usual_location_is_fatal() {
        let mut fixture = test_utils::ModelFixture::new();
        fixture.usual_sizes = SizeTable::new(vec![
            SegmentSizes::new("work", Array2::zeros((4, 2))),
            SegmentSizes::new("school", Array2::zeros((4, 2))),
        ]);
        let mut models = make_models(&fixture);
        let mut household = test_utils::make_household(&fixture.streams, 12, 0, &[33]);
        let result = models.apply(&fixture.context(ModelStage::UsualLocation), &mut household);
        match result {
            Err(ModelError::NoAvailableAlternatives { household_id, stage, detail }) => {
                assert_eq!(household_id, 12);
                assert_eq!(stage, ModelStage::UsualLocation);
                assert!(detail.contains("person 1"));
            }
            other => panic!("expected no available alternatives, got {:?}", other),
        }
    }

    #[test]
    fn test_mandatory_time_of_day_fallback() {
        let fixture = test_utils::ModelFixture::new();
        let mut models = make_models(&fixture);
        let mut household = test_utils::make_household(&fixture.streams, 3, 0, &[45]);
        let person = &mut household.persons[0];
        person.windows.mark_busy(5, 23);
        person.tours.push(Tour::new(0, TourCategory::Mandatory, "work", 0));

        let ctx = fixture.context(ModelStage::MandatoryTimeOfDay);
        models.apply(&ctx, &mut household).unwrap();
        let tour = &household.persons[0].tours[0];
        let hours = (tour.start_hour.unwrap(), tour.end_hour.unwrap());
        assert!(hours == (5, 5) || hours == (23, 23));
        assert_eq!(household.stream.draw_count(), 1);
        assert_eq!(models.take_totals().fallbacks, 1);
    }

    #[test]
    fn test_subtours_stay_inside_parent() {
        let mut fixture = test_utils::ModelFixture::new();
        let two_meals = AlternativeSpec {
            name: String::from("eat_eat"),
            tours: vec![String::from("eat"), String::from("eat")],
            ..Default::default()
        };
        fixture.specs.at_work_subtour_frequency.alternatives = vec![two_meals];
        let mut models = make_models(&fixture);
        let mut household = test_utils::make_household(&fixture.streams, 8, 0, &[45]);
        let mut parent = Tour::new(0, TourCategory::Mandatory, "work", 0);
        parent.destination = Some(ZoneAlt::new(1, 0));
        parent.start_hour = Some(12);
        parent.end_hour = Some(12);
        household.persons[0].windows.mark_busy(12, 12);
        household.persons[0].tours.push(parent);

        models.apply(&fixture.context(ModelStage::AtWorkSubtours), &mut household).unwrap();
        let subtours: Vec<&Tour> = household.persons[0].tours.iter()
            .filter(|tt| tt.category == TourCategory::AtWork)
            .collect();
        assert_eq!(subtours.len(), 2);
        for tour in subtours {
            assert_eq!(tour.parent_tour, Some(0));
            assert_eq!(tour.origin_zone, 1);
            assert_eq!((tour.start_hour, tour.end_hour), (Some(12), Some(12)));
        }
        // the second meal finds the parent's only hour taken
        assert_eq!(models.take_totals().fallbacks, 1);
    }

    #[test]
    fn test_merge_totals() {
        let mut aa = StageTotals { households: 2, decisions: 7, fallbacks: 1, ..Default::default() };
        let bb = StageTotals { households: 3, tours_created: 4, ..Default::default() };
        aa.merge(bb);
        assert_eq!(aa.households, 5);
        assert_eq!(aa.decisions, 7);
        assert_eq!(aa.tours_created, 4);
        assert_eq!(aa.fallbacks, 1);
    }
}
