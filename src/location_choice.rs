use std::sync::Arc;

use super::choice_model::{LogitModel, NoAlternativeError};
use super::pipeline::PassContext;
use super::random_streams::HouseholdStream;
use super::sample_of_alternatives::{sample_alternatives, LocationFamily, SoaProbabilities};
use super::utility::{AltAttributes, DecisionContext};
use super::zones::ZoneAlt;


/// The sampling distribution of a segment from an origin.  It depends only
/// on the origin and the current sizes, so it is computed once per pass and
/// shared through the probability cache.
pub fn sampling_probabilities(ctx: &PassContext, family: LocationFamily, segment: usize,
                              origin: usize) -> Arc<SoaProbabilities> {
    ctx.cache.get_or_compute(family, segment, origin, || {
        let spec = &ctx.location_specs(family)[segment];
        let sizes = ctx.sizes(family);
        let origin_ctx = DecisionContext::for_origin(origin);
        let utilities: Vec<f64> = (0..ctx.universe.len()).map(|kk| {
            let alt = ctx.universe.alt(kk);
            let size = sizes.size(segment, alt);
            if size <= 0. {
                return f64::NEG_INFINITY;
            }
            let attrs = AltAttributes {
                destination: Some(alt.zone),
                log_size: size.ln(),
                ..Default::default()
            };
            spec.sample_utility.evaluate(&origin_ctx, &attrs, ctx.skims)
        }).collect();
        SoaProbabilities::from_utilities(&utilities)
    })
}

/// Destination choice over a sample of the (zone, sub-zone) universe.
pub struct LocationChoiceModel {
    logit: LogitModel,
    availability: Vec<bool>,
    sample_weights: Vec<f64>,
}

impl LocationChoiceModel {
    pub fn new() -> LocationChoiceModel {
        LocationChoiceModel {
            logit: LogitModel::new("location choice"),
            availability: vec![],
            sample_weights: vec![],
        }
    }

    /// Draws `ctx.sample_size` alternatives from the segment's sampling
    /// distribution at `dctx.origin_zone`, then chooses among the unique
    /// ones with the segment's full utility plus the sampling correction.
    /// Uses `sample_size + 1` draws from `stream`.
    pub fn choose(&mut self, ctx: &PassContext, family: LocationFamily, segment: usize,
                  dctx: &DecisionContext, stream: &mut HouseholdStream, debug: bool)
                  -> Result<ZoneAlt, NoAlternativeError> {
        let spec = &ctx.location_specs(family)[segment];
        let probs = sampling_probabilities(ctx, family, segment, dctx.origin_zone);
        let sample = sample_alternatives(&probs, ctx.sample_size, || stream.draw(), &spec.name)?;

        let sizes = ctx.sizes(family);
        let num_sampled = sample.len();
        self.availability.clear();
        self.availability.resize(num_sampled, true);
        self.sample_weights.clear();
        self.sample_weights.extend(sample.frequencies.iter().map(|ff| *ff as f64));
        self.logit.set_name(&spec.name);
        let universe = ctx.universe;
        let skims = ctx.skims;
        self.logit.compute_utilities(&self.availability, &self.sample_weights, |ii| {
            let alt = universe.alt(sample.alternatives[ii]);
            let attrs = AltAttributes {
                destination: Some(alt.zone),
                log_size: sizes.size(segment, alt).ln(),
                ..Default::default()
            };
            spec.utility.evaluate(dctx, &attrs, skims) + sample.corrections[ii]
        });

        let rn = stream.draw();
        let choice = self.logit.choice_result(rn)?;
        let chosen = universe.alt(sample.alternatives[choice]);
        if debug {
            log::debug!("household {} {} from zone {}: sample {:?}, probabilities {:?}, \
                         draw {:.6}, chose {:?}",
                        dctx.household_id, spec.name, dctx.origin_zone, sample.alternatives,
                        self.logit.probabilities(), rn, chosen);
        }
        return Ok(chosen);
    }
}
