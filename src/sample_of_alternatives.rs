use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use super::choice_model::NoAlternativeError;


/// The kinds of location choice that sample their alternatives.  Each has
/// its own list of segments.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LocationFamily {
    UsualLocation,
    TourDestination,
    StopLocation,
}

/// Sampling probabilities over the whole alternative universe for one
/// segment and origin.
#[derive(Clone, Debug, PartialEq)]
pub struct SoaProbabilities {
    pub probabilities: Vec<f64>,
    pub cumulative: Vec<f64>,
    pub num_available: usize,
}

impl SoaProbabilities {
    /// Logit probabilities from sampling utilities, where unavailable
    /// alternatives have a utility of negative infinity.
    pub fn from_utilities(utilities: &[f64]) -> SoaProbabilities {
        let max_util = utilities.iter().cloned().filter(|uu| !uu.is_nan())
            .fold(f64::NEG_INFINITY, f64::max);
        let mut probabilities: Vec<f64> = utilities.iter().map(|uu| {
            if max_util == f64::NEG_INFINITY || uu.is_nan() {
                0.
            } else {
                (uu - max_util).exp()
            }
        }).collect();
        let total: f64 = probabilities.iter().sum();
        let mut cumulative = Vec::with_capacity(probabilities.len());
        let mut cum = 0.;
        let mut num_available = 0;
        for pp in probabilities.iter_mut() {
            if total > 0. {
                *pp /= total;
            }
            if *pp > 0. {
                num_available += 1;
            }
            cum += *pp;
            cumulative.push(cum);
        }
        SoaProbabilities {
            probabilities,
            cumulative,
            num_available,
        }
    }

    /// Inverse CDF lookup; None only if nothing has positive probability.
    fn draw_alternative(&self, rn: f64) -> Option<usize> {
        // the first index whose cumulative probability exceeds rn
        let idx = self.cumulative.partition_point(|cum| *cum <= rn);
        if idx < self.probabilities.len() && self.probabilities[idx] > 0. {
            return Some(idx);
        }
        self.probabilities.iter().rposition(|pp| *pp > 0.)
    }
}

/// Sampling probabilities shared by every decision maker in a pass.  An
/// entry is a pure function of the segment, the origin and the size terms,
/// so concurrent fills of the same key store equal values; the cache must be
/// cleared whenever the size terms change.
#[derive(Debug, Default)]
pub struct ProbabilityCache {
    entries: RwLock<HashMap<(LocationFamily, usize, usize), Arc<SoaProbabilities>>>,
    computations: AtomicUsize,
}

impl ProbabilityCache {
    pub fn new() -> ProbabilityCache {
        ProbabilityCache::default()
    }

    pub fn get_or_compute<F>(&self, family: LocationFamily, segment: usize, origin: usize,
                             compute: F) -> Arc<SoaProbabilities>
        where F: FnOnce() -> SoaProbabilities
    {
        let key = (family, segment, origin);
        {
            let entries = self.entries.read().unwrap_or_else(|ee| ee.into_inner());
            if let Some(probs) = entries.get(&key) {
                return probs.clone();
            }
        }
        // compute outside the lock; another thread may be doing the same
        let probs = Arc::new(compute());
        self.computations.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.write().unwrap_or_else(|ee| ee.into_inner());
        entries.entry(key).or_insert(probs).clone()
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|ee| ee.into_inner());
        log::debug!("clearing {} cached sampling distributions", entries.len());
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|ee| ee.into_inner()).len()
    }

    /// How many distributions have been computed since the cache was built.
    pub fn computations(&self) -> usize {
        self.computations.load(Ordering::Relaxed)
    }
}

/// The unique alternatives drawn for one decision maker, with how often each
/// was drawn and the correction to add to its utility.
#[derive(Clone, Debug, PartialEq)]
pub struct SoaSample {
    pub alternatives: Vec<usize>,
    pub frequencies: Vec<u32>,
    pub corrections: Vec<f64>,
}

impl SoaSample {
    pub fn len(&self) -> usize {
        self.alternatives.len()
    }
}

/// Draws `sample_size` alternatives with replacement from `probs`, calling
/// `draw` once per pick, and collapses them into unique alternatives in
/// index order.  The correction for an alternative drawn `f` times with
/// sampling probability `p` is `ln(f / p)`.
pub fn sample_alternatives<F>(probs: &SoaProbabilities, sample_size: usize, mut draw: F,
                              model: &str) -> Result<SoaSample, NoAlternativeError>
    where F: FnMut() -> f64
{
    if probs.num_available == 0 {
        return Err(NoAlternativeError { model: String::from(model) });
    }
    let mut freqs: BTreeMap<usize, u32> = BTreeMap::new();
    for _ in 0..sample_size {
        let rn = draw();
        match probs.draw_alternative(rn) {
            Some(alt) => *freqs.entry(alt).or_insert(0) += 1,
            None => return Err(NoAlternativeError { model: String::from(model) }),
        }
    }

    let mut sample = SoaSample {
        alternatives: Vec::with_capacity(freqs.len()),
        frequencies: Vec::with_capacity(freqs.len()),
        corrections: Vec::with_capacity(freqs.len()),
    };
    for (alt, freq) in freqs {
        sample.alternatives.push(alt);
        sample.frequencies.push(freq);
        sample.corrections.push((freq as f64 / probs.probabilities[alt]).ln());
    }
    return Ok(sample);
}


#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use approx::assert_ulps_eq;
    use rand::Rng;
    use rand::SeedableRng;
    use rand_isaac::Isaac64Rng;
    use super::super::choice_model::LogitModel;

    #[test]
    fn test_probabilities_from_utilities() {
        let probs = SoaProbabilities::from_utilities(&[0., f64::NEG_INFINITY, (3f64).ln()]);
        assert_ulps_eq!(probs.probabilities[0], 0.25);
        assert_eq!(probs.probabilities[1], 0.);
        assert_ulps_eq!(probs.probabilities[2], 0.75);
        assert_eq!(probs.num_available, 2);
        assert_ulps_eq!(probs.cumulative[2], 1.);

        let none = SoaProbabilities::from_utilities(&[f64::NEG_INFINITY; 3]);
        assert_eq!(none.num_available, 0);
        assert!(none.probabilities.iter().all(|pp| *pp == 0.));
    }

    #[test]
    fn test_sample_frequencies_and_corrections() {
        let probs = SoaProbabilities::from_utilities(&[0., f64::NEG_INFINITY, (3f64).ln()]);
        let draws = vec![0.9, 0.1, 0.5, 0.3];
        let mut iter = draws.into_iter();
        let sample = sample_alternatives(&probs, 4, || iter.next().unwrap(), "test").unwrap();
        assert_eq!(sample.alternatives, vec![0, 2]);
        assert_eq!(sample.frequencies, vec![1, 3]);
        assert_ulps_eq!(sample.corrections[0], (1. / probs.probabilities[0]).ln());
        assert_ulps_eq!(sample.corrections[1], (3. / probs.probabilities[2]).ln());
        assert_eq!(sample.frequencies.iter().sum::<u32>(), 4);
    }

    #[test]
    fn test_no_available_alternatives() {
        let probs = SoaProbabilities::from_utilities(&[f64::NEG_INFINITY; 4]);
        let mut num_draws = 0;
        let result = sample_alternatives(&probs, 5, || { num_draws += 1; 0.5 }, "work");
        assert_eq!(result.unwrap_err().model, "work");
        assert_eq!(num_draws, 0);
    }

    #[test]
    fn test_cache_reuses_and_clears() {
        let cache = ProbabilityCache::new();
        let utils = vec![0., 1., 2.];
        let first = cache.get_or_compute(LocationFamily::UsualLocation, 0, 3,
                                         || SoaProbabilities::from_utilities(&utils));
        let again = cache.get_or_compute(LocationFamily::UsualLocation, 0, 3,
                                         || panic!("should have been cached"));
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(cache.computations(), 1);

        // other origins, segments and families are separate entries
        cache.get_or_compute(LocationFamily::UsualLocation, 0, 4,
                             || SoaProbabilities::from_utilities(&utils));
        cache.get_or_compute(LocationFamily::UsualLocation, 1, 3,
                             || SoaProbabilities::from_utilities(&utils));
        cache.get_or_compute(LocationFamily::StopLocation, 0, 3,
                             || SoaProbabilities::from_utilities(&utils));
        assert_eq!(cache.len(), 4);
        assert_eq!(cache.computations(), 4);

        cache.clear();
        assert_eq!(cache.len(), 0);
        let recomputed = cache.get_or_compute(LocationFamily::UsualLocation, 0, 3,
                                              || SoaProbabilities::from_utilities(&utils));
        assert_eq!(*recomputed, *first);
        assert_eq!(cache.computations(), 5);
    }

    /// Averaged over many samples, the logit over the sample with
    /// corrections reproduces the full-universe probabilities.
    #[test]
    fn test_sampled_choice_unbiased() {
        let utils = vec![0.3, -0.2, 1.0, 0.0, -1.5, 0.7];
        let sampling = SoaProbabilities::from_utilities(&[0., 0., 0.5, 0., -0.5, 0.5]);
        let mut full = LogitModel::new("full");
        full.compute_utilities(&[true; 6], &[1.; 6], |ii| utils[ii]);

        let mut rng = Isaac64Rng::seed_from_u64(17);
        let mut model = LogitModel::new("sampled");
        let mut avg = vec![0.; 6];
        let num_reps = 10000;
        for _ in 0..num_reps {
            let sample = sample_alternatives(&sampling, 20, || rng.gen::<f64>(), "test").unwrap();
            let nn = sample.len();
            model.compute_utilities(&vec![true; nn], &vec![1.; nn], |ii| {
                utils[sample.alternatives[ii]] + sample.corrections[ii]
            });
            for (ii, alt) in sample.alternatives.iter().enumerate() {
                avg[*alt] += model.probabilities()[ii] / num_reps as f64;
            }
        }
        for ii in 0..6 {
            assert_abs_diff_eq!(avg[ii], full.probabilities()[ii], epsilon = 0.03);
        }
    }
}
