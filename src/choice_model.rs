use std::error::Error;
use std::fmt;


/// Nothing could be chosen: every alternative was unavailable or had zero
/// probability.
#[derive(Clone, Debug, PartialEq)]
pub struct NoAlternativeError {
    pub model: String,
}

impl fmt::Display for NoAlternativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no alternative of {} is available", self.model)
    }
}

impl Error for NoAlternativeError {}

/// What a call site does when no alternative is available.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoAlternativePolicy {
    /// The decision fails.
    Fatal,
    /// Make the first and last alternatives available and choose again with
    /// the same draw; fail if that still finds nothing.
    ForceEndpoints,
    /// As `ForceEndpoints`, but if that still finds nothing take the first
    /// alternative when the draw is below one half and the last otherwise.
    ForceEndpointsOrSplit,
}

/// A multinomial logit model over a fixed list of alternatives.  The buffers
/// are reused from one decision to the next.
#[derive(Clone, Debug)]
pub struct LogitModel {
    name: String,
    utilities: Vec<f64>,
    probabilities: Vec<f64>,
    cumulative: Vec<f64>,
    num_available: usize,
}

impl LogitModel {
    pub fn new(name: &str) -> LogitModel {
        LogitModel {
            name: String::from(name),
            utilities: vec![],
            probabilities: vec![],
            cumulative: vec![],
            num_available: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name.clear();
        self.name.push_str(name);
    }

    pub fn utilities(&self) -> &[f64] {
        &self.utilities
    }

    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    /// Number of alternatives with positive probability.
    pub fn num_available(&self) -> usize {
        self.num_available
    }

    /// Evaluates `utility` for each alternative that is available and has a
    /// positive sample weight, and converts the utilities to probabilities.
    /// Alternatives that are skipped, or whose utility is negative infinity,
    /// get probability zero.
    pub fn compute_utilities<F>(&mut self, availability: &[bool], sample: &[f64], mut utility: F)
        where F: FnMut(usize) -> f64
    {
        let num_alts = availability.len();
        self.utilities.clear();
        self.utilities.resize(num_alts, f64::NEG_INFINITY);
        self.probabilities.clear();
        self.probabilities.resize(num_alts, 0.);
        self.cumulative.clear();
        self.cumulative.resize(num_alts, 0.);
        self.num_available = 0;

        let mut max_util = f64::NEG_INFINITY;
        for ii in 0..num_alts {
            if availability[ii] && sample[ii] > 0. {
                let util = utility(ii);
                // a NaN utility makes the alternative unavailable
                if !util.is_nan() {
                    self.utilities[ii] = util;
                    max_util = max_util.max(util);
                }
            }
        }
        if max_util == f64::NEG_INFINITY {
            return;
        }

        // subtract the maximum so large utilities can't overflow
        let mut total = 0.;
        for ii in 0..num_alts {
            let util = self.utilities[ii];
            if util > f64::NEG_INFINITY {
                let expu = (util - max_util).exp();
                self.probabilities[ii] = expu;
                total += expu;
            }
        }
        let mut cum = 0.;
        for ii in 0..num_alts {
            self.probabilities[ii] /= total;
            if self.probabilities[ii] > 0. {
                self.num_available += 1;
            }
            cum += self.probabilities[ii];
            self.cumulative[ii] = cum;
        }
    }

    /// Picks an alternative by inverse CDF with the draw `rn` in [0, 1).
    pub fn choice_result(&self, rn: f64) -> Result<usize, NoAlternativeError> {
        if self.num_available == 0 {
            return Err(NoAlternativeError { model: self.name.clone() });
        }
        for (ii, cum) in self.cumulative.iter().enumerate() {
            if rn < *cum && self.probabilities[ii] > 0. {
                return Ok(ii);
            }
        }
        // the cumulative total fell short of rn through rounding
        let last = self.probabilities.iter().rposition(|pp| *pp > 0.);
        return last.ok_or_else(|| NoAlternativeError { model: self.name.clone() });
    }

    /// Computes utilities and chooses with the draw `rn`, applying `policy`
    /// if nothing is available.  `availability` is left as it was used for
    /// the final attempt.
    pub fn choose_with_policy<F>(&mut self, availability: &mut [bool], sample: &[f64],
                                 mut utility: F, rn: f64, policy: NoAlternativePolicy)
                                 -> Result<usize, NoAlternativeError>
        where F: FnMut(usize) -> f64
    {
        self.compute_utilities(availability, sample, &mut utility);
        let first_err = match self.choice_result(rn) {
            Ok(choice) => return Ok(choice),
            Err(err) => err,
        };
        if policy == NoAlternativePolicy::Fatal || availability.is_empty() {
            return Err(first_err);
        }

        let last = availability.len() - 1;
        log::debug!("{}: nothing available, forcing the first and last alternatives", self.name);
        availability[0] = true;
        availability[last] = true;
        self.compute_utilities(availability, sample, &mut utility);
        match self.choice_result(rn) {
            Ok(choice) => Ok(choice),
            Err(err) => {
                if policy == NoAlternativePolicy::ForceEndpointsOrSplit {
                    if rn < 0.5 { Ok(0) } else { Ok(last) }
                } else {
                    Err(err)
                }
            }
        }
    }
}
