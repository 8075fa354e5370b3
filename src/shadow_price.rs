use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

use super::errors::ModelError;
use super::population::PersonType;
use super::sample_of_alternatives::ProbabilityCache;
use super::scheduler::Accumulator;
use super::utility::LocationSegmentSpec;
use super::zones::{ZonalData, ZoneAlt};


/// Size terms of one destination segment, per (zone, sub-zone).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SegmentSizes {
    pub name: String,
    /// size computed from the zonal attributes
    pub original: Array2<f64>,
    /// size rescaled so it sums to the segment's number of decision makers
    pub scaled: Array2<f64>,
    pub shadow_price: Array2<f64>,
    /// the size the location models see
    pub size: Array2<f64>,
}

impl SegmentSizes {
    pub fn new(name: &str, original: Array2<f64>) -> SegmentSizes {
        SegmentSizes {
            name: String::from(name),
            scaled: original.clone(),
            shadow_price: Array2::ones(original.raw_dim()),
            size: original.clone(),
            original,
        }
    }
}

/// The size terms of every segment of one location family.
#[derive(Clone, Debug, PartialEq)]
pub struct SizeTable {
    segments: Vec<SegmentSizes>,
}

impl SizeTable {
    pub fn new(segments: Vec<SegmentSizes>) -> SizeTable {
        SizeTable { segments }
    }

    /// Size of segment s at (zone z, sub-zone j): the sum of its attribute
    /// terms at zone z, times z's share for sub-zone j.
    pub fn from_specs(specs: &[LocationSegmentSpec], zones: &ZonalData)
                      -> Result<SizeTable, ModelError> {
        let mut segments = vec![];
        for spec in specs {
            let mut zone_sizes: Array1<f64> = Array1::zeros(zones.num_zones());
            for (attr, coef) in &spec.size {
                let values = zones.attribute(attr).ok_or_else(|| {
                    ModelError::config(format!("segment {} uses unknown zone attribute {}",
                                               spec.name, attr))
                })?;
                zone_sizes.scaled_add(*coef, values);
            }
            let shares = zones.subzone_shares();
            let mut original = shares.clone();
            for (mut row, zs) in original.outer_iter_mut().zip(zone_sizes.iter()) {
                row *= *zs;
            }
            original.mapv_inplace(|xx| xx.max(0.));
            segments.push(SegmentSizes::new(&spec.name, original));
        }
        return Ok(SizeTable { segments });
    }

    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    pub fn segment(&self, index: usize) -> &SegmentSizes {
        &self.segments[index]
    }

    pub fn segments(&self) -> &[SegmentSizes] {
        &self.segments
    }

    pub fn segment_index(&self, name: &str) -> Option<usize> {
        self.segments.iter().position(|ss| ss.name == name)
    }

    pub fn size(&self, segment: usize, alt: ZoneAlt) -> f64 {
        self.segments[segment].size[[alt.zone, alt.subzone]]
    }

    pub fn dims(&self) -> (usize, usize) {
        match self.segments.first() {
            Some(seg) => seg.size.dim(),
            None => (0, 0),
        }
    }

    /// Rescales each segment's sizes to sum to its number of decision makers
    /// and applies the current shadow prices to the result.
    pub fn balance_to_decision_makers(&mut self, counts: &[f64]) {
        for (seg, count) in self.segments.iter_mut().zip(counts.iter()) {
            let total = seg.original.sum();
            let factor = if total > 0. { count / total } else { 0. };
            seg.scaled = seg.original.mapv(|xx| xx * factor);
            seg.size = &seg.scaled * &seg.shadow_price;
            log::info!("segment {}: {} decision makers, total size {:.2}", seg.name, count,
                       total);
        }
    }

    /// Compares modeled choices with the scaled targets.  Relative
    /// differences are only taken over cells with a positive target.
    pub fn compare(&self, modeled: &ModeledChoices) -> PassDiff {
        let mut diff = PassDiff::default();
        for (seg, counts) in self.segments.iter().zip(modeled.counts.iter()) {
            for (target, model) in seg.scaled.iter().zip(counts.iter()) {
                let abs_diff = (model - target).abs();
                diff.max_abs_diff = diff.max_abs_diff.max(abs_diff);
                if *target > 0. {
                    diff.max_rel_diff = diff.max_rel_diff.max(abs_diff / target);
                }
            }
        }
        return diff;
    }

    /// `sp *= (target / modeled) ^ damping` wherever something was modeled,
    /// then `size = scaled * sp`, never below zero.
    pub fn update_shadow_prices(&mut self, modeled: &ModeledChoices, damping: f64) {
        for (seg, counts) in self.segments.iter_mut().zip(modeled.counts.iter()) {
            azip!((sp in &mut seg.shadow_price, &target in &seg.scaled, &model in counts) {
                if model > 0. {
                    *sp *= (target / model).powf(damping);
                }
            });
            seg.size = &seg.scaled * &seg.shadow_price;
            seg.size.mapv_inplace(|xx| xx.max(0.));
        }
    }

    /// Logs how the cells with a positive target are spread over relative
    /// error bands, and the percent RMSE, per segment.
    pub fn log_error_bands(&self, modeled: &ModeledChoices) {
        let band_limits = [0.05, 0.10, 0.25, 0.50, 1.00];
        for (seg, counts) in self.segments.iter().zip(modeled.counts.iter()) {
            // bands: none chosen, then each limit, then everything beyond
            let mut bands = [0usize; 7];
            let mut sq_err = 0f64;
            let mut num_cells = 0usize;
            for (target, model) in seg.scaled.iter().zip(counts.iter()) {
                if *target <= 0. {
                    continue;
                }
                num_cells += 1;
                sq_err += (model - target).powi(2);
                if *model == 0. {
                    bands[0] += 1;
                    continue;
                }
                let rel = (model - target).abs() / target;
                let band = band_limits.iter().position(|lim| rel < *lim)
                    .unwrap_or(band_limits.len());
                bands[band + 1] += 1;
            }
            let mean_target = seg.scaled.sum() / num_cells.max(1) as f64;
            let pct_rmse = if mean_target > 0. {
                100. * (sq_err / num_cells.max(1) as f64).sqrt() / mean_target
            } else {
                0.
            };
            log::info!("segment {}: {} cells; none chosen {}, <5% {}, <10% {}, <25% {}, \
                        <50% {}, <100% {}, 100%+ {}; %RMSE {:.2}",
                       seg.name, num_cells, bands[0], bands[1], bands[2], bands[3], bands[4],
                       bands[5], bands[6], pct_rmse);
        }
    }

    pub fn save_csv(&self, path: &Path, zones: &ZonalData) -> Result<(), ModelError> {
        let file = File::create(path).map_err(|ee| ModelError::io(path, ee))?;
        let mut writer = csv::Writer::from_writer(file);
        for seg in &self.segments {
            for ((zone, subzone), sp) in seg.shadow_price.indexed_iter() {
                writer.serialize(ShadowPriceRow {
                    segment: seg.name.clone(),
                    zone_id: zones.zone_id(zone),
                    subzone,
                    original_size: seg.original[[zone, subzone]],
                    scaled_size: seg.scaled[[zone, subzone]],
                    shadow_price: *sp,
                })?;
            }
        }
        writer.flush().map_err(|ee| ModelError::io(path, ee))?;
        return Ok(());
    }

    /// Takes the shadow prices from a file written by `save_csv` and
    /// recomputes the sizes from them.  Cells missing from the file keep
    /// their current price.
    pub fn restore_csv(&mut self, path: &Path, zones: &ZonalData) -> Result<(), ModelError> {
        let file = File::open(path).map_err(|ee| ModelError::io(path, ee))?;
        let mut reader = csv::Reader::from_reader(file);
        let mut num_rows = 0;
        for result in reader.deserialize() {
            let row: ShadowPriceRow = result?;
            let seg_idx = self.segment_index(&row.segment).ok_or_else(|| {
                ModelError::config(format!("{} has prices for unknown segment {}",
                                           path.display(), row.segment))
            })?;
            let zone = zones.index_of(row.zone_id).ok_or_else(|| {
                ModelError::config(format!("{} has prices for unknown zone {}",
                                           path.display(), row.zone_id))
            })?;
            let seg = &mut self.segments[seg_idx];
            if row.subzone >= seg.shadow_price.ncols() {
                return Err(ModelError::config(format!("{} has prices for sub-zone {}",
                                                      path.display(), row.subzone)));
            }
            seg.shadow_price[[zone, row.subzone]] = row.shadow_price;
            num_rows += 1;
        }
        for seg in self.segments.iter_mut() {
            seg.size = &seg.scaled * &seg.shadow_price;
            seg.size.mapv_inplace(|xx| xx.max(0.));
        }
        log::info!("restored {} shadow prices from {}", num_rows, path.display());
        return Ok(());
    }

    /// Replaces the segments with ones saved in a checkpoint.
    pub fn restore_segments(&mut self, segments: Vec<SegmentSizes>) -> Result<(), ModelError> {
        let names_match = segments.len() == self.segments.len() &&
            segments.iter().zip(self.segments.iter()).all(|(aa, bb)| {
                aa.name == bb.name && aa.size.dim() == bb.size.dim()
            });
        if !names_match {
            return Err(ModelError::config(
                "checkpointed shadow prices don't match the configured segments"));
        }
        self.segments = segments;
        return Ok(());
    }
}

#[derive(Serialize, Deserialize)]
struct ShadowPriceRow {
    segment: String,
    zone_id: u32,
    subzone: usize,
    original_size: f64,
    scaled_size: f64,
    shadow_price: f64,
}

/// Choices tallied per segment and (zone, sub-zone) over one pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModeledChoices {
    counts: Vec<Array2<f64>>,
}

impl ModeledChoices {
    pub fn new(num_segments: usize, dims: (usize, usize)) -> ModeledChoices {
        ModeledChoices {
            counts: vec![Array2::zeros(dims); num_segments],
        }
    }

    pub fn add(&mut self, segment: usize, alt: ZoneAlt) {
        self.counts[segment][[alt.zone, alt.subzone]] += 1.;
    }

    pub fn count(&self, segment: usize, alt: ZoneAlt) -> f64 {
        self.counts[segment][[alt.zone, alt.subzone]]
    }

    pub fn segment_total(&self, segment: usize) -> f64 {
        self.counts[segment].sum()
    }

    pub fn counts(&self) -> &[Array2<f64>] {
        &self.counts
    }

    pub fn reset(&mut self) {
        for counts in self.counts.iter_mut() {
            counts.fill(0.);
        }
    }
}

impl Accumulator for ModeledChoices {
    fn merge(&mut self, other: ModeledChoices) {
        if self.counts.is_empty() {
            self.counts = other.counts;
            return;
        }
        for (mine, theirs) in self.counts.iter_mut().zip(other.counts.iter()) {
            *mine += theirs;
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PassDiff {
    pub max_abs_diff: f64,
    pub max_rel_diff: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IterationDiff {
    pub iteration: usize,
    pub max_abs_diff: f64,
    pub max_rel_diff: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceReport {
    pub trajectory: Vec<IterationDiff>,
    pub converged: bool,
}

/// Runs a location choice stage repeatedly, adjusting shadow prices between
/// passes until the modeled choices match the targets.
#[derive(Clone, Debug)]
pub struct ShadowPriceBalancer {
    pub max_iterations: usize,
    pub tolerance: f64,
    pub damping: f64,
    /// where to write the prices after each iteration, suffixed with the
    /// iteration number
    pub output_file: Option<PathBuf>,
}

impl ShadowPriceBalancer {
    /// `pass` runs the stage once over the whole population with the given
    /// sizes and returns the merged choice tallies.  The prices are not
    /// updated after the final pass, so the population's choices always
    /// correspond to the sizes left in the table.
    pub fn run<F>(&self, sizes: &mut SizeTable, cache: &ProbabilityCache, zones: &ZonalData,
                  mut pass: F) -> Result<ConvergenceReport, ModelError>
        where F: FnMut(&SizeTable, usize) -> Result<ModeledChoices, ModelError>
    {
        let mut report = ConvergenceReport::default();
        let max_iterations = self.max_iterations.max(1);
        for iteration in 0..max_iterations {
            let modeled = pass(sizes, iteration)?;
            let diff = sizes.compare(&modeled);
            log::info!("shadow pricing iteration {}: max abs diff {:.4}, max rel diff {:.4}",
                       iteration, diff.max_abs_diff, diff.max_rel_diff);
            sizes.log_error_bands(&modeled);
            report.trajectory.push(IterationDiff {
                iteration,
                max_abs_diff: diff.max_abs_diff,
                max_rel_diff: diff.max_rel_diff,
            });

            if diff.max_rel_diff < self.tolerance {
                report.converged = true;
            } else if iteration + 1 < max_iterations {
                sizes.update_shadow_prices(&modeled, self.damping);
                cache.clear();
            }
            if let Some(output_file) = &self.output_file {
                sizes.save_csv(&iteration_path(output_file, iteration), zones)?;
            }
            if report.converged {
                break;
            }
        }
        if !report.converged {
            log::warn!("shadow pricing did not converge in {} iterations", max_iterations);
        }
        return Ok(report);
    }
}

/// `prices.csv` becomes `prices_3.csv` for iteration 3.
pub fn iteration_path(path: &Path, iteration: usize) -> PathBuf {
    let stem = path.file_stem().map(|ss| ss.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}_{}.{}", stem, iteration, ext.to_string_lossy()),
        None => format!("{}_{}", stem, iteration),
    };
    return path.with_file_name(name);
}

/// Number of persons choosing in each segment, for scaling the targets.
pub fn decision_maker_counts<'a, I>(specs: &[LocationSegmentSpec], person_types: I) -> Vec<f64>
    where I: Iterator<Item = &'a PersonType>
{
    let mut counts = vec![0.; specs.len()];
    let mut by_type = HashMap::new();
    for pt in person_types {
        *by_type.entry(*pt).or_insert(0.) += 1.;
    }
    for (count, spec) in counts.iter_mut().zip(specs.iter()) {
        *count = spec.person_types.iter().map(|pt| by_type.get(pt).unwrap_or(&0.)).sum();
    }
    return counts;
}
