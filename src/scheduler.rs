use std::ops::Range;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use super::errors::ModelError;
use super::model_pool::{ModelPool, PooledModel};
use super::population::Household;


/// Per-pass values that are summed over worker tasks.
pub trait Accumulator {
    fn merge(&mut self, other: Self);
}

/// Splits `0..num_items` into at most `num_parts` contiguous, non-overlapping
/// ranges whose lengths differ by at most one.  The ranges cover every index
/// in order.
pub fn partition_ranges(num_items: usize, num_parts: usize) -> Vec<Range<usize>> {
    let num_parts = num_parts.max(1).min(num_items.max(1));
    let base = num_items / num_parts;
    let extra = num_items % num_parts;
    let mut ranges = Vec::with_capacity(num_parts);
    let mut start = 0;
    for ii in 0..num_parts {
        let len = base + if ii < extra { 1 } else { 0 };
        ranges.push(start..start + len);
        start += len;
    }
    return ranges;
}

/// Runs passes over the population on a fixed number of worker threads, one
/// task per contiguous range of households.
pub struct TaskScheduler {
    thread_pool: ThreadPool,
    num_partitions: usize,
}

impl TaskScheduler {
    /// A `num_threads` of 0 lets rayon pick one thread per core.
    pub fn new(num_threads: usize, num_partitions: usize) -> Result<TaskScheduler, ModelError> {
        let thread_pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|ii| format!("model-worker-{}", ii))
            .build()
            .map_err(|ee| ModelError::config(format!("could not start worker threads: {}", ee)))?;
        Ok(TaskScheduler {
            thread_pool,
            num_partitions: num_partitions.max(1),
        })
    }

    pub fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    /// Applies `process` to every household.  Each task checks one model
    /// instance out of `pool`, processes its households in index order, and
    /// checks the instance back in.  The tasks' totals are merged in task
    /// order.  If any task fails the pass fails with the error of the first
    /// failed task, and no totals are returned.
    pub fn run_pass<M, F>(&self, households: &mut [Household], pool: &ModelPool<M>, process: F)
                          -> Result<M::Totals, ModelError>
        where M: PooledModel,
              F: Fn(&mut M, &mut Household) -> Result<(), ModelError> + Sync,
    {
        let ranges = partition_ranges(households.len(), self.num_partitions);
        let mut chunks: Vec<(usize, &mut [Household])> = Vec::with_capacity(ranges.len());
        let mut rest = households;
        for range in ranges.iter() {
            let (chunk, tail) = std::mem::take(&mut rest).split_at_mut(range.len());
            chunks.push((range.start, chunk));
            rest = tail;
        }

        let results: Vec<Result<M::Totals, ModelError>> = self.thread_pool.install(|| {
            chunks.into_par_iter().enumerate().map(|(task_index, (first, chunk))| {
                let mut model = pool.checkout(task_index).map_err(|err| {
                    task_failed(task_index, first, err)
                })?;
                model.reset_pass_state();
                for household in chunk.iter_mut() {
                    if let Err(err) = process(&mut model, household) {
                        pool.checkin(model);
                        return Err(task_failed(task_index, first, err));
                    }
                }
                let totals = model.take_totals();
                pool.checkin(model);
                Ok(totals)
            }).collect()
        });

        let mut merged = <M::Totals as Default>::default();
        for result in results {
            merged.merge(result?);
        }
        return Ok(merged);
    }
}

fn task_failed(task_index: usize, first_household: usize, err: ModelError) -> ModelError {
    log::error!("task {} (households from index {}) failed: {}", task_index, first_household,
                err);
    ModelError::TaskFailed {
        task_index,
        first_household,
        source: Box::new(err),
    }
}
