use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};

use super::errors::ModelError;
use super::scheduler::Accumulator;


/// A set of choice models that can be handed from one worker task to the
/// next.
pub trait PooledModel: Send {
    type Totals: Accumulator + Default + Send;

    /// Identifies the instance in log messages.
    fn model_index(&self) -> usize;

    /// Clears everything accumulated over a pass.
    fn reset_pass_state(&mut self);

    /// Hands over what has been accumulated since the last reset.
    fn take_totals(&mut self) -> Self::Totals;
}

type Factory<M> = Box<dyn Fn(usize) -> Result<M, ModelError> + Send + Sync>;

struct PoolState<M> {
    idle: VecDeque<M>,
    num_created: usize,
}

/// Idle model instances shared by the worker tasks.  A task checks an
/// instance out, uses it for its whole range of households, and checks it
/// back in; instances are only created when none is idle.
pub struct ModelPool<M: PooledModel> {
    state: Mutex<PoolState<M>>,
    returned: Condvar,
    max_instances: Option<usize>,
    factory: Factory<M>,
}

impl<M: PooledModel> ModelPool<M> {
    pub fn new<F>(max_instances: Option<usize>, factory: F) -> ModelPool<M>
        where F: Fn(usize) -> Result<M, ModelError> + Send + Sync + 'static
    {
        ModelPool {
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                num_created: 0,
            }),
            returned: Condvar::new(),
            max_instances: max_instances.map(|mi| mi.max(1)),
            factory: Box::new(factory),
        }
    }

    fn lock(&self) -> MutexGuard<PoolState<M>> {
        self.state.lock().unwrap_or_else(|ee| ee.into_inner())
    }

    /// Takes an idle instance, or creates one.  If the pool is bounded and
    /// every instance is checked out, waits for one to be returned.
    pub fn checkout(&self, task_index: usize) -> Result<M, ModelError> {
        let mut state = self.lock();
        loop {
            if let Some(model) = state.idle.pop_front() {
                log::debug!("task {} reuses model instance {}", task_index, model.model_index());
                return Ok(model);
            }
            let at_bound = match self.max_instances {
                Some(max) => state.num_created >= max,
                None => false,
            };
            if !at_bound {
                break;
            }
            state = self.returned.wait(state).unwrap_or_else(|ee| ee.into_inner());
        }

        let index = state.num_created;
        state.num_created += 1;
        // build without holding the lock
        drop(state);
        log::debug!("task {} creates model instance {}", task_index, index);
        match (self.factory)(index) {
            Ok(model) => Ok(model),
            Err(err) => {
                self.lock().num_created -= 1;
                self.returned.notify_one();
                Err(err)
            }
        }
    }

    /// Returns an instance to the pool, clearing its per-pass state first.
    pub fn checkin(&self, mut model: M) {
        model.reset_pass_state();
        self.lock().idle.push_back(model);
        self.returned.notify_one();
    }

    /// Drops every idle instance.
    pub fn clear(&self) {
        let mut state = self.lock();
        let num_idle = state.idle.len();
        state.idle.clear();
        state.num_created -= num_idle;
    }

    pub fn created_count(&self) -> usize {
        self.lock().num_created
    }

    pub fn idle_count(&self) -> usize {
        self.lock().idle.len()
    }
}
