use rand::Rng;
use rand::SeedableRng;
use rand_isaac::Isaac64Rng;
use serde::{Deserialize, Serialize};

use super::pipeline::ModelStage;
use super::population::Household;


/// The serialized form of a stream.  The generator state itself is never
/// written out: it is rebuilt by reseeding and replaying `count` draws.
#[derive(Serialize, Deserialize, Clone, Debug)]
struct StreamState {
    seed: u64,
    count: u64,
}

/// A reproducible random number stream owned by one household.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(from = "StreamState", into = "StreamState")]
pub struct HouseholdStream {
    seed: u64,
    count: u64,
    rng: Isaac64Rng,
}

impl HouseholdStream {
    pub fn new(base_seed: u64, household_id: u64) -> HouseholdStream {
        let seed = base_seed.wrapping_add(household_id);
        HouseholdStream {
            seed,
            count: 0,
            rng: Isaac64Rng::seed_from_u64(seed),
        }
    }

    /// Returns the next number in [0, 1) and counts the draw.
    pub fn draw(&mut self) -> f64 {
        self.count += 1;
        return self.rng.gen::<f64>();
    }

    pub fn draw_count(&self) -> u64 {
        self.count
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Reseed and replay draws until exactly `count` have been consumed.
    pub fn replay_to(&mut self, count: u64) {
        self.rng = Isaac64Rng::seed_from_u64(self.seed);
        for _ in 0..count {
            self.rng.gen::<f64>();
        }
        self.count = count;
    }
}

impl From<StreamState> for HouseholdStream {
    fn from(state: StreamState) -> HouseholdStream {
        let mut stream = HouseholdStream {
            seed: state.seed,
            count: 0,
            rng: Isaac64Rng::seed_from_u64(state.seed),
        };
        stream.replay_to(state.count);
        stream
    }
}

impl From<HouseholdStream> for StreamState {
    fn from(stream: HouseholdStream) -> StreamState {
        StreamState {
            seed: stream.seed,
            count: stream.count,
        }
    }
}

// two streams are the same stream at the same position if they share a seed
// and a draw count; the generator state follows from those.
impl PartialEq for HouseholdStream {
    fn eq(&self, other: &Self) -> bool {
        self.seed == other.seed && self.count == other.count
    }
}


/// Hands out household streams and moves them between model stages.
///
/// Households own their streams, so these operations take the household
/// rather than looking it up by id: a household is only ever borrowed by
/// the one worker task that owns its partition.
#[derive(Clone, Debug)]
pub struct RandomStreamManager {
    base_seed: u64,
}

impl RandomStreamManager {
    pub fn new(base_seed: u64) -> RandomStreamManager {
        RandomStreamManager { base_seed }
    }

    pub fn base_seed(&self) -> u64 {
        self.base_seed
    }

    pub fn stream_for(&self, household_id: u64) -> HouseholdStream {
        HouseholdStream::new(self.base_seed, household_id)
    }

    pub fn draw(&self, household: &mut Household) -> f64 {
        household.stream.draw()
    }

    pub fn draw_count(&self, household: &Household) -> u64 {
        household.stream.draw_count()
    }

    /// Marks the start of a stage for this household.  The first entry
    /// records the current draw count; entering the same stage again (a new
    /// shadow pricing iteration) rewinds the stream to that count so every
    /// pass over the stage sees the same numbers.
    pub fn enter_stage(&self, household: &mut Household, stage: ModelStage) {
        match household.stage_start_draws.get(&stage) {
            Some(&count) => household.stream.replay_to(count),
            None => {
                let count = household.stream.draw_count();
                household.stage_start_draws.insert(stage, count);
            }
        }
    }

    /// Put the household's stream back where it stood when `stage` began.
    /// If the stage has not been entered yet (a checkpoint taken at the
    /// boundary before it) the current count is the stage's starting count.
    /// Records for later stages are dropped since they no longer apply.
    pub fn reset_to_stage(&self, household: &mut Household, stage: ModelStage) {
        let count = match household.stage_start_draws.get(&stage) {
            Some(&count) => count,
            None => household.stream.draw_count(),
        };
        household.stage_start_draws.retain(|ss, _| *ss < stage);
        household.stream.replay_to(count);
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use super::super::test_utils;

    #[test]
    fn test_same_seed_same_draws() {
        let mut aa = HouseholdStream::new(100, 7);
        let mut bb = HouseholdStream::new(100, 7);
        for _ in 0..50 {
            let rn = aa.draw();
            assert!(rn >= 0. && rn < 1.);
            assert_eq!(rn, bb.draw());
        }
        assert_eq!(aa.draw_count(), 50);

        let mut cc = HouseholdStream::new(100, 8);
        let same = (0..10).filter(|_| aa.draw() == cc.draw()).count();
        assert!(same < 10);
    }

    #[test]
    fn test_replay_continues_sequence() {
        let mut uninterrupted = HouseholdStream::new(1, 3);
        let mut draws = vec![];
        for _ in 0..20 {
            draws.push(uninterrupted.draw());
        }

        let mut resumed = HouseholdStream::new(1, 3);
        resumed.replay_to(12);
        for ii in 12..20 {
            assert_eq!(resumed.draw(), draws[ii]);
        }
    }

    #[test]
    fn test_serialized_stream_resumes() {
        let mut stream = HouseholdStream::new(5, 11);
        for _ in 0..9 {
            stream.draw();
        }
        let bytes = bincode::serialize(&stream).unwrap();
        let mut restored: HouseholdStream = bincode::deserialize(&bytes).unwrap();
        assert_eq!(restored, stream);
        assert_eq!(restored.draw(), stream.draw());
    }

    #[test]
    fn test_enter_stage_rewinds_on_reentry() {
        let manager = RandomStreamManager::new(10);
        let mut hh = test_utils::make_household(&manager, 1, 0, &[40]);
        hh.stream.draw();

        manager.enter_stage(&mut hh, ModelStage::UsualLocation);
        let first: Vec<f64> = (0..3).map(|_| manager.draw(&mut hh)).collect();
        assert_eq!(manager.draw_count(&hh), 4);

        manager.enter_stage(&mut hh, ModelStage::UsualLocation);
        assert_eq!(manager.draw_count(&hh), 1);
        let second: Vec<f64> = (0..3).map(|_| manager.draw(&mut hh)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_reset_to_stage_drops_later_stages() {
        let manager = RandomStreamManager::new(10);
        let mut hh = test_utils::make_household(&manager, 2, 0, &[40]);
        manager.enter_stage(&mut hh, ModelStage::AutoOwnership);
        manager.draw(&mut hh);
        manager.enter_stage(&mut hh, ModelStage::DailyActivityPattern);
        manager.draw(&mut hh);
        manager.draw(&mut hh);

        manager.reset_to_stage(&mut hh, ModelStage::DailyActivityPattern);
        assert_eq!(manager.draw_count(&hh), 1);
        assert!(hh.stage_start_draws.contains_key(&ModelStage::AutoOwnership));
        assert!(!hh.stage_start_draws.contains_key(&ModelStage::DailyActivityPattern));

        manager.reset_to_stage(&mut hh, ModelStage::AutoOwnership);
        assert_eq!(manager.draw_count(&hh), 0);
    }
}
