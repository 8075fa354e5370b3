use std::collections::HashMap;

use ndarray::prelude::*;
use yaml_rust::YamlLoader;

use super::geometry::Point2d;
use super::pipeline::{ModelStage, PassContext};
use super::population::{Household, Person, PersonType};
use super::random_streams::RandomStreamManager;
use super::sample_of_alternatives::ProbabilityCache;
use super::shadow_price::SizeTable;
use super::utility::ModelSpecs;
use super::zones::{DistanceSkims, ZonalData};


/// A household of persons of the given ages, numbered from 1.
pub fn make_household(streams: &RandomStreamManager, id: u64, home_zone: usize, ages: &[u32])
                      -> Household {
    let mut household = Household::new(id, home_zone, 40000., streams.stream_for(id));
    for (ii, age) in ages.iter().enumerate() {
        let person_type = match *age {
            0..=5 => PersonType::Preschool,
            6..=15 => PersonType::NonDrivingStudent,
            16..=17 => PersonType::DrivingStudent,
            18..=64 => PersonType::FullTimeWorker,
            _ => PersonType::Retired,
        };
        household.persons.push(Person::new(ii as u8 + 1, *age, person_type));
    }
    return household;
}

/// Zones with `employment`, `households` and `enrollment` attributes.  Every
/// fourth zone, starting with the fourth, has no employment.
pub fn make_zones(zone_ids: &[u32], num_subzones: usize) -> ZonalData {
    let num_zones = zone_ids.len();
    let employment = [100., 50., 20., 0.];
    let enrollment = [0., 80., 0., 40.];
    let centroids = (0..num_zones).map(|ii| {
        Point2d::new(3. * ii as f64, (ii % 2) as f64 * 4.)
    }).collect();
    let mut attributes = HashMap::new();
    attributes.insert(String::from("employment"),
                      Array1::from_shape_fn(num_zones, |ii| employment[ii % 4]));
    attributes.insert(String::from("households"),
                      Array1::from_shape_fn(num_zones, |ii| 30. + 10. * ii as f64));
    attributes.insert(String::from("enrollment"),
                      Array1::from_shape_fn(num_zones, |ii| enrollment[ii % 4]));
    let total: f64 = (1..=num_subzones).map(|ss| ss as f64).sum();
    let shares = Array2::from_shape_fn((num_zones, num_subzones), |(_, ss)| {
        (ss + 1) as f64 / total
    });
    ZonalData::new(zone_ids.to_vec(), centroids, attributes, shares).unwrap()
}

pub fn make_skims(zones: &ZonalData) -> DistanceSkims {
    let mut speeds = HashMap::new();
    speeds.insert(String::from("auto"), 40.);
    speeds.insert(String::from("walk"), 5.);
    DistanceSkims::new(zones, 1.2, speeds, 1.5).unwrap()
}

pub const FIXTURE_SPECS: &str = "
usual_location:
  - name: work
    person_types: [full_time_worker, part_time_worker]
    size: {employment: 1.0}
    sample_utility: {distance: -0.3, log_size: 1.0}
    utility: {distance: -0.5, log_size: 1.0}
  - name: school
    person_types: [university, driving_student, non_driving_student]
    size: {enrollment: 1.0}
    sample_utility: {distance: -0.3, log_size: 1.0}
    utility: {distance: -0.6, log_size: 1.0}
tour_destination:
  - name: shop
    size: {employment: 1.0, households: 0.2}
    sample_utility: {distance: -0.5, log_size: 1.0}
    utility: {distance: -0.8, log_size: 1.0}
  - name: eat
    size: {employment: 1.0}
    sample_utility: {distance: -0.5, log_size: 1.0}
    utility: {distance: -1.0, log_size: 1.0}
stop_location:
  - name: errand
    size: {employment: 1.0, households: 0.5}
    sample_utility: {distance: -0.5, log_size: 1.0}
    utility: {distance: -0.7, log_size: 1.0}
auto_ownership:
  - {name: zero, value: 0, utility: {constant: 0}}
  - {name: one, value: 1, utility: {constant: 0.5, income_k: 0.01}}
  - {name: two, value: 2, utility: {constant: -0.5, workers: 0.8}}
daily_activity_pattern:
  - name: M
    person_types: [full_time_worker, part_time_worker, university, driving_student, non_driving_student]
    utility: {constant: 1.5}
  - {name: N, utility: {constant: 0.5}}
  - {name: H, utility: {constant: 0}}
mandatory_tour_frequency:
  - {name: one, value: 1, utility: {constant: 1}}
  - {name: two, value: 2, utility: {constant: -1}}
at_work_subtour_frequency:
  - {name: none, utility: {constant: 0.5}}
  - {name: eat, tours: [eat], utility: {constant: 0}}
joint_tour_frequency:
  - {name: none, utility: {constant: 0}}
  - {name: shop, tours: [shop], utility: {constant: 0.2}}
joint_participation:
  - {name: join, value: 1, utility: {constant: 0.5}}
  - {name: skip, value: 0, utility: {constant: 0}}
non_mandatory_tour_frequency:
  - {name: none, utility: {constant: 0}}
  - {name: shop, tours: [shop], utility: {constant: 0.3}}
  - {name: shop_eat, tours: [shop, eat], utility: {constant: -0.2}}
tour_mode_choice:
  - {name: auto, utility: {constant: 0.5, travel_time: -0.05}}
  - {name: walk, utility: {travel_time: -0.1}}
stop_frequency:
  - {name: none, utility: {constant: 0.5}}
  - {name: out1, outbound_stops: [errand], utility: {constant: 0}}
  - name: out1_in1
    outbound_stops: [errand]
    inbound_stops: [errand]
    utility: {constant: -0.3}
trip_mode_choice:
  - {name: auto, utility: {travel_time: -0.05}}
  - {name: walk, utility: {travel_time: -0.1}}
time_of_day:
  mandatory: {start_hour: 0.1, duration: 0.3}
  joint: {duration: -0.1}
  non_mandatory: {duration: -0.2}
  at_work: {duration: -0.5}
";

/// Everything a `PassContext` borrows, over four zones with two sub-zones.
pub struct ModelFixture {
    pub specs: ModelSpecs,
    pub zones: ZonalData,
    pub skims: DistanceSkims,
    pub usual_sizes: SizeTable,
    pub tour_sizes: SizeTable,
    pub stop_sizes: SizeTable,
    pub cache: ProbabilityCache,
    pub streams: RandomStreamManager,
}

impl ModelFixture {
    pub fn new() -> ModelFixture {
        let docs = YamlLoader::load_from_str(FIXTURE_SPECS).unwrap();
        let specs = ModelSpecs::from_yaml(&docs[0]).unwrap();
        let zones = make_zones(&[1, 2, 3, 4], 2);
        let skims = make_skims(&zones);
        ModelFixture {
            usual_sizes: SizeTable::from_specs(&specs.usual_location, &zones).unwrap(),
            tour_sizes: SizeTable::from_specs(&specs.tour_destination, &zones).unwrap(),
            stop_sizes: SizeTable::from_specs(&specs.stop_location, &zones).unwrap(),
            specs,
            zones,
            skims,
            cache: ProbabilityCache::new(),
            streams: RandomStreamManager::new(17),
        }
    }

    pub fn context(&self, stage: ModelStage) -> PassContext {
        PassContext {
            stage,
            specs: &self.specs,
            universe: self.zones.universe(),
            skims: &self.skims,
            usual_sizes: &self.usual_sizes,
            tour_sizes: &self.tour_sizes,
            stop_sizes: &self.stop_sizes,
            cache: &self.cache,
            streams: &self.streams,
            sample_size: 5,
        }
    }
}
