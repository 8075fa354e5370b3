use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::config_utils::{parse_field, Row};
use super::errors::ModelError;
use super::pipeline::ModelStage;
use super::random_streams::{HouseholdStream, RandomStreamManager};
use super::zones::{ZonalData, ZoneAlt};


pub const FIRST_HOUR: u8 = 5;
pub const LAST_HOUR: u8 = 23;
const NUM_HOURS: usize = (LAST_HOUR - FIRST_HOUR + 1) as usize;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PersonType {
    FullTimeWorker,
    PartTimeWorker,
    University,
    NonWorker,
    Retired,
    DrivingStudent,
    NonDrivingStudent,
    Preschool,
}

impl PersonType {
    pub fn all() -> [PersonType; 8] {
        [
            PersonType::FullTimeWorker,
            PersonType::PartTimeWorker,
            PersonType::University,
            PersonType::NonWorker,
            PersonType::Retired,
            PersonType::DrivingStudent,
            PersonType::NonDrivingStudent,
            PersonType::Preschool,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            PersonType::FullTimeWorker => "full_time_worker",
            PersonType::PartTimeWorker => "part_time_worker",
            PersonType::University => "university",
            PersonType::NonWorker => "non_worker",
            PersonType::Retired => "retired",
            PersonType::DrivingStudent => "driving_student",
            PersonType::NonDrivingStudent => "non_driving_student",
            PersonType::Preschool => "preschool",
        }
    }

    pub fn from_name(name: &str) -> Option<PersonType> {
        PersonType::all().iter().find(|pt| pt.name() == name).copied()
    }

    pub fn is_worker(&self) -> bool {
        match self {
            PersonType::FullTimeWorker | PersonType::PartTimeWorker => true,
            _ => false,
        }
    }
}

/// Daily activity pattern: mandatory, non-mandatory, or at home.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActivityPattern {
    Mandatory,
    NonMandatory,
    Home,
}

impl ActivityPattern {
    pub fn from_name(name: &str) -> Option<ActivityPattern> {
        match name {
            "M" => Some(ActivityPattern::Mandatory),
            "N" => Some(ActivityPattern::NonMandatory),
            "H" => Some(ActivityPattern::Home),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TourCategory {
    Mandatory,
    Joint,
    IndividualNonMandatory,
    AtWork,
}

impl TourCategory {
    pub fn name(&self) -> &'static str {
        match self {
            TourCategory::Mandatory => "mandatory",
            TourCategory::Joint => "joint",
            TourCategory::IndividualNonMandatory => "non_mandatory",
            TourCategory::AtWork => "at_work",
        }
    }

    pub fn from_name(name: &str) -> Option<TourCategory> {
        [
            TourCategory::Mandatory,
            TourCategory::Joint,
            TourCategory::IndividualNonMandatory,
            TourCategory::AtWork,
        ]
        .iter()
        .find(|tc| tc.name() == name)
        .copied()
    }
}

/// Which hours of the day a person is already away on a tour.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TimeWindows {
    busy: Vec<bool>,
}

impl TimeWindows {
    pub fn new() -> TimeWindows {
        TimeWindows {
            busy: vec![false; NUM_HOURS],
        }
    }

    /// A window where only the hours from `start` to `end` are free.
    pub fn nested_in(start: u8, end: u8) -> TimeWindows {
        let mut windows = TimeWindows {
            busy: vec![true; NUM_HOURS],
        };
        for hour in start..=end {
            windows.busy[(hour - FIRST_HOUR) as usize] = false;
        }
        windows
    }

    /// Every (start, end) hour pair a tour can take, in the order the time
    /// of day models enumerate their alternatives.
    pub fn alternatives() -> Vec<(u8, u8)> {
        TimeWindows::alternatives_within(FIRST_HOUR, LAST_HOUR)
    }

    /// The hour pairs that lie between `first` and `last`, ordered by start
    /// and then end hour.
    pub fn alternatives_within(first: u8, last: u8) -> Vec<(u8, u8)> {
        let first = first.max(FIRST_HOUR);
        let last = last.min(LAST_HOUR);
        let mut alts = Vec::with_capacity(NUM_HOURS * (NUM_HOURS + 1) / 2);
        for start in first..=last {
            for end in start..=last {
                alts.push((start, end));
            }
        }
        return alts;
    }

    pub fn is_free(&self, start: u8, end: u8) -> bool {
        if start < FIRST_HOUR || end > LAST_HOUR || start > end {
            return false;
        }
        (start..=end).all(|hour| !self.busy[(hour - FIRST_HOUR) as usize])
    }

    pub fn mark_busy(&mut self, start: u8, end: u8) {
        for hour in start.max(FIRST_HOUR)..=end.min(LAST_HOUR) {
            self.busy[(hour - FIRST_HOUR) as usize] = true;
        }
    }

    /// Marks every hour busy that is busy in `other`.
    pub fn add_busy(&mut self, other: &TimeWindows) {
        for (mine, theirs) in self.busy.iter_mut().zip(other.busy.iter()) {
            *mine = *mine || *theirs;
        }
    }

    pub fn num_free_hours(&self) -> usize {
        self.busy.iter().filter(|bb| !**bb).count()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Stop {
    pub id: u8,
    pub outbound: bool,
    pub purpose: String,
    /// zone index of the stop's origin, set by stop location choice.
    pub origin: Option<usize>,
    pub destination: Option<ZoneAlt>,
    pub mode: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Tour {
    pub id: u32,
    pub category: TourCategory,
    pub purpose: String,
    /// person numbers of the participants of a joint tour
    pub participants: Vec<u8>,
    pub parent_tour: Option<u32>,
    pub origin_zone: usize,
    pub destination: Option<ZoneAlt>,
    pub start_hour: Option<u8>,
    pub end_hour: Option<u8>,
    pub mode: Option<String>,
    pub stops: Vec<Stop>,
}

impl Tour {
    pub fn new(id: u32, category: TourCategory, purpose: &str, origin_zone: usize) -> Tour {
        Tour {
            id,
            category,
            purpose: String::from(purpose),
            participants: vec![],
            parent_tour: None,
            origin_zone,
            destination: None,
            start_hour: None,
            end_hour: None,
            mode: None,
            stops: vec![],
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct UsualLocation {
    pub segment: String,
    pub alt: ZoneAlt,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Person {
    pub person_num: u8,
    pub age: u32,
    pub person_type: PersonType,
    pub pattern: Option<ActivityPattern>,
    pub usual_location: Option<UsualLocation>,
    pub windows: TimeWindows,
    pub tours: Vec<Tour>,
}

impl Person {
    pub fn new(person_num: u8, age: u32, person_type: PersonType) -> Person {
        Person {
            person_num,
            age,
            person_type,
            pattern: None,
            usual_location: None,
            windows: TimeWindows::new(),
            tours: vec![],
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Household {
    pub id: u64,
    /// index of the home zone in the zonal data
    pub home_zone: usize,
    pub income: f64,
    pub autos: Option<u8>,
    pub persons: Vec<Person>,
    pub joint_tours: Vec<Tour>,
    pub stream: HouseholdStream,
    pub stage_start_draws: BTreeMap<ModelStage, u64>,
    pub debug: bool,
}

impl Household {
    pub fn new(id: u64, home_zone: usize, income: f64, stream: HouseholdStream) -> Household {
        Household {
            id,
            home_zone,
            income,
            autos: None,
            persons: vec![],
            joint_tours: vec![],
            stream,
            stage_start_draws: BTreeMap::new(),
            debug: false,
        }
    }

    pub fn size(&self) -> usize {
        self.persons.len()
    }

    pub fn num_workers(&self) -> usize {
        self.persons.iter().filter(|pp| pp.person_type.is_worker()).count()
    }

    pub fn num_tours(&self) -> usize {
        let individual: usize = self.persons.iter().map(|pp| pp.tours.len()).sum();
        return individual + self.joint_tours.len();
    }
}


/// Reads the synthetic population.  `households.csv` needs the columns
/// `hh_id`, `home_zone` and `income`; `persons.csv` needs `hh_id`,
/// `person_num`, `age` and `person_type`.  Households keep their file order
/// and persons are sorted by person number.
pub fn load_population(households_path: &Path, persons_path: &Path, zones: &ZonalData,
                       streams: &RandomStreamManager, trace_households: &HashSet<u64>)
                       -> Result<Vec<Household>, ModelError> {
    let file = File::open(households_path).map_err(|ee| ModelError::io(households_path, ee))?;
    let mut reader = csv::Reader::from_reader(file);
    let mut households = vec![];
    let mut hh_index: HashMap<u64, usize> = HashMap::new();
    for result in reader.deserialize() {
        let row: Row = result?;
        let id: u64 = parse_field(&row, "hh_id", households_path)?;
        let zone_id: u32 = parse_field(&row, "home_zone", households_path)?;
        let home_zone = match zones.index_of(zone_id) {
            Some(zi) => zi,
            None => {
                return Err(ModelError::config(format!(
                    "household {} has unknown home zone {}", id, zone_id)));
            }
        };
        let income: f64 = parse_field(&row, "income", households_path)?;
        if hh_index.insert(id, households.len()).is_some() {
            return Err(ModelError::config(format!("duplicate household id {}", id)));
        }
        let mut household = Household::new(id, home_zone, income, streams.stream_for(id));
        household.debug = trace_households.contains(&id);
        households.push(household);
    }

    let file = File::open(persons_path).map_err(|ee| ModelError::io(persons_path, ee))?;
    let mut reader = csv::Reader::from_reader(file);
    for result in reader.deserialize() {
        let row: Row = result?;
        let hh_id: u64 = parse_field(&row, "hh_id", persons_path)?;
        let person_num: u8 = parse_field(&row, "person_num", persons_path)?;
        let age: u32 = parse_field(&row, "age", persons_path)?;
        let type_name: String = parse_field(&row, "person_type", persons_path)?;
        let person_type = PersonType::from_name(&type_name).ok_or_else(|| {
            ModelError::config(format!("unknown person type '{}' in {}",
                                       type_name, persons_path.display()))
        })?;
        let hh_idx = *hh_index.get(&hh_id).ok_or_else(|| {
            ModelError::config(format!("person {} refers to unknown household {}",
                                       person_num, hh_id))
        })?;
        households[hh_idx].persons.push(Person::new(person_num, age, person_type));
    }

    for household in households.iter_mut() {
        household.persons.sort_by_key(|pp| pp.person_num);
        if household.persons.is_empty() {
            return Err(ModelError::config(format!("household {} has no persons", household.id)));
        }
    }

    log::info!("loaded {} households with {} persons", households.len(),
               households.iter().map(|hh| hh.size()).sum::<usize>());
    return Ok(households);
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;
    use super::super::test_utils;

    #[test]
    fn test_time_window_alternatives() {
        let alts = TimeWindows::alternatives();
        assert_eq!(alts.len(), 190);
        assert_eq!(alts[0], (5, 5));
        assert_eq!(alts[alts.len() - 1], (23, 23));

        let within = TimeWindows::alternatives_within(12, 14);
        assert_eq!(within, vec![(12, 12), (12, 13), (12, 14), (13, 13), (13, 14), (14, 14)]);
        assert_eq!(TimeWindows::alternatives_within(3, 30), alts);
    }

    #[test]
    fn test_time_windows_busy() {
        let mut windows = TimeWindows::new();
        assert!(windows.is_free(8, 17));
        windows.mark_busy(8, 17);
        assert!(!windows.is_free(7, 8));
        assert!(!windows.is_free(12, 12));
        assert!(windows.is_free(18, 23));
        assert!(windows.is_free(5, 7));
        assert_eq!(windows.num_free_hours(), 9);
        assert!(!windows.is_free(9, 8));

        let nested = TimeWindows::nested_in(9, 16);
        assert!(nested.is_free(9, 16));
        assert!(!nested.is_free(8, 9));
        assert_eq!(nested.num_free_hours(), 8);
    }

    #[test]
    fn test_person_type_names() {
        for pt in PersonType::all().iter() {
            assert_eq!(PersonType::from_name(pt.name()), Some(*pt));
        }
        assert_eq!(PersonType::from_name("astronaut"), None);
    }

    #[test]
    fn test_load_population() {
        let dir = tempdir().unwrap();
        let hh_path = dir.path().join("households.csv");
        let mut file = File::create(&hh_path).unwrap();
        writeln!(file, "hh_id,home_zone,income").unwrap();
        writeln!(file, "7,102,55000").unwrap();
        writeln!(file, "3,101,20000").unwrap();
        let pp_path = dir.path().join("persons.csv");
        let mut file = File::create(&pp_path).unwrap();
        writeln!(file, "hh_id,person_num,age,person_type").unwrap();
        writeln!(file, "7,2,8,non_driving_student").unwrap();
        writeln!(file, "7,1,40,full_time_worker").unwrap();
        writeln!(file, "3,1,70,retired").unwrap();

        let zones = test_utils::make_zones(&[101, 102], 2);
        let streams = RandomStreamManager::new(4);
        let mut trace = HashSet::new();
        trace.insert(3);
        let households = load_population(&hh_path, &pp_path, &zones, &streams, &trace).unwrap();

        assert_eq!(households.len(), 2);
        assert_eq!(households[0].id, 7);
        assert_eq!(households[0].home_zone, 1);
        assert_eq!(households[0].persons[0].person_num, 1);
        assert_eq!(households[0].persons[1].person_type, PersonType::NonDrivingStudent);
        assert_eq!(households[0].num_workers(), 1);
        assert!(!households[0].debug);
        assert!(households[1].debug);
        assert_eq!(households[1].stream, streams.stream_for(3));
    }

    #[test]
    fn test_load_population_unknown_zone() {
        let dir = tempdir().unwrap();
        let hh_path = dir.path().join("households.csv");
        let mut file = File::create(&hh_path).unwrap();
        writeln!(file, "hh_id,home_zone,income").unwrap();
        writeln!(file, "1,999,1000").unwrap();
        let pp_path = dir.path().join("persons.csv");
        let mut file = File::create(&pp_path).unwrap();
        writeln!(file, "hh_id,person_num,age,person_type").unwrap();

        let zones = test_utils::make_zones(&[101, 102], 1);
        let result = load_population(&hh_path, &pp_path, &zones, &RandomStreamManager::new(0),
                                     &HashSet::new());
        match result {
            Err(ModelError::Config(msg)) => assert!(msg.contains("999")),
            other => panic!("expected a config error, got {:?}", other),
        }
    }
}
