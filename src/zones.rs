use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

use super::config_utils::{parse_field, Row};
use super::errors::ModelError;
use super::geometry::{euclidean_distances, Point2d};


const SUBZONE_SHARE_PREFIX: &str = "subzone_share_";

/// One destination alternative: a zone index and a sub-zone within it.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ZoneAlt {
    pub zone: usize,
    pub subzone: usize,
}

impl ZoneAlt {
    pub fn new(zone: usize, subzone: usize) -> ZoneAlt {
        ZoneAlt { zone, subzone }
    }
}

/// Enumerates every (zone, sub-zone) pair as a flat index.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AlternativeUniverse {
    num_zones: usize,
    num_subzones: usize,
}

impl AlternativeUniverse {
    pub fn new(num_zones: usize, num_subzones: usize) -> AlternativeUniverse {
        AlternativeUniverse { num_zones, num_subzones }
    }

    pub fn len(&self) -> usize {
        self.num_zones * self.num_subzones
    }

    pub fn num_zones(&self) -> usize {
        self.num_zones
    }

    pub fn num_subzones(&self) -> usize {
        self.num_subzones
    }

    pub fn index(&self, alt: ZoneAlt) -> usize {
        alt.zone * self.num_subzones + alt.subzone
    }

    pub fn alt(&self, index: usize) -> ZoneAlt {
        ZoneAlt::new(index / self.num_subzones, index % self.num_subzones)
    }
}

/// Zone centroids, land-use attributes and how each zone's attributes split
/// across its sub-zones.
#[derive(Clone, Debug)]
pub struct ZonalData {
    zone_ids: Vec<u32>,
    index_of: HashMap<u32, usize>,
    centroids: Vec<Point2d>,
    attributes: HashMap<String, Array1<f64>>,
    subzone_shares: Array2<f64>,
}

impl ZonalData {
    pub fn new(zone_ids: Vec<u32>, centroids: Vec<Point2d>,
               attributes: HashMap<String, Array1<f64>>, subzone_shares: Array2<f64>)
               -> Result<ZonalData, ModelError> {
        let num_zones = zone_ids.len();
        if num_zones == 0 {
            return Err(ModelError::config("zonal data has no zones"));
        }
        if centroids.len() != num_zones || subzone_shares.nrows() != num_zones {
            return Err(ModelError::config("zonal arrays disagree on the number of zones"));
        }
        if let Some((name, _)) = attributes.iter().find(|(_, vals)| vals.len() != num_zones) {
            return Err(ModelError::config(format!("attribute {} has the wrong length", name)));
        }
        let mut index_of = HashMap::new();
        for (ii, id) in zone_ids.iter().enumerate() {
            if index_of.insert(*id, ii).is_some() {
                return Err(ModelError::config(format!("duplicate zone id {}", id)));
            }
        }
        Ok(ZonalData {
            zone_ids,
            index_of,
            centroids,
            attributes,
            subzone_shares,
        })
    }

    /// Reads `zone_id`, `x`, `y`, any number of size attribute columns and
    /// `subzone_share_<s>` for each sub-zone.  A file without share columns
    /// splits each zone evenly.
    pub fn from_csv(path: &Path, num_subzones: usize) -> Result<ZonalData, ModelError> {
        if num_subzones == 0 {
            return Err(ModelError::config("Zones.NumSubZones must be at least 1"));
        }
        let file = File::open(path).map_err(|ee| ModelError::io(path, ee))?;
        let mut reader = csv::Reader::from_reader(file);
        let headers: Vec<String> = reader.headers()?.iter().map(String::from).collect();
        let attribute_names: Vec<&String> = headers.iter()
            .filter(|hh| !["zone_id", "x", "y"].contains(&hh.as_str()) &&
                         !hh.starts_with(SUBZONE_SHARE_PREFIX))
            .collect();
        let has_shares = headers.iter().any(|hh| hh.starts_with(SUBZONE_SHARE_PREFIX));

        let mut zone_ids = vec![];
        let mut centroids = vec![];
        let mut attribute_cols: Vec<Vec<f64>> = vec![vec![]; attribute_names.len()];
        let mut share_rows: Vec<f64> = vec![];
        for result in reader.deserialize() {
            let row: Row = result?;
            zone_ids.push(parse_field(&row, "zone_id", path)?);
            centroids.push(Point2d::new(parse_field(&row, "x", path)?,
                                        parse_field(&row, "y", path)?));
            for (col, name) in attribute_cols.iter_mut().zip(attribute_names.iter()) {
                col.push(parse_field(&row, name, path)?);
            }
            for ss in 0..num_subzones {
                let share = if has_shares {
                    parse_field(&row, &format!("{}{}", SUBZONE_SHARE_PREFIX, ss), path)?
                } else {
                    1. / num_subzones as f64
                };
                if share < 0. {
                    return Err(ModelError::config(format!(
                        "negative sub-zone share in {}", path.display())));
                }
                share_rows.push(share);
            }
        }

        let num_zones = zone_ids.len();
        let subzone_shares = Array2::from_shape_vec((num_zones, num_subzones), share_rows)
            .map_err(|ee| ModelError::config(format!("bad sub-zone shares: {}", ee)))?;
        let attributes = attribute_names.into_iter().cloned()
            .zip(attribute_cols.into_iter().map(Array1::from))
            .collect();
        log::info!("loaded {} zones with {} sub-zones each", num_zones, num_subzones);
        return ZonalData::new(zone_ids, centroids, attributes, subzone_shares);
    }

    pub fn num_zones(&self) -> usize {
        self.zone_ids.len()
    }

    pub fn num_subzones(&self) -> usize {
        self.subzone_shares.ncols()
    }

    pub fn universe(&self) -> AlternativeUniverse {
        AlternativeUniverse::new(self.num_zones(), self.num_subzones())
    }

    pub fn zone_id(&self, index: usize) -> u32 {
        self.zone_ids[index]
    }

    pub fn index_of(&self, zone_id: u32) -> Option<usize> {
        self.index_of.get(&zone_id).copied()
    }

    pub fn centroids(&self) -> &[Point2d] {
        &self.centroids
    }

    pub fn attribute(&self, name: &str) -> Option<&Array1<f64>> {
        self.attributes.get(name)
    }

    pub fn subzone_shares(&self) -> &Array2<f64> {
        &self.subzone_shares
    }
}


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimePeriod {
    EarlyAm,
    AmPeak,
    Midday,
    PmPeak,
    Evening,
}

impl TimePeriod {
    pub fn from_hour(hour: u8) -> TimePeriod {
        match hour {
            0..=5 => TimePeriod::EarlyAm,
            6..=9 => TimePeriod::AmPeak,
            10..=14 => TimePeriod::Midday,
            15..=18 => TimePeriod::PmPeak,
            _ => TimePeriod::Evening,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TimePeriod::EarlyAm => "EA",
            TimePeriod::AmPeak => "AM",
            TimePeriod::Midday => "MD",
            TimePeriod::PmPeak => "PM",
            TimePeriod::Evening => "EV",
        }
    }

    pub fn is_peak(&self) -> bool {
        *self == TimePeriod::AmPeak || *self == TimePeriod::PmPeak
    }
}

/// Zone-to-zone travel attributes.  Implementations are queried from every
/// worker thread at once.
pub trait SkimProvider: Send + Sync {
    fn distance(&self, origin: usize, destination: usize) -> f64;

    /// Travel time in minutes by `mode` when departing in `period`.
    fn travel_value(&self, origin: usize, destination: usize, mode: &str, period: TimePeriod)
                    -> f64;

    fn supports_mode(&self, _mode: &str) -> bool {
        true
    }
}

/// Skims derived from straight-line distances between zone centroids.
/// Modes whose name starts with "auto" are slowed down by the congestion
/// factor in the peak periods.
pub struct DistanceSkims {
    distances: Array2<f64>,
    speeds: HashMap<String, f64>,
    congestion_factor: f64,
}

impl DistanceSkims {
    pub fn new(zones: &ZonalData, beeline_factor: f64, speeds: HashMap<String, f64>,
               congestion_factor: f64) -> Result<DistanceSkims, ModelError> {
        if let Some((mode, _)) = speeds.iter().find(|(_, speed)| **speed <= 0.) {
            return Err(ModelError::config(format!("speed for mode {} must be positive", mode)));
        }
        Ok(DistanceSkims {
            distances: euclidean_distances(zones.centroids(), beeline_factor),
            speeds,
            congestion_factor,
        })
    }
}

impl SkimProvider for DistanceSkims {
    fn distance(&self, origin: usize, destination: usize) -> f64 {
        self.distances[[origin, destination]]
    }

    fn travel_value(&self, origin: usize, destination: usize, mode: &str, period: TimePeriod)
                    -> f64 {
        let speed = match self.speeds.get(mode) {
            Some(speed) => *speed,
            None => return f64::INFINITY,
        };
        let mut minutes = self.distance(origin, destination) / speed * 60.;
        if period.is_peak() && mode.starts_with("auto") {
            minutes *= self.congestion_factor;
        }
        return minutes;
    }

    fn supports_mode(&self, mode: &str) -> bool {
        self.speeds.contains_key(mode)
    }
}
