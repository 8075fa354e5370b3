use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;

use yaml_rust::Yaml;
use yaml_rust::YamlLoader;

use super::errors::ModelError;


// A convenience type for parsing csv data
pub type Row = HashMap<String, String>;

pub fn str_to_absolute_path(path_str: &str, default_base_dir: &Path) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        return path;
    } else {
        return [default_base_dir, Path::new(&path)].iter().collect();
    }
}

/// Parses the first document of a yaml file.
pub fn load_yaml(path: &Path) -> Result<Yaml, ModelError> {
    let contents = fs::read_to_string(path).map_err(|ee| ModelError::io(path, ee))?;
    let mut docs = YamlLoader::load_from_str(&contents).map_err(|ee| {
        ModelError::config(format!("failed to parse {} as yaml: {}", path.display(), ee))
    })?;
    if docs.is_empty() {
        return Err(ModelError::config(format!("{} is empty", path.display())));
    }
    return Ok(docs.swap_remove(0));
}

/// Reads a number, accepting yaml integers where a float is expected.
pub fn yaml_as_f64(value: &Yaml) -> Option<f64> {
    match value {
        Yaml::Real(_) => value.as_f64(),
        Yaml::Integer(ii) => Some(*ii as f64),
        _ => None,
    }
}

pub fn optional_f64(yaml_cfg: &Yaml, key: &str) -> Result<Option<f64>, ModelError> {
    let value = &yaml_cfg[key];
    if value.is_badvalue() {
        return Ok(None);
    }
    match yaml_as_f64(value) {
        Some(vv) => Ok(Some(vv)),
        None => Err(ModelError::config(format!("{} should be a number", key))),
    }
}

pub fn optional_i64(yaml_cfg: &Yaml, key: &str) -> Result<Option<i64>, ModelError> {
    let value = &yaml_cfg[key];
    if value.is_badvalue() {
        return Ok(None);
    }
    match value.as_i64() {
        Some(vv) => Ok(Some(vv)),
        None => Err(ModelError::config(format!("{} should be an integer", key))),
    }
}

pub fn required_i64(yaml_cfg: &Yaml, key: &str) -> Result<i64, ModelError> {
    optional_i64(yaml_cfg, key)?.ok_or_else(|| missing(key))
}

/// Reads a non-negative integer.
pub fn optional_usize(yaml_cfg: &Yaml, key: &str) -> Result<Option<usize>, ModelError> {
    match optional_i64(yaml_cfg, key)? {
        Some(vv) if vv < 0 => Err(ModelError::config(format!("{} must not be negative", key))),
        Some(vv) => Ok(Some(vv as usize)),
        None => Ok(None),
    }
}

pub fn required_usize(yaml_cfg: &Yaml, key: &str) -> Result<usize, ModelError> {
    optional_usize(yaml_cfg, key)?.ok_or_else(|| missing(key))
}

pub fn optional_bool(yaml_cfg: &Yaml, key: &str) -> Result<Option<bool>, ModelError> {
    let value = &yaml_cfg[key];
    if value.is_badvalue() {
        return Ok(None);
    }
    match value.as_bool() {
        Some(vv) => Ok(Some(vv)),
        None => Err(ModelError::config(format!("{} should be true or false", key))),
    }
}

pub fn optional_str<'a>(yaml_cfg: &'a Yaml, key: &str) -> Result<Option<&'a str>, ModelError> {
    let value = &yaml_cfg[key];
    if value.is_badvalue() {
        return Ok(None);
    }
    match value.as_str() {
        Some(vv) => Ok(Some(vv)),
        None => Err(ModelError::config(format!("{} should be a string", key))),
    }
}

pub fn required_str<'a>(yaml_cfg: &'a Yaml, key: &str) -> Result<&'a str, ModelError> {
    optional_str(yaml_cfg, key)?.ok_or_else(|| missing(key))
}

/// Reads a list of strings; a missing key is an empty list.
pub fn str_list(yaml_cfg: &Yaml, key: &str) -> Result<Vec<String>, ModelError> {
    let value = &yaml_cfg[key];
    if value.is_badvalue() {
        return Ok(vec![]);
    }
    let items = value.as_vec().ok_or_else(|| {
        ModelError::config(format!("{} should be a list", key))
    })?;
    let mut strs = vec![];
    for item in items {
        match item.as_str() {
            Some(ss) => strs.push(String::from(ss)),
            None => return Err(ModelError::config(format!("{} should be a list of strings", key))),
        }
    }
    return Ok(strs);
}

fn missing(key: &str) -> ModelError {
    ModelError::config(format!("missing required key {}", key))
}

/// Parses one column of a csv row, naming the file and column on failure.
pub fn parse_field<T: FromStr>(row: &Row, column: &str, path: &Path) -> Result<T, ModelError> {
    let raw = row.get(column).ok_or_else(|| {
        ModelError::config(format!("{} has no column '{}'", path.display(), column))
    })?;
    raw.trim().parse().map_err(|_| {
        ModelError::config(format!("bad value '{}' for column '{}' in {}",
                                   raw, column, path.display()))
    })
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_str_to_absolute_path() {
        let base = Path::new("/data/run");
        assert_eq!(str_to_absolute_path("zones.csv", base), PathBuf::from("/data/run/zones.csv"));
        assert_eq!(str_to_absolute_path("/tmp/zones.csv", base), PathBuf::from("/tmp/zones.csv"));
    }

    #[test]
    fn test_yaml_getters() {
        let docs = YamlLoader::load_from_str(
            "Model.RandomSeed: 12\nSkims.BeelineFactor: 1.3\nRunModel.AutoOwnership: true\n\
             Names: [a, b]\nBad: [1]\n").unwrap();
        let cfg = &docs[0];
        assert_eq!(required_i64(cfg, "Model.RandomSeed").unwrap(), 12);
        assert_eq!(optional_f64(cfg, "Model.RandomSeed").unwrap(), Some(12.));
        assert_eq!(optional_f64(cfg, "Skims.BeelineFactor").unwrap(), Some(1.3));
        assert_eq!(optional_bool(cfg, "RunModel.AutoOwnership").unwrap(), Some(true));
        assert_eq!(optional_bool(cfg, "RunModel.StopFrequency").unwrap(), None);
        assert_eq!(str_list(cfg, "Names").unwrap(), vec!["a", "b"]);
        assert!(str_list(cfg, "Bad").is_err());
        assert!(required_i64(cfg, "Skims.BeelineFactor").is_err());
        assert!(required_str(cfg, "Input.Households").is_err());
    }

    #[test]
    fn test_parse_field() {
        let mut row = Row::new();
        row.insert(String::from("age"), String::from(" 41"));
        row.insert(String::from("income"), String::from("lots"));
        let path = Path::new("persons.csv");
        assert_eq!(parse_field::<u32>(&row, "age", path).unwrap(), 41);
        assert!(parse_field::<f64>(&row, "income", path).is_err());
        assert!(parse_field::<u32>(&row, "zone", path).is_err());
    }
}
