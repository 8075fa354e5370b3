use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::errors::ModelError;
use super::population::Household;
use super::shadow_price::SegmentSizes;


const MAGIC: &[u8; 4] = b"TDCK";
pub const CHECKPOINT_VERSION: u32 = 1;

/// Key of the checkpoint written after the last stage.
pub const FINAL_KEY: &str = "final";

/// The state of the whole run at a stage boundary.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PopulationSnapshot {
    pub version: u32,
    /// the stage this snapshot restarts
    pub key: String,
    pub households: Vec<Household>,
    /// usual location sizes and shadow prices
    pub shadow_prices: Vec<SegmentSizes>,
}

impl PopulationSnapshot {
    pub fn new(key: &str, households: Vec<Household>, shadow_prices: Vec<SegmentSizes>)
               -> PopulationSnapshot {
        PopulationSnapshot {
            version: CHECKPOINT_VERSION,
            key: String::from(key),
            households,
            shadow_prices,
        }
    }
}

/// Snapshots kept as one file per key next to `file_base`: a base of
/// `out/run` stores key `ao` in `out/run_ao.ckpt`.  Each file starts with a
/// four byte magic and a little-endian format version, followed by the
/// bincode encoded snapshot.
pub struct CheckpointStore {
    file_base: PathBuf,
}

impl CheckpointStore {
    pub fn new(file_base: &Path) -> CheckpointStore {
        CheckpointStore {
            file_base: file_base.to_path_buf(),
        }
    }

    pub fn path(&self, key: &str) -> PathBuf {
        let mut name = self.file_base.clone().into_os_string();
        name.push(format!("_{}.ckpt", key));
        return PathBuf::from(name);
    }

    pub fn exists(&self, key: &str) -> bool {
        self.path(key).is_file()
    }

    /// Writes the snapshot under its key.  The file is written beside its
    /// final name and renamed into place, so a failed write never leaves a
    /// partial checkpoint behind.
    pub fn store(&self, snapshot: &PopulationSnapshot) -> Result<(), ModelError> {
        let key = snapshot.key.as_str();
        let path = self.path(key);
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).map_err(|ee| ModelError::checkpoint(key, ee.to_string()))?;
            }
        }
        let mut tmp_name = path.clone().into_os_string();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let file = File::create(&tmp_path)
            .map_err(|ee| ModelError::checkpoint(key, ee.to_string()))?;
        let mut writer = BufWriter::new(file);
        writer.write_all(MAGIC).map_err(|ee| ModelError::checkpoint(key, ee.to_string()))?;
        writer.write_all(&CHECKPOINT_VERSION.to_le_bytes())
            .map_err(|ee| ModelError::checkpoint(key, ee.to_string()))?;
        bincode::serialize_into(&mut writer, snapshot)
            .map_err(|ee| ModelError::checkpoint(key, ee.to_string()))?;
        writer.flush().map_err(|ee| ModelError::checkpoint(key, ee.to_string()))?;
        drop(writer);

        fs::rename(&tmp_path, &path).map_err(|ee| ModelError::checkpoint(key, ee.to_string()))?;
        log::info!("wrote checkpoint {} with {} households", path.display(),
                   snapshot.households.len());
        return Ok(());
    }

    pub fn load(&self, key: &str) -> Result<PopulationSnapshot, ModelError> {
        let path = self.path(key);
        let file = File::open(&path).map_err(|ee| {
            ModelError::checkpoint(key, format!("{}: {}", path.display(), ee))
        })?;
        let mut reader = BufReader::new(file);

        let mut header = [0u8; 8];
        reader.read_exact(&mut header).map_err(|ee| {
            ModelError::checkpoint(key, format!("{} has no header: {}", path.display(), ee))
        })?;
        if &header[..4] != MAGIC {
            return Err(ModelError::checkpoint(key, format!("{} is not a checkpoint file",
                                                           path.display())));
        }
        let mut version_bytes = [0u8; 4];
        version_bytes.copy_from_slice(&header[4..]);
        let version = u32::from_le_bytes(version_bytes);
        if version != CHECKPOINT_VERSION {
            return Err(ModelError::checkpoint(key, format!(
                "{} has format version {}, expected {}", path.display(), version,
                CHECKPOINT_VERSION)));
        }

        let snapshot: PopulationSnapshot = bincode::deserialize_from(reader)
            .map_err(|ee| ModelError::checkpoint(key, ee.to_string()))?;
        if snapshot.key != key {
            return Err(ModelError::checkpoint(key, format!("{} holds checkpoint '{}'",
                                                           path.display(), snapshot.key)));
        }
        log::info!("loaded checkpoint {} with {} households", path.display(),
                   snapshot.households.len());
        return Ok(snapshot);
    }
}
