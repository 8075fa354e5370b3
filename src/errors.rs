use std::error::Error;
use std::fmt;
use std::path::PathBuf;

use super::pipeline::ModelStage;


/// Every way a model run can fail.  None of these are recoverable: the
/// orchestrator stops at the first one and the binary exits non-zero.
#[derive(Debug)]
pub enum ModelError {
    /// Missing or malformed configuration, input tables or model specs.
    Config(String),
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Csv(csv::Error),
    /// A decision had nothing to choose from and its call site does not
    /// allow a fallback.
    NoAvailableAlternatives {
        household_id: u64,
        stage: ModelStage,
        detail: String,
    },
    Checkpoint {
        key: String,
        reason: String,
    },
    /// A worker task failed while processing its partition.
    TaskFailed {
        task_index: usize,
        first_household: usize,
        source: Box<ModelError>,
    },
}

impl ModelError {
    pub fn config<S: Into<String>>(msg: S) -> ModelError {
        ModelError::Config(msg.into())
    }

    pub fn io(path: &std::path::Path, source: std::io::Error) -> ModelError {
        ModelError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn checkpoint<S: Into<String>>(key: &str, reason: S) -> ModelError {
        ModelError::Checkpoint {
            key: String::from(key),
            reason: reason.into(),
        }
    }

    /// The household whose decision caused this error, if it is known.
    pub fn household_id(&self) -> Option<u64> {
        match self {
            ModelError::NoAvailableAlternatives { household_id, .. } => Some(*household_id),
            ModelError::TaskFailed { source, .. } => source.household_id(),
            _ => None,
        }
    }
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::Config(msg) => write!(f, "configuration error: {}", msg),
            ModelError::Io { path, source } => {
                write!(f, "I/O error on {}: {}", path.display(), source)
            }
            ModelError::Csv(err) => write!(f, "CSV error: {}", err),
            ModelError::NoAvailableAlternatives {
                household_id,
                stage,
                detail,
            } => write!(
                f,
                "no available alternatives in stage {} for household {}: {}",
                stage.key(),
                household_id,
                detail
            ),
            ModelError::Checkpoint { key, reason } => {
                write!(f, "checkpoint '{}' failed: {}", key, reason)
            }
            ModelError::TaskFailed {
                task_index,
                first_household,
                source,
            } => write!(
                f,
                "task {} (households from index {}) failed: {}",
                task_index, first_household, source
            ),
        }
    }
}

impl Error for ModelError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ModelError::Io { source, .. } => Some(source),
            ModelError::Csv(err) => Some(err),
            ModelError::TaskFailed { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<csv::Error> for ModelError {
    fn from(err: csv::Error) -> ModelError {
        ModelError::Csv(err)
    }
}

impl From<std::io::Error> for ModelError {
    fn from(err: std::io::Error) -> ModelError {
        ModelError::Io {
            path: PathBuf::new(),
            source: err,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_household_id_through_task_failure() {
        let inner = ModelError::NoAvailableAlternatives {
            household_id: 42,
            stage: ModelStage::UsualLocation,
            detail: String::from("segment work, origin 3"),
        };
        let err = ModelError::TaskFailed {
            task_index: 1,
            first_household: 10,
            source: Box::new(inner),
        };
        assert_eq!(err.household_id(), Some(42));
        let msg = format!("{}", err);
        assert!(msg.contains("household 42"));
        assert!(msg.contains("uwsl"));
        assert!(err.source().is_some());
    }
}
