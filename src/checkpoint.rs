use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::error::KiraError;
use crate::workspace::write_bytes_durable;

/// Records the header of the last read that was fully committed.
pub trait CheckpointStore {
    fn load(&self) -> Result<Option<String>, KiraError>;
    fn save(&mut self, header: &str) -> Result<(), KiraError>;
    fn clear(&mut self) -> Result<(), KiraError>;
}

/// Single-line text file, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct FileCheckpoint {
    path: Utf8PathBuf,
}

impl FileCheckpoint {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl CheckpointStore for FileCheckpoint {
    fn load(&self) -> Result<Option<String>, KiraError> {
        match fs::read_to_string(self.path.as_std_path()) {
            Ok(content) => {
                let header = content.lines().next().unwrap_or_default().trim();
                if header.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(header.to_string()))
                }
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(KiraError::Filesystem(format!(
                "read checkpoint {}: {err}",
                self.path
            ))),
        }
    }

    fn save(&mut self, header: &str) -> Result<(), KiraError> {
        write_bytes_durable(&self.path, format!("{header}\n").as_bytes())
            .map_err(|err| KiraError::Checkpoint(err.to_string()))?;
        debug!(header, path = %self.path, "checkpoint saved");
        Ok(())
    }

    fn clear(&mut self) -> Result<(), KiraError> {
        match fs::remove_file(self.path.as_std_path()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(KiraError::Checkpoint(err.to_string())),
        }
    }
}
