use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::AsrError;

/// Line-oriented `decode.log`. Every line is flushed immediately and
/// mirrored to `tracing`.
pub struct DecodeLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl DecodeLog {
    /// Removes a previous log at `path` and starts an empty one.
    pub fn create(path: &Path) -> Result<Self, AsrError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| AsrError::io("create decode dir", e))?;
        }
        if path.is_file() {
            fs::remove_file(path).map_err(|e| AsrError::io("remove old decode.log", e))?;
        }
        let file = File::create(path).map_err(|e| AsrError::io("create decode.log", e))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn line(&mut self, line: impl AsRef<str>) -> Result<(), AsrError> {
        let line = line.as_ref();
        tracing::info!(target: "decode", "{line}");
        writeln!(self.writer, "{line}")
            .and_then(|_| self.writer.flush())
            .map_err(|e| AsrError::io("write decode.log", e))
    }
}
