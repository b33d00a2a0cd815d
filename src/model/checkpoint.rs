use std::path::{Path, PathBuf};

use candle_core::{DType, Device};
use candle_nn::VarBuilder;

use crate::error::AsrError;

const PREFIX: &str = "model.epoch-";
const SUFFIX: &str = ".safetensors";

pub fn checkpoint_path(dir: &Path, epoch: usize) -> PathBuf {
    dir.join(format!("{PREFIX}{epoch}{SUFFIX}"))
}

/// Epochs with a saved checkpoint in `dir`, ascending.
pub fn available_epochs(dir: &Path) -> Result<Vec<usize>, AsrError> {
    if !dir.is_dir() {
        return Err(AsrError::missing("list checkpoints", dir));
    }
    let entries = std::fs::read_dir(dir).map_err(|e| AsrError::io("list checkpoints", e))?;
    let mut epochs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| AsrError::io("list checkpoints", e))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(epoch) = name
            .strip_prefix(PREFIX)
            .and_then(|rest| rest.strip_suffix(SUFFIX))
            .and_then(|n| n.parse::<usize>().ok())
        {
            epochs.push(epoch);
        }
    }
    epochs.sort_unstable();
    Ok(epochs)
}

/// Resolves the checkpoint for `epoch`; `None` or a negative epoch means the latest.
pub fn resolve_checkpoint(dir: &Path, epoch: Option<i64>) -> Result<(PathBuf, usize), AsrError> {
    match epoch {
        Some(e) if e >= 0 => {
            let epoch = e as usize;
            let path = checkpoint_path(dir, epoch);
            if !path.is_file() {
                return Err(AsrError::missing("load checkpoint", &path));
            }
            Ok((path, epoch))
        }
        _ => {
            let latest = available_epochs(dir)?
                .last()
                .copied()
                .ok_or_else(|| AsrError::missing("load checkpoint", checkpoint_path(dir, 0)))?;
            Ok((checkpoint_path(dir, latest), latest))
        }
    }
}

pub fn select_device(device: &str) -> Result<Device, AsrError> {
    match device {
        "cuda" => Device::new_cuda(0).map_err(|e| AsrError::runtime("CUDA init", e)),
        _ => Ok(Device::Cpu),
    }
}

pub(crate) fn load_var_builder(path: &Path, device: &Device) -> Result<VarBuilder<'static>, AsrError> {
    let data = std::fs::read(path).map_err(|e| AsrError::io("read safetensors", e))?;
    VarBuilder::from_buffered_safetensors(data, DType::F32, device)
        .map_err(|e| AsrError::runtime("load safetensors", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_epoch_is_selected_when_unspecified_or_negative() {
        let dir = tempfile::tempdir().unwrap();
        for epoch in [3, 12, 7] {
            std::fs::write(checkpoint_path(dir.path(), epoch), b"").unwrap();
        }
        std::fs::write(dir.path().join("model.epoch-x.safetensors"), b"").unwrap();
        assert_eq!(available_epochs(dir.path()).unwrap(), vec![3, 7, 12]);
        assert_eq!(resolve_checkpoint(dir.path(), None).unwrap().1, 12);
        assert_eq!(resolve_checkpoint(dir.path(), Some(-1)).unwrap().1, 12);
        assert_eq!(resolve_checkpoint(dir.path(), Some(7)).unwrap().1, 7);
    }

    #[test]
    fn missing_checkpoint_is_missing_resource() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            resolve_checkpoint(dir.path(), Some(4)).unwrap_err(),
            AsrError::MissingResource { .. }
        ));
        assert!(matches!(
            resolve_checkpoint(dir.path(), None).unwrap_err(),
            AsrError::MissingResource { .. }
        ));
    }
}
