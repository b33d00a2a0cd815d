use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use nested_asr::{AsrError, EvalSummary};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Meta {
    pub generated_at: String,
    pub model_path: String,
    pub device: String,
    pub epoch: usize,
}

#[derive(Serialize)]
struct SummaryDocument<'a> {
    meta: Meta,
    #[serde(flatten)]
    summary: &'a EvalSummary,
}

pub fn write_summary(path: &Path, meta: Meta, summary: &EvalSummary) -> Result<(), AsrError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| AsrError::runtime("create summary directory", e))?;
    }
    let mut file = File::create(path).map_err(|e| AsrError::runtime("create summary file", e))?;
    serde_json::to_writer_pretty(&mut file, &SummaryDocument { meta, summary })
        .map_err(|e| AsrError::runtime("serialize summary JSON", e))?;
    file.write_all(b"\n")
        .map_err(|e| AsrError::runtime("finalize summary file", e))
}
