use std::path::Path;

use serde::Deserialize;

use crate::error::AsrError;
use crate::types::UtteranceRecord;

#[derive(Debug, Deserialize)]
struct ManifestRow {
    utt_id: String,
    feat_path: String,
    x_len: usize,
    x_dim: usize,
    #[serde(default)]
    text: String,
    #[serde(default)]
    token_id: String,
    y_len: usize,
    y_dim: usize,
}

/// Reads `utt_id,feat_path,x_len,x_dim,text,token_id,y_len,y_dim` rows.
/// Extra columns are ignored; `row` is the 0-based data row index.
pub fn read_manifest(path: &Path) -> Result<Vec<UtteranceRecord>, AsrError> {
    if !path.is_file() {
        return Err(AsrError::missing("read manifest", path));
    }
    let mut reader = csv::Reader::from_path(path).map_err(|e| AsrError::csv("open manifest", e))?;
    let mut records = Vec::new();
    for (row, result) in reader.deserialize::<ManifestRow>().enumerate() {
        let raw = result.map_err(|e| AsrError::csv("parse manifest row", e))?;
        let token_ids = raw
            .token_id
            .split_whitespace()
            .map(|t| {
                t.parse::<usize>().map_err(|_| {
                    AsrError::invalid_input(format!(
                        "{}: token id '{t}' of utterance '{}' is not an integer",
                        path.display(),
                        raw.utt_id
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        records.push(UtteranceRecord {
            row,
            utt_id: raw.utt_id,
            feat_path: raw.feat_path,
            x_len: raw.x_len,
            x_dim: raw.x_dim,
            text: raw.text,
            token_ids,
            y_len: raw.y_len,
            y_dim: raw.y_dim,
        });
    }
    Ok(records)
}
