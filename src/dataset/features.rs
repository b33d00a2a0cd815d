use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use crate::error::AsrError;
use crate::types::FeatureMatrix;

/// Source of per-utterance acoustic feature matrices, addressed by the
/// manifest's `feat_path` column.
pub trait FeatureReader: Send + Sync {
    fn read(&self, feat_path: &str) -> Result<FeatureMatrix, AsrError>;
}

impl<R: FeatureReader + ?Sized> FeatureReader for Arc<R> {
    fn read(&self, feat_path: &str) -> Result<FeatureMatrix, AsrError> {
        (**self).read(feat_path)
    }
}

/// Reads binary Kaldi float (`FM`) and double (`DM`) matrices.
///
/// `feat_path` is either a plain file or `archive.ark:byte_offset`.
#[derive(Debug, Clone, Copy, Default)]
pub struct KaldiMatrixReader;

impl FeatureReader for KaldiMatrixReader {
    fn read(&self, feat_path: &str) -> Result<FeatureMatrix, AsrError> {
        let (path, offset) = split_offset(feat_path);
        let path = Path::new(path);
        if !path.is_file() {
            return Err(AsrError::missing("read feature matrix", path));
        }
        let file = File::open(path).map_err(|e| AsrError::io("open feature matrix", e))?;
        let mut reader = BufReader::new(file);
        reader
            .seek(SeekFrom::Start(offset))
            .map_err(|e| AsrError::io("seek feature matrix", e))?;
        read_binary_matrix(&mut reader)
            .map_err(|e| match e {
                AsrError::InvalidInput { message } => {
                    AsrError::invalid_input(format!("{feat_path}: {message}"))
                }
                other => other,
            })
    }
}

fn split_offset(feat_path: &str) -> (&str, u64) {
    if let Some((path, raw)) = feat_path.rsplit_once(':') {
        if let Ok(offset) = raw.parse::<u64>() {
            return (path, offset);
        }
    }
    (feat_path, 0)
}

const MAX_PREALLOC: usize = 1 << 20;

pub(crate) fn read_binary_matrix<R: Read>(reader: &mut R) -> Result<FeatureMatrix, AsrError> {
    let mut marker = [0u8; 2];
    read_exact(reader, &mut marker)?;
    if marker != *b"\0B" {
        return Err(AsrError::invalid_input("not a binary Kaldi object (missing \\0B marker)"));
    }
    let mut kind = [0u8; 3];
    read_exact(reader, &mut kind)?;
    let is_double = match &kind {
        b"FM " => false,
        b"DM " => true,
        other => {
            return Err(AsrError::invalid_input(format!(
                "unsupported Kaldi matrix type '{}'",
                String::from_utf8_lossy(other).trim()
            )))
        }
    };
    let rows = read_dim(reader)?;
    let cols = read_dim(reader)?;
    let width = if is_double { 8 } else { 4 };
    let n = rows
        .checked_mul(cols)
        .filter(|n| n.checked_mul(width).is_some_and(|b| b <= isize::MAX as usize))
        .ok_or_else(|| {
            AsrError::invalid_input(format!("matrix header {rows}x{cols} is too large"))
        })?;
    // the header is untrusted; grow past this as data actually arrives
    let mut data = Vec::with_capacity(n.min(MAX_PREALLOC));
    if is_double {
        let mut buf = [0u8; 8];
        for _ in 0..n {
            read_exact(reader, &mut buf)?;
            data.push(f64::from_le_bytes(buf) as f32);
        }
    } else {
        let mut buf = [0u8; 4];
        for _ in 0..n {
            read_exact(reader, &mut buf)?;
            data.push(f32::from_le_bytes(buf));
        }
    }
    Ok(FeatureMatrix::new(rows, cols, data))
}

fn read_dim<R: Read>(reader: &mut R) -> Result<usize, AsrError> {
    let mut size = [0u8; 1];
    read_exact(reader, &mut size)?;
    if size[0] != 4 {
        return Err(AsrError::invalid_input(format!(
            "expected 4-byte matrix dimension, found size byte {}",
            size[0]
        )));
    }
    let mut buf = [0u8; 4];
    read_exact(reader, &mut buf)?;
    let value = i32::from_le_bytes(buf);
    usize::try_from(value)
        .map_err(|_| AsrError::invalid_input(format!("negative matrix dimension {value}")))
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), AsrError> {
    reader
        .read_exact(buf)
        .map_err(|e| AsrError::io("read feature matrix", e))
}

/// Serializes a float matrix in the binary layout [`KaldiMatrixReader`] reads.
pub fn write_binary_matrix(matrix: &FeatureMatrix) -> Vec<u8> {
    let mut out = Vec::with_capacity(15 + matrix.data.len() * 4);
    out.extend_from_slice(b"\0BFM ");
    out.push(4);
    out.extend_from_slice(&(matrix.frames as i32).to_le_bytes());
    out.push(4);
    out.extend_from_slice(&(matrix.dim as i32).to_le_bytes());
    for v in &matrix.data {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn reads_float_matrix_written_in_kaldi_layout() {
        let m = FeatureMatrix::new(2, 3, vec![0.5, 1.0, -2.0, 3.0, 4.0, 5.5]);
        let bytes = write_binary_matrix(&m);
        let parsed = read_binary_matrix(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(parsed, m);
        assert_eq!(parsed.row(1), &[3.0, 4.0, 5.5]);
    }

    #[test]
    fn reads_double_matrix() {
        let mut bytes = b"\0BDM ".to_vec();
        bytes.push(4);
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.push(4);
        bytes.extend_from_slice(&2i32.to_le_bytes());
        bytes.extend_from_slice(&1.25f64.to_le_bytes());
        bytes.extend_from_slice(&(-0.5f64).to_le_bytes());
        let parsed = read_binary_matrix(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(parsed.data, vec![1.25, -0.5]);
    }

    #[test]
    fn rejects_compressed_matrices() {
        let bytes = b"\0BCM \x04".to_vec();
        let err = read_binary_matrix(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, AsrError::InvalidInput { .. }));
    }

    fn header(kind: &[u8; 3], rows: i32, cols: i32) -> Vec<u8> {
        let mut bytes = b"\0B".to_vec();
        bytes.extend_from_slice(kind);
        bytes.push(4);
        bytes.extend_from_slice(&rows.to_le_bytes());
        bytes.push(4);
        bytes.extend_from_slice(&cols.to_le_bytes());
        bytes
    }

    #[test]
    fn oversized_header_is_invalid_input() {
        for kind in [b"FM ", b"DM "] {
            let bytes = header(kind, i32::MAX, i32::MAX);
            let err = read_binary_matrix(&mut Cursor::new(bytes)).unwrap_err();
            assert!(matches!(err, AsrError::InvalidInput { .. }));
        }
    }

    #[test]
    fn truncated_data_after_a_large_header_is_an_io_error() {
        let mut bytes = header(b"FM ", 100_000, 80);
        bytes.extend_from_slice(&1.0f32.to_le_bytes());
        let err = read_binary_matrix(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, AsrError::Io { .. }));
    }

    #[test]
    fn ark_offsets_are_split_from_the_path() {
        assert_eq!(split_offset("/data/feats.ark:1234"), ("/data/feats.ark", 1234));
        assert_eq!(split_offset("/data/utt1.mat"), ("/data/utt1.mat", 0));
        assert_eq!(split_offset("C:dir"), ("C:dir", 0));
    }

    #[test]
    fn reader_honours_archive_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feats.ark");
        let m = FeatureMatrix::new(1, 2, vec![7.0, 8.0]);
        let mut bytes = b"utt1 ".to_vec();
        let offset = bytes.len();
        bytes.extend(write_binary_matrix(&m));
        std::fs::write(&path, bytes).unwrap();
        let read = KaldiMatrixReader
            .read(&format!("{}:{offset}", path.display()))
            .unwrap();
        assert_eq!(read, m);
    }
}
