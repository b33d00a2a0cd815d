pub mod features;
mod loader;
mod manifest;

pub use features::{FeatureReader, KaldiMatrixReader};
pub use loader::{
    set_name_of, Dataset, DatasetBuilder, TaskSource, DEFAULT_MAX_N_FRAMES, DEFAULT_MIN_N_FRAMES,
};
pub use manifest::read_manifest;
