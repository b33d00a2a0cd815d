use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::config::Unit;
use crate::dataset::features::{FeatureReader, KaldiMatrixReader};
use crate::dataset::manifest::read_manifest;
use crate::error::AsrError;
use crate::token_converter::{load_converter, TokenConverter};
use crate::types::{Batch, Targets, UtteranceRecord};

pub const DEFAULT_MIN_N_FRAMES: usize = 40;
pub const DEFAULT_MAX_N_FRAMES: usize = 2000;

const DYNAMIC_HALVE_ABOVE: usize = 800;
const DYNAMIC_QUARTER_ABOVE: usize = 1600;

/// Manifest, dictionary and filtering settings of one task.
#[derive(Debug, Clone)]
pub struct TaskSource {
    pub manifest: PathBuf,
    pub dict: PathBuf,
    pub unit: String,
    pub wp_model: Option<PathBuf>,
    /// Apply the CTC length constraint when filtering.
    pub ctc: bool,
    pub subsample_factor: usize,
}

impl TaskSource {
    pub fn new(manifest: impl Into<PathBuf>, dict: impl Into<PathBuf>, unit: impl Into<String>) -> Self {
        Self {
            manifest: manifest.into(),
            dict: dict.into(),
            unit: unit.into(),
            wp_model: None,
            ctc: false,
            subsample_factor: 1,
        }
    }

    pub fn with_wp_model(mut self, wp_model: impl Into<PathBuf>) -> Self {
        self.wp_model = Some(wp_model.into());
        self
    }

    pub fn with_ctc(mut self, ctc: bool, subsample_factor: usize) -> Self {
        self.ctc = ctc;
        self.subsample_factor = subsample_factor.max(1);
        self
    }
}

pub struct DatasetBuilder {
    main: TaskSource,
    sub1: Option<TaskSource>,
    sub2: Option<TaskSource>,
    batch_size: usize,
    n_epochs: Option<usize>,
    is_test: bool,
    shuffle: bool,
    sort_by_input_length: bool,
    short2long: bool,
    sort_stop_epoch: Option<usize>,
    dynamic_batching: bool,
    skip_speech: bool,
    min_n_frames: usize,
    max_n_frames: usize,
    seed: u64,
    feature_reader: Option<Box<dyn FeatureReader>>,
}

impl DatasetBuilder {
    pub fn new(main: TaskSource, batch_size: usize) -> Self {
        Self {
            main,
            sub1: None,
            sub2: None,
            batch_size,
            n_epochs: None,
            is_test: false,
            shuffle: false,
            sort_by_input_length: false,
            short2long: false,
            sort_stop_epoch: None,
            dynamic_batching: false,
            skip_speech: false,
            min_n_frames: DEFAULT_MIN_N_FRAMES,
            max_n_frames: DEFAULT_MAX_N_FRAMES,
            seed: 1,
            feature_reader: None,
        }
    }

    pub fn with_sub1(mut self, sub1: TaskSource) -> Self {
        self.sub1 = Some(sub1);
        self
    }

    pub fn with_sub2(mut self, sub2: TaskSource) -> Self {
        self.sub2 = Some(sub2);
        self
    }

    pub fn with_n_epochs(mut self, n_epochs: usize) -> Self {
        self.n_epochs = Some(n_epochs);
        self
    }

    pub fn with_test_mode(mut self, is_test: bool) -> Self {
        self.is_test = is_test;
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_sort_by_input_length(mut self, sort: bool, short2long: bool) -> Self {
        self.sort_by_input_length = sort;
        self.short2long = short2long;
        self
    }

    pub fn with_sort_stop_epoch(mut self, epoch: usize) -> Self {
        self.sort_stop_epoch = Some(epoch);
        self
    }

    pub fn with_dynamic_batching(mut self, dynamic_batching: bool) -> Self {
        self.dynamic_batching = dynamic_batching;
        self
    }

    pub fn with_skip_speech(mut self, skip_speech: bool) -> Self {
        self.skip_speech = skip_speech;
        self
    }

    pub fn with_frame_limits(mut self, min_n_frames: usize, max_n_frames: usize) -> Self {
        self.min_n_frames = min_n_frames;
        self.max_n_frames = max_n_frames;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_feature_reader(mut self, reader: Box<dyn FeatureReader>) -> Self {
        self.feature_reader = Some(reader);
        self
    }

    pub fn build(self) -> Result<Dataset, AsrError> {
        if self.batch_size == 0 {
            return Err(AsrError::invalid_config("batch_size must be >= 1"));
        }
        if self.min_n_frames > self.max_n_frames {
            return Err(AsrError::invalid_config(format!(
                "min_n_frames ({}) exceeds max_n_frames ({})",
                self.min_n_frames, self.max_n_frames
            )));
        }

        // dictionaries and units are validated before any manifest is touched
        let main = LoadedTask::open(&self.main)?;
        let sub1 = self.sub1.as_ref().map(LoadedTask::open).transpose()?;
        let sub2 = self.sub2.as_ref().map(LoadedTask::open).transpose()?;

        let set_name = set_name_of(&self.main.manifest);

        let mut main_rows = read_manifest(&self.main.manifest)?;
        let mut sub1_rows = match &self.sub1 {
            Some(src) => Some(read_manifest(&src.manifest)?),
            None => None,
        };
        let mut sub2_rows = match &self.sub2 {
            Some(src) => Some(read_manifest(&src.manifest)?),
            None => None,
        };

        if !self.is_test {
            let limits = (self.min_n_frames, self.max_n_frames);
            filter_rows(&mut main_rows, &self.main, limits, "main");
            if let (Some(rows), Some(src)) = (sub1_rows.as_mut(), self.sub1.as_ref()) {
                filter_rows(rows, src, limits, "sub1");
            }
            if let (Some(rows), Some(src)) = (sub2_rows.as_mut(), self.sub2.as_ref()) {
                filter_rows(rows, src, limits, "sub2");
            }
            prune_to_intersection(&mut main_rows, sub1_rows.as_mut(), sub2_rows.as_mut());
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        order_rows(
            &mut main_rows,
            self.sort_by_input_length,
            self.short2long,
            self.shuffle,
            &mut rng,
        );

        let order: Vec<usize> = main_rows.iter().map(|r| r.row).collect();
        let input_dim = main_rows.first().map(|r| r.x_dim).unwrap_or(0);
        tracing::info!(
            set = %set_name,
            utterances = order.len(),
            input_dim,
            is_test = self.is_test,
            "dataset ready"
        );

        let rest = order.clone();
        Ok(Dataset {
            set_name,
            is_test: self.is_test,
            batch_size: self.batch_size,
            n_epochs: self.n_epochs,
            shuffle: self.shuffle,
            sort_by_input_length: self.sort_by_input_length,
            sort_stop_epoch: self.sort_stop_epoch,
            dynamic_batching: self.dynamic_batching,
            skip_speech: self.skip_speech,
            input_dim,
            main: main.with_rows(main_rows),
            sub1: zip_task(sub1, sub1_rows),
            sub2: zip_task(sub2, sub2_rows),
            order,
            rest,
            epoch: 0,
            iteration: 0,
            new_epoch: false,
            rng,
            reader: self
                .feature_reader
                .unwrap_or_else(|| Box::new(KaldiMatrixReader)),
        })
    }
}

struct LoadedTask {
    unit: Unit,
    vocab_size: usize,
    converter: Box<dyn TokenConverter>,
}

impl LoadedTask {
    fn open(src: &TaskSource) -> Result<Self, AsrError> {
        let unit: Unit = src.unit.parse()?;
        if !src.manifest.is_file() {
            return Err(AsrError::missing("read manifest", &src.manifest));
        }
        let converter = load_converter(unit, &src.dict, src.wp_model.as_deref())?;
        Ok(Self {
            unit,
            vocab_size: converter.vocab().size(),
            converter,
        })
    }

    fn with_rows(self, rows: Vec<UtteranceRecord>) -> TaskData {
        TaskData {
            unit: self.unit,
            vocab_size: self.vocab_size,
            converter: self.converter,
            rows: rows.into_iter().map(|r| (r.row, r)).collect(),
        }
    }
}

fn zip_task(task: Option<LoadedTask>, rows: Option<Vec<UtteranceRecord>>) -> Option<TaskData> {
    match (task, rows) {
        (Some(task), Some(rows)) => Some(task.with_rows(rows)),
        _ => None,
    }
}

struct TaskData {
    unit: Unit,
    vocab_size: usize,
    converter: Box<dyn TokenConverter>,
    rows: HashMap<usize, UtteranceRecord>,
}

impl TaskData {
    fn record(&self, row: usize) -> Result<&UtteranceRecord, AsrError> {
        self.rows
            .get(&row)
            .ok_or_else(|| AsrError::invalid_input(format!("row {row} is not in the dataset")))
    }

    fn targets(&self, rows: &[usize], is_test: bool) -> Result<(Targets, Vec<usize>), AsrError> {
        let records = rows
            .iter()
            .map(|&r| self.record(r))
            .collect::<Result<Vec<_>, _>>()?;
        let ylens = records.iter().map(|r| r.y_len).collect();
        let ys = if is_test {
            Targets::Text(records.iter().map(|r| r.text.clone()).collect())
        } else {
            Targets::Ids(records.iter().map(|r| r.token_ids.clone()).collect())
        };
        Ok((ys, ylens))
    }
}

fn filter_rows(
    rows: &mut Vec<UtteranceRecord>,
    src: &TaskSource,
    (min_n_frames, max_n_frames): (usize, usize),
    task: &'static str,
) {
    let original = rows.len();
    rows.retain(|r| (min_n_frames..=max_n_frames).contains(&r.x_len));
    let after_threshold = rows.len();
    tracing::info!(
        task,
        original,
        removed = original - after_threshold,
        min_n_frames,
        max_n_frames,
        "removed utterances by frame threshold"
    );
    if src.ctc && src.subsample_factor > 1 {
        rows.retain(|r| r.y_len <= r.x_len / src.subsample_factor);
        tracing::info!(
            task,
            removed = after_threshold - rows.len(),
            subsample_factor = src.subsample_factor,
            "removed utterances for CTC"
        );
    }
}

/// Keeps only rows whose index survived filtering in every present manifest.
fn prune_to_intersection(
    main: &mut Vec<UtteranceRecord>,
    sub1: Option<&mut Vec<UtteranceRecord>>,
    sub2: Option<&mut Vec<UtteranceRecord>>,
) {
    let mut subs: Vec<&mut Vec<UtteranceRecord>> = sub1.into_iter().chain(sub2).collect();
    if subs.is_empty() {
        return;
    }
    let mut keep: BTreeSet<usize> = main.iter().map(|r| r.row).collect();
    for rows in &subs {
        let rows: BTreeSet<usize> = rows.iter().map(|r| r.row).collect();
        keep = keep.intersection(&rows).copied().collect();
    }
    let before = main.len();
    main.retain(|r| keep.contains(&r.row));
    for rows in subs.iter_mut() {
        rows.retain(|r| keep.contains(&r.row));
    }
    if before != main.len() {
        tracing::info!(
            removed = before - main.len(),
            remaining = main.len(),
            "pruned rows to keep sub-task manifests aligned"
        );
    }
}

fn order_rows(
    rows: &mut [UtteranceRecord],
    sort_by_input_length: bool,
    short2long: bool,
    shuffle: bool,
    rng: &mut StdRng,
) {
    if sort_by_input_length {
        if short2long {
            rows.sort_by(|a, b| b.x_len.cmp(&a.x_len));
        } else {
            rows.sort_by_key(|r| r.x_len);
        }
    } else if shuffle {
        rows.shuffle(rng);
    } else {
        rows.sort_by(|a, b| a.utt_id.cmp(&b.utt_id));
    }
}

/// Filtered, ordered view over a manifest that yields minibatches.
pub struct Dataset {
    set_name: String,
    is_test: bool,
    batch_size: usize,
    n_epochs: Option<usize>,
    shuffle: bool,
    sort_by_input_length: bool,
    sort_stop_epoch: Option<usize>,
    dynamic_batching: bool,
    skip_speech: bool,
    input_dim: usize,
    main: TaskData,
    sub1: Option<TaskData>,
    sub2: Option<TaskData>,
    /// Row indices in iteration order.
    order: Vec<usize>,
    /// Rows not yet consumed in the current epoch, in iteration order.
    rest: Vec<usize>,
    epoch: usize,
    iteration: usize,
    new_epoch: bool,
    rng: StdRng,
    reader: Box<dyn FeatureReader>,
}

impl Dataset {
    pub fn set_name(&self) -> &str {
        &self.set_name
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn unit(&self) -> Unit {
        self.main.unit
    }

    pub fn unit_sub1(&self) -> Option<Unit> {
        self.sub1.as_ref().map(|t| t.unit)
    }

    pub fn unit_sub2(&self) -> Option<Unit> {
        self.sub2.as_ref().map(|t| t.unit)
    }

    pub fn vocab(&self) -> usize {
        self.main.vocab_size
    }

    pub fn vocab_sub1(&self) -> Option<usize> {
        self.sub1.as_ref().map(|t| t.vocab_size)
    }

    pub fn vocab_sub2(&self) -> Option<usize> {
        self.sub2.as_ref().map(|t| t.vocab_size)
    }

    pub fn converter(&self) -> &dyn TokenConverter {
        self.main.converter.as_ref()
    }

    pub fn converter_sub1(&self) -> Option<&dyn TokenConverter> {
        self.sub1.as_ref().map(|t| t.converter.as_ref())
    }

    pub fn converter_sub2(&self) -> Option<&dyn TokenConverter> {
        self.sub2.as_ref().map(|t| t.converter.as_ref())
    }

    /// Row indices in iteration order.
    pub fn rows(&self) -> &[usize] {
        &self.order
    }

    pub fn sub1_rows(&self) -> Option<Vec<usize>> {
        self.sub1.as_ref().map(|t| sorted_keys(&t.rows))
    }

    pub fn sub2_rows(&self) -> Option<Vec<usize>> {
        self.sub2.as_ref().map(|t| sorted_keys(&t.rows))
    }

    pub fn record(&self, row: usize) -> Option<&UtteranceRecord> {
        self.main.rows.get(&row)
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// True right after the batch that finished an epoch.
    pub fn is_new_epoch(&self) -> bool {
        self.new_epoch
    }

    /// Next minibatch, or `None` once `n_epochs` epochs have been consumed.
    pub fn next_batch(&mut self) -> Result<Option<Batch>, AsrError> {
        if self.n_epochs.is_some_and(|n| self.epoch >= n) || self.order.is_empty() {
            return Ok(None);
        }
        let size = self.current_batch_size().min(self.rest.len());
        let rows: Vec<usize> = self.rest.drain(..size).collect();
        self.iteration += rows.len();
        self.new_epoch = self.rest.is_empty();
        if self.new_epoch {
            self.finish_epoch();
        }
        self.make_batch(&rows).map(Some)
    }

    fn current_batch_size(&self) -> usize {
        if !self.dynamic_batching {
            return self.batch_size;
        }
        let max_x_len = self
            .rest
            .iter()
            .take(self.batch_size)
            .filter_map(|r| self.main.rows.get(r))
            .map(|r| r.x_len)
            .max()
            .unwrap_or(0);
        dynamic_batch_size(self.batch_size, max_x_len)
    }

    fn finish_epoch(&mut self) {
        self.epoch += 1;
        if self
            .sort_stop_epoch
            .is_some_and(|stop| self.sort_by_input_length && self.epoch >= stop)
        {
            tracing::info!(epoch = self.epoch, "input-length sorting stopped; shuffling from now on");
            self.sort_by_input_length = false;
            self.shuffle = true;
        }
        self.rest = self.order.clone();
        if self.shuffle && !self.sort_by_input_length {
            self.rest.shuffle(&mut self.rng);
        }
    }

    /// Assembles the batch for `rows` (manifest row indices) in the given order.
    pub fn make_batch(&self, rows: &[usize]) -> Result<Batch, AsrError> {
        let records = rows
            .iter()
            .map(|&r| self.main.record(r))
            .collect::<Result<Vec<_>, _>>()?;

        let (xs, xlens) = if self.skip_speech {
            (Vec::new(), Vec::new())
        } else {
            let xs = records
                .iter()
                .map(|r| self.reader.read(&r.feat_path))
                .collect::<Result<Vec<_>, _>>()?;
            (xs, records.iter().map(|r| r.x_len).collect())
        };

        let (ys, ylens) = self.main.targets(rows, self.is_test)?;
        let (ys_sub1, ylens_sub1) = match &self.sub1 {
            Some(task) => {
                let (ys, ylens) = task.targets(rows, self.is_test)?;
                (Some(ys), Some(ylens))
            }
            None => (None, None),
        };
        let (ys_sub2, ylens_sub2) = match &self.sub2 {
            Some(task) => {
                let (ys, ylens) = task.targets(rows, self.is_test)?;
                (Some(ys), Some(ylens))
            }
            None => (None, None),
        };

        Ok(Batch {
            xs,
            xlens,
            ys,
            ylens,
            ys_sub1,
            ylens_sub1,
            ys_sub2,
            ylens_sub2,
            utt_ids: records.iter().map(|r| r.utt_id.clone()).collect(),
            text: records.iter().map(|r| r.text.clone()).collect(),
            feat_paths: records.iter().map(|r| r.feat_path.clone()).collect(),
        })
    }
}

fn sorted_keys(rows: &HashMap<usize, UtteranceRecord>) -> Vec<usize> {
    let mut keys: Vec<usize> = rows.keys().copied().collect();
    keys.sort_unstable();
    keys
}

pub(crate) fn dynamic_batch_size(batch_size: usize, max_x_len: usize) -> usize {
    let size = if max_x_len > DYNAMIC_QUARTER_ABOVE {
        batch_size / 4
    } else if max_x_len > DYNAMIC_HALVE_ABOVE {
        batch_size / 2
    } else {
        batch_size
    };
    size.max(1)
}

/// Set name of a manifest: its file name up to the first dot.
pub fn set_name_of(manifest: &Path) -> String {
    manifest
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.split('.').next())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FeatureMatrix;

    struct ZeroReader;

    impl FeatureReader for ZeroReader {
        fn read(&self, _feat_path: &str) -> Result<FeatureMatrix, AsrError> {
            Ok(FeatureMatrix::new(2, 2, vec![0.0; 4]))
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        manifest: PathBuf,
        dict: PathBuf,
    }

    fn fixture(rows: &[(&str, usize, &str, usize)]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("train.csv");
        let dict = dir.path().join("dict.txt");
        let mut csv = String::from("utt_id,feat_path,x_len,x_dim,text,token_id,y_len,y_dim\n");
        for (utt, x_len, text, y_len) in rows {
            csv.push_str(&format!("{utt},/f/{utt}.ark,{x_len},40,{text},4,{y_len},6\n"));
        }
        std::fs::write(&manifest, csv).unwrap();
        std::fs::write(&dict, "<unk> 1\n<eos> 2\n<pad> 3\na 4\nb 5\n").unwrap();
        Fixture {
            _dir: dir,
            manifest,
            dict,
        }
    }

    fn builder(f: &Fixture, batch_size: usize) -> DatasetBuilder {
        DatasetBuilder::new(TaskSource::new(&f.manifest, &f.dict, "word"), batch_size)
            .with_feature_reader(Box::new(ZeroReader))
    }

    #[test]
    fn dynamic_batch_size_shrinks_for_long_inputs() {
        assert_eq!(dynamic_batch_size(32, 500), 32);
        assert_eq!(dynamic_batch_size(32, 801), 16);
        assert_eq!(dynamic_batch_size(32, 1601), 8);
        assert_eq!(dynamic_batch_size(2, 3000), 1);
    }

    #[test]
    fn default_order_is_by_utterance_id() {
        let f = fixture(&[("c", 100, "a", 1), ("a", 300, "b", 1), ("b", 200, "a", 1)]);
        let ds = builder(&f, 2).build().unwrap();
        let ids: Vec<&str> = ds
            .rows()
            .iter()
            .map(|&r| ds.record(r).unwrap().utt_id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(ds.set_name(), "train");
        assert_eq!(ds.vocab(), 6);
        assert_eq!(ds.input_dim(), 40);
    }

    #[test]
    fn sorting_by_length_respects_direction() {
        let f = fixture(&[("c", 100, "a", 1), ("a", 300, "b", 1), ("b", 200, "a", 1)]);
        let asc = builder(&f, 2).with_sort_by_input_length(true, false).build().unwrap();
        let lens: Vec<usize> = asc.rows().iter().map(|&r| asc.record(r).unwrap().x_len).collect();
        assert_eq!(lens, vec![100, 200, 300]);
        let desc = builder(&f, 2).with_sort_by_input_length(true, true).build().unwrap();
        let lens: Vec<usize> = desc.rows().iter().map(|&r| desc.record(r).unwrap().x_len).collect();
        assert_eq!(lens, vec![300, 200, 100]);
    }

    #[test]
    fn ctc_filter_drops_targets_longer_than_subsampled_input() {
        let f = fixture(&[("a", 100, "a", 25), ("b", 100, "b", 26)]);
        let src = TaskSource::new(&f.manifest, &f.dict, "word").with_ctc(true, 4);
        let ds = DatasetBuilder::new(src, 4)
            .with_feature_reader(Box::new(ZeroReader))
            .build()
            .unwrap();
        assert_eq!(ds.len(), 1);
        assert_eq!(ds.record(0).unwrap().utt_id, "a");
    }

    #[test]
    fn test_mode_keeps_every_row_and_returns_text() {
        let f = fixture(&[("a", 10, "a b", 2), ("b", 5000, "b", 1)]);
        let mut ds = builder(&f, 8).with_test_mode(true).with_n_epochs(1).build().unwrap();
        assert_eq!(ds.len(), 2);
        let batch = ds.next_batch().unwrap().unwrap();
        assert_eq!(batch.ys, Targets::Text(vec!["a b".into(), "b".into()]));
        assert_eq!(batch.xs.len(), batch.utt_ids.len());
        assert!(ds.is_new_epoch());
        assert!(ds.next_batch().unwrap().is_none());
    }

    #[test]
    fn iteration_covers_every_row_once_per_epoch() {
        let f = fixture(&[("a", 50, "a", 1), ("b", 60, "a", 1), ("c", 70, "a", 1)]);
        let mut ds = builder(&f, 2).with_n_epochs(2).with_shuffle(true).with_seed(7).build().unwrap();
        let mut seen = Vec::new();
        while let Some(batch) = ds.next_batch().unwrap() {
            seen.extend(batch.utt_ids);
            if ds.is_new_epoch() {
                let mut epoch: Vec<String> = std::mem::take(&mut seen);
                epoch.sort();
                assert_eq!(epoch, vec!["a", "b", "c"]);
            }
        }
        assert_eq!(ds.epoch(), 2);
    }

    #[test]
    fn sort_stop_epoch_switches_to_shuffling() {
        let f = fixture(&[("a", 50, "a", 1), ("b", 60, "a", 1)]);
        let mut ds = builder(&f, 2)
            .with_sort_by_input_length(true, false)
            .with_sort_stop_epoch(1)
            .build()
            .unwrap();
        ds.next_batch().unwrap();
        assert!(ds.is_new_epoch());
        assert!(!ds.sort_by_input_length);
        assert!(ds.shuffle);
    }

    #[test]
    fn skip_speech_reads_no_features() {
        let f = fixture(&[("a", 50, "a", 1)]);
        let ds = builder(&f, 1).with_skip_speech(true).build().unwrap();
        let batch = ds.make_batch(&[0]).unwrap();
        assert!(batch.xs.is_empty());
        assert_eq!(batch.ys, Targets::Ids(vec![vec![4]]));
    }

    #[test]
    fn unknown_unit_and_missing_dictionary_fail_at_construction() {
        let f = fixture(&[("a", 50, "a", 1)]);
        let err = DatasetBuilder::new(TaskSource::new(&f.manifest, &f.dict, "syllable"), 1)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, AsrError::InvalidUnit { .. }));
        let err = DatasetBuilder::new(TaskSource::new(&f.manifest, "/nonexistent/dict.txt", "word"), 1)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, AsrError::MissingResource { .. }));
    }
}
