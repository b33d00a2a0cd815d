use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use nested_asr::dataset::FeatureReader;
use nested_asr::{
    AsrError, DecodeParams, EvalConfig, EvaluatorBuilder, FeatureMatrix, Hypothesis, Recognition,
    Recognizer, Unit,
};

/// Feature matrices carry their utterance key as the only value.
struct KeyReader;

impl FeatureReader for KeyReader {
    fn read(&self, feat_path: &str) -> Result<FeatureMatrix, AsrError> {
        let key: f32 = feat_path
            .rsplit('/')
            .next()
            .and_then(|k| k.parse().ok())
            .ok_or_else(|| AsrError::invalid_input(format!("bad feature path '{feat_path}'")))?;
        Ok(FeatureMatrix::new(1, 1, vec![key]))
    }
}

#[derive(Default)]
struct Scripted {
    unit: Option<Unit>,
    sub1_unit: Option<Unit>,
    main: HashMap<u32, Vec<usize>>,
    sub1: HashMap<u32, Vec<usize>>,
    calls: Arc<AtomicUsize>,
}

impl Recognizer for Scripted {
    fn unit(&self) -> Unit {
        self.unit.unwrap_or(Unit::Word)
    }

    fn sub1_unit(&self) -> Option<Unit> {
        self.sub1_unit
    }

    fn decode(&self, xs: &FeatureMatrix, _params: &DecodeParams) -> Result<Recognition, AsrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = xs.data[0] as u32;
        let hyp = |ids: Option<&Vec<usize>>| Hypothesis {
            ids: ids.cloned().unwrap_or_default(),
            ..Hypothesis::default()
        };
        Ok(Recognition {
            nbest: vec![hyp(self.main.get(&key))],
            sub1: self.sub1_unit.map(|_| hyp(self.sub1.get(&key))),
        })
    }

    fn score_sequence(&self, _xs: &FeatureMatrix, _ids: &[usize]) -> Result<f64, AsrError> {
        Ok(0.0)
    }
}

fn write_manifest(path: &Path, rows: &[(u32, &str)]) {
    let mut csv = String::from("utt_id,feat_path,x_len,x_dim,text,token_id,y_len,y_dim\n");
    for (key, text) in rows {
        csv.push_str(&format!("utt{key},feats/{key},100,1,{text},4,1,8\n"));
    }
    fs::write(path, csv).unwrap();
}

fn config(root: &Path, sets: &[&str]) -> EvalConfig {
    EvalConfig {
        model_dir: root.join("model"),
        decode_dir: root.join("decode"),
        eval_sets: sets.iter().map(|s| root.join(s)).collect(),
        ..EvalConfig::default()
    }
}

fn word_fixture(root: &Path) {
    fs::create_dir_all(root.join("model")).unwrap();
    fs::write(
        root.join("model").join("dict.txt"),
        "<unk> 1\n<eos> 2\n<pad> 3\na 4\nb 5\nc 6\nd 7\n",
    )
    .unwrap();
    write_manifest(&root.join("dev.csv"), &[(1, "a b"), (2, "a b c z")]);
    write_manifest(&root.join("test.csv"), &[(3, "a b c d")]);
}

#[test]
fn word_sets_are_scored_and_averaged() {
    let dir = tempfile::tempdir().unwrap();
    word_fixture(dir.path());
    let recognizer = Scripted {
        main: HashMap::from([(1, vec![4, 5]), (2, vec![4, 5, 6]), (3, vec![4, 6, 6, 7])]),
        ..Scripted::default()
    };

    let evaluator = EvaluatorBuilder::new(config(dir.path(), &["dev.csv", "test.csv"]))
        .with_recognizer(Box::new(recognizer))
        .with_feature_reader(Arc::new(KeyReader))
        .build()
        .unwrap();
    let mut finished = Vec::new();
    let summary = evaluator
        .run_with(|event| {
            if let nested_asr::Progress::SetFinished { set_name } = event {
                finished.push(set_name.to_string());
            }
        })
        .unwrap();

    assert_eq!(finished, vec!["dev", "test"]);
    let dev = summary.sets[0].metric("WER").unwrap();
    let test = summary.sets[1].metric("WER").unwrap();
    assert!((dev.error_rate - 100.0 / 6.0).abs() < 1e-9);
    assert_eq!(dev.counts.deletions, 1);
    assert!((test.error_rate - 25.0).abs() < 1e-9);
    assert_eq!(summary.sets[0].oov_total, Some(1));
    assert_eq!(summary.sets[1].oov_total, Some(0));

    let mean = summary.mean("WER").unwrap();
    assert_eq!(format!("{mean:.3}"), format!("{:.3}", (dev.error_rate + test.error_rate) / 2.0));

    let log = fs::read_to_string(dir.path().join("decode").join("decode.log")).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert!(lines.contains(&"beam width: 1"));
    assert!(lines.contains(&"epoch: 0"));
    assert!(lines.contains(&"WER (dev): 16.667 %"));
    assert!(lines.contains(&"SUB: 0.000 / INS: 0.000 / DEL: 16.667"));
    assert!(lines.contains(&"OOV (total): 1"));
    assert!(lines.contains(&"WER (test): 25.000 %"));
    assert_eq!(lines.last(), Some(&"WER (mean): 20.833 %"));

    let hyp_trn = fs::read_to_string(dir.path().join("decode").join("dev").join("hyp.trn")).unwrap();
    assert_eq!(hyp_trn, "a b (utt1)\na b c (utt2)\n");
}

#[test]
fn character_sub_task_is_scored_with_wer_and_cer() {
    let dir = tempfile::tempdir().unwrap();
    word_fixture(dir.path());
    fs::write(
        dir.path().join("model").join("dict_sub1.txt"),
        "<unk> 1\n<eos> 2\n<pad> 3\na 4\nb 5\nc 6\nd 7\n<space> 8\n",
    )
    .unwrap();
    write_manifest(&dir.path().join("eval.csv"), &[(5, "ab cd")]);

    let mut cfg = config(dir.path(), &["eval.csv"]);
    cfg.decode.recog_unit = Some("char".to_string());
    let recognizer = Scripted {
        sub1_unit: Some(Unit::Char),
        sub1: HashMap::from([(5, vec![4, 5, 8, 6, 5])]),
        ..Scripted::default()
    };
    let summary = EvaluatorBuilder::new(cfg)
        .with_recognizer(Box::new(recognizer))
        .with_feature_reader(Arc::new(KeyReader))
        .build()
        .unwrap()
        .run()
        .unwrap();

    let set = &summary.sets[0];
    assert!((set.metric("WER").unwrap().error_rate - 50.0).abs() < 1e-9);
    assert!((set.metric("CER").unwrap().error_rate - 25.0).abs() < 1e-9);
    assert_eq!(set.oov_total, None);

    let log = fs::read_to_string(dir.path().join("decode").join("decode.log")).unwrap();
    assert!(log.contains("WER / CER (eval): 50.000 / 25.000 %"));
    assert!(!log.contains("OOV"));
}

#[test]
fn unknown_recog_unit_fails_before_decoding() {
    let dir = tempfile::tempdir().unwrap();
    word_fixture(dir.path());
    let calls = Arc::new(AtomicUsize::new(0));
    let recognizer = Scripted {
        calls: Arc::clone(&calls),
        ..Scripted::default()
    };
    let mut cfg = config(dir.path(), &["dev.csv"]);
    cfg.decode.recog_unit = Some("syllable".to_string());

    let err = EvaluatorBuilder::new(cfg)
        .with_recognizer(Box::new(recognizer))
        .with_feature_reader(Arc::new(KeyReader))
        .build()
        .err()
        .unwrap();

    assert!(matches!(err, AsrError::InvalidUnit { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!dir.path().join("decode").join("decode.log").exists());
}
