//! 回転系列データセット
//!
//! JSONL 形式（1 行 1 系列）:
//!
//! ```text
//! {"yaw": [0.1, -0.4, ...], "pitch": [0.0, 0.2, ...], "cheat": true}
//! ```
//!
//! `cheat` は判定用の入力では省略できる。

use std::io::BufRead;
use std::path::Path;

use aimrnn_core::{LabeledSeries, RotationSeries};
use anyhow::{Context, Result};
use serde::Deserialize;

use crate::common::io::open_reader;

/// JSONL の 1 行
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SeriesRecord {
    pub yaw: Vec<f64>,
    pub pitch: Vec<f64>,
    #[serde(default)]
    pub cheat: Option<bool>,
}

impl SeriesRecord {
    pub fn series(&self) -> RotationSeries {
        RotationSeries::new(self.yaw.clone(), self.pitch.clone())
    }

    /// ラベル付きなら `LabeledSeries` に変換
    pub fn labeled(self) -> Option<LabeledSeries> {
        let cheat = self.cheat?;
        Some(LabeledSeries::new(RotationSeries::new(self.yaw, self.pitch), cheat))
    }
}

/// 行番号（0 始まり）付きで読み込む
///
/// 空行は無視し、解析できない行は警告を出して飛ばす。
pub fn read_records<R: BufRead>(
    reader: R,
    limit: Option<usize>,
) -> Result<Vec<(usize, SeriesRecord)>> {
    let mut records = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        if limit.is_some_and(|lim| records.len() >= lim) {
            break;
        }
        let line = line.with_context(|| format!("Failed to read line {}", i + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<SeriesRecord>(trimmed) {
            Ok(rec) => {
                if rec.yaw.len() != rec.pitch.len() {
                    log::warn!(
                        "Line {}: yaw/pitch length differ ({} vs {}); using the shorter one",
                        i + 1,
                        rec.yaw.len(),
                        rec.pitch.len()
                    );
                }
                records.push((i, rec));
            }
            Err(e) => log::warn!("Skipping line {}: {e}", i + 1),
        }
    }
    Ok(records)
}

/// 判定用の系列を読み込む
pub fn load_records<P: AsRef<Path>>(
    path: P,
    limit: Option<usize>,
) -> Result<Vec<(usize, SeriesRecord)>> {
    let path = path.as_ref();
    let reader = open_reader(path).with_context(|| format!("Failed to open {}", path.display()))?;
    read_records(reader, limit).with_context(|| format!("Failed to read {}", path.display()))
}

/// 学習用データセットを読み込む（ラベルの無い行は飛ばす）
pub fn load_dataset<P: AsRef<Path>>(path: P, limit: Option<usize>) -> Result<Vec<LabeledSeries>> {
    let records = load_records(path, None)?;
    let mut dataset = Vec::with_capacity(records.len());
    let mut unlabeled = 0usize;
    for (_, rec) in records {
        if limit.is_some_and(|lim| dataset.len() >= lim) {
            break;
        }
        match rec.labeled() {
            Some(item) => dataset.push(item),
            None => unlabeled += 1,
        }
    }
    if unlabeled > 0 {
        log::warn!("Skipped {unlabeled} records without a cheat label");
    }
    let positives = dataset.iter().filter(|s| s.cheat).count();
    log::info!(
        "Loaded {} series ({} cheat, {} normal)",
        dataset.len(),
        positives,
        dataset.len() - positives
    );
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    const SAMPLE: &str = r#"{"yaw":[1.0,2.0,3.0],"pitch":[0.5,0.25,0.0],"cheat":true}

not json
{"yaw":[0.1,0.2],"pitch":[0.3,0.4]}
{"yaw":[4.0,5.0],"pitch":[6.0],"cheat":false}
"#;

    #[test]
    fn test_read_records_skips_bad_and_blank_lines() {
        let records = read_records(Cursor::new(SAMPLE), None).unwrap();
        let lines: Vec<usize> = records.iter().map(|(i, _)| *i).collect();
        assert_eq!(lines, vec![0, 3, 4]);
        assert_eq!(records[0].1.cheat, Some(true));
        assert_eq!(records[1].1.cheat, None);
        assert_eq!(records[2].1.series().len(), 1);
    }

    #[test]
    fn test_read_records_limit() {
        let records = read_records(Cursor::new(SAMPLE), Some(2)).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_load_dataset_keeps_labeled_only() {
        let mut file = tempfile::Builder::new().suffix(".jsonl").tempfile().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        file.flush().unwrap();

        let dataset = load_dataset(file.path(), None).unwrap();
        assert_eq!(dataset.len(), 2);
        assert!(dataset[0].cheat);
        assert!(!dataset[1].cheat);
        assert_eq!(dataset[0].series.pairs()[1], [2.0, 0.25]);

        let limited = load_dataset(file.path(), Some(1)).unwrap();
        assert_eq!(limited.len(), 1);
    }
}
