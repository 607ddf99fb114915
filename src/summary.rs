//! 学習中のスカラー値（損失・学習率）をCSVとして書き出す
//!
//! `<log_dir>/scalars.csv` に `step,tag,value` の形式で追記します。

use anyhow::{Context, Result};
use csv::{ReaderBuilder, Writer};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};

/// サマリーファイル名
pub const SUMMARY_FILE: &str = "scalars.csv";

/// 1行分のスカラー記録
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarRecord {
    pub step: usize,
    pub tag: String,
    pub value: f64,
}

pub struct SummaryWriter {
    writer: Writer<File>,
    path: PathBuf,
}

impl SummaryWriter {
    /// ログディレクトリを作成してサマリーファイルを開く（既存ファイルは上書き）
    pub fn create(log_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create summary directory: {}", log_dir.display()))?;
        let path = log_dir.join(SUMMARY_FILE);
        let writer = Writer::from_path(&path)
            .with_context(|| format!("Failed to create summary file: {}", path.display()))?;
        Ok(Self { writer, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add_scalar(&mut self, step: usize, tag: &str, value: f64) -> Result<()> {
        self.writer.serialize(ScalarRecord {
            step,
            tag: tag.to_string(),
            value,
        })?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// サマリーファイルを読み込む
pub fn load_scalars(path: &Path) -> Result<Vec<ScalarRecord>> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;
    let mut records = Vec::new();
    for result in reader.deserialize() {
        records.push(result?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_load_scalars() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("train");

        let mut writer = SummaryWriter::create(&log_dir).unwrap();
        writer.add_scalar(1, "loss", 2.5).unwrap();
        writer.add_scalar(2, "loss", 1.25).unwrap();
        writer.flush().unwrap();

        let content = std::fs::read_to_string(writer.path()).unwrap();
        assert!(content.starts_with("step,tag,value"));

        let records = load_scalars(writer.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[1],
            ScalarRecord {
                step: 2,
                tag: "loss".to_string(),
                value: 1.25
            }
        );
    }
}
