//! クラスごとの学習/テストデータのスナップショット
//!
//! クラスフォルダのパス文字列に固定の接尾辞を付けたファイルに、gzip圧縮した
//! JSONとして保存します（例: `train/16` -> `train/16train.snapshot.gz`）。
//!
//! 両方のファイルが存在すれば読み込みと分割は丸ごとスキップされます。
//! 中身のハッシュは取らないため、元画像を差し替えた場合はスナップショットを
//! 削除するか `force` を指定してください。

use crate::dataset_loader::load_class_dataset;
use crate::types::ImageStack;
use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{error, info};
use rand::Rng;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// 学習用スナップショットの接尾辞
pub const TRAIN_SUFFIX: &str = "train.snapshot.gz";
/// テスト用スナップショットの接尾辞
pub const TEST_SUFFIX: &str = "test.snapshot.gz";

/// 1クラス分のスナップショットファイル
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotPaths {
    pub train: PathBuf,
    pub test: PathBuf,
}

impl SnapshotPaths {
    pub fn exists(&self) -> bool {
        self.train.exists() && self.test.exists()
    }
}

/// クラスフォルダに対応するスナップショットのパス
pub fn snapshot_paths(folder: &Path) -> SnapshotPaths {
    let base = folder.to_string_lossy();
    SnapshotPaths {
        train: PathBuf::from(format!("{}{}", base, TRAIN_SUFFIX)),
        test: PathBuf::from(format!("{}{}", base, TEST_SUFFIX)),
    }
}

/// スナップショットを書き込む
pub fn write_snapshot(path: &Path, stack: &ImageStack) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create snapshot: {}", path.display()))?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    serde_json::to_writer(&mut encoder, stack)
        .with_context(|| format!("Failed to serialize snapshot: {}", path.display()))?;
    encoder.finish()?.flush()?;
    Ok(())
}

/// スナップショットを読み込む
pub fn read_snapshot(path: &Path) -> Result<ImageStack> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open snapshot: {}", path.display()))?;
    let decoder = GzDecoder::new(BufReader::new(file));
    let stack: ImageStack = serde_json::from_reader(decoder)
        .with_context(|| format!("Failed to deserialize snapshot: {}", path.display()))?;

    if stack.sample_len() > 0 && stack.data.len() % stack.sample_len() != 0 {
        anyhow::bail!(
            "Corrupted snapshot {}: {} values do not fill {}x{} images",
            path.display(),
            stack.data.len(),
            stack.height,
            stack.width
        );
    }

    Ok(stack)
}

fn write_pair(paths: &SnapshotPaths, train: &ImageStack, test: &ImageStack) -> Result<()> {
    write_snapshot(&paths.train, train)?;
    write_snapshot(&paths.test, test)?;
    Ok(())
}

/// 必要なクラスだけ読み込み・分割してスナップショットを作る
///
/// `loader` はスナップショットが無い（または `force`）クラスに対してのみ
/// 呼ばれ、そのエラーはそのまま返します。書き込みに失敗したクラスは
/// ログを出して続行し、スナップショットが無い状態になります。
pub fn maybe_snapshot_with<F>(
    folders: &[PathBuf],
    force: bool,
    mut loader: F,
) -> Result<Vec<PathBuf>>
where
    F: FnMut(&Path) -> Result<(ImageStack, ImageStack)>,
{
    let mut dataset_names = Vec::with_capacity(folders.len());

    for folder in folders {
        dataset_names.push(folder.clone());
        let paths = snapshot_paths(folder);

        if paths.exists() && !force {
            info!("{} already present - Skipping snapshot.", folder.display());
            continue;
        }

        info!("Snapshotting {}.", folder.display());
        let (train, test) = loader(folder)?;
        if let Err(e) = write_pair(&paths, &train, &test) {
            error!("Unable to save data to {}: {:#}", folder.display(), e);
            std::fs::remove_file(&paths.train).ok();
            std::fs::remove_file(&paths.test).ok();
        }
    }

    Ok(dataset_names)
}

/// 画像フォルダ群のスナップショットを用意する
pub fn maybe_snapshot<R: Rng + ?Sized>(
    folders: &[PathBuf],
    height: usize,
    width: usize,
    test_fraction: f64,
    force: bool,
    rng: &mut R,
) -> Result<Vec<PathBuf>> {
    maybe_snapshot_with(folders, force, |folder| {
        load_class_dataset(folder, height, width, test_fraction, rng)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use rand::SeedableRng;

    fn class_folder(root: &Path, name: &str, count: u8) -> PathBuf {
        let folder = root.join(name);
        std::fs::create_dir_all(&folder).unwrap();
        for i in 0..count {
            GrayImage::from_pixel(2, 3, Luma([i]))
                .save(folder.join(format!("{}.png", i)))
                .unwrap();
        }
        folder
    }

    #[test]
    fn test_snapshot_paths_append_suffix() {
        let paths = snapshot_paths(Path::new("train/16"));
        assert_eq!(paths.train, PathBuf::from("train/16train.snapshot.gz"));
        assert_eq!(paths.test, PathBuf::from("train/16test.snapshot.gz"));
    }

    #[test]
    fn test_write_and_read_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.snapshot.gz");
        let mut stack = ImageStack::new(2, 2);
        stack.push(&[-0.5, 0.0, 0.25, 0.5]);

        write_snapshot(&path, &stack).unwrap();
        assert_eq!(read_snapshot(&path).unwrap(), stack);
    }

    #[test]
    fn test_read_missing_snapshot_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_snapshot(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_existing_snapshots_are_not_recomputed() {
        let dir = tempfile::tempdir().unwrap();
        let folder = class_folder(dir.path(), "16", 10);
        let folders = vec![folder.clone()];
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);

        let names = maybe_snapshot(&folders, 3, 2, 0.1, false, &mut rng).unwrap();
        assert_eq!(names, folders);
        let paths = snapshot_paths(&folder);
        assert!(paths.exists());
        assert_eq!(read_snapshot(&paths.train).unwrap().len(), 9);
        assert_eq!(read_snapshot(&paths.test).unwrap().len(), 1);

        let train_before = std::fs::read(&paths.train).unwrap();
        let test_before = std::fs::read(&paths.test).unwrap();

        let mut calls = 0;
        maybe_snapshot_with(&folders, false, |folder| {
            calls += 1;
            load_class_dataset(folder, 3, 2, 0.1, &mut rng)
        })
        .unwrap();
        assert_eq!(calls, 0);
        assert_eq!(std::fs::read(&paths.train).unwrap(), train_before);
        assert_eq!(std::fs::read(&paths.test).unwrap(), test_before);
    }

    #[test]
    fn test_force_recomputes() {
        let dir = tempfile::tempdir().unwrap();
        let folder = class_folder(dir.path(), "17", 4);
        let folders = vec![folder];

        let mut calls = 0;
        for _ in 0..2 {
            maybe_snapshot_with(&folders, true, |_| {
                calls += 1;
                Ok((ImageStack::new(3, 2), ImageStack::new(3, 2)))
            })
            .unwrap();
        }
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_missing_class_folder_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let folders = vec![dir.path().join("26")];
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);

        assert!(maybe_snapshot(&folders, 3, 2, 0.1, false, &mut rng).is_err());
        assert!(!snapshot_paths(&folders[0]).train.exists());
    }

    #[test]
    fn test_write_failure_leaves_class_uncached() {
        let dir = tempfile::tempdir().unwrap();
        // 親ディレクトリが無いのでスナップショットを作れない
        let folders = vec![dir.path().join("absent").join("27")];

        let names = maybe_snapshot_with(&folders, false, |_| {
            let mut stack = ImageStack::new(3, 2);
            stack.push(&[0.0; 6]);
            Ok((stack.clone(), stack))
        })
        .unwrap();
        assert_eq!(names, folders);

        let paths = snapshot_paths(&folders[0]);
        assert!(!paths.train.exists());
        assert!(!paths.test.exists());
    }
}
