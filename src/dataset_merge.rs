//! クラスごとのスナップショットを結合し、one-hotラベルを付けた学習/テストデータを作る

use crate::snapshot_cache::{read_snapshot, snapshot_paths};
use crate::types::ImageStack;
use anyhow::Result;
use log::info;
use std::path::PathBuf;

/// one-hotベクトル
pub fn one_hot(index: usize, num_classes: usize) -> Vec<f32> {
    let mut v = vec![0.0; num_classes];
    if let Some(slot) = v.get_mut(index) {
        *slot = 1.0;
    }
    v
}

/// ラベル付き画像 (count, height, width, 1) + (count, num_classes)
#[derive(Debug, Clone)]
pub struct LabeledImages {
    pub images: ImageStack,
    /// 行優先の one-hot ラベル
    pub labels: Vec<f32>,
    pub num_classes: usize,
}

impl LabeledImages {
    fn empty(num_classes: usize) -> Self {
        Self {
            images: ImageStack::new(0, 0),
            labels: Vec::new(),
            num_classes,
        }
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// チャネル次元を末尾に付けた画像の形状
    pub fn image_shape(&self) -> [usize; 4] {
        [self.len(), self.images.height, self.images.width, 1]
    }

    pub fn label_shape(&self) -> [usize; 2] {
        [self.labels.len() / self.num_classes.max(1), self.num_classes]
    }

    pub fn label(&self, index: usize) -> Option<&[f32]> {
        self.labels
            .get(index * self.num_classes..(index + 1) * self.num_classes)
    }

    /// ラベルのクラス番号
    pub fn class_index(&self, index: usize) -> Option<usize> {
        self.label(index)?.iter().position(|&v| v == 1.0)
    }

    fn append(&mut self, stack: ImageStack, class_index: usize) -> Result<()> {
        if self.images.sample_len() == 0 && self.images.data.is_empty() {
            self.images = ImageStack::new(stack.height, stack.width);
        }
        if (stack.height, stack.width) != (self.images.height, self.images.width) {
            anyhow::bail!(
                "Image shape mismatch while merging: {}x{} vs {}x{}",
                stack.height,
                stack.width,
                self.images.height,
                self.images.width
            );
        }

        let label = one_hot(class_index, self.num_classes);
        for _ in 0..stack.len() {
            self.labels.extend_from_slice(&label);
        }
        self.images.data.extend(stack.data);
        Ok(())
    }
}

/// 結合済みの学習/テストデータ
#[derive(Debug, Clone)]
pub struct MergedDatasets {
    pub train: LabeledImages,
    pub test: LabeledImages,
}

/// スナップショットを順に読み込んで結合
///
/// フォルダの並び順がそのままラベル番号になります。
/// どれか1つでもスナップショットが読めなければエラーになります。
pub fn merge_datasets(folders: &[PathBuf]) -> Result<MergedDatasets> {
    let num_classes = folders.len();
    let mut train = LabeledImages::empty(num_classes);
    let mut test = LabeledImages::empty(num_classes);

    for (index, folder) in folders.iter().enumerate() {
        let paths = snapshot_paths(folder);

        let dataset = read_snapshot(&paths.train)?;
        info!("{} {} {}", dataset.len(), dataset.mean(), dataset.std_dev());
        train.append(dataset, index)?;

        let dataset = read_snapshot(&paths.test)?;
        info!("{} {} {}", dataset.len(), dataset.mean(), dataset.std_dev());
        test.append(dataset, index)?;
    }

    Ok(MergedDatasets { train, test })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot_cache::write_snapshot;
    use std::path::Path;

    fn write_class(root: &Path, name: &str, train: usize, test: usize, value: f32) -> PathBuf {
        let folder = root.join(name);
        let paths = snapshot_paths(&folder);
        let mut train_stack = ImageStack::new(2, 1);
        for _ in 0..train {
            train_stack.push(&[value, value]);
        }
        let mut test_stack = ImageStack::new(2, 1);
        for _ in 0..test {
            test_stack.push(&[value, value]);
        }
        write_snapshot(&paths.train, &train_stack).unwrap();
        write_snapshot(&paths.test, &test_stack).unwrap();
        folder
    }

    #[test]
    fn test_one_hot() {
        assert_eq!(one_hot(0, 3), vec![1.0, 0.0, 0.0]);
        assert_eq!(one_hot(2, 3), vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_merge_two_classes() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_class(dir.path(), "a", 3, 1, 0.1);
        let b = write_class(dir.path(), "b", 2, 1, 0.2);

        let merged = merge_datasets(&[a, b]).unwrap();
        assert_eq!(merged.train.image_shape(), [5, 2, 1, 1]);
        assert_eq!(merged.train.label_shape(), [5, 2]);
        assert_eq!(merged.test.image_shape(), [2, 2, 1, 1]);
        assert_eq!(merged.test.label_shape(), [2, 2]);

        for i in 0..3 {
            assert_eq!(merged.train.label(i), Some(&[1.0, 0.0][..]));
        }
        for i in 3..5 {
            assert_eq!(merged.train.label(i), Some(&[0.0, 1.0][..]));
        }
        assert_eq!(merged.train.images.sample(4), Some(&[0.2, 0.2][..]));
        assert_eq!(merged.test.class_index(1), Some(1));
    }

    #[test]
    fn test_missing_snapshot_aborts_merge() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_class(dir.path(), "a", 1, 1, 0.0);
        let missing = dir.path().join("missing");

        assert!(merge_datasets(&[a, missing]).is_err());
    }

    #[test]
    fn test_shape_mismatch_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_class(dir.path(), "a", 1, 1, 0.0);
        let b = dir.path().join("b");
        let paths = snapshot_paths(&b);
        let mut odd = ImageStack::new(1, 1);
        odd.push(&[0.0]);
        write_snapshot(&paths.train, &odd).unwrap();
        write_snapshot(&paths.test, &odd).unwrap();

        assert!(merge_datasets(&[a, b]).is_err());
    }
}
