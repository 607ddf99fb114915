//! クラスフォルダからの画像読み込みと学習/テスト分割

use crate::types::ImageStack;
use anyhow::{Context, Result};
use log::{info, warn};
use rand::Rng;
use std::path::Path;

/// 画素値の階調数
pub const PIXEL_DEPTH: f32 = 255.0;

/// 画素値を [-0.5, 0.5] に正規化
pub fn normalize_pixel(value: u8) -> f32 {
    (value as f32 - PIXEL_DEPTH / 2.0) / PIXEL_DEPTH
}

/// 学習/テストの分割位置 floor(count * (1 - test_fraction))
pub fn split_point(count: usize, test_fraction: f64) -> usize {
    ((count as f64 * (1.0 - test_fraction)) as usize).min(count)
}

/// 画像1枚を読み込んでグレースケール化・サイズ検証・正規化
pub fn load_grayscale_image(path: &Path, height: usize, width: usize) -> Result<Vec<f32>> {
    let img = image::open(path)
        .with_context(|| format!("Could not read: {}", path.display()))?
        .to_luma8();
    let (w, h) = img.dimensions();

    if h as usize != height || w as usize != width {
        anyhow::bail!(
            "Unexpected image shape: ({}, {}) (expected ({}, {}))",
            h,
            w,
            height,
            width
        );
    }

    Ok(img.pixels().map(|p| normalize_pixel(p[0])).collect())
}

/// クラスフォルダ内の画像をすべて読み込む
///
/// 読めないファイルやサイズ違いの画像は警告を出してスキップします。
/// 失敗するのはフォルダ自体が列挙できない場合のみです。
pub fn load_class_images(folder: &Path, height: usize, width: usize) -> Result<ImageStack> {
    let mut entries: Vec<_> = std::fs::read_dir(folder)
        .with_context(|| format!("Failed to list class folder: {}", folder.display()))?
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("Failed to read entry in class folder: {}", folder.display()))?;
    entries.sort_by_key(|entry| entry.file_name());

    let mut stack = ImageStack::new(height, width);
    for entry in entries {
        let path = entry.path();
        match load_grayscale_image(&path, height, width) {
            Ok(pixels) => {
                stack.push(&pixels);
            }
            Err(e) => {
                warn!("{:#} - it's ok, skipping.", e);
            }
        }
    }

    Ok(stack)
}

/// クラスフォルダを読み込み、シャッフルして学習用とテスト用に分割
pub fn load_class_dataset<R: Rng + ?Sized>(
    folder: &Path,
    height: usize,
    width: usize,
    test_fraction: f64,
    rng: &mut R,
) -> Result<(ImageStack, ImageStack)> {
    let mut stack = load_class_images(folder, height, width)?;
    stack.shuffle(rng);

    info!("Full dataset tensor: {:?}", stack.shape());
    info!("Mean: {}", stack.mean());
    info!("Standard deviation: {}", stack.std_dev());

    let split = split_point(stack.len(), test_fraction);
    Ok(stack.split_at(split))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use rand::SeedableRng;

    fn write_gray(path: &Path, width: u32, height: u32, value: u8) {
        GrayImage::from_pixel(width, height, Luma([value]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn test_normalize_pixel_range() {
        assert!((normalize_pixel(0) + 0.5).abs() < 1e-6);
        assert!((normalize_pixel(255) - 0.5).abs() < 1e-6);
        for v in 0..=255u8 {
            let n = normalize_pixel(v);
            assert!((-0.5..=0.5).contains(&n));
        }
    }

    #[test]
    fn test_split_point() {
        assert_eq!(split_point(10, 0.1), 9);
        assert_eq!(split_point(25, 0.1), 22);
        assert_eq!(split_point(1, 0.1), 0);
        assert_eq!(split_point(0, 0.1), 0);
    }

    #[test]
    fn test_unreadable_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.png"), b"not an image").unwrap();
        write_gray(&dir.path().join("ok.png"), 4, 6, 255);

        let stack = load_class_images(dir.path(), 6, 4).unwrap();
        assert_eq!(stack.len(), 1);
        assert!(stack.data.iter().all(|&v| (v - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_wrong_shape_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_gray(&dir.path().join("a.png"), 4, 6, 0);
        write_gray(&dir.path().join("b.png"), 6, 4, 0);

        let stack = load_class_images(dir.path(), 6, 4).unwrap();
        assert_eq!(stack.shape(), [1, 6, 4]);
    }

    #[test]
    fn test_missing_folder_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_class_images(&dir.path().join("nope"), 6, 4).unwrap_err();
        assert!(format!("{:#}", err).contains("nope"));
    }

    #[test]
    fn test_train_test_partition_sizes() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..13u8 {
            write_gray(&dir.path().join(format!("{:02}.png", i)), 3, 2, i * 10);
        }

        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let (train, test) = load_class_dataset(dir.path(), 2, 3, 0.1, &mut rng).unwrap();
        assert_eq!(train.len(), 11);
        assert_eq!(test.len(), 2);
        assert_eq!(train.len() + test.len(), 13);
    }
}
