mod types;

pub mod dataset_loader;
pub mod snapshot_cache;
pub mod dataset_merge;
pub mod summary;
pub mod model;
#[cfg(feature = "ml")]
pub mod ml;

pub use types::ImageStack;

#[cfg(feature = "ml")]
use anyhow::Result;
#[cfg(feature = "ml")]
use burn::{
    backend::{Autodiff, NdArray, Wgpu},
    tensor::backend::AutodiffBackend,
};
#[cfg(feature = "ml")]
use log::info;
#[cfg(feature = "ml")]
use rand::SeedableRng;
#[cfg(feature = "ml")]
use std::path::{Path, PathBuf};

#[cfg(feature = "ml")]
use crate::ml::{train_model, TrainingReport};
#[cfg(feature = "ml")]
use crate::model::{save_model_with_metadata, AppConfig, DeviceType, ModelMetadata};

/// 実験を最初から最後まで実行
///
/// 1. クラスごとのスナップショットを用意（既にあればスキップ）
/// 2. スナップショットを結合してone-hotラベルを付与
/// 3. CNNを学習し、サマリーを書き出す
/// 4. 学習済みモデルをメタデータと共に保存
#[cfg(feature = "ml")]
pub fn run_experiment(config: &AppConfig) -> Result<TrainingReport> {
    config.model.validate()?;
    let dataset = &config.dataset;
    let folders: Vec<PathBuf> = dataset.class_folders.iter().map(PathBuf::from).collect();
    if folders.is_empty() {
        anyhow::bail!("クラスフォルダが指定されていません");
    }

    let mut rng = rand::rngs::StdRng::seed_from_u64(config.training.seed);
    let dataset_names = snapshot_cache::maybe_snapshot(
        &folders,
        dataset.image_height,
        dataset.image_width,
        dataset.test_fraction,
        dataset.force_snapshot,
        &mut rng,
    )?;

    let datasets = dataset_merge::merge_datasets(&dataset_names)?;
    info!(
        "Training set {:?} {:?}",
        datasets.train.image_shape(),
        datasets.train.label_shape()
    );
    info!(
        "Test set {:?} {:?}",
        datasets.test.image_shape(),
        datasets.test.label_shape()
    );

    match config.device_type {
        DeviceType::Cpu => {
            let device = burn_ndarray::NdArrayDevice::default();
            train_and_save::<Autodiff<NdArray<f32>>>(config, &datasets, &device)
        }
        DeviceType::Wgpu => {
            let device = burn_wgpu::WgpuDevice::default();
            train_and_save::<Autodiff<Wgpu>>(config, &datasets, &device)
        }
    }
}

#[cfg(feature = "ml")]
fn train_and_save<B: AutodiffBackend>(
    config: &AppConfig,
    datasets: &dataset_merge::MergedDatasets,
    device: &B::Device,
) -> Result<TrainingReport> {
    info!("使用デバイス: {:?}", device);
    let trained = train_model::<B>(config, datasets, device)?;
    let report = trained.report.clone();

    let metadata = ModelMetadata::new(
        config.dataset.class_labels(),
        config.dataset.image_width as u32,
        config.dataset.image_height as u32,
        config.model.clone(),
        report.steps as u32,
        report.final_loss,
        report.minibatch_accuracy,
        report.validation_accuracy,
    );
    let model_binary = trained.to_bytes()?;
    let saved = save_model_with_metadata(
        Path::new(&config.output.model_path),
        &metadata,
        &model_binary,
    )?;
    info!("学習済みモデルを保存しました: {}", saved.display());

    Ok(report)
}
