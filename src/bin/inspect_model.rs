//! 保存済みモデルのメタデータ表示と画像分類ツール
//!
//! 使い方: inspect_model [model.tar.gz] [画像ファイル...]

use burn::backend::NdArray;
use std::path::PathBuf;
use tooth_classifier_lib::ml::InferenceEngine;
use tooth_classifier_lib::model::{load_metadata, print_metadata_info, AppConfig};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let model_path = if args.len() > 1 {
        PathBuf::from(&args[1])
    } else {
        PathBuf::from(AppConfig::default().output.model_path)
    };
    let images: Vec<PathBuf> = args.iter().skip(2).map(PathBuf::from).collect();

    log::info!("Test 1: モデルメタデータ読み込み");
    match load_metadata(&model_path) {
        Ok(metadata) => {
            log::info!("✓ モデルメタデータ読み込み成功: {}", model_path.display());
            print_metadata_info(&metadata);
        }
        Err(e) => {
            log::error!("✗ エラー: {:#}", e);
            std::process::exit(1);
        }
    }

    if images.is_empty() {
        return;
    }

    log::info!("Test 2: 画像分類");
    let engine = match InferenceEngine::<NdArray<f32>>::load(&model_path, Default::default()) {
        Ok(engine) => engine,
        Err(e) => {
            log::error!("✗ モデル読み込みエラー: {:#}", e);
            std::process::exit(1);
        }
    };

    log::info!(
        "クラス: {} ({} 画像)",
        engine.metadata().class_labels.join(", "),
        images.len()
    );
    match engine.classify_batch(&images) {
        Ok(predictions) => {
            for (image, prediction) in images.iter().zip(&predictions) {
                log::info!(
                    "  {} -> {} ({:.1}%)",
                    image.display(),
                    prediction.label,
                    prediction.probability * 100.0
                );
            }
        }
        Err(e) => {
            log::error!("✗ 分類エラー: {:#}", e);
            std::process::exit(1);
        }
    }
}
