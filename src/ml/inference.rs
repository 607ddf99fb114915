//! モデル推論機能

use anyhow::Result;
use burn::{
    backend::NdArray,
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, ElementConversion},
};
use std::path::Path;

use crate::ml::{load_image_tensor, ModelConfig, ToothClassifier};
use crate::model::{load_model_with_metadata, ModelMetadata};

/// 1枚分の分類結果
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub class_index: usize,
    pub label: String,
    /// softmax確率
    pub probability: f32,
}

/// 推論エンジン
pub struct InferenceEngine<B: Backend = NdArray<f32>> {
    model: ToothClassifier<B>,
    metadata: ModelMetadata,
    device: B::Device,
}

impl<B: Backend> InferenceEngine<B> {
    /// モデルを読み込んで推論エンジンを初期化
    pub fn load<P: AsRef<Path>>(model_path: P, device: B::Device) -> Result<Self> {
        let (metadata, model_binary) = load_model_with_metadata(model_path.as_ref())?;
        Self::from_parts(metadata, model_binary, device)
    }

    /// メタデータと重みのバイト列から初期化
    pub fn from_parts(metadata: ModelMetadata, model_binary: Vec<u8>, device: B::Device) -> Result<Self> {
        let model_config = ModelConfig::new(
            metadata.num_classes(),
            metadata.image_height as usize,
            metadata.image_width as usize,
        )
        .with_depth(metadata.model.depth)
        .with_patch_size(metadata.model.patch_size)
        .with_num_hidden(metadata.model.num_hidden)
        .with_dropout(0.0); // 推論時はドロップアウトなし

        let model = model_config.init::<B>(&device);

        let record = BinBytesRecorder::<FullPrecisionSettings>::default()
            .load(model_binary, &device)
            .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;
        let model = model.load_record(record);

        Ok(Self {
            model,
            metadata,
            device,
        })
    }

    /// 単一画像を分類
    pub fn classify_image<P: AsRef<Path>>(&self, image_path: P) -> Result<Prediction> {
        let tensor = load_image_tensor::<B>(
            image_path.as_ref(),
            self.metadata.image_height as usize,
            self.metadata.image_width as usize,
            &self.device,
        )?;

        let (predicted, probabilities) = self.model.predict(tensor);
        let class_index = predicted.into_scalar().elem::<i64>() as usize;
        let probability: f32 = probabilities
            .slice([0..1, class_index..class_index + 1])
            .into_scalar()
            .elem();

        let label = self
            .metadata
            .class_label(class_index)
            .ok_or_else(|| anyhow::anyhow!("クラスインデックス {} は範囲外です", class_index))?
            .to_string();

        Ok(Prediction {
            class_index,
            label,
            probability,
        })
    }

    /// 複数画像をバッチ分類
    pub fn classify_batch(&self, image_paths: &[impl AsRef<Path>]) -> Result<Vec<Prediction>> {
        image_paths
            .iter()
            .map(|path| self.classify_image(path))
            .collect()
    }

    /// メタデータへの参照を取得
    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{save_model_with_metadata, ModelSettings};
    use image::{GrayImage, Luma};

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_save_load_and_classify() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ModelSettings {
            depth: 2,
            num_hidden: 4,
            ..ModelSettings::default()
        };
        let model = ModelConfig::new(2, 8, 6)
            .with_depth(settings.depth)
            .with_num_hidden(settings.num_hidden)
            .init::<TestBackend>(&Default::default());
        let binary = BinBytesRecorder::<FullPrecisionSettings>::default()
            .record(model.into_record(), ())
            .unwrap();

        let metadata = ModelMetadata::new(
            vec!["16".into(), "17".into()],
            6,
            8,
            settings,
            0,
            0.0,
            None,
            None,
        );
        let path =
            save_model_with_metadata(&dir.path().join("model"), &metadata, &binary).unwrap();

        let image_path = dir.path().join("crop.png");
        GrayImage::from_pixel(6, 8, Luma([128])).save(&image_path).unwrap();

        let engine = InferenceEngine::<TestBackend>::load(&path, Default::default()).unwrap();
        let prediction = engine.classify_image(&image_path).unwrap();
        assert!(prediction.class_index < 2);
        assert!(["16", "17"].contains(&prediction.label.as_str()));
        assert!(prediction.probability > 0.0 && prediction.probability <= 1.0);

        assert_eq!(engine.metadata().class_labels, vec!["16", "17"]);

        let second = dir.path().join("crop2.png");
        GrayImage::from_pixel(6, 8, Luma([10])).save(&second).unwrap();
        let batch = engine.classify_batch(&[&image_path, &second]).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], prediction);

        let wrong_size = dir.path().join("wrong.png");
        GrayImage::from_pixel(8, 8, Luma([0])).save(&wrong_size).unwrap();
        assert!(engine.classify_image(&wrong_size).is_err());
        assert!(engine.classify_batch(&[&image_path, &wrong_size]).is_err());
    }
}
