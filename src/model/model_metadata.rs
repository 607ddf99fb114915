//! モデルメタデータの定義
//!
//! tar.gz形式でモデルと一緒に保存され、推論時のモデル再構築に使われます。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::config::ModelSettings;

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// クラスラベル（ラベル番号順）
    /// 例: ["16", "17", "26", "27", "36", "37", "46", "47"]
    pub class_labels: Vec<String>,

    /// 学習データの画像幅（ピクセル）
    pub image_width: u32,

    /// 学習データの画像高さ（ピクセル）
    pub image_height: u32,

    /// モデル構成（推論時の再構築に使用）
    pub model: ModelSettings,

    /// 実行した学習ステップ数
    pub num_steps: u32,

    /// 最後のステップの損失
    pub final_loss: f64,

    /// 最後に評価したミニバッチ精度 [%]
    #[serde(default)]
    pub minibatch_accuracy: Option<f64>,

    /// 最後に評価した検証精度 [%]
    #[serde(default)]
    pub validation_accuracy: Option<f64>,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(
        class_labels: Vec<String>,
        image_width: u32,
        image_height: u32,
        model: ModelSettings,
        num_steps: u32,
        final_loss: f64,
        minibatch_accuracy: Option<f64>,
        validation_accuracy: Option<f64>,
    ) -> Self {
        let trained_at = chrono::Local::now().to_rfc3339();

        Self {
            class_labels,
            image_width,
            image_height,
            model,
            num_steps,
            final_loss,
            minibatch_accuracy,
            validation_accuracy,
            trained_at,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.class_labels.len()
    }

    /// クラスインデックスからラベルを取得
    pub fn class_label(&self, index: usize) -> Option<&str> {
        self.class_labels.get(index).map(String::as_str)
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}
