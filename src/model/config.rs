//! 実験設定管理モジュール
//!
//! データセット・モデル・学習・出力の各設定をJSON形式で保存・読み込みします。
//! 設定ファイルが無い場合は実験の固定値（デフォルト値）がそのまま使われます。

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 計算デバイスの種類
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    Wgpu,
    /// NdArray (CPU) バックエンド
    Cpu,
}

impl Default for DeviceType {
    fn default() -> Self {
        DeviceType::Cpu
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// データセット設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSettings {
    /// クラスごとの画像フォルダ（順序がラベル番号になる）
    pub class_folders: Vec<String>,
    /// 画像の幅（ピクセル）
    pub image_width: usize,
    /// 画像の高さ（ピクセル）
    pub image_height: usize,
    /// テストデータの割合
    pub test_fraction: f64,
    /// 既存のスナップショットを無視して作り直す
    #[serde(default)]
    pub force_snapshot: bool,
}

impl Default for DatasetSettings {
    fn default() -> Self {
        Self {
            class_folders: ["16", "17", "26", "27", "36", "37", "46", "47"]
                .iter()
                .map(|position| format!("train/{}", position))
                .collect(),
            image_width: 50,
            image_height: 100,
            test_fraction: 0.1,
            force_snapshot: false,
        }
    }
}

impl DatasetSettings {
    /// ラベル名（フォルダ名の末尾）
    pub fn class_labels(&self) -> Vec<String> {
        self.class_folders
            .iter()
            .map(|folder| {
                Path::new(folder)
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_else(|| folder.clone())
            })
            .collect()
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// 畳み込みカーネルサイズ
    pub patch_size: usize,
    /// 畳み込みのチャネル数
    pub depth: usize,
    /// 全結合隠れ層のユニット数
    pub num_hidden: usize,
    /// ドロップアウト率（破棄する確率）
    pub dropout: f64,
    /// 重み初期化の標準偏差
    pub weight_stddev: f64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            patch_size: 5,
            depth: 16,
            num_hidden: 64,
            dropout: 0.2,
            weight_stddev: 0.1,
        }
    }
}

impl ModelSettings {
    /// 設定値の妥当性を確認
    ///
    /// SAME畳み込みは奇数のカーネルサイズのみ対応しています。
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.patch_size % 2 == 0 {
            anyhow::bail!(
                "patch_size は奇数である必要があります (指定値: {})",
                self.patch_size
            );
        }
        if self.depth == 0 || self.num_hidden == 0 {
            anyhow::bail!("depth と num_hidden は1以上である必要があります");
        }
        if !(0.0..1.0).contains(&self.dropout) {
            anyhow::bail!("dropout は 0 以上 1 未満である必要があります (指定値: {})", self.dropout);
        }
        Ok(())
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSettings {
    /// 最大ステップ数（学習率減衰のステップ数も兼ねる）
    pub num_steps: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// データセットの繰り返し回数
    pub batch_repeat: usize,
    /// シャッフルバッファのサイズ
    pub shuffle_buffer: usize,
    /// 初期学習率
    pub learning_rate: f64,
    /// 学習率の減衰率
    pub decay_rate: f64,
    /// 精度を評価する間隔（ステップ）
    pub eval_interval: usize,
    /// ランダムシード
    pub seed: u64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            num_steps: 10001,
            batch_size: 10,
            batch_repeat: 20,
            shuffle_buffer: 1000,
            learning_rate: 0.01,
            decay_rate: 0.9,
            eval_interval: 100,
            seed: 42,
        }
    }
}

/// 出力先設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSettings {
    /// スカラーサマリーの出力ディレクトリ
    pub summary_dir: String,
    /// 学習済みモデルの保存先
    pub model_path: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            summary_dir: "/tmp/train/".to_string(),
            model_path: "models/tooth_classifier.tar.gz".to_string(),
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// 計算デバイスの種類
    #[serde(default)]
    pub device_type: DeviceType,
    /// データセット設定
    #[serde(default)]
    pub dataset: DatasetSettings,
    /// モデル設定
    #[serde(default)]
    pub model: ModelSettings,
    /// トレーニング設定
    #[serde(default)]
    pub training: TrainingSettings,
    /// 出力先設定
    #[serde(default)]
    pub output: OutputSettings,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// デフォルトパスから設定を読み込む、存在しない場合はデフォルト設定を返す
    pub fn load_or_default() -> Self {
        let path = Self::default_path();
        if path.exists() {
            match Self::load(&path) {
                Ok(config) => {
                    info!("設定ファイルを読み込みました: {}", path.display());
                    config
                }
                Err(e) => {
                    warn!(
                        "設定ファイルの読み込みに失敗しました ({}): {}",
                        path.display(),
                        e
                    );
                    warn!("デフォルト設定を使用します");
                    Self::default()
                }
            }
        } else {
            info!("設定ファイルが存在しません。デフォルト設定を使用します");
            Self::default()
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 設定情報を表示
    pub fn display(&self) {
        info!("=== 実験設定 ===");
        info!("計算デバイス: {}", self.device_type);
        info!("クラスフォルダ: {}", self.dataset.class_folders.join(", "));
        info!(
            "画像サイズ: {}x{} (幅x高さ)",
            self.dataset.image_width, self.dataset.image_height
        );
        info!(
            "モデル: patch={} depth={} hidden={} dropout={}",
            self.model.patch_size, self.model.depth, self.model.num_hidden, self.model.dropout
        );
        info!(
            "学習: steps={} batch={} repeat={} lr={} decay={}",
            self.training.num_steps,
            self.training.batch_size,
            self.training.batch_repeat,
            self.training.learning_rate,
            self.training.decay_rate
        );
        info!("サマリー出力先: {}", self.output.summary_dir);
        info!("モデル保存先: {}", self.output.model_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.device_type, DeviceType::Cpu);
        assert_eq!(config.dataset.class_folders.len(), 8);
        assert_eq!(config.dataset.image_height, 100);
        assert_eq!(config.dataset.image_width, 50);
        assert_eq!(config.training.num_steps, 10001);
        assert_eq!(config.training.batch_size, 10);
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = AppConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: AppConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(config.device_type, deserialized.device_type);
        assert_eq!(config.dataset.class_folders, deserialized.dataset.class_folders);
        assert_eq!(config.output.summary_dir, deserialized.output.summary_dir);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{"device_type": "Wgpu"}"#).unwrap();
        assert_eq!(config.device_type, DeviceType::Wgpu);
        assert_eq!(config.training.eval_interval, 100);
    }

    #[test]
    fn test_class_labels_from_folders() {
        let settings = DatasetSettings::default();
        assert_eq!(settings.class_labels()[0], "16");
        assert_eq!(settings.class_labels()[7], "47");
    }

    #[test]
    fn test_model_settings_validation() {
        assert!(ModelSettings::default().validate().is_ok());

        let even = ModelSettings {
            patch_size: 4,
            ..ModelSettings::default()
        };
        assert!(even.validate().is_err());

        let drop_everything = ModelSettings {
            dropout: 1.0,
            ..ModelSettings::default()
        };
        assert!(drop_everything.validate().is_err());
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = AppConfig::default();
        config.device_type = DeviceType::Wgpu;
        config.training.num_steps = 7;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.device_type, DeviceType::Wgpu);
        assert_eq!(loaded.training.num_steps, 7);
    }

    #[test]
    fn test_device_type_display() {
        assert_eq!(format!("{}", DeviceType::Wgpu), "WGPU (GPU)");
        assert_eq!(format!("{}", DeviceType::Cpu), "CPU (NdArray)");
    }
}
