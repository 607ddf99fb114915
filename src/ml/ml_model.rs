//! 機械学習モデルの共通定義
//!
//! 歯の位置分類用のCNNモデルと関連する設定を提供します。

use burn::{
    config::Config,
    module::{Module, Param},
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{
        activation::{log_softmax, softmax},
        backend::Backend,
        Int, Tensor, TensorData,
    },
};
use log::debug;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::dataset_loader::load_grayscale_image;

/// 入力チャネル数（グレースケール）
pub const NUM_CHANNELS: usize = 1;

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    pub num_classes: usize,
    /// 入力画像の高さ
    pub image_height: usize,
    /// 入力画像の幅
    pub image_width: usize,
    /// 畳み込みのチャネル数
    #[config(default = 16)]
    pub depth: usize,
    /// 畳み込みカーネルサイズ
    #[config(default = 5)]
    pub patch_size: usize,
    /// 全結合隠れ層のユニット数
    #[config(default = 64)]
    pub num_hidden: usize,
    /// ドロップアウト率（破棄する確率）
    #[config(default = 0.2)]
    pub dropout: f64,
    /// 重み初期化の標準偏差
    #[config(default = 0.1)]
    pub weight_stddev: f64,
    /// 重み初期化のシード
    #[config(default = 42)]
    pub seed: u64,
}

/// 2x2 / stride 2 の SAME プーリング後のサイズ
pub fn pooled_size(size: usize) -> usize {
    size.div_ceil(2)
}

/// SAME プーリング用に奇数サイズの下端・右端を0で1画素埋める
///
/// 入力は [batch, channels, height, width]。ReLU後に使うので0埋めが
/// 最大値を上書きすることはありません。
pub fn pad_for_same_pool<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
    let [batch, channels, height, width] = x.dims();
    let device = x.device();

    let x = if height % 2 == 1 {
        let bottom = Tensor::zeros([batch, channels, 1, width], &device);
        Tensor::cat(vec![x, bottom], 2)
    } else {
        x
    };

    if width % 2 == 1 {
        let padded_height = height + height % 2;
        let right = Tensor::zeros([batch, channels, padded_height, 1], &device);
        Tensor::cat(vec![x, right], 3)
    } else {
        x
    }
}

impl ModelConfig {
    /// Flatten後の特徴次元
    pub fn flattened_size(&self) -> usize {
        let h = pooled_size(pooled_size(self.image_height));
        let w = pooled_size(pooled_size(self.image_width));
        h * w * self.depth
    }

    /// モデルを初期化
    ///
    /// 重みは切断正規分布、バイアスは conv1 のみ0、それ以外は1.0で初期化します。
    pub fn init<B: Backend>(&self, device: &B::Device) -> ToothClassifier<B> {
        let after_pool1 = (pooled_size(self.image_height), pooled_size(self.image_width));
        let after_pool2 = (pooled_size(after_pool1.0), pooled_size(after_pool1.1));
        let d = self.flattened_size();

        debug!("[Model] 入力サイズ: {}x{}", self.image_height, self.image_width);
        debug!("[Model] Pool1後: {}x{}", after_pool1.0, after_pool1.1);
        debug!("[Model] Pool2後: {}x{}", after_pool2.0, after_pool2.1);
        debug!("[Model] FC1: {} -> {}", d, self.num_hidden);
        debug!("[Model] FC2: {} -> {}", self.num_hidden, self.num_classes);

        let k = self.patch_size;
        let mut rng = StdRng::seed_from_u64(self.seed);

        let mut conv1 = Conv2dConfig::new([NUM_CHANNELS, self.depth], [k, k])
            .with_padding(PaddingConfig2d::Same)
            .init(device);
        conv1.weight = self.weights([self.depth, NUM_CHANNELS, k, k], &mut rng, device);
        conv1.bias = Some(constant_bias(self.depth, 0.0, device));

        let mut conv2 = Conv2dConfig::new([self.depth, self.depth], [k, k])
            .with_padding(PaddingConfig2d::Same)
            .init(device);
        conv2.weight = self.weights([self.depth, self.depth, k, k], &mut rng, device);
        conv2.bias = Some(constant_bias(self.depth, 1.0, device));

        let mut fc1 = LinearConfig::new(d, self.num_hidden).init(device);
        fc1.weight = self.weights([d, self.num_hidden], &mut rng, device);
        fc1.bias = Some(constant_bias(self.num_hidden, 1.0, device));

        let mut fc2 = LinearConfig::new(self.num_hidden, self.num_classes).init(device);
        fc2.weight = self.weights([self.num_hidden, self.num_classes], &mut rng, device);
        fc2.bias = Some(constant_bias(self.num_classes, 1.0, device));

        ToothClassifier {
            conv1,
            pool1: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            conv2,
            pool2: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            fc1,
            dropout: DropoutConfig::new(self.dropout).init(),
            fc2,
            activation: Relu::new(),
        }
    }

    fn weights<B: Backend, const D: usize>(
        &self,
        shape: [usize; D],
        rng: &mut StdRng,
        device: &B::Device,
    ) -> Param<Tensor<B, D>> {
        let count = shape.iter().product::<usize>();
        let values = truncated_normal(count, self.weight_stddev, rng);
        Param::from_tensor(Tensor::from_data(TensorData::new(values, shape), device))
    }
}

/// 平均0の切断正規分布（±2σ外は引き直し）
pub fn truncated_normal<R: Rng + ?Sized>(count: usize, stddev: f64, rng: &mut R) -> Vec<f32> {
    let normal = match Normal::new(0.0, stddev) {
        Ok(normal) => normal,
        Err(_) => return vec![0.0; count],
    };
    let limit = 2.0 * stddev;

    (0..count)
        .map(|_| loop {
            let v: f64 = normal.sample(rng);
            if v.abs() <= limit {
                break v as f32;
            }
        })
        .collect()
}

fn constant_bias<B: Backend>(size: usize, value: f32, device: &B::Device) -> Param<Tensor<B, 1>> {
    Param::from_tensor(Tensor::full([size], value, device))
}

/// 歯の位置分類用CNNモデル
///
/// # アーキテクチャ
/// - {Conv 5x5 (SAME) + ReLU + MaxPool 2x2 (SAME)} x 2層
/// - Flatten
/// - FC: d -> num_hidden + ReLU + Dropout
/// - FC: num_hidden -> num_classes
#[derive(Module, Debug)]
pub struct ToothClassifier<B: Backend> {
    conv1: Conv2d<B>, // 1 -> depth
    pool1: MaxPool2d,
    conv2: Conv2d<B>, // depth -> depth
    pool2: MaxPool2d,

    // 全結合層
    fc1: Linear<B>,
    dropout: Dropout,
    fc2: Linear<B>,

    activation: Relu,
}

impl<B: Backend> ToothClassifier<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, height, width, 1]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();
        let x = images.permute([0, 3, 1, 2]);

        let x = self.conv1.forward(x);
        let x = self.activation.forward(x);
        let x = self.pool1.forward(pad_for_same_pool(x));

        let x = self.conv2.forward(x);
        let x = self.activation.forward(x);
        let x = self.pool2.forward(pad_for_same_pool(x));

        let [_, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);

        let x = self.fc1.forward(x);
        let x = self.activation.forward(x);
        let x = self.dropout.forward(x);

        self.fc2.forward(x)
    }

    /// 予測を実行
    ///
    /// # 戻り値
    /// - (予測クラスID, softmax確率)
    pub fn predict(&self, images: Tensor<B, 4>) -> (Tensor<B, 2, Int>, Tensor<B, 2>) {
        let probabilities = softmax(self.forward(images), 1);
        let predictions = probabilities.clone().argmax(1);
        (predictions, probabilities)
    }
}

/// softmax交差エントロピー（one-hotラベル、バッチ平均）
pub fn softmax_cross_entropy<B: Backend>(
    logits: Tensor<B, 2>,
    labels: Tensor<B, 2>,
) -> Tensor<B, 1> {
    (log_softmax(logits, 1) * labels).sum_dim(1).mean().neg()
}

/// 画像を読み込んで [1, height, width, 1] のテンソルにする
pub fn load_image_tensor<B: Backend>(
    path: &std::path::Path,
    height: usize,
    width: usize,
    device: &B::Device,
) -> anyhow::Result<Tensor<B, 4>> {
    let pixels = load_grayscale_image(path, height, width)?;
    Ok(Tensor::<B, 1>::from_floats(pixels.as_slice(), device).reshape([1, height, width, 1]))
}
