//! モデル学習
//!
//! 結合済みデータからミニバッチを作り、SGDと指数減衰する学習率で学習します。
//! 一定ステップごとにミニバッチ精度とテストデータ全体での検証精度を表示します。

use anyhow::{Context, Result};
use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    module::{AutodiffModule, Module},
    optim::{GradientsParams, Optimizer, SgdConfig},
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{
        activation::softmax,
        backend::{AutodiffBackend, Backend},
        ElementConversion, Tensor,
    },
};
use log::info;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::path::Path;

use crate::dataset_merge::{LabeledImages, MergedDatasets};
use crate::ml::{softmax_cross_entropy, ModelConfig, ToothClassifier};
use crate::model::config::AppConfig;
use crate::summary::SummaryWriter;

/// データセットアイテム（画像1枚とone-hotラベル）
#[derive(Clone, Debug)]
pub struct ToothItem {
    pub image: Vec<f32>,
    pub label: Vec<f32>,
}

impl Dataset<ToothItem> for LabeledImages {
    fn get(&self, index: usize) -> Option<ToothItem> {
        Some(ToothItem {
            image: self.images.sample(index)?.to_vec(),
            label: self.label(index)?.to_vec(),
        })
    }

    fn len(&self) -> usize {
        self.images.len()
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct ToothBatch<B: Backend> {
    /// [batch_size, height, width, 1]
    pub images: Tensor<B, 4>,
    /// [batch_size, num_classes]
    pub labels: Tensor<B, 2>,
}

/// バッチャー
#[derive(Clone, Debug)]
pub struct ToothBatcher {
    height: usize,
    width: usize,
    num_classes: usize,
}

impl ToothBatcher {
    pub fn new(height: usize, width: usize, num_classes: usize) -> Self {
        Self {
            height,
            width,
            num_classes,
        }
    }
}

impl<B: Backend> Batcher<B, ToothItem, ToothBatch<B>> for ToothBatcher {
    fn batch(&self, items: Vec<ToothItem>, device: &B::Device) -> ToothBatch<B> {
        let batch_size = items.len();
        let mut all_pixels = Vec::with_capacity(batch_size * self.height * self.width);
        let mut all_labels = Vec::with_capacity(batch_size * self.num_classes);

        for item in items {
            all_pixels.extend_from_slice(&item.image);
            all_labels.extend_from_slice(&item.label);
        }

        let images = Tensor::<B, 1>::from_floats(all_pixels.as_slice(), device)
            .reshape([batch_size, self.height, self.width, 1]);
        let labels = Tensor::<B, 1>::from_floats(all_labels.as_slice(), device)
            .reshape([batch_size, self.num_classes]);

        ToothBatch { images, labels }
    }
}

/// ラベル付き画像全体を1つのバッチにする
pub fn full_batch<B: Backend>(data: &LabeledImages, device: &B::Device) -> ToothBatch<B> {
    let images = Tensor::<B, 1>::from_floats(data.images.data.as_slice(), device)
        .reshape(data.image_shape());
    let labels =
        Tensor::<B, 1>::from_floats(data.labels.as_slice(), device).reshape(data.label_shape());
    ToothBatch { images, labels }
}

/// シャッフルバッファ方式で1周分の順序を作る
///
/// 先頭 `buffer_size` 件でバッファを埋め、ランダムに1件取り出すたびに
/// 次の要素で補充します。`buffer_size >= len` なら完全なシャッフルになります。
pub fn shuffle_buffer_order<R: Rng + ?Sized>(
    len: usize,
    buffer_size: usize,
    rng: &mut R,
) -> Vec<usize> {
    let mut source = 0..len;
    let mut buffer: Vec<usize> = source.by_ref().take(buffer_size.max(1)).collect();
    let mut order = Vec::with_capacity(len);

    while !buffer.is_empty() {
        let i = rng.gen_range(0..buffer.len());
        match source.next() {
            Some(next) => order.push(std::mem::replace(&mut buffer[i], next)),
            None => order.push(buffer.swap_remove(i)),
        }
    }

    order
}

/// シャッフル -> バッチ化 -> 繰り返し のミニバッチ列
///
/// 1周ごとに並べ直し、バッチは周をまたぎません（各周の最後のバッチは短くなり得る）。
pub struct MiniBatchStream {
    len: usize,
    batch_size: usize,
    buffer_size: usize,
    passes_left: usize,
    order: Vec<usize>,
    cursor: usize,
    rng: StdRng,
}

impl MiniBatchStream {
    pub fn new(len: usize, batch_size: usize, repeat: usize, buffer_size: usize, seed: u64) -> Self {
        Self {
            len,
            batch_size: batch_size.max(1),
            buffer_size,
            passes_left: repeat,
            order: Vec::new(),
            cursor: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// 全体で生成されるバッチ数
    pub fn num_batches(len: usize, batch_size: usize, repeat: usize) -> usize {
        len.div_ceil(batch_size.max(1)) * repeat
    }
}

impl Iterator for MiniBatchStream {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        if self.cursor >= self.order.len() {
            if self.passes_left == 0 || self.len == 0 {
                return None;
            }
            self.order = shuffle_buffer_order(self.len, self.buffer_size, &mut self.rng);
            self.cursor = 0;
            self.passes_left -= 1;
        }

        let end = (self.cursor + self.batch_size).min(self.order.len());
        let batch = self.order[self.cursor..end].to_vec();
        self.cursor = end;
        Some(batch)
    }
}

/// 指数減衰する学習率 initial * rate^(step / decay_steps)
#[derive(Debug, Clone, Copy)]
pub struct ExponentialDecay {
    pub initial: f64,
    pub decay_steps: usize,
    pub decay_rate: f64,
}

impl ExponentialDecay {
    pub fn learning_rate(&self, step: usize) -> f64 {
        let exponent = step as f64 / self.decay_steps.max(1) as f64;
        self.initial * self.decay_rate.powf(exponent)
    }
}

/// 予測クラス（出力の最大値）と正解クラス（one-hotの最大値）が一致する割合 [%]
pub fn accuracy<B: Backend>(predictions: Tensor<B, 2>, labels: Tensor<B, 2>) -> f64 {
    let [rows, _] = predictions.dims();
    if rows == 0 {
        return 0.0;
    }

    let correct: f64 = predictions
        .argmax(1)
        .equal(labels.argmax(1))
        .int()
        .sum()
        .into_scalar()
        .elem();

    100.0 * correct / rows as f64
}

/// 学習結果の概要
#[derive(Debug, Clone, Default)]
pub struct TrainingReport {
    pub steps: usize,
    pub final_loss: f64,
    pub minibatch_accuracy: Option<f64>,
    pub validation_accuracy: Option<f64>,
}

/// 学習済みモデルと設定
pub struct TrainedModel<B: AutodiffBackend> {
    pub model: ToothClassifier<B>,
    pub model_config: ModelConfig,
    pub report: TrainingReport,
}

impl<B: AutodiffBackend> TrainedModel<B> {
    /// 重みをバイト列に変換（f32精度）
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        BinBytesRecorder::<FullPrecisionSettings>::default()
            .record(self.model.valid().into_record(), ())
            .map_err(|e| anyhow::anyhow!("モデル重みの書き出しエラー: {:?}", e))
    }
}

/// 設定からモデル設定を作る
pub fn model_config_from(config: &AppConfig, num_classes: usize) -> ModelConfig {
    ModelConfig::new(
        num_classes,
        config.dataset.image_height,
        config.dataset.image_width,
    )
    .with_depth(config.model.depth)
    .with_patch_size(config.model.patch_size)
    .with_num_hidden(config.model.num_hidden)
    .with_dropout(config.model.dropout)
    .with_weight_stddev(config.model.weight_stddev)
    .with_seed(config.training.seed)
}

/// モデル学習を実行
///
/// ステップカウンタが `num_steps` を超えるか、ミニバッチ列が尽きた時点で終了します。
pub fn train_model<B: AutodiffBackend>(
    config: &AppConfig,
    datasets: &MergedDatasets,
    device: &B::Device,
) -> Result<TrainedModel<B>> {
    let train = &datasets.train;
    if train.is_empty() {
        anyhow::bail!("学習データが見つかりません");
    }

    let settings = &config.training;
    let num_classes = train.num_classes;
    let model_config = model_config_from(config, num_classes);

    info!(
        "モデル設定: {} クラス, 入力サイズ: {}x{}, dropout={}",
        num_classes, model_config.image_height, model_config.image_width, model_config.dropout
    );
    info!("学習データ: {} 枚, 検証データ: {} 枚", train.len(), datasets.test.len());

    let mut model = model_config.init::<B>(device);
    let mut optim = SgdConfig::new().init::<B, ToothClassifier<B>>();
    let schedule = ExponentialDecay {
        initial: settings.learning_rate,
        decay_steps: settings.num_steps,
        decay_rate: settings.decay_rate,
    };
    let batcher = ToothBatcher::new(train.images.height, train.images.width, num_classes);
    let stream = MiniBatchStream::new(
        train.len(),
        settings.batch_size,
        settings.batch_repeat,
        settings.shuffle_buffer,
        settings.seed,
    );
    let eval_interval = settings.eval_interval.max(1);

    // 検証データは最初に一度だけテンソル化しておく
    let validation = if datasets.test.is_empty() {
        info!("検証データが無いため検証精度は計算しません");
        None
    } else {
        Some(full_batch::<B::InnerBackend>(&datasets.test, device))
    };

    let summary_dir = Path::new(&config.output.summary_dir);
    let mut summary = SummaryWriter::create(summary_dir)
        .with_context(|| format!("サマリー出力先を開けません: {}", summary_dir.display()))?;

    let mut report = TrainingReport::default();
    let mut step = 0usize;

    for indices in stream {
        let items: Vec<ToothItem> = indices.into_iter().filter_map(|i| train.get(i)).collect();
        let batch: ToothBatch<B> = batcher.batch(items, device);

        let learning_rate = schedule.learning_rate(step);
        let logits = model.forward(batch.images);
        let loss = softmax_cross_entropy(logits.clone(), batch.labels.clone());
        let loss_value: f64 = loss.clone().into_scalar().elem();

        if step % eval_interval == 0 {
            let minibatch_accuracy = accuracy(softmax(logits.detach(), 1), batch.labels.detach());
            info!("Minibatch loss at step {}: {:.6}", step, loss_value);
            info!("Minibatch accuracy: {:.1}%", minibatch_accuracy);
            report.minibatch_accuracy = Some(minibatch_accuracy);

            if let Some(validation) = &validation {
                let predictions = softmax(model.valid().forward(validation.images.clone()), 1);
                let validation_accuracy = accuracy(predictions, validation.labels.clone());
                info!("Validation accuracy: {:.1}%", validation_accuracy);
                report.validation_accuracy = Some(validation_accuracy);
            }
            summary.flush()?;
        }

        let grads = GradientsParams::from_grads(loss.backward(), &model);
        model = optim.step(learning_rate, model, grads);

        step += 1;
        summary.add_scalar(step, "loss", loss_value)?;
        summary.add_scalar(step, "learning_rate", learning_rate)?;
        report.steps = step;
        report.final_loss = loss_value;

        if step > settings.num_steps {
            break;
        }
    }

    summary.flush()?;
    info!(
        "学習完了: {} ステップ, 最終損失 {:.6}",
        report.steps, report.final_loss
    );

    Ok(TrainedModel {
        model,
        model_config,
        report,
    })
}
