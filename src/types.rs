use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// 同じサイズの画像を行優先で詰めたスタック (count, height, width)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageStack {
    pub height: usize,
    pub width: usize,
    pub data: Vec<f32>,
}

impl ImageStack {
    pub fn new(height: usize, width: usize) -> Self {
        Self {
            height,
            width,
            data: Vec::new(),
        }
    }

    /// 1枚あたりの要素数
    pub fn sample_len(&self) -> usize {
        self.height * self.width
    }

    pub fn len(&self) -> usize {
        if self.sample_len() == 0 {
            0
        } else {
            self.data.len() / self.sample_len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shape(&self) -> [usize; 3] {
        [self.len(), self.height, self.width]
    }

    pub fn sample(&self, index: usize) -> Option<&[f32]> {
        let n = self.sample_len();
        self.data.get(index * n..(index + 1) * n)
    }

    /// 画像を1枚追加（サイズ不一致はfalse）
    pub fn push(&mut self, pixels: &[f32]) -> bool {
        if pixels.len() != self.sample_len() {
            return false;
        }
        self.data.extend_from_slice(pixels);
        true
    }

    /// サンプル単位でシャッフル
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let n = self.sample_len();
        let mut indices: Vec<usize> = (0..self.len()).collect();
        indices.shuffle(rng);

        let mut shuffled = Vec::with_capacity(self.data.len());
        for idx in indices {
            shuffled.extend_from_slice(&self.data[idx * n..(idx + 1) * n]);
        }
        self.data = shuffled;
    }

    /// 先頭 `at` 枚と残りに分割
    pub fn split_at(mut self, at: usize) -> (Self, Self) {
        let at = at.min(self.len());
        let tail = self.data.split_off(at * self.sample_len());
        let rest = Self {
            height: self.height,
            width: self.width,
            data: tail,
        };
        (self, rest)
    }

    /// 全画素の平均
    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            return f64::NAN;
        }
        self.data.iter().map(|&v| v as f64).sum::<f64>() / self.data.len() as f64
    }

    /// 全画素の標準偏差（母標準偏差）
    pub fn std_dev(&self) -> f64 {
        if self.data.is_empty() {
            return f64::NAN;
        }
        let mean = self.mean();
        let var = self
            .data
            .iter()
            .map(|&v| {
                let d = v as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / self.data.len() as f64;
        var.sqrt()
    }
}
