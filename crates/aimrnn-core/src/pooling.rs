//! 時系列プーリング
//!
//! エンコーダ出力 [T × D] とマスクから固定長ベクトル [D] を作る。
//! 有効ステップが 1 つも無い場合、Mean / Max / Attention は全ステップを
//! 有効として扱い、Last は最終ステップを使う。

use rand::Rng;

use crate::config::PoolingMode;
use crate::math::{Matrix, dot, square_norm, xavier_uniform};

#[inline]
fn is_valid(m: f64) -> bool {
    m > 0.5
}

/// 有効ステップの添字（無ければ全ステップ）
fn effective_steps(mask: &[f64], t_len: usize) -> Vec<usize> {
    let valid: Vec<usize> = (0..t_len)
        .filter(|&t| mask.get(t).is_some_and(|&m| is_valid(m)))
        .collect();
    if valid.is_empty() { (0..t_len).collect() } else { valid }
}

/// 学習可能な注意プーリング `s_t = w·h_t + b`
#[derive(Clone, Debug, PartialEq)]
pub struct AttentionPooling {
    pub w: Vec<f64>,
    pub b: f64,
}

impl AttentionPooling {
    pub fn new<R: Rng + ?Sized>(rng: &mut R, dim: usize) -> Self {
        Self {
            w: xavier_uniform(rng, dim, dim, 1),
            b: 0.0,
        }
    }

    pub fn zeros(dim: usize) -> Self {
        Self {
            w: vec![0.0; dim],
            b: 0.0,
        }
    }

    pub fn zero(&mut self) {
        self.w.fill(0.0);
        self.b = 0.0;
    }

    pub fn scale(&mut self, s: f64) {
        self.w.iter_mut().for_each(|v| *v *= s);
        self.b *= s;
    }

    pub fn square_norm(&self) -> f64 {
        square_norm(&self.w) + self.b * self.b
    }

    pub fn param_count(&self) -> usize {
        self.w.len() + 1
    }
}

/// 逆伝播用キャッシュ
#[derive(Clone, Debug, PartialEq)]
pub enum PoolingCache {
    Last { index: usize },
    Mean { steps: Vec<usize> },
    /// 次元ごとの argmax ステップ
    Max { argmax: Vec<usize> },
    /// ステップごとの注意重み（無効ステップは 0）
    Attention { weights: Vec<f64> },
}

/// 順伝播
pub fn forward(
    mode: PoolingMode,
    attention: &AttentionPooling,
    h: &Matrix,
    mask: &[f64],
) -> (Vec<f64>, PoolingCache) {
    let t_len = h.rows();
    let dim = h.cols();
    if t_len == 0 {
        return (vec![0.0; dim], PoolingCache::Mean { steps: Vec::new() });
    }

    match mode {
        PoolingMode::LastHidden => {
            let index = (0..t_len)
                .rev()
                .find(|&t| mask.get(t).is_some_and(|&m| is_valid(m)))
                .unwrap_or(t_len - 1);
            (h.row(index).to_vec(), PoolingCache::Last { index })
        }
        PoolingMode::MeanPooling => {
            let steps = effective_steps(mask, t_len);
            let inv = 1.0 / steps.len() as f64;
            let mut pooled = vec![0.0; dim];
            for &t in &steps {
                for (p, v) in pooled.iter_mut().zip(h.row(t)) {
                    *p += v * inv;
                }
            }
            (pooled, PoolingCache::Mean { steps })
        }
        PoolingMode::MaxPooling => {
            let steps = effective_steps(mask, t_len);
            let mut pooled = h.row(steps[0]).to_vec();
            let mut argmax = vec![steps[0]; dim];
            for &t in &steps[1..] {
                for (k, &v) in h.row(t).iter().enumerate() {
                    // 同値なら先に出たステップを優先
                    if v > pooled[k] {
                        pooled[k] = v;
                        argmax[k] = t;
                    }
                }
            }
            (pooled, PoolingCache::Max { argmax })
        }
        PoolingMode::Attention => {
            let steps = effective_steps(mask, t_len);
            let scores: Vec<f64> = steps
                .iter()
                .map(|&t| dot(&attention.w, h.row(t)) + attention.b)
                .collect();
            let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let exps: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
            let sum: f64 = exps.iter().sum();

            let mut weights = vec![0.0; t_len];
            let mut pooled = vec![0.0; dim];
            for (&t, e) in steps.iter().zip(&exps) {
                let a = e / sum;
                weights[t] = a;
                for (p, v) in pooled.iter_mut().zip(h.row(t)) {
                    *p += a * v;
                }
            }
            (pooled, PoolingCache::Attention { weights })
        }
    }
}

/// 逆伝播
///
/// 入力勾配 dH を返す。注意プーリングのときのみ `attention_grad` に
/// w・b の勾配を累積する。
pub fn backward(
    cache: &PoolingCache,
    attention: &AttentionPooling,
    h: &Matrix,
    d_pooled: &[f64],
    attention_grad: Option<&mut AttentionPooling>,
) -> Matrix {
    let mut dh = Matrix::zeros(h.rows(), h.cols());
    match cache {
        PoolingCache::Last { index } => {
            dh.row_mut(*index).copy_from_slice(d_pooled);
        }
        PoolingCache::Mean { steps } => {
            let inv = 1.0 / steps.len().max(1) as f64;
            for &t in steps {
                for (d, g) in dh.row_mut(t).iter_mut().zip(d_pooled) {
                    *d = g * inv;
                }
            }
        }
        PoolingCache::Max { argmax } => {
            for (k, &t) in argmax.iter().enumerate() {
                dh.row_mut(t)[k] += d_pooled[k];
            }
        }
        PoolingCache::Attention { weights } => {
            // dα_t = d·h_t, ds_t = α_t (dα_t − Σ α dα)
            let d_alpha: Vec<f64> = (0..h.rows()).map(|t| dot(d_pooled, h.row(t))).collect();
            let mean: f64 = weights.iter().zip(&d_alpha).map(|(a, d)| a * d).sum();
            let mut grad = attention_grad;
            for (t, &a) in weights.iter().enumerate() {
                if a == 0.0 {
                    continue;
                }
                let ds = a * (d_alpha[t] - mean);
                let h_t = h.row(t);
                for (k, d) in dh.row_mut(t).iter_mut().enumerate() {
                    *d = a * d_pooled[k] + ds * attention.w[k];
                }
                if let Some(g) = grad.as_deref_mut() {
                    for (gw, &v) in g.w.iter_mut().zip(h_t) {
                        *gw += ds * v;
                    }
                    g.b += ds;
                }
            }
        }
    }
    dh
}
