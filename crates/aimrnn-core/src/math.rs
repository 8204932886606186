//! 数値プリミティブ
//!
//! - `Matrix`: 時系列を行優先で保持する密行列（行 = タイムステップ）
//! - 重み初期化（Xavier 一様分布 / 直交初期化）
//! - クリップ付き sigmoid / tanh
//! - Layer Normalization の順伝播・逆伝播
//! - inverted dropout マスク

use rand::Rng;
use rand_distr::StandardNormal;

/// ゲート前活性値のクリップ幅（exp のオーバーフロー防止）
pub const PRE_ACTIVATION_CLIP: f64 = 50.0;

/// Layer Normalization の分散に加える ε
pub const LAYER_NORM_EPS: f64 = 1e-5;

/// 行優先の密行列 [rows][cols]
#[derive(Clone, Debug, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    /// ゼロ行列を作成
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// 行ベクトルの列から作成（全行が同じ長さであること）
    pub fn from_rows(rows: &[Vec<f64>]) -> Self {
        let cols = rows.first().map_or(0, Vec::len);
        let mut m = Self::zeros(rows.len(), cols);
        for (t, row) in rows.iter().enumerate() {
            debug_assert_eq!(row.len(), cols);
            m.row_mut(t).copy_from_slice(row);
        }
        m
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn row(&self, r: usize) -> &[f64] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    #[inline]
    pub fn row_mut(&mut self, r: usize) -> &mut [f64] {
        &mut self.data[r * self.cols..(r + 1) * self.cols]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// 全要素が有限値か
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }
}

/// Xavier（Glorot）一様分布で初期化したベクトルを返す
pub fn xavier_uniform<R: Rng + ?Sized>(
    rng: &mut R,
    len: usize,
    fan_in: usize,
    fan_out: usize,
) -> Vec<f64> {
    let limit = (6.0 / (fan_in + fan_out).max(1) as f64).sqrt();
    (0..len).map(|_| rng.random::<f64>() * 2.0 * limit - limit).collect()
}

/// n×n の直交行列（行優先）を返す
///
/// 正規乱数行列の行を修正 Gram-Schmidt で正規直交化する。
/// 退化した行は引き直し、それでも駄目なら単位ベクトルで埋める。
pub fn orthogonal<R: Rng + ?Sized>(rng: &mut R, n: usize) -> Vec<f64> {
    let mut q = vec![0.0; n * n];
    for r in 0..n {
        let mut accepted = false;
        for _ in 0..8 {
            let mut v: Vec<f64> = (0..n).map(|_| rng.sample(StandardNormal)).collect();
            for p in 0..r {
                let prev = &q[p * n..(p + 1) * n];
                let proj = dot(&v, prev);
                for (x, &y) in v.iter_mut().zip(prev) {
                    *x -= proj * y;
                }
            }
            let norm = dot(&v, &v).sqrt();
            if norm > 1e-6 {
                for (dst, x) in q[r * n..(r + 1) * n].iter_mut().zip(&v) {
                    *dst = x / norm;
                }
                accepted = true;
                break;
            }
        }
        if !accepted {
            q[r * n + r] = 1.0;
        }
    }
    q
}

/// 内積
#[inline]
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// 二乗ノルム
#[inline]
pub fn square_norm(a: &[f64]) -> f64 {
    a.iter().map(|x| x * x).sum()
}

/// クリップ付きシグモイド
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    let x = x.clamp(-PRE_ACTIVATION_CLIP, PRE_ACTIVATION_CLIP);
    1.0 / (1.0 + (-x).exp())
}

/// クリップ付き tanh
#[inline]
pub fn tanh_clipped(x: f64) -> f64 {
    x.clamp(-PRE_ACTIVATION_CLIP, PRE_ACTIVATION_CLIP).tanh()
}

/// inverted dropout のマスクを生成（保持 = 1/keep、脱落 = 0）
pub fn dropout_mask<R: Rng + ?Sized>(rng: &mut R, len: usize, rate: f64) -> Vec<f64> {
    let keep = 1.0 - rate;
    (0..len)
        .map(|_| if rng.random::<f64>() < keep { 1.0 / keep } else { 0.0 })
        .collect()
}

/// Layer Normalization の順伝播
///
/// `x_hat` に正規化後の値を書き込み、逆伝播用の 1/σ を返す。
pub fn layer_norm_forward(
    x: &[f64],
    gamma: &[f64],
    beta: &[f64],
    x_hat: &mut [f64],
    out: &mut [f64],
) -> f64 {
    let n = x.len() as f64;
    let mean = x.iter().sum::<f64>() / n;
    let var = x.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    let inv_std = 1.0 / (var + LAYER_NORM_EPS).sqrt();
    for k in 0..x.len() {
        x_hat[k] = (x[k] - mean) * inv_std;
        out[k] = gamma[k] * x_hat[k] + beta[k];
    }
    inv_std
}

/// Layer Normalization の逆伝播
///
/// γ・β の勾配を累積し、入力勾配を `dx` に書き込む。
pub fn layer_norm_backward(
    dy: &[f64],
    gamma: &[f64],
    x_hat: &[f64],
    inv_std: f64,
    d_gamma: &mut [f64],
    d_beta: &mut [f64],
    dx: &mut [f64],
) {
    let n = dy.len();
    let mut sum_dxhat = 0.0;
    let mut sum_dxhat_xhat = 0.0;
    for k in 0..n {
        d_gamma[k] += dy[k] * x_hat[k];
        d_beta[k] += dy[k];
        let dxh = dy[k] * gamma[k];
        sum_dxhat += dxh;
        sum_dxhat_xhat += dxh * x_hat[k];
    }
    let nf = n as f64;
    for k in 0..n {
        let dxh = dy[k] * gamma[k];
        dx[k] = inv_std / nf * (nf * dxh - sum_dxhat - x_hat[k] * sum_dxhat_xhat);
    }
}
