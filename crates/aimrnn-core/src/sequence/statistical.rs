//! 固定式の統計特徴量（16 次元）

use crate::math::Matrix;

/// 統計特徴量の次元数
pub const STAT_FEATURES: usize = 16;

/// 移動統計の窓幅
const WINDOW: usize = 5;

#[inline]
fn squash(x: f64, k: f64) -> f64 {
    (x / k).tanh()
}

#[inline]
fn sign_flip(prev: f64, now: f64) -> f64 {
    if prev * now < 0.0 { 1.0 } else { 0.0 }
}

/// 末尾 `WINDOW` 区間の平均と標準偏差
fn window_stats(values: &[f64], t: usize) -> (f64, f64) {
    let start = (t + 1).saturating_sub(WINDOW);
    let window = &values[start..=t];
    let n = window.len() as f64;
    let mean = window.iter().sum::<f64>() / n;
    let var = window.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// 1 ステップ分の 16 特徴量
fn step_features(yaw: &[f64], pitch: &[f64], t: usize) -> [f64; STAT_FEATURES] {
    let y = yaw[t];
    let p = pitch[t];
    let delta = |s: &[f64], t: usize| if t == 0 { 0.0 } else { s[t] - s[t - 1] };
    let dy = delta(yaw, t);
    let dp = delta(pitch, t);
    let (d2y, d2p) = if t == 0 {
        (0.0, 0.0)
    } else {
        (dy - delta(yaw, t - 1), dp - delta(pitch, t - 1))
    };
    let (mean_y, std_y) = window_stats(yaw, t);
    let (mean_p, std_p) = window_stats(pitch, t);
    let (flip_y, flip_p) = if t == 0 {
        (0.0, 0.0)
    } else {
        (sign_flip(yaw[t - 1], y), sign_flip(pitch[t - 1], p))
    };

    [
        squash(y, 100.0),
        squash(p, 100.0),
        squash(dy, 50.0),
        squash(dp, 50.0),
        squash(d2y, 50.0),
        squash(d2p, 50.0),
        squash(y.hypot(p), 100.0),
        p.atan2(y) / std::f64::consts::PI,
        squash(mean_y, 100.0),
        squash(mean_p, 100.0),
        squash(std_y, 50.0),
        squash(std_p, 50.0),
        flip_y,
        flip_p,
        2.0 * p.abs() / (y.abs() + p.abs() + 1e-9) - 1.0,
        squash(y * p, 1000.0),
    ]
}

/// チャンネルを取り出す（非有限値は 0 として履歴に入れる）
pub(super) fn channels(steps: &[[f64; 2]]) -> (Vec<f64>, Vec<f64>) {
    let finite = |v: f64| if v.is_finite() { v } else { 0.0 };
    steps
        .iter()
        .map(|s| (finite(s[0]), finite(s[1])))
        .unzip()
}

/// 統計特徴量を `width` 列に詰める（不足分は 0、超過分は切り捨て）
pub fn statistical_features(steps: &[[f64; 2]], width: usize) -> Matrix {
    let (yaw, pitch) = channels(steps);
    let mut x = Matrix::zeros(steps.len(), width);
    let n = width.min(STAT_FEATURES);
    for t in 0..steps.len() {
        let f = step_features(&yaw, &pitch, t);
        x.row_mut(t)[..n].copy_from_slice(&f[..n]);
    }
    x
}
