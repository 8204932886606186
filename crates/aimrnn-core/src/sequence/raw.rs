//! 学習可能な埋め込み
//!
//! `x[i] = wy[i]·tanh(yaw/100) + wp[i]·tanh(pitch/100) + b[i]`

use rand::Rng;

use super::{SequenceData, is_valid_step, validity_mask};
use crate::math::{Matrix, square_norm, xavier_uniform};

const RAW_SCALE: f64 = 100.0;

/// 2 チャンネル → input_size の線形埋め込み
#[derive(Clone, Debug, PartialEq)]
pub struct RawEmbedding {
    pub wy: Vec<f64>,
    pub wp: Vec<f64>,
    pub b: Vec<f64>,
}

impl RawEmbedding {
    /// Xavier(fan_in = 2) で初期化
    pub fn new<R: Rng + ?Sized>(rng: &mut R, width: usize) -> Self {
        Self {
            wy: xavier_uniform(rng, width, 2, width),
            wp: xavier_uniform(rng, width, 2, width),
            b: vec![0.0; width],
        }
    }

    pub fn zeros(width: usize) -> Self {
        Self {
            wy: vec![0.0; width],
            wp: vec![0.0; width],
            b: vec![0.0; width],
        }
    }

    pub fn width(&self) -> usize {
        self.b.len()
    }

    pub fn zero(&mut self) {
        self.wy.fill(0.0);
        self.wp.fill(0.0);
        self.b.fill(0.0);
    }

    pub fn scale(&mut self, s: f64) {
        for v in self.wy.iter_mut().chain(&mut self.wp).chain(&mut self.b) {
            *v *= s;
        }
    }

    pub fn square_norm(&self) -> f64 {
        square_norm(&self.wy) + square_norm(&self.wp) + square_norm(&self.b)
    }

    pub fn param_count(&self) -> usize {
        self.wy.len() + self.wp.len() + self.b.len()
    }

    /// 埋め込みを適用
    pub fn prepare(&self, steps: &[[f64; 2]]) -> SequenceData {
        let width = self.width();
        let mut x = Matrix::zeros(steps.len(), width);
        for (t, step) in steps.iter().enumerate() {
            if !is_valid_step(step) {
                continue;
            }
            let vy = (step[0] / RAW_SCALE).tanh();
            let vp = (step[1] / RAW_SCALE).tanh();
            for (i, out) in x.row_mut(t).iter_mut().enumerate() {
                *out = self.wy[i] * vy + self.wp[i] * vp + self.b[i];
            }
        }
        SequenceData {
            x,
            mask: validity_mask(steps),
        }
    }

    /// 入力勾配 dX から埋め込みパラメータの勾配を累積する
    ///
    /// 無効ステップには勾配を流さない。
    pub fn accumulate_grad(&self, steps: &[[f64; 2]], dx: &Matrix, grad: &mut RawEmbedding) {
        for (t, step) in steps.iter().enumerate() {
            if !is_valid_step(step) {
                continue;
            }
            let vy = (step[0] / RAW_SCALE).tanh();
            let vp = (step[1] / RAW_SCALE).tanh();
            for (i, &d) in dx.row(t).iter().enumerate() {
                grad.wy[i] += d * vy;
                grad.wp[i] += d * vp;
                grad.b[i] += d;
            }
        }
    }
}
