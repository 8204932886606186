//! 二値分類ヘッド `p = σ(v·pooled + bias)`

use rand::Rng;

use crate::math::{dot, sigmoid, square_norm, xavier_uniform};

#[derive(Clone, Debug, PartialEq)]
pub struct BinaryHead {
    pub v: Vec<f64>,
    pub bias: f64,
}

/// 逆伝播用キャッシュ
#[derive(Clone, Debug, Default)]
pub struct HeadCache {
    pooled: Vec<f64>,
}

impl BinaryHead {
    pub fn new<R: Rng + ?Sized>(rng: &mut R, dim: usize) -> Self {
        Self {
            v: xavier_uniform(rng, dim, dim, 1),
            bias: 0.0,
        }
    }

    pub fn zeros(dim: usize) -> Self {
        Self {
            v: vec![0.0; dim],
            bias: 0.0,
        }
    }

    pub fn zero(&mut self) {
        self.v.fill(0.0);
        self.bias = 0.0;
    }

    pub fn scale(&mut self, s: f64) {
        self.v.iter_mut().for_each(|x| *x *= s);
        self.bias *= s;
    }

    pub fn square_norm(&self) -> f64 {
        square_norm(&self.v) + self.bias * self.bias
    }

    pub fn param_count(&self) -> usize {
        self.v.len() + 1
    }

    /// 順伝播
    pub fn forward(&self, pooled: &[f64], cache: Option<&mut HeadCache>) -> f64 {
        if let Some(c) = cache {
            c.pooled = pooled.to_vec();
        }
        sigmoid(dot(&self.v, pooled) + self.bias)
    }

    /// 逆伝播（`d_logit = p − y`）
    pub fn backward(&self, cache: &HeadCache, d_logit: f64, grad: &mut BinaryHead) -> Vec<f64> {
        for (g, x) in grad.v.iter_mut().zip(&cache.pooled) {
            *g += d_logit * x;
        }
        grad.bias += d_logit;
        self.v.iter().map(|w| d_logit * w).collect()
    }
}
