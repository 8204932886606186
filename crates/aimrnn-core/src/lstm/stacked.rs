//! 多層・双方向 LSTM エンコーダ

use rand::{Rng, RngCore};

use super::layer::{LstmCache, LstmLayer};
use crate::math::{Matrix, dropout_mask};

/// 学習時の確率的な設定
pub struct TrainingPass<'a> {
    /// 層間 dropout 率
    pub dropout: f64,
    /// 再帰 dropout 率
    pub recurrent_dropout: f64,
    pub rng: &'a mut dyn RngCore,
}

/// エンコーダ全体の順伝播キャッシュ
#[derive(Clone, Debug, Default)]
pub struct EncoderCache {
    fwd: Vec<LstmCache>,
    bwd: Vec<LstmCache>,
    /// 層出力に掛けた dropout マスク（最終層は常に None）
    dropout_masks: Vec<Option<Vec<f64>>>,
}

/// 積み重ね LSTM
#[derive(Clone, Debug, PartialEq)]
pub struct StackedLstm {
    pub input_size: usize,
    pub hidden_size: usize,
    pub num_layers: usize,
    pub bidirectional: bool,
    pub fwd: Vec<LstmLayer>,
    /// 逆方向（単方向なら空）
    pub bwd: Vec<LstmLayer>,
}

impl StackedLstm {
    pub fn new<R: Rng + ?Sized>(
        rng: &mut R,
        input_size: usize,
        hidden_size: usize,
        num_layers: usize,
        bidirectional: bool,
    ) -> Self {
        let mut fwd = Vec::with_capacity(num_layers);
        let mut bwd = Vec::new();
        for l in 0..num_layers {
            let in_size = Self::layer_input_size(input_size, hidden_size, bidirectional, l);
            fwd.push(LstmLayer::new(rng, in_size, hidden_size));
            if bidirectional {
                bwd.push(LstmLayer::new(rng, in_size, hidden_size));
            }
        }
        Self {
            input_size,
            hidden_size,
            num_layers,
            bidirectional,
            fwd,
            bwd,
        }
    }

    /// 同じ形のゼロ埋めエンコーダ
    pub fn zeros_like(&self) -> Self {
        let zeros = |layers: &[LstmLayer]| {
            layers
                .iter()
                .map(|l| LstmLayer::zeros(l.input_size, l.hidden_size))
                .collect()
        };
        Self {
            input_size: self.input_size,
            hidden_size: self.hidden_size,
            num_layers: self.num_layers,
            bidirectional: self.bidirectional,
            fwd: zeros(&self.fwd),
            bwd: zeros(&self.bwd),
        }
    }

    /// 第 l 層の入力次元
    pub fn layer_input_size(
        input_size: usize,
        hidden_size: usize,
        bidirectional: bool,
        l: usize,
    ) -> usize {
        match (l, bidirectional) {
            (0, _) => input_size,
            (_, true) => 2 * hidden_size,
            (_, false) => hidden_size,
        }
    }

    /// 出力次元
    pub fn output_size(&self) -> usize {
        if self.bidirectional { 2 * self.hidden_size } else { self.hidden_size }
    }

    /// 永続化順（層ごとに fwd → bwd）で層を列挙
    pub fn layers(&self) -> impl Iterator<Item = &LstmLayer> {
        (0..self.num_layers).flat_map(move |l| {
            std::iter::once(&self.fwd[l]).chain(self.bwd.get(l))
        })
    }

    pub fn layers_mut(&mut self) -> impl Iterator<Item = &mut LstmLayer> {
        let mut bwd = self.bwd.iter_mut();
        self.fwd
            .iter_mut()
            .flat_map(move |f| std::iter::once(f).chain(bwd.next()))
    }

    pub fn zero(&mut self) {
        self.layers_mut().for_each(LstmLayer::zero);
    }

    pub fn scale(&mut self, s: f64) {
        self.layers_mut().for_each(|l| l.scale(s));
    }

    pub fn square_norm(&self) -> f64 {
        self.layers().map(LstmLayer::square_norm).sum()
    }

    pub fn param_count(&self) -> usize {
        self.layers().map(LstmLayer::param_count).sum()
    }

    /// 順伝播
    ///
    /// `training` が Some のとき dropout を適用する。
    /// `cache` が Some のとき逆伝播用に中間値を保存する。
    pub fn forward(
        &self,
        x: &Matrix,
        mut training: Option<TrainingPass<'_>>,
        mut cache: Option<&mut EncoderCache>,
    ) -> Matrix {
        if let Some(c) = cache.as_deref_mut() {
            *c = EncoderCache::default();
        }

        let mut current = x.clone();
        for l in 0..self.num_layers {
            let rec_fwd = self.recurrent_mask(training.as_mut());
            let mut fwd_cache = cache.as_ref().map(|_| LstmCache::default());
            let out_f =
                self.fwd[l].forward(&current, false, rec_fwd.as_deref(), fwd_cache.as_mut());

            let mut out = if self.bidirectional {
                let rec_bwd = self.recurrent_mask(training.as_mut());
                let mut bwd_cache = cache.as_ref().map(|_| LstmCache::default());
                let out_b =
                    self.bwd[l].forward(&current, true, rec_bwd.as_deref(), bwd_cache.as_mut());
                if let (Some(c), Some(bc)) = (cache.as_deref_mut(), bwd_cache) {
                    c.bwd.push(bc);
                }
                concat(&out_f, &out_b)
            } else {
                out_f
            };
            if let (Some(c), Some(fc)) = (cache.as_deref_mut(), fwd_cache) {
                c.fwd.push(fc);
            }

            let is_last = l + 1 == self.num_layers;
            let mask = match training.as_mut() {
                Some(pass) if !is_last && pass.dropout > 0.0 => {
                    Some(dropout_mask(&mut *pass.rng, out.cols(), pass.dropout))
                }
                _ => None,
            };
            if let Some(mask) = &mask {
                apply_column_mask(&mut out, mask);
            }
            if let Some(c) = cache.as_deref_mut() {
                c.dropout_masks.push(mask);
            }
            current = out;
        }
        current
    }

    fn recurrent_mask(&self, training: Option<&mut TrainingPass<'_>>) -> Option<Vec<f64>> {
        let pass = training?;
        if pass.recurrent_dropout > 0.0 {
            Some(dropout_mask(&mut *pass.rng, self.hidden_size, pass.recurrent_dropout))
        } else {
            None
        }
    }

    /// 逆伝播
    ///
    /// 出力勾配 `d_out` [T × output_size] からパラメータ勾配を `grad` に累積し、
    /// 入力勾配 [T × input_size] を返す。
    pub fn backward(&self, cache: &EncoderCache, d_out: &Matrix, grad: &mut StackedLstm) -> Matrix {
        let hs = self.hidden_size;
        let mut d_current = d_out.clone();
        for l in (0..self.num_layers).rev() {
            if let Some(mask) = &cache.dropout_masks[l] {
                apply_column_mask(&mut d_current, mask);
            }
            let (d_f, d_b) = if self.bidirectional {
                let (a, b) = split(&d_current, hs);
                (a, Some(b))
            } else {
                (d_current, None)
            };
            let mut dx = self.fwd[l].backward(&cache.fwd[l], &d_f, &mut grad.fwd[l]);
            if let Some(d_b) = d_b {
                let dx_b = self.bwd[l].backward(&cache.bwd[l], &d_b, &mut grad.bwd[l]);
                for (a, b) in dx.as_mut_slice().iter_mut().zip(dx_b.as_slice()) {
                    *a += b;
                }
            }
            d_current = dx;
        }
        d_current
    }
}

/// 列方向に連結 [a | b]
fn concat(a: &Matrix, b: &Matrix) -> Matrix {
    let ca = a.cols();
    let mut out = Matrix::zeros(a.rows(), ca + b.cols());
    for t in 0..a.rows() {
        let row = out.row_mut(t);
        row[..ca].copy_from_slice(a.row(t));
        row[ca..].copy_from_slice(b.row(t));
    }
    out
}

/// 列 `at` で分割
fn split(m: &Matrix, at: usize) -> (Matrix, Matrix) {
    let mut a = Matrix::zeros(m.rows(), at);
    let mut b = Matrix::zeros(m.rows(), m.cols() - at);
    for t in 0..m.rows() {
        let (l, r) = m.row(t).split_at(at);
        a.row_mut(t).copy_from_slice(l);
        b.row_mut(t).copy_from_slice(r);
    }
    (a, b)
}

/// 全タイムステップに同じユニット別マスクを掛ける
fn apply_column_mask(m: &mut Matrix, mask: &[f64]) {
    for t in 0..m.rows() {
        for (v, k) in m.row_mut(t).iter_mut().zip(mask) {
            *v *= k;
        }
    }
}
