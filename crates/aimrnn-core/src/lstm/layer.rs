//! 単方向 LSTM 層（Layer Normalization + 再帰 dropout）

use rand::Rng;

use crate::math::{
    Matrix, layer_norm_backward, layer_norm_forward, orthogonal, sigmoid, square_norm,
    tanh_clipped, xavier_uniform,
};

/// ゲート番号（忘却・入力・候補・出力）
pub const GATE_F: usize = 0;
pub const GATE_I: usize = 1;
pub const GATE_G: usize = 2;
pub const GATE_O: usize = 3;
pub const NUM_GATES: usize = 4;

/// 永続化・最適化で使う配列の個数（W×4, U×4, b×4, γ, β）
pub const LAYER_ARRAYS: usize = 3 * NUM_GATES + 2;

/// `arrays()` の並び順での配列名
pub const LAYER_ARRAY_NAMES: [&str; LAYER_ARRAYS] = [
    "Wf", "Wi", "Wc", "Wo", "Uf", "Ui", "Uc", "Uo", "bf", "bi", "bc", "bo", "ln_gamma", "ln_beta",
];

/// 単方向 LSTM 層
///
/// 勾配・モーメントも同じ構造体で保持する（`zeros` で確保）。
#[derive(Clone, Debug, PartialEq)]
pub struct LstmLayer {
    pub input_size: usize,
    pub hidden_size: usize,
    /// 入力重み [hidden][input]
    pub w: [Vec<f64>; NUM_GATES],
    /// 再帰重み [hidden][hidden]
    pub u: [Vec<f64>; NUM_GATES],
    pub b: [Vec<f64>; NUM_GATES],
    pub ln_gamma: Vec<f64>,
    pub ln_beta: Vec<f64>,
}

/// 順伝播キャッシュ（ステップ順 = 走査順）
#[derive(Clone, Debug)]
pub struct LstmCache {
    step_to_time: Vec<usize>,
    x_by_step: Matrix,
    /// [T+1][hidden]、行 0 は初期状態
    h: Matrix,
    c: Matrix,
    gates: [Matrix; NUM_GATES],
    tanh_c: Matrix,
    ln_xhat: Matrix,
    inv_std: Vec<f64>,
    rec_mask: Option<Vec<f64>>,
}

impl LstmLayer {
    /// 初期化済みの層を作る
    ///
    /// W は Xavier、U は直交、忘却ゲートのバイアスは 1、γ = 1。
    pub fn new<R: Rng + ?Sized>(rng: &mut R, input_size: usize, hidden_size: usize) -> Self {
        let w = std::array::from_fn(|_| {
            xavier_uniform(rng, hidden_size * input_size, input_size, hidden_size)
        });
        let u = std::array::from_fn(|_| orthogonal(rng, hidden_size));
        let mut b: [Vec<f64>; NUM_GATES] = std::array::from_fn(|_| vec![0.0; hidden_size]);
        b[GATE_F].fill(1.0);
        Self {
            input_size,
            hidden_size,
            w,
            u,
            b,
            ln_gamma: vec![1.0; hidden_size],
            ln_beta: vec![0.0; hidden_size],
        }
    }

    /// 全要素 0 の層（勾配・モーメント用）
    pub fn zeros(input_size: usize, hidden_size: usize) -> Self {
        Self {
            input_size,
            hidden_size,
            w: std::array::from_fn(|_| vec![0.0; hidden_size * input_size]),
            u: std::array::from_fn(|_| vec![0.0; hidden_size * hidden_size]),
            b: std::array::from_fn(|_| vec![0.0; hidden_size]),
            ln_gamma: vec![0.0; hidden_size],
            ln_beta: vec![0.0; hidden_size],
        }
    }

    /// 永続化順の配列
    pub fn arrays(&self) -> [&Vec<f64>; LAYER_ARRAYS] {
        let [wf, wi, wc, wo] = &self.w;
        let [uf, ui, uc, uo] = &self.u;
        let [bf, bi, bc, bo] = &self.b;
        [
            wf,
            wi,
            wc,
            wo,
            uf,
            ui,
            uc,
            uo,
            bf,
            bi,
            bc,
            bo,
            &self.ln_gamma,
            &self.ln_beta,
        ]
    }

    pub fn arrays_mut(&mut self) -> [&mut Vec<f64>; LAYER_ARRAYS] {
        let [wf, wi, wc, wo] = &mut self.w;
        let [uf, ui, uc, uo] = &mut self.u;
        let [bf, bi, bc, bo] = &mut self.b;
        [
            wf,
            wi,
            wc,
            wo,
            uf,
            ui,
            uc,
            uo,
            bf,
            bi,
            bc,
            bo,
            &mut self.ln_gamma,
            &mut self.ln_beta,
        ]
    }

    /// 重み減衰の対象か（W と U のみ）
    pub fn decays(index: usize) -> bool {
        index < 2 * NUM_GATES
    }

    pub fn zero(&mut self) {
        for a in self.arrays_mut() {
            a.fill(0.0);
        }
    }

    pub fn scale(&mut self, s: f64) {
        for a in self.arrays_mut() {
            a.iter_mut().for_each(|v| *v *= s);
        }
    }

    pub fn square_norm(&self) -> f64 {
        self.arrays().iter().map(|a| square_norm(a)).sum()
    }

    pub fn param_count(&self) -> usize {
        self.arrays().iter().map(|a| a.len()).sum()
    }

    /// 1 ゲートの前活性値（±50 でクリップ）
    fn pre_activation(&self, gate: usize, x: &[f64], h: &[f64], n: usize) -> f64 {
        let w = &self.w[gate][n * self.input_size..(n + 1) * self.input_size];
        let u = &self.u[gate][n * self.hidden_size..(n + 1) * self.hidden_size];
        let sum = self.b[gate][n]
            + w.iter().zip(x).map(|(a, b)| a * b).sum::<f64>()
            + u.iter().zip(h).map(|(a, b)| a * b).sum::<f64>();
        sum.clamp(-crate::math::PRE_ACTIVATION_CLIP, crate::math::PRE_ACTIVATION_CLIP)
    }

    /// 順伝播
    ///
    /// `reverse` なら t = T-1 → 0 の順に走査する。出力は絶対時刻に揃える。
    /// `rec_mask` は h_prev に掛ける再帰 dropout マスク（呼び出し 1 回で固定）。
    pub fn forward(
        &self,
        x: &Matrix,
        reverse: bool,
        rec_mask: Option<&[f64]>,
        cache: Option<&mut LstmCache>,
    ) -> Matrix {
        let t_len = x.rows();
        let hs = self.hidden_size;
        let mut out = Matrix::zeros(t_len, hs);

        let step_to_time: Vec<usize> = if reverse {
            (0..t_len).rev().collect()
        } else {
            (0..t_len).collect()
        };

        let mut local = cache.map(|c| {
            *c = LstmCache::new(t_len, self.input_size, hs);
            c
        });

        let mut h_prev = vec![0.0; hs];
        let mut c_prev = vec![0.0; hs];
        let mut h_in = vec![0.0; hs];
        let mut gates = [vec![0.0; hs], vec![0.0; hs], vec![0.0; hs], vec![0.0; hs]];
        let mut c_now = vec![0.0; hs];
        let mut tanh_now = vec![0.0; hs];
        let mut pre = vec![0.0; hs];
        let mut x_hat = vec![0.0; hs];
        let mut h_now = vec![0.0; hs];

        for (s, &t) in step_to_time.iter().enumerate() {
            let xt = x.row(t);

            match rec_mask {
                Some(mask) => {
                    for k in 0..hs {
                        h_in[k] = h_prev[k] * mask[k];
                    }
                }
                None => h_in.copy_from_slice(&h_prev),
            }

            for (gate, buf) in gates.iter_mut().enumerate() {
                for (n, out) in buf.iter_mut().enumerate() {
                    let z = self.pre_activation(gate, xt, &h_in, n);
                    *out = if gate == GATE_G { tanh_clipped(z) } else { sigmoid(z) };
                }
            }

            for k in 0..hs {
                c_now[k] = gates[GATE_F][k] * c_prev[k] + gates[GATE_I][k] * gates[GATE_G][k];
                tanh_now[k] = c_now[k].tanh();
                pre[k] = gates[GATE_O][k] * tanh_now[k];
            }

            let inv_std =
                layer_norm_forward(&pre, &self.ln_gamma, &self.ln_beta, &mut x_hat, &mut h_now);
            out.row_mut(t).copy_from_slice(&h_now);

            if let Some(cache) = local.as_deref_mut() {
                cache.x_by_step.row_mut(s).copy_from_slice(xt);
                cache.h.row_mut(s + 1).copy_from_slice(&h_now);
                cache.c.row_mut(s + 1).copy_from_slice(&c_now);
                for (dst, src) in cache.gates.iter_mut().zip(&gates) {
                    dst.row_mut(s).copy_from_slice(src);
                }
                cache.tanh_c.row_mut(s).copy_from_slice(&tanh_now);
                cache.ln_xhat.row_mut(s).copy_from_slice(&x_hat);
                cache.inv_std[s] = inv_std;
            }

            std::mem::swap(&mut h_prev, &mut h_now);
            std::mem::swap(&mut c_prev, &mut c_now);
        }

        if let Some(cache) = local {
            cache.step_to_time = step_to_time;
            cache.rec_mask = rec_mask.map(<[f64]>::to_vec);
        }
        out
    }

    /// 逆伝播
    ///
    /// `d_h` は絶対時刻順の出力勾配。パラメータ勾配を `grad` に累積し、
    /// 入力勾配（絶対時刻順）を返す。
    pub fn backward(&self, cache: &LstmCache, d_h: &Matrix, grad: &mut LstmLayer) -> Matrix {
        let t_len = cache.step_to_time.len();
        let hs = self.hidden_size;
        let is = self.input_size;
        let mut dx = Matrix::zeros(t_len, is);

        let mut dh_next = vec![0.0; hs];
        let mut dc_next = vec![0.0; hs];
        let mut dh = vec![0.0; hs];
        let mut d_pre = vec![0.0; hs];
        let mut dz = [vec![0.0; hs], vec![0.0; hs], vec![0.0; hs], vec![0.0; hs]];
        let mut dc = vec![0.0; hs];
        let mut h_in = vec![0.0; hs];

        for s in (0..t_len).rev() {
            let t = cache.step_to_time[s];

            for k in 0..hs {
                dh[k] = d_h.row(t)[k] + dh_next[k];
            }
            layer_norm_backward(
                &dh,
                &self.ln_gamma,
                cache.ln_xhat.row(s),
                cache.inv_std[s],
                &mut grad.ln_gamma,
                &mut grad.ln_beta,
                &mut d_pre,
            );

            let f = cache.gates[GATE_F].row(s);
            let i = cache.gates[GATE_I].row(s);
            let g = cache.gates[GATE_G].row(s);
            let o = cache.gates[GATE_O].row(s);
            let tanh_c = cache.tanh_c.row(s);
            let c_prev = cache.c.row(s);

            for k in 0..hs {
                dc[k] = dc_next[k] + d_pre[k] * o[k] * (1.0 - tanh_c[k] * tanh_c[k]);
                dz[GATE_O][k] = d_pre[k] * tanh_c[k] * o[k] * (1.0 - o[k]);
                dz[GATE_F][k] = dc[k] * c_prev[k] * f[k] * (1.0 - f[k]);
                dz[GATE_I][k] = dc[k] * g[k] * i[k] * (1.0 - i[k]);
                dz[GATE_G][k] = dc[k] * i[k] * (1.0 - g[k] * g[k]);
            }

            let h_prev = cache.h.row(s);
            match &cache.rec_mask {
                Some(mask) => {
                    for k in 0..hs {
                        h_in[k] = h_prev[k] * mask[k];
                    }
                }
                None => h_in.copy_from_slice(h_prev),
            }
            let x = cache.x_by_step.row(s);

            for gate in 0..NUM_GATES {
                let dzg = &dz[gate];
                for n in 0..hs {
                    let d = dzg[n];
                    grad.b[gate][n] += d;
                    let gw = &mut grad.w[gate][n * is..(n + 1) * is];
                    for (acc, &xk) in gw.iter_mut().zip(x) {
                        *acc += d * xk;
                    }
                    let gu = &mut grad.u[gate][n * hs..(n + 1) * hs];
                    for (acc, &hk) in gu.iter_mut().zip(&h_in) {
                        *acc += d * hk;
                    }
                }
            }

            let dx_row = dx.row_mut(t);
            for gate in 0..NUM_GATES {
                let w = &self.w[gate];
                for n in 0..hs {
                    let d = dz[gate][n];
                    for (k, acc) in dx_row.iter_mut().enumerate() {
                        *acc += w[n * is + k] * d;
                    }
                }
            }

            dh_next.fill(0.0);
            for gate in 0..NUM_GATES {
                let u = &self.u[gate];
                for n in 0..hs {
                    let d = dz[gate][n];
                    for (j, acc) in dh_next.iter_mut().enumerate() {
                        *acc += u[n * hs + j] * d;
                    }
                }
            }
            if let Some(mask) = &cache.rec_mask {
                for (acc, m) in dh_next.iter_mut().zip(mask) {
                    *acc *= m;
                }
            }
            for k in 0..hs {
                dc_next[k] = dc[k] * f[k];
            }
        }
        dx
    }
}

impl LstmCache {
    fn new(t_len: usize, input_size: usize, hidden_size: usize) -> Self {
        Self {
            step_to_time: Vec::new(),
            x_by_step: Matrix::zeros(t_len, input_size),
            h: Matrix::zeros(t_len + 1, hidden_size),
            c: Matrix::zeros(t_len + 1, hidden_size),
            gates: std::array::from_fn(|_| Matrix::zeros(t_len, hidden_size)),
            tanh_c: Matrix::zeros(t_len, hidden_size),
            ln_xhat: Matrix::zeros(t_len, hidden_size),
            inv_std: vec![0.0; t_len],
            rec_mask: None,
        }
    }
}

impl Default for LstmCache {
    fn default() -> Self {
        Self::new(0, 0, 0)
    }
}
