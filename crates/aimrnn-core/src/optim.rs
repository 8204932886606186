//! AdamW オプティマイザ
//!
//! 全パラメータ群で 1 つのステップ数を共有する（ミニバッチごとに 1 回増やす）。

/// AdamW
#[derive(Clone, Debug, PartialEq)]
pub struct AdamW {
    /// β1（一次モーメントの減衰率）
    pub beta1: f64,
    /// β2（二次モーメントの減衰率）
    pub beta2: f64,
    /// 数値安定性のための小さな値
    pub epsilon: f64,
    /// ステップ数
    t: u64,
}

/// 1 回の更新に共通する設定
#[derive(Clone, Copy, Debug)]
pub struct StepParams {
    pub lr: f64,
    /// 分離型重み減衰（0 で無効）
    pub weight_decay: f64,
    /// 要素ごとの勾配クリップ（0 または非有限で無効）
    pub clip: f64,
}

impl Default for AdamW {
    fn default() -> Self {
        Self {
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            t: 0,
        }
    }
}

impl AdamW {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step_count(&self) -> u64 {
        self.t
    }

    pub fn set_step_count(&mut self, t: u64) {
        self.t = t;
    }

    pub fn increment_step(&mut self) {
        self.t += 1;
    }

    /// バイアス補正係数 (1 − β1^t, 1 − β2^t)
    fn bias_corrections(&self) -> (f64, f64) {
        // t = 0 で更新すると 0 除算になるので最低 1 として扱う
        let t = self.t.max(1).min(i32::MAX as u64) as i32;
        (1.0 - self.beta1.powi(t), 1.0 - self.beta2.powi(t))
    }

    /// ベクトルを更新
    pub fn step(&self, w: &mut [f64], g: &[f64], m: &mut [f64], v: &mut [f64], p: StepParams) {
        let (bc1, bc2) = self.bias_corrections();
        let moments = m.iter_mut().zip(v.iter_mut());
        for ((w, &g), (m, v)) in w.iter_mut().zip(g).zip(moments) {
            adamw_update(w, g, m, v, self, bc1, bc2, p);
        }
    }

    /// スカラーを更新
    pub fn step_scalar(&self, w: &mut f64, g: f64, m: &mut f64, v: &mut f64, p: StepParams) {
        let (bc1, bc2) = self.bias_corrections();
        adamw_update(w, g, m, v, self, bc1, bc2, p);
    }
}

/// AdamW の更新式を 1 要素に適用
#[allow(clippy::too_many_arguments)]
#[inline]
fn adamw_update(
    w: &mut f64,
    g: f64,
    m: &mut f64,
    v: &mut f64,
    opt: &AdamW,
    bc1: f64,
    bc2: f64,
    p: StepParams,
) {
    let mut g = if g.is_finite() { g } else { 0.0 };
    if p.clip > 0.0 && p.clip.is_finite() {
        g = g.clamp(-p.clip, p.clip);
    }

    // 重み減衰はモーメントと独立に適用
    *w -= p.lr * p.weight_decay * *w;

    *m = opt.beta1 * *m + (1.0 - opt.beta1) * g;
    *v = opt.beta2 * *v + (1.0 - opt.beta2) * g * g;

    let m_hat = *m / bc1;
    let v_hat = *v / bc2;
    *w -= p.lr * m_hat / (v_hat.sqrt() + opt.epsilon);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(lr: f64, wd: f64, clip: f64) -> StepParams {
        StepParams {
            lr,
            weight_decay: wd,
            clip,
        }
    }

    #[test]
    fn test_first_step_moves_by_lr() {
        let mut opt = AdamW::new();
        opt.increment_step();
        let mut w = [1.0, -1.0];
        let mut m = [0.0; 2];
        let mut v = [0.0; 2];
        opt.step(&mut w, &[0.5, -2.0], &mut m, &mut v, params(0.01, 0.0, 0.0));
        // 初回は m̂/√v̂ = sign(g)
        assert!((w[0] - 0.99).abs() < 1e-6);
        assert!((w[1] + 0.99).abs() < 1e-6);
    }

    #[test]
    fn test_weight_decay_and_non_finite_grad() {
        let mut opt = AdamW::new();
        opt.increment_step();
        let mut w = 2.0;
        let mut m = 0.0;
        let mut v = 0.0;
        opt.step_scalar(&mut w, f64::NAN, &mut m, &mut v, params(0.1, 0.5, 0.0));
        // 勾配 0 扱いなので重み減衰のみ: 2 − 0.1·0.5·2
        assert!((w - 1.9).abs() < 1e-12);
        assert_eq!(m, 0.0);
        assert_eq!(v, 0.0);
    }

    #[test]
    fn test_elementwise_clip() {
        let mut opt = AdamW::new();
        opt.increment_step();
        let mut w = [0.0];
        let mut m = [0.0];
        let mut v = [0.0];
        opt.step(&mut w, &[100.0], &mut m, &mut v, params(0.001, 0.0, 1.0));
        assert!((m[0] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_step_zero_is_safe() {
        let opt = AdamW::new();
        let mut w = [1.0];
        let mut m = [0.0];
        let mut v = [0.0];
        opt.step(&mut w, &[1.0], &mut m, &mut v, params(0.01, 0.0, 0.0));
        assert!(w[0].is_finite());
    }
}
