//! モデルの全パラメータ
//!
//! 勾配アキュムレータと AdamW のモーメントも同じ `ModelTensors` 構造で
//! 保持し、構造的に対応する配列同士を更新する。

use rand::Rng;

use crate::config::RnnConfig;
use crate::head::BinaryHead;
use crate::lstm::{LstmLayer, StackedLstm};
use crate::optim::{AdamW, StepParams};
use crate::pooling::AttentionPooling;
use crate::sequence::RawEmbedding;

/// 更新対象のパラメータ群
///
/// ヘッドとエンコーダは常に対象。注意プーリングは Attention モード時、
/// 埋め込みは Raw モードのサンプルが 1 つ以上あったときのみ。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActiveGroups {
    pub attention: bool,
    pub embedding: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModelTensors {
    pub embedding: RawEmbedding,
    pub encoder: StackedLstm,
    pub attention: AttentionPooling,
    pub head: BinaryHead,
}

impl ModelTensors {
    /// 設定に従って初期化
    pub fn new<R: Rng + ?Sized>(rng: &mut R, cfg: &RnnConfig) -> Self {
        let embedding = RawEmbedding::new(rng, cfg.input_size);
        let encoder = StackedLstm::new(
            rng,
            cfg.input_size,
            cfg.hidden_size,
            cfg.num_layers,
            cfg.bidirectional,
        );
        let out = cfg.encoder_output_size();
        Self {
            embedding,
            encoder,
            attention: AttentionPooling::new(rng, out),
            head: BinaryHead::new(rng, out),
        }
    }

    /// 同じ形のゼロ埋め
    pub fn zeros_like(&self) -> Self {
        let out = self.encoder.output_size();
        Self {
            embedding: RawEmbedding::zeros(self.embedding.width()),
            encoder: self.encoder.zeros_like(),
            attention: AttentionPooling::zeros(out),
            head: BinaryHead::zeros(out),
        }
    }

    pub fn zero(&mut self) {
        self.embedding.zero();
        self.encoder.zero();
        self.attention.zero();
        self.head.zero();
    }

    pub fn scale(&mut self, s: f64, groups: ActiveGroups) {
        self.head.scale(s);
        self.encoder.scale(s);
        if groups.attention {
            self.attention.scale(s);
        }
        if groups.embedding {
            self.embedding.scale(s);
        }
    }

    pub fn square_norm(&self, groups: ActiveGroups) -> f64 {
        let mut sq = self.head.square_norm() + self.encoder.square_norm();
        if groups.attention {
            sq += self.attention.square_norm();
        }
        if groups.embedding {
            sq += self.embedding.square_norm();
        }
        sq
    }

    /// 総パラメータ数（使われていない群も含む）
    pub fn param_count(&self) -> usize {
        self.embedding.param_count()
            + self.encoder.param_count()
            + self.attention.param_count()
            + self.head.param_count()
    }
}

/// 勾配 `grads` で `params` を更新する
///
/// 重み減衰は重み（W, U, 注意 w, ヘッド v, 埋め込み）のみ。
/// バイアスと LayerNorm には掛けない。
pub fn apply_adamw(
    opt: &AdamW,
    params: &mut ModelTensors,
    grads: &ModelTensors,
    m: &mut ModelTensors,
    v: &mut ModelTensors,
    decayed: StepParams,
    groups: ActiveGroups,
) {
    let plain = StepParams {
        weight_decay: 0.0,
        ..decayed
    };

    opt.step(&mut params.head.v, &grads.head.v, &mut m.head.v, &mut v.head.v, decayed);
    opt.step_scalar(
        &mut params.head.bias,
        grads.head.bias,
        &mut m.head.bias,
        &mut v.head.bias,
        plain,
    );

    if groups.attention {
        opt.step(
            &mut params.attention.w,
            &grads.attention.w,
            &mut m.attention.w,
            &mut v.attention.w,
            decayed,
        );
        opt.step_scalar(
            &mut params.attention.b,
            grads.attention.b,
            &mut m.attention.b,
            &mut v.attention.b,
            plain,
        );
    }

    if groups.embedding {
        let (p, g) = (&mut params.embedding, &grads.embedding);
        opt.step(&mut p.wy, &g.wy, &mut m.embedding.wy, &mut v.embedding.wy, decayed);
        opt.step(&mut p.wp, &g.wp, &mut m.embedding.wp, &mut v.embedding.wp, decayed);
        opt.step(&mut p.b, &g.b, &mut m.embedding.b, &mut v.embedding.b, decayed);
    }

    let layers = params
        .encoder
        .layers_mut()
        .zip(grads.encoder.layers())
        .zip(m.encoder.layers_mut().zip(v.encoder.layers_mut()));
    for ((p, g), (lm, lv)) in layers {
        let arrays = p
            .arrays_mut()
            .into_iter()
            .zip(g.arrays())
            .zip(lm.arrays_mut().into_iter().zip(lv.arrays_mut()));
        for (idx, ((w, dw), (mw, vw))) in arrays.enumerate() {
            let sp = if LstmLayer::decays(idx) { decayed } else { plain };
            opt.step(w, dw, mw, vw, sp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn step_params(lr: f64, weight_decay: f64) -> StepParams {
        StepParams {
            lr,
            weight_decay,
            clip: 0.0,
        }
    }

    fn small_config() -> RnnConfig {
        RnnConfig {
            input_size: 4,
            hidden_size: 4,
            num_layers: 2,
            ..RnnConfig::default()
        }
    }

    #[test]
    fn test_param_count() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let t = ModelTensors::new(&mut rng, &small_config());
        // 埋め込み 3·4、各層 4·(4·4) + 4·(4·4) + 4·4 + 2·4（層 1 は入力 8）、注意/ヘッド 8+1
        let l0 = 4 * 16 + 4 * 16 + 16 + 8;
        let l1 = 4 * 32 + 4 * 16 + 16 + 8;
        assert_eq!(t.param_count(), 12 + 2 * (l0 + l1) + 9 + 9);
        assert_eq!(t.zeros_like().param_count(), t.param_count());
    }

    #[test]
    fn test_pooling_and_head_follow_encoder_width() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(4);
        for bidirectional in [true, false] {
            let cfg = RnnConfig {
                bidirectional,
                ..small_config()
            };
            let t = ModelTensors::new(&mut rng, &cfg);
            let width = cfg.encoder_output_size();
            assert_eq!(width, t.encoder.output_size());
            assert_eq!(t.attention.w.len(), width);
            assert_eq!(t.head.v.len(), width);
            assert_eq!(t.zeros_like().head.v.len(), width);
        }
    }

    #[test]
    fn test_inactive_groups_are_untouched() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(2);
        let mut params = ModelTensors::new(&mut rng, &small_config());
        let before = params.clone();
        let mut grads = params.zeros_like();
        grads.head.bias = 1.0;
        grads.attention.b = 1.0;
        grads.embedding.b.fill(1.0);
        let mut m = params.zeros_like();
        let mut v = params.zeros_like();

        let mut opt = AdamW::new();
        opt.increment_step();
        let groups = ActiveGroups {
            attention: false,
            embedding: false,
        };
        apply_adamw(&opt, &mut params, &grads, &mut m, &mut v, step_params(0.01, 0.0), groups);

        assert_eq!(params.attention, before.attention);
        assert_eq!(params.embedding, before.embedding);
        assert!(params.head.bias < before.head.bias);
    }

    #[test]
    fn test_layer_norm_is_not_decayed() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let mut params = ModelTensors::new(&mut rng, &small_config());
        let before = params.clone();
        let grads = params.zeros_like();
        let mut m = params.zeros_like();
        let mut v = params.zeros_like();
        let mut opt = AdamW::new();
        opt.increment_step();
        let groups = ActiveGroups {
            attention: true,
            embedding: true,
        };
        apply_adamw(&opt, &mut params, &grads, &mut m, &mut v, step_params(0.1, 0.5), groups);

        let layer = &params.encoder.fwd[0];
        let orig = &before.encoder.fwd[0];
        assert_eq!(layer.ln_gamma, orig.ln_gamma);
        assert_eq!(layer.b, orig.b);
        assert!((layer.w[0][0] - orig.w[0][0] * 0.95).abs() < 1e-12);
    }
}
