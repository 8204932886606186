//! 系列前処理
//!
//! `[yaw, pitch]` の組の列を、タイムステップごとの固定幅ベクトル列
//! （`SequenceData`）に変換する。どの方式でも出力長は入力長と等しく、
//! どちらかの値が非有限なステップはマスク 0・ゼロ行になる。

mod hybrid;
mod raw;
mod statistical;

pub use hybrid::hybrid_features;
pub use raw::RawEmbedding;
pub use statistical::{STAT_FEATURES, statistical_features};

use crate::config::InputMode;
use crate::math::Matrix;

/// 前処理済み系列
#[derive(Clone, Debug)]
pub struct SequenceData {
    /// [T × input_size]
    pub x: Matrix,
    /// 1 = 有効、0 = 無効
    pub mask: Vec<f64>,
}

impl SequenceData {
    pub fn len(&self) -> usize {
        self.mask.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mask.is_empty()
    }

    /// 有効ステップ数
    pub fn valid_count(&self) -> usize {
        self.mask.iter().filter(|&&m| m > 0.0).count()
    }

    pub fn has_enough_valid_steps(&self, min_steps: usize) -> bool {
        self.valid_count() >= min_steps
    }
}

/// ステップが有効か（両チャンネルとも有限）
#[inline]
pub(crate) fn is_valid_step(step: &[f64; 2]) -> bool {
    step[0].is_finite() && step[1].is_finite()
}

/// マスク列を作る
pub(crate) fn validity_mask(steps: &[[f64; 2]]) -> Vec<f64> {
    steps
        .iter()
        .map(|s| if is_valid_step(s) { 1.0 } else { 0.0 })
        .collect()
}

/// 入力モードに応じて前処理する
///
/// `Raw` のときのみ埋め込みパラメータを使う。
pub fn prepare(
    mode: InputMode,
    embedding: &RawEmbedding,
    steps: &[[f64; 2]],
    width: usize,
) -> SequenceData {
    match mode {
        InputMode::RawSequence => embedding.prepare(steps),
        InputMode::StatisticalFeatures => fixed(steps, width, statistical_features),
        InputMode::Hybrid => fixed(steps, width, hybrid_features),
    }
}

/// 固定式の特徴量で前処理する（無効ステップの行はゼロ）
fn fixed(
    steps: &[[f64; 2]],
    width: usize,
    features: fn(&[[f64; 2]], usize) -> Matrix,
) -> SequenceData {
    let mask = validity_mask(steps);
    let mut x = features(steps, width);
    for (t, &m) in mask.iter().enumerate() {
        if m == 0.0 {
            x.row_mut(t).fill(0.0);
        }
    }
    SequenceData { x, mask }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn sample_steps() -> Vec<[f64; 2]> {
        vec![
            [1.0, 2.0],
            [f64::NAN, 0.5],
            [-3.0, 4.0],
            [2.5, f64::INFINITY],
            [0.0, -1.0],
        ]
    }

    #[test]
    fn test_all_modes_keep_length_and_mask_invalid_steps() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);
        let emb = RawEmbedding::new(&mut rng, 12);
        let steps = sample_steps();
        for mode in InputMode::ALL {
            let seq = prepare(mode, &emb, &steps, 12);
            assert_eq!(seq.len(), steps.len(), "{mode:?}");
            assert_eq!(seq.x.rows(), steps.len());
            assert_eq!(seq.x.cols(), 12);
            assert_eq!(seq.mask, vec![1.0, 0.0, 1.0, 0.0, 1.0]);
            assert!(seq.x.is_finite());
            assert!(seq.x.row(1).iter().all(|&v| v == 0.0));
            assert!(seq.x.row(3).iter().all(|&v| v == 0.0));
            assert_eq!(seq.valid_count(), 3);
        }
    }

    #[test]
    fn test_empty_input() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);
        let emb = RawEmbedding::new(&mut rng, 4);
        let seq = prepare(InputMode::Hybrid, &emb, &[], 4);
        assert!(seq.is_empty());
        assert!(!seq.has_enough_valid_steps(2));
    }
}
