//! 統計特徴量 + 多スケール生値

use super::statistical::{channels, statistical_features};
use crate::math::Matrix;

/// 前半 ⌈w/2⌉ 列は統計特徴量、残りは生値を `tanh(v / (10·2^(j/2)))` で符号化
pub fn hybrid_features(steps: &[[f64; 2]], width: usize) -> Matrix {
    let stat_cols = width.div_ceil(2);
    let stats = statistical_features(steps, stat_cols);
    let (yaw, pitch) = channels(steps);

    let mut x = Matrix::zeros(steps.len(), width);
    for t in 0..steps.len() {
        let row = x.row_mut(t);
        row[..stat_cols].copy_from_slice(stats.row(t));
        for (j, out) in row[stat_cols..].iter_mut().enumerate() {
            let v = if j % 2 == 0 { yaw[t] } else { pitch[t] };
            let scale = 10.0 * 2f64.powi((j / 2) as i32);
            *out = (v / scale).tanh();
        }
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let steps = [[20.0, -40.0], [5.0, 5.0]];
        let x = hybrid_features(&steps, 7);
        let stats = statistical_features(&steps, 4);
        assert_eq!(&x.row(0)[..4], stats.row(0));
        // 残り 3 列: yaw/10, pitch/10, yaw/20
        assert!((x.row(0)[4] - 2.0f64.tanh()).abs() < 1e-12);
        assert!((x.row(0)[5] - (-4.0f64).tanh()).abs() < 1e-12);
        assert!((x.row(0)[6] - 1.0f64.tanh()).abs() < 1e-12);
    }
}
