//! 入力系列とサンプル分割

/// 1 チャンクの最大ステップ数
pub const CHUNK_SIZE: usize = 150;

/// 1 チャンクの最小ステップ数（これ未満は捨てる）
pub const MIN_STEPS: usize = 2;

/// yaw / pitch の 2 系列
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RotationSeries {
    pub yaw: Vec<f64>,
    pub pitch: Vec<f64>,
}

impl RotationSeries {
    pub fn new(yaw: Vec<f64>, pitch: Vec<f64>) -> Self {
        Self { yaw, pitch }
    }

    /// `[yaw, pitch]` の組を返す
    ///
    /// 長さが異なる場合は短い方に揃える。非有限値はそのまま残す
    /// （前処理側でマスク 0 として扱う）。
    pub fn pairs(&self) -> Vec<[f64; 2]> {
        self.yaw.iter().zip(&self.pitch).map(|(&y, &p)| [y, p]).collect()
    }

    /// 有効な長さ（2 系列の短い方）
    pub fn len(&self) -> usize {
        self.yaw.len().min(self.pitch.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// ラベル付き系列（データセット 1 行分）
#[derive(Clone, Debug, PartialEq)]
pub struct LabeledSeries {
    pub series: RotationSeries,
    pub cheat: bool,
}

impl LabeledSeries {
    pub fn new(series: RotationSeries, cheat: bool) -> Self {
        Self { series, cheat }
    }
}

/// 学習用サンプル（1 チャンク + 平滑化済みラベル）
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub steps: Vec<[f64; 2]>,
    pub label: f64,
}

impl Sample {
    pub fn new(steps: Vec<[f64; 2]>, label: f64) -> Self {
        Self { steps, label }
    }

    /// 0.5 を閾値とした二値ラベル
    pub fn is_positive(&self) -> bool {
        self.label >= 0.5
    }
}

/// 重なりのない `CHUNK_SIZE` 幅の窓に分割する
///
/// 末尾の `MIN_STEPS` 未満の窓は捨てる。
pub fn chunk(pairs: &[[f64; 2]]) -> impl Iterator<Item = &[[f64; 2]]> {
    pairs.chunks(CHUNK_SIZE).filter(|c| c.len() >= MIN_STEPS)
}

/// 系列をラベル付きサンプル列に分割する
pub fn to_samples(series: &RotationSeries, label: f64) -> Vec<Sample> {
    let pairs = series.pairs();
    chunk(&pairs).map(|c| Sample::new(c.to_vec(), label)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(n: usize) -> RotationSeries {
        let yaw = (0..n).map(|i| i as f64).collect();
        let pitch = (0..n).map(|i| -(i as f64)).collect();
        RotationSeries::new(yaw, pitch)
    }

    #[test]
    fn test_chunk_drops_short_tail() {
        let s = series(301);
        let samples = to_samples(&s, 1.0);
        assert_eq!(samples.len(), 2);
        assert!(samples.iter().all(|x| x.steps.len() == CHUNK_SIZE));

        let s = series(302);
        let samples = to_samples(&s, 1.0);
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[2].steps.len(), 2);
    }

    #[test]
    fn test_pairs_truncate_to_shorter() {
        let s = RotationSeries::new(vec![1.0, 2.0, 3.0], vec![4.0, 5.0]);
        assert_eq!(s.len(), 2);
        assert_eq!(s.pairs(), vec![[1.0, 4.0], [2.0, 5.0]]);
    }

    #[test]
    fn test_single_step_has_no_samples() {
        assert!(to_samples(&series(1), 0.0).is_empty());
        assert!(to_samples(&series(0), 0.0).is_empty());
    }
}
