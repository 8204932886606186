//! 検証指標

use std::cmp::Ordering;

/// 確率を BCE に入れる前のクランプ幅
pub const PROB_EPS: f64 = 1e-15;

/// 二値交差エントロピー（p は [ε, 1−ε] にクランプ）
pub fn binary_cross_entropy(p: f64, y: f64) -> f64 {
    let p = p.clamp(PROB_EPS, 1.0 - PROB_EPS);
    -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
}

/// 予測確率とラベルの組
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PredictionPair {
    pub prob: f64,
    pub label: f64,
}

impl PredictionPair {
    pub fn is_positive(&self) -> bool {
        self.label >= 0.5
    }
}

/// 混同行列（閾値 0.5）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    pub true_positive: u64,
    pub true_negative: u64,
    pub false_positive: u64,
    pub false_negative: u64,
}

impl ConfusionMatrix {
    pub fn record(&mut self, predicted: bool, actual: bool) {
        match (actual, predicted) {
            (true, true) => self.true_positive += 1,
            (false, false) => self.true_negative += 1,
            (false, true) => self.false_positive += 1,
            (true, false) => self.false_negative += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.true_positive + self.true_negative + self.false_positive + self.false_negative
    }

    pub fn precision(&self) -> f64 {
        ratio(self.true_positive, self.true_positive + self.false_positive)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.true_positive, self.true_positive + self.false_negative)
    }

    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r == 0.0 { 0.0 } else { 2.0 * p * r / (p + r) }
    }

    pub fn false_positive_rate(&self) -> f64 {
        ratio(self.false_positive, self.false_positive + self.true_negative)
    }

    /// 正解率（%）
    pub fn accuracy(&self) -> f64 {
        ratio(self.true_positive + self.true_negative, self.total()) * 100.0
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

/// データセット 1 回分の評価結果
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DatasetMetrics {
    pub loss_sum: f64,
    pub used: usize,
    /// 短すぎる・確率が非有限で評価できなかった件数
    pub skipped: usize,
    pub confusion: ConfusionMatrix,
    pub pairs: Vec<PredictionPair>,
}

impl DatasetMetrics {
    /// 1 件を記録
    pub fn record(&mut self, prob: f64, label: f64) {
        let p = prob.clamp(PROB_EPS, 1.0 - PROB_EPS);
        self.loss_sum += binary_cross_entropy(p, label);
        self.confusion.record(p >= 0.5, label >= 0.5);
        self.pairs.push(PredictionPair { prob: p, label });
        self.used += 1;
    }

    pub fn average_loss(&self) -> f64 {
        if self.used == 0 { 0.0 } else { self.loss_sum / self.used as f64 }
    }

    /// 正解率（%）
    pub fn accuracy(&self) -> f64 {
        self.confusion.accuracy()
    }

    pub fn roc_auc(&self) -> f64 {
        roc_auc(&self.pairs)
    }

    pub fn pr_auc(&self) -> f64 {
        pr_auc(&self.pairs)
    }
}

/// 1 エポック分の報告
#[derive(Clone, Debug, PartialEq)]
pub struct EpochReport {
    /// 1 始まり
    pub epoch: usize,
    pub epochs: usize,
    pub train: DatasetMetrics,
    pub validation: DatasetMetrics,
    /// 学習中にスキップしたチャンク数（有効ステップ不足）
    pub skipped_invalid_chunks: usize,
    /// 学習中にスキップしたチャンク数（確率が非有限）
    pub skipped_non_finite_chunks: usize,
}

impl EpochReport {
    pub fn precision(&self) -> f64 {
        self.validation.confusion.precision()
    }

    pub fn recall(&self) -> f64 {
        self.validation.confusion.recall()
    }

    pub fn f1(&self) -> f64 {
        self.validation.confusion.f1()
    }

    pub fn false_positive_rate(&self) -> f64 {
        self.validation.confusion.false_positive_rate()
    }

    pub fn roc_auc(&self) -> f64 {
        self.validation.roc_auc()
    }

    pub fn pr_auc(&self) -> f64 {
        self.validation.pr_auc()
    }

    /// 指標をログに出す
    pub fn log(&self) {
        log::info!(
            "Epoch {}/{} | Train [Loss: {:.4}, Acc: {:.1}%] | Valid [Loss: {:.4}, Acc: {:.1}%]",
            self.epoch,
            self.epochs,
            self.train.average_loss(),
            self.train.accuracy(),
            self.validation.average_loss(),
            self.validation.accuracy(),
        );
        if self.skipped_invalid_chunks > 0
            || self.skipped_non_finite_chunks > 0
            || self.train.skipped > 0
            || self.validation.skipped > 0
        {
            log::warn!(
                "Skipped samples -> train chunks invalid: {}, \
                 train chunks non-finite probability: {}, \
                 train samples invalid/non-finite (eval): {}, \
                 validation samples invalid/non-finite (eval): {}",
                self.skipped_invalid_chunks,
                self.skipped_non_finite_chunks,
                self.train.skipped,
                self.validation.skipped,
            );
        }
        log::info!(
            "Validation Metrics -> Precision: {:.4} | Recall: {:.4} | F1: {:.4} | FPR: {:.4}",
            self.precision(),
            self.recall(),
            self.f1(),
            self.false_positive_rate(),
        );
        log::info!(
            "Advanced Metrics -> ROC-AUC: {:.4} | PR-AUC: {:.4}",
            self.roc_auc(),
            self.pr_auc()
        );
        let c = &self.validation.confusion;
        log::info!(
            "Confusion Matrix -> TP: {} | TN: {} | FP: {} | FN: {}",
            c.true_positive,
            c.true_negative,
            c.false_positive,
            c.false_negative,
        );
    }
}

fn by_prob(a: &PredictionPair, b: &PredictionPair) -> Ordering {
    a.prob.total_cmp(&b.prob)
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 }
}

/// ROC-AUC（同点は平均順位）
///
/// 正例・負例のどちらかが 0 件なら 0。
pub fn roc_auc(pairs: &[PredictionPair]) -> f64 {
    let mut sorted = pairs.to_vec();
    sorted.sort_by(by_prob);

    let mut pos = 0u64;
    let mut neg = 0u64;
    let mut sum_pos_ranks = 0.0;
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i;
        while j + 1 < sorted.len() && sorted[j + 1].prob == sorted[i].prob {
            j += 1;
        }
        let avg_rank = ((i + 1) + (j + 1)) as f64 * 0.5;
        for p in &sorted[i..=j] {
            if p.is_positive() {
                pos += 1;
                sum_pos_ranks += avg_rank;
            } else {
                neg += 1;
            }
        }
        i = j + 1;
    }

    if pos == 0 || neg == 0 {
        return 0.0;
    }
    let (pos, neg) = (pos as f64, neg as f64);
    clamp_unit((sum_pos_ranks - pos * (pos + 1.0) * 0.5) / (pos * neg))
}

/// PR-AUC（同点をまとめた閾値ごとの台形近似）
pub fn pr_auc(pairs: &[PredictionPair]) -> f64 {
    let mut sorted = pairs.to_vec();
    sorted.sort_by(|a, b| by_prob(b, a));

    let pos = sorted.iter().filter(|p| p.is_positive()).count() as f64;
    if pos == 0.0 {
        return 0.0;
    }

    let mut tp = 0.0;
    let mut fp = 0.0;
    let mut auc = 0.0;
    let mut prev_recall = 0.0;
    let mut prev_precision = 1.0;
    let mut i = 0;
    while i < sorted.len() {
        let score = sorted[i].prob;
        while i < sorted.len() && sorted[i].prob == score {
            if sorted[i].is_positive() {
                tp += 1.0;
            } else {
                fp += 1.0;
            }
            i += 1;
        }
        let recall = tp / pos;
        let precision = if tp + fp == 0.0 { 1.0 } else { tp / (tp + fp) };
        auc += (recall - prev_recall) * (precision + prev_precision) * 0.5;
        prev_recall = recall;
        prev_precision = precision;
    }
    clamp_unit(auc)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(data: &[(f64, f64)]) -> Vec<PredictionPair> {
        data.iter()
            .map(|&(prob, label)| PredictionPair { prob, label })
            .collect()
    }

    #[test]
    fn test_roc_auc_perfect_and_inverted() {
        let perfect = pairs(&[(0.9, 1.0), (0.8, 1.0), (0.2, 0.0), (0.1, 0.0)]);
        assert!((roc_auc(&perfect) - 1.0).abs() < 1e-12);
        let inverted = pairs(&[(0.1, 1.0), (0.2, 1.0), (0.8, 0.0), (0.9, 0.0)]);
        assert!(roc_auc(&inverted).abs() < 1e-12);
    }

    #[test]
    fn test_roc_auc_ties_use_average_rank() {
        let tied = pairs(&[(0.5, 1.0), (0.5, 0.0)]);
        assert!((roc_auc(&tied) - 0.5).abs() < 1e-12);
        let mixed = pairs(&[(0.3, 0.0), (0.6, 1.0), (0.6, 0.0), (0.9, 1.0)]);
        // 正例の順位 2.5 と 4
        assert!((roc_auc(&mixed) - 0.875).abs() < 1e-12);
    }

    #[test]
    fn test_auc_single_class_is_zero() {
        let only_pos = pairs(&[(0.9, 1.0), (0.4, 1.0)]);
        assert_eq!(roc_auc(&only_pos), 0.0);
        let only_neg = pairs(&[(0.9, 0.0), (0.4, 0.0)]);
        assert_eq!(roc_auc(&only_neg), 0.0);
        assert_eq!(pr_auc(&only_neg), 0.0);
        assert_eq!(roc_auc(&[]), 0.0);
        assert_eq!(pr_auc(&[]), 0.0);
    }

    #[test]
    fn test_pr_auc() {
        let perfect = pairs(&[(0.9, 1.0), (0.8, 1.0), (0.2, 0.0)]);
        assert!((pr_auc(&perfect) - 1.0).abs() < 1e-12);
        // 0.9:負 → 0.8:正。recall 1 に到達したとき precision 0.5
        let worse = pairs(&[(0.9, 0.0), (0.8, 1.0)]);
        assert!((pr_auc(&worse) - 0.5 * (0.5 + 0.0)).abs() < 1e-12);
    }

    #[test]
    fn test_confusion_ratios() {
        let mut c = ConfusionMatrix::default();
        c.record(true, true);
        c.record(true, false);
        c.record(false, false);
        c.record(false, true);
        c.record(true, true);
        assert_eq!(c.total(), 5);
        assert!((c.precision() - 2.0 / 3.0).abs() < 1e-12);
        assert!((c.recall() - 2.0 / 3.0).abs() < 1e-12);
        assert!((c.false_positive_rate() - 0.5).abs() < 1e-12);
        assert!((c.accuracy() - 60.0).abs() < 1e-12);
        assert_eq!(ConfusionMatrix::default().precision(), 0.0);
    }

    #[test]
    fn test_dataset_metrics_record() {
        let mut m = DatasetMetrics::default();
        m.record(1.0, 1.0);
        m.record(0.2, 0.0);
        assert_eq!(m.used, 2);
        assert!(m.loss_sum.is_finite());
        assert_eq!(m.confusion.true_positive, 1);
        assert_eq!(m.confusion.true_negative, 1);
        assert!((m.accuracy() - 100.0).abs() < 1e-12);
    }
}
